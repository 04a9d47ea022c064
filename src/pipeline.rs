//! 事件处理管线
//!
//! 字节块 → [`FrameReassembler`] → [`EventParser`] → [`ResultAggregator`] → [`SessionEffect`]
//!
//! 不涉及网络，读取任务和测试都直接驱动它。

use crate::aggregator::{AggregatorEffect, ResultAggregator};
use crate::config::DuplicatePolicy;
use crate::frame::FrameReassembler;
use crate::parser::EventParser;
use crate::types::{ResultRecord, SessionEffect};

/// 单个事件流的处理管线
#[derive(Debug, Default)]
pub struct EventPipeline {
    reassembler: FrameReassembler,
    parser: EventParser,
    aggregator: ResultAggregator,
}

impl EventPipeline {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            reassembler: FrameReassembler::new(),
            parser: EventParser::new(),
            aggregator: ResultAggregator::new(policy),
        }
    }

    /// 处理一个字节块，按帧到达顺序返回效果
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SessionEffect> {
        let mut effects = Vec::new();

        for frame in self.reassembler.feed(chunk) {
            if self.aggregator.is_completed() {
                tracing::trace!("搜索已完成，丢弃后续帧 ({} bytes)", frame.len());
                continue;
            }

            let event = self.parser.parse(&frame);
            tracing::debug!("📨 事件: {}", event.name());

            if let Some(reason) = event.diagnostic() {
                tracing::warn!("⚠️ 诊断: event={}, reason={}", event.name(), reason);
                effects.push(SessionEffect::Diagnostic {
                    event: event.name().to_string(),
                    reason,
                });
                continue;
            }

            match self.aggregator.apply(&event) {
                AggregatorEffect::StatusUpdate(text) => {
                    effects.push(SessionEffect::InProgressCommand { text })
                }
                AggregatorEffect::ResultAdded(record) => {
                    effects.push(SessionEffect::ResultAdded(record))
                }
                AggregatorEffect::Completed => effects.push(SessionEffect::Completed {
                    result_count: self.aggregator.len(),
                }),
                AggregatorEffect::NoOp => {}
            }
        }

        effects
    }

    pub fn is_completed(&self) -> bool {
        self.aggregator.is_completed()
    }

    pub fn results(&self) -> &[ResultRecord] {
        self.aggregator.results()
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.parser.last_event_id()
    }

    /// 等待分隔符的残余字节数
    pub fn buffered_len(&self) -> usize {
        self.reassembler.buffered_len()
    }
}
