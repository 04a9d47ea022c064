//! 事件解析
//!
//! 一个帧由若干 `key: value` 行组成：
//! - `event` 指定事件名（缺省为 `message`）
//! - 一行或多行 `data` 按顺序直接拼接（不插入换行），组成 JSON payload
//! - `:` 开头的行是注释（心跳）
//!
//! 解析失败只产生 [`DomainEvent::Malformed`]，不会中断事件流。

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;

use crate::frame::RawFrame;
use crate::protocol::{event_name, CommandResultPayload, PartialCommandPayload, ResultPayload};

/// 帧中的原始字段
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameFields {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
    /// 是否出现过任何字段行（否则是纯注释 / 空帧）
    pub has_fields: bool,
}

impl FrameFields {
    /// 按行解析帧文本
    pub fn parse(text: &str) -> Self {
        let mut fields = FrameFields::default();

        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let (key, value) = match line.find(':') {
                Some(pos) => {
                    let value = &line[pos + 1..];
                    (&line[..pos], value.strip_prefix(' ').unwrap_or(value))
                }
                None => (line, ""),
            };

            fields.has_fields = true;
            match key {
                "event" => fields.event = Some(value.to_string()),
                "data" => fields.data.push_str(value),
                "id" => fields.id = Some(value.to_string()),
                "retry" => fields.retry = value.trim().parse().ok(),
                other => tracing::trace!("忽略未知字段: {}", other),
            }
        }

        fields
    }

    /// 事件名（缺省 `message`）
    pub fn event_name(&self) -> &str {
        match self.event.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => event_name::MESSAGE,
        }
    }
}

/// payload 解析失败的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    /// data 为空
    EmptyPayload,
    /// data 不是合法 JSON
    InvalidJson(String),
    /// JSON 结构与事件类型不匹配
    UnexpectedShape(String),
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseFailure::EmptyPayload => write!(f, "payload 为空"),
            ParseFailure::InvalidJson(e) => write!(f, "payload 不是合法 JSON: {}", e),
            ParseFailure::UnexpectedShape(e) => write!(f, "payload 结构不匹配: {}", e),
        }
    }
}

/// 领域事件
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// 进行中的命令（partial_command / running_command）
    PartialCommand {
        command: String,
        args: BTreeMap<String, String>,
    },
    /// 一条结果（command_result）
    CommandResult(ResultPayload),
    /// 搜索结束（search_complete / finished_chat）
    SearchComplete,
    /// 只有注释或空行的帧
    Heartbeat,
    /// 未知事件名，原样保留
    Unknown { name: String, raw: String },
    /// 已知事件名但 payload 无法解析
    Malformed {
        name: String,
        raw: String,
        reason: ParseFailure,
    },
}

impl DomainEvent {
    /// 事件名（用于日志和诊断）
    pub fn name(&self) -> &str {
        match self {
            DomainEvent::PartialCommand { .. } => event_name::PARTIAL_COMMAND,
            DomainEvent::CommandResult(_) => event_name::COMMAND_RESULT,
            DomainEvent::SearchComplete => event_name::SEARCH_COMPLETE,
            DomainEvent::Heartbeat => "heartbeat",
            DomainEvent::Unknown { name, .. } | DomainEvent::Malformed { name, .. } => name,
        }
    }

    /// 需要作为诊断上报的事件
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            DomainEvent::Unknown { name, .. } => Some(format!("未知事件类型: {}", name)),
            DomainEvent::Malformed { reason, .. } => Some(reason.to_string()),
            _ => None,
        }
    }
}

/// 事件解析器
#[derive(Debug, Default)]
pub struct EventParser {
    last_event_id: Option<String>,
}

impl EventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最近一次出现的 `id` 字段
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// 解析一个完整帧
    pub fn parse(&mut self, frame: &RawFrame) -> DomainEvent {
        let text = frame.to_text();
        let fields = FrameFields::parse(&text);

        if !fields.has_fields {
            return DomainEvent::Heartbeat;
        }
        if let Some(ref id) = fields.id {
            self.last_event_id = Some(id.clone());
        }

        let name = fields.event_name().to_string();
        let outcome = match name.as_str() {
            event_name::PARTIAL_COMMAND | event_name::RUNNING_COMMAND => {
                decode::<PartialCommandPayload>(&fields.data).map(|payload| {
                    DomainEvent::PartialCommand {
                        command: payload.command,
                        args: payload.args.unwrap_or_default(),
                    }
                })
            }
            event_name::COMMAND_RESULT => decode::<CommandResultPayload>(&fields.data)
                .map(|payload| DomainEvent::CommandResult(normalize(payload.into_result()))),
            event_name::SEARCH_COMPLETE | event_name::FINISHED_CHAT => {
                // 结束事件没有必需字段，允许空 payload
                if fields.data.trim().is_empty() {
                    Ok(DomainEvent::SearchComplete)
                } else {
                    serde_json::from_str::<serde_json::Value>(&fields.data)
                        .map(|_| DomainEvent::SearchComplete)
                        .map_err(|e| ParseFailure::InvalidJson(e.to_string()))
                }
            }
            _ => {
                return DomainEvent::Unknown {
                    name,
                    raw: text.into_owned(),
                }
            }
        };

        match outcome {
            Ok(event) => event,
            Err(reason) => {
                tracing::warn!("⚠️ 无法解析事件 {}: {}", name, reason);
                DomainEvent::Malformed {
                    name,
                    raw: text.into_owned(),
                    reason,
                }
            }
        }
    }
}

fn decode<T: DeserializeOwned>(data: &str) -> Result<T, ParseFailure> {
    if data.trim().is_empty() {
        return Err(ParseFailure::EmptyPayload);
    }
    let value: serde_json::Value =
        serde_json::from_str(data).map_err(|e| ParseFailure::InvalidJson(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| ParseFailure::UnexpectedShape(e.to_string()))
}

/// 相关度限制在 [0, 1]
fn normalize(mut result: ResultPayload) -> ResultPayload {
    if let Some(score) = result.score {
        let clamped = score.clamp(0.0, 1.0);
        if clamped != score {
            tracing::debug!("score {} 超出范围，截断为 {}: entity={}", score, clamped, result.entity);
            result.score = Some(clamped);
        }
    }
    result
}
