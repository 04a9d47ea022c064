//! scout-search-client - 流式搜索会话客户端
//!
//! 向远端搜索服务申请会话，建立绑定该会话的事件流（SSE），通过独立通道提交查询，
//! 把字节流增量解析成类型化事件并聚合成结果列表，同时跟踪会话生命周期。
//!
//! # 核心功能
//!
//! - **帧重组**: 任意切块的字节流 → 完整帧（`\n\n` / `\r\n\r\n`）
//! - **事件解析**: 帧 → 领域事件，格式错误只产生诊断，不中断事件流
//! - **结果聚合**: 按到达顺序保存结果，可选按 identifier 去重
//! - **会话客户端**: 创建会话 + 事件流 + 查询提交 + 取消
//!
//! # Feature Flags
//!
//! - `client`: 网络客户端（reqwest），默认开启
//!
//! # 架构
//!
//! UI 通过 [`SessionClient`] 发出命令（提交查询、取消），并订阅 [`SessionEffect`]。
//! 会话状态只由客户端自身修改，UI 只读取快照或效果流。

pub mod aggregator;
pub mod config;
pub mod error;
pub mod frame;
pub mod parser;
pub mod pipeline;
pub mod protocol;
pub mod types;

#[cfg(feature = "client")]
pub mod client;

// Re-exports
pub use aggregator::{AggregatorEffect, ResultAggregator};
pub use config::{ClientConfig, DuplicatePolicy};
pub use error::{Error, RequestStage, Result};
pub use frame::{FrameReassembler, RawFrame};
pub use parser::{DomainEvent, EventParser, ParseFailure};
pub use pipeline::EventPipeline;
pub use types::*;

#[cfg(feature = "client")]
pub use client::{SessionClient, SubscriberId};
