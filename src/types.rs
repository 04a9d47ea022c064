//! 数据类型定义

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 会话状态
///
/// `Idle → Creating → StreamConnecting → StreamOpen → Searching → Complete | Failed → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// 尚未发起过查询
    Idle,
    /// 正在向服务端申请会话 ID
    Creating,
    /// 会话已创建，正在连接事件流
    StreamConnecting,
    /// 事件流已建立（Active），查询尚未确认
    StreamOpen,
    /// 查询已提交，等待结果
    Searching,
    /// 收到结束事件
    Complete,
    /// 传输或服务端错误
    Failed,
    /// 客户端主动断开
    Closed,
}

impl SessionState {
    /// 是否存在（或正在建立）活跃的事件流
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Creating
                | SessionState::StreamConnecting
                | SessionState::StreamOpen
                | SessionState::Searching
        )
    }

    /// 合法的状态迁移
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle | Complete | Failed | Closed, Creating) => true,
            (Creating, StreamConnecting) => true,
            (StreamConnecting, StreamOpen) => true,
            (StreamOpen, Searching) => true,
            (StreamOpen | Searching, Complete) => true,
            (Creating | StreamConnecting | StreamOpen | Searching, Failed) => true,
            (Creating | StreamConnecting | StreamOpen | Searching | Complete | Failed, Closed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Creating => write!(f, "creating"),
            SessionState::StreamConnecting => write!(f, "stream_connecting"),
            SessionState::StreamOpen => write!(f, "stream_open"),
            SessionState::Searching => write!(f, "searching"),
            SessionState::Complete => write!(f, "complete"),
            SessionState::Failed => write!(f, "failed"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// 会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// 服务端分配的会话 ID（不透明）
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// 一条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// 结果标识（后端的 entity），也是去重键
    pub identifier: String,
    /// 结果类型（后端的 type）
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// 相关度，范围 [0, 1]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, String>>,
}

/// 推送给订阅者的效果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEffect {
    /// 状态迁移
    Status {
        state: SessionState,
        message: String,
    },

    /// 进行中的命令（旁白，不是结果）
    InProgressCommand {
        text: String,
    },

    /// 新结果
    ResultAdded(ResultRecord),

    /// 搜索完成
    Completed {
        result_count: usize,
    },

    /// 会话失败（每个会话至多一次）
    Error {
        message: String,
    },

    /// 协议诊断（帧无法解析等），不终止事件流
    Diagnostic {
        event: String,
        reason: String,
    },
}

impl SessionEffect {
    /// 获取效果类型
    pub fn kind(&self) -> EffectKind {
        match self {
            SessionEffect::Status { .. } => EffectKind::Status,
            SessionEffect::InProgressCommand { .. } => EffectKind::InProgressCommand,
            SessionEffect::ResultAdded(_) => EffectKind::ResultAdded,
            SessionEffect::Completed { .. } => EffectKind::Completed,
            SessionEffect::Error { .. } => EffectKind::Error,
            SessionEffect::Diagnostic { .. } => EffectKind::Diagnostic,
        }
    }
}

/// 效果类型（用于订阅过滤）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectKind {
    Status,
    InProgressCommand,
    ResultAdded,
    Completed,
    Error,
    Diagnostic,
}

impl EffectKind {
    pub const ALL: [EffectKind; 6] = [
        EffectKind::Status,
        EffectKind::InProgressCommand,
        EffectKind::ResultAdded,
        EffectKind::Completed,
        EffectKind::Error,
        EffectKind::Diagnostic,
    ];
}

/// 会话快照（只读副本，供 UI 读取）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: Option<Session>,
    pub state: SessionState,
    /// 按到达顺序排列的结果；失败后保留
    pub results: Vec<ResultRecord>,
    pub in_progress: Option<String>,
    pub last_error: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            session: None,
            state: SessionState::Idle,
            results: Vec::new(),
            in_progress: None,
            last_error: None,
        }
    }
}
