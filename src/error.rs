//! 错误类型定义

use std::fmt;

use thiserror::Error;

/// 发起请求的阶段（用于区分失败发生在哪一步）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    /// 创建会话（GET /makesession）
    CreateSession,
    /// 打开事件流（GET /chat/{id}/events）
    OpenStream,
    /// 提交查询（POST /chat/{id}/send）
    SendQuery,
}

impl fmt::Display for RequestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStage::CreateSession => write!(f, "创建会话"),
            RequestStage::OpenStream => write!(f, "打开事件流"),
            RequestStage::SendQuery => write!(f, "提交查询"),
        }
    }
}

/// 库错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP 传输错误（连接拒绝、超时、中途断开）
    ///
    /// 不携带请求 URL（URL 中有 api_key）
    #[cfg(feature = "client")]
    #[error("HTTP 错误: {0}")]
    Http(reqwest::Error),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 连接错误（事件流异常结束等）
    #[error("连接错误: {0}")]
    Connection(String),

    /// 服务端返回非 200 状态码
    #[error("{stage}失败: HTTP {status}")]
    Status { stage: RequestStage, status: u16 },

    /// 协议错误（响应体不符合约定）
    #[error("协议错误: {0}")]
    Protocol(String),

    /// 查询内容为空
    #[error("查询内容为空")]
    EmptyQuery,

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

#[cfg(feature = "client")]
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.without_url())
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, Error>;
