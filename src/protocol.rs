//! HTTP + SSE 协议定义
//!
//! 通信方式：
//! - 会话创建：`GET /makesession/{namespace}` → `{"log_id": "..."}`
//! - 事件流：`GET /chat/{id}/events`（text/event-stream，空行分隔帧）
//! - 查询提交：`POST /chat/{id}/send`，body 为消息数组

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// 事件流帧里的事件名
pub mod event_name {
    /// 未写 `event:` 行时的默认事件名
    pub const MESSAGE: &str = "message";
    pub const PARTIAL_COMMAND: &str = "partial_command";
    pub const RUNNING_COMMAND: &str = "running_command";
    pub const COMMAND_RESULT: &str = "command_result";
    pub const SEARCH_COMPLETE: &str = "search_complete";
    pub const FINISHED_CHAT: &str = "finished_chat";
}

/// 会话创建响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreated {
    /// 服务端分配的会话 ID
    pub log_id: String,
}

/// 查询消息（POST body 是它的数组）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl QueryMessage {
    /// 纯文本查询
    pub fn text(text: &str) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.to_string(),
        }
    }
}

/// partial_command / running_command 的 payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialCommandPayload {
    pub command: String,
    #[serde(default, deserialize_with = "lenient_string_map")]
    pub args: Option<BTreeMap<String, String>>,
}

/// command_result 中的单条结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    pub entity: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string_map")]
    pub properties: Option<BTreeMap<String, String>>,
}

/// command_result 的 payload
///
/// 后端发送 `{"result": {...}}`，也接受直接给出结果对象的扁平写法。
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommandResultPayload {
    Wrapped { result: ResultPayload },
    Flat(ResultPayload),
}

impl CommandResultPayload {
    pub fn into_result(self) -> ResultPayload {
        match self {
            CommandResultPayload::Wrapped { result } => result,
            CommandResultPayload::Flat(result) => result,
        }
    }
}

/// `{string: string}` 映射，非字符串值转成 JSON 文本（向前兼容）
fn lenient_string_map<'de, D>(deserializer: D) -> Result<Option<BTreeMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw.map(|map| {
        map.into_iter()
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect()
    }))
}
