//! 客户端配置

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// 默认服务地址（本地后端）
pub const DEFAULT_BASE_URL: &str = "http://localhost:8020";

/// 默认会话命名空间
pub const DEFAULT_NAMESPACE: &str = "kg2";

/// 重复结果的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// 无条件追加（同一 identifier 可以出现多次）
    #[default]
    Append,
    /// 按 identifier 去重，保留第一次出现的结果
    Dedup,
}

/// 会话客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// 服务根地址，例如 "http://localhost:8020"
    pub base_url: String,
    /// 会话命名空间（/makesession/{namespace}）
    pub namespace: String,
    /// API key（作为 api_key 查询参数发送）
    pub api_key: String,
    /// 普通请求超时（毫秒），不作用于事件流
    pub request_timeout_ms: u64,
    /// 建立连接超时（毫秒）
    pub connect_timeout_ms: u64,
    /// 事件流空闲超时（秒），超过则视为连接中断
    pub stream_idle_timeout_secs: u64,
    /// 每个订阅者的通道容量
    pub channel_capacity: usize,
    /// 重复结果策略
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            api_key: String::new(),
            request_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            stream_idle_timeout_secs: 600,
            channel_capacity: 256,
            duplicate_policy: DuplicatePolicy::Append,
        }
    }
}

impl ClientConfig {
    /// 创建新的配置
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            ..Default::default()
        }
    }

    /// 设置命名空间
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    /// 设置重复结果策略
    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// 设置事件流空闲超时
    pub fn with_stream_idle_timeout(mut self, secs: u64) -> Self {
        self.stream_idle_timeout_secs = secs;
        self
    }

    /// 默认配置文件路径: ~/.scout/config.json
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".scout")
            .join("config.json")
    }

    /// 从默认配置文件加载（不存在时使用默认值），再应用环境变量覆盖
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        Ok(config.apply_env())
    }

    /// 从指定 JSON 文件加载（缺省字段使用默认值）
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从环境变量创建配置
    ///
    /// - `SCOUT_BASE_URL`: 服务根地址
    /// - `SCOUT_API_KEY`: API key
    /// - `SCOUT_NAMESPACE`: 会话命名空间
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var("SCOUT_BASE_URL") {
            self.base_url = url;
        }
        if let Ok(key) = std::env::var("SCOUT_API_KEY") {
            self.api_key = key;
        }
        if let Ok(namespace) = std::env::var("SCOUT_NAMESPACE") {
            self.namespace = namespace;
        }
        self
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "base_url 必须以 http:// 或 https:// 开头: {}",
                self.base_url
            )));
        }
        self.endpoint(&[])?;
        if self.namespace.is_empty() || self.namespace.contains('/') {
            return Err(Error::Config(format!("无效的 namespace: {:?}", self.namespace)));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config("channel_capacity 不能为 0".to_string()));
        }
        Ok(())
    }

    /// 在 base_url 之后追加路径段（逐段转义）
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("无效的 base_url {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("base_url 不能作为根地址: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// 会话创建地址
    pub fn session_url(&self) -> Result<Url> {
        self.endpoint(&["makesession", self.namespace.as_str()])
    }

    /// 事件流地址
    pub fn events_url(&self, session_id: &str) -> Result<Url> {
        self.endpoint(&["chat", session_id, "events"])
    }

    /// 查询提交地址
    pub fn send_url(&self, session_id: &str) -> Result<Url> {
        self.endpoint(&["chat", session_id, "send"])
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides() {
        std::env::set_var("SCOUT_BASE_URL", "https://env.example.com");
        std::env::set_var("SCOUT_API_KEY", "env-key");
        std::env::set_var("SCOUT_NAMESPACE", "kg9");

        let config = ClientConfig::from_env();

        std::env::remove_var("SCOUT_BASE_URL");
        std::env::remove_var("SCOUT_API_KEY");
        std::env::remove_var("SCOUT_NAMESPACE");

        assert_eq!(config.base_url, "https://env.example.com");
        assert_eq!(config.api_key, "env-key");
        assert_eq!(config.namespace, "kg9");
        assert_eq!(config.session_url().unwrap().as_str(), "https://env.example.com/makesession/kg9");
    }

    #[test]
    fn test_duplicate_policy_serde() {
        assert_eq!(serde_json::to_string(&DuplicatePolicy::Dedup).unwrap(), "\"dedup\"");
        let policy: DuplicatePolicy = serde_json::from_str("\"append\"").unwrap();
        assert_eq!(policy, DuplicatePolicy::Append);
    }
}
