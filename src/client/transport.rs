//! HTTP 传输
//!
//! 会话创建、事件流连接、查询提交三个请求

use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Response, StatusCode};
use tokio::time::timeout;

use crate::config::ClientConfig;
use crate::error::{Error, RequestStage, Result};
use crate::protocol::{QueryMessage, SessionCreated};

/// 搜索服务 API
#[derive(Debug, Clone)]
pub struct SearchApi {
    http: reqwest::Client,
    config: ClientConfig,
}

impl SearchApi {
    /// 创建 API 客户端
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    /// 申请新会话，返回服务端分配的会话 ID
    pub async fn create_session(&self) -> Result<String> {
        let url = self.config.session_url()?;
        tracing::debug!("🆕 创建会话: {}", url);

        let response = self
            .http
            .get(url)
            .query(&[("api_key", self.config.api_key.as_str())])
            .timeout(self.config.request_timeout())
            .send()
            .await?;
        let response = check_status(RequestStage::CreateSession, response)?;

        let body = response.bytes().await?;
        let created: SessionCreated = serde_json::from_slice(&body)
            .map_err(|e| Error::Protocol(format!("会话创建响应无法解析: {}", e)))?;

        let id = created.log_id.trim();
        if id.is_empty() || id.contains('/') {
            return Err(Error::Protocol(format!("无效的会话 ID: {:?}", created.log_id)));
        }

        tracing::info!("✅ 会话已创建: {}", id);
        Ok(id.to_string())
    }

    /// 连接事件流（收到 200 响应头即视为连接确认）
    ///
    /// 响应头的等待受 request_timeout 限制，之后的事件流本身不设总超时。
    pub async fn open_stream(&self, session_id: &str) -> Result<Response> {
        let url = self.config.events_url(session_id)?;
        tracing::debug!("🔌 连接事件流: {}", url);

        let request = self
            .http
            .get(url)
            .query(&[("api_key", self.config.api_key.as_str())])
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send();

        let response = timeout(self.config.request_timeout(), request)
            .await
            .map_err(|_| {
                Error::Connection(format!(
                    "等待事件流响应超时 ({}ms)",
                    self.config.request_timeout_ms
                ))
            })??;

        check_status(RequestStage::OpenStream, response)
    }

    /// 提交查询
    pub async fn send_query(&self, session_id: &str, text: &str) -> Result<()> {
        let url = self.config.send_url(session_id)?;
        tracing::debug!("📤 提交查询: session={}, len={}", session_id, text.len());

        let body = vec![QueryMessage::text(text)];
        let response = self
            .http
            .post(url)
            .query(&[("api_key", self.config.api_key.as_str())])
            .json(&body)
            .timeout(self.config.request_timeout())
            .send()
            .await?;

        check_status(RequestStage::SendQuery, response)?;
        Ok(())
    }
}

fn check_status(stage: RequestStage, response: Response) -> Result<Response> {
    let status = response.status();
    if status != StatusCode::OK {
        tracing::warn!("{}返回 HTTP {}", stage, status);
        return Err(Error::Status {
            stage,
            status: status.as_u16(),
        });
    }
    Ok(response)
}
