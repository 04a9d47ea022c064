//! 会话客户端
//!
//! 管理会话生命周期：
//! 1. 申请会话 ID
//! 2. 连接事件流，启动读取任务
//! 3. 提交查询
//! 4. 读取任务逐帧解析、聚合，直到完成 / 失败 / 断开
//!
//! 所有效果都在持有核心锁时发出，订阅者看到的是单一的全序序列。
//! 每个会话有一个 epoch，断开或被新查询替换后 epoch 失效，旧任务的效果不会再发布。
//! epoch 变化同时通过 watch 通道通知进行中的网络请求，使其立即放弃。

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::broadcaster::{Broadcaster, EffectReceiver, SubscriberId};
use super::transport::SearchApi;
use crate::config::{ClientConfig, DuplicatePolicy};
use crate::error::{Error, Result};
use crate::pipeline::EventPipeline;
use crate::types::{EffectKind, Session, SessionEffect, SessionSnapshot, SessionState};

/// 会话客户端
///
/// 句柄可以廉价 clone，所有 clone 共享同一个会话。
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    api: SearchApi,
    shared: Arc<Shared>,
    /// 当前读取任务；命令持有此锁执行，保证同一时间只有一个命令在跑
    stream: tokio::sync::Mutex<Option<StreamTask>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.stream.get_mut().take() {
            task.handle.abort();
        }
    }
}

/// 后台读取任务
struct StreamTask {
    session_id: String,
    handle: JoinHandle<()>,
}

impl StreamTask {
    /// 中止并等待任务退出（连接随任务一起释放）
    async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
        tracing::debug!("🛑 读取任务已停止: session={}", self.session_id);
    }
}

impl SessionClient {
    /// 创建客户端（不发起任何网络请求）
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let api = SearchApi::new(&config)?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                api,
                shared: Arc::new(Shared::new()),
                stream: tokio::sync::Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// 订阅指定类型的效果
    pub fn subscribe(&self, kinds: &[EffectKind]) -> (SubscriberId, EffectReceiver) {
        self.inner
            .shared
            .broadcaster
            .attach(kinds, self.inner.config.channel_capacity)
    }

    /// 订阅全部效果
    pub fn subscribe_all(&self) -> (SubscriberId, EffectReceiver) {
        self.subscribe(&EffectKind::ALL)
    }

    /// 取消订阅
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner.shared.broadcaster.unregister(id);
    }

    /// 只取消部分效果类型的订阅
    pub fn unsubscribe_kinds(&self, id: SubscriberId, kinds: &[EffectKind]) {
        self.inner.shared.broadcaster.unsubscribe(id, kinds);
    }

    /// 当前订阅者数
    pub fn subscriber_count(&self) -> usize {
        self.inner.shared.broadcaster.subscriber_count()
    }

    /// 当前状态
    pub fn state(&self) -> SessionState {
        self.inner.shared.state()
    }

    /// 当前会话 ID
    pub fn session_id(&self) -> Option<String> {
        self.inner.shared.core.lock().snapshot.session.as_ref().map(|s| s.id.clone())
    }

    /// 会话快照
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.shared.core.lock().snapshot.clone()
    }

    /// 提交查询
    ///
    /// 每次查询都创建新会话；已有活跃事件流时先关闭它。
    /// 失败时状态变为 Failed 并发出一次 Error 效果，同时返回错误。
    /// 查询过程中被 [`disconnect`](Self::disconnect) 取消时，正在进行的请求立即放弃，返回 `Ok(())`。
    pub async fn submit_query(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyQuery);
        }

        let shared = &self.inner.shared;
        let api = &self.inner.api;
        let mut slot = self.inner.stream.lock().await;

        if shared.state().is_live() {
            shared.close("新查询替换当前会话");
        }
        if let Some(task) = slot.take() {
            task.stop().await;
        }

        let epoch = shared.begin_session();

        // 1. 申请会话
        let session_id = match shared.run_step(epoch, api.create_session()).await {
            Some(Ok(id)) => id,
            Some(Err(e)) => return shared.fail_submit(epoch, e),
            None => return Ok(()),
        };
        if !shared.attach_session(epoch, &session_id) {
            return Ok(());
        }

        // 2. 连接事件流
        let response = match shared.run_step(epoch, api.open_stream(&session_id)).await {
            Some(Ok(response)) => response,
            Some(Err(e)) => return shared.fail_submit(epoch, e),
            None => return Ok(()),
        };
        if !shared.transition(epoch, SessionState::StreamOpen, "事件流已建立") {
            return Ok(());
        }

        let handle = tokio::spawn(read_events(
            shared.clone(),
            epoch,
            session_id.clone(),
            response,
            self.inner.config.stream_idle_timeout(),
            self.inner.config.duplicate_policy,
        ));
        *slot = Some(StreamTask {
            session_id: session_id.clone(),
            handle,
        });

        // 3. 提交查询
        // 失败或取消时结束读取任务
        let aborted = match shared.run_step(epoch, api.send_query(&session_id, text)).await {
            Some(Ok(())) => None,
            Some(Err(e)) => Some(shared.fail_submit(epoch, e)),
            None => Some(Ok(())),
        };
        if let Some(result) = aborted {
            if let Some(task) = slot.take() {
                task.stop().await;
            }
            return result;
        }
        shared.transition(epoch, SessionState::Searching, format!("查询已提交: {}", text));

        Ok(())
    }

    /// 取消当前查询（等同于断开）
    pub async fn cancel(&self) {
        self.disconnect().await;
    }

    /// 断开当前会话
    ///
    /// 任意状态下都可以调用，重复调用无效果。进行中的请求会立即放弃，
    /// 返回前保证读取任务已经停止。
    pub async fn disconnect(&self) {
        let closed = self.inner.shared.close("客户端主动断开");

        let mut slot = self.inner.stream.lock().await;
        if let Some(task) = slot.take() {
            task.stop().await;
        }

        if !closed {
            tracing::debug!("disconnect: 没有可关闭的会话");
        }
    }
}

/// 读取任务推进结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamProgress {
    Continue,
    Completed,
    /// 会话已被断开或替换
    Stale,
}

/// 会话核心状态（所有修改都在锁内进行）
struct SessionCore {
    /// 当前会话所属 epoch
    epoch: u64,
    snapshot: SessionSnapshot,
}

/// 读取任务与命令共享的部分
struct Shared {
    core: Mutex<SessionCore>,
    broadcaster: Arc<Broadcaster>,
    next_epoch: AtomicU64,
    /// 当前 epoch 的广播（在核心锁内更新）
    epoch_tx: watch::Sender<u64>,
}

impl Shared {
    fn new() -> Self {
        Self {
            core: Mutex::new(SessionCore {
                epoch: 0,
                snapshot: SessionSnapshot::default(),
            }),
            broadcaster: Broadcaster::new(),
            next_epoch: AtomicU64::new(1),
            epoch_tx: watch::Sender::new(0),
        }
    }

    fn state(&self) -> SessionState {
        self.core.lock().snapshot.state
    }

    /// 开始新会话：分配 epoch，清空上一次的结果，进入 Creating
    fn begin_session(&self) -> u64 {
        let mut core = self.core.lock();
        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst);
        core.epoch = epoch;
        self.epoch_tx.send_replace(epoch);
        core.snapshot.session = None;
        core.snapshot.results.clear();
        core.snapshot.in_progress = None;
        core.snapshot.last_error = None;
        self.transition_locked(&mut core, SessionState::Creating, "创建会话".to_string());
        epoch
    }

    /// 记录会话 ID 并进入 StreamConnecting
    fn attach_session(&self, epoch: u64, session_id: &str) -> bool {
        let mut core = self.core.lock();
        if core.epoch != epoch {
            return false;
        }
        core.snapshot.session = Some(Session {
            id: session_id.to_string(),
            created_at: Utc::now(),
        });
        self.transition_locked(
            &mut core,
            SessionState::StreamConnecting,
            format!("会话已创建: {}", session_id),
        )
    }

    /// 带 epoch 校验的状态迁移
    fn transition(&self, epoch: u64, next: SessionState, message: impl Into<String>) -> bool {
        let mut core = self.core.lock();
        if core.epoch != epoch {
            tracing::debug!("忽略过期迁移: epoch={}, next={}", epoch, next);
            return false;
        }
        self.transition_locked(&mut core, next, message.into())
    }

    fn transition_locked(&self, core: &mut SessionCore, next: SessionState, message: String) -> bool {
        let current = core.snapshot.state;
        if !current.can_transition_to(next) {
            tracing::debug!("忽略非法迁移: {} → {}", current, next);
            return false;
        }

        core.snapshot.state = next;
        if !next.is_live() {
            core.snapshot.in_progress = None;
        }

        tracing::info!("🔄 {} → {}: {}", current, next, message);
        self.broadcaster.broadcast(&SessionEffect::Status {
            state: next,
            message,
        });
        true
    }

    /// 进入 Failed 并发出一次 Error 效果
    fn fail(&self, epoch: u64, reason: String) -> bool {
        let mut core = self.core.lock();
        if core.epoch != epoch {
            tracing::debug!("忽略过期失败: epoch={}, reason={}", epoch, reason);
            return false;
        }
        if !self.transition_locked(&mut core, SessionState::Failed, reason.clone()) {
            return false;
        }

        tracing::error!("❌ 会话失败: {}", reason);
        core.snapshot.last_error = Some(reason.clone());
        self.broadcaster.broadcast(&SessionEffect::Error { message: reason });
        true
    }

    /// 查询步骤失败；已被取消的会话不报告错误
    fn fail_submit(&self, epoch: u64, error: Error) -> Result<()> {
        let cancelled = self.core.lock().epoch != epoch;
        if cancelled {
            tracing::debug!("会话已取消，忽略错误: {}", error);
            return Ok(());
        }
        self.fail(epoch, error.to_string());
        Err(error)
    }

    /// 关闭当前会话并使其 epoch 失效
    fn close(&self, reason: &str) -> bool {
        let mut core = self.core.lock();
        if !self.transition_locked(&mut core, SessionState::Closed, reason.to_string()) {
            return false;
        }
        core.epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst);
        self.epoch_tx.send_replace(core.epoch);
        true
    }

    /// 等待 epoch 失效
    async fn cancelled(&self, epoch: u64) {
        let mut rx = self.epoch_tx.subscribe();
        // 发送端与 Shared 同生命周期，这里不会因通道关闭而返回错误
        let _ = rx.wait_for(|current| *current != epoch).await;
    }

    /// 执行一个网络步骤；epoch 失效时立即放弃并返回 None
    async fn run_step<T>(&self, epoch: u64, step: impl Future<Output = Result<T>>) -> Option<Result<T>> {
        tokio::select! {
            result = step => Some(result),
            _ = self.cancelled(epoch) => {
                tracing::debug!("会话已取消，放弃进行中的请求: epoch={}", epoch);
                None
            }
        }
    }

    /// 发布读取任务产生的效果
    fn apply_stream_effects(&self, epoch: u64, effects: Vec<SessionEffect>) -> StreamProgress {
        let mut core = self.core.lock();
        if core.epoch != epoch {
            return StreamProgress::Stale;
        }

        let mut progress = StreamProgress::Continue;
        for effect in effects {
            match &effect {
                SessionEffect::InProgressCommand { text } => {
                    core.snapshot.in_progress = Some(text.clone());
                }
                SessionEffect::ResultAdded(record) => {
                    core.snapshot.results.push(record.clone());
                }
                _ => {}
            }

            let completed = matches!(effect, SessionEffect::Completed { .. });
            self.broadcaster.broadcast(&effect);

            if completed {
                let count = core.snapshot.results.len();
                self.transition_locked(
                    &mut core,
                    SessionState::Complete,
                    format!("搜索完成，共 {} 条结果", count),
                );
                progress = StreamProgress::Completed;
                break;
            }
        }
        progress
    }
}

/// 事件流读取循环
async fn read_events(
    shared: Arc<Shared>,
    epoch: u64,
    session_id: String,
    response: reqwest::Response,
    idle_timeout: Duration,
    policy: DuplicatePolicy,
) {
    let mut stream = response.bytes_stream();
    let mut pipeline = EventPipeline::new(policy);
    tracing::debug!("📥 读取任务启动: session={}", session_id);

    loop {
        match timeout(idle_timeout, stream.next()).await {
            Ok(Some(Ok(chunk))) => {
                let effects = pipeline.feed(&chunk);
                match shared.apply_stream_effects(epoch, effects) {
                    StreamProgress::Continue => {}
                    StreamProgress::Completed => break,
                    StreamProgress::Stale => {
                        tracing::debug!("会话已失效，停止读取: session={}", session_id);
                        break;
                    }
                }
            }
            Ok(Some(Err(e))) => {
                shared.fail(epoch, format!("事件流错误: {}", e.without_url()));
                break;
            }
            Ok(None) => {
                shared.fail(epoch, "事件流在搜索完成前关闭".to_string());
                break;
            }
            Err(_) => {
                shared.fail(epoch, format!("事件流空闲超时 ({}s)", idle_timeout.as_secs()));
                break;
            }
        }
    }

    tracing::debug!(
        "📤 读取任务结束: session={}, results={}, buffered={}",
        session_id,
        pipeline.results().len(),
        pipeline.buffered_len()
    );
}
