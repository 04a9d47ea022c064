//! 效果广播器
//!
//! 维护订阅列表，将会话效果推送给订阅者（UI 等）

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::types::{EffectKind, SessionEffect};

/// 订阅者 ID
pub type SubscriberId = u64;

/// 效果发送通道
pub type EffectSender = mpsc::Sender<SessionEffect>;

/// 效果接收通道
pub type EffectReceiver = mpsc::Receiver<SessionEffect>;

/// 效果广播器
pub struct Broadcaster {
    /// 订阅关系：SubscriberId → 订阅的效果类型
    subscriptions: RwLock<HashMap<SubscriberId, HashSet<EffectKind>>>,
    /// 订阅者通道：SubscriberId → 发送通道
    senders: RwLock<HashMap<SubscriberId, EffectSender>>,
    /// 下一个订阅者 ID
    next_id: RwLock<SubscriberId>,
}

impl Broadcaster {
    /// 创建新的广播器
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 注册新订阅者，返回订阅者 ID
    pub fn register(&self, sender: EffectSender) -> SubscriberId {
        let mut next_id = self.next_id.write();
        let id = *next_id;
        *next_id += 1;

        self.senders.write().insert(id, sender);
        self.subscriptions.write().insert(id, HashSet::new());

        tracing::debug!("📡 Subscriber registered: id={}", id);
        id
    }

    /// 注销订阅者
    pub fn unregister(&self, id: SubscriberId) {
        self.senders.write().remove(&id);
        self.subscriptions.write().remove(&id);
        tracing::debug!("📡 Subscriber unregistered: id={}", id);
    }

    /// 订阅效果类型
    pub fn subscribe(&self, id: SubscriberId, kinds: &[EffectKind]) {
        if let Some(sub) = self.subscriptions.write().get_mut(&id) {
            sub.extend(kinds.iter().copied());
            tracing::debug!("📡 Subscribed: id={}, kinds={:?}", id, kinds);
        }
    }

    /// 取消订阅
    pub fn unsubscribe(&self, id: SubscriberId, kinds: &[EffectKind]) {
        if let Some(sub) = self.subscriptions.write().get_mut(&id) {
            for kind in kinds {
                sub.remove(kind);
            }
            tracing::debug!("📡 Unsubscribed: id={}, kinds={:?}", id, kinds);
        }
    }

    /// 创建通道、注册并订阅，返回 (ID, 接收端)
    pub fn attach(&self, kinds: &[EffectKind], capacity: usize) -> (SubscriberId, EffectReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = self.register(tx);
        self.subscribe(id, kinds);
        (id, rx)
    }

    /// 广播效果给所有订阅者（非阻塞，fire-and-forget）
    pub fn broadcast(&self, effect: &SessionEffect) {
        let kind = effect.kind();

        // 获取需要推送的订阅者
        let targets: Vec<(SubscriberId, EffectSender)> = {
            let subs = self.subscriptions.read();
            let senders = self.senders.read();

            subs.iter()
                .filter(|(_, subscribed)| subscribed.contains(&kind))
                .filter_map(|(id, _)| senders.get(id).map(|s| (*id, s.clone())))
                .collect()
        };

        if targets.is_empty() {
            tracing::trace!("📡 No subscribers: kind={:?}", kind);
            return;
        }

        tracing::trace!("📡 Broadcasting: kind={:?}, subscribers={}", kind, targets.len());

        let mut closed = Vec::new();
        for (id, sender) in targets {
            if let Err(e) = sender.try_send(effect.clone()) {
                match e {
                    mpsc::error::TrySendError::Full(_) => {
                        tracing::warn!("📡 Channel full, dropping effect: id={}, kind={:?}", id, kind);
                    }
                    mpsc::error::TrySendError::Closed(_) => {
                        tracing::debug!("📡 Channel closed: id={}", id);
                        closed.push(id);
                    }
                }
            }
        }

        // 接收端已丢弃的订阅者直接注销
        for id in closed {
            self.unregister(id);
        }
    }

    /// 获取当前订阅者数
    pub fn subscriber_count(&self) -> usize {
        self.senders.read().len()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            senders: RwLock::new(HashMap::new()),
            next_id: RwLock::new(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionState;

    fn status() -> SessionEffect {
        SessionEffect::Status {
            state: SessionState::Creating,
            message: "创建会话".to_string(),
        }
    }

    #[test]
    fn test_broadcaster_subscribe_and_broadcast() {
        let broadcaster = Broadcaster::new();

        let (tx1, mut rx1) = mpsc::channel(10);
        let (tx2, mut rx2) = mpsc::channel(10);

        let sub1 = broadcaster.register(tx1);
        let sub2 = broadcaster.register(tx2);

        // sub1 只订阅 Completed
        broadcaster.subscribe(sub1, &[EffectKind::Completed]);

        // sub2 订阅 Completed 和 Status
        broadcaster.subscribe(sub2, &[EffectKind::Completed, EffectKind::Status]);

        broadcaster.broadcast(&SessionEffect::Completed { result_count: 2 });
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());

        // 只有 sub2 应该收到 Status
        broadcaster.broadcast(&status());
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), status());
    }

    #[test]
    fn test_unsubscribe() {
        let broadcaster = Broadcaster::new();
        let (id, mut rx) = broadcaster.attach(&EffectKind::ALL, 10);

        broadcaster.unsubscribe(id, &[EffectKind::Status]);
        broadcaster.broadcast(&status());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_subscriber_count() {
        let broadcaster = Broadcaster::new();
        assert_eq!(broadcaster.subscriber_count(), 0);

        let (tx1, _rx1) = mpsc::channel(10);
        let sub1 = broadcaster.register(tx1);
        assert_eq!(broadcaster.subscriber_count(), 1);

        let (_sub2, _rx2) = broadcaster.attach(&[EffectKind::Error], 10);
        assert_eq!(broadcaster.subscriber_count(), 2);

        broadcaster.unregister(sub1);
        assert_eq!(broadcaster.subscriber_count(), 1);
    }

    #[test]
    fn test_dropped_receiver_is_unregistered() {
        let broadcaster = Broadcaster::new();
        let (_id, rx) = broadcaster.attach(&EffectKind::ALL, 10);
        drop(rx);

        broadcaster.broadcast(&status());
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let broadcaster = Broadcaster::new();
        let (_id, mut rx) = broadcaster.attach(&EffectKind::ALL, 1);

        broadcaster.broadcast(&status());
        broadcaster.broadcast(&SessionEffect::Completed { result_count: 0 });

        assert_eq!(rx.try_recv().unwrap(), status());
        assert!(rx.try_recv().is_err());
    }
}
