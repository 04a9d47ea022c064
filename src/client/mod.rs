//! 会话客户端模块
//!
//! 提供会话生命周期管理、事件流读取和效果广播

mod broadcaster;
mod session;
mod transport;

pub use broadcaster::{Broadcaster, EffectReceiver, EffectSender, SubscriberId};
pub use session::SessionClient;
pub use transport::SearchApi;
