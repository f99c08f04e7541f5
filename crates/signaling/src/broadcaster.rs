//! 事件广播
//!
//! 将异步通知推送给会话。`newProducer` 发给除发起者外的所有在线会话，
//! 尽力而为：断开中的连接直接跳过。

use crate::ids::{ResourceId, SessionId};
use crate::protocol::{NewProducer, Notification, ServerMessage};
use crate::session::SessionManager;
use media_engine::MediaKind;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sessions: Arc<SessionManager>,
}

impl EventBroadcaster {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    /// 广播新 producer，返回成功投递的会话数
    pub async fn publish_new_producer(
        &self,
        origin: &SessionId,
        producer_id: &ResourceId,
        kind: MediaKind,
    ) -> usize {
        let message = ServerMessage::from(Notification::NewProducer(NewProducer {
            producer_id: producer_id.clone(),
            kind,
        }));

        let mut delivered = 0;
        for (session, sender) in self.sessions.senders_except(origin).await {
            if sender.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!("Skip newProducer for disconnected session {}", session);
            }
        }
        debug!(
            "📢 newProducer {} ({}) delivered to {} sessions",
            producer_id, kind, delivered
        );
        delivered
    }

    /// 向单个会话推送通知
    pub async fn notify(&self, target: &SessionId, notification: Notification) -> bool {
        self.sessions.send(target, notification.into()).await
    }
}
