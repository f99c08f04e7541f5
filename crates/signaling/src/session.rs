//! 会话管理
//!
//! 每条信令连接一个会话记录，保存出站通道和它名下的资源 ID，
//! 断开时据此释放资源。资源状态本身只保存在注册表里。

use crate::error::{ResourceKind, Result, SignalingError};
use crate::ids::{ResourceId, SessionId};
use crate::protocol::ServerMessage;
use crate::registry::OwnedResources;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

/// 会话名下的一项资源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnedResource {
    Transport(ResourceId),
    Producer(ResourceId),
    Consumer(ResourceId),
}

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub remote_ip: Option<IpAddr>,
    pub connected_at: DateTime<Utc>,
    outbound: UnboundedSender<ServerMessage>,
    owned: OwnedResources,
    /// 断开流程已开始，不再接受新资源
    closing: bool,
}

impl Session {
    pub fn owned(&self) -> &OwnedResources {
        &self.owned
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }
}

#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为新连接创建会话
    pub async fn register(
        &self,
        remote_ip: Option<IpAddr>,
        outbound: UnboundedSender<ServerMessage>,
    ) -> SessionId {
        let mut sessions = self.sessions.write().await;
        let mut id = SessionId::generate();
        while sessions.contains_key(&id) {
            id = SessionId::generate();
        }
        sessions.insert(
            id.clone(),
            Session {
                id: id.clone(),
                remote_ip,
                connected_at: Utc::now(),
                outbound,
                owned: OwnedResources::default(),
                closing: false,
            },
        );
        info!("Session {} registered (IP: {:?})", id, remote_ip);
        id
    }

    /// 记录会话新获得的资源；会话不存在或正在关闭时失败
    pub async fn track(&self, session: &SessionId, resource: OwnedResource) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session)
            .filter(|s| !s.is_closing())
            .ok_or_else(|| SignalingError::not_found(ResourceKind::Session, session))?;
        let list = match &resource {
            OwnedResource::Transport(_) => &mut entry.owned.transports,
            OwnedResource::Producer(_) => &mut entry.owned.producers,
            OwnedResource::Consumer(_) => &mut entry.owned.consumers,
        };
        let id = match resource {
            OwnedResource::Transport(id)
            | OwnedResource::Producer(id)
            | OwnedResource::Consumer(id) => id,
        };
        if !list.contains(&id) {
            list.push(id);
        }
        Ok(())
    }

    /// 移除会话名下的资源记录（幂等）
    pub async fn untrack(&self, session: &SessionId, resource: &OwnedResource) {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(session) else {
            return;
        };
        let (list, id) = match resource {
            OwnedResource::Transport(id) => (&mut entry.owned.transports, id),
            OwnedResource::Producer(id) => (&mut entry.owned.producers, id),
            OwnedResource::Consumer(id) => (&mut entry.owned.consumers, id),
        };
        list.retain(|owned| owned != id);
    }

    /// 标记会话开始关闭，返回当前名下的资源快照
    ///
    /// 会话不存在或已在关闭时返回 `None`。
    pub async fn begin_close(&self, session: &SessionId) -> Option<OwnedResources> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(session)?;
        if entry.closing {
            return None;
        }
        entry.closing = true;
        Some(entry.owned.clone())
    }

    pub async fn remove(&self, session: &SessionId) -> Option<Session> {
        let removed = self.sessions.write().await.remove(session);
        if let Some(ref s) = removed {
            let lifetime = Utc::now() - s.connected_at;
            info!(
                "Session {} removed after {}s",
                s.id,
                lifetime.num_seconds()
            );
        }
        removed
    }

    /// 向会话推送消息；会话不存在或连接已断开时返回 false
    pub async fn send(&self, session: &SessionId, message: ServerMessage) -> bool {
        let sessions = self.sessions.read().await;
        match sessions.get(session) {
            Some(entry) => entry.outbound.send(message).is_ok(),
            None => {
                debug!("Drop message for unknown session {}", session);
                false
            }
        }
    }

    /// 除 `origin` 外所有未关闭会话的出站通道
    pub async fn senders_except(
        &self,
        origin: &SessionId,
    ) -> Vec<(SessionId, UnboundedSender<ServerMessage>)> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| &s.id != origin && !s.is_closing())
            .map(|s| (s.id.clone(), s.outbound.clone()))
            .collect()
    }

    pub async fn owned(&self, session: &SessionId) -> Option<OwnedResources> {
        self.sessions
            .read()
            .await
            .get(session)
            .map(|s| s.owned.clone())
    }

    pub async fn contains(&self, session: &SessionId) -> bool {
        self.sessions.read().await.contains_key(session)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
