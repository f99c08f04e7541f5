//! 资源注册表服务
//!
//! Transports / Producers / Consumers 三个存储位于同一把 `RwLock` 之后，
//! 是资源存在性的唯一来源。级联删除在一次写锁内完成，外部观察不到
//! 删除了一半的状态。

pub mod model;
pub mod store;

pub use model::{Consumer, Producer, Transport, TransportRole, TransportState};
pub use store::{Entry, Registry};

use crate::error::{ResourceKind, Result, SignalingError};
use crate::ids::{ResourceId, SessionId};
use media_engine::EngineHandle;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug)]
struct Registries {
    transports: Registry<Transport>,
    producers: Registry<Producer>,
    consumers: Registry<Consumer>,
}

/// 会话名下的资源 ID 集合
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnedResources {
    pub transports: Vec<ResourceId>,
    pub producers: Vec<ResourceId>,
    pub consumers: Vec<ResourceId>,
}

impl OwnedResources {
    pub fn is_empty(&self) -> bool {
        self.transports.is_empty() && self.producers.is_empty() && self.consumers.is_empty()
    }

    /// 合并另一个集合，保持顺序并去重
    pub fn merge(&mut self, other: OwnedResources) {
        fn extend_unique(target: &mut Vec<ResourceId>, source: Vec<ResourceId>) {
            for id in source {
                if !target.contains(&id) {
                    target.push(id);
                }
            }
        }
        extend_unique(&mut self.transports, other.transports);
        extend_unique(&mut self.producers, other.producers);
        extend_unique(&mut self.consumers, other.consumers);
    }
}

/// 一次删除（含级联）移除的全部条目
#[derive(Debug, Default)]
pub struct Removed {
    pub transports: Vec<Entry<Transport>>,
    pub producers: Vec<Entry<Producer>>,
    pub consumers: Vec<Entry<Consumer>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
}

#[derive(Debug)]
pub struct ResourceRegistry {
    inner: RwLock<Registries>,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Registries {
                transports: Registry::new(ResourceKind::Transport),
                producers: Registry::new(ResourceKind::Producer),
                consumers: Registry::new(ResourceKind::Consumer),
            }),
        }
    }

    // ========== Transport ==========

    pub async fn create_transport(&self, owner: SessionId, transport: Transport) -> ResourceId {
        self.inner.write().await.transports.create(owner, transport)
    }

    pub async fn transport(&self, id: &ResourceId) -> Result<Entry<Transport>> {
        self.inner.read().await.transports.get(id).cloned()
    }

    pub async fn set_transport_state(&self, id: &ResourceId, state: TransportState) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner.transports.get_mut(id)?;
        debug!(
            "Transport {} state {} -> {}",
            id, entry.value.state, state
        );
        entry.value.state = state;
        Ok(())
    }

    pub async fn find_transport_by_handle(&self, handle: &EngineHandle) -> Option<ResourceId> {
        self.inner
            .read()
            .await
            .transports
            .iter()
            .find(|entry| &entry.value.handle == handle)
            .map(|entry| entry.id.clone())
    }

    /// 关闭 transport：级联删除其上的 producer、consumer，以及其它
    /// transport 上以这些 producer 为源的 consumer
    pub async fn close_transport(&self, id: &ResourceId) -> Result<Removed> {
        let mut inner = self.inner.write().await;
        let mut transport = inner.transports.remove(id)?;
        transport.value.state = TransportState::Closed;

        let mut removed = Removed::default();
        for consumer_id in inner
            .consumers
            .ids_where(|entry| &entry.value.transport_id == id)
        {
            if let Ok(entry) = inner.consumers.remove(&consumer_id) {
                removed.consumers.push(entry);
            }
        }
        for producer_id in inner
            .producers
            .ids_where(|entry| &entry.value.transport_id == id)
        {
            Self::remove_producer_locked(&mut inner, &producer_id, &mut removed)?;
        }
        removed.transports.push(transport);
        Ok(removed)
    }

    // ========== Producer ==========

    /// 插入 producer；在写锁内重新确认 transport 仍然存活
    pub async fn insert_producer(&self, owner: SessionId, producer: Producer) -> Result<ResourceId> {
        let mut inner = self.inner.write().await;
        if !inner.transports.contains(&producer.transport_id) {
            return Err(SignalingError::not_found(
                ResourceKind::Transport,
                &producer.transport_id,
            ));
        }
        Ok(inner.producers.create(owner, producer))
    }

    pub async fn producer(&self, id: &ResourceId) -> Result<Entry<Producer>> {
        self.inner.read().await.producers.get(id).cloned()
    }

    /// 删除 producer 及所有以它为源的 consumer
    pub async fn remove_producer(&self, id: &ResourceId) -> Result<Removed> {
        let mut inner = self.inner.write().await;
        let mut removed = Removed::default();
        Self::remove_producer_locked(&mut inner, id, &mut removed)?;
        Ok(removed)
    }

    fn remove_producer_locked(
        inner: &mut Registries,
        id: &ResourceId,
        removed: &mut Removed,
    ) -> Result<()> {
        let producer = inner.producers.remove(id)?;
        for consumer_id in inner
            .consumers
            .ids_where(|entry| &entry.value.producer_id == id)
        {
            if let Ok(entry) = inner.consumers.remove(&consumer_id) {
                removed.consumers.push(entry);
            }
        }
        removed.producers.push(producer);
        Ok(())
    }

    // ========== Consumer ==========

    /// 插入 consumer；在写锁内重新确认 transport 与源 producer 仍然存活
    pub async fn insert_consumer(&self, owner: SessionId, consumer: Consumer) -> Result<ResourceId> {
        let mut inner = self.inner.write().await;
        if !inner.transports.contains(&consumer.transport_id) {
            return Err(SignalingError::not_found(
                ResourceKind::Transport,
                &consumer.transport_id,
            ));
        }
        if !inner.producers.contains(&consumer.producer_id) {
            return Err(SignalingError::not_found(
                ResourceKind::Producer,
                &consumer.producer_id,
            ));
        }
        Ok(inner.consumers.create(owner, consumer))
    }

    pub async fn consumer(&self, id: &ResourceId) -> Result<Entry<Consumer>> {
        self.inner.read().await.consumers.get(id).cloned()
    }

    pub async fn remove_consumer(&self, id: &ResourceId) -> Result<Entry<Consumer>> {
        self.inner.write().await.consumers.remove(id)
    }

    // ========== 查询 ==========

    /// 扫描三个存储中属于该会话的资源
    pub async fn owned_by(&self, owner: &SessionId) -> OwnedResources {
        let inner = self.inner.read().await;
        OwnedResources {
            transports: inner.transports.owned_by(owner),
            producers: inner.producers.owned_by(owner),
            consumers: inner.consumers.owned_by(owner),
        }
    }

    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().await;
        RegistryStats {
            transports: inner.transports.len(),
            producers: inner.producers.len(),
            consumers: inner.consumers.len(),
        }
    }
}
