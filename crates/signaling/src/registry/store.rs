//! 通用键值存储：`create` / `get` / `remove`
//!
//! 三类资源共用同一实现，只在 [`ResourceKind`] 上区分错误信息。

use crate::error::{ResourceKind, Result, SignalingError};
use crate::ids::{ResourceId, SessionId};
use std::collections::HashMap;

/// 注册表条目：资源状态 + 所属会话
#[derive(Debug, Clone)]
pub struct Entry<T> {
    pub id: ResourceId,
    pub owner: SessionId,
    pub value: T,
}

#[derive(Debug)]
pub struct Registry<T> {
    kind: ResourceKind,
    entries: HashMap<ResourceId, Entry<T>>,
}

impl<T> Registry<T> {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    /// 插入新资源并返回新生成的 ID，不会复用存活的 ID
    pub fn create(&mut self, owner: SessionId, value: T) -> ResourceId {
        let mut id = ResourceId::generate();
        while self.entries.contains_key(&id) {
            id = ResourceId::generate();
        }
        self.entries.insert(
            id.clone(),
            Entry {
                id: id.clone(),
                owner,
                value,
            },
        );
        id
    }

    pub fn get(&self, id: &ResourceId) -> Result<&Entry<T>> {
        self.entries
            .get(id)
            .ok_or_else(|| SignalingError::not_found(self.kind, id))
    }

    pub fn get_mut(&mut self, id: &ResourceId) -> Result<&mut Entry<T>> {
        let kind = self.kind;
        self.entries
            .get_mut(id)
            .ok_or_else(|| SignalingError::not_found(kind, id))
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.entries.contains_key(id)
    }

    /// 移除资源；第二次移除返回 NotFound，状态不变
    pub fn remove(&mut self, id: &ResourceId) -> Result<Entry<T>> {
        self.entries
            .remove(id)
            .ok_or_else(|| SignalingError::not_found(self.kind, id))
    }

    /// 满足条件的条目 ID
    pub fn ids_where(&self, predicate: impl Fn(&Entry<T>) -> bool) -> Vec<ResourceId> {
        self.entries
            .values()
            .filter(|entry| predicate(entry))
            .map(|entry| entry.id.clone())
            .collect()
    }

    pub fn owned_by(&self, owner: &SessionId) -> Vec<ResourceId> {
        self.ids_where(|entry| &entry.owner == owner)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry<T>> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_get_remove() {
        let mut registry = Registry::new(ResourceKind::Producer);
        let owner = SessionId::generate();

        let id = registry.create(owner.clone(), 42u32);
        assert_eq!(registry.get(&id).unwrap().value, 42);
        assert_eq!(registry.get(&id).unwrap().owner, owner);
        assert_eq!(registry.owned_by(&owner), vec![id.clone()]);

        let removed = registry.remove(&id).unwrap();
        assert_eq!(removed.value, 42);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_second_remove_is_not_found() {
        let mut registry = Registry::new(ResourceKind::Consumer);
        let id = registry.create(SessionId::generate(), ());

        assert!(registry.remove(&id).is_ok());
        let err = registry.remove(&id).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), format!("consumer {id} not found"));
    }

    #[test]
    fn test_ids_are_unique() {
        let mut registry = Registry::new(ResourceKind::Transport);
        let owner = SessionId::generate();
        let a = registry.create(owner.clone(), 1);
        let b = registry.create(owner, 2);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }
}
