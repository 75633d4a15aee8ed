//! In-memory backend (for testing and ephemeral processes)

use super::{
    attribute_set, lock_poisoned, ItemAttributes, ItemQuery, Payload, SecureStorage,
    StorageResult, StorageStatus,
};
use crate::item_class::ItemClass;
use std::collections::BTreeMap;
use std::sync::RwLock;
use zeroize::{Zeroize, ZeroizeOnDrop};

type ItemKey = (ItemClass, String, String);

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct StoredItem {
    value: Vec<u8>,
    synchronizable: bool,
}

/// Process-local storage; contents vanish when the value is dropped
#[derive(Default)]
pub struct MemoryStorage {
    items: RwLock<BTreeMap<ItemKey, StoredItem>>,
}

impl MemoryStorage {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items across all services and classes
    ///
    /// Counts through a poisoned lock.
    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no items are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecureStorage for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn add_item(&self, attributes: &ItemAttributes, value: &[u8]) -> StorageResult<()> {
        let key = (
            attributes.item_class,
            attributes.service.clone(),
            attributes.account.clone(),
        );
        let mut items = self.items.write().map_err(lock_poisoned)?;
        if items.contains_key(&key) {
            return Err(StorageStatus::Duplicate);
        }
        items.insert(
            key,
            StoredItem {
                value: value.to_vec(),
                synchronizable: attributes.synchronizable,
            },
        );
        Ok(())
    }

    fn update_item(
        &self,
        query: &ItemQuery,
        value: &[u8],
        synchronizable: bool,
    ) -> StorageResult<()> {
        let mut items = self.items.write().map_err(lock_poisoned)?;
        let mut updated = 0usize;
        for ((class, service, account), item) in items.iter_mut() {
            if query.matches(service, account, *class) {
                item.value.zeroize();
                item.value = value.to_vec();
                item.synchronizable = synchronizable;
                updated += 1;
            }
        }
        if updated == 0 {
            return Err(StorageStatus::NotFound);
        }
        Ok(())
    }

    fn copy_matching(&self, query: &ItemQuery) -> StorageResult<Payload> {
        let items = self.items.read().map_err(lock_poisoned)?;
        items
            .iter()
            .find(|((class, service, account), _)| query.matches(service, account, *class))
            .map(|(_, item)| Payload::Data(item.value.clone()))
            .ok_or(StorageStatus::NotFound)
    }

    fn delete_item(&self, query: &ItemQuery) -> StorageResult<()> {
        let mut items = self.items.write().map_err(lock_poisoned)?;
        let before = items.len();
        items.retain(|(class, service, account), _| !query.matches(service, account, *class));
        if items.len() == before {
            return Err(StorageStatus::NotFound);
        }
        Ok(())
    }

    fn copy_matching_all(&self, query: &ItemQuery) -> StorageResult<Payload> {
        let items = self.items.read().map_err(lock_poisoned)?;
        let sets: Vec<_> = items
            .iter()
            .filter(|((class, service, account), _)| query.matches(service, account, *class))
            .map(|((class, service, account), item)| {
                attribute_set(service, account, *class, item.synchronizable)
            })
            .collect();
        if sets.is_empty() {
            return Err(StorageStatus::NotFound);
        }
        Ok(Payload::AttributeSets(sets))
    }
}
