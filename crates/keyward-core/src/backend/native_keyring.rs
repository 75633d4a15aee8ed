//! Native OS keyring backend (macOS Keychain, Linux Secret Service, Windows Credential Manager)
//!
//! The platform keyrings behind the `keyring` crate cannot enumerate entries,
//! so every `(service, item class)` pair keeps a small JSON index entry that
//! records its account names. The index lives under a reserved account name.
//!
//! The index is loaded and validated before an entry is touched, and an entry
//! change is rolled back when the index cannot be saved, so a failed request
//! leaves the entry and the index as they were.

use super::{
    attribute_set, lock_poisoned, status, ItemAttributes, ItemQuery, Payload, SecureStorage,
    StorageResult, StorageStatus,
};
use crate::item_class::ItemClass;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Account name reserved for the per-service index entry
pub const INDEX_ACCOUNT: &str = "__keyward_index__";

#[derive(Default, Serialize, Deserialize)]
struct AccountIndex {
    /// Account name to synchronizable flag
    accounts: BTreeMap<String, bool>,
}

/// Raw entry access, keyed by keyring service and account
trait Keyring: Send + Sync {
    fn get(&self, service: &str, account: &str) -> keyring::Result<Vec<u8>>;
    fn set(&self, service: &str, account: &str, value: &[u8]) -> keyring::Result<()>;
    fn delete(&self, service: &str, account: &str) -> keyring::Result<()>;
}

/// The platform credential store
struct PlatformKeyring;

impl Keyring for PlatformKeyring {
    fn get(&self, service: &str, account: &str) -> keyring::Result<Vec<u8>> {
        Entry::new(service, account)?.get_secret()
    }

    fn set(&self, service: &str, account: &str, value: &[u8]) -> keyring::Result<()> {
        Entry::new(service, account)?.set_secret(value)
    }

    fn delete(&self, service: &str, account: &str) -> keyring::Result<()> {
        Entry::new(service, account)?.delete_credential()
    }
}

fn map_keyring_error(err: keyring::Error) -> StorageStatus {
    match err {
        keyring::Error::NoEntry => StorageStatus::NotFound,
        keyring::Error::NoStorageAccess(e) => {
            StorageStatus::other(status::NOT_AVAILABLE, format!("Keyring not accessible: {}", e))
        }
        keyring::Error::BadEncoding(_) => {
            StorageStatus::other(status::DECODE, "Keyring entry has an unexpected encoding")
        }
        keyring::Error::TooLong(attr, limit) => StorageStatus::other(
            status::PARAM,
            format!("Keyring attribute {} exceeds {} characters", attr, limit),
        ),
        keyring::Error::Invalid(attr, reason) => StorageStatus::other(
            status::PARAM,
            format!("Keyring attribute {} is invalid: {}", attr, reason),
        ),
        other => StorageStatus::other(
            status::INTERNAL_COMPONENT,
            format!("Keyring error: {}", other),
        ),
    }
}

/// Keyring service name; generic passwords keep the plain service name
fn keyring_service(service: &str, item_class: ItemClass) -> String {
    match item_class {
        ItemClass::GenericPassword => service.to_string(),
        other => format!("{}#{}", service, other),
    }
}

fn reject_reserved(account: &str) -> StorageResult<()> {
    if account == INDEX_ACCOUNT {
        return Err(StorageStatus::other(
            status::PARAM,
            format!("Account name {} is reserved", INDEX_ACCOUNT),
        ));
    }
    Ok(())
}

fn single_account(query: &ItemQuery) -> StorageResult<&str> {
    query
        .account
        .as_deref()
        .ok_or_else(|| StorageStatus::other(status::PARAM, "Query must name an account"))
}

/// Secrets stored in the platform keyring
///
/// Requests from this process are serialized by an internal lock so the
/// existence check in `add_item` and the index maintenance stay consistent.
/// The synchronizable flag is recorded in the index but has no effect on the
/// platform entry.
pub struct NativeKeyringStorage {
    keyring: Box<dyn Keyring>,
    lock: Mutex<()>,
}

impl NativeKeyringStorage {
    /// Create a handle on the platform keyring
    #[must_use]
    pub fn new() -> Self {
        info!("Using native keyring secret storage");
        Self::with_keyring(Box::new(PlatformKeyring))
    }

    fn with_keyring(keyring: Box<dyn Keyring>) -> Self {
        Self {
            keyring,
            lock: Mutex::new(()),
        }
    }

    fn load_index(&self, service: &str) -> StorageResult<AccountIndex> {
        match self.keyring.get(service, INDEX_ACCOUNT) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                StorageStatus::other(status::DECODE, format!("Corrupt account index: {}", e))
            }),
            Err(keyring::Error::NoEntry) => Ok(AccountIndex::default()),
            Err(e) => Err(map_keyring_error(e)),
        }
    }

    fn save_index(&self, service: &str, index: &AccountIndex) -> StorageResult<()> {
        if index.accounts.is_empty() {
            return match self.keyring.delete(service, INDEX_ACCOUNT) {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(map_keyring_error(e)),
            };
        }
        let bytes = serde_json::to_vec(index).map_err(|e| {
            StorageStatus::other(
                status::INTERNAL_COMPONENT,
                format!("Failed to serialize account index: {}", e),
            )
        })?;
        self.keyring
            .set(service, INDEX_ACCOUNT, &bytes)
            .map_err(map_keyring_error)
    }

    /// Put an entry back the way it was after a failed index save
    fn restore(&self, service: &str, account: &str, previous: Option<&[u8]>) {
        let result = match previous {
            Some(value) => self.keyring.set(service, account, value),
            None => match self.keyring.delete(service, account) {
                Err(keyring::Error::NoEntry) => Ok(()),
                other => other,
            },
        };
        if let Err(e) = result {
            warn!(service = %service, account = %account, error = %e, "Keyring rollback failed");
        }
    }

    /// Read an entry, treating absence as `None`
    fn current(&self, service: &str, account: &str) -> StorageResult<Option<Zeroizing<Vec<u8>>>> {
        match self.keyring.get(service, account) {
            Ok(value) => Ok(Some(Zeroizing::new(value))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(map_keyring_error(e)),
        }
    }
}

impl Default for NativeKeyringStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureStorage for NativeKeyringStorage {
    fn name(&self) -> &'static str {
        "native_keyring"
    }

    fn add_item(&self, attributes: &ItemAttributes, value: &[u8]) -> StorageResult<()> {
        reject_reserved(&attributes.account)?;
        let _guard = self.lock.lock().map_err(lock_poisoned)?;

        let service = keyring_service(&attributes.service, attributes.item_class);
        let account = attributes.account.as_str();
        let mut index = self.load_index(&service)?;

        if self.current(&service, account)?.is_some() {
            return Err(StorageStatus::Duplicate);
        }
        self.keyring
            .set(&service, account, value)
            .map_err(map_keyring_error)?;

        index
            .accounts
            .insert(account.to_string(), attributes.synchronizable);
        if let Err(status) = self.save_index(&service, &index) {
            self.restore(&service, account, None);
            return Err(status);
        }
        Ok(())
    }

    fn update_item(
        &self,
        query: &ItemQuery,
        value: &[u8],
        synchronizable: bool,
    ) -> StorageResult<()> {
        let account = single_account(query)?;
        reject_reserved(account)?;
        let _guard = self.lock.lock().map_err(lock_poisoned)?;

        let service = keyring_service(&query.service, query.item_class);
        let mut index = self.load_index(&service)?;

        // set would silently create a missing entry
        let previous = self
            .current(&service, account)?
            .ok_or(StorageStatus::NotFound)?;
        self.keyring
            .set(&service, account, value)
            .map_err(map_keyring_error)?;

        if index.accounts.insert(account.to_string(), synchronizable) != Some(synchronizable) {
            if let Err(status) = self.save_index(&service, &index) {
                self.restore(&service, account, Some(previous.as_slice()));
                return Err(status);
            }
        }
        Ok(())
    }

    fn copy_matching(&self, query: &ItemQuery) -> StorageResult<Payload> {
        let account = single_account(query)?;
        reject_reserved(account)?;
        let _guard = self.lock.lock().map_err(lock_poisoned)?;

        let service = keyring_service(&query.service, query.item_class);
        self.keyring
            .get(&service, account)
            .map(Payload::Data)
            .map_err(map_keyring_error)
    }

    fn delete_item(&self, query: &ItemQuery) -> StorageResult<()> {
        let account = single_account(query)?;
        reject_reserved(account)?;
        let _guard = self.lock.lock().map_err(lock_poisoned)?;

        let service = keyring_service(&query.service, query.item_class);
        let mut index = self.load_index(&service)?;
        let listed = index.accounts.remove(account).is_some();

        let Some(previous) = self.current(&service, account)? else {
            // Drop a stale index row left by an external removal
            if listed {
                self.save_index(&service, &index)?;
            }
            return Err(StorageStatus::NotFound);
        };
        self.keyring
            .delete(&service, account)
            .map_err(map_keyring_error)?;

        if listed {
            if let Err(status) = self.save_index(&service, &index) {
                self.restore(&service, account, Some(previous.as_slice()));
                return Err(status);
            }
        }
        debug!(service = %query.service, account = %account, "Deleted keyring entry");
        Ok(())
    }

    fn copy_matching_all(&self, query: &ItemQuery) -> StorageResult<Payload> {
        let _guard = self.lock.lock().map_err(lock_poisoned)?;

        let service = keyring_service(&query.service, query.item_class);
        let index = self.load_index(&service)?;
        let sets: Vec<_> = index
            .accounts
            .iter()
            .filter(|(account, _)| query.matches(&query.service, account, query.item_class))
            .map(|(account, sync)| attribute_set(&query.service, account, query.item_class, *sync))
            .collect();
        if sets.is_empty() {
            return Err(StorageStatus::NotFound);
        }
        Ok(Payload::AttributeSets(sets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    type Entries = Arc<Mutex<HashMap<(String, String), Vec<u8>>>>;

    /// In-memory keyring that can refuse writes to the index entry
    struct FakeKeyring {
        entries: Entries,
        fail_index_writes: bool,
    }

    fn refused() -> keyring::Error {
        keyring::Error::NoStorageAccess("index write refused".into())
    }

    impl Keyring for FakeKeyring {
        fn get(&self, service: &str, account: &str) -> keyring::Result<Vec<u8>> {
            self.entries
                .lock()
                .unwrap()
                .get(&(service.to_string(), account.to_string()))
                .cloned()
                .ok_or(keyring::Error::NoEntry)
        }

        fn set(&self, service: &str, account: &str, value: &[u8]) -> keyring::Result<()> {
            if self.fail_index_writes && account == INDEX_ACCOUNT {
                return Err(refused());
            }
            self.entries
                .lock()
                .unwrap()
                .insert((service.to_string(), account.to_string()), value.to_vec());
            Ok(())
        }

        fn delete(&self, service: &str, account: &str) -> keyring::Result<()> {
            if self.fail_index_writes && account == INDEX_ACCOUNT {
                return Err(refused());
            }
            self.entries
                .lock()
                .unwrap()
                .remove(&(service.to_string(), account.to_string()))
                .map(|_| ())
                .ok_or(keyring::Error::NoEntry)
        }
    }

    fn storage(entries: &Entries, fail_index_writes: bool) -> NativeKeyringStorage {
        NativeKeyringStorage::with_keyring(Box::new(FakeKeyring {
            entries: Arc::clone(entries),
            fail_index_writes,
        }))
    }

    fn attrs(account: &str) -> ItemAttributes {
        ItemAttributes {
            service: "svc".to_string(),
            account: account.to_string(),
            item_class: ItemClass::GenericPassword,
            synchronizable: false,
        }
    }

    fn query(account: &str) -> ItemQuery {
        ItemQuery::item("svc", account, ItemClass::GenericPassword)
    }

    fn has_entry(entries: &Entries, account: &str) -> bool {
        entries
            .lock()
            .unwrap()
            .contains_key(&("svc".to_string(), account.to_string()))
    }

    #[test]
    fn test_keyring_service_partitions_item_classes() {
        assert_eq!(keyring_service("svc", ItemClass::GenericPassword), "svc");
        assert_eq!(
            keyring_service("svc", ItemClass::InternetPassword),
            "svc#internet_password"
        );
    }

    #[test]
    fn test_reserved_account_is_rejected() {
        let err = reject_reserved(INDEX_ACCOUNT).unwrap_err();
        assert_eq!(err.code(), status::PARAM);
        assert!(reject_reserved("alice").is_ok());
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(map_keyring_error(keyring::Error::NoEntry), StorageStatus::NotFound);
        assert_eq!(
            map_keyring_error(keyring::Error::BadEncoding(vec![0xff])).code(),
            status::DECODE
        );
    }

    #[test]
    fn test_add_list_delete_through_index() {
        let entries = Entries::default();
        let storage = storage(&entries, false);

        storage.add_item(&attrs("alice"), b"one").unwrap();
        storage.add_item(&attrs("bob"), b"two").unwrap();
        assert_eq!(
            storage.add_item(&attrs("alice"), b"again"),
            Err(StorageStatus::Duplicate)
        );

        let Payload::AttributeSets(sets) = storage
            .copy_matching_all(&ItemQuery::service("svc", ItemClass::GenericPassword))
            .unwrap()
        else {
            panic!("expected attribute sets");
        };
        assert_eq!(sets.len(), 2);

        storage.delete_item(&query("alice")).unwrap();
        storage.delete_item(&query("bob")).unwrap();
        assert_eq!(storage.delete_item(&query("bob")), Err(StorageStatus::NotFound));
        // Empty index entry is removed with the last account
        assert!(!has_entry(&entries, INDEX_ACCOUNT));
    }

    #[test]
    fn test_corrupt_index_fails_create_without_writing_entry() {
        let entries = Entries::default();
        entries.lock().unwrap().insert(
            ("svc".to_string(), INDEX_ACCOUNT.to_string()),
            b"not json".to_vec(),
        );
        let storage = storage(&entries, false);

        let err = storage.add_item(&attrs("alice"), b"one").unwrap_err();
        assert_eq!(err.code(), status::DECODE);
        assert!(!has_entry(&entries, "alice"));
    }

    #[test]
    fn test_failed_index_save_rolls_back_create() {
        let entries = Entries::default();
        let failing = storage(&entries, true);

        let err = failing.add_item(&attrs("alice"), b"one").unwrap_err();
        assert_eq!(err.code(), status::NOT_AVAILABLE);
        assert!(!has_entry(&entries, "alice"));

        // A retry once the keyring recovers is not a duplicate
        storage(&entries, false)
            .add_item(&attrs("alice"), b"one")
            .unwrap();
    }

    #[test]
    fn test_failed_index_save_rolls_back_delete() {
        let entries = Entries::default();
        storage(&entries, false)
            .add_item(&attrs("alice"), b"one")
            .unwrap();

        let err = storage(&entries, true)
            .delete_item(&query("alice"))
            .unwrap_err();
        assert_eq!(err.code(), status::NOT_AVAILABLE);
        assert_eq!(
            storage(&entries, false).copy_matching(&query("alice")).unwrap(),
            Payload::Data(b"one".to_vec())
        );
    }

    #[test]
    fn test_failed_index_save_rolls_back_update() {
        let entries = Entries::default();
        storage(&entries, false)
            .add_item(&attrs("alice"), b"one")
            .unwrap();

        let err = storage(&entries, true)
            .update_item(&query("alice"), b"two", true)
            .unwrap_err();
        assert_eq!(err.code(), status::NOT_AVAILABLE);
        assert_eq!(
            storage(&entries, false).copy_matching(&query("alice")).unwrap(),
            Payload::Data(b"one".to_vec())
        );
    }

    #[test]
    fn test_update_of_missing_entry_is_not_found() {
        let entries = Entries::default();
        let storage = storage(&entries, false);
        assert_eq!(
            storage.update_item(&query("ghost"), b"x", false),
            Err(StorageStatus::NotFound)
        );
        assert!(!has_entry(&entries, "ghost"));
    }
}
