//! Secure-storage collaborator interface
//!
//! The store never talks to a platform keychain directly. Everything goes
//! through [`SecureStorage`], a five-request capability set:
//! add, update, copy-matching, delete and copy-matching-all. Any engine that
//! can answer those requests (OS keychain, encrypted file, in-memory map)
//! can back the store.

use crate::item_class::ItemClass;
use std::collections::BTreeMap;

mod encrypted_file;
mod memory;
#[cfg(feature = "native-keyring")]
mod native_keyring;

pub use encrypted_file::EncryptedFileStorage;
pub use memory::MemoryStorage;
#[cfg(feature = "native-keyring")]
pub use native_keyring::NativeKeyringStorage;

/// Numeric status codes, following platform keychain conventions
pub mod status {
    /// Request completed
    pub const SUCCESS: i32 = 0;
    /// Function or operation not implemented by the backend
    pub const UNIMPLEMENTED: i32 = -4;
    /// I/O error while reaching the backing medium
    pub const IO: i32 = -36;
    /// One or more parameters were not valid
    pub const PARAM: i32 = -50;
    /// Internal component failure
    pub const INTERNAL_COMPONENT: i32 = -2070;
    /// Storage is not reachable
    pub const NOT_AVAILABLE: i32 = -25291;
    /// Authorization or authentication failed
    pub const AUTH_FAILED: i32 = -25293;
    /// Item already exists
    pub const DUPLICATE_ITEM: i32 = -25299;
    /// Item could not be found
    pub const ITEM_NOT_FOUND: i32 = -25300;
    /// Stored data could not be decoded
    pub const DECODE: i32 = -26275;
}

/// Attribute names carried in attribute sets
pub mod attr {
    /// Account name (text)
    pub const ACCOUNT: &str = "acct";
    /// Service name (text)
    pub const SERVICE: &str = "svce";
    /// Item class (text)
    pub const CLASS: &str = "class";
    /// Synchronizable flag (bool)
    pub const SYNCHRONIZABLE: &str = "sync";
}

/// Non-success status returned by a storage request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageStatus {
    /// An item with the same identity already exists
    Duplicate,
    /// No item matched the query
    NotFound,
    /// Any other status, with the backend's diagnostic message
    Other {
        /// Raw status code
        code: i32,
        /// Diagnostic message
        message: Option<String>,
    },
}

impl StorageStatus {
    /// Build an `Other` status with a message
    pub fn other(code: i32, message: impl Into<String>) -> Self {
        Self::Other {
            code,
            message: Some(message.into()),
        }
    }

    /// Numeric code of this status
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Duplicate => status::DUPLICATE_ITEM,
            Self::NotFound => status::ITEM_NOT_FOUND,
            Self::Other { code, .. } => *code,
        }
    }

    /// Diagnostic message; the two well-known statuses get a fixed description
    #[must_use]
    pub fn into_message(self) -> Option<String> {
        match self {
            Self::Duplicate => Some("The specified item already exists.".to_string()),
            Self::NotFound => Some("The specified item could not be found.".to_string()),
            Self::Other { message, .. } => message,
        }
    }
}

/// Result of a single storage request
pub type StorageResult<T> = std::result::Result<T, StorageStatus>;

/// Handle lock poison errors consistently
pub(crate) fn lock_poisoned<T>(e: std::sync::PoisonError<T>) -> StorageStatus {
    StorageStatus::other(status::INTERNAL_COMPONENT, format!("Lock poisoned: {}", e))
}

/// Attributes of an item being added
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemAttributes {
    /// Service namespace
    pub service: String,
    /// Account within the service
    pub account: String,
    /// Item class
    pub item_class: ItemClass,
    /// Eligible for cross-device sync
    pub synchronizable: bool,
}

/// Query selecting items by identity
///
/// `account: None` selects every account under the service and class.
/// Queries never filter on the synchronizable flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemQuery {
    /// Service namespace
    pub service: String,
    /// Account within the service
    pub account: Option<String>,
    /// Item class
    pub item_class: ItemClass,
}

impl ItemQuery {
    /// Query for exactly one item
    pub fn item(service: &str, account: &str, item_class: ItemClass) -> Self {
        Self {
            service: service.to_string(),
            account: Some(account.to_string()),
            item_class,
        }
    }

    /// Query for every item under a service and class
    pub fn service(service: &str, item_class: ItemClass) -> Self {
        Self {
            service: service.to_string(),
            account: None,
            item_class,
        }
    }

    /// Whether an item with this identity is selected by the query
    #[must_use]
    pub fn matches(&self, service: &str, account: &str, item_class: ItemClass) -> bool {
        self.service == service
            && self.item_class == item_class
            && self.account.as_deref().is_none_or(|a| a == account)
    }
}

/// Typed attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// Text attribute
    Text(String),
    /// Boolean attribute
    Bool(bool),
    /// Binary attribute
    Data(Vec<u8>),
}

/// Attribute name to value map describing one item
pub type AttributeSet = BTreeMap<String, AttributeValue>;

/// Build the attribute set describing an item
#[must_use]
pub fn attribute_set(
    service: &str,
    account: &str,
    item_class: ItemClass,
    synchronizable: bool,
) -> AttributeSet {
    let mut set = AttributeSet::new();
    set.insert(attr::SERVICE.to_string(), AttributeValue::Text(service.to_string()));
    set.insert(attr::ACCOUNT.to_string(), AttributeValue::Text(account.to_string()));
    set.insert(
        attr::CLASS.to_string(),
        AttributeValue::Text(item_class.as_str().to_string()),
    );
    set.insert(
        attr::SYNCHRONIZABLE.to_string(),
        AttributeValue::Bool(synchronizable),
    );
    set
}

/// Payload returned by a successful copy-matching request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Raw item value
    Data(Vec<u8>),
    /// One attribute set per matching item
    AttributeSets(Vec<AttributeSet>),
    /// Something else, described by type name
    Unexpected(String),
}

/// Secure-storage subsystem
///
/// Implementations are synchronous and may block; the scoped service calls
/// them from the blocking thread pool. Every request is independently scoped
/// by its service, account and item class.
#[cfg_attr(test, mockall::automock)]
pub trait SecureStorage: Send + Sync {
    /// Short backend name for diagnostics
    fn name(&self) -> &'static str;

    /// Add a new item; `Duplicate` if the identity already exists
    fn add_item(&self, attributes: &ItemAttributes, value: &[u8]) -> StorageResult<()>;

    /// Overwrite the value of the item selected by `query`
    fn update_item(&self, query: &ItemQuery, value: &[u8], synchronizable: bool)
        -> StorageResult<()>;

    /// Return the value of the single item selected by `query`
    fn copy_matching(&self, query: &ItemQuery) -> StorageResult<Payload>;

    /// Remove the items selected by `query`; `NotFound` if none matched
    fn delete_item(&self, query: &ItemQuery) -> StorageResult<()>;

    /// Return the attribute sets of every item selected by `query`
    fn copy_matching_all(&self, query: &ItemQuery) -> StorageResult<Payload>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_matches_identity() {
        let query = ItemQuery::item("svc", "alice", ItemClass::GenericPassword);
        assert!(query.matches("svc", "alice", ItemClass::GenericPassword));
        assert!(!query.matches("svc", "bob", ItemClass::GenericPassword));
        assert!(!query.matches("svc", "alice", ItemClass::Key));
        assert!(!query.matches("other", "alice", ItemClass::GenericPassword));
    }

    #[test]
    fn test_service_query_matches_every_account() {
        let query = ItemQuery::service("svc", ItemClass::Key);
        assert!(query.matches("svc", "alice", ItemClass::Key));
        assert!(query.matches("svc", "bob", ItemClass::Key));
        assert!(!query.matches("svc", "bob", ItemClass::Certificate));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(StorageStatus::Duplicate.code(), status::DUPLICATE_ITEM);
        assert_eq!(StorageStatus::NotFound.code(), status::ITEM_NOT_FOUND);
        assert_eq!(StorageStatus::other(status::IO, "disk").code(), status::IO);
        assert!(StorageStatus::NotFound.into_message().is_some());
    }
}
