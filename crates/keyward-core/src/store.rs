//! Secret store primitives
//!
//! Five stateless operations (create, update, read, delete, list) over a
//! [`SecureStorage`] backend. Each call issues exactly one storage request
//! and classifies its status into [`SecretError`] once, so every primitive
//! is independently retryable:
//!
//! - `delete` may be re-issued freely
//! - a `create` that fails with `Duplicate` means the caller should `update`

use crate::backend::{
    attr, AttributeValue, ItemAttributes, ItemQuery, Payload, SecureStorage, StorageStatus,
};
use crate::error::{Result, SecretError};
use crate::item_class::ItemClass;
use crate::secret_bytes::SecretBytes;
use std::collections::BTreeSet;
use tracing::debug;

/// Create a new secret
///
/// Fails with `Duplicate` if `(service, account, item_class)` already exists.
pub fn create(
    storage: &dyn SecureStorage,
    value: &[u8],
    service: &str,
    account: &str,
    item_class: ItemClass,
    synchronizable: bool,
) -> Result<()> {
    debug!(
        backend = storage.name(),
        service = %service,
        account = %account,
        class = %item_class,
        "Creating secret"
    );

    let attributes = ItemAttributes {
        service: service.to_string(),
        account: account.to_string(),
        item_class,
        synchronizable,
    };
    storage
        .add_item(&attributes, value)
        .map_err(|status| match status {
            StorageStatus::Duplicate => SecretError::Duplicate,
            other => SecretError::failure(other),
        })
}

/// Overwrite an existing secret
///
/// The backend does not report a missing record distinctly on update, so
/// every non-success status, not-found included, is a `StorageFailure`.
pub fn update(
    storage: &dyn SecureStorage,
    value: &[u8],
    service: &str,
    account: &str,
    item_class: ItemClass,
    synchronizable: bool,
) -> Result<()> {
    debug!(
        backend = storage.name(),
        service = %service,
        account = %account,
        class = %item_class,
        "Updating secret"
    );

    let query = ItemQuery::item(service, account, item_class);
    storage
        .update_item(&query, value, synchronizable)
        .map_err(SecretError::failure)
}

/// Read a secret
pub fn read(
    storage: &dyn SecureStorage,
    service: &str,
    account: &str,
    item_class: ItemClass,
) -> Result<SecretBytes> {
    debug!(
        backend = storage.name(),
        service = %service,
        account = %account,
        class = %item_class,
        "Reading secret"
    );

    let query = ItemQuery::item(service, account, item_class);
    match storage.copy_matching(&query) {
        Ok(Payload::Data(bytes)) => Ok(SecretBytes::new(bytes)),
        Ok(_) => Err(SecretError::InvalidFormat),
        Err(StorageStatus::NotFound) => Err(SecretError::NotFound),
        Err(other) => Err(SecretError::failure(other)),
    }
}

/// Delete a secret; succeeds whether or not it existed
pub fn delete(
    storage: &dyn SecureStorage,
    service: &str,
    account: &str,
    item_class: ItemClass,
) -> Result<()> {
    debug!(
        backend = storage.name(),
        service = %service,
        account = %account,
        class = %item_class,
        "Deleting secret"
    );

    let query = ItemQuery::item(service, account, item_class);
    match storage.delete_item(&query) {
        Ok(()) | Err(StorageStatus::NotFound) => Ok(()),
        Err(other) => Err(SecretError::failure(other)),
    }
}

/// List the distinct account names stored under a service and class
///
/// Returns an empty set when nothing matches. Attribute sets without a
/// textual account are skipped.
pub fn list_accounts(
    storage: &dyn SecureStorage,
    service: &str,
    item_class: ItemClass,
) -> Result<BTreeSet<String>> {
    debug!(
        backend = storage.name(),
        service = %service,
        class = %item_class,
        "Listing accounts"
    );

    let query = ItemQuery::service(service, item_class);
    match storage.copy_matching_all(&query) {
        Ok(Payload::AttributeSets(sets)) => Ok(sets
            .into_iter()
            .filter_map(|mut set| match set.remove(attr::ACCOUNT) {
                Some(AttributeValue::Text(account)) => Some(account),
                _ => None,
            })
            .collect()),
        Ok(_) => Err(SecretError::InvalidFormat),
        Err(StorageStatus::NotFound) => Ok(BTreeSet::new()),
        Err(other) => Err(SecretError::failure(other)),
    }
}
