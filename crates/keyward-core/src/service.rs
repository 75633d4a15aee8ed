//! Service-scoped secret access
//!
//! [`ScopedSecretService`] binds a service namespace and item class and exposes
//! an account-keyed interface with upsert semantics. All operations on one
//! instance are serialized: an operation holds the instance gate from its
//! first storage request to its last, so the read-then-write sequence of
//! `set` never interleaves with another operation on the same instance.
//!
//! Separately constructed instances bound to the same service are *not*
//! serialized against each other. A racing `set` from two such instances can
//! fail with [`SecretError::Duplicate`]; share one instance (or clones of it)
//! when that matters.

use crate::backend::SecureStorage;
use crate::error::{Result, SecretError};
use crate::item_class::ItemClass;
use crate::secret_bytes::SecretBytes;
use crate::store;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Branch taken by an upsert after its read step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Upsert {
    Created,
    Updated,
}

/// Concurrency-safe secret access bound to one service and item class
///
/// Cloning yields another handle on the same instance; clones share the
/// serialization gate.
#[derive(Clone)]
pub struct ScopedSecretService {
    service: Arc<str>,
    item_class: ItemClass,
    storage: Arc<dyn SecureStorage>,
    gate: Arc<Mutex<()>>,
}

impl ScopedSecretService {
    /// Bind to `service` with the default (generic password) item class
    pub fn new(storage: Arc<dyn SecureStorage>, service: impl Into<String>) -> Self {
        Self::with_item_class(storage, service, ItemClass::default())
    }

    /// Bind to `service` and `item_class`
    pub fn with_item_class(
        storage: Arc<dyn SecureStorage>,
        service: impl Into<String>,
        item_class: ItemClass,
    ) -> Self {
        Self {
            service: Arc::from(service.into()),
            item_class,
            storage,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Bound service name
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Bound item class
    #[must_use]
    pub fn item_class(&self) -> ItemClass {
        self.item_class
    }

    /// Run one logical operation under the instance gate
    ///
    /// The owned guard moves into the blocking task, so dropping the awaiting
    /// future does not release the gate while storage requests are in flight.
    async fn exclusive<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&dyn SecureStorage, &str, ItemClass) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let guard = Arc::clone(&self.gate).lock_owned().await;
        let storage = Arc::clone(&self.storage);
        let service = Arc::clone(&self.service);
        let item_class = self.item_class;

        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            op(&*storage, &service[..], item_class)
        })
        .await
        .map_err(|e| SecretError::internal(format!("Task join error: {}", e)))?
    }

    /// Fetch the secret for `account`
    ///
    /// Returns `Ok(None)` when nothing is stored; other failures propagate.
    #[instrument(skip(self), fields(service = %self.service, class = %self.item_class))]
    pub async fn get(&self, account: &str) -> Result<Option<SecretBytes>> {
        let account = account.to_string();
        self.exclusive(move |storage, service, item_class| {
            match store::read(storage, service, &account, item_class) {
                Ok(value) => Ok(Some(value)),
                Err(SecretError::NotFound) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Store `value` for `account`, creating or updating as needed
    #[instrument(skip(self, value), fields(service = %self.service, class = %self.item_class))]
    pub async fn set(&self, value: &[u8], account: &str, synchronizable: bool) -> Result<()> {
        let value = SecretBytes::from(value);
        let account = account.to_string();

        let outcome = self
            .exclusive(move |storage, service, item_class| {
                match store::read(storage, service, &account, item_class) {
                    Ok(_) => {
                        store::update(
                            storage,
                            value.expose(),
                            service,
                            &account,
                            item_class,
                            synchronizable,
                        )?;
                        Ok(Upsert::Updated)
                    }
                    Err(SecretError::NotFound) => {
                        store::create(
                            storage,
                            value.expose(),
                            service,
                            &account,
                            item_class,
                            synchronizable,
                        )?;
                        Ok(Upsert::Created)
                    }
                    Err(e) => Err(e),
                }
            })
            .await?;

        debug!(outcome = ?outcome, "Secret stored");
        Ok(())
    }

    /// Delete the secret for `account`; succeeds if it was already absent
    #[instrument(skip(self), fields(service = %self.service, class = %self.item_class))]
    pub async fn delete(&self, account: &str) -> Result<()> {
        let account = account.to_string();
        self.exclusive(move |storage, service, item_class| {
            store::delete(storage, service, &account, item_class)
        })
        .await
    }

    /// Every account stored under the bound service and class
    #[instrument(skip(self), fields(service = %self.service, class = %self.item_class))]
    pub async fn accounts(&self) -> Result<BTreeSet<String>> {
        self.exclusive(|storage, service, item_class| {
            store::list_accounts(storage, service, item_class)
        })
        .await
    }
}

impl std::fmt::Debug for ScopedSecretService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedSecretService")
            .field("service", &self.service)
            .field("item_class", &self.item_class)
            .field("backend", &self.storage.name())
            .finish()
    }
}
