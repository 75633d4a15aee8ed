//! Keyward Core - Scoped secure credential store
//!
//! This crate persists sensitive byte blobs (tokens, passwords, keys) under a
//! `(service, account, item class)` identity on top of a pluggable
//! secure-storage backend:
//! - Store: stateless create / update / read / delete / list primitives
//! - Service: a per-service facade with upsert semantics and serialized access
//! - Backends: in-memory, AES-256-GCM encrypted file, native OS keyring
//!
//! ## Example
//!
//! ```
//! use keyward_core::{MemoryStorage, ScopedSecretService};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let tokens = ScopedSecretService::new(Arc::new(MemoryStorage::new()), "com.example.api");
//! tokens.set(b"s3cr3t", "alice", false).await.unwrap();
//!
//! let token = tokens.get("alice").await.unwrap().unwrap();
//! assert_eq!(token.expose(), b"s3cr3t");
//! assert!(tokens.get("bob").await.unwrap().is_none());
//! # });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod error;
pub mod item_class;
pub mod secret_bytes;
pub mod service;
pub mod store;

pub use backend::{EncryptedFileStorage, MemoryStorage, SecureStorage, StorageStatus};
#[cfg(feature = "native-keyring")]
pub use backend::NativeKeyringStorage;
pub use config::{open_storage, StorageBackend, StorageConfig};
pub use error::{ConfigError, Result, SecretError};
pub use item_class::ItemClass;
pub use secret_bytes::SecretBytes;
pub use service::ScopedSecretService;
