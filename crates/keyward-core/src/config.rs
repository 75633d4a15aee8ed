//! Storage backend selection

use crate::backend::{EncryptedFileStorage, MemoryStorage, SecureStorage};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Supported storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Automatic selection based on build features
    #[default]
    Auto,
    /// Platform keyring (requires the `native-keyring` feature)
    NativeKeyring,
    /// AES-256-GCM encrypted file
    EncryptedFile,
    /// In-memory only (for testing)
    Memory,
}

impl StorageBackend {
    /// Detect the best backend for this build
    #[must_use]
    pub fn detect() -> Self {
        if cfg!(feature = "native-keyring") {
            Self::NativeKeyring
        } else {
            Self::EncryptedFile
        }
    }

    /// Resolve Auto to actual backend
    #[must_use]
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto => Self::detect(),
            other => other,
        }
    }
}

fn default_master_key_env() -> String {
    "KEYWARD_MASTER_KEY".to_string()
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Which backend to open
    #[serde(default)]
    pub backend: StorageBackend,
    /// Encrypted file location; defaults to the user data directory
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    /// Environment variable holding the encrypted file master key
    #[serde(default = "default_master_key_env")]
    pub master_key_env: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Auto,
            file_path: None,
            master_key_env: default_master_key_env(),
        }
    }
}

/// Open the configured storage backend
pub fn open_storage(config: &StorageConfig) -> Result<Arc<dyn SecureStorage>, ConfigError> {
    let resolved = config.backend.resolve();
    info!(backend = ?resolved, "Initializing secret storage");

    match resolved {
        StorageBackend::Memory => Ok(Arc::new(MemoryStorage::new())),
        StorageBackend::EncryptedFile => {
            let path = match &config.file_path {
                Some(path) => path.clone(),
                None => EncryptedFileStorage::default_path().ok_or_else(|| {
                    ConfigError::Invalid("Cannot determine data directory".to_string())
                })?,
            };
            if config.master_key_env.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "master_key_env must not be empty".to_string(),
                ));
            }
            Ok(Arc::new(EncryptedFileStorage::from_env(
                path,
                &config.master_key_env,
            )))
        }
        #[cfg(feature = "native-keyring")]
        StorageBackend::NativeKeyring => {
            Ok(Arc::new(crate::backend::NativeKeyringStorage::new()))
        }
        #[cfg(not(feature = "native-keyring"))]
        StorageBackend::NativeKeyring => Err(ConfigError::Unavailable(
            "native keyring support is not compiled in (enable the native-keyring feature)"
                .to_string(),
        )),
        StorageBackend::Auto => Err(ConfigError::Invalid("Backend not resolved".to_string())),
    }
}
