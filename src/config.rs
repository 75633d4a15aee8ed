//! Application configuration
//!
//! Loads configuration from embedded defaults, files, and environment.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use keyward_core::{ItemClass, StorageConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_service")]
    pub default_service: String,
    #[serde(default)]
    pub default_item_class: ItemClass,
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_service() -> String {
    "keyward".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_service: default_service(),
            default_item_class: ItemClass::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Load configuration from files and environment
///
/// `explicit` is a file named on the command line; unlike the optional
/// `config/local` override it must exist.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let mut builder = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. Local overrides (optional)
        .add_source(File::with_name("config/local").required(false));

    if let Some(path) = explicit {
        builder = builder.add_source(File::from(path).required(true));
    }

    let config = builder
        // 3. Environment variables (highest priority)
        // KEYWARD_STORAGE__BACKEND maps to storage.backend
        .add_source(
            Environment::with_prefix("KEYWARD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}
