//! Item class tags

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Category tag partitioning otherwise identical `(service, account)` pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemClass {
    /// Generic secret (tokens, API keys)
    #[default]
    GenericPassword,
    /// Network credential bound to a server
    InternetPassword,
    /// Certificate blob
    Certificate,
    /// Cryptographic key material
    Key,
    /// Certificate paired with its private key
    Identity,
}

impl ItemClass {
    /// All item classes, in declaration order
    pub const ALL: [ItemClass; 5] = [
        Self::GenericPassword,
        Self::InternetPassword,
        Self::Certificate,
        Self::Key,
        Self::Identity,
    ];

    /// Stable snake_case name used in configuration and on the command line
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenericPassword => "generic_password",
            Self::InternetPassword => "internet_password",
            Self::Certificate => "certificate",
            Self::Key => "key",
            Self::Identity => "identity",
        }
    }
}

impl fmt::Display for ItemClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|class| class.as_str() == normalized)
            .ok_or_else(|| format!("unknown item class: {s}"))
    }
}
