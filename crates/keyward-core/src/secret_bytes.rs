//! Secret byte buffer with cryptographic memory wiping

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Bytes that are cryptographically cleared from memory when dropped
///
/// # Security
///
/// - Value is zeroized on drop (via `ZeroizeOnDrop`)
/// - Debug output redacts the value
/// - Equality is constant-time
///
/// # Example
///
/// ```
/// use keyward_core::SecretBytes;
///
/// let secret = SecretBytes::new(b"api-key-12345".to_vec());
/// assert_eq!(secret.expose(), b"api-key-12345");
///
/// let debug = format!("{:?}", secret);
/// assert!(!debug.contains("api-key"));
/// ```
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes {
    inner: Vec<u8>,
}

impl SecretBytes {
    /// Wrap a byte buffer
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: bytes.into(),
        }
    }

    /// Temporarily expose the secret bytes
    ///
    /// The returned slice should not be copied into long-lived storage.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        &self.inner
    }

    /// Expose the value as UTF-8, if it is valid UTF-8
    #[must_use]
    pub fn expose_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.inner).ok()
    }

    /// Length of the secret in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if the secret is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<Vec<u8>> for SecretBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for SecretBytes {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl From<&str> for SecretBytes {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes([REDACTED, {} bytes])", self.inner.len())
    }
}

impl PartialEq for SecretBytes {
    fn eq(&self, other: &Self) -> bool {
        self.inner.ct_eq(&other.inner).into()
    }
}

impl Eq for SecretBytes {}
