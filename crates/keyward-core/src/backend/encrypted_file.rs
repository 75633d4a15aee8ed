//! Encrypted file backend using AES-256-GCM
//!
//! File format (v1): base64 of `nonce (12 bytes) || ciphertext`, where the
//! plaintext is a JSON document holding every record. Writes go to a
//! uniquely named temporary sibling that is renamed over the original.
//!
//! Every request holds an exclusive lock on `<file>.lock` from load to save,
//! so handles in other processes (or other handles in this one) never
//! overwrite each other's changes.

use super::{
    attribute_set, lock_poisoned, status, ItemAttributes, ItemQuery, Payload, SecureStorage,
    StorageResult, StorageStatus,
};
use crate::item_class::ItemClass;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use fs4::fs_std::FileExt;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const KEY_SALT: &[u8] = b"keyward-secret-store-v1";

#[derive(Serialize, Deserialize)]
struct FileContents {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    records: Vec<FileRecord>,
}

fn default_version() -> u32 {
    1
}

impl Default for FileContents {
    fn default() -> Self {
        Self {
            version: default_version(),
            records: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct FileRecord {
    service: String,
    account: String,
    #[zeroize(skip)]
    item_class: ItemClass,
    #[serde(default)]
    synchronizable: bool,
    /// Base64-encoded secret value
    value: String,
}

impl FileRecord {
    fn matches(&self, query: &ItemQuery) -> bool {
        query.matches(&self.service, &self.account, self.item_class)
    }

    fn decode_value(&self) -> StorageResult<Vec<u8>> {
        BASE64.decode(&self.value).map_err(|e| {
            StorageStatus::other(status::DECODE, format!("Failed to decode stored value: {}", e))
        })
    }
}

fn io_status(what: &str, e: std::io::Error) -> StorageStatus {
    StorageStatus::other(status::IO, format!("{}: {}", what, e))
}

/// Held for the duration of one request
struct RequestLock<'a> {
    _file: File,
    _process: MutexGuard<'a, ()>,
}

/// Secrets kept in a single AES-256-GCM encrypted file
///
/// Requests are serialized by an in-process mutex and an exclusive OS lock on
/// a sibling lock file, so the load-modify-save cycle of one request never
/// interleaves with another, whichever handle or process issued it.
pub struct EncryptedFileStorage {
    path: PathBuf,
    key: Zeroizing<[u8; KEY_LEN]>,
    lock: Mutex<()>,
}

impl EncryptedFileStorage {
    /// Open (or lazily create) an encrypted file using the given master key
    pub fn new(path: impl Into<PathBuf>, master_key: &[u8]) -> Self {
        let path = path.into();
        info!(path = %path.display(), "Using encrypted file secret storage");
        Self {
            path,
            key: Self::derive_encryption_key(master_key),
            lock: Mutex::new(()),
        }
    }

    /// Open with the master key taken from an environment variable
    ///
    /// Without the variable, a machine-specific key derived from host and
    /// user names is used. That only protects against casual inspection.
    pub fn from_env(path: impl Into<PathBuf>, env_var: &str) -> Self {
        let master_key = Zeroizing::new(std::env::var(env_var).unwrap_or_else(|_| {
            warn!(
                env_var = %env_var,
                "Master key not set, deriving a machine-specific key"
            );
            let hostname = hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "keyward-default".to_string());
            let username = std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "keyward-user".to_string());
            format!("keyward-auto-key-{}-{}", hostname, username)
        }));
        Self::new(path, master_key.as_bytes())
    }

    /// Default location of the secrets file under the user's data directory
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir()
            .or_else(dirs::home_dir)
            .map(|dir| dir.join("keyward").join("secrets.enc"))
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Derive a 256-bit encryption key from the master key
    fn derive_encryption_key(master_key: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
        let mut hasher = Sha256::new();
        hasher.update(master_key);
        hasher.update(KEY_SALT);
        let digest = hasher.finalize();

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&digest);
        key
    }

    fn cipher(&self) -> StorageResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key[..]).map_err(|e| {
            StorageStatus::other(
                status::INTERNAL_COMPONENT,
                format!("Failed to create cipher: {}", e),
            )
        })
    }

    fn encrypt_data(&self, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher.encrypt(nonce, plaintext).map_err(|e| {
            StorageStatus::other(status::INTERNAL_COMPONENT, format!("Encryption failed: {}", e))
        })?;

        let mut result = nonce_bytes.to_vec();
        result.extend(ciphertext);
        Ok(result)
    }

    fn decrypt_data(&self, encrypted: &[u8]) -> StorageResult<Zeroizing<Vec<u8>>> {
        if encrypted.len() < NONCE_LEN {
            return Err(StorageStatus::other(
                status::DECODE,
                "Encrypted secrets file is truncated",
            ));
        }

        let cipher = self.cipher()?;
        let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| {
                StorageStatus::other(
                    status::AUTH_FAILED,
                    "Decryption failed: wrong master key or tampered file",
                )
            })
    }

    fn load(&self) -> StorageResult<FileContents> {
        if !self.path.exists() {
            return Ok(FileContents::default());
        }

        let encoded = std::fs::read_to_string(&self.path).map_err(|e| {
            StorageStatus::other(status::IO, format!("Failed to read secrets file: {}", e))
        })?;
        let encrypted = BASE64.decode(encoded.trim()).map_err(|e| {
            StorageStatus::other(status::DECODE, format!("Failed to decode secrets file: {}", e))
        })?;
        let plaintext = self.decrypt_data(&encrypted)?;

        let contents: FileContents = serde_json::from_slice(&plaintext).map_err(|e| {
            StorageStatus::other(status::DECODE, format!("Failed to parse secrets file: {}", e))
        })?;

        debug!(count = contents.records.len(), "Loaded encrypted secrets file");
        Ok(contents)
    }

    /// Directory holding the secrets file
    fn dir(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn ensure_dir(&self) -> StorageResult<()> {
        let dir = self.dir();
        std::fs::create_dir_all(dir).map_err(|e| io_status("Failed to create directory", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
                warn!(dir = %dir.display(), error = %e, "Could not restrict secrets directory");
            }
        }
        Ok(())
    }

    /// Take the in-process and cross-process locks for one request
    fn begin(&self) -> StorageResult<RequestLock<'_>> {
        let process = self.lock.lock().map_err(lock_poisoned)?;
        self.ensure_dir()?;

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options
            .open(self.lock_path())
            .map_err(|e| io_status("Failed to open lock file", e))?;
        file.lock_exclusive()
            .map_err(|e| io_status("Failed to lock secrets file", e))?;

        Ok(RequestLock {
            _file: file,
            _process: process,
        })
    }

    /// Replace the secrets file; caller holds the request lock
    fn save(&self, contents: &FileContents) -> StorageResult<()> {
        let json = Zeroizing::new(serde_json::to_vec(contents).map_err(|e| {
            StorageStatus::other(
                status::INTERNAL_COMPONENT,
                format!("Failed to serialize secrets: {}", e),
            )
        })?);
        let encoded = BASE64.encode(self.encrypt_data(&json)?);

        // NamedTempFile is created 0600 on unix
        let mut tmp = NamedTempFile::new_in(self.dir())
            .map_err(|e| io_status("Failed to create temporary secrets file", e))?;
        tmp.write_all(encoded.as_bytes())
            .map_err(|e| io_status("Failed to write secrets file", e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| io_status("Failed to flush secrets file", e))?;
        tmp.persist(&self.path)
            .map_err(|e| io_status("Failed to replace secrets file", e.error))?;

        debug!(path = %self.path.display(), "Saved encrypted secrets file");
        Ok(())
    }
}

impl SecureStorage for EncryptedFileStorage {
    fn name(&self) -> &'static str {
        "encrypted_file"
    }

    fn add_item(&self, attributes: &ItemAttributes, value: &[u8]) -> StorageResult<()> {
        let _guard = self.begin()?;
        let mut contents = self.load()?;

        let query = ItemQuery::item(&attributes.service, &attributes.account, attributes.item_class);
        if contents.records.iter().any(|r| r.matches(&query)) {
            return Err(StorageStatus::Duplicate);
        }

        contents.records.push(FileRecord {
            service: attributes.service.clone(),
            account: attributes.account.clone(),
            item_class: attributes.item_class,
            synchronizable: attributes.synchronizable,
            value: BASE64.encode(value),
        });
        self.save(&contents)
    }

    fn update_item(
        &self,
        query: &ItemQuery,
        value: &[u8],
        synchronizable: bool,
    ) -> StorageResult<()> {
        let _guard = self.begin()?;
        let mut contents = self.load()?;

        let mut updated = 0usize;
        for record in contents.records.iter_mut().filter(|r| r.matches(query)) {
            record.value.zeroize();
            record.value = BASE64.encode(value);
            record.synchronizable = synchronizable;
            updated += 1;
        }
        if updated == 0 {
            return Err(StorageStatus::NotFound);
        }
        self.save(&contents)
    }

    fn copy_matching(&self, query: &ItemQuery) -> StorageResult<Payload> {
        let _guard = self.begin()?;
        let contents = self.load()?;

        let record = contents
            .records
            .iter()
            .find(|r| r.matches(query))
            .ok_or(StorageStatus::NotFound)?;
        Ok(Payload::Data(record.decode_value()?))
    }

    fn delete_item(&self, query: &ItemQuery) -> StorageResult<()> {
        let _guard = self.begin()?;
        let mut contents = self.load()?;

        let before = contents.records.len();
        contents.records.retain(|r| !r.matches(query));
        if contents.records.len() == before {
            return Err(StorageStatus::NotFound);
        }
        self.save(&contents)
    }

    fn copy_matching_all(&self, query: &ItemQuery) -> StorageResult<Payload> {
        let _guard = self.begin()?;
        let contents = self.load()?;

        let sets: Vec<_> = contents
            .records
            .iter()
            .filter(|r| r.matches(query))
            .map(|r| attribute_set(&r.service, &r.account, r.item_class, r.synchronizable))
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
    use tempfile::tempdir;

    fn attrs(account: &str) -> ItemAttributes {
        ItemAttributes {
            service: "svc".to_string(),
            account: account.to_string(),
            item_class: ItemClass::GenericPassword,
            synchronizable: false,
        }
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secrets.enc");

        let storage = EncryptedFileStorage::new(&path, b"master-key");
        storage.add_item(&attrs("alice"), &[0, 1, 2, 255]).unwrap();
        drop(storage);

        let reopened = EncryptedFileStorage::new(&path, b"master-key");
        let query = ItemQuery::item("svc", "alice", ItemClass::GenericPassword);
        assert_eq!(
            reopened.copy_matching(&query).unwrap(),
            Payload::Data(vec![0, 1, 2, 255])
        );
    }

    #[test]
    fn test_file_does_not_contain_plaintext() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secrets.enc");

        let storage = EncryptedFileStorage::new(&path, b"master-key");
        storage
            .add_item(&attrs("alice"), b"super-secret-token")
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("super-secret-token"));
        assert!(!raw.contains("alice"));
    }

    #[test]
    fn test_wrong_key_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secrets.enc");

        EncryptedFileStorage::new(&path, b"key-one")
            .add_item(&attrs("alice"), b"value")
            .unwrap();

        let other = EncryptedFileStorage::new(&path, b"key-two");
        let query = ItemQuery::item("svc", "alice", ItemClass::GenericPassword);
        let err = other.copy_matching(&query).unwrap_err();
        assert_eq!(err.code(), status::AUTH_FAILED);
    }

    #[test]
    fn test_missing_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let storage = EncryptedFileStorage::new(dir.path().join("absent.enc"), b"k");
        let query = ItemQuery::item("svc", "alice", ItemClass::GenericPassword);

        assert_eq!(storage.copy_matching(&query), Err(StorageStatus::NotFound));
        assert_eq!(storage.delete_item(&query), Err(StorageStatus::NotFound));
        assert!(!storage.path().exists());
    }

    #[test]
    fn test_handles_sharing_a_file_keep_every_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secrets.enc");

        std::thread::scope(|scope| {
            for writer in ["left", "right"] {
                let path = &path;
                scope.spawn(move || {
                    let storage = EncryptedFileStorage::new(path, b"k");
                    for i in 0..50 {
                        let account = format!("{}-{}", writer, i);
                        storage
                            .add_item(&attrs(&account), account.as_bytes())
                            .unwrap();
                    }
                });
            }
        });

        let reader = EncryptedFileStorage::new(&path, b"k");
        let Payload::AttributeSets(sets) = reader
            .copy_matching_all(&ItemQuery::service("svc", ItemClass::GenericPassword))
            .unwrap()
        else {
            panic!("expected attribute sets");
        };
        assert_eq!(sets.len(), 100);

        let query = ItemQuery::item("svc", "right-49", ItemClass::GenericPassword);
        assert_eq!(
            reader.copy_matching(&query).unwrap(),
            Payload::Data(b"right-49".to_vec())
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only_and_leaves_no_temp_files() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("secrets.enc");
        let storage = EncryptedFileStorage::new(&path, b"k");
        storage.add_item(&attrs("alice"), b"one").unwrap();
        storage.add_item(&attrs("bob"), b"two").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, ["secrets.enc", "secrets.enc.lock"]);
    }

    #[test]
    fn test_duplicate_and_delete() {
        let dir = tempdir().unwrap();
        let storage = EncryptedFileStorage::new(dir.path().join("secrets.enc"), b"k");

        storage.add_item(&attrs("alice"), b"one").unwrap();
        assert_eq!(
            storage.add_item(&attrs("alice"), b"two"),
            Err(StorageStatus::Duplicate)
        );

        let query = ItemQuery::item("svc", "alice", ItemClass::GenericPassword);
        storage.delete_item(&query).unwrap();
        assert_eq!(storage.copy_matching(&query), Err(StorageStatus::NotFound));
    }
}
