use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::WeftError;
use crate::identity::PrivateIdentity;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPurpose {
    NodeIdentity,
    SharedSecret,
    Custom(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKey {
    pub key_id: String,
    pub purpose: KeyPurpose,
    pub material: Vec<u8>,
}

/// Key persistence boundary. Hosts pick a backend; the runtime only sees
/// opaque material keyed by id.
pub trait KeyStoreBackend {
    fn backend_id(&self) -> &'static str;
    fn get(&self, key_id: &str) -> Result<Option<StoredKey>, WeftError>;
    fn put(&self, key: StoredKey) -> Result<(), WeftError>;
    fn delete(&self, key_id: &str) -> Result<(), WeftError>;
    fn list_ids(&self) -> Result<Vec<String>, WeftError>;
}

#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: RwLock<BTreeMap<String, StoredKey>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStoreBackend for InMemoryKeyStore {
    fn backend_id(&self) -> &'static str {
        "in-memory"
    }

    fn get(&self, key_id: &str) -> Result<Option<StoredKey>, WeftError> {
        let keys = self.keys.read().map_err(|_| WeftError::ConnectionError)?;
        Ok(keys.get(key_id).cloned())
    }

    fn put(&self, key: StoredKey) -> Result<(), WeftError> {
        let mut keys = self.keys.write().map_err(|_| WeftError::ConnectionError)?;
        keys.insert(key.key_id.clone(), key);
        Ok(())
    }

    fn delete(&self, key_id: &str) -> Result<(), WeftError> {
        let mut keys = self.keys.write().map_err(|_| WeftError::ConnectionError)?;
        keys.remove(key_id);
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<String>, WeftError> {
        let keys = self.keys.read().map_err(|_| WeftError::ConnectionError)?;
        Ok(keys.keys().cloned().collect())
    }
}

/// One msgpack file per key under a root directory, written through a
/// temp file and renamed so a crash never leaves a torn key.
pub struct FileKeyStore {
    root: PathBuf,
}

impl FileKeyStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, WeftError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|_| WeftError::ConnectionError)?;
        Ok(Self { root })
    }

    fn path_for(&self, key_id: &str) -> Result<PathBuf, WeftError> {
        if !is_valid_key_id(key_id) {
            return Err(WeftError::InvalidArgument);
        }
        Ok(self.root.join(format!("{key_id}.key")))
    }
}

impl KeyStoreBackend for FileKeyStore {
    fn backend_id(&self) -> &'static str {
        "file"
    }

    fn get(&self, key_id: &str) -> Result<Option<StoredKey>, WeftError> {
        let path = self.path_for(key_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path).map_err(|_| WeftError::ConnectionError)?;
        let key =
            rmp_serde::from_slice::<StoredKey>(&bytes).map_err(|_| WeftError::PacketError)?;
        Ok(Some(key))
    }

    fn put(&self, key: StoredKey) -> Result<(), WeftError> {
        let path = self.path_for(key.key_id.as_str())?;
        let tmp_path = path.with_extension("tmp");
        let bytes = rmp_serde::to_vec_named(&key).map_err(|_| WeftError::PacketError)?;
        std::fs::write(&tmp_path, bytes).map_err(|_| WeftError::ConnectionError)?;
        std::fs::rename(&tmp_path, &path).map_err(|_| WeftError::ConnectionError)?;
        Ok(())
    }

    fn delete(&self, key_id: &str) -> Result<(), WeftError> {
        let path = self.path_for(key_id)?;
        if path.exists() {
            std::fs::remove_file(path).map_err(|_| WeftError::ConnectionError)?;
        }
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<String>, WeftError> {
        let entries = std::fs::read_dir(&self.root).map_err(|_| WeftError::ConnectionError)?;
        let mut ids = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "key") {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn is_valid_key_id(key_id: &str) -> bool {
    !key_id.is_empty()
        && key_id.len() <= 64
        && key_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Persists a node identity's 64-byte private material.
pub fn save_identity(
    store: &dyn KeyStoreBackend,
    key_id: &str,
    identity: &PrivateIdentity,
) -> Result<(), WeftError> {
    store.put(StoredKey {
        key_id: key_id.into(),
        purpose: KeyPurpose::NodeIdentity,
        material: identity.private_material().to_vec(),
    })
}

/// Restores a node identity previously saved under `key_id`.
pub fn load_identity(
    store: &dyn KeyStoreBackend,
    key_id: &str,
) -> Result<Option<PrivateIdentity>, WeftError> {
    let Some(key) = store.get(key_id)? else {
        return Ok(None);
    };
    if key.purpose != KeyPurpose::NodeIdentity {
        return Err(WeftError::InvalidArgument);
    }
    PrivateIdentity::from_private_material(&key.material).map(Some)
}
