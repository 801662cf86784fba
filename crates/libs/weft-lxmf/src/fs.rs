use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Flash filesystems on the smallest targets cap per-name length; every
/// store path stays under this.
pub const MAX_FILE_NAME: usize = 28;

/// Minimal filesystem surface the store runs against. Paths are rooted at
/// the store root and use `/` separators (`/conv.json`, `/m/abc.j`).
pub trait FileSystem {
    fn file_exists(&self, path: &str) -> bool;
    fn read_file(&self, path: &str) -> Result<Vec<u8>, StoreError>;
    fn write_file(&self, path: &str, data: &[u8]) -> Result<usize, StoreError>;
    fn remove_file(&self, path: &str) -> Result<(), StoreError>;
    fn create_directory(&self, path: &str) -> Result<(), StoreError>;
}

fn check_name(path: &str) -> Result<(), StoreError> {
    let name = path.rsplit('/').next().unwrap_or(path);
    if name.len() > MAX_FILE_NAME {
        return Err(StoreError::NameTooLong(MAX_FILE_NAME));
    }
    Ok(())
}

/// [`FileSystem`] over `std::fs`, rooted at a host directory.
pub struct StdFs {
    root: PathBuf,
}

impl StdFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(Path::new(path.trim_start_matches('/')))
    }
}

impl FileSystem for StdFs {
    fn file_exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        std::fs::read(self.resolve(path)).map_err(|err| StoreError::Io(err.to_string()))
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<usize, StoreError> {
        check_name(path)?;
        std::fs::write(self.resolve(path), data)
            .map_err(|err| StoreError::Io(err.to_string()))?;
        Ok(data.len())
    }

    fn remove_file(&self, path: &str) -> Result<(), StoreError> {
        std::fs::remove_file(self.resolve(path)).map_err(|err| StoreError::Io(err.to_string()))
    }

    fn create_directory(&self, path: &str) -> Result<(), StoreError> {
        std::fs::create_dir_all(self.resolve(path))
            .map_err(|err| StoreError::Io(err.to_string()))
    }
}
