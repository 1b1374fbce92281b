use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Utc};

use crate::error::StorageError;

/// Directory under the storage root that receives uploaded source files.
const IMPORTS_DIR: &str = "imports";

/// Stores uploaded source files under `<root>/imports/<yyyy>/<mm>/<uuid>.<ext>`.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes upload bytes under a fresh UUID filename, keeping the extension.
    pub fn store_upload(&self, content: &[u8], extension: &str) -> Result<PathBuf, StorageError> {
        let now = Utc::now();
        let dir_path = self
            .root
            .join(IMPORTS_DIR)
            .join(format!("{:04}", now.year()))
            .join(format!("{:02}", now.month()));
        self.ensure_directory(&dir_path)?;

        let filename = format!(
            "{}.{}",
            uuid::Uuid::new_v4(),
            extension.trim_start_matches('.').to_lowercase()
        );
        self.store_with_atomic_creation(&dir_path, &filename, content)
    }

    /// Removes a stored file. A file that is already gone is not an error.
    pub fn remove(&self, path: &Path) -> Result<(), StorageError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::RemoveFile {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Creates the file with `create_new` so an existing file is never overwritten.
    fn store_with_atomic_creation(
        &self,
        dir_path: &Path,
        filename: &str,
        content: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let path = dir_path.join(filename);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                file.write_all(content)
                    .map_err(|e| StorageError::WriteFile {
                        path: path.clone(),
                        source: e,
                    })?;
                Ok(path)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StorageError::FileExists(path))
            }
            Err(e) => Err(StorageError::WriteFile { path, source: e }),
        }
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}
