//! Directories under the host root

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::filesys::file::File;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// False for a missing path and for a path that is not a directory
    pub async fn exists(&self) -> bool {
        matches!(fs::metadata(&self.path).await, Ok(meta) if meta.is_dir())
    }

    pub async fn create(&self) -> io::Result<()> {
        fs::create_dir_all(&self.path).await
    }

    /// Remove the tree; a missing directory is not an error
    pub async fn delete(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Sorted entry names starting with `prefix`. A missing directory lists
    /// as empty.
    pub async fn list_names(&self, prefix: &str) -> io::Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(prefix) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }
}
