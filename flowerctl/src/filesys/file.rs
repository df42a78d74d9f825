//! Files under the host root

use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists (a dangling symlink counts)
    pub async fn exists(&self) -> bool {
        fs::symlink_metadata(&self.path).await.is_ok()
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> io::Result<String> {
        fs::read_to_string(&self.path).await
    }

    /// Read file contents, `None` when the file does not exist
    pub async fn read_optional(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> io::Result<T> {
        let contents = self.read_string().await?;
        serde_json::from_str(&contents).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Delete the file, succeeding when it is already gone
    pub async fn delete(&self) -> io::Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Set Unix permission bits. A no-op on non-Unix platforms.
    pub async fn set_mode(&self, mode: u32) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, std::fs::Permissions::from_mode(mode)).await?;
        }
        #[cfg(not(unix))]
        let _ = mode;
        Ok(())
    }

    /// Temporary sibling path used for atomic writes
    pub fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".flowerctl-{}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }

    /// Atomic write: write a sibling temp file, fsync, then rename over the
    /// target so readers never see a partial file
    pub async fn write_atomic(&self, contents: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.temp_path();

        let result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(contents).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &self.path).await
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        result
    }

    /// Replace this path with a symlink to `target`, atomically
    #[cfg(unix)]
    pub async fn symlink_to(&self, target: &Path) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_path = self.temp_path();
        let _ = fs::remove_file(&temp_path).await;
        fs::symlink(target, &temp_path).await?;
        fs::rename(&temp_path, &self.path).await
    }

    /// Symlink target, `None` when not a symlink
    pub async fn link_target(&self) -> Option<PathBuf> {
        fs::read_link(&self.path).await.ok()
    }
}
