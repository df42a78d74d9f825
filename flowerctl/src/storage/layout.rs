//! Host filesystem layout
//!
//! Every path the installer reads or writes is resolved under a root, which
//! is `/` on a real host and a scratch directory in tests.

use std::path::{Path, PathBuf};

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Prefix shared by every site, unit and credentials file the tool owns
pub const MANAGED_PREFIX: &str = "flower-";

/// Filesystem layout of the host being configured
#[derive(Debug, Clone)]
pub struct HostLayout {
    /// Filesystem root
    pub root: PathBuf,
}

impl HostLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve an absolute host path under the root
    pub fn path(&self, absolute: impl AsRef<Path>) -> PathBuf {
        let rel = absolute.as_ref().strip_prefix("/").unwrap_or(absolute.as_ref());
        self.root.join(rel)
    }

    /// Deterministic base name for a domain's site and unit
    pub fn site_name(domain: &str) -> String {
        format!("{}{}", MANAGED_PREFIX, domain)
    }

    pub fn unit_dir(&self) -> Dir {
        Dir::new(self.path("/etc/systemd/system"))
    }

    /// Unit name for a domain, including the `.service` suffix
    pub fn unit_name(domain: &str) -> String {
        format!("{}.service", Self::site_name(domain))
    }

    pub fn settings_file(&self) -> File {
        File::new(self.path("/etc/flowerctl/settings.json"))
    }
}

impl Default for HostLayout {
    fn default() -> Self {
        Self::new("/")
    }
}
