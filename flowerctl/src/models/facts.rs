//! Facts detected about the host

use std::fmt;

use serde::Serialize;

use crate::models::request::WebServerKind;

/// OS package managers the prober recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Apk,
    Pacman,
    Zypper,
}

impl PackageManager {
    /// Detection order; the first binary found wins
    pub const ALL: [PackageManager; 6] = [
        PackageManager::Apt,
        PackageManager::Dnf,
        PackageManager::Yum,
        PackageManager::Apk,
        PackageManager::Pacman,
        PackageManager::Zypper,
    ];

    pub fn binary(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Dnf => "dnf",
            PackageManager::Yum => "yum",
            PackageManager::Apk => "apk",
            PackageManager::Pacman => "pacman",
            PackageManager::Zypper => "zypper",
        }
    }

    /// Command prefix that installs packages non-interactively
    pub fn install_command(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get install -y",
            PackageManager::Dnf => "dnf install -y",
            PackageManager::Yum => "yum install -y",
            PackageManager::Apk => "apk add",
            PackageManager::Pacman => "pacman -S --noconfirm",
            PackageManager::Zypper => "zypper install -y",
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// Which relevant tools are present. Gathered fresh on every run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstalledTools {
    pub web_servers: Vec<WebServerKind>,
    pub package_manager: Option<PackageManager>,
    pub certbot: bool,
    /// Web servers certbot has an installer plugin for
    pub certbot_plugins: Vec<WebServerKind>,
    pub htpasswd: bool,
    pub systemctl: bool,
    pub python: bool,
}

impl InstalledTools {
    pub fn has_web_server(&self, kind: WebServerKind) -> bool {
        self.web_servers.contains(&kind)
    }

    pub fn has_certbot_plugin(&self, kind: WebServerKind) -> bool {
        self.certbot_plugins.contains(&kind)
    }
}

/// Facts for an install: the selected web server plus detected tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentFacts {
    pub web_server: WebServerKind,
    pub tools: InstalledTools,
}
