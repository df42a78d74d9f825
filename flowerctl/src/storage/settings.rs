//! Settings file management

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::InstallerError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::utils::Backoff;

/// Installer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Address the dashboard binds to and the proxy forwards to
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Dashboard port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Timeout applied to every external command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Refuse to run mutating commands unless effective uid is 0
    #[serde(default = "default_true")]
    pub require_root: bool,

    /// Probe the dashboard over HTTP after the service starts
    #[serde(default = "default_true")]
    pub health_check: bool,

    /// Polling of the health check while Flower binds its port
    #[serde(default)]
    pub health: HealthSettings,

    /// Service supervision
    #[serde(default)]
    pub service: ServiceSettings,

    /// Certificate provisioning
    #[serde(default)]
    pub tls: TlsSettings,

    /// Python virtual environment
    #[serde(default)]
    pub venv: VenvSettings,

    /// Group the web server runs as, owner group of the credentials file
    #[serde(default = "default_web_group")]
    pub web_group: String,
}

fn default_true() -> bool {
    true
}

fn default_listen_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5555
}

fn default_command_timeout() -> u64 {
    120
}

fn default_web_group() -> String {
    "www-data".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            listen_address: default_listen_address(),
            port: default_port(),
            command_timeout_secs: default_command_timeout(),
            require_root: true,
            health_check: true,
            health: HealthSettings::default(),
            service: ServiceSettings::default(),
            tls: TlsSettings::default(),
            venv: VenvSettings::default(),
            web_group: default_web_group(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, falling back to defaults when absent
    pub async fn load(path: &Path) -> Result<Self, InstallerError> {
        let file = File::new(path);
        if !file.exists().await {
            debug!("No settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        file.read_json().await.map_err(|e| {
            InstallerError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// `address:port` the proxy forwards to
    pub fn upstream(&self) -> String {
        format!("{}:{}", self.listen_address, self.port)
    }
}

/// Service supervision settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// How many times `systemctl is-active` is polled after start
    #[serde(default = "default_start_attempts")]
    pub start_attempts: u32,

    /// First polling delay in milliseconds, doubled per attempt
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Polling delay cap in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_start_attempts() -> u32 {
    6
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8000
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            start_attempts: default_start_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ServiceSettings {
    pub fn cooldown(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.base_delay_ms),
            max: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Health check polling. `systemctl is-active` reports a `Type=simple` unit
/// active before Flower listens, so the first requests may be refused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_health_attempts")]
    pub attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_health_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Per-request timeout
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,
}

fn default_health_attempts() -> u32 {
    8
}

fn default_health_max_delay_ms() -> u64 {
    4000
}

fn default_health_timeout() -> u64 {
    5
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            attempts: default_health_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_health_max_delay_ms(),
            timeout_secs: default_health_timeout(),
        }
    }
}

impl HealthSettings {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.base_delay_ms),
            max: Duration::from_millis(self.max_delay_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Certificate provisioning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsSettings {
    /// Registration email; `admin@<domain>` when unset
    #[serde(default)]
    pub email: Option<String>,

    /// Use the CA's staging environment
    #[serde(default)]
    pub staging: bool,

    /// Warn before requesting a certificate for a domain that does not resolve
    #[serde(default = "default_true")]
    pub dns_check: bool,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            email: None,
            staging: false,
            dns_check: true,
        }
    }
}

/// Virtual environment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenvSettings {
    /// Interpreter used to create the venv
    #[serde(default = "default_python")]
    pub python: String,

    /// Packages installed into the venv
    #[serde(default = "default_packages")]
    pub packages: Vec<String>,

    /// Timeout for each pip invocation, which downloads packages
    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_packages() -> Vec<String> {
    vec!["celery[redis]".to_string(), "flower".to_string()]
}

fn default_install_timeout() -> u64 {
    900
}

impl Default for VenvSettings {
    fn default() -> Self {
        Self {
            python: default_python(),
            packages: default_packages(),
            install_timeout_secs: default_install_timeout(),
        }
    }
}
