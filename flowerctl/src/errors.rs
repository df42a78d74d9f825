//! Error types for flowerctl
//!
//! Every component returns its own typed error. Only the installer decides
//! whether an error is fatal (rollback) or a warning (degrade), and
//! [`InstallerError::exit_code`] maps the outcome to the process exit code.

use std::fmt;

use thiserror::Error;

use crate::models::request::WebServerKind;
use crate::runner::RunError;

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Validation = 1,
    Environment = 2,
    RolledBack = 3,
    Degraded = 4,
    Failure = 5,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Bad user input. Raised before anything touches the host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// A required external tool or host capability is missing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentError {
    #[error("missing required dependency `{binary}`. {hint}")]
    MissingBinary { binary: String, hint: String },

    #[error("no supported web server found (install nginx or apache2)")]
    NoWebServer,

    #[error("{0} was requested but is not installed")]
    WebServerNotInstalled(WebServerKind),

    #[error("this command must be run as root (sudo)")]
    NotRoot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyErrorKind {
    SyntaxInvalid,
    PermissionDenied,
    ReloadFailed,
    /// A rejected site could not be replaced by the previous one
    RestoreFailed,
    Io,
}

impl fmt::Display for ProxyErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProxyErrorKind::SyntaxInvalid => "syntax check failed",
            ProxyErrorKind::PermissionDenied => "permission denied",
            ProxyErrorKind::ReloadFailed => "reload failed",
            ProxyErrorKind::RestoreFailed => "previous site not restored",
            ProxyErrorKind::Io => "io failure",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ProxyError {
    pub kind: ProxyErrorKind,
    pub message: String,
}

impl ProxyError {
    pub fn new(kind: ProxyErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        let kind = if err.kind() == std::io::ErrorKind::PermissionDenied {
            ProxyErrorKind::PermissionDenied
        } else {
            ProxyErrorKind::Io
        };
        ProxyError::new(kind, err.to_string())
    }
}

impl From<RunError> for ProxyError {
    fn from(err: RunError) -> Self {
        ProxyError::new(ProxyErrorKind::Io, err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsErrorKind {
    ChallengeFailed,
    RateLimited,
    PluginMissing,
    CertificateMissing,
}

impl fmt::Display for TlsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TlsErrorKind::ChallengeFailed => "challenge failed",
            TlsErrorKind::RateLimited => "rate limited",
            TlsErrorKind::PluginMissing => "certbot plugin missing",
            TlsErrorKind::CertificateMissing => "certificate files missing",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct TlsError {
    pub kind: TlsErrorKind,
    pub message: String,
}

impl TlsError {
    pub fn new(kind: TlsErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    InvalidIp,
    HashFailed,
    Io,
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthErrorKind::InvalidIp => "invalid IP allow-list",
            AuthErrorKind::HashFailed => "password hashing failed",
            AuthErrorKind::Io => "io failure",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub message: String,
    /// Offending allow-list entries, for `InvalidIp`
    pub invalid: Vec<String>,
}

impl AuthError {
    pub fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            invalid: Vec::new(),
        }
    }

    pub fn invalid_ips(invalid: Vec<String>) -> Self {
        Self {
            kind: AuthErrorKind::InvalidIp,
            message: format!("not an IP address or network: {}", invalid.join(", ")),
            invalid,
        }
    }
}

impl From<std::io::Error> for AuthError {
    fn from(err: std::io::Error) -> Self {
        AuthError::new(AuthErrorKind::Io, err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    StartTimeout,
    PermissionDenied,
    CommandFailed,
    Io,
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceErrorKind::StartTimeout => "service did not start",
            ServiceErrorKind::PermissionDenied => "permission denied",
            ServiceErrorKind::CommandFailed => "systemctl failed",
            ServiceErrorKind::Io => "io failure",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        let kind = if err.kind() == std::io::ErrorKind::PermissionDenied {
            ServiceErrorKind::PermissionDenied
        } else {
            ServiceErrorKind::Io
        };
        ServiceError::new(kind, err.to_string())
    }
}

impl From<RunError> for ServiceError {
    fn from(err: RunError) -> Self {
        ServiceError::new(ServiceErrorKind::CommandFailed, err.to_string())
    }
}

/// Main error type for flowerctl
#[derive(Error, Debug)]
pub enum InstallerError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Environment error: {0}")]
    Environment(#[from] EnvironmentError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("App provisioning error: {0}")]
    AppError(String),

    #[error("Command error: {0}")]
    Command(#[from] RunError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl InstallerError {
    /// Exit code for an error that aborted a command before or outside the
    /// forward install path
    pub fn exit_code(&self) -> ExitCode {
        match self {
            InstallerError::Validation(_) => ExitCode::Validation,
            // an invalid allow-list is caught before anything is written
            InstallerError::Auth(e) if e.kind == AuthErrorKind::InvalidIp => ExitCode::Validation,
            InstallerError::Environment(_) => ExitCode::Environment,
            InstallerError::ConfigError(_) => ExitCode::Validation,
            // unknown domain given on the command line
            InstallerError::NotFound(_) => ExitCode::Validation,
            _ => ExitCode::Failure,
        }
    }
}
