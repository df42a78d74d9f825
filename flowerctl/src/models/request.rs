//! Install request and input validation
//!
//! Every field is validated here, before any file is rendered or any command
//! is run. Characters that would need quoting in nginx, apache or systemd
//! syntax are rejected outright rather than escaped.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::auth::allow_list::{set_ip_allow_list, AllowList};
use crate::errors::{InstallerError, ValidationError};

/// Default broker when none is given
pub const DEFAULT_BROKER_URL: &str = "redis://127.0.0.1:6379/0";

const BROKER_SCHEMES: &[&str] = &["redis", "rediss", "amqp", "amqps", "pyamqp", "sentinel", "sqs"];

/// Supported web server variants
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum WebServerKind {
    Apache,
    Nginx,
}

impl fmt::Display for WebServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebServerKind::Apache => f.write_str("apache"),
            WebServerKind::Nginx => f.write_str("nginx"),
        }
    }
}

impl FromStr for WebServerKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "apache" | "apache2" | "httpd" => Ok(WebServerKind::Apache),
            "nginx" => Ok(WebServerKind::Nginx),
            other => Err(ValidationError::new(
                "web server",
                format!("`{}` is not one of: apache, nginx", other),
            )),
        }
    }
}

/// Raw install input as given on the command line
#[derive(Debug, Default)]
pub struct InstallArgs {
    pub domain: String,
    pub app_dir: String,
    pub web_server: Option<WebServerKind>,
    pub redis_url: Option<String>,
    pub redis_backend_url: Option<String>,
    pub create_user: Option<String>,
    pub password: Option<SecretString>,
    pub ip_allow: Option<String>,
    pub certbot: bool,
}

/// Basic auth credentials. Without a password, an existing entry for the
/// user is kept, or a password is generated when there is none.
#[derive(Debug)]
pub struct BasicAuth {
    pub username: String,
    pub password: Option<SecretString>,
}

/// A validated deployment request
#[derive(Debug)]
pub struct InstallRequest {
    pub domain: String,
    /// Absolute path on the host, without trailing slash
    pub app_dir: PathBuf,
    /// `None` means auto-detect
    pub web_server: Option<WebServerKind>,
    pub broker_url: String,
    pub result_backend_url: Option<String>,
    pub auth: Option<BasicAuth>,
    pub ip_allow: AllowList,
    pub tls: bool,
}

impl InstallRequest {
    /// Validate raw input into a request
    pub fn from_args(args: InstallArgs) -> Result<Self, InstallerError> {
        let domain = validate_domain(&args.domain)?;
        let app_dir = validate_app_dir(&args.app_dir)?;

        let broker_url = match args.redis_url.as_deref() {
            Some(url) => validate_broker_url("redis url", url)?,
            None => DEFAULT_BROKER_URL.to_string(),
        };
        let result_backend_url = args
            .redis_backend_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .map(|u| validate_broker_url("redis backend url", u))
            .transpose()?;

        let auth = match args.create_user {
            Some(user) => {
                let username = validate_username(&user)?;
                if let Some(pw) = args.password.as_ref() {
                    validate_password(pw)?;
                }
                Some(BasicAuth {
                    username,
                    password: args.password,
                })
            }
            None => None,
        };

        let ip_allow = set_ip_allow_list(&split_list(args.ip_allow.as_deref().unwrap_or("")))?;

        Ok(Self {
            domain,
            app_dir,
            web_server: args.web_server,
            broker_url,
            result_backend_url,
            auth,
            ip_allow,
            tls: args.certbot,
        })
    }

    pub fn auth_user(&self) -> Option<&str> {
        self.auth.as_ref().map(|a| a.username.as_str())
    }
}

/// Split a comma-separated list, dropping blanks
pub fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn reject_control(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.chars().any(|c| c.is_control()) {
        return Err(ValidationError::new(field, "contains control characters"));
    }
    Ok(())
}

/// Validate and normalise (lowercase) a hostname
pub fn validate_domain(domain: &str) -> Result<String, ValidationError> {
    const FIELD: &str = "domain";
    reject_control(FIELD, domain)?;

    if domain.is_empty() {
        return Err(ValidationError::new(FIELD, "must not be empty"));
    }
    if domain.len() > 253 {
        return Err(ValidationError::new(FIELD, "longer than 253 characters"));
    }

    for label in domain.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(ValidationError::new(
                FIELD,
                format!("`{}` has an empty or over-long label", domain),
            ));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ValidationError::new(
                FIELD,
                format!("`{}` contains characters not allowed in a hostname", domain),
            ));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(ValidationError::new(
                FIELD,
                format!("`{}` has a label starting or ending with '-'", domain),
            ));
        }
    }

    Ok(domain.to_ascii_lowercase())
}

/// Validate an absolute application directory
pub fn validate_app_dir(dir: &str) -> Result<PathBuf, ValidationError> {
    const FIELD: &str = "app dir";
    reject_control(FIELD, dir)?;

    if !dir.starts_with('/') {
        return Err(ValidationError::new(FIELD, "must be an absolute path"));
    }
    if let Some(c) = dir
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | '@')))
    {
        return Err(ValidationError::new(
            FIELD,
            format!("character {:?} is not allowed", c),
        ));
    }

    let trimmed = dir.trim_end_matches('/');
    let path = Path::new(trimmed);
    if trimmed.is_empty() || path.components().count() < 2 {
        return Err(ValidationError::new(FIELD, "must not be the filesystem root"));
    }
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
    {
        return Err(ValidationError::new(FIELD, "must not contain `.` or `..`"));
    }

    Ok(path.to_path_buf())
}

/// Validate a broker or result-backend URL
pub fn validate_broker_url(field: &'static str, raw: &str) -> Result<String, ValidationError> {
    reject_control(field, raw)?;
    if let Some(c) = raw
        .chars()
        .find(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | '`' | ';'))
    {
        return Err(ValidationError::new(
            field,
            format!("character {:?} is not allowed", c),
        ));
    }

    let url = url::Url::parse(raw)
        .map_err(|e| ValidationError::new(field, format!("`{}` is not a URL: {}", raw, e)))?;
    if !BROKER_SCHEMES.contains(&url.scheme()) {
        return Err(ValidationError::new(
            field,
            format!(
                "unsupported scheme `{}` (expected one of: {})",
                url.scheme(),
                BROKER_SCHEMES.join(", ")
            ),
        ));
    }

    Ok(raw.to_string())
}

/// Validate a basic auth username
pub fn validate_username(user: &str) -> Result<String, ValidationError> {
    const FIELD: &str = "username";
    reject_control(FIELD, user)?;

    if user.is_empty() || user.len() > 64 {
        return Err(ValidationError::new(FIELD, "must be 1 to 64 characters"));
    }
    if !user
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(ValidationError::new(
            FIELD,
            "only letters, digits, '.', '_' and '-' are allowed",
        ));
    }
    Ok(user.to_string())
}

/// Validate the `address:port` the proxy forwards to
pub fn validate_upstream(upstream: &str) -> Result<String, ValidationError> {
    const FIELD: &str = "upstream";
    let (host, port) = upstream
        .rsplit_once(':')
        .ok_or_else(|| ValidationError::new(FIELD, "expected address:port"))?;
    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'))
    {
        return Err(ValidationError::new(
            FIELD,
            format!("`{}` is not a valid listen address", host),
        ));
    }
    port.parse::<u16>()
        .map_err(|_| ValidationError::new(FIELD, format!("`{}` is not a valid port", port)))?;
    Ok(upstream.to_string())
}

fn validate_password(password: &SecretString) -> Result<(), ValidationError> {
    use secrecy::ExposeSecret;

    let pw = password.expose_secret();
    if pw.is_empty() {
        return Err(ValidationError::new("password", "must not be empty"));
    }
    reject_control("password", pw)
}
