//! Site manifest
//!
//! Each site file the installer writes starts with a one-line JSON comment
//! describing what it was rendered from. It marks the file as ours and lets
//! `ssl`, `uninstall` and `diagnose` recover the deployment's desired state
//! from the filesystem alone.

use serde::{Deserialize, Serialize};

use crate::models::request::WebServerKind;

/// Comment prefix of the manifest line, valid in nginx and apache syntax
pub const MANIFEST_MARKER: &str = "# flowerctl-manifest: ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteManifest {
    pub domain: String,
    pub web_server: WebServerKind,
    pub app_dir: String,
    pub upstream: String,
    #[serde(default)]
    pub auth_user: Option<String>,
    /// Host path of the credentials file referenced by the site
    #[serde(default)]
    pub credentials_file: Option<String>,
    #[serde(default)]
    pub ip_allow: Vec<String>,
    /// The site was rendered with a certificate
    #[serde(default)]
    pub tls: bool,
}

impl SiteManifest {
    /// The manifest as a single comment line, with trailing newline
    pub fn header_line(&self) -> String {
        // serde_json escapes control characters, so the line cannot break
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{}{}\n", MANIFEST_MARKER, json)
    }

    /// Find and parse the manifest line in site text
    pub fn parse(text: &str) -> Option<Self> {
        text.lines()
            .take(5)
            .find_map(|line| line.strip_prefix(MANIFEST_MARKER))
            .and_then(|json| serde_json::from_str(json).ok())
    }
}
