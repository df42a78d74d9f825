//! TLS certificates from Let's Encrypt

pub mod certbot;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Certbot's live directory on the host
pub const LIVE_DIR: &str = "/etc/letsencrypt/live";

/// Host paths of a domain's certificate chain and key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertPaths {
    pub fullchain: PathBuf,
    pub privkey: PathBuf,
}

impl CertPaths {
    /// Where certbot places the files for `domain`
    pub fn for_domain(domain: &str) -> Self {
        let live = PathBuf::from(LIVE_DIR).join(domain);
        Self {
            fullchain: live.join("fullchain.pem"),
            privkey: live.join("privkey.pem"),
        }
    }
}
