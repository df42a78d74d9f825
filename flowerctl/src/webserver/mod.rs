//! Web server variants
//!
//! Each supported web server implements one capability set: site rendering,
//! canonical paths, enable/disable, syntax check and reload. The variant is
//! selected once from the probed facts.

pub mod apache;
pub mod nginx;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::auth::allow_list::AllowList;
use crate::context::HostContext;
use crate::errors::ProxyError;
use crate::filesys::file::File;
use crate::models::manifest::SiteManifest;
use crate::models::request::WebServerKind;
use crate::runner::CommandSpec;
use crate::storage::layout::HostLayout;
use crate::tls::CertPaths;

/// Realm shown in the basic auth prompt
pub const AUTH_REALM: &str = "Flower";

/// Validated inputs for one site definition. Paths are host paths.
#[derive(Debug, Clone, Copy)]
pub struct SiteParams<'a> {
    pub domain: &'a str,
    pub upstream: &'a str,
    pub credentials_file: Option<&'a str>,
    pub allow: &'a AllowList,
    pub cert: Option<&'a CertPaths>,
    pub manifest: &'a SiteManifest,
}

#[async_trait]
pub trait WebServer: Send + Sync {
    fn kind(&self) -> WebServerKind;

    /// systemd service name of the web server
    fn service_name(&self) -> &'static str;

    /// Configuration root on the host
    fn config_dir(&self) -> &'static str;

    /// Site name as used by enable tooling, derived from the domain
    fn site_name(&self, domain: &str) -> String {
        HostLayout::site_name(domain)
    }

    /// File name of the site definition
    fn site_file_name(&self, domain: &str) -> String;

    /// Render the complete site definition
    fn render_site(&self, params: &SiteParams<'_>) -> String;

    /// Enable the site. `tls` requests any TLS modules as well.
    async fn enable(&self, ctx: &HostContext, domain: &str, tls: bool) -> Result<(), ProxyError>;

    /// Disable the site; a no-op when it is not enabled
    async fn disable(&self, ctx: &HostContext, domain: &str) -> Result<(), ProxyError>;

    /// Configuration syntax check
    fn syntax_check_command(&self) -> CommandSpec;

    /// Graceful reload, never a restart
    fn reload_command(&self) -> CommandSpec {
        CommandSpec::new("systemctl", ["reload", self.service_name()])
    }

    /// Host path of the site definition
    fn site_path(&self, domain: &str) -> PathBuf {
        PathBuf::from(self.config_dir())
            .join("sites-available")
            .join(self.site_file_name(domain))
    }

    /// Host path of the enabled-site entry
    fn enabled_path(&self, domain: &str) -> PathBuf {
        PathBuf::from(self.config_dir())
            .join("sites-enabled")
            .join(self.site_file_name(domain))
    }

    /// Host path of the basic auth credentials file
    fn credentials_path(&self, domain: &str) -> PathBuf {
        PathBuf::from(self.config_dir()).join(format!("{}.htpasswd", self.site_name(domain)))
    }

    fn site_file(&self, layout: &HostLayout, domain: &str) -> File {
        File::new(layout.path(self.site_path(domain)))
    }

    fn enabled_file(&self, layout: &HostLayout, domain: &str) -> File {
        File::new(layout.path(self.enabled_path(domain)))
    }

    fn credentials_file(&self, layout: &HostLayout, domain: &str) -> File {
        File::new(layout.path(self.credentials_path(domain)))
    }

    async fn is_enabled(&self, ctx: &HostContext, domain: &str) -> bool {
        self.enabled_file(&ctx.layout, domain).exists().await
    }

    /// Whether systemd reports the web server as running
    async fn is_active(&self, ctx: &HostContext) -> bool {
        matches!(
            ctx.run("systemctl", ["is-active", "--quiet", self.service_name()]).await,
            Ok(out) if out.is_success()
        )
    }
}

static NGINX: nginx::Nginx = nginx::Nginx;
static APACHE: apache::Apache = apache::Apache;

/// Strategy for a web server variant
pub fn for_kind(kind: WebServerKind) -> &'static dyn WebServer {
    match kind {
        WebServerKind::Nginx => &NGINX,
        WebServerKind::Apache => &APACHE,
    }
}

/// Domains with a site file carrying our manifest, for every variant
pub async fn managed_sites(layout: &HostLayout) -> Vec<(WebServerKind, SiteManifest)> {
    let mut sites = Vec::new();
    for kind in [WebServerKind::Apache, WebServerKind::Nginx] {
        let server = for_kind(kind);
        let dir = crate::filesys::dir::Dir::new(layout.path(
            PathBuf::from(server.config_dir()).join("sites-available"),
        ));
        let names = match dir.list_names(crate::storage::layout::MANAGED_PREFIX).await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("Unable to list {:?}: {}", dir.path(), e);
                continue;
            }
        };
        for name in names.iter().filter(|n| !n.ends_with(".tmp")) {
            let file = dir.file(name);
            if let Ok(Some(text)) = file.read_optional().await {
                if let Some(manifest) = SiteManifest::parse(&text) {
                    if manifest.web_server == kind {
                        sites.push((kind, manifest));
                    }
                }
            }
        }
    }
    sites
}
