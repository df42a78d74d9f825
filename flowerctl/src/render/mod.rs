//! Configuration rendering
//!
//! Pure functions from a validated request (or a recovered manifest) to the
//! site and unit texts. Same inputs, same bytes.

pub mod unit;

use crate::auth::allow_list::set_ip_allow_list;
use crate::errors::InstallerError;
use crate::models::facts::EnvironmentFacts;
use crate::models::manifest::SiteManifest;
use crate::models::request::{
    validate_domain, validate_upstream, validate_username, InstallRequest, WebServerKind,
};
use crate::storage::layout::HostLayout;
use crate::storage::settings::Settings;
use crate::tls::CertPaths;
use crate::webserver::{self, SiteParams};

use self::unit::{render_unit, UnitParams};

/// Everything the installer writes for one domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    pub domain: String,
    pub web_server: WebServerKind,
    pub site_file_name: String,
    pub site_text: String,
    pub unit_name: String,
    pub unit_text: String,
    pub manifest: SiteManifest,
}

/// Manifest describing the site for a request
pub fn manifest_for(
    req: &InstallRequest,
    kind: WebServerKind,
    settings: &Settings,
    tls: bool,
) -> SiteManifest {
    let server = webserver::for_kind(kind);
    SiteManifest {
        domain: req.domain.clone(),
        web_server: kind,
        app_dir: req.app_dir.display().to_string(),
        upstream: settings.upstream(),
        auth_user: req.auth_user().map(str::to_string),
        credentials_file: req
            .auth
            .as_ref()
            .map(|_| server.credentials_path(&req.domain).display().to_string()),
        ip_allow: req.ip_allow.to_strings(),
        tls,
    }
}

/// Render the site definition described by a manifest. The manifest is
/// re-validated since it may come from disk.
pub fn render_site(
    manifest: &SiteManifest,
    cert: Option<&CertPaths>,
) -> Result<String, InstallerError> {
    let domain = validate_domain(&manifest.domain)?;
    validate_upstream(&manifest.upstream)?;
    if let Some(user) = manifest.auth_user.as_deref() {
        validate_username(user)?;
    }
    let allow = set_ip_allow_list(&manifest.ip_allow)?;

    let server = webserver::for_kind(manifest.web_server);
    // the credentials path is derived, never taken from the file
    let credentials = manifest
        .auth_user
        .as_ref()
        .map(|_| server.credentials_path(&domain).display().to_string());

    let mut manifest = manifest.clone();
    manifest.domain = domain.clone();
    manifest.credentials_file = credentials.clone();
    manifest.ip_allow = allow.to_strings();
    manifest.tls = cert.is_some();

    Ok(server.render_site(&SiteParams {
        domain: &domain,
        upstream: &manifest.upstream,
        credentials_file: credentials.as_deref(),
        allow: &allow,
        cert,
        manifest: &manifest,
    }))
}

/// Render site and unit for an install request
pub fn render(
    req: &InstallRequest,
    facts: &EnvironmentFacts,
    settings: &Settings,
    cert: Option<&CertPaths>,
) -> Result<RenderedConfig, InstallerError> {
    let kind = facts.web_server;
    let server = webserver::for_kind(kind);
    let manifest = manifest_for(req, kind, settings, cert.is_some());
    let site_text = render_site(&manifest, cert)?;

    let unit_text = render_unit(&UnitParams {
        domain: &req.domain,
        app_dir: &req.app_dir,
        broker_url: &req.broker_url,
        result_backend_url: req.result_backend_url.as_deref(),
        address: &settings.listen_address,
        port: settings.port,
    });

    Ok(RenderedConfig {
        domain: req.domain.clone(),
        web_server: kind,
        site_file_name: server.site_file_name(&req.domain),
        site_text,
        unit_name: HostLayout::unit_name(&req.domain),
        unit_text,
        manifest,
    })
}
