//! Enable HTTPS on an already installed site

use tracing::{info, warn};

use super::report::{Outcome, Report};
use crate::context::HostContext;
use crate::errors::{EnvironmentError, ExitCode, InstallerError, ProxyErrorKind};
use crate::models::facts::EnvironmentFacts;
use crate::models::manifest::SiteManifest;
use crate::models::request::validate_domain;
use crate::probe::{self, Dependency};
use crate::proxy;
use crate::render;
use crate::tls::{certbot, CertPaths};
use crate::webserver;

/// Pick the managed site to secure: the named domain, or the only one
pub async fn select_site(
    ctx: &HostContext,
    domain: Option<&str>,
) -> Result<SiteManifest, InstallerError> {
    let sites = webserver::managed_sites(&ctx.layout).await;
    match domain {
        Some(raw) => {
            let domain = validate_domain(raw)?;
            sites
                .into_iter()
                .map(|(_, manifest)| manifest)
                .find(|m| m.domain == domain)
                .ok_or_else(|| {
                    InstallerError::NotFound(format!("no flowerctl site for {}", domain))
                })
        }
        None => {
            let mut manifests: Vec<SiteManifest> = sites.into_iter().map(|(_, m)| m).collect();
            match manifests.len() {
                0 => Err(InstallerError::NotFound(
                    "no flowerctl sites installed".to_string(),
                )),
                1 => Ok(manifests.remove(0)),
                n => Err(InstallerError::ConfigError(format!(
                    "{} sites installed, pass --domain to pick one",
                    n
                ))),
            }
        }
    }
}

/// Obtain a certificate and switch the site to HTTPS. Failure leaves the
/// plain HTTP site as it was.
pub async fn ssl(ctx: &HostContext, domain: Option<&str>) -> Report {
    let mut report = Report::new("ssl");

    if let Err(e) = probe::ensure_root(ctx) {
        report.fail(ExitCode::Environment, e.to_string());
        return report;
    }

    let manifest = match select_site(ctx, domain).await {
        Ok(manifest) => manifest,
        Err(e) => {
            report.fail(e.exit_code(), e.to_string());
            return report;
        }
    };
    let domain = manifest.domain.clone();
    report.step("site", Outcome::Unchanged, format!("{} ({})", domain, manifest.web_server));

    // a manifest that does not render is refused before certbot runs
    let site_text = match render::render_site(&manifest, Some(&CertPaths::for_domain(&domain))) {
        Ok(text) => text,
        Err(e) => {
            report.step("proxy", Outcome::Failed, e.to_string());
            report.fail(e.exit_code(), e.to_string());
            return report;
        }
    };

    let tools = probe::probe_tools(ctx).await;
    if !tools.certbot {
        let err = EnvironmentError::MissingBinary {
            binary: "certbot".to_string(),
            hint: probe::install_hint(tools.package_manager, Dependency::Certbot),
        };
        report.step("tls", Outcome::Failed, err.to_string());
        report.fail(ExitCode::Environment, err.to_string());
        return report;
    }
    let facts = EnvironmentFacts {
        web_server: manifest.web_server,
        tools,
    };

    let cert = match certbot::provision(ctx, &facts, &domain).await {
        Ok(cert) => cert,
        Err(e) => {
            warn!("TLS not enabled: {}", e);
            report.step("tls", Outcome::Warning, format!("{}; serving plain HTTP", e));
            report.fail(ExitCode::Degraded, format!("certificate for {} not obtained", domain));
            return report;
        }
    };
    report.step(
        "certificate",
        if cert.reused {
            Outcome::Unchanged
        } else {
            Outcome::Changed
        },
        cert.paths.fullchain.display().to_string(),
    );

    let server = webserver::for_kind(manifest.web_server);
    match proxy::apply_site(ctx, manifest.web_server, &domain, &site_text, true).await {
        Ok(change) => {
            let outcome = if change.changed {
                Outcome::Changed
            } else {
                Outcome::Unchanged
            };
            report.step("proxy", outcome, server.site_file_name(&domain));
            report.note(format!("Flower dashboard: https://{}", domain));
            info!("HTTPS enabled for {}", domain);
        }
        Err(e) => {
            report.step("proxy", Outcome::Failed, e.to_string());
            let outcome = if e.kind == ProxyErrorKind::RestoreFailed {
                "previous site could not be restored"
            } else {
                "previous site restored"
            };
            report.fail(
                ExitCode::Failure,
                format!("TLS site for {} rejected, {}", domain, outcome),
            );
        }
    }
    report
}
