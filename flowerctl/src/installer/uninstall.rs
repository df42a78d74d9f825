//! Uninstall workflow
//!
//! Teardown never stops at the first failure: every step runs and the
//! report lists what failed.

use std::collections::BTreeSet;

use tracing::{info, warn};

use super::report::{Outcome, Report};
use crate::auth::htpasswd;
use crate::context::HostContext;
use crate::deploy::fsm::{InstallEvent, InstallFsm};
use crate::errors::ExitCode;
use crate::models::request::{validate_domain, WebServerKind};
use crate::probe;
use crate::proxy;
use crate::service;
use crate::storage::layout::{HostLayout, MANAGED_PREFIX};
use crate::tls::certbot;
use crate::webserver;

/// Options of the uninstall command
#[derive(Debug, Clone, Default)]
pub struct UninstallOptions {
    /// `None` removes every managed deployment
    pub domain: Option<String>,
    /// Disable the site but leave its file (and credentials) in place
    pub keep_site: bool,
    /// Also delete the domain's certificate
    pub purge_cert: bool,
}

/// Domains with any managed artifact: site file, enabled entry or unit
async fn discover_domains(ctx: &HostContext) -> BTreeSet<String> {
    let mut domains: BTreeSet<String> = webserver::managed_sites(&ctx.layout)
        .await
        .into_iter()
        .map(|(_, manifest)| manifest.domain)
        .collect();

    match ctx.layout.unit_dir().list_names(MANAGED_PREFIX).await {
        Ok(units) => {
            for unit in units {
                if let Some(domain) = unit
                    .strip_suffix(".service")
                    .and_then(|name| name.strip_prefix(MANAGED_PREFIX))
                {
                    if validate_domain(domain).is_ok() {
                        domains.insert(domain.to_string());
                    }
                }
            }
        }
        Err(e) => warn!("Unable to list units: {}", e),
    }
    domains
}

/// Remove one domain's deployment, recording each step
async fn remove_domain(ctx: &HostContext, domain: &str, opts: &UninstallOptions, report: &mut Report) {
    let unit_name = HostLayout::unit_name(domain);
    match service::uninstall(ctx, &unit_name).await {
        Ok(true) => report.step(format!("{} service", domain), Outcome::Changed, format!("{} removed", unit_name)),
        Ok(false) => report.step(format!("{} service", domain), Outcome::Unchanged, "no unit"),
        Err(e) => report.step(format!("{} service", domain), Outcome::Failed, e.to_string()),
    }

    for kind in [WebServerKind::Apache, WebServerKind::Nginx] {
        let server = webserver::for_kind(kind);
        let site_name = server.site_file_name(domain);
        match proxy::remove(ctx, kind, domain, opts.keep_site).await {
            Ok(true) => {
                let detail = if opts.keep_site {
                    format!("{} disabled, file kept", site_name)
                } else {
                    format!("{} removed", site_name)
                };
                report.step(format!("{} {} site", domain, kind), Outcome::Changed, detail);
            }
            Ok(false) => {}
            Err(e) => report.step(format!("{} {} site", domain, kind), Outcome::Failed, e.to_string()),
        }

        if opts.keep_site {
            continue;
        }
        match htpasswd::remove_credentials(ctx, kind, domain).await {
            Ok(true) => report.step(
                format!("{} credentials", domain),
                Outcome::Changed,
                format!("{:?} removed", server.credentials_path(domain)),
            ),
            Ok(false) => {}
            Err(e) => report.step(format!("{} credentials", domain), Outcome::Failed, e.to_string()),
        }
    }

    if opts.purge_cert {
        match certbot::delete_certificate(ctx, domain).await {
            Ok(true) => report.step(format!("{} certificate", domain), Outcome::Changed, "deleted"),
            Ok(false) => report.step(format!("{} certificate", domain), Outcome::Unchanged, "none issued"),
            Err(e) => report.step(format!("{} certificate", domain), Outcome::Failed, e.to_string()),
        }
    }
}

/// Remove one or every managed deployment. Removing something that is not
/// installed is a no-op.
pub async fn uninstall(ctx: &HostContext, opts: UninstallOptions) -> Report {
    let mut report = Report::new("uninstall");
    let mut fsm = InstallFsm::new();

    if let Err(e) = probe::ensure_root(ctx) {
        report.fail(ExitCode::Environment, e.to_string());
        return report;
    }

    let domains: Vec<String> = match opts.domain.as_deref() {
        Some(raw) => match validate_domain(raw) {
            Ok(domain) => vec![domain],
            Err(e) => {
                report.fail(ExitCode::Validation, e.to_string());
                return report;
            }
        },
        None => discover_domains(ctx).await.into_iter().collect(),
    };

    let _ = fsm.process(InstallEvent::Uninstall);
    info!("Uninstalling {} deployment(s)", domains.len());

    if domains.is_empty() {
        report.step("uninstall", Outcome::Unchanged, "no managed deployments found");
    }
    for domain in &domains {
        let before = report.steps.len();
        remove_domain(ctx, domain, &opts, &mut report).await;
        if report.steps[before..]
            .iter()
            .all(|s| s.outcome == Outcome::Unchanged)
        {
            info!("{} was not installed", domain);
        }
    }

    let _ = fsm.process(InstallEvent::UninstallFinished);

    let failed = report
        .steps
        .iter()
        .filter(|s| s.outcome == Outcome::Failed)
        .count();
    if failed > 0 {
        report.fail(
            ExitCode::Failure,
            format!("{} teardown step(s) failed", failed),
        );
    }
    report
}
