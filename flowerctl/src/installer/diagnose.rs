//! Read-only health report of installed deployments
//!
//! Compares what is on the host with what the site manifests describe.
//! Nothing is written and no root is required, though some files may be
//! unreadable without it.

use tracing::debug;

use super::report::{Outcome, Report};
use crate::auth::htpasswd;
use crate::context::HostContext;
use crate::errors::ExitCode;
use crate::models::manifest::SiteManifest;
use crate::models::request::validate_domain;
use crate::probe;
use crate::proxy;
use crate::render;
use crate::service;
use crate::storage::layout::HostLayout;
use crate::tls::certbot;
use crate::tls::CertPaths;
use crate::webserver;

fn check(report: &mut Report, name: String, ok: bool, detail: impl Into<String>) {
    let outcome = if ok { Outcome::Unchanged } else { Outcome::Warning };
    report.step(name, outcome, detail);
}

async fn diagnose_site(ctx: &HostContext, manifest: &SiteManifest, report: &mut Report) {
    let domain = manifest.domain.as_str();
    let server = webserver::for_kind(manifest.web_server);

    let enabled = server.is_enabled(ctx, domain).await;
    check(
        report,
        format!("{} enabled", domain),
        enabled,
        format!("{:?}", server.enabled_path(domain)),
    );

    if manifest.tls {
        let present = certbot::existing_certificate(ctx, domain).await.is_some();
        check(
            report,
            format!("{} certificate", domain),
            present,
            if present {
                "present"
            } else {
                "missing, site references absent files"
            },
        );
    }

    // the file on disk must match what its own manifest renders to
    let cert = manifest.tls.then(|| CertPaths::for_domain(domain));
    let on_disk = server.site_file(&ctx.layout, domain).read_optional().await;
    match (on_disk, render::render_site(manifest, cert.as_ref())) {
        (Ok(Some(text)), Ok(expected)) if text == expected => {
            report.step(format!("{} site", domain), Outcome::Unchanged, "matches manifest")
        }
        (Ok(Some(_)), Ok(_)) => report.step(
            format!("{} site", domain),
            Outcome::Warning,
            "edited by hand, re-run install to restore",
        ),
        (Ok(None), _) => report.step(format!("{} site", domain), Outcome::Warning, "file missing"),
        (Err(e), _) => report.step(format!("{} site", domain), Outcome::Warning, e.to_string()),
        (_, Err(e)) => report.step(
            format!("{} site", domain),
            Outcome::Warning,
            format!("manifest invalid: {}", e),
        ),
    }

    if let Some(user) = manifest.auth_user.as_deref() {
        let file = server.credentials_file(&ctx.layout, domain);
        match file.read_optional().await {
            Ok(Some(text)) => check(
                report,
                format!("{} credentials", domain),
                htpasswd::has_user(&text, user),
                format!("user {}", user),
            ),
            Ok(None) => report.step(
                format!("{} credentials", domain),
                Outcome::Warning,
                format!("{:?} missing", server.credentials_path(domain)),
            ),
            Err(e) => report.step(format!("{} credentials", domain), Outcome::Warning, e.to_string()),
        }
    }

    let unit_name = HostLayout::unit_name(domain);
    let status = service::status(ctx, &unit_name).await;
    debug!("{} status: {:?}", unit_name, status);
    check(
        report,
        format!("{} service", domain),
        status.exists && status.active && status.enabled,
        format!(
            "{}: {}, {}",
            unit_name,
            if !status.exists {
                "missing"
            } else if status.active {
                "active"
            } else {
                "inactive"
            },
            if status.enabled { "enabled" } else { "disabled" }
        ),
    );
}

/// Report on one or every managed deployment
pub async fn diagnose(ctx: &HostContext, domain: Option<&str>) -> Report {
    let mut report = Report::new("diagnose");

    let domain = match domain.map(validate_domain).transpose() {
        Ok(domain) => domain,
        Err(e) => {
            report.fail(ExitCode::Validation, e.to_string());
            return report;
        }
    };

    let tools = probe::probe_tools(ctx).await;
    let servers = tools
        .web_servers
        .iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    check(
        &mut report,
        "web servers".to_string(),
        !tools.web_servers.is_empty(),
        if servers.is_empty() { "none installed".to_string() } else { servers },
    );
    check(
        &mut report,
        "tools".to_string(),
        tools.systemctl && tools.python,
        format!(
            "systemctl {}, python {}, htpasswd {}, certbot {}",
            yes_no(tools.systemctl),
            yes_no(tools.python),
            yes_no(tools.htpasswd),
            yes_no(tools.certbot)
        ),
    );

    let sites: Vec<SiteManifest> = webserver::managed_sites(&ctx.layout)
        .await
        .into_iter()
        .map(|(_, m)| m)
        .filter(|m| domain.as_deref().map_or(true, |d| m.domain == d))
        .collect();

    if sites.is_empty() {
        match domain {
            Some(d) => {
                report.fail(ExitCode::Validation, format!("no flowerctl site for {}", d));
                return report;
            }
            None => report.note("No flowerctl deployments found."),
        }
    }

    for manifest in &sites {
        diagnose_site(ctx, manifest, &mut report).await;
    }

    let mut kinds: Vec<_> = sites.iter().map(|m| m.web_server).collect();
    kinds.sort();
    kinds.dedup();
    for kind in kinds {
        let server = webserver::for_kind(kind);
        match proxy::syntax_check(ctx, server).await {
            Ok(()) => report.step(format!("{} config", kind), Outcome::Unchanged, "syntax ok"),
            Err(e) => report.step(format!("{} config", kind), Outcome::Warning, e.to_string()),
        }
        check(
            &mut report,
            format!("{} running", kind),
            server.is_active(ctx).await,
            server.service_name(),
        );
    }

    // missing tools alone do not degrade a host with nothing installed
    if !sites.is_empty() && report.warnings().next().is_some() {
        report.degrade();
    }
    report
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}
