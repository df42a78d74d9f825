//! Install workflow
//!
//! Probe, provision, render, apply the site, attempt TLS, write credentials,
//! start the service. Any fatal failure after the host was touched unwinds
//! the steps of this run in reverse order.

use secrecy::SecretString;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use super::report::{Outcome, Report};
use super::rollback::{AppliedStep, RollbackLedger};
use crate::auth::htpasswd;
use crate::context::HostContext;
use crate::deploy::fsm::{InstallEvent, InstallFsm};
use crate::deploy::{health, venv};
use crate::errors::{ExitCode, InstallerError, ProxyErrorKind};
use crate::models::facts::EnvironmentFacts;
use crate::models::request::InstallRequest;
use crate::probe::{self, ProbeRequirements};
use crate::proxy;
use crate::render::{self, RenderedConfig};
use crate::service;
use crate::tls::certbot;
use crate::webserver;

/// Warn when the domain does not resolve; the ACME challenge would fail
async fn check_dns(domain: &str) -> Option<String> {
    match tokio::net::lookup_host((domain, 80)).await {
        Ok(mut addrs) => addrs
            .next()
            .is_none()
            .then(|| format!("{} has no DNS records", domain)),
        Err(e) => Some(format!("{} does not resolve: {}", domain, e)),
    }
}

/// Bookkeeping for one install run
struct Run<'a> {
    ctx: &'a HostContext,
    fsm: InstallFsm,
    ledger: RollbackLedger,
    report: Report,
    /// Set when a step failed without undoing its own changes
    incomplete: bool,
}

impl<'a> Run<'a> {
    fn advance(&mut self, event: InstallEvent) {
        if let Err(e) = self.fsm.process(event) {
            // every path below follows the transition table
            error!("{}", e);
        }
    }

    /// Fatal failure: unwind what this run applied
    async fn abort(mut self, step: &str, err: InstallerError) -> Report {
        let message = format!("{} failed: {}", step, err);
        error!("{}", message);
        self.report.step(step, Outcome::Failed, err.to_string());
        self.advance(InstallEvent::Fail(message.clone()));

        let ledger = std::mem::take(&mut self.ledger);
        if !ledger.is_empty() {
            info!("Rolling back {} step(s)", ledger.len());
        }
        let unwound = ledger.unwind(self.ctx, &mut self.report).await;
        let complete = unwound && !self.incomplete;
        self.advance(InstallEvent::RollbackFinished);
        if complete {
            // the credentials it belonged to are gone
            self.report.generated_password = None;
            self.report
                .fail(ExitCode::RolledBack, format!("{}; changes rolled back", message));
        } else {
            self.report.fail(
                ExitCode::Failure,
                format!("{}; rollback incomplete, see above", message),
            );
        }
        self.report
    }
}

fn site_outcome(change: &proxy::SiteChange) -> Outcome {
    if change.changed {
        Outcome::Changed
    } else {
        Outcome::Unchanged
    }
}

/// Install or repair the deployment described by `req`
pub async fn install(ctx: &HostContext, req: InstallRequest) -> Report {
    let mut run = Run {
        ctx,
        fsm: InstallFsm::new(),
        ledger: RollbackLedger::new(),
        report: Report::new("install"),
        incomplete: false,
    };
    run.advance(InstallEvent::Start);

    // Probing: nothing is changed yet, failures do not roll back
    let facts = match probe_host(ctx, &req).await {
        Ok(facts) => facts,
        Err(e) => {
            let exit = e.exit_code();
            run.report.step("probe", Outcome::Failed, e.to_string());
            run.advance(InstallEvent::Fail(e.to_string()));
            run.report.fail(exit, e.to_string());
            return run.report;
        }
    };
    run.report.step(
        "probe",
        Outcome::Unchanged,
        format!(
            "web server {}, package manager {}",
            facts.web_server,
            facts
                .tools
                .package_manager
                .map(|p| p.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        ),
    );
    if req.tls && ctx.settings.tls.dns_check {
        if let Some(warning) = check_dns(&req.domain).await {
            warn!("{}", warning);
            run.report.step("dns", Outcome::Warning, warning);
        }
    }
    run.advance(InstallEvent::Probed);

    // Provisioning
    match venv::provision(ctx, &req.app_dir).await {
        Ok(change) => {
            let outcome = if change.created_venv {
                Outcome::Changed
            } else {
                Outcome::Unchanged
            };
            run.report
                .step("app", outcome, format!("{}/.venv", req.app_dir.display()));
            run.ledger.record(AppliedStep::App(change));
        }
        Err(e) => return run.abort("app", e).await,
    }
    run.advance(InstallEvent::Provisioned);

    // Rendering and proxy. A certificate already on disk is used right away
    // so a re-run renders the same site as the last one.
    let existing_cert = if req.tls {
        certbot::existing_certificate(ctx, &req.domain).await
    } else {
        None
    };
    let config = match render::render(&req, &facts, &ctx.settings, existing_cert.as_ref()) {
        Ok(config) => config,
        Err(e) => return run.abort("render", e).await,
    };
    match proxy::apply(ctx, &config).await {
        Ok(change) => {
            run.report
                .step("proxy", site_outcome(&change), config.site_file_name.clone());
            run.ledger.record(AppliedStep::Site(change));
        }
        Err(e) => {
            run.incomplete = e.kind == ProxyErrorKind::RestoreFailed;
            return run.abort("proxy", e.into()).await;
        }
    }
    run.advance(InstallEvent::ProxyApplied);

    // TLS is best effort: any failure leaves the plain HTTP site in place
    if !req.tls {
        run.report.step("tls", Outcome::Skipped, "not requested");
    } else if existing_cert.is_some() {
        run.report
            .step("tls", Outcome::Unchanged, "existing certificate reused");
    } else {
        attempt_tls(&mut run, &req, &facts).await;
    }
    run.advance(InstallEvent::TlsFinished);

    // Auth
    match req.auth.as_ref() {
        None => run.report.step("auth", Outcome::Skipped, "no user requested"),
        Some(auth) => {
            match htpasswd::set_credentials(ctx, facts.web_server, &req.domain, auth).await {
                Ok(mut change) => {
                    let outcome = if change.changed {
                        Outcome::Changed
                    } else {
                        Outcome::Unchanged
                    };
                    run.report
                        .step("auth", outcome, format!("user {}", auth.username));
                    if let Some(password) = change.generated_password.take() {
                        run.report.generated_password = Some((auth.username.clone(), password));
                    }
                    run.ledger.record(AppliedStep::Credentials(change));
                }
                Err(e) => return run.abort("auth", e.into()).await,
            }
        }
    }
    run.advance(InstallEvent::AuthFinished);

    // Service
    let mut change = match service::snapshot(ctx, &config.unit_name).await {
        Ok(change) => change,
        Err(e) => return run.abort("service", e.into()).await,
    };
    let result = service::install(ctx, &mut change, &config.unit_text).await;
    let outcome = if change.changed || change.restarted {
        Outcome::Changed
    } else {
        Outcome::Unchanged
    };
    run.ledger.record(AppliedStep::Service(change));
    match result {
        Ok(()) => run.report.step("service", outcome, config.unit_name.clone()),
        Err(e) => return run.abort("service", e.into()).await,
    }
    run.advance(InstallEvent::ServiceStarted);

    // Health check is a warning only
    if ctx.settings.health_check {
        match health::check(&ctx.settings).await {
            Ok(()) => run
                .report
                .step("health", Outcome::Unchanged, health::health_url(&ctx.settings)),
            Err(e) => {
                warn!("Health check failed: {}", e);
                run.report.step("health", Outcome::Warning, e);
                run.report.degrade();
            }
        }
    } else {
        run.report.step("health", Outcome::Skipped, "disabled in settings");
    }
    run.advance(InstallEvent::Finish);

    finish(&mut run.report, &req, &config);
    run.report
}

async fn probe_host(
    ctx: &HostContext,
    req: &InstallRequest,
) -> Result<EnvironmentFacts, InstallerError> {
    probe::ensure_root(ctx)?;
    let facts = probe::probe(
        ctx,
        ProbeRequirements {
            web_server: req.web_server,
            auth: req.auth.is_some(),
            tls: req.tls,
        },
    )
    .await?;
    Ok(facts)
}

/// Request a certificate and switch the site to HTTPS. Failures degrade.
async fn attempt_tls(run: &mut Run<'_>, req: &InstallRequest, facts: &EnvironmentFacts) {
    let ctx = run.ctx;
    let cert = match certbot::provision(ctx, facts, &req.domain).await {
        Ok(cert) => cert,
        Err(e) => {
            warn!("TLS not enabled: {}", e);
            run.report.step(
                "tls",
                Outcome::Warning,
                format!("{}; serving plain HTTP", e),
            );
            run.report.degrade();
            return;
        }
    };

    let config = match render::render(req, facts, &ctx.settings, Some(&cert.paths)) {
        Ok(config) => config,
        Err(e) => {
            run.report.step("tls", Outcome::Warning, e.to_string());
            run.report.degrade();
            return;
        }
    };
    match proxy::apply(ctx, &config).await {
        Ok(change) => {
            run.report
                .step("tls", Outcome::Changed, format!("https://{}", req.domain));
            run.ledger.record(AppliedStep::Site(change));
        }
        Err(e) => {
            // apply already restored the HTTP site
            warn!("TLS site rejected: {}", e);
            run.report.step(
                "tls",
                Outcome::Warning,
                format!("certificate issued but TLS site rejected: {}", e),
            );
            run.report.degrade();
        }
    }
}

fn finish(report: &mut Report, req: &InstallRequest, config: &RenderedConfig) {
    let scheme = if config.manifest.tls || report_has_tls(report) {
        "https"
    } else {
        "http"
    };
    report.note(format!("Flower dashboard: {}://{}", scheme, req.domain));
    if let Some(user) = req.auth_user() {
        report.note(format!("Login user: {}", user));
    }
    let server = webserver::for_kind(config.web_server);
    info!(
        "Install finished: site {:?}, unit {}",
        server.site_path(&req.domain),
        config.unit_name
    );
}

fn report_has_tls(report: &Report) -> bool {
    report
        .find_step("tls")
        .map(|s| s.outcome == Outcome::Changed)
        .unwrap_or(false)
}

/// First line of `reader` as the basic auth password, line ending stripped
pub async fn read_password<R>(mut reader: R) -> Result<SecretString, InstallerError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    Ok(SecretString::from(password))
}

pub async fn read_password_stdin() -> Result<SecretString, InstallerError> {
    read_password(BufReader::new(tokio::io::stdin())).await
}
