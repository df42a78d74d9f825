//! Certificate acquisition through certbot

use tracing::{info, warn};

use super::CertPaths;
use crate::context::HostContext;
use crate::errors::{TlsError, TlsErrorKind};
use crate::filesys::file::File;
use crate::models::facts::EnvironmentFacts;
use crate::models::request::WebServerKind;
use crate::runner::CommandSpec;

/// Markers of a Let's Encrypt rate limit in certbot output
const RATE_LIMIT_MARKERS: [&str; 3] = ["too many certificates", "ratelimited", "rate limit"];

/// Outcome of a successful provisioning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub paths: CertPaths,
    /// The certificate was already on disk and left untouched
    pub reused: bool,
}

/// Both certificate files exist for `domain`
pub async fn existing_certificate(ctx: &HostContext, domain: &str) -> Option<CertPaths> {
    let paths = CertPaths::for_domain(domain);
    let chain = File::new(ctx.layout.path(&paths.fullchain));
    let key = File::new(ctx.layout.path(&paths.privkey));
    if chain.exists().await && key.exists().await {
        Some(paths)
    } else {
        None
    }
}

/// Contact address for the ACME account
fn contact_email(ctx: &HostContext, domain: &str) -> String {
    ctx.settings
        .tls
        .email
        .clone()
        .unwrap_or_else(|| format!("admin@{}", domain))
}

/// The certonly invocation for a domain, using the web server's plugin
pub fn certonly_command(ctx: &HostContext, domain: &str, kind: WebServerKind) -> CommandSpec {
    let plugin = format!("--{}", kind);
    let email = contact_email(ctx, domain);
    let mut args = vec![
        "certonly",
        plugin.as_str(),
        "-d",
        domain,
        "--non-interactive",
        "--agree-tos",
        "-m",
        email.as_str(),
        "--keep-until-expiring",
    ];
    if ctx.settings.tls.staging {
        args.push("--staging");
    }
    CommandSpec::new("certbot", args)
}

/// Classify a certbot failure from its output
pub fn classify_failure(output: &str) -> TlsErrorKind {
    let lower = output.to_lowercase();
    if RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
        TlsErrorKind::RateLimited
    } else {
        TlsErrorKind::ChallengeFailed
    }
}

/// Obtain a certificate for `domain`, reusing a valid one already on disk.
/// The site must already answer plain HTTP for the challenge.
pub async fn provision(
    ctx: &HostContext,
    facts: &EnvironmentFacts,
    domain: &str,
) -> Result<Certificate, TlsError> {
    if let Some(paths) = existing_certificate(ctx, domain).await {
        info!("Reusing existing certificate for {}", domain);
        return Ok(Certificate {
            paths,
            reused: true,
        });
    }

    let kind = facts.web_server;
    if !facts.tools.has_certbot_plugin(kind) {
        return Err(TlsError::new(
            TlsErrorKind::PluginMissing,
            format!(
                "certbot has no {} plugin. {}",
                kind,
                crate::probe::install_hint(
                    facts.tools.package_manager,
                    crate::probe::Dependency::CertbotPlugin(kind)
                )
            ),
        ));
    }

    info!("Requesting certificate for {} via the {} plugin", domain, kind);
    let out = ctx
        .run_spec(certonly_command(ctx, domain, kind))
        .await
        .map_err(|e| TlsError::new(TlsErrorKind::ChallengeFailed, e.to_string()))?;

    if !out.is_success() {
        let diagnostic = out.diagnostic();
        let kind = classify_failure(&format!("{}\n{}", out.stdout, out.stderr));
        warn!("certbot failed ({}): {}", kind, diagnostic);
        return Err(TlsError::new(kind, diagnostic));
    }

    existing_certificate(ctx, domain)
        .await
        .map(|paths| Certificate {
            paths,
            reused: false,
        })
        .ok_or_else(|| {
            TlsError::new(
                TlsErrorKind::CertificateMissing,
                format!("certbot succeeded but no certificate found for {}", domain),
            )
        })
}

/// Delete the certificate lineage for `domain`. A no-op when no
/// certificate exists.
pub async fn delete_certificate(ctx: &HostContext, domain: &str) -> Result<bool, TlsError> {
    if existing_certificate(ctx, domain).await.is_none() {
        return Ok(false);
    }
    let out = ctx
        .run(
            "certbot",
            ["delete", "--cert-name", domain, "--non-interactive"],
        )
        .await
        .map_err(|e| TlsError::new(TlsErrorKind::CertificateMissing, e.to_string()))?;
    if !out.is_success() {
        return Err(TlsError::new(
            TlsErrorKind::CertificateMissing,
            format!("certbot delete failed: {}", out.diagnostic()),
        ));
    }
    info!("Deleted certificate for {}", domain);
    Ok(true)
}
