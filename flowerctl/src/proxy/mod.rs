//! Reverse proxy site management
//!
//! Writes the site file, enables it, validates the whole web server
//! configuration and reloads. A failed check puts the previous file and
//! enablement back and never reloads, so the running configuration is never
//! replaced by a broken one.
//!
//! The new file is checked at its live path. `nginx -t` and
//! `apache2ctl configtest` only read the configuration the server includes,
//! so a copy staged elsewhere would not be validated in context. Between the
//! rename and the restore the broken file is on disk but not loaded. When the
//! restore itself fails the error kind is `RestoreFailed`, and the caller
//! must treat its own rollback as incomplete.

use tracing::{debug, info, warn};

use crate::context::HostContext;
use crate::errors::{ProxyError, ProxyErrorKind};
use crate::models::request::WebServerKind;
use crate::render::RenderedConfig;
use crate::runner::CommandSpec;
use crate::webserver::{self, WebServer};

/// Pre-run state of one site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteSnapshot {
    pub web_server: WebServerKind,
    pub domain: String,
    pub previous_content: Option<String>,
    pub previously_enabled: bool,
}

/// Result of [`apply`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteChange {
    pub snapshot: SiteSnapshot,
    /// Content or enablement was modified
    pub changed: bool,
    /// The web server loaded the new configuration
    pub reloaded: bool,
}

async fn take_snapshot(
    ctx: &HostContext,
    server: &dyn WebServer,
    domain: &str,
) -> Result<SiteSnapshot, ProxyError> {
    Ok(SiteSnapshot {
        web_server: server.kind(),
        domain: domain.to_string(),
        previous_content: server.site_file(&ctx.layout, domain).read_optional().await?,
        previously_enabled: server.is_enabled(ctx, domain).await,
    })
}

/// Run the configuration syntax check
pub async fn syntax_check(ctx: &HostContext, server: &dyn WebServer) -> Result<(), ProxyError> {
    let out = ctx.run_spec(server.syntax_check_command()).await?;
    if !out.is_success() {
        return Err(ProxyError::new(ProxyErrorKind::SyntaxInvalid, out.diagnostic()));
    }
    Ok(())
}

/// Reload the web server, starting it when it is not running
pub async fn reload(ctx: &HostContext, server: &dyn WebServer) -> Result<(), ProxyError> {
    let cmd = if server.is_active(ctx).await {
        server.reload_command()
    } else {
        info!("{} is not running, starting it", server.service_name());
        CommandSpec::new("systemctl", ["start", server.service_name()])
    };
    let out = ctx.run_spec(cmd).await?;
    if !out.is_success() {
        return Err(ProxyError::new(ProxyErrorKind::ReloadFailed, out.diagnostic()));
    }
    Ok(())
}

/// Write, enable, check and reload the site of `config`
pub async fn apply(ctx: &HostContext, config: &RenderedConfig) -> Result<SiteChange, ProxyError> {
    apply_site(
        ctx,
        config.web_server,
        &config.domain,
        &config.site_text,
        config.manifest.tls,
    )
    .await
}

/// Write, enable, check and reload one site definition. Unchanged content
/// and enablement means no write and no reload.
pub async fn apply_site(
    ctx: &HostContext,
    kind: WebServerKind,
    domain: &str,
    site_text: &str,
    tls: bool,
) -> Result<SiteChange, ProxyError> {
    let server = webserver::for_kind(kind);
    let site_name = server.site_file_name(domain);
    let snapshot = take_snapshot(ctx, server, domain).await?;

    let content_changed = snapshot.previous_content.as_deref() != Some(site_text);
    if !content_changed && snapshot.previously_enabled {
        debug!("Site {} unchanged", site_name);
        return Ok(SiteChange {
            snapshot,
            changed: false,
            reloaded: false,
        });
    }

    let site_file = server.site_file(&ctx.layout, domain);
    if content_changed {
        site_file.write_atomic(site_text.as_bytes()).await?;
        info!("Wrote {:?}", site_file.path());
    }

    let checked = async {
        server.enable(ctx, domain, tls).await?;
        syntax_check(ctx, server).await
    }
    .await;

    if let Err(e) = checked {
        warn!("Site {} rejected: {}", site_name, e);
        return Err(reject(ctx, &snapshot, e).await);
    }

    if let Err(e) = reload(ctx, server).await {
        return Err(reject(ctx, &snapshot, e).await);
    }
    info!("Site {} enabled and {} reloaded", site_name, server.service_name());

    Ok(SiteChange {
        snapshot,
        changed: true,
        reloaded: true,
    })
}

/// Restore the snapshot after a rejected site. A failed restore replaces
/// `err` with a `RestoreFailed` error carrying both messages.
async fn reject(ctx: &HostContext, snapshot: &SiteSnapshot, err: ProxyError) -> ProxyError {
    match restore_files(ctx, snapshot).await {
        Ok(()) => err,
        Err(restore_err) => {
            warn!("Failed to restore previous site: {}", restore_err);
            ProxyError::new(
                ProxyErrorKind::RestoreFailed,
                format!("{}; {}", err, restore_err),
            )
        }
    }
}

/// Put back the file content and enablement recorded in a snapshot
pub async fn restore_files(ctx: &HostContext, snapshot: &SiteSnapshot) -> Result<(), ProxyError> {
    let server = webserver::for_kind(snapshot.web_server);
    let domain = snapshot.domain.as_str();
    let site_file = server.site_file(&ctx.layout, domain);
    let enabled = server.is_enabled(ctx, domain).await;

    if enabled && !snapshot.previously_enabled {
        server.disable(ctx, domain).await?;
    }
    match snapshot.previous_content.as_deref() {
        Some(text) => site_file.write_atomic(text.as_bytes()).await?,
        None => site_file.delete().await?,
    }
    if snapshot.previously_enabled && !enabled {
        server.enable(ctx, domain, false).await?;
    }
    Ok(())
}

/// Undo an applied change, reloading when the new site was loaded
pub async fn rollback(ctx: &HostContext, change: &SiteChange) -> Result<(), ProxyError> {
    if !change.changed {
        return Ok(());
    }
    restore_files(ctx, &change.snapshot).await?;
    if change.reloaded {
        let server = webserver::for_kind(change.snapshot.web_server);
        syntax_check(ctx, server).await?;
        reload(ctx, server).await?;
    }
    Ok(())
}

/// Disable and (unless `keep_file`) delete a site, then reload. Returns
/// whether anything was removed. Idempotent.
pub async fn remove(
    ctx: &HostContext,
    kind: WebServerKind,
    domain: &str,
    keep_file: bool,
) -> Result<bool, ProxyError> {
    let server = webserver::for_kind(kind);
    let site_file = server.site_file(&ctx.layout, domain);
    let enabled = server.is_enabled(ctx, domain).await;
    let exists = site_file.exists().await;

    if !enabled && (keep_file || !exists) {
        return Ok(false);
    }

    server.disable(ctx, domain).await?;
    if !keep_file {
        site_file.delete().await?;
        info!("Removed {:?}", site_file.path());
    }

    if enabled && server.is_active(ctx).await {
        syntax_check(ctx, server).await?;
        let out = ctx.run_spec(server.reload_command()).await?;
        if !out.is_success() {
            return Err(ProxyError::new(ProxyErrorKind::ReloadFailed, out.diagnostic()));
        }
    }
    Ok(true)
}
