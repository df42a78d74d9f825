//! systemd service management for the Flower process

use tracing::{debug, info, warn};

use crate::context::HostContext;
use crate::errors::{ServiceError, ServiceErrorKind};
use crate::filesys::file::File;
use crate::runner::CommandOutput;

/// Mode of the unit file; it carries the broker URL
pub const UNIT_MODE: u32 = 0o640;

/// Pre-run state of a unit and what [`install`] did to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceChange {
    pub unit_name: String,
    pub previous: Option<String>,
    pub was_active: bool,
    pub was_enabled: bool,
    /// Unit content was written
    pub changed: bool,
    /// The service was (re)started by this run
    pub restarted: bool,
}

/// Observed state of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnitStatus {
    pub exists: bool,
    pub active: bool,
    pub enabled: bool,
}

fn unit_file(ctx: &HostContext, unit_name: &str) -> File {
    ctx.layout.unit_dir().file(unit_name)
}

async fn systemctl(ctx: &HostContext, args: &[&str]) -> Result<CommandOutput, ServiceError> {
    let out = ctx.run("systemctl", args.iter().copied()).await?;
    Ok(out)
}

/// Run systemctl and fail on a non-zero exit
async fn systemctl_checked(ctx: &HostContext, args: &[&str]) -> Result<(), ServiceError> {
    let out = systemctl(ctx, args).await?;
    if !out.is_success() {
        let diagnostic = out.diagnostic();
        let kind = if diagnostic.to_lowercase().contains("access denied")
            || diagnostic.to_lowercase().contains("permission denied")
        {
            ServiceErrorKind::PermissionDenied
        } else {
            ServiceErrorKind::CommandFailed
        };
        return Err(ServiceError::new(
            kind,
            format!("systemctl {}: {}", args.join(" "), diagnostic),
        ));
    }
    Ok(())
}

pub async fn is_active(ctx: &HostContext, unit_name: &str) -> bool {
    matches!(
        systemctl(ctx, &["is-active", "--quiet", unit_name]).await,
        Ok(out) if out.is_success()
    )
}

pub async fn is_enabled(ctx: &HostContext, unit_name: &str) -> bool {
    matches!(
        systemctl(ctx, &["is-enabled", "--quiet", unit_name]).await,
        Ok(out) if out.is_success()
    )
}

/// Read-only view of a unit
pub async fn status(ctx: &HostContext, unit_name: &str) -> UnitStatus {
    UnitStatus {
        exists: unit_file(ctx, unit_name).exists().await,
        active: is_active(ctx, unit_name).await,
        enabled: is_enabled(ctx, unit_name).await,
    }
}

/// Poll `systemctl is-active` with exponential backoff
pub async fn wait_active(ctx: &HostContext, unit_name: &str) -> Result<(), ServiceError> {
    let attempts = ctx.settings.service.start_attempts.max(1);
    let cooldown = ctx.settings.service.cooldown();
    for attempt in 0..attempts {
        if is_active(ctx, unit_name).await {
            debug!("{} active after {} checks", unit_name, attempt + 1);
            return Ok(());
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(cooldown.delay(attempt)).await;
        }
    }
    Err(ServiceError::new(
        ServiceErrorKind::StartTimeout,
        format!(
            "{} not active after {} checks, see `journalctl -u {}`",
            unit_name, attempts, unit_name
        ),
    ))
}

/// Record the pre-run state of a unit
pub async fn snapshot(ctx: &HostContext, unit_name: &str) -> Result<ServiceChange, ServiceError> {
    let previous = unit_file(ctx, unit_name).read_optional().await?;
    Ok(ServiceChange {
        unit_name: unit_name.to_string(),
        previous,
        was_active: is_active(ctx, unit_name).await,
        was_enabled: is_enabled(ctx, unit_name).await,
        changed: false,
        restarted: false,
    })
}

/// Write the unit, enable it and make sure it runs the current definition.
/// `change` comes from [`snapshot`] and is updated as steps complete, so a
/// failure part way through can still be rolled back.
pub async fn install(
    ctx: &HostContext,
    change: &mut ServiceChange,
    unit_text: &str,
) -> Result<(), ServiceError> {
    let unit_name = change.unit_name.clone();
    let file = unit_file(ctx, &unit_name);

    if change.previous.as_deref() != Some(unit_text) {
        change.changed = true;
        file.write_atomic(unit_text.as_bytes()).await?;
        file.set_mode(UNIT_MODE).await?;
        info!("Wrote {:?}", file.path());
        systemctl_checked(ctx, &["daemon-reload"]).await?;
    }
    if !change.was_enabled {
        systemctl_checked(ctx, &["enable", unit_name.as_str()]).await?;
    }
    if change.changed || !change.was_active {
        change.restarted = true;
        systemctl_checked(ctx, &["restart", unit_name.as_str()]).await?;
    } else {
        debug!("{} unchanged and running", unit_name);
    }

    wait_active(ctx, &unit_name).await?;
    info!("{} is active", unit_name);
    Ok(())
}

/// Undo [`install`]: previous unit content, enablement and run state
pub async fn rollback(ctx: &HostContext, change: &ServiceChange) -> Result<(), ServiceError> {
    let unit_name = change.unit_name.as_str();
    let file = unit_file(ctx, unit_name);

    match change.previous.as_deref() {
        None => return uninstall(ctx, unit_name).await.map(|_| ()),
        Some(text) if change.changed => {
            file.write_atomic(text.as_bytes()).await?;
            file.set_mode(UNIT_MODE).await?;
            systemctl_checked(ctx, &["daemon-reload"]).await?;
        }
        Some(_) => {}
    }

    if !change.was_enabled {
        systemctl_checked(ctx, &["disable", unit_name]).await?;
    }
    if change.was_active && change.restarted {
        systemctl_checked(ctx, &["restart", unit_name]).await?;
    } else if !change.was_active {
        systemctl_checked(ctx, &["stop", unit_name]).await?;
    }
    Ok(())
}

/// Stop, disable and delete a unit. Returns whether a unit existed.
/// Idempotent.
pub async fn uninstall(ctx: &HostContext, unit_name: &str) -> Result<bool, ServiceError> {
    let file = unit_file(ctx, unit_name);
    if !file.exists().await {
        return Ok(false);
    }

    // stop/disable of an already stopped unit is fine; only log failures
    for verb in ["stop", "disable"] {
        let out = systemctl(ctx, &[verb, unit_name]).await?;
        if !out.is_success() {
            warn!("systemctl {} {}: {}", verb, unit_name, out.diagnostic());
        }
    }

    file.delete().await?;
    systemctl_checked(ctx, &["daemon-reload"]).await?;
    info!("Removed {}", unit_name);
    Ok(true)
}
