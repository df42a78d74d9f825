//! App directory and Python virtualenv for the dashboard

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::context::HostContext;
use crate::errors::InstallerError;
use crate::filesys::dir::Dir;
use crate::runner::CommandSpec;

/// Name of the virtualenv inside the app directory
pub const VENV_DIR: &str = ".venv";

/// What [`provision`] created, so rollback removes only that
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppChange {
    /// Root-resolved app directory
    pub app_dir: PathBuf,
    pub created_dir: bool,
    pub created_venv: bool,
}

impl AppChange {
    fn venv(&self) -> Dir {
        Dir::new(self.app_dir.join(VENV_DIR))
    }
}

async fn run_step(ctx: &HostContext, cmd: CommandSpec) -> Result<(), InstallerError> {
    let display = cmd.display();
    let out = ctx.run_spec(cmd).await?;
    if !out.is_success() {
        return Err(InstallerError::AppError(format!(
            "`{}` failed: {}",
            display,
            out.diagnostic()
        )));
    }
    Ok(())
}

async fn install_packages(ctx: &HostContext, venv: &Dir) -> Result<(), InstallerError> {
    let venv_settings = &ctx.settings.venv;
    let timeout = Duration::from_secs(venv_settings.install_timeout_secs);
    let pip = venv.path().join("bin/pip").display().to_string();

    if !venv.file("bin/python").exists().await {
        let python = venv_settings.python.as_str();
        let venv_path = venv.path().display().to_string();
        run_step(
            ctx,
            CommandSpec::new(python, ["-m", "venv", venv_path.as_str()]),
        )
        .await?;
    }

    run_step(
        ctx,
        CommandSpec::new(
            &pip,
            ["install", "--upgrade", "pip", "setuptools", "wheel"],
        )
        .with_timeout(timeout),
    )
    .await?;

    let mut args = vec!["install".to_string()];
    args.extend(venv_settings.packages.iter().cloned());
    run_step(ctx, CommandSpec::new(&pip, args).with_timeout(timeout)).await
}

/// Create the app directory and virtualenv and install the dashboard
pub async fn provision(ctx: &HostContext, app_dir: &Path) -> Result<AppChange, InstallerError> {
    let dir = Dir::new(ctx.layout.path(app_dir));
    let venv = dir.subdir(VENV_DIR);

    let change = AppChange {
        app_dir: dir.path().to_path_buf(),
        created_dir: !dir.exists().await,
        created_venv: !venv.file("bin/python").exists().await,
    };

    dir.create().await?;
    if let Err(e) = install_packages(ctx, &venv).await {
        if let Err(cleanup) = rollback(&change).await {
            warn!("Failed to clean up {:?}: {}", dir.path(), cleanup);
        }
        return Err(e);
    }

    info!("Dashboard installed in {:?}", venv.path());
    Ok(change)
}

/// Remove what [`provision`] created; pre-existing content stays
pub async fn rollback(change: &AppChange) -> Result<(), InstallerError> {
    if change.created_dir {
        Dir::new(&change.app_dir).delete().await?;
    } else if change.created_venv {
        change.venv().delete().await?;
    }
    Ok(())
}
