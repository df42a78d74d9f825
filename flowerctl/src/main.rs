//! flowerctl - Entry Point
//!
//! Installs, secures, inspects and removes Celery Flower deployments
//! behind Apache or Nginx.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use secrecy::SecretString;
use tracing::{debug, error};

use flowerctl::context::HostContext;
use flowerctl::errors::ExitCode;
use flowerctl::installer::diagnose::diagnose;
use flowerctl::installer::install::{install, read_password_stdin};
use flowerctl::installer::report::Report;
use flowerctl::installer::ssl::ssl;
use flowerctl::installer::uninstall::{uninstall, UninstallOptions};
use flowerctl::logs::{init_logging, LogLevel, LogOptions};
use flowerctl::models::request::{InstallArgs, InstallRequest, WebServerKind};
use flowerctl::storage::layout::HostLayout;
use flowerctl::storage::settings::Settings;
use flowerctl::utils::version_info;

/// Environment variable read when `--password-stdin` is not given
const PASSWORD_ENV: &str = "FLOWERCTL_AUTH_PASSWORD";

/// flowerctl - Celery Flower behind Apache or Nginx
#[derive(Parser, Debug)]
#[command(name = "flowerctl")]
#[command(author, version, about, long_about = None)]
#[command(long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ", built ", env!("BUILD_TIME"), ")"))]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file path
    #[arg(short = 'c', long = "config", env = "FLOWERCTL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level; RUST_LOG takes precedence
    #[arg(long = "log-level", value_enum, global = true)]
    log_level: Option<LogLevel>,

    /// Emit logs as JSON
    #[arg(long = "log-json", global = true)]
    log_json: bool,

    /// Filesystem root the host paths are resolved under
    #[arg(long = "root", global = true, hide = true, default_value = "/")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install or repair a Flower deployment
    Install(InstallCli),
    /// Remove one or every Flower deployment
    Uninstall {
        /// Domain to remove; all managed deployments when omitted
        #[arg(long)]
        domain: Option<String>,
        /// Disable the site but keep its file and credentials
        #[arg(long)]
        keep_site: bool,
        /// Also delete the Let's Encrypt certificate
        #[arg(long)]
        purge_cert: bool,
    },
    /// Obtain a certificate and switch an installed site to HTTPS
    Ssl {
        #[arg(long)]
        domain: Option<String>,
    },
    /// Report the state of installed deployments without changing anything
    Diagnose {
        #[arg(long)]
        domain: Option<String>,
    },
}

#[derive(Args, Debug)]
struct InstallCli {
    /// Public hostname of the dashboard
    #[arg(long)]
    domain: String,

    /// Application directory; the virtualenv goes in <app-dir>/.venv
    #[arg(long)]
    app_dir: String,

    /// Web server to configure; detected when omitted
    #[arg(long, value_enum)]
    web_server: Option<WebServerKind>,

    /// Celery broker URL
    #[arg(long)]
    redis_url: Option<String>,

    /// Celery result backend URL
    #[arg(long)]
    redis_backend_url: Option<String>,

    /// Protect the dashboard with basic auth for this user
    #[arg(long)]
    create_user: Option<String>,

    /// Read the basic auth password from the first line of stdin
    #[arg(long, requires = "create_user")]
    password_stdin: bool,

    /// Comma-separated IP addresses or CIDR networks allowed to connect
    #[arg(long)]
    ip_allow: Option<String>,

    /// Request a Let's Encrypt certificate
    #[arg(long)]
    certbot: bool,
}

impl InstallCli {
    async fn into_args(self) -> Result<InstallArgs> {
        let password = if self.password_stdin {
            Some(
                read_password_stdin()
                    .await
                    .context("Failed to read password from stdin")?,
            )
        } else {
            std::env::var(PASSWORD_ENV)
                .ok()
                .filter(|p| !p.is_empty())
                .map(SecretString::from)
        };

        Ok(InstallArgs {
            domain: self.domain,
            app_dir: self.app_dir,
            web_server: self.web_server,
            redis_url: self.redis_url,
            redis_backend_url: self.redis_backend_url,
            create_user: self.create_user,
            password,
            ip_allow: self.ip_allow,
            certbot: self.certbot,
        })
    }
}

/// Help and version requests succeed; any other parse error is bad input
fn usage_exit_code(kind: ErrorKind) -> ExitCode {
    match kind {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::Success,
        _ => ExitCode::Validation,
    }
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = usage_exit_code(e.kind());
            let _ = e.print();
            std::process::exit(code.code());
        }
    };
    let code = match run(cli).await {
        Ok(report) => {
            report.print();
            report.exit_code()
        }
        Err(e) => {
            error!("{:#}", e);
            eprintln!("flowerctl: {:#}", e);
            ExitCode::Validation
        }
    };
    std::process::exit(code.code());
}

async fn load_settings(cli: &Cli, layout: &HostLayout) -> Result<Settings> {
    let path = match cli.config.as_ref() {
        Some(path) => path.clone(),
        None => layout.settings_file().path().to_path_buf(),
    };
    let settings = Settings::load(&path)
        .await
        .with_context(|| format!("Unable to load settings from {}", path.display()))?;
    Ok(settings)
}

async fn run(cli: Cli) -> Result<Report> {
    let layout = HostLayout::new(cli.root.clone());
    let settings = load_settings(&cli, &layout).await?;

    if let Err(e) = init_logging(LogOptions {
        log_level: cli.log_level.unwrap_or(settings.log_level),
        json_format: cli.log_json,
    }) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let version = version_info();
    debug!(
        "flowerctl {} ({}, built {})",
        version.version, version.git_hash, version.build_time
    );

    let ctx = HostContext::system(layout, settings);

    let report = match cli.command {
        Commands::Install(args) => {
            let args = args.into_args().await?;
            match InstallRequest::from_args(args) {
                Ok(req) => install(&ctx, req).await,
                Err(e) => {
                    let mut report = Report::new("install");
                    report.fail(e.exit_code(), e.to_string());
                    report
                }
            }
        }
        Commands::Uninstall {
            domain,
            keep_site,
            purge_cert,
        } => {
            uninstall(
                &ctx,
                UninstallOptions {
                    domain,
                    keep_site,
                    purge_cert,
                },
            )
            .await
        }
        Commands::Ssl { domain } => ssl(&ctx, domain.as_deref()).await,
        Commands::Diagnose { domain } => diagnose(&ctx, domain.as_deref()).await,
    };
    Ok(report)
}
