//! Environment probing
//!
//! Read-only inspection of the host: binary lookup through the runner and a
//! couple of status queries. Nothing here mutates the system.

use tracing::{debug, info};

use crate::context::HostContext;
use crate::errors::EnvironmentError;
use crate::models::facts::{EnvironmentFacts, InstalledTools, PackageManager};
use crate::models::request::WebServerKind;

/// What the pending operation needs from the host
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeRequirements {
    /// Explicitly requested web server, `None` to auto-detect
    pub web_server: Option<WebServerKind>,
    pub auth: bool,
    pub tls: bool,
}

/// Logical dependencies, mapped to package names per package manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    Nginx,
    Apache,
    Htpasswd,
    Certbot,
    CertbotPlugin(WebServerKind),
    Python,
    Systemd,
}

impl Dependency {
    fn packages(&self, pm: PackageManager) -> &'static str {
        use PackageManager::*;
        match (self, pm) {
            (Dependency::Nginx, _) => "nginx",
            (Dependency::Apache, Dnf | Yum) => "httpd",
            (Dependency::Apache, Pacman) => "apache",
            (Dependency::Apache, _) => "apache2",
            (Dependency::Htpasswd, Dnf | Yum) => "httpd-tools",
            (Dependency::Htpasswd, Pacman) => "apache",
            (Dependency::Htpasswd, _) => "apache2-utils",
            (Dependency::Certbot, _) => "certbot",
            (Dependency::CertbotPlugin(WebServerKind::Nginx), Apk | Pacman) => "certbot-nginx",
            (Dependency::CertbotPlugin(WebServerKind::Apache), Apk | Pacman) => "certbot-apache",
            (Dependency::CertbotPlugin(WebServerKind::Nginx), _) => "python3-certbot-nginx",
            (Dependency::CertbotPlugin(WebServerKind::Apache), _) => "python3-certbot-apache",
            (Dependency::Python, Apt) => "python3 python3-venv",
            (Dependency::Python, _) => "python3",
            (Dependency::Systemd, _) => "systemd",
        }
    }
}

/// Actionable install hint for a missing dependency
pub fn install_hint(pm: Option<PackageManager>, dep: Dependency) -> String {
    match pm {
        Some(pm) => format!("Install with: {} {}", pm.install_command(), dep.packages(pm)),
        None => format!(
            "Install the `{}` package with your package manager",
            dep.packages(PackageManager::Apt)
        ),
    }
}

fn missing(pm: Option<PackageManager>, binary: &str, dep: Dependency) -> EnvironmentError {
    EnvironmentError::MissingBinary {
        binary: binary.to_string(),
        hint: install_hint(pm, dep),
    }
}

/// Binaries that identify an installed web server
fn web_server_binaries(kind: WebServerKind) -> &'static [&'static str] {
    match kind {
        WebServerKind::Nginx => &["nginx"],
        WebServerKind::Apache => &["apache2ctl", "apache2", "apachectl"],
    }
}

/// Detect installed tools. Never fails; missing tools are simply absent.
pub async fn probe_tools(ctx: &HostContext) -> InstalledTools {
    let package_manager = PackageManager::ALL
        .into_iter()
        .find(|pm| ctx.has(pm.binary()));

    let web_servers: Vec<WebServerKind> = [WebServerKind::Apache, WebServerKind::Nginx]
        .into_iter()
        .filter(|kind| web_server_binaries(*kind).iter().any(|b| ctx.has(b)))
        .collect();

    let certbot = ctx.has("certbot");
    let certbot_plugins = if certbot {
        probe_certbot_plugins(ctx).await
    } else {
        Vec::new()
    };

    let tools = InstalledTools {
        web_servers,
        package_manager,
        certbot,
        certbot_plugins,
        htpasswd: ctx.has("htpasswd"),
        systemctl: ctx.has("systemctl"),
        python: ctx.has(&ctx.settings.venv.python),
    };
    debug!("Detected tools: {:?}", tools);
    tools
}

/// Parse `certbot plugins` output for installer plugins
async fn probe_certbot_plugins(ctx: &HostContext) -> Vec<WebServerKind> {
    let output = match ctx.run("certbot", ["plugins"]).await {
        Ok(out) if out.is_success() => out,
        Ok(out) => {
            debug!("certbot plugins failed: {}", out.diagnostic());
            return Vec::new();
        }
        Err(e) => {
            debug!("certbot plugins failed: {}", e);
            return Vec::new();
        }
    };

    let mut plugins = Vec::new();
    for line in output.stdout.lines() {
        match line.trim() {
            "* nginx" => plugins.push(WebServerKind::Nginx),
            "* apache" => plugins.push(WebServerKind::Apache),
            _ => {}
        }
    }
    plugins
}

/// Pick a web server among the installed ones
async fn select_web_server(
    ctx: &HostContext,
    tools: &InstalledTools,
    requested: Option<WebServerKind>,
) -> Result<WebServerKind, EnvironmentError> {
    if let Some(kind) = requested {
        if !tools.has_web_server(kind) {
            return Err(EnvironmentError::WebServerNotInstalled(kind));
        }
        return Ok(kind);
    }

    match tools.web_servers.as_slice() {
        [] => Err(EnvironmentError::NoWebServer),
        [only] => Ok(*only),
        both => {
            for kind in both {
                if crate::webserver::for_kind(*kind).is_active(ctx).await {
                    info!("Both web servers installed, {} is active", kind);
                    return Ok(*kind);
                }
            }
            Ok(WebServerKind::Apache)
        }
    }
}

/// Probe the host for an install. Fails when a dependency required by the
/// request is missing.
pub async fn probe(
    ctx: &HostContext,
    req: ProbeRequirements,
) -> Result<EnvironmentFacts, EnvironmentError> {
    let tools = probe_tools(ctx).await;
    let pm = tools.package_manager;

    let web_server = select_web_server(ctx, &tools, req.web_server).await?;

    if !tools.systemctl {
        return Err(missing(pm, "systemctl", Dependency::Systemd));
    }
    if !tools.python {
        return Err(missing(pm, &ctx.settings.venv.python, Dependency::Python));
    }
    if web_server == WebServerKind::Apache && !ctx.has("a2ensite") {
        return Err(missing(pm, "a2ensite", Dependency::Apache));
    }
    if req.auth && !tools.htpasswd {
        return Err(missing(pm, "htpasswd", Dependency::Htpasswd));
    }
    if req.tls && !tools.certbot {
        return Err(missing(pm, "certbot", Dependency::Certbot));
    }

    info!(
        "Environment: web server {}, package manager {}",
        web_server,
        pm.map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string())
    );

    Ok(EnvironmentFacts { web_server, tools })
}

/// Ensure the effective user can modify system configuration
pub fn ensure_root(ctx: &HostContext) -> Result<(), EnvironmentError> {
    if ctx.settings.require_root && !nix::unistd::Uid::effective().is_root() {
        return Err(EnvironmentError::NotRoot);
    }
    Ok(())
}
