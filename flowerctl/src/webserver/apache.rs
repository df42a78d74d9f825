//! Apache site definitions (Debian layout with a2ensite / a2enmod)

use std::fmt::Write as _;

use async_trait::async_trait;

use super::{SiteParams, WebServer, AUTH_REALM};
use crate::context::HostContext;
use crate::errors::{ProxyError, ProxyErrorKind};
use crate::models::request::WebServerKind;
use crate::runner::CommandSpec;

/// Modules every proxied site needs
pub const PROXY_MODULES: [&str; 5] = ["proxy", "proxy_http", "proxy_wstunnel", "headers", "rewrite"];

#[derive(Debug, Clone, Copy, Default)]
pub struct Apache;

impl Apache {
    /// Modules to enable, with `ssl` when serving TLS
    pub fn modules(&self, tls: bool) -> Vec<&'static str> {
        let mut modules = PROXY_MODULES.to_vec();
        if tls {
            modules.push("ssl");
        }
        modules
    }

    fn proxy_block(&self, params: &SiteParams<'_>, scheme: &str) -> String {
        let upstream = params.upstream;
        let mut out = String::new();
        out.push_str("    ProxyPreserveHost On\n");
        out.push_str("    ProxyRequests Off\n");
        let _ = writeln!(out, "    RequestHeader set X-Forwarded-Proto \"{}\"", scheme);
        out.push('\n');
        out.push_str("    RewriteEngine On\n");
        out.push_str("    RewriteCond %{HTTP:Upgrade} =websocket [NC]\n");
        let _ = writeln!(out, "    RewriteRule ^/(.*)$ ws://{}/$1 [P,L]", upstream);
        out.push('\n');
        out.push_str("    <Location />\n");
        out.push_str(&self.access_block(params, "        "));
        let _ = writeln!(out, "        ProxyPass http://{}/", upstream);
        let _ = writeln!(out, "        ProxyPassReverse http://{}/", upstream);
        out.push_str("    </Location>\n");
        out
    }

    /// Access control: allow-list and credentials must both pass
    fn access_block(&self, params: &SiteParams<'_>, indent: &str) -> String {
        let mut out = String::new();
        if let Some(file) = params.credentials_file {
            let _ = writeln!(out, "{}AuthType Basic", indent);
            let _ = writeln!(out, "{}AuthName \"{}\"", indent, AUTH_REALM);
            let _ = writeln!(out, "{}AuthUserFile {}", indent, file);
        }
        match (params.allow.is_empty(), params.credentials_file.is_some()) {
            (true, false) => {
                let _ = writeln!(out, "{}Require all granted", indent);
            }
            (true, true) => {
                let _ = writeln!(out, "{}Require valid-user", indent);
            }
            (false, false) => out.push_str(&params.allow.apache_fragment(indent)),
            (false, true) => {
                let inner = format!("{}    ", indent);
                let _ = writeln!(out, "{}<RequireAll>", indent);
                out.push_str(&params.allow.apache_fragment(&inner));
                let _ = writeln!(out, "{}Require valid-user", inner);
                let _ = writeln!(out, "{}</RequireAll>", indent);
            }
        }
        out
    }
}

#[async_trait]
impl WebServer for Apache {
    fn kind(&self) -> WebServerKind {
        WebServerKind::Apache
    }

    fn service_name(&self) -> &'static str {
        "apache2"
    }

    fn config_dir(&self) -> &'static str {
        "/etc/apache2"
    }

    fn site_file_name(&self, domain: &str) -> String {
        format!("{}.conf", self.site_name(domain))
    }

    fn render_site(&self, params: &SiteParams<'_>) -> String {
        let mut out = params.manifest.header_line();
        out.push_str("# Managed by flowerctl. Local changes are overwritten on the next install.\n");

        out.push_str("<VirtualHost *:80>\n");
        let _ = writeln!(out, "    ServerName {}", params.domain);
        match params.cert {
            Some(cert) => {
                let _ = writeln!(out, "    Redirect permanent / https://{}/", params.domain);
                out.push_str("</VirtualHost>\n\n");
                out.push_str("<VirtualHost *:443>\n");
                let _ = writeln!(out, "    ServerName {}", params.domain);
                out.push('\n');
                out.push_str("    SSLEngine on\n");
                let _ = writeln!(out, "    SSLCertificateFile {}", cert.fullchain.display());
                let _ = writeln!(out, "    SSLCertificateKeyFile {}", cert.privkey.display());
                out.push('\n');
                out.push_str(&self.proxy_block(params, "https"));
                out.push_str("</VirtualHost>\n");
            }
            None => {
                out.push('\n');
                out.push_str(&self.proxy_block(params, "http"));
                out.push_str("</VirtualHost>\n");
            }
        }
        out
    }

    async fn enable(&self, ctx: &HostContext, domain: &str, tls: bool) -> Result<(), ProxyError> {
        let mut args = vec!["-q"];
        args.extend(self.modules(tls));
        let out = ctx.run("a2enmod", args).await?;
        if !out.is_success() {
            return Err(ProxyError::new(
                ProxyErrorKind::Io,
                format!("a2enmod failed: {}", out.diagnostic()),
            ));
        }

        if self.is_enabled(ctx, domain).await {
            return Ok(());
        }
        let name = self.site_name(domain);
        let out = ctx.run("a2ensite", ["-q", name.as_str()]).await?;
        if !out.is_success() {
            return Err(ProxyError::new(
                ProxyErrorKind::Io,
                format!("a2ensite failed: {}", out.diagnostic()),
            ));
        }
        Ok(())
    }

    async fn disable(&self, ctx: &HostContext, domain: &str) -> Result<(), ProxyError> {
        if !self.is_enabled(ctx, domain).await {
            return Ok(());
        }
        let name = self.site_name(domain);
        let out = ctx.run("a2dissite", ["-q", name.as_str()]).await?;
        if !out.is_success() {
            // a2dissite refuses when the site file is already gone
            self.enabled_file(&ctx.layout, domain).delete().await?;
        }
        Ok(())
    }

    fn syntax_check_command(&self) -> CommandSpec {
        CommandSpec::new("apache2ctl", ["configtest"])
    }
}
