//! nginx site definitions (Debian layout: sites-available / sites-enabled)

use std::fmt::Write as _;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{SiteParams, WebServer, AUTH_REALM};
use crate::context::HostContext;
use crate::errors::ProxyError;
use crate::models::request::WebServerKind;
use crate::runner::CommandSpec;

#[derive(Debug, Clone, Copy, Default)]
pub struct Nginx;

impl Nginx {
    /// Relative target of the enable symlink
    pub fn link_target(&self, domain: &str) -> PathBuf {
        PathBuf::from("../sites-available").join(self.site_file_name(domain))
    }

    fn location_block(&self, params: &SiteParams<'_>) -> String {
        let indent = "        ";
        let mut out = String::new();
        out.push_str("    location / {\n");
        out.push_str(&params.allow.nginx_fragment(indent));
        if let Some(file) = params.credentials_file {
            let _ = writeln!(out, "{}auth_basic \"{}\";", indent, AUTH_REALM);
            let _ = writeln!(out, "{}auth_basic_user_file {};", indent, file);
        }
        let _ = writeln!(out, "{}proxy_pass http://{};", indent, params.upstream);
        let _ = writeln!(out, "{}proxy_http_version 1.1;", indent);
        let _ = writeln!(out, "{}proxy_set_header Host $host;", indent);
        let _ = writeln!(out, "{}proxy_set_header X-Real-IP $remote_addr;", indent);
        let _ = writeln!(
            out,
            "{}proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;",
            indent
        );
        let _ = writeln!(out, "{}proxy_set_header X-Forwarded-Proto $scheme;", indent);
        let _ = writeln!(out, "{}proxy_set_header Upgrade $http_upgrade;", indent);
        let _ = writeln!(out, "{}proxy_set_header Connection \"upgrade\";", indent);
        let _ = writeln!(out, "{}proxy_redirect off;", indent);
        out.push_str("    }\n");
        out
    }
}

#[async_trait]
impl WebServer for Nginx {
    fn kind(&self) -> WebServerKind {
        WebServerKind::Nginx
    }

    fn service_name(&self) -> &'static str {
        "nginx"
    }

    fn config_dir(&self) -> &'static str {
        "/etc/nginx"
    }

    fn site_file_name(&self, domain: &str) -> String {
        self.site_name(domain)
    }

    fn render_site(&self, params: &SiteParams<'_>) -> String {
        let mut out = params.manifest.header_line();
        out.push_str("# Managed by flowerctl. Local changes are overwritten on the next install.\n");

        out.push_str("server {\n");
        out.push_str("    listen 80;\n");
        out.push_str("    listen [::]:80;\n");
        let _ = writeln!(out, "    server_name {};", params.domain);

        match params.cert {
            Some(cert) => {
                out.push_str("\n    return 301 https://$host$request_uri;\n");
                out.push_str("}\n\n");
                out.push_str("server {\n");
                out.push_str("    listen 443 ssl;\n");
                out.push_str("    listen [::]:443 ssl;\n");
                let _ = writeln!(out, "    server_name {};", params.domain);
                out.push('\n');
                let _ = writeln!(out, "    ssl_certificate {};", cert.fullchain.display());
                let _ = writeln!(out, "    ssl_certificate_key {};", cert.privkey.display());
                out.push_str("    ssl_protocols TLSv1.2 TLSv1.3;\n");
                out.push('\n');
                out.push_str(&self.location_block(params));
                out.push_str("}\n");
            }
            None => {
                out.push('\n');
                out.push_str(&self.location_block(params));
                out.push_str("}\n");
            }
        }
        out
    }

    async fn enable(&self, ctx: &HostContext, domain: &str, _tls: bool) -> Result<(), ProxyError> {
        let link = self.enabled_file(&ctx.layout, domain);
        let target = self.link_target(domain);
        if link.link_target().await.as_deref() == Some(target.as_path()) {
            debug!("{} already enabled", self.site_name(domain));
            return Ok(());
        }
        link.symlink_to(&target).await?;
        Ok(())
    }

    async fn disable(&self, ctx: &HostContext, domain: &str) -> Result<(), ProxyError> {
        self.enabled_file(&ctx.layout, domain).delete().await?;
        Ok(())
    }

    fn syntax_check_command(&self) -> CommandSpec {
        CommandSpec::new("nginx", ["-t"])
    }
}
