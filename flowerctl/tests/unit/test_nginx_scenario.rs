//! End-to-end install on an nginx host

use std::os::unix::fs::PermissionsExt;

use secrecy::ExposeSecret;

use flowerctl::errors::ExitCode;
use flowerctl::installer::install::install;
use flowerctl::installer::report::Outcome;
use flowerctl::models::manifest::SiteManifest;
use flowerctl::models::request::{InstallArgs, InstallRequest, WebServerKind};

use crate::common::*;

fn mode(host: &TestHost, path: &str) -> u32 {
    std::fs::metadata(host.path(path)).unwrap().permissions().mode() & 0o777
}

#[tokio::test]
async fn test_install_with_tls_auth_and_allow_list() {
    let host = TestHost::nginx();
    let report = install(&host.ctx, full_request(true)).await;

    assert_eq!(report.exit_code(), ExitCode::Success, "{}", report.render());
    assert_eq!(report.find_step("tls").unwrap().outcome, Outcome::Changed);
    assert!(report
        .notes
        .iter()
        .any(|n| n.contains(&format!("https://{}", DOMAIN))));

    // site
    let site = host.read(&nginx_site()).unwrap();
    assert!(site.contains(&format!("server_name {};", DOMAIN)));
    assert!(site.contains("return 301 https://$host$request_uri;"));
    assert!(site.contains("listen 443 ssl;"));
    assert!(site.contains(&format!(
        "ssl_certificate /etc/letsencrypt/live/{}/fullchain.pem;",
        DOMAIN
    )));
    assert!(site.contains("allow 10.0.0.0/24;\n        allow 192.168.1.10;\n        deny all;"));
    assert!(site.contains(&format!(
        "auth_basic_user_file /etc/nginx/flower-{}.htpasswd;",
        DOMAIN
    )));
    assert!(site.contains("proxy_pass http://127.0.0.1:5555;"));
    assert!(site.contains("proxy_set_header Upgrade $http_upgrade;"));

    let manifest = SiteManifest::parse(&site).unwrap();
    assert_eq!(manifest.web_server, WebServerKind::Nginx);
    assert!(manifest.tls);
    assert_eq!(manifest.auth_user.as_deref(), Some("admin"));
    assert!(!site.contains("redis://"));

    let link = std::fs::read_link(host.path(&nginx_enabled())).unwrap();
    assert_eq!(link, std::path::PathBuf::from(format!("../sites-available/flower-{}", DOMAIN)));

    // credentials
    let credentials = host.read(&nginx_credentials()).unwrap();
    assert_eq!(credentials, format!("admin:$fake${}\n", PASSWORD));
    assert_eq!(mode(&host, &nginx_credentials()), 0o640);
    assert!(report.generated_password.is_none());

    // service
    let unit = host.read(&unit_path()).unwrap();
    assert!(unit.contains("--broker=redis://127.0.0.1:6379/0 flower --address=127.0.0.1 --port=5555"));
    assert_eq!(mode(&host, &unit_path()), 0o640);
    assert!(host.runner.is_active(&unit_name()));
    assert!(host.runner.is_enabled(&unit_name()));

    // app
    assert!(host.exists("/srv/flower/.venv/bin/python"));
    assert_eq!(host.runner.count("bin/pip install"), 2);
}

#[tokio::test]
async fn test_http_site_is_live_before_certificate_request() {
    let host = TestHost::nginx();
    let report = install(&host.ctx, full_request(true)).await;
    assert_eq!(report.exit_code(), ExitCode::Success);

    let calls = host.runner.calls();
    let first_reload = calls
        .iter()
        .position(|c| c == "systemctl reload nginx")
        .unwrap();
    let certonly = calls
        .iter()
        .position(|c| c.starts_with("certbot certonly --nginx"))
        .unwrap();
    assert!(first_reload < certonly);
    assert!(calls[certonly].contains(&format!("-d {}", DOMAIN)));
    assert!(calls[certonly].contains(&format!("-m admin@{}", DOMAIN)));

    // every reload follows a passing syntax check
    let checks = calls.iter().filter(|c| *c == "nginx -t").count();
    let reloads = calls.iter().filter(|c| *c == "systemctl reload nginx").count();
    assert_eq!(reloads, 2);
    assert!(checks >= reloads);
}

#[tokio::test]
async fn test_generated_password_is_reported_once() {
    let host = TestHost::nginx();
    let req = InstallRequest::from_args(InstallArgs {
        create_user: Some("ops".to_string()),
        ..install_args()
    })
    .unwrap();

    let report = install(&host.ctx, req).await;
    assert_eq!(report.exit_code(), ExitCode::Success, "{}", report.render());

    let (user, password) = report.generated_password.as_ref().unwrap();
    assert_eq!(user, "ops");
    assert_eq!(password.expose_secret().len(), 24);
    let credentials = host.read(&nginx_credentials()).unwrap();
    assert_eq!(credentials, format!("ops:$fake${}\n", password.expose_secret()));

    // the password never reaches the logged command lines
    assert!(host
        .runner
        .calls()
        .iter()
        .all(|c| !c.contains(password.expose_secret())));
}

#[tokio::test]
async fn test_plain_install_without_auth() {
    let host = TestHost::nginx();
    let req = InstallRequest::from_args(install_args()).unwrap();

    let report = install(&host.ctx, req).await;
    assert_eq!(report.exit_code(), ExitCode::Success);
    assert_eq!(report.find_step("tls").unwrap().outcome, Outcome::Skipped);
    assert_eq!(report.find_step("auth").unwrap().outcome, Outcome::Skipped);

    let site = host.read(&nginx_site()).unwrap();
    assert!(!site.contains("auth_basic"));
    assert!(!site.contains("deny all"));
    assert!(!site.contains("443"));
    assert!(!host.exists(&nginx_credentials()));
    assert_eq!(host.runner.count("certbot certonly"), 0);
}

#[tokio::test]
async fn test_inactive_web_server_is_started() {
    let host = TestHost::nginx();
    host.runner.set_active("nginx", false);
    let report = install(&host.ctx, InstallRequest::from_args(install_args()).unwrap()).await;

    assert_eq!(report.exit_code(), ExitCode::Success);
    assert_eq!(host.runner.count("systemctl start nginx"), 1);
    assert_eq!(host.runner.count("systemctl reload nginx"), 0);
    assert!(host.runner.is_active("nginx"));
}
