//! TLS is best effort: failures degrade to plain HTTP

use flowerctl::errors::ExitCode;
use flowerctl::installer::install::install;
use flowerctl::installer::report::Outcome;
use flowerctl::models::manifest::SiteManifest;

use crate::common::*;

fn assert_http_site(host: &TestHost) {
    let site = host.read(&nginx_site()).unwrap();
    assert!(site.contains("listen 80;"));
    assert!(!site.contains("listen 443"));
    assert!(!SiteManifest::parse(&site).unwrap().tls);
    assert!(host.exists(&nginx_enabled()));
}

#[tokio::test]
async fn test_challenge_failure_degrades() {
    let host = TestHost::nginx();
    host.runner.fail_when(
        "certbot certonly",
        "Challenge failed for domain flower.example.test",
    );

    let report = install(&host.ctx, full_request(true)).await;
    assert_eq!(report.exit_code(), ExitCode::Degraded, "{}", report.render());
    let tls = report.find_step("tls").unwrap();
    assert_eq!(tls.outcome, Outcome::Warning);
    assert!(tls.detail.contains("challenge failed"));
    assert!(report.rollback.is_empty());

    assert_http_site(&host);
    assert!(host.runner.is_active(&unit_name()));
    assert!(host.exists(&nginx_credentials()));
    assert!(report
        .notes
        .iter()
        .any(|n| n.contains(&format!("http://{}", DOMAIN))));
}

#[tokio::test]
async fn test_rate_limit_is_reported() {
    let host = TestHost::nginx();
    host.runner.fail_when(
        "certbot certonly",
        "Error creating new order :: too many certificates already issued for exact set of domains",
    );

    let report = install(&host.ctx, full_request(true)).await;
    assert_eq!(report.exit_code(), ExitCode::Degraded);
    assert!(report.find_step("tls").unwrap().detail.contains("rate limited"));
    assert_http_site(&host);
}

#[tokio::test]
async fn test_missing_plugin_gives_install_hint() {
    let host = TestHost::nginx();
    host.runner.set_certbot_plugins(vec!["apache"]);

    let report = install(&host.ctx, full_request(true)).await;
    assert_eq!(report.exit_code(), ExitCode::Degraded);
    let tls = report.find_step("tls").unwrap();
    assert!(tls.detail.contains("apt-get install -y python3-certbot-nginx"));
    assert_eq!(host.runner.count("certbot certonly"), 0);
    assert_http_site(&host);
}

#[tokio::test]
async fn test_rejected_tls_site_restores_http_site() {
    let host = TestHost::nginx();
    // the HTTP site passes, the HTTPS rendering does not
    host.runner.fail_after("nginx -t", "cannot load certificate", 1);

    let report = install(&host.ctx, full_request(true)).await;
    assert_eq!(report.exit_code(), ExitCode::Degraded, "{}", report.render());
    assert!(report
        .find_step("tls")
        .unwrap()
        .detail
        .contains("TLS site rejected"));
    assert_http_site(&host);
    assert_eq!(host.runner.count("systemctl reload nginx"), 1);
}

#[tokio::test]
async fn test_existing_certificate_is_reused() {
    let host = TestHost::nginx();
    host.write(&format!("/etc/letsencrypt/live/{}/fullchain.pem", DOMAIN), "CERT");
    host.write(&format!("/etc/letsencrypt/live/{}/privkey.pem", DOMAIN), "KEY");

    let report = install(&host.ctx, full_request(true)).await;
    assert_eq!(report.exit_code(), ExitCode::Success);
    assert_eq!(report.find_step("tls").unwrap().outcome, Outcome::Unchanged);
    assert_eq!(host.runner.count("certbot certonly"), 0);
    // HTTPS from the first write, no intermediate HTTP site
    assert_eq!(host.runner.count("systemctl reload nginx"), 1);
    assert!(host.read(&nginx_site()).unwrap().contains("listen 443 ssl;"));
}

#[tokio::test]
async fn test_missing_certbot_is_an_environment_error() {
    let host = TestHost::new(&["apt-get", "nginx", "systemctl", "python3", "htpasswd"]);

    let report = install(&host.ctx, full_request(true)).await;
    assert_eq!(report.exit_code(), ExitCode::Environment);
    assert!(report
        .error
        .as_deref()
        .unwrap()
        .contains("apt-get install -y certbot"));
    assert!(!host.exists(APP_DIR));
    assert!(host.runner.calls().iter().all(|c| !c.contains("bin/pip")));
}
