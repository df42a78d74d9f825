//! `ssl` on an installed site and the read-only `diagnose`

use flowerctl::errors::ExitCode;
use flowerctl::installer::diagnose::diagnose;
use flowerctl::installer::install::install;
use flowerctl::installer::report::Outcome;
use flowerctl::installer::ssl::ssl;
use flowerctl::models::manifest::SiteManifest;
use flowerctl::models::request::{InstallArgs, InstallRequest};

use crate::common::*;

async fn installed_http(host: &TestHost) {
    let report = install(&host.ctx, full_request(false)).await;
    assert_eq!(report.exit_code(), ExitCode::Success, "{}", report.render());
}

#[tokio::test]
async fn test_ssl_upgrades_single_site() {
    let host = TestHost::nginx();
    installed_http(&host).await;
    let http_site = host.read(&nginx_site()).unwrap();
    host.runner.clear_calls();

    let report = ssl(&host.ctx, None).await;
    assert_eq!(report.exit_code(), ExitCode::Success, "{}", report.render());
    assert_eq!(report.find_step("certificate").unwrap().outcome, Outcome::Changed);
    assert_eq!(report.find_step("proxy").unwrap().outcome, Outcome::Changed);

    let site = host.read(&nginx_site()).unwrap();
    assert!(site.contains("listen 443 ssl;"));
    let before = SiteManifest::parse(&http_site).unwrap();
    let after = SiteManifest::parse(&site).unwrap();
    assert!(after.tls);
    assert_eq!(after.auth_user, before.auth_user);
    assert_eq!(after.ip_allow, before.ip_allow);
    // the unit is not touched
    assert_eq!(host.runner.count("systemctl restart"), 0);

    // again: nothing to do
    host.runner.clear_calls();
    let again = ssl(&host.ctx, Some(DOMAIN)).await;
    assert_eq!(again.exit_code(), ExitCode::Success);
    assert_eq!(again.find_step("certificate").unwrap().outcome, Outcome::Unchanged);
    assert_eq!(again.find_step("proxy").unwrap().outcome, Outcome::Unchanged);
    assert_eq!(host.runner.count("certbot certonly"), 0);
    assert_eq!(host.runner.count("systemctl reload"), 0);
}

#[tokio::test]
async fn test_ssl_failure_keeps_http_site() {
    let host = TestHost::nginx();
    installed_http(&host).await;
    let inode = host.inode(&nginx_site());
    host.runner.fail_when("certbot certonly", "DNS problem: NXDOMAIN");

    let report = ssl(&host.ctx, Some(DOMAIN)).await;
    assert_eq!(report.exit_code(), ExitCode::Degraded);
    assert_eq!(report.find_step("tls").unwrap().outcome, Outcome::Warning);
    assert_eq!(host.inode(&nginx_site()), inode);
}

#[tokio::test]
async fn test_ssl_site_selection_errors() {
    let host = TestHost::nginx();

    let none = ssl(&host.ctx, None).await;
    assert_eq!(none.exit_code(), ExitCode::Validation);

    installed_http(&host).await;
    let unknown = ssl(&host.ctx, Some("other.example.test")).await;
    assert_eq!(unknown.exit_code(), ExitCode::Validation);
    assert!(unknown.error.as_deref().unwrap().contains("other.example.test"));

    let second = InstallRequest::from_args(InstallArgs {
        domain: "jobs.example.test".to_string(),
        app_dir: "/srv/jobs".to_string(),
        ..Default::default()
    })
    .unwrap();
    install(&host.ctx, second).await;
    let ambiguous = ssl(&host.ctx, None).await;
    assert_eq!(ambiguous.exit_code(), ExitCode::Validation);
    assert!(ambiguous.error.as_deref().unwrap().contains("--domain"));
}

#[tokio::test]
async fn test_diagnose_healthy_deployment() {
    let host = TestHost::nginx();
    installed_http(&host).await;

    let report = diagnose(&host.ctx, None).await;
    assert_eq!(report.exit_code(), ExitCode::Success, "{}", report.render());
    assert_eq!(report.warnings().count(), 0);
    assert_eq!(
        report
            .find_step(&format!("{} site", DOMAIN))
            .unwrap()
            .detail,
        "matches manifest"
    );
}

#[tokio::test]
async fn test_diagnose_is_read_only() {
    let host = TestHost::nginx();
    installed_http(&host).await;
    let site_inode = host.inode(&nginx_site());
    host.runner.clear_calls();

    diagnose(&host.ctx, Some(DOMAIN)).await;

    let read_only = ["systemctl is-active", "systemctl is-enabled", "nginx -t", "certbot plugins"];
    for call in host.runner.calls() {
        assert!(
            read_only.iter().any(|prefix| call.starts_with(prefix)),
            "diagnose ran {}",
            call
        );
    }
    assert_eq!(host.inode(&nginx_site()), site_inode);
}

#[tokio::test]
async fn test_diagnose_reports_mismatches() {
    let host = TestHost::nginx();
    installed_http(&host).await;

    let site = host.read(&nginx_site()).unwrap();
    host.write(&nginx_site(), &site.replace("proxy_redirect off;", "proxy_redirect default;"));
    host.write(&nginx_credentials(), "someone:$fake$x\n");
    host.runner.set_active(&unit_name(), false);

    let report = diagnose(&host.ctx, Some(DOMAIN)).await;
    assert_eq!(report.exit_code(), ExitCode::Degraded, "{}", report.render());
    for step in ["site", "credentials", "service"] {
        assert_eq!(
            report
                .find_step(&format!("{} {}", DOMAIN, step))
                .unwrap()
                .outcome,
            Outcome::Warning,
            "{} should be flagged",
            step
        );
    }
    assert_eq!(
        report
            .find_step(&format!("{} enabled", DOMAIN))
            .unwrap()
            .outcome,
        Outcome::Unchanged
    );
}

#[tokio::test]
async fn test_diagnose_missing_certificate() {
    let host = TestHost::nginx();
    let report = install(&host.ctx, full_request(true)).await;
    assert_eq!(report.exit_code(), ExitCode::Success);
    std::fs::remove_dir_all(host.path(&format!("/etc/letsencrypt/live/{}", DOMAIN))).unwrap();

    let report = diagnose(&host.ctx, None).await;
    assert_eq!(report.exit_code(), ExitCode::Degraded);
    assert_eq!(
        report
            .find_step(&format!("{} certificate", DOMAIN))
            .unwrap()
            .outcome,
        Outcome::Warning
    );
    // the site itself still matches its manifest
    assert_eq!(
        report
            .find_step(&format!("{} site", DOMAIN))
            .unwrap()
            .outcome,
        Outcome::Unchanged
    );
}

#[tokio::test]
async fn test_diagnose_without_deployments() {
    let host = TestHost::nginx();
    let report = diagnose(&host.ctx, None).await;
    assert_eq!(report.exit_code(), ExitCode::Success);
    assert!(report.notes.iter().any(|n| n.contains("No flowerctl deployments")));

    let report = diagnose(&host.ctx, Some(DOMAIN)).await;
    assert_eq!(report.exit_code(), ExitCode::Validation);
}
