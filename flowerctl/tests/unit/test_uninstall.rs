//! Uninstall removes what install created and tolerates missing pieces

use flowerctl::errors::ExitCode;
use flowerctl::installer::install::install;
use flowerctl::installer::report::Outcome;
use flowerctl::installer::uninstall::{uninstall, UninstallOptions};
use flowerctl::models::request::{InstallArgs, InstallRequest};

use crate::common::*;

fn for_domain(domain: &str) -> UninstallOptions {
    UninstallOptions {
        domain: Some(domain.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_uninstall_of_unknown_domain_is_a_no_op() {
    let host = TestHost::nginx();
    let report = uninstall(&host.ctx, for_domain("never.example.test")).await;

    assert_eq!(report.exit_code(), ExitCode::Success, "{}", report.render());
    assert!(report.steps.iter().all(|s| s.outcome == Outcome::Unchanged));
    assert_eq!(host.runner.count("systemctl reload"), 0);
}

#[tokio::test]
async fn test_uninstall_without_deployments_is_a_no_op() {
    let host = TestHost::nginx();
    let report = uninstall(&host.ctx, UninstallOptions::default()).await;
    assert_eq!(report.exit_code(), ExitCode::Success);
    assert_eq!(report.steps.len(), 1);
}

#[tokio::test]
async fn test_uninstall_removes_everything_and_is_idempotent() {
    let host = TestHost::nginx();
    let installed = install(&host.ctx, full_request(true)).await;
    assert_eq!(installed.exit_code(), ExitCode::Success);

    let report = uninstall(&host.ctx, for_domain(DOMAIN)).await;
    assert_eq!(report.exit_code(), ExitCode::Success, "{}", report.render());
    assert!(!host.exists(&nginx_site()));
    assert!(!host.exists(&nginx_enabled()));
    assert!(!host.exists(&nginx_credentials()));
    assert!(!host.exists(&unit_path()));
    assert!(!host.runner.is_active(&unit_name()));
    assert!(!host.runner.is_enabled(&unit_name()));
    // app and certificate stay unless asked
    assert!(host.exists("/srv/flower/.venv/bin/python"));
    assert!(host.exists(&format!("/etc/letsencrypt/live/{}/fullchain.pem", DOMAIN)));

    host.runner.clear_calls();
    let again = uninstall(&host.ctx, for_domain(DOMAIN)).await;
    assert_eq!(again.exit_code(), ExitCode::Success);
    assert!(again.steps.iter().all(|s| s.outcome == Outcome::Unchanged));
    assert_eq!(host.runner.count("systemctl reload"), 0);
}

#[tokio::test]
async fn test_uninstall_with_missing_pieces() {
    let host = TestHost::nginx();
    install(&host.ctx, full_request(false)).await;

    // someone already removed the unit and the enabled link by hand
    std::fs::remove_file(host.path(&unit_path())).unwrap();
    std::fs::remove_file(host.path(&nginx_enabled())).unwrap();
    host.runner.clear_calls();

    let report = uninstall(&host.ctx, for_domain(DOMAIN)).await;
    assert_eq!(report.exit_code(), ExitCode::Success, "{}", report.render());
    assert!(!host.exists(&nginx_site()));
    assert!(!host.exists(&nginx_credentials()));
    // the site was not loaded, so nothing to reload
    assert_eq!(host.runner.count("systemctl reload nginx"), 0);
}

#[tokio::test]
async fn test_keep_site_and_purge_cert() {
    let host = TestHost::nginx();
    install(&host.ctx, full_request(true)).await;

    let report = uninstall(
        &host.ctx,
        UninstallOptions {
            domain: Some(DOMAIN.to_string()),
            keep_site: true,
            purge_cert: true,
        },
    )
    .await;
    assert_eq!(report.exit_code(), ExitCode::Success, "{}", report.render());
    assert!(host.exists(&nginx_site()));
    assert!(!host.exists(&nginx_enabled()));
    assert!(host.exists(&nginx_credentials()));
    assert!(!host.exists(&format!("/etc/letsencrypt/live/{}", DOMAIN)));
    assert_eq!(
        host.runner
            .count(&format!("certbot delete --cert-name {}", DOMAIN)),
        1
    );
}

#[tokio::test]
async fn test_uninstall_all_discovers_every_site() {
    let host = TestHost::nginx();
    install(&host.ctx, full_request(false)).await;
    let other = InstallRequest::from_args(InstallArgs {
        domain: "jobs.example.test".to_string(),
        app_dir: "/srv/jobs".to_string(),
        ..Default::default()
    })
    .unwrap();
    install(&host.ctx, other).await;

    // a unit without a site is found as well
    host.write(
        "/etc/systemd/system/flower-orphan.example.test.service",
        "[Unit]\n",
    );

    let report = uninstall(&host.ctx, UninstallOptions::default()).await;
    assert_eq!(report.exit_code(), ExitCode::Success, "{}", report.render());
    assert!(!host.exists(&nginx_site()));
    assert!(!host.exists("/etc/nginx/sites-available/flower-jobs.example.test"));
    assert!(!host.exists("/etc/systemd/system/flower-orphan.example.test.service"));
    assert!(!host.exists("/etc/systemd/system/flower-jobs.example.test.service"));
}

#[tokio::test]
async fn test_teardown_failure_is_reported() {
    let host = TestHost::nginx();
    install(&host.ctx, full_request(false)).await;
    host.runner.fail_when("systemctl daemon-reload", "Access denied");

    let report = uninstall(&host.ctx, for_domain(DOMAIN)).await;
    assert_eq!(report.exit_code(), ExitCode::Failure);
    let service = report
        .find_step(&format!("{} service", DOMAIN))
        .unwrap();
    assert_eq!(service.outcome, Outcome::Failed);
    assert!(service.detail.contains("permission denied"));
    // the remaining steps still ran
    assert!(!host.exists(&nginx_site()));
    assert!(!host.exists(&nginx_credentials()));
}

#[tokio::test]
async fn test_invalid_domain_is_rejected() {
    let host = TestHost::nginx();
    let report = uninstall(&host.ctx, for_domain("../../etc")).await;
    assert_eq!(report.exit_code(), ExitCode::Validation);
    assert!(host.runner.calls().is_empty());
}
