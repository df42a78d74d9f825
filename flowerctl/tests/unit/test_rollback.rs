//! A fatal failure at any step leaves the host as it was before the run

use flowerctl::errors::ExitCode;
use flowerctl::installer::install::install;
use flowerctl::installer::report::Outcome;
use flowerctl::models::request::{InstallArgs, InstallRequest};

use crate::common::*;

fn rollback_names(report: &flowerctl::installer::report::Report) -> Vec<&str> {
    report.rollback.iter().map(|s| s.name.as_str()).collect()
}

fn assert_clean(host: &TestHost) {
    assert!(!host.exists(&nginx_site()));
    assert!(!host.exists(&nginx_enabled()));
    assert!(!host.exists(&nginx_credentials()));
    assert!(!host.exists(&unit_path()));
    assert!(!host.exists(APP_DIR));
    assert!(!host.runner.is_active(&unit_name()));
    assert!(!host.runner.is_enabled(&unit_name()));
}

#[tokio::test]
async fn test_app_failure_cleans_up() {
    let host = TestHost::nginx();
    host.runner.fail_when("bin/pip install", "No matching distribution found");

    let report = install(&host.ctx, full_request(false)).await;
    assert_eq!(report.exit_code(), ExitCode::RolledBack);
    assert_eq!(report.find_step("app").unwrap().outcome, Outcome::Failed);
    assert_clean(&host);
    assert_eq!(host.runner.count("systemctl reload"), 0);
}

#[tokio::test]
async fn test_syntax_failure_never_reloads() {
    let host = TestHost::nginx();
    host.runner
        .fail_when("nginx -t", "nginx: [emerg] unknown directive");

    let report = install(&host.ctx, full_request(false)).await;
    assert_eq!(report.exit_code(), ExitCode::RolledBack, "{}", report.render());
    assert!(report
        .find_step("proxy")
        .unwrap()
        .detail
        .contains("unknown directive"));
    assert_eq!(rollback_names(&report), vec!["app"]);
    assert_clean(&host);
    assert_eq!(host.runner.count("systemctl reload"), 0);
}

#[tokio::test]
async fn test_auth_failure_removes_site() {
    let host = TestHost::nginx();
    host.runner.fail_when("htpasswd -c", "htpasswd: cannot create file");

    let report = install(&host.ctx, full_request(false)).await;
    assert_eq!(report.exit_code(), ExitCode::RolledBack);
    assert_eq!(rollback_names(&report), vec!["proxy", "app"]);
    assert_clean(&host);
    // the temp file of the failed write is gone too
    let leftovers: Vec<_> = std::fs::read_dir(host.path("/etc/nginx"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
    // one reload to apply the site, one to drop it again
    assert_eq!(host.runner.count("systemctl reload nginx"), 2);
}

#[tokio::test]
async fn test_service_failure_unwinds_every_step_in_reverse() {
    let host = TestHost::nginx();
    host.runner
        .fail_when(&format!("systemctl restart {}", unit_name()), "Job failed");

    let report = install(&host.ctx, full_request(false)).await;
    assert_eq!(report.exit_code(), ExitCode::RolledBack, "{}", report.render());
    assert_eq!(rollback_names(&report), vec!["service", "auth", "proxy", "app"]);
    assert!(report.rollback.iter().all(|s| s.outcome == Outcome::Changed));
    assert_clean(&host);
}

#[tokio::test]
async fn test_service_timeout_rolls_back() {
    let host = TestHost::nginx();
    host.runner
        .fail_when(&format!("systemctl is-active --quiet {}", unit_name()), "");

    let report = install(&host.ctx, full_request(false)).await;
    assert_eq!(report.exit_code(), ExitCode::RolledBack);
    assert!(report
        .find_step("service")
        .unwrap()
        .detail
        .contains("journalctl"));
    assert_clean(&host);
}

#[tokio::test]
async fn test_previous_deployment_is_restored() {
    let host = TestHost::nginx();
    let first = install(&host.ctx, full_request(false)).await;
    assert_eq!(first.exit_code(), ExitCode::Success);

    let site = host.read(&nginx_site()).unwrap();
    let credentials = host.read(&nginx_credentials()).unwrap();
    let unit = host.read(&unit_path()).unwrap();

    // new user, allow-list and broker; the restart of the new unit fails
    host.runner
        .fail_once(&format!("systemctl restart {}", unit_name()), "Job failed");
    let req = InstallRequest::from_args(InstallArgs {
        create_user: Some("ops".to_string()),
        ip_allow: Some("172.16.0.1".to_string()),
        redis_url: Some("redis://10.0.0.9:6379/2".to_string()),
        ..install_args()
    })
    .unwrap();
    let report = install(&host.ctx, req).await;

    assert_eq!(report.exit_code(), ExitCode::RolledBack, "{}", report.render());
    assert_eq!(host.read(&nginx_site()).unwrap(), site);
    assert_eq!(host.read(&nginx_credentials()).unwrap(), credentials);
    assert_eq!(host.read(&unit_path()).unwrap(), unit);
    assert!(host.exists(&nginx_enabled()));
    assert!(host.runner.is_active(&unit_name()));
    assert!(host.runner.is_enabled(&unit_name()));
    assert!(host.exists("/srv/flower/.venv/bin/python"));
    assert!(report.generated_password.is_none());
}

#[tokio::test]
async fn test_existing_app_dir_is_kept() {
    let host = TestHost::nginx();
    host.write("/srv/flower/tasks.py", "app = None\n");
    host.runner.fail_when("nginx -t", "syntax error");

    let report = install(&host.ctx, full_request(false)).await;
    assert_eq!(report.exit_code(), ExitCode::RolledBack);
    assert_eq!(host.read("/srv/flower/tasks.py").as_deref(), Some("app = None\n"));
    assert!(!host.exists("/srv/flower/.venv"));
}

#[tokio::test]
async fn test_incomplete_rollback_keeps_going() {
    let host = TestHost::nginx();
    host.runner
        .fail_when(&format!("systemctl restart {}", unit_name()), "Job failed");
    // the syntax check passes while applying and fails during rollback
    host.runner.fail_after("nginx -t", "disk full", 1);

    let report = install(&host.ctx, full_request(false)).await;
    assert_eq!(report.exit_code(), ExitCode::Failure, "{}", report.render());
    assert_eq!(rollback_names(&report), vec!["service", "auth", "proxy", "app"]);
    let proxy = report.rollback.iter().find(|s| s.name == "proxy").unwrap();
    assert_eq!(proxy.outcome, Outcome::Failed);
    // later steps still ran
    assert!(!host.exists(APP_DIR));
    assert!(!host.exists(&unit_path()));
}

#[tokio::test]
async fn test_unrestorable_site_is_reported_incomplete() {
    let host = TestHost::nginx();
    let first = install(&host.ctx, full_request(false)).await;
    assert_eq!(first.exit_code(), ExitCode::Success);
    let previous = host.read(&nginx_site()).unwrap();

    // the restore writes through the same sibling temp file
    let temp = format!("{}.flowerctl-{}.tmp", nginx_site(), std::process::id());
    host.runner.block_path_on("nginx -t", &temp);
    host.runner.fail_when("nginx -t", "nginx: [emerg] unexpected \"}\"");

    let mut req = full_request(false);
    req.ip_allow = flowerctl::auth::allow_list::set_ip_allow_list(&["172.16.0.0/12"]).unwrap();
    let report = install(&host.ctx, req).await;

    assert_eq!(report.exit_code(), ExitCode::Failure, "{}", report.render());
    let proxy = report.find_step("proxy").unwrap();
    assert_eq!(proxy.outcome, Outcome::Failed);
    assert!(proxy.detail.contains("previous site not restored"), "{}", proxy.detail);
    assert!(report.error.as_deref().unwrap().contains("rollback incomplete"));
    assert_ne!(host.read(&nginx_site()).unwrap(), previous);
    assert_eq!(host.runner.count("systemctl reload"), 1);
}
