//! Post-install health check against a dashboard that binds late

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use flowerctl::errors::ExitCode;
use flowerctl::installer::install::install;
use flowerctl::installer::report::Outcome;

use crate::common::*;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Flower stand-in: starts listening on `port` after `delay`
fn start_dashboard(port: u16, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nOK")
                .await;
        }
    });
}

fn with_health_check(host: &mut TestHost, port: u16, attempts: u32) {
    let settings = &mut host.ctx.settings;
    settings.health_check = true;
    settings.port = port;
    settings.health.attempts = attempts;
    settings.health.base_delay_ms = 50;
    settings.health.max_delay_ms = 200;
}

#[tokio::test]
async fn test_install_waits_for_dashboard() {
    let mut host = TestHost::nginx();
    let port = free_port();
    with_health_check(&mut host, port, 12);
    start_dashboard(port, Duration::from_millis(300));

    let report = install(&host.ctx, full_request(false)).await;
    assert_eq!(report.exit_code(), ExitCode::Success, "{}", report.render());
    assert_eq!(report.find_step("health").unwrap().outcome, Outcome::Unchanged);
}

#[tokio::test]
async fn test_unreachable_dashboard_degrades_without_rollback() {
    let mut host = TestHost::nginx();
    with_health_check(&mut host, free_port(), 2);

    let report = install(&host.ctx, full_request(false)).await;
    assert_eq!(report.exit_code(), ExitCode::Degraded, "{}", report.render());
    let health = report.find_step("health").unwrap();
    assert_eq!(health.outcome, Outcome::Warning);
    assert!(health.detail.contains("after 2 attempts"), "{}", health.detail);
    assert!(host.exists(&nginx_site()));
    assert!(host.exists(&unit_path()));
}
