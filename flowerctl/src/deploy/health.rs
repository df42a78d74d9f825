//! HTTP health check of the running dashboard

use tracing::debug;

use crate::storage::settings::Settings;

/// Path Flower answers health checks on
pub const HEALTH_PATH: &str = "/healthcheck";

/// URL the health check targets, bypassing the proxy
pub fn health_url(settings: &Settings) -> String {
    let host = match settings.listen_address.as_str() {
        "0.0.0.0" => "127.0.0.1",
        "::" | "[::]" => "[::1]",
        other => other,
    };
    format!("http://{}:{}{}", host, settings.port, HEALTH_PATH)
}

async fn get_once(client: &reqwest::Client, url: &str) -> Result<(), String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("GET {} failed: {}", url, e))?;

    let status = response.status();
    debug!("GET {} -> {}", url, status);
    if status.is_success() {
        Ok(())
    } else {
        Err(format!("GET {} returned {}", url, status))
    }
}

/// Poll the dashboard until it answers with a success status, backing off
/// between attempts. Returns the last problem seen when it never does.
pub async fn check(settings: &Settings) -> Result<(), String> {
    let url = health_url(settings);
    let client = reqwest::Client::builder()
        .timeout(settings.health.timeout())
        .no_proxy()
        .build()
        .map_err(|e| format!("failed to build HTTP client: {}", e))?;

    let attempts = settings.health.attempts.max(1);
    let backoff = settings.health.backoff();
    let mut last_error = String::new();
    for attempt in 0..attempts {
        match get_once(&client, &url).await {
            Ok(()) => {
                debug!("{} healthy after {} attempt(s)", url, attempt + 1);
                return Ok(());
            }
            Err(e) => {
                debug!("Health check attempt {} failed: {}", attempt + 1, e);
                last_error = e;
            }
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(backoff.delay(attempt)).await;
        }
    }
    Err(format!("{} (after {} attempts)", last_error, attempts))
}
