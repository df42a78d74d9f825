//! systemd unit for the Flower service

use std::fmt::Write as _;
use std::path::Path;

/// Inputs of the unit file, already validated
#[derive(Debug, Clone, Copy)]
pub struct UnitParams<'a> {
    pub domain: &'a str,
    pub app_dir: &'a Path,
    pub broker_url: &'a str,
    pub result_backend_url: Option<&'a str>,
    pub address: &'a str,
    pub port: u16,
}

/// Escape systemd specifiers and variable expansion
pub fn systemd_escape(value: &str) -> String {
    value.replace('%', "%%").replace('$', "$$")
}

/// Path of the celery binary inside the app's virtualenv
pub fn celery_bin(app_dir: &Path) -> String {
    app_dir.join(".venv/bin/celery").display().to_string()
}

pub fn render_unit(params: &UnitParams<'_>) -> String {
    let app_dir = systemd_escape(&params.app_dir.display().to_string());

    let mut exec = format!(
        "{} --broker={}",
        systemd_escape(&celery_bin(params.app_dir)),
        systemd_escape(params.broker_url)
    );
    if let Some(backend) = params.result_backend_url {
        let _ = write!(exec, " --result-backend={}", systemd_escape(backend));
    }
    let _ = write!(
        exec,
        " flower --address={} --port={}",
        params.address, params.port
    );

    let mut out = String::new();
    out.push_str("# Managed by flowerctl. Local changes are overwritten on the next install.\n");
    out.push_str("[Unit]\n");
    let _ = writeln!(out, "Description=Celery Flower dashboard for {}", params.domain);
    out.push_str("After=network-online.target\n");
    out.push_str("Wants=network-online.target\n");
    out.push('\n');
    out.push_str("[Service]\n");
    out.push_str("Type=simple\n");
    let _ = writeln!(out, "WorkingDirectory={}", app_dir);
    let _ = writeln!(out, "ExecStart={}", exec);
    out.push_str("Restart=on-failure\n");
    out.push_str("RestartSec=5\n");
    out.push('\n');
    out.push_str("[Install]\n");
    out.push_str("WantedBy=multi-user.target\n");
    out
}
