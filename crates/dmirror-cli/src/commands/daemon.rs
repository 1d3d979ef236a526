//! Daemon management commands
//!
//! Provides the `dmirror daemon` CLI subcommands for controlling the
//! dmirror background synchronization service via systemd user units.
//!
//! # Subcommands
//!
//! - `start`   - Start the daemon service
//! - `stop`    - Stop the daemon service
//! - `status`  - Show daemon status
//! - `restart` - Restart the daemon service

use std::process::Command;

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use crate::output::{get_formatter, OutputFormat};

/// Service unit name for the dmirror daemon
const SYSTEMD_UNIT: &str = "dmirror";

/// Manage the dmirror background daemon
#[derive(Debug, Subcommand)]
pub enum DaemonCommand {
    /// Start the dmirror daemon
    Start,
    /// Stop the dmirror daemon
    Stop,
    /// Show daemon status
    Status,
    /// Restart the dmirror daemon
    Restart,
}

impl DaemonCommand {
    /// Execute the selected daemon subcommand
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        match self {
            DaemonCommand::Start => daemon_start(format),
            DaemonCommand::Stop => daemon_stop(format),
            DaemonCommand::Status => daemon_status(format),
            DaemonCommand::Restart => daemon_restart(format),
        }
    }
}

/// Starts the dmirror daemon via systemctl
fn daemon_start(format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(matches!(format, OutputFormat::Json));

    info!("starting dmirror daemon via systemctl");

    let output = Command::new("systemctl")
        .args(["--user", "start", SYSTEMD_UNIT])
        .output()
        .context("Failed to execute systemctl. Is systemd available?")?;

    if output.status.success() {
        formatter.success("dmirror daemon started");
        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "action": "start",
                "success": true,
            }));
        }
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let msg = format!("Failed to start daemon: {}", stderr.trim());
        formatter.error(&msg);

        if stderr.contains("not found") || stderr.contains("No such file") {
            formatter.info("Hint: The systemd unit file may not be installed.");
            formatter
                .info("Copy config/dmirror.service to ~/.config/systemd/user/dmirror.service");
            formatter.info("Then run: systemctl --user daemon-reload");
        }

        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "action": "start",
                "success": false,
                "error": stderr.trim(),
            }));
        }
    }

    Ok(())
}

/// Stops the dmirror daemon via systemctl
fn daemon_stop(format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(matches!(format, OutputFormat::Json));

    info!("stopping dmirror daemon via systemctl");

    let output = Command::new("systemctl")
        .args(["--user", "stop", SYSTEMD_UNIT])
        .output()
        .context("Failed to execute systemctl. Is systemd available?")?;

    if output.status.success() {
        formatter.success("dmirror daemon stopped");
        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "action": "stop",
                "success": true,
            }));
        }
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        formatter.error(&format!("Failed to stop daemon: {}", stderr.trim()));

        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "action": "stop",
                "success": false,
                "error": stderr.trim(),
            }));
        }
    }

    Ok(())
}

/// Shows the dmirror daemon status
fn daemon_status(format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(matches!(format, OutputFormat::Json));

    info!("querying dmirror daemon status via systemctl");

    let output = Command::new("systemctl")
        .args(["--user", "status", SYSTEMD_UNIT])
        .output()
        .context("Failed to execute systemctl. Is systemd available?")?;

    let stdout = String::from_utf8_lossy(&output.stdout);

    let is_active = stdout.contains("active (running)");
    let is_inactive = stdout.contains("inactive (dead)");
    let is_failed = stdout.contains("failed");

    let status_str = if is_active {
        "running"
    } else if is_failed {
        "failed"
    } else if is_inactive {
        "stopped"
    } else {
        "unknown"
    };

    if matches!(format, OutputFormat::Json) {
        formatter.print_json(&serde_json::json!({
            "action": "status",
            "status": status_str,
            "active": is_active,
            "details": stdout.trim(),
        }));
        return Ok(());
    }

    if is_active {
        formatter.success("dmirror daemon is running");
    } else if is_failed {
        formatter.error("dmirror daemon has failed");
    } else if is_inactive {
        formatter.info("dmirror daemon is stopped");
    } else {
        formatter.info("dmirror daemon status is unknown");
    }

    if !stdout.is_empty() {
        formatter.info("");
        for line in stdout.lines() {
            formatter.info(line);
        }
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() && !output.status.success() {
        // systemctl status exits with non-zero for inactive services, so
        // only show stderr if it contains meaningful error text
        if stderr.contains("not found") || stderr.contains("No such file") {
            formatter.info("");
            formatter.info("Hint: The systemd unit file may not be installed.");
            formatter
                .info("Copy config/dmirror.service to ~/.config/systemd/user/dmirror.service");
            formatter.info("Then run: systemctl --user daemon-reload");
        }
    }

    Ok(())
}

/// Restarts the dmirror daemon via systemctl
fn daemon_restart(format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(matches!(format, OutputFormat::Json));

    info!("restarting dmirror daemon via systemctl");

    let output = Command::new("systemctl")
        .args(["--user", "restart", SYSTEMD_UNIT])
        .output()
        .context("Failed to execute systemctl. Is systemd available?")?;

    if output.status.success() {
        formatter.success("dmirror daemon restarted");
        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "action": "restart",
                "success": true,
            }));
        }
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        formatter.error(&format!("Failed to restart daemon: {}", stderr.trim()));

        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "action": "restart",
                "success": false,
                "error": stderr.trim(),
            }));
        }
    }

    Ok(())
}
