//! Shared external-command plumbing for probes.
//!
//! All probes launch their backing utilities through these helpers so they
//! share one capture and timeout policy: stdout is collected as lossy
//! UTF-8, stderr is logged at warn, and a timed-out child is killed rather
//! than left to block the cycle.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::warn;

/// Run a command to completion and return its trimmed stdout.
pub async fn run_capture(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("failed to launch {}", program))?;
    if !output.stderr.is_empty() {
        warn!(target: "opensight::probes", "{} stderr: {}", program, String::from_utf8_lossy(&output.stderr).trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a command with a hard execution deadline. On timeout the child is
/// killed (kill_on_drop on the abandoned handle) and an error is returned.
pub async fn run_capture_timeout(program: &str, args: &[&str], limit: Duration) -> Result<String> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to launch {}", program))?;
    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(result) => {
            let output = result.with_context(|| format!("failed to collect output of {}", program))?;
            if !output.stderr.is_empty() {
                warn!(target: "opensight::probes", "{} stderr: {}", program, String::from_utf8_lossy(&output.stderr).trim());
            }
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        }
        Err(_) => bail!("{} timed out after {}s and was killed", program, limit.as_secs()),
    }
}

/// Run an inline PowerShell script and return its trimmed stdout.
pub async fn run_powershell(script: &str) -> Result<String> {
    run_capture(
        "powershell.exe",
        &["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command", script],
    )
    .await
}
