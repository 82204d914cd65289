//! Async subprocess runner for the external CLI encoders.
//!
//! Every tool is invoked the same way: payload on stdin, encoded output on
//! stdout, diagnostics on stderr. Nothing ever touches the filesystem.
//! Stdin is written concurrently with the output drain, otherwise a tool
//! that fills its stdout pipe while we are still writing would deadlock.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Result, SlimgError};

#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Run `tool` with `args`, feeding `input` on stdin.
///
/// Exit codes other than zero fail with [`SlimgError::OptimizationFailed`]
/// unless listed in `allowed_exit_codes` (e.g. pngquant's 99 for "quality
/// floor not met"). On timeout the child is killed and the call fails with
/// [`SlimgError::ToolTimeout`].
pub async fn run_tool(
    tool: &str,
    args: &[&str],
    input: &[u8],
    timeout: Duration,
    allowed_exit_codes: &[i32],
) -> Result<ToolOutput> {
    let started = Instant::now();
    let mut child = Command::new(tool)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SlimgError::OptimizationFailed {
            tool: tool.to_string(),
            stderr: format!("failed to spawn: {e}"),
        })?;

    let mut stdin = child.stdin.take().ok_or_else(|| SlimgError::OptimizationFailed {
        tool: tool.to_string(),
        stderr: "failed to open stdin pipe".to_string(),
    })?;

    let payload = input.to_vec();
    let writer = tokio::spawn(async move {
        // A tool may exit without reading all of stdin (broken pipe); that
        // is its call to make, not an error here.
        let _ = stdin.write_all(&payload).await;
        let _ = stdin.shutdown().await;
    });

    // wait_with_output drains stdout and stderr concurrently. Dropping the
    // future on timeout drops the child, and kill_on_drop reaps it.
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            writer.abort();
            warn!(
                tool,
                timeout_secs = timeout.as_secs(),
                "external tool timed out, killing"
            );
            return Err(SlimgError::ToolTimeout {
                tool: tool.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };
    let _ = writer.await;

    let exit_code = output.status.code().unwrap_or(-1);
    let duration = started.elapsed();

    if exit_code == 0 || allowed_exit_codes.contains(&exit_code) {
        info!(
            tool,
            exit_code,
            duration_secs = duration.as_secs_f64(),
            stdout_bytes = output.stdout.len(),
            "external tool completed"
        );
        debug!(
            tool,
            stderr = %String::from_utf8_lossy(&output.stderr),
            "external tool diagnostics"
        );
        Ok(ToolOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code,
        })
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(
            tool,
            exit_code,
            duration_secs = duration.as_secs_f64(),
            stderr = %stderr,
            "external tool failed"
        );
        Err(SlimgError::OptimizationFailed {
            tool: tool.to_string(),
            stderr: stderr.chars().take(500).collect(),
        })
    }
}
