//! Build tool invocation
//!
//! Runs the configured build tool against a working copy and captures its
//! combined output. Every outcome, including a tool that cannot be launched
//! or runs past its deadline, comes back as a [`BuildResult`]; callers tell
//! the cases apart by the log, never by an error.

use respawn_core::{BuildConfig, BuildResult};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

/// How long output is still collected after the build tool exits
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// Invoker for the external build tool
#[derive(Debug, Clone)]
pub struct BuildInvoker {
    tool: String,
    args: Vec<String>,
    timeout: Duration,
}

impl BuildInvoker {
    /// `args` are passed before the goals on every invocation
    pub fn new(tool: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            tool: tool.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self::new(&config.tool, config.args.clone(), config.timeout())
    }

    /// Build the project under `path`, requesting `goals` in order
    #[instrument(skip(self, goals), fields(tool = %self.tool, path = %path.display()))]
    pub async fn build(&self, path: &Path, goals: &[String]) -> BuildResult {
        let started = Instant::now();
        let command_line = self.command_line(goals);
        info!("Running {}", command_line);

        let mut child = match Command::new(&self.tool)
            .args(&self.args)
            .args(goals)
            .current_dir(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to launch build tool: {}", e);
                return BuildResult::new(
                    false,
                    format!(
                        "failed to launch `{}` in {}: {}\n",
                        command_line,
                        path.display(),
                        e
                    ),
                    started.elapsed(),
                );
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let deadline = started + self.timeout;
        let mut log = String::new();
        let mut streaming = true;

        // The deadline bounds the tool itself; pipes held open by a helper it
        // left running must not turn a finished build into a timeout
        let status = loop {
            tokio::select! {
                line = rx.recv(), if streaming => match line {
                    Some(line) => push_line(&mut log, &line),
                    None => streaming = false,
                },
                status = child.wait() => break Some(status),
                _ = sleep_until(deadline) => break None,
            }
        };

        if status.is_some() {
            let grace = Instant::now() + OUTPUT_GRACE;
            while let Ok(Some(line)) = timeout_at(grace, rx.recv()).await {
                push_line(&mut log, &line);
            }
        } else {
            while let Ok(line) = rx.try_recv() {
                push_line(&mut log, &line);
            }
        }

        let success = match status {
            Some(Ok(status)) => {
                if !status.success() {
                    log.push_str(&format!("`{}` exited with {}\n", command_line, status));
                }
                status.success()
            }
            Some(Err(e)) => {
                log.push_str(&format!("failed waiting for `{}`: {}\n", command_line, e));
                false
            }
            None => {
                if let Err(e) = child.kill().await {
                    debug!("Failed to kill timed out build: {}", e);
                }
                log.push_str(&format!(
                    "`{}` timed out after {}s and was killed\n",
                    command_line,
                    self.timeout.as_secs()
                ));
                false
            }
        };

        let duration = started.elapsed();
        info!(
            "Build {} in {:.1}s",
            if success { "succeeded" } else { "failed" },
            duration.as_secs_f64()
        );
        BuildResult::new(success, log, duration)
    }

    fn command_line(&self, goals: &[String]) -> String {
        std::iter::once(self.tool.as_str())
            .chain(self.args.iter().map(String::as_str))
            .chain(goals.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn push_line(log: &mut String, line: &str) {
    log.push_str(line);
    log.push('\n');
}

/// Forward lines from a pipe until it closes
///
/// Reads raw bytes so non-UTF-8 output never stalls the pipe.
async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::UnboundedSender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Build output stream closed: {}", e);
                break;
            }
        }
    }
}
