//! Git command execution abstraction

use async_trait::async_trait;
use respawn_core::{Result, UpdateError};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::transport::Transport;

/// Output from a git command
#[derive(Debug, Clone, Default)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl GitOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
        }
    }

    /// Failed output with the given stderr
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
        }
    }
}

impl From<Output> for GitOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
        }
    }
}

/// Trait for executing git commands (allows mocking in tests)
#[async_trait]
pub trait GitExecutor: Send + Sync {
    /// Execute `git <args>` in `dir`
    ///
    /// `transport` is applied to commands that contact the remote; local
    /// commands pass `None`. A non-zero exit is reported through
    /// [`GitOutput::success`], not as an error.
    async fn exec(&self, dir: &Path, args: &[&str], transport: Option<&Transport>)
        -> Result<GitOutput>;
}

/// Real git command executor
#[derive(Debug, Clone)]
pub struct GitCommand {
    timeout: Duration,
}

impl GitCommand {
    /// Create an executor that kills any git command running longer than `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Check whether a git binary is available on PATH
    pub async fn is_available() -> bool {
        Command::new("git")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl GitExecutor for GitCommand {
    #[instrument(skip(self, transport), fields(dir = %dir.display()))]
    async fn exec(
        &self,
        dir: &Path,
        args: &[&str],
        transport: Option<&Transport>,
    ) -> Result<GitOutput> {
        debug!("Executing git {:?}", args);

        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(transport) = transport {
            command.envs(transport.env().iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }

        let operation = format!("git {}", args.first().copied().unwrap_or_default());
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| UpdateError::Timeout {
                operation: operation.clone(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| UpdateError::Git(format!("Failed to execute {}: {}", operation, e)))?;

        let git_output = GitOutput::from(output);

        if !git_output.success {
            debug!("Git command failed: {}", git_output.stderr.trim());
        }

        Ok(git_output)
    }
}

/// Mock git executor for testing
///
/// Responses are queued per command line (`args.join(" ")`). Each call pops
/// the front of its queue; the last queued response repeats. Every call is
/// recorded so tests can assert on the exact command sequence.
#[derive(Clone, Default)]
pub struct MockGitExecutor {
    responses: Arc<Mutex<HashMap<String, VecDeque<GitOutput>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockGitExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for a command line
    pub fn with_response(self, command: &str, output: GitOutput) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(command.to_string())
            .or_default()
            .push_back(output);
        self
    }

    /// All command lines executed so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Number of times a command line was executed
    pub fn call_count(&self, command: &str) -> usize {
        self.calls().iter().filter(|c| *c == command).count()
    }
}

#[async_trait]
impl GitExecutor for MockGitExecutor {
    async fn exec(
        &self,
        _dir: &Path,
        args: &[&str],
        _transport: Option<&Transport>,
    ) -> Result<GitOutput> {
        let key = args.join(" ");
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(key.clone());

        let mut responses = self.responses.lock().unwrap_or_else(|p| p.into_inner());
        let queue = responses
            .get_mut(&key)
            .ok_or_else(|| UpdateError::Git(format!("No mock response for: {}", key)))?;
        let output = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        output.ok_or_else(|| UpdateError::Git(format!("No mock response for: {}", key)))
    }
}
