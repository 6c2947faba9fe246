//! Unified error types for the update pipeline

use thiserror::Error;

/// Unified error type for all respawn operations
///
/// Every pipeline component returns one of these kinds; the orchestrator maps
/// each kind to a single user-facing report and a single operator log line.
#[derive(Error, Debug)]
pub enum UpdateError {
    // Working copy errors
    #[error("Repository error: {0}")]
    Repo(String),

    // Remote access errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Network error: {0}")]
    Network(String),

    // Branch errors
    #[error("Branch not found on remote: {0}")]
    BranchNotFound(String),

    #[error("Git error: {0}")]
    Git(String),

    // Build errors
    #[error("Build failed:\n{log}")]
    Build { log: String },

    // Installation errors
    #[error("Install error: {0}")]
    Install(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    // Orchestrator errors
    #[error("An update is already running (requested branch: {branch})")]
    AlreadyRunning { branch: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Stable classification of an [`UpdateError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Repo,
    Transport,
    Network,
    BranchNotFound,
    Git,
    Build,
    Install,
    Timeout,
    AlreadyRunning,
    InvalidInput,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Repo => "repo_error",
            Self::Transport => "transport_error",
            Self::Network => "network_error",
            Self::BranchNotFound => "branch_not_found",
            Self::Git => "git_error",
            Self::Build => "build_error",
            Self::Install => "install_error",
            Self::Timeout => "timeout",
            Self::AlreadyRunning => "already_running",
            Self::InvalidInput => "invalid_input",
            Self::Config => "config_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl UpdateError {
    /// Kind of this error, for logging and reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Repo(_) => ErrorKind::Repo,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Network(_) => ErrorKind::Network,
            Self::BranchNotFound(_) => ErrorKind::BranchNotFound,
            Self::Git(_) => ErrorKind::Git,
            Self::Build { .. } => ErrorKind::Build,
            Self::Install(_) => ErrorKind::Install,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::AlreadyRunning { .. } => ErrorKind::AlreadyRunning,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

/// Result type alias using UpdateError
pub type Result<T> = std::result::Result<T, UpdateError>;
