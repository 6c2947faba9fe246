//! Pure state machine for one update run
//!
//! This module implements a pure functional state machine with NO I/O.
//! All state transitions are deterministic and testable.
//!
//! - Pure function: transition(phase, event) -> (phase, actions)
//! - Strictly linear: IDLE -> SYNCING -> BUILDING -> INSTALLING -> DONE | FAILED
//! - Invalid transitions go to Failed (never panic)
//! - Every error kind maps to exactly one user report and one operator log line

use respawn_core::{ErrorKind, UpdateError};

/// Phase of the update pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// No run in progress
    Idle,
    /// Preparing the working copy and synchronizing the branch
    Syncing { branch: String },
    /// Build tool running against the synchronized commit
    Building { branch: String, commit: String },
    /// Swapping the built artifact into place
    Installing { branch: String, commit: String },
    /// Run finished with the artifact installed
    Done {
        branch: String,
        commit: String,
        digest: String,
    },
    /// Run aborted
    Failed {
        branch: String,
        commit: Option<String>,
        error: String,
    },
}

impl Phase {
    /// A run is in flight unless the phase is Idle, Done or Failed
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Syncing { .. } | Self::Building { .. } | Self::Installing { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Syncing { .. } => "SYNCING",
            Self::Building { .. } => "BUILDING",
            Self::Installing { .. } => "INSTALLING",
            Self::Done { .. } => "DONE",
            Self::Failed { .. } => "FAILED",
        }
    }

    fn branch(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Syncing { branch }
            | Self::Building { branch, .. }
            | Self::Installing { branch, .. }
            | Self::Done { branch, .. }
            | Self::Failed { branch, .. } => Some(branch),
        }
    }

    fn commit(&self) -> Option<&str> {
        match self {
            Self::Building { commit, .. }
            | Self::Installing { commit, .. }
            | Self::Done { commit, .. } => Some(commit),
            Self::Failed { commit, .. } => commit.as_deref(),
            Self::Idle | Self::Syncing { .. } => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Events that trigger phase transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Start a new run
    Start { branch: String },
    /// Branch synchronized to `commit`
    Synced { commit: String },
    /// Build reported success
    BuildPassed,
    /// Build reported failure; `excerpt` is the tail of its log
    BuildFailed { excerpt: String },
    /// Artifact installed
    Installed { digest: String },
    /// A component returned an error
    Error { kind: ErrorKind, message: String },
    /// Terminal run acknowledged; accept the next one
    Reset,
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Post a message to the chat reporter
    Report { message: String },
    /// Phase progress for the operator log
    LogProgress { message: String },
    /// Detailed failure line for the operator log
    LogFailure { kind: ErrorKind, message: String },
    /// Event that makes no sense in the current phase
    LogInvalidTransition { message: String },
}

/// Pure state transition function
///
/// Takes the current phase and an event, returns the new phase and the
/// actions to execute. This function never panics; an event that makes no
/// sense in the current phase fails the run.
pub fn transition(phase: Phase, event: Event) -> (Phase, Vec<Action>) {
    match (phase, event) {
        (Phase::Idle | Phase::Done { .. } | Phase::Failed { .. }, Event::Start { branch }) => {
            let actions = vec![
                Action::LogProgress {
                    message: format!("Starting update of branch {}", branch),
                },
                Action::Report {
                    message: format!("Updating to branch `{}`...", branch),
                },
            ];
            (Phase::Syncing { branch }, actions)
        }

        (Phase::Syncing { branch }, Event::Synced { commit }) => {
            let actions = vec![
                Action::LogProgress {
                    message: format!("Synchronized {} at {}", branch, commit),
                },
                Action::Report {
                    message: format!("Synced `{}` at {}, building...", branch, short(&commit)),
                },
            ];
            (Phase::Building { branch, commit }, actions)
        }

        (Phase::Building { branch, commit }, Event::BuildPassed) => {
            let actions = vec![Action::LogProgress {
                message: format!("Build of {} passed, installing", short(&commit)),
            }];
            (Phase::Installing { branch, commit }, actions)
        }

        (Phase::Building { branch, commit }, Event::BuildFailed { excerpt }) => {
            let actions = vec![
                Action::Report {
                    message: format!(
                        "Build of `{}` at {} failed, nothing was installed:\n{}",
                        branch,
                        short(&commit),
                        excerpt
                    ),
                },
                Action::LogFailure {
                    kind: ErrorKind::Build,
                    message: format!("Build of {} at {} failed", branch, commit),
                },
            ];
            let error = UpdateError::Build { log: excerpt }.to_string();
            (
                Phase::Failed {
                    branch,
                    commit: Some(commit),
                    error,
                },
                actions,
            )
        }

        (Phase::Installing { branch, commit }, Event::Installed { digest }) => {
            let actions = vec![
                Action::LogProgress {
                    message: format!("Installed {} at {} (sha256 {})", branch, commit, digest),
                },
                Action::Report {
                    message: format!(
                        "Update complete: `{}` is now at {} (sha256 {}). Restart to run it.",
                        branch,
                        commit,
                        short(&digest)
                    ),
                },
            ];
            (
                Phase::Done {
                    branch,
                    commit,
                    digest,
                },
                actions,
            )
        }

        (phase, Event::Error { kind, message }) if phase.is_active() => {
            let branch = phase.branch().unwrap_or_default().to_string();
            let commit = phase.commit().map(str::to_string);
            let actions = vec![
                Action::Report {
                    message: user_message(kind, &branch, &message),
                },
                Action::LogFailure {
                    kind,
                    message: format!("{} failed in {}: {}", branch, phase.name(), message),
                },
            ];
            (
                Phase::Failed {
                    branch,
                    commit,
                    error: message,
                },
                actions,
            )
        }

        (phase, Event::Reset) if !phase.is_active() => (Phase::Idle, Vec::new()),

        // Invalid transitions
        (phase, event) => {
            let message = format!("Invalid transition from {} on {:?}", phase.name(), event);
            let branch = phase.branch().unwrap_or_default().to_string();
            let commit = phase.commit().map(str::to_string);
            (
                Phase::Failed {
                    branch,
                    commit,
                    error: message.clone(),
                },
                vec![Action::LogInvalidTransition { message }],
            )
        }
    }
}

/// One user-facing sentence per error kind
fn user_message(kind: ErrorKind, branch: &str, detail: &str) -> String {
    match kind {
        ErrorKind::Repo => format!("Update failed: the working copy could not be prepared. {}", detail),
        ErrorKind::Transport => format!(
            "Update failed: the repository credentials were unreadable or rejected. {}",
            detail
        ),
        ErrorKind::Network => format!("Update failed: the remote is unreachable. {}", detail),
        ErrorKind::BranchNotFound => format!(
            "Update failed: branch `{}` does not exist on the remote. Nothing was changed.",
            branch
        ),
        ErrorKind::Git => format!("Update failed: git could not switch to `{}`. {}", branch, detail),
        ErrorKind::Build => format!("Build failed, nothing was installed. {}", detail),
        ErrorKind::Install => format!(
            "Install failed: {}. Completed steps were NOT rolled back; restore the .bak artifact by hand if the bot does not start.",
            detail
        ),
        ErrorKind::Timeout => format!("Update failed: {}", detail),
        ErrorKind::AlreadyRunning => "An update is already running, try again when it finishes.".to_string(),
        ErrorKind::InvalidInput | ErrorKind::Config => format!("Update rejected: {}", detail),
    }
}

fn short(id: &str) -> &str {
    let end = id.char_indices().nth(12).map(|(i, _)| i).unwrap_or(id.len());
    &id[..end]
}
