//! Classification of failed git commands
//!
//! git reports every failure through a non-zero exit and free text on stderr.
//! The pipeline needs to tell credential problems, unreachable remotes and
//! local checkout conflicts apart, so stderr is matched against the messages
//! git and ssh print for each case.

use regex::Regex;
use respawn_core::UpdateError;
use std::sync::OnceLock;

use crate::command::GitOutput;

/// What went wrong in a failed git command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitFailure {
    /// Credential rejected or host key not trusted
    Transport,
    /// Remote unreachable
    Network,
    /// Local modifications would be overwritten by a checkout
    Conflict,
    /// Anything else
    Other,
}

fn transport_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)permission denied \(|host key verification failed|authentication failed|could not read (username|password)|no more authentication methods|load key .*: (invalid format|error in libcrypto)|remote host identification has changed",
        )
        .expect("transport pattern is valid")
    })
}

fn network_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)could not resolve host|connection refused|connection timed out|operation timed out|network is unreachable|no route to host|connection reset|could not connect to server|failed to connect to",
        )
        .expect("network pattern is valid")
    })
}

fn conflict_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)would be overwritten by (checkout|merge)|your local changes to the following files|please commit your changes or stash them|needs merge|you need to resolve your current index first",
        )
        .expect("conflict pattern is valid")
    })
}

/// Classify git stderr text
pub fn classify(stderr: &str) -> GitFailure {
    if transport_pattern().is_match(stderr) {
        GitFailure::Transport
    } else if network_pattern().is_match(stderr) {
        GitFailure::Network
    } else if conflict_pattern().is_match(stderr) {
        GitFailure::Conflict
    } else {
        GitFailure::Other
    }
}

/// Convert a failed remote-facing command into a kinded error
///
/// Conflicts cannot occur on remote-only commands, so they fold into
/// `fallback` along with unrecognised failures.
pub fn remote_error(
    context: &str,
    output: &GitOutput,
    fallback: fn(String) -> UpdateError,
) -> UpdateError {
    let detail = format!("{}: {}", context, output.stderr.trim());
    match classify(&output.stderr) {
        GitFailure::Transport => UpdateError::Transport(detail),
        GitFailure::Network => UpdateError::Network(detail),
        GitFailure::Conflict | GitFailure::Other => fallback(detail),
    }
}
