//! # respawn-core
//!
//! Core types for the respawn self-update pipeline.
//!
//! The pipeline pulls the latest revision of a program's own source, builds it
//! and swaps the freshly built artifact in place of the running one:
//!
//! - a working copy is cloned or reopened
//! - the requested branch is synchronized to its remote tip
//! - the build tool runs against the working copy
//! - the artifact and its dependency directory are replaced, keeping one backup

mod config;
mod error;
mod types;

pub use config::{BuildConfig, GitConfig, InstallConfig, RepositoryConfig, RespawnConfig, SshConfig};
pub use error::{ErrorKind, Result, UpdateError};
pub use types::*;
