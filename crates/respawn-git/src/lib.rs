//! # respawn-git
//!
//! Git integration layer for the respawn pipeline.
//!
//! This crate provides:
//! - git command execution abstraction (real and mock)
//! - transport resolution per credential kind
//! - working copy preparation (clone or reopen)
//! - branch synchronization with single-shot conflict recovery
//!
//! Commands that touch the remote go through the `git` binary so the SSH
//! transport behaves exactly as an operator's own `git` would; read-only
//! inspection of the working copy uses `gix`.

mod branch;
mod command;
mod failure;
mod repository;
mod transport;
mod validate;

pub use branch::{BranchSynchronizer, RemoteBranch};
pub use command::{GitCommand, GitExecutor, GitOutput, MockGitExecutor};
pub use failure::{classify, GitFailure};
pub use repository::{head_commit, is_valid_repository, RepositoryManager};
pub use transport::{AnonymousResolver, SshResolver, Transport, TransportResolver, Transports};
pub use validate::validate_branch_name;
