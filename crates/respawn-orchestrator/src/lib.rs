//! # respawn-orchestrator
//!
//! Sequences the update pipeline for a running bot:
//!
//! 1. prepare the working copy and synchronize the requested branch
//! 2. build it with the configured tool
//! 3. install the artifact, keeping one backup generation
//!
//! Progress and results go to a [`Reporter`]; phase control flow lives in the
//! pure [`state_machine`] so it can be tested without I/O.

mod command;
mod orchestrator;
mod reporter;
pub mod state_machine;

pub use command::UpdateCommand;
pub use orchestrator::{RunOutcome, RunState, UpdateOrchestrator};
pub use reporter::{RecordingReporter, Reporter, TracingReporter};
pub use state_machine::Phase;
