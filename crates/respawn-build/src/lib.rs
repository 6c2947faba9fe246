//! # respawn-build
//!
//! Build and installation stages of the respawn pipeline.
//!
//! - [`BuildInvoker`] runs the external build tool and captures its log
//! - [`ArtifactInstaller`] swaps the built artifact into place with one backup

mod installer;
mod invoker;

pub use installer::{ArtifactInstaller, InstallReport};
pub use invoker::BuildInvoker;
