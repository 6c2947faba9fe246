//! Progress reporting to the chat transport
//!
//! The chat transport is an external collaborator; the pipeline only knows
//! it through [`Reporter`]. Reporters are fail-open: delivery problems are
//! the implementation's to log, never the pipeline's to handle.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Sink for user-facing progress and result messages
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, message: &str);
}

/// Reporter that writes messages to the operator log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

#[async_trait]
impl Reporter for TracingReporter {
    async fn report(&self, message: &str) {
        info!(target: "respawn::report", "{}", message);
    }
}

/// Reporter that keeps every message, for tests
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Last message reported, usually the run result
    pub fn last(&self) -> Option<String> {
        self.messages().pop()
    }
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn report(&self, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_reporter_keeps_order() {
        let reporter = RecordingReporter::new();
        let shared: Arc<dyn Reporter> = Arc::new(reporter.clone());
        shared.report("first").await;
        shared.report("second").await;
        assert_eq!(reporter.messages(), vec!["first", "second"]);
        assert_eq!(reporter.last().as_deref(), Some("second"));
    }
}
