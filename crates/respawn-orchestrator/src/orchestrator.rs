//! Update orchestrator
//!
//! [`UpdateOrchestrator`] is constructed once at process start and shared by
//! reference with whatever triggers updates. It owns the process-wide
//! reentrancy guard: at most one run exists at a time, whatever branch it
//! targets, because every run shares the working copy and the live artifact.
//!
//! The live artifact is replaced while the running bot may still have it
//! mapped. That hazard is accepted here rather than solved; the new artifact
//! takes effect on the next restart.

use chrono::{DateTime, Utc};
use respawn_build::{ArtifactInstaller, BuildInvoker, InstallReport};
use respawn_core::{BranchRef, RepositoryHandle, RespawnConfig, Result, UpdateError};
use respawn_git::{head_commit, BranchSynchronizer, GitCommand, GitExecutor, RepositoryManager, Transports};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::reporter::Reporter;
use crate::state_machine::{transition, Action, Event, Phase};

/// Characters of build log included in a failure report
const LOG_EXCERPT_CHARS: usize = 1500;

/// Final state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunState {
    Done,
    Failed,
}

/// Record of one finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub branch: String,
    /// Synchronized commit, when the run got that far
    pub commit: Option<String>,
    pub state: RunState,
    /// SHA-256 of the installed artifact (DONE only)
    pub digest: Option<String>,
    /// Failure detail (FAILED only)
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunOutcome {
    pub fn is_done(&self) -> bool {
        self.state == RunState::Done
    }
}

/// Single entry point sequencing sync, build and install
pub struct UpdateOrchestrator<E: GitExecutor + Clone> {
    config: RespawnConfig,
    guard: Arc<AsyncMutex<()>>,
    phase: Mutex<Phase>,
    repositories: RepositoryManager<E>,
    branches: BranchSynchronizer<E>,
    builder: BuildInvoker,
    installer: ArtifactInstaller,
    reporter: Arc<dyn Reporter>,
}

impl UpdateOrchestrator<GitCommand> {
    /// Orchestrator driving the real `git` binary
    pub fn with_git(config: RespawnConfig, reporter: Arc<dyn Reporter>) -> Self {
        let executor = GitCommand::new(config.git.timeout());
        Self::new(config, executor, reporter)
    }
}

impl<E: GitExecutor + Clone> UpdateOrchestrator<E> {
    pub fn new(config: RespawnConfig, executor: E, reporter: Arc<dyn Reporter>) -> Self {
        let transports = Transports::new(config.ssh.clone());
        Self {
            repositories: RepositoryManager::new(executor.clone(), transports.clone()),
            branches: BranchSynchronizer::new(executor, transports),
            builder: BuildInvoker::from_config(&config.build),
            installer: ArtifactInstaller::new(config.artifact_set()),
            guard: Arc::new(AsyncMutex::new(())),
            phase: Mutex::new(Phase::Idle),
            reporter,
            config,
        }
    }

    pub fn config(&self) -> &RespawnConfig {
        &self.config
    }

    /// Current phase; Idle between runs
    pub fn phase(&self) -> Phase {
        self.phase.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Whether a run is in flight
    pub fn is_running(&self) -> bool {
        self.guard.try_lock().is_err()
    }

    /// Run the pipeline for `branch` to completion on the current task
    ///
    /// Rejected with [`UpdateError::AlreadyRunning`] if another run is in
    /// flight. Pipeline failures are reported and come back as a FAILED
    /// outcome, not as an error.
    pub async fn execute(&self, branch: &str) -> Result<RunOutcome> {
        let permit = self.acquire(branch)?;
        let outcome = self.run(branch).await;
        drop(permit);
        Ok(outcome)
    }

    /// Run the pipeline for `branch` on a background task
    ///
    /// The guard is taken before returning, so a second request made right
    /// after this one is rejected immediately.
    pub fn spawn(self: Arc<Self>, branch: &str) -> Result<JoinHandle<RunOutcome>>
    where
        E: 'static,
    {
        let permit = self.acquire(branch)?;
        let branch = branch.to_string();
        Ok(tokio::spawn(async move {
            let outcome = self.run(&branch).await;
            drop(permit);
            outcome
        }))
    }

    fn acquire(&self, branch: &str) -> Result<OwnedMutexGuard<()>> {
        let permit = self.guard.clone().try_lock_owned().map_err(|_| {
            info!("Rejecting update of {}: a run is already in flight", branch);
            UpdateError::AlreadyRunning {
                branch: branch.to_string(),
            }
        })?;

        // Holding the guard means no run is in flight; an active phase was
        // left behind by a run that was cancelled or panicked
        let mut phase = self.phase.lock().unwrap_or_else(|p| p.into_inner());
        if phase.is_active() {
            warn!("Discarding phase {} of an interrupted run", phase);
        }
        *phase = Phase::Idle;
        Ok(permit)
    }

    async fn run(&self, branch: &str) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        let span = info_span!("update", run_id = %run_id, branch = %branch);

        async {
            self.drive(branch).await;

            let final_phase = self.phase();
            self.apply(Event::Reset).await;

            let duration_ms = started.elapsed().as_millis() as u64;
            info!("Run finished {} in {}ms", final_phase, duration_ms);
            outcome_from(run_id, branch, final_phase, started_at, duration_ms)
        }
        .instrument(span)
        .await
    }

    /// Sequence the phases; every exit path leaves a terminal phase
    ///
    /// Each step runs only if the previous transition left the run active.
    async fn drive(&self, branch: &str) {
        let started = self
            .apply(Event::Start {
                branch: branch.to_string(),
            })
            .await;
        if !started.is_active() {
            return;
        }

        let (handle, synced) = match self.synchronize(branch).await {
            Ok(ready) => ready,
            Err(e) => {
                self.apply(error_event(&e)).await;
                return;
            }
        };
        let building = self
            .apply(Event::Synced {
                commit: synced.commit_id.clone(),
            })
            .await;
        if !building.is_active() {
            return;
        }

        let build = self.builder.build(&handle.path, &self.config.build.goals).await;
        if !build.success() {
            debug!("Full build log:\n{}", build.log());
            self.apply(Event::BuildFailed {
                excerpt: build.excerpt(LOG_EXCERPT_CHARS),
            })
            .await;
            return;
        }
        if !self.apply(Event::BuildPassed).await.is_active() {
            return;
        }

        let installed = match self.install(&handle, &synced).await {
            Ok(report) => Event::Installed {
                digest: report.digest,
            },
            Err(e) => error_event(&e),
        };
        self.apply(installed).await;
    }

    #[instrument(skip(self))]
    async fn synchronize(&self, branch: &str) -> Result<(RepositoryHandle, BranchRef)> {
        let repository = &self.config.repository;
        let handle = self
            .repositories
            .get_ready(
                &repository.local_path,
                &repository.remote_url,
                repository.credential,
            )
            .await?;
        let synced = self.branches.sync(&handle, branch).await?;
        Ok((handle, synced))
    }

    #[instrument(skip(self, handle, synced), fields(commit = %synced.commit_id))]
    async fn install(&self, handle: &RepositoryHandle, synced: &BranchRef) -> Result<InstallReport> {
        // The installed artifact must come from the synchronized commit
        let head = head_commit(handle)?;
        if head != synced.commit_id {
            return Err(UpdateError::Git(format!(
                "Working copy moved from {} to {} during the build, refusing to install",
                synced.commit_id, head
            )));
        }

        let installer = self.installer.clone();
        let output = self.config.build_output();
        tokio::task::spawn_blocking(move || installer.install(&output))
            .await
            .map_err(|e| UpdateError::Install(format!("Install task failed: {}", e)))?
    }

    /// Feed an event through the state machine, perform its actions and
    /// return the resulting phase
    async fn apply(&self, event: Event) -> Phase {
        let (next, actions) = {
            let mut phase = self.phase.lock().unwrap_or_else(|p| p.into_inner());
            let (next, actions) = transition(phase.clone(), event);
            debug!("Phase {} -> {}", phase, next);
            *phase = next.clone();
            (next, actions)
        };

        for action in actions {
            match action {
                Action::Report { message } => self.reporter.report(&message).await,
                Action::LogProgress { message } => info!("{}", message),
                Action::LogFailure { kind, message } => error!(kind = %kind, "{}", message),
                Action::LogInvalidTransition { message } => error!("{}", message),
            }
        }
        next
    }
}

fn error_event(e: &UpdateError) -> Event {
    Event::Error {
        kind: e.kind(),
        message: e.to_string(),
    }
}

fn outcome_from(
    run_id: Uuid,
    branch: &str,
    phase: Phase,
    started_at: DateTime<Utc>,
    duration_ms: u64,
) -> RunOutcome {
    let mut outcome = RunOutcome {
        run_id,
        branch: branch.to_string(),
        commit: None,
        state: RunState::Failed,
        digest: None,
        error: None,
        started_at,
        duration_ms,
    };
    match phase {
        Phase::Done { commit, digest, .. } => {
            outcome.state = RunState::Done;
            outcome.commit = Some(commit);
            outcome.digest = Some(digest);
        }
        Phase::Failed { commit, error, .. } => {
            outcome.commit = commit;
            outcome.error = Some(error);
        }
        other => {
            outcome.error = Some(format!("Run ended in non-terminal phase {}", other));
        }
    }
    outcome
}
