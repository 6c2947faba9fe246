//! Branch synchronization
//!
//! Brings the local branch of a working copy to the remote tip:
//!
//! 1. list `refs/heads/*` on the remote; an absent branch fails before any
//!    local mutation
//! 2. fetch the branch into `refs/remotes/origin/<branch>`
//! 3. check out the local branch reset to `origin/<branch>` (creating it with
//!    tracking if it does not exist yet)
//! 4. pull, and report the resulting HEAD
//!
//! A checkout blocked by local modifications is recovered exactly once with a
//! hard reset. The working copy is a build-only clone, so discarding local
//! edits is intended; a second failure is never retried.

use respawn_core::{BranchRef, RepositoryHandle, Result, UpdateError};
use tracing::{debug, info, instrument, warn};

use crate::command::GitExecutor;
use crate::failure::{classify, remote_error, GitFailure};
use crate::transport::{Transport, Transports};
use crate::validate::validate_branch_name;

const REMOTE: &str = "origin";

/// A branch head as advertised by the remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBranch {
    pub name: String,
    pub commit_id: String,
}

/// Synchronizer for local branches
pub struct BranchSynchronizer<E: GitExecutor> {
    executor: E,
    transports: Transports,
}

impl<E: GitExecutor> BranchSynchronizer<E> {
    pub fn new(executor: E, transports: Transports) -> Self {
        Self {
            executor,
            transports,
        }
    }

    /// Advance the local `branch` to the remote tip
    ///
    /// The returned [`BranchRef`] is resolved fresh on every call.
    #[instrument(skip(self, handle), fields(path = %handle.path.display()))]
    pub async fn sync(&self, handle: &RepositoryHandle, branch: &str) -> Result<BranchRef> {
        validate_branch_name(branch)?;
        let transport = self.transports.resolve(handle.credential)?;

        let remote_branches = self.list_remote_branches(handle, &transport).await?;
        let remote = remote_branches
            .iter()
            .find(|b| b.name == branch)
            .ok_or_else(|| UpdateError::BranchNotFound(branch.to_string()))?;
        debug!("Remote tip of {} is {}", branch, remote.commit_id);

        let tracking = format!("{}/{}", REMOTE, branch);
        self.fetch(handle, branch, &transport).await?;

        if self.local_branch_exists(handle, branch).await? {
            debug!("Resetting existing local branch {} to {}", branch, tracking);
            self.checkout_with_recovery(handle, &["checkout", "--track", "-B", branch, &tracking])
                .await?;
        } else {
            debug!("Creating local branch {} tracking {}", branch, tracking);
            self.checkout_with_recovery(handle, &["checkout", "--track", "-b", branch, &tracking])
                .await?;
        }

        self.pull(handle, branch, &transport).await?;

        let commit_id = self.head(handle).await?;
        if commit_id != remote.commit_id {
            // The remote moved between listing and pulling; HEAD is what gets built
            warn!(
                "Remote {} advanced from {} to {} during sync",
                branch, remote.commit_id, commit_id
            );
        }

        info!("Synchronized {} at {}", branch, commit_id);
        Ok(BranchRef {
            name: branch.to_string(),
            tracking,
            commit_id,
        })
    }

    /// List branch heads on the remote
    pub async fn list_remote_branches(
        &self,
        handle: &RepositoryHandle,
        transport: &Transport,
    ) -> Result<Vec<RemoteBranch>> {
        let output = self
            .executor
            .exec(&handle.path, &["ls-remote", "--heads", REMOTE], Some(transport))
            .await?;
        if !output.success {
            return Err(remote_error(
                "Failed to list remote branches",
                &output,
                UpdateError::Git,
            ));
        }
        Ok(parse_ls_remote(&output.stdout))
    }

    async fn fetch(
        &self,
        handle: &RepositoryHandle,
        branch: &str,
        transport: &Transport,
    ) -> Result<()> {
        let refspec = format!("+refs/heads/{0}:refs/remotes/{1}/{0}", branch, REMOTE);
        let output = self
            .executor
            .exec(&handle.path, &["fetch", REMOTE, &refspec], Some(transport))
            .await?;
        if !output.success {
            return Err(remote_error(
                &format!("Failed to fetch {}", branch),
                &output,
                UpdateError::Git,
            ));
        }
        Ok(())
    }

    async fn local_branch_exists(&self, handle: &RepositoryHandle, branch: &str) -> Result<bool> {
        let reference = format!("refs/heads/{}", branch);
        let output = self
            .executor
            .exec(
                &handle.path,
                &["rev-parse", "--verify", "--quiet", &reference],
                None,
            )
            .await?;
        Ok(output.success)
    }

    /// Run a checkout, recovering once from a local-modification conflict
    async fn checkout_with_recovery(&self, handle: &RepositoryHandle, args: &[&str]) -> Result<()> {
        let output = self.executor.exec(&handle.path, args, None).await?;
        if output.success {
            return Ok(());
        }

        if classify(&output.stderr) != GitFailure::Conflict {
            return Err(UpdateError::Git(format!(
                "Checkout failed: {}",
                output.stderr.trim()
            )));
        }

        warn!(
            "Checkout blocked by local modifications, discarding them: {}",
            output.stderr.trim()
        );
        let reset = self
            .executor
            .exec(&handle.path, &["reset", "--hard", "HEAD"], None)
            .await?;
        if !reset.success {
            return Err(UpdateError::Git(format!(
                "Hard reset failed: {}",
                reset.stderr.trim()
            )));
        }

        let retry = self.executor.exec(&handle.path, args, None).await?;
        if !retry.success {
            return Err(UpdateError::Git(format!(
                "Checkout still failing after hard reset: {}",
                retry.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn pull(&self, handle: &RepositoryHandle, branch: &str, transport: &Transport) -> Result<()> {
        let output = self
            .executor
            .exec(
                &handle.path,
                &["pull", "--ff-only", REMOTE, branch],
                Some(transport),
            )
            .await?;
        if !output.success {
            return Err(remote_error(
                &format!("Failed to pull {}", branch),
                &output,
                UpdateError::Git,
            ));
        }
        Ok(())
    }

    async fn head(&self, handle: &RepositoryHandle) -> Result<String> {
        let output = self
            .executor
            .exec(&handle.path, &["rev-parse", "HEAD"], None)
            .await?;
        if !output.success {
            return Err(UpdateError::Git(format!(
                "Failed to resolve HEAD: {}",
                output.stderr.trim()
            )));
        }
        Ok(output.stdout.trim().to_string())
    }
}

/// Parse `git ls-remote --heads` output (`<sha>\trefs/heads/<name>`)
fn parse_ls_remote(stdout: &str) -> Vec<RemoteBranch> {
    stdout
        .lines()
        .filter_map(|line| {
            let (sha, reference) = line.split_once('\t')?;
            let name = reference.trim().strip_prefix("refs/heads/")?;
            Some(RemoteBranch {
                name: name.to_string(),
                commit_id: sha.trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{GitOutput, MockGitExecutor};
    use respawn_core::CredentialKind;
    use std::path::PathBuf;

    const TIP: &str = "1111111111111111111111111111111111111111";
    const LS_REMOTE: &str = "1111111111111111111111111111111111111111\trefs/heads/master\n2222222222222222222222222222222222222222\trefs/heads/feature-x\n";
    const CONFLICT: &str = "error: Your local changes to the following files would be overwritten by checkout:\n\tpom.xml\nPlease commit your changes or stash them before you switch branches.\nAborting\n";

    fn handle() -> RepositoryHandle {
        RepositoryHandle {
            path: PathBuf::from("/mock/repo"),
            remote_url: "file:///mock/remote.git".to_string(),
            credential: CredentialKind::None,
        }
    }

    fn synced_master() -> MockGitExecutor {
        MockGitExecutor::new()
            .with_response("ls-remote --heads origin", GitOutput::ok(LS_REMOTE))
            .with_response(
                "fetch origin +refs/heads/master:refs/remotes/origin/master",
                GitOutput::ok(""),
            )
            .with_response("pull --ff-only origin master", GitOutput::ok(""))
            .with_response("rev-parse HEAD", GitOutput::ok(format!("{}\n", TIP)))
    }

    #[test]
    fn test_parse_ls_remote() {
        let branches = parse_ls_remote(LS_REMOTE);
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[1].name, "feature-x");
        assert_eq!(branches[1].commit_id, "2222222222222222222222222222222222222222");
        assert!(parse_ls_remote("garbage\n").is_empty());
    }

    #[tokio::test]
    async fn test_sync_existing_branch() {
        let executor = synced_master()
            .with_response("rev-parse --verify --quiet refs/heads/master", GitOutput::ok(TIP))
            .with_response("checkout --track -B master origin/master", GitOutput::ok(""));
        let sync = BranchSynchronizer::new(executor.clone(), Transports::anonymous_only());

        let branch = sync.sync(&handle(), "master").await.unwrap();
        assert_eq!(branch.commit_id, TIP);
        assert_eq!(branch.tracking, "origin/master");
        assert_eq!(executor.call_count("reset --hard HEAD"), 0);
        assert_eq!(
            executor.calls().last().map(String::as_str),
            Some("rev-parse HEAD")
        );
    }

    #[tokio::test]
    async fn test_sync_creates_tracking_branch() {
        let executor = synced_master()
            .with_response(
                "rev-parse --verify --quiet refs/heads/master",
                GitOutput::failed(""),
            )
            .with_response("checkout --track -b master origin/master", GitOutput::ok(""));
        let sync = BranchSynchronizer::new(executor.clone(), Transports::anonymous_only());

        sync.sync(&handle(), "master").await.unwrap();
        assert_eq!(executor.call_count("checkout --track -b master origin/master"), 1);
        assert_eq!(executor.call_count("checkout --track -B master origin/master"), 0);
    }

    #[tokio::test]
    async fn test_missing_branch_mutates_nothing() {
        let executor =
            MockGitExecutor::new().with_response("ls-remote --heads origin", GitOutput::ok(LS_REMOTE));
        let sync = BranchSynchronizer::new(executor.clone(), Transports::anonymous_only());

        let err = sync.sync(&handle(), "does-not-exist").await.unwrap_err();
        assert!(matches!(err, UpdateError::BranchNotFound(ref b) if b == "does-not-exist"));
        assert_eq!(executor.calls(), vec!["ls-remote --heads origin"]);
    }

    #[tokio::test]
    async fn test_conflict_recovered_with_single_reset() {
        let executor = synced_master()
            .with_response("rev-parse --verify --quiet refs/heads/master", GitOutput::ok(TIP))
            .with_response(
                "checkout --track -B master origin/master",
                GitOutput::failed(CONFLICT),
            )
            .with_response("checkout --track -B master origin/master", GitOutput::ok(""))
            .with_response("reset --hard HEAD", GitOutput::ok(""));
        let sync = BranchSynchronizer::new(executor.clone(), Transports::anonymous_only());

        sync.sync(&handle(), "master").await.unwrap();
        assert_eq!(executor.call_count("reset --hard HEAD"), 1);
        assert_eq!(executor.call_count("checkout --track -B master origin/master"), 2);
    }

    #[tokio::test]
    async fn test_second_checkout_failure_is_not_retried() {
        let executor = synced_master()
            .with_response("rev-parse --verify --quiet refs/heads/master", GitOutput::ok(TIP))
            .with_response(
                "checkout --track -B master origin/master",
                GitOutput::failed(CONFLICT),
            )
            .with_response("reset --hard HEAD", GitOutput::ok(""));
        let sync = BranchSynchronizer::new(executor.clone(), Transports::anonymous_only());

        let err = sync.sync(&handle(), "master").await.unwrap_err();
        assert!(matches!(err, UpdateError::Git(_)));
        assert_eq!(executor.call_count("reset --hard HEAD"), 1);
        assert_eq!(executor.call_count("checkout --track -B master origin/master"), 2);
        assert_eq!(executor.call_count("pull --ff-only origin master"), 0);
    }

    #[tokio::test]
    async fn test_non_conflict_checkout_failure_skips_reset() {
        let executor = synced_master()
            .with_response("rev-parse --verify --quiet refs/heads/master", GitOutput::ok(TIP))
            .with_response(
                "checkout --track -B master origin/master",
                GitOutput::failed("fatal: bad object refs/remotes/origin/master"),
            );
        let sync = BranchSynchronizer::new(executor.clone(), Transports::anonymous_only());

        let err = sync.sync(&handle(), "master").await.unwrap_err();
        assert!(matches!(err, UpdateError::Git(_)));
        assert_eq!(executor.call_count("reset --hard HEAD"), 0);
    }

    #[tokio::test]
    async fn test_errors_are_distinguishable() {
        let denied = MockGitExecutor::new().with_response(
            "ls-remote --heads origin",
            GitOutput::failed("git@host: Permission denied (publickey).\nfatal: Could not read from remote repository."),
        );
        let err = BranchSynchronizer::new(denied, Transports::anonymous_only())
            .sync(&handle(), "master")
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::Transport(_)));

        let unreachable = MockGitExecutor::new().with_response(
            "ls-remote --heads origin",
            GitOutput::failed("ssh: Could not resolve hostname git.internal: Name or service not known"),
        );
        let err = BranchSynchronizer::new(unreachable, Transports::anonymous_only())
            .sync(&handle(), "master")
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::Network(_)));
    }

    #[tokio::test]
    async fn test_invalid_branch_runs_no_git() {
        let executor = MockGitExecutor::new();
        let sync = BranchSynchronizer::new(executor.clone(), Transports::anonymous_only());
        let err = sync.sync(&handle(), "--upload-pack=x").await.unwrap_err();
        assert!(matches!(err, UpdateError::InvalidInput(_)));
        assert!(executor.calls().is_empty());
    }
}
