//! End-to-end tests for the update pipeline.
//!
//! These drive the real `git` binary against a local bare repository, with a
//! shell script standing in for the build tool. They are skipped when `git`
//! is not installed.

use respawn_core::{RepositoryHandle, RespawnConfig, UpdateError};
use respawn_git::{head_commit, GitCommand};
use respawn_orchestrator::{RecordingReporter, RunState, UpdateOrchestrator};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

const FAKE_BUILD: &str = r#"#!/bin/sh
set -e
echo "[INFO] goals: $*"
mkdir -p target/lib
git rev-parse HEAD > target/bot.jar
echo dependency > target/lib/dep.jar
"#;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=Respawn Test", "-c", "user.email=respawn@example.com"])
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A bare remote with `master` and `feature-x` one commit ahead of it
struct Remote {
    root: tempfile::TempDir,
    url: PathBuf,
    master_tip: String,
    feature_tip: String,
}

impl Remote {
    fn new() -> Option<Self> {
        if !git_available() {
            eprintln!("git not available, skipping");
            return None;
        }

        let root = tempfile::tempdir().unwrap();
        let url = root.path().join("remote.git");
        let seed = root.path().join("seed");
        fs::create_dir_all(&seed).unwrap();

        git(root.path(), &["init", "-q", "--bare", "remote.git"]);
        git(&seed, &["init", "-q", "-b", "master"]);
        fs::write(seed.join("README"), "bot\n").unwrap();
        fs::write(seed.join(".gitignore"), "target/\n").unwrap();
        git(&seed, &["add", "."]);
        git(&seed, &["commit", "-q", "-m", "initial"]);
        let master_tip = git(&seed, &["rev-parse", "HEAD"]);
        git(&seed, &["push", "-q", url.to_str().unwrap(), "master"]);

        git(&seed, &["checkout", "-q", "-b", "feature-x"]);
        fs::write(seed.join("README"), "bot with feature x\n").unwrap();
        git(&seed, &["commit", "-q", "-am", "feature x"]);
        let feature_tip = git(&seed, &["rev-parse", "HEAD"]);
        git(&seed, &["push", "-q", url.to_str().unwrap(), "feature-x"]);

        // The bare repository's HEAD must name a branch that exists
        git(&url, &["symbolic-ref", "HEAD", "refs/heads/master"]);

        fs::write(root.path().join("fake-build.sh"), FAKE_BUILD).unwrap();

        Some(Self {
            root,
            url,
            master_tip,
            feature_tip,
        })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    fn config(&self) -> RespawnConfig {
        self.config_with_build("sh", &[self.path("fake-build.sh").display().to_string()])
    }

    fn config_with_build(&self, tool: &str, args: &[String]) -> RespawnConfig {
        let args = args
            .iter()
            .map(|a| format!("\"{}\"", a))
            .collect::<Vec<_>>()
            .join(", ");
        let text = format!(
            r#"
[repository]
remote_url = "{url}"
local_path = "{wc}"

[git]
timeout_secs = 60

[build]
tool = "{tool}"
args = [{args}]
artifact = "target/bot.jar"
lib_dir = "target/lib"
timeout_secs = 60

[install]
artifact = "{live}/bot.jar"
lib_dir = "{live}/lib"
"#,
            url = self.url.display(),
            wc = self.path("wc").display(),
            live = self.path("live").display(),
            tool = tool,
            args = args,
        );
        RespawnConfig::from_toml(&text).unwrap()
    }

    fn working_copy(&self) -> RepositoryHandle {
        RepositoryHandle {
            path: self.path("wc"),
            remote_url: self.url.display().to_string(),
            credential: Default::default(),
        }
    }
}

fn orchestrator(config: RespawnConfig) -> (UpdateOrchestrator<GitCommand>, RecordingReporter) {
    let reporter = RecordingReporter::new();
    let orchestrator = UpdateOrchestrator::with_git(config, Arc::new(reporter.clone()));
    (orchestrator, reporter)
}

#[tokio::test]
async fn test_update_feature_branch_replaces_artifact() {
    let Some(remote) = Remote::new() else { return };
    let config = remote.config();
    let live = config.artifact_set();
    fs::create_dir_all(remote.path("live")).unwrap();
    fs::write(live.artifact(), "previous build").unwrap();

    let (orchestrator, reporter) = orchestrator(config);
    let outcome = orchestrator.execute("feature-x").await.unwrap();

    assert_eq!(outcome.state, RunState::Done, "{:?}", reporter.messages());
    assert_eq!(outcome.commit.as_deref(), Some(remote.feature_tip.as_str()));
    assert!(reporter.last().unwrap().contains(&remote.feature_tip));

    // The artifact was built from the feature tip and the old one kept
    assert_eq!(
        fs::read_to_string(live.artifact()).unwrap().trim(),
        remote.feature_tip
    );
    assert_eq!(fs::read_to_string(live.backup()).unwrap(), "previous build");
    assert!(live.lib_dir().join("dep.jar").exists());
    assert_eq!(head_commit(&remote.working_copy()).unwrap(), remote.feature_tip);
}

#[tokio::test]
async fn test_successive_updates_keep_one_backup() {
    let Some(remote) = Remote::new() else { return };
    let config = remote.config();
    let live = config.artifact_set();
    let (orchestrator, _) = orchestrator(config);

    assert!(orchestrator.execute("master").await.unwrap().is_done());
    assert!(orchestrator.execute("feature-x").await.unwrap().is_done());

    // Backup holds what was live right before the second install
    assert_eq!(
        fs::read_to_string(live.backup()).unwrap().trim(),
        remote.master_tip
    );
    let backups = fs::read_dir(remote.path("live"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".bak"))
        .count();
    assert_eq!(backups, 1);
}

#[tokio::test]
async fn test_missing_branch_leaves_head_unchanged() {
    let Some(remote) = Remote::new() else { return };
    let (orchestrator, reporter) = orchestrator(remote.config());

    assert!(orchestrator.execute("master").await.unwrap().is_done());
    let before = head_commit(&remote.working_copy()).unwrap();

    let outcome = orchestrator.execute("no-such-branch").await.unwrap();
    assert_eq!(outcome.state, RunState::Failed);
    assert!(reporter.last().unwrap().contains("does not exist"));
    assert_eq!(head_commit(&remote.working_copy()).unwrap(), before);
}

#[tokio::test]
async fn test_build_failure_never_installs() {
    let Some(remote) = Remote::new() else { return };
    let config = remote.config_with_build(
        "sh",
        &["-c".to_string(), "echo '[ERROR] compilation failure'; exit 1".to_string()],
    );
    let live = config.artifact_set();
    fs::create_dir_all(remote.path("live")).unwrap();
    fs::write(live.artifact(), "running build").unwrap();

    let (orchestrator, reporter) = orchestrator(config);
    let outcome = orchestrator.execute("feature-x").await.unwrap();

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.commit.as_deref(), Some(remote.feature_tip.as_str()));
    assert_eq!(fs::read_to_string(live.artifact()).unwrap(), "running build");
    assert!(!live.backup().exists());
    assert!(reporter.last().unwrap().contains("compilation failure"));
}

#[tokio::test]
async fn test_local_edits_discarded_on_checkout_conflict() {
    let Some(remote) = Remote::new() else { return };
    let (orchestrator, _) = orchestrator(remote.config());

    assert!(orchestrator.execute("master").await.unwrap().is_done());
    fs::write(remote.path("wc").join("README"), "local edit\n").unwrap();

    let outcome = orchestrator.execute("feature-x").await.unwrap();
    assert!(outcome.is_done(), "{:?}", outcome.error);
    assert_eq!(
        fs::read_to_string(remote.path("wc").join("README")).unwrap(),
        "bot with feature x\n"
    );
}

#[tokio::test]
async fn test_concurrent_request_rejected() {
    let Some(remote) = Remote::new() else { return };
    let config = remote.config_with_build("sh", &["-c".to_string(), "sleep 2; exit 1".to_string()]);
    let (orchestrator, _) = orchestrator(config);
    let orchestrator = Arc::new(orchestrator);

    let running = orchestrator.clone().spawn("master").unwrap();
    let err = orchestrator.execute("feature-x").await.unwrap_err();
    assert!(matches!(err, UpdateError::AlreadyRunning { .. }));

    let outcome = running.await.unwrap();
    assert_eq!(outcome.branch, "master");

    // Guard released once the first run finished
    assert!(!orchestrator.is_running());
}
