//! Core type definitions for the update pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the remote repository is authenticated against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    /// Anonymous access
    #[default]
    None,
    /// SSH identity plus known-hosts file
    Ssh,
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Ssh => write!(f, "ssh"),
        }
    }
}

impl std::str::FromStr for CredentialKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "anonymous" => Ok(Self::None),
            "ssh" => Ok(Self::Ssh),
            _ => Err(format!("Invalid credential kind: {}", s)),
        }
    }
}

/// A local working copy that is known to be structurally valid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryHandle {
    /// Working copy root
    pub path: PathBuf,
    /// Remote the working copy was cloned from
    pub remote_url: String,
    /// Credential kind used to reach the remote
    pub credential: CredentialKind,
}

/// A branch resolved against the remote during one synchronization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRef {
    /// Branch name, e.g. `master`
    pub name: String,
    /// Remote tracking identity, e.g. `origin/master`
    pub tracking: String,
    /// Commit the local branch points to after synchronization
    pub commit_id: String,
}

impl BranchRef {
    /// Short (12 char) form of the commit id
    pub fn short_id(&self) -> &str {
        let end = self.commit_id.len().min(12);
        &self.commit_id[..end]
    }
}

/// Outcome of one build tool invocation
#[derive(Debug, Clone)]
pub struct BuildResult {
    success: bool,
    log: String,
    duration: Duration,
}

impl BuildResult {
    pub fn new(success: bool, log: String, duration: Duration) -> Self {
        Self {
            success,
            log,
            duration,
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    /// Combined stdout/stderr text in the order it was produced
    pub fn log(&self) -> &str {
        &self.log
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Tail of the log, at most `max_chars` characters
    ///
    /// Build tools print the failure reason last, so the tail is what gets
    /// reported when the full log is too long for a chat message.
    pub fn excerpt(&self, max_chars: usize) -> String {
        let total = self.log.chars().count();
        if total <= max_chars {
            return self.log.clone();
        }
        let skip = total - max_chars;
        let tail: String = self.log.chars().skip(skip).collect();
        format!("...[truncated {} chars]\n{}", skip, tail)
    }
}

/// Paths of the live artifact, its single backup and its dependency directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    artifact: PathBuf,
    backup: PathBuf,
    lib_dir: PathBuf,
}

impl ArtifactSet {
    /// The backup path is always `<artifact>.bak`
    pub fn new(artifact: impl Into<PathBuf>, lib_dir: impl Into<PathBuf>) -> Self {
        let artifact = artifact.into();
        let mut backup = artifact.clone().into_os_string();
        backup.push(".bak");
        Self {
            artifact,
            backup: PathBuf::from(backup),
            lib_dir: lib_dir.into(),
        }
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    pub fn backup(&self) -> &Path {
        &self.backup
    }

    pub fn lib_dir(&self) -> &Path {
        &self.lib_dir
    }
}

/// What a successful build leaves behind in the working copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    /// Freshly built artifact
    pub artifact: PathBuf,
    /// Dependency libraries produced by the build
    pub lib_dir: PathBuf,
}

impl BuildOutput {
    /// Resolve build output paths relative to a working copy root
    pub fn under(root: &Path, artifact: &Path, lib_dir: &Path) -> Self {
        Self {
            artifact: root.join(artifact),
            lib_dir: root.join(lib_dir),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_path_appends_bak() {
        let set = ArtifactSet::new("/opt/bot/bot.jar", "/opt/bot/lib");
        assert_eq!(set.backup(), Path::new("/opt/bot/bot.jar.bak"));
        assert_eq!(set.lib_dir(), Path::new("/opt/bot/lib"));
    }

    #[test]
    fn test_credential_kind_parsing() {
        assert_eq!("ssh".parse::<CredentialKind>().unwrap(), CredentialKind::Ssh);
        assert_eq!("NONE".parse::<CredentialKind>().unwrap(), CredentialKind::None);
        assert!("token".parse::<CredentialKind>().is_err());
    }

    #[test]
    fn test_excerpt_keeps_tail() {
        let log = format!("{}BUILD FAILURE", "x".repeat(100));
        let result = BuildResult::new(false, log, Duration::from_secs(1));
        let excerpt = result.excerpt(13);
        assert!(excerpt.ends_with("BUILD FAILURE"));
        assert!(excerpt.starts_with("...[truncated 100 chars]"));
    }

    #[test]
    fn test_excerpt_short_log_unchanged() {
        let result = BuildResult::new(true, "ok".to_string(), Duration::ZERO);
        assert_eq!(result.excerpt(100), "ok");
    }

    #[test]
    fn test_excerpt_multibyte_boundary() {
        let result = BuildResult::new(false, "ééééé".to_string(), Duration::ZERO);
        assert!(result.excerpt(2).ends_with("éé"));
    }

    #[test]
    fn test_short_id() {
        let branch = BranchRef {
            name: "master".into(),
            tracking: "origin/master".into(),
            commit_id: "0123456789abcdef0123".into(),
        };
        assert_eq!(branch.short_id(), "0123456789ab");
    }
}
