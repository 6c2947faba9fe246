//! Configuration management for respawn
//!
//! Configuration is owned by the operator and read-only to the pipeline. It is
//! loaded once from a TOML file; SSH credential paths are only *named* here and
//! are read lazily by the transport when a remote is first contacted.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{ArtifactSet, BuildOutput, CredentialKind};
use crate::{Result, UpdateError};

/// Top-level respawn configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespawnConfig {
    /// Source repository settings
    pub repository: RepositoryConfig,

    /// SSH credential material (required when `repository.credential = "ssh"`)
    #[serde(default)]
    pub ssh: Option<SshConfig>,

    /// Git invocation settings
    #[serde(default)]
    pub git: GitConfig,

    /// Build tool settings
    pub build: BuildConfig,

    /// Live artifact locations
    pub install: InstallConfig,
}

/// Remote and working copy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Remote repository URL
    pub remote_url: String,

    /// Local working copy path
    pub local_path: PathBuf,

    /// Credential kind for the remote
    #[serde(default)]
    pub credential: CredentialKind,

    /// Branch used when `update` is given no argument
    #[serde(default = "default_branch")]
    pub default_branch: String,
}

/// SSH identity files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Private key file
    pub private_key: PathBuf,

    /// Known-hosts file
    pub known_hosts: PathBuf,
}

/// Git invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Deadline for any single git command
    #[serde(default = "default_git_timeout")]
    pub timeout_secs: u64,
}

/// Build tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Build tool executable
    #[serde(default = "default_build_tool")]
    pub tool: String,

    /// Arguments passed before the goals
    #[serde(default = "default_build_args")]
    pub args: Vec<String>,

    /// Ordered build goals
    #[serde(default = "default_goals")]
    pub goals: Vec<String>,

    /// Built artifact, relative to the working copy
    pub artifact: PathBuf,

    /// Built dependency directory, relative to the working copy
    pub lib_dir: PathBuf,

    /// Deadline for the whole build
    #[serde(default = "default_build_timeout")]
    pub timeout_secs: u64,
}

/// Live artifact locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Production artifact path
    pub artifact: PathBuf,

    /// Production dependency directory
    pub lib_dir: PathBuf,
}

// Default value providers
fn default_branch() -> String {
    "master".to_string()
}

fn default_git_timeout() -> u64 {
    300
}

fn default_build_tool() -> String {
    "mvn".to_string()
}

fn default_build_args() -> Vec<String> {
    vec!["-B".to_string()]
}

fn default_goals() -> Vec<String> {
    vec!["clean".to_string(), "package".to_string()]
}

fn default_build_timeout() -> u64 {
    1800
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_git_timeout(),
        }
    }
}

impl GitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl BuildConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RespawnConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            UpdateError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| UpdateError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check structural requirements that serde cannot express
    ///
    /// Missing `[ssh]` paths are not reported here: they surface as a
    /// transport error when the remote is first contacted.
    pub fn validate(&self) -> Result<()> {
        if self.repository.remote_url.trim().is_empty() {
            return Err(UpdateError::Config(
                "repository.remote_url cannot be empty".to_string(),
            ));
        }
        if self.repository.local_path.as_os_str().is_empty() {
            return Err(UpdateError::Config(
                "repository.local_path cannot be empty".to_string(),
            ));
        }
        if self.build.goals.is_empty() {
            return Err(UpdateError::Config(
                "build.goals must name at least one goal".to_string(),
            ));
        }
        if self.build.tool.trim().is_empty() {
            return Err(UpdateError::Config("build.tool cannot be empty".to_string()));
        }
        if self.build.artifact.is_absolute() || self.build.lib_dir.is_absolute() {
            return Err(UpdateError::Config(
                "build.artifact and build.lib_dir must be relative to the working copy"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Live artifact paths derived from `[install]`
    pub fn artifact_set(&self) -> ArtifactSet {
        ArtifactSet::new(&self.install.artifact, &self.install.lib_dir)
    }

    /// Build output paths inside the working copy
    pub fn build_output(&self) -> BuildOutput {
        BuildOutput::under(
            &self.repository.local_path,
            &self.build.artifact,
            &self.build.lib_dir,
        )
    }
}
