//! Working copy management
//!
//! [`RepositoryManager::get_ready`] guarantees a structurally valid working copy
//! at the configured path: an existing one is reopened without touching the
//! network, anything else is wiped and cloned afresh.

use respawn_core::{CredentialKind, RepositoryHandle, Result, UpdateError};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

use crate::command::GitExecutor;
use crate::failure::remote_error;
use crate::transport::Transports;

/// Manager for the local working copy
pub struct RepositoryManager<E: GitExecutor> {
    executor: E,
    transports: Transports,
}

impl<E: GitExecutor> RepositoryManager<E> {
    pub fn new(executor: E, transports: Transports) -> Self {
        Self {
            executor,
            transports,
        }
    }

    /// Ensure a valid working copy of `remote_url` exists at `local_path`
    ///
    /// Never returns a partially prepared handle: the first failure is
    /// propagated.
    #[instrument(skip(self), fields(path = %local_path.display()))]
    pub async fn get_ready(
        &self,
        local_path: &Path,
        remote_url: &str,
        credential: CredentialKind,
    ) -> Result<RepositoryHandle> {
        tokio::fs::create_dir_all(local_path).await.map_err(|e| {
            UpdateError::Repo(format!(
                "Failed to create working copy directory {}: {}",
                local_path.display(),
                e
            ))
        })?;

        if is_valid_repository(local_path) {
            info!("Opening existing working copy");
        } else {
            warn!("No valid repository at {}, cloning {}", local_path.display(), remote_url);
            self.clone_into(local_path, remote_url, credential).await?;
        }

        Ok(RepositoryHandle {
            path: local_path.to_path_buf(),
            remote_url: remote_url.to_string(),
            credential,
        })
    }

    async fn clone_into(
        &self,
        local_path: &Path,
        remote_url: &str,
        credential: CredentialKind,
    ) -> Result<()> {
        // Resolve first so missing credentials never cost us the old directory
        let transport = self.transports.resolve(credential)?;

        clear_directory(local_path).await?;

        let output = self
            .executor
            .exec(local_path, &["clone", "--", remote_url, "."], Some(&transport))
            .await?;
        if !output.success {
            return Err(remote_error(
                &format!("Failed to clone {}", remote_url),
                &output,
                UpdateError::Repo,
            ));
        }

        info!("Cloned {} into {}", remote_url, local_path.display());
        Ok(())
    }
}

/// A repository is valid when at least one reference points at an object
/// that exists. Empty or object-less repositories are invalid.
pub fn is_valid_repository(path: &Path) -> bool {
    let repo = match gix::open(path) {
        Ok(repo) => repo,
        Err(e) => {
            debug!("No repository at {}: {}", path.display(), e);
            return false;
        }
    };

    let Ok(platform) = repo.references() else {
        return false;
    };
    let Ok(references) = platform.all() else {
        return false;
    };

    for reference in references.flatten() {
        if let Some(id) = reference.try_id() {
            if !id.is_null() && repo.has_object(id) {
                return true;
            }
        }
    }

    debug!("Repository at {} has no resolvable references", path.display());
    false
}

/// Commit currently checked out in a working copy
pub fn head_commit(handle: &RepositoryHandle) -> Result<String> {
    let repo = gix::open(&handle.path).map_err(|e| {
        UpdateError::Repo(format!(
            "Failed to open repository {}: {}",
            handle.path.display(),
            e
        ))
    })?;
    let id = repo
        .head_id()
        .map_err(|e| UpdateError::Git(format!("Failed to resolve HEAD: {}", e)))?;
    Ok(id.detach().to_string())
}

/// Remove everything inside `path`, keeping the directory itself
async fn clear_directory(path: &Path) -> Result<()> {
    if path.parent().is_none() {
        return Err(UpdateError::Repo(format!(
            "Refusing to clear {}",
            path.display()
        )));
    }

    let repo_error = |e: std::io::Error| {
        UpdateError::Repo(format!("Failed to clear {}: {}", path.display(), e))
    };

    let mut entries = tokio::fs::read_dir(path).await.map_err(repo_error)?;
    while let Some(entry) = entries.next_entry().await.map_err(repo_error)? {
        let file_type = entry.file_type().await.map_err(repo_error)?;
        if file_type.is_dir() {
            tokio::fs::remove_dir_all(entry.path()).await.map_err(repo_error)?;
        } else {
            tokio::fs::remove_file(entry.path()).await.map_err(repo_error)?;
        }
    }
    Ok(())
}
