//! Artifact installation
//!
//! Swaps a freshly built artifact and its dependency directory into the live
//! locations, keeping exactly one backup generation at `<artifact>.bak`.
//!
//! Steps run in a fixed order and the first failing step aborts with
//! [`UpdateError::Install`]. Completed steps are NOT rolled back: a failure
//! while refreshing the dependency directory leaves the new artifact live
//! next to a partially refreshed directory, and operators must restore from
//! the backup by hand.
//!
//! The live artifact may still be mapped by the running process while it is
//! renamed. On Unix the running image keeps its inode; the new file takes
//! effect on the next start.

use respawn_core::{ArtifactSet, BuildOutput, Result, UpdateError};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// What an installation changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Live artifact path
    pub artifact: PathBuf,
    /// Backup path, when a previous artifact existed
    pub backup: Option<PathBuf>,
    /// SHA-256 of the installed artifact
    pub digest: String,
    /// Number of entries mirrored into the dependency directory
    pub libraries: usize,
}

/// Installer owning the live artifact locations
#[derive(Debug, Clone)]
pub struct ArtifactInstaller {
    set: ArtifactSet,
}

impl ArtifactInstaller {
    pub fn new(set: ArtifactSet) -> Self {
        Self { set }
    }

    pub fn artifact_set(&self) -> &ArtifactSet {
        &self.set
    }

    /// Install `output` over the live artifact
    ///
    /// Blocking; run it off the async executor.
    #[instrument(skip(self, output), fields(artifact = %self.set.artifact().display()))]
    pub fn install(&self, output: &BuildOutput) -> Result<InstallReport> {
        // Nothing is touched unless the build left both outputs behind
        if !output.artifact.is_file() {
            return Err(UpdateError::Install(format!(
                "Build artifact {} does not exist",
                output.artifact.display()
            )));
        }
        if !output.lib_dir.is_dir() {
            return Err(UpdateError::Install(format!(
                "Build dependency directory {} does not exist",
                output.lib_dir.display()
            )));
        }

        let backup = self.backup_live_artifact()?;

        if let Some(parent) = self.set.artifact().parent() {
            fs::create_dir_all(parent).map_err(|e| {
                install_error(format!("Failed to create {}", parent.display()), e)
            })?;
        }
        move_path(&output.artifact, self.set.artifact()).map_err(|e| {
            install_error(
                format!(
                    "Failed to move {} to {}",
                    output.artifact.display(),
                    self.set.artifact().display()
                ),
                e,
            )
        })?;
        debug!("Installed new artifact");

        let libraries = self.replace_libraries(&output.lib_dir)?;
        let digest = sha256_file(self.set.artifact()).map_err(|e| {
            install_error(
                format!("Failed to hash {}", self.set.artifact().display()),
                e,
            )
        })?;

        info!(
            "Installed {} (sha256 {}, {} libraries)",
            self.set.artifact().display(),
            digest,
            libraries
        );
        Ok(InstallReport {
            artifact: self.set.artifact().to_path_buf(),
            backup,
            digest,
            libraries,
        })
    }

    /// Move the live artifact over the single backup slot
    fn backup_live_artifact(&self) -> Result<Option<PathBuf>> {
        let artifact = self.set.artifact();
        let backup = self.set.backup();

        if !artifact.exists() {
            warn!(
                "No live artifact at {}, skipping backup",
                artifact.display()
            );
            return Ok(None);
        }

        if backup.exists() || backup.is_symlink() {
            remove_path(backup).map_err(|e| {
                install_error(format!("Failed to remove old backup {}", backup.display()), e)
            })?;
        }
        fs::rename(artifact, backup).map_err(|e| {
            install_error(
                format!(
                    "Failed to move {} to {}",
                    artifact.display(),
                    backup.display()
                ),
                e,
            )
        })?;
        debug!("Backed up live artifact to {}", backup.display());
        Ok(Some(backup.to_path_buf()))
    }

    /// Clear the live dependency directory and mirror `source` into it
    fn replace_libraries(&self, source: &Path) -> Result<usize> {
        let lib_dir = self.set.lib_dir();

        if lib_dir.is_dir() {
            let entries = fs::read_dir(lib_dir)
                .map_err(|e| install_error(format!("Failed to read {}", lib_dir.display()), e))?;
            for entry in entries {
                let entry = entry.map_err(|e| {
                    install_error(format!("Failed to read {}", lib_dir.display()), e)
                })?;
                remove_path(&entry.path()).map_err(|e| {
                    install_error(format!("Failed to clear {}", entry.path().display()), e)
                })?;
            }
        } else {
            fs::create_dir_all(lib_dir).map_err(|e| {
                install_error(format!("Failed to create {}", lib_dir.display()), e)
            })?;
        }

        let mut count = 0;
        let entries = fs::read_dir(source)
            .map_err(|e| install_error(format!("Failed to read {}", source.display()), e))?;
        for entry in entries {
            let entry = entry
                .map_err(|e| install_error(format!("Failed to read {}", source.display()), e))?;
            let target = lib_dir.join(entry.file_name());
            move_path(&entry.path(), &target).map_err(|e| {
                install_error(
                    format!(
                        "Failed to move {} to {}",
                        entry.path().display(),
                        target.display()
                    ),
                    e,
                )
            })?;
            count += 1;
        }
        debug!("Mirrored {} dependency entries", count);
        Ok(count)
    }
}

fn install_error(context: String, e: io::Error) -> UpdateError {
    UpdateError::Install(format!("{}: {}", context, e))
}

/// Rename, falling back to a staged copy across filesystems
fn move_path(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(
                "Rename {} -> {} failed ({}), copying instead",
                from.display(),
                to.display(),
                e
            );
            copy_into_place(from, to)?;
            if from.is_dir() {
                fs::remove_dir_all(from)
            } else {
                fs::remove_file(from)
            }
        }
    }
}

/// Copy `from` next to `to`, then rename it over `to`
///
/// `to` is either untouched or complete; a partial copy only ever exists
/// under a temporary name in the destination directory.
fn copy_into_place(from: &Path, to: &Path) -> io::Result<()> {
    let dir = to.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no parent directory", to.display()),
        )
    })?;

    if from.is_dir() {
        let staging = tempfile::Builder::new()
            .prefix(".respawn-")
            .tempdir_in(dir)?;
        copy_dir(from, staging.path())?;
        fs::rename(staging.path(), to)
    } else {
        let temp = tempfile::NamedTempFile::new_in(dir)?;
        fs::copy(from, temp.path())?;
        temp.persist(to).map_err(|e| e.error)?;
        Ok(())
    }
}

fn copy_dir(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
