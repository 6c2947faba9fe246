//! Input validation for branch names
//!
//! Branch names arrive from chat and are passed to git as arguments, so they
//! MUST be validated first: a name like `--upload-pack=...` would otherwise be
//! read as an option.

use respawn_core::{Result, UpdateError};

/// Validate a requested branch name
///
/// Returns the input unchanged if valid.
pub fn validate_branch_name(input: &str) -> Result<&str> {
    if input.is_empty() {
        return Err(UpdateError::InvalidInput(
            "branch name cannot be empty".to_string(),
        ));
    }
    if input.starts_with('-') {
        return Err(UpdateError::InvalidInput(format!(
            "branch name cannot start with '-': '{}'",
            input
        )));
    }
    if input.contains("..") || input.contains("//") || input.contains("@{") {
        return Err(UpdateError::InvalidInput(format!(
            "branch name contains an invalid sequence: '{}'",
            input
        )));
    }
    if input.ends_with('/') || input.ends_with('.') || input.ends_with(".lock") || input.starts_with('/') {
        return Err(UpdateError::InvalidInput(format!(
            "branch name has an invalid start or end: '{}'",
            input
        )));
    }
    if input
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '.'))
    {
        Ok(input)
    } else {
        Err(UpdateError::InvalidInput(format!(
            "branch name contains unsafe characters: '{}'. Only alphanumeric, '/', '_', '-', '.' are allowed.",
            input
        )))
    }
}
