//! Chat command parsing
//!
//! The bot's command router hands over raw message text; only `update` and
//! `update <branch>` are recognized here. Branch names are validated later,
//! before any git command runs.

/// A recognized `update` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCommand {
    pub branch: String,
}

impl UpdateCommand {
    /// Parse `update [branch]`, tolerating a leading `!` or `/`
    ///
    /// Returns `None` for anything that is not an update command.
    pub fn parse(text: &str, default_branch: &str) -> Option<Self> {
        let text = text.trim();
        let text = text
            .strip_prefix('!')
            .or_else(|| text.strip_prefix('/'))
            .unwrap_or(text);

        let mut words = text.split_whitespace();
        let verb = words.next()?;
        if !verb.eq_ignore_ascii_case("update") {
            return None;
        }

        let branch = match (words.next(), words.next()) {
            (None, _) => default_branch.to_string(),
            (Some(branch), None) => branch.to_string(),
            (Some(_), Some(_)) => return None,
        };
        Some(Self { branch })
    }
}
