use mockall::automock;
use std::path::PathBuf;
use thiserror::Error;
use time::OffsetDateTime;

/// A check to clone or pull a repository into the cache directory.
pub mod git;

/// A custom error for describing the error cases for checks
#[derive(Debug, Error)]
pub enum CheckError {
    /// Cannot run the check, because the repository or its URL is misconfigured.
    #[error("not configured correctly: {0}")]
    Misconfigured(String),
    /// Cannot run check, because there isn't enough permission.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Cannot update the check, because there is a conflict.
    /// This can be a merge conflict or local changes in the working copy.
    #[error("there is a conflict: {0}")]
    Conflict(String),
    /// Cloning or pulling the repository failed.
    #[error("failed while running: {0}")]
    FailedUpdate(String),
}

/// A detected change on one of the watched repositories.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchEvent {
    /// The `origin` remote of the local clone.
    pub url: String,
    /// The absolute root of the working copy.
    pub path: PathBuf,
    /// The author time of the new HEAD commit.
    pub timestamp: OffsetDateTime,
    /// True if the event was created from a fresh clone instead of a pull.
    pub initial: bool,
}

/// A check is a process that tests if there are any changes and updates it.
///
/// Checks may include:
///   - clone or pull a git repository ([git::RepoWatcher])
///   - etc.
#[automock]
pub trait Check: Send {
    /// The repository this check is watching.
    fn url(&self) -> String;

    /// Check if there are changes and update if necessary. It returns an event
    /// if the local copy moved to a new commit.
    fn check(&mut self) -> Result<Option<WatchEvent>, CheckError>;
}
