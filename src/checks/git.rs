use self::repository::GitRepository;
use super::{Check, CheckError, WatchEvent};
use log::{debug, trace};
use std::path::{Path, PathBuf};
use thiserror::Error;

mod credentials;
mod known_hosts;
mod repository;

pub use known_hosts::setup_known_hosts;

/// A check to clone or pull one repository in the cache directory.
///
/// The first check clones the repository, every later one fetches and
/// fast-forwards the current branch. An event is returned whenever HEAD moves
/// (and for the clone itself, if initial events are enabled).
pub struct RepoWatcher {
    url: String,
    path: PathBuf,
    initial_event: bool,
}

/// A custom error describing the error cases for the RepoWatcher.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository url doesn't have a last path segment to name the clone after.
    #[error("cannot derive a directory name from {0}")]
    InvalidUrl(String),
    /// The directory exists, but cannot be opened as a git repository.
    #[error("{0} is not a valid git repository ({1})")]
    NotAGitRepository(String, String),
    /// Cloning failed. This can be a network failure, authentication error or a wrong url.
    #[error("cannot clone {0} ({1})")]
    CloneFailed(String, String),
    /// Cannot parse HEAD, either stuck an unborn branch or some deleted reference
    #[error("HEAD is invalid, probably points to invalid commit")]
    NoHead,
    /// There is no branch in the repository currently.
    #[error("repository is not on a branch")]
    NotOnABranch,
    /// There is no remote for the current branch.
    #[error("branch {0} doesn't have a remote")]
    NoRemoteForBranch(String),
    /// The repository has no `origin` remote to report in the events.
    #[error("repository doesn't have an origin remote")]
    NoOrigin,
    /// The repository is bare, so there is nothing to deploy from.
    #[error("repository doesn't have a working directory")]
    NoWorkdir,
    /// There are changes in the directory, avoiding pulling. This is a safety mechanism to avoid pulling
    /// over local changes, to not overwrite anything important.
    #[error("there are uncommited changes in the directory")]
    DirtyWorkingTree,
    /// Cannot load the git config
    #[error("cannot load git config")]
    ConfigLoadingFailed,
    /// Cannot create the ssh config
    #[error("cannot create ssh config")]
    SshConfigFailed,
    /// Cannot fetch the current branch. This can be a network failure, authentication error or many other things.
    #[error("cannot fetch ({0})")]
    FetchFailed(String),
    /// The local branch diverged from the remote, it cannot be fast-forwarded.
    #[error("cannot update branch, this is likely a merge conflict")]
    MergeConflict,
    /// Cannot set the HEAD to the fetch commit.
    #[error("could not set HEAD to fetch commit {0}")]
    FailedSettingHead(String),
}

impl From<GitError> for CheckError {
    fn from(value: GitError) -> Self {
        match value {
            GitError::InvalidUrl(_)
            | GitError::NotAGitRepository(_, _)
            | GitError::NoHead
            | GitError::NotOnABranch
            | GitError::NoRemoteForBranch(_)
            | GitError::NoOrigin
            | GitError::NoWorkdir => CheckError::Misconfigured(value.to_string()),
            GitError::ConfigLoadingFailed | GitError::SshConfigFailed => {
                CheckError::PermissionDenied(value.to_string())
            }
            GitError::DirtyWorkingTree | GitError::MergeConflict => {
                CheckError::Conflict(value.to_string())
            }
            GitError::CloneFailed(_, _)
            | GitError::FetchFailed(_)
            | GitError::FailedSettingHead(_) => CheckError::FailedUpdate(value.to_string()),
        }
    }
}

/// Returns the directory of the clone of `url` inside the `cache` directory.
///
/// The directory is named after the last path segment of the url, so
/// `https://github.com/org/app` and `./repos/app` both map to `<cache>/app`.
pub fn repo_path(cache: &Path, url: &str) -> Result<PathBuf, GitError> {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();
    let name = without_query
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\', ':'])
        .next()
        .unwrap_or_default();

    match name {
        "" | "." | ".." => Err(GitError::InvalidUrl(url.to_string())),
        name => Ok(cache.join(name)),
    }
}

/// Returns the `origin` url of the repository that contains `directory`.
pub fn discover_origin(directory: &Path) -> Result<String, GitError> {
    GitRepository::discover(directory)?.origin_url()
}

/// Clones over ssh need the host in `known_hosts`, other transports don't.
pub fn is_ssh_url(url: &str) -> bool {
    if url.starts_with("ssh://") || url.starts_with("git+ssh://") {
        return true;
    }
    if url.contains("://") {
        return false;
    }

    // The scp-like syntax, e.g. git@github.com:org/app.git
    match url.split_once(':') {
        Some((host, _)) => host.len() > 1 && !host.contains(['/', '\\']),
        None => false,
    }
}

impl RepoWatcher {
    /// Creates a watcher for the url, cloning into a directory under `cache`.
    pub fn new(url: &str, cache: &Path, initial_event: bool) -> Result<Self, CheckError> {
        let path = repo_path(cache, url)?;

        Ok(RepoWatcher {
            url: url.to_string(),
            path,
            initial_event,
        })
    }

    fn event(repo: &GitRepository, initial: bool) -> Result<WatchEvent, GitError> {
        let head = repo.head_information()?;

        Ok(WatchEvent {
            url: head.remote_url,
            path: head.workdir,
            timestamp: head.timestamp,
            initial,
        })
    }

    fn check_inner(&mut self) -> Result<Option<WatchEvent>, GitError> {
        let Some(repo) = GitRepository::open(&self.path)? else {
            debug!(
                "Cloning {} into {}.",
                self.url,
                self.path.to_string_lossy()
            );
            let repo = GitRepository::clone(&self.url, &self.path)?;

            return if self.initial_event {
                Self::event(&repo, true).map(Some)
            } else {
                Ok(None)
            };
        };

        if repo.pull()? {
            Self::event(&repo, false).map(Some)
        } else {
            trace!("{} is already up to date.", self.url);
            Ok(None)
        }
    }
}

impl Check for RepoWatcher {
    fn url(&self) -> String {
        self.url.clone()
    }

    /// Clone the repository if it's missing, otherwise pull the current branch.
    fn check(&mut self) -> Result<Option<WatchEvent>, CheckError> {
        let event = self.check_inner()?;

        Ok(event)
    }
}
