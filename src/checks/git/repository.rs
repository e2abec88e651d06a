use super::{credentials::CredentialHandler, GitError};
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    AnnotatedCommit, AutotagOption, ErrorCode, FetchOptions, RemoteCallbacks, Repository,
    StatusOptions,
};
use std::path::{Path, PathBuf};
use time::{OffsetDateTime, UtcOffset};

/// The remote that events are reported for.
const ORIGIN: &str = "origin";

/// The state of the current HEAD, which is reported in the events.
#[derive(Debug, PartialEq, Eq)]
pub struct HeadInformation {
    pub remote_url: String,
    pub workdir: PathBuf,
    pub timestamp: OffsetDateTime,
}

pub struct GitRepository {
    repo: Repository,
}

fn fetch_options<'a>() -> Result<FetchOptions<'a>, GitError> {
    let git_config = git2::Config::open_default().map_err(|_| GitError::ConfigLoadingFailed)?;
    let mut credentials = CredentialHandler::new(git_config);

    let mut cb = RemoteCallbacks::new();
    cb.credentials(move |url, username, allowed| credentials.next(url, username, allowed));

    let mut opts = FetchOptions::new();
    opts.remote_callbacks(cb);
    opts.download_tags(AutotagOption::All);

    Ok(opts)
}

impl GitRepository {
    /// Opens the repository at the path. Returns `None` if there is no repository yet.
    pub fn open(directory: &Path) -> Result<Option<Self>, GitError> {
        match Repository::open(directory) {
            Ok(repo) => Ok(Some(GitRepository { repo })),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => Err(GitError::NotAGitRepository(
                directory.to_string_lossy().to_string(),
                err.message().trim().to_string(),
            )),
        }
    }

    /// Finds the repository containing the directory, searching upwards.
    pub fn discover(directory: &Path) -> Result<Self, GitError> {
        let repo = Repository::discover(directory).map_err(|err| {
            GitError::NotAGitRepository(
                directory.to_string_lossy().to_string(),
                err.message().trim().to_string(),
            )
        })?;

        Ok(GitRepository { repo })
    }

    pub fn origin_url(&self) -> Result<String, GitError> {
        let remote = self.repo.find_remote(ORIGIN).map_err(|_| GitError::NoOrigin)?;
        let url = remote.url().ok_or(GitError::NoOrigin)?;

        Ok(url.to_string())
    }

    /// Clones the full repository from the url into the directory.
    pub fn clone(url: &str, directory: &Path) -> Result<Self, GitError> {
        let repo = RepoBuilder::new()
            .fetch_options(fetch_options()?)
            .clone(url, directory)
            .map_err(|err| GitError::CloneFailed(url.to_string(), err.message().trim().to_string()))?;

        Ok(GitRepository { repo })
    }

    // Inspired from: https://github.com/rust-lang/git2-rs/blob/master/examples/pull.rs
    pub fn fetch(&self) -> Result<AnnotatedCommit<'_>, GitError> {
        let Self { repo } = self;
        let head = repo.head().map_err(|_| GitError::NoHead)?;
        let branch_name = head.shorthand().ok_or(GitError::NotOnABranch)?;
        let branch_name_ref = head.name().ok_or(GitError::NotOnABranch)?;
        let remote_buf = repo
            .branch_upstream_remote(branch_name_ref)
            .map_err(|_| GitError::NoRemoteForBranch(String::from(branch_name)))?;
        let remote_name = remote_buf
            .as_str()
            .ok_or_else(|| GitError::NoRemoteForBranch(String::from(branch_name)))?;

        let mut remote = repo
            .find_remote(remote_name)
            .map_err(|_| GitError::NoRemoteForBranch(String::from(branch_name)))?;

        remote
            .fetch(&[branch_name], Some(&mut fetch_options()?), None)
            .map_err(|err| GitError::FetchFailed(err.message().trim().to_string()))?;

        let fetch_head = repo
            .find_reference("FETCH_HEAD")
            .map_err(|err| GitError::FetchFailed(err.message().trim().to_string()))?;
        let fetch_commit = repo
            .reference_to_annotated_commit(&fetch_head)
            .map_err(|err| GitError::FetchFailed(err.message().trim().to_string()))?;

        Ok(fetch_commit)
    }

    /// Returns true for a fast-forward, false if we are already up to date.
    /// Anything else would need a merge, which we never do.
    pub fn check_if_updatable(&self, fetch_commit: &AnnotatedCommit) -> Result<bool, GitError> {
        let (analysis, _) = self
            .repo
            .merge_analysis(&[fetch_commit])
            .map_err(|_| GitError::MergeConflict)?;

        if analysis.is_up_to_date() {
            Ok(false)
        } else if analysis.is_fast_forward() {
            Ok(true)
        } else {
            Err(GitError::MergeConflict)
        }
    }

    /// Tracked files with modifications would be overwritten by the checkout.
    pub fn is_dirty(&self) -> Result<bool, GitError> {
        let mut options = StatusOptions::new();
        options.include_untracked(false).include_ignored(false);
        let statuses = self
            .repo
            .statuses(Some(&mut options))
            .map_err(|_| GitError::NoWorkdir)?;

        Ok(!statuses.is_empty())
    }

    pub fn fast_forward(&self, fetch_commit: &AnnotatedCommit) -> Result<(), GitError> {
        let Self { repo } = self;
        let head = repo.head().map_err(|_| GitError::NoHead)?;
        let branch_name = head.shorthand().ok_or(GitError::NotOnABranch)?;

        let branch_refname = format!("refs/heads/{branch_name}");
        let mut branch_ref = repo
            .find_reference(&branch_refname)
            .map_err(|_| GitError::NotOnABranch)?;

        let fetch_id = fetch_commit.id();
        let msg = format!("Fast-Forward: Setting {branch_refname} to id: {fetch_id}");
        branch_ref
            .set_target(fetch_id, &msg)
            .map_err(|_| GitError::FailedSettingHead(fetch_id.to_string()))?;
        repo.set_head(&branch_refname)
            .map_err(|_| GitError::FailedSettingHead(fetch_id.to_string()))?;
        repo.checkout_head(Some(CheckoutBuilder::default().force()))
            .map_err(|_| GitError::FailedSettingHead(fetch_id.to_string()))?;

        Ok(())
    }

    /// Pulls with fast-forward only. Returns false if there was nothing to pull.
    pub fn pull(&self) -> Result<bool, GitError> {
        let fetch_commit = self.fetch()?;
        if !self.check_if_updatable(&fetch_commit)? {
            return Ok(false);
        }
        if self.is_dirty()? {
            return Err(GitError::DirtyWorkingTree);
        }
        self.fast_forward(&fetch_commit)?;

        Ok(true)
    }

    /// Reads the origin url, the working copy root and the author time of HEAD.
    pub fn head_information(&self) -> Result<HeadInformation, GitError> {
        let Self { repo } = self;
        let remote_url = self.origin_url()?;

        // Collecting the components drops the trailing separator libgit2 adds.
        let workdir: PathBuf = repo
            .workdir()
            .ok_or(GitError::NoWorkdir)?
            .components()
            .collect();

        let commit = repo
            .head()
            .and_then(|head| head.peel_to_commit())
            .map_err(|_| GitError::NoHead)?;
        let when = commit.author().when();
        let offset = UtcOffset::from_whole_seconds(when.offset_minutes() * 60)
            .unwrap_or(UtcOffset::UTC);
        let timestamp = OffsetDateTime::from_unix_timestamp(when.seconds())
            .map_err(|_| GitError::NoHead)?
            .to_offset(offset);

        Ok(HeadInformation {
            remote_url,
            workdir,
            timestamp,
        })
    }
}
