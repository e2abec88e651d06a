//! Git fixtures for the tests: bare remotes in `test_directories/`, with
//! a second clone to push new commits from.

use duct::cmd;
use rand::distributions::{Alphanumeric, DistString};
use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
};

pub type TestResult = Result<(), Box<dyn Error>>;

pub fn get_random_id() -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), 16)
}

/// A random directory under `test_directories`, removed on drop.
pub struct TestDirectory {
    pub base: PathBuf,
}

impl TestDirectory {
    pub fn new() -> Result<Self, Box<dyn Error>> {
        let base = PathBuf::from(format!("test_directories/{}", get_random_id()));
        fs::create_dir_all(&base)?;

        Ok(TestDirectory { base })
    }

    pub fn cache(&self) -> PathBuf {
        self.base.join("cache")
    }

    /// Creates a bare remote `name` with one commit and returns its absolute url.
    pub fn create_remote(&self, name: &str, seconds: i64) -> Result<String, Box<dyn Error>> {
        let remote = self.base.join(name);
        let other = self.other(name);

        fs::create_dir_all(&remote)?;
        cmd!("git", "init", "--bare").dir(&remote).read()?;
        cmd!("git", "clone", &remote, &other).read()?;
        commit(&other, "file", "hello world", seconds)?;

        Ok(fs::canonicalize(&remote)?.to_string_lossy().to_string())
    }

    /// Pushes a new commit to the remote `name`.
    pub fn push_change(&self, name: &str, contents: &str, seconds: i64) -> TestResult {
        commit(&self.other(name), "file", contents, seconds)
    }

    fn other(&self, name: &str) -> PathBuf {
        self.base.join(format!("{name}-other"))
    }
}

impl Drop for TestDirectory {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.base);
    }
}

pub fn commit(directory: &Path, file: &str, contents: &str, seconds: i64) -> TestResult {
    fs::write(directory.join(file), contents)?;
    cmd!("git", "add", "-A").dir(directory).read()?;
    cmd!(
        "git",
        "-c",
        "user.name=test",
        "-c",
        "user.email=test@test.com",
        "commit",
        "-m",
        contents
    )
    .env("GIT_AUTHOR_DATE", format!("{seconds} +0000"))
    .dir(directory)
    .read()?;
    cmd!("git", "push", "origin", "HEAD").dir(directory).read()?;

    Ok(())
}
