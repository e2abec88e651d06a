use crate::config::Target;
use mockall::automock;
use std::{collections::HashMap, path::Path};
use thiserror::Error;

/// An executor that runs the target commands as child processes.
pub mod command;

/// A custom error describing the error cases for running a target command.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The process cannot be started. The parameter contains the error.
    #[error("the command cannot run: {0}")]
    ProcessFailure(#[from] std::io::Error),
    /// The command returned a non-zero exit code, usually meaning it failed to start
    /// or encountered an error. The parameters are the exit code and the failed output.
    #[error("the command returned non-zero exit code {0} with message: {1}")]
    NonZeroExitcode(i32, String),
    /// The environment cannot be written to `.env` in the working directory.
    #[error("cannot write {0}: {1}")]
    WriteEnvFailed(String, #[source] std::io::Error),
}

/// An executor runs the command of a target in its working copy.
#[automock]
pub trait Executor: Send {
    /// Runs the `command` (or the `shutdown_command` if `shutdown` is set) of the
    /// target in `directory`, with `env` overridden by the environment of the target.
    fn execute(
        &self,
        target: &Target,
        directory: &Path,
        env: HashMap<String, String>,
        shutdown: bool,
    ) -> Result<(), ExecuteError>;
}
