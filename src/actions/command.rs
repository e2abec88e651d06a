use super::{ExecuteError, Executor};
use crate::config::Target;
use duct::cmd;
use log::{debug, trace};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};

/// The file that the environment is written to, if the target asks for it.
const ENV_FILE: &str = ".env";

/// Runs the target commands directly, without a shell.
///
/// The child inherits the environment of the daemon, overridden by the resolved
/// environment and then by the environment of the target. Both the stdout and
/// stderr are captured and logged.
#[derive(Debug, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        CommandExecutor
    }

    fn run_inner(
        &self,
        command: &[String],
        directory: &Path,
        env: &HashMap<String, String>,
    ) -> Result<String, ExecuteError> {
        let Some((program, args)) = command.split_first() else {
            return Ok(String::new());
        };

        let mut expression = cmd(program, args)
            .dir(directory)
            .stderr_to_stdout()
            .stdout_capture()
            .unchecked();
        for (key, value) in env {
            expression = expression.env(key, value);
        }
        trace!("Running {expression:?}.");

        let output = expression.run()?;
        let output_str = String::from_utf8_lossy(&output.stdout).trim_end().to_string();

        if output.status.success() {
            Ok(output_str)
        } else {
            Err(ExecuteError::NonZeroExitcode(
                output.status.code().unwrap_or(-1),
                output_str,
            ))
        }
    }
}

/// Writes the environment as sorted `KEY=VALUE` lines into `.env` in the directory.
fn write_env_file(directory: &Path, env: &HashMap<String, String>) -> Result<(), ExecuteError> {
    let path = directory.join(ENV_FILE);
    let sorted: BTreeMap<_, _> = env.iter().collect();
    let contents: String = sorted
        .into_iter()
        .map(|(key, value)| format!("{key}={value}\n"))
        .collect();

    fs::write(&path, contents)
        .map_err(|err| ExecuteError::WriteEnvFailed(path.to_string_lossy().to_string(), err))
}

impl Executor for CommandExecutor {
    fn execute(
        &self,
        target: &Target,
        directory: &Path,
        mut env: HashMap<String, String>,
        shutdown: bool,
    ) -> Result<(), ExecuteError> {
        let command = if shutdown {
            &target.shutdown_command
        } else {
            &target.command
        };
        if command.is_empty() {
            trace!("There is no command to run for {target}.");
            return Ok(());
        }

        env.extend(target.env.clone());
        if target.write_env {
            write_env_file(directory, &env)?;
        }

        debug!(
            "Running {} in directory {}.",
            command.join(" "),
            directory.to_string_lossy()
        );
        let output = self.run_inner(command, directory, &env)?;

        debug!("Command success, output:");
        output.lines().for_each(|line| {
            debug!("{line}");
        });

        Ok(())
    }
}
