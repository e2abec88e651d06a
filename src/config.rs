use crate::checks::git::repo_path;
use duration_string::DurationString;
use serde::{Deserialize, Deserializer};
use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;

/// A custom error for describing the error cases for the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file cannot be read.
    #[error("cannot read {0}: {1}")]
    Read(String, #[source] std::io::Error),
    /// The configuration file is not valid JSON or has missing fields.
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// The configuration parsed, but doesn't make sense.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A git repository with the commands to run on every new commit and on shutdown.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Target {
    /// An optional label for the logs.
    #[serde(default)]
    pub name: Option<String>,
    /// The repository to watch, anything that git can clone.
    #[serde(alias = "repo_url")]
    pub url: String,
    /// The command to run on every new commit.
    pub command: Vec<String>,
    /// The command to run when the daemon shuts down.
    #[serde(default)]
    pub shutdown_command: Vec<String>,
    /// Environment variables for this target only. Don't store credentials here!
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Write the resolved environment to a `.env` file in the working copy.
    #[serde(default)]
    pub write_env: bool,
    /// Run the command once on startup, even without a new commit.
    #[serde(default = "default_initial_run")]
    pub initial_run: bool,
}

impl Target {
    /// The name of the target if present, otherwise the repository url.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The daemon configuration, loaded from `machinehead.json`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub targets: Vec<Target>,
    /// Time between two checks of the repositories, e.g. `"30s"` or `"1m"`.
    #[serde(
        default = "default_check_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub check_interval: Duration,
    #[serde(default = "default_cache_directory")]
    pub cache_directory: PathBuf,
    #[serde(default)]
    pub vault_address: Option<String>,
    #[serde(default)]
    pub vault_token: Option<String>,
    #[serde(default)]
    pub vault_namespace: Option<String>,
    /// The path in Vault that the project secrets are read from.
    #[serde(default = "default_vault_prefix")]
    pub vault_prefix: String,
    /// The global environment file, shared between every target.
    #[serde(default = "default_env_file")]
    pub env_file: PathBuf,
    /// The socket that marks a running instance.
    #[serde(default = "default_socket")]
    pub socket: PathBuf,
    /// An additional line for `~/.ssh/known_hosts`.
    #[serde(default)]
    pub known_host: Option<String>,
}

fn default_initial_run() -> bool {
    true
}

fn default_check_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_cache_directory() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_vault_prefix() -> String {
    String::from("secret")
}

fn default_env_file() -> PathBuf {
    PathBuf::from(".env")
}

fn default_socket() -> PathBuf {
    PathBuf::from("machinehead.sock")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Text(DurationString),
    Nanoseconds(u64),
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawDuration::deserialize(deserializer)? {
        RawDuration::Text(duration) => duration.into(),
        RawDuration::Nanoseconds(nanos) => Duration::from_nanos(nanos),
    })
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = serde_json::from_str(s)?;
        config.validate()?;

        Ok(config)
    }
}

impl Config {
    /// Reads and validates the configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)
            .map_err(|err| ConfigError::Read(path.to_string_lossy().to_string(), err))?;

        contents.parse()
    }

    /// The repository urls in the configured order.
    pub fn target_urls(&self) -> Vec<String> {
        self.targets.iter().map(|target| target.url.clone()).collect()
    }

    pub fn find_target(&self, url: &str) -> Option<&Target> {
        self.targets.iter().find(|target| target.url == url)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::Invalid(String::from(
                "there has to be at least one target",
            )));
        }
        if self.check_interval.is_zero() {
            return Err(ConfigError::Invalid(String::from(
                "check_interval has to be longer than zero",
            )));
        }

        let mut urls = HashSet::new();
        let mut paths = HashSet::new();
        for target in &self.targets {
            if target.command.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "target {target} doesn't have a command"
                )));
            }
            if !urls.insert(target.url.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "{} is configured multiple times",
                    target.url
                )));
            }

            let path = repo_path(&self.cache_directory, &target.url)
                .map_err(|err| ConfigError::Invalid(err.to_string()))?;
            if !paths.insert(path.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "{} would be cloned into {}, which is already used by another target",
                    target.url,
                    path.to_string_lossy()
                )));
            }
        }

        Ok(())
    }
}
