use crate::config::Config;
use log::debug;
use mockall::automock;
use std::{collections::HashMap, fs, io::ErrorKind, path::Path};
use thiserror::Error;

/// A secret store backed by HashiCorp Vault.
pub mod vault;

/// A custom error for describing the error cases for secrets.
#[derive(Debug, Error)]
pub enum SecretError {
    /// The secret store cannot be reached, or refused the request.
    #[error("secret request failed: {0}")]
    Request(String),
    /// The secret store answered with something unexpected.
    #[error("invalid secret response: {0}")]
    InvalidResponse(String),
    /// The global environment file exists, but cannot be read.
    #[error("cannot read environment file {0}: {1}")]
    EnvFile(String, #[source] std::io::Error),
    /// The repository directory has no name to look up the secrets with.
    #[error("cannot find project name in {0}")]
    NoProjectName(String),
    /// The secret store needs more configuration.
    #[error("secret store is not configured correctly: {0}")]
    Misconfigured(String),
}

/// A remote store holding the secrets of each project.
#[automock]
pub trait SecretStore: Send {
    /// Lists the secrets of a project. Returns `None` if the project has no secrets.
    fn list(&self, name: &str) -> Result<Option<HashMap<String, String>>, SecretError>;
}

/// Builds the environment of a deployment: the global environment file,
/// overridden by the secrets of the project if a secret store is configured.
pub struct SecretResolver {
    global: HashMap<String, String>,
    store: Option<Box<dyn SecretStore>>,
}

impl SecretResolver {
    pub fn new(global: HashMap<String, String>, store: Option<Box<dyn SecretStore>>) -> Self {
        SecretResolver { global, store }
    }

    /// Loads the global environment file and connects to Vault, if it's configured.
    pub fn from_config(config: &Config) -> Result<Self, SecretError> {
        let global = load_env_file(&config.env_file)?;
        let store = match &config.vault_address {
            Some(address) => {
                let token = config.vault_token.clone().ok_or_else(|| {
                    SecretError::Misconfigured(String::from(
                        "vault_token is required with vault_address",
                    ))
                })?;
                debug!("Reading secrets from {address}.");
                Some(Box::new(vault::VaultStore::new(
                    address,
                    &token,
                    config.vault_namespace.as_deref(),
                    &config.vault_prefix,
                )) as Box<dyn SecretStore>)
            }
            None => None,
        };

        Ok(SecretResolver::new(global, store))
    }

    /// The global environment, without any project secrets.
    pub fn global(&self) -> &HashMap<String, String> {
        &self.global
    }

    /// Resolves the environment for the repository cloned to `path`.
    ///
    /// The project is named after the last component of the path.
    pub fn resolve(&self, path: &Path) -> Result<HashMap<String, String>, SecretError> {
        let mut env = self.global.clone();

        if let Some(store) = &self.store {
            let project = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .ok_or_else(|| SecretError::NoProjectName(path.to_string_lossy().to_string()))?;

            match store.list(&project)? {
                Some(secrets) => {
                    debug!("Found {} secrets for {project}.", secrets.len());
                    env.extend(secrets);
                }
                None => debug!("There are no secrets for {project}."),
            }
        }

        Ok(env)
    }
}

/// Reads a dotenv file. A missing file is the same as an empty one.
pub fn load_env_file(path: &Path) -> Result<HashMap<String, String>, SecretError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(parse_env(&contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("There is no {}, using an empty environment.", path.to_string_lossy());
            Ok(HashMap::new())
        }
        Err(err) => Err(SecretError::EnvFile(path.to_string_lossy().to_string(), err)),
    }
}

/// Parses `KEY=VALUE` lines, skipping comments and lines without a key.
pub fn parse_env(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }

            Some((key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|value| value.strip_suffix(quote))
        {
            return inner;
        }
    }

    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestDirectory, TestResult};
    use std::path::PathBuf;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn it_should_parse_env_files() {
        let parsed = parse_env(
            "# database\nDB_HOST=localhost\nexport DB_PORT=5432\n\nDB_NAME=\"app\"\nDB_PASS='se=cret'\ninvalid line\n=nokey\n",
        );

        assert_eq!(
            env(&[
                ("DB_HOST", "localhost"),
                ("DB_PORT", "5432"),
                ("DB_NAME", "app"),
                ("DB_PASS", "se=cret"),
            ]),
            parsed
        );
    }

    #[test]
    fn it_should_load_missing_env_files_as_empty() -> TestResult {
        let directory = TestDirectory::new()?;

        assert!(load_env_file(&directory.base.join(".env"))?.is_empty());

        Ok(())
    }

    #[test]
    fn it_should_load_env_files() -> TestResult {
        let directory = TestDirectory::new()?;
        fs::write(directory.base.join(".env"), "FOO=1\n")?;

        assert_eq!(env(&[("FOO", "1")]), load_env_file(&directory.base.join(".env"))?);

        Ok(())
    }

    #[test]
    fn it_should_resolve_to_the_global_env_without_a_store() -> Result<(), SecretError> {
        let resolver = SecretResolver::new(env(&[("FOO", "1")]), None);

        assert_eq!(env(&[("FOO", "1")]), resolver.resolve(Path::new("./cache/app"))?);

        Ok(())
    }

    #[test]
    fn it_should_override_the_global_env_with_secrets() -> Result<(), SecretError> {
        let mut store = MockSecretStore::new();
        store
            .expect_list()
            .withf(|name| name == "app")
            .times(1)
            .returning(|_| Ok(Some(env(&[("FOO", "secret"), ("BAR", "2")]))));
        let resolver = SecretResolver::new(env(&[("FOO", "1"), ("BAZ", "3")]), Some(Box::new(store)));

        assert_eq!(
            env(&[("FOO", "secret"), ("BAR", "2"), ("BAZ", "3")]),
            resolver.resolve(&PathBuf::from("/var/cache/app"))?
        );

        Ok(())
    }

    #[test]
    fn it_should_keep_the_global_env_without_secrets() -> Result<(), SecretError> {
        let mut store = MockSecretStore::new();
        store.expect_list().times(1).returning(|_| Ok(None));
        let resolver = SecretResolver::new(env(&[("FOO", "1")]), Some(Box::new(store)));

        assert_eq!(env(&[("FOO", "1")]), resolver.resolve(Path::new("./cache/app"))?);

        Ok(())
    }

    #[test]
    fn it_should_fail_if_the_store_fails() {
        let mut store = MockSecretStore::new();
        store
            .expect_list()
            .returning(|_| Err(SecretError::Request(String::from("connection refused"))));
        let resolver = SecretResolver::new(HashMap::new(), Some(Box::new(store)));

        let result = resolver.resolve(Path::new("./cache/app"));

        assert!(
            matches!(result, Err(SecretError::Request(_))),
            "{result:?} should be Request"
        );
    }

    #[test]
    fn it_should_need_a_token_for_vault() -> Result<(), Box<dyn std::error::Error>> {
        let config: Config = r#"{
            "targets": [{ "url": "./a", "command": ["up"] }],
            "vault_address": "http://127.0.0.1:8200",
            "env_file": "/path/to/nowhere/.env"
        }"#
        .parse()?;

        let result = SecretResolver::from_config(&config);

        assert!(
            matches!(result, Err(SecretError::Misconfigured(_))),
            "should be Misconfigured"
        );

        Ok(())
    }
}
