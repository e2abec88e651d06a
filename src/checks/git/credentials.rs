// Based on the credential handling of https://github.com/davidB/git2_credentials
// and cargo's git utilities, reduced to the non-interactive cases.

use dirs::home_dir;
use git2::{Cred, CredentialType};
use std::path::PathBuf;

const SSH_KEY_NAMES: [&str; 6] = [
    "id_dsa",
    "id_ecdsa",
    "id_ecdsa_sk",
    "id_ed25519",
    "id_ed25519_sk",
    "id_rsa",
];

const DEFAULT_USERNAME: &str = "git";

/// Produces credentials for libgit2, one candidate at a time.
///
/// libgit2 keeps calling the credential callback until it runs out of
/// attempts or we return an error, so every method is only tried once:
///
/// 1. a username (only `git`) if the URL didn't contain one,
/// 2. the ssh-agent, then every private key found in `~/.ssh` without a passphrase,
/// 3. the configured git credential helper for username and password,
/// 4. the default credentials (e.g. NTLM or Kerberos).
pub struct CredentialHandler {
    config: git2::Config,
    username_attempts: usize,
    ssh_attempts: usize,
    ssh_keys: Vec<PathBuf>,
    credential_helper_failed: Option<bool>,
}

impl CredentialHandler {
    pub fn new(config: git2::Config) -> Self {
        let ssh_dir = home_dir().unwrap_or(PathBuf::from("~")).join(".ssh");
        let ssh_keys = SSH_KEY_NAMES
            .iter()
            .map(|name| ssh_dir.join(name))
            .filter(|path| path.exists())
            .collect();

        CredentialHandler {
            config,
            username_attempts: 0,
            ssh_attempts: 0,
            ssh_keys,
            credential_helper_failed: None,
        }
    }

    fn next_ssh_key(&mut self, username: &str) -> Result<Cred, git2::Error> {
        self.ssh_attempts += 1;
        if self.ssh_attempts == 1 {
            return Cred::ssh_key_from_agent(username);
        }

        match self.ssh_keys.get(self.ssh_attempts - 2) {
            Some(key) => Cred::ssh_key(username, None, key, None),
            None => Err(git2::Error::from_str(
                "failed authentication with every ssh key",
            )),
        }
    }

    /// Returns the next credential to try for the url.
    pub fn next(
        &mut self,
        url: &str,
        username: Option<&str>,
        allowed: CredentialType,
    ) -> Result<Cred, git2::Error> {
        // libgit2 asks for a username first, when the ssh url didn't contain one.
        if allowed.contains(CredentialType::USERNAME) {
            self.username_attempts += 1;
            return if self.username_attempts == 1 {
                Cred::username(DEFAULT_USERNAME)
            } else {
                Err(git2::Error::from_str("no more usernames to try"))
            };
        }

        if allowed.contains(CredentialType::SSH_KEY) {
            return self.next_ssh_key(username.unwrap_or(DEFAULT_USERNAME));
        }

        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT)
            && self.credential_helper_failed.is_none()
        {
            let cred = Cred::credential_helper(&self.config, url, username);
            self.credential_helper_failed = Some(cred.is_err());
            return cred;
        }

        if allowed.contains(CredentialType::DEFAULT) {
            return Cred::default();
        }

        Err(git2::Error::from_str("no valid authentication available"))
    }
}
