use super::{SecretError, SecretStore};
use log::trace;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{collections::HashMap, time::Duration};
use ureq::{Agent, AgentBuilder};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Reads project secrets from the Vault HTTP API.
///
/// The secrets of a project are stored at `<prefix>/<project>`, both KV version 1
/// and version 2 engines are supported. Only string values are kept.
pub struct VaultStore {
    agent: Agent,
    address: String,
    token: String,
    namespace: Option<String>,
    prefix: String,
}

#[derive(Deserialize)]
struct SecretResponse {
    #[serde(default)]
    data: Map<String, Value>,
}

impl VaultStore {
    pub fn new(address: &str, token: &str, namespace: Option<&str>, prefix: &str) -> Self {
        VaultStore {
            agent: AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            address: address.trim_end_matches('/').to_string(),
            token: token.to_string(),
            namespace: namespace.map(String::from),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    fn url(&self, name: &str) -> String {
        format!("{}/v1/{}/{}", self.address, self.prefix, name)
    }
}

/// KV version 2 wraps the secrets in another `data` object, next to the `metadata`.
fn unwrap_secrets(mut data: Map<String, Value>) -> HashMap<String, String> {
    if data.contains_key("metadata") {
        if let Some(Value::Object(inner)) = data.remove("data") {
            data = inner;
        }
    }

    data.into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(value) => Some((key, value)),
            _ => None,
        })
        .collect()
}

impl SecretStore for VaultStore {
    fn list(&self, name: &str) -> Result<Option<HashMap<String, String>>, SecretError> {
        let url = self.url(name);
        trace!("Reading secrets from {url}.");

        let mut request = self.agent.get(&url).set("X-Vault-Token", &self.token);
        if let Some(namespace) = &self.namespace {
            request = request.set("X-Vault-Namespace", namespace);
        }

        match request.call() {
            Ok(response) => {
                let body: SecretResponse = response
                    .into_json()
                    .map_err(|err| SecretError::InvalidResponse(err.to_string()))?;
                Ok(Some(unwrap_secrets(body.data)))
            }
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(ureq::Error::Status(code, _)) => Err(SecretError::Request(format!(
                "{url} returned status code {code}"
            ))),
            Err(err) => Err(SecretError::Request(err.to_string())),
        }
    }
}
