//! Purpose: Client configuration for project routing, namespaces, and call defaults.
//! Exports: `ClientConfig`, `DEFAULT_API_ENDPOINT`.
//! Role: Single source of defaults for `Datastore` and `HttpRpcClient`.
//! Invariants: A config with an empty project id never reaches the transport.

use std::time::Duration;

use crate::core::error::Error;

pub const DEFAULT_API_ENDPOINT: &str = "https://datastore.googleapis.com";

const ENV_PROJECT_ID: &str = "DATASTORE_PROJECT_ID";
const ENV_DATABASE: &str = "DATASTORE_DATABASE";
const ENV_NAMESPACE: &str = "DATASTORE_NAMESPACE";
const ENV_EMULATOR_HOST: &str = "DATASTORE_EMULATOR_HOST";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientConfig {
    pub project_id: String,
    pub database_id: Option<String>,
    pub namespace: Option<String>,
    pub api_endpoint: String,
    pub emulator_host: Option<String>,
    pub wrap_numbers: bool,
    pub default_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: None,
            namespace: None,
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            emulator_host: None,
            wrap_numbers: false,
            default_timeout: None,
        }
    }

    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let project_id = non_empty(ENV_PROJECT_ID).ok_or_else(|| {
            Error::invalid_argument(format!("{ENV_PROJECT_ID} must be set"))
        })?;
        let mut config = Self::new(project_id);
        config.database_id = non_empty(ENV_DATABASE);
        config.namespace = non_empty(ENV_NAMESPACE);
        config.emulator_host = non_empty(ENV_EMULATOR_HOST);
        Ok(config)
    }

    pub fn with_database(mut self, database_id: impl Into<String>) -> Self {
        self.database_id = Some(database_id.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api_endpoint = endpoint.into();
        self
    }

    pub fn with_emulator_host(mut self, host: impl Into<String>) -> Self {
        self.emulator_host = Some(host.into());
        self
    }

    pub fn with_wrap_numbers(mut self, wrap_numbers: bool) -> Self {
        self.wrap_numbers = wrap_numbers;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.project_id.trim().is_empty() {
            return Err(Error::invalid_argument("project id must not be empty"));
        }
        if self.database_id.as_deref() == Some("") {
            return Err(Error::invalid_argument("database id must not be empty when set"));
        }
        Ok(())
    }

    /// Base URL requests are sent to: the emulator when configured, else the API endpoint.
    pub fn endpoint(&self) -> String {
        match &self.emulator_host {
            Some(host) if host.starts_with("http://") || host.starts_with("https://") => {
                host.clone()
            }
            Some(host) => format!("http://{host}"),
            None => self.api_endpoint.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientConfig, DEFAULT_API_ENDPOINT};
    use crate::core::error::ErrorKind;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn env_lookup_populates_fields() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("DATASTORE_PROJECT_ID", "demo"),
            ("DATASTORE_NAMESPACE", "staging"),
            ("DATASTORE_EMULATOR_HOST", "localhost:8081"),
            ("DATASTORE_DATABASE", ""),
        ]))
        .expect("config");
        assert_eq!(config.project_id, "demo");
        assert_eq!(config.namespace.as_deref(), Some("staging"));
        assert_eq!(config.database_id, None);
        assert_eq!(config.endpoint(), "http://localhost:8081");
    }

    #[test]
    fn env_lookup_requires_project() {
        let err = ClientConfig::from_lookup(lookup(&[])).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn defaults_use_public_endpoint() {
        let config = ClientConfig::new("demo");
        assert_eq!(config.endpoint(), DEFAULT_API_ENDPOINT);
        assert!(config.validate().is_ok());
        assert!(ClientConfig::new(" ").validate().is_err());
    }
}
