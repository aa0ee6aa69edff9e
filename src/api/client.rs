//! Purpose: Define the public client entry point for reads, writes, queries, and transactions.
//! Exports: `Datastore`, `ApiResult`.
//! Role: Plain (non-transactional) request context bound to one project and database.
//! Invariants: A `Datastore` is only built from a validated `ClientConfig`.
//! Invariants: Keys and queries created here carry the configured default namespace.
#![allow(clippy::result_large_err)]

use std::ops::Deref;
use std::sync::Arc;

use super::config::ClientConfig;
use super::remote::HttpRpcClient;
use super::request::{ClientInner, RequestOrchestrator, Role};
use super::rpc::RpcClient;
use super::transaction::{Transaction, TransactionOptions};
use crate::core::error::Error;
use crate::core::key::{Key, PathElement};
use crate::core::query::{AggregateQuery, Query};

pub type ApiResult<T> = Result<T, Error>;

/// Plain client context. Writes commit immediately; see [`Transaction`] for buffered writes.
///
/// All request operations live on [`RequestOrchestrator`] and are reached through `Deref`.
#[derive(Clone)]
pub struct Datastore {
    inner: Arc<ClientInner>,
    orchestrator: RequestOrchestrator,
}

impl Datastore {
    pub fn new(config: ClientConfig, rpc: Arc<dyn RpcClient>) -> ApiResult<Self> {
        config.validate()?;
        let inner = Arc::new(ClientInner { rpc, config });
        let orchestrator = RequestOrchestrator::with_role(Arc::clone(&inner), Role::PlainClient);
        Ok(Self {
            inner,
            orchestrator,
        })
    }

    /// Build a client that talks JSON over HTTP to the configured endpoint or emulator.
    pub fn connect(config: ClientConfig) -> ApiResult<Self> {
        let rpc = HttpRpcClient::from_config(&config)?;
        Self::new(config, Arc::new(rpc))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Key from a full path, placed in the default namespace.
    pub fn key(&self, path: Vec<PathElement>) -> ApiResult<Key> {
        let key = Key {
            namespace: self.inner.config.namespace.clone(),
            path,
        };
        key.validate_shape()?;
        Ok(key)
    }

    pub fn incomplete_key(&self, kind: impl Into<String>) -> Key {
        Key {
            namespace: self.inner.config.namespace.clone(),
            ..Key::incomplete(kind)
        }
    }

    pub fn create_query(&self, kind: impl Into<String>) -> Query {
        let query = Query::new(kind);
        match &self.inner.config.namespace {
            Some(namespace) => query.namespace(namespace.clone()),
            None => query,
        }
    }

    pub fn create_aggregation_query(&self, query: Query) -> AggregateQuery {
        AggregateQuery::new(query)
    }

    pub fn transaction(&self, options: TransactionOptions) -> Transaction {
        Transaction::new(Arc::clone(&self.inner), options)
    }
}

impl Deref for Datastore {
    type Target = RequestOrchestrator;

    fn deref(&self) -> &Self::Target {
        &self.orchestrator
    }
}

#[cfg(test)]
mod tests {
    use super::Datastore;
    use crate::api::config::ClientConfig;
    use crate::api::rpc::{CallOptions, Method, RpcClient};
    use crate::core::error::{Error, ErrorKind};
    use crate::core::key::{KeyId, PathElement};
    use async_trait::async_trait;
    use serde_json::Value as JsonValue;
    use std::sync::Arc;

    struct Unreachable;

    #[async_trait]
    impl RpcClient for Unreachable {
        async fn invoke(
            &self,
            method: Method,
            _request: JsonValue,
            _options: &CallOptions,
        ) -> Result<JsonValue, Error> {
            Err(Error::new(ErrorKind::Unavailable).with_method(method.as_str()))
        }
    }

    fn client(config: ClientConfig) -> Datastore {
        Datastore::new(config, Arc::new(Unreachable)).expect("client")
    }

    #[test]
    fn default_namespace_applies_to_keys_and_queries() {
        let datastore = client(ClientConfig::new("demo").with_namespace("tenant"));
        let key = datastore
            .key(vec![PathElement::new("Task", Some(KeyId::Id(5)))])
            .expect("key");
        assert_eq!(key.namespace.as_deref(), Some("tenant"));
        assert_eq!(
            datastore.incomplete_key("Task").namespace.as_deref(),
            Some("tenant")
        );
        assert_eq!(
            datastore.create_query("Task").namespace.as_deref(),
            Some("tenant")
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = Datastore::new(ClientConfig::new(""), Arc::new(Unreachable))
            .err()
            .expect("err");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn keys_need_a_path() {
        let datastore = client(ClientConfig::new("demo"));
        assert!(datastore.key(Vec::new()).is_err());
    }
}
