//! Purpose: Define the transport capability the orchestration layer consumes.
//! Exports: `RpcClient`, `Method`, `CallOptions`.
//! Role: Seam between request orchestration and any concrete transport (HTTP, emulator, fakes).
//! Invariants: Dispatch is by method name only; payloads are JSON request/response bodies.
//! Invariants: Errors returned by a transport are surfaced to callers unmodified and never retried.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::core::error::Error;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    Lookup,
    RunQuery,
    RunAggregationQuery,
    BeginTransaction,
    Commit,
    Rollback,
    AllocateIds,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Lookup => "lookup",
            Method::RunQuery => "runQuery",
            Method::RunAggregationQuery => "runAggregationQuery",
            Method::BeginTransaction => "beginTransaction",
            Method::Commit => "commit",
            Method::Rollback => "rollback",
            Method::AllocateIds => "allocateIds",
        }
    }
}

/// Per-call transport options.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A transport able to execute one RPC.
///
/// Cancellation is cooperative: dropping the returned future abandons the call. The
/// pagination drivers own each in-flight future inside an abortable task, which is how
/// streaming reads expose `abort()`.
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn invoke(
        &self,
        method: Method,
        request: JsonValue,
        options: &CallOptions,
    ) -> Result<JsonValue, Error>;
}

#[cfg(test)]
mod tests {
    use super::Method;

    #[test]
    fn method_names_match_the_service() {
        let cases = [
            (Method::Lookup, "lookup"),
            (Method::RunQuery, "runQuery"),
            (Method::RunAggregationQuery, "runAggregationQuery"),
            (Method::BeginTransaction, "beginTransaction"),
            (Method::Commit, "commit"),
            (Method::Rollback, "rollback"),
            (Method::AllocateIds, "allocateIds"),
        ];
        for (method, name) in cases {
            assert_eq!(method.as_str(), name);
        }
    }
}
