//! Purpose: Define the public request-orchestration API for Datastore-style stores.
//! Exports: Client, transaction, query, stream, and transport types plus core data types.
//! Role: Public surface; wire envelopes and pagination drivers stay internal.
//! Invariants: Every entry point is async and reports failures through `Result`.
//! Invariants: Internal modules remain private and are not directly exposed.

mod client;
mod config;
mod metrics;
mod options;
mod pagination;
mod remote;
mod request;
mod rpc;
mod stream;
mod transaction;
mod wire;

pub use crate::core::cursor::Cursor;
pub use crate::core::error::{Error, ErrorKind, TRANSACTION_EXPIRED_MESSAGE};
pub use crate::core::key::{Key, KeyId, PathElement};
pub use crate::core::mutation::{Mutation, SaveMethod};
pub use crate::core::plan::MoreResults;
pub use crate::core::query::{
    AggregateQuery, Aggregation, AggregationKind, CompositeOperator, Direction, Filter, Operator,
    Order, Query,
};
pub use crate::core::value::{Entity, Properties, Value, to_plain};
pub use client::{ApiResult, Datastore};
pub use config::{ClientConfig, DEFAULT_API_ENDPOINT};
pub use metrics::{ExecutionStats, ExplainMetrics, PlanSummary};
pub use options::{Consistency, ExplainOptions, RequestOptions};
pub use pagination::RunQueryInfo;
pub use remote::{DEFAULT_TRANSPORT_TIMEOUT, HttpRpcClient};
pub use request::{
    AggregateQueryResults, CommitResponse, MutationResult, QueryResults, RequestOrchestrator,
    WriteOutcome,
};
pub use rpc::{CallOptions, Method, RpcClient};
pub use stream::EntityStream;
pub use transaction::{ExpiryHandle, Transaction, TransactionOptions, TransactionState};
