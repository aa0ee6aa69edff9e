//! Purpose: Compose per-call read options, partition, and explain settings into request envelopes.
//! Exports: `Consistency`, `ExplainOptions`, `RequestOptions`, `SharedQueryOptions`, `ReadOptions`.
//! Role: Option composer shared by lookups, queries, and aggregation queries.
//! Invariants: Rules are checked in a fixed order; the first violation wins.
//! Invariants: Read options are a single enum, so at most one consistency mode reaches the wire.
//! Notes: Read times are truncated to whole seconds before they are sent.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use serde::Serialize;
use time::OffsetDateTime;

use super::rpc::CallOptions;
use super::transaction::TransactionOptions;
use crate::core::error::Error;
use crate::core::value::format_timestamp;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    Strong,
    Eventual,
}

impl Consistency {
    /// Case-insensitive parse; unknown names mean "server default".
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "strong" => Some(Consistency::Strong),
            "eventual" => Some(Consistency::Eventual),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Consistency::Strong => 1,
            Consistency::Eventual => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ExplainOptions {
    pub analyze: bool,
}

/// Caller-supplied options for reads.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestOptions {
    pub consistency: Option<Consistency>,
    /// Read time as epoch milliseconds.
    pub read_time: Option<i64>,
    pub explain: Option<ExplainOptions>,
    /// Overrides the client's `wrap_numbers` policy for plain-data results.
    pub wrap_numbers: Option<bool>,
    pub call: CallOptions,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    pub fn read_time_millis(mut self, millis: i64) -> Self {
        self.read_time = Some(millis);
        self
    }

    pub fn explain(mut self, analyze: bool) -> Self {
        self.explain = Some(ExplainOptions { analyze });
        self
    }

    pub fn wrap_numbers(mut self, wrap_numbers: bool) -> Self {
        self.wrap_numbers = Some(wrap_numbers);
        self
    }

    pub fn call_options(mut self, call: CallOptions) -> Self {
        self.call = call;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadOptions {
    ReadConsistency(Consistency),
    /// Base64 transaction handle.
    Transaction(String),
    NewTransaction(TransactionOptionsWire),
    /// RFC 3339 timestamp.
    ReadTime(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionOptionsWire {
    ReadOnly(ReadOnlyWire),
    ReadWrite(ReadWriteWire),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadOnlyWire {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_time: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadWriteWire {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_transaction: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionId {
    pub namespace_id: String,
}

/// Envelope fields shared by `runQuery` and `runAggregationQuery`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedQueryOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_options: Option<ReadOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<PartitionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain_options: Option<ExplainOptions>,
}

/// Transaction context a read is composed against.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TransactionContext {
    Plain,
    /// The transaction has not started; this call begins it.
    Begin(TransactionOptions),
    Active(Bytes),
}

pub(crate) fn compose_read_options(
    options: &RequestOptions,
    context: &TransactionContext,
) -> Result<Option<ReadOptions>, Error> {
    if options.consistency.is_some() && options.read_time.is_some() {
        return Err(Error::invalid_argument(
            "read time and read consistency cannot both be specified",
        ));
    }

    match context {
        TransactionContext::Begin(_) | TransactionContext::Active(_) => {
            if options.consistency.is_some() {
                return Err(Error::invalid_argument(
                    "read consistency cannot be specified in a transaction",
                ));
            }
            if options.read_time.is_some() {
                return Err(Error::invalid_argument(
                    "read time cannot be specified in a transaction",
                ));
            }
        }
        TransactionContext::Plain => {}
    }

    let composed = match context {
        TransactionContext::Begin(txn_options) => Some(ReadOptions::NewTransaction(
            transaction_options_wire(txn_options, None)?,
        )),
        TransactionContext::Active(handle) => {
            Some(ReadOptions::Transaction(BASE64.encode(handle)))
        }
        TransactionContext::Plain => match (options.consistency, options.read_time) {
            (Some(consistency), _) => Some(ReadOptions::ReadConsistency(consistency)),
            (None, Some(millis)) => Some(ReadOptions::ReadTime(read_time_seconds(millis)?)),
            (None, None) => None,
        },
    };
    Ok(composed)
}

pub(crate) fn compose_query_options(
    options: &RequestOptions,
    context: &TransactionContext,
    namespace: Option<&str>,
) -> Result<SharedQueryOptions, Error> {
    let read_options = compose_read_options(options, context)?;
    let partition_id = namespace
        .filter(|namespace| !namespace.is_empty())
        .map(|namespace| PartitionId {
            namespace_id: namespace.to_string(),
        });
    Ok(SharedQueryOptions {
        read_options,
        partition_id,
        explain_options: options.explain,
    })
}

pub(crate) fn transaction_options_wire(
    options: &TransactionOptions,
    previous: Option<&Bytes>,
) -> Result<TransactionOptionsWire, Error> {
    if options.read_only {
        let read_time = options.read_time.map(read_time_seconds).transpose()?;
        return Ok(TransactionOptionsWire::ReadOnly(ReadOnlyWire { read_time }));
    }
    if options.read_time.is_some() {
        return Err(Error::invalid_argument(
            "read time can only be set on read-only transactions",
        ));
    }
    Ok(TransactionOptionsWire::ReadWrite(ReadWriteWire {
        previous_transaction: previous.map(|handle| BASE64.encode(handle)),
    }))
}

/// Whole seconds only: `floor(millis / 1000)`. Sub-second precision is dropped here.
pub(crate) fn read_time_seconds(millis: i64) -> Result<String, Error> {
    let seconds = millis.div_euclid(1000);
    let ts = OffsetDateTime::from_unix_timestamp(seconds).map_err(|err| {
        Error::invalid_argument("read time is out of range").with_source(err)
    })?;
    format_timestamp(ts)
}
