//! Purpose: Request and response envelopes for the Datastore JSON protocol.
//! Exports: Crate-internal request/response structs plus `invoke_json`.
//! Role: The only place orchestration code touches serde for RPC bodies.
//! Invariants: Every request carries the project id and, when configured, the database id.
//! Invariants: Transaction handles and cursors travel as base64; empty handles mean "none".
//! Invariants: int64 counters accept decimal strings, numbers, or null (read as zero).

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use serde::de::{DeserializeOwned, Deserializer, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use super::config::ClientConfig;
use super::options::{ReadOptions, SharedQueryOptions, TransactionOptionsWire};
use super::rpc::{CallOptions, Method, RpcClient};
use crate::core::error::{Error, ErrorKind};
use crate::core::key::decode_int64;
use crate::core::plan::MoreResults;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RequestTarget {
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_id: Option<String>,
}

impl RequestTarget {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            project_id: config.project_id.clone(),
            database_id: config.database_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LookupRequest {
    #[serde(flatten)]
    pub target: RequestTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_options: Option<ReadOptions>,
    pub keys: Vec<JsonValue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RunQueryRequest {
    #[serde(flatten)]
    pub target: RequestTarget,
    #[serde(flatten)]
    pub shared: SharedQueryOptions,
    pub query: JsonValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RunAggregationQueryRequest {
    #[serde(flatten)]
    pub target: RequestTarget,
    #[serde(flatten)]
    pub shared: SharedQueryOptions,
    pub aggregation_query: JsonValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BeginTransactionRequest {
    #[serde(flatten)]
    pub target: RequestTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_options: Option<TransactionOptionsWire>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum CommitMode {
    Transactional,
    NonTransactional,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CommitRequest {
    #[serde(flatten)]
    pub target: RequestTarget,
    pub mode: CommitMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    pub mutations: Vec<JsonValue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RollbackRequest {
    #[serde(flatten)]
    pub target: RequestTarget,
    pub transaction: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AllocateIdsRequest {
    #[serde(flatten)]
    pub target: RequestTarget,
    pub keys: Vec<JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct EntityResultWire {
    pub entity: JsonValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct LookupResponse {
    pub found: Vec<EntityResultWire>,
    pub missing: Vec<EntityResultWire>,
    pub deferred: Vec<JsonValue>,
    pub transaction: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct QueryResultBatchWire {
    #[serde(deserialize_with = "lenient_i64")]
    pub skipped_results: i64,
    pub entity_results: Vec<EntityResultWire>,
    pub end_cursor: Option<String>,
    pub more_results: MoreResults,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct RunQueryResponse {
    pub batch: Option<QueryResultBatchWire>,
    pub transaction: Option<String>,
    pub explain_metrics: Option<JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct AggregationResultWire {
    pub aggregate_properties: Map<String, JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct AggregationBatchWire {
    pub aggregation_results: Vec<AggregationResultWire>,
    pub more_results: MoreResults,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct RunAggregationQueryResponse {
    pub batch: Option<AggregationBatchWire>,
    pub transaction: Option<String>,
    pub explain_metrics: Option<JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct BeginTransactionResponse {
    pub transaction: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct MutationResultWire {
    pub key: Option<JsonValue>,
    pub version: Option<JsonValue>,
    pub conflict_detected: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct CommitResponseWire {
    pub mutation_results: Vec<MutationResultWire>,
    #[serde(deserialize_with = "lenient_i64")]
    pub index_updates: i64,
    pub commit_time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct AllocateIdsResponse {
    pub keys: Vec<JsonValue>,
}

/// Read responses that may hand back a transaction handle begun by the request.
pub(crate) trait CarriesTransaction {
    fn transaction_field(&self) -> Option<&str>;

    fn transaction_handle(&self) -> Result<Option<Bytes>, Error> {
        decode_handle(self.transaction_field())
    }
}

impl CarriesTransaction for LookupResponse {
    fn transaction_field(&self) -> Option<&str> {
        self.transaction.as_deref()
    }
}

impl CarriesTransaction for RunQueryResponse {
    fn transaction_field(&self) -> Option<&str> {
        self.transaction.as_deref()
    }
}

impl CarriesTransaction for RunAggregationQueryResponse {
    fn transaction_field(&self) -> Option<&str> {
        self.transaction.as_deref()
    }
}

impl CarriesTransaction for BeginTransactionResponse {
    fn transaction_field(&self) -> Option<&str> {
        self.transaction.as_deref()
    }
}

pub(crate) fn decode_handle(encoded: Option<&str>) -> Result<Option<Bytes>, Error> {
    match encoded {
        None | Some("") => Ok(None),
        Some(text) => {
            let bytes = BASE64.decode(text).map_err(|err| {
                Error::decode("server returned an invalid transaction handle").with_source(err)
            })?;
            Ok(if bytes.is_empty() {
                None
            } else {
                Some(Bytes::from(bytes))
            })
        }
    }
}

pub(crate) fn encode_handle(handle: &Bytes) -> String {
    BASE64.encode(handle)
}

/// Serialize `body`, dispatch it, and decode the response envelope.
pub(crate) async fn invoke_json<T, R>(
    rpc: &dyn RpcClient,
    method: Method,
    body: &T,
    options: &CallOptions,
) -> Result<R, Error>
where
    T: Serialize,
    R: DeserializeOwned,
{
    let request = serde_json::to_value(body).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode request json")
            .with_method(method.as_str())
            .with_source(err)
    })?;
    debug!(method = method.as_str(), timeout = ?options.timeout, "dispatching rpc");
    let response = rpc.invoke(method, request, options).await?;
    serde_json::from_value(response).map_err(|err| {
        Error::decode("invalid response json")
            .with_method(method.as_str())
            .with_source(err)
    })
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<JsonValue>::deserialize(deserializer)?;
    match raw {
        None | Some(JsonValue::Null) => Ok(0),
        Some(value) => decode_int64(&value).map_err(D::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CarriesTransaction, CommitMode, CommitRequest, RequestTarget, RunQueryResponse,
        decode_handle,
    };
    use crate::core::plan::MoreResults;
    use serde_json::json;

    #[test]
    fn target_is_flattened_into_requests() {
        let request = CommitRequest {
            target: RequestTarget {
                project_id: "demo".to_string(),
                database_id: Some("alt".to_string()),
            },
            mode: CommitMode::NonTransactional,
            transaction: None,
            mutations: vec![],
        };
        let wire = serde_json::to_value(&request).expect("json");
        assert_eq!(
            wire,
            json!({
                "projectId": "demo",
                "databaseId": "alt",
                "mode": "NON_TRANSACTIONAL",
                "mutations": []
            })
        );
    }

    #[test]
    fn query_batch_accepts_string_counters() {
        let response: RunQueryResponse = serde_json::from_value(json!({
            "batch": {
                "skippedResults": "3",
                "entityResults": [],
                "endCursor": "AQI=",
                "moreResults": "NOT_FINISHED"
            },
            "transaction": "dHhu"
        }))
        .expect("decode");
        let batch = response.batch.as_ref().expect("batch");
        assert_eq!(batch.skipped_results, 3);
        assert_eq!(batch.more_results, MoreResults::NotFinished);
        assert_eq!(
            response.transaction_handle().expect("handle").as_deref(),
            Some(&b"txn"[..])
        );
    }

    #[test]
    fn missing_and_null_counters_read_as_zero() {
        let response: RunQueryResponse =
            serde_json::from_value(json!({"batch": {"skippedResults": null}})).expect("decode");
        assert_eq!(response.batch.expect("batch").skipped_results, 0);
        let response: RunQueryResponse = serde_json::from_value(json!({})).expect("decode");
        assert!(response.batch.is_none());
    }

    #[test]
    fn empty_handles_mean_none() {
        assert_eq!(decode_handle(Some("")).expect("decode"), None);
        assert_eq!(decode_handle(None).expect("decode"), None);
        assert!(decode_handle(Some("***")).is_err());
    }
}
