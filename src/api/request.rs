//! Purpose: Request orchestration shared by plain clients and transactions.
//! Exports: `RequestOrchestrator`, `CommitResponse`, `MutationResult`, `WriteOutcome`,
//! `QueryResults`, `AggregateQueryResults`.
//! Role: Validates preconditions, composes options, and routes reads through the pagination
//! drivers and writes through one buffer-or-commit branch keyed on the context role.
//! Invariants: Precondition failures are returned before any RPC is issued.
//! Invariants: Transport errors are passed through unmodified and never retried.
//! Invariants: Transaction-role writes never touch the network until commit.
#![allow(clippy::result_large_err)]

use std::sync::Arc;

use bytes::Bytes;
use serde_json::{Map, Value as JsonValue};
use time::OffsetDateTime;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use super::config::ClientConfig;
use super::metrics::decode_explain_metrics;
use super::options::{
    RequestOptions, TransactionContext, compose_query_options, compose_read_options,
    transaction_options_wire,
};
use super::pagination::{RunQueryInfo, STREAM_BUFFER, drive_lookup, drive_query, run_collected};
use super::rpc::{CallOptions, Method, RpcClient};
use super::stream::EntityStream;
use super::transaction::{Transaction, TransactionCell, TransactionOptions};
use super::wire::{
    AllocateIdsRequest, AllocateIdsResponse, BeginTransactionRequest, BeginTransactionResponse,
    CarriesTransaction, CommitMode, CommitRequest, CommitResponseWire, RequestTarget,
    RollbackRequest, RunAggregationQueryRequest, RunAggregationQueryResponse, encode_handle,
    invoke_json,
};
use crate::core::error::Error;
use crate::core::key::{Key, decode_int64, decode_key, encode_key};
use crate::core::mutation::{Mutation, SaveMethod, encode_mutation};
use crate::core::query::{AggregateQuery, Query, aggregation_query_to_wire, query_to_wire};
use crate::core::value::{Entity, decode_value, parse_timestamp, to_plain};

pub(crate) struct ClientInner {
    pub rpc: Arc<dyn RpcClient>,
    pub config: ClientConfig,
}

#[derive(Clone)]
pub(crate) enum Role {
    PlainClient,
    Transaction(Arc<TransactionCell>),
}

/// Result of one server-applied mutation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MutationResult {
    /// Set when the server allocated an id for an incomplete key.
    pub key: Option<Key>,
    pub version: Option<i64>,
    pub conflict_detected: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommitResponse {
    pub mutation_results: Vec<MutationResult>,
    /// Final key of each submitted mutation, in submission order.
    pub keys: Vec<Key>,
    pub index_updates: i64,
    pub commit_time: Option<OffsetDateTime>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WriteOutcome {
    /// Appended to the enclosing transaction; sent on commit.
    Buffered,
    Committed(CommitResponse),
}

impl WriteOutcome {
    pub fn committed(self) -> Option<CommitResponse> {
        match self {
            WriteOutcome::Buffered => None,
            WriteOutcome::Committed(response) => Some(response),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResults {
    pub entities: Vec<Entity>,
    pub info: RunQueryInfo,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AggregateQueryResults {
    /// One plain mapping per result row, keyed by aggregation alias.
    pub rows: Vec<Map<String, JsonValue>>,
    pub info: RunQueryInfo,
}

/// Transaction context resolved for one read round.
pub(crate) struct ReadScope {
    context: TransactionContext,
    cell: Option<Arc<TransactionCell>>,
    _begin: Option<OwnedMutexGuard<()>>,
}

impl ReadScope {
    pub fn context(&self) -> &TransactionContext {
        &self.context
    }

    /// Record the handle a begin-with-read returned, then release the begin guard.
    pub fn complete(self, handle: Option<Bytes>) {
        if let (TransactionContext::Begin(_), Some(cell)) = (&self.context, &self.cell) {
            cell.record_handle(handle);
        }
    }
}

/// The request surface shared by `Datastore` and `Transaction`.
#[derive(Clone)]
pub struct RequestOrchestrator {
    inner: Arc<ClientInner>,
    role: Role,
}

impl RequestOrchestrator {
    pub(crate) fn with_role(inner: Arc<ClientInner>, role: Role) -> Self {
        Self { inner, role }
    }

    pub(crate) fn rpc(&self) -> &dyn RpcClient {
        self.inner.rpc.as_ref()
    }

    pub(crate) fn target(&self) -> RequestTarget {
        RequestTarget::from_config(&self.inner.config)
    }

    pub(crate) fn call_options(&self, explicit: &CallOptions) -> CallOptions {
        CallOptions {
            timeout: explicit.timeout.or(self.inner.config.default_timeout),
        }
    }

    pub(crate) fn namespace_for<'a>(&'a self, explicit: Option<&'a str>) -> Option<&'a str> {
        explicit.or(self.inner.config.namespace.as_deref())
    }

    pub(crate) async fn read_scope(&self) -> Result<ReadScope, Error> {
        match &self.role {
            Role::PlainClient => Ok(ReadScope {
                context: TransactionContext::Plain,
                cell: None,
                _begin: None,
            }),
            Role::Transaction(cell) => {
                let (context, guard) = cell.read_context().await?;
                Ok(ReadScope {
                    context,
                    cell: Some(Arc::clone(cell)),
                    _begin: guard,
                })
            }
        }
    }

    fn check_not_expired(&self) -> Result<(), Error> {
        match &self.role {
            Role::PlainClient => Ok(()),
            Role::Transaction(cell) => cell.check_not_expired(),
        }
    }

    /// Expiry and option-conflict checks, run before any stream or RPC is started.
    fn preflight(&self, options: &RequestOptions) -> Result<(), Error> {
        self.check_not_expired()?;
        let context = match &self.role {
            Role::PlainClient => TransactionContext::Plain,
            Role::Transaction(cell) => match cell.id() {
                Some(id) => TransactionContext::Active(id),
                None => TransactionContext::Begin(cell.options().clone()),
            },
        };
        compose_read_options(options, &context).map(|_| ())
    }

    fn wrap_numbers(&self, options: &RequestOptions) -> bool {
        options.wrap_numbers.unwrap_or(self.inner.config.wrap_numbers)
    }

    /// Fetch one entity; `None` when it does not exist.
    pub async fn get(&self, key: Key, options: RequestOptions) -> Result<Option<Entity>, Error> {
        let mut found = self.get_many(vec![key], options).await?;
        Ok(if found.is_empty() {
            None
        } else {
            Some(found.swap_remove(0))
        })
    }

    /// Fetch every existing entity among `keys`; missing keys are skipped.
    pub async fn get_many(
        &self,
        keys: Vec<Key>,
        options: RequestOptions,
    ) -> Result<Vec<Entity>, Error> {
        self.validate_lookup(&keys, &options)?;
        let ctx = self.clone();
        let (entities, _) =
            run_collected(move |tx| drive_lookup(ctx, keys, options, tx)).await?;
        Ok(entities)
    }

    pub async fn get_stream(
        &self,
        keys: Vec<Key>,
        options: RequestOptions,
    ) -> Result<EntityStream, Error> {
        self.validate_lookup(&keys, &options)?;
        let ctx = self.clone();
        Ok(EntityStream::spawn(STREAM_BUFFER, move |tx| {
            drive_lookup(ctx, keys, options, tx)
        }))
    }

    fn validate_lookup(&self, keys: &[Key], options: &RequestOptions) -> Result<(), Error> {
        self.check_not_expired()?;
        if keys.is_empty() {
            return Err(Error::invalid_argument("at least one key is required"));
        }
        for key in keys {
            key.require_complete("lookup")?;
        }
        self.preflight(options)
    }

    pub async fn run_query(
        &self,
        query: Query,
        options: RequestOptions,
    ) -> Result<QueryResults, Error> {
        self.validate_query(&query, &options)?;
        let ctx = self.clone();
        let (entities, info) =
            run_collected(move |tx| drive_query(ctx, query, options, tx)).await?;
        Ok(QueryResults {
            entities,
            info: info.unwrap_or_default(),
        })
    }

    pub async fn run_query_stream(
        &self,
        query: Query,
        options: RequestOptions,
    ) -> Result<EntityStream, Error> {
        self.validate_query(&query, &options)?;
        let ctx = self.clone();
        Ok(EntityStream::spawn(STREAM_BUFFER, move |tx| {
            drive_query(ctx, query, options, tx)
        }))
    }

    fn validate_query(&self, query: &Query, options: &RequestOptions) -> Result<(), Error> {
        self.check_not_expired()?;
        self.preflight(options)?;
        query_to_wire(query).map(|_| ())
    }

    pub async fn run_aggregation_query(
        &self,
        aggregate: AggregateQuery,
        options: RequestOptions,
    ) -> Result<AggregateQueryResults, Error> {
        self.check_not_expired()?;
        self.preflight(&options)?;
        let aggregation_query = aggregation_query_to_wire(&aggregate)?;

        let scope = self.read_scope().await?;
        let namespace = self.namespace_for(aggregate.query.namespace.as_deref());
        let request = RunAggregationQueryRequest {
            target: self.target(),
            shared: compose_query_options(&options, scope.context(), namespace)?,
            aggregation_query,
        };
        let response: RunAggregationQueryResponse = invoke_json(
            self.rpc(),
            Method::RunAggregationQuery,
            &request,
            &self.call_options(&options.call),
        )
        .await?;
        scope.complete(response.transaction_handle()?);

        let explain_metrics = decode_explain_metrics(response.explain_metrics.as_ref())?;
        let wrap_numbers = self.wrap_numbers(&options);
        let Some(batch) = response.batch else {
            return Ok(AggregateQueryResults {
                rows: Vec::new(),
                info: RunQueryInfo {
                    explain_metrics,
                    ..RunQueryInfo::default()
                },
            });
        };
        let mut rows = Vec::with_capacity(batch.aggregation_results.len());
        for result in &batch.aggregation_results {
            let mut row = Map::new();
            for (alias, raw) in &result.aggregate_properties {
                row.insert(alias.clone(), to_plain(&decode_value(raw)?, wrap_numbers)?);
            }
            rows.push(row);
        }
        debug!(rows = rows.len(), "aggregation query finished");
        Ok(AggregateQueryResults {
            rows,
            info: RunQueryInfo {
                end_cursor: None,
                more_results: Some(batch.more_results),
                explain_metrics,
            },
        })
    }

    pub async fn save(&self, entities: Vec<Entity>) -> Result<WriteOutcome, Error> {
        self.save_with(SaveMethod::Upsert, entities).await
    }

    pub async fn save_with(
        &self,
        method: SaveMethod,
        entities: Vec<Entity>,
    ) -> Result<WriteOutcome, Error> {
        let mutations = entities
            .into_iter()
            .map(|entity| Mutation::save(method, entity))
            .collect();
        self.write(mutations).await
    }

    pub async fn insert(&self, entities: Vec<Entity>) -> Result<WriteOutcome, Error> {
        self.save_with(SaveMethod::Insert, entities).await
    }

    pub async fn update(&self, entities: Vec<Entity>) -> Result<WriteOutcome, Error> {
        self.save_with(SaveMethod::Update, entities).await
    }

    pub async fn upsert(&self, entities: Vec<Entity>) -> Result<WriteOutcome, Error> {
        self.save_with(SaveMethod::Upsert, entities).await
    }

    pub async fn delete(&self, keys: Vec<Key>) -> Result<WriteOutcome, Error> {
        self.write(keys.into_iter().map(Mutation::Delete).collect())
            .await
    }

    async fn write(&self, mutations: Vec<Mutation>) -> Result<WriteOutcome, Error> {
        self.check_not_expired()?;
        if mutations.is_empty() {
            return Err(Error::invalid_argument("at least one mutation is required"));
        }
        for mutation in &mutations {
            mutation.validate()?;
        }
        match &self.role {
            Role::Transaction(cell) => {
                cell.push_mutations(mutations)?;
                Ok(WriteOutcome::Buffered)
            }
            Role::PlainClient => self
                .commit_mutations(mutations, CommitMode::NonTransactional, None)
                .await
                .map(WriteOutcome::Committed),
        }
    }

    /// Read-modify-write each entity inside an internal transaction.
    ///
    /// Existing properties are kept unless the caller supplies a new value. On any failure
    /// the transaction is rolled back (rollback errors are only logged) and the original
    /// error is returned.
    pub async fn merge(&self, entities: Vec<Entity>) -> Result<CommitResponse, Error> {
        self.check_not_expired()?;
        if entities.is_empty() {
            return Err(Error::invalid_argument("at least one entity is required"));
        }
        for entity in &entities {
            entity.key.require_complete("merge")?;
        }

        let transaction = Transaction::new(Arc::clone(&self.inner), TransactionOptions::default());
        if let Err(err) = transaction.run().await {
            transaction.rollback_if_begun().await;
            return Err(err);
        }

        for entity in entities {
            let staged = match transaction
                .get(entity.key.clone(), RequestOptions::default())
                .await
            {
                Ok(current) => transaction.upsert(vec![merge_entity(current, entity)]).await,
                Err(err) => Err(err),
            };
            if let Err(err) = staged {
                transaction.rollback_if_begun().await;
                return Err(err);
            }
        }
        transaction.commit().await
    }

    /// Reserve `count` ids for an incomplete key; keys come back in request order.
    pub async fn allocate_ids(&self, key: Key, count: usize) -> Result<Vec<Key>, Error> {
        self.check_not_expired()?;
        key.validate_shape()?;
        if key.is_complete() {
            return Err(Error::invalid_argument(
                "allocate_ids requires an incomplete key",
            ));
        }
        if count == 0 {
            return Ok(Vec::new());
        }
        let encoded = encode_key(&key)?;
        let request = AllocateIdsRequest {
            target: self.target(),
            keys: vec![encoded; count],
        };
        let response: AllocateIdsResponse = invoke_json(
            self.rpc(),
            Method::AllocateIds,
            &request,
            &self.call_options(&CallOptions::default()),
        )
        .await?;
        response.keys.iter().map(decode_key).collect()
    }

    pub(crate) async fn begin_transaction(
        &self,
        options: &TransactionOptions,
    ) -> Result<Bytes, Error> {
        let request = BeginTransactionRequest {
            target: self.target(),
            transaction_options: Some(transaction_options_wire(options, None)?),
        };
        let response: BeginTransactionResponse = invoke_json(
            self.rpc(),
            Method::BeginTransaction,
            &request,
            &self.call_options(&CallOptions::default()),
        )
        .await?;
        response.transaction_handle()?.ok_or_else(|| {
            Error::decode("beginTransaction returned no transaction handle")
                .with_method(Method::BeginTransaction.as_str())
        })
    }

    pub(crate) async fn commit_transactional(
        &self,
        mutations: Vec<Mutation>,
        handle: &Bytes,
    ) -> Result<CommitResponse, Error> {
        self.commit_mutations(mutations, CommitMode::Transactional, Some(handle))
            .await
    }

    pub(crate) async fn rollback_handle(&self, handle: &Bytes) -> Result<(), Error> {
        let request = RollbackRequest {
            target: self.target(),
            transaction: encode_handle(handle),
        };
        let _: JsonValue = invoke_json(
            self.rpc(),
            Method::Rollback,
            &request,
            &self.call_options(&CallOptions::default()),
        )
        .await?;
        Ok(())
    }

    async fn commit_mutations(
        &self,
        mutations: Vec<Mutation>,
        mode: CommitMode,
        handle: Option<&Bytes>,
    ) -> Result<CommitResponse, Error> {
        let request = CommitRequest {
            target: self.target(),
            mode,
            transaction: handle.map(encode_handle),
            mutations: mutations
                .iter()
                .map(encode_mutation)
                .collect::<Result<Vec<_>, _>>()?,
        };
        let response: CommitResponseWire = invoke_json(
            self.rpc(),
            Method::Commit,
            &request,
            &self.call_options(&CallOptions::default()),
        )
        .await?;
        decode_commit_response(response, &mutations)
    }
}

fn decode_commit_response(
    wire: CommitResponseWire,
    submitted: &[Mutation],
) -> Result<CommitResponse, Error> {
    let mut mutation_results = Vec::with_capacity(wire.mutation_results.len());
    for result in &wire.mutation_results {
        mutation_results.push(MutationResult {
            key: result.key.as_ref().map(decode_key).transpose()?,
            version: result.version.as_ref().map(decode_int64).transpose()?,
            conflict_detected: result.conflict_detected,
        });
    }
    let keys = submitted
        .iter()
        .enumerate()
        .map(|(index, mutation)| {
            mutation_results
                .get(index)
                .and_then(|result| result.key.clone())
                .unwrap_or_else(|| mutation.key().clone())
        })
        .collect();
    let commit_time = wire
        .commit_time
        .as_deref()
        .map(parse_timestamp)
        .transpose()?;
    Ok(CommitResponse {
        mutation_results,
        keys,
        index_updates: wire.index_updates,
        commit_time,
    })
}

/// Shallow merge: caller properties win, stored properties are kept otherwise.
fn merge_entity(current: Option<Entity>, update: Entity) -> Entity {
    let Some(mut merged) = current else {
        return update;
    };
    merged.key = update.key;
    merged.properties.extend(update.properties);
    merged
        .exclude_from_indexes
        .extend(update.exclude_from_indexes);
    merged
}

#[cfg(test)]
mod tests {
    use super::{decode_commit_response, merge_entity};
    use crate::api::wire::CommitResponseWire;
    use crate::core::key::Key;
    use crate::core::mutation::Mutation;
    use crate::core::value::{Entity, Value};
    use serde_json::json;

    #[test]
    fn merge_prefers_caller_values() {
        let key = Key::with_name("Task", "a");
        let stored = Entity::new(key.clone())
            .with_property("title", "old")
            .with_property("done", false);
        let update = Entity::new(key.clone()).with_property("done", true);
        let merged = merge_entity(Some(stored), update);
        assert_eq!(merged.get("title"), Some(&Value::String("old".to_string())));
        assert_eq!(merged.get("done"), Some(&Value::Boolean(true)));
        assert_eq!(merged.key, key);
    }

    #[test]
    fn merge_of_missing_entity_is_the_update() {
        let update = Entity::new(Key::with_name("Task", "b")).with_property("done", true);
        assert_eq!(merge_entity(None, update.clone()), update);
    }

    #[test]
    fn allocated_keys_are_back_filled() {
        let wire: CommitResponseWire = serde_json::from_value(json!({
            "mutationResults": [
                {"key": {"path": [{"kind": "Task", "id": "77"}]}, "version": "3"},
                {"version": "4"}
            ],
            "indexUpdates": 5,
            "commitTime": "2024-03-01T12:00:00Z"
        }))
        .expect("decode");
        let submitted = vec![
            Mutation::Insert(Entity::new(Key::incomplete("Task"))),
            Mutation::Delete(Key::with_id("Task", 9)),
        ];
        let response = decode_commit_response(wire, &submitted).expect("response");
        assert_eq!(
            response.keys,
            vec![Key::with_id("Task", 77), Key::with_id("Task", 9)]
        );
        assert_eq!(response.mutation_results[0].version, Some(3));
        assert_eq!(response.index_updates, 5);
        assert!(response.commit_time.is_some());
    }
}
