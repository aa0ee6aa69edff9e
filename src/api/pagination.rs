//! Purpose: Drive multi-round lookups and queries, emitting results as each round completes.
//! Exports: `RunQueryInfo`.
//! Role: I/O loop around the pure planners in `core::plan`; feeds `EntityStream` and the
//! collected read entry points through one bounded channel.
//! Invariants: Rounds are strictly sequential; emission order equals server order.
//! Invariants: A closed consumer stops the loop before the next RPC is issued.
//! Invariants: The first failure is sent as the final event; nothing follows it.
#![allow(clippy::result_large_err)]

use std::future::Future;

use tokio::sync::mpsc;
use tracing::debug;

use super::metrics::{ExplainMetrics, decode_explain_metrics};
use super::options::{RequestOptions, compose_query_options, compose_read_options};
use super::request::RequestOrchestrator;
use super::rpc::Method;
use super::stream::EventSender;
use super::wire::{
    CarriesTransaction, LookupRequest, LookupResponse, RunQueryRequest, RunQueryResponse,
    invoke_json,
};
use crate::core::cursor::{Cursor, decode_wire_cursor};
use crate::core::error::Error;
use crate::core::key::{Key, decode_key, encode_key};
use crate::core::plan::{
    LookupRoundPlan, MoreResults, QueryBatchSummary, QueryRoundPlan, plan_next_lookup_round,
    plan_next_query_round,
};
use crate::core::query::{Query, query_to_wire};
use crate::core::value::{Entity, decode_entity};

pub(crate) const STREAM_BUFFER: usize = 64;

/// Completion details of a query: where it stopped and why.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunQueryInfo {
    pub end_cursor: Option<Cursor>,
    pub more_results: Option<MoreResults>,
    pub explain_metrics: Option<ExplainMetrics>,
}

pub(crate) enum StreamEvent {
    Entity(Entity),
    Info(RunQueryInfo),
}

pub(crate) async fn drive_lookup(
    ctx: RequestOrchestrator,
    keys: Vec<Key>,
    options: RequestOptions,
    tx: EventSender,
) {
    if let Err(err) = lookup_rounds(&ctx, keys, &options, &tx).await {
        let _ = tx.send(Err(err)).await;
    }
}

pub(crate) async fn drive_query(
    ctx: RequestOrchestrator,
    query: Query,
    options: RequestOptions,
    tx: EventSender,
) {
    if let Err(err) = query_rounds(&ctx, query, &options, &tx).await {
        let _ = tx.send(Err(err)).await;
    }
}

/// Run a driver to completion in the caller's task and gather everything it emits.
pub(crate) async fn run_collected<F, Fut>(
    driver: F,
) -> Result<(Vec<Entity>, Option<RunQueryInfo>), Error>
where
    F: FnOnce(EventSender) -> Fut,
    Fut: Future<Output = ()>,
{
    let (tx, mut rx) = mpsc::channel(STREAM_BUFFER);
    let drain = async move {
        let mut entities = Vec::new();
        let mut info = None;
        while let Some(event) = rx.recv().await {
            match event? {
                StreamEvent::Entity(entity) => entities.push(entity),
                StreamEvent::Info(done) => info = Some(done),
            }
        }
        Ok::<_, Error>((entities, info))
    };
    let ((), collected) = tokio::join!(driver(tx), drain);
    collected
}

async fn lookup_rounds(
    ctx: &RequestOrchestrator,
    keys: Vec<Key>,
    options: &RequestOptions,
    tx: &EventSender,
) -> Result<(), Error> {
    let call = ctx.call_options(&options.call);
    let mut pending = keys;
    let mut round = 0usize;
    loop {
        round += 1;
        let scope = ctx.read_scope().await?;
        let request = LookupRequest {
            target: ctx.target(),
            read_options: compose_read_options(options, scope.context())?,
            keys: pending
                .iter()
                .map(encode_key)
                .collect::<Result<Vec<_>, _>>()?,
        };
        let response: LookupResponse =
            invoke_json(ctx.rpc(), Method::Lookup, &request, &call).await?;
        scope.complete(response.transaction_handle()?);
        debug!(
            round,
            requested = pending.len(),
            found = response.found.len(),
            missing = response.missing.len(),
            deferred = response.deferred.len(),
            "lookup round"
        );

        for result in &response.found {
            let entity = decode_entity(&result.entity)?;
            if tx.send(Ok(StreamEvent::Entity(entity))).await.is_err() {
                return Ok(());
            }
        }

        let deferred = response
            .deferred
            .iter()
            .map(decode_key)
            .collect::<Result<Vec<_>, _>>()?;
        match plan_next_lookup_round(deferred) {
            LookupRoundPlan::Finished => return Ok(()),
            LookupRoundPlan::Continue(next) => pending = next,
        }
    }
}

async fn query_rounds(
    ctx: &RequestOrchestrator,
    query: Query,
    options: &RequestOptions,
    tx: &EventSender,
) -> Result<(), Error> {
    let call = ctx.call_options(&options.call);
    let mut current = query;
    let mut round = 0usize;
    loop {
        round += 1;
        let scope = ctx.read_scope().await?;
        let namespace = ctx.namespace_for(current.namespace.as_deref());
        let request = RunQueryRequest {
            target: ctx.target(),
            shared: compose_query_options(options, scope.context(), namespace)?,
            query: query_to_wire(&current)?,
        };
        let response: RunQueryResponse =
            invoke_json(ctx.rpc(), Method::RunQuery, &request, &call).await?;
        scope.complete(response.transaction_handle()?);
        let explain_metrics = decode_explain_metrics(response.explain_metrics.as_ref())?;

        let Some(batch) = response.batch else {
            debug!(round, "query round without batch");
            let info = RunQueryInfo {
                end_cursor: None,
                more_results: None,
                explain_metrics,
            };
            let _ = tx.send(Ok(StreamEvent::Info(info))).await;
            return Ok(());
        };
        debug!(
            round,
            entities = batch.entity_results.len(),
            skipped = batch.skipped_results,
            more_results = batch.more_results.as_str(),
            "query round"
        );

        for result in &batch.entity_results {
            let entity = decode_entity(&result.entity)?;
            if tx.send(Ok(StreamEvent::Entity(entity))).await.is_err() {
                return Ok(());
            }
        }

        let summary = QueryBatchSummary {
            more_results: batch.more_results,
            end_cursor: decode_wire_cursor(batch.end_cursor.as_deref())?,
            skipped_results: batch.skipped_results,
            entity_count: batch.entity_results.len(),
        };
        match plan_next_query_round(&current, &summary)? {
            QueryRoundPlan::Finished {
                end_cursor,
                more_results,
            } => {
                let info = RunQueryInfo {
                    end_cursor,
                    more_results: Some(more_results),
                    explain_metrics,
                };
                let _ = tx.send(Ok(StreamEvent::Info(info))).await;
                return Ok(());
            }
            QueryRoundPlan::Continue(next) => current = next,
        }
    }
}
