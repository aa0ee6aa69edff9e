mod common;

use common::{ScriptedRpc, datastore, entity_json, key_json};
use quarry::api::{
    AggregateQuery, Consistency, Entity, ErrorKind, Key, Method, Query, RequestOptions,
    TRANSACTION_EXPIRED_MESSAGE, TransactionOptions, TransactionState, WriteOutcome,
};
use serde_json::json;

fn task(id: i64) -> Key {
    Key::with_id("Task", id)
}

#[tokio::test]
async fn expired_transaction_rejects_every_entry_point_without_rpcs() {
    let rpc = ScriptedRpc::new();
    let ds = datastore(&rpc);
    let txn = ds.transaction(TransactionOptions::default());
    txn.expiry_handle().expire();
    assert_eq!(txn.state(), TransactionState::Expired);

    let mut errors = Vec::new();
    errors.push(txn.get(task(1), RequestOptions::new()).await.expect_err("get"));
    errors.push(
        txn.get_many(vec![task(1)], RequestOptions::new())
            .await
            .expect_err("get_many"),
    );
    errors.push(
        txn.get_stream(vec![task(1)], RequestOptions::new())
            .await
            .err()
            .expect("get_stream"),
    );
    errors.push(
        txn.run_query(Query::new("Task"), RequestOptions::new())
            .await
            .expect_err("run_query"),
    );
    errors.push(
        txn.run_query_stream(Query::new("Task"), RequestOptions::new())
            .await
            .err()
            .expect("run_query_stream"),
    );
    errors.push(
        txn.run_aggregation_query(
            AggregateQuery::new(Query::new("Task")).count("total"),
            RequestOptions::new(),
        )
        .await
        .expect_err("aggregate"),
    );
    errors.push(txn.delete(vec![task(1)]).await.expect_err("delete"));
    errors.push(
        txn.save(vec![Entity::new(task(1))])
            .await
            .expect_err("save"),
    );
    errors.push(
        txn.allocate_ids(Key::incomplete("Task"), 2)
            .await
            .expect_err("allocate"),
    );
    errors.push(txn.run().await.expect_err("run"));

    for err in &errors {
        assert_eq!(err.kind(), ErrorKind::TransactionExpired);
        assert_eq!(err.message(), Some(TRANSACTION_EXPIRED_MESSAGE));
    }
    assert_eq!(txn.pending_mutations(), 0);
    let err = txn.commit().await.expect_err("commit");
    assert_eq!(err.kind(), ErrorKind::TransactionExpired);
    assert!(rpc.calls().is_empty());
}

#[tokio::test]
async fn consistency_and_read_time_are_mutually_exclusive() {
    let rpc = ScriptedRpc::new();
    let ds = datastore(&rpc);
    let options = RequestOptions::new()
        .consistency(Consistency::Strong)
        .read_time_millis(1_700_000_000_000);

    let err = ds.get(task(1), options.clone()).await.expect_err("get");
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(
        err.message(),
        Some("read time and read consistency cannot both be specified")
    );
    let err = ds
        .run_query(Query::new("Task"), options)
        .await
        .expect_err("query");
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(rpc.calls().is_empty());
}

#[tokio::test]
async fn transactions_reject_consistency_and_read_time() {
    let rpc = ScriptedRpc::new();
    let ds = datastore(&rpc);
    let txn = ds.transaction(TransactionOptions::default());

    let err = txn
        .get(task(1), RequestOptions::new().consistency(Consistency::Eventual))
        .await
        .expect_err("not started");
    assert_eq!(
        err.message(),
        Some("read consistency cannot be specified in a transaction")
    );
    assert!(rpc.calls().is_empty());

    rpc.reply(Method::BeginTransaction, json!({"transaction": "dHhu"}));
    txn.run().await.expect("run");
    let err = txn
        .run_query(Query::new("Task"), RequestOptions::new().read_time_millis(5_000))
        .await
        .expect_err("in progress");
    assert_eq!(
        err.message(),
        Some("read time cannot be specified in a transaction")
    );
    assert_eq!(rpc.methods(), vec![Method::BeginTransaction]);
}

#[tokio::test]
async fn plain_reads_send_consistency() {
    let rpc = ScriptedRpc::new();
    let ds = datastore(&rpc);
    rpc.reply(Method::Lookup, json!({"found": [entity_json("Task", 1, "a")]}));
    ds.get(task(1), RequestOptions::new().consistency(Consistency::Eventual))
        .await
        .expect("get");
    assert_eq!(
        rpc.request(0),
        json!({
            "projectId": "demo",
            "readOptions": {"readConsistency": "EVENTUAL"},
            "keys": [key_json("Task", 1)]
        })
    );
}

#[tokio::test]
async fn lookup_reissues_only_deferred_keys() {
    let rpc = ScriptedRpc::new();
    let ds = datastore(&rpc);
    rpc.reply(
        Method::Lookup,
        json!({
            "found": [entity_json("Task", 1, "a")],
            "deferred": [key_json("Task", 2), key_json("Task", 3)]
        }),
    );
    rpc.reply(
        Method::Lookup,
        json!({"found": [entity_json("Task", 2, "b"), entity_json("Task", 3, "c")]}),
    );

    let entities = ds
        .get_many(vec![task(1), task(2), task(3)], RequestOptions::new())
        .await
        .expect("get_many");
    let keys: Vec<Key> = entities.into_iter().map(|entity| entity.key).collect();
    assert_eq!(keys, vec![task(1), task(2), task(3)]);
    assert_eq!(rpc.methods(), vec![Method::Lookup, Method::Lookup]);
    assert_eq!(
        rpc.request(1)["keys"],
        json!([key_json("Task", 2), key_json("Task", 3)])
    );
}

#[tokio::test]
async fn query_continues_with_remaining_offset_and_limit() {
    let rpc = ScriptedRpc::new();
    let ds = datastore(&rpc);
    rpc.reply(
        Method::RunQuery,
        json!({
            "batch": {
                "skippedResults": 5,
                "entityResults": [
                    entity_json("Task", 1, "a"),
                    entity_json("Task", 2, "b"),
                    entity_json("Task", 3, "c")
                ],
                "endCursor": "Y3Vyc29yMQ==",
                "moreResults": "NOT_FINISHED"
            }
        }),
    );
    rpc.reply(
        Method::RunQuery,
        json!({
            "batch": {
                "entityResults": [entity_json("Task", 4, "d")],
                "endCursor": "Y3Vyc29yMg==",
                "moreResults": "NO_MORE_RESULTS"
            }
        }),
    );

    let results = ds
        .run_query(Query::new("Task").limit(10).offset(5), RequestOptions::new())
        .await
        .expect("query");
    assert_eq!(results.entities.len(), 4);

    let first = rpc.request(0);
    assert_eq!(first["query"]["limit"], json!(10));
    assert_eq!(first["query"]["offset"], json!(5));
    let second = rpc.request(1);
    assert_eq!(second["query"]["limit"], json!(7));
    assert!(second["query"].get("offset").is_none());
    assert_eq!(second["query"]["startCursor"], json!("Y3Vyc29yMQ=="));

    let info = results.info;
    assert_eq!(
        info.end_cursor.map(|cursor| cursor.to_base64()),
        Some("Y3Vyc29yMg==".to_string())
    );
    assert_eq!(info.more_results, Some(quarry::api::MoreResults::NoMoreResults));
}

#[tokio::test]
async fn single_key_get_unwraps_and_multi_get_returns_a_vec() {
    let rpc = ScriptedRpc::new();
    let ds = datastore(&rpc);
    rpc.reply(Method::Lookup, json!({"missing": [entity_json("Task", 1, "a")]}));
    assert_eq!(ds.get(task(1), RequestOptions::new()).await.expect("get"), None);

    rpc.reply(Method::Lookup, json!({"found": [entity_json("Task", 1, "a")]}));
    let found = ds
        .get(task(1), RequestOptions::new())
        .await
        .expect("get")
        .expect("entity");
    assert_eq!(found.key, task(1));

    rpc.reply(Method::Lookup, json!({}));
    let many = ds
        .get_many(vec![task(1)], RequestOptions::new())
        .await
        .expect("get_many");
    assert!(many.is_empty());
}

#[tokio::test]
async fn lookups_require_complete_keys() {
    let rpc = ScriptedRpc::new();
    let ds = datastore(&rpc);
    let err = ds
        .get_many(Vec::new(), RequestOptions::new())
        .await
        .expect_err("empty");
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = ds
        .get(Key::incomplete("Task"), RequestOptions::new())
        .await
        .expect_err("incomplete");
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(rpc.calls().is_empty());
}

#[tokio::test]
async fn transactional_writes_are_buffered_and_plain_writes_commit() {
    let rpc = ScriptedRpc::new();
    let ds = datastore(&rpc);

    let txn = ds.transaction(TransactionOptions::default());
    let outcome = txn.delete(vec![task(1)]).await.expect("buffer");
    assert_eq!(outcome, WriteOutcome::Buffered);
    assert_eq!(txn.pending_mutations(), 1);
    assert!(rpc.calls().is_empty());

    rpc.reply(Method::Commit, json!({"mutationResults": [{}], "indexUpdates": 1}));
    let outcome = ds.delete(vec![task(1)]).await.expect("commit");
    assert!(matches!(outcome, WriteOutcome::Committed(_)));
    assert_eq!(rpc.methods(), vec![Method::Commit]);
    assert_eq!(
        rpc.request(0),
        json!({
            "projectId": "demo",
            "mode": "NON_TRANSACTIONAL",
            "mutations": [{"delete": key_json("Task", 1)}]
        })
    );
}

#[tokio::test]
async fn plain_save_back_fills_allocated_keys() {
    let rpc = ScriptedRpc::new();
    let ds = datastore(&rpc);
    rpc.reply(
        Method::Commit,
        json!({"mutationResults": [{"key": key_json("Task", 42), "version": "1"}]}),
    );
    let response = ds
        .insert(vec![Entity::new(Key::incomplete("Task")).with_property("title", "a")])
        .await
        .expect("insert")
        .committed()
        .expect("committed");
    assert_eq!(response.keys, vec![task(42)]);
}

#[tokio::test]
async fn commit_begins_dedups_and_sends_the_handle() {
    let rpc = ScriptedRpc::new();
    let ds = datastore(&rpc);
    let txn = ds.transaction(TransactionOptions::default());
    txn.upsert(vec![Entity::new(task(1)).with_property("title", "old")])
        .await
        .expect("buffer");
    txn.delete(vec![task(2)]).await.expect("buffer");
    txn.upsert(vec![Entity::new(task(1)).with_property("title", "new")])
        .await
        .expect("buffer");

    rpc.reply(Method::BeginTransaction, json!({"transaction": "dHhu"}));
    rpc.reply(Method::Commit, json!({"mutationResults": [{}, {}]}));
    txn.commit().await.expect("commit");

    assert_eq!(rpc.methods(), vec![Method::BeginTransaction, Method::Commit]);
    let commit = rpc.request(1);
    assert_eq!(commit["mode"], json!("TRANSACTIONAL"));
    assert_eq!(commit["transaction"], json!("dHhu"));
    let mutations = commit["mutations"].as_array().expect("mutations");
    assert_eq!(mutations.len(), 2);
    assert_eq!(
        mutations[0]["upsert"]["properties"]["title"],
        json!({"stringValue": "new"})
    );
}

#[tokio::test]
async fn failed_commit_rolls_back_and_surfaces_commit_error() {
    let rpc = ScriptedRpc::new();
    let ds = datastore(&rpc);
    let txn = ds.transaction(TransactionOptions::default());
    rpc.reply(Method::BeginTransaction, json!({"transaction": "dHhu"}));
    txn.run().await.expect("run");
    txn.delete(vec![task(1)]).await.expect("buffer");

    rpc.fail(Method::Commit, ErrorKind::Aborted, "contention");
    rpc.fail(Method::Rollback, ErrorKind::Unavailable, "rollback down");
    let err = txn.commit().await.expect_err("commit");
    assert_eq!(err.kind(), ErrorKind::Aborted);
    assert_eq!(
        rpc.methods(),
        vec![Method::BeginTransaction, Method::Commit, Method::Rollback]
    );
}

#[tokio::test]
async fn merge_surfaces_fetch_error_when_rollback_also_fails() {
    let rpc = ScriptedRpc::new();
    let ds = datastore(&rpc);
    rpc.reply(Method::BeginTransaction, json!({"transaction": "dHhu"}));
    rpc.fail(Method::Lookup, ErrorKind::Unavailable, "lookup down");
    rpc.fail(Method::Rollback, ErrorKind::Internal, "rollback down");

    let err = ds
        .merge(vec![Entity::new(task(1)).with_property("done", true)])
        .await
        .expect_err("merge");
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert_eq!(err.message(), Some("lookup down"));
    assert_eq!(
        rpc.methods(),
        vec![Method::BeginTransaction, Method::Lookup, Method::Rollback]
    );
}

#[tokio::test]
async fn merge_overlays_caller_properties() {
    let rpc = ScriptedRpc::new();
    let ds = datastore(&rpc);
    rpc.reply(Method::BeginTransaction, json!({"transaction": "dHhu"}));
    rpc.reply(Method::Lookup, json!({"found": [entity_json("Task", 1, "keep")]}));
    rpc.reply(Method::Commit, json!({"mutationResults": [{}]}));

    ds.merge(vec![Entity::new(task(1)).with_property("done", true)])
        .await
        .expect("merge");
    let lookup = rpc.request(1);
    assert_eq!(lookup["readOptions"], json!({"transaction": "dHhu"}));
    let commit = rpc.request(2);
    assert_eq!(
        commit["mutations"][0]["upsert"]["properties"],
        json!({"done": {"booleanValue": true}, "title": {"stringValue": "keep"}})
    );
}

#[tokio::test]
async fn allocate_ids_maps_keys_in_order() {
    let rpc = ScriptedRpc::new();
    let ds = datastore(&rpc);

    let err = ds.allocate_ids(task(1), 2).await.expect_err("complete");
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(ds
        .allocate_ids(Key::incomplete("Task"), 0)
        .await
        .expect("zero")
        .is_empty());
    assert!(rpc.calls().is_empty());

    rpc.reply(
        Method::AllocateIds,
        json!({"keys": [key_json("Task", 11), key_json("Task", 12)]}),
    );
    let keys = ds
        .allocate_ids(Key::incomplete("Task"), 2)
        .await
        .expect("allocate");
    assert_eq!(keys, vec![task(11), task(12)]);
    assert_eq!(
        rpc.request(0)["keys"],
        json!([{"path": [{"kind": "Task"}]}, {"path": [{"kind": "Task"}]}])
    );
}

#[tokio::test]
async fn aggregation_rows_are_plain_values() {
    let rpc = ScriptedRpc::new();
    let ds = datastore(&rpc);
    rpc.reply(
        Method::RunAggregationQuery,
        json!({
            "batch": {
                "aggregationResults": [
                    {"aggregateProperties": {"total": {"integerValue": "3"}}}
                ],
                "moreResults": "NO_MORE_RESULTS"
            }
        }),
    );
    let results = ds
        .run_aggregation_query(
            AggregateQuery::new(Query::new("Task")).count("total"),
            RequestOptions::new(),
        )
        .await
        .expect("aggregate");
    assert_eq!(results.rows.len(), 1);
    assert_eq!(results.rows[0]["total"], json!(3));

    let request = rpc.request(0);
    assert_eq!(
        request["aggregationQuery"]["aggregations"],
        json!([{"count": {}, "alias": "total"}])
    );
}

#[tokio::test]
async fn aggregation_without_aggregations_is_rejected_before_rpc() {
    let rpc = ScriptedRpc::new();
    let ds = datastore(&rpc);
    let err = ds
        .run_aggregation_query(AggregateQuery::new(Query::new("Task")), RequestOptions::new())
        .await
        .expect_err("empty");
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(rpc.calls().is_empty());
}

#[tokio::test]
async fn aggregation_as_first_transactional_read_begins_the_transaction() {
    let rpc = ScriptedRpc::new();
    let ds = datastore(&rpc);
    let txn = ds.transaction(TransactionOptions::default());
    rpc.reply(
        Method::RunAggregationQuery,
        json!({
            "batch": {
                "aggregationResults": [
                    {"aggregateProperties": {"total": {"integerValue": "0"}}}
                ],
                "moreResults": "NO_MORE_RESULTS"
            },
            "transaction": "dHhu"
        }),
    );
    rpc.reply(Method::Lookup, json!({}));

    txn.run_aggregation_query(
        AggregateQuery::new(Query::new("Task")).count("total"),
        RequestOptions::new(),
    )
    .await
    .expect("aggregate");
    assert_eq!(
        rpc.request(0)["readOptions"],
        json!({"newTransaction": {"readWrite": {}}})
    );
    assert_eq!(txn.state(), TransactionState::InProgress);
    assert_eq!(txn.id().as_deref(), Some(&b"txn"[..]));

    txn.get(task(1), RequestOptions::new()).await.expect("get");
    assert_eq!(rpc.request(1)["readOptions"], json!({"transaction": "dHhu"}));
}
