//! Purpose: Plan the next pagination round for lookups and queries without performing any I/O.
//! Exports: `MoreResults`, `QueryBatchSummary`, `QueryRoundPlan`, `plan_next_query_round`,
//! `LookupRoundPlan`, `plan_next_lookup_round`.
//! Role: Pure decision layer used by the pagination drivers in `api::pagination`.
//! Invariants: No side effects; output depends only on the current request and the round summary.
//! Invariants: The caller's query is never mutated; continuation rounds get a fresh copy.
use serde::Deserialize;

use crate::core::cursor::Cursor;
use crate::core::error::Error;
use crate::core::key::Key;
use crate::core::query::Query;

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MoreResults {
    NotFinished,
    MoreResultsAfterLimit,
    MoreResultsAfterCursor,
    NoMoreResults,
    #[default]
    #[serde(other)]
    MoreResultsTypeUnspecified,
}

impl MoreResults {
    pub fn as_str(self) -> &'static str {
        match self {
            MoreResults::NotFinished => "NOT_FINISHED",
            MoreResults::MoreResultsAfterLimit => "MORE_RESULTS_AFTER_LIMIT",
            MoreResults::MoreResultsAfterCursor => "MORE_RESULTS_AFTER_CURSOR",
            MoreResults::NoMoreResults => "NO_MORE_RESULTS",
            MoreResults::MoreResultsTypeUnspecified => "MORE_RESULTS_TYPE_UNSPECIFIED",
        }
    }
}

/// What the planner needs to know about one `runQuery` batch.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryBatchSummary {
    pub more_results: MoreResults,
    pub end_cursor: Option<Cursor>,
    pub skipped_results: i64,
    pub entity_count: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueryRoundPlan {
    Finished {
        end_cursor: Option<Cursor>,
        more_results: MoreResults,
    },
    Continue(Query),
}

pub fn plan_next_query_round(
    current: &Query,
    batch: &QueryBatchSummary,
) -> Result<QueryRoundPlan, Error> {
    if batch.more_results != MoreResults::NotFinished {
        return Ok(QueryRoundPlan::Finished {
            end_cursor: batch.end_cursor.clone(),
            more_results: batch.more_results,
        });
    }

    let Some(end_cursor) = batch.end_cursor.clone() else {
        return Err(Error::decode(
            "server reported more results without an end cursor",
        ));
    };

    let mut next = current.clone();
    next.start_cursor = Some(end_cursor.clone());

    let offset = i64::from(current.offset.max(0)) - batch.skipped_results;
    next.offset = offset.clamp(0, i64::from(i32::MAX)) as i32;

    if current.limit > 0 {
        let remaining = i64::from(current.limit) - batch.entity_count as i64;
        if remaining <= 0 {
            return Ok(QueryRoundPlan::Finished {
                end_cursor: Some(end_cursor),
                more_results: MoreResults::MoreResultsAfterLimit,
            });
        }
        next.limit = remaining as i32;
    }

    Ok(QueryRoundPlan::Continue(next))
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LookupRoundPlan {
    Finished,
    Continue(Vec<Key>),
}

/// The deferred key set is the whole continuation token for lookups.
pub fn plan_next_lookup_round(deferred: Vec<Key>) -> LookupRoundPlan {
    if deferred.is_empty() {
        LookupRoundPlan::Finished
    } else {
        LookupRoundPlan::Continue(deferred)
    }
}
