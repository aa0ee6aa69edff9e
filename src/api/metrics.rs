//! Purpose: Decode explain metrics attached to query and aggregation responses.
//! Exports: `ExplainMetrics`, `PlanSummary`, `ExecutionStats`.
//! Role: Turns the opaque `explainMetrics` payload into typed, caller-friendly stats.
//! Invariants: Absent or empty metrics decode to `None`, never to a zero-valued struct.
//! Invariants: Numeric counters accept JSON numbers or decimal strings.

use std::time::Duration;

use serde_json::Value as JsonValue;

use crate::core::error::Error;
use crate::core::key::decode_int64;
use crate::core::structured::{decode_struct, decode_structured_value};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExplainMetrics {
    pub plan_summary: Option<PlanSummary>,
    pub execution_stats: Option<ExecutionStats>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlanSummary {
    /// One plain record per index the planner used.
    pub indexes_used: Vec<JsonValue>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionStats {
    pub results_returned: i64,
    pub execution_duration: Option<Duration>,
    pub read_operations: i64,
    pub debug_stats: Option<JsonValue>,
}

pub(crate) fn decode_explain_metrics(
    raw: Option<&JsonValue>,
) -> Result<Option<ExplainMetrics>, Error> {
    let Some(raw) = raw.filter(|raw| !raw.is_null()) else {
        return Ok(None);
    };

    let plan_summary = match raw
        .get("planSummary")
        .and_then(|summary| summary.get("indexesUsed"))
        .filter(|v| !v.is_null())
    {
        Some(indexes) => Some(decode_plan_summary(indexes)?),
        None => None,
    };
    let execution_stats = match raw.get("executionStats").filter(|v| !v.is_null()) {
        Some(stats) => Some(decode_execution_stats(stats)?),
        None => None,
    };

    if plan_summary.is_none() && execution_stats.is_none() {
        return Ok(None);
    }
    Ok(Some(ExplainMetrics {
        plan_summary,
        execution_stats,
    }))
}

/// `indexes` is the non-null `planSummary.indexesUsed` value.
fn decode_plan_summary(indexes: &JsonValue) -> Result<PlanSummary, Error> {
    let JsonValue::Array(indexes) = indexes else {
        return Err(Error::decode("planSummary.indexesUsed must be an array"));
    };
    let indexes_used = indexes
        .iter()
        .map(decode_struct)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PlanSummary { indexes_used })
}

fn decode_execution_stats(raw: &JsonValue) -> Result<ExecutionStats, Error> {
    let debug_stats = match raw.get("debugStats").filter(|v| !v.is_null()) {
        Some(stats) if stats.get("fields").is_some() => Some(decode_struct(stats)?),
        Some(JsonValue::Object(map)) => {
            // Plain map whose values may still be in structured form.
            let mut out = serde_json::Map::new();
            for (name, value) in map {
                let decoded = if value.is_object() && looks_structured(value) {
                    decode_structured_value(value)?
                } else {
                    value.clone()
                };
                out.insert(name.clone(), decoded);
            }
            Some(JsonValue::Object(out))
        }
        Some(other) => Some(other.clone()),
        None => None,
    };

    Ok(ExecutionStats {
        results_returned: counter(raw, "resultsReturned")?,
        execution_duration: match raw.get("executionDuration").filter(|v| !v.is_null()) {
            Some(duration) => Some(decode_duration(duration)?),
            None => None,
        },
        read_operations: counter(raw, "readOperations")?,
        debug_stats,
    })
}

fn looks_structured(value: &JsonValue) -> bool {
    const KINDS: [&str; 6] = [
        "nullValue",
        "numberValue",
        "stringValue",
        "boolValue",
        "structValue",
        "listValue",
    ];
    value
        .as_object()
        .is_some_and(|obj| obj.len() == 1 && KINDS.iter().any(|kind| obj.contains_key(*kind)))
}

fn counter(raw: &JsonValue, field: &str) -> Result<i64, Error> {
    match raw.get(field) {
        None | Some(JsonValue::Null) => Ok(0),
        Some(value) => decode_int64(value)
            .map_err(|err| Error::decode(format!("invalid executionStats.{field}")).with_source(err)),
    }
}

/// Accepts the JSON rendering (`"1.5s"`) or the object form (`{seconds, nanos}`).
pub(crate) fn decode_duration(raw: &JsonValue) -> Result<Duration, Error> {
    match raw {
        JsonValue::String(text) => parse_duration_text(text),
        JsonValue::Object(obj) => {
            let seconds = match obj.get("seconds") {
                None | Some(JsonValue::Null) => 0,
                Some(value) => decode_int64(value)?,
            };
            let nanos = match obj.get("nanos") {
                None | Some(JsonValue::Null) => 0,
                Some(value) => decode_int64(value)?,
            };
            let seconds = u64::try_from(seconds)
                .map_err(|_| Error::decode("execution duration must not be negative"))?;
            let nanos = u32::try_from(nanos)
                .ok()
                .filter(|nanos| *nanos < 1_000_000_000)
                .ok_or_else(|| Error::decode("execution duration nanos out of range"))?;
            Ok(Duration::new(seconds, nanos))
        }
        other => Err(Error::decode(format!("invalid execution duration {other}"))),
    }
}

fn parse_duration_text(text: &str) -> Result<Duration, Error> {
    let invalid = || Error::decode(format!("invalid execution duration {text:?}"));
    let body = text.strip_suffix('s').ok_or_else(invalid)?;
    let (whole, fraction) = body.split_once('.').unwrap_or((body, ""));
    let seconds: u64 = whole.parse().map_err(|_| invalid())?;
    if fraction.len() > 9 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let nanos = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{fraction:0<9}");
        padded.parse::<u32>().map_err(|_| invalid())?
    };
    Ok(Duration::new(seconds, nanos))
}
