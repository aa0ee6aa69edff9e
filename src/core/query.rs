//! Purpose: Describe queries and aggregations and translate them into the wire query shape.
//! Exports: `Query`, `Filter`, `Operator`, `CompositeOperator`, `Order`, `Direction`,
//! `Aggregation`, `AggregateQuery`, `query_to_wire`, `aggregation_query_to_wire`.
//! Role: Pure data + translation; pagination copies a `Query` and rewrites cursor/offset/limit.
//! Invariants: `limit == -1` means unbounded and `offset == -1` means unset.
//! Invariants: Translation never mutates its input and fails with `InvalidArgument`.

use serde_json::{Map, Value as JsonValue, json};

use crate::core::cursor::Cursor;
use crate::core::error::Error;
use crate::core::key::Key;
use crate::core::value::{Value, encode_value};

pub const KEY_PROPERTY: &str = "__key__";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    In,
    NotIn,
    HasAncestor,
}

impl Operator {
    fn wire_name(self) -> &'static str {
        match self {
            Operator::Equal => "EQUAL",
            Operator::NotEqual => "NOT_EQUAL",
            Operator::LessThan => "LESS_THAN",
            Operator::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            Operator::GreaterThan => "GREATER_THAN",
            Operator::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            Operator::In => "IN",
            Operator::NotIn => "NOT_IN",
            Operator::HasAncestor => "HAS_ANCESTOR",
        }
    }

    /// Parse the symbolic operators accepted by query builders (`=`, `<`, `IN`, ...).
    pub fn parse(symbol: &str) -> Option<Self> {
        let op = match symbol.trim().to_ascii_uppercase().as_str() {
            "=" | "==" => Operator::Equal,
            "!=" => Operator::NotEqual,
            "<" => Operator::LessThan,
            "<=" => Operator::LessThanOrEqual,
            ">" => Operator::GreaterThan,
            ">=" => Operator::GreaterThanOrEqual,
            "IN" => Operator::In,
            "NOT_IN" | "NOT IN" => Operator::NotIn,
            "HAS_ANCESTOR" | "HAS ANCESTOR" => Operator::HasAncestor,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompositeOperator {
    And,
    Or,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Property {
        name: String,
        op: Operator,
        value: Value,
    },
    Composite {
        op: CompositeOperator,
        filters: Vec<Filter>,
    },
}

impl Filter {
    pub fn property(name: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Filter::Property {
            name: name.into(),
            op,
            value: value.into(),
        }
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::Composite {
            op: CompositeOperator::And,
            filters,
        }
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Composite {
            op: CompositeOperator::Or,
            filters,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Order {
    pub property: String,
    pub direction: Direction,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub namespace: Option<String>,
    pub kinds: Vec<String>,
    pub filters: Vec<Filter>,
    pub orders: Vec<Order>,
    pub projection: Vec<String>,
    pub distinct_on: Vec<String>,
    pub start_cursor: Option<Cursor>,
    pub end_cursor: Option<Cursor>,
    pub limit: i32,
    pub offset: i32,
}

impl Query {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kinds: vec![kind.into()],
            ..Self::kindless()
        }
    }

    pub fn kindless() -> Self {
        Self {
            namespace: None,
            kinds: Vec::new(),
            filters: Vec::new(),
            orders: Vec::new(),
            projection: Vec::new(),
            distinct_on: Vec::new(),
            start_cursor: None,
            end_cursor: None,
            limit: -1,
            offset: -1,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn has_ancestor(self, ancestor: Key) -> Self {
        self.filter(Filter::property(
            KEY_PROPERTY,
            Operator::HasAncestor,
            ancestor,
        ))
    }

    pub fn order(mut self, property: impl Into<String>, direction: Direction) -> Self {
        self.orders.push(Order {
            property: property.into(),
            direction,
        });
        self
    }

    pub fn select(mut self, properties: &[&str]) -> Self {
        self.projection
            .extend(properties.iter().map(|property| property.to_string()));
        self
    }

    pub fn distinct_on(mut self, properties: &[&str]) -> Self {
        self.distinct_on
            .extend(properties.iter().map(|property| property.to_string()));
        self
    }

    pub fn start(mut self, cursor: Cursor) -> Self {
        self.start_cursor = Some(cursor);
        self
    }

    pub fn end(mut self, cursor: Cursor) -> Self {
        self.end_cursor = Some(cursor);
        self
    }

    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: i32) -> Self {
        self.offset = offset;
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AggregationKind {
    Count,
    Sum(String),
    Average(String),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Aggregation {
    pub alias: Option<String>,
    pub kind: AggregationKind,
}

impl Aggregation {
    pub fn count() -> Self {
        Self {
            alias: None,
            kind: AggregationKind::Count,
        }
    }

    pub fn sum(property: impl Into<String>) -> Self {
        Self {
            alias: None,
            kind: AggregationKind::Sum(property.into()),
        }
    }

    pub fn average(property: impl Into<String>) -> Self {
        Self {
            alias: None,
            kind: AggregationKind::Average(property.into()),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AggregateQuery {
    pub query: Query,
    pub aggregations: Vec<Aggregation>,
}

impl AggregateQuery {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            aggregations: Vec::new(),
        }
    }

    pub fn aggregate(mut self, aggregation: Aggregation) -> Self {
        self.aggregations.push(aggregation);
        self
    }

    pub fn count(self, alias: impl Into<String>) -> Self {
        self.aggregate(Aggregation::count().alias(alias))
    }
}

pub fn query_to_wire(query: &Query) -> Result<JsonValue, Error> {
    let mut out = Map::new();

    if !query.projection.is_empty() {
        let projection: Vec<JsonValue> = query
            .projection
            .iter()
            .map(|name| json!({ "property": { "name": name } }))
            .collect();
        out.insert("projection".to_string(), JsonValue::Array(projection));
    }

    if !query.kinds.is_empty() {
        let kinds: Vec<JsonValue> = query
            .kinds
            .iter()
            .map(|kind| json!({ "name": kind }))
            .collect();
        out.insert("kind".to_string(), JsonValue::Array(kinds));
    }

    match query.filters.as_slice() {
        [] => {}
        [single] => {
            out.insert("filter".to_string(), filter_to_wire(single)?);
        }
        many => {
            let composite = Filter::and(many.to_vec());
            out.insert("filter".to_string(), filter_to_wire(&composite)?);
        }
    }

    if !query.orders.is_empty() {
        let orders: Vec<JsonValue> = query
            .orders
            .iter()
            .map(|order| {
                let direction = match order.direction {
                    Direction::Ascending => "ASCENDING",
                    Direction::Descending => "DESCENDING",
                };
                json!({ "property": { "name": order.property }, "direction": direction })
            })
            .collect();
        out.insert("order".to_string(), JsonValue::Array(orders));
    }

    if !query.distinct_on.is_empty() {
        let distinct: Vec<JsonValue> = query
            .distinct_on
            .iter()
            .map(|name| json!({ "name": name }))
            .collect();
        out.insert("distinctOn".to_string(), JsonValue::Array(distinct));
    }

    if let Some(cursor) = &query.start_cursor {
        out.insert("startCursor".to_string(), json!(cursor.to_base64()));
    }
    if let Some(cursor) = &query.end_cursor {
        out.insert("endCursor".to_string(), json!(cursor.to_base64()));
    }
    if query.offset > 0 {
        out.insert("offset".to_string(), json!(query.offset));
    }
    if query.limit > 0 {
        out.insert("limit".to_string(), json!(query.limit));
    }

    Ok(JsonValue::Object(out))
}

pub fn aggregation_query_to_wire(aggregate: &AggregateQuery) -> Result<JsonValue, Error> {
    if aggregate.aggregations.is_empty() {
        return Err(Error::invalid_argument(
            "an aggregation query needs at least one aggregation",
        ));
    }
    let nested = query_to_wire(&aggregate.query)?;
    let aggregations = aggregate
        .aggregations
        .iter()
        .map(aggregation_to_wire)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({
        "nestedQuery": nested,
        "aggregations": aggregations,
    }))
}

fn aggregation_to_wire(aggregation: &Aggregation) -> Result<JsonValue, Error> {
    let mut out = Map::new();
    match &aggregation.kind {
        AggregationKind::Count => {
            out.insert("count".to_string(), json!({}));
        }
        AggregationKind::Sum(property) | AggregationKind::Average(property) => {
            if property.is_empty() {
                return Err(Error::invalid_argument(
                    "sum and average aggregations need a property",
                ));
            }
            let name = match aggregation.kind {
                AggregationKind::Sum(_) => "sum",
                _ => "avg",
            };
            out.insert(name.to_string(), json!({ "property": { "name": property } }));
        }
    }
    if let Some(alias) = &aggregation.alias {
        out.insert("alias".to_string(), json!(alias));
    }
    Ok(JsonValue::Object(out))
}

fn filter_to_wire(filter: &Filter) -> Result<JsonValue, Error> {
    match filter {
        Filter::Property { name, op, value } => {
            check_filter_value(name, *op, value)?;
            Ok(json!({
                "propertyFilter": {
                    "property": { "name": name },
                    "op": op.wire_name(),
                    "value": encode_value(value)?,
                }
            }))
        }
        Filter::Composite { op, filters } => {
            if filters.is_empty() {
                return Err(Error::invalid_argument(
                    "composite filters need at least one filter",
                ));
            }
            let filters = filters
                .iter()
                .map(filter_to_wire)
                .collect::<Result<Vec<_>, _>>()?;
            let op = match op {
                CompositeOperator::And => "AND",
                CompositeOperator::Or => "OR",
            };
            Ok(json!({ "compositeFilter": { "op": op, "filters": filters } }))
        }
    }
}

fn check_filter_value(name: &str, op: Operator, value: &Value) -> Result<(), Error> {
    match op {
        Operator::In | Operator::NotIn => {
            let Value::Array(values) = value else {
                return Err(Error::invalid_argument(format!(
                    "{} filter on {name} needs an array value",
                    op.wire_name()
                )));
            };
            if name == KEY_PROPERTY && !values.iter().all(|value| matches!(value, Value::Key(_))) {
                return Err(Error::invalid_argument(
                    "__key__ filters must compare against keys",
                ));
            }
        }
        Operator::HasAncestor => {
            if !matches!(value, Value::Key(_)) {
                return Err(Error::invalid_argument(
                    "HAS_ANCESTOR filters need a key value",
                ));
            }
        }
        _ => {
            if name == KEY_PROPERTY && !matches!(value, Value::Key(_)) {
                return Err(Error::invalid_argument(
                    "__key__ filters must compare against keys",
                ));
            }
        }
    }
    Ok(())
}
