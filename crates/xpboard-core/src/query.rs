//! Record query engine
//!
//! Filters, orders, truncates and aggregates in-memory records. Every
//! function here is pure: inputs are never mutated and nothing is cached.
//!
//! Filter semantics:
//! - predicates on different fields combine with AND
//! - `eq` is strict value equality (numbers compare by value)
//! - `like` strips every `%` from the pattern and then tests case-sensitive
//!   substring containment. This is looser than SQL `LIKE`: `%go` matches
//!   `go-reloaded` because the wildcard position is not honoured.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::record::Record;

/// Fields the engine knows how to order by
const SORTABLE_FIELDS: &[&str] = &["createdAt"];

/// Wildcard marker stripped from `like` patterns
const LIKE_WILDCARD: char = '%';

/// Predicate on a single field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Strict equality
    #[serde(default, alias = "_eq", skip_serializing_if = "Option::is_none")]
    pub eq: Option<Value>,

    /// Substring containment after stripping `%`
    #[serde(default, alias = "_like", skip_serializing_if = "Option::is_none")]
    pub like: Option<String>,
}

impl Predicate {
    pub fn eq(value: impl Into<Value>) -> Self {
        Self {
            eq: Some(value.into()),
            like: None,
        }
    }

    pub fn like(pattern: impl Into<String>) -> Self {
        Self {
            eq: None,
            like: Some(pattern.into()),
        }
    }

    /// Evaluate against a field value (`None` when the record lacks the field)
    pub fn matches(&self, value: Option<&Value>) -> bool {
        if let Some(expected) = &self.eq {
            match value {
                Some(actual) if values_equal(actual, expected) => {}
                _ => return false,
            }
        }

        if let Some(pattern) = &self.like {
            let needle: String = pattern.chars().filter(|c| *c != LIKE_WILDCARD).collect();
            match value.and_then(Value::as_str) {
                Some(haystack) if haystack.contains(&needle) => {}
                _ => return false,
            }
        }

        true
    }
}

/// Per-field predicates combined with AND
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSpec(BTreeMap<String, Predicate>);

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality predicate on `field`, keeping any `like` already set
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.entry(field.into()).or_default().eq = Some(value.into());
        self
    }

    /// Add a pattern predicate on `field`, keeping any `eq` already set
    pub fn like(mut self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.0.entry(field.into()).or_default().like = Some(pattern.into());
        self
    }

    /// Replace whatever predicate `field` had
    pub fn set(&mut self, field: impl Into<String>, predicate: Predicate) {
        self.0.insert(field.into(), predicate);
    }

    pub fn get(&self, field: &str) -> Option<&Predicate> {
        self.0.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build a filter from loosely shaped JSON.
    ///
    /// Accepts `{"path": {"like": "%go%"}, "userId": {"_eq": 1}}`. Entries whose
    /// predicate is not an object, and predicate keys other than
    /// `eq`/`_eq`/`like`/`_like`, are ignored.
    pub fn from_json(value: &Value) -> Self {
        let mut filter = Self::new();
        let Some(fields) = value.as_object() else {
            return filter;
        };

        for (field, raw) in fields {
            let Some(raw) = raw.as_object() else {
                tracing::debug!("Ignoring non-object predicate for field '{}'", field);
                continue;
            };
            let predicate = Predicate {
                // A null operand means no constraint, as with serde
                eq: raw
                    .get("eq")
                    .or_else(|| raw.get("_eq"))
                    .filter(|v| !v.is_null())
                    .cloned(),
                like: raw
                    .get("like")
                    .or_else(|| raw.get("_like"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            };
            filter.set(field.clone(), predicate);
        }

        filter
    }

    /// Whether a record satisfies every predicate
    pub fn matches(&self, record: &Record) -> bool {
        self.0
            .iter()
            .all(|(field, predicate)| predicate.matches(record.get(field)))
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(Direction::Asc),
            "desc" => Ok(Direction::Desc),
            other => Err(format!("unknown sort direction '{}'", other)),
        }
    }
}

/// Single-field order clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
}

impl OrderSpec {
    pub fn new(field: impl Into<String>, direction: Direction) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    /// Parse the wire form `{"createdAt": "desc"}`.
    ///
    /// Only the first entry counts. Returns `None` for an empty map, a
    /// non-object value, or an unknown direction.
    pub fn from_json(value: &Value) -> Option<Self> {
        let (field, direction) = value.as_object()?.iter().next()?;
        let direction = direction.as_str()?.parse().ok()?;
        Some(Self::new(field.clone(), direction))
    }

    /// Whether the engine can order by this field
    pub fn is_supported(&self) -> bool {
        SORTABLE_FIELDS.contains(&self.field.as_str())
    }
}

/// Result of a sum aggregation
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Aggregate {
    pub sum: f64,
    pub count: usize,
}

/// Pass/fail tally over graded progress records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PassFail {
    pub pass: usize,
    pub fail: usize,
}

impl PassFail {
    pub fn total(&self) -> usize {
        self.pass + self.fail
    }

    /// Pass percentage, 0.0 when nothing was graded
    pub fn pass_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.pass as f64 / self.total() as f64 * 100.0
        }
    }
}

/// Filter, order and truncate `records`.
///
/// - No filter keeps everything.
/// - Ordering only applies to supported fields; anything else keeps input order.
///   Records whose sort key is missing or not a timestamp go last in both
///   directions. The sort is stable.
/// - Only a positive `limit` truncates; zero and negatives mean no limit.
pub fn query(
    records: &[Record],
    filter: Option<&FilterSpec>,
    order: Option<&OrderSpec>,
    limit: Option<i64>,
) -> Vec<Record> {
    let mut matched = filtered(records, filter);

    if let Some(order) = order {
        if order.is_supported() {
            matched = sort_by_timestamp(matched, &order.field, order.direction);
        } else {
            tracing::debug!("Ignoring order on unsupported field '{}'", order.field);
        }
    }

    if let Some(limit) = limit.filter(|l| *l > 0) {
        matched.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    }

    matched
}

/// Sum `field` over the records matching `filter`.
///
/// Ordering and limits never apply here. Missing or non-numeric values count
/// as zero and an empty match sums to zero.
pub fn aggregate_sum(records: &[Record], filter: Option<&FilterSpec>, field: &str) -> f64 {
    aggregate(records, filter, field).sum
}

/// Sum and count of `field` over the records matching `filter`
pub fn aggregate(records: &[Record], filter: Option<&FilterSpec>, field: &str) -> Aggregate {
    records
        .iter()
        .filter(|r| filter.is_none_or(|f| f.matches(r)))
        .fold(Aggregate::default(), |acc, record| Aggregate {
            sum: acc.sum + record.get_f64(field).unwrap_or(0.0),
            count: acc.count + 1,
        })
}

/// Count the records matching `filter`
pub fn count(records: &[Record], filter: Option<&FilterSpec>) -> usize {
    records
        .iter()
        .filter(|r| filter.is_none_or(|f| f.matches(r)))
        .count()
}

/// Tally passes (`grade >= 1`) and fails over the records matching `filter`.
///
/// Records without a numeric grade have not been graded yet and are skipped.
pub fn pass_fail(records: &[Record], filter: Option<&FilterSpec>) -> PassFail {
    records
        .iter()
        .filter(|r| filter.is_none_or(|f| f.matches(r)))
        .filter_map(|r| r.get_f64("grade"))
        .fold(PassFail::default(), |mut tally, grade| {
            if grade >= 1.0 {
                tally.pass += 1;
            } else {
                tally.fail += 1;
            }
            tally
        })
}

fn filtered(records: &[Record], filter: Option<&FilterSpec>) -> Vec<Record> {
    match filter {
        Some(filter) if !filter.is_empty() => records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect(),
        _ => records.to_vec(),
    }
}

fn sort_by_timestamp(records: Vec<Record>, field: &str, direction: Direction) -> Vec<Record> {
    // Parse once per record rather than once per comparison
    let mut keyed: Vec<(Option<DateTime<Utc>>, Record)> = records
        .into_iter()
        .map(|r| (r.get_str(field).and_then(parse_timestamp), r))
        .collect();

    keyed.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => match direction {
            Direction::Asc => a.cmp(b),
            Direction::Desc => b.cmp(a),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    keyed.into_iter().map(|(_, record)| record).collect()
}

/// Parse an ISO-8601 timestamp. Offset-less values are taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}
