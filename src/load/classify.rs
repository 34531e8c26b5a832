//! Row classification for dimension tables
//!
//! A dimension row whose identifier is already in the warehouse is updated,
//! any other row is inserted. The identifier set is fetched once per
//! (table, job) pair before any row of that pair is written, so every row in
//! one export is judged against the same snapshot.
//!
//! Export cells arrive as text. Text identifiers match exactly, so `007` is
//! not `7`. When the warehouse hands back numeric identifiers, a row's text
//! identifier is compared by numeric value instead.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::HashSet;

use super::sql::build_identifier_query;
use crate::error::LoadResult;
use crate::frame::Row;
use crate::warehouse::Warehouse;

/// Canonical form of an identifier value
pub type IdentifierKey = String;

/// Handling of repeated identifiers inside one export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Write every row and let the warehouse constraints decide
    #[default]
    KeepAll,
    /// Keep only the last row for each identifier
    KeepLast,
}

/// Insert or update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowClass {
    Insert,
    Update,
}

fn float_key(f: f64) -> IdentifierKey {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        (f as i64).to_string()
    } else {
        f.to_string()
    }
}

fn number_key(n: &Number) -> IdentifierKey {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) => float_key(f),
        None => n.to_string(),
    }
}

/// Numeric key of a text identifier, if it reads as a finite number
fn numeric_text_key(s: &str) -> Option<IdentifierKey> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(i.to_string());
    }
    if let Ok(u) = s.parse::<u64>() {
        return Some(u.to_string());
    }
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(float_key)
}

/// Canonical key for an identifier; `None` for null
///
/// Text is kept verbatim. Integral floats share the key of the matching
/// integer, so `7.0` and `7` are the same identifier.
pub fn identifier_key(value: &Value) -> Option<IdentifierKey> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(number_key(n)),
        other => Some(other.to_string()),
    }
}

/// Identifiers stored in one warehouse table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistingIdentifiers {
    text: HashSet<IdentifierKey>,
    numeric: HashSet<IdentifierKey>,
}

impl ExistingIdentifiers {
    /// Build the set from identifier values as the warehouse returned them
    pub fn from_values(values: &[Value]) -> Self {
        let mut set = Self::default();
        for value in values {
            match value {
                Value::Null => {}
                Value::Number(n) => {
                    set.numeric.insert(number_key(n));
                }
                other => {
                    if let Some(key) = identifier_key(other) {
                        set.text.insert(key);
                    }
                }
            }
        }
        set
    }

    /// Whether a row's identifier cell is already stored
    pub fn contains(&self, value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::String(s) => {
                self.text.contains(s)
                    || numeric_text_key(s).is_some_and(|key| self.numeric.contains(&key))
            }
            other => identifier_key(other)
                .is_some_and(|key| self.numeric.contains(&key) || self.text.contains(&key)),
        }
    }
}

/// Fetch every identifier currently stored in `table`
pub async fn existing_identifiers<W: Warehouse + ?Sized>(
    warehouse: &mut W,
    table: &str,
    id_column: &str,
) -> LoadResult<ExistingIdentifiers> {
    let query = build_identifier_query(table, id_column);
    let values = warehouse.query_column(&query).await?;

    tracing::debug!(
        table = %table,
        existing = values.len(),
        "fetched existing identifiers"
    );

    Ok(ExistingIdentifiers::from_values(&values))
}

/// Classify one row by its first cell
pub fn classify_row(row: &[Value], existing: &ExistingIdentifiers) -> RowClass {
    match row.first() {
        Some(id) if existing.contains(id) => RowClass::Update,
        _ => RowClass::Insert,
    }
}

/// Classify every row against one identifier snapshot, keeping row order
pub fn classify_rows<'a>(
    rows: &'a [Row],
    existing: &ExistingIdentifiers,
) -> Vec<(RowClass, &'a Row)> {
    rows.iter()
        .map(|row| (classify_row(row, existing), row))
        .collect()
}

/// Apply the duplicate policy to the rows of one export
///
/// Rows with a null identifier are never merged.
pub fn apply_duplicate_policy(rows: Vec<Row>, policy: DuplicatePolicy) -> Vec<Row> {
    match policy {
        DuplicatePolicy::KeepAll => rows,
        DuplicatePolicy::KeepLast => {
            let mut seen = HashSet::new();
            let mut kept: Vec<Row> = rows
                .into_iter()
                .rev()
                .filter(|row| match row.first().and_then(identifier_key) {
                    Some(key) => seen.insert(key),
                    None => true,
                })
                .collect();
            kept.reverse();
            kept
        }
    }
}
