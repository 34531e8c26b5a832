//! Warehouse table descriptors
//!
//! A descriptor carries everything the loader needs to know about one
//! destination table: whether it is a dimension or a fact table, the
//! destination column order and the per-column coercions applied to each
//! export before it is written.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::{BTreeMap, HashSet};

use crate::error::{LoadError, LoadResult};

/// Kind of warehouse table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    /// Reference entities addressed by a stable identifier, upserted
    Dimension,
    /// Append-only event records, batch inserted
    Fact,
}

impl TableKind {
    /// Derive a kind from the warehouse naming convention (`dim_*`, `fact_*`)
    pub fn from_table_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.starts_with("dim_") {
            Some(TableKind::Dimension)
        } else if lower.starts_with("fact_") {
            Some(TableKind::Fact)
        } else {
            None
        }
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableKind::Dimension => write!(f, "dimension"),
            TableKind::Fact => write!(f, "fact"),
        }
    }
}

/// Declarative type coercion for one column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnCoercion {
    /// Integer column that may hold missing values.
    ///
    /// Exports of such columns often come through as floats (`12.0`) with
    /// blanks or `NaN` for missing entries. Missing entries become a real
    /// null and integral values become integers.
    NullableInteger,
    /// Floating point column
    Float,
    /// Text column
    Text,
}

impl ColumnCoercion {
    /// Coerce a single cell
    pub fn apply(&self, value: &Value) -> Result<Value, String> {
        match self {
            ColumnCoercion::NullableInteger => coerce_nullable_integer(value),
            ColumnCoercion::Float => coerce_float(value),
            ColumnCoercion::Text => Ok(match value {
                Value::Null => Value::Null,
                Value::String(s) => Value::String(s.clone()),
                other => Value::String(other.to_string()),
            }),
        }
    }
}

fn is_missing_marker(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "" | "nan" | "none" | "null"
    )
}

fn integral_f64_to_value(f: f64) -> Option<Value> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(Value::Number(Number::from(f as i64)))
    } else {
        None
    }
}

fn coerce_nullable_integer(value: &Value) -> Result<Value, String> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                return Ok(value.clone());
            }
            n.as_f64()
                .and_then(integral_f64_to_value)
                .ok_or_else(|| format!("not an integer: {}", n))
        }
        Value::String(s) if is_missing_marker(s) => Ok(Value::Null),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Value::Number(Number::from(i)));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(integral_f64_to_value)
                .ok_or_else(|| format!("not an integer: {}", s))
        }
        other => Err(format!("not an integer: {}", other)),
    }
}

fn coerce_float(value: &Value) -> Result<Value, String> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Number(n) => n
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("not a float: {}", n)),
        Value::String(s) if is_missing_marker(s) => Ok(Value::Null),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("not a float: {}", s)),
        other => Err(format!("not a float: {}", other)),
    }
}

/// Resolved description of one destination table
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    /// Warehouse table name
    pub name: String,
    /// Dimension or fact
    pub kind: TableKind,
    /// Destination column order (empty: use the export's header order)
    pub columns: Vec<String>,
    /// Per-column coercions
    pub coercions: BTreeMap<String, ColumnCoercion>,
}

impl TableDescriptor {
    /// Create a descriptor with no column order and no coercions
    pub fn new(name: impl Into<String>, kind: TableKind) -> Self {
        Self {
            name: name.into(),
            kind,
            columns: Vec::new(),
            coercions: BTreeMap::new(),
        }
    }

    /// Add a coercion for a column
    pub fn with_coercion(mut self, column: impl Into<String>, coercion: ColumnCoercion) -> Self {
        self.coercions.insert(column.into(), coercion);
        self
    }
}

/// Table descriptors keyed by name, in configuration order
#[derive(Debug, Clone, Default)]
pub struct TableCatalog {
    tables: Vec<TableDescriptor>,
}

impl TableCatalog {
    /// Build a catalog, rejecting duplicate table names
    pub fn new(tables: Vec<TableDescriptor>) -> LoadResult<Self> {
        let mut seen = HashSet::new();
        for table in &tables {
            if !seen.insert(table.name.as_str()) {
                return Err(LoadError::ConfigError(format!(
                    "Table '{}' is configured more than once",
                    table.name
                )));
            }
        }
        Ok(Self { tables })
    }

    pub fn get(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Resolve the table names handed out by the secrets provider
    ///
    /// Names without a configured descriptor fall back to the naming
    /// convention; anything else is a configuration error. The returned
    /// order is the order of `names`.
    pub fn resolve(&self, names: &[String]) -> LoadResult<Vec<TableDescriptor>> {
        names
            .iter()
            .map(|name| match self.get(name) {
                Some(descriptor) => Ok(descriptor.clone()),
                None => TableKind::from_table_name(name)
                    .map(|kind| TableDescriptor::new(name.clone(), kind))
                    .ok_or_else(|| {
                        LoadError::ConfigError(format!(
                            "Table '{}' is not configured and its kind cannot be derived",
                            name
                        ))
                    }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_from_table_name() {
        assert_eq!(
            TableKind::from_table_name("dim_design"),
            Some(TableKind::Dimension)
        );
        assert_eq!(
            TableKind::from_table_name("fact_sales_order"),
            Some(TableKind::Fact)
        );
        assert_eq!(TableKind::from_table_name("dimension"), None);
        assert_eq!(TableKind::from_table_name("staff"), None);
    }

    #[test]
    fn test_nullable_integer_coercion() {
        let c = ColumnCoercion::NullableInteger;
        assert_eq!(c.apply(&json!(null)).unwrap(), json!(null));
        assert_eq!(c.apply(&json!(12)).unwrap(), json!(12));
        assert_eq!(c.apply(&json!(12.0)).unwrap(), json!(12));
        assert_eq!(c.apply(&json!("12.0")).unwrap(), json!(12));
        assert_eq!(c.apply(&json!("7")).unwrap(), json!(7));
        assert_eq!(c.apply(&json!("")).unwrap(), json!(null));
        assert_eq!(c.apply(&json!("NaN")).unwrap(), json!(null));
        assert!(c.apply(&json!(1.5)).is_err());
        assert!(c.apply(&json!("abc")).is_err());
        assert!(c.apply(&json!(true)).is_err());
    }

    #[test]
    fn test_nullable_integer_never_yields_sentinel_or_float() {
        let c = ColumnCoercion::NullableInteger;
        for input in [json!(null), json!(""), json!("nan")] {
            let out = c.apply(&input).unwrap();
            assert!(out.is_null());
        }
        let out = c.apply(&json!(3.0)).unwrap();
        assert!(out.is_i64());
    }

    #[test]
    fn test_float_and_text_coercion() {
        assert_eq!(ColumnCoercion::Float.apply(&json!("2.5")).unwrap(), json!(2.5));
        assert_eq!(ColumnCoercion::Float.apply(&json!(2)).unwrap(), json!(2.0));
        assert_eq!(ColumnCoercion::Float.apply(&json!("")).unwrap(), json!(null));
        assert_eq!(ColumnCoercion::Text.apply(&json!(42)).unwrap(), json!("42"));
        assert_eq!(ColumnCoercion::Text.apply(&json!(null)).unwrap(), json!(null));
    }

    #[test]
    fn test_catalog_rejects_duplicates() {
        let result = TableCatalog::new(vec![
            TableDescriptor::new("dim_staff", TableKind::Dimension),
            TableDescriptor::new("dim_staff", TableKind::Dimension),
        ]);
        assert!(matches!(result, Err(LoadError::ConfigError(_))));
    }

    #[test]
    fn test_catalog_resolve_keeps_order_and_falls_back() {
        let catalog = TableCatalog::new(vec![
            TableDescriptor::new("sales", TableKind::Fact),
            TableDescriptor::new("dim_transaction", TableKind::Dimension)
                .with_coercion("sales_order_id", ColumnCoercion::NullableInteger),
        ])
        .unwrap();

        let names = vec![
            "dim_transaction".to_string(),
            "dim_date".to_string(),
            "sales".to_string(),
        ];
        let resolved = catalog.resolve(&names).unwrap();
        let resolved_names: Vec<&str> = resolved.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(resolved_names, vec!["dim_transaction", "dim_date", "sales"]);
        assert_eq!(resolved[0].coercions.len(), 1);
        assert_eq!(resolved[1].kind, TableKind::Dimension);
        assert_eq!(resolved[2].kind, TableKind::Fact);

        assert!(catalog.resolve(&["unknown".to_string()]).is_err());
    }
}
