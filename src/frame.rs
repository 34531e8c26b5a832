//! In-memory tabular data for one table export
//!
//! Cells are `serde_json::Value`s, the same representation the warehouse
//! layer binds as statement parameters.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::error::{LoadError, LoadResult};
use crate::table::ColumnCoercion;

/// One row of cells, in column order
pub type Row = Vec<Value>;

/// Column names plus rows; the first column is the identifier column
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataFrame {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl DataFrame {
    /// Create a frame, checking that every row matches the header width
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> LoadResult<Self> {
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(LoadError::InvalidInput(format!(
                "Row {} has {} cells but the header has {} columns",
                idx,
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Name of the identifier column (the first column)
    pub fn identifier_column(&self) -> Option<&str> {
        self.columns.first().map(String::as_str)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Reorder columns to `order`, which must name every column exactly once
    pub fn project(self, order: &[String]) -> LoadResult<Self> {
        if order.len() != self.columns.len() {
            return Err(LoadError::InvalidInput(format!(
                "Expected columns {:?} but the export has {:?}",
                order, self.columns
            )));
        }

        let positions = order
            .iter()
            .map(|name| {
                self.column_index(name).ok_or_else(|| {
                    LoadError::InvalidInput(format!("Export is missing column '{}'", name))
                })
            })
            .collect::<LoadResult<Vec<usize>>>()?;

        let rows = self
            .rows
            .into_iter()
            .map(|row| positions.iter().map(|&i| row[i].clone()).collect())
            .collect();

        Ok(Self {
            columns: order.to_vec(),
            rows,
        })
    }

    /// Apply per-column coercions in place
    ///
    /// Coercions naming a column the export does not have are an error, since
    /// they usually mean the descriptor and the export drifted apart.
    pub fn apply_coercions(
        &mut self,
        table: &str,
        coercions: &BTreeMap<String, ColumnCoercion>,
    ) -> LoadResult<()> {
        let mut targets: HashMap<usize, (&str, ColumnCoercion)> = HashMap::new();
        for (column, coercion) in coercions {
            let idx = self.column_index(column).ok_or_else(|| {
                LoadError::InvalidInput(format!(
                    "Coercion configured for unknown column {}.{}",
                    table, column
                ))
            })?;
            targets.insert(idx, (column.as_str(), *coercion));
        }

        for (row_idx, row) in self.rows.iter_mut().enumerate() {
            for (&col_idx, &(column, coercion)) in &targets {
                row[col_idx] = coercion.apply(&row[col_idx]).map_err(|message| {
                    LoadError::Coercion {
                        table: table.to_string(),
                        column: column.to_string(),
                        row: row_idx,
                        message,
                    }
                })?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> DataFrame {
        DataFrame::new(
            vec!["id".to_string(), "name".to_string(), "ref".to_string()],
            vec![
                vec![json!(1), json!("a"), json!("3.0")],
                vec![json!(2), json!("b"), json!("")],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_ragged_rows() {
        let result = DataFrame::new(
            vec!["id".to_string(), "name".to_string()],
            vec![vec![json!(1)]],
        );
        assert!(matches!(result, Err(LoadError::InvalidInput(_))));
    }

    #[test]
    fn test_identifier_column() {
        assert_eq!(sample().identifier_column(), Some("id"));
        assert_eq!(DataFrame::default().identifier_column(), None);
    }

    #[test]
    fn test_project_reorders() {
        let frame = sample()
            .project(&["id".to_string(), "ref".to_string(), "name".to_string()])
            .unwrap();
        assert_eq!(frame.columns(), &["id", "ref", "name"]);
        assert_eq!(frame.rows()[0], vec![json!(1), json!("3.0"), json!("a")]);
    }

    #[test]
    fn test_project_missing_column() {
        let result = sample().project(&["id".to_string(), "name".to_string(), "x".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_apply_coercions() {
        let mut frame = sample();
        let mut coercions = BTreeMap::new();
        coercions.insert("ref".to_string(), ColumnCoercion::NullableInteger);
        frame.apply_coercions("dim_x", &coercions).unwrap();
        assert_eq!(frame.rows()[0][2], json!(3));
        assert_eq!(frame.rows()[1][2], json!(null));
    }

    #[test]
    fn test_apply_coercions_reports_row() {
        let mut frame = sample();
        let mut coercions = BTreeMap::new();
        coercions.insert("name".to_string(), ColumnCoercion::NullableInteger);
        let err = frame.apply_coercions("dim_x", &coercions).unwrap_err();
        match err {
            LoadError::Coercion { column, row, .. } => {
                assert_eq!(column, "name");
                assert_eq!(row, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
