//! Table reader: one table export for one job directory
//!
//! Exports are CSV files named `<table>.csv` inside the job directory. Cells
//! are kept as the text the export holds, so identifiers such as `007` and
//! postal codes keep their leading zeros. Empty cells are null. Typing is
//! left to the warehouse, which binds text to each column's declared type,
//! and to the per-column coercions configured for a table.

use serde_json::Value;

use crate::error::{LoadError, LoadResult};
use crate::frame::{DataFrame, Row};
use crate::ledger::JobDirectory;
use crate::storage::ObjectStore;

/// File extension of table exports
pub const EXPORT_EXTENSION: &str = "csv";

fn convert_cell(cell: &str) -> Value {
    if cell.is_empty() {
        Value::Null
    } else {
        Value::String(cell.to_string())
    }
}

/// Parse a CSV export (with header row) into a frame
pub fn parse_csv(data: &[u8]) -> LoadResult<DataFrame> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(data);

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| LoadError::InvalidInput(format!("Failed to read CSV header: {}", e)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let rows = reader
        .records()
        .map(|record| record.map(|r| r.iter().map(convert_cell).collect::<Row>()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LoadError::InvalidInput(format!("Failed to read CSV record: {}", e)))?;

    DataFrame::new(columns, rows)
}

/// Reads table exports out of the processed bucket
pub struct TableReader<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    bucket: String,
}

impl<'a, S: ObjectStore + ?Sized> TableReader<'a, S> {
    pub fn new(store: &'a S, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Read `table` for `job`
    ///
    /// A job that holds no export for the table yields an empty frame; the
    /// transform stage only writes tables that had changes.
    pub async fn read_table(&self, table: &str, job: &JobDirectory) -> LoadResult<DataFrame> {
        let key = job.object_key(&format!("{}.{}", table, EXPORT_EXTENSION));

        match self.store.get_object(&self.bucket, &key).await? {
            Some(data) => parse_csv(&data).map_err(|e| match e {
                LoadError::InvalidInput(msg) => {
                    LoadError::InvalidInput(format!("{}/{}: {}", self.bucket, key, msg))
                }
                other => other,
            }),
            None => {
                tracing::debug!("No export at {}/{}", self.bucket, key);
                Ok(DataFrame::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_csv_keeps_cells_as_text() {
        let csv = "id,name,price,active,ref\n1,Widget,9.5,True,\n2,Gadget,10,False,4.0\n";
        let frame = parse_csv(csv.as_bytes()).unwrap();
        assert_eq!(frame.columns(), &["id", "name", "price", "active", "ref"]);
        assert_eq!(
            frame.rows()[0],
            vec![json!("1"), json!("Widget"), json!("9.5"), json!("True"), json!(null)]
        );
        assert_eq!(
            frame.rows()[1],
            vec![json!("2"), json!("Gadget"), json!("10"), json!("False"), json!("4.0")]
        );
    }

    #[test]
    fn test_parse_csv_numeric_looking_text_is_untouched() {
        let csv = "location_id,postal_code,code,note,big\n007,01234,1e3,NaN,18446744073709551617\n";
        let frame = parse_csv(csv.as_bytes()).unwrap();
        assert_eq!(
            frame.rows()[0],
            vec![
                json!("007"),
                json!("01234"),
                json!("1e3"),
                json!("NaN"),
                json!("18446744073709551617")
            ]
        );
    }

    #[test]
    fn test_parse_csv_header_only() {
        let frame = parse_csv(b"design_id,design_name\n").unwrap();
        assert!(frame.is_empty());
        assert_eq!(frame.identifier_column(), Some("design_id"));
    }

    #[test]
    fn test_parse_csv_quoted_text() {
        let csv = "id,address\n1,\"1 Main St, Leeds\"\n";
        let frame = parse_csv(csv.as_bytes()).unwrap();
        assert_eq!(frame.rows()[0][1], json!("1 Main St, Leeds"));
    }

    #[test]
    fn test_parse_csv_ragged_row_is_invalid() {
        let result = parse_csv(b"id,name\n1\n");
        assert!(result.is_err());
    }
}
