//! SQL builder for warehouse writes
//!
//! Statements use PostgreSQL positional placeholders (`$1`, `$2`, ...) and
//! double-quoted identifiers. Parameter tuples are produced alongside so the
//! placeholder order and the value order can never drift apart:
//!
//! - INSERT binds every column in schema order
//! - UPDATE binds the non-identifier columns in schema order, then the
//!   identifier for the `WHERE` clause

use serde_json::Value;

use crate::error::{LoadError, LoadResult};

/// What a statement does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Update,
    Select,
}

/// A parameterized SQL statement for one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// Destination table
    pub table: String,
    /// Statement kind
    pub kind: StatementKind,
    /// SQL text with `$n` placeholders
    pub sql: String,
}

/// Quote an identifier, doubling embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified table name (`schema.table`)
pub fn quote_table_name(name: &str) -> String {
    name.split('.')
        .map(quote_identifier)
        .collect::<Vec<_>>()
        .join(".")
}

fn placeholders(range: std::ops::RangeInclusive<usize>) -> Vec<String> {
    range.map(|i| format!("${}", i)).collect()
}

fn ensure_columns(table: &str, columns: &[String]) -> LoadResult<()> {
    if columns.is_empty() {
        return Err(LoadError::InvalidInput(format!(
            "Table '{}' has no columns",
            table
        )));
    }
    Ok(())
}

/// `INSERT INTO "t" ("a", "b") VALUES ($1, $2)`
pub fn build_insert_statement(table: &str, columns: &[String]) -> LoadResult<Statement> {
    ensure_columns(table, columns)?;

    let column_list: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_table_name(table),
        column_list.join(", "),
        placeholders(1..=columns.len()).join(", ")
    );

    Ok(Statement {
        table: table.to_string(),
        kind: StatementKind::Insert,
        sql,
    })
}

/// `UPDATE "t" SET "b" = $1, "c" = $2 WHERE "a" = $3`
///
/// The first column is the identifier.
pub fn build_update_statement(table: &str, columns: &[String]) -> LoadResult<Statement> {
    ensure_columns(table, columns)?;
    let (id_column, rest) = columns.split_first().ok_or_else(|| {
        LoadError::InvalidInput(format!("Table '{}' has no columns", table))
    })?;
    if rest.is_empty() {
        return Err(LoadError::InvalidInput(format!(
            "Table '{}' has no columns besides its identifier to update",
            table
        )));
    }

    let assignments: Vec<String> = rest
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", quote_identifier(c), i + 1))
        .collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ${}",
        quote_table_name(table),
        assignments.join(", "),
        quote_identifier(id_column),
        columns.len()
    );

    Ok(Statement {
        table: table.to_string(),
        kind: StatementKind::Update,
        sql,
    })
}

/// `SELECT "a" FROM "t"`: every identifier currently in the warehouse
pub fn build_identifier_query(table: &str, id_column: &str) -> Statement {
    Statement {
        table: table.to_string(),
        kind: StatementKind::Select,
        sql: format!(
            "SELECT {} FROM {}",
            quote_identifier(id_column),
            quote_table_name(table)
        ),
    }
}

/// Parameters for an INSERT: the row as-is
pub fn format_insert_row(row: &[Value]) -> Vec<Value> {
    row.to_vec()
}

/// Parameters for an UPDATE: non-identifier values, then the identifier
pub fn format_update_row(row: &[Value]) -> Vec<Value> {
    match row.split_first() {
        Some((id, rest)) => {
            let mut params = Vec::with_capacity(row.len());
            params.extend_from_slice(rest);
            params.push(id.clone());
            params
        }
        None => Vec::new(),
    }
}
