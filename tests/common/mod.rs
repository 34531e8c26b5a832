//! Shared test doubles and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use warehouse_loader::{
    LoadError, LoadResult, LoaderConfig, Statement, StatementKind, TableEntry, Warehouse,
    WarehouseConnector, WarehouseCredentials,
};

pub const BUCKET: &str = "processed";

/// One call seen by the recording warehouse
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect,
    Query { sql: String },
    Execute { sql: String, params: Vec<Vec<Value>> },
    Close,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<Call>,
    identifiers: HashMap<String, Vec<Value>>,
    fail_connect: bool,
    fail_on: Option<String>,
}

/// In-memory warehouse that records every call
///
/// Inserted rows add their first cell to the table's identifiers, so a later
/// identifier query sees them.
#[derive(Debug, Clone, Default)]
pub struct RecordingWarehouse {
    state: Rc<RefCell<State>>,
}

impl RecordingWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed identifiers already stored in `table`
    pub fn with_identifiers(self, table: &str, ids: Vec<Value>) -> Self {
        self.state
            .borrow_mut()
            .identifiers
            .insert(table.to_string(), ids);
        self
    }

    /// Make every connect attempt fail
    pub fn failing_connect(self) -> Self {
        self.state.borrow_mut().fail_connect = true;
        self
    }

    /// Fail any execute whose SQL contains `fragment`
    pub fn failing_on(self, fragment: &str) -> Self {
        self.state.borrow_mut().fail_on = Some(fragment.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    /// Execute calls only, as (sql, params)
    pub fn executes(&self) -> Vec<(String, Vec<Vec<Value>>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Execute { sql, params } => Some((sql, params)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| call(c)).count()
    }
}

/// Connector handing out connections that share the recording state
#[derive(Debug, Clone, Default)]
pub struct RecordingConnector {
    pub warehouse: RecordingWarehouse,
}

impl RecordingConnector {
    pub fn new(warehouse: RecordingWarehouse) -> Self {
        Self { warehouse }
    }
}

#[async_trait(?Send)]
impl WarehouseConnector for RecordingConnector {
    type Connection = RecordingWarehouse;

    async fn connect(&self, _credentials: &WarehouseCredentials) -> LoadResult<RecordingWarehouse> {
        let mut state = self.warehouse.state.borrow_mut();
        if state.fail_connect {
            return Err(LoadError::ConnectionFailed(
                "connection refused".to_string(),
            ));
        }
        state.calls.push(Call::Connect);
        Ok(self.warehouse.clone())
    }
}

#[async_trait(?Send)]
impl Warehouse for RecordingWarehouse {
    async fn query_column(&mut self, statement: &Statement) -> LoadResult<Vec<Value>> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::Query {
            sql: statement.sql.clone(),
        });
        Ok(state
            .identifiers
            .get(&statement.table)
            .cloned()
            .unwrap_or_default())
    }

    async fn execute_batch(
        &mut self,
        statement: &Statement,
        params: &[Vec<Value>],
    ) -> LoadResult<u64> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::Execute {
            sql: statement.sql.clone(),
            params: params.to_vec(),
        });

        if let Some(fragment) = &state.fail_on
            && statement.sql.contains(fragment.as_str())
        {
            return Err(LoadError::QueryFailed(format!(
                "violates constraint: {}",
                statement.sql
            )));
        }

        if statement.kind == StatementKind::Insert {
            let ids: Vec<Value> = params.iter().filter_map(|p| p.first().cloned()).collect();
            state
                .identifiers
                .entry(statement.table.clone())
                .or_default()
                .extend(ids);
        }

        Ok(params.len() as u64)
    }

    async fn close(self) -> LoadResult<()> {
        self.state.borrow_mut().calls.push(Call::Close);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "recording"
    }
}

/// Write `<root>/<bucket>/<job>/<table>.csv`
pub fn write_export(root: &Path, job: &str, table: &str, csv: &str) {
    let dir = root.join(BUCKET).join(job);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(format!("{}.csv", table)), csv).unwrap();
}

/// Create an empty job directory
pub fn write_job(root: &Path, job: &str) {
    std::fs::create_dir_all(root.join(BUCKET).join(job)).unwrap();
}

/// Config loading the given tables from the test bucket
pub fn config_for(tables: Vec<TableEntry>) -> LoaderConfig {
    let mut config = LoaderConfig::new();
    config.warehouse.username = "loader".to_string();
    config.storage.bucket = BUCKET.to_string();
    config.tables = tables;
    config
}
