//! Warehouse connection abstraction
//!
//! A run opens exactly one connection through a [`WarehouseConnector`] and
//! keeps it for every table and job. Statements run with the driver's
//! default autocommit; nothing here wraps writes in a transaction.

use async_trait::async_trait;
use serde_json::Value;

#[cfg(feature = "postgres-backend")]
pub mod postgres;

#[cfg(feature = "postgres-backend")]
pub use self::postgres::{PostgresConnector, PostgresWarehouse};

use crate::config::WarehouseCredentials;
use crate::error::LoadResult;
use crate::load::sql::Statement;

/// One open warehouse connection
#[async_trait(?Send)]
pub trait Warehouse {
    /// Run a read-only query and return the first column of every row
    async fn query_column(&mut self, statement: &Statement) -> LoadResult<Vec<Value>>;

    /// Execute one statement once per parameter tuple
    ///
    /// # Returns
    /// Total number of rows affected
    async fn execute_batch(&mut self, statement: &Statement, params: &[Vec<Value>])
    -> LoadResult<u64>;

    /// Close the connection
    async fn close(self) -> LoadResult<()>;

    /// Get the warehouse backend type name
    fn backend_type(&self) -> &'static str;
}

/// Opens warehouse connections
#[async_trait(?Send)]
pub trait WarehouseConnector {
    type Connection: Warehouse;

    /// Connect with the given credentials
    async fn connect(&self, credentials: &WarehouseCredentials) -> LoadResult<Self::Connection>;
}
