//! Warehouse Loader - Load stage of a batch ETL pipeline
//!
//! Moves transformed table exports from a processed object-store bucket into
//! a relational warehouse:
//! - Job ledger (pending job directories and the last-completed marker)
//! - Row classification for dimension tables (insert vs. update)
//! - SQL statement building and row formatting
//! - Warehouse writes over a single scoped connection
//! - Load orchestration across tables and pending jobs

pub mod config;
pub mod error;
pub mod frame;
pub mod ledger;
pub mod load;
pub mod reader;
pub mod secrets;
pub mod storage;
pub mod table;
pub mod warehouse;

// Re-export commonly used types
pub use config::{LoaderConfig, StorageBackendType, TableEntry, WarehouseCredentials};
pub use error::{LoadError, LoadResult};
pub use frame::{DataFrame, Row};
pub use ledger::{JobDirectory, JobLedger, JobMarker, JobTimestamp, MarkerStatus};
pub use load::{
    DuplicatePolicy, LoadOrchestrator, LoadReport, RowClass, RuntimeContext, Statement,
    StatementKind, TriggerEvent,
};
pub use reader::TableReader;
pub use secrets::{ConfigSecrets, SecretsProvider};
#[cfg(feature = "s3")]
pub use storage::S3ObjectStore;
pub use storage::{LocalObjectStore, ObjectStore};
pub use table::{ColumnCoercion, TableCatalog, TableDescriptor, TableKind};
#[cfg(feature = "postgres-backend")]
pub use warehouse::{PostgresConnector, PostgresWarehouse};
pub use warehouse::{Warehouse, WarehouseConnector};
