//! Load stage: classify, build SQL and replay pending jobs into the warehouse

pub mod classify;
pub mod invocation;
pub mod orchestrator;
pub mod sql;

pub use classify::{DuplicatePolicy, RowClass};
pub use invocation::{RuntimeContext, TriggerEvent};
pub use orchestrator::{LoadOrchestrator, LoadReport};
pub use sql::{Statement, StatementKind};
