//! Load orchestrator
//!
//! One run:
//! 1. read the job marker and list the pending job directories
//! 2. fetch credentials and the table list, resolve table descriptors
//! 3. open one warehouse connection
//! 4. for every table, for every pending job (oldest first): read the
//!    export, coerce columns, then upsert (dimension) or batch insert (fact)
//! 5. close the connection, on success and on failure alike
//! 6. persist the advanced marker, only when every table and job succeeded
//!
//! The first error aborts the run. Writes already made stay in the warehouse
//! and the marker keeps pointing at the last fully loaded job, so the next
//! run replays the same jobs.

use std::time::Instant;

use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use super::classify::{
    DuplicatePolicy, RowClass, apply_duplicate_policy, classify_rows, existing_identifiers,
};
use super::invocation::{RuntimeContext, TriggerEvent};
use super::sql::{
    build_insert_statement, build_update_statement, format_insert_row, format_update_row,
};
use crate::config::{LoaderConfig, WarehouseCredentials};
use crate::error::{LoadError, LoadResult};
use crate::frame::DataFrame;
use crate::ledger::{JobDirectory, JobLedger, JobMarker};
use crate::reader::TableReader;
use crate::secrets::SecretsProvider;
use crate::storage::ObjectStore;
use crate::table::{TableCatalog, TableDescriptor, TableKind};
use crate::warehouse::{Warehouse, WarehouseConnector};

/// Outcome of a load run
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    /// Invocation this report belongs to
    pub invocation_id: Uuid,
    /// Job directories loaded, oldest first
    pub processed: Vec<JobDirectory>,
    /// Number of tables processed
    pub tables: usize,
    /// Dimension rows inserted
    pub rows_inserted: usize,
    /// Dimension rows updated
    pub rows_updated: usize,
    /// Fact rows inserted
    pub fact_rows: usize,
    /// (table, job) exports skipped because they held no rows
    pub frames_skipped: usize,
    /// Marker after the run
    pub marker: JobMarker,
    /// Duration of the run in milliseconds
    pub duration_ms: u64,
}

impl LoadReport {
    fn new(invocation_id: Uuid, marker: JobMarker) -> Self {
        Self {
            invocation_id,
            processed: Vec::new(),
            tables: 0,
            rows_inserted: 0,
            rows_updated: 0,
            fact_rows: 0,
            frames_skipped: 0,
            marker,
            duration_ms: 0,
        }
    }

    /// Total rows written
    pub fn rows_written(&self) -> usize {
        self.rows_inserted + self.rows_updated + self.fact_rows
    }
}

/// Sequences the load of all tables across all pending jobs
pub struct LoadOrchestrator<S, C, P>
where
    S: ObjectStore,
    C: WarehouseConnector,
    P: SecretsProvider,
{
    store: S,
    connector: C,
    secrets: P,
    catalog: TableCatalog,
    bucket: String,
    marker_key: String,
    duplicate_policy: DuplicatePolicy,
}

impl<S, C, P> LoadOrchestrator<S, C, P>
where
    S: ObjectStore,
    C: WarehouseConnector,
    P: SecretsProvider,
{
    /// Create an orchestrator; table descriptors are resolved here, once
    pub fn new(store: S, connector: C, secrets: P, config: &LoaderConfig) -> LoadResult<Self> {
        Ok(Self {
            store,
            connector,
            secrets,
            catalog: config.table_catalog()?,
            bucket: config.storage.bucket.clone(),
            marker_key: config.storage.marker_key.clone(),
            duplicate_policy: config.load.duplicate_policy,
        })
    }

    fn ledger(&self) -> JobLedger<'_, S> {
        JobLedger::new(&self.store, self.bucket.clone(), self.marker_key.clone())
    }

    /// Entry point for a triggered run
    ///
    /// Errors are logged with context and returned unchanged; the caller
    /// decides about retries.
    pub async fn run(
        &self,
        event: &TriggerEvent,
        context: &RuntimeContext,
    ) -> LoadResult<LoadReport> {
        let span = tracing::info_span!(
            "load_run",
            invocation_id = %context.invocation_id,
            function = %context.function_name
        );

        async {
            tracing::info!(
                source = event.source.as_deref().unwrap_or("unknown"),
                "load run triggered"
            );

            match self.run_inner(context).await {
                Ok(report) => {
                    tracing::info!(
                        jobs = report.processed.len(),
                        inserted = report.rows_inserted,
                        updated = report.rows_updated,
                        fact_rows = report.fact_rows,
                        skipped = report.frames_skipped,
                        duration_ms = report.duration_ms,
                        "load run complete"
                    );
                    Ok(report)
                }
                Err(e) => {
                    tracing::error!(error = %e, "load run failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_inner(&self, context: &RuntimeContext) -> LoadResult<LoadReport> {
        let start = Instant::now();
        let ledger = self.ledger();

        let marker = ledger.read_marker().await?;
        let jobs = ledger.list_pending_jobs(&marker).await?;
        let credentials = self.secrets.warehouse_credentials().await?;
        let table_names = self.secrets.warehouse_table_names().await?;
        let tables = self.catalog.resolve(&table_names)?;

        if jobs.is_empty() {
            tracing::info!("No pending jobs, nothing to load");
            let mut report = LoadReport::new(context.invocation_id, marker);
            report.duration_ms = start.elapsed().as_millis() as u64;
            return Ok(report);
        }

        let mut report = self
            .load(context.invocation_id, &marker, &jobs, &tables, &credentials)
            .await?;

        if report.marker != marker {
            ledger.commit_marker(&marker, &report.marker).await?;
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Load `jobs` into every table over one connection
    ///
    /// Takes the marker the jobs were listed against and returns the
    /// advanced (not yet persisted) marker in the report. The connection is
    /// closed before returning, whether loading succeeded or not.
    pub async fn load(
        &self,
        invocation_id: Uuid,
        marker: &JobMarker,
        jobs: &[JobDirectory],
        tables: &[TableDescriptor],
        credentials: &WarehouseCredentials,
    ) -> LoadResult<LoadReport> {
        let mut connection = self.connector.connect(credentials).await?;
        tracing::info!("successfully connected to warehouse");

        let mut report = LoadReport::new(invocation_id, marker.clone());
        let outcome = self
            .load_tables(&mut connection, jobs, tables, &mut report)
            .await;

        if let Err(e) = connection.close().await {
            tracing::warn!("Failed to close warehouse connection: {}", e);
        }
        outcome?;

        report.processed = jobs.to_vec();
        report.tables = tables.len();
        report.marker = marker.advance(jobs).unwrap_or_else(|| marker.clone());
        Ok(report)
    }

    async fn load_tables(
        &self,
        connection: &mut C::Connection,
        jobs: &[JobDirectory],
        tables: &[TableDescriptor],
        report: &mut LoadReport,
    ) -> LoadResult<()> {
        let reader = TableReader::new(&self.store, self.bucket.clone());

        for table in tables {
            for job in jobs {
                tracing::info!("looping over {} in directory {}", table.name, job);

                if let Err(e) = self
                    .load_table_job(connection, &reader, table, job, report)
                    .await
                {
                    tracing::error!(
                        table = %table.name,
                        job = %job,
                        error = %e,
                        "failed to load table"
                    );
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    async fn load_table_job(
        &self,
        connection: &mut C::Connection,
        reader: &TableReader<'_, S>,
        table: &TableDescriptor,
        job: &JobDirectory,
        report: &mut LoadReport,
    ) -> LoadResult<()> {
        let frame = reader.read_table(&table.name, job).await?;

        if frame.is_empty() {
            tracing::info!("SKIPPING: {} in {} - no data to add", table.name, job);
            report.frames_skipped += 1;
            return Ok(());
        }

        let mut frame = if table.columns.is_empty() {
            frame
        } else {
            frame.project(&table.columns)?
        };
        frame.apply_coercions(&table.name, &table.coercions)?;

        match table.kind {
            TableKind::Dimension => {
                self.load_dimension(connection, table, frame, report)
                    .await?
            }
            TableKind::Fact => self.load_fact(connection, table, frame, report).await?,
        }

        tracing::info!("successfully loaded {} from {}", table.name, job);
        Ok(())
    }

    async fn load_dimension(
        &self,
        connection: &mut C::Connection,
        table: &TableDescriptor,
        frame: DataFrame,
        report: &mut LoadReport,
    ) -> LoadResult<()> {
        let columns = frame.columns().to_vec();
        let id_column = frame.identifier_column().ok_or_else(|| {
            LoadError::InvalidInput(format!("Export for {} has no columns", table.name))
        })?;

        // Snapshot before any write of this (table, job)
        let existing = existing_identifiers(connection, &table.name, id_column).await?;

        let insert = build_insert_statement(&table.name, &columns)?;
        let update = if columns.len() > 1 {
            Some(build_update_statement(&table.name, &columns)?)
        } else {
            None
        };

        let rows = apply_duplicate_policy(frame.into_rows(), self.duplicate_policy);
        for (class, row) in classify_rows(&rows, &existing) {
            match class {
                RowClass::Insert => {
                    connection
                        .execute_batch(&insert, &[format_insert_row(row)])
                        .await?;
                    report.rows_inserted += 1;
                }
                RowClass::Update => match &update {
                    Some(update) => {
                        connection
                            .execute_batch(update, &[format_update_row(row)])
                            .await?;
                        report.rows_updated += 1;
                    }
                    None => tracing::debug!(
                        "{} has only an identifier column, nothing to update",
                        table.name
                    ),
                },
            }
        }

        Ok(())
    }

    async fn load_fact(
        &self,
        connection: &mut C::Connection,
        table: &TableDescriptor,
        frame: DataFrame,
        report: &mut LoadReport,
    ) -> LoadResult<()> {
        let insert = build_insert_statement(&table.name, frame.columns())?;
        let params: Vec<Vec<Value>> = frame.rows().iter().map(|r| format_insert_row(r)).collect();

        connection.execute_batch(&insert, &params).await?;
        report.fact_rows += params.len();

        Ok(())
    }
}
