//! Job ledger: pending job directories and the last-completed marker
//!
//! Every run of the upstream transform stage writes one timestamp-named
//! directory into the processed bucket. The marker object records the newest
//! directory that has been fully loaded; everything newer is pending.
//!
//! The marker is a versioned record. A run reads it, loads the pending
//! directories and persists the advanced marker only once the whole batch
//! succeeded ([`JobLedger::advance_marker`] or [`JobLedger::commit_marker`]).
//! Before writing, the stored version is compared with the version the run
//! started from, so a concurrent run that already advanced the marker is
//! reported instead of overwritten.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LoadError, LoadResult};
use crate::storage::ObjectStore;

/// Format of job directory names
pub const JOB_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Timestamp identifying one job directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobTimestamp(NaiveDateTime);

impl std::str::FromStr for JobTimestamp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 14 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("Not a job timestamp: {}", s));
        }
        NaiveDateTime::parse_from_str(s, JOB_TIMESTAMP_FORMAT)
            .map(JobTimestamp)
            .map_err(|e| format!("Not a job timestamp: {}: {}", s, e))
    }
}

impl TryFrom<String> for JobTimestamp {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JobTimestamp> for String {
    fn from(value: JobTimestamp) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for JobTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(JOB_TIMESTAMP_FORMAT))
    }
}

/// One job directory in the processed bucket
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobDirectory {
    timestamp: JobTimestamp,
}

impl JobDirectory {
    pub fn new(timestamp: JobTimestamp) -> Self {
        Self { timestamp }
    }

    pub fn timestamp(&self) -> JobTimestamp {
        self.timestamp
    }

    /// Directory name inside the bucket
    pub fn name(&self) -> String {
        self.timestamp.to_string()
    }

    /// Key of a file inside this directory
    pub fn object_key(&self, file_name: &str) -> String {
        format!("{}/{}", self.name(), file_name)
    }
}

impl std::str::FromStr for JobDirectory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(JobDirectory::new)
    }
}

impl std::fmt::Display for JobDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.timestamp)
    }
}

/// Marker status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerStatus {
    /// Nothing has been loaded yet
    #[default]
    Initial,
    /// `last_completed` and everything before it is loaded
    Completed,
}

/// Versioned last-completed-job record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobMarker {
    /// Incremented on every advance
    pub version: u64,
    /// Newest fully loaded job directory
    #[serde(default)]
    pub last_completed: Option<JobTimestamp>,
    /// Marker status
    #[serde(default)]
    pub status: MarkerStatus,
    /// When the marker was last advanced
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl JobMarker {
    /// Marker for a bucket that has never been loaded
    pub fn initial() -> Self {
        Self::default()
    }

    /// Whether a job directory is newer than the marker
    pub fn is_pending(&self, job: &JobDirectory) -> bool {
        match self.last_completed {
            Some(last) => job.timestamp() > last,
            None => true,
        }
    }

    /// Next marker after successfully loading `processed`
    ///
    /// Returns `None` when nothing newer than the marker was processed.
    pub fn advance(&self, processed: &[JobDirectory]) -> Option<JobMarker> {
        let newest = processed
            .iter()
            .filter(|job| self.is_pending(job))
            .map(JobDirectory::timestamp)
            .max()?;

        Some(JobMarker {
            version: self.version + 1,
            last_completed: Some(newest),
            status: MarkerStatus::Completed,
            updated_at: Some(Utc::now()),
        })
    }
}

/// Key under which a superseded marker is archived
///
/// `lastjob.json` completed at `20240101000000` becomes
/// `lastjob_20240101000000.json`.
pub fn archive_key(marker_key: &str, marker: &JobMarker) -> String {
    let suffix = marker
        .last_completed
        .map(|ts| ts.to_string())
        .unwrap_or_else(|| "initial".to_string());

    match marker_key.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, suffix, ext),
        _ => format!("{}_{}", marker_key, suffix),
    }
}

/// Job ledger over one processed bucket
pub struct JobLedger<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    bucket: String,
    marker_key: String,
}

impl<'a, S: ObjectStore + ?Sized> JobLedger<'a, S> {
    /// Create a ledger for `bucket`, with the marker stored at `marker_key`
    pub fn new(store: &'a S, bucket: impl Into<String>, marker_key: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            marker_key: marker_key.into(),
        }
    }

    async fn stored_marker(&self) -> LoadResult<Option<JobMarker>> {
        match self.store.get_object(&self.bucket, &self.marker_key).await? {
            Some(bytes) => {
                let marker = serde_json::from_slice(&bytes).map_err(|e| {
                    LoadError::SerializationError(format!(
                        "Failed to parse marker {}/{}: {}",
                        self.bucket, self.marker_key, e
                    ))
                })?;
                Ok(Some(marker))
            }
            None => Ok(None),
        }
    }

    /// Read the current marker; a missing marker object is the initial marker
    pub async fn read_marker(&self) -> LoadResult<JobMarker> {
        Ok(self.stored_marker().await?.unwrap_or_else(JobMarker::initial))
    }

    /// Job directories newer than `marker`, oldest first
    pub async fn list_pending_jobs(&self, marker: &JobMarker) -> LoadResult<Vec<JobDirectory>> {
        let mut jobs = Vec::new();
        for name in self.store.list_directories(&self.bucket).await? {
            match name.parse::<JobDirectory>() {
                Ok(job) if marker.is_pending(&job) => jobs.push(job),
                Ok(_) => {}
                Err(e) => tracing::warn!("Ignoring directory in {}: {}", self.bucket, e),
            }
        }
        jobs.sort();

        tracing::info!(
            bucket = %self.bucket,
            pending = jobs.len(),
            last_completed = ?marker.last_completed.map(|ts| ts.to_string()),
            "listed pending jobs"
        );

        Ok(jobs)
    }

    /// Advance and persist the marker after `processed` were fully loaded
    ///
    /// Archives the superseded marker object before writing the new one.
    /// Nothing is written when `processed` holds nothing newer than `current`.
    pub async fn advance_marker(
        &self,
        current: &JobMarker,
        processed: &[JobDirectory],
    ) -> LoadResult<JobMarker> {
        let Some(next) = current.advance(processed) else {
            tracing::info!("No new jobs processed, marker left at version {}", current.version);
            return Ok(current.clone());
        };

        self.commit_marker(current, &next).await?;
        Ok(next)
    }

    /// Persist `next` in place of `current`
    ///
    /// Fails with [`LoadError::MarkerConflict`] if the stored marker is no
    /// longer at `current.version`.
    pub async fn commit_marker(&self, current: &JobMarker, next: &JobMarker) -> LoadResult<()> {
        let stored = self.stored_marker().await?;
        let found = stored.as_ref().map(|m| m.version).unwrap_or(0);
        if found != current.version {
            return Err(LoadError::MarkerConflict {
                expected: current.version,
                found,
            });
        }

        if let Some(previous) = &stored {
            let archived = archive_key(&self.marker_key, previous);
            self.store
                .copy_object(&self.bucket, &self.marker_key, &archived)
                .await?;
            tracing::debug!("Archived marker to {}/{}", self.bucket, archived);
        }

        let body = serde_json::to_vec_pretty(next)?;
        self.store
            .put_object(&self.bucket, &self.marker_key, body)
            .await?;

        tracing::info!(
            version = next.version,
            last_completed = ?next.last_completed.map(|ts| ts.to_string()),
            "advanced job marker"
        );

        Ok(())
    }
}
