//! Object storage abstraction
//!
//! The processed bucket holds one directory per job plus the marker object:
//!
//! ```text
//! <bucket>/
//!   lastjob.json
//!   20240101000000/
//!     dim_design.csv
//!     fact_sales_order.csv
//!   20240102000000/
//!     ...
//! ```
//!
//! Backends:
//! - Local directories (one sub-directory per bucket)
//! - Amazon S3 (feature `s3`)

use async_trait::async_trait;

pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

pub use local::LocalObjectStore;
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;

use crate::error::LoadResult;

/// Object storage backend trait
#[async_trait(?Send)]
pub trait ObjectStore {
    /// List the names of the top-level directories in a bucket
    async fn list_directories(&self, bucket: &str) -> LoadResult<Vec<String>>;

    /// Read an object; `None` if it does not exist
    async fn get_object(&self, bucket: &str, key: &str) -> LoadResult<Option<Vec<u8>>>;

    /// Write (create or replace) an object
    async fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) -> LoadResult<()>;

    /// Copy an object within a bucket
    async fn copy_object(&self, bucket: &str, from_key: &str, to_key: &str) -> LoadResult<()>;

    /// Get the backend type name
    fn backend_type(&self) -> &'static str;
}
