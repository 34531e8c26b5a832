//! Local filesystem object store
//!
//! Each bucket is a directory under the root; keys are relative paths.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use super::ObjectStore;
use crate::error::{LoadError, LoadResult};

/// Object store backed by local directories
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> LoadResult<PathBuf> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(LoadError::InvalidInput(format!(
                "Object key must be a relative path without '..': {}",
                key
            )));
        }
        Ok(self.root.join(bucket).join(relative))
    }
}

#[async_trait(?Send)]
impl ObjectStore for LocalObjectStore {
    async fn list_directories(&self, bucket: &str) -> LoadResult<Vec<String>> {
        let bucket_path = self.root.join(bucket);
        let mut entries = tokio::fs::read_dir(&bucket_path).await.map_err(|e| {
            LoadError::StorageFailed(format!(
                "Failed to list bucket {}: {}",
                bucket_path.display(),
                e
            ))
        })?;

        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                dirs.push(name.to_string());
            }
        }
        dirs.sort();

        Ok(dirs)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> LoadResult<Option<Vec<u8>>> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LoadError::StorageFailed(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) -> LoadResult<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write then rename so readers never see a half-written object
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, data).await.map_err(|e| {
            LoadError::StorageFailed(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            LoadError::StorageFailed(format!("Failed to write {}: {}", path.display(), e))
        })?;

        Ok(())
    }

    async fn copy_object(&self, bucket: &str, from_key: &str, to_key: &str) -> LoadResult<()> {
        let from = self.object_path(bucket, from_key)?;
        let to = self.object_path(bucket, to_key)?;
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&from, &to).await.map_err(|e| {
            LoadError::StorageFailed(format!(
                "Failed to copy {} to {}: {}",
                from.display(),
                to.display(),
                e
            ))
        })?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_put_get_roundtrip_and_missing() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        store
            .put_object("bucket", "20240101000000/dim_design.csv", b"id\n1\n".to_vec())
            .await
            .unwrap();

        let data = store
            .get_object("bucket", "20240101000000/dim_design.csv")
            .await
            .unwrap();
        assert_eq!(data.as_deref(), Some(&b"id\n1\n"[..]));

        let missing = store.get_object("bucket", "nope.csv").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_list_directories_sorted_and_dirs_only() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store
            .put_object("b", "20240102000000/x.csv", Vec::new())
            .await
            .unwrap();
        store
            .put_object("b", "20240101000000/x.csv", Vec::new())
            .await
            .unwrap();
        store.put_object("b", "lastjob.json", Vec::new()).await.unwrap();

        let dirs = store.list_directories("b").await.unwrap();
        assert_eq!(dirs, vec!["20240101000000", "20240102000000"]);
    }

    #[tokio::test]
    async fn test_copy_object() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store.put_object("b", "a.json", b"{}".to_vec()).await.unwrap();
        store.copy_object("b", "a.json", "b.json").await.unwrap();
        assert_eq!(
            store.get_object("b", "b.json").await.unwrap(),
            Some(b"{}".to_vec())
        );
    }

    #[tokio::test]
    async fn test_rejects_parent_traversal() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let result = store.get_object("b", "../secret").await;
        assert!(matches!(result, Err(LoadError::InvalidInput(_))));
    }
}
