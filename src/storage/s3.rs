//! Amazon S3 object store

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;

use super::ObjectStore;
use crate::error::{LoadError, LoadResult};

/// Object store backed by S3
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Create a store from an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create a store using the default AWS credential chain
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::new(Client::new(&config))
    }
}

#[async_trait(?Send)]
impl ObjectStore for S3ObjectStore {
    async fn list_directories(&self, bucket: &str) -> LoadResult<Vec<String>> {
        let mut dirs = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .delimiter("/")
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| {
                    LoadError::StorageFailed(format!("Failed to list bucket {}: {}", bucket, e))
                })?;

            dirs.extend(
                resp.common_prefixes()
                    .iter()
                    .filter_map(|p| p.prefix())
                    .map(|p| p.trim_end_matches('/').to_string()),
            );

            match resp.next_continuation_token() {
                Some(token) if resp.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        dirs.sort();
        Ok(dirs)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> LoadResult<Option<Vec<u8>>> {
        match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(resp) => {
                let collected = resp.body.collect().await.map_err(|e| {
                    LoadError::StorageFailed(format!(
                        "Failed to read s3://{}/{}: {}",
                        bucket, key, e
                    ))
                })?;
                Ok(Some(collected.into_bytes().to_vec()))
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(LoadError::StorageFailed(format!(
                        "Failed to read s3://{}/{}: {}",
                        bucket, key, service_error
                    )))
                }
            }
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) -> LoadResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                LoadError::StorageFailed(format!("Failed to write s3://{}/{}: {}", bucket, key, e))
            })?;

        Ok(())
    }

    async fn copy_object(&self, bucket: &str, from_key: &str, to_key: &str) -> LoadResult<()> {
        self.client
            .copy_object()
            .copy_source(format!("{}/{}", bucket, from_key))
            .bucket(bucket)
            .key(to_key)
            .send()
            .await
            .map_err(|e| {
                LoadError::StorageFailed(format!(
                    "Failed to copy s3://{}/{} to {}: {}",
                    bucket, from_key, to_key, e
                ))
            })?;

        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}
