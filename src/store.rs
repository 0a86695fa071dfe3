use crate::config::S3Config;
use anyhow::Context;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

/// Object store failure, with "not found" kept distinguishable from
/// transient errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Options attached to an object write
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    /// Object tags (`key=value` pairs)
    pub tags: Vec<(String, String)>,
    /// User metadata
    pub metadata: Vec<(String, String)>,
}

/// Primitive object operations against the shared blob store
///
/// This is the only seam between the coordination protocol and the store;
/// tests swap in an in-memory implementation.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download an object's bytes
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>>;

    /// Write an object unconditionally
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>, opts: &PutOptions) -> StoreResult<()>;

    /// Write an object only if the key does not already exist.
    ///
    /// Returns `false` when the key was already present (the write did not
    /// happen), `true` when this call created the object.
    async fn put_if_absent(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        opts: &PutOptions,
    ) -> StoreResult<bool>;

    /// Metadata existence check; a missing key is `Ok(false)`, not an error
    async fn exists(&self, bucket: &str, key: &str) -> StoreResult<bool>;

    /// Read an object's tag set
    async fn get_tags(&self, bucket: &str, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Delete an object; deleting an absent key succeeds
    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()>;
}

/// S3-backed object store
pub struct S3Store {
    client: S3Client,
}

impl S3Store {
    /// Create a new S3 store client
    pub async fn new(config: &S3Config) -> anyhow::Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let s3_config = s3_config_builder.build();
        let client = S3Client::from_conf(s3_config);

        info!(region = %config.region, "S3 store initialized");

        Ok(Self { client })
    }

    /// Encode tags into the S3 `Tagging` request header format
    fn tagging_header(tags: &[(String, String)]) -> Option<String> {
        if tags.is_empty() {
            return None;
        }
        Some(
            tags.iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&"),
        )
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        match self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => {
                let data = resp
                    .body
                    .collect()
                    .await
                    .context("Failed to read object body")?;
                Ok(data.into_bytes().to_vec())
            }
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    Err(StoreError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    })
                } else {
                    Err(anyhow::Error::new(err)
                        .context("Failed to download object")
                        .into())
                }
            }
        }
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>, opts: &PutOptions) -> StoreResult<()> {
        let mut req = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body));

        if let Some(ref content_type) = opts.content_type {
            req = req.content_type(content_type);
        }
        if let Some(tagging) = Self::tagging_header(&opts.tags) {
            req = req.tagging(tagging);
        }
        for (k, v) in &opts.metadata {
            req = req.metadata(k, v);
        }

        req.send()
            .await
            .map_err(|err| anyhow::Error::new(err).context("Failed to upload object"))?;

        debug!(bucket = %bucket, key = %key, "Object uploaded");
        Ok(())
    }

    async fn put_if_absent(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        opts: &PutOptions,
    ) -> StoreResult<bool> {
        let mut req = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            // Conditional create: the write fails when the key exists
            .if_none_match("*");

        if let Some(ref content_type) = opts.content_type {
            req = req.content_type(content_type);
        }
        if let Some(tagging) = Self::tagging_header(&opts.tags) {
            req = req.tagging(tagging);
        }
        for (k, v) in &opts.metadata {
            req = req.metadata(k, v);
        }

        match req.send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                let precondition_failed = err
                    .as_service_error()
                    .and_then(|e| e.code())
                    .map(|code| code == "PreconditionFailed" || code == "ConditionalRequestConflict")
                    .unwrap_or(false);
                if precondition_failed {
                    Ok(false)
                } else {
                    Err(anyhow::Error::new(err)
                        .context("Failed conditional object create")
                        .into())
                }
            }
        }
    }

    async fn exists(&self, bucket: &str, key: &str) -> StoreResult<bool> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(anyhow::Error::new(err)
                        .context("Failed to check object existence")
                        .into())
                }
            }
        }
    }

    async fn get_tags(&self, bucket: &str, key: &str) -> StoreResult<HashMap<String, String>> {
        match self
            .client
            .get_object_tagging()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => Ok(resp
                .tag_set()
                .iter()
                .map(|t| (t.key().to_string(), t.value().to_string()))
                .collect()),
            Err(err) => {
                if err.as_service_error().and_then(|e| e.code()) == Some("NoSuchKey") {
                    Err(StoreError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    })
                } else {
                    Err(anyhow::Error::new(err)
                        .context("Failed to read object tags")
                        .into())
                }
            }
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| anyhow::Error::new(err).context("Failed to delete object"))?;

        debug!(bucket = %bucket, key = %key, "Object deleted");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::memory::InMemoryStore;
    use super::*;

    #[test]
    fn test_tagging_header() {
        assert_eq!(S3Store::tagging_header(&[]), None);
        assert_eq!(
            S3Store::tagging_header(&[("processed".into(), "true".into())]),
            Some("processed=true".to_string())
        );
        assert_eq!(
            S3Store::tagging_header(&[
                ("a".into(), "1".into()),
                ("b".into(), "2".into())
            ]),
            Some("a=1&b=2".to_string())
        );
    }

    #[tokio::test]
    async fn test_memory_put_if_absent_is_exclusive() {
        let store = InMemoryStore::new();
        let opts = PutOptions::default();

        let first = store
            .put_if_absent("b", "k.lock", b"one".to_vec(), &opts)
            .await
            .unwrap();
        let second = store
            .put_if_absent("b", "k.lock", b"two".to_vec(), &opts)
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        // The losing write must not have replaced the body
        assert_eq!(store.get("b", "k.lock").await.unwrap(), b"one".to_vec());
    }

    #[tokio::test]
    async fn test_memory_delete_is_idempotent() {
        let store = InMemoryStore::new();
        store.insert_bytes("b", "k", b"data");
        store.delete("b", "k").await.unwrap();
        store.delete("b", "k").await.unwrap();
        assert!(!store.exists("b", "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_get_not_found() {
        let store = InMemoryStore::new();
        match store.get("b", "missing").await {
            Err(StoreError::NotFound { key, .. }) => assert_eq!(key, "missing"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}
