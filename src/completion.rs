use crate::store::{ObjectStore, StoreError};
use std::sync::Arc;
use tracing::{debug, warn};

/// Tag marking a finished, valid output object
pub const PROCESSED_TAG: &str = "processed";

/// Sentinel value of the completion tag
pub const PROCESSED_VALUE: &str = "true";

/// Decides, from store-side metadata alone, whether an output already
/// represents a finished transcode.
///
/// Transient read errors are treated as "not completed": the worker leans
/// toward reprocessing (the transcode is deterministic and the lock bounds
/// duplicate work) rather than toward dropping an item.
pub struct CompletionOracle {
    store: Arc<dyn ObjectStore>,
}

impl CompletionOracle {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn is_completed(&self, bucket: &str, output_key: &str) -> bool {
        match self.store.exists(bucket, output_key).await {
            Ok(false) => return false,
            Ok(true) => {}
            Err(err) => {
                warn!(
                    bucket = %bucket,
                    output_key = %output_key,
                    error = %err,
                    "Could not check output existence"
                );
                return false;
            }
        }

        match self.store.get_tags(bucket, output_key).await {
            Ok(tags) => {
                let completed = tags.get(PROCESSED_TAG).map(String::as_str) == Some(PROCESSED_VALUE);
                if completed {
                    debug!(bucket = %bucket, output_key = %output_key, "Output already completed");
                }
                completed
            }
            // The object can disappear between the existence check and the
            // tag read; that is just "not completed".
            Err(StoreError::NotFound { .. }) => false,
            Err(err) => {
                warn!(
                    bucket = %bucket,
                    output_key = %output_key,
                    error = %err,
                    "Could not read output tags"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{InMemoryStore, StoredObject};

    fn oracle(store: Arc<InMemoryStore>) -> CompletionOracle {
        CompletionOracle::new(store)
    }

    #[tokio::test]
    async fn test_absent_output_is_not_completed() {
        let store = Arc::new(InMemoryStore::new());
        assert!(!oracle(store).is_completed("b", "out.jpg").await);
    }

    #[tokio::test]
    async fn test_untagged_output_is_not_completed() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_bytes("b", "out.jpg", b"bytes");
        assert!(!oracle(store).is_completed("b", "out.jpg").await);
    }

    #[tokio::test]
    async fn test_tagged_output_is_completed() {
        let store = Arc::new(InMemoryStore::new());
        store.insert(
            "b",
            "out.jpg",
            StoredObject {
                body: b"bytes".to_vec(),
                tags: [(PROCESSED_TAG.to_string(), PROCESSED_VALUE.to_string())]
                    .into_iter()
                    .collect(),
                ..Default::default()
            },
        );
        assert!(oracle(store).is_completed("b", "out.jpg").await);
    }

    #[tokio::test]
    async fn test_wrong_tag_value_is_not_completed() {
        let store = Arc::new(InMemoryStore::new());
        store.insert(
            "b",
            "out.jpg",
            StoredObject {
                body: b"bytes".to_vec(),
                tags: [(PROCESSED_TAG.to_string(), "false".to_string())]
                    .into_iter()
                    .collect(),
                ..Default::default()
            },
        );
        assert!(!oracle(store).is_completed("b", "out.jpg").await);
    }
}
