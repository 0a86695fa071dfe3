use crate::keys;
use crate::store::{ObjectStore, PutOptions};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Tag carried by a lock object, valued with the claim token
pub const PROCESSING_TAG: &str = "processing";

/// Proof that this worker created the lock object for an output key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub id: Uuid,
}

/// Advisory exclusive claim on an output key, held as a marker object in
/// the store.
///
/// Acquisition is a single conditional create, so two workers racing for
/// the same output key cannot both observe success. The expiry recorded in
/// the lock's metadata is advisory only; the store does not enforce it,
/// and a crashed holder's lock stays until an external sweep removes it.
pub struct LockManager {
    store: Arc<dyn ObjectStore>,
    expiry: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn ObjectStore>, expiry: Duration) -> Self {
        Self { store, expiry }
    }

    /// Try to claim the output key. `None` means the claim is held
    /// elsewhere, or the store refused the write; either way the caller
    /// must not proceed.
    pub async fn try_acquire(&self, bucket: &str, output_key: &str) -> Option<LockToken> {
        let lock_key = keys::derive_lock_key(output_key);
        let id = Uuid::new_v4();
        let now = Utc::now();
        let expires_at = now.timestamp() + self.expiry.as_secs() as i64;

        let opts = PutOptions {
            content_type: Some("text/plain".to_string()),
            tags: vec![(PROCESSING_TAG.to_string(), id.to_string())],
            metadata: vec![
                ("lock-id".to_string(), id.to_string()),
                ("created-at".to_string(), now.to_rfc3339()),
                ("expires-at".to_string(), expires_at.to_string()),
            ],
        };

        match self
            .store
            .put_if_absent(bucket, &lock_key, id.to_string().into_bytes(), &opts)
            .await
        {
            Ok(true) => {
                debug!(bucket = %bucket, lock_key = %lock_key, lock_id = %id, "Acquired processing lock");
                Some(LockToken { id })
            }
            Ok(false) => {
                debug!(bucket = %bucket, lock_key = %lock_key, "Processing lock already held");
                None
            }
            Err(err) => {
                warn!(
                    bucket = %bucket,
                    lock_key = %lock_key,
                    error = %err,
                    "Could not acquire processing lock"
                );
                None
            }
        }
    }

    /// Release the claim by deleting the lock object. Idempotent; a
    /// failure here is logged and swallowed so it can never mask the
    /// item's real outcome.
    pub async fn release(&self, bucket: &str, output_key: &str) {
        let lock_key = keys::derive_lock_key(output_key);
        match self.store.delete(bucket, &lock_key).await {
            Ok(()) => {
                debug!(bucket = %bucket, lock_key = %lock_key, "Released processing lock");
            }
            Err(err) => {
                warn!(
                    bucket = %bucket,
                    lock_key = %lock_key,
                    error = %err,
                    "Could not release processing lock"
                );
            }
        }
    }
}
