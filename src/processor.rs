use crate::codec;
use crate::completion::{CompletionOracle, PROCESSED_TAG, PROCESSED_VALUE};
use crate::config::ResizeConfig;
use crate::error::ItemError;
use crate::event::{BatchReport, ChangeRecord, ItemOutcome, NotificationBatch, OutcomeStatus};
use crate::keys;
use crate::lock::LockManager;
use crate::store::{ObjectStore, PutOptions};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument};

/// Value of the `processor` metadata field on published outputs
pub const PROCESSOR_NAME: &str = "resize-service";

/// Per-item transcode coordinator and batch dispatcher.
///
/// For each notification: eligibility -> key derivation -> completion
/// pre-check -> lock acquire -> completion re-check -> download ->
/// transcode -> publish with completion tag -> lock release. Once the lock
/// is acquired it is released on every exit path, success or failure.
pub struct ResizeProcessor {
    store: Arc<dyn ObjectStore>,
    lock: LockManager,
    oracle: CompletionOracle,
    config: ResizeConfig,
}

impl ResizeProcessor {
    pub fn new(store: Arc<dyn ObjectStore>, config: ResizeConfig) -> Self {
        let lock = LockManager::new(store.clone(), Duration::from_secs(config.lock_expiry_secs));
        let oracle = CompletionOracle::new(store.clone());
        Self {
            store,
            lock,
            oracle,
            config,
        }
    }

    /// Process every record in a batch, isolating per-item failure.
    ///
    /// A failing item is recorded in the report and never prevents
    /// processing of its siblings; the report enumerates every record. A
    /// record that cannot be converted (missing bucket or key) is itself a
    /// per-item failure, not a batch failure.
    #[instrument(skip(self, batch), fields(records = batch.records.len()))]
    pub async fn handle_batch(&self, batch: &NotificationBatch) -> BatchReport {
        let mut outcomes = Vec::with_capacity(batch.records.len());

        for raw in &batch.records {
            let outcome = match ChangeRecord::from_value(raw) {
                Ok(record) => {
                    let bucket = &record.s3.bucket.name;
                    let key = &record.s3.object.key;

                    match self.process_record(bucket, key).await {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            error!(
                                bucket = %bucket,
                                key = %key,
                                error = %err,
                                "Failed to process record"
                            );
                            let output_key = keys::derive_output_key(key, &self.config);
                            ItemOutcome::failure(bucket, key, Some(&output_key), err.to_string())
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "Malformed change record");
                    // Best-effort identifiers for the report, as far as the
                    // raw record carries them
                    let bucket = raw
                        .pointer("/s3/bucket/name")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("unknown");
                    let key = raw
                        .pointer("/s3/object/key")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("unknown");
                    ItemOutcome::failure(bucket, key, None, format!("malformed record: {err}"))
                }
            };

            match outcome.status {
                OutcomeStatus::Success => metrics::counter!("resize.records.succeeded").increment(1),
                OutcomeStatus::Skip => metrics::counter!("resize.records.skipped").increment(1),
                OutcomeStatus::Failure => metrics::counter!("resize.records.failed").increment(1),
            }
            outcomes.push(outcome);
        }

        BatchReport {
            processed: outcomes.len(),
            outcomes,
        }
    }

    /// Run one notification through the coordination state machine
    #[instrument(skip(self))]
    pub async fn process_record(&self, bucket: &str, key: &str) -> Result<ItemOutcome, ItemError> {
        if !keys::is_eligible(key, &self.config) {
            debug!(bucket = %bucket, key = %key, "Key not eligible for resizing");
            return Ok(ItemOutcome::skip(bucket, key, None, "not an eligible image key"));
        }

        let output_key = keys::derive_output_key(key, &self.config);

        // Short-circuit before contending for the lock
        if self.oracle.is_completed(bucket, &output_key).await {
            return Ok(ItemOutcome::skip(
                bucket,
                key,
                Some(&output_key),
                "already completed",
            ));
        }

        let Some(token) = self.lock.try_acquire(bucket, &output_key).await else {
            return Ok(ItemOutcome::skip(
                bucket,
                key,
                Some(&output_key),
                "already being processed",
            ));
        };
        debug!(lock_id = %token.id, output_key = %output_key, "Processing under lock");

        let result = self.transcode_and_publish(bucket, key, &output_key).await;

        // Every exit path after acquisition releases the lock, including
        // the completion re-check skip
        self.lock.release(bucket, &output_key).await;

        result
    }

    /// Steps performed while holding the lock
    async fn transcode_and_publish(
        &self,
        bucket: &str,
        key: &str,
        output_key: &str,
    ) -> Result<ItemOutcome, ItemError> {
        // Close the window between notification delivery and acquisition
        if self.oracle.is_completed(bucket, output_key).await {
            return Ok(ItemOutcome::skip(
                bucket,
                key,
                Some(output_key),
                "already completed",
            ));
        }

        let start = Instant::now();

        let body = self
            .store
            .get(bucket, key)
            .await
            .map_err(ItemError::Download)?;

        // Scoped working area, removed on drop on every exit path
        let workdir = tempfile::tempdir()?;
        let file_name = key.rsplit('/').next().unwrap_or(key);
        let input_path = workdir.path().join(file_name);
        let output_path = workdir.path().join(format!("resized_{file_name}"));
        tokio::fs::write(&input_path, &body).await?;

        let config = self.config.clone();
        let src = input_path.clone();
        let dest = output_path.clone();
        let (width, height) =
            tokio::task::spawn_blocking(move || codec::transcode_file(&src, &dest, &config))
                .await??;

        let output_body = tokio::fs::read(&output_path).await?;
        let opts = PutOptions {
            content_type: Some(self.config.output_format.content_type().to_string()),
            tags: vec![(PROCESSED_TAG.to_string(), PROCESSED_VALUE.to_string())],
            metadata: vec![
                ("original-key".to_string(), key.to_string()),
                ("processed-at".to_string(), Utc::now().to_rfc3339()),
                (
                    "resize-dimensions".to_string(),
                    format!("{}x{}", self.config.max_width, self.config.max_height),
                ),
                ("processor".to_string(), PROCESSOR_NAME.to_string()),
            ],
        };

        self.store
            .put(bucket, output_key, output_body, &opts)
            .await
            .map_err(ItemError::Publish)?;

        metrics::histogram!("resize.record.duration_seconds").record(start.elapsed().as_secs_f64());
        metrics::counter!("resize.bytes.downloaded").increment(body.len() as u64);

        info!(
            bucket = %bucket,
            key = %key,
            output_key = %output_key,
            width,
            height,
            "Resized image published"
        );

        Ok(ItemOutcome::success(bucket, key, output_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{BucketRef, ObjectRef, S3Entity};
    use crate::store::memory::{InMemoryStore, StoredObject};
    use image::{ImageEncoder, Rgb, RgbImage};

    const BUCKET: &str = "photo-uploads";

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        image::codecs::png::PngEncoder::new(&mut bytes)
            .write_image(img.as_raw(), width, height, image::ColorType::Rgb8)
            .unwrap();
        bytes
    }

    fn processor(store: Arc<InMemoryStore>) -> ResizeProcessor {
        ResizeProcessor::new(
            store,
            ResizeConfig {
                max_width: 64,
                max_height: 64,
                ..Default::default()
            },
        )
    }

    fn record(key: &str) -> ChangeRecord {
        ChangeRecord {
            s3: S3Entity {
                bucket: BucketRef {
                    name: BUCKET.to_string(),
                },
                object: ObjectRef {
                    key: key.to_string(),
                    size: None,
                },
            },
        }
    }

    fn batch(keys: &[&str]) -> NotificationBatch {
        NotificationBatch {
            records: keys
                .iter()
                .map(|k| serde_json::to_value(record(k)).unwrap())
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_happy_path_publishes_tagged_output_and_releases_lock() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_bytes(BUCKET, "albums/cat.png", &png_bytes(128, 96));
        let processor = processor(store.clone());

        let outcome = processor
            .process_record(BUCKET, "albums/cat.png")
            .await
            .unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.output_key.as_deref(), Some("cat_resized.png"));

        let output = store.get_object(BUCKET, "cat_resized.png").unwrap();
        assert_eq!(output.tags.get("processed").map(String::as_str), Some("true"));
        assert_eq!(
            output.metadata.get("original-key").map(String::as_str),
            Some("albums/cat.png")
        );
        assert_eq!(
            output.metadata.get("resize-dimensions").map(String::as_str),
            Some("64x64")
        );

        // Default output format is JPEG, bounded to 64x48
        let decoded = image::load_from_memory(&output.body).unwrap();
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 48);

        assert!(!store.contains(BUCKET, "cat_resized.png.processing_lock"));
    }

    #[tokio::test]
    async fn test_completed_output_skips_without_writes() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_bytes(BUCKET, "cat.png", &png_bytes(128, 96));
        let processor = processor(store.clone());

        processor.process_record(BUCKET, "cat.png").await.unwrap();
        let writes_after_first = store.write_count();

        let outcome = processor.process_record(BUCKET, "cat.png").await.unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Skip);
        assert_eq!(outcome.reason.as_deref(), Some("already completed"));
        assert_eq!(store.write_count(), writes_after_first);
    }

    #[tokio::test]
    async fn test_ineligible_key_skips_without_writes() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_bytes(BUCKET, "notes.txt", b"plain text");
        let processor = processor(store.clone());

        let outcome = processor.process_record(BUCKET, "notes.txt").await.unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Skip);
        assert_eq!(outcome.output_key, None);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_lock_held_elsewhere_is_denied() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_bytes(BUCKET, "cat.png", &png_bytes(128, 96));
        // Another worker holds the claim
        store.insert_bytes(BUCKET, "cat_resized.png.processing_lock", b"other-token");
        let processor = processor(store.clone());

        let outcome = processor.process_record(BUCKET, "cat.png").await.unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Skip);
        assert_eq!(outcome.reason.as_deref(), Some("already being processed"));
        // No output was published, and the foreign lock was not touched
        assert!(!store.contains(BUCKET, "cat_resized.png"));
        assert_eq!(
            store.get_object(BUCKET, "cat_resized.png.processing_lock").unwrap().body,
            b"other-token".to_vec()
        );
    }

    #[tokio::test]
    async fn test_completion_recheck_under_lock_skips_without_overwrite() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_bytes(BUCKET, "cat.png", &png_bytes(16, 16));
        let processor = processor(store.clone());

        // Simulate a sibling worker finishing between our pre-check and
        // our acquisition: take the lock, then mark the output completed
        // before the locked section runs.
        let token = processor.lock.try_acquire(BUCKET, "cat_resized.png").await;
        assert!(token.is_some());
        store.insert(
            BUCKET,
            "cat_resized.png",
            StoredObject {
                body: b"done".to_vec(),
                tags: [("processed".to_string(), "true".to_string())]
                    .into_iter()
                    .collect(),
                ..Default::default()
            },
        );

        let outcome = processor
            .transcode_and_publish(BUCKET, "cat.png", "cat_resized.png")
            .await
            .unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Skip);
        assert_eq!(outcome.reason.as_deref(), Some("already completed"));
        // The published body must not have been overwritten
        assert_eq!(
            store.get_object(BUCKET, "cat_resized.png").unwrap().body,
            b"done".to_vec()
        );
    }

    #[tokio::test]
    async fn test_codec_failure_releases_lock_and_reports() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_bytes(BUCKET, "broken.jpg", b"definitely not a jpeg");
        let processor = processor(store.clone());

        let report = processor.handle_batch(&batch(&["broken.jpg"])).await;

        assert_eq!(report.processed, 1);
        assert_eq!(report.count(OutcomeStatus::Failure), 1);
        let outcome = &report.outcomes[0];
        assert!(outcome.reason.as_deref().unwrap().contains("decode"));
        assert!(!store.contains(BUCKET, "broken_resized.jpg"));
        assert!(!store.contains(BUCKET, "broken_resized.jpg.processing_lock"));
    }

    #[tokio::test]
    async fn test_publish_failure_releases_lock_and_reports() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_bytes(BUCKET, "cat.png", &png_bytes(32, 32));
        store.fail_next_put("cat_resized.png");
        let processor = processor(store.clone());

        let report = processor.handle_batch(&batch(&["cat.png"])).await;

        assert_eq!(report.count(OutcomeStatus::Failure), 1);
        let outcome = &report.outcomes[0];
        assert!(outcome.reason.as_deref().unwrap().contains("publish"));
        assert!(!store.contains(BUCKET, "cat_resized.png"));
        assert!(!store.contains(BUCKET, "cat_resized.png.processing_lock"));
    }

    #[tokio::test]
    async fn test_missing_input_reports_download_failure() {
        let store = Arc::new(InMemoryStore::new());
        let processor = processor(store.clone());

        let report = processor.handle_batch(&batch(&["ghost.png"])).await;

        assert_eq!(report.count(OutcomeStatus::Failure), 1);
        assert!(report.outcomes[0]
            .reason
            .as_deref()
            .unwrap()
            .contains("download"));
        assert!(!store.contains(BUCKET, "ghost_resized.png.processing_lock"));
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_bytes(BUCKET, "broken.jpg", b"garbage");
        store.insert_bytes(BUCKET, "good.png", &png_bytes(100, 80));
        let processor = processor(store.clone());

        let report = processor
            .handle_batch(&batch(&["broken.jpg", "notes.txt", "good.png"]))
            .await;

        assert_eq!(report.processed, 3);
        assert_eq!(report.count(OutcomeStatus::Failure), 1);
        assert_eq!(report.count(OutcomeStatus::Skip), 1);
        assert_eq!(report.count(OutcomeStatus::Success), 1);
        // The failing sibling did not stop the good item
        assert!(store.contains(BUCKET, "good_resized.png"));
    }

    #[tokio::test]
    async fn test_malformed_record_isolated_as_item_failure() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_bytes(BUCKET, "good.png", &png_bytes(100, 80));
        let processor = processor(store.clone());

        // One record without an `s3` section, flanked by valid siblings
        let batch = NotificationBatch {
            records: vec![
                serde_json::to_value(record("good.png")).unwrap(),
                serde_json::json!({"eventName": "ObjectCreated:Put"}),
                serde_json::to_value(record("notes.txt")).unwrap(),
            ],
        };

        let report = processor.handle_batch(&batch).await;

        assert_eq!(report.processed, 3);
        assert_eq!(report.count(OutcomeStatus::Success), 1);
        assert_eq!(report.count(OutcomeStatus::Skip), 1);
        assert_eq!(report.count(OutcomeStatus::Failure), 1);

        let failure = report
            .outcomes
            .iter()
            .find(|o| o.status == OutcomeStatus::Failure)
            .unwrap();
        assert_eq!(failure.bucket, "unknown");
        assert_eq!(failure.key, "unknown");
        assert!(failure.reason.as_deref().unwrap().contains("malformed"));

        // Siblings still processed around the bad record
        assert!(store.contains(BUCKET, "good_resized.png"));
    }

    #[tokio::test]
    async fn test_concurrent_attempts_publish_once() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_bytes(BUCKET, "cat.png", &png_bytes(100, 80));
        let processor = processor(store.clone());

        let (a, b) = tokio::join!(
            processor.process_record(BUCKET, "cat.png"),
            processor.process_record(BUCKET, "cat.png"),
        );

        let statuses = [a.unwrap().status, b.unwrap().status];
        assert_eq!(
            statuses.iter().filter(|s| **s == OutcomeStatus::Success).count(),
            1
        );
        assert_eq!(
            statuses.iter().filter(|s| **s == OutcomeStatus::Skip).count(),
            1
        );
        assert!(store.contains(BUCKET, "cat_resized.png"));
        assert!(!store.contains(BUCKET, "cat_resized.png.processing_lock"));
    }

    #[tokio::test]
    async fn test_derived_output_never_reprocessed() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_bytes(BUCKET, "cat.png", &png_bytes(100, 80));
        let processor = processor(store.clone());

        processor.process_record(BUCKET, "cat.png").await.unwrap();
        // Publishing the output would itself fire a change notification
        let outcome = processor
            .process_record(BUCKET, "cat_resized.png")
            .await
            .unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Skip);
        assert!(!store.contains(BUCKET, "cat_resized_resized.png"));
    }
}
