use serde::{Deserialize, Serialize};

/// A batch of object-store change notifications, in the `Records` format
/// emitted by S3 bucket notifications.
///
/// Records are kept as raw JSON at this layer: one record missing its
/// `s3` section must not fail the whole batch, so each record is converted
/// individually at dispatch time and a malformed one becomes a per-item
/// failure while its siblings still process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationBatch {
    #[serde(rename = "Records", default)]
    pub records: Vec<serde_json::Value>,
}

/// A single change notification
///
/// Only the owning bucket and object key matter to the worker; every other
/// field of a record is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub s3: S3Entity,
}

impl ChangeRecord {
    /// Convert one raw batch record into a typed notification
    pub fn from_value(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }
}

/// The object-store portion of a change notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: BucketRef,
    pub object: ObjectRef,
}

/// Owning bucket of the changed object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketRef {
    pub name: String,
}

/// The changed object itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRef {
    pub key: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Fate of a single notification after processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Output was produced and published
    Success,
    /// Nothing to do (ineligible, already done, or lock held elsewhere)
    Skip,
    /// Processing failed; the error is in `reason`
    Failure,
}

/// Per-item result record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub status: OutcomeStatus,
    pub bucket: String,
    pub key: String,
    /// Derived output key, when derivable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ItemOutcome {
    pub fn success(bucket: &str, key: &str, output_key: &str) -> Self {
        Self {
            status: OutcomeStatus::Success,
            bucket: bucket.to_string(),
            key: key.to_string(),
            output_key: Some(output_key.to_string()),
            reason: None,
        }
    }

    pub fn skip(bucket: &str, key: &str, output_key: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Skip,
            bucket: bucket.to_string(),
            key: key.to_string(),
            output_key: output_key.map(String::from),
            reason: Some(reason.into()),
        }
    }

    pub fn failure(bucket: &str, key: &str, output_key: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failure,
            bucket: bucket.to_string(),
            key: key.to_string(),
            output_key: output_key.map(String::from),
            reason: Some(reason.into()),
        }
    }
}

/// Aggregate report for one notification batch
///
/// Every record in the batch appears exactly once in `outcomes`; no item is
/// silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Number of records processed (== outcomes.len())
    pub processed: usize,
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchReport {
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}
