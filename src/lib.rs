//! Resize Service
//!
//! Event-triggered, idempotent image-resize worker. The service consumes
//! object-store change notifications, derives a deterministic output key
//! for each new image, downscales and re-encodes it, and writes the result
//! back to the same store. Concurrent or repeated deliveries for the same
//! input produce at most one successful output.
//!
//! ## Coordination
//!
//! The store is the only shared medium between workers. Two mechanisms
//! keep repeated and concurrent deliveries from duplicating work:
//!
//! - a **completion tag** (`processed=true`) on the output object, the
//!   source of truth for "this transcode is done"
//! - an advisory **lock object** per output key, created with a
//!   conditional write so racing workers cannot both claim it
//!
//! ## Architecture
//!
//! ```text
//! Kafka Topic                  S3 Bucket(s)
//! ┌──────────────┐            ┌───────────────────────────┐
//! │ Notification │            │ photo.jpg                 │
//! │ Batches      │──────┐     │ photo_resized.jpg         │
//! └──────────────┘      │     │   tag: processed=true     │
//!                       ▼     │ photo_resized.jpg         │
//!               ┌──────────────┐  .processing_lock        │
//!               │ Batch        │ └──────────────▲─────────┘
//!               │ Dispatcher   │                │
//!               └──────┬───────┘                │
//!                      ▼                        │
//!               ┌──────────────┐   ┌────────────┴─┐
//!               │ Per-item     │──▶│ Lock Manager │
//!               │ Coordinator  │   │ + Completion │
//!               └──────┬───────┘   │   Oracle     │
//!                      ▼           └──────────────┘
//!               ┌──────────────┐
//!               │ Image Codec  │
//!               └──────────────┘
//! ```

pub mod codec;
pub mod completion;
pub mod config;
pub mod consumer;
pub mod error;
pub mod event;
pub mod keys;
pub mod lock;
pub mod processor;
pub mod store;

pub use completion::CompletionOracle;
pub use config::{Config, OutputFormat, ResizeConfig};
pub use consumer::NotificationConsumer;
pub use error::ItemError;
pub use event::{BatchReport, ItemOutcome, NotificationBatch, OutcomeStatus};
pub use lock::{LockManager, LockToken};
pub use processor::ResizeProcessor;
pub use store::{ObjectStore, PutOptions, S3Store, StoreError};
