use crate::codec::CodecError;
use crate::store::StoreError;
use thiserror::Error;

/// Failure of one item after it entered processing.
///
/// Skips (ineligible input, completed output, lock contention) are not
/// errors and never appear here; this taxonomy only covers work that was
/// attempted and failed.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("failed to download input object: {0}")]
    Download(#[source] StoreError),
    #[error("transcode failed: {0}")]
    Codec(#[from] CodecError),
    #[error("failed to publish output object: {0}")]
    Publish(#[source] StoreError),
    #[error("working area error: {0}")]
    Workspace(#[from] std::io::Error),
    #[error("transcode task aborted: {0}")]
    TaskAborted(#[from] tokio::task::JoinError),
}
