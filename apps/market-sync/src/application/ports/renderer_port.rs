//! Renderer Port (Driven Port)
//!
//! Interface for writing live range snapshots to durable output.

use async_trait::async_trait;

use crate::domain::live_range::{RangeId, Snapshot};

/// Writing a snapshot failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to render range '{range_id}': {message}")]
pub struct RenderWriteError {
    /// Range whose snapshot failed to write.
    pub range_id: RangeId,
    /// Error details.
    pub message: String,
}

impl RenderWriteError {
    /// Create an error for a range.
    #[must_use]
    pub fn new(range_id: &RangeId, message: impl Into<String>) -> Self {
        Self {
            range_id: range_id.clone(),
            message: message.into(),
        }
    }
}

/// Port for writing snapshots.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Write one snapshot of a range, replacing the previous output.
    async fn write(&self, range_id: &RangeId, snapshot: &Snapshot) -> Result<(), RenderWriteError>;
}
