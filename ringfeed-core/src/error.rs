//! Custom error types for ringfeed.
//!
//! This module defines explicit enum error types as per coding guidelines.
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.
//!
//! Only construction can fail. The runtime operations (`append`, `read`) are
//! branch-free by contract and never return errors; their preconditions are
//! documented on the operations themselves.

use thiserror::Error;

/// Errors surfaced while creating or attaching to the shared byte channel.
/// All errors are fatal at construction time - fail fast, never retried.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Failed to create shared memory block: {name} - {reason}")]
    BlockCreateFailed { name: String, reason: String },

    #[error("Failed to open shared memory block: {name} - {reason}")]
    BlockOpenFailed { name: String, reason: String },

    #[error("Failed to map shared memory: {reason}")]
    MapFailed { reason: String },

    #[error("Block too small for ring header: {size} bytes (need at least {min})")]
    BlockTooSmall { size: usize, min: usize },

    #[error(
        "Ring header out of range: read={read}, write={write}, capacity={capacity}"
    )]
    HeaderOutOfRange { read: u32, write: u32, capacity: u32 },
}

/// Result type alias using FeedError.
pub type FeedResult<T> = Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let err = FeedError::BlockCreateFailed {
            name: "live-input".to_string(),
            reason: "shm_open failed: EEXIST".to_string(),
        };
        assert!(err.to_string().contains("live-input"));
        assert!(err.to_string().contains("EEXIST"));
    }

    #[test]
    fn test_too_small_reports_minimum() {
        let err = FeedError::BlockTooSmall { size: 8, min: 17 };
        assert!(err.to_string().contains('8'));
        assert!(err.to_string().contains("17"));
    }
}
