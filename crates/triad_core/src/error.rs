//! # Channel Error Types
//!
//! Capacity pressure on `try_*` calls is reported through the return value,
//! never through this type. These errors come from the blocking paths.

use thiserror::Error;

/// Errors raised by channel operations that can wait or have a policy.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelError {
    /// The channel was completed. Writes always fail; reads fail once drained.
    #[error("channel closed")]
    Closed,

    /// The shared cancellation signal was observed while waiting.
    #[error("operation canceled")]
    Canceled,

    /// The ring was full and its policy is drop-on-full. The item was dropped.
    #[error("channel full, item dropped")]
    Full,
}

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// A channel capacity in the configuration is unusable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{channel} capacity must be a non-zero power of two, got {capacity}")]
pub struct InvalidCapacity {
    /// Which channel was misconfigured.
    pub channel: &'static str,
    /// The rejected value.
    pub capacity: usize,
}
