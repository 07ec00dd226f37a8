//! Stream Errors
//!
//! Every failure that travels through a pipeline is a [`StreamError`]. A
//! single error is fanned out to many listeners (every group, every
//! broadcast subscriber), so the type is cheap to clone and compares by value.

use thiserror::Error;

/// Errors delivered through [`Notification::Error`](crate::reactive::Notification)
/// or returned by command-submission methods.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The upstream event source failed. Terminal for the whole pipeline.
    #[error("source failed: {0}")]
    Source(String),

    /// A per-key transform or predicate failed.
    #[error("transform failed: {0}")]
    Transform(String),

    /// A group failure escalated to the fold that was tracking the group.
    #[error("group {key} failed: {cause}")]
    Group {
        /// Debug rendering of the group's key.
        key: String,
        #[source]
        cause: Box<StreamError>,
    },

    /// A value or terminal notification was submitted to a stream that has
    /// already completed or failed.
    #[error("stream already terminated")]
    Terminated,
}

impl StreamError {
    /// Shorthand for [`StreamError::Source`].
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Source(message.into())
    }

    /// Shorthand for [`StreamError::Transform`].
    pub fn transform(message: impl Into<String>) -> Self {
        Self::Transform(message.into())
    }
}
