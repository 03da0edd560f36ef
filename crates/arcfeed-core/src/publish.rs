//! The message-bus seam.
//!
//! The core hands finished events to a [`Publisher`]; how they reach the
//! bus (subjects, envelope, connection handling) is the implementation's
//! concern. Implementations must be safe to call concurrently from several
//! feed cycles and must tolerate a retried publish of the same event.

use std::future::Future;

use arcfeed_types::CotEvent;

use crate::wire::WireError;

/// Errors returned by a [`Publisher`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// The event could not be encoded for the transport.
    #[error("encode failed: {message}")]
    Encode {
        /// Encoder error text.
        message: String,
    },

    /// The transport rejected the message or is unavailable.
    #[error("publish to {subject} failed: {message}")]
    Transport {
        /// Subject or routing key that failed.
        subject: String,
        /// Transport error text.
        message: String,
    },
}

impl From<WireError> for PublishError {
    fn from(err: WireError) -> Self {
        Self::Encode {
            message: err.to_string(),
        }
    }
}

/// Delivers CoT events to consumers.
pub trait Publisher: Send + Sync + 'static {
    /// Publish one event to `group`.
    fn publish(
        &self,
        event: &CotEvent,
        group: &str,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}
