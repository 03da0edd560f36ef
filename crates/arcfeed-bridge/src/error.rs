//! Error types for the bridge binary.
//!
//! [`BridgeError`] wraps every failure that can stop the process during
//! start-up. Once the service runs, cycle and reload failures are logged
//! instead of propagated.

/// Top-level error for the bridge binary.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Configuration loading or validation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: arcfeed_core::ConfigError,
    },

    /// NATS connection failed.
    #[error("NATS error: {message}")]
    Nats {
        /// Description of the NATS failure.
        message: String,
    },

    /// Installing or awaiting a signal handler failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        source: std::io::Error,
    },
}
