//! Error types for the Vantage client

use std::time::Duration;
use thiserror::Error;
use vantage_proto::ProtocolError;

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum VantageError {
    /// Framing error on the probe's output
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Probe output ended before the expected frame
    #[error("Probe exited before responding")]
    ProbeExited,

    /// Probe answered with something other than the expected reply
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Timeout errors
    #[error("Timeout after {duration:?}")]
    Timeout {
        /// Duration that was exceeded
        duration: Duration,
    },

    /// Probe process could not be started
    #[error("Failed to spawn probe: {0}")]
    Spawn(String),
}
