//! Error types for protocol operations

use crate::message::Arity;
use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Frame too large
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared or actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Frame payload is not UTF-8
    #[error("Frame payload is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Input ended between a marker and the end of its payload
    #[error("Stream ended inside a frame ({buffered} bytes buffered)")]
    TruncatedFrame {
        /// Bytes of the incomplete frame
        buffered: usize,
    },

    /// I/O error on the underlying channel
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}

/// A control line that does not name a usable command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// No command is registered under this name
    #[error("unknown command: {0}")]
    Unknown(String),

    /// The command exists but was given the wrong number of arguments
    #[error("{command} expects {expected}, got {got}")]
    InvalidArguments {
        /// Command name
        command: &'static str,
        /// Accepted argument count
        expected: Arity,
        /// Supplied argument count
        got: usize,
    },
}
