//! Probe failure classification and fatal session errors

use thiserror::Error;
use vantage_proto::{CommandError, Detail, Outcome, ProtocolError};

/// What went wrong with a single probe or command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Request did not complete within the timeout
    Timeout,
    /// Connection, resolution or HTTP status failure
    NetworkError,
    /// Process ran and exited unsuccessfully
    ProcessExitNonZero,
    /// Executable could not be found
    ProcessNotFound,
    /// File does not exist under the execution root
    FileNotFound,
    /// Data was not UTF-8 or not the expected JSON
    DecodeError,
    /// Any other operating system failure
    Io,
    /// Control line named no registered command
    UnknownCommand,
    /// Registered command given the wrong number of arguments
    InvalidArguments,
}

/// Failure carried by [`ProbeResult`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// Request timed out
    #[error("timed out: {0}")]
    Timeout(String),

    /// Network or HTTP failure
    #[error("{0}")]
    Network(String),

    /// Nonzero exit; signal deaths carry the negated signal number
    #[error("exited with code {0}")]
    ExitNonZero(i32),

    /// Executable missing
    #[error("executable not found: {0}")]
    ProcessNotFound(String),

    /// File missing
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Undecodable data
    #[error("decode error: {0}")]
    Decode(String),

    /// Other I/O failure
    #[error("{0}")]
    Io(String),

    /// Unusable control line
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl ProbeError {
    /// Classify this failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Network(_) => ErrorKind::NetworkError,
            Self::ExitNonZero(_) => ErrorKind::ProcessExitNonZero,
            Self::ProcessNotFound(_) => ErrorKind::ProcessNotFound,
            Self::FileNotFound(_) => ErrorKind::FileNotFound,
            Self::Decode(_) => ErrorKind::DecodeError,
            Self::Io(_) => ErrorKind::Io,
            Self::Command(CommandError::Unknown(_)) => ErrorKind::UnknownCommand,
            Self::Command(CommandError::InvalidArguments { .. }) => ErrorKind::InvalidArguments,
        }
    }

    /// Wire detail for this failure
    pub fn detail(&self) -> Detail {
        match self {
            Self::ExitNonZero(code) => Detail::ExitCode(*code),
            Self::ProcessNotFound(_) | Self::FileNotFound(_) => Detail::NotFound,
            other => Detail::Message(other.to_string()),
        }
    }

    /// Build from an HTTP client error, keeping the whole cause chain
    pub fn from_http(err: reqwest::Error) -> Self {
        let message = error_chain(&err);
        if err.is_timeout() {
            Self::Timeout(message)
        } else {
            Self::Network(message)
        }
    }
}

/// Outcome of one probe action
pub type ProbeResult<T = String> = Result<T, ProbeError>;

/// Convert a probe result to its wire form
pub fn into_outcome(result: ProbeResult) -> Outcome {
    match result {
        Ok(value) => Outcome::Ok(value),
        Err(err) => Outcome::Failed(err.detail()),
    }
}

/// Render an error followed by each of its sources
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Errors that end the session
#[derive(Debug, Error)]
pub enum SessionError {
    /// Path probes were requested but the root variable is unset
    #[error("execution root variable {0} is not set")]
    MissingExecutionRoot(String),

    /// HTTP client could not be constructed
    #[error("HTTP client setup failed: {0}")]
    HttpClient(String),

    /// Frame could not be built or written
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Control channel failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
