//! # Vantage Probe
//!
//! Runs inside an isolated execution context and reports what it can see:
//! the environment, URLs, executables and files. Reports leave as frames on
//! standard output; commands arrive as lines on standard input.

#![warn(missing_docs)]

/// Probe actions (URL fetch, command run, path read, host-override fetch)
pub mod actions;

/// Command dispatch
pub mod commands;

/// Startup configuration and CLI
pub mod config;

/// Environment snapshot
pub mod environ;

/// Failure classification and session errors
pub mod error;

/// Session loop
pub mod session;

pub use actions::HttpProber;
pub use config::{Cli, ProbeConfig, StartupProbes};
pub use environ::EnvironmentSnapshot;
pub use error::{ErrorKind, ProbeError, ProbeResult, SessionError};
pub use session::{InputState, LineInput, SessionLoop};
