//! # Vantage
//!
//! Client library for `vantage-probe`, a small process that reports on the
//! execution context it runs in.
//!
//! A probe writes framed JSON to its standard output, interleaved with
//! whatever else ends up there, and reads commands from its standard input.
//! [`ProbeLauncher`] starts one; [`ProbeClient`] scans its frames out of the
//! noise and issues commands.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use vantage_proto as proto;

/// Error types for the Vantage library
pub mod error;

/// Protocol client
pub mod client;

/// Probe process management
pub mod launcher;

pub use client::ProbeClient;
pub use error::VantageError;
pub use launcher::{ProbeLauncher, ProbeProcess};

/// Result type alias for Vantage operations
pub type Result<T> = std::result::Result<T, VantageError>;
