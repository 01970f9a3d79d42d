//! # Vantage Protocol
//!
//! Frame codec and wire types shared by the probe and its driver.
//!
//! The probe reports on standard output, which it shares with unrelated
//! diagnostic text. Every report is therefore wrapped in a frame that a
//! reader can pick out of the noise:
//!
//! ```text
//! MAGIC (C0 C1 FE FF) | LENGTH (u32, big-endian) | PAYLOAD (UTF-8 JSON)
//! ```

#![warn(missing_docs)]

/// Frame structure and serialization
pub mod frame;

/// Message types and control commands
pub mod message;

/// Frame codec for async streams
pub mod codec;

/// Error types for protocol operations
pub mod error;

pub use frame::{encode, Frame, MAGIC};
pub use message::{Arity, Command, CommandSpec, Detail, Outcome, StartupReport, COMMAND_TABLE};
pub use codec::FrameCodec;
pub use error::{CommandError, ProtocolError};
