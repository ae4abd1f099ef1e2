// src/protocol/mod.rs
//! Control protocol spoken with external worker processes
//!
//! Workers are driven over their stdio with one JSON object per line. This
//! module defines the closed message set and the line-record codec:
//! - [`Command`]: coordinator → worker requests
//! - [`Report`]: worker → coordinator responses
//! - [`codec`]: encoding/decoding with explicit malformed/unknown errors

/// Message definitions for both protocol directions
pub mod message;

/// Line-record encoder/decoder
pub mod codec;

// Re-export main components for cleaner imports
pub use codec::{CodecError, decode_report, encode_command};
pub use message::{Command, GpuInfo, Report};
