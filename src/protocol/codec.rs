// src/protocol/codec.rs
//! Line-record codec for the worker control protocol
//!
//! Every record is one JSON object followed by a single `\n`. JSON string
//! escaping guarantees the payload never contains an unescaped terminator,
//! so the newline is the sole framing delimiter.

use crate::protocol::message::{Command, Report};
use serde_json::Value;
use thiserror::Error;

/// Report tags the coordinator understands
const KNOWN_REPORT_TYPES: &[&str] = &[
    "initialized",
    "solution",
    "complete",
    "stopped",
    "info",
    "error",
];

/// Decoding failures for a single record
#[derive(Error, Debug)]
pub enum CodecError {
    /// The record is not a JSON object with the required fields
    #[error("Malformed record: {0}")]
    Malformed(String),

    /// Valid syntax, but the `type` tag is not part of the protocol.
    /// Non-fatal: reported upward, the session keeps running.
    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

/// Encodes one command as a self-terminated record
///
/// The returned string contains exactly one trailing newline and no other
/// terminator characters.
pub fn encode_command(command: &Command) -> String {
    // Command contains no values serde_json can fail on
    let mut record = serde_json::to_string(command).expect("command serialization is infallible");
    record.push('\n');
    record
}

/// Decodes one record into a worker report
///
/// # Errors
/// - [`CodecError::Malformed`] when the line is not valid JSON, lacks a
///   string `type` field, or a known type carries bad fields
/// - [`CodecError::UnknownType`] when the `type` tag is recognized syntax
///   but not part of the protocol
pub fn decode_report(line: &str) -> Result<Report, CodecError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| CodecError::Malformed("Missing type field".to_string()))?;

    if !KNOWN_REPORT_TYPES.contains(&kind) {
        return Err(CodecError::UnknownType(kind.to_string()));
    }

    serde_json::from_value(value).map_err(|e| CodecError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::GpuInfo;

    #[test]
    fn test_encode_is_single_line() {
        let record = encode_command(&Command::Init { batch_size: 1_000_000 });
        assert!(record.ends_with('\n'));
        assert_eq!(record.matches('\n').count(), 1);
        assert_eq!(
            record.trim_end(),
            r#"{"type":"init","batch_size":1000000}"#
        );
    }

    #[test]
    fn test_encode_escapes_embedded_terminators() {
        // A hostile header string must not break framing
        let record = encode_command(&Command::Mine {
            work: "de\nad".to_string(),
            target: "ff".to_string(),
            start_nonce: 0,
            nonce_count: 10,
        });
        assert_eq!(record.matches('\n').count(), 1);
        assert!(record.contains("de\\nad"));
    }

    #[test]
    fn test_encode_unit_commands() {
        assert_eq!(encode_command(&Command::Stop).trim_end(), r#"{"type":"stop"}"#);
        assert_eq!(
            encode_command(&Command::QueryInfo).trim_end(),
            r#"{"type":"query_info"}"#
        );
        assert_eq!(
            encode_command(&Command::Shutdown).trim_end(),
            r#"{"type":"shutdown"}"#
        );
    }

    #[test]
    fn test_decode_initialized() {
        let report = decode_report(
            r#"{"type":"initialized","gpu_count":1,"total_memory":8589934592,"max_batch_size":10000000}"#,
        )
        .unwrap();
        assert_eq!(
            report,
            Report::Initialized {
                gpu_count: 1,
                total_memory: 8_589_934_592,
                max_batch_size: 10_000_000,
            }
        );
    }

    #[test]
    fn test_decode_solution_and_complete() {
        let solution = decode_report(&format!(
            r#"{{"type":"solution","nonce":42,"hash":"{}"}}"#,
            "0".repeat(64)
        ))
        .unwrap();
        assert_eq!(
            solution,
            Report::Solution {
                nonce: 42,
                hash: "0".repeat(64),
            }
        );

        let complete =
            decode_report(r#"{"type":"complete","hashes_computed":1000000,"duration_ms":1000}"#)
                .unwrap();
        assert_eq!(
            complete,
            Report::Complete {
                hashes_computed: 1_000_000,
                duration_ms: 1000,
            }
        );
    }

    #[test]
    fn test_decode_info_ignores_extra_fields() {
        // The stub worker also reports compute_capability; unknown fields
        // inside a known type are tolerated
        let report = decode_report(
            r#"{"type":"info","gpus":[{"index":0,"name":"Simulated GPU","memory":1024,"compute_capability":"7.5","utilization":98.5,"temperature":65.0}]}"#,
        )
        .unwrap();
        match report {
            Report::Info { gpus } => {
                assert_eq!(gpus.len(), 1);
                assert_eq!(
                    gpus[0],
                    GpuInfo {
                        index: 0,
                        name: "Simulated GPU".to_string(),
                        memory: 1024,
                        utilization: 98.5,
                        temperature: 65.0,
                    }
                );
            }
            other => panic!("Expected info, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode_report("not json at all"),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decode_report(r#"{"nonce":42}"#),
            Err(CodecError::Malformed(_))
        ));
        // Known type with missing fields is malformed, not unknown
        assert!(matches!(
            decode_report(r#"{"type":"solution"}"#),
            Err(CodecError::Malformed(_))
        ));
        // type must be a string
        assert!(matches!(
            decode_report(r#"{"type":7}"#),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_unknown_type_is_distinct() {
        match decode_report(r#"{"type":"hashrate","value":12345}"#) {
            Err(CodecError::UnknownType(kind)) => assert_eq!(kind, "hashrate"),
            other => panic!("Expected UnknownType, got {:?}", other),
        }
    }

    #[test]
    fn test_command_round_trip_for_worker_side() {
        // Workers parse commands with the same serde shape
        let record = encode_command(&Command::Mine {
            work: "deadbeef".to_string(),
            target: "ff".repeat(32),
            start_nonce: 5000,
            nonce_count: 1000,
        });
        let parsed: Command = serde_json::from_str(record.trim_end()).unwrap();
        match parsed {
            Command::Mine {
                start_nonce,
                nonce_count,
                ..
            } => {
                assert_eq!(start_nonce, 5000);
                assert_eq!(nonce_count, 1000);
            }
            other => panic!("Expected mine, got {:?}", other),
        }
    }
}
