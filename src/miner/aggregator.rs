// src/miner/aggregator.rs
//! Solution validation and the per-template "solved" latch
//!
//! Workers are external processes and their claims are not taken at face
//! value: a claimed solution must reference the active template, decode to
//! a proper hash, and meet the target. When a [`SolutionHasher`] is
//! installed the hash is re-derived independently, so a worker cannot get a
//! fabricated hash accepted. The first valid solution per template wins;
//! everything after it is discarded.

use crate::types::{Solution, WorkTemplate};
use std::sync::Arc;

/// Recomputes the proof-of-work hash for a header and nonce
///
/// The hash algorithm itself lives outside the coordinator; installing an
/// implementation enables independent verification of worker claims.
pub trait SolutionHasher: Send + Sync {
    /// Hashes the header with the nonce applied
    fn hash(&self, header: &[u8], nonce: u64) -> [u8; 32];
}

/// Outcome of submitting a claimed solution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// First valid solution for the template; report it upward
    Accepted(Solution),
    /// The template is already solved; claim discarded
    Duplicate,
    /// The claim references a superseded template; claim discarded
    Stale,
    /// The claim fails validation; the worker is flagged
    Rejected(String),
}

/// Validates claims and latches the first accepted solution per template
pub struct Aggregator {
    verify: bool,
    hasher: Option<Arc<dyn SolutionHasher>>,
    /// Template id whose solution has been reported upward
    solved: Option<u64>,
}

impl Aggregator {
    /// Creates an aggregator
    ///
    /// With `verify` set and a hasher available, claimed hashes are
    /// re-derived before acceptance; otherwise the claimed hash is checked
    /// against the target as reported.
    pub fn new(verify: bool, hasher: Option<Arc<dyn SolutionHasher>>) -> Self {
        Aggregator {
            verify,
            hasher,
            solved: None,
        }
    }

    /// Whether a template has already been solved
    pub fn is_solved(&self, template_id: u64) -> bool {
        self.solved == Some(template_id)
    }

    /// Validates one claimed solution against the active template
    ///
    /// Idempotent: resubmitting an identical valid claim yields
    /// [`Verdict::Duplicate`] after the first acceptance.
    pub fn submit(
        &mut self,
        template: &WorkTemplate,
        claim_template_id: u64,
        nonce: u64,
        hash_hex: &str,
    ) -> Verdict {
        if claim_template_id != template.id {
            return Verdict::Stale;
        }
        if self.solved == Some(template.id) {
            return Verdict::Duplicate;
        }
        if nonce >= template.nonce_space {
            return Verdict::Rejected(format!(
                "Nonce {} outside search space of {}",
                nonce, template.nonce_space
            ));
        }

        let claimed = match decode_hash(hash_hex) {
            Ok(hash) => hash,
            Err(reason) => return Verdict::Rejected(reason),
        };

        let hash = match (self.verify, &self.hasher) {
            (true, Some(hasher)) => {
                let derived = hasher.hash(&template.header, nonce);
                if derived != claimed {
                    return Verdict::Rejected(format!(
                        "Claimed hash {} does not match derived {}",
                        hash_hex,
                        hex::encode(derived)
                    ));
                }
                derived
            }
            _ => claimed,
        };

        if !template.target.accepts(&hash) {
            return Verdict::Rejected(format!("Hash {} does not meet target", hex::encode(hash)));
        }

        self.solved = Some(template.id);
        Verdict::Accepted(Solution {
            template_id: template.id,
            nonce,
            hash,
        })
    }
}

fn decode_hash(hash_hex: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(hash_hex).map_err(|e| format!("Invalid hash hex: {}", e))?;
    if bytes.len() != 32 {
        return Err(format!("Expected 32 hash bytes, got {}", bytes.len()));
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}
