// src/types.rs
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// 256-bit difficulty target a candidate hash must fall below.
///
/// Stored little-endian: byte 31 is the most significant. Comparison walks
/// the bytes from most to least significant, and a hash exactly equal to
/// the target does not meet it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Target(pub [u8; 32]);

impl Target {
    /// Creates a Target from raw little-endian bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Target(bytes)
    }

    /// Parses a Target from a 64-character hex string
    ///
    /// # Errors
    /// Returns an error message if the string is not valid hex or does not
    /// decode to exactly 32 bytes.
    pub fn from_hex(hex_str: &str) -> Result<Self, String> {
        let bytes = hex::decode(hex_str).map_err(|e| format!("Invalid target hex: {}", e))?;
        if bytes.len() != 32 {
            return Err(format!("Expected 32 target bytes, got {}", bytes.len()));
        }
        let mut array = [0u8; 32];
        array.copy_from_slice(&bytes);
        Ok(Target(array))
    }

    /// Returns the target as a hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Checks whether a hash meets this target (is strictly below it)
    ///
    /// Both values are treated as little-endian 256-bit integers, so the
    /// comparison starts at the last byte.
    pub fn accepts(&self, hash: &[u8; 32]) -> bool {
        for (hash_byte, target_byte) in hash.iter().rev().zip(self.0.iter().rev()) {
            match hash_byte.cmp(target_byte) {
                Ordering::Less => return true,
                Ordering::Greater => return false,
                Ordering::Equal => continue,
            }
        }
        // Equal does not meet the target
        false
    }

    /// The permissive all-ones target, useful as a test fixture
    pub fn max() -> Self {
        Target([0xFF; 32])
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target({})", self.to_hex())
    }
}

/// One round of mining work supplied by the node client
///
/// Immutable once created; a new round always arrives as a fresh template
/// with a larger `id`. Every inbound worker message is checked against the
/// active template id so results for superseded rounds are discarded.
#[derive(Debug, Clone)]
pub struct WorkTemplate {
    /// Monotonic template identifier
    pub id: u64,
    /// Opaque block header bytes the workers hash
    pub header: Vec<u8>,
    /// Difficulty target for this round
    pub target: Target,
    /// Total number of nonces to search, `[0, nonce_space)`
    pub nonce_space: u64,
}

impl WorkTemplate {
    /// Creates a new template and wraps it for sharing across tasks
    pub fn shared(id: u64, header: Vec<u8>, target: Target, nonce_space: u64) -> Arc<Self> {
        Arc::new(WorkTemplate {
            id,
            header,
            target,
            nonce_space,
        })
    }

    /// Header bytes as the hex string sent inside `mine` commands
    pub fn header_hex(&self) -> String {
        hex::encode(&self.header)
    }
}

/// A validated solution ready to hand back to the node client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    /// Template this solution belongs to
    pub template_id: u64,
    /// Winning nonce
    pub nonce: u64,
    /// Hash produced by that nonce
    pub hash: [u8; 32],
}

impl Solution {
    /// Hash as the hex string submitted upstream
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}
