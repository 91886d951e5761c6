//! Per-request diagnostics
//!
//! A [`RequestContext`] is created at the start of every conversion call and
//! threaded by `&mut` through each decode step. It is never stored in a
//! static, so two calls can never observe each other's warnings.

use std::fmt::Write as _;

use serde::{Serialize, Serializer};

/// A single unmappable byte sequence that was replaced by U+FFFD
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    /// Byte offset of the sequence in the input buffer
    pub position: usize,
    /// The raw undecodable bytes
    #[serde(serialize_with = "serialize_hex")]
    pub raw_bytes: Vec<u8>,
    /// Human-readable description
    pub message: String,
}

impl Warning {
    /// Build a warning for an unmappable CP932 sequence at `position`
    pub fn unmappable(position: usize, raw_bytes: &[u8]) -> Self {
        let message = format!(
            "unmappable CP932 byte sequence 0x{} at position {}",
            to_hex(raw_bytes),
            position
        );
        Self {
            position,
            raw_bytes: raw_bytes.to_vec(),
            message,
        }
    }

    /// Raw bytes rendered as lowercase hex, without a prefix
    pub fn raw_hex(&self) -> String {
        to_hex(&self.raw_bytes)
    }
}

/// Ordered, append-only warning accumulator scoped to one conversion call
#[derive(Debug, Default)]
pub struct RequestContext {
    warnings: Vec<Warning>,
}

impl RequestContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a warning
    pub fn record(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    /// Warnings recorded so far, in production order
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Number of warnings recorded so far
    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    /// True if no warning has been recorded
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Consume the context, yielding its warnings
    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

fn serialize_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&to_hex(bytes))
}
