//! # gaiji-transcode - CP932 CSV to Unicode with gaiji recovery
//!
//! Converts delimiter-separated text encoded in CP932 / Shift_JIS into
//! Unicode CSV. Byte sequences the encoding cannot interpret are looked up
//! in a [`SubstitutionTable`] of vendor external characters (gaiji); on a
//! miss they become U+FFFD and a [`Warning`] is recorded, so one bad glyph
//! never sinks a whole file.
//!
//! ## Features
//!
//! - **Pluggable recovery** through the [`RecoveryStrategy`] trait
//! - **Per-call diagnostics**: every warning carries its byte offset and raw bytes
//! - **Shared, immutable tables** safe to use from any number of threads
//! - **Request envelope** handling for the JSON/base64 conversion endpoint
//!
//! ## Quick Start
//!
//! ```rust
//! use gaiji_transcode::{SubstitutionTable, Transcoder};
//!
//! let table = SubstitutionTable::from_entries([([0xF0, 0x41], '\u{E001}')]).unwrap();
//!
//! // "日本,<F040><F041>"
//! let input = &[0x93, 0xFA, 0x96, 0x7B, b',', 0xF0, 0x40, 0xF0, 0x41, b'\r', b'\n'];
//! let result = Transcoder::new(&table).transcode(input).unwrap();
//!
//! assert_eq!(result.text, "日本,\u{FFFD}\u{E001}\r\n");
//! assert_eq!(result.warnings.len(), 1);
//! assert_eq!(result.warnings[0].position, 5);
//! ```

#![deny(missing_docs)]

pub mod decoder;
pub mod diagnostics;
pub mod service;
pub mod table;
pub mod transcoder;

pub use decoder::{
    DecodeFailure, Decoded, GaijiRecovery, REPLACEMENT, Recovery, RecoveryDecoder,
    RecoveryStrategy, StrictRecovery,
};
pub use diagnostics::{RequestContext, Warning};
pub use service::{Method, Response, Service};
pub use table::SubstitutionTable;
pub use transcoder::{
    DecodedRow, RowReader, RowWriter, TranscodeError, TranscodeOptions, Transcoded, Transcoder,
};

/// Result type for transcoding operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while transcoding
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The decoded text cannot be framed as rows
    #[error("malformed tabular input at row {row}: {reason}")]
    MalformedInput {
        /// 1-based row being parsed when the failure occurred
        row: usize,
        /// What was wrong
        reason: String,
    },
    /// The recovery strategy could not continue past a decode failure
    #[error("fatal decode error at position {position}: {reason}")]
    DecodeFatal {
        /// Byte offset of the failing span
        position: usize,
        /// Why recovery stopped
        reason: String,
    },
    /// The request was rejected before transcoding started
    #[error("invalid request: {0}")]
    UpstreamInput(String),
    /// A substitution table could not be built
    #[error("invalid substitution table: {0}")]
    Table(String),
    /// Reading a table file failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable name of the error class
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MalformedInput { .. } => "malformed_input",
            Error::DecodeFatal { .. } => "decode_fatal",
            Error::UpstreamInput(_) => "upstream_input",
            Error::Table(_) => "table",
            Error::Io(_) => "io",
        }
    }
}

/// Transcode `bytes` as CSV, recovering through `table`
pub fn transcode(
    bytes: &[u8],
    table: &SubstitutionTable,
) -> std::result::Result<Transcoded, TranscodeError> {
    Transcoder::new(table).transcode(bytes)
}
