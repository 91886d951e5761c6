//! CP932 CSV to Unicode CSV
//!
//! The whole buffer is decoded through a [`RecoveryDecoder`] first, so
//! delimiters and quotes take exactly the same path as field content. The
//! decoded text is then read row by row and written back out with minimal
//! quoting.

use std::fmt;

use crate::decoder::{GaijiRecovery, RecoveryDecoder, RecoveryStrategy};
use crate::diagnostics::{RequestContext, Warning};
use crate::table::SubstitutionTable;
use crate::{Error, Result};

/// One decoded row, fields in source order
pub type DecodedRow = Vec<String>;

/// Tabular dialect and limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOptions {
    /// Field delimiter
    pub delimiter: char,
    /// Quote character
    pub quote: char,
    /// Row terminator used when writing
    pub terminator: String,
    /// Longest field accepted, in characters
    pub max_field_len: usize,
    /// Field count every non-empty row must have
    pub expected_columns: Option<usize>,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote: '"',
            terminator: "\r\n".to_string(),
            max_field_len: 128 * 1024,
            expected_columns: None,
        }
    }
}

impl TranscodeOptions {
    /// Comma-separated, CRLF rows
    pub fn csv() -> Self {
        Self::default()
    }

    /// Tab-separated, CRLF rows
    pub fn tsv() -> Self {
        Self {
            delimiter: '\t',
            ..Self::default()
        }
    }

    /// Set the field delimiter
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Set the quote character
    pub fn with_quote(mut self, quote: char) -> Self {
        self.quote = quote;
        self
    }

    /// Set the row terminator used on output
    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = terminator.into();
        self
    }

    /// Set the maximum field length
    pub fn with_max_field_len(mut self, max_len: usize) -> Self {
        self.max_field_len = max_len;
        self
    }

    /// Require every non-empty row to have `columns` fields
    pub fn with_expected_columns(mut self, columns: Option<usize>) -> Self {
        self.expected_columns = columns;
        self
    }
}

/// Successful transcode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcoded {
    /// Decoded rows in source order
    pub rows: Vec<DecodedRow>,
    /// Rows re-serialized as Unicode CSV
    pub text: String,
    /// Placeholder substitutions made while decoding
    pub warnings: Vec<Warning>,
}

/// Failed transcode, with the warnings gathered before the failure
#[derive(Debug)]
pub struct TranscodeError {
    /// What went wrong
    pub error: Error,
    /// Warnings recorded up to the failure point
    pub warnings: Vec<Warning>,
}

impl fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if !self.warnings.is_empty() {
            write!(f, " ({} warnings before failure)", self.warnings.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for TranscodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Drives the recovery decoder over a tabular buffer
#[derive(Debug, Clone)]
pub struct Transcoder<S> {
    decoder: RecoveryDecoder<S>,
    options: TranscodeOptions,
}

impl<'t> Transcoder<GaijiRecovery<'t>> {
    /// Transcoder recovering through `table`, CSV dialect
    pub fn new(table: &'t SubstitutionTable) -> Self {
        Self::with_strategy(GaijiRecovery::new(table), TranscodeOptions::default())
    }
}

impl<S: RecoveryStrategy> Transcoder<S> {
    /// Transcoder with an explicit recovery strategy and dialect
    pub fn with_strategy(strategy: S, options: TranscodeOptions) -> Self {
        Self {
            decoder: RecoveryDecoder::new(strategy),
            options,
        }
    }

    /// Replace the dialect
    pub fn with_options(mut self, options: TranscodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Dialect in use
    pub fn options(&self) -> &TranscodeOptions {
        &self.options
    }

    /// Decode, parse and re-serialize `bytes`
    ///
    /// A fresh [`RequestContext`] is created for every call.
    pub fn transcode(&self, bytes: &[u8]) -> std::result::Result<Transcoded, TranscodeError> {
        let mut ctx = RequestContext::new();
        match self.transcode_with(bytes, &mut ctx) {
            Ok((rows, text)) => Ok(Transcoded {
                rows,
                text,
                warnings: ctx.into_warnings(),
            }),
            Err(error) => Err(TranscodeError {
                error,
                warnings: ctx.into_warnings(),
            }),
        }
    }

    /// Like [`transcode`](Self::transcode) but records into a caller-owned context
    pub fn transcode_with(
        &self,
        bytes: &[u8],
        ctx: &mut RequestContext,
    ) -> Result<(Vec<DecodedRow>, String)> {
        let decoded = self.decoder.decode(bytes, 0, ctx)?;

        let mut reader = RowReader::new(&decoded.text, &self.options);
        let mut rows = Vec::new();
        while let Some(row) = reader.next_row()? {
            rows.push(row);
        }

        log::info!(
            "decoded {} rows from {} bytes with {} warnings",
            rows.len(),
            bytes.len(),
            ctx.len()
        );

        let text = RowWriter::new(&self.options).write_rows(&rows);
        Ok((rows, text))
    }
}

/// Row-at-a-time reader over decoded text
pub struct RowReader<'a> {
    text: &'a str,
    pos: usize,
    row: usize,
    options: &'a TranscodeOptions,
}

impl<'a> RowReader<'a> {
    /// Read rows from `text`
    pub fn new(text: &'a str, options: &'a TranscodeOptions) -> Self {
        Self {
            text,
            pos: 0,
            row: 0,
            options,
        }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    /// Parse the next row, or `None` at end of input
    ///
    /// A blank line yields an empty row.
    pub fn next_row(&mut self) -> Result<Option<DecodedRow>> {
        if self.pos >= self.text.len() {
            return Ok(None);
        }
        self.row += 1;

        let quote = self.options.quote;
        let delimiter = self.options.delimiter;

        let mut fields = Vec::new();
        let mut field = String::new();
        let mut field_len = 0usize;
        let mut field_started = false;
        let mut in_quotes = false;

        loop {
            let Some(ch) = self.bump() else {
                // End of input
                if in_quotes {
                    return Err(self.malformed("unterminated quoted field at end of input"));
                }
                break;
            };

            if in_quotes {
                if ch == quote {
                    if self.peek() == Some(quote) {
                        // Doubled quote
                        self.bump();
                    } else {
                        in_quotes = false;
                        continue;
                    }
                }
                field.push(ch);
                field_len += 1;
            } else if ch == delimiter {
                fields.push(std::mem::take(&mut field));
                field_len = 0;
                field_started = false;
                continue;
            } else if ch == '\n' {
                break;
            } else if ch == '\r' {
                if self.peek() == Some('\n') {
                    self.bump();
                }
                break;
            } else if ch == quote && !field_started {
                in_quotes = true;
                field_started = true;
                continue;
            } else {
                field.push(ch);
                field_len += 1;
                field_started = true;
            }

            if field_len > self.options.max_field_len {
                return Err(self.malformed(&format!(
                    "field longer than {} characters",
                    self.options.max_field_len
                )));
            }
        }

        if !fields.is_empty() || field_started {
            fields.push(field);
        }

        if let Some(expected) = self.options.expected_columns {
            if !fields.is_empty() && fields.len() != expected {
                return Err(self.malformed(&format!(
                    "expected {} fields, found {}",
                    expected,
                    fields.len()
                )));
            }
        }

        Ok(Some(fields))
    }

    fn malformed(&self, reason: &str) -> Error {
        Error::MalformedInput {
            row: self.row,
            reason: reason.to_string(),
        }
    }
}

impl Iterator for RowReader<'_> {
    type Item = Result<DecodedRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

/// Serializes rows with minimal quoting
pub struct RowWriter<'a> {
    options: &'a TranscodeOptions,
}

impl<'a> RowWriter<'a> {
    /// Writer for the given dialect
    pub fn new(options: &'a TranscodeOptions) -> Self {
        Self { options }
    }

    /// Serialize all rows; every row, the last included, ends with the terminator
    pub fn write_rows(&self, rows: &[DecodedRow]) -> String {
        let mut out = String::new();
        for row in rows {
            self.write_row(row, &mut out);
        }
        out
    }

    /// Append one row to `out`
    pub fn write_row(&self, row: &[String], out: &mut String) {
        let delimiter = self.options.delimiter;
        let quote = self.options.quote;

        for (col_idx, field) in row.iter().enumerate() {
            if col_idx > 0 {
                out.push(delimiter);
            }

            // A lone empty field is quoted so it reads back as one field, not a blank line
            let needs_quote = (row.len() == 1 && field.is_empty())
                || field
                    .chars()
                    .any(|c| c == delimiter || c == quote || c == '\r' || c == '\n');

            if needs_quote {
                out.push(quote);
                for c in field.chars() {
                    if c == quote {
                        out.push(quote);
                    }
                    out.push(c);
                }
                out.push(quote);
            } else {
                out.push_str(field);
            }
        }
        out.push_str(&self.options.terminator);
    }
}
