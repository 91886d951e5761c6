//! CP932 decoding with injectable recovery
//!
//! Standard decoding is delegated to `encoding_rs::SHIFT_JIS`. Whenever that
//! step reports an undecodable span, the decoder hands the span to a
//! [`RecoveryStrategy`] instead of failing, and resumes standard decoding
//! wherever the strategy says.
//!
//! The CP932 user-defined area (lead bytes `0xF0..=0xF9`) is deliberately
//! treated as undecodable even though the WHATWG index maps it onto the
//! Private Use Area: those code points are exactly where vendors put their
//! gaiji, so they must go through the substitution table.

use encoding_rs::{DecoderResult, SHIFT_JIS};

use crate::diagnostics::{RequestContext, Warning, to_hex};
use crate::table::SubstitutionTable;
use crate::{Error, Result};

/// Placeholder emitted for sequences nobody could map
pub const REPLACEMENT: char = '\u{FFFD}';

const USER_DEFINED_LEADS: std::ops::RangeInclusive<u8> = 0xF0..=0xF9;

/// An undecodable span reported by the standard decode step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeFailure<'a> {
    /// Absolute byte offset of the span
    pub position: usize,
    /// The undecodable bytes (never empty)
    pub bytes: &'a [u8],
}

impl DecodeFailure<'_> {
    /// The first two bytes of the span, if it has at least two
    pub fn leading_pair(&self) -> Option<[u8; 2]> {
        match self.bytes {
            [a, b, ..] => Some([*a, *b]),
            _ => None,
        }
    }
}

/// What to emit for a failed span and how far to advance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recovery {
    /// Character written to the output
    pub replacement: char,
    /// Bytes consumed, counted from the start of the failed span
    pub consumed: usize,
}

/// Decides what happens when the standard decode step fails
///
/// Returning `Err` makes the failure fatal for the current call; the string
/// becomes the reason of [`Error::DecodeFatal`].
pub trait RecoveryStrategy {
    /// Recover from `failure`, recording diagnostics into `ctx`
    fn recover(
        &self,
        failure: &DecodeFailure<'_>,
        ctx: &mut RequestContext,
    ) -> std::result::Result<Recovery, String>;
}

impl<F> RecoveryStrategy for F
where
    F: Fn(&DecodeFailure<'_>, &mut RequestContext) -> std::result::Result<Recovery, String>,
{
    fn recover(
        &self,
        failure: &DecodeFailure<'_>,
        ctx: &mut RequestContext,
    ) -> std::result::Result<Recovery, String> {
        self(failure, ctx)
    }
}

/// Table lookup first, then U+FFFD plus a warning
#[derive(Debug, Clone, Copy)]
pub struct GaijiRecovery<'t> {
    table: &'t SubstitutionTable,
}

impl<'t> GaijiRecovery<'t> {
    /// Recover through `table`
    pub fn new(table: &'t SubstitutionTable) -> Self {
        Self { table }
    }
}

impl RecoveryStrategy for GaijiRecovery<'_> {
    fn recover(
        &self,
        failure: &DecodeFailure<'_>,
        ctx: &mut RequestContext,
    ) -> std::result::Result<Recovery, String> {
        // Only the leading pair is ever looked up, whatever the span length
        if let Some(pair) = failure.leading_pair() {
            if let Some(ch) = self.table.lookup(pair) {
                log::debug!(
                    "gaiji 0x{} at position {} -> U+{:04X}",
                    to_hex(&pair),
                    failure.position,
                    ch as u32
                );
                return Ok(Recovery {
                    replacement: ch,
                    consumed: 2,
                });
            }
        }

        let warning = Warning::unmappable(failure.position, failure.bytes);
        log::warn!("{}", warning.message);
        ctx.record(warning);

        Ok(Recovery {
            replacement: REPLACEMENT,
            consumed: failure.bytes.len(),
        })
    }
}

/// Refuses every failure, turning the first undecodable span into a fatal error
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictRecovery;

impl RecoveryStrategy for StrictRecovery {
    fn recover(
        &self,
        failure: &DecodeFailure<'_>,
        _ctx: &mut RequestContext,
    ) -> std::result::Result<Recovery, String> {
        Err(format!(
            "undecodable byte sequence 0x{}",
            to_hex(failure.bytes)
        ))
    }
}

/// Output of [`RecoveryDecoder::decode`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Decoded text, placeholders included
    pub text: String,
    /// Bytes consumed from the start offset
    pub consumed: usize,
}

/// CP932 decoder that defers undecodable spans to a [`RecoveryStrategy`]
#[derive(Debug, Clone)]
pub struct RecoveryDecoder<S> {
    strategy: S,
}

impl<'t> RecoveryDecoder<GaijiRecovery<'t>> {
    /// Decoder backed by a gaiji substitution table
    pub fn with_table(table: &'t SubstitutionTable) -> Self {
        Self::new(GaijiRecovery::new(table))
    }
}

impl<S: RecoveryStrategy> RecoveryDecoder<S> {
    /// Create a decoder around `strategy`
    pub fn new(strategy: S) -> Self {
        Self { strategy }
    }

    /// Decode `bytes[start..]`
    ///
    /// Warnings go to `ctx` with absolute offsets. On a fatal error, whatever
    /// was recorded before the failure stays in `ctx`.
    pub fn decode(
        &self,
        bytes: &[u8],
        start: usize,
        ctx: &mut RequestContext,
    ) -> Result<Decoded> {
        if start > bytes.len() {
            return Err(Error::DecodeFatal {
                position: start,
                reason: format!("start offset past end of {}-byte input", bytes.len()),
            });
        }

        let mut text = String::with_capacity(bytes.len() - start);
        let mut pos = start;
        let mut user_defined = find_user_defined(bytes, pos);

        while pos < bytes.len() {
            let limit = user_defined.unwrap_or(bytes.len());
            let Some((span_start, span_end)) = decode_standard(bytes, pos, limit, &mut text)
            else {
                break;
            };

            let failure = DecodeFailure {
                position: span_start,
                bytes: &bytes[span_start..span_end],
            };
            let recovery = self
                .strategy
                .recover(&failure, ctx)
                .map_err(|reason| Error::DecodeFatal {
                    position: span_start,
                    reason,
                })?;

            let resume = span_start + recovery.consumed;
            if recovery.consumed == 0 || resume > bytes.len() {
                return Err(Error::DecodeFatal {
                    position: span_start,
                    reason: format!(
                        "recovery advanced {} bytes with {} remaining",
                        recovery.consumed,
                        bytes.len() - span_start
                    ),
                });
            }

            text.push(recovery.replacement);
            pos = resume;

            // The cached scan stays valid only while we resume on a boundary it saw
            if resume != span_end || user_defined.is_some_and(|at| at < pos) {
                user_defined = find_user_defined(bytes, pos);
            }
        }

        Ok(Decoded {
            text,
            consumed: bytes.len() - start,
        })
    }
}

/// Decode `bytes[from..limit]` into `out`
///
/// Returns the undecodable span that stopped decoding, if any. When `limit`
/// is short of the buffer end it marks a user-defined pair, which is
/// reported as a 2-byte span once everything before it decoded cleanly.
fn decode_standard(
    bytes: &[u8],
    from: usize,
    limit: usize,
    out: &mut String,
) -> Option<(usize, usize)> {
    let segment = &bytes[from..limit];
    let mut decoder = SHIFT_JIS.new_decoder_without_bom_handling();
    let mut read_total = 0;

    loop {
        let remaining = segment.len() - read_total;
        let needed = decoder
            .max_utf8_buffer_length_without_replacement(remaining)
            .unwrap_or(remaining * 3 + 4);
        out.reserve(needed);

        let (result, read) =
            decoder.decode_to_string_without_replacement(&segment[read_total..], out, true);
        read_total += read;

        match result {
            DecoderResult::InputEmpty => break,
            DecoderResult::OutputFull => continue,
            DecoderResult::Malformed(bad, after) => {
                let span_end = from + read_total - after as usize;
                return Some((span_end - bad as usize, span_end));
            }
        }
    }

    if limit < bytes.len() {
        Some((limit, limit + 2))
    } else {
        None
    }
}

#[inline]
fn is_lead(byte: u8) -> bool {
    matches!(byte, 0x81..=0x9F | 0xE0..=0xFC)
}

#[inline]
fn is_trail(byte: u8) -> bool {
    matches!(byte, 0x40..=0x7E | 0x80..=0xFC)
}

/// Offset of the next user-defined-area pair at or after `from`
///
/// Walks character boundaries the same way the Shift_JIS decoder does, so a
/// trail byte that happens to be in `0xF0..=0xF9` is never mistaken for a
/// lead.
fn find_user_defined(bytes: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i < bytes.len() {
        let byte = bytes[i];
        if is_lead(byte) && i + 1 < bytes.len() && is_trail(bytes[i + 1]) {
            if USER_DEFINED_LEADS.contains(&byte) {
                return Some(i);
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_with(table: &SubstitutionTable, bytes: &[u8]) -> (String, Vec<Warning>) {
        let mut ctx = RequestContext::new();
        let decoded = RecoveryDecoder::with_table(table)
            .decode(bytes, 0, &mut ctx)
            .unwrap();
        assert_eq!(decoded.consumed, bytes.len());
        (decoded.text, ctx.into_warnings())
    }

    #[test]
    fn test_valid_input_matches_plain_decode() {
        // "日本語,ｱｲｳ,abc\r\n"
        let bytes: &[u8] = &[
            0x93, 0xFA, 0x96, 0x7B, 0x8C, 0xEA, b',', 0xB1, 0xB2, 0xB3, b',', b'a', b'b', b'c',
            b'\r', b'\n',
        ];
        let (text, warnings) = decode_with(&SubstitutionTable::new(), bytes);

        let plain = SHIFT_JIS
            .decode_without_bom_handling_and_without_replacement(bytes)
            .unwrap();
        assert_eq!(text, plain);
        assert_eq!(text, "日本語,ｱｲｳ,abc\r\n");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_unmapped_gaiji_becomes_placeholder() {
        let (text, warnings) = decode_with(&SubstitutionTable::new(), &[0xF0, 0x40, b'A']);

        assert_eq!(text, "\u{FFFD}A");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].position, 0);
        assert_eq!(warnings[0].raw_bytes, vec![0xF0, 0x40]);
    }

    #[test]
    fn test_mapped_gaiji_substituted() {
        let table = SubstitutionTable::from_entries([([0xF0, 0x40], '\u{E000}')]).unwrap();
        let (text, warnings) = decode_with(&table, &[0xF0, 0x40, b'A']);

        assert_eq!(text, "\u{E000}A");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_gaiji_between_kanji() {
        let table = SubstitutionTable::from_entries([([0xF9, 0xFC], '髙')]).unwrap();
        // 日 F040 本 F9FC
        let bytes = [0x93, 0xFA, 0xF0, 0x40, 0x96, 0x7B, 0xF9, 0xFC];
        let (text, warnings) = decode_with(&table, &bytes);

        assert_eq!(text, "日\u{FFFD}本髙");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].position, 2);
    }

    #[test]
    fn test_user_defined_byte_as_trail_is_not_a_lead() {
        // 0x81 0xF0 is the angstrom sign; its 0xF0 must not start a gaiji
        let (text, warnings) = decode_with(&SubstitutionTable::new(), &[0x81, 0xF0, 0x40]);
        assert_eq!(text, "\u{212B}@");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_single_invalid_byte() {
        let (text, warnings) = decode_with(&SubstitutionTable::new(), &[b'x', 0xA0, b'y']);

        assert_eq!(text, "x\u{FFFD}y");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].position, 1);
        assert_eq!(warnings[0].raw_bytes, vec![0xA0]);
    }

    #[test]
    fn test_lead_byte_before_ascii_keeps_ascii() {
        let (text, warnings) = decode_with(&SubstitutionTable::new(), &[0x81, b',', b'z']);

        assert_eq!(text, "\u{FFFD},z");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].raw_bytes, vec![0x81]);
    }

    #[test]
    fn test_truncated_lead_at_end() {
        let (text, warnings) = decode_with(&SubstitutionTable::new(), &[b'A', 0x93]);

        assert_eq!(text, "A\u{FFFD}");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].position, 1);
    }

    #[test]
    fn test_start_offset_is_absolute() {
        let mut ctx = RequestContext::new();
        let decoded = RecoveryDecoder::with_table(&SubstitutionTable::new())
            .decode(&[b'A', b'B', 0xF0, 0x40], 1, &mut ctx)
            .unwrap();

        assert_eq!(decoded.text, "B\u{FFFD}");
        assert_eq!(decoded.consumed, 3);
        assert_eq!(ctx.warnings()[0].position, 2);
    }

    #[test]
    fn test_start_offset_past_end() {
        let mut ctx = RequestContext::new();
        let result = RecoveryDecoder::with_table(&SubstitutionTable::new()).decode(b"A", 2, &mut ctx);
        assert!(matches!(result, Err(Error::DecodeFatal { position: 2, .. })));
    }

    #[test]
    fn test_strict_recovery_is_fatal() {
        let mut ctx = RequestContext::new();
        let result = RecoveryDecoder::new(StrictRecovery).decode(&[b'A', 0xF0, 0x40], 0, &mut ctx);

        match result {
            Err(Error::DecodeFatal { position, reason }) => {
                assert_eq!(position, 1);
                assert!(reason.contains("f040"));
            }
            other => panic!("expected fatal error, got {:?}", other),
        }
    }

    #[test]
    fn test_fatal_error_keeps_earlier_warnings() {
        let table = SubstitutionTable::new();
        let gaiji = GaijiRecovery::new(&table);
        // Recover the first failure, refuse the second
        let strategy = |failure: &DecodeFailure<'_>, ctx: &mut RequestContext| {
            if ctx.is_empty() {
                gaiji.recover(failure, ctx)
            } else {
                Err("giving up".to_string())
            }
        };

        let mut ctx = RequestContext::new();
        let result = RecoveryDecoder::new(strategy).decode(&[0xF0, 0x40, 0xF1, 0x40], 0, &mut ctx);

        assert!(matches!(result, Err(Error::DecodeFatal { position: 2, .. })));
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.warnings()[0].position, 0);
    }

    #[test]
    fn test_zero_advance_is_fatal() {
        let strategy = |_: &DecodeFailure<'_>, _: &mut RequestContext| {
            Ok::<_, String>(Recovery {
                replacement: '?',
                consumed: 0,
            })
        };
        let mut ctx = RequestContext::new();
        let result = RecoveryDecoder::new(strategy).decode(&[0xF0, 0x40], 0, &mut ctx);
        assert!(matches!(result, Err(Error::DecodeFatal { position: 0, .. })));
    }

    #[test]
    fn test_find_user_defined() {
        assert_eq!(find_user_defined(&[b'a', 0xF0, 0x40], 0), Some(1));
        assert_eq!(find_user_defined(&[0x81, 0xF0, 0x40], 0), None);
        // Lead without a trail is not a pair
        assert_eq!(find_user_defined(&[b'a', 0xF0], 0), None);
        assert_eq!(find_user_defined(&[0xF0, 0x40, 0xF9, 0x80], 1), Some(2));
    }
}
