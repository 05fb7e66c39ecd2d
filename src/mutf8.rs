//! Java's modified UTF-8.
//!
//! Three bands per `spec.md` §4.2: single byte `0x01..0x7F`; two-byte
//! `110xxxxx 10xxxxxx` for `U+0080..U+07FF` and the encoded `U+0000`;
//! three-byte `1110xxxx 10xxxxxx 10xxxxxx` for `U+0800..U+FFFF`. A literal
//! `0x00` is rejected, as is any other lead byte outside the three bands,
//! as is a continuation byte not starting with `10`.

use crate::error::{DecodeError, DecodeResult};

/// Decodes a modified-UTF-8 byte buffer into a `String`.
///
/// `offset` is the stream position of `bytes[0]`, used only to annotate
/// errors.
pub fn decode(bytes: &[u8], offset: u64) -> DecodeResult<String> {
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0usize;

    while i < bytes.len() {
        let b0 = bytes[i];
        let here = offset + i as u64;

        if b0 == 0x00 {
            return Err(DecodeError::validity_byte(
                here,
                "a non-null modified-UTF-8 lead byte",
                b0,
            ));
        } else if b0 & 0x80 == 0x00 {
            // 0x01..0x7F
            out.push(b0 as char);
            i += 1;
        } else if b0 & 0xE0 == 0xC0 {
            let b1 = continuation_byte(bytes, i + 1, here)?;
            let code = (((b0 & 0x1F) as u32) << 6) | (b1 & 0x3F) as u32;
            out.push(char_from_code(code, here)?);
            i += 2;
        } else if b0 & 0xF0 == 0xE0 {
            let b1 = continuation_byte(bytes, i + 1, here)?;
            let b2 = continuation_byte(bytes, i + 2, here)?;
            let code = (((b0 & 0x0F) as u32) << 12) | ((b1 & 0x3F) as u32) << 6 | (b2 & 0x3F) as u32;
            out.push(char_from_code(code, here)?);
            i += 3;
        } else {
            return Err(DecodeError::validity_byte(
                here,
                "a modified-UTF-8 lead byte (0x01-0x7F, 110xxxxx, or 1110xxxx)",
                b0,
            ));
        }
    }

    Ok(out)
}

fn continuation_byte(bytes: &[u8], idx: usize, record_offset: u64) -> DecodeResult<u8> {
    let b = bytes
        .get(idx)
        .ok_or_else(|| DecodeError::truncation(record_offset, "a modified-UTF-8 continuation byte"))?;
    if b & 0xC0 != 0x80 {
        return Err(DecodeError::validity_byte(
            record_offset,
            "a continuation byte (10xxxxxx)",
            *b,
        ));
    }
    Ok(*b)
}

fn char_from_code(code: u32, offset: u64) -> DecodeResult<char> {
    // Modified UTF-8 code units are not validated as surrogate pairs
    // (spec.md §4.2); char::from_u32 rejects lone surrogates, which is the
    // only case that can't otherwise arise from the three bands above, so
    // this can only fail for inputs outside U+0000..U+FFFF, which the band
    // widths above never produce.
    char::from_u32(code)
        .ok_or_else(|| DecodeError::validity(offset, "a valid Unicode code point", format!("U+{code:04X}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Encodes `s` as modified UTF-8. Test-only: this crate never writes
    /// JOSSP streams (see Non-goals), this exists solely to drive the
    /// round-trip property test required by `spec.md` §8 property 6.
    fn encode(s: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for c in s.chars() {
            let code = c as u32;
            if code == 0x0000 {
                out.push(0xC0);
                out.push(0x80);
            } else if (0x0001..=0x007F).contains(&code) {
                out.push(code as u8);
            } else if (0x0080..=0x07FF).contains(&code) {
                out.push(0xC0 | (code >> 6) as u8);
                out.push(0x80 | (code & 0x3F) as u8);
            } else {
                out.push(0xE0 | (code >> 12) as u8);
                out.push(0x80 | ((code >> 6) & 0x3F) as u8);
                out.push(0x80 | (code & 0x3F) as u8);
            }
        }
        out
    }

    #[test]
    fn rejects_literal_null() {
        let err = decode(&[0x41, 0x00, 0x42], 0).unwrap_err();
        assert!(matches!(err, DecodeError::Validity { .. }));
    }

    #[test]
    fn two_byte_null_decodes_to_u0000() {
        assert_eq!(decode(&[0xC0, 0x80], 0).unwrap(), "\u{0000}");
    }

    #[test]
    fn rejects_bad_continuation() {
        let err = decode(&[0xC2, 0x41], 0).unwrap_err();
        assert!(matches!(err, DecodeError::Validity { .. }));
    }

    #[test]
    fn rejects_truncated_sequence() {
        let err = decode(&[0xE0, 0x80], 0).unwrap_err();
        assert!(matches!(err, DecodeError::Truncation { .. }));
    }

    #[test]
    fn ascii_round_trips() {
        assert_eq!(decode(&encode("Hello"), 0).unwrap(), "Hello");
    }

    proptest! {
        #[test]
        fn round_trips_bmp_strings_excluding_null(
            s in "[\\u{1}-\\u{ffff}]{0,32}"
        ) {
            let bytes = encode(&s);
            let decoded = decode(&bytes, 0).unwrap();
            prop_assert_eq!(decoded, s);
        }
    }
}
