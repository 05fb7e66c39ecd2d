//! Error taxonomy for stream decoding.
//!
//! `EmbeddedException` from `spec.md` §7 is deliberately not a variant here:
//! it is a control-flow signal that the decoder always absorbs internally
//! (see [`crate::decoder::FieldOutcome`]) and must never reach the caller.

use thiserror::Error;

/// Everything that can go wrong while decoding a JOSSP stream.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The stream violates a JOSSP invariant: bad magic/version, illegal
    /// descriptor flag combination, malformed field-type descriptor,
    /// unknown tag, reference to an unbound handle, a rebound handle, or
    /// invalid modified UTF-8.
    #[error("invalid stream at offset {offset}: expected {expected}, found {found}")]
    Validity {
        offset: u64,
        expected: String,
        found: String,
    },

    /// The underlying source returned EOF in the middle of a record.
    #[error("unexpected end of stream at offset {offset}: expected {expected}")]
    Truncation { offset: u64, expected: String },

    /// A length-prefixed field carried a negative or oversized count.
    #[error("size limit violated at offset {offset}: {what} was {value}")]
    SizeLimit {
        offset: u64,
        what: String,
        value: i64,
    },
}

impl DecodeError {
    pub(crate) fn validity(offset: u64, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::Validity {
            offset,
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub(crate) fn validity_byte(offset: u64, expected: impl Into<String>, found_byte: u8) -> Self {
        Self::Validity {
            offset,
            expected: expected.into(),
            found: format!("{found_byte:#04x}"),
        }
    }

    pub(crate) fn truncation(offset: u64, expected: impl Into<String>) -> Self {
        Self::Truncation {
            offset,
            expected: expected.into(),
        }
    }

    pub(crate) fn size_limit(offset: u64, what: impl Into<String>, value: i64) -> Self {
        Self::SizeLimit {
            offset,
            what: what.into(),
            value,
        }
    }
}

pub type DecodeResult<T> = Result<T, DecodeError>;
