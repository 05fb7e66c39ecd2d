//! Parser and in-memory content graph for the Java Object Serialization
//! Stream Protocol — the byte format `ObjectOutputStream` writes and
//! `ObjectInputStream` reads.
//!
//! The entry point is [`decode`]. It turns any [`std::io::Read`] byte
//! source into a [`DecodedStream`]: the ordered top-level records plus
//! every handle-table epoch needed to resolve back-references.

pub mod analyzer;
pub mod byte_source;
pub mod content;
pub mod decoder;
pub mod error;
pub mod graph;
pub mod handle;
pub mod mutf8;

pub use content::{
    ArrayElements, ClassData, ClassDesc, ClassType, Content, ContentData, DescFlags, Field,
    FieldType, FieldValue, Instance, Value,
};
pub use decoder::{DecodedStream, Options};
pub use error::{DecodeError, DecodeResult};
pub use handle::Handle;

use std::io::Read;

/// Decodes a full JOSSP byte stream, following up with the inner/static
/// member class reconnection pass when `options.connect_member_classes`
/// is set (`spec.md` §6).
pub fn decode<R: Read>(source: R, options: Options) -> DecodeResult<DecodedStream> {
    decoder::decode(source, options)
}
