//! The public surface (§6): four operations plus file-path convenience
//! wrappers, the same shape as this crate's ancestry of thin `read`/`write`
//! free functions layered on top of a section-by-section API.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::Result;

use crate::decode;
use crate::encode;
use crate::io::{WireRead, WireWrite};
use crate::reader::ReaderState;
use crate::resolver::{SandboxResolver, TypeResolver};
use crate::tag::Header;
use crate::value::Value;
use crate::writer::WriterState;

/// Writes the 8-byte stream header followed by `value`'s encoding.
pub fn serialize<W: WireWrite>(sink: W, value: &Value) -> Result<()> {
    let mut writer = WriterState::new(sink);
    writer.sink.write_bytes(&Header::current().to_bytes())?;
    encode::encode_value(&mut writer, value)
}

/// Encodes `value` onto an already-open writer session without emitting a
/// header first. Useful for batching several values onto one stream behind
/// a single header: call [`serialize`] (or write a header manually) once,
/// then reuse the same [`WriterState`] across further calls to this
/// function so back-references keep working across the batch.
pub fn serialize_no_header<W: WireWrite>(writer: &mut WriterState<W>, value: &Value) -> Result<()> {
    encode::encode_value(writer, value)
}

/// Reads the 8-byte stream header, then decodes one value, resolving named
/// types through the dependency-free [`SandboxResolver`]. For a host that
/// embeds this codec in a real module system, use
/// [`deserialize_with_resolver`] instead.
pub fn deserialize<R: WireRead>(source: R) -> Result<Value> {
    let resolver = SandboxResolver::default();
    deserialize_with_resolver(source, &resolver)
}

/// Same as [`deserialize`], but resolving named types through a
/// caller-supplied [`TypeResolver`] instead of the sandbox default.
pub fn deserialize_with_resolver<R: WireRead>(mut source: R, resolver: &dyn TypeResolver) -> Result<Value> {
    let mut header_bytes = [0u8; 8];
    std::io::Read::read_exact(&mut source, &mut header_bytes)?;
    let header = Header::from_bytes(header_bytes)?;
    let mut reader = ReaderState::new(source);
    reader.version = header.version;
    decode::decode_value(&mut reader, resolver)
}

/// Decodes one value continuing an existing reader session (no header is
/// consumed): the inverse of [`serialize_no_header`], for reading the next
/// value out of a batch that shares one [`ReaderState`].
pub fn deserialize_no_header<R: WireRead>(
    reader: &mut ReaderState<R>,
    resolver: &dyn TypeResolver,
) -> Result<Value> {
    decode::decode_value(reader, resolver)
}

/// Opens `path` and writes a header-prefixed stream containing `value`.
pub fn serialize_to_file(path: impl AsRef<Path>, value: &Value) -> Result<()> {
    let file = File::create(path.as_ref())?;
    serialize(BufWriter::new(file), value)
}

/// Opens `path` and decodes its header-prefixed stream into a single value.
pub fn deserialize_from_file(path: impl AsRef<Path>) -> Result<Value> {
    let file = File::open(path.as_ref())?;
    deserialize(BufReader::new(file))
}
