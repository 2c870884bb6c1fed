//! The error taxonomy for the codec.
//!
//! Internal code propagates with [`anyhow::Result`] and `.context(..)`, the same way
//! the rest of this crate's ancestry layers `anyhow::Context` over nested `read`
//! calls; at the point a failure is first detected it is wrapped as one of the
//! variants below (`anyhow!(Error::Desync { .. })`) so callers who need to match on
//! *which* of the five kinds occurred can `downcast_ref::<Error>()` the resulting
//! `anyhow::Error` instead of string-matching a message.

use std::fmt;

/// One of the five failure kinds the wire format can surface.
#[derive(Debug)]
pub enum Error {
    /// Magic mismatch, endianness mismatch, or a peer protocol version newer
    /// than this reader supports.
    BadHeader { reason: String },
    /// An unknown tag byte, or a back-reference to a slot nothing was ever
    /// stored in. The stream and the reader state have fallen out of step;
    /// there is no partial recovery.
    Desync { reason: String },
    /// An attempt to serialize something the format has no wire form for: a
    /// running task, a method whose dispatch table lives outside the stream,
    /// an atomic raw buffer, or a non-null raw pointer.
    Unsupported { reason: String },
    /// A type-name record needs a super-type or parameter that is itself
    /// still under construction.
    RecursiveTypeCycle { type_name: String },
    /// Propagated from the underlying byte stream.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadHeader { reason } => write!(f, "bad header: {reason}"),
            Error::Desync { reason } => write!(f, "desynchronized stream: {reason}"),
            Error::Unsupported { reason } => write!(f, "unsupported value: {reason}"),
            Error::RecursiveTypeCycle { type_name } => {
                write!(f, "type `{type_name}` is not yet bound (recursive construction)")
            }
            Error::Io(e) => write!(f, "i/o failure: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
