//! The wire tag alphabet and the 8-byte stream header.
//!
//! Code allocation is contract: changing it is a format version bump (see
//! [`PROTOCOL_VERSION`]). Codes 1..=31 are the well-known *type tags*; their
//! numeric order is fixed and doubles as the fast-path dispatch order in
//! `encode`/`decode`. Codes 32..=48 are the *control tags* (structural
//! operators). Code 0 is never a standalone tag: it is the escape byte
//! [`WriterState::emit_as_value`](crate::writer::WriterState::emit_as_value)
//! prepends so a control-tag byte can be read back as a tag-literal. Codes
//! 49 and up are the literal band (small integers, interned symbols, and the
//! four value singletons); see [`crate::intern`].

use anyhow::{anyhow, ensure, Result};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::Error;

/// Byte that opens every header-bearing stream.
pub const HEADER_TAG_BYTE: u8 = 0x37;
pub const HEADER_MAGIC: [u8; 2] = *b"JL";
/// Current protocol version. Bump whenever the tag allocation changes.
pub const PROTOCOL_VERSION: u8 = 3;

/// Threshold versions for fields added after version 1. A reader accepts any
/// version <= [`PROTOCOL_VERSION`]; fields gated behind a threshold higher
/// than the peer's version are left at their default.
pub mod version_gate {
    /// `Method::inference_flags` and `Method::recursion_relation`.
    pub const INFERENCE_FLAGS: u8 = 2;
    /// `MethodInstance::sparam_values`.
    pub const SPARAM_VALUES: u8 = 3;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum TypeTag {
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    Int128 = 5,
    UInt8 = 6,
    UInt16 = 7,
    UInt32 = 8,
    UInt64 = 9,
    UInt128 = 10,
    Float16 = 11,
    Float32 = 12,
    Float64 = 13,
    Bool = 14,
    Char = 15,
    Nothing = 16,
    String = 17,
    Symbol = 18,
    Tuple = 19,
    SimpleVector = 20,
    Array = 21,
    Expr = 22,
    DataType = 23,
    TypeName = 24,
    Module = 25,
    Task = 26,
    Method = 27,
    MethodInstance = 28,
    GlobalRef = 29,
    /// Value-hashed dictionary. Identity-hashed dictionaries use the
    /// `IdDict` control tag instead; both delegate to the same
    /// count-then-pairs field layout (§4.5).
    Dict = 30,
    /// An array whose element type is a byte (`UInt8`): shape followed by
    /// the raw bytes directly, with no element type descriptor on the wire
    /// at all. Distinct from `Array` so the decoder knows, from the tag
    /// alone, whether an element type descriptor follows (§4.4's "unless
    /// element type is byte" is otherwise unreadable without this split).
    ByteArray = 31,
}

pub const N_TYPE_TAGS: u8 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ControlTag {
    UndefRef = 32,
    BackRef = 33,
    LongBackRef = 34,
    ShortBackRef = 35,
    LongTuple = 36,
    LongSymbol = 37,
    LongExpr = 38,
    LongString = 39,
    ShortInt64 = 40,
    FullDataType = 41,
    WrapperDataType = 42,
    Object = 43,
    RefObject = 44,
    FullGlobalRef = 45,
    Header = 46,
    IdDict = 47,
    SharedRef = 48,
}

pub const N_CONTROL_TAGS: u8 = 17;
/// First byte of the literal band; everything from here to 255 is either an
/// interned small integer, an interned symbol, or one of the four value
/// singletons (see [`crate::intern`]).
pub const LITERAL_BAND_START: u8 = N_TYPE_TAGS + N_CONTROL_TAGS + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Type(TypeTag),
    Control(ControlTag),
    Literal(u8),
}

impl Tag {
    pub fn from_byte(byte: u8) -> Result<Tag> {
        if byte == 0 {
            return Err(anyhow!(Error::Desync {
                reason: "tag byte 0 is the escape byte, never a standalone tag".into(),
            }));
        }
        if let Ok(t) = TypeTag::try_from(byte) {
            return Ok(Tag::Type(t));
        }
        if let Ok(c) = ControlTag::try_from(byte) {
            return Ok(Tag::Control(c));
        }
        Ok(Tag::Literal(byte))
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Tag::Type(t) => t.into(),
            Tag::Control(c) => c.into(),
            Tag::Literal(b) => b,
        }
    }

    /// True for tags that live in the control band: these need the
    /// zero-byte escape when they are written as a stand-alone *value*
    /// rather than as the leading operator of a larger payload.
    pub fn is_control(self) -> bool {
        matches!(self, Tag::Control(_))
    }
}

/// Endianness recorded in the header flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    pub fn native() -> Self {
        if cfg!(target_endian = "little") {
            Endianness::Little
        } else {
            Endianness::Big
        }
    }

    fn bits(self) -> u8 {
        match self {
            Endianness::Little => 0,
            Endianness::Big => 1,
        }
    }

    fn from_bits(bits: u8) -> Self {
        if bits & 1 == 0 {
            Endianness::Little
        } else {
            Endianness::Big
        }
    }
}

/// Native pointer width recorded in the header flags byte. Advisory only:
/// the decoder does not refuse a mismatched word size by itself (only a
/// mismatched endianness is fatal), since fixed-width integers already carry
/// their own width on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordSize {
    W32,
    W64,
}

impl WordSize {
    pub fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            WordSize::W64
        } else {
            WordSize::W32
        }
    }

    fn bits(self) -> u8 {
        match self {
            WordSize::W32 => 0,
            WordSize::W64 => 1,
        }
    }

    fn from_bits(bits: u8) -> Self {
        if (bits >> 2) & 1 == 0 {
            WordSize::W32
        } else {
            WordSize::W64
        }
    }
}

/// The 8-byte stream header: tag byte, magic, version, flags, 3 reserved
/// zero bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub endianness: Endianness,
    pub word_size: WordSize,
}

impl Header {
    pub fn current() -> Self {
        Header {
            version: PROTOCOL_VERSION,
            endianness: Endianness::native(),
            word_size: WordSize::native(),
        }
    }

    pub fn to_bytes(self) -> [u8; 8] {
        let flags = self.endianness.bits() | (self.word_size.bits() << 2);
        [
            HEADER_TAG_BYTE,
            HEADER_MAGIC[0],
            HEADER_MAGIC[1],
            self.version,
            flags,
            0,
            0,
            0,
        ]
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Result<Self> {
        ensure!(
            bytes[0] == HEADER_TAG_BYTE,
            Error::BadHeader {
                reason: format!("expected tag byte 0x{HEADER_TAG_BYTE:02x}, got 0x{:02x}", bytes[0]),
            }
        );
        ensure!(
            bytes[1..3] == HEADER_MAGIC,
            Error::BadHeader {
                reason: "magic bytes are not \"JL\"".into(),
            }
        );
        let version = bytes[3];
        ensure!(
            version <= PROTOCOL_VERSION,
            Error::BadHeader {
                reason: format!(
                    "peer protocol version {version} is newer than this reader's {PROTOCOL_VERSION}"
                ),
            }
        );
        let flags = bytes[4];
        let endianness = Endianness::from_bits(flags);
        ensure!(
            endianness == Endianness::native(),
            Error::BadHeader {
                reason: "stream endianness does not match this machine's".into(),
            }
        );
        let word_size = WordSize::from_bits(flags);
        ensure!(
            bytes[5..8] == [0, 0, 0],
            Error::BadHeader {
                reason: "reserved header bytes are not zero".into(),
            }
        );
        Ok(Header {
            version,
            endianness,
            word_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_bands_are_disjoint_and_contiguous() {
        assert_eq!(N_TYPE_TAGS, 31);
        assert_eq!(N_CONTROL_TAGS, 17);
        // type tags occupy 1..=29, control tags 30..=46, no gap between them.
        assert_eq!(TypeTag::Int8 as u8, 1);
        assert_eq!(ControlTag::UndefRef as u8, N_TYPE_TAGS + 1);
        assert_eq!(LITERAL_BAND_START, N_TYPE_TAGS + N_CONTROL_TAGS + 1);
    }

    #[test]
    fn header_roundtrip() {
        let h = Header::current();
        let bytes = h.to_bytes();
        assert_eq!(bytes[0], HEADER_TAG_BYTE);
        assert_eq!(&bytes[1..3], b"JL");
        let back = Header::from_bytes(bytes).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut bytes = Header::current().to_bytes();
        bytes[1] = b'X';
        assert!(Header::from_bytes(bytes).is_err());
    }

    #[test]
    fn header_rejects_newer_version() {
        let mut bytes = Header::current().to_bytes();
        bytes[3] = PROTOCOL_VERSION + 1;
        assert!(Header::from_bytes(bytes).is_err());
    }

    #[test]
    fn zero_byte_is_never_a_tag() {
        assert!(Tag::from_byte(0).is_err());
    }
}
