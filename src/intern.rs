//! The literal band: small integers, the four value singletons, and the
//! table of short symbols interned as a single byte.
//!
//! `L = 33`: a 32-bit or 64-bit integer in `[0, L)` collapses to one byte.
//! The two integer sub-bands and the singleton sub-band are fixed size; the
//! symbol sub-band is this crate's curated "commonly seen identifier" table,
//! the Rust-side analogue of the long `TAGS` table a host language runtime
//! would already carry for its own AST/reflection symbols.

use crate::tag::{LITERAL_BAND_START, TypeTag};

/// Number of interned small-integer values per width (`0..L`).
pub const L: u32 = 33;

pub const INT32_LITERAL_START: u8 = LITERAL_BAND_START;
pub const INT64_LITERAL_START: u8 = INT32_LITERAL_START + L as u8;
pub const SINGLETON_START: u8 = INT64_LITERAL_START + L as u8;

pub const EMPTY_TUPLE_TAG: u8 = SINGLETON_START;
pub const TRUE_TAG: u8 = SINGLETON_START + 1;
pub const FALSE_TAG: u8 = SINGLETON_START + 2;
pub const NOTHING_VALUE_TAG: u8 = SINGLETON_START + 3;

pub const SYMBOL_TABLE_START: u8 = SINGLETON_START + 4;

/// Short symbols that get a one-byte tag instead of `SYMBOL`/`LONGSYMBOL`.
/// Order is part of the wire contract: index `i` encodes to
/// `SYMBOL_TABLE_START + i`.
pub const SHORT_SYMBOLS: &[&str] = &[
    "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m", "n", "o", "p", "q", "r", "s",
    "t", "u", "v", "w", "x", "y", "z", "Tuple", "call", "block", "body", "quote", "new", "line",
    "inbounds", "boundscheck", "meta", "return", "goto", "gotoifnot", "lambda", "self", "Core",
    "Base", "Main", "function", "struct", "module", "global", "local", "const", "if", "else",
    "for", "while", "try", "catch", "finally", "begin", "end", "runnable", "done", "failed",
];

pub const SYMBOL_TABLE_END: u8 = SYMBOL_TABLE_START + SHORT_SYMBOLS.len() as u8 - 1;

/// The "kind of thing" tag (§4.1 type tags) and "the type object of that
/// kind, used as a value" are different wire codes: `TypeTag::Int64` always
/// means "an Int64 payload follows" wherever `decode_value` reads it, so a
/// first-class reference to the type `Int64` itself (scenario 5, §8) needs
/// its own one-byte code, not a second meaning squeezed onto the same byte.
/// This is the same trick a host language runtime's own `sertag`/`deser_tag`
/// constant table plays for its common singleton types; here it is a second,
/// parallel literal sub-band instead of borrowing bytes from the first.
pub const TYPE_LITERAL_START: u8 = SYMBOL_TABLE_END + 1;

pub const TYPE_LITERAL_KINDS: &[TypeTag] = &[
    TypeTag::Int8,
    TypeTag::Int16,
    TypeTag::Int32,
    TypeTag::Int64,
    TypeTag::Int128,
    TypeTag::UInt8,
    TypeTag::UInt16,
    TypeTag::UInt32,
    TypeTag::UInt64,
    TypeTag::UInt128,
    TypeTag::Float16,
    TypeTag::Float32,
    TypeTag::Float64,
    TypeTag::Bool,
    TypeTag::Char,
    TypeTag::Nothing,
    TypeTag::String,
    TypeTag::Symbol,
    TypeTag::Tuple,
    TypeTag::SimpleVector,
    TypeTag::Array,
    TypeTag::Expr,
];

pub const TYPE_LITERAL_END: u8 = TYPE_LITERAL_START + TYPE_LITERAL_KINDS.len() as u8 - 1;

pub fn type_literal_tag(kind: TypeTag) -> Option<u8> {
    TYPE_LITERAL_KINDS
        .iter()
        .position(|k| *k == kind)
        .map(|i| TYPE_LITERAL_START + i as u8)
}

pub fn type_literal_from_tag(tag: u8) -> Option<TypeTag> {
    if (TYPE_LITERAL_START..=TYPE_LITERAL_END).contains(&tag) {
        Some(TYPE_LITERAL_KINDS[(tag - TYPE_LITERAL_START) as usize])
    } else {
        None
    }
}

/// Unused tail of the byte space, left for a future format version to spend.
pub const RESERVED_START: u16 = TYPE_LITERAL_END as u16 + 1;

pub fn short_symbol_tag(name: &str) -> Option<u8> {
    SHORT_SYMBOLS
        .iter()
        .position(|s| *s == name)
        .map(|i| SYMBOL_TABLE_START + i as u8)
}

pub fn short_symbol_from_tag(tag: u8) -> Option<&'static str> {
    if (SYMBOL_TABLE_START..=SYMBOL_TABLE_END).contains(&tag) {
        Some(SHORT_SYMBOLS[(tag - SYMBOL_TABLE_START) as usize])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_are_tight_and_in_range() {
        assert_eq!(INT32_LITERAL_START as u32 + L, INT64_LITERAL_START as u32);
        assert_eq!(INT64_LITERAL_START as u32 + L, SINGLETON_START as u32);
        assert_eq!(SINGLETON_START as u32 + 4, SYMBOL_TABLE_START as u32);
        assert!(RESERVED_START <= 256);
    }

    #[test]
    fn short_symbols_roundtrip() {
        for (i, name) in SHORT_SYMBOLS.iter().enumerate() {
            let tag = SYMBOL_TABLE_START + i as u8;
            assert_eq!(short_symbol_tag(name), Some(tag));
            assert_eq!(short_symbol_from_tag(tag), Some(*name));
        }
    }

    #[test]
    fn type_literals_roundtrip() {
        for kind in TYPE_LITERAL_KINDS {
            let tag = type_literal_tag(*kind).unwrap();
            assert_eq!(type_literal_from_tag(tag), Some(*kind));
        }
    }
}
