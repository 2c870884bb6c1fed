//! Integration tests exercising the public API against the testable
//! properties in the specification this codec implements (roundtrip,
//! identity, cycle, deduplication, header, and version-tolerance laws).

use std::io::Cursor;
use std::rc::Rc;

use rstest::rstest;

use crate::api::{deserialize, serialize};
use crate::describe::describe;
use crate::resolver::SandboxResolver;
use crate::tag::{Header, PROTOCOL_VERSION};
use crate::value::{
    shared, DictKind, DictValue, ModuleValue, RecordKind, RecordValue, TypeDescriptor, Value,
};

fn test_module(name: &str) -> Rc<ModuleValue> {
    Rc::new(ModuleValue {
        root_uuid: None,
        root_name: Rc::from(name),
        path: Vec::new(),
    })
}

fn test_type(module: Rc<ModuleValue>, name: &str) -> Rc<TypeDescriptor> {
    Rc::new(TypeDescriptor::DataType {
        module,
        name: Rc::from(name),
        params: Vec::new(),
    })
}

fn roundtrip(value: &Value) -> Value {
    let mut buf = Vec::new();
    serialize(&mut buf, value).expect("serialize");
    deserialize(Cursor::new(buf)).expect("deserialize")
}

/// Scenario 1: a small 64-bit integer collapses to a single literal byte.
#[test]
fn small_int64_fast_path_is_one_byte() {
    let mut writer = crate::writer::WriterState::new(Vec::new());
    crate::encode::encode_value(&mut writer, &Value::Int64(5)).unwrap();
    assert_eq!(writer.sink, vec![crate::intern::INT64_LITERAL_START + 5]);

    let mut reader = crate::reader::ReaderState::new(Cursor::new(writer.sink));
    let resolver = SandboxResolver::default();
    let decoded = crate::decode::decode_value(&mut reader, &resolver).unwrap();
    assert!(matches!(decoded, Value::Int64(5)));
}

/// Scenario 2: a mutable record whose own field points at itself survives
/// the allocate-then-fill protocol and decodes back into a self-referencing
/// record (the Cycle law, §8).
#[test]
fn mutable_record_self_cycle_roundtrips() {
    let module = test_module("Test");
    let ty = test_type(module, "Node");
    let record = shared(RecordValue {
        ty: Rc::clone(&ty),
        kind: RecordKind::Mutable(vec![None]),
    });
    record.borrow_mut().kind = RecordKind::Mutable(vec![Some(Value::Record(Rc::clone(&record)))]);

    let value = Value::Record(record);
    let decoded = roundtrip(&value);
    let Value::Record(decoded_record) = decoded else {
        panic!("expected a record");
    };
    match &decoded_record.borrow().kind {
        RecordKind::Mutable(fields) => match &fields[0] {
            Some(Value::Record(inner)) => {
                assert!(Rc::ptr_eq(inner, &decoded_record), "self-reference must be identity-equal");
            }
            other => panic!("expected the field to hold a record, got {other:?}"),
        },
        other => panic!("expected a mutable record, got {other:?}"),
    }
}

/// Scenario 3 & the Deduplication law: two references to the same
/// long string inside a tuple share one allocation after decode.
#[test]
fn shared_long_string_in_tuple_is_deduplicated() {
    let s: Rc<str> = Rc::from("abcdefghij");
    let tuple = Value::Tuple(Rc::new(vec![Value::String(Rc::clone(&s)), Value::String(s)]));
    let decoded = roundtrip(&tuple);
    let Value::Tuple(items) = decoded else {
        panic!("expected a tuple");
    };
    let (Value::String(a), Value::String(b)) = (&items[0], &items[1]) else {
        panic!("expected two strings");
    };
    assert!(Rc::ptr_eq(a, b), "shared long strings must decode to one allocation");
    assert_eq!(a.as_ref(), "abcdefghij");
}

/// Short strings (<= 7 bytes) are never shared, even when textually equal.
#[test]
fn short_strings_are_not_deduplicated() {
    let tuple = Value::Tuple(Rc::new(vec![
        Value::String(Rc::from("short")),
        Value::String(Rc::from("short")),
    ]));
    let decoded = roundtrip(&tuple);
    let Value::Tuple(items) = decoded else {
        panic!("expected a tuple");
    };
    let (Value::String(a), Value::String(b)) = (&items[0], &items[1]) else {
        panic!("expected two strings");
    };
    assert_eq!(a.as_ref(), b.as_ref());
}

/// Scenario 4: boolean run-length encoding, with runs capped at 127.
#[test]
fn bool_array_rle_roundtrips_and_splits_long_runs() {
    let mut bits = Vec::with_capacity(300);
    bits.extend(std::iter::repeat(true).take(128));
    bits.extend(std::iter::repeat(false).take(128));
    bits.extend(std::iter::repeat(true).take(44));

    let module = test_module("Core");
    let bool_ty = Rc::new(TypeDescriptor::DataType {
        module,
        name: Rc::from("Bool"),
        params: Vec::new(),
    });
    let array = shared(crate::value::ArrayValue {
        elem_type: bool_ty,
        shape: crate::value::ArrayShape::Vector(bits.len() as u64),
        data: crate::value::ArrayData::Bool(bits.clone()),
    });

    let mut writer = crate::writer::WriterState::new(Vec::new());
    crate::encode::encode_value(&mut writer, &Value::Array(array)).unwrap();

    // ARRAY tag, one-byte Bool type literal, shape(u8 ndims=1, u64 len),
    // then the RLE'd element bytes.
    let header_len = 1 /* ARRAY tag */ + 1 /* elem type literal */ + 1 /* ndims */ + 8 /* u64 len */;
    let rle_bytes = &writer.sink[header_len..];
    assert_eq!(rle_bytes, &[0xFF, 0x81, 0x7F, 0x01, 0xAC]);

    let mut reader = crate::reader::ReaderState::new(Cursor::new(writer.sink));
    let resolver = SandboxResolver::default();
    let decoded = crate::decode::decode_value(&mut reader, &resolver).unwrap();
    let Value::Array(decoded_arr) = decoded else {
        panic!("expected an array");
    };
    match &decoded_arr.borrow().data {
        crate::value::ArrayData::Bool(decoded_bits) => assert_eq!(*decoded_bits, bits),
        other => panic!("expected bool data, got {other:?}"),
    }
}

/// Scenario 5: the builtin type `Int64` is a one-byte `TYPE_LITERAL`.
#[test]
fn builtin_type_is_one_byte() {
    let module = test_module("Core");
    let ty = Rc::new(TypeDescriptor::DataType {
        module,
        name: Rc::from("Int64"),
        params: Vec::new(),
    });
    let mut writer = crate::writer::WriterState::new(Vec::new());
    crate::typedesc::encode_type(&mut writer, &ty).unwrap();
    assert_eq!(writer.sink.len(), 1);

    let mut reader = crate::reader::ReaderState::new(Cursor::new(writer.sink));
    let resolver = SandboxResolver::default();
    let decoded = crate::typedesc::decode_type(&mut reader, &resolver).unwrap();
    assert_eq!(decoded.name(), "Int64");
}

/// Scenario 6: a dictionary of dictionaries with a shared inner dict
/// decodes with both outer values identity-equal to each other.
#[test]
fn shared_inner_dict_is_deduplicated() {
    let dict_module = test_module("Core");
    let inner_ty = test_type(Rc::clone(&dict_module), "Dict");
    let inner = shared(DictValue {
        ty: inner_ty,
        kind: DictKind::ByValue,
        entries: vec![(Value::Int64(1), Value::Int64(2))],
    });
    let outer_ty = test_type(dict_module, "Dict");
    let outer = shared(DictValue {
        ty: outer_ty,
        kind: DictKind::ByValue,
        entries: vec![
            (Value::String(Rc::from("aaaaaaaa")), Value::Dict(Rc::clone(&inner))),
            (Value::String(Rc::from("bbbbbbbb")), Value::Dict(Rc::clone(&inner))),
        ],
    });

    let decoded = roundtrip(&Value::Dict(outer));
    let Value::Dict(decoded_outer) = decoded else {
        panic!("expected a dict");
    };
    let entries = &decoded_outer.borrow().entries;
    let (Value::Dict(a), Value::Dict(b)) = (&entries[0].1, &entries[1].1) else {
        panic!("expected two nested dicts");
    };
    assert!(Rc::ptr_eq(a, b), "the shared inner dict must decode to one allocation");
}

/// Header law: `serialize`'s first 5 bytes always name the tag byte, magic,
/// current version, and this host's endianness/word-size flags.
#[test]
fn header_bytes_match_current_host() {
    let mut buf = Vec::new();
    serialize(&mut buf, &Value::Nothing).unwrap();
    assert_eq!(buf[0], 0x37);
    assert_eq!(&buf[1..3], b"JL");
    assert_eq!(buf[3], PROTOCOL_VERSION);
    let expected_flags = Header::current().to_bytes()[4];
    assert_eq!(buf[4], expected_flags);
}

/// Version tolerance: a reader at the current version decodes a stream
/// whose header declares an older (but supported) protocol version,
/// defaulting any version-gated fields instead of failing.
#[test]
fn older_version_stream_still_decodes() {
    let old_header = Header {
        version: 1,
        ..Header::current()
    };
    let mut buf = old_header.to_bytes().to_vec();
    let mut writer = crate::writer::WriterState::new(&mut buf);
    crate::encode::encode_value(&mut writer, &Value::Int64(42)).unwrap();
    let decoded = deserialize(Cursor::new(buf)).unwrap();
    assert!(matches!(decoded, Value::Int64(42)));
}

/// A peer protocol version newer than this reader is a bad-header error.
#[test]
fn newer_version_stream_is_rejected() {
    let mut buf = vec![0x37, b'J', b'L', PROTOCOL_VERSION + 1, 0, 0, 0, 0];
    buf.push(crate::intern::INT64_LITERAL_START + 5);
    assert!(deserialize(Cursor::new(buf)).is_err());
}

/// A back-reference to a slot nothing was ever stored in is an
/// unrecoverable desynchronization, not a panic.
#[test]
fn backref_to_unknown_slot_is_an_error() {
    let mut buf = Header::current().to_bytes().to_vec();
    buf.push(crate::tag::ControlTag::BackRef.into());
    buf.extend_from_slice(&99u32.to_ne_bytes());
    assert!(deserialize(Cursor::new(buf)).is_err());
}

#[rstest]
#[case(Value::Int32(0))]
#[case(Value::Int32(32))]
#[case(Value::Int64(0))]
#[case(Value::Int64(1_000_000_000_000))]
#[case(Value::UInt8(255))]
#[case(Value::Float64(std::f64::consts::PI))]
#[case(Value::Bool(true))]
#[case(Value::Bool(false))]
#[case(Value::Char('λ'))]
#[case(Value::Nothing)]
fn primitive_values_roundtrip_bitwise(#[case] value: Value) {
    let decoded = roundtrip(&value);
    match (&value, &decoded) {
        (Value::Int32(a), Value::Int32(b)) => assert_eq!(a, b),
        (Value::Int64(a), Value::Int64(b)) => assert_eq!(a, b),
        (Value::UInt8(a), Value::UInt8(b)) => assert_eq!(a, b),
        (Value::Float64(a), Value::Float64(b)) => assert_eq!(a.to_bits(), b.to_bits()),
        (Value::Bool(a), Value::Bool(b)) => assert_eq!(a, b),
        (Value::Char(a), Value::Char(b)) => assert_eq!(a, b),
        (Value::Nothing, Value::Nothing) => {}
        other => panic!("kind mismatch: {other:?}"),
    }
}

#[test]
fn interned_short_symbol_is_one_byte() {
    let mut writer = crate::writer::WriterState::new(Vec::new());
    crate::encode::encode_symbol(&mut writer, &Rc::from("call")).unwrap();
    assert_eq!(writer.sink.len(), 1);
    let decoded = roundtrip(&Value::Symbol(Rc::from("call")));
    assert!(matches!(decoded, Value::Symbol(s) if s.as_ref() == "call"));
}

#[test]
fn describe_tree_handles_a_cycle_without_recursing_forever() {
    let module = test_module("Test");
    let ty = test_type(module, "Node");
    let record = shared(RecordValue {
        ty,
        kind: RecordKind::Mutable(vec![None]),
    });
    record.borrow_mut().kind = RecordKind::Mutable(vec![Some(Value::Record(Rc::clone(&record)))]);
    // Must terminate and must be representable as YAML.
    let tree = describe(&Value::Record(record));
    let rendered = serde_yaml::to_string(&tree).unwrap();
    assert!(rendered.contains("Shared"));
}
