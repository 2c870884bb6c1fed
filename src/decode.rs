//! The value decoder (§4.5): reads a tag, then dispatches to the routine
//! that knows how to finish reading that tag's payload. Mirrors
//! [`crate::encode`] function-for-function; every `reserve_slot`/`install`
//! pair here happens at the same relative point in the traversal as the
//! matching `try_backref` on the encode side, so the two counters never
//! drift apart.

use std::rc::Rc;

use anyhow::{anyhow, bail, ensure, Result};

use crate::error::Error;
use crate::intern;
use crate::reader::ReaderState;
use crate::resolver::TypeResolver;
use crate::tag::{self, ControlTag, Tag, TypeTag};
use crate::typedesc;
use crate::value::{
    shared, ArrayData, ArrayShape, ArrayValue, DictKind, DictValue, ExprValue, GlobalRefValue,
    MethodInstanceValue, MethodValue, ModuleValue, RecordKind, RecordValue, TaskState, TaskValue,
    TypeDescriptor, Value,
};
use crate::io::WireRead;

/// The single entry point §4.5 describes: reads one tag and dispatches on
/// it to produce a fully-formed [`Value`].
pub fn decode_value<R: WireRead>(reader: &mut ReaderState<R>, resolver: &dyn TypeResolver) -> Result<Value> {
    let tag = reader.read_tag()?;
    decode_value_for_tag(reader, resolver, tag)
}

/// Same dispatch, but for a tag the caller already consumed (so a
/// lookahead byte used to decide "is this a terminator / is this absent"
/// doesn't get read twice).
pub fn decode_value_for_tag<R: WireRead>(
    reader: &mut ReaderState<R>,
    resolver: &dyn TypeResolver,
    tag: Tag,
) -> Result<Value> {
    if let Tag::Control(ControlTag::ShortBackRef | ControlTag::BackRef | ControlTag::LongBackRef) = tag {
        let slot = read_backref_slot(reader, tag)?;
        return reader.gettable(slot);
    }

    match tag {
        Tag::Literal(b) => decode_literal(reader, resolver, b),

        Tag::Type(TypeTag::Char) => {
            let cp = reader.source.read_u32()?;
            let c = char::from_u32(cp).ok_or_else(|| {
                anyhow!(Error::Desync {
                    reason: format!("{cp} is not a valid char codepoint"),
                })
            })?;
            Ok(Value::Char(c))
        }
        Tag::Type(TypeTag::Int8) => Ok(Value::Int8(reader.source.read_i8()?)),
        Tag::Type(TypeTag::Int16) => Ok(Value::Int16(reader.source.read_i16()?)),
        Tag::Type(TypeTag::Int32) => Ok(Value::Int32(reader.source.read_i32()?)),
        Tag::Control(ControlTag::ShortInt64) => Ok(Value::Int64(reader.source.read_i32()? as i64)),
        Tag::Type(TypeTag::Int64) => Ok(Value::Int64(reader.source.read_i64()?)),
        Tag::Type(TypeTag::Int128) => Ok(Value::Int128(reader.source.read_i128()?)),
        Tag::Type(TypeTag::UInt8) => Ok(Value::UInt8(reader.source.read_u8()?)),
        Tag::Type(TypeTag::UInt16) => Ok(Value::UInt16(reader.source.read_u16()?)),
        Tag::Type(TypeTag::UInt32) => Ok(Value::UInt32(reader.source.read_u32()?)),
        Tag::Type(TypeTag::UInt64) => Ok(Value::UInt64(reader.source.read_u64()?)),
        Tag::Type(TypeTag::UInt128) => Ok(Value::UInt128(reader.source.read_u128()?)),
        Tag::Type(TypeTag::Float16) => Ok(Value::Float16(reader.source.read_u16()?)),
        Tag::Type(TypeTag::Float32) => Ok(Value::Float32(reader.source.read_f32()?)),
        Tag::Type(TypeTag::Float64) => Ok(Value::Float64(reader.source.read_f64()?)),

        Tag::Type(TypeTag::String) | Tag::Control(ControlTag::LongString) => {
            Ok(Value::String(decode_string_body(reader, tag)?))
        }
        Tag::Control(ControlTag::SharedRef) => {
            // Generic "this value is about to be shared" wrapper; only
            // long strings use it today, but the slot bookkeeping doesn't
            // care what kind of value follows.
            let slot = reader.reserve_slot();
            let inner = reader.read_tag()?;
            let v = decode_value_for_tag(reader, resolver, inner)?;
            reader.install(slot, v.clone());
            reader.finish_pending(slot);
            Ok(v)
        }
        Tag::Type(TypeTag::Symbol) | Tag::Control(ControlTag::LongSymbol) => {
            Ok(Value::Symbol(decode_symbol_body(reader, tag)?))
        }

        Tag::Type(TypeTag::Tuple) | Tag::Control(ControlTag::LongTuple) => decode_tuple(reader, resolver, tag),
        Tag::Type(TypeTag::SimpleVector) => decode_simple_vector(reader, resolver),
        Tag::Type(TypeTag::Array) | Tag::Type(TypeTag::ByteArray) => decode_array(reader, resolver, tag),
        Tag::Type(TypeTag::Expr) | Tag::Control(ControlTag::LongExpr) => decode_expr(reader, resolver, tag),

        Tag::Control(ControlTag::Object) => decode_record(reader, resolver),
        Tag::Control(ControlTag::RefObject) => decode_record_ref_object(reader, resolver),

        Tag::Type(TypeTag::Dict) | Tag::Control(ControlTag::IdDict) => decode_dict(reader, resolver, tag),

        Tag::Type(TypeTag::DataType) | Tag::Control(ControlTag::FullDataType) | Tag::Control(ControlTag::WrapperDataType) => {
            Ok(Value::Type(typedesc::decode_type_for_tag(reader, resolver, tag)?))
        }
        Tag::Type(TypeTag::Module) => Ok(Value::Module(decode_module_for_tag(reader, tag)?)),
        Tag::Type(TypeTag::Method) => decode_method(reader, resolver),
        Tag::Type(TypeTag::MethodInstance) => decode_method_instance(reader, resolver),
        Tag::Type(TypeTag::Task) => decode_task(reader, resolver),
        Tag::Type(TypeTag::GlobalRef) | Tag::Control(ControlTag::FullGlobalRef) => {
            decode_global_ref(reader, resolver, tag)
        }

        other => bail!(Error::Desync {
            reason: format!("tag {other:?} is not valid in a value position"),
        }),
    }
}

/// Reads the payload of a `ShortBackRef`/`BackRef`/`LongBackRef` tag
/// already consumed by the caller.
pub fn read_backref_slot<R: WireRead>(reader: &mut ReaderState<R>, tag: Tag) -> Result<u64> {
    match tag {
        Tag::Control(ControlTag::ShortBackRef) => Ok(reader.source.read_u16()? as u64),
        Tag::Control(ControlTag::BackRef) => Ok(reader.source.read_u32()? as u64),
        Tag::Control(ControlTag::LongBackRef) => reader.source.read_u64(),
        other => bail!(Error::Desync {
            reason: format!("tag {other:?} is not a back-reference"),
        }),
    }
}

fn decode_literal<R: WireRead>(reader: &mut ReaderState<R>, resolver: &dyn TypeResolver, byte: u8) -> Result<Value> {
    if (intern::INT32_LITERAL_START..intern::INT32_LITERAL_START + intern::L as u8).contains(&byte) {
        return Ok(Value::Int32((byte - intern::INT32_LITERAL_START) as i32));
    }
    if (intern::INT64_LITERAL_START..intern::INT64_LITERAL_START + intern::L as u8).contains(&byte) {
        return Ok(Value::Int64((byte - intern::INT64_LITERAL_START) as i64));
    }
    if byte == intern::EMPTY_TUPLE_TAG {
        return Ok(Value::Tuple(Rc::new(Vec::new())));
    }
    if byte == intern::TRUE_TAG {
        return Ok(Value::Bool(true));
    }
    if byte == intern::FALSE_TAG {
        return Ok(Value::Bool(false));
    }
    if byte == intern::NOTHING_VALUE_TAG {
        return Ok(Value::Nothing);
    }
    if let Some(name) = intern::short_symbol_from_tag(byte) {
        return Ok(Value::Symbol(Rc::from(name)));
    }
    if intern::type_literal_from_tag(byte).is_some() {
        return Ok(Value::Type(typedesc::decode_type_for_tag(reader, resolver, Tag::Literal(byte))?));
    }
    bail!(Error::Desync {
        reason: format!("literal byte {byte} is not assigned to anything"),
    })
}

fn decode_string_body<R: WireRead>(reader: &mut ReaderState<R>, tag: Tag) -> Result<Rc<str>> {
    match tag {
        Tag::Type(TypeTag::String) => {
            let len = reader.source.read_u8()? as usize;
            let bytes = reader.source.read_bytes(len)?;
            Ok(Rc::from(String::from_utf8(bytes)?))
        }
        Tag::Control(ControlTag::LongString) => {
            let len = reader.source.read_u32()? as usize;
            let bytes = reader.source.read_bytes(len)?;
            Ok(Rc::from(String::from_utf8(bytes)?))
        }
        other => bail!(Error::Desync {
            reason: format!("tag {other:?} is not a string body"),
        }),
    }
}

fn decode_symbol_for_tag<R: WireRead>(reader: &mut ReaderState<R>, tag: Tag) -> Result<Rc<str>> {
    if let Tag::Literal(b) = tag {
        if let Some(s) = intern::short_symbol_from_tag(b) {
            return Ok(Rc::from(s));
        }
    }
    if let Tag::Control(ControlTag::ShortBackRef | ControlTag::BackRef | ControlTag::LongBackRef) = tag {
        let slot = read_backref_slot(reader, tag)?;
        return match reader.gettable(slot)? {
            Value::Symbol(s) => Ok(s),
            other => bail!(Error::Desync {
                reason: format!("slot {slot} is a {other:?}, not a symbol"),
            }),
        };
    }
    decode_symbol_body(reader, tag)
}

fn decode_symbol_body<R: WireRead>(reader: &mut ReaderState<R>, tag: Tag) -> Result<Rc<str>> {
    match tag {
        Tag::Type(TypeTag::Symbol) => {
            let len = reader.source.read_u8()? as usize;
            let bytes = reader.source.read_bytes(len)?;
            let s: Rc<str> = Rc::from(String::from_utf8(bytes)?);
            if s.len() > 7 {
                reader.resolve_ref_immediately(Value::Symbol(Rc::clone(&s)));
            }
            Ok(s)
        }
        Tag::Control(ControlTag::LongSymbol) => {
            let len = reader.source.read_u32()? as usize;
            let bytes = reader.source.read_bytes(len)?;
            let s: Rc<str> = Rc::from(String::from_utf8(bytes)?);
            reader.resolve_ref_immediately(Value::Symbol(Rc::clone(&s)));
            Ok(s)
        }
        other => bail!(Error::Desync {
            reason: format!("tag {other:?} is not a symbol body"),
        }),
    }
}

/// Reads a symbol wherever one is needed standalone (module path
/// components, an expression's head, ...): reads its own tag.
pub fn decode_symbol<R: WireRead>(reader: &mut ReaderState<R>) -> Result<Rc<str>> {
    let tag = reader.read_tag()?;
    decode_symbol_for_tag(reader, tag)
}

fn decode_tuple<R: WireRead>(reader: &mut ReaderState<R>, resolver: &dyn TypeResolver, tag: Tag) -> Result<Value> {
    let slot = reader.reserve_slot();
    let len = match tag {
        Tag::Type(TypeTag::Tuple) => reader.source.read_u8()? as usize,
        Tag::Control(ControlTag::LongTuple) => reader.source.read_u32()? as usize,
        _ => unreachable!("caller only dispatches tuple tags here"),
    };
    let mut items = Vec::with_capacity(len);
    for _ in 0..len {
        items.push(decode_value(reader, resolver)?);
    }
    let v = Value::Tuple(Rc::new(items));
    reader.install(slot, v.clone());
    reader.finish_pending(slot);
    Ok(v)
}

fn decode_simple_vector<R: WireRead>(reader: &mut ReaderState<R>, resolver: &dyn TypeResolver) -> Result<Value> {
    let slot = reader.reserve_slot();
    let len = reader.source.read_u32()? as usize;
    let mut items = Vec::with_capacity(len);
    for _ in 0..len {
        items.push(decode_value(reader, resolver)?);
    }
    let v = Value::SimpleVector(Rc::new(items));
    reader.install(slot, v.clone());
    reader.finish_pending(slot);
    Ok(v)
}

fn is_bool_elem_type(desc: &TypeDescriptor) -> bool {
    matches!(
        desc,
        TypeDescriptor::DataType { module, name, params }
            if params.is_empty() && typedesc::is_core_module(module) && typedesc::builtin_kind_tag(name) == Some(TypeTag::Bool)
    )
}

fn decode_array<R: WireRead>(reader: &mut ReaderState<R>, resolver: &dyn TypeResolver, tag: Tag) -> Result<Value> {
    let slot = reader.reserve_slot();
    let is_byte_array = matches!(tag, Tag::Type(TypeTag::ByteArray));
    let elem_type = if is_byte_array {
        Rc::new(TypeDescriptor::DataType {
            module: typedesc::core_module(),
            name: Rc::from("UInt8"),
            params: Vec::new(),
        })
    } else {
        typedesc::decode_type(reader, resolver)?
    };
    let ndims = reader.source.read_u8()?;
    let shape = if ndims == 1 {
        ArrayShape::Vector(reader.source.read_u64()?)
    } else {
        match decode_value(reader, resolver)? {
            Value::Tuple(items) => {
                let mut dims = Vec::with_capacity(items.len());
                for item in items.iter() {
                    match item {
                        Value::UInt64(n) => dims.push(*n),
                        other => bail!(Error::Desync {
                            reason: format!("array dims tuple entry is {other:?}, not a UInt64"),
                        }),
                    }
                }
                ArrayShape::Dims(dims)
            }
            other => bail!(Error::Desync {
                reason: format!("expected an array-dims tuple, got a {other:?}"),
            }),
        }
    };
    let len = shape.len() as usize;
    let data = if is_byte_array {
        ArrayData::Bytes(reader.source.read_bytes(len)?)
    } else if is_bool_elem_type(&elem_type) {
        ArrayData::Bool(decode_bool_rle(reader, len)?)
    } else {
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(read_field_or_undef(reader, resolver)?);
        }
        ArrayData::Pointers(items)
    };
    let v = Value::Array(shared(ArrayValue { elem_type, shape, data }));
    reader.install(slot, v.clone());
    reader.finish_pending(slot);
    Ok(v)
}

/// The inverse of `encode_bool_rle`: unpacks `(value_bit << 7) | run_length`
/// bytes until `total` bits have been produced.
fn decode_bool_rle<R: WireRead>(reader: &mut ReaderState<R>, total: usize) -> Result<Vec<bool>> {
    let mut bits = Vec::with_capacity(total);
    while bits.len() < total {
        let byte = reader.source.read_u8()?;
        let value = byte & 0x80 != 0;
        let run = (byte & 0x7f) as usize;
        ensure!(
            run > 0 && bits.len() + run <= total,
            Error::Desync {
                reason: "bool run-length byte overshoots the array length".into(),
            }
        );
        bits.extend(std::iter::repeat(value).take(run));
    }
    Ok(bits)
}

fn decode_expr<R: WireRead>(reader: &mut ReaderState<R>, resolver: &dyn TypeResolver, tag: Tag) -> Result<Value> {
    let slot = reader.reserve_slot();
    let len = match tag {
        Tag::Type(TypeTag::Expr) => reader.source.read_u8()? as usize,
        Tag::Control(ControlTag::LongExpr) => reader.source.read_u32()? as usize,
        _ => unreachable!("caller only dispatches expr tags here"),
    };
    let head = decode_symbol(reader)?;
    let mut args = Vec::with_capacity(len);
    for _ in 0..len {
        args.push(decode_value(reader, resolver)?);
    }
    let v = Value::Expr(shared(ExprValue { head, args }));
    reader.install(slot, v.clone());
    reader.finish_pending(slot);
    Ok(v)
}

/// The `Object` control tag: a `form` byte distinguishes a primitive
/// (bitstype) payload, never identity-tracked, from an immutable composite,
/// which is.
fn decode_record<R: WireRead>(reader: &mut ReaderState<R>, resolver: &dyn TypeResolver) -> Result<Value> {
    let form = reader.source.read_u8()?;
    match form {
        0 => {
            let ty = typedesc::decode_type(reader, resolver)?;
            let len = reader.source.read_u32()? as usize;
            let bytes = reader.source.read_bytes(len)?;
            Ok(Value::Record(shared(RecordValue {
                ty,
                kind: RecordKind::Primitive(bytes),
            })))
        }
        1 => {
            let slot = reader.reserve_slot();
            let ty = typedesc::decode_type(reader, resolver)?;
            let len = reader.source.read_u32()? as usize;
            let mut fields = Vec::with_capacity(len);
            for _ in 0..len {
                fields.push(decode_value(reader, resolver)?);
            }
            let v = Value::Record(shared(RecordValue {
                ty,
                kind: RecordKind::Immutable(fields),
            }));
            reader.install(slot, v.clone());
            reader.finish_pending(slot);
            Ok(v)
        }
        other => bail!(Error::Desync {
            reason: format!("unknown record form byte {other}"),
        }),
    }
}

/// The `RefObject` control tag: a mutable record. The instance is
/// allocated and installed into the slot table *before* its fields are
/// read, so a field that points back at the record resolves to the same
/// allocation instead of desyncing (§4.6's allocate-then-fill protocol,
/// the only kind that supports true self-reference).
fn decode_record_ref_object<R: WireRead>(reader: &mut ReaderState<R>, resolver: &dyn TypeResolver) -> Result<Value> {
    let slot = reader.reserve_slot();
    let ty = typedesc::decode_type(reader, resolver)?;
    let len = reader.source.read_u32()? as usize;
    let record = resolver.allocate_instance(Rc::clone(&ty), len);
    let v = Value::Record(Rc::clone(&record));
    reader.install(slot, v.clone());
    for i in 0..len {
        let field = read_field_or_undef(reader, resolver)?;
        match &mut record.borrow_mut().kind {
            RecordKind::Mutable(fields) => fields[i] = field,
            other => bail!(Error::Desync {
                reason: format!("allocated instance has kind {other:?}, expected mutable"),
            }),
        }
    }
    reader.finish_pending(slot);
    Ok(v)
}

fn decode_dict<R: WireRead>(reader: &mut ReaderState<R>, resolver: &dyn TypeResolver, tag: Tag) -> Result<Value> {
    let slot = reader.reserve_slot();
    let kind = match tag {
        Tag::Control(ControlTag::IdDict) => DictKind::Identity,
        Tag::Type(TypeTag::Dict) => DictKind::ByValue,
        _ => unreachable!("caller only dispatches dict tags here"),
    };
    let ty = typedesc::decode_type(reader, resolver)?;
    let n = reader.source.read_u32()? as usize;
    let mut entries = Vec::with_capacity(n);
    for _ in 0..n {
        let k = decode_value(reader, resolver)?;
        let v = decode_value(reader, resolver)?;
        entries.push((k, v));
    }
    let dv = Value::Dict(shared(DictValue { ty, kind, entries }));
    reader.install(slot, dv.clone());
    reader.finish_pending(slot);
    Ok(dv)
}

/// Reads a module's root identity and path, reserving a slot up front
/// exactly where `encode_module`'s `try_backref` reserved one.
pub fn decode_module<R: WireRead>(reader: &mut ReaderState<R>) -> Result<Rc<ModuleValue>> {
    let tag = reader.read_tag()?;
    decode_module_for_tag(reader, tag)
}

fn decode_module_for_tag<R: WireRead>(reader: &mut ReaderState<R>, tag: Tag) -> Result<Rc<ModuleValue>> {
    if let Tag::Control(ControlTag::ShortBackRef | ControlTag::BackRef | ControlTag::LongBackRef) = tag {
        let slot = read_backref_slot(reader, tag)?;
        return match reader.gettable(slot)? {
            Value::Module(m) => Ok(m),
            other => bail!(Error::Desync {
                reason: format!("slot {slot} is a {other:?}, not a module"),
            }),
        };
    }
    ensure!(
        tag == Tag::Type(TypeTag::Module),
        Error::Desync {
            reason: format!("expected a MODULE tag, got {tag:?}"),
        }
    );
    let slot = reader.reserve_slot();
    let has_uuid = reader.source.read_bool()?;
    let root_uuid = if has_uuid { Some(reader.source.read_u128()?) } else { None };
    let root_name = decode_symbol(reader)?;
    let mut path = Vec::new();
    loop {
        let t = reader.read_tag()?;
        if let Tag::Literal(b) = t {
            if b == intern::EMPTY_TUPLE_TAG {
                break;
            }
        }
        path.push(decode_symbol_for_tag(reader, t)?);
    }
    let m = Rc::new(ModuleValue { root_uuid, root_name, path });
    reader.install(slot, Value::Module(Rc::clone(&m)));
    reader.finish_pending(slot);
    Ok(m)
}

fn expect_string(v: Value) -> Result<Rc<str>> {
    match v {
        Value::String(s) => Ok(s),
        other => bail!(Error::Desync {
            reason: format!("expected a string, got a {other:?}"),
        }),
    }
}

fn expect_optional_string(v: Value) -> Result<Option<Rc<str>>> {
    match v {
        Value::Nothing => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => bail!(Error::Desync {
            reason: format!("expected a string or nothing, got a {other:?}"),
        }),
    }
}

fn expect_optional_symbol(v: Value) -> Result<Option<Rc<str>>> {
    match v {
        Value::Nothing => Ok(None),
        Value::Symbol(s) => Ok(Some(s)),
        other => bail!(Error::Desync {
            reason: format!("expected a symbol or nothing, got a {other:?}"),
        }),
    }
}

fn expect_optional_value(v: Value) -> Option<Value> {
    match v {
        Value::Nothing => None,
        other => Some(other),
    }
}

fn decode_method<R: WireRead>(reader: &mut ReaderState<R>, resolver: &dyn TypeResolver) -> Result<Value> {
    let slot = reader.reserve_slot();
    let number = reader.source.read_u64()?;
    let fresh = reader.source.read_bool()?;
    if !fresh {
        let m = reader.cached_method(number).ok_or_else(|| {
            anyhow!(Error::Desync {
                reason: format!("unknown method stable number {number}"),
            })
        })?;
        let v = Value::Method(m);
        reader.install(slot, v.clone());
        reader.finish_pending(slot);
        return Ok(v);
    }
    let module = decode_module(reader)?;
    let name = decode_symbol(reader)?;
    let file = expect_string(decode_value(reader, resolver)?)?;
    let line = reader.source.read_u32()?;
    let signature = typedesc::decode_type(reader, resolver)?;
    let n_slots = reader.source.read_u32()? as usize;
    let mut slot_names = Vec::with_capacity(n_slots);
    for _ in 0..n_slots {
        slot_names.push(decode_symbol(reader)?);
    }
    let argcount = reader.source.read_u32()?;
    let is_vararg = reader.source.read_bool()?;
    let is_opaque = reader.source.read_bool()?;
    let inference_flags = if reader.version >= tag::version_gate::INFERENCE_FLAGS {
        reader.source.read_u32()?
    } else {
        0
    };
    let body_source = expect_optional_string(decode_value(reader, resolver)?)?;
    let generator = expect_optional_value(decode_value(reader, resolver)?);
    let recursion_relation = if reader.version >= tag::version_gate::INFERENCE_FLAGS {
        expect_optional_symbol(decode_value(reader, resolver)?)?
    } else {
        None
    };
    let m = shared(MethodValue {
        stable_number: number,
        module,
        name,
        file,
        line,
        signature,
        slot_names,
        argcount,
        is_vararg,
        is_opaque,
        inference_flags,
        body_source,
        generator,
        recursion_relation,
    });
    reader.cache_method(number, Rc::clone(&m));
    let v = Value::Method(m);
    reader.install(slot, v.clone());
    reader.finish_pending(slot);
    Ok(v)
}

fn decode_method_instance<R: WireRead>(reader: &mut ReaderState<R>, resolver: &dyn TypeResolver) -> Result<Value> {
    let slot = reader.reserve_slot();
    let stable_number = reader.source.read_u64()?;
    let def = match decode_value(reader, resolver)? {
        Value::Method(m) => m,
        other => bail!(Error::Desync {
            reason: format!("expected a method definition, got a {other:?}"),
        }),
    };
    let n = reader.source.read_u32()? as usize;
    let mut specialized_arg_types = Vec::with_capacity(n);
    for _ in 0..n {
        specialized_arg_types.push(decode_value(reader, resolver)?);
    }
    let return_type = typedesc::decode_type(reader, resolver)?;
    let sparam_values = if reader.version >= tag::version_gate::SPARAM_VALUES {
        let n = reader.source.read_u32()? as usize;
        let mut v = Vec::with_capacity(n);
        for _ in 0..n {
            v.push(decode_value(reader, resolver)?);
        }
        v
    } else {
        Vec::new()
    };
    let v = Value::MethodInstance(shared(MethodInstanceValue {
        stable_number,
        def,
        specialized_arg_types: Rc::new(specialized_arg_types),
        return_type,
        sparam_values: Rc::new(sparam_values),
    }));
    reader.install(slot, v.clone());
    reader.finish_pending(slot);
    Ok(v)
}

fn decode_task<R: WireRead>(reader: &mut ReaderState<R>, resolver: &dyn TypeResolver) -> Result<Value> {
    let slot = reader.reserve_slot();
    let body = decode_value(reader, resolver)?;
    let task_locals = match decode_value(reader, resolver)? {
        Value::Nothing => None,
        Value::Dict(d) => Some(d),
        other => bail!(Error::Desync {
            reason: format!("expected a dict or nothing for task locals, got a {other:?}"),
        }),
    };
    let state_name = decode_symbol(reader)?;
    let state = match &*state_name {
        "runnable" => TaskState::Runnable,
        "done" => TaskState::Done,
        "failed" => TaskState::Failed,
        other => bail!(Error::Desync {
            reason: format!("unknown task state symbol {other:?}"),
        }),
    };
    let result_or_exception = expect_optional_value(decode_value(reader, resolver)?);
    let has_exception = reader.source.read_bool()?;
    let v = Value::Task(shared(TaskValue {
        body,
        task_locals,
        state,
        result_or_exception,
        has_exception,
    }));
    reader.install(slot, v.clone());
    reader.finish_pending(slot);
    Ok(v)
}

fn decode_global_ref<R: WireRead>(reader: &mut ReaderState<R>, resolver: &dyn TypeResolver, tag: Tag) -> Result<Value> {
    let slot = reader.reserve_slot();
    let g = match tag {
        Tag::Type(TypeTag::GlobalRef) => {
            let module = decode_module(reader)?;
            let name = decode_symbol(reader)?;
            GlobalRefValue::Named { module, name }
        }
        Tag::Control(ControlTag::FullGlobalRef) => {
            let type_desc = typedesc::decode_type(reader, resolver)?;
            GlobalRefValue::Full { type_desc }
        }
        _ => unreachable!("caller only dispatches global-ref tags here"),
    };
    let v = Value::GlobalRef(Rc::new(g));
    reader.install(slot, v.clone());
    reader.finish_pending(slot);
    Ok(v)
}

/// Reads a field or array element that may be absent (`UNDEFREF`). Mirrors
/// `WriterState::emit_as_value`'s zero-byte escape: a leading `0x00` means
/// the next byte is a tag-literal rather than an operator, and for this
/// position the only tag that ever appears after the escape is
/// `UNDEFREF` itself.
fn read_field_or_undef<R: WireRead>(reader: &mut ReaderState<R>, resolver: &dyn TypeResolver) -> Result<Option<Value>> {
    let byte = reader.source.read_u8()?;
    if byte == 0 {
        let tag = reader.read_tag()?;
        ensure!(
            matches!(tag, Tag::Control(ControlTag::UndefRef)),
            Error::Desync {
                reason: format!("escape byte followed by {tag:?}, expected UNDEFREF"),
            }
        );
        return Ok(None);
    }
    let tag = Tag::from_byte(byte)?;
    Ok(Some(decode_value_for_tag(reader, resolver, tag)?))
}
