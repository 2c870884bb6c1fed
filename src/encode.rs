//! The value encoder (§4.4): one polymorphic entry point, dispatching on
//! the runtime kind of a [`Value`] to a family of per-kind routines. The
//! encoder never consults a [`crate::resolver::TypeResolver`] — only the
//! decoder needs one, to turn a name back into a type.

use std::rc::Rc;

use anyhow::{ensure, Result};

use crate::error::Error;
use crate::intern;
use crate::tag::{ControlTag, Tag, TypeTag};
use crate::typedesc;
use crate::value::{ArrayData, ArrayShape, ArrayValue, DictKind, DictValue, ExprValue, GlobalRefValue, MethodInstanceValue, MethodValue, ModuleValue, RecordKind, RecordValue, Shared, TaskState, TaskValue, Value};
use crate::writer::{BackrefOutcome, WriterState};
use crate::io::WireWrite;

/// The single entry point §4.4 describes: dispatches on `value`'s runtime
/// kind and writes its wire encoding to `writer`.
pub fn encode_value<W: WireWrite>(writer: &mut WriterState<W>, value: &Value) -> Result<()> {
    match value {
        Value::Bool(b) => {
            let tag = if *b { intern::TRUE_TAG } else { intern::FALSE_TAG };
            writer.emit_tag(Tag::Literal(tag))
        }
        Value::Nothing => writer.emit_tag(Tag::Literal(intern::NOTHING_VALUE_TAG)),
        Value::Char(c) => {
            writer.emit_tag(Tag::Type(TypeTag::Char))?;
            writer.sink.write_u32(*c as u32)
        }
        Value::Int8(v) => {
            writer.emit_tag(Tag::Type(TypeTag::Int8))?;
            writer.sink.write_i8(*v)
        }
        Value::Int16(v) => {
            writer.emit_tag(Tag::Type(TypeTag::Int16))?;
            writer.sink.write_i16(*v)
        }
        Value::Int32(v) => encode_int32(writer, *v),
        Value::Int64(v) => encode_int64(writer, *v),
        Value::Int128(v) => {
            writer.emit_tag(Tag::Type(TypeTag::Int128))?;
            writer.sink.write_i128(*v)
        }
        Value::UInt8(v) => {
            writer.emit_tag(Tag::Type(TypeTag::UInt8))?;
            writer.sink.write_u8(*v)
        }
        Value::UInt16(v) => {
            writer.emit_tag(Tag::Type(TypeTag::UInt16))?;
            writer.sink.write_u16(*v)
        }
        Value::UInt32(v) => {
            writer.emit_tag(Tag::Type(TypeTag::UInt32))?;
            writer.sink.write_u32(*v)
        }
        Value::UInt64(v) => {
            writer.emit_tag(Tag::Type(TypeTag::UInt64))?;
            writer.sink.write_u64(*v)
        }
        Value::UInt128(v) => {
            writer.emit_tag(Tag::Type(TypeTag::UInt128))?;
            writer.sink.write_u128(*v)
        }
        Value::Float16(bits) => {
            writer.emit_tag(Tag::Type(TypeTag::Float16))?;
            writer.sink.write_u16(*bits)
        }
        Value::Float32(v) => {
            writer.emit_tag(Tag::Type(TypeTag::Float32))?;
            writer.sink.write_f32(*v)
        }
        Value::Float64(v) => {
            writer.emit_tag(Tag::Type(TypeTag::Float64))?;
            writer.sink.write_f64(*v)
        }
        Value::String(s) => encode_string(writer, s),
        Value::Symbol(s) => encode_symbol(writer, s),
        Value::Tuple(items) => encode_tuple(writer, items),
        Value::SimpleVector(items) => encode_simple_vector(writer, items),
        Value::Array(arr) => encode_array(writer, arr),
        Value::Expr(e) => encode_expr(writer, e),
        Value::Record(r) => encode_record(writer, r),
        Value::Dict(d) => encode_dict(writer, d),
        Value::Type(desc) => typedesc::encode_type(writer, desc),
        Value::Module(m) => encode_module(writer, m),
        Value::Method(m) => encode_method(writer, m),
        Value::MethodInstance(mi) => encode_method_instance(writer, mi),
        Value::Task(t) => encode_task(writer, t),
        Value::GlobalRef(g) => encode_global_ref(writer, g),
    }
}

/// Small-integer fast path (§4.4, scenario 1, §8): a 32-bit value in
/// `[0, L)` collapses to one literal byte; anything else gets the ordinary
/// type-tagged payload.
fn encode_int32<W: WireWrite>(writer: &mut WriterState<W>, v: i32) -> Result<()> {
    if (0..intern::L as i32).contains(&v) {
        writer.emit_tag(Tag::Literal(intern::INT32_LITERAL_START + v as u8))
    } else {
        writer.emit_tag(Tag::Type(TypeTag::Int32))?;
        writer.sink.write_i32(v)
    }
}

/// Same fast path for 64-bit values, plus the intermediate `SHORTINT64`
/// form for anything that fits in 32 bits but isn't in the literal band.
fn encode_int64<W: WireWrite>(writer: &mut WriterState<W>, v: i64) -> Result<()> {
    if (0..intern::L as i64).contains(&v) {
        writer.emit_tag(Tag::Literal(intern::INT64_LITERAL_START + v as u8))
    } else if let Ok(narrow) = i32::try_from(v) {
        writer.emit_tag(Tag::Control(ControlTag::ShortInt64))?;
        writer.sink.write_i32(narrow)
    } else {
        writer.emit_tag(Tag::Type(TypeTag::Int64))?;
        writer.sink.write_i64(v)
    }
}

fn write_text_body<W: WireWrite>(writer: &mut WriterState<W>, short_tag: TypeTag, long_tag: ControlTag, bytes: &[u8]) -> Result<()> {
    if let Ok(len) = u8::try_from(bytes.len()) {
        writer.emit_tag(Tag::Type(short_tag))?;
        writer.sink.write_u8(len)?;
    } else {
        writer.emit_tag(Tag::Control(long_tag))?;
        writer.sink.write_u32(bytes.len() as u32)?;
    }
    writer.sink.write_bytes(bytes)
}

/// Strings longer than 7 bytes are shared by content (`SHARED_REF`);
/// shorter ones are always written inline (§4.4 "String").
pub fn encode_string<W: WireWrite>(writer: &mut WriterState<W>, s: &Rc<str>) -> Result<()> {
    if s.len() > 7 {
        match writer.try_backref(&Value::String(Rc::clone(s)))? {
            BackrefOutcome::Emitted => return Ok(()),
            BackrefOutcome::Reserved(_) => {
                writer.emit_tag(Tag::Control(ControlTag::SharedRef))?;
            }
            BackrefOutcome::Untracked => unreachable!("strings over 7 bytes always have canonical text"),
        }
    }
    write_text_body(writer, TypeTag::String, ControlTag::LongString, s.as_bytes())
}

/// Interned short symbols take the one-byte literal path; symbols longer
/// than 7 bytes are shared by content just like strings (§4.4 "Symbol").
pub fn encode_symbol<W: WireWrite>(writer: &mut WriterState<W>, s: &Rc<str>) -> Result<()> {
    if let Some(tag) = intern::short_symbol_tag(s) {
        return writer.emit_tag(Tag::Literal(tag));
    }
    if s.len() > 7 {
        match writer.try_backref(&Value::Symbol(Rc::clone(s)))? {
            BackrefOutcome::Emitted => return Ok(()),
            BackrefOutcome::Reserved(_) => {}
            BackrefOutcome::Untracked => unreachable!("symbols over 7 bytes always have canonical text"),
        }
    }
    write_text_body(writer, TypeTag::Symbol, ControlTag::LongSymbol, s.as_bytes())
}

fn encode_tuple<W: WireWrite>(writer: &mut WriterState<W>, items: &Rc<Vec<Value>>) -> Result<()> {
    match writer.try_backref(&Value::Tuple(Rc::clone(items)))? {
        BackrefOutcome::Emitted => return Ok(()),
        BackrefOutcome::Reserved(_) => {}
        BackrefOutcome::Untracked => unreachable!("tuples are always identity-tracked"),
    }
    if let Ok(len) = u8::try_from(items.len()) {
        writer.emit_tag(Tag::Type(TypeTag::Tuple))?;
        writer.sink.write_u8(len)?;
    } else {
        writer.emit_tag(Tag::Control(ControlTag::LongTuple))?;
        writer.sink.write_u32(items.len() as u32)?;
    }
    for item in items.iter() {
        encode_value(writer, item)?;
    }
    Ok(())
}

fn encode_simple_vector<W: WireWrite>(writer: &mut WriterState<W>, items: &Rc<Vec<Value>>) -> Result<()> {
    match writer.try_backref(&Value::SimpleVector(Rc::clone(items)))? {
        BackrefOutcome::Emitted => return Ok(()),
        BackrefOutcome::Reserved(_) => {}
        BackrefOutcome::Untracked => unreachable!("simple vectors are always identity-tracked"),
    }
    writer.emit_tag(Tag::Type(TypeTag::SimpleVector))?;
    writer.sink.write_u32(items.len() as u32)?;
    for item in items.iter() {
        encode_value(writer, item)?;
    }
    Ok(())
}

fn is_byte_elem(data: &ArrayData) -> bool {
    matches!(data, ArrayData::Bytes(_))
}

fn encode_array<W: WireWrite>(writer: &mut WriterState<W>, arr: &Shared<ArrayValue>) -> Result<()> {
    match writer.try_backref(&Value::Array(Rc::clone(arr)))? {
        BackrefOutcome::Emitted => return Ok(()),
        BackrefOutcome::Reserved(_) => {}
        BackrefOutcome::Untracked => unreachable!("arrays are always identity-tracked"),
    }
    // Snapshot out of the borrow before recursing: a pointer-element array
    // can hold a reference back to itself, and `encode_value` on that
    // element would try to borrow the same `RefCell` again.
    let (elem_type, shape, data) = {
        let a = arr.borrow();
        (Rc::clone(&a.elem_type), a.shape.clone(), a.data.clone())
    };
    if is_byte_elem(&data) {
        writer.emit_tag(Tag::Type(TypeTag::ByteArray))?;
    } else {
        writer.emit_tag(Tag::Type(TypeTag::Array))?;
        typedesc::encode_type(writer, &elem_type)?;
    }
    match &shape {
        ArrayShape::Vector(n) => {
            writer.sink.write_u8(1)?;
            writer.sink.write_u64(*n)?;
        }
        ArrayShape::Dims(dims) => {
            writer.sink.write_u8(dims.len() as u8)?;
            let items: Vec<Value> = dims.iter().map(|d| Value::UInt64(*d)).collect();
            encode_value(writer, &Value::Tuple(Rc::new(items)))?;
        }
    }
    match &data {
        ArrayData::Bytes(bytes) => writer.sink.write_bytes(bytes),
        ArrayData::Bool(bits) => encode_bool_rle(writer, bits),
        ArrayData::Pointers(items) => {
            for item in items {
                match item {
                    Some(v) => encode_value(writer, v)?,
                    None => writer.emit_as_value(Tag::Control(ControlTag::UndefRef))?,
                }
            }
            Ok(())
        }
    }
}

/// `(value_bit << 7) | run_length` with `run_length <= 127`, splitting
/// longer runs (§4.4, scenario 4, §8).
fn encode_bool_rle<W: WireWrite>(writer: &mut WriterState<W>, bits: &[bool]) -> Result<()> {
    let mut i = 0;
    while i < bits.len() {
        let v = bits[i];
        let mut run = 1usize;
        while i + run < bits.len() && bits[i + run] == v && run < 127 {
            run += 1;
        }
        let byte = ((v as u8) << 7) | (run as u8);
        writer.sink.write_u8(byte)?;
        i += run;
    }
    Ok(())
}

fn encode_expr<W: WireWrite>(writer: &mut WriterState<W>, e: &Shared<ExprValue>) -> Result<()> {
    match writer.try_backref(&Value::Expr(Rc::clone(e)))? {
        BackrefOutcome::Emitted => return Ok(()),
        BackrefOutcome::Reserved(_) => {}
        BackrefOutcome::Untracked => unreachable!("expressions are always identity-tracked"),
    }
    // Clone the head/args out before recursing: an expression that refers
    // back to itself would otherwise double-borrow this `RefCell`.
    let (head, args) = {
        let ev = e.borrow();
        (Rc::clone(&ev.head), ev.args.clone())
    };
    if let Ok(len) = u8::try_from(args.len()) {
        writer.emit_tag(Tag::Type(TypeTag::Expr))?;
        writer.sink.write_u8(len)?;
    } else {
        writer.emit_tag(Tag::Control(ControlTag::LongExpr))?;
        writer.sink.write_u32(args.len() as u32)?;
    }
    encode_symbol(writer, &head)?;
    for a in &args {
        encode_value(writer, a)?;
    }
    Ok(())
}

enum RecordSnapshot {
    Immutable(Rc<crate::value::TypeDescriptor>, Vec<Value>),
    Mutable(Rc<crate::value::TypeDescriptor>, Vec<Option<Value>>),
}

fn encode_record<W: WireWrite>(writer: &mut WriterState<W>, r: &Shared<RecordValue>) -> Result<()> {
    // Primitives never participate in identity dedup or recursion, so take
    // the fast path before touching the back-reference table at all.
    let is_primitive = matches!(r.borrow().kind, RecordKind::Primitive(_));
    if is_primitive {
        let rv = r.borrow();
        let (ty, bytes) = match &rv.kind {
            RecordKind::Primitive(bytes) => (Rc::clone(&rv.ty), bytes.clone()),
            _ => unreachable!(),
        };
        drop(rv);
        writer.emit_tag(Tag::Control(ControlTag::Object))?;
        writer.sink.write_u8(0)?;
        typedesc::encode_type(writer, &ty)?;
        writer.sink.write_u32(bytes.len() as u32)?;
        return writer.sink.write_bytes(&bytes);
    }
    match writer.try_backref(&Value::Record(Rc::clone(r)))? {
        BackrefOutcome::Emitted => return Ok(()),
        BackrefOutcome::Reserved(_) => {}
        BackrefOutcome::Untracked => unreachable!("records are identity-tracked"),
    }
    // Snapshot fields out of the borrow before recursing: a mutable record
    // cycle (the whole point of the allocate-then-fill protocol) would
    // otherwise try to borrow this same `RefCell` again mid-traversal.
    let snapshot = {
        let rv = r.borrow();
        match &rv.kind {
            RecordKind::Primitive(_) => unreachable!("handled above"),
            RecordKind::Immutable(fields) => RecordSnapshot::Immutable(Rc::clone(&rv.ty), fields.clone()),
            RecordKind::Mutable(fields) => RecordSnapshot::Mutable(Rc::clone(&rv.ty), fields.clone()),
        }
    };
    match snapshot {
        RecordSnapshot::Immutable(ty, fields) => {
            writer.emit_tag(Tag::Control(ControlTag::Object))?;
            writer.sink.write_u8(1)?;
            typedesc::encode_type(writer, &ty)?;
            writer.sink.write_u32(fields.len() as u32)?;
            for f in &fields {
                encode_value(writer, f)?;
            }
            Ok(())
        }
        RecordSnapshot::Mutable(ty, fields) => {
            writer.emit_tag(Tag::Control(ControlTag::RefObject))?;
            typedesc::encode_type(writer, &ty)?;
            writer.sink.write_u32(fields.len() as u32)?;
            for f in &fields {
                match f {
                    Some(v) => encode_value(writer, v)?,
                    None => writer.emit_as_value(Tag::Control(ControlTag::UndefRef))?,
                }
            }
            Ok(())
        }
    }
}

fn encode_dict<W: WireWrite>(writer: &mut WriterState<W>, d: &Shared<DictValue>) -> Result<()> {
    match writer.try_backref(&Value::Dict(Rc::clone(d)))? {
        BackrefOutcome::Emitted => return Ok(()),
        BackrefOutcome::Reserved(_) => {}
        BackrefOutcome::Untracked => unreachable!("dictionaries are always identity-tracked"),
    }
    // Snapshot entries out of the borrow before recursing: a dict can hold
    // itself as a key or value.
    let (kind, ty, entries) = {
        let dv = d.borrow();
        (dv.kind, Rc::clone(&dv.ty), dv.entries.clone())
    };
    match kind {
        DictKind::Identity => writer.emit_tag(Tag::Control(ControlTag::IdDict))?,
        DictKind::ByValue => writer.emit_tag(Tag::Type(TypeTag::Dict))?,
    }
    typedesc::encode_type(writer, &ty)?;
    writer.sink.write_u32(entries.len() as u32)?;
    for (k, v) in &entries {
        encode_value(writer, k)?;
        encode_value(writer, v)?;
    }
    Ok(())
}

/// §4.4 "Module": root identity `(uuid_or_null, name_symbol)`, then child
/// names, terminated by the empty-tuple literal.
pub fn encode_module<W: WireWrite>(writer: &mut WriterState<W>, m: &Rc<ModuleValue>) -> Result<()> {
    match writer.try_backref(&Value::Module(Rc::clone(m)))? {
        BackrefOutcome::Emitted => return Ok(()),
        BackrefOutcome::Reserved(_) => {}
        BackrefOutcome::Untracked => unreachable!("modules are always identity-tracked"),
    }
    writer.emit_tag(Tag::Type(TypeTag::Module))?;
    match m.root_uuid {
        Some(uuid) => {
            writer.sink.write_bool(true)?;
            writer.sink.write_u128(uuid)?;
        }
        None => writer.sink.write_bool(false)?,
    }
    encode_symbol(writer, &m.root_name)?;
    for part in &m.path {
        encode_symbol(writer, part)?;
    }
    writer.emit_tag(Tag::Literal(intern::EMPTY_TUPLE_TAG))
}

fn encode_method<W: WireWrite>(writer: &mut WriterState<W>, m: &Shared<MethodValue>) -> Result<()> {
    match writer.try_backref(&Value::Method(Rc::clone(m)))? {
        BackrefOutcome::Emitted => return Ok(()),
        BackrefOutcome::Reserved(_) => {}
        BackrefOutcome::Untracked => unreachable!("methods are always identity-tracked"),
    }
    // Clone everything out of the borrow before recursing: a method's
    // generator closure can legitimately reference the method itself.
    let mv = m.borrow().clone();
    ensure!(
        mv.body_source.is_some() || mv.generator.is_some(),
        Error::Unsupported {
            reason: "method's dispatch table is not representable on the wire".into(),
        }
    );
    writer.emit_tag(Tag::Type(TypeTag::Method))?;
    let id = Rc::as_ptr(m) as *const () as usize;
    let (number, fresh) = writer.stable_numbers.number_for(id);
    writer.sink.write_u64(number)?;
    writer.sink.write_bool(fresh)?;
    if !fresh {
        return Ok(());
    }
    encode_module(writer, &mv.module)?;
    encode_symbol(writer, &mv.name)?;
    encode_value(writer, &Value::String(Rc::clone(&mv.file)))?;
    writer.sink.write_u32(mv.line)?;
    typedesc::encode_type(writer, &mv.signature)?;
    writer.sink.write_u32(mv.slot_names.len() as u32)?;
    for s in &mv.slot_names {
        encode_symbol(writer, s)?;
    }
    writer.sink.write_u32(mv.argcount)?;
    writer.sink.write_bool(mv.is_vararg)?;
    writer.sink.write_bool(mv.is_opaque)?;
    writer.sink.write_u32(mv.inference_flags)?;
    match &mv.body_source {
        Some(s) => encode_value(writer, &Value::String(Rc::clone(s)))?,
        None => encode_value(writer, &Value::Nothing)?,
    }
    match &mv.generator {
        Some(v) => encode_value(writer, v)?,
        None => encode_value(writer, &Value::Nothing)?,
    }
    match &mv.recursion_relation {
        Some(s) => encode_value(writer, &Value::Symbol(Rc::clone(s)))?,
        None => encode_value(writer, &Value::Nothing)?,
    }
    Ok(())
}

fn encode_method_instance<W: WireWrite>(writer: &mut WriterState<W>, mi: &Shared<MethodInstanceValue>) -> Result<()> {
    match writer.try_backref(&Value::MethodInstance(Rc::clone(mi)))? {
        BackrefOutcome::Emitted => return Ok(()),
        BackrefOutcome::Reserved(_) => {}
        BackrefOutcome::Untracked => unreachable!("method instances are always identity-tracked"),
    }
    writer.emit_tag(Tag::Type(TypeTag::MethodInstance))?;
    let (stable_number, def, specialized_arg_types, return_type, sparam_values) = {
        let miv = mi.borrow();
        (
            miv.stable_number,
            Rc::clone(&miv.def),
            Rc::clone(&miv.specialized_arg_types),
            Rc::clone(&miv.return_type),
            Rc::clone(&miv.sparam_values),
        )
    };
    writer.sink.write_u64(stable_number)?;
    encode_value(writer, &Value::Method(def))?;
    writer.sink.write_u32(specialized_arg_types.len() as u32)?;
    for v in specialized_arg_types.iter() {
        encode_value(writer, v)?;
    }
    typedesc::encode_type(writer, &return_type)?;
    writer.sink.write_u32(sparam_values.len() as u32)?;
    for v in sparam_values.iter() {
        encode_value(writer, v)?;
    }
    Ok(())
}

fn encode_task<W: WireWrite>(writer: &mut WriterState<W>, t: &Shared<TaskValue>) -> Result<()> {
    {
        let tv = t.borrow();
        ensure!(
            tv.state != TaskState::Running,
            Error::Unsupported {
                reason: "cannot serialize a currently-running task".into(),
            }
        );
    }
    match writer.try_backref(&Value::Task(Rc::clone(t)))? {
        BackrefOutcome::Emitted => return Ok(()),
        BackrefOutcome::Reserved(_) => {}
        BackrefOutcome::Untracked => unreachable!("tasks are always identity-tracked"),
    }
    writer.emit_tag(Tag::Type(TypeTag::Task))?;
    // Clone out of the borrow before recursing: a task's result can
    // legitimately be the task itself (e.g. a self-returning continuation).
    let tv = t.borrow().clone();
    encode_value(writer, &tv.body)?;
    match &tv.task_locals {
        Some(d) => encode_value(writer, &Value::Dict(Rc::clone(d)))?,
        None => encode_value(writer, &Value::Nothing)?,
    }
    let state_name = match tv.state {
        TaskState::Runnable => "runnable",
        TaskState::Done => "done",
        TaskState::Failed => "failed",
        TaskState::Running => unreachable!("checked above"),
    };
    encode_symbol(writer, &Rc::from(state_name))?;
    match &tv.result_or_exception {
        Some(v) => encode_value(writer, v)?,
        None => encode_value(writer, &Value::Nothing)?,
    }
    writer.sink.write_bool(tv.has_exception)
}

fn encode_global_ref<W: WireWrite>(writer: &mut WriterState<W>, g: &Rc<GlobalRefValue>) -> Result<()> {
    match writer.try_backref(&Value::GlobalRef(Rc::clone(g)))? {
        BackrefOutcome::Emitted => return Ok(()),
        BackrefOutcome::Reserved(_) => {}
        BackrefOutcome::Untracked => unreachable!("global refs are always identity-tracked"),
    }
    match &**g {
        GlobalRefValue::Named { module, name } => {
            writer.emit_tag(Tag::Type(TypeTag::GlobalRef))?;
            encode_module(writer, module)?;
            encode_symbol(writer, name)
        }
        GlobalRefValue::Full { type_desc } => {
            writer.emit_tag(Tag::Control(ControlTag::FullGlobalRef))?;
            typedesc::encode_type(writer, type_desc)
        }
    }
}
