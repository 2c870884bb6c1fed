//! The type-descriptor subprotocol (§4.6): `DataType`/`FullDataType`/
//! `WrapperDataType` plus the `TypeNameRecord` they carry for sandbox and
//! anonymous-function classes. Grounded on the pending/stable-number
//! machinery already built in [`crate::writer`]/[`crate::reader`]: a type
//! descriptor is an ordinary `Rc`-identified value for intra-stream
//! back-referencing, but its `TypeNameRecord` is additionally deduplicated
//! by the cross-stream stable-number side table, the same two-tier scheme
//! `encode_method`/`decode_method` use for method definitions.

use std::rc::Rc;

use anyhow::{anyhow, bail, Result};

use crate::error::Error;
use crate::intern;
use crate::resolver::TypeResolver;
use crate::tag::{ControlTag, Tag, TypeTag};
use crate::value::{shared, ModuleValue, Shared, TypeDescriptor, TypeNameRecord, Value};
use crate::writer::{BackrefOutcome, WriterState};
use crate::reader::ReaderState;
use crate::io::{WireRead, WireWrite};
use crate::{decode, encode};

/// `Core`, unparameterized, no path: the module every builtin scalar type
/// lives in for the purposes of the one-byte `TYPE_LITERAL` fast path.
pub fn is_core_module(module: &ModuleValue) -> bool {
    module.root_uuid.is_none() && module.root_name.as_ref() == "Core" && module.path.is_empty()
}

pub fn core_module() -> Rc<ModuleValue> {
    Rc::new(ModuleValue {
        root_uuid: None,
        root_name: Rc::from("Core"),
        path: Vec::new(),
    })
}

/// Maps a builtin scalar type's name to the [`TypeTag`] its `TYPE_LITERAL`
/// encoding uses. Only names with an entry in [`intern::TYPE_LITERAL_KINDS`]
/// qualify for the one-byte fast path (scenario 5, §8).
pub fn builtin_kind_tag(name: &str) -> Option<TypeTag> {
    let kind = match name {
        "Int8" => TypeTag::Int8,
        "Int16" => TypeTag::Int16,
        "Int32" => TypeTag::Int32,
        "Int64" => TypeTag::Int64,
        "Int128" => TypeTag::Int128,
        "UInt8" => TypeTag::UInt8,
        "UInt16" => TypeTag::UInt16,
        "UInt32" => TypeTag::UInt32,
        "UInt64" => TypeTag::UInt64,
        "UInt128" => TypeTag::UInt128,
        "Float16" => TypeTag::Float16,
        "Float32" => TypeTag::Float32,
        "Float64" => TypeTag::Float64,
        "Bool" => TypeTag::Bool,
        "Char" => TypeTag::Char,
        "Nothing" => TypeTag::Nothing,
        "String" => TypeTag::String,
        "Symbol" => TypeTag::Symbol,
        "Tuple" => TypeTag::Tuple,
        "SimpleVector" => TypeTag::SimpleVector,
        "Array" => TypeTag::Array,
        "Expr" => TypeTag::Expr,
        _ => return None,
    };
    intern::type_literal_tag(kind).map(|_| kind)
}

fn builtin_type_descriptor(kind: TypeTag) -> Rc<TypeDescriptor> {
    Rc::new(TypeDescriptor::DataType {
        module: core_module(),
        name: Rc::from(builtin_kind_name(kind)),
        params: Vec::new(),
    })
}

fn builtin_kind_name(kind: TypeTag) -> &'static str {
    match kind {
        TypeTag::Int8 => "Int8",
        TypeTag::Int16 => "Int16",
        TypeTag::Int32 => "Int32",
        TypeTag::Int64 => "Int64",
        TypeTag::Int128 => "Int128",
        TypeTag::UInt8 => "UInt8",
        TypeTag::UInt16 => "UInt16",
        TypeTag::UInt32 => "UInt32",
        TypeTag::UInt64 => "UInt64",
        TypeTag::UInt128 => "UInt128",
        TypeTag::Float16 => "Float16",
        TypeTag::Float32 => "Float32",
        TypeTag::Float64 => "Float64",
        TypeTag::Bool => "Bool",
        TypeTag::Char => "Char",
        TypeTag::Nothing => "Nothing",
        TypeTag::String => "String",
        TypeTag::Symbol => "Symbol",
        TypeTag::Tuple => "Tuple",
        TypeTag::SimpleVector => "SimpleVector",
        TypeTag::Array => "Array",
        TypeTag::Expr => "Expr",
        _ => unreachable!("not a TYPE_LITERAL kind"),
    }
}

/// Encodes a type descriptor (§4.6). Builtin, unparameterized `Core` types
/// take the one-byte `TYPE_LITERAL` path; everything else goes through the
/// ordinary identity back-reference map before falling through to one of
/// the three wire forms.
pub fn encode_type<W: WireWrite>(writer: &mut WriterState<W>, desc: &Rc<TypeDescriptor>) -> Result<()> {
    if let TypeDescriptor::DataType { module, name, params } = &**desc {
        if params.is_empty() && is_core_module(module) {
            if let Some(kind) = builtin_kind_tag(name) {
                if let Some(byte) = intern::type_literal_tag(kind) {
                    writer.emit_tag(Tag::Literal(byte))?;
                    return Ok(());
                }
            }
        }
    }

    match writer.try_backref(&Value::Type(Rc::clone(desc)))? {
        BackrefOutcome::Emitted => return Ok(()),
        BackrefOutcome::Reserved(_) => {}
        BackrefOutcome::Untracked => unreachable!("type descriptors are always identity-tracked"),
    }

    match &**desc {
        TypeDescriptor::DataType { module, name, params } => {
            writer.emit_tag(Tag::Type(TypeTag::DataType))?;
            encode::encode_module(writer, module)?;
            encode::encode_symbol(writer, name)?;
            writer.sink.write_u32(params.len() as u32)?;
            for p in params {
                encode::encode_value(writer, p)?;
            }
        }
        TypeDescriptor::Wrapper { module, name } => {
            writer.emit_tag(Tag::Control(ControlTag::WrapperDataType))?;
            encode::encode_module(writer, module)?;
            encode::encode_symbol(writer, name)?;
        }
        TypeDescriptor::Full { name, type_name, params } => {
            writer.emit_tag(Tag::Control(ControlTag::FullDataType))?;
            encode::encode_symbol(writer, name)?;
            encode_type_name_record(writer, type_name)?;
            writer.sink.write_u32(params.len() as u32)?;
            for p in params {
                encode::encode_value(writer, p)?;
            }
        }
    }
    Ok(())
}

/// Decodes a type descriptor. The resolver is consulted only for the
/// `DataType` form, where a name that does not resolve to an existing
/// global binding is synthesized into the sandbox namespace and registered
/// so later references to the same (module, name) find it again.
pub fn decode_type<R: WireRead>(
    reader: &mut ReaderState<R>,
    resolver: &dyn TypeResolver,
) -> Result<Rc<TypeDescriptor>> {
    let tag = reader.read_tag()?;
    decode_type_for_tag(reader, resolver, tag)
}

pub fn decode_type_for_tag<R: WireRead>(
    reader: &mut ReaderState<R>,
    resolver: &dyn TypeResolver,
    tag: Tag,
) -> Result<Rc<TypeDescriptor>> {
    if let Tag::Literal(b) = tag {
        if let Some(kind) = intern::type_literal_from_tag(b) {
            return Ok(builtin_type_descriptor(kind));
        }
    }

    if let Tag::Control(ControlTag::ShortBackRef | ControlTag::BackRef | ControlTag::LongBackRef) = tag {
        let slot = decode::read_backref_slot(reader, tag)?;
        if reader.is_pending(slot) {
            bail!(Error::RecursiveTypeCycle {
                type_name: format!("slot {slot}"),
            });
        }
        return match reader.gettable(slot)? {
            Value::Type(d) => Ok(d),
            _ => Err(anyhow!(Error::Desync {
                reason: format!("slot {slot} is not a type descriptor"),
            })),
        };
    }

    match tag {
        Tag::Type(TypeTag::DataType) => {
            let slot = reader.reserve_slot();
            let module = decode::decode_module(reader)?;
            let name = decode::decode_symbol(reader)?;
            let n = reader.source.read_u32()? as usize;
            let mut params = Vec::with_capacity(n);
            for _ in 0..n {
                params.push(decode::decode_value(reader, resolver)?);
            }
            let desc = if params.is_empty() {
                match resolver.resolve_global(&module, &name)? {
                    Some(Value::Type(existing)) => existing,
                    _ => {
                        let fresh = Rc::new(TypeDescriptor::DataType {
                            module: Rc::clone(&module),
                            name: Rc::clone(&name),
                            params,
                        });
                        resolver.register_type(&module, &name, Rc::clone(&fresh));
                        fresh
                    }
                }
            } else {
                Rc::new(TypeDescriptor::DataType { module, name, params })
            };
            reader.install(slot, Value::Type(Rc::clone(&desc)));
            reader.finish_pending(slot);
            Ok(desc)
        }
        Tag::Control(ControlTag::WrapperDataType) => {
            let slot = reader.reserve_slot();
            let module = decode::decode_module(reader)?;
            let name = decode::decode_symbol(reader)?;
            let desc = Rc::new(TypeDescriptor::Wrapper { module, name });
            reader.install(slot, Value::Type(Rc::clone(&desc)));
            reader.finish_pending(slot);
            Ok(desc)
        }
        Tag::Control(ControlTag::FullDataType) => {
            let slot = reader.reserve_slot();
            let name = decode::decode_symbol(reader)?;
            let type_name = decode_type_name_record(reader, resolver)?;
            let n = reader.source.read_u32()? as usize;
            let mut params = Vec::with_capacity(n);
            for _ in 0..n {
                params.push(decode::decode_value(reader, resolver)?);
            }
            let desc = Rc::new(TypeDescriptor::Full { name, type_name, params });
            reader.install(slot, Value::Type(Rc::clone(&desc)));
            reader.finish_pending(slot);
            Ok(desc)
        }
        other => bail!(Error::Desync {
            reason: format!("tag {:?} is not a type descriptor", other),
        }),
    }
}

/// Writes (or back-references) a `TypeNameRecord`, deduplicated across the
/// process by its stable number exactly like `encode_method` (§4.6: "Type
/// name records are deduplicated across a stream using the stable object
/// number of §3").
fn encode_type_name_record<W: WireWrite>(
    writer: &mut WriterState<W>,
    type_name: &Shared<TypeNameRecord>,
) -> Result<()> {
    let id = Rc::as_ptr(type_name) as *const () as usize;
    let (number, fresh) = writer.stable_numbers.number_for(id);
    writer.sink.write_u64(number)?;
    writer.sink.write_bool(fresh)?;
    if !fresh {
        return Ok(());
    }

    let tn = type_name.borrow();
    encode::encode_symbol(writer, &tn.name)?;
    writer.sink.write_u32(tn.field_names.len() as u32)?;
    for f in &tn.field_names {
        encode::encode_symbol(writer, f)?;
    }
    match &tn.super_type {
        Some(sup) => {
            writer.sink.write_bool(true)?;
            encode_type(writer, sup)?;
        }
        None => writer.sink.write_bool(false)?,
    }
    writer.sink.write_u32(tn.parameters.len() as u32)?;
    for p in &tn.parameters {
        encode::encode_symbol(writer, p)?;
    }
    writer.sink.write_u32(tn.field_types.len() as u32)?;
    for ft in &tn.field_types {
        encode::encode_value(writer, ft)?;
    }
    writer.sink.write_bool(tn.has_instance)?;
    writer.sink.write_bool(tn.is_abstract)?;
    writer.sink.write_bool(tn.is_mutable)?;
    writer.sink.write_u32(tn.n_initialized_fields)?;
    writer.sink.write_u32(tn.max_method_arity)?;
    match &tn.methods {
        Some(methods) => {
            writer.sink.write_bool(true)?;
            writer.sink.write_u32(methods.len() as u32)?;
            for m in methods {
                encode::encode_value(writer, &Value::Method(Rc::clone(m)))?;
            }
        }
        None => writer.sink.write_bool(false)?,
    }
    Ok(())
}

fn decode_type_name_record<R: WireRead>(
    reader: &mut ReaderState<R>,
    resolver: &dyn TypeResolver,
) -> Result<Shared<TypeNameRecord>> {
    let number = reader.source.read_u64()?;
    let fresh = reader.source.read_bool()?;
    if !fresh {
        return reader.cached_type_name(number).ok_or_else(|| {
            anyhow!(Error::Desync {
                reason: format!("unknown type-name stable number {number}"),
            })
        });
    }

    let name = decode::decode_symbol(reader)?;
    let n_fields = reader.source.read_u32()? as usize;
    let mut field_names = Vec::with_capacity(n_fields);
    for _ in 0..n_fields {
        field_names.push(decode::decode_symbol(reader)?);
    }
    let has_super = reader.source.read_bool()?;
    let super_type = if has_super {
        Some(decode_type(reader, resolver)?)
    } else {
        None
    };
    let n_params = reader.source.read_u32()? as usize;
    let mut parameters = Vec::with_capacity(n_params);
    for _ in 0..n_params {
        parameters.push(decode::decode_symbol(reader)?);
    }
    let n_field_types = reader.source.read_u32()? as usize;
    let mut field_types = Vec::with_capacity(n_field_types);
    for _ in 0..n_field_types {
        field_types.push(decode::decode_value(reader, resolver)?);
    }
    let has_instance = reader.source.read_bool()?;
    let is_abstract = reader.source.read_bool()?;
    let is_mutable = reader.source.read_bool()?;
    let n_initialized_fields = reader.source.read_u32()?;
    let max_method_arity = reader.source.read_u32()?;
    let has_methods = reader.source.read_bool()?;
    let methods = if has_methods {
        let n = reader.source.read_u32()? as usize;
        let mut methods = Vec::with_capacity(n);
        for _ in 0..n {
            match decode::decode_value(reader, resolver)? {
                Value::Method(m) => methods.push(m),
                _ => bail!(Error::Desync {
                    reason: "expected a method definition in a type-name record".into(),
                }),
            }
        }
        Some(methods)
    } else {
        None
    };

    let record = shared(TypeNameRecord {
        stable_number: number,
        name,
        field_names,
        super_type,
        parameters,
        field_types,
        has_instance,
        is_abstract,
        is_mutable,
        n_initialized_fields,
        max_method_arity,
        methods,
    });
    reader.cache_type_name(number, Rc::clone(&record));
    if record.borrow().methods.is_some() {
        resolver.register_methods(&record)?;
    }
    Ok(record)
}
