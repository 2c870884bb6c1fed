//! A serializable, cycle-safe shadow of [`Value`] for the CLI's
//! pretty-printed decode tree. [`Value`] itself is not `Serialize` (it holds
//! `Rc<RefCell<..>>` and can legitimately contain cycles); [`describe`] walks
//! it once, tracking the identities it has already visited by
//! [`ObjectId`](crate::value::ObjectId) the same way the writer's
//! back-reference map does, and renders a repeat visit as
//! [`Described::Shared`] instead of recursing forever.

use std::collections::HashSet;

use serde::Serialize;

use crate::value::{ArrayData, DictKind, ObjectId, RecordKind, TypeDescriptor, Value};

#[derive(Debug, Serialize)]
pub enum Described {
    Bool(bool),
    Char(char),
    Int { value: i128, width: u8, signed: bool },
    Float { bits: u64, width: u8 },
    Nothing,
    String(String),
    Symbol(String),
    Tuple(Vec<Described>),
    SimpleVector(Vec<Described>),
    Array {
        elem_type: String,
        shape: Vec<u64>,
        elements: Option<Vec<Option<Described>>>,
        bytes: Option<usize>,
    },
    Expr {
        head: String,
        args: Vec<Described>,
    },
    Record {
        ty: String,
        mutable: bool,
        fields: Vec<Option<Described>>,
    },
    PrimitiveRecord {
        ty: String,
        bytes: usize,
    },
    Dict {
        ty: String,
        identity_hashed: bool,
        entries: Vec<(Described, Described)>,
    },
    Type(String),
    Module(String),
    Method { name: String, module: String },
    MethodInstance { method: String },
    Task { state: String },
    GlobalRef(String),
    /// A value whose identity has already been visited earlier in this same
    /// `describe` call: the cycle/sharing closes here instead of recursing.
    Shared { first_seen: usize },
}

fn module_path(m: &crate::value::ModuleValue) -> String {
    let mut parts = vec![m.root_name.to_string()];
    parts.extend(m.path.iter().map(|s| s.to_string()));
    parts.join(".")
}

fn type_name(ty: &TypeDescriptor) -> String {
    ty.name().to_string()
}

pub fn describe(value: &Value) -> Described {
    let mut seen = HashSet::new();
    describe_inner(value, &mut seen)
}

fn guard(id: ObjectId, seen: &mut HashSet<usize>) -> Option<Described> {
    if seen.contains(&id.0) {
        Some(Described::Shared { first_seen: id.0 })
    } else {
        seen.insert(id.0);
        None
    }
}

fn describe_inner(value: &Value, seen: &mut HashSet<usize>) -> Described {
    if let Some(id) = value.object_id() {
        if let Some(shared) = guard(id, seen) {
            return shared;
        }
    }
    match value {
        Value::Bool(b) => Described::Bool(*b),
        Value::Char(c) => Described::Char(*c),
        Value::Int8(v) => Described::Int { value: *v as i128, width: 8, signed: true },
        Value::Int16(v) => Described::Int { value: *v as i128, width: 16, signed: true },
        Value::Int32(v) => Described::Int { value: *v as i128, width: 32, signed: true },
        Value::Int64(v) => Described::Int { value: *v as i128, width: 64, signed: true },
        Value::Int128(v) => Described::Int { value: *v, width: 128, signed: true },
        Value::UInt8(v) => Described::Int { value: *v as i128, width: 8, signed: false },
        Value::UInt16(v) => Described::Int { value: *v as i128, width: 16, signed: false },
        Value::UInt32(v) => Described::Int { value: *v as i128, width: 32, signed: false },
        Value::UInt64(v) => Described::Int { value: *v as i128, width: 64, signed: false },
        Value::UInt128(v) => Described::Int { value: *v as i128, width: 128, signed: false },
        Value::Float16(bits) => Described::Float { bits: *bits as u64, width: 16 },
        Value::Float32(v) => Described::Float { bits: v.to_bits() as u64, width: 32 },
        Value::Float64(v) => Described::Float { bits: v.to_bits(), width: 64 },
        Value::Nothing => Described::Nothing,
        Value::String(s) => Described::String(s.to_string()),
        Value::Symbol(s) => Described::Symbol(s.to_string()),
        Value::Tuple(items) => Described::Tuple(items.iter().map(|v| describe_inner(v, seen)).collect()),
        Value::SimpleVector(items) => {
            Described::SimpleVector(items.iter().map(|v| describe_inner(v, seen)).collect())
        }
        Value::Array(arr) => {
            let a = arr.borrow();
            let shape = match &a.shape {
                crate::value::ArrayShape::Vector(n) => vec![*n],
                crate::value::ArrayShape::Dims(dims) => dims.clone(),
            };
            let (elements, bytes) = match &a.data {
                ArrayData::Bytes(b) => (None, Some(b.len())),
                ArrayData::Bool(bits) => (
                    Some(bits.iter().map(|b| Some(Described::Bool(*b))).collect()),
                    None,
                ),
                ArrayData::Pointers(items) => (
                    Some(
                        items
                            .iter()
                            .map(|item| item.as_ref().map(|v| describe_inner(v, seen)))
                            .collect(),
                    ),
                    None,
                ),
            };
            Described::Array {
                elem_type: type_name(&a.elem_type),
                shape,
                elements,
                bytes,
            }
        }
        Value::Expr(e) => {
            let ev = e.borrow();
            Described::Expr {
                head: ev.head.to_string(),
                args: ev.args.iter().map(|v| describe_inner(v, seen)).collect(),
            }
        }
        Value::Record(r) => {
            let rv = r.borrow();
            match &rv.kind {
                RecordKind::Primitive(bytes) => Described::PrimitiveRecord {
                    ty: type_name(&rv.ty),
                    bytes: bytes.len(),
                },
                RecordKind::Immutable(fields) => Described::Record {
                    ty: type_name(&rv.ty),
                    mutable: false,
                    fields: fields.iter().map(|v| Some(describe_inner(v, seen))).collect(),
                },
                RecordKind::Mutable(fields) => Described::Record {
                    ty: type_name(&rv.ty),
                    mutable: true,
                    fields: fields
                        .iter()
                        .map(|f| f.as_ref().map(|v| describe_inner(v, seen)))
                        .collect(),
                },
            }
        }
        Value::Dict(d) => {
            let dv = d.borrow();
            Described::Dict {
                ty: type_name(&dv.ty),
                identity_hashed: matches!(dv.kind, DictKind::Identity),
                entries: dv
                    .entries
                    .iter()
                    .map(|(k, v)| (describe_inner(k, seen), describe_inner(v, seen)))
                    .collect(),
            }
        }
        Value::Type(ty) => Described::Type(type_name(ty)),
        Value::Module(m) => Described::Module(module_path(m)),
        Value::Method(m) => {
            let mv = m.borrow();
            Described::Method {
                name: mv.name.to_string(),
                module: module_path(&mv.module),
            }
        }
        Value::MethodInstance(mi) => Described::MethodInstance {
            method: mi.borrow().def.borrow().name.to_string(),
        },
        Value::Task(t) => Described::Task {
            state: format!("{:?}", t.borrow().state),
        },
        Value::GlobalRef(g) => match &**g {
            crate::value::GlobalRefValue::Named { module, name } => {
                Described::GlobalRef(format!("{}.{}", module_path(module), name))
            }
            crate::value::GlobalRefValue::Full { type_desc } => {
                Described::GlobalRef(format!("<anonymous:{}>", type_name(type_desc)))
            }
        },
    }
}
