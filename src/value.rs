//! The in-memory object graph this codec encodes and decodes.
//!
//! The distilled protocol talks about "the value being serialized" as if a
//! host language runtime's objects, types and modules already existed; a
//! standalone crate has to name that graph explicitly. [`Value`] is the
//! closed set of everything the wire format can carry. Shareable/mutable
//! variants wrap `Rc<RefCell<..>>` so that two fields pointing at "the same
//! object" really do share one allocation: `Rc::ptr_eq`/`Rc::as_ptr` give the
//! writer's back-reference map and the Identity/Cycle laws a concrete
//! mechanism, the same way the rest of this codebase reaches for an owned
//! struct plus explicit identity rather than an open trait object.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub type Shared<T> = Rc<RefCell<T>>;

pub fn shared<T>(value: T) -> Shared<T> {
    Rc::new(RefCell::new(value))
}

/// Any value the codec can carry.
#[derive(Clone, Debug)]
pub enum Value {
    Bool(bool),
    Char(char),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Int128(i128),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    UInt128(u128),
    Float16(u16),
    Float32(f32),
    Float64(f64),
    Nothing,
    String(Rc<str>),
    Symbol(Rc<str>),
    Tuple(Rc<Vec<Value>>),
    SimpleVector(Rc<Vec<Value>>),
    Array(Shared<ArrayValue>),
    Expr(Shared<ExprValue>),
    Record(Shared<RecordValue>),
    Dict(Shared<DictValue>),
    Type(Rc<TypeDescriptor>),
    Module(Rc<ModuleValue>),
    Method(Shared<MethodValue>),
    MethodInstance(Shared<MethodInstanceValue>),
    Task(Shared<TaskValue>),
    GlobalRef(Rc<GlobalRefValue>),
}

/// Pointer identity for the back-reference map. Only meaningful for the
/// `Rc`/`Shared` variants; primitives and interned singletons never reach
/// here because the encoder special-cases them before consulting identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectId(pub usize);

impl Value {
    /// Returns the pointer this value is identified by for back-reference
    /// purposes, or `None` for values that are never shared by identity
    /// (primitives, `Nothing`, and short strings/symbols which this codec
    /// never reserves a slot for at all).
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Value::Tuple(rc) => Some(ObjectId(Rc::as_ptr(rc) as *const () as usize)),
            Value::SimpleVector(rc) => Some(ObjectId(Rc::as_ptr(rc) as *const () as usize)),
            Value::Array(rc) => Some(ObjectId(Rc::as_ptr(rc) as *const () as usize)),
            Value::Expr(rc) => Some(ObjectId(Rc::as_ptr(rc) as *const () as usize)),
            Value::Record(rc) => Some(ObjectId(Rc::as_ptr(rc) as *const () as usize)),
            Value::Dict(rc) => Some(ObjectId(Rc::as_ptr(rc) as *const () as usize)),
            Value::Module(rc) => Some(ObjectId(Rc::as_ptr(rc) as *const () as usize)),
            Value::Method(rc) => Some(ObjectId(Rc::as_ptr(rc) as *const () as usize)),
            Value::MethodInstance(rc) => Some(ObjectId(Rc::as_ptr(rc) as *const () as usize)),
            Value::Task(rc) => Some(ObjectId(Rc::as_ptr(rc) as *const () as usize)),
            Value::GlobalRef(rc) => Some(ObjectId(Rc::as_ptr(rc) as *const () as usize)),
            Value::Type(rc) => Some(ObjectId(Rc::as_ptr(rc) as *const () as usize)),
            _ => None,
        }
    }

    /// Textual content used to canonicalize strings/symbols longer than 7
    /// bytes *by value* rather than by identity (see the Deduplication law).
    pub fn canonical_text(&self) -> Option<(TextKind, &str)> {
        match self {
            Value::String(s) if s.len() > 7 => Some((TextKind::String, s)),
            Value::Symbol(s) if s.len() > 7 => Some((TextKind::Symbol, s)),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextKind {
    String,
    Symbol,
}

#[derive(Clone, Debug)]
pub enum ArrayShape {
    Vector(u64),
    Dims(Vec<u64>),
}

impl ArrayShape {
    pub fn len(&self) -> u64 {
        match self {
            ArrayShape::Vector(n) => *n,
            ArrayShape::Dims(dims) => dims.iter().product(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The element storage of an array. Bit-packed element kinds are stored
/// pre-encoded (raw bytes, or an RLE'd bool stream); pointer-element arrays
/// hold actual `Value`s, with `None` standing for an unassigned slot
/// (`UNDEFREF` on the wire).
#[derive(Clone, Debug)]
pub enum ArrayData {
    Bool(Vec<bool>),
    Bytes(Vec<u8>),
    Pointers(Vec<Option<Value>>),
}

#[derive(Clone, Debug)]
pub struct ArrayValue {
    pub elem_type: Rc<TypeDescriptor>,
    pub shape: ArrayShape,
    pub data: ArrayData,
}

#[derive(Clone, Debug)]
pub struct ExprValue {
    pub head: Rc<str>,
    pub args: Vec<Value>,
}

/// A nominal aggregate. `kind` decides how the encoder treats it; a value's
/// `ty` names the `TypeDescriptor` it was built from (§4.6).
#[derive(Clone, Debug)]
pub struct RecordValue {
    pub ty: Rc<TypeDescriptor>,
    pub kind: RecordKind,
}

#[derive(Clone, Debug)]
pub enum RecordKind {
    /// A `primitive type` (bitstype): opaque fixed-width payload, no field
    /// structure on the wire.
    Primitive(Vec<u8>),
    /// Immutable composite: every field is always present.
    Immutable(Vec<Value>),
    /// Mutable composite: fields may be absent (`UNDEFREF`) until assigned,
    /// and the record is shared by identity once any reference to it is
    /// taken.
    Mutable(Vec<Option<Value>>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DictKind {
    /// Keys compared and hashed by identity (`IDDICT` on the wire).
    Identity,
    /// Keys compared and hashed by value.
    ByValue,
}

#[derive(Clone, Debug)]
pub struct DictValue {
    pub ty: Rc<TypeDescriptor>,
    pub kind: DictKind,
    pub entries: Vec<(Value, Value)>,
}

/// One of the three forms §4.6 allows for a type descriptor on the wire.
#[derive(Clone, Debug)]
pub enum TypeDescriptor {
    /// Resolvable by (module, name) plus its instantiated parameters.
    DataType {
        module: Rc<ModuleValue>,
        name: Rc<str>,
        params: Vec<Value>,
    },
    /// Not resolvable by name (sandbox/anonymous-function types): carries
    /// the whole [`TypeNameRecord`].
    Full {
        name: Rc<str>,
        type_name: Shared<TypeNameRecord>,
        params: Vec<Value>,
    },
    /// The outermost, unparameterized form of a parametric type.
    Wrapper {
        module: Rc<ModuleValue>,
        name: Rc<str>,
    },
}

impl TypeDescriptor {
    pub fn name(&self) -> &str {
        match self {
            TypeDescriptor::DataType { name, .. } => name,
            TypeDescriptor::Full { name, .. } => name,
            TypeDescriptor::Wrapper { name, .. } => name,
        }
    }
}

/// Enough structural information to synthesize a nominal type on the reader
/// side. Deduplicated across a stream (and, if the known-object-by-number
/// map is process-wide, across streams) by `stable_number`.
#[derive(Clone, Debug)]
pub struct TypeNameRecord {
    pub stable_number: u64,
    pub name: Rc<str>,
    pub field_names: Vec<Rc<str>>,
    pub super_type: Option<Rc<TypeDescriptor>>,
    pub parameters: Vec<Rc<str>>,
    pub field_types: Vec<Value>,
    pub has_instance: bool,
    pub is_abstract: bool,
    pub is_mutable: bool,
    pub n_initialized_fields: u32,
    pub max_method_arity: u32,
    pub methods: Option<Vec<Shared<MethodValue>>>,
}

#[derive(Clone, Debug)]
pub struct ModuleValue {
    pub root_uuid: Option<u128>,
    pub root_name: Rc<str>,
    pub path: Vec<Rc<str>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Actively executing right now. Never serializable (§7 error kind 3).
    Running,
    Runnable,
    Done,
    Failed,
}

#[derive(Clone, Debug)]
pub struct TaskValue {
    pub body: Value,
    pub task_locals: Option<Shared<DictValue>>,
    pub state: TaskState,
    pub result_or_exception: Option<Value>,
    pub has_exception: bool,
}

#[derive(Clone, Debug)]
pub struct MethodValue {
    pub stable_number: u64,
    pub module: Rc<ModuleValue>,
    pub name: Rc<str>,
    pub file: Rc<str>,
    pub line: u32,
    pub signature: Rc<TypeDescriptor>,
    pub slot_names: Vec<Rc<str>>,
    pub argcount: u32,
    pub is_vararg: bool,
    pub is_opaque: bool,
    pub inference_flags: u32,
    pub body_source: Option<Rc<str>>,
    pub generator: Option<Value>,
    pub recursion_relation: Option<Rc<str>>,
}

#[derive(Clone, Debug)]
pub struct MethodInstanceValue {
    pub stable_number: u64,
    pub def: Shared<MethodValue>,
    pub specialized_arg_types: Rc<Vec<Value>>,
    pub return_type: Rc<TypeDescriptor>,
    pub sparam_values: Rc<Vec<Value>>,
}

#[derive(Clone, Debug)]
pub enum GlobalRefValue {
    /// The common case: a name resolvable through `module`.
    Named { module: Rc<ModuleValue>, name: Rc<str> },
    /// A locally-constant binding of an anonymous-function type, or a name
    /// that lives in the reader's sandbox namespace: carries the type
    /// payload directly instead of a resolvable path.
    Full { type_desc: Rc<TypeDescriptor> },
}

/// Stable-object-number side table (§3 "known-object-by-number map"). Keyed
/// by the identity of the `TypeNameRecord`/`MethodValue` the number was
/// minted for, so the same Rust object always gets the same number even
/// across multiple encode calls sharing this table.
pub type StableNumberMap = HashMap<usize, u64>;
