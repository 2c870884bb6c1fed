//! The "runtime-type resolution oracle" §6 makes a boundary interface: given
//! a (module, name) pair, produce the global binding it names, or else
//! synthesize/reuse a sandbox namespace for a type the reader cannot
//! resolve by name. [`TypeResolver`] is that interface as a Rust trait;
//! [`SandboxResolver`] is the dependency-free default this crate ships, so
//! `deserialize` works standalone. A host embedding this codec inside a
//! real module system supplies its own `TypeResolver`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::Result;

use crate::value::{ArrayData, ArrayShape, ArrayValue, ModuleValue, RecordKind, RecordValue, Shared, TypeDescriptor, Value, shared};

pub trait TypeResolver {
    /// Looks up a global binding reachable from `module` under `name`.
    /// Returns `Ok(None)` when the binding is unknown, which the decoder
    /// treats as "not resolvable by name" rather than a hard error, so
    /// callers can fall back to a `FULL_DATATYPE`/`FULL_GLOBALREF` payload.
    fn resolve_global(&self, module: &Rc<ModuleValue>, name: &str) -> Result<Option<Value>>;

    /// The private module synthesized/sandbox types get installed into.
    fn sandbox_module(&self) -> Rc<ModuleValue>;

    /// Re-installs a synthesized type's global binding so later
    /// `DataType`-form references to the same (module, name) resolve.
    fn register_type(&self, module: &Rc<ModuleValue>, name: &str, desc: Rc<TypeDescriptor>);

    /// Installs a type-name record's attached method definitions. The
    /// sandbox default is a no-op: it has no dispatch table to install
    /// into, only a name registry.
    fn register_methods(&self, _type_name: &crate::value::Shared<crate::value::TypeNameRecord>) -> Result<()> {
        Ok(())
    }

    fn allocate_instance(&self, ty: Rc<TypeDescriptor>, field_count: usize) -> Shared<RecordValue> {
        shared(RecordValue {
            ty,
            kind: RecordKind::Mutable(vec![None; field_count]),
        })
    }

    fn allocate_array(&self, elem_type: Rc<TypeDescriptor>, shape: ArrayShape) -> Shared<ArrayValue> {
        let len = shape.len() as usize;
        shared(ArrayValue {
            elem_type,
            shape,
            data: ArrayData::Pointers(vec![None; len]),
        })
    }
}

/// Always resolves into a single process-private sandbox module, and
/// remembers every type it has synthesized so later references to the same
/// name find it again within the same process.
pub struct SandboxResolver {
    module: Rc<ModuleValue>,
    registry: RefCell<HashMap<(String, String), Rc<TypeDescriptor>>>,
}

impl Default for SandboxResolver {
    fn default() -> Self {
        SandboxResolver {
            module: Rc::new(ModuleValue {
                root_uuid: None,
                root_name: Rc::from("Sandbox"),
                path: Vec::new(),
            }),
            registry: RefCell::new(HashMap::new()),
        }
    }
}

fn module_key(module: &ModuleValue) -> String {
    let mut parts = vec![module.root_name.to_string()];
    parts.extend(module.path.iter().map(|s| s.to_string()));
    parts.join(".")
}

impl TypeResolver for SandboxResolver {
    fn resolve_global(&self, module: &Rc<ModuleValue>, name: &str) -> Result<Option<Value>> {
        let key = (module_key(module), name.to_owned());
        Ok(self
            .registry
            .borrow()
            .get(&key)
            .cloned()
            .map(Value::Type))
    }

    fn sandbox_module(&self) -> Rc<ModuleValue> {
        Rc::clone(&self.module)
    }

    fn register_type(&self, module: &Rc<ModuleValue>, name: &str, desc: Rc<TypeDescriptor>) {
        let key = (module_key(module), name.to_owned());
        self.registry.borrow_mut().insert(key, desc);
    }
}
