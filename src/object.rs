// File: src/object.rs
//
// Obj — the heap object taxonomy: String, Function, Native, Upvalue,
// Closure, Class, Instance, BoundMethod (§3). Every variant knows how to
// report its own approximate size (for GC accounting) and which other
// heap objects it references (for GC tracing).

use crate::chunk::Chunk;
use crate::gc::{Heap, ObjRef};
use crate::table::Table;
use crate::value::Value;

/// FNV-1a over the string's bytes. The source material's `hashString`
/// drops the final `hash *= 16777619` — §9 flags this as a bug to fix, not
/// a behaviour to preserve, so this is the textbook recipe.
pub fn fnv1a_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

pub struct ObjString {
    pub value: String,
    pub hash: u32,
}

impl ObjString {
    pub fn new(value: String) -> Self {
        let hash = fnv1a_hash(value.as_bytes());
        ObjString { value, hash }
    }
}

pub struct ObjFunction {
    pub name: Option<ObjRef>,
    pub arity: u8,
    pub upvalue_count: u8,
    pub chunk: Chunk,
}

impl ObjFunction {
    pub fn new() -> Self {
        ObjFunction {
            name: None,
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
        }
    }
}

impl Default for ObjFunction {
    fn default() -> Self {
        Self::new()
    }
}

/// A native (host-implemented) function. Arity-variadic at the call site:
/// the VM hands it whatever slice of arguments the call provided (§6).
pub type NativeFn = fn(&[Value]) -> Value;

pub struct ObjNative {
    pub name: String,
    pub function: NativeFn,
}

#[derive(Clone, Copy)]
pub enum UpvalueLocation {
    /// Still live on the operand stack, at this absolute stack index.
    Stack(usize),
    /// Closed: the captured value has been copied out of the stack frame.
    Closed(Value),
}

pub struct ObjUpvalue {
    pub location: UpvalueLocation,
}

impl ObjUpvalue {
    pub fn stack_index(&self) -> Option<usize> {
        match self.location {
            UpvalueLocation::Stack(index) => Some(index),
            UpvalueLocation::Closed(_) => None,
        }
    }
}

pub struct ObjClosure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

pub struct ObjClass {
    pub name: ObjRef,
    pub methods: Table,
}

pub struct ObjInstance {
    pub class: ObjRef,
    pub fields: Table,
}

pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}

pub enum Obj {
    String(ObjString),
    Function(ObjFunction),
    Native(ObjNative),
    Upvalue(ObjUpvalue),
    Closure(ObjClosure),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
}

macro_rules! obj_accessors {
    ($as_name:ident, $as_name_mut:ident, $variant:ident, $ty:ty) => {
        pub fn $as_name(&self) -> Option<&$ty> {
            match self {
                Obj::$variant(inner) => Some(inner),
                _ => None,
            }
        }

        pub fn $as_name_mut(&mut self) -> Option<&mut $ty> {
            match self {
                Obj::$variant(inner) => Some(inner),
                _ => None,
            }
        }
    };
}

impl Obj {
    obj_accessors!(as_string, as_string_mut, String, ObjString);
    obj_accessors!(as_function, as_function_mut, Function, ObjFunction);
    obj_accessors!(as_native, as_native_mut, Native, ObjNative);
    obj_accessors!(as_upvalue, as_upvalue_mut, Upvalue, ObjUpvalue);
    obj_accessors!(as_closure, as_closure_mut, Closure, ObjClosure);
    obj_accessors!(as_class, as_class_mut, Class, ObjClass);
    obj_accessors!(as_instance, as_instance_mut, Instance, ObjInstance);
    obj_accessors!(as_bound_method, as_bound_method_mut, BoundMethod, ObjBoundMethod);

    pub fn is_string(&self) -> bool {
        matches!(self, Obj::String(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Obj::String(_) => "string",
            Obj::Function(_) => "function",
            Obj::Native(_) => "native function",
            Obj::Upvalue(_) => "upvalue",
            Obj::Closure(_) => "closure",
            Obj::Class(_) => "class",
            Obj::Instance(_) => "instance",
            Obj::BoundMethod(_) => "bound method",
        }
    }

    /// A rough accounting unit for GC trigger purposes; exact byte counts
    /// don't matter, only that bigger objects cost more (§4.6).
    pub fn approx_size(&self) -> usize {
        match self {
            Obj::String(s) => 24 + s.value.len(),
            Obj::Function(f) => 64 + f.chunk.code.len() * 16 + f.chunk.constants.len() * 8,
            Obj::Native(_) => 32,
            Obj::Upvalue(_) => 24,
            Obj::Closure(c) => 32 + c.upvalues.len() * 8,
            Obj::Class(_) => 48,
            Obj::Instance(_) => 48,
            Obj::BoundMethod(_) => 32,
        }
    }

    pub fn format(&self, heap: &Heap) -> String {
        match self {
            Obj::String(s) => s.value.clone(),
            Obj::Function(f) => match f.name {
                Some(name) => format!("<fn {}>", heap.get(name).as_string().unwrap().value),
                None => "<script>".to_string(),
            },
            Obj::Native(n) => format!("<native fn {}>", n.name),
            Obj::Upvalue(_) => "<upvalue>".to_string(),
            Obj::Closure(c) => heap.get(c.function).format(heap),
            Obj::Class(class) => heap.get(class.name).as_string().unwrap().value.clone(),
            Obj::Instance(inst) => {
                let class_name = heap.get(inst.class).as_class().unwrap().name;
                format!("{} instance", heap.get(class_name).as_string().unwrap().value)
            }
            Obj::BoundMethod(bound) => heap.get(bound.method).format(heap),
        }
    }

    /// Every heap object this one directly references, as `Value`s — the
    /// blackening step hands each of these to `Heap::mark_value` (§4.6).
    /// This is the exhaustive edge list §9 calls out as needing every entry
    /// visited; keep it in lockstep with the `Obj` variants above.
    pub fn child_refs(&self) -> Vec<Value> {
        match self {
            Obj::String(_) | Obj::Native(_) => Vec::new(),
            Obj::Function(f) => {
                let mut refs: Vec<Value> = f.chunk.constants.clone();
                if let Some(name) = f.name {
                    refs.push(Value::Obj(name));
                }
                refs
            }
            Obj::Upvalue(u) => match u.location {
                UpvalueLocation::Closed(value) => vec![value],
                UpvalueLocation::Stack(_) => Vec::new(),
            },
            Obj::Closure(c) => {
                let mut refs = vec![Value::Obj(c.function)];
                refs.extend(c.upvalues.iter().map(|u| Value::Obj(*u)));
                refs
            }
            Obj::Class(class) => {
                let mut refs = vec![Value::Obj(class.name)];
                refs.extend(class.methods.iter().map(|(k, v)| [Value::Obj(k), v]).flatten());
                refs
            }
            Obj::Instance(inst) => {
                let mut refs = vec![Value::Obj(inst.class)];
                refs.extend(inst.fields.iter().map(|(k, v)| [Value::Obj(k), v]).flatten());
                refs
            }
            Obj::BoundMethod(bound) => vec![bound.receiver, Value::Obj(bound.method)],
        }
    }
}
