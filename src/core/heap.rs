//! The heap: owns the single byte arena and allocates every heap-shaped
//! value — strings, objects, arrays, functions, errors, promises,
//! bigints, typed arrays — as a record inside it.
//!
//! §3 models every heap reference as an offset into one arena with
//! `offset < brk`, and §4.E requires the Cheney collector to relocate
//! every heap type, not just strings. Object/array/function/... payloads
//! (property chains, dense elements, closure scopes, parsed function
//! bodies) are native Rust structures — `Vec`/`HashMap`/`Rc` — that don't
//! have a natural fixed-width byte encoding the way a rope node does, so
//! each lives in a small per-kind Rust-side table (`objects`, `functions`,
//! ...). What the arena actually stores for these tags is a tiny *handle*
//! record: just the index into that side table. A `Value`'s offset is
//! therefore always the handle's real arena offset — it obeys `offset <
//! brk`, and [`crate::core::gc::collect`] physically copies and compacts
//! handle bytes for every tag alongside rope/string bytes in the same
//! pass, via [`HandleTracer`]/[`CombinedTracer`] below. A handle's index
//! into its side table never needs rewriting during a collection (moving
//! the handle doesn't move what it points at), so the side table itself
//! is compacted separately, by dropping every entry a collection didn't
//! find reachable (see [`Heap::retain_instances`]) — the direct
//! replacement for the old mark-sweep-over-a-`HashMap` this module used
//! to do instead of real arena relocation.

use std::collections::HashMap;

use num_bigint::BigInt;

use crate::core::arena::{Arena, Offset};
use crate::core::gc::{ForwardTableView, HeapTracer};
use crate::core::object::ObjectData;
use crate::core::value::{Tag, Value};
use crate::error::JSError;

pub struct FunctionData {
    pub name: String,
    pub params: Vec<crate::core::ast::Param>,
    pub body: Vec<crate::core::ast::Statement>,
    pub closure_scope: crate::core::scope::ScopeHandle,
    pub is_async: bool,
    pub is_generator: bool,
    pub bound_this: Option<Value>,
    pub proto_object: u32,
}

pub struct ErrorData {
    pub kind: crate::error::JSErrorKind,
    pub message: String,
    pub stack: Vec<crate::error::CallFrame>,
    /// Ad hoc properties beyond the fixed `message`/`name`/`stack` trio,
    /// e.g. `AggregateError.prototype.errors`.
    pub extra: Vec<(String, Value)>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

pub struct PromiseData {
    pub state: PromiseState,
    pub value: Value,
    pub on_fulfill: Vec<Value>,
    pub on_reject: Vec<Value>,
}

/// Element kind for a typed array view — §4's "Data Model" framing keeps
/// this as a plain tagged byte buffer rather than a full `ArrayBuffer`/
/// `DataView` layer, since the spec scopes typed arrays to a `Value` tag
/// with element access, not a heavily-featured built-in module.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TypedArrayKind {
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl TypedArrayKind {
    pub fn byte_size(self) -> usize {
        match self {
            TypedArrayKind::Int8 | TypedArrayKind::Uint8 | TypedArrayKind::Uint8Clamped => 1,
            TypedArrayKind::Int16 | TypedArrayKind::Uint16 => 2,
            TypedArrayKind::Int32 | TypedArrayKind::Uint32 | TypedArrayKind::Float32 => 4,
            TypedArrayKind::Float64 => 8,
        }
    }
}

pub struct TypedArrayData {
    pub kind: TypedArrayKind,
    pub bytes: Vec<u8>,
}

impl TypedArrayData {
    pub fn len(&self) -> usize {
        self.bytes.len() / self.kind.byte_size()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        let size = self.kind.byte_size();
        let start = index * size;
        if start + size > self.bytes.len() {
            return None;
        }
        let chunk = &self.bytes[start..start + size];
        Some(match self.kind {
            TypedArrayKind::Int8 => chunk[0] as i8 as f64,
            TypedArrayKind::Uint8 | TypedArrayKind::Uint8Clamped => chunk[0] as f64,
            TypedArrayKind::Int16 => i16::from_le_bytes([chunk[0], chunk[1]]) as f64,
            TypedArrayKind::Uint16 => u16::from_le_bytes([chunk[0], chunk[1]]) as f64,
            TypedArrayKind::Int32 => i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
            TypedArrayKind::Uint32 => u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
            TypedArrayKind::Float32 => f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
            TypedArrayKind::Float64 => f64::from_le_bytes(chunk.try_into().unwrap()),
        })
    }

    pub fn set(&mut self, index: usize, value: f64) -> bool {
        let size = self.kind.byte_size();
        let start = index * size;
        if start + size > self.bytes.len() {
            return false;
        }
        let encoded: Vec<u8> = match self.kind {
            TypedArrayKind::Int8 => vec![value as i8 as u8],
            TypedArrayKind::Uint8 => vec![value as u8],
            TypedArrayKind::Uint8Clamped => vec![value.clamp(0.0, 255.0).round() as u8],
            TypedArrayKind::Int16 => (value as i16).to_le_bytes().to_vec(),
            TypedArrayKind::Uint16 => (value as u16).to_le_bytes().to_vec(),
            TypedArrayKind::Int32 => (value as i32).to_le_bytes().to_vec(),
            TypedArrayKind::Uint32 => (value as u32).to_le_bytes().to_vec(),
            TypedArrayKind::Float32 => (value as f32).to_le_bytes().to_vec(),
            TypedArrayKind::Float64 => value.to_le_bytes().to_vec(),
        };
        self.bytes[start..start + size].copy_from_slice(&encoded);
        true
    }
}

/// Byte width of a handle record: a `u32` side-table index, padded to the
/// arena's 8-byte alignment.
const HANDLE_SIZE: usize = 8;

/// [`HeapTracer`] for every handle-backed tag (everything but `Tag::String`):
/// the handle is copied verbatim, since its side-table index never needs
/// rewriting — only the handle's own arena offset moves.
pub struct HandleTracer;

impl HeapTracer for HandleTracer {
    fn copy_node(&self, arena: &Arena, _tag: Tag, old_off: u32, scratch: &mut Vec<u8>) -> (u32, Vec<(u32, Tag)>) {
        let base = old_off as usize;
        let new_off = scratch.len() as u32;
        scratch.extend_from_slice(&arena.as_slice()[base..base + HANDLE_SIZE]);
        (new_off, Vec::new())
    }

    fn relocate_children(&self, _scratch: &mut [u8], _tag: Tag, _new_off: u32, _table: &ForwardTableView) {}
}

/// Dispatches to [`crate::core::rope::RopeTracer`] for `Tag::String` and
/// [`HandleTracer`] for everything else, so a single collection pass can
/// relocate both kinds of node living in the same arena.
pub struct CombinedTracer;

impl HeapTracer for CombinedTracer {
    fn copy_node(&self, arena: &Arena, tag: Tag, old_off: u32, scratch: &mut Vec<u8>) -> (u32, Vec<(u32, Tag)>) {
        if matches!(tag, Tag::String) {
            crate::core::rope::RopeTracer.copy_node(arena, tag, old_off, scratch)
        } else {
            HandleTracer.copy_node(arena, tag, old_off, scratch)
        }
    }

    fn relocate_children(&self, scratch: &mut [u8], tag: Tag, new_off: u32, table: &ForwardTableView) {
        if matches!(tag, Tag::String) {
            crate::core::rope::RopeTracer.relocate_children(scratch, tag, new_off, table);
        }
    }
}

pub struct Heap {
    pub arena: Arena,
    objects: Vec<Option<ObjectData>>,
    functions: Vec<Option<FunctionData>>,
    errors: Vec<Option<ErrorData>>,
    promises: Vec<Option<PromiseData>>,
    bigints: Vec<Option<BigInt>>,
    typed_arrays: Vec<Option<TypedArrayData>>,
}

impl Heap {
    pub fn new(initial: usize, max: usize) -> Result<Heap, JSError> {
        Ok(Heap {
            arena: Arena::new(initial, max)?,
            objects: Vec::new(),
            functions: Vec::new(),
            errors: Vec::new(),
            promises: Vec::new(),
            bigints: Vec::new(),
            typed_arrays: Vec::new(),
        })
    }

    fn alloc_handle(&mut self, instance_id: u32) -> Result<Offset, JSError> {
        let off = self.arena.alloc(HANDLE_SIZE)?;
        self.arena.as_mut_slice()[off as usize..off as usize + 4].copy_from_slice(&instance_id.to_le_bytes());
        Ok(off)
    }

    /// The side-table index a handle at `off` currently points at.
    fn instance_at(&self, off: Offset) -> u32 {
        u32::from_le_bytes(self.arena.as_slice()[off as usize..off as usize + 4].try_into().unwrap())
    }

    /// The side-table index backing `v`, for the GC's liveness bookkeeping
    /// (see [`Self::retain_instances`]). `None` for non-heap or string tags.
    pub fn instance_id(&self, v: Value) -> Option<u32> {
        if !v.type_tag().is_heap() || matches!(v.type_tag(), Tag::String) {
            return None;
        }
        Some(self.instance_at(v.offset()))
    }

    pub fn new_object(&mut self, proto: Option<u32>) -> Result<Value, JSError> {
        let id = self.objects.len() as u32;
        self.objects.push(Some(ObjectData::new(proto)));
        let off = self.alloc_handle(id)?;
        Ok(Value::make(Tag::Object, off as u64))
    }

    pub fn new_array(&mut self, proto: Option<u32>) -> Result<Value, JSError> {
        let id = self.objects.len() as u32;
        self.objects.push(Some(ObjectData::new_array(proto)));
        let off = self.alloc_handle(id)?;
        Ok(Value::make(Tag::Array, off as u64))
    }

    pub fn new_function(&mut self, data: FunctionData) -> Result<Value, JSError> {
        let id = self.functions.len() as u32;
        self.functions.push(Some(data));
        let off = self.alloc_handle(id)?;
        Ok(Value::make(Tag::Function, off as u64))
    }

    pub fn new_error(&mut self, kind: crate::error::JSErrorKind, message: String, stack: Vec<crate::error::CallFrame>) -> Result<Value, JSError> {
        let id = self.errors.len() as u32;
        self.errors.push(Some(ErrorData { kind, message, stack, extra: Vec::new() }));
        let off = self.alloc_handle(id)?;
        Ok(Value::make(Tag::Error, off as u64))
    }

    /// Set an ad hoc property on an Error value (e.g. `AggregateError.errors`).
    /// A no-op if `v` is not an Error.
    pub fn error_set_extra(&mut self, v: Value, key: &str, value: Value) {
        if !matches!(v.type_tag(), Tag::Error) {
            return;
        }
        let id = self.instance_at(v.offset()) as usize;
        if let Some(Some(e)) = self.errors.get_mut(id) {
            if let Some(slot) = e.extra.iter_mut().find(|(k, _)| k == key) {
                slot.1 = value;
            } else {
                e.extra.push((key.to_string(), value));
            }
        }
    }

    pub fn new_promise(&mut self) -> Result<Value, JSError> {
        let id = self.promises.len() as u32;
        self.promises.push(Some(PromiseData { state: PromiseState::Pending, value: Value::UNDEFINED, on_fulfill: Vec::new(), on_reject: Vec::new() }));
        let off = self.alloc_handle(id)?;
        Ok(Value::make(Tag::Promise, off as u64))
    }

    pub fn new_bigint(&mut self, n: BigInt) -> Result<Value, JSError> {
        let id = self.bigints.len() as u32;
        self.bigints.push(Some(n));
        let off = self.alloc_handle(id)?;
        Ok(Value::make(Tag::BigInt, off as u64))
    }

    pub fn new_typed_array(&mut self, kind: TypedArrayKind, length: usize) -> Result<Value, JSError> {
        let id = self.typed_arrays.len() as u32;
        self.typed_arrays.push(Some(TypedArrayData { kind, bytes: vec![0u8; length * kind.byte_size()] }));
        let off = self.alloc_handle(id)?;
        Ok(Value::make(Tag::TypedArray, off as u64))
    }

    pub fn new_string(&mut self, s: &str) -> Result<Value, JSError> {
        let off = crate::core::rope::new_string(&mut self.arena, s)?;
        Ok(Value::make(Tag::String, off as u64))
    }

    pub fn concat_strings(&mut self, a: Value, b: Value) -> Result<Value, JSError> {
        let off = crate::core::rope::concat(&mut self.arena, a.offset(), b.offset())?;
        Ok(Value::make(Tag::String, off as u64))
    }

    pub fn string_value(&self, v: Value) -> String {
        crate::core::rope::to_string(&self.arena, v.offset())
    }

    /// Every accessor below guards on `type_tag()` before touching the
    /// arena, which callers are free to probe an arbitrary `Value`
    /// without checking its tag first (e.g. `for-in` over a primitive, or
    /// a thrown non-Error value).
    pub fn object(&self, v: Value) -> Option<&ObjectData> {
        if !matches!(v.type_tag(), Tag::Object | Tag::Array) {
            return None;
        }
        self.objects.get(self.instance_at(v.offset()) as usize)?.as_ref()
    }

    pub fn object_mut(&mut self, v: Value) -> Option<&mut ObjectData> {
        if !matches!(v.type_tag(), Tag::Object | Tag::Array) {
            return None;
        }
        let id = self.instance_at(v.offset()) as usize;
        self.objects.get_mut(id)?.as_mut()
    }

    pub fn function(&self, v: Value) -> Option<&FunctionData> {
        if !matches!(v.type_tag(), Tag::Function) {
            return None;
        }
        self.functions.get(self.instance_at(v.offset()) as usize)?.as_ref()
    }

    pub fn error(&self, v: Value) -> Option<&ErrorData> {
        if !matches!(v.type_tag(), Tag::Error) {
            return None;
        }
        self.errors.get(self.instance_at(v.offset()) as usize)?.as_ref()
    }

    pub fn promise(&self, v: Value) -> Option<&PromiseData> {
        if !matches!(v.type_tag(), Tag::Promise) {
            return None;
        }
        self.promises.get(self.instance_at(v.offset()) as usize)?.as_ref()
    }

    pub fn promise_mut(&mut self, v: Value) -> Option<&mut PromiseData> {
        if !matches!(v.type_tag(), Tag::Promise) {
            return None;
        }
        let id = self.instance_at(v.offset()) as usize;
        self.promises.get_mut(id)?.as_mut()
    }

    pub fn typed_array(&self, v: Value) -> Option<&TypedArrayData> {
        if !matches!(v.type_tag(), Tag::TypedArray) {
            return None;
        }
        self.typed_arrays.get(self.instance_at(v.offset()) as usize)?.as_ref()
    }

    pub fn typed_array_mut(&mut self, v: Value) -> Option<&mut TypedArrayData> {
        if !matches!(v.type_tag(), Tag::TypedArray) {
            return None;
        }
        let id = self.instance_at(v.offset()) as usize;
        self.typed_arrays.get_mut(id)?.as_mut()
    }

    pub fn bigint(&self, v: Value) -> Option<&BigInt> {
        if !matches!(v.type_tag(), Tag::BigInt) {
            return None;
        }
        self.bigints.get(self.instance_at(v.offset()) as usize)?.as_ref()
    }

    /// Id-indexed accessors used by the garbage collector's root walk:
    /// unlike the tag-checked accessors above, these go straight to the
    /// side table by instance id, which stays valid across a collection
    /// even while the owning value's handle offset is being relocated.
    pub fn object_mut_by_id(&mut self, id: u32) -> Option<&mut ObjectData> {
        self.objects.get_mut(id as usize)?.as_mut()
    }

    pub fn function_by_id(&self, id: u32) -> Option<&FunctionData> {
        self.functions.get(id as usize)?.as_ref()
    }

    pub fn function_mut_by_id(&mut self, id: u32) -> Option<&mut FunctionData> {
        self.functions.get_mut(id as usize)?.as_mut()
    }

    pub fn promise_mut_by_id(&mut self, id: u32) -> Option<&mut PromiseData> {
        self.promises.get_mut(id as usize)?.as_mut()
    }

    pub fn error_mut_by_id(&mut self, id: u32) -> Option<&mut ErrorData> {
        self.errors.get_mut(id as usize)?.as_mut()
    }

    /// Drop every side-table entry whose instance id wasn't seen as
    /// reachable during the collection that just finished — the
    /// replacement for the old `HashMap` mark-sweep, now run against
    /// side tables that back handles the Cheney pass already relocated
    /// (or didn't, in which case they're garbage by construction).
    ///
    /// `live` is keyed by `(tag, instance_id)` as observed *before*
    /// relocation — handle relocation never changes a handle's
    /// instance id, only its own arena offset, so the ids collected
    /// during the root walk are exactly the ids still valid afterward.
    pub fn retain_instances(&mut self, live: &HashMap<Tag, std::collections::HashSet<u32>>) {
        let empty = std::collections::HashSet::new();
        let keep = |tag: Tag| live.get(&tag).unwrap_or(&empty).clone();
        // Object and Array values share the same `objects` side table, so
        // an id reachable under either tag keeps that slot alive.
        let objs: std::collections::HashSet<u32> = keep(Tag::Object).union(&keep(Tag::Array)).copied().collect();
        for (i, slot) in self.objects.iter_mut().enumerate() {
            if !objs.contains(&(i as u32)) {
                *slot = None;
            }
        }
        let funcs = keep(Tag::Function);
        for (i, slot) in self.functions.iter_mut().enumerate() {
            if !funcs.contains(&(i as u32)) {
                *slot = None;
            }
        }
        let errs = keep(Tag::Error);
        for (i, slot) in self.errors.iter_mut().enumerate() {
            if !errs.contains(&(i as u32)) {
                *slot = None;
            }
        }
        let proms = keep(Tag::Promise);
        for (i, slot) in self.promises.iter_mut().enumerate() {
            if !proms.contains(&(i as u32)) {
                *slot = None;
            }
        }
        let bigints = keep(Tag::BigInt);
        for (i, slot) in self.bigints.iter_mut().enumerate() {
            if !bigints.contains(&(i as u32)) {
                *slot = None;
            }
        }
        let tarrs = keep(Tag::TypedArray);
        for (i, slot) in self.typed_arrays.iter_mut().enumerate() {
            if !tarrs.contains(&(i as u32)) {
                *slot = None;
            }
        }
    }
}
