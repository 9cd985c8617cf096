//! Tagged values and their lifetime discipline
//!
//! `Value` is the sum over everything a Rill program can touch. Primitives
//! are inline and trivially copyable. Heap variants hold `Arc` payloads:
//! the `Arc` strong count is the language's reference count (clone = retain,
//! drop = release), and its atomics satisfy the runtime's ordering contract.
//!
//! ## The freed flag
//!
//! The language exposes an explicit `free(x)` builtin alongside automatic
//! reference counting. Every heap payload therefore carries an atomic
//! `freed` flag: `free` drains the payload's contents under its lock and
//! sets the flag, after which reads observe sentinel values (null elements,
//! empty strings), mutations are silent no-ops, and the eventual `Arc` drop
//! releases nothing twice. Double-free and use-after-free are observable
//! without crashing.
//!
//! ## Sharing across tasks
//!
//! All heap payloads are `Send + Sync`: mutation goes through a `Mutex`,
//! the freed flag through `SeqCst` atomics. Cross-task aliasing of mutable
//! containers is discouraged at the language level (tasks deep-copy their
//! arguments; channels are the sanctioned path), but the runtime stays
//! memory-safe if a program does it anyway.

use crate::channel::ChannelObj;
use crate::env::Env;
use crate::file::FileObj;
use crate::hashidx::HashIndex;
use crate::socket::SocketObj;
use crate::task::TaskObj;
use rill_core::{FunctionDecl, Name, TypeTag};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A Rill value. ~20 variants: inline primitives plus reference-counted
/// heap payloads.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    /// A single Unicode codepoint.
    Rune(char),
    /// Opaque foreign pointer; only the FFI layer interprets it.
    Ptr(usize),
    Str(Arc<StrObj>),
    Buffer(Arc<BufferObj>),
    Array(Arc<ArrayObj>),
    Object(Arc<ObjectObj>),
    Function(Arc<FunctionObj>),
    Task(Arc<TaskObj>),
    Channel(Arc<ChannelObj>),
    File(Arc<FileObj>),
    Socket(Arc<SocketObj>),
}

impl Value {
    /// Convenience constructor for string values.
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(Arc::new(StrObj::new(s)))
    }

    /// Convenience constructor for arrays without an element-type tag.
    pub fn array(elems: Vec<Value>) -> Value {
        Value::Array(Arc::new(ArrayObj::new(elems, None)))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The runtime type name used in diagnostics and `typeof`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Rune(_) => "rune",
            Value::Ptr(_) => "ptr",
            Value::Str(_) => "string",
            Value::Buffer(_) => "buffer",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Task(_) => "task",
            Value::Channel(_) => "channel",
            Value::File(_) => "file",
            Value::Socket(_) => "socket",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::I8(_)
                | Value::I16(_)
                | Value::I32(_)
                | Value::I64(_)
                | Value::U8(_)
                | Value::U16(_)
                | Value::U32(_)
                | Value::U64(_)
                | Value::F32(_)
                | Value::F64(_)
        )
    }

    /// Integer value usable as a sequence index; floats are rejected so a
    /// fractional index is an error, not a truncation.
    pub fn as_index(&self) -> Option<i64> {
        match *self {
            Value::I8(n) => Some(i64::from(n)),
            Value::I16(n) => Some(i64::from(n)),
            Value::I32(n) => Some(i64::from(n)),
            Value::I64(n) => Some(n),
            Value::U8(n) => Some(i64::from(n)),
            Value::U16(n) => Some(i64::from(n)),
            Value::U32(n) => Some(i64::from(n)),
            Value::U64(n) => i64::try_from(n).ok(),
            _ => None,
        }
    }

    /// Truthiness for conditions: null and zero are false, everything else
    /// is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::I8(n) => *n != 0,
            Value::I16(n) => *n != 0,
            Value::I32(n) => *n != 0,
            Value::I64(n) => *n != 0,
            Value::U8(n) => *n != 0,
            Value::U16(n) => *n != 0,
            Value::U32(n) => *n != 0,
            Value::U64(n) => *n != 0,
            Value::F32(n) => *n != 0.0,
            Value::F64(n) => *n != 0.0,
            Value::Rune(c) => *c != '\0',
            Value::Str(s) => s.byte_len() > 0,
            _ => true,
        }
    }

    /// Does this value satisfy a type annotation?
    pub fn matches_tag(&self, tag: &TypeTag) -> bool {
        match (self, tag) {
            (Value::I8(_), TypeTag::I8)
            | (Value::I16(_), TypeTag::I16)
            | (Value::I32(_), TypeTag::I32)
            | (Value::I64(_), TypeTag::I64)
            | (Value::U8(_), TypeTag::U8)
            | (Value::U16(_), TypeTag::U16)
            | (Value::U32(_), TypeTag::U32)
            | (Value::U64(_), TypeTag::U64)
            | (Value::F32(_), TypeTag::F32)
            | (Value::F64(_), TypeTag::F64)
            | (Value::Bool(_), TypeTag::Bool)
            | (Value::Str(_), TypeTag::Str)
            | (Value::Rune(_), TypeTag::Rune)
            | (Value::Array(_), TypeTag::Array)
            | (Value::Object(_), TypeTag::Object)
            | (Value::Function(_), TypeTag::Function) => true,
            (Value::Object(o), TypeTag::Named(n)) => {
                o.type_name().is_some_and(|t| t.as_ref() == n.as_ref())
            }
            _ => false,
        }
    }

    /// Reference identity for heap variants; primitives are never
    /// identical, only equal.
    pub fn ref_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b),
            (Value::Buffer(a), Value::Buffer(b)) => Arc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Task(a), Value::Task(b)) => Arc::ptr_eq(a, b),
            (Value::Channel(a), Value::Channel(b)) => Arc::ptr_eq(a, b),
            (Value::File(a), Value::File(b)) => Arc::ptr_eq(a, b),
            (Value::Socket(a), Value::Socket(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Address of the heap payload, for cycle detection.
    pub fn heap_addr(&self) -> Option<usize> {
        match self {
            Value::Str(a) => Some(Arc::as_ptr(a) as usize),
            Value::Buffer(a) => Some(Arc::as_ptr(a) as usize),
            Value::Array(a) => Some(Arc::as_ptr(a) as usize),
            Value::Object(a) => Some(Arc::as_ptr(a) as usize),
            Value::Function(a) => Some(Arc::as_ptr(a) as usize),
            Value::Task(a) => Some(Arc::as_ptr(a) as usize),
            Value::Channel(a) => Some(Arc::as_ptr(a) as usize),
            Value::File(a) => Some(Arc::as_ptr(a) as usize),
            Value::Socket(a) => Some(Arc::as_ptr(a) as usize),
            _ => None,
        }
    }

    /// Recursive copy used at task spawn. Mutable containers (strings,
    /// buffers, arrays, objects) are cloned so writes through the copy are
    /// never observable from the original; functions, channels, files,
    /// sockets, and tasks are shared by reference — they are the explicit
    /// cross-task-shared types. A freed payload copies as null.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::Str(s) => {
                if s.is_freed() {
                    Value::Null
                } else {
                    Value::str(s.to_owned_string())
                }
            }
            Value::Buffer(b) => {
                if b.is_freed() {
                    Value::Null
                } else {
                    Value::Buffer(Arc::new(BufferObj::new(b.to_vec())))
                }
            }
            Value::Array(a) => {
                if a.is_freed() {
                    Value::Null
                } else {
                    let elems = a.snapshot().iter().map(Value::deep_copy).collect();
                    Value::Array(Arc::new(ArrayObj::new(elems, a.elem_type())))
                }
            }
            Value::Object(o) => {
                if o.is_freed() {
                    Value::Null
                } else {
                    let (names, values) = o.snapshot();
                    let values = values.iter().map(Value::deep_copy).collect();
                    Value::Object(Arc::new(ObjectObj::new(names, values, o.type_name())))
                }
            }
            other => other.clone(),
        }
    }

    /// Explicit `free(x)`: drains the payload and sets the freed flag.
    /// No-op on primitives and on already-freed payloads.
    pub fn free(&self) {
        match self {
            Value::Str(s) => s.free(),
            Value::Buffer(b) => b.free(),
            Value::Array(a) => a.free(),
            Value::Object(o) => o.free(),
            _ => {}
        }
    }
}

/// Render a float the way the JSON serializer does: shortest form, no
/// forced trailing `.0`, so `42.0` prints as `42`.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        format!("{f}")
    }
}

impl std::fmt::Display for Value {
    /// Human-facing rendering used by `print` and string interpolation.
    /// Strings print raw; arrays and objects print as JSON.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::I8(n) => write!(f, "{n}"),
            Value::I16(n) => write!(f, "{n}"),
            Value::I32(n) => write!(f, "{n}"),
            Value::I64(n) => write!(f, "{n}"),
            Value::U8(n) => write!(f, "{n}"),
            Value::U16(n) => write!(f, "{n}"),
            Value::U32(n) => write!(f, "{n}"),
            Value::U64(n) => write!(f, "{n}"),
            Value::F32(n) => write!(f, "{}", format_float(f64::from(*n))),
            Value::F64(n) => write!(f, "{}", format_float(*n)),
            Value::Rune(c) => write!(f, "{c}"),
            Value::Ptr(p) => write!(f, "<ptr {p:#x}>"),
            Value::Str(s) => s.read(|body| write!(f, "{body}")),
            Value::Buffer(b) => write!(f, "<buffer {} bytes>", b.len()),
            Value::Array(_) | Value::Object(_) => match crate::json::serialize(self) {
                Ok(s) => write!(f, "{s}"),
                Err(_) => write!(f, "<{}>", self.type_name()),
            },
            Value::Function(func) => match func.decl.name.as_deref() {
                Some(name) => write!(f, "<fn {name}>"),
                None => write!(f, "<fn>"),
            },
            Value::Task(t) => write!(f, "<task {}>", t.id()),
            Value::Channel(c) => write!(f, "<channel cap={}>", c.capacity()),
            Value::File(file) => write!(f, "<file {}>", file.path()),
            Value::Socket(s) => write!(f, "<socket fd={}>", s.fd()),
        }
    }
}

// ---------------------------------------------------------------------------
// String payload
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StrInner {
    bytes: String,
    /// Codepoint count, computed on first use and invalidated by any
    /// mutation of the byte content.
    char_len: Option<usize>,
}

/// Heap string: UTF-8 byte buffer with a cached codepoint count.
/// Mutable in place through indexed assignment.
#[derive(Debug)]
pub struct StrObj {
    freed: AtomicBool,
    inner: Mutex<StrInner>,
}

impl StrObj {
    pub fn new(s: impl Into<String>) -> Self {
        StrObj {
            freed: AtomicBool::new(false),
            inner: Mutex::new(StrInner {
                bytes: s.into(),
                char_len: None,
            }),
        }
    }

    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::SeqCst)
    }

    /// Drain the buffer and mark freed. Idempotent.
    pub fn free(&self) {
        if self.freed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut inner = self.inner.lock().expect("string payload lock poisoned");
        inner.bytes = String::new();
        inner.char_len = Some(0);
    }

    /// Read the contents; a freed string reads as empty.
    pub fn read<R>(&self, f: impl FnOnce(&str) -> R) -> R {
        let inner = self.inner.lock().expect("string payload lock poisoned");
        f(&inner.bytes)
    }

    pub fn to_owned_string(&self) -> String {
        self.read(|s| s.to_string())
    }

    pub fn byte_len(&self) -> usize {
        self.read(str::len)
    }

    /// Codepoint count, cached until the next mutation.
    pub fn char_len(&self) -> usize {
        let mut inner = self.inner.lock().expect("string payload lock poisoned");
        if let Some(n) = inner.char_len {
            return n;
        }
        let n = inner.bytes.chars().count();
        inner.char_len = Some(n);
        n
    }

    /// The rune at codepoint position `idx`.
    pub fn rune_at(&self, idx: usize) -> Option<char> {
        self.read(|s| s.chars().nth(idx))
    }

    /// Replace the rune at codepoint position `idx`. Returns false when out
    /// of bounds or freed. Invalidates the codepoint-count cache.
    pub fn set_rune(&self, idx: usize, c: char) -> bool {
        if self.is_freed() {
            return false;
        }
        let mut inner = self.inner.lock().expect("string payload lock poisoned");
        let Some((start, old)) = inner.bytes.char_indices().nth(idx) else {
            return false;
        };
        let end = start + old.len_utf8();
        inner.bytes.replace_range(start..end, c.encode_utf8(&mut [0u8; 4]));
        inner.char_len = None;
        true
    }

    pub fn content_eq(&self, other: &StrObj) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        self.read(|a| other.read(|b| a == b))
    }
}

// ---------------------------------------------------------------------------
// Buffer payload
// ---------------------------------------------------------------------------

/// Heap byte buffer, mutable in place.
#[derive(Debug)]
pub struct BufferObj {
    freed: AtomicBool,
    inner: Mutex<Vec<u8>>,
}

impl BufferObj {
    pub fn new(bytes: Vec<u8>) -> Self {
        BufferObj {
            freed: AtomicBool::new(false),
            inner: Mutex::new(bytes),
        }
    }

    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::SeqCst)
    }

    pub fn free(&self) {
        if self.freed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut inner = self.inner.lock().expect("buffer payload lock poisoned");
        inner.clear();
        inner.shrink_to_fit();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("buffer payload lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, idx: usize) -> Option<u8> {
        self.inner
            .lock()
            .expect("buffer payload lock poisoned")
            .get(idx)
            .copied()
    }

    /// Store a byte; false when out of bounds or freed.
    pub fn set(&self, idx: usize, b: u8) -> bool {
        if self.is_freed() {
            return false;
        }
        let mut inner = self.inner.lock().expect("buffer payload lock poisoned");
        match inner.get_mut(idx) {
            Some(slot) => {
                *slot = b;
                true
            }
            None => false,
        }
    }

    pub fn push(&self, b: u8) {
        if self.is_freed() {
            return;
        }
        self.inner.lock().expect("buffer payload lock poisoned").push(b);
    }

    pub fn extend(&self, bytes: &[u8]) {
        if self.is_freed() {
            return;
        }
        self.inner
            .lock()
            .expect("buffer payload lock poisoned")
            .extend_from_slice(bytes);
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.inner.lock().expect("buffer payload lock poisoned").clone()
    }

    pub fn content_eq(&self, other: &BufferObj) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        *self.inner.lock().expect("buffer payload lock poisoned")
            == *other.inner.lock().expect("buffer payload lock poisoned")
    }
}

// ---------------------------------------------------------------------------
// Array payload
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ArrayInner {
    elems: Vec<Value>,
    /// When set, every store must match this type.
    elem_type: Option<TypeTag>,
}

/// Heap array: growable element sequence with an optional element-type tag.
#[derive(Debug)]
pub struct ArrayObj {
    freed: AtomicBool,
    inner: Mutex<ArrayInner>,
}

/// Why an array store was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayStoreError {
    OutOfBounds,
    TypeMismatch(TypeTag),
}

impl ArrayObj {
    pub fn new(elems: Vec<Value>, elem_type: Option<TypeTag>) -> Self {
        ArrayObj {
            freed: AtomicBool::new(false),
            inner: Mutex::new(ArrayInner { elems, elem_type }),
        }
    }

    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::SeqCst)
    }

    /// Drain all elements (releasing each exactly once) and mark freed.
    pub fn free(&self) {
        if self.freed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut inner = self.inner.lock().expect("array payload lock poisoned");
        inner.elems.clear();
        inner.elems.shrink_to_fit();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("array payload lock poisoned").elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn elem_type(&self) -> Option<TypeTag> {
        self.inner
            .lock()
            .expect("array payload lock poisoned")
            .elem_type
            .clone()
    }

    /// Element at `idx`; a freed array reads every slot as null.
    pub fn get(&self, idx: usize) -> Option<Value> {
        if self.is_freed() {
            return Some(Value::Null);
        }
        self.inner
            .lock()
            .expect("array payload lock poisoned")
            .elems
            .get(idx)
            .cloned()
    }

    /// Replace the element at `idx`, enforcing the element-type tag.
    /// The old value's retain is released by the overwrite.
    pub fn set(&self, idx: usize, value: Value) -> Result<(), ArrayStoreError> {
        if self.is_freed() {
            return Ok(());
        }
        let mut inner = self.inner.lock().expect("array payload lock poisoned");
        if let Some(tag) = &inner.elem_type {
            if !value.matches_tag(tag) {
                return Err(ArrayStoreError::TypeMismatch(tag.clone()));
            }
        }
        match inner.elems.get_mut(idx) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ArrayStoreError::OutOfBounds),
        }
    }

    pub fn push(&self, value: Value) -> Result<(), ArrayStoreError> {
        if self.is_freed() {
            return Ok(());
        }
        let mut inner = self.inner.lock().expect("array payload lock poisoned");
        if let Some(tag) = &inner.elem_type {
            if !value.matches_tag(tag) {
                return Err(ArrayStoreError::TypeMismatch(tag.clone()));
            }
        }
        inner.elems.push(value);
        Ok(())
    }

    pub fn pop(&self) -> Option<Value> {
        if self.is_freed() {
            return None;
        }
        self.inner.lock().expect("array payload lock poisoned").elems.pop()
    }

    pub fn insert(&self, idx: usize, value: Value) -> Result<(), ArrayStoreError> {
        if self.is_freed() {
            return Ok(());
        }
        let mut inner = self.inner.lock().expect("array payload lock poisoned");
        if let Some(tag) = &inner.elem_type {
            if !value.matches_tag(tag) {
                return Err(ArrayStoreError::TypeMismatch(tag.clone()));
            }
        }
        if idx > inner.elems.len() {
            return Err(ArrayStoreError::OutOfBounds);
        }
        inner.elems.insert(idx, value);
        Ok(())
    }

    pub fn remove(&self, idx: usize) -> Option<Value> {
        if self.is_freed() {
            return None;
        }
        let mut inner = self.inner.lock().expect("array payload lock poisoned");
        if idx < inner.elems.len() {
            Some(inner.elems.remove(idx))
        } else {
            None
        }
    }

    /// Clone the current elements out; iteration works on this snapshot so
    /// a body that mutates the array cannot invalidate the walk.
    pub fn snapshot(&self) -> Vec<Value> {
        self.inner.lock().expect("array payload lock poisoned").elems.clone()
    }
}

// ---------------------------------------------------------------------------
// Object payload
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ObjectInner {
    names: Vec<Name>,
    values: Vec<Value>,
    /// User-declared type name, when constructed through a `type`.
    type_name: Option<Name>,
    /// Built on first lookup; parsed JSON objects start without one.
    index: Option<HashIndex>,
}

/// Heap object: ordered field-name/field-value vectors with a lazily built
/// hash index.
#[derive(Debug)]
pub struct ObjectObj {
    freed: AtomicBool,
    inner: Mutex<ObjectInner>,
}

impl ObjectObj {
    pub fn new(names: Vec<Name>, values: Vec<Value>, type_name: Option<Name>) -> Self {
        debug_assert_eq!(names.len(), values.len());
        ObjectObj {
            freed: AtomicBool::new(false),
            inner: Mutex::new(ObjectInner {
                names,
                values,
                type_name,
                index: None,
            }),
        }
    }

    pub fn empty() -> Self {
        ObjectObj::new(Vec::new(), Vec::new(), None)
    }

    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::SeqCst)
    }

    pub fn free(&self) {
        if self.freed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut inner = self.inner.lock().expect("object payload lock poisoned");
        inner.names.clear();
        inner.values.clear();
        inner.index = None;
    }

    pub fn type_name(&self) -> Option<Name> {
        self.inner
            .lock()
            .expect("object payload lock poisoned")
            .type_name
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("object payload lock poisoned").names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Field value by name; builds the hash index on first use.
    pub fn get(&self, name: &str) -> Option<Value> {
        if self.is_freed() {
            return None;
        }
        let mut inner = self.inner.lock().expect("object payload lock poisoned");
        let inner = &mut *inner;
        if inner.index.is_none() {
            inner.index = Some(HashIndex::build(&inner.names));
        }
        let idx = inner
            .index
            .as_ref()
            .and_then(|ix| ix.lookup(name, &inner.names))?;
        Some(inner.values[idx].clone())
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Add or update a field; returns true when the field was added.
    /// Updating releases the prior value. No-op on a freed object.
    pub fn set(&self, name: Name, value: Value) -> bool {
        if self.is_freed() {
            return false;
        }
        let mut inner = self.inner.lock().expect("object payload lock poisoned");
        let inner = &mut *inner;
        if inner.index.is_none() {
            inner.index = Some(HashIndex::build(&inner.names));
        }
        if let Some(idx) = inner
            .index
            .as_ref()
            .and_then(|ix| ix.lookup(&name, &inner.names))
        {
            inner.values[idx] = value;
            return false;
        }
        let pos = inner.names.len();
        inner.names.push(name.clone());
        inner.values.push(value);
        match inner.index.as_mut() {
            Some(ix) if !ix.needs_grow(pos + 1) => ix.insert_unchecked(&name, pos),
            _ => inner.index = Some(HashIndex::build(&inner.names)),
        }
        true
    }

    /// Remove a field, preserving the order of the rest.
    pub fn delete(&self, name: &str) -> bool {
        if self.is_freed() {
            return false;
        }
        let mut inner = self.inner.lock().expect("object payload lock poisoned");
        let Some(idx) = inner.names.iter().position(|n| n.as_ref() == name) else {
            return false;
        };
        inner.names.remove(idx);
        inner.values.remove(idx);
        // Positions shifted; the index is rebuilt on the next lookup.
        inner.index = None;
        true
    }

    pub fn keys(&self) -> Vec<Name> {
        self.inner.lock().expect("object payload lock poisoned").names.clone()
    }

    /// Clone field names and values out in insertion order.
    pub fn snapshot(&self) -> (Vec<Name>, Vec<Value>) {
        let inner = self.inner.lock().expect("object payload lock poisoned");
        (inner.names.clone(), inner.values.clone())
    }
}

// ---------------------------------------------------------------------------
// Function payload
// ---------------------------------------------------------------------------

/// A function value: a shared declaration plus a captured environment.
///
/// The bound-method form shares `decl` (and with it every parameter array
/// and the body) with its original by `Arc`; only the captured scope — where
/// `self` is defined — differs. Dropping a bound method therefore never
/// frees the shared declaration.
///
/// `captured` is clearable so the runtime can break closure↔environment
/// cycles at root teardown; it is never mutated otherwise.
#[derive(Debug)]
pub struct FunctionObj {
    pub decl: Arc<FunctionDecl>,
    captured: Mutex<Option<Arc<Env>>>,
    pub is_bound: bool,
}

impl FunctionObj {
    pub fn new(decl: Arc<FunctionDecl>, captured: Arc<Env>) -> Self {
        FunctionObj {
            decl,
            captured: Mutex::new(Some(captured)),
            is_bound: false,
        }
    }

    /// The bound-method constructor: same declaration, a new captured scope.
    pub fn bound(decl: Arc<FunctionDecl>, captured: Arc<Env>) -> Self {
        FunctionObj {
            decl,
            captured: Mutex::new(Some(captured)),
            is_bound: true,
        }
    }

    pub fn captured_env(&self) -> Option<Arc<Env>> {
        self.captured
            .lock()
            .expect("function captured-env lock poisoned")
            .clone()
    }

    /// Phase one of cycle teardown: drop the captured-environment link.
    pub fn clear_captured(&self) {
        self.captured
            .lock()
            .expect("function captured-env lock poisoned")
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arc_strong_count_is_the_refcount() {
        let a = Value::array(vec![Value::I32(1)]);
        let Value::Array(payload) = &a else { unreachable!() };
        assert_eq!(Arc::strong_count(payload), 1);
        let b = a.clone(); // retain
        assert_eq!(Arc::strong_count(payload), 2);
        drop(b); // release
        assert_eq!(Arc::strong_count(payload), 1);
    }

    #[test]
    fn test_free_is_idempotent_and_reads_sentinels() {
        let arr = ArrayObj::new(vec![Value::I32(1), Value::I32(2)], None);
        arr.free();
        arr.free(); // double free observable, not fatal
        assert!(arr.is_freed());
        assert_eq!(arr.len(), 0);
        // Use-after-free reads a sentinel instead of crashing.
        assert!(matches!(arr.get(0), Some(Value::Null)));
        // Mutation after free is a silent no-op.
        assert!(arr.push(Value::I32(3)).is_ok());
        assert_eq!(arr.len(), 0);
    }

    #[test]
    fn test_freed_string_reads_empty() {
        let s = StrObj::new("hello");
        s.free();
        assert_eq!(s.to_owned_string(), "");
        assert_eq!(s.char_len(), 0);
        assert!(!s.set_rune(0, 'x'));
    }

    #[test]
    fn test_char_len_cache_invalidated_by_mutation() {
        let s = StrObj::new("héllo");
        assert_eq!(s.char_len(), 5);
        assert!(s.set_rune(1, 'e'));
        assert_eq!(s.char_len(), 5);
        assert_eq!(s.to_owned_string(), "hello");
        // Multi-byte replacement changes byte length but not codepoints.
        assert!(s.set_rune(0, 'ﾊ'));
        assert_eq!(s.char_len(), 5);
    }

    #[test]
    fn test_element_type_tag_enforced() {
        let arr = ArrayObj::new(vec![Value::I32(1)], Some(TypeTag::I32));
        assert!(arr.push(Value::I32(2)).is_ok());
        assert_eq!(
            arr.push(Value::str("nope")),
            Err(ArrayStoreError::TypeMismatch(TypeTag::I32))
        );
        assert_eq!(
            arr.set(0, Value::F64(1.0)),
            Err(ArrayStoreError::TypeMismatch(TypeTag::I32))
        );
    }

    #[test]
    fn test_object_field_order_preserved() {
        let obj = ObjectObj::empty();
        obj.set(Arc::from("a"), Value::I32(1));
        obj.set(Arc::from("b"), Value::I32(2));
        obj.set(Arc::from("c"), Value::I32(3));
        obj.delete("b");
        let keys: Vec<String> = obj.keys().iter().map(|n| n.to_string()).collect();
        assert_eq!(keys, ["a", "c"]);
    }

    #[test]
    fn test_object_update_replaces_in_place() {
        let obj = ObjectObj::empty();
        assert!(obj.set(Arc::from("x"), Value::I32(1)));
        assert!(!obj.set(Arc::from("x"), Value::I32(2)));
        assert_eq!(obj.len(), 1);
        assert!(matches!(obj.get("x"), Some(Value::I32(2))));
    }

    #[test]
    fn test_deep_copy_isolates_mutable_containers() {
        let inner = Value::array(vec![Value::I32(1)]);
        let outer = Value::array(vec![inner.clone(), Value::str("s")]);
        let copy = outer.deep_copy();
        let Value::Array(copy_arr) = &copy else { unreachable!() };
        let Value::Array(copy_inner) = copy_arr.get(0).unwrap() else {
            panic!("expected inner array");
        };
        copy_inner.push(Value::I32(99)).unwrap();
        // The original inner array is untouched.
        let Value::Array(orig_inner) = &inner else { unreachable!() };
        assert_eq!(orig_inner.len(), 1);
    }

    #[test]
    fn test_deep_copy_shares_channels() {
        let ch = Value::Channel(Arc::new(ChannelObj::new(1)));
        let arr = Value::array(vec![ch.clone()]);
        let copy = arr.deep_copy();
        let Value::Array(copy_arr) = &copy else { unreachable!() };
        assert!(copy_arr.get(0).unwrap().ref_eq(&ch));
    }

    #[test]
    fn test_ref_eq_vs_content_eq_for_strings() {
        let a = Value::str("same");
        let b = Value::str("same");
        assert!(!a.ref_eq(&b));
        let (Value::Str(sa), Value::Str(sb)) = (&a, &b) else {
            unreachable!()
        };
        assert!(sa.content_eq(sb));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::I32(0).is_truthy());
        assert!(Value::I32(-1).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(Value::str("x").is_truthy());
        assert!(Value::array(vec![]).is_truthy());
    }

    #[test]
    fn test_display_format() {
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::F64(42.0).to_string(), "42");
        assert_eq!(Value::F64(2.5).to_string(), "2.5");
        assert_eq!(Value::Rune('x').to_string(), "x");
        assert_eq!(Value::str("hi").to_string(), "hi");
    }

    #[test]
    fn test_values_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Value>();
    }
}
