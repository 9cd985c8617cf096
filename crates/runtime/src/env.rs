//! Lexically scoped environments
//!
//! A scope frame holds parallel name/value/const vectors plus an
//! open-addressing hash index, and links to its parent frame by `Arc`.
//! Frames are created on function, block, and loop entry and die when their
//! reference count reaches zero — which can be long after the lexical scope
//! exits, because closures keep their captured frame alive.
//!
//! ## Pooling
//!
//! Frame storage comes from a process-global free-list pool (lazily
//! initialized, mutex-guarded, fixed size). A frame returned to the pool
//! with grown backing vectors is reset to the pool-default storage first,
//! so the pool only ever holds default-capacity frames.
//!
//! ## Lookup discipline
//!
//! Slot 0 of each frame is compared directly before the hash index is
//! consulted: the first binding of a frame is commonly a function parameter
//! or a loop counter, and that one comparison wins often enough to matter
//! on the interpreter's hottest path.

use crate::error::{ErrorKind, RillError};
use crate::hashidx::HashIndex;
use crate::value::Value;
use rill_core::Name;
use std::sync::{Arc, Mutex, OnceLock};

/// Default per-frame binding capacity; frames that grow past it are reset
/// before being pooled.
const DEFAULT_FRAME_CAPACITY: usize = 8;

/// Maximum frames kept in the free-list pool.
const POOL_CAPACITY: usize = 64;

#[derive(Debug)]
struct EnvInner {
    names: Vec<Name>,
    values: Vec<Value>,
    consts: Vec<bool>,
    index: HashIndex,
}

impl EnvInner {
    fn fresh() -> Self {
        EnvInner {
            names: Vec::with_capacity(DEFAULT_FRAME_CAPACITY),
            values: Vec::with_capacity(DEFAULT_FRAME_CAPACITY),
            consts: Vec::with_capacity(DEFAULT_FRAME_CAPACITY),
            index: HashIndex::with_capacity(DEFAULT_FRAME_CAPACITY),
        }
    }

    fn reset(&mut self) {
        self.names.clear();
        self.values.clear();
        self.consts.clear();
        if self.names.capacity() > DEFAULT_FRAME_CAPACITY {
            // Grown storage is discarded; the pool holds default frames only.
            *self = EnvInner::fresh();
        } else {
            self.index = HashIndex::with_capacity(DEFAULT_FRAME_CAPACITY);
        }
    }

    fn find(&self, name: &str) -> Option<usize> {
        // Slot-0 fast path before hashing.
        if let Some(first) = self.names.first() {
            if first.as_ref() == name {
                return Some(0);
            }
        }
        self.index.lookup(name, &self.names)
    }

    fn push_binding(&mut self, name: Name, value: Value, is_const: bool) {
        let pos = self.names.len();
        if self.index.needs_grow(pos + 1) {
            self.names.push(name);
            self.values.push(value);
            self.consts.push(is_const);
            self.index = HashIndex::build(&self.names);
        } else {
            self.index.insert_unchecked(&name, pos);
            self.names.push(name);
            self.values.push(value);
            self.consts.push(is_const);
        }
    }
}

static FRAME_POOL: OnceLock<Mutex<Vec<EnvInner>>> = OnceLock::new();

fn pool() -> &'static Mutex<Vec<EnvInner>> {
    FRAME_POOL.get_or_init(|| {
        let mut frames = Vec::with_capacity(POOL_CAPACITY);
        for _ in 0..POOL_CAPACITY {
            frames.push(EnvInner::fresh());
        }
        Mutex::new(frames)
    })
}

fn acquire_frame() -> EnvInner {
    pool()
        .lock()
        .expect("environment pool lock poisoned")
        .pop()
        .unwrap_or_else(EnvInner::fresh)
}

fn release_frame(mut inner: EnvInner) {
    inner.reset();
    let mut guard = pool().lock().expect("environment pool lock poisoned");
    if guard.len() < POOL_CAPACITY {
        guard.push(inner);
    }
}

/// Number of frames currently available in the pool (diagnostics/tests).
pub fn pooled_frame_count() -> usize {
    pool().lock().expect("environment pool lock poisoned").len()
}

/// The outcome of attempting to assign within a single frame.
enum LocalSet {
    NotFound(Value),
    Done,
    Const,
}

/// A scope frame. All mutation goes through the interior mutex; the frame
/// itself is shared by `Arc` with every closure that captured it.
#[derive(Debug)]
pub struct Env {
    parent: Option<Arc<Env>>,
    inner: Mutex<EnvInner>,
}

impl Env {
    pub fn new_root() -> Arc<Env> {
        Arc::new(Env {
            parent: None,
            inner: Mutex::new(acquire_frame()),
        })
    }

    pub fn child(parent: &Arc<Env>) -> Arc<Env> {
        Arc::new(Env {
            parent: Some(Arc::clone(parent)),
            inner: Mutex::new(acquire_frame()),
        })
    }

    pub fn parent(&self) -> Option<&Arc<Env>> {
        self.parent.as_ref()
    }

    /// Bind `name` in this frame. Fails with `NameError` if the name is
    /// already bound here (shadowing an outer binding is fine).
    pub fn define(&self, name: Name, value: Value, is_const: bool) -> Result<(), RillError> {
        let mut inner = self.inner.lock().expect("environment frame lock poisoned");
        if inner.find(&name).is_some() {
            return Err(RillError::new(
                ErrorKind::Name,
                format!("'{name}' is already defined in this scope"),
            ));
        }
        inner.push_binding(name, value, is_const);
        Ok(())
    }

    fn set_local(&self, name: &str, value: Value) -> LocalSet {
        let mut inner = self.inner.lock().expect("environment frame lock poisoned");
        match inner.find(name) {
            Some(idx) => {
                if inner.consts[idx] {
                    LocalSet::Const
                } else {
                    // Releases the prior value, retains the new one.
                    inner.values[idx] = value;
                    LocalSet::Done
                }
            }
            None => LocalSet::NotFound(value),
        }
    }

    /// Assign to the innermost binding of `name`, walking the parent chain.
    /// A const binding fails with `ConstError`; an unbound name creates a
    /// new mutable binding in this frame.
    pub fn set(self: &Arc<Env>, name: &Name, value: Value) -> Result<(), RillError> {
        let mut value = value;
        let mut frame: &Arc<Env> = self;
        loop {
            match frame.set_local(name, value) {
                LocalSet::Done => return Ok(()),
                LocalSet::Const => {
                    return Err(RillError::new(
                        ErrorKind::Const,
                        format!("cannot assign to const '{name}'"),
                    ));
                }
                LocalSet::NotFound(v) => value = v,
            }
            match &frame.parent {
                Some(p) => frame = p,
                None => break,
            }
        }
        let mut inner = self.inner.lock().expect("environment frame lock poisoned");
        inner.push_binding(name.clone(), value, false);
        Ok(())
    }

    fn get_local(&self, name: &str) -> Option<Value> {
        let inner = self.inner.lock().expect("environment frame lock poisoned");
        inner.find(name).map(|idx| inner.values[idx].clone())
    }

    /// Look `name` up along the parent chain; the returned value carries a
    /// fresh retain.
    pub fn get(&self, name: &str) -> Result<Value, RillError> {
        let mut frame = self;
        loop {
            if let Some(v) = frame.get_local(name) {
                return Ok(v);
            }
            match &frame.parent {
                Some(p) => frame = p.as_ref(),
                None => {
                    return Err(RillError::new(
                        ErrorKind::Name,
                        format!("'{name}' is not defined"),
                    ));
                }
            }
        }
    }

    /// Is `name` bound anywhere along the chain?
    pub fn is_bound(&self, name: &str) -> bool {
        let mut frame = self;
        loop {
            if frame.get_local(name).is_some() {
                return true;
            }
            match &frame.parent {
                Some(p) => frame = p.as_ref(),
                None => return false,
            }
        }
    }

    /// Clone out this frame's bindings (module export collection, cycle
    /// teardown walks).
    pub fn bindings_snapshot(&self) -> Vec<(Name, Value)> {
        let inner = self.inner.lock().expect("environment frame lock poisoned");
        inner
            .names
            .iter()
            .cloned()
            .zip(inner.values.iter().cloned())
            .collect()
    }

    /// Drop every binding in this frame (phase two of root teardown).
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("environment frame lock poisoned");
        inner.reset();
    }
}

impl Drop for Env {
    fn drop(&mut self) {
        // The mutex is uncontended here (we hold the last reference); move
        // the storage back to the pool.
        if let Ok(inner) = self.inner.get_mut() {
            let inner = std::mem::replace(inner, EnvInner::fresh());
            release_frame(inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        Arc::from(s)
    }

    #[test]
    fn test_define_get_roundtrip() {
        let env = Env::new_root();
        env.define(name("x"), Value::I32(42), false).unwrap();
        assert!(matches!(env.get("x"), Ok(Value::I32(42))));
    }

    #[test]
    fn test_duplicate_define_is_name_error() {
        let env = Env::new_root();
        env.define(name("x"), Value::I32(1), false).unwrap();
        let err = env.define(name("x"), Value::I32(2), false).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Name));
    }

    #[test]
    fn test_get_unbound_is_name_error() {
        let env = Env::new_root();
        let err = env.get("missing").unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Name));
    }

    #[test]
    fn test_set_walks_parent_chain() {
        let root = Env::new_root();
        root.define(name("x"), Value::I32(1), false).unwrap();
        let inner = Env::child(&root);
        inner.set(&name("x"), Value::I32(2)).unwrap();
        // The assignment landed on the root binding, not a shadow.
        assert!(matches!(root.get("x"), Ok(Value::I32(2))));
        assert!(matches!(inner.get("x"), Ok(Value::I32(2))));
    }

    #[test]
    fn test_set_unbound_defines_in_innermost() {
        let root = Env::new_root();
        let inner = Env::child(&root);
        inner.set(&name("y"), Value::I32(7)).unwrap();
        assert!(matches!(inner.get("y"), Ok(Value::I32(7))));
        assert!(root.get("y").is_err());
    }

    #[test]
    fn test_const_binding_rejects_assignment() {
        let env = Env::new_root();
        env.define(name("k"), Value::I32(1), true).unwrap();
        let err = env.set(&name("k"), Value::I32(2)).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Const));
        // The binding is const, not the pointed-to object: mutating through
        // a const-bound object value still works.
        let obj = Value::Object(Arc::new(crate::value::ObjectObj::empty()));
        env.define(name("o"), obj.clone(), true).unwrap();
        if let Value::Object(o) = &obj {
            o.set(name("field"), Value::I32(1));
            assert!(o.has("field"));
        }
    }

    #[test]
    fn test_shadowing_in_child_frame() {
        let root = Env::new_root();
        root.define(name("x"), Value::I32(1), false).unwrap();
        let inner = Env::child(&root);
        inner.define(name("x"), Value::I32(2), false).unwrap();
        assert!(matches!(inner.get("x"), Ok(Value::I32(2))));
        assert!(matches!(root.get("x"), Ok(Value::I32(1))));
    }

    #[test]
    fn test_many_bindings_grow_index() {
        let env = Env::new_root();
        for i in 0..100 {
            env.define(name(&format!("v{i}")), Value::I32(i), false)
                .unwrap();
        }
        for i in 0..100 {
            assert!(matches!(env.get(&format!("v{i}")), Ok(Value::I32(n)) if n == i));
        }
    }

    #[test]
    fn test_closure_keeps_frame_alive() {
        let root = Env::new_root();
        let captured = {
            let inner = Env::child(&root);
            inner.define(name("x"), Value::I32(9), false).unwrap();
            Arc::clone(&inner)
        };
        // The lexical scope exited; the frame is still readable.
        assert!(matches!(captured.get("x"), Ok(Value::I32(9))));
    }

    #[test]
    #[serial_test::serial(env_pool)]
    fn test_frames_return_to_pool() {
        // Drain a batch of frames, then verify dropping them refills the
        // pool to where it started.
        let envs: Vec<_> = (0..8).map(|_| Env::new_root()).collect();
        drop(envs);
        // Other tests share the pool, so the exact count is not stable;
        // the 8 frames just returned put a floor under it.
        assert!(pooled_frame_count() >= 8);
        assert!(pooled_frame_count() <= POOL_CAPACITY);
    }
}
