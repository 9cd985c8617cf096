//! The runtime object
//!
//! Owns the process-wide pieces the interpreter needs behind one handle:
//! the signal-handler table, the foreign-function registry, user type
//! definitions, the module cache, and the root environment. The
//! environment frame pool and the worker pool are process-global (lazily
//! initialized, mutex-guarded); this object is their owner in the
//! API sense — the CLI builds one `Runtime` and tears it down once.
//!
//! ## Teardown and reference cycles
//!
//! Closures capture the environment that holds them, so the root scope
//! forms reference cycles that plain reference counting cannot reclaim.
//! `shutdown` performs the two-phase drop: phase one walks every value
//! reachable from the root (and from module exports), clearing each
//! function's captured-environment link; phase two clears the root frame
//! and lets ordinary reference counting collapse the rest.

use crate::env::Env;
use crate::error::{ErrorKind, RillError};
use crate::ffi::ForeignFn;
use crate::signal::SignalTable;
use crate::value::Value;
use rill_core::{Name, Program, TypeTag};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Exported bindings of an executed module, in declaration order.
#[derive(Debug, Default)]
pub struct ModuleExports {
    pub names: Vec<Name>,
    pub values: Vec<Value>,
}

impl ModuleExports {
    pub fn get(&self, name: &str) -> Option<Value> {
        self.names
            .iter()
            .position(|n| n.as_ref() == name)
            .map(|i| self.values[i].clone())
    }
}

/// Module loading state; `Loading` marks an import currently executing, so
/// a back-edge to it is a circular dependency.
enum ModuleState {
    Loading,
    Loaded(Arc<ModuleExports>),
}

/// Supplies parsed module ASTs. The frontend provides the filesystem
/// implementation; embedders may substitute their own.
pub trait ModuleResolver: Send + Sync {
    /// Resolve `path` relative to the importing module's directory,
    /// returning a canonical key for caching plus the parsed program.
    fn load(&self, path: &str, importer_dir: &Path) -> Result<(PathBuf, Arc<Program>), String>;
}

#[derive(Default)]
pub struct Runtime {
    pub signals: SignalTable,
    foreign: Mutex<HashMap<Name, ForeignFn>>,
    type_defs: Mutex<HashMap<Name, Arc<Vec<(Name, TypeTag)>>>>,
    resolver: Mutex<Option<Box<dyn ModuleResolver>>>,
    modules: Mutex<HashMap<PathBuf, ModuleState>>,
    root: Mutex<Option<Arc<Env>>>,
}

impl Runtime {
    pub fn new() -> Arc<Runtime> {
        Arc::new(Runtime::default())
    }

    /// The worker pool (started on first use).
    pub fn pool(&self) -> &'static Arc<crate::pool::ThreadPool> {
        crate::pool::global()
    }

    pub fn set_resolver(&self, resolver: Box<dyn ModuleResolver>) {
        *self.resolver.lock().expect("resolver lock poisoned") = Some(resolver);
    }

    /// Remember the root environment for teardown.
    pub fn set_root(&self, env: Arc<Env>) {
        *self.root.lock().expect("runtime root lock poisoned") = Some(env);
    }

    // -- foreign functions --------------------------------------------------

    pub fn register_foreign(&self, name: Name, func: ForeignFn) {
        self.foreign
            .lock()
            .expect("foreign registry lock poisoned")
            .insert(name, func);
    }

    pub fn foreign_fn(&self, name: &str) -> Option<ForeignFn> {
        self.foreign
            .lock()
            .expect("foreign registry lock poisoned")
            .get(name)
            .cloned()
    }

    // -- user-defined object types ------------------------------------------

    pub fn define_type(&self, name: Name, fields: Vec<(Name, TypeTag)>) {
        self.type_defs
            .lock()
            .expect("type registry lock poisoned")
            .insert(name, Arc::new(fields));
    }

    pub fn type_fields(&self, name: &str) -> Option<Arc<Vec<(Name, TypeTag)>>> {
        self.type_defs
            .lock()
            .expect("type registry lock poisoned")
            .get(name)
            .cloned()
    }

    // -- modules ------------------------------------------------------------

    /// Load a module for import. The heavy lifting (execution) happens in
    /// the evaluator; this guards the cache and catches circular imports
    /// before execution begins.
    pub fn begin_import(
        &self,
        path: &str,
        importer_dir: &Path,
    ) -> Result<ImportTicket, RillError> {
        let (key, program) = {
            let resolver = self.resolver.lock().expect("resolver lock poisoned");
            let resolver = resolver.as_ref().ok_or_else(|| {
                RillError::new(ErrorKind::Module, "no module resolver is installed")
            })?;
            resolver
                .load(path, importer_dir)
                .map_err(|e| RillError::new(ErrorKind::Module, e))?
        };
        let mut modules = self.modules.lock().expect("module cache lock poisoned");
        match modules.get(&key) {
            Some(ModuleState::Loaded(exports)) => {
                return Ok(ImportTicket::Cached(Arc::clone(exports)));
            }
            Some(ModuleState::Loading) => {
                return Err(RillError::new(
                    ErrorKind::Module,
                    format!("circular import of '{path}'"),
                ));
            }
            None => {}
        }
        modules.insert(key.clone(), ModuleState::Loading);
        Ok(ImportTicket::Execute { key, program })
    }

    /// Record a finished module execution.
    pub fn finish_import(&self, key: PathBuf, exports: Arc<ModuleExports>) {
        self.modules
            .lock()
            .expect("module cache lock poisoned")
            .insert(key, ModuleState::Loaded(exports));
    }

    /// Roll back a failed module execution so a later import can retry.
    pub fn abort_import(&self, key: &Path) {
        self.modules
            .lock()
            .expect("module cache lock poisoned")
            .remove(key);
    }

    // -- teardown -----------------------------------------------------------

    /// Two-phase drop of the root scope graph. Safe to call more than
    /// once; later calls find no root.
    pub fn shutdown(&self) {
        let root = self.root.lock().expect("runtime root lock poisoned").take();
        let mut worklist: Vec<Value> = Vec::new();
        if let Some(root) = &root {
            for (_, v) in root.bindings_snapshot() {
                worklist.push(v);
            }
        }
        {
            let modules = self.modules.lock().expect("module cache lock poisoned");
            for state in modules.values() {
                if let ModuleState::Loaded(exports) = state {
                    worklist.extend(exports.values.iter().cloned());
                }
            }
        }

        // Phase one: null every reachable closure's captured-environment
        // link. Environments discovered through closures are walked too, so
        // indirectly captured closures are found.
        let mut visited = std::collections::HashSet::new();
        while let Some(value) = worklist.pop() {
            let Some(addr) = value.heap_addr() else { continue };
            if !visited.insert(addr) {
                continue;
            }
            match &value {
                Value::Array(a) => worklist.extend(a.snapshot()),
                Value::Object(o) => worklist.extend(o.snapshot().1),
                Value::Function(f) => {
                    if let Some(env) = f.captured_env() {
                        let mut frame = Some(env);
                        while let Some(e) = frame {
                            if visited.insert(Arc::as_ptr(&e) as usize) {
                                for (_, v) in e.bindings_snapshot() {
                                    worklist.push(v);
                                }
                            }
                            frame = e.parent().cloned();
                        }
                    }
                    f.clear_captured();
                }
                _ => {}
            }
        }

        // Phase two: drop the root's own bindings; refcounts collapse the
        // rest.
        if let Some(root) = root {
            root.clear();
        }
        tracing::debug!("runtime shut down");
    }
}

/// Outcome of `begin_import`.
#[derive(Debug)]
pub enum ImportTicket {
    /// Already executed; use these exports.
    Cached(Arc<ModuleExports>),
    /// Execute this program, then call `finish_import` (or `abort_import`
    /// on failure).
    Execute { key: PathBuf, program: Arc<Program> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_breaks_closure_cycles() {
        use rill_core::{Block, FunctionDecl, Span};
        let rt = Runtime::new();
        let root = Env::new_root();
        // A closure capturing the root that also lives in the root: a
        // cycle plain refcounting cannot free.
        let decl = Arc::new(FunctionDecl {
            name: Some(Arc::from("f")),
            is_async: false,
            params: vec![],
            rest_param: None,
            return_type: None,
            body: Arc::new(Block::default()),
            span: Span::new(1, 1),
        });
        let func = Arc::new(crate::value::FunctionObj::new(decl, Arc::clone(&root)));
        root.define(Arc::from("f"), Value::Function(Arc::clone(&func)), false)
            .unwrap();
        rt.set_root(Arc::clone(&root));

        let weak = Arc::downgrade(&root);
        drop(root);
        // Still alive: the cycle holds it.
        assert!(weak.upgrade().is_some());
        rt.shutdown();
        assert!(func.captured_env().is_none());
        drop(func);
        assert!(weak.upgrade().is_none(), "cycle should be reclaimed");
        // Idempotent.
        rt.shutdown();
    }

    #[test]
    fn test_import_without_resolver_is_module_error() {
        let rt = Runtime::new();
        let err = rt.begin_import("x", Path::new(".")).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Module));
    }

    #[test]
    fn test_circular_import_detected() {
        struct Fake;
        impl ModuleResolver for Fake {
            fn load(
                &self,
                path: &str,
                _importer_dir: &Path,
            ) -> Result<(PathBuf, Arc<Program>), String> {
                Ok((PathBuf::from(path), Arc::new(Program::default())))
            }
        }
        let rt = Runtime::new();
        rt.set_resolver(Box::new(Fake));
        let ticket = rt.begin_import("a", Path::new(".")).unwrap();
        assert!(matches!(ticket, ImportTicket::Execute { .. }));
        // While "a" executes, importing it again is a cycle.
        let err = rt.begin_import("a", Path::new(".")).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Module));
        assert!(err.to_string().contains("circular"));
        // After it finishes, imports hit the cache.
        rt.finish_import(PathBuf::from("a"), Arc::new(ModuleExports::default()));
        let ticket = rt.begin_import("a", Path::new(".")).unwrap();
        assert!(matches!(ticket, ImportTicket::Cached(_)));
    }
}
