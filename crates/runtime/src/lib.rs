//! Rill Runtime: the execution core of the Rill language
//!
//! Key design principles:
//! - Value: a tagged sum with inline primitives and `Arc`-counted heap
//!   payloads; clone is retain, drop is release, and an atomic freed flag
//!   makes explicit `free` coexist with reference counting.
//! - Environment: pooled scope frames with a DJB2 hash index and an `Arc`
//!   parent chain that closures keep alive.
//! - Evaluator: a tree walk threading one scope and one execution context,
//!   with non-local control carried as a typed result.
//! - Concurrency: a Chase–Lev work-stealing pool, tasks with deep-copied
//!   arguments, and mutex+condvar channels with rendezvous semantics.
//! - JSON: a hand-written codec with cycle detection.
//!
//! # Modules
//!
//! - `value`: the tagged value and heap payloads
//! - `env`: scope frames, lookup, and the frame pool
//! - `error` / `context`: the error taxonomy, control-flow sum, call
//!   traces, and defer stack
//! - `arith`: promotion lattice, equality, concatenation
//! - `eval`: the tree-walking evaluator and method dispatch
//! - `string_ops` / `array_ops` / `object_ops` / `buffer_ops`: per-type
//!   method tables
//! - `deque` / `pool` / `task` / `channel`: the concurrency layer
//! - `json`: serialization and deserialization
//! - `file` / `socket` / `os` / `signal` / `ffi`: native collaborators
//! - `runtime`: the owning handle for process-global state

pub mod arith;
pub mod array_ops;
pub mod buffer_ops;
pub mod builtins;
pub mod channel;
pub mod context;
pub mod deque;
pub mod env;
pub mod error;
pub mod eval;
pub mod ffi;
pub mod file;
pub mod hashidx;
pub mod json;
pub mod object_ops;
pub mod os;
pub mod pool;
pub mod runtime;
pub mod signal;
pub mod socket;
pub mod string_ops;
pub mod task;
pub mod value;

pub use context::ExecutionContext;
pub use env::Env;
pub use error::{ErrorKind, EvalResult, Flow, RillError};
pub use eval::Interp;
pub use runtime::{ModuleResolver, Runtime};
pub use value::Value;
