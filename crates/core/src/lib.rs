//! Rill Core: the shared contract between the frontend and the runtime
//!
//! This crate defines the abstract syntax tree the parser produces and the
//! evaluator walks, together with the source-location type attached to every
//! node for diagnostics. It has no dependencies and no behavior of its own;
//! everything that executes lives in `rill-runtime`.
//!
//! # Modules
//!
//! - `ast`: expression, statement, and pattern node kinds, plus function
//!   declarations and type annotations

pub mod ast;

pub use ast::{
    BinaryOp, Block, Expr, ExprKind, FunctionDecl, ImportKind, IncDecOp, InterpPart, Literal,
    Name, Param, Pattern, Program, Span, Stmt, StmtKind, SwitchCase, TypeTag, UnaryOp,
};
