//! The tree-walking evaluator
//!
//! A recursive walk over the AST producing values, threading the active
//! scope (`Arc<Env>`) and one [`ExecutionContext`] per logical control
//! flow. Non-local control — `break`, `continue`, `return`, exceptions —
//! travels as [`Flow`] in the result's error channel, so every recursion
//! point propagates it with `?`.
//!
//! ## Call protocol
//!
//! A call validates arity against the required..=total parameter range
//! (defaults fill trailing missing arguments), checks the recursion
//! ceiling, builds a frame whose parent is the callee's captured
//! environment, converts annotated parameters, pushes a trace frame,
//! records the defer watermark, runs the body, drains deferred calls in
//! LIFO order (a throwing defer supersedes any prior exception), converts
//! a declared return type, and pops the trace frame — unless an exception
//! is in flight, in which case the trace is preserved for reporting.

use crate::arith;
use crate::array_ops;
use crate::buffer_ops;
use crate::builtins;
use crate::channel::ChannelObj;
use crate::context::{DeferTarget, DeferredCall, ExecutionContext};
use crate::env::Env;
use crate::error::{ErrorKind, EvalResult, Flow, RillError};
use crate::file::FileObj;
use crate::object_ops;
use crate::runtime::{ImportTicket, ModuleExports, Runtime};
use crate::socket::SocketObj;
use crate::string_ops;
use crate::task::TaskObj;
use crate::value::{ArrayStoreError, FunctionObj, ObjectObj, Value};
use rill_core::{
    BinaryOp, Block, Expr, ExprKind, FunctionDecl, ImportKind, IncDecOp, InterpPart, Literal,
    Name, Pattern, Program, Stmt, StmtKind, TypeTag,
};
use std::path::PathBuf;
use std::sync::Arc;

/// The interpreter handle: a thin wrapper over the runtime, one per
/// logical control flow.
#[derive(Clone)]
pub struct Interp {
    pub runtime: Arc<Runtime>,
    /// Directory imports resolve against.
    pub module_dir: PathBuf,
    /// Only the main flow dispatches signal handlers.
    is_main: bool,
}

impl Interp {
    pub fn new(runtime: Arc<Runtime>) -> Interp {
        Interp {
            runtime,
            module_dir: PathBuf::from("."),
            is_main: true,
        }
    }

    /// Interpreter for a spawned task: same runtime, no signal dispatch.
    pub fn for_task(runtime: Arc<Runtime>) -> Interp {
        Interp {
            runtime,
            module_dir: PathBuf::from("."),
            is_main: false,
        }
    }

    pub fn with_module_dir(mut self, dir: PathBuf) -> Interp {
        self.module_dir = dir;
        self
    }

    // -- program entry ------------------------------------------------------

    /// Execute a whole program against `env`. Top-level defers run at
    /// program end; a throw that reaches here is the uncaught exception.
    pub fn run_program(
        &self,
        program: &Program,
        env: &Arc<Env>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RillError> {
        let watermark = ctx.defers.len();
        let mut outcome = Ok(());
        for stmt in &program.stmts {
            if let Err(flow) = self.exec_stmt(stmt, env, ctx) {
                outcome = Err(flow);
                break;
            }
            if self.is_main {
                self.dispatch_pending_signals(ctx);
            }
        }
        let outcome = self.drain_defers(watermark, outcome.map(|()| Value::Null), ctx);
        match outcome {
            Ok(_) => Ok(()),
            Err(Flow::Throw(err)) => Err(err),
            Err(Flow::Return(_)) => Err(RillError::type_error("return outside of function")),
            Err(Flow::Break) => Err(RillError::type_error("break outside of loop")),
            Err(Flow::Continue) => Err(RillError::type_error("continue outside of loop")),
        }
    }

    // -- statements ---------------------------------------------------------

    fn exec_block(&self, block: &Block, env: &Arc<Env>, ctx: &mut ExecutionContext) -> Result<(), Flow> {
        for stmt in &block.stmts {
            self.exec_stmt(stmt, env, ctx)?;
        }
        Ok(())
    }

    /// Execute a block in a fresh child scope.
    fn exec_block_scoped(
        &self,
        block: &Block,
        env: &Arc<Env>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), Flow> {
        let scope = Env::child(env);
        self.exec_block(block, &scope, ctx)
    }

    fn exec_stmt(&self, stmt: &Stmt, env: &Arc<Env>, ctx: &mut ExecutionContext) -> Result<(), Flow> {
        match &*stmt.kind {
            StmtKind::Let { name, value } => {
                let v = match value {
                    Some(e) => self.eval_expr(e, env, ctx)?,
                    None => Value::Null,
                };
                env.define(name.clone(), v, false)?;
                Ok(())
            }
            StmtKind::Const { name, value } => {
                let v = self.eval_expr(value, env, ctx)?;
                env.define(name.clone(), v, true)?;
                Ok(())
            }
            StmtKind::Expr(e) => {
                self.eval_expr(e, env, ctx)?;
                Ok(())
            }
            StmtKind::Block(block) => self.exec_block_scoped(block, env, ctx),
            StmtKind::If { branches, otherwise } => {
                for (cond, body) in branches {
                    if self.eval_expr(cond, env, ctx)?.is_truthy() {
                        return self.exec_block_scoped(body, env, ctx);
                    }
                }
                if let Some(body) = otherwise {
                    return self.exec_block_scoped(body, env, ctx);
                }
                Ok(())
            }
            StmtKind::While { cond, body } => {
                while self.eval_expr(cond, env, ctx)?.is_truthy() {
                    match self.exec_block_scoped(body, env, ctx) {
                        Ok(()) | Err(Flow::Continue) => {}
                        Err(Flow::Break) => break,
                        Err(other) => return Err(other),
                    }
                    if self.is_main {
                        self.dispatch_pending_signals(ctx);
                    }
                }
                Ok(())
            }
            StmtKind::For { init, cond, step, body } => {
                let scope = Env::child(env);
                if let Some(init) = init {
                    self.exec_stmt(init, &scope, ctx)?;
                }
                loop {
                    if let Some(cond) = cond {
                        if !self.eval_expr(cond, &scope, ctx)?.is_truthy() {
                            break;
                        }
                    }
                    match self.exec_block_scoped(body, &scope, ctx) {
                        Ok(()) | Err(Flow::Continue) => {}
                        Err(Flow::Break) => break,
                        Err(other) => return Err(other),
                    }
                    if let Some(step) = step {
                        self.eval_expr(step, &scope, ctx)?;
                    }
                    if self.is_main {
                        self.dispatch_pending_signals(ctx);
                    }
                }
                Ok(())
            }
            StmtKind::ForIn { var, iterable, body } => {
                let subject = self.eval_expr(iterable, env, ctx)?;
                let items: Vec<Value> = match &subject {
                    Value::Array(a) => a.snapshot(),
                    Value::Str(s) => s.read(|body| body.chars().map(Value::Rune).collect()),
                    Value::Object(o) => {
                        o.keys().iter().map(|k| Value::str(k.as_ref())).collect()
                    }
                    other => {
                        return Err(RillError::type_error(format!(
                            "cannot iterate over {}",
                            other.type_name()
                        ))
                        .into());
                    }
                };
                let scope = Env::child(env);
                scope.define(var.clone(), Value::Null, false)?;
                for item in items {
                    scope.set(var, item)?;
                    match self.exec_block_scoped(body, &scope, ctx) {
                        Ok(()) | Err(Flow::Continue) => {}
                        Err(Flow::Break) => break,
                        Err(other) => return Err(other),
                    }
                    if self.is_main {
                        self.dispatch_pending_signals(ctx);
                    }
                }
                Ok(())
            }
            StmtKind::Switch { subject, cases, default } => {
                let value = self.eval_expr(subject, env, ctx)?;
                for case in cases {
                    let mut bindings = Vec::new();
                    if match_pattern(&case.pattern, &value, &mut bindings) {
                        let scope = Env::child(env);
                        for (name, bound) in bindings {
                            scope.define(name, bound, false)?;
                        }
                        return match self.exec_block(&case.body, &scope, ctx) {
                            // `break` exits the switch, not an outer loop.
                            Err(Flow::Break) | Ok(()) => Ok(()),
                            Err(other) => Err(other),
                        };
                    }
                }
                if let Some(body) = default {
                    return match self.exec_block_scoped(body, env, ctx) {
                        Err(Flow::Break) | Ok(()) => Ok(()),
                        Err(other) => Err(other),
                    };
                }
                Ok(())
            }
            StmtKind::Break => Err(Flow::Break),
            StmtKind::Continue => Err(Flow::Continue),
            StmtKind::Return(value) => {
                let v = match value {
                    Some(e) => self.eval_expr(e, env, ctx)?,
                    None => Value::Null,
                };
                Err(Flow::Return(v))
            }
            StmtKind::Try { body, catch, finally } => {
                let trace_depth = ctx.call_stack.len();
                let mut outcome = self.exec_block_scoped(body, env, ctx);
                if let (Err(Flow::Throw(err)), Some((param, handler))) = (&outcome, catch) {
                    let payload = err.payload.clone();
                    ctx.truncate_trace(trace_depth);
                    let scope = Env::child(env);
                    scope.define(param.clone(), payload, false)?;
                    outcome = self.exec_block(handler, &scope, ctx);
                }
                if let Some(fin) = finally {
                    // The finally block always runs; its own non-local flow
                    // supersedes the pending one.
                    let fin_outcome = self.exec_block_scoped(fin, env, ctx);
                    if fin_outcome.is_err() {
                        outcome = fin_outcome;
                    }
                }
                outcome
            }
            StmtKind::Throw(e) => {
                let payload = self.eval_expr(e, env, ctx)?;
                Err(Flow::Throw(RillError::thrown(payload)))
            }
            StmtKind::Defer(call) => {
                let ExprKind::Call { callee, args } = &*call.kind else {
                    return Err(RillError::type_error("defer expects a call").into());
                };
                // Resolve the callee now; only the invocation is delayed.
                let target = match &*callee.kind {
                    ExprKind::Ident(name) if !env.is_bound(name) => {
                        if let Some(foreign) = self.runtime.foreign_fn(name) {
                            DeferTarget::Foreign(foreign)
                        } else if builtins::lookup(name).is_some() {
                            DeferTarget::Builtin(name.clone())
                        } else {
                            return Err(
                                RillError::name_error(format!("'{name}' is not defined")).into()
                            );
                        }
                    }
                    _ => DeferTarget::Value(self.eval_expr(callee, env, ctx)?),
                };
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval_expr(arg, env, ctx)?);
                }
                ctx.defers.push(DeferredCall {
                    target,
                    args: evaluated,
                    line: call.span.line,
                });
                Ok(())
            }
            StmtKind::FnDecl(decl) => {
                let func = FunctionObj::new(Arc::clone(decl), Arc::clone(env));
                let name = decl
                    .name
                    .clone()
                    .unwrap_or_else(|| Arc::from("<anonymous>"));
                env.define(name, Value::Function(Arc::new(func)), false)?;
                Ok(())
            }
            StmtKind::Import { kind, path } => self.exec_import(kind, path, env, ctx),
            StmtKind::Export(inner) => self.exec_stmt(inner, env, ctx),
            StmtKind::ExternFn { name, params, return_type } => {
                let mut ctypes = Vec::with_capacity(params.len());
                for tag in params {
                    ctypes.push(crate::ffi::CType::from_tag(tag)?);
                }
                let ret = match return_type {
                    Some(tag) => crate::ffi::CType::from_tag(tag)?,
                    None => crate::ffi::CType::Void,
                };
                #[cfg(unix)]
                {
                    let foreign = crate::ffi::ForeignFn::resolve(name, ctypes, ret)?;
                    self.runtime.register_foreign(name.clone(), foreign);
                    Ok(())
                }
                #[cfg(not(unix))]
                {
                    let _ = ret;
                    Err(RillError::new(ErrorKind::Ffi, "FFI is not supported here").into())
                }
            }
            StmtKind::TypeDef { name, fields } => {
                self.runtime.define_type(name.clone(), fields.clone());
                Ok(())
            }
            StmtKind::EnumDef { name, members } => {
                let obj = ObjectObj::empty();
                let mut next = 0i64;
                for (member, explicit) in members {
                    let v = explicit.unwrap_or(next);
                    next = v + 1;
                    obj.set(member.clone(), Value::I64(v));
                }
                env.define(name.clone(), Value::Object(Arc::new(obj)), true)?;
                Ok(())
            }
        }
    }

    // -- expressions --------------------------------------------------------

    pub fn eval_expr(&self, expr: &Expr, env: &Arc<Env>, ctx: &mut ExecutionContext) -> EvalResult {
        match &*expr.kind {
            ExprKind::Literal(lit) => Ok(literal_value(lit)),
            ExprKind::Ident(name) => Ok(env.get(name)?),
            ExprKind::Interp(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        InterpPart::Lit(s) => out.push_str(s),
                        InterpPart::Expr(e) => {
                            let v = self.eval_expr(e, env, ctx)?;
                            out.push_str(&v.to_string());
                        }
                    }
                }
                Ok(Value::str(out))
            }
            ExprKind::Unary { op, operand } => {
                let v = self.eval_expr(operand, env, ctx)?;
                Ok(arith::unary(*op, &v)?)
            }
            ExprKind::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => {
                    let l = self.eval_expr(lhs, env, ctx)?;
                    if !l.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                    let r = self.eval_expr(rhs, env, ctx)?;
                    Ok(Value::Bool(r.is_truthy()))
                }
                BinaryOp::Or => {
                    let l = self.eval_expr(lhs, env, ctx)?;
                    if l.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                    let r = self.eval_expr(rhs, env, ctx)?;
                    Ok(Value::Bool(r.is_truthy()))
                }
                _ => {
                    let l = self.eval_expr(lhs, env, ctx)?;
                    let r = self.eval_expr(rhs, env, ctx)?;
                    Ok(arith::binary(*op, &l, &r)?)
                }
            },
            ExprKind::Ternary { cond, then, otherwise } => {
                if self.eval_expr(cond, env, ctx)?.is_truthy() {
                    self.eval_expr(then, env, ctx)
                } else {
                    self.eval_expr(otherwise, env, ctx)
                }
            }
            ExprKind::NullCoalesce { lhs, rhs } => {
                let l = self.eval_expr(lhs, env, ctx)?;
                if l.is_null() {
                    self.eval_expr(rhs, env, ctx)
                } else {
                    Ok(l)
                }
            }
            ExprKind::Assign { target, op, value } => {
                let resolved = self.resolve_target(target, env, ctx)?;
                let new_value = match op {
                    None => self.eval_expr(value, env, ctx)?,
                    Some(op) => {
                        let old = self.read_target(&resolved, target, env)?;
                        let rhs = self.eval_expr(value, env, ctx)?;
                        arith::binary(*op, &old, &rhs)?
                    }
                };
                self.write_target(&resolved, new_value.clone(), env)?;
                Ok(new_value)
            }
            ExprKind::IncDec { target, op, prefix } => {
                let resolved = self.resolve_target(target, env, ctx)?;
                let old = self.read_target(&resolved, target, env)?;
                let delta = Value::I32(1);
                let new = match op {
                    IncDecOp::Incr => arith::binary(BinaryOp::Add, &old, &delta)?,
                    IncDecOp::Decr => arith::binary(BinaryOp::Sub, &old, &delta)?,
                };
                self.write_target(&resolved, new.clone(), env)?;
                Ok(if *prefix { new } else { old })
            }
            ExprKind::Property { object, name, optional } => {
                let recv = self.eval_expr(object, env, ctx)?;
                if recv.is_null() && *optional {
                    return Ok(Value::Null);
                }
                Ok(self.property_get(&recv, name)?)
            }
            ExprKind::Index { object, index, optional } => {
                let recv = self.eval_expr(object, env, ctx)?;
                if recv.is_null() && *optional {
                    return Ok(Value::Null);
                }
                let idx = self.eval_expr(index, env, ctx)?;
                Ok(index_get(&recv, &idx)?)
            }
            ExprKind::Call { callee, args } => self.eval_call(callee, args, expr.span.line, env, ctx),
            ExprKind::Function(decl) => {
                let func = FunctionObj::new(Arc::clone(decl), Arc::clone(env));
                Ok(Value::Function(Arc::new(func)))
            }
            ExprKind::Array(elems) => {
                let mut values = Vec::with_capacity(elems.len());
                for e in elems {
                    values.push(self.eval_expr(e, env, ctx)?);
                }
                Ok(Value::array(values))
            }
            ExprKind::ObjectLiteral(fields) => {
                let obj = ObjectObj::empty();
                for (name, e) in fields {
                    let v = self.eval_expr(e, env, ctx)?;
                    obj.set(name.clone(), v);
                }
                Ok(Value::Object(Arc::new(obj)))
            }
            ExprKind::Await(operand) => {
                let v = self.eval_expr(operand, env, ctx)?;
                match v {
                    Value::Task(task) => Ok(task.join()?),
                    other => Ok(other),
                }
            }
        }
    }

    // -- assignment targets -------------------------------------------------

    fn resolve_target(
        &self,
        target: &Expr,
        env: &Arc<Env>,
        ctx: &mut ExecutionContext,
    ) -> Result<ResolvedTarget, Flow> {
        match &*target.kind {
            ExprKind::Ident(name) => Ok(ResolvedTarget::Ident(name.clone())),
            ExprKind::Index { object, index, .. } => {
                let recv = self.eval_expr(object, env, ctx)?;
                let idx = self.eval_expr(index, env, ctx)?;
                Ok(ResolvedTarget::Index(recv, idx))
            }
            ExprKind::Property { object, name, .. } => {
                let recv = self.eval_expr(object, env, ctx)?;
                Ok(ResolvedTarget::Property(recv, name.clone()))
            }
            _ => Err(RillError::type_error("invalid assignment target").into()),
        }
    }

    fn read_target(
        &self,
        resolved: &ResolvedTarget,
        _origin: &Expr,
        env: &Arc<Env>,
    ) -> Result<Value, RillError> {
        match resolved {
            ResolvedTarget::Ident(name) => env.get(name),
            ResolvedTarget::Index(recv, idx) => index_get(recv, idx),
            ResolvedTarget::Property(recv, name) => self.property_get(recv, name),
        }
    }

    fn write_target(
        &self,
        resolved: &ResolvedTarget,
        value: Value,
        env: &Arc<Env>,
    ) -> Result<(), RillError> {
        match resolved {
            ResolvedTarget::Ident(name) => env.set(name, value),
            ResolvedTarget::Index(recv, idx) => index_set(recv, idx, value),
            ResolvedTarget::Property(recv, name) => match recv {
                Value::Object(obj) => {
                    obj.set(name.clone(), value);
                    Ok(())
                }
                other => Err(RillError::type_error(format!(
                    "cannot set property '{name}' on {}",
                    other.type_name()
                ))),
            },
        }
    }

    // -- property access ----------------------------------------------------

    fn property_get(&self, recv: &Value, name: &Name) -> Result<Value, RillError> {
        match recv {
            Value::Null => Err(RillError::type_error(format!(
                "cannot read property '{name}' of null"
            ))),
            Value::Object(obj) => {
                if obj.is_freed() {
                    return Ok(Value::Null);
                }
                match obj.get(name) {
                    Some(Value::Function(f)) => {
                        // The bound-method form: same declaration, a fresh
                        // captured scope where `self` is the receiver.
                        let base = f
                            .captured_env()
                            .unwrap_or_else(Env::new_root);
                        let scope = Env::child(&base);
                        scope.define(Arc::from("self"), recv.clone(), false)?;
                        Ok(Value::Function(Arc::new(FunctionObj::bound(
                            Arc::clone(&f.decl),
                            scope,
                        ))))
                    }
                    Some(v) => Ok(v),
                    None => Err(RillError::new(
                        ErrorKind::Field,
                        format!("object has no field '{name}'"),
                    )),
                }
            }
            Value::File(file) => match name.as_ref() {
                "path" => Ok(Value::str(file.path())),
                "mode" => Ok(Value::str(file.mode())),
                "closed" => Ok(Value::Bool(file.is_closed())),
                #[cfg(unix)]
                "fd" => Ok(Value::I32(file.fd())),
                _ => Err(RillError::new(
                    ErrorKind::Field,
                    format!("file has no property '{name}'"),
                )),
            },
            Value::Socket(sock) => match name.as_ref() {
                "fd" => Ok(Value::I32(sock.fd())),
                "closed" => Ok(Value::Bool(sock.is_closed())),
                _ => Err(RillError::new(
                    ErrorKind::Field,
                    format!("socket has no property '{name}'"),
                )),
            },
            Value::Task(task) => match name.as_ref() {
                "id" => Ok(Value::I64(task.id() as i64)),
                "state" => Ok(Value::str(task.status().to_string())),
                _ => Err(RillError::new(
                    ErrorKind::Field,
                    format!("task has no property '{name}'"),
                )),
            },
            Value::Channel(ch) => match name.as_ref() {
                "capacity" => Ok(Value::I32(ch.capacity() as i32)),
                "closed" => Ok(Value::Bool(ch.is_closed())),
                _ => Err(RillError::new(
                    ErrorKind::Field,
                    format!("channel has no property '{name}'"),
                )),
            },
            other => Err(RillError::new(
                ErrorKind::Field,
                format!("{} has no property '{name}'", other.type_name()),
            )),
        }
    }

    // -- calls --------------------------------------------------------------

    fn eval_call(
        &self,
        callee: &Expr,
        arg_exprs: &[Expr],
        line: u32,
        env: &Arc<Env>,
        ctx: &mut ExecutionContext,
    ) -> EvalResult {
        // Method call: resolve the receiver once and reuse it as `self`.
        if let ExprKind::Property { object, name, optional } = &*callee.kind {
            let recv = self.eval_expr(object, env, ctx)?;
            if recv.is_null() && *optional {
                return Ok(Value::Null);
            }
            let mut args = Vec::with_capacity(arg_exprs.len());
            for e in arg_exprs {
                args.push(self.eval_expr(e, env, ctx)?);
            }
            return self.call_method(&recv, name, args, line, ctx);
        }

        // Identifier callee: environment first, then the foreign registry,
        // then builtins.
        if let ExprKind::Ident(name) = &*callee.kind {
            match env.get(name) {
                Ok(value) => {
                    let (args, byref) = self.eval_call_args(arg_exprs, env, ctx)?;
                    return self.invoke_value(&value, None, args, line, ctx, &byref, Some(env));
                }
                Err(_) => {
                    if let Some(foreign) = self.runtime.foreign_fn(name) {
                        let mut args = Vec::with_capacity(arg_exprs.len());
                        for e in arg_exprs {
                            args.push(self.eval_expr(e, env, ctx)?);
                        }
                        return Ok(foreign.call(&args)?);
                    }
                    if let Some(builtin) = builtins::lookup(name) {
                        let mut args = Vec::with_capacity(arg_exprs.len());
                        for e in arg_exprs {
                            args.push(self.eval_expr(e, env, ctx)?);
                        }
                        return builtin(self, ctx, args, line);
                    }
                    return Err(RillError::name_error(format!("'{name}' is not defined")).into());
                }
            }
        }

        let value = self.eval_expr(callee, env, ctx)?;
        let (args, byref) = self.eval_call_args(arg_exprs, env, ctx)?;
        self.invoke_value(&value, None, args, line, ctx, &byref, Some(env))
    }

    /// Evaluate call arguments, noting which argument positions are plain
    /// identifiers (candidates for by-reference write-back).
    fn eval_call_args(
        &self,
        arg_exprs: &[Expr],
        env: &Arc<Env>,
        ctx: &mut ExecutionContext,
    ) -> Result<(Vec<Value>, Vec<(usize, Name)>), Flow> {
        let mut args = Vec::with_capacity(arg_exprs.len());
        let mut byref = Vec::new();
        for (i, e) in arg_exprs.iter().enumerate() {
            if let ExprKind::Ident(name) = &*e.kind {
                byref.push((i, name.clone()));
            }
            args.push(self.eval_expr(e, env, ctx)?);
        }
        Ok((args, byref))
    }

    /// Call whatever `value` is; only function values are callable.
    #[allow(clippy::too_many_arguments)]
    pub fn invoke_value(
        &self,
        value: &Value,
        self_value: Option<Value>,
        args: Vec<Value>,
        line: u32,
        ctx: &mut ExecutionContext,
        byref: &[(usize, Name)],
        caller_env: Option<&Arc<Env>>,
    ) -> EvalResult {
        match value {
            Value::Function(func) => {
                self.call_function(func, self_value, args, line, ctx, byref, caller_env)
            }
            other => {
                Err(RillError::type_error(format!("{} is not callable", other.type_name())).into())
            }
        }
    }

    /// The user-function call protocol.
    #[allow(clippy::too_many_arguments)]
    pub fn call_function(
        &self,
        func: &Arc<FunctionObj>,
        self_value: Option<Value>,
        args: Vec<Value>,
        call_line: u32,
        ctx: &mut ExecutionContext,
        byref: &[(usize, Name)],
        caller_env: Option<&Arc<Env>>,
    ) -> EvalResult {
        let decl: &Arc<FunctionDecl> = &func.decl;
        let required = decl.required_params();
        let total = decl.params.len();
        let fn_name: Name = decl
            .name
            .clone()
            .unwrap_or_else(|| Arc::from("<anonymous>"));

        if args.len() < required {
            return Err(RillError::type_error(format!(
                "{fn_name}() expects at least {required} argument(s), got {}",
                args.len()
            ))
            .into());
        }
        if args.len() > total && decl.rest_param.is_none() {
            return Err(RillError::type_error(format!(
                "{fn_name}() expects at most {total} argument(s), got {}",
                args.len()
            ))
            .into());
        }

        let captured = func.captured_env().ok_or_else(|| {
            RillError::type_error(format!("{fn_name}() environment has been torn down"))
        })?;
        let frame = Env::child(&captured);

        if let Some(receiver) = self_value {
            frame.define(Arc::from("self"), receiver, false)?;
        }

        // Bind parameters; trailing missing arguments evaluate their
        // defaults against the new frame (whose parent chain is the
        // captured environment).
        let mut arg_iter = args.into_iter();
        for param in &decl.params {
            let raw = match arg_iter.next() {
                Some(v) => v,
                None => match &param.default {
                    Some(default_expr) => self.eval_expr(default_expr, &frame, ctx)?,
                    None => Value::Null,
                },
            };
            let converted = match &param.ty {
                Some(tag) => self.convert_value(raw, tag).map_err(|e| {
                    RillError::type_error(format!(
                        "{fn_name}(): parameter '{}': {}",
                        param.name, e.payload
                    ))
                })?,
                None => raw,
            };
            frame.define(param.name.clone(), converted, false)?;
        }
        if let Some(rest) = &decl.rest_param {
            let extra: Vec<Value> = arg_iter.collect();
            frame.define(rest.clone(), Value::array(extra), false)?;
        }

        if !ctx.push_frame(fn_name.clone(), call_line) {
            return Err(RillError::new(
                ErrorKind::Recursion,
                format!("maximum call depth exceeded in {fn_name}()"),
            )
            .into());
        }

        let watermark = ctx.defers.len();
        let body_outcome = match self.exec_block(&decl.body, &frame, ctx) {
            Ok(()) => Ok((Value::Null, false)),
            Err(Flow::Return(v)) => Ok((v, true)),
            Err(Flow::Break) => {
                Err(RillError::type_error("break outside of loop").into())
            }
            Err(Flow::Continue) => {
                Err(RillError::type_error("continue outside of loop").into())
            }
            Err(other) => Err(other),
        };

        // Deferred calls run in LIFO order on every exit path; one that
        // throws supersedes the pending outcome.
        let body_outcome = self.drain_defers(watermark, body_outcome, ctx);

        let outcome = match body_outcome {
            Ok((value, returned)) => match &decl.return_type {
                Some(tag) => {
                    if !returned {
                        Err(RillError::type_error(format!(
                            "{fn_name}() declares return type {tag} but did not return"
                        ))
                        .into())
                    } else {
                        self.convert_value(value, tag)
                            .map_err(|e| {
                                Flow::from(RillError::type_error(format!(
                                    "{fn_name}(): return value: {}",
                                    e.payload
                                )))
                            })
                    }
                }
                None => Ok(value),
            },
            Err(flow) => Err(flow),
        };

        // By-reference parameters write their final value back to plain
        // identifier arguments in the caller's scope.
        if let (Some(caller_env), true) = (caller_env, !byref.is_empty()) {
            for (pos, caller_name) in byref {
                if let Some(param) = decl.params.get(*pos) {
                    if param.by_ref {
                        if let Ok(current) = frame.get(&param.name) {
                            let _ = caller_env.set(caller_name, current);
                        }
                    }
                }
            }
        }

        let exception_in_flight = matches!(outcome, Err(Flow::Throw(_)));
        ctx.pop_frame(exception_in_flight);
        outcome
    }

    /// Run deferred calls above `watermark` in LIFO order, merging their
    /// failures into `outcome`.
    fn drain_defers<T>(
        &self,
        watermark: usize,
        mut outcome: Result<T, Flow>,
        ctx: &mut ExecutionContext,
    ) -> Result<T, Flow> {
        while ctx.defers.len() > watermark {
            let deferred = ctx.defers.pop().expect("defer stack underflow");
            let result = match deferred.target {
                DeferTarget::Value(func) => {
                    self.invoke_value(&func, None, deferred.args, deferred.line, ctx, &[], None)
                }
                DeferTarget::Builtin(name) => match builtins::lookup(&name) {
                    Some(builtin) => builtin(self, ctx, deferred.args, deferred.line),
                    None => Err(RillError::name_error(format!("'{name}' is not defined")).into()),
                },
                DeferTarget::Foreign(foreign) => {
                    foreign.call(&deferred.args).map_err(Flow::from)
                }
            };
            if let Err(flow) = result {
                outcome = Err(flow);
            }
        }
        outcome
    }

    // -- method dispatch ----------------------------------------------------

    /// `x.m(args)` dispatched on the runtime type of `x`.
    pub fn call_method(
        &self,
        recv: &Value,
        name: &Name,
        args: Vec<Value>,
        line: u32,
        ctx: &mut ExecutionContext,
    ) -> EvalResult {
        match recv {
            Value::Object(obj) => {
                // A user-defined field shadows the object built-ins.
                if !obj.is_freed() {
                    if let Some(field) = obj.get(name) {
                        return match field {
                            Value::Function(f) => self.call_function(
                                &f,
                                Some(recv.clone()),
                                args,
                                line,
                                ctx,
                                &[],
                                None,
                            ),
                            other => Err(RillError::type_error(format!(
                                "field '{name}' is {} and not callable",
                                other.type_name()
                            ))
                            .into()),
                        };
                    }
                }
                match object_ops::call_builtin(obj, name, &args) {
                    Some(result) => Ok(result?),
                    None => Err(RillError::new(
                        ErrorKind::Field,
                        format!("object has no method '{name}'"),
                    )
                    .into()),
                }
            }
            Value::Str(s) => Ok(string_ops::call_method(s, name, &args)?),
            Value::Array(a) => Ok(array_ops::call_method(a, name, &args)?),
            Value::Buffer(b) => Ok(buffer_ops::call_method(b, name, &args)?),
            Value::Channel(ch) => Ok(channel_method(ch, name, &args)?),
            Value::Task(task) => Ok(task_method(task, name, &args)?),
            Value::File(file) => Ok(file_method(file, name, &args)?),
            Value::Socket(sock) => Ok(socket_method(sock, name, &args)?),
            other => Err(RillError::type_error(format!(
                "{} has no methods",
                other.type_name()
            ))
            .into()),
        }
    }

    // -- type conversion ----------------------------------------------------

    /// Convert a value to an annotated type: numeric narrowing, rune and
    /// integer coercion, and user-defined-type validation.
    pub fn convert_value(&self, value: Value, tag: &TypeTag) -> Result<Value, RillError> {
        if value.matches_tag(tag) {
            return Ok(value);
        }
        let converted = match (tag, &value) {
            (TypeTag::Rune, _) => match value.as_index() {
                Some(cp) if (0..=0x10FFFF).contains(&cp) => {
                    char::from_u32(cp as u32).map(Value::Rune)
                }
                _ => None,
            },
            (
                TypeTag::I8
                | TypeTag::I16
                | TypeTag::I32
                | TypeTag::I64
                | TypeTag::U8
                | TypeTag::U16
                | TypeTag::U32
                | TypeTag::U64,
                Value::Rune(c),
            ) => numeric_cast(&Value::U32(*c as u32), tag),
            (_, v) if v.is_numeric() => numeric_cast(v, tag),
            (TypeTag::Named(type_name), Value::Object(obj)) => {
                // Validate the object against the declared shape.
                match self.runtime.type_fields(type_name) {
                    Some(fields) => {
                        if fields.iter().all(|(fname, _)| obj.has(fname)) {
                            Some(value.clone())
                        } else {
                            None
                        }
                    }
                    None => None,
                }
            }
            _ => None,
        };
        converted.ok_or_else(|| {
            RillError::type_error(format!(
                "cannot convert {} to {tag}",
                value.type_name()
            ))
        })
    }

    // -- signals ------------------------------------------------------------

    /// Drain pending signals and evaluate each handler against a fresh
    /// transient context. Handler failures are reported, never propagated.
    pub fn dispatch_pending_signals(&self, _ctx: &mut ExecutionContext) {
        for (signum, handler) in self.runtime.signals.take_pending() {
            if let Value::Function(func) = handler {
                let mut handler_ctx = ExecutionContext::new();
                let args = if func.decl.params.is_empty() {
                    vec![]
                } else {
                    vec![Value::I32(signum)]
                };
                match self.call_function(&func, None, args, 0, &mut handler_ctx, &[], None) {
                    Ok(_) => {}
                    Err(Flow::Throw(err)) => {
                        eprintln!("signal handler for {signum} failed: {err}");
                    }
                    Err(_) => {
                        eprintln!("signal handler for {signum} used loop control");
                    }
                }
            }
        }
    }

    // -- modules ------------------------------------------------------------

    fn exec_import(
        &self,
        kind: &ImportKind,
        path: &str,
        env: &Arc<Env>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), Flow> {
        let exports = match self.runtime.begin_import(path, &self.module_dir)? {
            ImportTicket::Cached(exports) => exports,
            ImportTicket::Execute { key, program } => {
                let module_env = Env::new_root();
                let module_dir = key
                    .parent()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("."));
                let module_interp = self.clone().with_module_dir(module_dir);
                let mut module_ctx = ExecutionContext::new();
                match module_interp.run_program(&program, &module_env, &mut module_ctx) {
                    Ok(()) => {}
                    Err(err) => {
                        self.runtime.abort_import(&key);
                        return Err(RillError::new(
                            ErrorKind::Module,
                            format!("error executing '{path}': {err}"),
                        )
                        .into());
                    }
                }
                let mut exports = ModuleExports::default();
                for name in exported_names(&program) {
                    match module_env.get(&name) {
                        Ok(v) => {
                            exports.names.push(name);
                            exports.values.push(v);
                        }
                        Err(_) => {
                            self.runtime.abort_import(&key);
                            return Err(RillError::new(
                                ErrorKind::Module,
                                format!("'{path}' exports undefined binding '{name}'"),
                            )
                            .into());
                        }
                    }
                }
                let exports = Arc::new(exports);
                self.runtime.finish_import(key, Arc::clone(&exports));
                exports
            }
        };
        let _ = ctx;
        match kind {
            ImportKind::Named(names) => {
                for name in names {
                    let v = exports.get(name).ok_or_else(|| {
                        RillError::new(
                            ErrorKind::Module,
                            format!("'{path}' has no export '{name}'"),
                        )
                    })?;
                    env.define(name.clone(), v, false)?;
                }
            }
            ImportKind::Namespace(ns) => {
                let obj = ObjectObj::empty();
                for (name, value) in exports.names.iter().zip(exports.values.iter()) {
                    obj.set(name.clone(), value.clone());
                }
                env.define(ns.clone(), Value::Object(Arc::new(obj)), true)?;
            }
        }
        Ok(())
    }
}

/// Names exported by a program (its `export` statements, in order).
fn exported_names(program: &Program) -> Vec<Name> {
    let mut names = Vec::new();
    for stmt in &program.stmts {
        if let StmtKind::Export(inner) = &*stmt.kind {
            match &*inner.kind {
                StmtKind::Let { name, .. } | StmtKind::Const { name, .. } => {
                    names.push(name.clone());
                }
                StmtKind::FnDecl(decl) => {
                    if let Some(name) = &decl.name {
                        names.push(name.clone());
                    }
                }
                StmtKind::EnumDef { name, .. } => names.push(name.clone()),
                _ => {}
            }
        }
    }
    names
}

/// Resolved assignment destination; receivers and indices are evaluated
/// exactly once for read-modify-write forms.
enum ResolvedTarget {
    Ident(Name),
    Index(Value, Value),
    Property(Value, Name),
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::I32(n) => Value::I32(*n),
        Literal::I64(n) => Value::I64(*n),
        Literal::F64(f) => Value::F64(*f),
        Literal::Str(s) => Value::str(s.as_ref()),
        Literal::Rune(c) => Value::Rune(*c),
    }
}

// ---------------------------------------------------------------------------
// Indexing
// ---------------------------------------------------------------------------

/// `recv[idx]` read. Arrays are bounds-checked and reject negative
/// indices; strings index by codepoint and yield runes; buffers index by
/// byte and yield `u8`; object lookup by string yields null when absent.
pub fn index_get(recv: &Value, idx: &Value) -> Result<Value, RillError> {
    match recv {
        Value::Array(arr) => {
            let i = sequence_index(idx, arr.len())?;
            arr.get(i).ok_or_else(|| {
                RillError::index_error(format!(
                    "array index {i} out of bounds (len {})",
                    arr.len()
                ))
            })
        }
        Value::Str(s) => {
            let i = sequence_index(idx, s.char_len())?;
            s.rune_at(i).map(Value::Rune).ok_or_else(|| {
                RillError::index_error(format!(
                    "string index {i} out of bounds (length {})",
                    s.char_len()
                ))
            })
        }
        Value::Buffer(buf) => {
            let i = sequence_index(idx, buf.len())?;
            buf.get(i).map(Value::U8).ok_or_else(|| {
                RillError::index_error(format!(
                    "buffer index {i} out of bounds (len {})",
                    buf.len()
                ))
            })
        }
        Value::Object(obj) => match idx {
            Value::Str(key) => Ok(key
                .read(|k| obj.get(k))
                .unwrap_or(Value::Null)),
            other => Err(RillError::index_error(format!(
                "object index must be a string, got {}",
                other.type_name()
            ))),
        },
        other => Err(RillError::type_error(format!(
            "{} is not indexable",
            other.type_name()
        ))),
    }
}

/// `recv[idx] = value` write.
pub fn index_set(recv: &Value, idx: &Value, value: Value) -> Result<(), RillError> {
    match recv {
        Value::Array(arr) => {
            let i = sequence_index(idx, arr.len())?;
            arr.set(i, value).map_err(|e| match e {
                ArrayStoreError::OutOfBounds => RillError::index_error(format!(
                    "array index {i} out of bounds (len {})",
                    arr.len()
                )),
                ArrayStoreError::TypeMismatch(tag) => RillError::type_error(format!(
                    "array is typed {tag}; value does not match"
                )),
            })
        }
        Value::Str(s) => {
            let i = sequence_index(idx, s.char_len())?;
            let c = match value {
                Value::Rune(c) => c,
                other => {
                    return Err(RillError::type_error(format!(
                        "string element assignment expects a rune, got {}",
                        other.type_name()
                    )));
                }
            };
            if s.is_freed() {
                return Ok(());
            }
            if s.set_rune(i, c) {
                Ok(())
            } else {
                Err(RillError::index_error(format!(
                    "string index {i} out of bounds (length {})",
                    s.char_len()
                )))
            }
        }
        Value::Buffer(buf) => {
            let i = sequence_index(idx, buf.len())?;
            let byte = match value.as_index() {
                Some(b) if (0..=255).contains(&b) => b as u8,
                _ => {
                    return Err(RillError::type_error(
                        "buffer element assignment expects a byte (0..=255)",
                    ));
                }
            };
            if buf.set(i, byte) || buf.is_freed() {
                Ok(())
            } else {
                Err(RillError::index_error(format!(
                    "buffer index {i} out of bounds (len {})",
                    buf.len()
                )))
            }
        }
        Value::Object(obj) => match idx {
            Value::Str(key) => {
                let key: Name = Arc::from(key.to_owned_string().as_str());
                obj.set(key, value);
                Ok(())
            }
            other => Err(RillError::index_error(format!(
                "object index must be a string, got {}",
                other.type_name()
            ))),
        },
        other => Err(RillError::type_error(format!(
            "{} is not indexable",
            other.type_name()
        ))),
    }
}

/// Validate a sequence index: integer, non-negative. Bounds are enforced
/// by the sequence itself.
fn sequence_index(idx: &Value, _len: usize) -> Result<usize, RillError> {
    match idx.as_index() {
        Some(i) if i >= 0 => Ok(i as usize),
        Some(i) => Err(RillError::index_error(format!(
            "negative index {i} is not accepted"
        ))),
        None => Err(RillError::index_error(format!(
            "sequence index must be an integer, got {}",
            idx.type_name()
        ))),
    }
}

fn numeric_cast(v: &Value, tag: &TypeTag) -> Option<Value> {
    let as_f64 = match v {
        Value::F32(f) => f64::from(*f),
        Value::F64(f) => *f,
        other => other.as_index()? as f64,
    };
    let as_i64 = match v {
        Value::F32(f) => *f as i64,
        Value::F64(f) => *f as i64,
        other => other.as_index()?,
    };
    Some(match tag {
        TypeTag::I8 => Value::I8(as_i64 as i8),
        TypeTag::I16 => Value::I16(as_i64 as i16),
        TypeTag::I32 => Value::I32(as_i64 as i32),
        TypeTag::I64 => Value::I64(as_i64),
        TypeTag::U8 => Value::U8(as_i64 as u8),
        TypeTag::U16 => Value::U16(as_i64 as u16),
        TypeTag::U32 => Value::U32(as_i64 as u32),
        TypeTag::U64 => Value::U64(as_i64 as u64),
        TypeTag::F32 => Value::F32(as_f64 as f32),
        TypeTag::F64 => Value::F64(as_f64),
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// Pattern matching (switch cases)
// ---------------------------------------------------------------------------

/// Match `value` against `pattern`, accumulating bindings for the arm's
/// scope. Patterns never raise; a shape mismatch is just a non-match.
pub fn match_pattern(pattern: &Pattern, value: &Value, bindings: &mut Vec<(Name, Value)>) -> bool {
    match pattern {
        Pattern::Wildcard => true,
        Pattern::Literal(lit) => arith::values_equal(&literal_value(lit), value),
        Pattern::Range(lo, hi) => {
            let lo = literal_value(lo);
            let hi = literal_value(hi);
            matches!(
                (
                    arith::compare_values(&lo, value),
                    arith::compare_values(value, &hi)
                ),
                (
                    Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal),
                    Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                )
            )
        }
        Pattern::Type(tag) => value.matches_tag(tag),
        Pattern::Binding(name) => {
            bindings.push((name.clone(), value.clone()));
            true
        }
        Pattern::Array { elements, rest } => {
            let Value::Array(arr) = value else { return false };
            let snap = arr.snapshot();
            if rest.is_none() && snap.len() != elements.len() {
                return false;
            }
            if snap.len() < elements.len() {
                return false;
            }
            let mark = bindings.len();
            for (p, v) in elements.iter().zip(snap.iter()) {
                if !match_pattern(p, v, bindings) {
                    bindings.truncate(mark);
                    return false;
                }
            }
            if let Some(rest_name) = rest {
                bindings.push((
                    rest_name.clone(),
                    Value::array(snap[elements.len()..].to_vec()),
                ));
            }
            true
        }
        Pattern::Object { fields, rest } => {
            let Value::Object(obj) = value else { return false };
            let mark = bindings.len();
            for (fname, sub) in fields {
                let Some(field_value) = obj.get(fname) else {
                    bindings.truncate(mark);
                    return false;
                };
                match sub {
                    Some(p) => {
                        if !match_pattern(p, &field_value, bindings) {
                            bindings.truncate(mark);
                            return false;
                        }
                    }
                    None => bindings.push((fname.clone(), field_value)),
                }
            }
            if !rest && obj.len() != fields.len() {
                bindings.truncate(mark);
                return false;
            }
            true
        }
        Pattern::Or(alternatives) => {
            for alt in alternatives {
                let mark = bindings.len();
                if match_pattern(alt, value, bindings) {
                    return true;
                }
                bindings.truncate(mark);
            }
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Fixed method tables for channel, task, file, socket
// ---------------------------------------------------------------------------

fn ms_arg(method: &str, v: &Value) -> Result<std::time::Duration, RillError> {
    let ms = match v {
        Value::F32(f) => f64::from(*f),
        Value::F64(f) => *f,
        other => other.as_index().map(|n| n as f64).ok_or_else(|| {
            RillError::type_error(format!(
                "{method} expects a millisecond count, got {}",
                other.type_name()
            ))
        })?,
    };
    if !ms.is_finite() || ms < 0.0 {
        return Err(RillError::type_error(format!(
            "{method} expects a non-negative millisecond count"
        )));
    }
    Ok(std::time::Duration::from_secs_f64(ms / 1000.0))
}

fn channel_method(ch: &Arc<ChannelObj>, name: &str, args: &[Value]) -> Result<Value, RillError> {
    match (name, args) {
        ("send", [v]) => {
            ch.send(v.clone())?;
            Ok(Value::Null)
        }
        ("recv", []) => ch.recv(),
        ("send_timeout", [v, ms]) => {
            let timeout = ms_arg("channel.send_timeout", ms)?;
            Ok(Value::Bool(ch.send_timeout(v.clone(), timeout)?))
        }
        ("recv_timeout", [ms]) => {
            let timeout = ms_arg("channel.recv_timeout", ms)?;
            ch.recv_timeout(timeout)
        }
        ("close", []) => {
            ch.close();
            Ok(Value::Null)
        }
        ("send" | "recv" | "send_timeout" | "recv_timeout" | "close", _) => Err(
            RillError::type_error(format!("channel.{name}: wrong number of arguments")),
        ),
        _ => Err(RillError::new(
            ErrorKind::Field,
            format!("channel has no method '{name}'"),
        )),
    }
}

fn task_method(task: &Arc<TaskObj>, name: &str, args: &[Value]) -> Result<Value, RillError> {
    match (name, args) {
        ("join", []) => task.join(),
        ("detach", []) => {
            task.detach()?;
            Ok(Value::Null)
        }
        ("debug_info", []) => Ok(Value::str(task.debug_info())),
        ("join" | "detach" | "debug_info", _) => Err(RillError::type_error(format!(
            "task.{name}: wrong number of arguments"
        ))),
        _ => Err(RillError::new(
            ErrorKind::Field,
            format!("task has no method '{name}'"),
        )),
    }
}

fn byte_count_arg(method: &str, v: &Value) -> Result<usize, RillError> {
    match v.as_index() {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(RillError::type_error(format!(
            "{method} expects a non-negative byte count"
        ))),
    }
}

fn writable_bytes(method: &str, v: &Value) -> Result<Vec<u8>, RillError> {
    match v {
        Value::Str(s) => Ok(s.read(|body| body.as_bytes().to_vec())),
        Value::Buffer(b) => Ok(b.to_vec()),
        other => Err(RillError::type_error(format!(
            "{method} expects a string or buffer, got {}",
            other.type_name()
        ))),
    }
}

fn file_method(file: &Arc<FileObj>, name: &str, args: &[Value]) -> Result<Value, RillError> {
    match (name, args) {
        ("read_text", []) => Ok(Value::str(file.read_text(None)?)),
        ("read_text", [n]) => Ok(Value::str(
            file.read_text(Some(byte_count_arg("file.read_text", n)?))?,
        )),
        ("read_bytes", []) => Ok(Value::Buffer(Arc::new(crate::value::BufferObj::new(
            file.read_bytes(None)?,
        )))),
        ("read_bytes", [n]) => Ok(Value::Buffer(Arc::new(crate::value::BufferObj::new(
            file.read_bytes(Some(byte_count_arg("file.read_bytes", n)?))?,
        )))),
        ("write", [v]) => {
            let bytes = writable_bytes("file.write", v)?;
            Ok(Value::I64(file.write(&bytes)? as i64))
        }
        ("seek", [off]) => match off.as_index() {
            Some(n) if n >= 0 => Ok(Value::I64(file.seek(n as u64)? as i64)),
            _ => Err(RillError::type_error("file.seek expects a non-negative offset")),
        },
        ("tell", []) => Ok(Value::I64(file.tell()? as i64)),
        ("close", []) => {
            file.close();
            Ok(Value::Null)
        }
        ("read_text" | "read_bytes" | "write" | "seek" | "tell" | "close", _) => Err(
            RillError::type_error(format!("file.{name}: wrong number of arguments")),
        ),
        _ => Err(RillError::new(
            ErrorKind::Field,
            format!("file has no method '{name}'"),
        )),
    }
}

fn socket_method(sock: &Arc<SocketObj>, name: &str, args: &[Value]) -> Result<Value, RillError> {
    match (name, args) {
        ("accept", []) => Ok(Value::Socket(Arc::new(sock.accept()?))),
        ("read", [n]) => {
            let limit = byte_count_arg("socket.read", n)?;
            Ok(Value::Buffer(Arc::new(crate::value::BufferObj::new(
                sock.read(limit)?,
            ))))
        }
        ("write", [v]) => {
            let bytes = writable_bytes("socket.write", v)?;
            Ok(Value::I64(sock.write(&bytes)? as i64))
        }
        ("close", []) => {
            sock.close();
            Ok(Value::Null)
        }
        ("accept" | "read" | "write" | "close", _) => Err(RillError::type_error(format!(
            "socket.{name}: wrong number of arguments"
        ))),
        _ => Err(RillError::new(
            ErrorKind::Field,
            format!("socket has no method '{name}'"),
        )),
    }
}

/// Run a spawned task on a worker: mark running, evaluate the function
/// with a fresh context, store the outcome, and wake joiners.
pub fn run_task(runtime: Arc<Runtime>, task: Arc<TaskObj>) {
    task.mark_running();
    let interp = Interp::for_task(runtime);
    let mut ctx = ExecutionContext::new();
    let func = task.func().clone();
    let args = task.take_args();
    let outcome = match &func {
        Value::Function(f) => match interp.call_function(f, None, args, 0, &mut ctx, &[], None) {
            Ok(v) => Ok(v),
            Err(Flow::Throw(err)) => Err(err),
            Err(_) => Err(RillError::type_error("task body escaped via loop control")),
        },
        other => Err(RillError::type_error(format!(
            "task function is {}, not callable",
            other.type_name()
        ))),
    };
    task.complete(outcome);
}
