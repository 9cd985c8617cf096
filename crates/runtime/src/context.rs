//! Per-logical-flow execution state
//!
//! One [`ExecutionContext`] exists per logical control flow: the main
//! program has one, every task gets a fresh one, and signal handlers run
//! against a transient one. It carries what the `Flow` result sum cannot:
//! the call-stack trace for error reporting, the defer stack with per-call
//! watermarks, and the recursion-depth counter.

use crate::value::Value;
use rill_core::Name;

/// Calls deeper than this raise `RecursionError`.
pub const MAX_CALL_DEPTH: usize = 1000;

/// One entry in the call-stack trace.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    /// Callee name, or `<anonymous>` for unnamed function expressions.
    pub function: Name,
    /// Line of the call site.
    pub line: u32,
}

/// What a deferred call resolves to. Builtins and foreign functions are
/// not first-class values, so their resolution is captured by name at the
/// defer site.
#[derive(Debug)]
pub enum DeferTarget {
    Value(Value),
    Builtin(Name),
    Foreign(crate::ffi::ForeignFn),
}

/// A call scheduled by `defer`, with its arguments already evaluated.
#[derive(Debug)]
pub struct DeferredCall {
    pub target: DeferTarget,
    pub args: Vec<Value>,
    pub line: u32,
}

#[derive(Debug, Default)]
pub struct ExecutionContext {
    /// Innermost call last. Frames are popped on normal return but kept
    /// while an exception is in flight, so an uncaught error can report the
    /// full stack; a `catch` truncates back to the depth at `try` entry.
    pub call_stack: Vec<TraceFrame>,
    /// LIFO across all live calls; each call records a watermark at entry
    /// and drains back down to it on exit.
    pub defers: Vec<DeferredCall>,
    depth: usize,
}

impl ExecutionContext {
    pub fn new() -> Self {
        ExecutionContext::default()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Enter a call frame; false once the recursion ceiling is hit.
    pub fn push_frame(&mut self, function: Name, line: u32) -> bool {
        if self.depth >= MAX_CALL_DEPTH {
            return false;
        }
        self.depth += 1;
        self.call_stack.push(TraceFrame { function, line });
        true
    }

    /// Leave a call frame. `keep_trace` preserves the trace entry for error
    /// reporting while still releasing the depth slot.
    pub fn pop_frame(&mut self, keep_trace: bool) {
        self.depth = self.depth.saturating_sub(1);
        if !keep_trace {
            self.call_stack.pop();
        }
    }

    /// Discard trace entries above `depth` (used when a `catch` handles an
    /// exception raised deeper in the stack).
    pub fn truncate_trace(&mut self, depth: usize) {
        self.call_stack.truncate(depth);
        self.depth = self.depth.min(depth);
    }

    /// Render the trace in the user-visible format, innermost call first.
    pub fn render_trace(&self) -> String {
        let mut out = String::from("Stack trace (most recent call first):");
        for frame in self.call_stack.iter().rev() {
            out.push_str(&format!("\n  at {}() (line {})", frame.function, frame.line));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_depth_ceiling() {
        let mut ctx = ExecutionContext::new();
        for _ in 0..MAX_CALL_DEPTH {
            assert!(ctx.push_frame(Arc::from("f"), 1));
        }
        assert!(!ctx.push_frame(Arc::from("f"), 1));
        ctx.pop_frame(false);
        assert!(ctx.push_frame(Arc::from("g"), 2));
    }

    #[test]
    fn test_trace_rendering_innermost_first() {
        let mut ctx = ExecutionContext::new();
        ctx.push_frame(Arc::from("outer"), 3);
        ctx.push_frame(Arc::from("inner"), 7);
        let trace = ctx.render_trace();
        let inner_pos = trace.find("inner").unwrap();
        let outer_pos = trace.find("outer").unwrap();
        assert!(inner_pos < outer_pos);
        assert!(trace.contains("at inner() (line 7)"));
    }

    #[test]
    fn test_truncate_trace_restores_depth() {
        let mut ctx = ExecutionContext::new();
        ctx.push_frame(Arc::from("a"), 1);
        let mark = ctx.call_stack.len();
        let depth = ctx.depth();
        ctx.push_frame(Arc::from("b"), 2);
        ctx.push_frame(Arc::from("c"), 3);
        ctx.truncate_trace(mark);
        assert_eq!(ctx.call_stack.len(), mark);
        assert_eq!(ctx.depth(), depth);
    }
}
