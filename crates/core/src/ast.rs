//! Abstract Syntax Tree for Rill
//!
//! The parser produces this tree; the evaluator walks it. Nodes that the
//! runtime retains past parsing (function declarations, blocks used as
//! function bodies) are wrapped in `Arc` so closures and spawned tasks can
//! share them across threads without copying.
//!
//! Every expression and statement carries a [`Span`] for error reporting and
//! stack traces.

use std::fmt;
use std::sync::Arc;

/// An interned identifier. Names are created once at parse time and shared
/// by the AST, environments, and function values, so a binding never owns
/// its name storage.
pub type Name = Arc<str>;

/// Source position, 1-indexed for user display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Span { line, column }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// A literal value embedded in the source text.
///
/// Integer literals lex as `I32` when the value fits, `I64` otherwise; this
/// matches the numeric staging the JSON parser uses, so a number means the
/// same thing in source text and in data.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F64(f64),
    Str(Arc<str>),
    Rune(char),
}

/// A type annotation on a parameter, return position, or pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    Str,
    Rune,
    Array,
    Object,
    Function,
    /// A user-defined object type, matched against an object's type name.
    Named(Name),
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TypeTag::I8 => "i8",
            TypeTag::I16 => "i16",
            TypeTag::I32 => "i32",
            TypeTag::I64 => "i64",
            TypeTag::U8 => "u8",
            TypeTag::U16 => "u16",
            TypeTag::U32 => "u32",
            TypeTag::U64 => "u64",
            TypeTag::F32 => "f32",
            TypeTag::F64 => "f64",
            TypeTag::Bool => "bool",
            TypeTag::Str => "string",
            TypeTag::Rune => "rune",
            TypeTag::Array => "array",
            TypeTag::Object => "object",
            TypeTag::Function => "function",
            TypeTag::Named(n) => return write!(f, "{n}"),
        };
        write!(f, "{s}")
    }
}

/// One function parameter: name, optional type annotation, optional default
/// expression, and a by-reference marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Name,
    pub ty: Option<TypeTag>,
    pub default: Option<Expr>,
    pub by_ref: bool,
}

/// A function declaration, shared between its statement form, its expression
/// form, and every function value created from it.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    /// Binding name; `None` for anonymous function expressions.
    pub name: Option<Name>,
    pub is_async: bool,
    pub params: Vec<Param>,
    /// Trailing `...rest` parameter, collecting extra arguments as an array.
    pub rest_param: Option<Name>,
    pub return_type: Option<TypeTag>,
    pub body: Arc<Block>,
    pub span: Span,
}

impl FunctionDecl {
    /// Number of parameters without defaults; calls must supply at least
    /// this many arguments.
    pub fn required_params(&self) -> usize {
        self.params.iter().filter(|p| p.default.is_none()).count()
    }
}

/// A brace-delimited statement sequence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

/// One piece of an interpolated string: either a literal fragment or an
/// embedded `${expr}`.
#[derive(Debug, Clone, PartialEq)]
pub enum InterpPart {
    Lit(Arc<str>),
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation `-x`
    Neg,
    /// Logical not `!x`
    Not,
    /// Bitwise complement `~x`
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Short-circuiting `&&`
    And,
    /// Short-circuiting `||`
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncDecOp {
    Incr,
    Decr,
}

/// An expression with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: Box<ExprKind>,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Expr {
            kind: Box::new(kind),
            span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Ident(Name),
    /// String interpolation: alternating literal and expression parts.
    Interp(Vec<InterpPart>),
    Unary {
        op: UnaryOp,
        operand: Expr,
    },
    Binary {
        op: BinaryOp,
        lhs: Expr,
        rhs: Expr,
    },
    Ternary {
        cond: Expr,
        then: Expr,
        otherwise: Expr,
    },
    /// `a ?? b`: yields `a` unless it is null, then evaluates `b`.
    NullCoalesce {
        lhs: Expr,
        rhs: Expr,
    },
    /// Plain or compound assignment. `op` is the combining operator for
    /// `+=`-style forms, `None` for `=`. The target must be an identifier,
    /// an index expression, or a property expression.
    Assign {
        target: Expr,
        op: Option<BinaryOp>,
        value: Expr,
    },
    /// `++x`, `x--`, etc. Prefix yields the new value, postfix the old.
    IncDec {
        target: Expr,
        op: IncDecOp,
        prefix: bool,
    },
    /// `obj.field`; raises on a missing field.
    Property {
        object: Expr,
        name: Name,
        /// `obj?.field`: short-circuits to null when `object` is null.
        optional: bool,
    },
    /// `obj[index]`; object lookup by string key yields null when absent.
    Index {
        object: Expr,
        index: Expr,
        /// `obj?.[index]` short-circuit form.
        optional: bool,
    },
    Call {
        callee: Expr,
        args: Vec<Expr>,
    },
    Function(Arc<FunctionDecl>),
    Array(Vec<Expr>),
    /// Object literal; field order is preserved.
    ObjectLiteral(Vec<(Name, Expr)>),
    /// `await e`: joins a task, passes any other value through.
    Await(Expr),
}

/// A `switch` arm: a pattern plus the statements to run when it matches.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub pattern: Pattern,
    pub body: Block,
    pub span: Span,
}

/// Patterns appear in `switch` cases.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// `_` matches anything, binds nothing.
    Wildcard,
    Literal(Literal),
    /// Inclusive numeric range `lo..hi`.
    Range(Literal, Literal),
    /// Matches by runtime type.
    Type(TypeTag),
    /// Matches anything, binding it to a name in the arm's scope.
    Binding(Name),
    /// Array destructuring; `rest` collects the remainder.
    Array {
        elements: Vec<Pattern>,
        rest: Option<Name>,
    },
    /// Object destructuring. Each entry is a field name plus an optional
    /// sub-pattern (a bare name binds the field). `rest` permits unmatched
    /// fields.
    Object {
        fields: Vec<(Name, Option<Pattern>)>,
        rest: bool,
    },
    /// `p1 | p2 | ...`: first matching alternative wins.
    Or(Vec<Pattern>),
}

/// An `import` statement, resolved by the module resolver before execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportKind {
    /// `import { a, b } from "path"`
    Named(Vec<Name>),
    /// `import ns from "path"`: binds the whole module as one object.
    Namespace(Name),
}

/// A statement with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: Box<StmtKind>,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Stmt {
            kind: Box::new(kind),
            span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `let x = e;` — `value` is `None` for a bare `let x;` (binds null).
    Let {
        name: Name,
        value: Option<Expr>,
    },
    Const {
        name: Name,
        value: Expr,
    },
    Expr(Expr),
    Block(Block),
    /// `if` / `elif`* / `else`. `branches[0]` is the `if`; the rest are
    /// `elif` arms in source order.
    If {
        branches: Vec<(Expr, Block)>,
        otherwise: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    /// C-style `for (init; cond; step)`; all three clauses optional.
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Block,
    },
    /// `for (x in e)`: arrays yield elements, strings yield runes, objects
    /// yield field names.
    ForIn {
        var: Name,
        iterable: Expr,
        body: Block,
    },
    Switch {
        subject: Expr,
        cases: Vec<SwitchCase>,
        default: Option<Block>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Try {
        body: Block,
        /// Catch parameter name and handler body.
        catch: Option<(Name, Block)>,
        finally: Option<Block>,
    },
    Throw(Expr),
    /// `defer f(args);` — the call runs when the enclosing function exits,
    /// in LIFO order. Arguments are evaluated at the defer site.
    Defer(Expr),
    /// Named function declaration; binds `decl.name` in the current scope.
    FnDecl(Arc<FunctionDecl>),
    Import {
        kind: ImportKind,
        path: Arc<str>,
    },
    /// `export let|const|fn ...` — re-exported by the module executor.
    Export(Box<Stmt>),
    /// `extern fn name(sig) -> ret;` — declares a foreign symbol the
    /// embedder must supply.
    ExternFn {
        name: Name,
        params: Vec<TypeTag>,
        return_type: Option<TypeTag>,
    },
    /// `type Point { x: f64, y: f64 }` — a named object shape used by
    /// annotation checks.
    TypeDef {
        name: Name,
        fields: Vec<(Name, TypeTag)>,
    },
    /// `enum Color { Red, Green = 5, Blue }` — binds an object of integer
    /// constants.
    EnumDef {
        name: Name,
        members: Vec<(Name, Option<i64>)>,
    },
}

/// A parsed source file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        Arc::from(s)
    }

    #[test]
    fn test_required_params_counts_only_defaultless() {
        let decl = FunctionDecl {
            name: Some(name("f")),
            is_async: false,
            params: vec![
                Param {
                    name: name("a"),
                    ty: None,
                    default: None,
                    by_ref: false,
                },
                Param {
                    name: name("b"),
                    ty: None,
                    default: Some(Expr::new(
                        ExprKind::Literal(Literal::I32(1)),
                        Span::new(1, 1),
                    )),
                    by_ref: false,
                },
            ],
            rest_param: None,
            return_type: None,
            body: Arc::new(Block::default()),
            span: Span::new(1, 1),
        };
        assert_eq!(decl.required_params(), 1);
        assert_eq!(decl.params.len(), 2);
    }

    #[test]
    fn test_span_display() {
        assert_eq!(Span::new(3, 7).to_string(), "line 3, column 7");
    }

    #[test]
    fn test_type_tag_display() {
        assert_eq!(TypeTag::I32.to_string(), "i32");
        assert_eq!(TypeTag::Named(name("Point")).to_string(), "Point");
    }

    #[test]
    fn test_ast_nodes_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Expr>();
        assert_send_sync::<Stmt>();
        assert_send_sync::<FunctionDecl>();
        assert_send_sync::<Program>();
    }
}
