//! Recursive-descent parser for Rill
//!
//! Produces `rill-core` ASTs from token streams. Expressions use
//! precedence climbing with C-family precedence; statements are dispatched
//! on their leading keyword. Every node carries the line/column of its
//! first token.

use crate::lexer::{tokenize, ParseError, RawPart, Token, TokenKind};
use rill_core::{
    BinaryOp, Block, Expr, ExprKind, FunctionDecl, ImportKind, IncDecOp, InterpPart, Literal,
    Name, Param, Pattern, Program, Span, Stmt, StmtKind, SwitchCase, TypeTag, UnaryOp,
};
use std::sync::Arc;

/// Parse a whole source file.
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut stmts = Vec::new();
    while !parser.check(&TokenKind::Eof) {
        stmts.push(parser.parse_stmt()?);
    }
    Ok(Program { stmts })
}

/// Parse a single expression (used for interpolation parts). `line`
/// offsets positions so diagnostics point into the enclosing string.
pub fn parse_expression_str(source: &str, line: u32) -> Result<Expr, ParseError> {
    let mut tokens = tokenize(source).map_err(|mut e| {
        e.line = line;
        e
    })?;
    for tok in &mut tokens {
        tok.line = line;
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    parser.expect(&TokenKind::Eof, "end of interpolated expression")?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].kind
    }

    fn span(&self) -> Span {
        let tok = self.peek();
        Span::new(tok.line, tok.column)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        let tok = self.peek();
        ParseError::new(message, tok.line, tok.column)
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(format!("expected {what}, found {:?}", self.peek_kind())))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<Name, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Arc::from(name.as_str()))
            }
            other => Err(self.error_here(format!("expected {what}, found {other:?}"))),
        }
    }

    fn expect_semi(&mut self) -> Result<(), ParseError> {
        self.expect(&TokenKind::Semi, "';'")?;
        Ok(())
    }

    // -- statements ---------------------------------------------------------

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        match self.peek_kind() {
            TokenKind::KwLet => {
                self.advance();
                let name = self.expect_ident("a binding name")?;
                let value = if self.eat(&TokenKind::Assign) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                self.expect_semi()?;
                Ok(Stmt::new(StmtKind::Let { name, value }, span))
            }
            TokenKind::KwConst => {
                self.advance();
                let name = self.expect_ident("a binding name")?;
                self.expect(&TokenKind::Assign, "'=' in const declaration")?;
                let value = self.parse_expr()?;
                self.expect_semi()?;
                Ok(Stmt::new(StmtKind::Const { name, value }, span))
            }
            TokenKind::KwFn => {
                let decl = self.parse_fn_decl(false)?;
                Ok(Stmt::new(StmtKind::FnDecl(decl), span))
            }
            TokenKind::KwAsync => {
                self.advance();
                if !self.check(&TokenKind::KwFn) {
                    return Err(self.error_here("expected 'fn' after 'async'"));
                }
                let decl = self.parse_fn_decl(true)?;
                Ok(Stmt::new(StmtKind::FnDecl(decl), span))
            }
            TokenKind::LBrace => {
                let block = self.parse_block()?;
                Ok(Stmt::new(StmtKind::Block(block), span))
            }
            TokenKind::KwIf => self.parse_if(span),
            TokenKind::KwWhile => {
                self.advance();
                self.expect(&TokenKind::LParen, "'(' after 'while'")?;
                let cond = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "')' after condition")?;
                let body = self.parse_block()?;
                Ok(Stmt::new(StmtKind::While { cond, body }, span))
            }
            TokenKind::KwFor => self.parse_for(span),
            TokenKind::KwSwitch => self.parse_switch(span),
            TokenKind::KwBreak => {
                self.advance();
                self.expect_semi()?;
                Ok(Stmt::new(StmtKind::Break, span))
            }
            TokenKind::KwContinue => {
                self.advance();
                self.expect_semi()?;
                Ok(Stmt::new(StmtKind::Continue, span))
            }
            TokenKind::KwReturn => {
                self.advance();
                let value = if self.check(&TokenKind::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect_semi()?;
                Ok(Stmt::new(StmtKind::Return(value), span))
            }
            TokenKind::KwTry => self.parse_try(span),
            TokenKind::KwThrow => {
                self.advance();
                let value = self.parse_expr()?;
                self.expect_semi()?;
                Ok(Stmt::new(StmtKind::Throw(value), span))
            }
            TokenKind::KwDefer => {
                self.advance();
                let call = self.parse_expr()?;
                if !matches!(&*call.kind, ExprKind::Call { .. }) {
                    return Err(ParseError::new(
                        "defer expects a call expression",
                        span.line,
                        span.column,
                    ));
                }
                self.expect_semi()?;
                Ok(Stmt::new(StmtKind::Defer(call), span))
            }
            TokenKind::KwImport => self.parse_import(span),
            TokenKind::KwExport => {
                self.advance();
                let inner = self.parse_stmt()?;
                match &*inner.kind {
                    StmtKind::Let { .. }
                    | StmtKind::Const { .. }
                    | StmtKind::FnDecl(_)
                    | StmtKind::EnumDef { .. } => {}
                    _ => {
                        return Err(ParseError::new(
                            "only let, const, fn, and enum declarations can be exported",
                            span.line,
                            span.column,
                        ));
                    }
                }
                Ok(Stmt::new(StmtKind::Export(Box::new(inner)), span))
            }
            TokenKind::KwExtern => self.parse_extern(span),
            TokenKind::KwType => self.parse_type_def(span),
            TokenKind::KwEnum => self.parse_enum(span),
            _ => {
                let expr = self.parse_expr()?;
                self.expect_semi()?;
                Ok(Stmt::new(StmtKind::Expr(expr), span))
            }
        }
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(self.error_here("unexpected end of input in block"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.advance(); // consume '}'
        Ok(Block { stmts })
    }

    /// A braced block, or a single statement treated as one (`if (c)
    /// return x;`).
    fn parse_body(&mut self) -> Result<Block, ParseError> {
        if self.check(&TokenKind::LBrace) {
            self.parse_block()
        } else {
            Ok(Block {
                stmts: vec![self.parse_stmt()?],
            })
        }
    }

    fn parse_if(&mut self, span: Span) -> Result<Stmt, ParseError> {
        self.advance(); // 'if'
        let mut branches = Vec::new();
        self.expect(&TokenKind::LParen, "'(' after 'if'")?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen, "')' after condition")?;
        branches.push((cond, self.parse_body()?));
        let mut otherwise = None;
        loop {
            if self.eat(&TokenKind::KwElif) {
                self.expect(&TokenKind::LParen, "'(' after 'elif'")?;
                let cond = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "')' after condition")?;
                branches.push((cond, self.parse_body()?));
            } else if self.eat(&TokenKind::KwElse) {
                otherwise = Some(self.parse_body()?);
                break;
            } else {
                break;
            }
        }
        Ok(Stmt::new(StmtKind::If { branches, otherwise }, span))
    }

    fn parse_for(&mut self, span: Span) -> Result<Stmt, ParseError> {
        self.advance(); // 'for'
        self.expect(&TokenKind::LParen, "'(' after 'for'")?;

        // `for (x in e)` — one identifier then `in`.
        if matches!(self.peek_kind(), TokenKind::Ident(_))
            && *self.peek_at(1) == TokenKind::KwIn
        {
            let var = self.expect_ident("a loop variable")?;
            self.advance(); // 'in'
            let iterable = self.parse_expr()?;
            self.expect(&TokenKind::RParen, "')' after for-in")?;
            let body = self.parse_block()?;
            return Ok(Stmt::new(StmtKind::ForIn { var, iterable, body }, span));
        }

        // C-style: all three clauses optional.
        let init = if self.check(&TokenKind::Semi) {
            self.advance();
            None
        } else {
            // The init statement consumes its own ';'.
            Some(Box::new(self.parse_stmt()?))
        };
        let cond = if self.check(&TokenKind::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect_semi()?;
        let step = if self.check(&TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&TokenKind::RParen, "')' after for clauses")?;
        let body = self.parse_block()?;
        Ok(Stmt::new(StmtKind::For { init, cond, step, body }, span))
    }

    fn parse_switch(&mut self, span: Span) -> Result<Stmt, ParseError> {
        self.advance(); // 'switch'
        self.expect(&TokenKind::LParen, "'(' after 'switch'")?;
        let subject = self.parse_expr()?;
        self.expect(&TokenKind::RParen, "')' after switch subject")?;
        self.expect(&TokenKind::LBrace, "'{' to open switch body")?;
        let mut cases = Vec::new();
        let mut default = None;
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(self.error_here("unexpected end of input in switch"));
            }
            if self.eat(&TokenKind::KwCase) {
                let case_span = self.span();
                let pattern = self.parse_pattern()?;
                self.expect(&TokenKind::Colon, "':' after case pattern")?;
                let body = self.parse_case_body()?;
                cases.push(SwitchCase {
                    pattern,
                    body,
                    span: case_span,
                });
            } else if self.eat(&TokenKind::KwDefault) {
                self.expect(&TokenKind::Colon, "':' after 'default'")?;
                default = Some(self.parse_case_body()?);
            } else {
                return Err(self.error_here("expected 'case' or 'default' in switch body"));
            }
        }
        self.advance(); // '}'
        Ok(Stmt::new(StmtKind::Switch { subject, cases, default }, span))
    }

    /// Statements until the next `case`, `default`, or the closing brace.
    fn parse_case_body(&mut self) -> Result<Block, ParseError> {
        let mut stmts = Vec::new();
        while !matches!(
            self.peek_kind(),
            TokenKind::KwCase | TokenKind::KwDefault | TokenKind::RBrace | TokenKind::Eof
        ) {
            stmts.push(self.parse_stmt()?);
        }
        Ok(Block { stmts })
    }

    fn parse_try(&mut self, span: Span) -> Result<Stmt, ParseError> {
        self.advance(); // 'try'
        let body = self.parse_block()?;
        let mut catch = None;
        if self.eat(&TokenKind::KwCatch) {
            self.expect(&TokenKind::LParen, "'(' after 'catch'")?;
            let param = self.expect_ident("a catch parameter")?;
            self.expect(&TokenKind::RParen, "')' after catch parameter")?;
            catch = Some((param, self.parse_block()?));
        }
        let finally = if self.eat(&TokenKind::KwFinally) {
            Some(self.parse_block()?)
        } else {
            None
        };
        if catch.is_none() && finally.is_none() {
            return Err(ParseError::new(
                "try requires a catch or finally clause",
                span.line,
                span.column,
            ));
        }
        Ok(Stmt::new(StmtKind::Try { body, catch, finally }, span))
    }

    fn parse_import(&mut self, span: Span) -> Result<Stmt, ParseError> {
        self.advance(); // 'import'
        let kind = if self.eat(&TokenKind::LBrace) {
            let mut names = Vec::new();
            loop {
                names.push(self.expect_ident("an import name")?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RBrace, "'}' after import names")?;
            ImportKind::Named(names)
        } else {
            ImportKind::Namespace(self.expect_ident("a namespace name")?)
        };
        self.expect(&TokenKind::KwFrom, "'from' in import")?;
        let path = match self.peek_kind().clone() {
            TokenKind::Str(path) => {
                self.advance();
                Arc::from(path.as_str())
            }
            _ => return Err(self.error_here("expected a module path string")),
        };
        self.expect_semi()?;
        Ok(Stmt::new(StmtKind::Import { kind, path }, span))
    }

    fn parse_extern(&mut self, span: Span) -> Result<Stmt, ParseError> {
        self.advance(); // 'extern'
        self.expect(&TokenKind::KwFn, "'fn' after 'extern'")?;
        let name = self.expect_ident("a foreign symbol name")?;
        self.expect(&TokenKind::LParen, "'(' in extern signature")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                params.push(self.parse_type_tag()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')' in extern signature")?;
        let return_type = if self.eat(&TokenKind::Arrow) {
            Some(self.parse_type_tag()?)
        } else {
            None
        };
        self.expect_semi()?;
        Ok(Stmt::new(
            StmtKind::ExternFn { name, params, return_type },
            span,
        ))
    }

    fn parse_type_def(&mut self, span: Span) -> Result<Stmt, ParseError> {
        self.advance(); // 'type'
        let name = self.expect_ident("a type name")?;
        self.expect(&TokenKind::LBrace, "'{' to open type body")?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let field = self.expect_ident("a field name")?;
            self.expect(&TokenKind::Colon, "':' after field name")?;
            let tag = self.parse_type_tag()?;
            fields.push((field, tag));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace, "'}' to close type body")?;
        Ok(Stmt::new(StmtKind::TypeDef { name, fields }, span))
    }

    fn parse_enum(&mut self, span: Span) -> Result<Stmt, ParseError> {
        self.advance(); // 'enum'
        let name = self.expect_ident("an enum name")?;
        self.expect(&TokenKind::LBrace, "'{' to open enum body")?;
        let mut members = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let member = self.expect_ident("an enum member")?;
            let value = if self.eat(&TokenKind::Assign) {
                match self.peek_kind().clone() {
                    TokenKind::Int(n) => {
                        self.advance();
                        Some(n)
                    }
                    _ => return Err(self.error_here("enum values must be integer literals")),
                }
            } else {
                None
            };
            members.push((member, value));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace, "'}' to close enum body")?;
        Ok(Stmt::new(StmtKind::EnumDef { name, members }, span))
    }

    // -- functions ----------------------------------------------------------

    fn parse_fn_decl(&mut self, is_async: bool) -> Result<Arc<FunctionDecl>, ParseError> {
        let span = self.span();
        self.advance(); // 'fn'
        let name: Option<Name> = match self.peek_kind().clone() {
            TokenKind::Ident(n) => {
                self.advance();
                Some(Arc::from(n.as_str()))
            }
            _ => None,
        };
        let (params, rest_param) = self.parse_params()?;
        let return_type = if self.eat(&TokenKind::Arrow) {
            Some(self.parse_type_tag()?)
        } else {
            None
        };
        let body = Arc::new(self.parse_block()?);
        Ok(Arc::new(FunctionDecl {
            name,
            is_async,
            params,
            rest_param,
            return_type,
            body,
            span,
        }))
    }

    fn parse_params(&mut self) -> Result<(Vec<Param>, Option<Name>), ParseError> {
        self.expect(&TokenKind::LParen, "'(' to open parameter list")?;
        let mut params = Vec::new();
        let mut rest_param = None;
        if !self.check(&TokenKind::RParen) {
            loop {
                if self.eat(&TokenKind::Ellipsis) {
                    rest_param = Some(self.expect_ident("a rest parameter name")?);
                    break;
                }
                let by_ref = self.eat(&TokenKind::KwRef);
                let name = self.expect_ident("a parameter name")?;
                let ty = if self.eat(&TokenKind::Colon) {
                    Some(self.parse_type_tag()?)
                } else {
                    None
                };
                let default = if self.eat(&TokenKind::Assign) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                params.push(Param { name, ty, default, by_ref });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')' to close parameter list")?;
        Ok((params, rest_param))
    }

    fn parse_type_tag(&mut self) -> Result<TypeTag, ParseError> {
        let name = self.expect_ident("a type name")?;
        Ok(match name.as_ref() {
            "i8" => TypeTag::I8,
            "i16" => TypeTag::I16,
            "i32" => TypeTag::I32,
            "i64" => TypeTag::I64,
            "u8" => TypeTag::U8,
            "u16" => TypeTag::U16,
            "u32" => TypeTag::U32,
            "u64" => TypeTag::U64,
            "f32" => TypeTag::F32,
            "f64" => TypeTag::F64,
            "bool" => TypeTag::Bool,
            "string" => TypeTag::Str,
            "rune" => TypeTag::Rune,
            "array" => TypeTag::Array,
            "object" => TypeTag::Object,
            "function" => TypeTag::Function,
            _ => TypeTag::Named(name),
        })
    }

    // -- patterns -----------------------------------------------------------

    fn parse_pattern(&mut self) -> Result<Pattern, ParseError> {
        let first = self.parse_pattern_alt()?;
        if !self.check(&TokenKind::Pipe) {
            return Ok(first);
        }
        let mut alts = vec![first];
        while self.eat(&TokenKind::Pipe) {
            alts.push(self.parse_pattern_alt()?);
        }
        Ok(Pattern::Or(alts))
    }

    fn parse_pattern_alt(&mut self) -> Result<Pattern, ParseError> {
        let span = self.span();
        match self.peek_kind().clone() {
            TokenKind::Int(_)
            | TokenKind::Float(_)
            | TokenKind::Str(_)
            | TokenKind::Rune(_)
            | TokenKind::KwTrue
            | TokenKind::KwFalse
            | TokenKind::KwNull
            | TokenKind::Minus => {
                let lo = self.parse_literal_for_pattern()?;
                if self.eat(&TokenKind::DotDot) {
                    let hi = self.parse_literal_for_pattern()?;
                    Ok(Pattern::Range(lo, hi))
                } else {
                    Ok(Pattern::Literal(lo))
                }
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                let mut rest = None;
                while !self.check(&TokenKind::RBracket) {
                    if self.eat(&TokenKind::Ellipsis) {
                        rest = Some(self.expect_ident("a rest binding")?);
                        break;
                    }
                    elements.push(self.parse_pattern()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket, "']' to close array pattern")?;
                Ok(Pattern::Array { elements, rest })
            }
            TokenKind::LBrace => {
                self.advance();
                let mut fields = Vec::new();
                let mut rest = false;
                while !self.check(&TokenKind::RBrace) {
                    if self.eat(&TokenKind::Ellipsis) {
                        rest = true;
                        break;
                    }
                    let name = self.expect_ident("a field name")?;
                    let sub = if self.eat(&TokenKind::Colon) {
                        Some(self.parse_pattern()?)
                    } else {
                        None
                    };
                    fields.push((name, sub));
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBrace, "'}' to close object pattern")?;
                Ok(Pattern::Object { fields, rest })
            }
            TokenKind::Ident(name) => {
                self.advance();
                if name == "_" {
                    return Ok(Pattern::Wildcard);
                }
                // Type-name patterns: primitive type words and capitalized
                // user types; anything else binds.
                match name.as_str() {
                    "i8" | "i16" | "i32" | "i64" | "u8" | "u16" | "u32" | "u64" | "f32"
                    | "f64" | "bool" | "string" | "rune" | "array" | "object" | "function" => {
                        let tag = match name.as_str() {
                            "i8" => TypeTag::I8,
                            "i16" => TypeTag::I16,
                            "i32" => TypeTag::I32,
                            "i64" => TypeTag::I64,
                            "u8" => TypeTag::U8,
                            "u16" => TypeTag::U16,
                            "u32" => TypeTag::U32,
                            "u64" => TypeTag::U64,
                            "f32" => TypeTag::F32,
                            "f64" => TypeTag::F64,
                            "bool" => TypeTag::Bool,
                            "string" => TypeTag::Str,
                            "rune" => TypeTag::Rune,
                            "array" => TypeTag::Array,
                            "object" => TypeTag::Object,
                            _ => TypeTag::Function,
                        };
                        Ok(Pattern::Type(tag))
                    }
                    _ if name.chars().next().is_some_and(char::is_uppercase) => {
                        Ok(Pattern::Type(TypeTag::Named(Arc::from(name.as_str()))))
                    }
                    _ => Ok(Pattern::Binding(Arc::from(name.as_str()))),
                }
            }
            other => Err(ParseError::new(
                format!("expected a pattern, found {other:?}"),
                span.line,
                span.column,
            )),
        }
    }

    fn parse_literal_for_pattern(&mut self) -> Result<Literal, ParseError> {
        let negative = self.eat(&TokenKind::Minus);
        match self.peek_kind().clone() {
            TokenKind::Int(n) => {
                self.advance();
                let n = if negative { -n } else { n };
                Ok(match i32::try_from(n) {
                    Ok(small) => Literal::I32(small),
                    Err(_) => Literal::I64(n),
                })
            }
            TokenKind::Float(f) => {
                self.advance();
                Ok(Literal::F64(if negative { -f } else { f }))
            }
            TokenKind::Str(s) if !negative => {
                self.advance();
                Ok(Literal::Str(Arc::from(s.as_str())))
            }
            TokenKind::Rune(c) if !negative => {
                self.advance();
                Ok(Literal::Rune(c))
            }
            TokenKind::KwTrue if !negative => {
                self.advance();
                Ok(Literal::Bool(true))
            }
            TokenKind::KwFalse if !negative => {
                self.advance();
                Ok(Literal::Bool(false))
            }
            TokenKind::KwNull if !negative => {
                self.advance();
                Ok(Literal::Null)
            }
            _ => Err(self.error_here("expected a literal")),
        }
    }

    // -- expressions --------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        let target = self.parse_ternary()?;
        let op = match self.peek_kind() {
            TokenKind::Assign => None,
            TokenKind::PlusEq => Some(BinaryOp::Add),
            TokenKind::MinusEq => Some(BinaryOp::Sub),
            TokenKind::StarEq => Some(BinaryOp::Mul),
            TokenKind::SlashEq => Some(BinaryOp::Div),
            TokenKind::PercentEq => Some(BinaryOp::Mod),
            _ => return Ok(target),
        };
        let span = self.span();
        self.advance();
        if !matches!(
            &*target.kind,
            ExprKind::Ident(_) | ExprKind::Index { .. } | ExprKind::Property { .. }
        ) {
            return Err(ParseError::new(
                "invalid assignment target",
                target.span.line,
                target.span.column,
            ));
        }
        let value = self.parse_assignment()?;
        Ok(Expr::new(ExprKind::Assign { target, op, value }, span))
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_coalesce()?;
        if !self.check(&TokenKind::Question) {
            return Ok(cond);
        }
        let span = self.span();
        self.advance();
        let then = self.parse_assignment()?;
        self.expect(&TokenKind::Colon, "':' in ternary")?;
        let otherwise = self.parse_assignment()?;
        Ok(Expr::new(
            ExprKind::Ternary { cond, then, otherwise },
            span,
        ))
    }

    fn parse_coalesce(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_binary(0)?;
        while self.check(&TokenKind::QuestionQuestion) {
            let span = self.span();
            self.advance();
            let rhs = self.parse_binary(0)?;
            lhs = Expr::new(ExprKind::NullCoalesce { lhs, rhs }, span);
        }
        Ok(lhs)
    }

    /// Binary operators by precedence level, lowest first.
    fn binary_op_at(&self, level: usize) -> Option<BinaryOp> {
        let op = match (level, self.peek_kind()) {
            (0, TokenKind::OrOr) => BinaryOp::Or,
            (1, TokenKind::AndAnd) => BinaryOp::And,
            (2, TokenKind::Pipe) => BinaryOp::BitOr,
            (3, TokenKind::Caret) => BinaryOp::BitXor,
            (4, TokenKind::Amp) => BinaryOp::BitAnd,
            (5, TokenKind::EqEq) => BinaryOp::Eq,
            (5, TokenKind::NotEq) => BinaryOp::Ne,
            (6, TokenKind::Lt) => BinaryOp::Lt,
            (6, TokenKind::Le) => BinaryOp::Le,
            (6, TokenKind::Gt) => BinaryOp::Gt,
            (6, TokenKind::Ge) => BinaryOp::Ge,
            (7, TokenKind::Shl) => BinaryOp::Shl,
            (7, TokenKind::Shr) => BinaryOp::Shr,
            (8, TokenKind::Plus) => BinaryOp::Add,
            (8, TokenKind::Minus) => BinaryOp::Sub,
            (9, TokenKind::Star) => BinaryOp::Mul,
            (9, TokenKind::Slash) => BinaryOp::Div,
            (9, TokenKind::Percent) => BinaryOp::Mod,
            _ => return None,
        };
        Some(op)
    }

    fn parse_binary(&mut self, level: usize) -> Result<Expr, ParseError> {
        if level > 9 {
            return self.parse_unary();
        }
        let mut lhs = self.parse_binary(level + 1)?;
        while let Some(op) = self.binary_op_at(level) {
            let span = self.span();
            self.advance();
            let rhs = self.parse_binary(level + 1)?;
            lhs = Expr::new(ExprKind::Binary { op, lhs, rhs }, span);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        match self.peek_kind() {
            TokenKind::Not => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::new(ExprKind::Unary { op: UnaryOp::Not, operand }, span))
            }
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::new(ExprKind::Unary { op: UnaryOp::Neg, operand }, span))
            }
            TokenKind::Tilde => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::new(
                    ExprKind::Unary { op: UnaryOp::BitNot, operand },
                    span,
                ))
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let op = if self.check(&TokenKind::PlusPlus) {
                    IncDecOp::Incr
                } else {
                    IncDecOp::Decr
                };
                self.advance();
                let target = self.parse_unary()?;
                self.check_incdec_target(&target)?;
                Ok(Expr::new(
                    ExprKind::IncDec { target, op, prefix: true },
                    span,
                ))
            }
            TokenKind::KwAwait => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::new(ExprKind::Await(operand), span))
            }
            _ => self.parse_postfix(),
        }
    }

    fn check_incdec_target(&self, target: &Expr) -> Result<(), ParseError> {
        if matches!(
            &*target.kind,
            ExprKind::Ident(_) | ExprKind::Index { .. } | ExprKind::Property { .. }
        ) {
            Ok(())
        } else {
            Err(ParseError::new(
                "increment/decrement target must be an identifier, index, or property",
                target.span.line,
                target.span.column,
            ))
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            let span = self.span();
            match self.peek_kind() {
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&TokenKind::RParen, "')' to close argument list")?;
                    expr = Expr::new(ExprKind::Call { callee: expr, args }, span);
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket, "']' to close index")?;
                    expr = Expr::new(
                        ExprKind::Index { object: expr, index, optional: false },
                        span,
                    );
                }
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_ident("a property name")?;
                    expr = Expr::new(
                        ExprKind::Property { object: expr, name, optional: false },
                        span,
                    );
                }
                TokenKind::QuestionDot => {
                    self.advance();
                    if self.eat(&TokenKind::LBracket) {
                        let index = self.parse_expr()?;
                        self.expect(&TokenKind::RBracket, "']' to close index")?;
                        expr = Expr::new(
                            ExprKind::Index { object: expr, index, optional: true },
                            span,
                        );
                    } else {
                        let name = self.expect_ident("a property name")?;
                        expr = Expr::new(
                            ExprKind::Property { object: expr, name, optional: true },
                            span,
                        );
                    }
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let op = if self.check(&TokenKind::PlusPlus) {
                        IncDecOp::Incr
                    } else {
                        IncDecOp::Decr
                    };
                    self.advance();
                    self.check_incdec_target(&expr)?;
                    expr = Expr::new(
                        ExprKind::IncDec { target: expr, op, prefix: false },
                        span,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        match self.peek_kind().clone() {
            TokenKind::Int(n) => {
                self.advance();
                let lit = match i32::try_from(n) {
                    Ok(small) => Literal::I32(small),
                    Err(_) => Literal::I64(n),
                };
                Ok(Expr::new(ExprKind::Literal(lit), span))
            }
            TokenKind::Float(f) => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::F64(f)), span))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::new(
                    ExprKind::Literal(Literal::Str(Arc::from(s.as_str()))),
                    span,
                ))
            }
            TokenKind::InterpStr(parts) => {
                self.advance();
                let mut out = Vec::with_capacity(parts.len());
                for part in parts {
                    match part {
                        RawPart::Lit(s) => out.push(InterpPart::Lit(Arc::from(s.as_str()))),
                        RawPart::Expr(raw, line) => {
                            out.push(InterpPart::Expr(parse_expression_str(&raw, line)?));
                        }
                    }
                }
                Ok(Expr::new(ExprKind::Interp(out), span))
            }
            TokenKind::Rune(c) => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Rune(c)), span))
            }
            TokenKind::KwTrue => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Bool(true)), span))
            }
            TokenKind::KwFalse => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Bool(false)), span))
            }
            TokenKind::KwNull => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Null), span))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::new(ExprKind::Ident(Arc::from(name.as_str())), span))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "')' to close grouping")?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elems = Vec::new();
                if !self.check(&TokenKind::RBracket) {
                    loop {
                        elems.push(self.parse_expr()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBracket, "']' to close array literal")?;
                Ok(Expr::new(ExprKind::Array(elems), span))
            }
            TokenKind::LBrace => {
                self.advance();
                let mut fields = Vec::new();
                if !self.check(&TokenKind::RBrace) {
                    loop {
                        let name: Name = match self.peek_kind().clone() {
                            TokenKind::Ident(n) => {
                                self.advance();
                                Arc::from(n.as_str())
                            }
                            TokenKind::Str(s) => {
                                self.advance();
                                Arc::from(s.as_str())
                            }
                            _ => return Err(self.error_here("expected a field name")),
                        };
                        self.expect(&TokenKind::Colon, "':' after field name")?;
                        fields.push((name, self.parse_expr()?));
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBrace, "'}' to close object literal")?;
                Ok(Expr::new(ExprKind::ObjectLiteral(fields), span))
            }
            TokenKind::KwFn => {
                let decl = self.parse_fn_decl(false)?;
                Ok(Expr::new(ExprKind::Function(decl), span))
            }
            TokenKind::KwAsync => {
                self.advance();
                if !self.check(&TokenKind::KwFn) {
                    return Err(self.error_here("expected 'fn' after 'async'"));
                }
                let decl = self.parse_fn_decl(true)?;
                Ok(Expr::new(ExprKind::Function(decl), span))
            }
            other => Err(self.error_here(format!("expected an expression, found {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        parse_program(src).unwrap()
    }

    #[test]
    fn test_let_and_for_in() {
        // The E1 program shape.
        let p = parse("let xs = [1,2,3]; let s = 0; for (x in xs) { s = s + x; } print(s);");
        assert_eq!(p.stmts.len(), 4);
        assert!(matches!(&*p.stmts[0].kind, StmtKind::Let { .. }));
        let StmtKind::ForIn { var, body, .. } = &*p.stmts[2].kind else {
            panic!("expected for-in");
        };
        assert_eq!(var.as_ref(), "x");
        assert_eq!(body.stmts.len(), 1);
    }

    #[test]
    fn test_async_fn_spawn_await() {
        // The E2 program shape.
        let p = parse("async fn f(x) { return x * 2; } let t = spawn(f, 21); print(await t);");
        let StmtKind::FnDecl(decl) = &*p.stmts[0].kind else {
            panic!("expected fn decl");
        };
        assert!(decl.is_async);
        assert_eq!(decl.params.len(), 1);
        let StmtKind::Expr(print_call) = &*p.stmts[2].kind else {
            panic!("expected print call");
        };
        let ExprKind::Call { args, .. } = &*print_call.kind else {
            panic!("expected call");
        };
        assert!(matches!(&*args[0].kind, ExprKind::Await(_)));
    }

    #[test]
    fn test_method_chain_and_member_calls() {
        let p = parse(r#"ch.send("a"); print(ch.recv());"#);
        let StmtKind::Expr(send) = &*p.stmts[0].kind else { panic!() };
        let ExprKind::Call { callee, .. } = &*send.kind else { panic!() };
        assert!(matches!(&*callee.kind, ExprKind::Property { .. }));
    }

    #[test]
    fn test_precedence() {
        let p = parse("let x = 1 + 2 * 3 == 7 && true;");
        let StmtKind::Let { value: Some(v), .. } = &*p.stmts[0].kind else {
            panic!()
        };
        // Top node is &&.
        let ExprKind::Binary { op: BinaryOp::And, lhs, .. } = &*v.kind else {
            panic!("expected && at top, got {:?}", v.kind);
        };
        let ExprKind::Binary { op: BinaryOp::Eq, lhs: sum, .. } = &*lhs.kind else {
            panic!("expected == under &&");
        };
        let ExprKind::Binary { op: BinaryOp::Add, rhs: product, .. } = &*sum.kind else {
            panic!("expected + under ==");
        };
        assert!(matches!(
            &*product.kind,
            ExprKind::Binary { op: BinaryOp::Mul, .. }
        ));
    }

    #[test]
    fn test_optional_chain_and_coalesce() {
        let p = parse("let v = a?.b ?? c?.[0];");
        let StmtKind::Let { value: Some(v), .. } = &*p.stmts[0].kind else {
            panic!()
        };
        let ExprKind::NullCoalesce { lhs, rhs } = &*v.kind else {
            panic!("expected ?? at top");
        };
        assert!(matches!(
            &*lhs.kind,
            ExprKind::Property { optional: true, .. }
        ));
        assert!(matches!(&*rhs.kind, ExprKind::Index { optional: true, .. }));
    }

    #[test]
    fn test_try_catch_finally() {
        let p = parse("try { risky(); } catch (e) { print(e); } finally { done(); }");
        let StmtKind::Try { catch, finally, .. } = &*p.stmts[0].kind else {
            panic!()
        };
        assert_eq!(catch.as_ref().unwrap().0.as_ref(), "e");
        assert!(finally.is_some());
        assert!(parse_program("try { x(); }").is_err());
    }

    #[test]
    fn test_switch_with_patterns() {
        let p = parse(
            "switch (v) { case 1: one(); case 2..9: range(); case [a, ...rest]: arr(); case string: s(); default: other(); }",
        );
        let StmtKind::Switch { cases, default, .. } = &*p.stmts[0].kind else {
            panic!()
        };
        assert_eq!(cases.len(), 4);
        assert!(matches!(cases[0].pattern, Pattern::Literal(Literal::I32(1))));
        assert!(matches!(cases[1].pattern, Pattern::Range(_, _)));
        assert!(matches!(cases[2].pattern, Pattern::Array { .. }));
        assert!(matches!(cases[3].pattern, Pattern::Type(TypeTag::Str)));
        assert!(default.is_some());
    }

    #[test]
    fn test_params_full_shape() {
        let p = parse("fn f(a, b: i32 = 5, ref c, ...rest) -> i64 { return 0; }");
        let StmtKind::FnDecl(decl) = &*p.stmts[0].kind else { panic!() };
        assert_eq!(decl.params.len(), 3);
        assert_eq!(decl.params[1].ty, Some(TypeTag::I32));
        assert!(decl.params[1].default.is_some());
        assert!(decl.params[2].by_ref);
        assert_eq!(decl.rest_param.as_deref(), Some("rest"));
        assert_eq!(decl.return_type, Some(TypeTag::I64));
        assert_eq!(decl.required_params(), 2);
    }

    #[test]
    fn test_compound_assignment_and_incdec() {
        let p = parse("x += 2; a[0] *= 3; o.n++; --y;");
        let StmtKind::Expr(e) = &*p.stmts[0].kind else { panic!() };
        assert!(matches!(
            &*e.kind,
            ExprKind::Assign { op: Some(BinaryOp::Add), .. }
        ));
        let StmtKind::Expr(e) = &*p.stmts[2].kind else { panic!() };
        assert!(matches!(
            &*e.kind,
            ExprKind::IncDec { prefix: false, op: IncDecOp::Incr, .. }
        ));
        // Invalid target rejected at parse time.
        assert!(parse_program("1 = 2;").is_err());
        assert!(parse_program("(a + b)++;").is_err());
    }

    #[test]
    fn test_interpolated_string_expr() {
        let p = parse(r#"let m = "sum: ${a + b}";"#);
        let StmtKind::Let { value: Some(v), .. } = &*p.stmts[0].kind else {
            panic!()
        };
        let ExprKind::Interp(parts) = &*v.kind else { panic!("expected interp") };
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[1], InterpPart::Expr(e)
            if matches!(&*e.kind, ExprKind::Binary { op: BinaryOp::Add, .. })));
    }

    #[test]
    fn test_imports_exports() {
        let p = parse(r#"import { helper, thing } from "lib/util"; import net from "net";"#);
        let StmtKind::Import { kind: ImportKind::Named(names), path } = &*p.stmts[0].kind else {
            panic!()
        };
        assert_eq!(names.len(), 2);
        assert_eq!(path.as_ref(), "lib/util");
        assert!(matches!(
            &*p.stmts[1].kind,
            StmtKind::Import { kind: ImportKind::Namespace(_), .. }
        ));

        let p = parse("export fn f() { } export const k = 1;");
        assert!(matches!(&*p.stmts[0].kind, StmtKind::Export(_)));
        assert!(parse_program("export while (x) { }").is_err());
    }

    #[test]
    fn test_extern_type_enum() {
        let p = parse(
            "extern fn abs(i32) -> i32; type Point { x: f64, y: f64 } enum Color { Red, Green = 5, Blue }",
        );
        let StmtKind::ExternFn { name, params, return_type } = &*p.stmts[0].kind else {
            panic!()
        };
        assert_eq!(name.as_ref(), "abs");
        assert_eq!(params, &[TypeTag::I32]);
        assert_eq!(*return_type, Some(TypeTag::I32));
        assert!(matches!(&*p.stmts[1].kind, StmtKind::TypeDef { .. }));
        let StmtKind::EnumDef { members, .. } = &*p.stmts[2].kind else { panic!() };
        let expected: (Name, Option<i64>) = (Arc::from("Green"), Some(5));
        assert_eq!(members[1], expected);
    }

    #[test]
    fn test_defer_requires_call() {
        assert!(parse_program("fn f() { defer cleanup(); }").is_ok());
        assert!(parse_program("fn f() { defer 42; }").is_err());
    }

    #[test]
    fn test_c_style_for() {
        let p = parse("for (let i = 0; i < 10; i++) { work(i); }");
        let StmtKind::For { init, cond, step, .. } = &*p.stmts[0].kind else {
            panic!()
        };
        assert!(init.is_some());
        assert!(cond.is_some());
        assert!(step.is_some());
        // All clauses optional.
        assert!(parse_program("for (;;) { break; }").is_ok());
    }

    #[test]
    fn test_line_numbers_attached() {
        let p = parse("let a = 1;\nlet b = 2;\n");
        assert_eq!(p.stmts[0].span.line, 1);
        assert_eq!(p.stmts[1].span.line, 2);
    }
}
