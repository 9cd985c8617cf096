//! Tokenizer for Rill source text
//!
//! Hand-written scanner with line/column tracking. Interpolated strings
//! are split here into literal and raw-expression parts; the parser runs a
//! sub-parser over each expression part.

use std::fmt;

/// A tokenizer or parser failure, with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        ParseError {
            message: message.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {}, column {})", self.message, self.line, self.column)
    }
}

impl std::error::Error for ParseError {}

/// One piece of an interpolated string, pre-parse.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPart {
    Lit(String),
    /// Raw expression source plus the line it starts on.
    Expr(String, u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    InterpStr(Vec<RawPart>),
    Rune(char),
    Ident(String),

    // Keywords
    KwLet,
    KwConst,
    KwFn,
    KwAsync,
    KwReturn,
    KwIf,
    KwElif,
    KwElse,
    KwWhile,
    KwFor,
    KwIn,
    KwSwitch,
    KwCase,
    KwDefault,
    KwBreak,
    KwContinue,
    KwTry,
    KwCatch,
    KwFinally,
    KwThrow,
    KwDefer,
    KwImport,
    KwExport,
    KwFrom,
    KwExtern,
    KwType,
    KwEnum,
    KwTrue,
    KwFalse,
    KwNull,
    KwAwait,
    KwRef,

    // Punctuation and operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Not,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Dot,
    DotDot,
    Ellipsis,
    Question,
    QuestionDot,
    QuestionQuestion,
    PlusPlus,
    MinusMinus,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    Arrow,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
}

fn keyword(word: &str) -> Option<TokenKind> {
    Some(match word {
        "let" => TokenKind::KwLet,
        "const" => TokenKind::KwConst,
        "fn" => TokenKind::KwFn,
        "async" => TokenKind::KwAsync,
        "return" => TokenKind::KwReturn,
        "if" => TokenKind::KwIf,
        "elif" => TokenKind::KwElif,
        "else" => TokenKind::KwElse,
        "while" => TokenKind::KwWhile,
        "for" => TokenKind::KwFor,
        "in" => TokenKind::KwIn,
        "switch" => TokenKind::KwSwitch,
        "case" => TokenKind::KwCase,
        "default" => TokenKind::KwDefault,
        "break" => TokenKind::KwBreak,
        "continue" => TokenKind::KwContinue,
        "try" => TokenKind::KwTry,
        "catch" => TokenKind::KwCatch,
        "finally" => TokenKind::KwFinally,
        "throw" => TokenKind::KwThrow,
        "defer" => TokenKind::KwDefer,
        "import" => TokenKind::KwImport,
        "export" => TokenKind::KwExport,
        "from" => TokenKind::KwFrom,
        "extern" => TokenKind::KwExtern,
        "type" => TokenKind::KwType,
        "enum" => TokenKind::KwEnum,
        "true" => TokenKind::KwTrue,
        "false" => TokenKind::KwFalse,
        "null" => TokenKind::KwNull,
        "await" => TokenKind::KwAwait,
        "ref" => TokenKind::KwRef,
        _ => return None,
    })
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
}

/// Tokenize a whole source file.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        column: 1,
    };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.line, self.column)
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    let (line, column) = (self.line, self.column);
                    self.bump();
                    self.bump();
                    loop {
                        match (self.peek(), self.peek_at(1)) {
                            (Some('*'), Some('/')) => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            (Some(_), _) => {
                                self.bump();
                            }
                            (None, _) => {
                                return Err(ParseError::new(
                                    "unterminated block comment",
                                    line,
                                    column,
                                ));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_trivia()?;
        let (line, column) = (self.line, self.column);
        let token = |kind| Token { kind, line, column };

        let Some(c) = self.peek() else {
            return Ok(token(TokenKind::Eof));
        };

        if c.is_ascii_digit() {
            return Ok(token(self.lex_number()?));
        }
        if c.is_alphabetic() || c == '_' {
            let mut word = String::new();
            while let Some(c) = self.peek() {
                if c.is_alphanumeric() || c == '_' {
                    word.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            return Ok(token(keyword(&word).unwrap_or(TokenKind::Ident(word))));
        }
        if c == '"' {
            return Ok(token(self.lex_string()?));
        }
        if c == '\'' {
            return Ok(token(self.lex_rune()?));
        }

        self.bump();
        let two = |lexer: &mut Lexer, next: char, yes: TokenKind, no: TokenKind| {
            if lexer.peek() == Some(next) {
                lexer.bump();
                yes
            } else {
                no
            }
        };

        let kind = match c {
            '+' => match self.peek() {
                Some('+') => {
                    self.bump();
                    TokenKind::PlusPlus
                }
                Some('=') => {
                    self.bump();
                    TokenKind::PlusEq
                }
                _ => TokenKind::Plus,
            },
            '-' => match self.peek() {
                Some('-') => {
                    self.bump();
                    TokenKind::MinusMinus
                }
                Some('=') => {
                    self.bump();
                    TokenKind::MinusEq
                }
                Some('>') => {
                    self.bump();
                    TokenKind::Arrow
                }
                _ => TokenKind::Minus,
            },
            '*' => two(self, '=', TokenKind::StarEq, TokenKind::Star),
            '/' => two(self, '=', TokenKind::SlashEq, TokenKind::Slash),
            '%' => two(self, '=', TokenKind::PercentEq, TokenKind::Percent),
            '=' => two(self, '=', TokenKind::EqEq, TokenKind::Assign),
            '!' => two(self, '=', TokenKind::NotEq, TokenKind::Not),
            '<' => match self.peek() {
                Some('=') => {
                    self.bump();
                    TokenKind::Le
                }
                Some('<') => {
                    self.bump();
                    TokenKind::Shl
                }
                _ => TokenKind::Lt,
            },
            '>' => match self.peek() {
                Some('=') => {
                    self.bump();
                    TokenKind::Ge
                }
                Some('>') => {
                    self.bump();
                    TokenKind::Shr
                }
                _ => TokenKind::Gt,
            },
            '&' => two(self, '&', TokenKind::AndAnd, TokenKind::Amp),
            '|' => two(self, '|', TokenKind::OrOr, TokenKind::Pipe),
            '^' => TokenKind::Caret,
            '~' => TokenKind::Tilde,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semi,
            ':' => TokenKind::Colon,
            '.' => {
                if self.peek() == Some('.') {
                    self.bump();
                    if self.peek() == Some('.') {
                        self.bump();
                        TokenKind::Ellipsis
                    } else {
                        TokenKind::DotDot
                    }
                } else {
                    TokenKind::Dot
                }
            }
            '?' => match self.peek() {
                Some('?') => {
                    self.bump();
                    TokenKind::QuestionQuestion
                }
                Some('.') => {
                    self.bump();
                    TokenKind::QuestionDot
                }
                _ => TokenKind::Question,
            },
            other => return Err(ParseError::new(format!("unexpected character '{other}'"), line, column)),
        };
        Ok(token(kind))
    }

    fn lex_number(&mut self) -> Result<TokenKind, ParseError> {
        // Hex literals
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X')) {
            self.bump();
            self.bump();
            let mut digits = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() || c == '_' {
                    if c != '_' {
                        digits.push(c);
                    }
                    self.bump();
                } else {
                    break;
                }
            }
            if digits.is_empty() {
                return Err(self.error("expected hex digits after 0x"));
            }
            let value = i64::from_str_radix(&digits, 16)
                .map_err(|_| self.error("hex literal out of range"))?;
            return Ok(TokenKind::Int(value));
        }

        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                if c != '_' {
                    text.push(c);
                }
                self.bump();
            } else {
                break;
            }
        }
        let mut is_float = false;
        // A '.' starts a fraction only when a digit follows; `1..5` stays
        // an integer followed by a range operator.
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            text.push('.');
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            is_float = true;
            text.push('e');
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                text.push(self.bump().expect("sign peeked"));
            }
            let mut saw = false;
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    saw = true;
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            if !saw {
                return Err(self.error("expected digits in exponent"));
            }
        }
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| self.error("invalid float literal"))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| self.error("integer literal out of range"))
        }
    }

    fn lex_escape(&mut self) -> Result<char, ParseError> {
        match self.bump() {
            Some('n') => Ok('\n'),
            Some('r') => Ok('\r'),
            Some('t') => Ok('\t'),
            Some('\\') => Ok('\\'),
            Some('"') => Ok('"'),
            Some('\'') => Ok('\''),
            Some('0') => Ok('\0'),
            Some('$') => Ok('$'),
            Some('u') => {
                if self.bump() != Some('{') {
                    return Err(self.error("expected '{' after \\u"));
                }
                let mut digits = String::new();
                loop {
                    match self.bump() {
                        Some('}') => break,
                        Some(c) if c.is_ascii_hexdigit() => digits.push(c),
                        _ => return Err(self.error("invalid \\u escape")),
                    }
                }
                let cp = u32::from_str_radix(&digits, 16)
                    .map_err(|_| self.error("invalid \\u escape"))?;
                char::from_u32(cp).ok_or_else(|| self.error("\\u escape is not a codepoint"))
            }
            _ => Err(self.error("invalid escape sequence")),
        }
    }

    fn lex_string(&mut self) -> Result<TokenKind, ParseError> {
        let (start_line, start_column) = (self.line, self.column);
        self.bump(); // opening quote
        let mut parts: Vec<RawPart> = Vec::new();
        let mut current = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(ParseError::new(
                        "unterminated string literal",
                        start_line,
                        start_column,
                    ));
                }
                Some('"') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    current.push(self.lex_escape()?);
                }
                Some('$') if self.peek_at(1) == Some('{') => {
                    let expr_line = self.line;
                    self.bump();
                    self.bump();
                    if !current.is_empty() {
                        parts.push(RawPart::Lit(std::mem::take(&mut current)));
                    }
                    // Collect the raw expression, balancing braces so
                    // nested object literals survive.
                    let mut depth = 1usize;
                    let mut raw = String::new();
                    loop {
                        match self.peek() {
                            None => {
                                return Err(ParseError::new(
                                    "unterminated interpolation",
                                    expr_line,
                                    start_column,
                                ));
                            }
                            Some('{') => {
                                depth += 1;
                                raw.push('{');
                                self.bump();
                            }
                            Some('}') => {
                                depth -= 1;
                                self.bump();
                                if depth == 0 {
                                    break;
                                }
                                raw.push('}');
                            }
                            Some(c) => {
                                raw.push(c);
                                self.bump();
                            }
                        }
                    }
                    parts.push(RawPart::Expr(raw, expr_line));
                }
                Some(c) => {
                    current.push(c);
                    self.bump();
                }
            }
        }
        if parts.is_empty() {
            return Ok(TokenKind::Str(current));
        }
        if !current.is_empty() {
            parts.push(RawPart::Lit(current));
        }
        Ok(TokenKind::InterpStr(parts))
    }

    fn lex_rune(&mut self) -> Result<TokenKind, ParseError> {
        self.bump(); // opening quote
        let c = match self.peek() {
            Some('\\') => {
                self.bump();
                self.lex_escape()?
            }
            Some(c) => {
                self.bump();
                c
            }
            None => return Err(self.error("unterminated rune literal")),
        };
        if self.bump() != Some('\'') {
            return Err(self.error("rune literal must contain exactly one codepoint"));
        }
        Ok(TokenKind::Rune(c))
    }
}
