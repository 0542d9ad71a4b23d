//! Lexer and parser for the embedded modeling language
//!
//! ```text
//! # comments run to end of line (also //)
//! base   = box(40mm, 20mm, 5mm)
//! peg    = cylinder(3, 12) |> translate(10, 0, 8.5)
//! result = compound(base, peg)
//! ```
//!
//! A program is a sequence of assignments or bare expressions, optionally
//! separated by `;`. Lines starting with `import` or `from` are skipped so
//! that generated code carrying a leftover import line still parses.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    message: String,
    line: Option<usize>,
    column: Option<usize>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
            column: Some(column),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => {
                write!(f, "{} at line {}, column {}", self.message, line, column)
            }
            _ => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ScriptError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable {
        name: String,
        line: usize,
        column: usize,
    },
    Neg(Box<Expr>),
    Binary {
        lhs: Box<Expr>,
        op: BinaryOp,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        line: usize,
        column: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assign { name: String, expr: Expr },
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl Program {
    /// Whether any statement binds `name`
    pub fn binds(&self, name: &str) -> bool {
        self.statements
            .iter()
            .any(|stmt| matches!(stmt, Statement::Assign { name: target, .. } if target == name))
    }
}

/// Nesting levels allowed inside one expression when no limit is configured
pub const DEFAULT_MAX_DEPTH: usize = 128;

pub fn parse_program(source: &str) -> Result<Program, ScriptError> {
    parse_program_with_depth(source, DEFAULT_MAX_DEPTH)
}

/// Parse with an explicit nesting ceiling.
///
/// Groups, unary signs, call arguments and each operator or pipe stage in a
/// chain all count as one level, so the depth of the resulting tree (and of
/// every recursive walk over it) stays below `max_depth`.
pub fn parse_program_with_depth(source: &str, max_depth: usize) -> Result<Program, ScriptError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens, max_depth).parse_program()
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    line: usize,
    column: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Number(f64),
    LParen,
    RParen,
    Comma,
    Eq,
    Plus,
    Minus,
    Star,
    Slash,
    Pipe,
    Semicolon,
    Eof,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn skip_line(&mut self) {
        while let Some(&ch) = self.chars.peek() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ScriptError> {
        let mut tokens: Vec<Token> = Vec::new();

        while let Some(&ch) = self.chars.peek() {
            let line = self.line;
            let column = self.column;

            if ch.is_whitespace() {
                self.advance();
                continue;
            }
            if ch == '#' {
                self.skip_line();
                continue;
            }

            let kind = match ch {
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                ',' => TokenKind::Comma,
                '=' => TokenKind::Eq,
                '+' => TokenKind::Plus,
                '-' => TokenKind::Minus,
                '*' => TokenKind::Star,
                ';' => TokenKind::Semicolon,
                '/' => {
                    self.advance();
                    if self.chars.peek() == Some(&'/') {
                        self.skip_line();
                        continue;
                    }
                    tokens.push(Token {
                        kind: TokenKind::Slash,
                        line,
                        column,
                    });
                    continue;
                }
                '|' => {
                    self.advance();
                    if self.chars.peek() != Some(&'>') {
                        return Err(ScriptError::at("expected '>' after '|'", line, column));
                    }
                    self.advance();
                    tokens.push(Token {
                        kind: TokenKind::Pipe,
                        line,
                        column,
                    });
                    continue;
                }
                c if c.is_ascii_digit() || c == '.' => {
                    let kind = self.lex_number(line, column)?;
                    tokens.push(Token { kind, line, column });
                    continue;
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let ident = self.lex_word();
                    let at_line_start = tokens.last().map(|t| t.line != line).unwrap_or(true);
                    if at_line_start && (ident == "import" || ident == "from") {
                        self.skip_line();
                        continue;
                    }
                    tokens.push(Token {
                        kind: TokenKind::Ident(ident),
                        line,
                        column,
                    });
                    continue;
                }
                other => {
                    return Err(ScriptError::at(
                        format!("unexpected character '{}'", other),
                        line,
                        column,
                    ));
                }
            };

            self.advance();
            tokens.push(Token { kind, line, column });
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            line: self.line,
            column: self.column,
        });
        Ok(tokens)
    }

    fn lex_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(&ch) = self.chars.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                word.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        word
    }

    fn lex_number(&mut self, line: usize, column: usize) -> Result<TokenKind, ScriptError> {
        let mut digits = String::new();
        while let Some(&ch) = self.chars.peek() {
            if ch.is_ascii_digit() || ch == '.' {
                digits.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        let value = digits
            .parse::<f64>()
            .map_err(|_| ScriptError::at(format!("invalid number '{}'", digits), line, column))?;

        let unit = self.lex_word();
        let scale = match unit.as_str() {
            "" | "mm" | "deg" => 1.0,
            "cm" => 10.0,
            "m" => 1000.0,
            other => {
                return Err(ScriptError::at(
                    format!("unknown unit '{}' (expected mm, cm, m or deg)", other),
                    line,
                    column,
                ))
            }
        };

        Ok(TokenKind::Number(value * scale))
    }
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    depth: usize,
    max_depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, max_depth: usize) -> Self {
        Self {
            tokens,
            index: 0,
            depth: 0,
            max_depth,
        }
    }

    fn descend(&mut self) -> Result<(), ScriptError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            let token = self.peek();
            return Err(ScriptError::at(
                format!("expression nested deeper than {} levels", self.max_depth),
                token.line,
                token.column,
            ));
        }
        Ok(())
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn peek_kind_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.index + offset).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn match_kind(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> Result<Token, ScriptError> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            let token = self.peek();
            Err(ScriptError::at(
                format!("{}, found {}", message, describe(&token.kind)),
                token.line,
                token.column,
            ))
        }
    }

    fn parse_program(&mut self) -> Result<Program, ScriptError> {
        let mut statements = Vec::new();

        while !self.check(&TokenKind::Eof) {
            if self.match_kind(&TokenKind::Semicolon) {
                continue;
            }

            let target = match (&self.peek().kind, self.peek_kind_at(1)) {
                (TokenKind::Ident(name), Some(TokenKind::Eq)) => Some(name.clone()),
                _ => None,
            };

            if let Some(name) = target {
                self.advance();
                self.advance();
                let expr = self.parse_expression()?;
                statements.push(Statement::Assign { name, expr });
            } else {
                let expr = self.parse_expression()?;
                statements.push(Statement::Expr(expr));
            }
        }

        if statements.is_empty() {
            return Err(ScriptError::new("empty program"));
        }

        Ok(Program { statements })
    }

    fn parse_expression(&mut self) -> Result<Expr, ScriptError> {
        let base = self.depth;
        self.descend()?;
        let mut expr = self.parse_add_sub()?;

        while self.match_kind(&TokenKind::Pipe) {
            self.descend()?;
            let token = self.peek().clone();
            let name = match &token.kind {
                TokenKind::Ident(name) => name.clone(),
                other => {
                    return Err(ScriptError::at(
                        format!("expected function name after '|>', found {}", describe(other)),
                        token.line,
                        token.column,
                    ))
                }
            };
            self.advance();
            self.expect(TokenKind::LParen, "expected '(' after pipe stage name")?;
            let mut args = vec![expr];
            args.extend(self.parse_arguments()?);
            expr = Expr::Call {
                name,
                args,
                line: token.line,
                column: token.column,
            };
        }

        self.depth = base;
        Ok(expr)
    }

    fn parse_add_sub(&mut self) -> Result<Expr, ScriptError> {
        let base = self.depth;
        let mut expr = self.parse_mul_div()?;

        loop {
            let op = if self.match_kind(&TokenKind::Plus) {
                BinaryOp::Add
            } else if self.match_kind(&TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                self.depth = base;
                return Ok(expr);
            };
            self.descend()?;
            let rhs = self.parse_mul_div()?;
            expr = Expr::Binary {
                lhs: Box::new(expr),
                op,
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_mul_div(&mut self) -> Result<Expr, ScriptError> {
        let base = self.depth;
        let mut expr = self.parse_unary()?;

        loop {
            let op = if self.match_kind(&TokenKind::Star) {
                BinaryOp::Mul
            } else if self.match_kind(&TokenKind::Slash) {
                BinaryOp::Div
            } else {
                self.depth = base;
                return Ok(expr);
            };
            self.descend()?;
            let rhs = self.parse_unary()?;
            expr = Expr::Binary {
                lhs: Box::new(expr),
                op,
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ScriptError> {
        let negate = if self.match_kind(&TokenKind::Minus) {
            true
        } else if self.match_kind(&TokenKind::Plus) {
            false
        } else {
            return self.parse_primary();
        };

        let base = self.depth;
        self.descend()?;
        let operand = self.parse_unary()?;
        self.depth = base;
        Ok(if negate {
            Expr::Neg(Box::new(operand))
        } else {
            operand
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, ScriptError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Number(value) => Ok(Expr::Number(value)),
            TokenKind::Ident(name) => {
                if self.match_kind(&TokenKind::LParen) {
                    let args = self.parse_arguments()?;
                    Ok(Expr::Call {
                        name,
                        args,
                        line: token.line,
                        column: token.column,
                    })
                } else {
                    Ok(Expr::Variable {
                        name,
                        line: token.line,
                        column: token.column,
                    })
                }
            }
            TokenKind::LParen => {
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RParen, "expected ')' to close group")?;
                Ok(expr)
            }
            other => Err(ScriptError::at(
                format!("expected expression, found {}", describe(&other)),
                token.line,
                token.column,
            )),
        }
    }

    /// Parse `a, b, c)` after an opening parenthesis has been consumed
    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ScriptError> {
        let mut args = Vec::new();
        if self.match_kind(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression()?);
            if !self.match_kind(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "expected ')' after call arguments")?;
        Ok(args)
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(name) => format!("identifier '{}'", name),
        TokenKind::Number(value) => format!("number {}", value),
        TokenKind::LParen => "'('".to_string(),
        TokenKind::RParen => "')'".to_string(),
        TokenKind::Comma => "','".to_string(),
        TokenKind::Eq => "'='".to_string(),
        TokenKind::Plus => "'+'".to_string(),
        TokenKind::Minus => "'-'".to_string(),
        TokenKind::Star => "'*'".to_string(),
        TokenKind::Slash => "'/'".to_string(),
        TokenKind::Pipe => "'|>'".to_string(),
        TokenKind::Semicolon => "';'".to_string(),
        TokenKind::Eof => "end of input".to_string(),
    }
}
