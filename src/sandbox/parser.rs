// =============================================================================
// Filter DSL — lexer and parser
// =============================================================================
//
// The "expr" filter language is a small deterministic DSL:
//
//   let fast = ema_series(klines["5m"], 9);
//   let slow = ema_series(klines["5m"], 21);
//   if ticker.quote_volume < 1000000.0 { return false; }
//   crossed_above(fast, slow) && rsi(klines["5m"], 14) < 65.0
//
// Statements: let / assignment / if-else / while / return. The final
// trailing expression is the program's implicit result. Programs carry no
// cross-call state; parsing happens per evaluation.
// =============================================================================

use std::fmt;

// =============================================================================
// AST
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Ident(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Field {
        target: Box<Expr>,
        field: String,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Let { name: String, value: Expr },
    Assign { name: String, value: Expr },
    If {
        cond: Expr,
        then_block: Vec<Stmt>,
        else_block: Option<Vec<Stmt>>,
    },
    While { cond: Expr, body: Vec<Stmt> },
    Return(Expr),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

/// Parse failure with a human-readable position.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at offset {})", self.message, self.position)
    }
}

// =============================================================================
// Lexer
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    // Keywords
    Let,
    If,
    Else,
    While,
    Return,
    True,
    False,
    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Dot,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.pos,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while matches!(self.peek(), Some(c) if c.is_ascii_whitespace()) {
                self.pos += 1;
            }
            // Line comments: // ... and # ...
            match self.peek() {
                Some(b'#') => {
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.src.get(self.pos + 1) == Some(&b'/') => {
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn tokenize(mut self) -> Result<Vec<(Token, usize)>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            let start = self.pos;
            let Some(c) = self.peek() else { break };

            let token = match c {
                b'0'..=b'9' => self.lex_number()?,
                b'"' => self.lex_string()?,
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.lex_ident(),
                b'(' => {
                    self.bump();
                    Token::LParen
                }
                b')' => {
                    self.bump();
                    Token::RParen
                }
                b'{' => {
                    self.bump();
                    Token::LBrace
                }
                b'}' => {
                    self.bump();
                    Token::RBrace
                }
                b'[' => {
                    self.bump();
                    Token::LBracket
                }
                b']' => {
                    self.bump();
                    Token::RBracket
                }
                b',' => {
                    self.bump();
                    Token::Comma
                }
                b';' => {
                    self.bump();
                    Token::Semicolon
                }
                b'.' => {
                    self.bump();
                    Token::Dot
                }
                b'+' => {
                    self.bump();
                    Token::Plus
                }
                b'-' => {
                    self.bump();
                    Token::Minus
                }
                b'*' => {
                    self.bump();
                    Token::Star
                }
                b'/' => {
                    self.bump();
                    Token::Slash
                }
                b'%' => {
                    self.bump();
                    Token::Percent
                }
                b'=' => {
                    self.bump();
                    if self.peek() == Some(b'=') {
                        self.bump();
                        Token::EqEq
                    } else {
                        Token::Assign
                    }
                }
                b'!' => {
                    self.bump();
                    if self.peek() == Some(b'=') {
                        self.bump();
                        Token::NotEq
                    } else {
                        Token::Bang
                    }
                }
                b'<' => {
                    self.bump();
                    if self.peek() == Some(b'=') {
                        self.bump();
                        Token::Le
                    } else {
                        Token::Lt
                    }
                }
                b'>' => {
                    self.bump();
                    if self.peek() == Some(b'=') {
                        self.bump();
                        Token::Ge
                    } else {
                        Token::Gt
                    }
                }
                b'&' => {
                    self.bump();
                    if self.peek() == Some(b'&') {
                        self.bump();
                        Token::AndAnd
                    } else {
                        return Err(self.error("expected '&&'"));
                    }
                }
                b'|' => {
                    self.bump();
                    if self.peek() == Some(b'|') {
                        self.bump();
                        Token::OrOr
                    } else {
                        return Err(self.error("expected '||'"));
                    }
                }
                other => {
                    return Err(self.error(format!("unexpected character '{}'", other as char)))
                }
            };
            tokens.push((token, start));
        }
        Ok(tokens)
    }

    fn lex_number(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') && matches!(self.src.get(self.pos + 1), Some(c) if c.is_ascii_digit())
        {
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        // Scientific notation: 9.9e8, 1e-3
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let mark = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            if matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.pos += 1;
                }
            } else {
                self.pos = mark; // not an exponent; leave for the ident lexer
            }
        }

        let text = std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| self.error("invalid number"))?;
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| self.error(format!("invalid number literal: {text}")))
    }

    fn lex_string(&mut self) -> Result<Token, ParseError> {
        self.bump(); // opening quote
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b'"' {
                let text = std::str::from_utf8(&self.src[start..self.pos])
                    .map_err(|_| self.error("invalid string"))?
                    .to_string();
                self.bump(); // closing quote
                return Ok(Token::Str(text));
            }
            self.pos += 1;
        }
        Err(self.error("unterminated string literal"))
    }

    fn lex_ident(&mut self) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("");
        match text {
            "let" => Token::Let,
            "if" => Token::If,
            "else" => Token::Else,
            "while" => Token::While,
            "return" => Token::Return,
            "true" => Token::True,
            "false" => Token::False,
            _ => Token::Ident(text.to_string()),
        }
    }
}

// =============================================================================
// Parser
// =============================================================================

pub fn parse(source: &str) -> Result<Program, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_program()
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn error(&self, message: impl Into<String>) -> ParseError {
        let position = self
            .tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(_, p)| *p)
            .unwrap_or(0);
        ParseError {
            message: message.into(),
            position,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ParseError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut statements = Vec::new();
        while self.peek().is_some() {
            statements.push(self.parse_statement()?);
        }
        if statements.is_empty() {
            return Err(self.error("empty filter program"));
        }
        Ok(Program { statements })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(Token::LBrace, "'{'")?;
        let mut statements = Vec::new();
        while self.peek() != Some(&Token::RBrace) {
            if self.peek().is_none() {
                return Err(self.error("unterminated block, expected '}'"));
            }
            statements.push(self.parse_statement()?);
        }
        self.expect(Token::RBrace, "'}'")?;
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        match self.peek() {
            Some(Token::Let) => {
                self.bump();
                let name = match self.bump() {
                    Some(Token::Ident(name)) => name,
                    _ => return Err(self.error("expected identifier after 'let'")),
                };
                self.expect(Token::Assign, "'=' in let binding")?;
                let value = self.parse_expr()?;
                self.eat(&Token::Semicolon);
                Ok(Stmt::Let { name, value })
            }
            Some(Token::Return) => {
                self.bump();
                let value = self.parse_expr()?;
                self.eat(&Token::Semicolon);
                Ok(Stmt::Return(value))
            }
            Some(Token::If) => {
                self.bump();
                self.parse_if_tail()
            }
            Some(Token::While) => {
                self.bump();
                let cond = self.parse_expr()?;
                let body = self.parse_block()?;
                Ok(Stmt::While { cond, body })
            }
            // `ident = expr;` assignment, distinguished from an expression
            // statement by lookahead for a bare '='.
            Some(Token::Ident(_))
                if matches!(self.tokens.get(self.pos + 1), Some((Token::Assign, _))) =>
            {
                let name = match self.bump() {
                    Some(Token::Ident(name)) => name,
                    _ => unreachable!(),
                };
                self.bump(); // '='
                let value = self.parse_expr()?;
                self.eat(&Token::Semicolon);
                Ok(Stmt::Assign { name, value })
            }
            Some(_) => {
                let expr = self.parse_expr()?;
                self.eat(&Token::Semicolon);
                Ok(Stmt::Expr(expr))
            }
            None => Err(self.error("expected statement")),
        }
    }

    /// Parse the condition/blocks after an already-consumed `if`, handling
    /// `else if` chains.
    fn parse_if_tail(&mut self) -> Result<Stmt, ParseError> {
        let cond = self.parse_expr()?;
        let then_block = self.parse_block()?;
        let else_block = if self.eat(&Token::Else) {
            if self.eat(&Token::If) {
                Some(vec![self.parse_if_tail()?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_block,
            else_block,
        })
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_comparison()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::NotEq) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.bump();
        let rhs = self.parse_additive()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.bump();
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(self.parse_unary()?),
                })
            }
            Some(Token::Bang) => {
                self.bump();
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(self.parse_unary()?),
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::LBracket) => {
                    self.bump();
                    let index = self.parse_expr()?;
                    self.expect(Token::RBracket, "']'")?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                Some(Token::Dot) => {
                    self.bump();
                    let field = match self.bump() {
                        Some(Token::Ident(name)) => name,
                        _ => return Err(self.error("expected field name after '.'")),
                    };
                    expr = Expr::Field {
                        target: Box::new(expr),
                        field,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.bump();
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(&Token::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen, "')' after call arguments")?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(expr)
            }
            Some(other) => Err(self.error(format!("unexpected token {other:?}"))),
            None => Err(self.error("unexpected end of program")),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trailing_expression() {
        let p = parse("last_close(klines[\"5m\"]) > 0").unwrap();
        assert_eq!(p.statements.len(), 1);
        assert!(matches!(
            p.statements[0],
            Stmt::Expr(Expr::Binary {
                op: BinaryOp::Gt,
                ..
            })
        ));
    }

    #[test]
    fn parses_return_statement() {
        let p = parse("return last_close(klines[\"5m\"]) > 0;").unwrap();
        assert!(matches!(p.statements[0], Stmt::Return(_)));
    }

    #[test]
    fn parses_let_and_assignment() {
        let p = parse("let x = 1; x = x + 1; x > 1").unwrap();
        assert_eq!(p.statements.len(), 3);
        assert!(matches!(p.statements[0], Stmt::Let { .. }));
        assert!(matches!(p.statements[1], Stmt::Assign { .. }));
    }

    #[test]
    fn parses_if_else_chain() {
        let p = parse(
            "if rsi(klines[\"5m\"], 14) < 30 { return true; } else if false { return false; } else { return false; }",
        )
        .unwrap();
        match &p.statements[0] {
            Stmt::If { else_block, .. } => {
                let inner = else_block.as_ref().unwrap();
                assert!(matches!(inner[0], Stmt::If { .. }));
            }
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn parses_while_loop() {
        let p = parse("let i = 0; while i < 10 { i = i + 1; } i == 10").unwrap();
        assert!(matches!(p.statements[1], Stmt::While { .. }));
    }

    #[test]
    fn parses_field_access_and_precedence() {
        let p = parse("ticker.last_price * 2 + 1 > 100 && !false").unwrap();
        match &p.statements[0] {
            Stmt::Expr(Expr::Binary { op, .. }) => assert_eq!(*op, BinaryOp::And),
            other => panic!("expected binary expr, got {other:?}"),
        }
    }

    #[test]
    fn parses_scientific_notation() {
        let p = parse("ticker.quote_volume > 9.9e8").unwrap();
        match &p.statements[0] {
            Stmt::Expr(Expr::Binary { rhs, .. }) => match **rhs {
                Expr::Number(n) => assert!((n - 9.9e8).abs() < 1.0),
                ref other => panic!("expected number, got {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn skips_comments() {
        let p = parse("# a comment\n// another\nlet x = 1; x > 0").unwrap();
        assert_eq!(p.statements.len(), 2);
    }

    #[test]
    fn rejects_empty_program() {
        assert!(parse("").is_err());
        assert!(parse("   # only a comment").is_err());
    }

    #[test]
    fn rejects_malformed_programs() {
        assert!(parse("let = 1;").is_err());
        assert!(parse("if true { return true;").is_err());
        assert!(parse("1 & 2").is_err());
        assert!(parse("\"unterminated").is_err());
        assert!(parse("foo(1,").is_err());
    }
}
