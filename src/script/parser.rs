//! Recursive-descent parser for the embedded expression/table language.
//!
//! Grammar (informal):
//!
//! ```text
//! program    := statement*
//! statement  := target '=' expr ';'?  |  expr ';'?
//! target     := ident ('.' ident)*
//! expr       := equality
//! equality   := comparison (('==' | '!=') comparison)*
//! comparison := additive (('<' | '>' | '<=' | '>=') additive)*
//! additive   := multiplicative (('+' | '-') multiplicative)*
//! multiplicative := unary (('*' | '/') unary)*
//! unary      := ('-' | '!') unary | postfix
//! postfix    := primary ('.' ident | '(' args ')')*
//! primary    := NUMBER | STRING | 'true' | 'false' | 'nil' | ident
//!             | '(' expr ')' | table | array
//! table      := '{' (ident '=' expr (',' ident '=' expr)*)? '}'
//! array      := '[' (expr (',' expr)*)? ']'
//! ```

use crate::error::{ErrorKind, ScriptResult};
use crate::script::lexer::{tokenize, Spanned, Token};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Nil,
    Bool(bool),
    Number(f64),
    Str(String),
    Ident(String),
    Field(Box<Expr>, String),
    Table(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
    Call(String, Vec<Expr>),
}

/// An assignment target: a bare global, or a dotted field-access chain
/// rooted at one (`cfg.mode = ...`).
#[derive(Debug, Clone)]
pub struct Target {
    pub root: String,
    pub path: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Assign(Target, Expr, u32),
    Expr(Expr),
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

pub fn parse(src: &str) -> ScriptResult<Program> {
    let tokens = tokenize(src)?;
    let mut p = Parser { tokens, pos: 0 };
    p.parse_program()
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn parse_program(&mut self) -> ScriptResult<Program> {
        let mut statements = Vec::new();
        while !self.check(&Token::Eof) {
            statements.push(self.parse_statement()?);
            while self.matches(&Token::Semicolon) {}
        }
        Ok(Program { statements })
    }

    fn parse_statement(&mut self) -> ScriptResult<Stmt> {
        let line = self.line();
        if let Token::Ident(name) = self.peek().clone() {
            // Look ahead for a target `ident ('.' ident)* '='`.
            let checkpoint = self.pos;
            self.advance();
            let mut path = Vec::new();
            while self.check(&Token::Dot) {
                self.advance();
                match self.peek().clone() {
                    Token::Ident(field) => {
                        path.push(field);
                        self.advance();
                    }
                    _ => return self.error("expected field name after '.'"),
                }
            }
            if self.check(&Token::Eq) {
                self.advance();
                let value = self.parse_expr()?;
                self.consume_opt(&Token::Semicolon);
                return Ok(Stmt::Assign(Target { root: name, path }, value, line));
            }
            // Not an assignment after all; rewind and parse as an expression.
            self.pos = checkpoint;
        }
        let expr = self.parse_expr()?;
        self.consume_opt(&Token::Semicolon);
        Ok(Stmt::Expr(expr))
    }

    fn parse_expr(&mut self) -> ScriptResult<Expr> {
        self.parse_equality()
    }

    fn parse_equality(&mut self) -> ScriptResult<Expr> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinOp::Eq,
                Token::NotEq => BinOp::NotEq,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> ScriptResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinOp::Lt,
                Token::Gt => BinOp::Gt,
                Token::Le => BinOp::Le,
                Token::Ge => BinOp::Ge,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> ScriptResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> ScriptResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ScriptResult<Expr> {
        match self.peek() {
            Token::Minus => {
                self.advance();
                Ok(Expr::Unary(UnOp::Neg, Box::new(self.parse_unary()?)))
            }
            Token::Bang => {
                self.advance();
                Ok(Expr::Unary(UnOp::Not, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek().clone() {
                Token::Dot => {
                    self.advance();
                    match self.peek().clone() {
                        Token::Ident(field) => {
                            self.advance();
                            expr = Expr::Field(Box::new(expr), field);
                        }
                        _ => return self.error("expected field name after '.'"),
                    }
                }
                Token::LParen => {
                    let name = match &expr {
                        Expr::Ident(name) => name.clone(),
                        _ => return self.error("only named functions can be called"),
                    };
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.matches(&Token::Comma) {
                                continue;
                            }
                            break;
                        }
                    }
                    self.expect(&Token::RParen, "expected ')' after call arguments")?;
                    expr = Expr::Call(name, args);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> ScriptResult<Expr> {
        let token = self.peek().clone();
        match token {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            Token::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            Token::Nil => {
                self.advance();
                Ok(Expr::Nil)
            }
            Token::Ident(name) => {
                self.advance();
                Ok(Expr::Ident(name))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "expected ')'")?;
                Ok(inner)
            }
            Token::LBrace => self.parse_table(),
            Token::LBracket => self.parse_array(),
            other => self.error(format!("unexpected token {other:?}")),
        }
    }

    fn parse_table(&mut self) -> ScriptResult<Expr> {
        self.expect(&Token::LBrace, "expected '{'")?;
        let mut fields = Vec::new();
        if !self.check(&Token::RBrace) {
            loop {
                let name = match self.peek().clone() {
                    Token::Ident(name) => {
                        self.advance();
                        name
                    }
                    _ => return self.error("expected field name in table literal"),
                };
                self.expect(&Token::Eq, "expected '=' in table literal")?;
                let value = self.parse_expr()?;
                fields.push((name, value));
                if self.matches(&Token::Comma) {
                    continue;
                }
                break;
            }
        }
        self.expect(&Token::RBrace, "expected '}' to close table literal")?;
        Ok(Expr::Table(fields))
    }

    fn parse_array(&mut self) -> ScriptResult<Expr> {
        self.expect(&Token::LBracket, "expected '['")?;
        let mut items = Vec::new();
        if !self.check(&Token::RBracket) {
            loop {
                items.push(self.parse_expr()?);
                if self.matches(&Token::Comma) {
                    continue;
                }
                break;
            }
        }
        self.expect(&Token::RBracket, "expected ']' to close array literal")?;
        Ok(Expr::Array(items))
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn line(&self) -> u32 {
        self.tokens[self.pos].line
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn matches(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume_opt(&mut self, token: &Token) {
        let _ = self.matches(token);
    }

    fn expect(&mut self, token: &Token, message: &str) -> ScriptResult<()> {
        if self.check(token) {
            self.advance();
            Ok(())
        } else {
            self.error(message)
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> ScriptResult<T> {
        crate::error::make_error(ErrorKind::SyntaxError, message, "parser", Some(self.line()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_table_assignment() {
        let program = parse(r#"cfg = {mode = "A"}"#).unwrap();
        assert_eq!(program.statements.len(), 1);
        match &program.statements[0] {
            Stmt::Assign(target, Expr::Table(fields), _) => {
                assert_eq!(target.root, "cfg");
                assert!(target.path.is_empty());
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].0, "mode");
            }
            other => panic!("unexpected statement: {other:?}"),
        }
    }

    #[test]
    fn parses_field_assignment() {
        let program = parse(r#"cfg.mode = "B""#).unwrap();
        match &program.statements[0] {
            Stmt::Assign(target, _, _) => {
                assert_eq!(target.root, "cfg");
                assert_eq!(target.path, vec!["mode".to_string()]);
            }
            other => panic!("unexpected statement: {other:?}"),
        }
    }

    #[test]
    fn reports_syntax_error_with_line() {
        let err = parse("cfg = {mode=\"B\" <<< broken").unwrap_err();
        assert_eq!(err.kind, ErrorKind::SyntaxError);
        assert_eq!(err.line_number, Some(1));
    }

    #[test]
    fn parses_array_literal() {
        let program = parse("xs = [1, 2, 3]").unwrap();
        match &program.statements[0] {
            Stmt::Assign(_, Expr::Array(items), _) => assert_eq!(items.len(), 3),
            other => panic!("unexpected statement: {other:?}"),
        }
    }
}
