use std::rc::Rc;

use super::ast::{CallExpr, DynamicSource, Expr, FuncDecl, ListExpr, Stmt};
use super::lexer::{Lexer, Token, TokenKind};
use crate::error::RunError;
use crate::value::{BinOp, CmpOp};

/// Recursive-descent parser with one token of lookahead. A parse error is
/// unrecoverable for the run: there is no resync, the first unexpected
/// token aborts with a line-tagged message.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Result<Self, RunError> {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token()?;
        Ok(Self { lexer, current })
    }

    /// Parse the whole script into a statement list.
    pub fn parse_program(&mut self) -> Result<Vec<Stmt>, RunError> {
        let mut program = Vec::new();
        while self.current.kind != TokenKind::Eof {
            program.push(self.statement()?);
        }
        Ok(program)
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn advance(&mut self) -> Result<Token, RunError> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn consume(&mut self, expected: TokenKind) -> Result<Token, RunError> {
        if self.current.kind == expected {
            self.advance()
        } else {
            Err(RunError::parse(
                self.current.line,
                format!("expected {expected:?}, got {:?}", self.current.kind),
            ))
        }
    }

    fn consume_ident(&mut self) -> Result<String, RunError> {
        let token = self.consume(TokenKind::Ident)?;
        Ok(token.text)
    }

    /// `{ stmt* }`
    fn block(&mut self) -> Result<Vec<Stmt>, RunError> {
        self.consume(TokenKind::LBrace)?;
        let mut body = Vec::new();
        while self.current.kind != TokenKind::RBrace && self.current.kind != TokenKind::Eof {
            body.push(self.statement()?);
        }
        self.consume(TokenKind::RBrace)?;
        Ok(body)
    }

    // ── Statements ─────────────────────────────────────────────────

    fn statement(&mut self) -> Result<Stmt, RunError> {
        match self.current.kind {
            TokenKind::Name => self.name_statement(),
            TokenKind::Var => self.var_declaration(),
            TokenKind::Dynamic => self.dynamic_declaration(),
            TokenKind::If => self.if_statement(),
            TokenKind::Print => self.print_statement(),
            TokenKind::Loop => self.loop_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::Foreach => self.foreach_statement(),
            TokenKind::Func => self.func_declaration(),
            TokenKind::Call => self.call_statement(),
            TokenKind::Sleep => self.sleep_statement(),
            TokenKind::Break => {
                self.advance()?;
                Ok(Stmt::Break)
            }
            TokenKind::Continue => {
                self.advance()?;
                Ok(Stmt::Continue)
            }
            other => Err(RunError::parse(
                self.current.line,
                format!("statement cannot start with {other:?}"),
            )),
        }
    }

    fn name_statement(&mut self) -> Result<Stmt, RunError> {
        self.consume(TokenKind::Name)?;
        let token = match self.current.kind {
            TokenKind::Str | TokenKind::Ident | TokenKind::Number => self.advance()?,
            other => {
                return Err(RunError::parse(
                    self.current.line,
                    format!("expected a script name, got {other:?}"),
                ));
            }
        };
        Ok(Stmt::ScriptName(token.text))
    }

    fn var_declaration(&mut self) -> Result<Stmt, RunError> {
        self.consume(TokenKind::Var)?;
        let name = self.consume_ident()?;
        self.consume(TokenKind::Assign)?;
        let value = self.expression()?;
        Ok(Stmt::Var { name, value })
    }

    fn dynamic_declaration(&mut self) -> Result<Stmt, RunError> {
        self.consume(TokenKind::Dynamic)?;
        let name = self.consume_ident()?;
        self.consume(TokenKind::Assign)?;

        let source = match self.current.kind {
            TokenKind::LParen => DynamicSource::List(self.nested_list()?),
            TokenKind::Call => {
                self.consume(TokenKind::Call)?;
                DynamicSource::Call(self.function_call()?)
            }
            _ => DynamicSource::Expr(self.expression()?),
        };
        Ok(Stmt::Dynamic { name, source })
    }

    /// Parenthesized list literal; nests recursively, commas are optional.
    fn nested_list(&mut self) -> Result<Vec<ListExpr>, RunError> {
        self.consume(TokenKind::LParen)?;
        let mut elements = Vec::new();
        loop {
            match self.current.kind {
                TokenKind::RParen => break,
                TokenKind::LParen => elements.push(ListExpr::Nested(self.nested_list()?)),
                TokenKind::Comma => {
                    self.advance()?;
                }
                TokenKind::Eof => {
                    return Err(RunError::parse(self.current.line, "unclosed list literal"));
                }
                _ => elements.push(ListExpr::Item(self.expression()?)),
            }
        }
        self.consume(TokenKind::RParen)?;
        Ok(elements)
    }

    fn if_statement(&mut self) -> Result<Stmt, RunError> {
        self.consume(TokenKind::If)?;
        self.consume(TokenKind::LParen)?;
        let condition = self.condition()?;
        self.consume(TokenKind::RParen)?;
        let true_body = self.block()?;

        let mut else_ifs = Vec::new();
        let mut false_body = Vec::new();
        while self.current.kind == TokenKind::Else {
            self.consume(TokenKind::Else)?;
            if self.current.kind == TokenKind::If {
                self.consume(TokenKind::If)?;
                self.consume(TokenKind::LParen)?;
                let else_if_condition = self.condition()?;
                self.consume(TokenKind::RParen)?;
                let body = self.block()?;
                else_ifs.push((else_if_condition, body));
            } else {
                false_body = self.block()?;
                break;
            }
        }

        Ok(Stmt::If {
            condition,
            true_body,
            else_ifs,
            false_body,
        })
    }

    fn print_statement(&mut self) -> Result<Stmt, RunError> {
        self.consume(TokenKind::Print)?;
        self.consume(TokenKind::LParen)?;
        let value = self.expression()?;
        self.consume(TokenKind::RParen)?;
        Ok(Stmt::Print(value))
    }

    fn sleep_statement(&mut self) -> Result<Stmt, RunError> {
        self.consume(TokenKind::Sleep)?;
        self.consume(TokenKind::LParen)?;
        let value = self.expression()?;
        self.consume(TokenKind::RParen)?;
        Ok(Stmt::Sleep(value))
    }

    fn loop_statement(&mut self) -> Result<Stmt, RunError> {
        self.consume(TokenKind::Loop)?;
        let count = self.expression()?;
        let body = self.block()?;
        Ok(Stmt::Loop { count, body })
    }

    fn while_statement(&mut self) -> Result<Stmt, RunError> {
        self.consume(TokenKind::While)?;
        let condition = self.loop_condition()?;
        let body = self.block()?;
        Ok(Stmt::While { condition, body })
    }

    fn foreach_statement(&mut self) -> Result<Stmt, RunError> {
        self.consume(TokenKind::Foreach)?;
        self.consume(TokenKind::LParen)?;
        let item = self.consume_ident()?;
        self.consume(TokenKind::Comma)?;
        let items = self.expression()?;
        self.consume(TokenKind::RParen)?;
        let body = self.block()?;
        Ok(Stmt::Foreach { item, items, body })
    }

    fn func_declaration(&mut self) -> Result<Stmt, RunError> {
        self.consume(TokenKind::Func)?;
        let name = self.consume_ident()?;

        let mut params = Vec::new();
        if self.current.kind == TokenKind::LParen {
            self.consume(TokenKind::LParen)?;
            while self.current.kind != TokenKind::RParen {
                params.push(self.consume_ident()?);
                if self.current.kind == TokenKind::RParen {
                    break;
                }
                self.consume(TokenKind::Comma)?;
            }
            self.consume(TokenKind::RParen)?;
        }

        let body = self.block()?;
        Ok(Stmt::Func(Rc::new(FuncDecl { name, params, body })))
    }

    fn call_statement(&mut self) -> Result<Stmt, RunError> {
        self.consume(TokenKind::Call)?;
        Ok(Stmt::Call(self.function_call()?))
    }

    fn function_call(&mut self) -> Result<CallExpr, RunError> {
        let line = self.current.line;
        let name = self.consume_ident()?;
        self.consume(TokenKind::LParen)?;
        let mut args = Vec::new();
        while self.current.kind != TokenKind::RParen {
            args.push(self.expression()?);
            if self.current.kind == TokenKind::RParen {
                break;
            }
            self.consume(TokenKind::Comma)?;
        }
        self.consume(TokenKind::RParen)?;
        Ok(CallExpr { name, args, line })
    }

    // ── Expressions ────────────────────────────────────────────────

    /// A condition inside `if (...)`: an expression, optionally followed by
    /// a comparison. A bare expression means "truthy".
    fn condition(&mut self) -> Result<Expr, RunError> {
        let left = self.expression()?;
        if let Some(op) = self.cmp_op() {
            self.advance()?;
            let right = self.expression()?;
            return Ok(Expr::Cmp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });
        }
        if self.current.kind == TokenKind::RParen {
            return Ok(Expr::Truthy(Box::new(left)));
        }
        Err(RunError::parse(
            self.current.line,
            format!("expected a comparison operator, got {:?}", self.current.kind),
        ))
    }

    /// A `while` condition: unparenthesized, so the body's `{` terminates a
    /// bare expression.
    fn loop_condition(&mut self) -> Result<Expr, RunError> {
        let left = self.expression()?;
        if let Some(op) = self.cmp_op() {
            self.advance()?;
            let right = self.expression()?;
            return Ok(Expr::Cmp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });
        }
        Ok(Expr::Truthy(Box::new(left)))
    }

    fn cmp_op(&self) -> Option<CmpOp> {
        match self.current.kind {
            TokenKind::Eq => Some(CmpOp::Eq),
            TokenKind::Ne => Some(CmpOp::Ne),
            TokenKind::Lt => Some(CmpOp::Lt),
            TokenKind::Gt => Some(CmpOp::Gt),
            TokenKind::Le => Some(CmpOp::Le),
            TokenKind::Ge => Some(CmpOp::Ge),
            _ => None,
        }
    }

    fn expression(&mut self) -> Result<Expr, RunError> {
        let mut node = self.term()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                _ => break,
            };
            self.advance()?;
            let right = self.term()?;
            node = Expr::Bin {
                left: Box::new(node),
                op,
                right: Box::new(right),
            };
        }
        Ok(node)
    }

    fn term(&mut self) -> Result<Expr, RunError> {
        match self.current.kind {
            TokenKind::Number => {
                let token = self.advance()?;
                let value = token.text.parse::<f64>().map_err(|_| {
                    RunError::parse(token.line, format!("invalid number: {}", token.text))
                })?;
                Ok(Expr::Number(value))
            }
            TokenKind::Str => {
                let token = self.advance()?;
                Ok(Expr::Str(token.text))
            }
            TokenKind::Ident => {
                let token = self.advance()?;
                Ok(Expr::Variable(token.text))
            }
            TokenKind::LParen => {
                self.consume(TokenKind::LParen)?;
                let node = self.expression()?;
                self.consume(TokenKind::RParen)?;
                Ok(node)
            }
            other => Err(RunError::parse(
                self.current.line,
                format!("expected a value, got {other:?}"),
            )),
        }
    }
}

/// Parse a complete script.
pub fn parse(source: &str) -> Result<Vec<Stmt>, RunError> {
    Parser::new(source)?.parse_program()
}
