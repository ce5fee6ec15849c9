use crate::ast::*;
use crate::error::CompileError;
use crate::lexer::{Token, TokenKind};

pub fn parse(tokens: Vec<Token>) -> Result<Program, CompileError> {
    let mut parser = Parser::new(tokens);
    parser.parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    next_function_id: usize,
    /// Tokens rewritten while closing nested type arguments, for undo on backtrack.
    splits: Vec<(usize, TokenKind)>,
    /// Current syntactic nesting, bounded so later tree walks stay shallow.
    depth: usize,
}

pub(crate) const MAX_NESTING: usize = 128;

fn same_kind(a: &TokenKind, b: &TokenKind) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// Binding power of binary operators; `None` for anything else.
fn binary_op(kind: &TokenKind) -> Option<(u8, Result<BinOp, LogicalOp>)> {
    let op = match kind {
        TokenKind::QuestionQuestion => (1, Err(LogicalOp::Nullish)),
        TokenKind::OrOr => (2, Err(LogicalOp::Or)),
        TokenKind::AndAnd => (3, Err(LogicalOp::And)),
        TokenKind::Pipe => (4, Ok(BinOp::BitOr)),
        TokenKind::Caret => (5, Ok(BinOp::BitXor)),
        TokenKind::Amp => (6, Ok(BinOp::BitAnd)),
        TokenKind::EqEq => (7, Ok(BinOp::LooseEq)),
        TokenKind::BangEq => (7, Ok(BinOp::LooseNeq)),
        TokenKind::EqEqEq => (7, Ok(BinOp::StrictEq)),
        TokenKind::BangEqEq => (7, Ok(BinOp::StrictNeq)),
        TokenKind::Lt => (8, Ok(BinOp::Lt)),
        TokenKind::LtEq => (8, Ok(BinOp::Lte)),
        TokenKind::Gt => (8, Ok(BinOp::Gt)),
        TokenKind::GtEq => (8, Ok(BinOp::Gte)),
        TokenKind::Shl => (9, Ok(BinOp::Shl)),
        TokenKind::Shr => (9, Ok(BinOp::Shr)),
        TokenKind::UShr => (9, Ok(BinOp::UShr)),
        TokenKind::Plus => (10, Ok(BinOp::Add)),
        TokenKind::Minus => (10, Ok(BinOp::Sub)),
        TokenKind::Star => (11, Ok(BinOp::Mul)),
        TokenKind::Slash => (11, Ok(BinOp::Div)),
        TokenKind::Percent => (11, Ok(BinOp::Mod)),
        TokenKind::StarStar => (12, Ok(BinOp::Pow)),
        _ => return None,
    };
    Some(op)
}

const RELATIONAL: u8 = 8;
const EXPONENT: u8 = 12;

fn assign_op(kind: &TokenKind) -> Option<Option<BinOp>> {
    match kind {
        TokenKind::Eq => Some(None),
        TokenKind::PlusEq => Some(Some(BinOp::Add)),
        TokenKind::MinusEq => Some(Some(BinOp::Sub)),
        TokenKind::StarEq => Some(Some(BinOp::Mul)),
        TokenKind::SlashEq => Some(Some(BinOp::Div)),
        TokenKind::PercentEq => Some(Some(BinOp::Mod)),
        _ => None,
    }
}

fn is_target(expr: &Expr) -> bool {
    matches!(expr, Expr::Ident(..) | Expr::Index { .. } | Expr::Member { .. })
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            next_function_id: 1,
            splits: Vec::new(),
            depth: 0,
        }
    }

    fn deepen(&mut self) -> Result<(), CompileError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("code is nested too deeply".into()));
        }
        self.depth += 1;
        Ok(())
    }

    /// Run `f` one nesting level down, restoring the level afterwards.
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, CompileError>,
    ) -> Result<T, CompileError> {
        let base = self.depth;
        let out = self.deepen().and_then(|_| f(self));
        self.depth = base;
        out
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn current_line(&self) -> usize {
        match self.tokens.get(self.pos) {
            Some(t) => t.line,
            None => self.tokens.last().map(|t| t.line).unwrap_or(1),
        }
    }

    fn advance(&mut self) -> Option<TokenKind> {
        let tok = self.tokens.get(self.pos).map(|t| t.kind.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek().is_some_and(|k| same_kind(k, kind))
    }

    fn check_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(TokenKind::Ident(s)) if s == word)
    }

    fn check_word_at(&self, offset: usize, word: &str) -> bool {
        matches!(self.peek_at(offset), Some(TokenKind::Ident(s)) if s == word)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn newline_before(&self) -> bool {
        self.peek_token().is_some_and(|t| t.newline_before)
    }

    fn expect(&mut self, expected: &TokenKind) -> Result<(), CompileError> {
        match self.peek() {
            Some(k) if same_kind(k, expected) => {
                self.pos += 1;
                Ok(())
            }
            Some(k) => Err(self.error(format!("expected {:?}, got {:?}", expected, k))),
            None => Err(self.error(format!("expected {:?}, got EOF", expected))),
        }
    }

    fn expect_ident(&mut self) -> Result<String, CompileError> {
        match self.peek() {
            Some(TokenKind::Ident(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            }
            Some(other) => Err(self.error(format!("expected identifier, got {:?}", other))),
            None => Err(self.error("expected identifier, got EOF".into())),
        }
    }

    fn error(&self, msg: String) -> CompileError {
        CompileError::Parse {
            line: self.current_line(),
            msg,
        }
    }

    /// Automatic semicolon insertion: a statement ends at `;`, `}`, EOF or a line break.
    fn end_statement(&mut self) -> Result<(), CompileError> {
        if self.eat(&TokenKind::Semi) {
            return Ok(());
        }
        match self.peek_token() {
            None => Ok(()),
            Some(t) if t.kind == TokenKind::RBrace || t.newline_before => Ok(()),
            Some(t) => Err(self.error(format!("expected ';', got {:?}", t.kind))),
        }
    }

    fn fresh_function_id(&mut self) -> usize {
        let id = self.next_function_id;
        self.next_function_id += 1;
        id
    }

    fn parse_program(&mut self) -> Result<Program, CompileError> {
        let mut body = Vec::new();
        while self.peek().is_some() {
            body.push(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    // --- Statements ---

    fn parse_block(&mut self) -> Result<Vec<Stmt>, CompileError> {
        self.expect(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.peek().is_none() {
                return Err(self.error("unterminated block".into()));
            }
            stmts.push(self.parse_statement()?);
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(stmts)
    }

    fn parse_statement(&mut self) -> Result<Stmt, CompileError> {
        self.nested(Self::parse_statement_inner)
    }

    fn parse_statement_inner(&mut self) -> Result<Stmt, CompileError> {
        let line = self.current_line();
        let Some(kind) = self.peek().cloned() else {
            return Err(self.error("unexpected EOF".into()));
        };
        match kind {
            TokenKind::LBrace => Ok(Stmt::Block(self.parse_block()?)),
            TokenKind::Semi => {
                self.advance();
                Ok(Stmt::Empty)
            }
            TokenKind::Export => {
                self.advance();
                self.eat(&TokenKind::Default);
                self.parse_statement()
            }
            TokenKind::Const | TokenKind::Let | TokenKind::Var => {
                let stmt = self.parse_var_decl()?;
                self.end_statement()?;
                Ok(stmt)
            }
            TokenKind::Function => {
                self.advance();
                let name = self.expect_ident()?;
                let func = self.parse_function_rest(Some(name), line)?;
                Ok(Stmt::Function(Box::new(func)))
            }
            TokenKind::If => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let cond = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                let then = Box::new(self.parse_statement()?);
                let otherwise = if self.eat(&TokenKind::Else) {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then,
                    otherwise,
                })
            }
            TokenKind::For => self.parse_for(),
            TokenKind::While => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let cond = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                let body = Box::new(self.parse_statement()?);
                Ok(Stmt::While { cond, body })
            }
            TokenKind::Do => {
                self.advance();
                let body = Box::new(self.parse_statement()?);
                self.expect(&TokenKind::While)?;
                self.expect(&TokenKind::LParen)?;
                let cond = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                self.eat(&TokenKind::Semi);
                Ok(Stmt::DoWhile { body, cond })
            }
            TokenKind::Break => {
                self.advance();
                self.end_statement()?;
                Ok(Stmt::Break(line))
            }
            TokenKind::Continue => {
                self.advance();
                self.end_statement()?;
                Ok(Stmt::Continue(line))
            }
            TokenKind::Return => {
                self.advance();
                let value = match self.peek() {
                    None | Some(TokenKind::Semi) | Some(TokenKind::RBrace) => None,
                    Some(_) if self.newline_before() => None,
                    Some(_) => Some(self.parse_expression()?),
                };
                self.end_statement()?;
                Ok(Stmt::Return(value))
            }
            TokenKind::Throw => {
                self.advance();
                let value = self.parse_expression()?;
                self.end_statement()?;
                Ok(Stmt::Throw(value))
            }
            TokenKind::Ident(ref word)
                if word == "type"
                    && matches!(self.peek_at(1), Some(TokenKind::Ident(_)))
                    && matches!(self.peek_at(2), Some(TokenKind::Eq | TokenKind::Lt)) =>
            {
                self.advance();
                self.advance();
                if self.check(&TokenKind::Lt) {
                    self.skip_type_params()?;
                }
                self.expect(&TokenKind::Eq)?;
                self.skip_type()?;
                self.end_statement()?;
                Ok(Stmt::Empty)
            }
            TokenKind::Ident(ref word)
                if word == "interface" && matches!(self.peek_at(1), Some(TokenKind::Ident(_))) =>
            {
                self.advance();
                while !self.check(&TokenKind::LBrace) {
                    if self.advance().is_none() {
                        return Err(self.error("unterminated interface".into()));
                    }
                }
                self.skip_balanced()?;
                Ok(Stmt::Empty)
            }
            _ => {
                let expr = self.parse_expression()?;
                self.end_statement()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn decl_kind(&mut self) -> Option<DeclKind> {
        let kind = match self.peek()? {
            TokenKind::Const => DeclKind::Const,
            TokenKind::Let => DeclKind::Let,
            TokenKind::Var => DeclKind::Var,
            _ => return None,
        };
        self.advance();
        Some(kind)
    }

    fn parse_var_decl(&mut self) -> Result<Stmt, CompileError> {
        let line = self.current_line();
        let kind = self
            .decl_kind()
            .ok_or_else(|| self.error("expected declaration".into()))?;
        let mut decls = Vec::new();
        loop {
            let name = self.expect_ident()?;
            self.eat(&TokenKind::Bang);
            if self.eat(&TokenKind::Colon) {
                self.skip_type()?;
            }
            let init = if self.eat(&TokenKind::Eq) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            if kind == DeclKind::Const && init.is_none() {
                return Err(self.error(format!("missing initializer in const declaration '{name}'")));
            }
            decls.push(Declarator { name, init });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(Stmt::Var { kind, decls, line })
    }

    fn parse_for(&mut self) -> Result<Stmt, CompileError> {
        let line = self.current_line();
        self.expect(&TokenKind::For)?;
        self.expect(&TokenKind::LParen)?;

        let declares = matches!(
            self.peek(),
            Some(TokenKind::Const | TokenKind::Let | TokenKind::Var)
        );
        let of_offset = if declares { 2 } else { 1 };
        let binds_ident = matches!(
            self.peek_at(of_offset - 1),
            Some(TokenKind::Ident(_))
        );
        if binds_ident && self.check_word_at(of_offset, "of") {
            let kind = self.decl_kind();
            let name = self.expect_ident()?;
            self.advance();
            let iterable = self.parse_assignment()?;
            self.expect(&TokenKind::RParen)?;
            let body = Box::new(self.parse_statement()?);
            return Ok(Stmt::ForOf {
                kind,
                name,
                iterable,
                body,
                line,
            });
        }

        let init = if self.check(&TokenKind::Semi) {
            None
        } else if declares {
            Some(Box::new(self.parse_var_decl()?))
        } else {
            Some(Box::new(Stmt::Expr(self.parse_expression()?)))
        };
        self.expect(&TokenKind::Semi)?;
        let cond = if self.check(&TokenKind::Semi) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&TokenKind::Semi)?;
        let update = if self.check(&TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&TokenKind::RParen)?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::For {
            init,
            cond,
            update,
            body,
        })
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, CompileError> {
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) {
            if self.check(&TokenKind::Ellipsis) {
                return Err(self.error("rest parameters are not supported".into()));
            }
            let name = self.expect_ident()?;
            self.eat(&TokenKind::Question);
            if self.eat(&TokenKind::Colon) {
                self.skip_type()?;
            }
            let default = if self.eat(&TokenKind::Eq) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            params.push(Param { name, default });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(params)
    }

    /// Parse `<T>(params): R { body }` after the `function` keyword and optional name.
    fn parse_function_rest(
        &mut self,
        name: Option<String>,
        line: usize,
    ) -> Result<FunctionLit, CompileError> {
        if self.check(&TokenKind::Lt) {
            self.skip_type_params()?;
        }
        let params = self.parse_params()?;
        if self.eat(&TokenKind::Colon) {
            self.skip_type()?;
        }
        let body = Body::Block(self.parse_block()?);
        Ok(FunctionLit {
            id: self.fresh_function_id(),
            name,
            params,
            body,
            line,
        })
    }

    // --- Expressions ---

    fn parse_expression(&mut self) -> Result<Expr, CompileError> {
        let first = self.parse_assignment()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut exprs = vec![first];
        while self.eat(&TokenKind::Comma) {
            exprs.push(self.parse_assignment()?);
        }
        Ok(Expr::Sequence(exprs))
    }

    fn parse_assignment(&mut self) -> Result<Expr, CompileError> {
        self.nested(Self::parse_assignment_inner)
    }

    fn parse_assignment_inner(&mut self) -> Result<Expr, CompileError> {
        if let Some(arrow) = self.try_arrow()? {
            return Ok(arrow);
        }
        let line = self.current_line();
        let target = self.parse_conditional()?;
        let Some(op) = self.peek().and_then(assign_op) else {
            return Ok(target);
        };
        if !is_target(&target) {
            return Err(self.error("invalid assignment target".into()));
        }
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
            line,
        })
    }

    /// Arrow functions: `x => ...` or `(a: T, b = 1): R => ...`.
    /// The parameter list is parsed speculatively; the body is not.
    fn try_arrow(&mut self) -> Result<Option<Expr>, CompileError> {
        let line = self.current_line();
        let params = match self.peek() {
            Some(TokenKind::Ident(name)) if matches!(self.peek_at(1), Some(TokenKind::FatArrow)) => {
                let name = name.clone();
                self.pos += 2;
                vec![Param {
                    name,
                    default: None,
                }]
            }
            Some(TokenKind::LParen) => {
                let start = self.pos;
                let splits = self.splits.len();
                let header = self.parse_params().and_then(|params| {
                    if self.eat(&TokenKind::Colon) {
                        self.skip_type()?;
                    }
                    self.expect(&TokenKind::FatArrow)?;
                    Ok(params)
                });
                match header {
                    Ok(params) => params,
                    Err(_) => {
                        while self.splits.len() > splits {
                            if let Some((at, kind)) = self.splits.pop() {
                                self.tokens[at].kind = kind;
                            }
                        }
                        self.pos = start;
                        return Ok(None);
                    }
                }
            }
            _ => return Ok(None),
        };
        let body = if self.check(&TokenKind::LBrace) {
            Body::Block(self.parse_block()?)
        } else {
            Body::Expr(Box::new(self.parse_assignment()?))
        };
        Ok(Some(Expr::Function(Box::new(FunctionLit {
            id: self.fresh_function_id(),
            name: None,
            params,
            body,
            line,
        }))))
    }

    fn parse_conditional(&mut self) -> Result<Expr, CompileError> {
        let test = self.parse_binary(1)?;
        if !self.eat(&TokenKind::Question) {
            return Ok(test);
        }
        let then = self.parse_assignment()?;
        self.expect(&TokenKind::Colon)?;
        let otherwise = self.parse_assignment()?;
        Ok(Expr::Conditional(
            Box::new(test),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, CompileError> {
        self.nested(|p| p.parse_binary_chain(min_prec))
    }

    fn parse_binary_chain(&mut self, min_prec: u8) -> Result<Expr, CompileError> {
        let mut left = self.parse_unary()?;
        loop {
            if min_prec <= RELATIONAL
                && (self.check_word("as") || self.check_word("satisfies"))
                && !self.newline_before()
            {
                self.advance();
                self.skip_type()?;
                continue;
            }
            let Some((prec, op)) = self.peek().and_then(binary_op) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            self.deepen()?;
            let next_min = if prec == EXPONENT { prec } else { prec + 1 };
            let right = self.parse_binary(next_min)?;
            left = match op {
                Ok(bin) => Expr::Binary(bin, Box::new(left), Box::new(right)),
                Err(logical) => Expr::Logical(logical, Box::new(left), Box::new(right)),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        self.nested(Self::parse_unary_inner)
    }

    fn parse_unary_inner(&mut self) -> Result<Expr, CompileError> {
        let line = self.current_line();
        let op = match self.peek() {
            Some(TokenKind::Bang) => UnaryOp::Not,
            Some(TokenKind::Minus) => UnaryOp::Neg,
            Some(TokenKind::Plus) => UnaryOp::Plus,
            Some(TokenKind::Tilde) => UnaryOp::BitNot,
            Some(TokenKind::TypeOf) => UnaryOp::TypeOf,
            Some(TokenKind::PlusPlus | TokenKind::MinusMinus) => {
                let increment = self.check(&TokenKind::PlusPlus);
                self.advance();
                let target = self.parse_unary()?;
                if !is_target(&target) {
                    return Err(self.error("invalid update target".into()));
                }
                return Ok(Expr::Update {
                    increment,
                    prefix: true,
                    target: Box::new(target),
                    line,
                });
            }
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let line = self.current_line();
        let expr = self.parse_call_member()?;
        if matches!(self.peek(), Some(TokenKind::PlusPlus | TokenKind::MinusMinus))
            && !self.newline_before()
        {
            if !is_target(&expr) {
                return Err(self.error("invalid update target".into()));
            }
            let increment = self.check(&TokenKind::PlusPlus);
            self.advance();
            return Ok(Expr::Update {
                increment,
                prefix: false,
                target: Box::new(expr),
                line,
            });
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<Arg>, CompileError> {
        self.expect(&TokenKind::LParen)?;
        let args = self.parse_elements(&TokenKind::RParen)?;
        self.expect(&TokenKind::RParen)?;
        Ok(args)
    }

    fn parse_elements(&mut self, close: &TokenKind) -> Result<Vec<Arg>, CompileError> {
        let mut items = Vec::new();
        while !self.check(close) {
            if self.eat(&TokenKind::Ellipsis) {
                items.push(Arg::Spread(self.parse_assignment()?));
            } else {
                items.push(Arg::Value(self.parse_assignment()?));
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(items)
    }

    fn parse_call_member(&mut self) -> Result<Expr, CompileError> {
        self.nested(Self::parse_call_chain)
    }

    fn parse_call_chain(&mut self) -> Result<Expr, CompileError> {
        let mut expr = if self.check(&TokenKind::New) {
            let line = self.current_line();
            self.advance();
            let name = self.expect_ident()?;
            if self.check(&TokenKind::Lt) {
                self.skip_type_args()?;
            }
            let args = if self.check(&TokenKind::LParen) {
                self.parse_args()?
            } else {
                Vec::new()
            };
            Expr::New { name, args, line }
        } else {
            self.parse_primary()?
        };

        loop {
            if matches!(
                self.peek(),
                Some(TokenKind::Dot | TokenKind::LBracket | TokenKind::LParen)
            ) {
                self.deepen()?;
            }
            match self.peek() {
                Some(TokenKind::Dot) => {
                    self.advance();
                    let name = self.expect_ident()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        name,
                    };
                }
                Some(TokenKind::LBracket) => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(&TokenKind::RBracket)?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                Some(TokenKind::LParen) => {
                    let line = self.current_line();
                    let args = self.parse_args()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        line,
                    };
                }
                // Non-null assertion `x!` is erased.
                Some(TokenKind::Bang) if !self.newline_before() => {
                    self.advance();
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let line = self.current_line();
        let Some(kind) = self.advance() else {
            return Err(self.error("unexpected EOF".into()));
        };
        match kind {
            TokenKind::Number(n) => Ok(Expr::Number(n)),
            TokenKind::Str(s) => Ok(Expr::Str(s)),
            TokenKind::True => Ok(Expr::Bool(true)),
            TokenKind::False => Ok(Expr::Bool(false)),
            TokenKind::Null => Ok(Expr::Null),
            TokenKind::Ident(name) => Ok(Expr::Ident(name, line)),
            TokenKind::LParen => {
                let expr = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                let items = self.parse_elements(&TokenKind::RBracket)?;
                self.expect(&TokenKind::RBracket)?;
                Ok(Expr::Array(items))
            }
            TokenKind::Function => {
                let name = match self.peek() {
                    Some(TokenKind::Ident(_)) => Some(self.expect_ident()?),
                    _ => None,
                };
                let func = self.parse_function_rest(name, line)?;
                Ok(Expr::Function(Box::new(func)))
            }
            other => Err(CompileError::Parse {
                line,
                msg: format!("unexpected token {:?}", other),
            }),
        }
    }

    // --- Type annotations (parsed and discarded) ---

    fn skip_type(&mut self) -> Result<(), CompileError> {
        self.eat(&TokenKind::Pipe);
        self.eat(&TokenKind::Amp);
        self.skip_type_operand()?;
        while self.eat(&TokenKind::Pipe) || self.eat(&TokenKind::Amp) {
            self.skip_type_operand()?;
        }
        Ok(())
    }

    fn skip_type_operand(&mut self) -> Result<(), CompileError> {
        self.nested(Self::skip_type_operand_inner)
    }

    fn skip_type_operand_inner(&mut self) -> Result<(), CompileError> {
        if self.check_word("readonly") || self.check_word("keyof") || self.check_word("unique") {
            self.advance();
            return self.skip_type_operand();
        }
        match self.peek() {
            Some(TokenKind::TypeOf) => {
                self.advance();
                self.expect_ident()?;
                while self.eat(&TokenKind::Dot) {
                    self.expect_ident()?;
                }
            }
            Some(TokenKind::Ident(_)) => {
                self.advance();
                while self.eat(&TokenKind::Dot) {
                    self.expect_ident()?;
                }
                if self.check(&TokenKind::Lt) {
                    self.skip_type_args()?;
                }
            }
            Some(
                TokenKind::Null
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Number(_)
                | TokenKind::Str(_),
            ) => {
                self.advance();
            }
            Some(TokenKind::Minus) if matches!(self.peek_at(1), Some(TokenKind::Number(_))) => {
                self.pos += 2;
            }
            Some(TokenKind::LParen) => {
                let close = self.matching_close(self.pos)?;
                if matches!(
                    self.tokens.get(close + 1).map(|t| &t.kind),
                    Some(TokenKind::FatArrow)
                ) {
                    self.pos = close + 2;
                    self.skip_type()?;
                } else {
                    self.advance();
                    self.skip_type()?;
                    self.expect(&TokenKind::RParen)?;
                }
            }
            Some(TokenKind::LBracket) => {
                self.advance();
                while !self.check(&TokenKind::RBracket) {
                    self.eat(&TokenKind::Ellipsis);
                    if matches!(self.peek_at(1), Some(TokenKind::Colon)) {
                        self.pos += 2;
                    }
                    self.skip_type()?;
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket)?;
            }
            Some(TokenKind::LBrace) => self.skip_balanced()?,
            Some(other) => return Err(self.error(format!("expected type, got {:?}", other))),
            None => return Err(self.error("expected type, got EOF".into())),
        }
        while self.check(&TokenKind::LBracket)
            && matches!(self.peek_at(1), Some(TokenKind::RBracket))
        {
            self.pos += 2;
        }
        Ok(())
    }

    /// Skip `<A, B<C>>`, splitting `>>` and `>>>` where nested arguments close together.
    fn skip_type_args(&mut self) -> Result<(), CompileError> {
        self.expect(&TokenKind::Lt)?;
        loop {
            self.skip_type()?;
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            let replacement = match self.peek() {
                Some(TokenKind::Gt) => None,
                Some(TokenKind::Shr) => Some(TokenKind::Gt),
                Some(TokenKind::UShr) => Some(TokenKind::Shr),
                Some(TokenKind::GtEq) => Some(TokenKind::Eq),
                Some(other) => {
                    return Err(self.error(format!("expected '>' in type arguments, got {:?}", other)))
                }
                None => return Err(self.error("unterminated type arguments".into())),
            };
            match replacement {
                None => self.pos += 1,
                Some(rest) => {
                    let old = std::mem::replace(&mut self.tokens[self.pos].kind, rest);
                    self.splits.push((self.pos, old));
                }
            }
            return Ok(());
        }
    }

    /// Skip generic parameter lists such as `<T extends number = number>`.
    fn skip_type_params(&mut self) -> Result<(), CompileError> {
        self.expect(&TokenKind::Lt)?;
        let mut depth = 1i32;
        while depth > 0 {
            match self.advance() {
                Some(TokenKind::Lt) => depth += 1,
                Some(TokenKind::Gt) => depth -= 1,
                Some(TokenKind::Shr) => depth -= 2,
                Some(TokenKind::UShr) => depth -= 3,
                Some(_) => {}
                None => return Err(self.error("unterminated type parameters".into())),
            }
        }
        Ok(())
    }

    fn skip_balanced(&mut self) -> Result<(), CompileError> {
        let close = self.matching_close(self.pos)?;
        self.pos = close + 1;
        Ok(())
    }

    /// Index of the bracket closing the one at `open`.
    fn matching_close(&self, open: usize) -> Result<usize, CompileError> {
        let mut depth = 0i32;
        for (i, tok) in self.tokens.iter().enumerate().skip(open) {
            match tok.kind {
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(i);
                    }
                }
                _ => {}
            }
        }
        Err(self.error("unbalanced brackets".into()))
    }
}
