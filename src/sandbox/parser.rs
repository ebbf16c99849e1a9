//! Recursive-descent parser for the sandbox language
//!
//! Operator precedence and statement forms follow Python. Constructs outside
//! the supported subset are reported as syntax errors so that the validator
//! rejects them before anything runs.

use super::ast::*;
use super::lexer::{tokenize, Tok, Token, MAX_NESTING};
use super::SyntaxError;
use std::rc::Rc;

type PResult<T> = Result<T, SyntaxError>;

/// Parse a complete program.
pub fn parse(source: &str) -> PResult<Program> {
    if source.trim().is_empty() {
        return Err(SyntaxError::new(1, "program is empty"));
    }
    let mut parser = Parser::new(tokenize(source)?);
    let mut body = Vec::new();
    while !parser.at(&Tok::Eof) {
        body.extend(parser.statement()?);
    }
    Ok(Program { body })
}

/// Parse a single expression, as found inside an f-string field.
fn parse_embedded_expression(source: &str, line: usize) -> PResult<Expr> {
    let wrapped = format!("({})", source);
    let tokens = tokenize(&wrapped).map_err(|e| SyntaxError::new(line, format!("f-string: {}", e.message)))?;
    let mut parser = Parser::new(tokens);
    let expr = parser
        .test_list()
        .map_err(|e| SyntaxError::new(line, format!("f-string: {}", e.message)))?;
    parser.eat(&Tok::Newline);
    if !parser.at(&Tok::Eof) {
        return Err(SyntaxError::new(line, "f-string: invalid expression"));
    }
    Ok(expr)
}

/// Parameters of a `def` or `lambda` before the body is known
#[derive(Default)]
struct Signature {
    params: Vec<Param>,
    varargs: Option<String>,
    kwonly: Vec<Param>,
    varkw: Option<String>,
}

impl Signature {
    fn binds(&self, name: &str) -> bool {
        self.params.iter().chain(&self.kwonly).any(|p| p.name == name)
            || self.varargs.as_deref() == Some(name)
            || self.varkw.as_deref() == Some(name)
    }

    fn into_def(self, name: String, body: Vec<Stmt>) -> FunctionDef {
        FunctionDef {
            name,
            params: self.params,
            varargs: self.varargs,
            kwonly: self.kwonly,
            varkw: self.varkw,
            body,
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    // ----- token helpers -----

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn peek_next(&self) -> &Tok {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].tok
    }

    fn line(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn at_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Keyword(k) if *k == kw)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.at_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> PResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", op)))
        }
    }

    fn expect_kw(&mut self, kw: &str) -> PResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", kw)))
        }
    }

    fn expect_name(&mut self) -> PResult<String> {
        match self.peek().clone() {
            Tok::Name(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("expected a name")),
        }
    }

    fn expect_newline(&mut self) -> PResult<()> {
        match self.peek() {
            Tok::Newline => {
                self.advance();
                Ok(())
            }
            Tok::Eof | Tok::Dedent => Ok(()),
            _ => Err(self.unexpected()),
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.line(), message)
    }

    fn unexpected(&self) -> SyntaxError {
        let what = match self.peek() {
            Tok::Name(n) => format!("name '{}'", n),
            Tok::Keyword(k) => format!("keyword '{}'", k),
            Tok::Int(i) => format!("number {}", i),
            Tok::BigInt(n) => format!("number {}", n),
            Tok::Float(f) => format!("number {}", f),
            Tok::Str(_) | Tok::FStr(_) => "string literal".to_string(),
            Tok::Op(o) => format!("'{}'", o),
            Tok::Newline => "end of line".to_string(),
            Tok::Indent => return self.error("unexpected indent"),
            Tok::Dedent => return self.error("unexpected unindent"),
            Tok::Eof => "end of input".to_string(),
        };
        self.error(format!("invalid syntax: unexpected {}", what))
    }

    /// Run `f` one nesting level deeper, bounding recursion on hostile input.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("expression is nested too deeply"));
        }
        let result = f(self);
        self.depth -= 1;
        result
    }

    // ----- statements -----

    fn statement(&mut self) -> PResult<Vec<Stmt>> {
        let line = self.line();
        let kind = match self.peek().clone() {
            Tok::Keyword("if") => self.if_stmt()?,
            Tok::Keyword("while") => self.while_stmt()?,
            Tok::Keyword("for") => self.for_stmt()?,
            Tok::Keyword("def") => self.def_stmt()?,
            Tok::Keyword("try") => self.try_stmt()?,
            Tok::Keyword(kw @ ("class" | "with" | "async")) => {
                return Err(self.error(format!("'{}' statements are not supported", kw)))
            }
            Tok::Op("@") => return Err(self.error("decorators are not supported")),
            Tok::Indent => return Err(self.error("unexpected indent")),
            Tok::Dedent => return Err(self.error("unexpected unindent")),
            _ => return self.simple_line(),
        };
        Ok(vec![Stmt { kind, line }])
    }

    fn simple_line(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = vec![self.simple_stmt()?];
        while self.eat_op(";") {
            if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                break;
            }
            stmts.push(self.simple_stmt()?);
        }
        self.expect_newline()?;
        Ok(stmts)
    }

    fn simple_stmt(&mut self) -> PResult<Stmt> {
        let line = self.line();
        let kind = match self.peek().clone() {
            Tok::Keyword("pass") => {
                self.advance();
                StmtKind::Pass
            }
            Tok::Keyword("break") => {
                self.advance();
                StmtKind::Break
            }
            Tok::Keyword("continue") => {
                self.advance();
                StmtKind::Continue
            }
            Tok::Keyword("return") => {
                self.advance();
                if self.at_line_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.test_list()?))
                }
            }
            Tok::Keyword(kw @ ("global" | "nonlocal")) => {
                self.advance();
                let mut names = vec![self.expect_name()?];
                while self.eat_op(",") {
                    names.push(self.expect_name()?);
                }
                if kw == "global" {
                    StmtKind::Global(names)
                } else {
                    StmtKind::Nonlocal(names)
                }
            }
            Tok::Keyword("del") => {
                self.advance();
                let first = self.bit_or()?;
                let mut targets = vec![self.to_target(first)?];
                while self.eat_op(",") {
                    if self.at_line_end() {
                        break;
                    }
                    let next = self.bit_or()?;
                    targets.push(self.to_target(next)?);
                }
                StmtKind::Del(targets)
            }
            Tok::Keyword("assert") => {
                self.advance();
                let test = self.test()?;
                let message = if self.eat_op(",") { Some(self.test()?) } else { None };
                StmtKind::Assert { test, message }
            }
            Tok::Keyword("raise") => {
                self.advance();
                if self.at_line_end() {
                    StmtKind::Raise(None)
                } else {
                    let exc = self.test()?;
                    if self.eat_kw("from") {
                        self.test()?;
                    }
                    StmtKind::Raise(Some(exc))
                }
            }
            Tok::Keyword("import") => {
                self.advance();
                let mut names = vec![self.import_alias(true)?];
                while self.eat_op(",") {
                    names.push(self.import_alias(true)?);
                }
                StmtKind::Import(names)
            }
            Tok::Keyword("from") => {
                self.advance();
                let module = self.dotted_name()?;
                self.expect_kw("import")?;
                if self.at_op("*") {
                    return Err(self.error("wildcard imports are not supported"));
                }
                let parenthesized = self.eat_op("(");
                let mut names = vec![self.import_alias(false)?];
                while self.eat_op(",") {
                    if parenthesized && self.at_op(")") {
                        break;
                    }
                    names.push(self.import_alias(false)?);
                }
                if parenthesized {
                    self.expect_op(")")?;
                }
                StmtKind::ImportFrom { module, names }
            }
            Tok::Keyword(kw @ ("yield" | "await")) => {
                return Err(self.error(format!("'{}' is not supported", kw)))
            }
            _ => self.expr_stmt()?,
        };
        Ok(Stmt { kind, line })
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof | Tok::Dedent) || self.at_op(";")
    }

    fn dotted_name(&mut self) -> PResult<String> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn import_alias(&mut self, dotted: bool) -> PResult<Alias> {
        let name = if dotted { self.dotted_name()? } else { self.expect_name()? };
        let alias = if self.eat_kw("as") { Some(self.expect_name()?) } else { None };
        Ok(Alias { name, alias })
    }

    fn expr_stmt(&mut self) -> PResult<StmtKind> {
        let first = self.test_list()?;

        if let Tok::Op(op) = self.peek().clone() {
            if let Some(bin) = BinOp::from_augmented(op) {
                self.advance();
                let target = match self.to_target(first)? {
                    Target::Unpack(_) => {
                        return Err(self.error("illegal expression for augmented assignment"))
                    }
                    target => target,
                };
                let value = self.test_list()?;
                return Ok(StmtKind::AugAssign { target, op: bin, value });
            }
        }

        // Annotated assignment; the annotation is parsed and discarded
        if self.eat_op(":") {
            let target = match first {
                Expr::Name(_) | Expr::Subscript(..) => self.to_target(first)?,
                _ => return Err(self.error("illegal target for annotation")),
            };
            self.test()?;
            if self.eat_op("=") {
                let value = self.test_list()?;
                return Ok(StmtKind::Assign { targets: vec![target], value });
            }
            return Ok(StmtKind::Pass);
        }

        if self.at_op("=") {
            let mut targets = vec![self.to_target(first)?];
            let mut value;
            loop {
                self.expect_op("=")?;
                value = self.test_list()?;
                if self.at_op("=") {
                    targets.push(self.to_target(value)?);
                } else {
                    break;
                }
            }
            return Ok(StmtKind::Assign { targets, value });
        }

        Ok(StmtKind::Expr(first))
    }

    fn to_target(&self, expr: Expr) -> PResult<Target> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Tuple(items) | Expr::List(items) => {
                if items.iter().filter(|item| matches!(item, Expr::Starred(_))).count() > 1 {
                    return Err(self.error("multiple starred expressions in assignment"));
                }
                let targets = items
                    .into_iter()
                    .map(|item| match item {
                        Expr::Starred(inner) => Ok(Target::Starred(Box::new(self.to_target(*inner)?))),
                        item => self.to_target(item),
                    })
                    .collect::<PResult<Vec<_>>>()?;
                Ok(Target::Unpack(targets))
            }
            Expr::Starred(_) => Err(self.error("starred assignment target must be in a list or tuple")),
            Expr::Subscript(obj, index) => Ok(Target::Subscript(*obj, *index)),
            Expr::Attribute(..) => Err(self.error("attribute assignment is not supported")),
            Expr::Literal(_) | Expr::FString(_) => Err(self.error("cannot assign to literal")),
            Expr::Call { .. } => Err(self.error("cannot assign to function call")),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_op(":")?;
        if !self.eat(&Tok::Newline) {
            return self.simple_line();
        }
        if !self.eat(&Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        let mut body = Vec::new();
        while !matches!(self.peek(), Tok::Dedent | Tok::Eof) {
            body.extend(self.statement()?);
        }
        self.eat(&Tok::Dedent);
        Ok(body)
    }

    fn if_stmt(&mut self) -> PResult<StmtKind> {
        self.advance();
        let test = self.test()?;
        let body = self.block()?;
        let orelse = if self.at_kw("elif") {
            let line = self.line();
            let kind = self.if_stmt()?;
            vec![Stmt { kind, line }]
        } else if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::If { test, body, orelse })
    }

    fn while_stmt(&mut self) -> PResult<StmtKind> {
        self.advance();
        let test = self.test()?;
        let body = self.block()?;
        let orelse = if self.eat_kw("else") { self.block()? } else { Vec::new() };
        Ok(StmtKind::While { test, body, orelse })
    }

    fn for_stmt(&mut self) -> PResult<StmtKind> {
        self.advance();
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.test_list()?;
        let body = self.block()?;
        let orelse = if self.eat_kw("else") { self.block()? } else { Vec::new() };
        Ok(StmtKind::For { target, iter, body, orelse })
    }

    fn def_stmt(&mut self) -> PResult<StmtKind> {
        self.advance();
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let signature = self.params(")", true)?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.test()?;
        }
        let body = self.block()?;
        Ok(StmtKind::FunctionDef(Rc::new(signature.into_def(name, body))))
    }

    /// Parameter list up to (not including) `close`.
    fn params(&mut self, close: &str, annotations: bool) -> PResult<Signature> {
        let mut signature = Signature::default();
        let mut bare_star = false;
        while !self.at_op(close) {
            if self.at_op("/") {
                return Err(self.error("positional-only parameters are not supported"));
            }
            if signature.varkw.is_some() {
                return Err(self.error("arguments cannot follow var-keyword argument"));
            }
            if self.eat_op("**") {
                signature.varkw = Some(self.param_name(&signature, annotations)?);
            } else if self.eat_op("*") {
                if bare_star || signature.varargs.is_some() {
                    return Err(self.error("* argument may appear only once"));
                }
                if self.at_op(",") || self.at_op(close) {
                    bare_star = true;
                } else {
                    signature.varargs = Some(self.param_name(&signature, annotations)?);
                }
            } else {
                let name = self.param_name(&signature, annotations)?;
                let default = if self.eat_op("=") { Some(self.test()?) } else { None };
                if bare_star || signature.varargs.is_some() {
                    signature.kwonly.push(Param { name, default });
                } else {
                    if default.is_none() && signature.params.iter().any(|p| p.default.is_some()) {
                        return Err(self.error("non-default argument follows default argument"));
                    }
                    signature.params.push(Param { name, default });
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        if bare_star && signature.kwonly.is_empty() {
            return Err(self.error("named arguments must follow bare *"));
        }
        Ok(signature)
    }

    fn param_name(&mut self, signature: &Signature, annotations: bool) -> PResult<String> {
        let name = self.expect_name()?;
        if signature.binds(&name) {
            return Err(self.error(format!("duplicate argument '{}' in function definition", name)));
        }
        if annotations && self.eat_op(":") {
            self.test()?;
        }
        Ok(name)
    }

    fn try_stmt(&mut self) -> PResult<StmtKind> {
        self.advance();
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.eat_kw("except") {
            let (class, binding) = if self.at_op(":") {
                (None, None)
            } else {
                let class = self.test()?;
                let binding = if self.eat_kw("as") { Some(self.expect_name()?) } else { None };
                (Some(class), binding)
            };
            let body = self.block()?;
            handlers.push(Handler { class, binding, body });
        }
        let orelse = if !handlers.is_empty() && self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_kw("finally") { self.block()? } else { Vec::new() };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(StmtKind::Try { body, handlers, orelse, finalbody })
    }

    fn target_list(&mut self) -> PResult<Target> {
        let first = self.star_or(Self::bit_or)?;
        if !self.at_op(",") {
            return self.to_target(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_kw("in") || self.at_op("=") {
                break;
            }
            items.push(self.star_or(Self::bit_or)?);
        }
        self.to_target(Expr::Tuple(items))
    }

    // ----- expressions -----

    /// `*operand` where a display or target list allows one, otherwise `parse`.
    fn star_or(&mut self, parse: fn(&mut Self) -> PResult<Expr>) -> PResult<Expr> {
        if self.eat_op("*") {
            return Ok(Expr::Starred(Box::new(self.bit_or()?)));
        }
        parse(self)
    }

    /// Comma-separated expressions; more than one (or a trailing comma) builds a tuple.
    fn test_list(&mut self) -> PResult<Expr> {
        let first = self.star_or(Self::test)?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_line_end() || self.at_op("=") || self.at_op(")") || self.at_op(":") {
                break;
            }
            items.push(self.star_or(Self::test)?);
        }
        Ok(Expr::Tuple(items))
    }

    fn test(&mut self) -> PResult<Expr> {
        self.nested(|p| {
            if p.at_kw("lambda") {
                return p.lambda();
            }
            let body = p.or_test()?;
            if p.eat_kw("if") {
                let test = p.or_test()?;
                p.expect_kw("else")?;
                let orelse = p.test()?;
                return Ok(Expr::IfElse {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                });
            }
            Ok(body)
        })
    }

    fn lambda(&mut self) -> PResult<Expr> {
        let line = self.line();
        self.expect_kw("lambda")?;
        let signature = self.params(":", false)?;
        self.expect_op(":")?;
        let body = self.test()?;
        let body = vec![Stmt {
            kind: StmtKind::Return(Some(body)),
            line,
        }];
        Ok(Expr::Lambda(Rc::new(signature.into_def("<lambda>".to_string(), body))))
    }

    fn or_test(&mut self) -> PResult<Expr> {
        let mut left = self.and_test()?;
        while self.eat_kw("or") {
            let right = self.and_test()?;
            left = Expr::Bool(BoolOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_test(&mut self) -> PResult<Expr> {
        let mut left = self.not_test()?;
        while self.eat_kw("and") {
            let right = self.not_test()?;
            left = Expr::Bool(BoolOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_test(&mut self) -> PResult<Expr> {
        if self.eat_kw("not") {
            let operand = self.nested(|p| p.not_test())?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let left = self.bit_or()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek().clone() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Keyword("in") => CmpOp::In,
                Tok::Keyword("not") if matches!(self.peek_next(), Tok::Keyword("in")) => {
                    self.advance();
                    CmpOp::NotIn
                }
                Tok::Keyword("is") => {
                    if matches!(self.peek_next(), Tok::Keyword("not")) {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            rest.push((op, self.bit_or()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare(Box::new(left), rest))
        }
    }

    fn bit_or(&mut self) -> PResult<Expr> {
        let mut left = self.bit_xor()?;
        while self.eat_op("|") {
            let right = self.bit_xor()?;
            left = Expr::Binary(Box::new(left), BinOp::BitOr, Box::new(right));
        }
        Ok(left)
    }

    fn bit_xor(&mut self) -> PResult<Expr> {
        let mut left = self.bit_and()?;
        while self.eat_op("^") {
            let right = self.bit_and()?;
            left = Expr::Binary(Box::new(left), BinOp::BitXor, Box::new(right));
        }
        Ok(left)
    }

    fn bit_and(&mut self) -> PResult<Expr> {
        let mut left = self.shift()?;
        while self.eat_op("&") {
            let right = self.shift()?;
            left = Expr::Binary(Box::new(left), BinOp::BitAnd, Box::new(right));
        }
        Ok(left)
    }

    fn shift(&mut self) -> PResult<Expr> {
        let mut left = self.arith()?;
        loop {
            let op = match self.peek() {
                Tok::Op("<<") => BinOp::LShift,
                Tok::Op(">>") => BinOp::RShift,
                _ => break,
            };
            self.advance();
            let right = self.arith()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn arith(&mut self) -> PResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Op("+") => BinOp::Add,
                Tok::Op("-") => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.term()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> PResult<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Tok::Op("*") => BinOp::Mul,
                Tok::Op("/") => BinOp::Div,
                Tok::Op("//") => BinOp::FloorDiv,
                Tok::Op("%") => BinOp::Mod,
                Tok::Op("@") => BinOp::MatMul,
                _ => break,
            };
            self.advance();
            let right = self.factor()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn factor(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Tok::Op("-") => UnaryOp::Neg,
            Tok::Op("+") => UnaryOp::Pos,
            Tok::Op("~") => UnaryOp::Invert,
            _ => return self.power(),
        };
        self.advance();
        let operand = self.nested(|p| p.factor())?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn power(&mut self) -> PResult<Expr> {
        let base = self.primary()?;
        if self.eat_op("**") {
            let exponent = self.nested(|p| p.factor())?;
            return Ok(Expr::Binary(Box::new(base), BinOp::Pow, Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                expr = self.call(expr)?;
            } else if self.eat_op("[") {
                let index = self.subscript()?;
                self.expect_op("]")?;
                expr = Expr::Subscript(Box::new(expr), Box::new(index));
            } else if self.eat_op(".") {
                let name = self.expect_name()?;
                expr = Expr::Attribute(Box::new(expr), name);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn call(&mut self, func: Expr) -> PResult<Expr> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        let mut mapping_seen = false;
        while !self.at_op(")") {
            if self.eat_op("*") {
                if mapping_seen {
                    return Err(self.error("iterable argument unpacking follows keyword argument unpacking"));
                }
                args.push(Arg::Starred(self.test()?));
            } else if self.eat_op("**") {
                mapping_seen = true;
                args.push(Arg::DoubleStarred(self.test()?));
            } else if matches!(self.peek(), Tok::Name(_)) && matches!(self.peek_next(), Tok::Op("=")) {
                let name = self.expect_name()?;
                self.advance();
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(format!("keyword argument repeated: {}", name)));
                }
                kwargs.push((name, self.test()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                if mapping_seen {
                    return Err(self.error("positional argument follows keyword argument unpacking"));
                }
                let arg = self.test()?;
                if self.at_kw("for") {
                    let generator = self.comprehension(CompKind::Generator, arg, None)?;
                    args.push(Arg::Positional(generator));
                    if !self.at_op(")") {
                        return Err(self.error("generator expression must be parenthesized"));
                    }
                    break;
                }
                args.push(Arg::Positional(arg));
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(Expr::Call {
            func: Box::new(func),
            args,
            kwargs,
        })
    }

    fn subscript(&mut self) -> PResult<Expr> {
        let first = self.slice_item()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("]") {
                break;
            }
            items.push(self.slice_item()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn slice_item(&mut self) -> PResult<Expr> {
        let lower = if self.at_op(":") { None } else { Some(self.test()?) };
        if !self.eat_op(":") {
            return lower.ok_or_else(|| self.error("expected subscript"));
        }
        let upper = if self.at_op(":") || self.at_op("]") || self.at_op(",") {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat_op(":") && !(self.at_op("]") || self.at_op(",")) {
            Some(Box::new(self.test()?))
        } else {
            None
        };
        Ok(Expr::Slice(lower.map(Box::new), upper, step))
    }

    fn comprehension(&mut self, kind: CompKind, element: Expr, value: Option<Expr>) -> PResult<Expr> {
        if matches!(element, Expr::Starred(_)) {
            return Err(self.error("iterable unpacking cannot be used in comprehension"));
        }
        let mut clauses = Vec::new();
        while self.eat_kw("for") {
            let target = self.target_list()?;
            self.expect_kw("in")?;
            let iter = self.or_test()?;
            let mut conditions = Vec::new();
            while self.eat_kw("if") {
                conditions.push(self.or_test()?);
            }
            clauses.push(CompClause { target, iter, conditions });
        }
        Ok(Expr::Comprehension {
            kind,
            element: Box::new(element),
            value: value.map(Box::new),
            clauses,
        })
    }

    fn atom(&mut self) -> PResult<Expr> {
        match self.peek().clone() {
            Tok::Name(name) => {
                self.advance();
                Ok(Expr::Name(name))
            }
            Tok::Int(i) => {
                self.advance();
                Ok(Expr::Literal(Literal::Int(i)))
            }
            Tok::BigInt(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::BigInt(Rc::new(n))))
            }
            Tok::Float(f) => {
                self.advance();
                Ok(Expr::Literal(Literal::Float(f)))
            }
            Tok::Str(_) | Tok::FStr(_) => self.strings(),
            Tok::Keyword("True") => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            Tok::Keyword("False") => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            Tok::Keyword("None") => {
                self.advance();
                Ok(Expr::Literal(Literal::None))
            }
            Tok::Op("(") => {
                self.advance();
                self.paren()
            }
            Tok::Op("[") => {
                self.advance();
                self.list_display()
            }
            Tok::Op("{") => {
                self.advance();
                self.brace_display()
            }
            Tok::Op("...") => Err(self.error("Ellipsis is not supported")),
            _ => Err(self.unexpected()),
        }
    }

    /// Adjacent string literals concatenate; any f-string part turns the
    /// whole run into an f-string.
    fn strings(&mut self) -> PResult<Expr> {
        let line = self.line();
        let mut parts: Vec<FPart> = Vec::new();
        let mut formatted = false;
        loop {
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.advance();
                    parts.push(FPart::Text(s));
                }
                Tok::FStr(body) => {
                    self.advance();
                    formatted = true;
                    parts.extend(parse_fstring(&body, line)?);
                }
                _ => break,
            }
        }
        if formatted {
            return Ok(Expr::FString(parts));
        }
        let text: String = parts
            .into_iter()
            .map(|part| match part {
                FPart::Text(s) => s,
                FPart::Field { .. } => String::new(),
            })
            .collect();
        Ok(Expr::Literal(Literal::Str(Rc::from(text.as_str()))))
    }

    fn paren(&mut self) -> PResult<Expr> {
        if self.eat_op(")") {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.star_or(Self::test)?;
        if self.at_kw("for") {
            let generator = self.comprehension(CompKind::Generator, first, None)?;
            self.expect_op(")")?;
            return Ok(generator);
        }
        if !self.at_op(",") {
            if matches!(first, Expr::Starred(_)) {
                return Err(self.error("cannot use starred expression here"));
            }
            self.expect_op(")")?;
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op(")") {
                break;
            }
            items.push(self.star_or(Self::test)?);
        }
        self.expect_op(")")?;
        Ok(Expr::Tuple(items))
    }

    fn list_display(&mut self) -> PResult<Expr> {
        if self.eat_op("]") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.star_or(Self::test)?;
        if self.at_kw("for") {
            let comp = self.comprehension(CompKind::List, first, None)?;
            self.expect_op("]")?;
            return Ok(comp);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("]") {
                break;
            }
            items.push(self.star_or(Self::test)?);
        }
        self.expect_op("]")?;
        Ok(Expr::List(items))
    }

    fn brace_display(&mut self) -> PResult<Expr> {
        if self.eat_op("}") {
            return Ok(Expr::Dict(Vec::new()));
        }
        if self.at_op("**") {
            return Err(self.error("dict unpacking is not supported"));
        }
        let first = self.star_or(Self::test)?;

        if !matches!(first, Expr::Starred(_)) && self.eat_op(":") {
            let value = self.test()?;
            if self.at_kw("for") {
                let comp = self.comprehension(CompKind::Dict, first, Some(value))?;
                self.expect_op("}")?;
                return Ok(comp);
            }
            let mut pairs = vec![(first, value)];
            while self.eat_op(",") {
                if self.at_op("}") {
                    break;
                }
                let key = self.test()?;
                self.expect_op(":")?;
                let value = self.test()?;
                pairs.push((key, value));
            }
            self.expect_op("}")?;
            return Ok(Expr::Dict(pairs));
        }

        if self.at_kw("for") {
            let comp = self.comprehension(CompKind::Set, first, None)?;
            self.expect_op("}")?;
            return Ok(comp);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("}") {
                break;
            }
            items.push(self.star_or(Self::test)?);
        }
        self.expect_op("}")?;
        Ok(Expr::Set(items))
    }
}

/// Split an f-string body into literal text and replacement fields.
fn parse_fstring(body: &str, line: usize) -> PResult<Vec<FPart>> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                text.push('}');
                i += 2;
                continue;
            }
            return Err(SyntaxError::new(line, "f-string: single '}' is not allowed"));
        }
        if c != '{' {
            text.push(c);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&'{') {
            text.push('{');
            i += 2;
            continue;
        }

        if !text.is_empty() {
            parts.push(FPart::Text(std::mem::take(&mut text)));
        }

        // Scan the expression up to a top-level '!', ':' or '}'
        let start = i + 1;
        let mut j = start;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        while j < chars.len() {
            let ch = chars[j];
            if let Some(q) = quote {
                if ch == q {
                    quote = None;
                }
                j += 1;
                continue;
            }
            match ch {
                '\'' | '"' => quote = Some(ch),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                '}' if depth > 0 => depth -= 1,
                '}' => break,
                '!' if depth == 0 && chars.get(j + 1) != Some(&'=') => break,
                ':' if depth == 0 => break,
                _ => {}
            }
            j += 1;
        }

        let mut source: String = chars[start..j].iter().collect();
        // `{expr=}` echoes its own source text before the value
        let mut echo = None;
        let trimmed = source.trim_end();
        if trimmed.ends_with('=') && !["==", "!=", "<=", ">="].iter().any(|op| trimmed.ends_with(op)) {
            let expr_len = trimmed.len() - 1;
            echo = Some(source.clone());
            source.truncate(expr_len);
        }
        if source.trim().is_empty() {
            return Err(SyntaxError::new(line, "f-string: empty expression not allowed"));
        }

        let mut conversion = None;
        if j < chars.len() && chars[j] == '!' {
            match chars.get(j + 1) {
                Some(&conv @ ('r' | 's' | 'a')) => conversion = Some(conv),
                _ => return Err(SyntaxError::new(line, "f-string: invalid conversion character")),
            }
            j += 2;
        }

        let mut spec = String::new();
        if j < chars.len() && chars[j] == ':' {
            j += 1;
            let mut nested = 0usize;
            while j < chars.len() {
                let ch = chars[j];
                if ch == '{' {
                    nested += 1;
                } else if ch == '}' {
                    if nested == 0 {
                        break;
                    }
                    nested -= 1;
                }
                spec.push(ch);
                j += 1;
            }
        }

        if j >= chars.len() || chars[j] != '}' {
            return Err(SyntaxError::new(line, "f-string: expecting '}'"));
        }
        i = j + 1;

        let expr = parse_embedded_expression(&source, line)?;
        if let Some(echo) = echo {
            parts.push(FPart::Text(echo));
            if conversion.is_none() && spec.is_empty() {
                conversion = Some('r');
            }
        }
        parts.push(FPart::Field { expr, conversion, spec });
    }

    if !text.is_empty() {
        parts.push(FPart::Text(text));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_stmt(source: &str) -> StmtKind {
        parse(source).unwrap().body.remove(0).kind
    }

    #[test]
    fn test_precedence() {
        match first_stmt("1 + 2 * 3") {
            StmtKind::Expr(Expr::Binary(_, BinOp::Add, right)) => {
                assert!(matches!(*right, Expr::Binary(_, BinOp::Mul, _)));
            }
            other => panic!("unexpected {:?}", other),
        }
        match first_stmt("-2 ** 2") {
            StmtKind::Expr(Expr::Unary(UnaryOp::Neg, inner)) => {
                assert!(matches!(*inner, Expr::Binary(_, BinOp::Pow, _)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tuple_assignment() {
        match first_stmt("a, b = b, a + b") {
            StmtKind::Assign { targets, value } => {
                assert!(matches!(&targets[0], Target::Unpack(items) if items.len() == 2));
                assert!(matches!(value, Expr::Tuple(items) if items.len() == 2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_chained_comparison() {
        match first_stmt("0 < x <= 10 not in y") {
            StmtKind::Expr(Expr::Compare(_, rest)) => {
                let ops: Vec<CmpOp> = rest.iter().map(|(op, _)| *op).collect();
                assert_eq!(ops, vec![CmpOp::Lt, CmpOp::LtE, CmpOp::NotIn]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_compound_statements() {
        let program = parse(
            "def f(n, acc=1):\n    if n <= 1:\n        return acc\n    elif n == 2:\n        pass\n    else:\n        return f(n - 1, acc * n)\nfor i in range(3):\n    print(i)\nelse:\n    print('done')\n",
        )
        .unwrap();
        assert_eq!(program.body.len(), 2);
        assert!(matches!(&program.body[0].kind, StmtKind::FunctionDef(def) if def.params.len() == 2));
        assert!(matches!(&program.body[1].kind, StmtKind::For { orelse, .. } if orelse.len() == 1));
    }

    #[test]
    fn test_comprehensions_and_lambda() {
        assert!(matches!(
            first_stmt("[x * 2 for x in range(5) if x % 2]"),
            StmtKind::Expr(Expr::Comprehension { kind: CompKind::List, .. })
        ));
        assert!(matches!(
            first_stmt("{k: v for k, v in pairs}"),
            StmtKind::Expr(Expr::Comprehension { kind: CompKind::Dict, .. })
        ));
        assert!(matches!(
            first_stmt("sum(c == 'r' for c in word)"),
            StmtKind::Expr(Expr::Call { .. })
        ));
        assert!(matches!(
            first_stmt("sorted(xs, key=lambda p: p[1])"),
            StmtKind::Expr(Expr::Call { kwargs, .. }) if kwargs.len() == 1
        ));
    }

    #[test]
    fn test_fstring_fields() {
        match first_stmt("f'{name!r:>10} has {count:,} items {{ok}}'") {
            StmtKind::Expr(Expr::FString(parts)) => {
                assert_eq!(parts.len(), 4);
                assert!(matches!(&parts[0], FPart::Field { conversion: Some('r'), spec, .. } if spec == ">10"));
                assert!(matches!(&parts[2], FPart::Field { spec, .. } if spec == ","));
                assert!(matches!(&parts[3], FPart::Text(t) if t == " items {ok}"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_star_forms() {
        match first_stmt("first, *rest = xs") {
            StmtKind::Assign { targets, .. } => {
                assert!(matches!(&targets[0], Target::Unpack(items) if matches!(items[1], Target::Starred(_))));
            }
            other => panic!("unexpected {:?}", other),
        }
        match first_stmt("def f(a, *args, key=None, **kwargs):\n    return a\n") {
            StmtKind::FunctionDef(def) => {
                assert_eq!(def.params.len(), 1);
                assert_eq!(def.varargs.as_deref(), Some("args"));
                assert_eq!(def.kwonly.len(), 1);
                assert_eq!(def.varkw.as_deref(), Some("kwargs"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse("def outer():\n    n = 0\n    def inner():\n        nonlocal n\n        n += 1\n").is_ok());
        assert!(parse("*a, *b = xs").is_err());
        assert!(parse("def f(*, **kw):\n    pass").is_err());
        assert!(parse("def f(a, a):\n    pass").is_err());
    }

    #[test]
    fn test_fstring_self_documenting_field() {
        match first_stmt("f'{x + 1=}'") {
            StmtKind::Expr(Expr::FString(parts)) => {
                assert!(matches!(&parts[0], FPart::Text(t) if t == "x + 1="));
                assert!(matches!(&parts[1], FPart::Field { conversion: Some('r'), .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_annotations_are_accepted() {
        assert!(parse("def f(n: int) -> int:\n    return n\nx: int = 3\n").is_ok());
    }

    #[test]
    fn test_slices() {
        match first_stmt("s[::-1]") {
            StmtKind::Expr(Expr::Subscript(_, index)) => {
                assert!(matches!(*index, Expr::Slice(None, None, Some(_))));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rejects_invalid_programs() {
        for source in [
            "",
            "   \n\t",
            "print(",
            "if x\n    y",
            "def f(:\n    pass",
            "class A:\n    pass",
            "with open('f') as f:\n    pass",
            "x = = 2",
            "1 = x",
            "f() = 3",
            "for x in :\n    pass",
            "while True:\nprint(1)",
            "Error: Failed to generate response. Error: connection refused",
            "f'{}'",
            "lambda: yield",
        ] {
            assert!(parse(source).is_err(), "accepted: {:?}", source);
        }
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let deep = format!("x = {}1", "-".repeat(MAX_NESTING + 5));
        assert!(parse(&deep).is_err());
        assert!(parse("x = ((((1))))").is_ok());
    }
}
