//! Tree-walking evaluator
//!
//! Names resolve through the local scope chain, then the program's globals
//! (pre-bound to the catalog modules), then the catalog primitives. Nothing
//! else is reachable: there is no binding for files, processes, the
//! environment or the host's stdout.

use super::ast::*;
use super::bignum::{big_op, int_to_f64, int_value};
use super::error::{Exception, ExceptionKind};
use super::executor::OutputSink;
use super::format::{format_value, percent_format};
use super::value::*;
use super::{builtins, methods, modules};
use crate::catalog::CapabilityCatalog;
use num_bigint::BigInt;
use num_traits::Signed;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::time::Instant;

/// Deepest user-function call chain before `RecursionError`
pub const MAX_CALL_DEPTH: usize = 1000;

/// Largest sequence a single operation may materialize
pub const MAX_SEQUENCE_LEN: usize = 1 << 24;

pub type Eval = Result<Value, Exception>;

pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
    declared_global: RefCell<HashSet<String>>,
    declared_nonlocal: RefCell<HashSet<String>>,
    captured: Cell<bool>,
}

impl Scope {
    pub fn root() -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent: None,
            declared_global: RefCell::new(HashSet::new()),
            declared_nonlocal: RefCell::new(HashSet::new()),
            captured: Cell::new(false),
        })
    }

    pub fn child(parent: &Rc<Scope>) -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
            declared_global: RefCell::new(HashSet::new()),
            declared_nonlocal: RefCell::new(HashSet::new()),
            captured: Cell::new(false),
        })
    }

    pub fn set(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    /// Move every binding onto `out`, leaving the scope empty.
    pub(super) fn drain_into(&mut self, out: &mut Vec<Value>) {
        out.extend(self.vars.get_mut().drain().map(|(_, value)| value));
    }

    fn is_global(&self, name: &str) -> bool {
        self.declared_global.borrow().contains(name)
    }

    fn is_nonlocal(&self, name: &str) -> bool {
        self.declared_nonlocal.borrow().contains(name)
    }

    /// Nearest enclosing function scope that binds `name`; module globals
    /// never qualify.
    fn enclosing(&self, name: &str) -> Option<Rc<Scope>> {
        let mut current = self.parent.clone();
        while let Some(scope) = current {
            if scope.parent.is_none() {
                return None;
            }
            if scope.vars.borrow().contains_key(name) {
                return Some(scope);
            }
            current = scope.parent.clone();
        }
        None
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        // A chain of closures, each capturing a scope that holds the next,
        // is freed through the work list rather than by recursion.
        let mut pending = Vec::new();
        self.drain_into(&mut pending);
        release(pending);
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

type Exec = Result<Flow, Exception>;

/// One program run. Holds all per-call state: scopes, RNG, regex cache and
/// the output sink `print` writes to.
pub struct Interpreter<'a> {
    catalog: &'a CapabilityCatalog,
    out: &'a mut OutputSink,
    globals: Rc<Scope>,
    depth: usize,
    handling: Vec<Exception>,
    captured_scopes: Vec<Weak<Scope>>,
    pub(super) rng: StdRng,
    pub(super) regex_cache: HashMap<(String, i64), Rc<PatternData>>,
    pub(super) started: Instant,
}

impl<'a> Interpreter<'a> {
    pub fn new(catalog: &'a CapabilityCatalog, out: &'a mut OutputSink) -> Self {
        let globals = Scope::root();
        for module in catalog.allowed_modules() {
            globals.set(module, Value::Module(module));
        }
        Self {
            catalog,
            out,
            globals,
            depth: 0,
            handling: Vec::new(),
            captured_scopes: Vec::new(),
            rng: StdRng::from_entropy(),
            regex_cache: HashMap::new(),
            started: Instant::now(),
        }
    }

    pub fn run(&mut self, program: &Program) -> Result<(), Exception> {
        let globals = self.globals.clone();
        match self.exec_block(&program.body, &globals)? {
            Flow::Normal => Ok(()),
            Flow::Return(_) => Err(Exception::new(ExceptionKind::SyntaxError, "'return' outside function")),
            Flow::Break => Err(Exception::new(ExceptionKind::SyntaxError, "'break' outside loop")),
            Flow::Continue => Err(Exception::new(
                ExceptionKind::SyntaxError,
                "'continue' not properly in loop",
            )),
        }
    }

    pub(super) fn write(&mut self, text: &str) {
        self.out.write(text);
    }

    // ----- names -----

    fn lookup(&self, scope: &Rc<Scope>, name: &str) -> Eval {
        let found = if scope.is_global(name) {
            self.globals.get(name)
        } else {
            scope.get(name)
        };
        if let Some(value) = found {
            return Ok(value);
        }
        match self.catalog.primitive(name) {
            Some(name) => Ok(Value::Builtin(name)),
            None => Err(Exception::name(name)),
        }
    }

    /// Scope that owns assignments to `name` when executing in `scope`
    fn binding_scope(&self, scope: &Rc<Scope>, name: &str) -> Rc<Scope> {
        if scope.is_global(name) {
            return self.globals.clone();
        }
        if scope.is_nonlocal(name) {
            if let Some(owner) = scope.enclosing(name) {
                return owner;
            }
        }
        scope.clone()
    }

    fn set_var(&self, scope: &Rc<Scope>, name: &str, value: Value) {
        self.binding_scope(scope, name).set(name, value);
    }

    fn delete_var(&self, scope: &Rc<Scope>, name: &str) -> Result<(), Exception> {
        let target = self.binding_scope(scope, name);
        let removed = target.vars.borrow_mut().remove(name);
        match removed {
            Some(_) => Ok(()),
            None => Err(Exception::name(name)),
        }
    }

    fn make_closure(&mut self, def: &Rc<FunctionDef>, scope: &Rc<Scope>) -> Eval {
        let mut defaults = Vec::new();
        for param in &def.params {
            if let Some(default) = &param.default {
                defaults.push(self.eval(default, scope)?);
            }
        }
        let mut kw_defaults = Vec::with_capacity(def.kwonly.len());
        for param in &def.kwonly {
            kw_defaults.push(match &param.default {
                Some(default) => Some(self.eval(default, scope)?),
                None => None,
            });
        }
        if !scope.captured.replace(true) {
            self.captured_scopes.push(Rc::downgrade(scope));
        }
        Ok(Value::Function(Rc::new(Closure {
            def: def.clone(),
            defaults,
            kw_defaults,
            scope: scope.clone(),
        })))
    }

    // ----- statements -----

    fn exec_block(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> Exec {
        for stmt in body {
            match self.exec_stmt(stmt, scope).map_err(|e| e.at_line(stmt.line))? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Exec {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, scope)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, scope)?;
                for target in targets {
                    self.assign(target, value.clone(), scope)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value, scope)?,
            StmtKind::If { test, body, orelse } => {
                return if self.eval(test, scope)?.truthy() {
                    self.exec_block(body, scope)
                } else {
                    self.exec_block(orelse, scope)
                };
            }
            StmtKind::While { test, body, orelse } => {
                while self.eval(test, scope)?.truthy() {
                    match self.exec_block(body, scope)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse, scope);
            }
            StmtKind::For { target, iter, body, orelse } => {
                let iterable = self.eval(iter, scope)?;
                for item in iterate(&iterable)? {
                    self.assign(target, item, scope)?;
                    match self.exec_block(body, scope)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse, scope);
            }
            StmtKind::FunctionDef(def) => {
                let function = self.make_closure(def, scope)?;
                self.set_var(scope, &def.name, function);
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Global(names) => {
                if !Rc::ptr_eq(scope, &self.globals) {
                    for name in names {
                        if scope.is_nonlocal(name) {
                            return Err(Exception::new(
                                ExceptionKind::SyntaxError,
                                format!("name '{}' is nonlocal and global", name),
                            ));
                        }
                        scope.declared_global.borrow_mut().insert(name.clone());
                    }
                }
            }
            StmtKind::Nonlocal(names) => {
                if Rc::ptr_eq(scope, &self.globals) {
                    return Err(Exception::new(
                        ExceptionKind::SyntaxError,
                        "nonlocal declaration not allowed at module level",
                    ));
                }
                for name in names {
                    if scope.is_global(name) {
                        return Err(Exception::new(
                            ExceptionKind::SyntaxError,
                            format!("name '{}' is nonlocal and global", name),
                        ));
                    }
                    if scope.enclosing(name).is_none() {
                        return Err(Exception::new(
                            ExceptionKind::SyntaxError,
                            format!("no binding for nonlocal '{}' found", name),
                        ));
                    }
                    scope.declared_nonlocal.borrow_mut().insert(name.clone());
                }
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(target, scope)?;
                }
            }
            StmtKind::Assert { test, message } => {
                if !self.eval(test, scope)?.truthy() {
                    let message = match message {
                        Some(expr) => self.eval(expr, scope)?.try_to_str()?,
                        None => String::new(),
                    };
                    return Err(Exception::new(ExceptionKind::AssertionError, message));
                }
            }
            StmtKind::Raise(None) => {
                return Err(self.handling.last().cloned().unwrap_or_else(|| {
                    Exception::new(ExceptionKind::RuntimeError, "No active exception to reraise")
                }));
            }
            StmtKind::Raise(Some(expr)) => {
                self.eval(expr, scope)?;
                return Err(Exception::type_error("exceptions must derive from BaseException"));
            }
            StmtKind::Try { body, handlers, orelse, finalbody } => {
                return self.exec_try(body, handlers, orelse, finalbody, scope);
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let module = self.import(&alias.name)?;
                    let bound = alias.alias.as_deref().unwrap_or(&alias.name);
                    self.set_var(scope, bound, Value::Module(module));
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let module = self.import(module)?;
                for alias in names {
                    let value = modules::attr(module, &alias.name).ok_or_else(|| {
                        Exception::new(
                            ExceptionKind::ImportError,
                            format!("cannot import name '{}' from '{}'", alias.name, module),
                        )
                    })?;
                    let bound = alias.alias.as_deref().unwrap_or(&alias.name);
                    self.set_var(scope, bound, value);
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn import(&self, name: &str) -> Result<&'static str, Exception> {
        self.catalog.module(name).ok_or_else(|| {
            Exception::new(
                ExceptionKind::ImportError,
                format!("import of '{}' is not allowed", name),
            )
        })
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[Handler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
        scope: &Rc<Scope>,
    ) -> Exec {
        let outcome = match self.exec_block(body, scope) {
            Err(exc) if !handlers.is_empty() => self.handle(exc, handlers, scope),
            Ok(Flow::Normal) => self.exec_block(orelse, scope),
            other => other,
        };
        if finalbody.is_empty() {
            return outcome;
        }
        match self.exec_block(finalbody, scope)? {
            Flow::Normal => outcome,
            flow => Ok(flow),
        }
    }

    fn handle(&mut self, exc: Exception, handlers: &[Handler], scope: &Rc<Scope>) -> Exec {
        let handler = &handlers[0];
        if let Some(class) = &handler.class {
            // No exception classes are reachable from the sandbox, so any
            // name that does resolve cannot match.
            self.eval(class, scope)?;
            return Err(Exception::type_error(
                "catching classes that do not inherit from BaseException is not allowed",
            ));
        }
        self.handling.push(exc);
        let result = self.exec_block(&handler.body, scope);
        self.handling.pop();
        result
    }

    fn assign(&mut self, target: &Target, value: Value, scope: &Rc<Scope>) -> Result<(), Exception> {
        match target {
            Target::Name(name) => {
                self.set_var(scope, name, value);
                Ok(())
            }
            Target::Unpack(targets) => {
                let items = collect(&value)?;
                if let Some(star) = targets.iter().position(|t| matches!(t, Target::Starred(_))) {
                    return self.assign_starred(targets, star, items, scope);
                }
                if items.len() > targets.len() {
                    return Err(Exception::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                if items.len() < targets.len() {
                    return Err(Exception::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, scope)?;
                }
                Ok(())
            }
            Target::Starred(_) => Err(Exception::new(
                ExceptionKind::SyntaxError,
                "starred assignment target must be in a list or tuple",
            )),
            Target::Subscript(obj, index) => {
                let obj = self.eval(obj, scope)?;
                let index = self.eval(index, scope)?;
                set_item(&obj, index, value)
            }
        }
    }

    /// `a, *rest, z = items`: the starred target takes whatever the others leave.
    fn assign_starred(
        &mut self,
        targets: &[Target],
        star: usize,
        mut items: Vec<Value>,
        scope: &Rc<Scope>,
    ) -> Result<(), Exception> {
        let required = targets.len() - 1;
        if items.len() < required {
            return Err(Exception::value_error(format!(
                "not enough values to unpack (expected at least {}, got {})",
                required,
                items.len()
            )));
        }
        let suffix = items.split_off(items.len() - (targets.len() - star - 1));
        let middle = items.split_off(star);
        for (target, item) in targets[..star].iter().zip(items) {
            self.assign(target, item, scope)?;
        }
        if let Target::Starred(inner) = &targets[star] {
            self.assign(inner, Value::list(middle), scope)?;
        }
        for (target, item) in targets[star + 1..].iter().zip(suffix) {
            self.assign(target, item, scope)?;
        }
        Ok(())
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr, scope: &Rc<Scope>) -> Result<(), Exception> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(scope, name)?;
                let rhs = self.eval(value, scope)?;
                let updated = inplace_op(op, &current, &rhs)?;
                self.set_var(scope, name, updated);
                Ok(())
            }
            Target::Subscript(obj, index) => {
                let obj = self.eval(obj, scope)?;
                let index = self.eval(index, scope)?;
                let current = get_item(&obj, &index)?;
                let rhs = self.eval(value, scope)?;
                let updated = inplace_op(op, &current, &rhs)?;
                set_item(&obj, index, updated)
            }
            Target::Unpack(_) | Target::Starred(_) => Err(Exception::new(
                ExceptionKind::SyntaxError,
                "illegal expression for augmented assignment",
            )),
        }
    }

    fn delete(&mut self, target: &Target, scope: &Rc<Scope>) -> Result<(), Exception> {
        match target {
            Target::Name(name) => self.delete_var(scope, name),
            Target::Unpack(targets) => {
                for target in targets {
                    self.delete(target, scope)?;
                }
                Ok(())
            }
            Target::Starred(_) => Err(Exception::new(ExceptionKind::SyntaxError, "cannot delete starred")),
            Target::Subscript(obj, index) => {
                let obj = self.eval(obj, scope)?;
                let index = self.eval(index, scope)?;
                del_item(&obj, &index)
            }
        }
    }

    // ----- expressions -----

    fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Eval {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::BigInt(n) => Value::BigInt(n.clone()),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FPart::Text(text) => out.push_str(text),
                        FPart::Field { expr, conversion, spec } => {
                            let value = self.eval(expr, scope)?;
                            let value = match conversion {
                                Some('r') | Some('a') => Value::from(value.try_repr()?),
                                Some('s') => Value::from(value.try_to_str()?),
                                _ => value,
                            };
                            out.push_str(&format_value(&value, spec)?);
                        }
                    }
                }
                Ok(Value::from(out))
            }
            Expr::Name(name) => self.lookup(scope, name),
            Expr::List(items) => Ok(Value::list(self.eval_all(items, scope)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_all(items, scope)?)),
            Expr::Set(items) => {
                let mut set = Dict::new();
                for value in self.eval_all(items, scope)? {
                    set.insert(value, Value::None)?;
                }
                Ok(Value::set(set))
            }
            Expr::Dict(pairs) => {
                let mut dict = Dict::new();
                for (key, value) in pairs {
                    let key = self.eval(key, scope)?;
                    let value = self.eval(value, scope)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand, scope)?;
                unary_op(*op, &value)
            }
            Expr::Binary(left, op, right) => {
                let a = self.eval(left, scope)?;
                let b = self.eval(right, scope)?;
                binary_op(*op, &a, &b)
            }
            Expr::Bool(op, left, right) => {
                let a = self.eval(left, scope)?;
                match (op, a.truthy()) {
                    (BoolOp::And, false) | (BoolOp::Or, true) => Ok(a),
                    _ => self.eval(right, scope),
                }
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval(first, scope)?;
                for (op, expr) in rest {
                    let right = self.eval(expr, scope)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::Call { func, args, kwargs } => {
                let func = self.eval(func, scope)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    match arg {
                        Arg::Positional(expr) => values.push(self.eval(expr, scope)?),
                        Arg::Starred(expr) => {
                            let iterable = self.eval(expr, scope)?;
                            values.extend(iterate(&iterable)?);
                        }
                        Arg::DoubleStarred(_) => {}
                    }
                }
                let mut named = Vec::with_capacity(kwargs.len());
                for (name, expr) in kwargs {
                    named.push((name.clone(), self.eval(expr, scope)?));
                }
                for arg in args {
                    if let Arg::DoubleStarred(expr) = arg {
                        let mapping = self.eval(expr, scope)?;
                        self.expand_mapping(&mapping, &mut named)?;
                    }
                }
                self.call(&func, values, named)
            }
            Expr::Attribute(obj, name) => {
                let obj = self.eval(obj, scope)?;
                get_attr(&obj, name)
            }
            Expr::Subscript(obj, index) => {
                let obj = self.eval(obj, scope)?;
                let index = self.eval(index, scope)?;
                get_item(&obj, &index)
            }
            Expr::Slice(start, stop, step) => {
                let mut bound = |part: &Option<Box<Expr>>| -> Result<Option<i64>, Exception> {
                    match part {
                        None => Ok(None),
                        Some(expr) => match self.eval(expr, scope)? {
                            Value::None => Ok(None),
                            Value::BigInt(n) => Ok(Some(if n.is_negative() { i64::MIN } else { i64::MAX })),
                            value => value.as_int().map(Some).ok_or_else(|| {
                                Exception::type_error(
                                    "slice indices must be integers or None or have an __index__ method",
                                )
                            }),
                        },
                    }
                };
                let slice = SliceValue {
                    start: bound(start)?,
                    stop: bound(stop)?,
                    step: bound(step)?,
                };
                Ok(Value::Slice(Rc::new(slice)))
            }
            Expr::IfElse { test, body, orelse } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(body, scope)
                } else {
                    self.eval(orelse, scope)
                }
            }
            Expr::Lambda(def) => self.make_closure(def, scope),
            Expr::Starred(_) => Err(Exception::new(
                ExceptionKind::SyntaxError,
                "can't use starred expression here",
            )),
            Expr::Comprehension { kind, element, value, clauses } => {
                let inner = Scope::child(scope);
                let mut results = Vec::new();
                self.comprehend(clauses, element, value.as_deref(), &inner, &mut results)?;
                Ok(match kind {
                    CompKind::List => Value::list(results.into_iter().map(|(k, _)| k).collect()),
                    CompKind::Generator => {
                        Value::iter("generator", results.into_iter().map(|(k, _)| k).collect())
                    }
                    CompKind::Set => {
                        let mut set = Dict::new();
                        for (key, _) in results {
                            set.insert(key, Value::None)?;
                        }
                        Value::set(set)
                    }
                    CompKind::Dict => {
                        let mut dict = Dict::new();
                        for (key, value) in results {
                            dict.insert(key, value)?;
                        }
                        Value::dict(dict)
                    }
                })
            }
        }
    }

    /// Evaluate display items, splicing in the contents of `*iterable` entries.
    fn eval_all(&mut self, items: &[Expr], scope: &Rc<Scope>) -> Result<Vec<Value>, Exception> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Expr::Starred(inner) => {
                    let iterable = self.eval(inner, scope)?;
                    for value in iterate(&iterable)? {
                        if values.len() >= MAX_SEQUENCE_LEN {
                            return Err(memory_error());
                        }
                        values.push(value);
                    }
                }
                item => values.push(self.eval(item, scope)?),
            }
        }
        Ok(values)
    }

    fn comprehend(
        &mut self,
        clauses: &[CompClause],
        element: &Expr,
        value: Option<&Expr>,
        scope: &Rc<Scope>,
        out: &mut Vec<(Value, Value)>,
    ) -> Result<(), Exception> {
        let Some((clause, rest)) = clauses.split_first() else {
            if out.len() >= MAX_SEQUENCE_LEN {
                return Err(memory_error());
            }
            let key = self.eval(element, scope)?;
            let value = match value {
                Some(expr) => self.eval(expr, scope)?,
                None => Value::None,
            };
            out.push((key, value));
            return Ok(());
        };
        let iterable = self.eval(&clause.iter, scope)?;
        'items: for item in iterate(&iterable)? {
            self.assign(&clause.target, item, scope)?;
            for condition in &clause.conditions {
                if !self.eval(condition, scope)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehend(rest, element, value, scope, out)?;
        }
        Ok(())
    }

    // ----- calls -----

    pub(super) fn call(&mut self, func: &Value, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Eval {
        match func {
            Value::Function(closure) => self.call_function(closure, args, kwargs),
            Value::Builtin(name) => builtins::call(self, name, args, kwargs),
            Value::ModuleFn(module, name) => modules::call(self, module, name, args, kwargs),
            Value::Method(method) => methods::call(self, &method.receiver, method.name, args, kwargs),
            other => Err(Exception::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    /// Append the entries of a `**mapping` argument to `named`.
    fn expand_mapping(&self, mapping: &Value, named: &mut Vec<(String, Value)>) -> Result<(), Exception> {
        let Value::Dict(dict) = mapping else {
            return Err(Exception::type_error(format!(
                "argument after ** must be a mapping, not {}",
                mapping.type_name()
            )));
        };
        for (key, value) in dict.borrow().entries() {
            let Some(name) = key.as_str() else {
                return Err(Exception::type_error("keywords must be strings"));
            };
            if named.iter().any(|(seen, _)| seen == name) {
                return Err(Exception::type_error(format!(
                    "got multiple values for keyword argument '{}'",
                    name
                )));
            }
            named.push((name.to_string(), value.clone()));
        }
        Ok(())
    }

    fn call_function(&mut self, closure: &Rc<Closure>, mut args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Eval {
        let def = &closure.def;
        let params = &def.params;
        if args.len() > params.len() && def.varargs.is_none() {
            return Err(Exception::type_error(format!(
                "{}() takes {} positional argument{} but {} {} given",
                def.name,
                params.len(),
                if params.len() == 1 { "" } else { "s" },
                args.len(),
                if args.len() == 1 { "was" } else { "were" }
            )));
        }
        let surplus_args = if args.len() > params.len() {
            args.split_off(params.len())
        } else {
            Vec::new()
        };

        let mut bound: Vec<Option<Value>> = vec![None; params.len()];
        for (slot, arg) in bound.iter_mut().zip(args) {
            *slot = Some(arg);
        }
        let mut kw_bound: Vec<Option<Value>> = vec![None; def.kwonly.len()];
        let mut surplus_kwargs = Dict::new();
        for (name, value) in kwargs {
            let slot = match params.iter().position(|p| p.name == name) {
                Some(i) => &mut bound[i],
                None => match def.kwonly.iter().position(|p| p.name == name) {
                    Some(i) => &mut kw_bound[i],
                    None if def.varkw.is_some() => {
                        surplus_kwargs.insert(Value::from(name), value)?;
                        continue;
                    }
                    None => {
                        return Err(Exception::type_error(format!(
                            "{}() got an unexpected keyword argument '{}'",
                            def.name, name
                        )))
                    }
                },
            };
            if slot.is_some() {
                return Err(Exception::type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    def.name, name
                )));
            }
            *slot = Some(value);
        }

        let local = Scope::child(&closure.scope);
        let first_default = params.len() - closure.defaults.len();
        let mut missing = Vec::new();
        for (i, (param, slot)) in params.iter().zip(bound).enumerate() {
            match slot {
                Some(value) => local.set(&param.name, value),
                None if i >= first_default => local.set(&param.name, closure.defaults[i - first_default].clone()),
                None => missing.push(format!("'{}'", param.name)),
            }
        }
        if !missing.is_empty() {
            return Err(missing_arguments(&def.name, "positional", &missing));
        }
        for ((param, slot), default) in def.kwonly.iter().zip(kw_bound).zip(&closure.kw_defaults) {
            match slot.or_else(|| default.clone()) {
                Some(value) => local.set(&param.name, value),
                None => missing.push(format!("'{}'", param.name)),
            }
        }
        if !missing.is_empty() {
            return Err(missing_arguments(&def.name, "keyword-only", &missing));
        }
        if let Some(name) = &def.varargs {
            local.set(name, Value::tuple(surplus_args));
        }
        if let Some(name) = &def.varkw {
            local.set(name, Value::dict(surplus_kwargs));
        }

        if self.depth >= MAX_CALL_DEPTH {
            return Err(Exception::new(
                ExceptionKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        self.depth += 1;
        let result = self.exec_block(&def.body, &local);
        self.depth -= 1;

        match result? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::None),
            Flow::Break => Err(Exception::new(ExceptionKind::SyntaxError, "'break' outside loop")),
            Flow::Continue => Err(Exception::new(
                ExceptionKind::SyntaxError,
                "'continue' not properly in loop",
            )),
        }
    }
}

impl Drop for Interpreter<'_> {
    fn drop(&mut self) {
        // Closures and the scopes they capture reference each other; clearing
        // the captured scopes breaks those cycles.
        for scope in self.captured_scopes.drain(..) {
            if let Some(scope) = scope.upgrade() {
                let vars = std::mem::take(&mut *scope.vars.borrow_mut());
                drop(vars);
            }
        }
        let vars = std::mem::take(&mut *self.globals.vars.borrow_mut());
        drop(vars);
    }
}

fn missing_arguments(function: &str, kind: &str, missing: &[String]) -> Exception {
    let names = match missing.len() {
        1 => missing[0].clone(),
        n => format!("{} and {}", missing[..n - 1].join(", "), missing[n - 1]),
    };
    Exception::type_error(format!(
        "{}() missing {} required {} argument{}: {}",
        function,
        missing.len(),
        kind,
        if missing.len() == 1 { "" } else { "s" },
        names
    ))
}

pub(super) fn memory_error() -> Exception {
    Exception::new(ExceptionKind::MemoryError, "sequence too large")
}

// ----- iteration -----

/// Iterator over any iterable value. Containers are snapshotted; ranges and
/// single-pass iterators are consumed lazily.
pub enum ValueIter {
    Items(std::vec::IntoIter<Value>),
    Range { next: i64, remaining: i64, step: i64 },
    Shared(Rc<RefCell<IterState>>),
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            ValueIter::Items(items) => items.next(),
            ValueIter::Range { next, remaining, step } => {
                if *remaining <= 0 {
                    return None;
                }
                let value = *next;
                *remaining -= 1;
                *next = next.wrapping_add(*step);
                Some(Value::Int(value))
            }
            ValueIter::Shared(state) => state.borrow_mut().items.pop_front(),
        }
    }
}

pub fn iterate(value: &Value) -> Result<ValueIter, Exception> {
    Ok(match value {
        Value::List(items) => ValueIter::Items(items.borrow().clone().into_iter()),
        Value::Tuple(items) | Value::View(_, items) => ValueIter::Items(items.to_vec().into_iter()),
        Value::Str(s) => ValueIter::Items(
            s.chars()
                .map(|c| Value::from(c.to_string()))
                .collect::<Vec<_>>()
                .into_iter(),
        ),
        Value::Dict(d) | Value::Set(d) => ValueIter::Items(d.borrow().keys().into_iter()),
        Value::Range(start, stop, step) => ValueIter::Range {
            next: *start,
            remaining: range_len(*start, *stop, *step),
            step: *step,
        },
        Value::Iter(state) => ValueIter::Shared(state.clone()),
        other => {
            return Err(Exception::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            )))
        }
    })
}

/// Materialize an iterable into a vector.
pub fn collect(value: &Value) -> Result<Vec<Value>, Exception> {
    if let Value::Range(start, stop, step) = value {
        if range_len(*start, *stop, *step) as u64 > MAX_SEQUENCE_LEN as u64 {
            return Err(memory_error());
        }
    }
    Ok(iterate(value)?.collect())
}

// ----- attributes and items -----

pub fn get_attr(obj: &Value, name: &str) -> Eval {
    if name.starts_with('_') {
        return Err(Exception::attribute_error(format!(
            "access to attribute '{}' is not allowed",
            name
        )));
    }
    match obj {
        Value::Module(module) => modules::attr(module, name).ok_or_else(|| {
            Exception::attribute_error(format!("module '{}' has no attribute '{}'", module, name))
        }),
        _ => methods::attr(obj, name).ok_or_else(|| {
            Exception::attribute_error(format!(
                "'{}' object has no attribute '{}'",
                obj.type_name(),
                name
            ))
        }),
    }
}

/// Resolve a slice against a sequence length, yielding `(start, stop, step)`.
pub fn adjust_slice(len: i64, slice: &SliceValue) -> Result<(i64, i64, i64), Exception> {
    let step = slice.step.unwrap_or(1);
    if step == 0 {
        return Err(Exception::value_error("slice step cannot be zero"));
    }
    let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
    let clamp = |bound: Option<i64>, default: i64| match bound {
        None => default,
        Some(i) if i < 0 => (i + len).max(lower),
        Some(i) => i.min(upper),
    };
    let start = clamp(slice.start, if step > 0 { lower } else { upper });
    let stop = clamp(slice.stop, if step > 0 { upper } else { lower });
    Ok((start, stop, step))
}

fn slice_indices(len: usize, slice: &SliceValue) -> Result<Vec<usize>, Exception> {
    let (start, stop, step) = adjust_slice(len as i64, slice)?;
    let mut indices = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        indices.push(i as usize);
        i += step;
    }
    Ok(indices)
}

fn normalize_index(index: i64, len: usize, what: &str) -> Result<usize, Exception> {
    let len = len as i64;
    let i = if index < 0 { index + len } else { index };
    if i < 0 || i >= len {
        return Err(Exception::index_error(format!("{} index out of range", what)));
    }
    Ok(i as usize)
}

fn index_type_error(container: &str, index: &Value) -> Exception {
    if let Value::BigInt(_) = index {
        return Exception::index_error("cannot fit 'int' into an index-sized integer");
    }
    Exception::type_error(format!(
        "{} indices must be integers or slices, not {}",
        container,
        index.type_name()
    ))
}

pub fn get_item(obj: &Value, index: &Value) -> Eval {
    match (obj, index) {
        (Value::List(items), Value::Slice(slice)) => {
            let items = items.borrow();
            let picked = slice_indices(items.len(), slice)?;
            Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        (Value::List(items), i) => {
            let i = i.as_int().ok_or_else(|| index_type_error("list", index))?;
            let items = items.borrow();
            Ok(items[normalize_index(i, items.len(), "list")?].clone())
        }
        (Value::Tuple(items), Value::Slice(slice)) => {
            let picked = slice_indices(items.len(), slice)?;
            Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        (Value::Tuple(items), i) => {
            let i = i.as_int().ok_or_else(|| index_type_error("tuple", index))?;
            Ok(items[normalize_index(i, items.len(), "tuple")?].clone())
        }
        (Value::Str(s), Value::Slice(slice)) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_indices(chars.len(), slice)?;
            Ok(Value::from(picked.into_iter().map(|i| chars[i]).collect::<String>()))
        }
        (Value::Str(s), i) => {
            let i = i.as_int().ok_or_else(|| index_type_error("string", index))?;
            if s.is_ascii() {
                let at = normalize_index(i, s.len(), "string")?;
                return Ok(Value::from(&s[at..at + 1]));
            }
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::from(chars[normalize_index(i, chars.len(), "string")?].to_string()))
        }
        (Value::Range(start, stop, step), Value::Slice(slice)) => {
            let len = range_len(*start, *stop, *step);
            let (s, e, k) = adjust_slice(len, slice)?;
            Ok(Value::Range(start + s * step, start + e * step, step * k))
        }
        (Value::Range(start, stop, step), i) => {
            let i = i.as_int().ok_or_else(|| index_type_error("range", index))?;
            let len = range_len(*start, *stop, *step);
            let i = if i < 0 { i + len } else { i };
            if i < 0 || i >= len {
                return Err(Exception::index_error("range object index out of range"));
            }
            Ok(Value::Int(start + i * step))
        }
        (Value::Dict(d), key) => d
            .borrow()
            .get(key)?
            .ok_or_else(|| Exception::key_error(&key.repr())),
        (Value::Match(m), group) => methods::match_group(m, group),
        _ => Err(Exception::type_error(format!(
            "'{}' object is not subscriptable",
            obj.type_name()
        ))),
    }
}

pub fn set_item(obj: &Value, index: Value, value: Value) -> Result<(), Exception> {
    match (obj, &index) {
        (Value::List(items), Value::Slice(slice)) => {
            let replacement = collect(&value)?;
            let mut items = items.borrow_mut();
            let (start, stop, step) = adjust_slice(items.len() as i64, slice)?;
            if step == 1 {
                let start = start as usize;
                let stop = (stop.max(start as i64)) as usize;
                items.splice(start..stop, replacement);
                return Ok(());
            }
            let picked = slice_indices(items.len(), slice)?;
            if picked.len() != replacement.len() {
                return Err(Exception::value_error(format!(
                    "attempt to assign sequence of size {} to extended slice of size {}",
                    replacement.len(),
                    picked.len()
                )));
            }
            for (i, v) in picked.into_iter().zip(replacement) {
                items[i] = v;
            }
            Ok(())
        }
        (Value::List(items), i) => {
            let i = i.as_int().ok_or_else(|| index_type_error("list", &index))?;
            let mut items = items.borrow_mut();
            let len = items.len();
            let at = normalize_index(i, len, "list assignment")?;
            items[at] = value;
            Ok(())
        }
        (Value::Dict(d), _) => d.borrow_mut().insert(index, value),
        _ => Err(Exception::type_error(format!(
            "'{}' object does not support item assignment",
            obj.type_name()
        ))),
    }
}

fn del_item(obj: &Value, index: &Value) -> Result<(), Exception> {
    match (obj, index) {
        (Value::List(items), Value::Slice(slice)) => {
            let mut items = items.borrow_mut();
            let mut picked = slice_indices(items.len(), slice)?;
            picked.sort_unstable();
            for i in picked.into_iter().rev() {
                items.remove(i);
            }
            Ok(())
        }
        (Value::List(items), i) => {
            let i = i.as_int().ok_or_else(|| index_type_error("list", index))?;
            let mut items = items.borrow_mut();
            let len = items.len();
            let at = normalize_index(i, len, "list assignment")?;
            items.remove(at);
            Ok(())
        }
        (Value::Dict(d), key) => match d.borrow_mut().remove(key)? {
            Some(_) => Ok(()),
            None => Err(Exception::key_error(&key.repr())),
        },
        _ => Err(Exception::type_error(format!(
            "'{}' object does not support item deletion",
            obj.type_name()
        ))),
    }
}

// ----- operators -----

fn unsupported(op: &str, a: &Value, b: &Value) -> Exception {
    Exception::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        a.type_name(),
        b.type_name()
    ))
}

pub fn unary_op(op: UnaryOp, value: &Value) -> Eval {
    let bad = |symbol: &str| {
        Exception::type_error(format!(
            "bad operand type for unary {}: '{}'",
            symbol,
            value.type_name()
        ))
    };
    match op {
        UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
        UnaryOp::Neg => match value {
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::BigInt(n) => Ok(int_value(-&**n)),
            v => match v.as_int() {
                Some(i) => Ok(i.checked_neg().map_or_else(|| int_value(-BigInt::from(i)), Value::Int)),
                None => Err(bad("-")),
            },
        },
        UnaryOp::Pos => match value {
            Value::Float(f) => Ok(Value::Float(*f)),
            Value::BigInt(_) => Ok(value.clone()),
            v => v.as_int().map(Value::Int).ok_or_else(|| bad("+")),
        },
        UnaryOp::Invert => match value {
            Value::BigInt(n) => Ok(int_value(-&**n - 1)),
            v => v.as_int().map(|i| Value::Int(!i)).ok_or_else(|| bad("~")),
        },
    }
}

pub fn binary_op(op: BinOp, a: &Value, b: &Value) -> Eval {
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        if let (Value::Bool(p), Value::Bool(q)) = (a, b) {
            match op {
                BinOp::BitAnd => return Ok(Value::Bool(p & q)),
                BinOp::BitOr => return Ok(Value::Bool(p | q)),
                BinOp::BitXor => return Ok(Value::Bool(p ^ q)),
                _ => {}
            }
        }
        return int_op(op, x, y).map_err(|e| match e {
            Some(e) => e,
            None => unsupported(op.symbol(), a, b),
        });
    }
    if let (Some(x), Some(y)) = (a.as_bigint(), b.as_bigint()) {
        return big_op(op, &x, &y).map_err(|e| match e {
            Some(e) => e,
            None => unsupported(op.symbol(), a, b),
        });
    }
    if a.is_number() && b.is_number() {
        let (x, y) = (number_to_f64(a)?, number_to_f64(b)?);
        return float_op(op, x, y).map_err(|e| match e {
            Some(e) => e,
            None => unsupported(op.symbol(), a, b),
        });
    }

    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => {
            if x.len() + y.len() > MAX_SEQUENCE_LEN {
                return Err(memory_error());
            }
            let mut s = String::with_capacity(x.len() + y.len());
            s.push_str(x);
            s.push_str(y);
            Ok(Value::from(s))
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.is_integer() => {
            let count = repeat_count(n, s.len())?;
            Ok(Value::from(s.repeat(count)))
        }
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items)) if n.is_integer() => {
            let items = items.borrow();
            let count = repeat_count(n, items.len())?;
            Ok(Value::list(repeat_items(&items, count)))
        }
        (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
            let mut items = x.to_vec();
            items.extend(y.iter().cloned());
            Ok(Value::tuple(items))
        }
        (BinOp::Mul, Value::Tuple(items), n) | (BinOp::Mul, n, Value::Tuple(items)) if n.is_integer() => {
            let count = repeat_count(n, items.len())?;
            Ok(Value::tuple(repeat_items(items, count)))
        }
        (BinOp::Mod, Value::Str(template), values) => Ok(Value::from(percent_format(template, values)?)),
        (BinOp::BitOr, Value::Dict(x), Value::Dict(y)) => {
            let mut merged = x.borrow().clone();
            for (k, v) in y.borrow().entries() {
                merged.insert(k.clone(), v.clone())?;
            }
            Ok(Value::dict(merged))
        }
        (BinOp::BitOr | BinOp::BitAnd | BinOp::Sub | BinOp::BitXor, Value::Set(x), Value::Set(y)) => {
            Ok(Value::set(set_op(op, &x.borrow(), &y.borrow())?))
        }
        (BinOp::Add, Value::Str(_), other) => Err(Exception::type_error(format!(
            "can only concatenate str (not \"{}\") to str",
            other.type_name()
        ))),
        (BinOp::Add, Value::List(_), other) => Err(Exception::type_error(format!(
            "can only concatenate list (not \"{}\") to list",
            other.type_name()
        ))),
        _ => Err(unsupported(op.symbol(), a, b)),
    }
}

fn number_to_f64(value: &Value) -> Result<f64, Exception> {
    match value {
        Value::BigInt(n) => int_to_f64(n),
        v => Ok(v.as_f64().unwrap_or(f64::NAN)),
    }
}

fn repeat_count(n: &Value, unit: usize) -> Result<usize, Exception> {
    let n = match n {
        Value::BigInt(big) if big.is_negative() => 0,
        Value::BigInt(_) => {
            return Err(Exception::new(
                ExceptionKind::OverflowError,
                "cannot fit 'int' into an index-sized integer",
            ))
        }
        n => n.as_int().unwrap_or(0).max(0) as u64,
    };
    if (unit as u64).saturating_mul(n) > MAX_SEQUENCE_LEN as u64 {
        return Err(memory_error());
    }
    Ok(n as usize)
}

fn repeat_items(items: &[Value], count: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    out
}

pub(super) fn set_op(op: BinOp, x: &Dict, y: &Dict) -> Result<Dict, Exception> {
    let mut out = Dict::new();
    match op {
        BinOp::BitOr => {
            for (k, _) in x.entries().iter().chain(y.entries()) {
                out.insert(k.clone(), Value::None)?;
            }
        }
        BinOp::BitAnd => {
            for (k, _) in x.entries() {
                if y.contains(k)? {
                    out.insert(k.clone(), Value::None)?;
                }
            }
        }
        BinOp::Sub => {
            for (k, _) in x.entries() {
                if !y.contains(k)? {
                    out.insert(k.clone(), Value::None)?;
                }
            }
        }
        _ => {
            for (k, _) in x.entries() {
                if !y.contains(k)? {
                    out.insert(k.clone(), Value::None)?;
                }
            }
            for (k, _) in y.entries() {
                if !x.contains(k)? {
                    out.insert(k.clone(), Value::None)?;
                }
            }
        }
    }
    Ok(out)
}

/// Integer arithmetic on the `i64` fast path. Results that leave the range
/// are recomputed with [`big_op`]. `Err(None)` means the operator does not apply.
fn int_op(op: BinOp, x: i64, y: i64) -> Result<Value, Option<Exception>> {
    let wide = || big_op(op, &BigInt::from(x), &BigInt::from(y));
    let zero_div = || Some(Exception::zero_division("integer division or modulo by zero"));
    let checked = |result: Option<i64>| match result {
        Some(v) => Ok(Value::Int(v)),
        None => wide(),
    };
    match op {
        BinOp::Add => checked(x.checked_add(y)),
        BinOp::Sub => checked(x.checked_sub(y)),
        BinOp::Mul => checked(x.checked_mul(y)),
        BinOp::Div => {
            if y == 0 {
                return Err(Some(Exception::zero_division("division by zero")));
            }
            wide()
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(zero_div());
            }
            let Some(q) = x.checked_div(y) else { return wide() };
            if x % y != 0 && ((x < 0) != (y < 0)) {
                Ok(Value::Int(q - 1))
            } else {
                Ok(Value::Int(q))
            }
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(zero_div());
            }
            let r = x.checked_rem(y).unwrap_or(0);
            if r != 0 && ((r < 0) != (y < 0)) {
                Ok(Value::Int(r + y))
            } else {
                Ok(Value::Int(r))
            }
        }
        BinOp::Pow if y < 0 => wide(),
        BinOp::Pow => checked(u32::try_from(y).ok().and_then(|exp| x.checked_pow(exp))),
        BinOp::LShift => {
            if y < 0 {
                return Err(Some(Exception::value_error("negative shift count")));
            }
            if x == 0 {
                return Ok(Value::Int(0));
            }
            if y >= 64 {
                return wide();
            }
            checked(i64::try_from((x as i128) << y).ok())
        }
        BinOp::RShift => {
            if y < 0 {
                return Err(Some(Exception::value_error("negative shift count")));
            }
            Ok(Value::Int(if y >= 64 { if x < 0 { -1 } else { 0 } } else { x >> y }))
        }
        BinOp::BitAnd => Ok(Value::Int(x & y)),
        BinOp::BitOr => Ok(Value::Int(x | y)),
        BinOp::BitXor => Ok(Value::Int(x ^ y)),
        BinOp::MatMul => Err(None),
    }
}

fn float_op(op: BinOp, x: f64, y: f64) -> Result<Value, Option<Exception>> {
    Ok(Value::Float(match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(Some(Exception::zero_division("float division by zero")));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(Some(Exception::zero_division("float floor division by zero")));
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(Some(Exception::zero_division("float modulo")));
            }
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                r + y
            } else {
                r
            }
        }
        BinOp::Pow => float_pow(x, y).map_err(Some)?,
        _ => return Err(None),
    }))
}

pub(super) fn float_pow(x: f64, y: f64) -> Result<f64, Exception> {
    if x == 0.0 && y < 0.0 {
        return Err(Exception::zero_division(
            "0.0 cannot be raised to a negative power",
        ));
    }
    if x < 0.0 && y.is_finite() && y.fract() != 0.0 {
        return Err(Exception::value_error(
            "negative number cannot be raised to a fractional power",
        ));
    }
    let result = x.powf(y);
    if result.is_infinite() && x.is_finite() && y.is_finite() {
        return Err(Exception::new(
            ExceptionKind::OverflowError,
            "(34, 'Numerical result out of range')",
        ));
    }
    Ok(result)
}

/// Augmented assignment: lists, sets and dicts update in place.
fn inplace_op(op: BinOp, current: &Value, rhs: &Value) -> Eval {
    match (op, current) {
        (BinOp::Add, Value::List(items)) => {
            let extra = collect(rhs)?;
            items.borrow_mut().extend(extra);
            Ok(current.clone())
        }
        (BinOp::BitOr | BinOp::BitAnd | BinOp::Sub | BinOp::BitXor, Value::Set(set)) => {
            let Value::Set(other) = rhs else {
                return Err(unsupported(&format!("{}=", op.symbol()), current, rhs));
            };
            let updated = set_op(op, &set.borrow(), &other.borrow())?;
            *set.borrow_mut() = updated;
            Ok(current.clone())
        }
        (BinOp::BitOr, Value::Dict(dict)) => {
            let Value::Dict(other) = rhs else {
                return Err(unsupported("|=", current, rhs));
            };
            let entries = other.borrow().entries().to_vec();
            let mut dict = dict.borrow_mut();
            for (k, v) in entries {
                dict.insert(k, v)?;
            }
            Ok(current.clone())
        }
        _ => binary_op(op, current, rhs),
    }
}

pub fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<bool, Exception> {
    use std::cmp::Ordering::*;
    let ordered = |symbol: &str, accept: &[std::cmp::Ordering]| -> Result<bool, Exception> {
        if let (Value::Set(x), Value::Set(y)) = (a, b) {
            let (x, y) = (x.borrow(), y.borrow());
            let subset = |s: &Dict, t: &Dict| s.entries().iter().all(|(k, _)| t.contains(k).unwrap_or(false));
            return Ok(match symbol {
                "<" => x.len() < y.len() && subset(&x, &y),
                "<=" => subset(&x, &y),
                ">" => x.len() > y.len() && subset(&y, &x),
                _ => subset(&y, &x),
            });
        }
        Ok(match py_partial_cmp(a, b, symbol)? {
            Some(ordering) => accept.contains(&ordering),
            None => false,
        })
    };
    match op {
        CmpOp::Eq => py_eq(a, b),
        CmpOp::NotEq => py_eq(a, b).map(|eq| !eq),
        CmpOp::Lt => ordered("<", &[Less]),
        CmpOp::LtE => ordered("<=", &[Less, Equal]),
        CmpOp::Gt => ordered(">", &[Greater]),
        CmpOp::GtE => ordered(">=", &[Greater, Equal]),
        CmpOp::In => contains(b, a),
        CmpOp::NotIn => contains(b, a).map(|found| !found),
        CmpOp::Is => Ok(is_same(a, b)),
        CmpOp::IsNot => Ok(!is_same(a, b)),
    }
}

/// `item in container`
pub fn contains(container: &Value, item: &Value) -> Result<bool, Exception> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_ref())),
            other => Err(Exception::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => {
            for v in items.borrow().iter() {
                if py_eq(v, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Tuple(items) | Value::View(_, items) => {
            for v in items.iter() {
                if py_eq(v, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Dict(d) | Value::Set(d) => d.borrow().contains(item),
        Value::Range(start, stop, step) => {
            let n = match item {
                Value::Float(f) if f.fract() == 0.0 && f.is_finite() => *f as i64,
                other => match other.as_int() {
                    Some(n) => n,
                    None => return Ok(false),
                },
            };
            let len = range_len(*start, *stop, *step);
            if len == 0 {
                return Ok(false);
            }
            let offset = n as i128 - *start as i128;
            let step = *step as i128;
            Ok(offset % step == 0 && offset / step >= 0 && offset / step < len as i128)
        }
        Value::Iter(state) => {
            let mut state = state.borrow_mut();
            while let Some(value) = state.items.pop_front() {
                if py_eq(&value, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(Exception::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_division_semantics() {
        assert_eq!(binary_op(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap().repr(), "-4");
        assert_eq!(binary_op(BinOp::Mod, &Value::Int(-7), &Value::Int(2)).unwrap().repr(), "1");
        assert_eq!(binary_op(BinOp::Mod, &Value::Int(7), &Value::Int(-2)).unwrap().repr(), "-1");
        assert_eq!(binary_op(BinOp::Div, &Value::Int(7), &Value::Int(2)).unwrap().repr(), "3.5");
        assert_eq!(binary_op(BinOp::Mod, &Value::Float(-1.0), &Value::Float(3.0)).unwrap().repr(), "2.0");
        assert_eq!(binary_op(BinOp::Pow, &Value::Int(2), &Value::Int(-1)).unwrap().repr(), "0.5");
    }

    #[test]
    fn test_integers_widen_past_64_bits() {
        let doubled = binary_op(BinOp::Mul, &Value::Int(i64::MAX), &Value::Int(2)).unwrap();
        assert_eq!(doubled.repr(), "18446744073709551614");
        let pow = binary_op(BinOp::Pow, &Value::Int(2), &Value::Int(100)).unwrap();
        assert_eq!(pow.repr(), "1267650600228229401496703205376");
        let back = binary_op(BinOp::FloorDiv, &pow, &pow).unwrap();
        assert!(matches!(back, Value::Int(1)));
        assert_eq!(unary_op(UnaryOp::Neg, &Value::Int(i64::MIN)).unwrap().repr(), "9223372036854775808");
        assert_eq!(unary_op(UnaryOp::Invert, &pow).unwrap().repr(), "-1267650600228229401496703205377");
        let shifted = binary_op(BinOp::LShift, &Value::Int(1), &Value::Int(70)).unwrap();
        assert_eq!(shifted.repr(), "1180591620717411303424");
        assert!(compare(CmpOp::Gt, &shifted, &Value::Float(1e21)).unwrap());
        assert_eq!(binary_op(BinOp::Add, &shifted, &Value::Float(0.5)).unwrap().repr(), "1.1805916207174113e+21");

        let huge = binary_op(BinOp::Pow, &Value::Int(10), &Value::Int(400)).unwrap();
        let err = binary_op(BinOp::Mul, &huge, &Value::Float(1.5)).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::OverflowError);
        let err = binary_op(BinOp::Mul, &Value::from("a"), &pow).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::OverflowError);
        let err = binary_op(BinOp::Pow, &Value::Int(3), &Value::Int(10_000_000)).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::MemoryError);
    }

    #[test]
    fn test_zero_division() {
        let err = binary_op(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::ZeroDivisionError);
        let err = binary_op(BinOp::Add, &Value::from("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(err.message, "can only concatenate str (not \"int\") to str");
    }

    #[test]
    fn test_slices() {
        let list = Value::list((0..6).map(Value::Int).collect());
        let slice = |start, stop, step| Value::Slice(Rc::new(SliceValue { start, stop, step }));
        assert_eq!(get_item(&list, &slice(None, None, Some(-1))).unwrap().repr(), "[5, 4, 3, 2, 1, 0]");
        assert_eq!(get_item(&list, &slice(Some(1), Some(-1), Some(2))).unwrap().repr(), "[1, 3]");
        assert_eq!(get_item(&Value::from("hello"), &slice(Some(-3), None, None)).unwrap().repr(), "'llo'");
        assert_eq!(get_item(&Value::Range(0, 10, 1), &slice(None, None, Some(3))).unwrap().repr(), "range(0, 10, 3)");
        assert!(get_item(&list, &Value::Int(6)).is_err());
        assert_eq!(get_item(&list, &Value::Int(-1)).unwrap().repr(), "5");
    }

    #[test]
    fn test_membership() {
        assert!(contains(&Value::Range(0, 10, 2), &Value::Int(4)).unwrap());
        assert!(!contains(&Value::Range(0, 10, 2), &Value::Int(5)).unwrap());
        assert!(contains(&Value::from("hello"), &Value::from("ell")).unwrap());
        assert!(contains(&Value::from("hello"), &Value::Int(1)).is_err());
        assert!(contains(&Value::Int(3), &Value::Int(1)).is_err());
    }

    #[test]
    fn test_chained_set_comparison() {
        let a = Value::set({
            let mut d = Dict::new();
            d.insert(Value::Int(1), Value::None).unwrap();
            d
        });
        let b = Value::set({
            let mut d = Dict::new();
            d.insert(Value::Int(1), Value::None).unwrap();
            d.insert(Value::Int(2), Value::None).unwrap();
            d
        });
        assert!(compare(CmpOp::Lt, &a, &b).unwrap());
        assert!(!compare(CmpOp::Gt, &a, &b).unwrap());
    }
}
