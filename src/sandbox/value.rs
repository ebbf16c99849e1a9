//! Runtime values of the sandbox language

use super::ast::FunctionDef;
use super::error::{Exception, ExceptionKind};
use super::format::float_repr;
use super::interp::Scope;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

/// Deepest container nesting that repr, comparison and hashing will walk
pub const MAX_VALUE_DEPTH: usize = 1000;

fn too_deep(context: &str) -> Exception {
    Exception::new(
        ExceptionKind::RecursionError,
        format!("maximum recursion depth exceeded {}", context),
    )
}

/// A user-defined function together with the scope it closes over
pub struct Closure {
    pub def: Rc<FunctionDef>,
    /// Evaluated defaults for the trailing parameters that declare one
    pub defaults: Vec<Value>,
    /// One entry per keyword-only parameter
    pub kw_defaults: Vec<Option<Value>>,
    pub scope: Rc<Scope>,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.def.name)
    }
}

/// Single-pass iterator produced by `map`, `filter`, `zip`, `enumerate`,
/// generator expressions and `finditer`
#[derive(Debug)]
pub struct IterState {
    pub kind: &'static str,
    pub items: VecDeque<Value>,
}

impl Drop for IterState {
    fn drop(&mut self) {
        release(self.items.drain(..).collect());
    }
}

/// Element storage behind `Value::List`
#[derive(Debug, Default)]
pub struct ListCell(RefCell<Vec<Value>>);

impl ListCell {
    pub fn new(items: Vec<Value>) -> Self {
        Self(RefCell::new(items))
    }
}

impl Deref for ListCell {
    type Target = RefCell<Vec<Value>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for ListCell {
    fn drop(&mut self) {
        release(std::mem::take(self.0.get_mut()));
    }
}

/// Element storage behind `Value::Tuple`
#[derive(Debug, Default)]
pub struct TupleItems(Vec<Value>);

impl Deref for TupleItems {
    type Target = Vec<Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for TupleItems {
    fn drop(&mut self) {
        release(std::mem::take(&mut self.0));
    }
}

/// Drop values without recursing through nested containers. Containers whose
/// last owner is on the work list are emptied onto it before they drop, so a
/// million-deep `[[[...]]]` unwinds in constant stack.
pub(super) fn release(mut pending: Vec<Value>) {
    while let Some(mut value) = pending.pop() {
        match &mut value {
            Value::List(cell) => {
                if let Some(cell) = Rc::get_mut(cell) {
                    pending.append(cell.0.get_mut());
                }
            }
            Value::Tuple(items) | Value::View(_, items) => {
                if let Some(items) = Rc::get_mut(items) {
                    pending.append(&mut items.0);
                }
            }
            Value::Dict(d) | Value::Set(d) => {
                if let Some(d) = Rc::get_mut(d) {
                    d.get_mut().drain_into(&mut pending);
                }
            }
            Value::Iter(state) => {
                if let Some(state) = Rc::get_mut(state) {
                    pending.extend(state.get_mut().items.drain(..));
                }
            }
            Value::Method(method) => {
                if let Some(method) = Rc::get_mut(method) {
                    pending.push(std::mem::replace(&mut method.receiver, Value::None));
                }
            }
            Value::Function(closure) => {
                if let Some(closure) = Rc::get_mut(closure) {
                    pending.append(&mut closure.defaults);
                    pending.extend(closure.kw_defaults.drain(..).flatten());
                    if let Some(scope) = Rc::get_mut(&mut closure.scope) {
                        scope.drain_into(&mut pending);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Compiled pattern from the `re` module
#[derive(Debug)]
pub struct PatternData {
    pub source: Rc<str>,
    pub flags: i64,
    pub regex: regex::Regex,
}

/// Result of a successful regex match. Spans are byte offsets into `text`.
#[derive(Debug)]
pub struct MatchData {
    pub text: Rc<str>,
    pub groups: Vec<Option<(usize, usize)>>,
    pub pattern: Rc<PatternData>,
}

impl MatchData {
    pub fn group_str(&self, index: usize) -> Option<&str> {
        self.groups
            .get(index)
            .copied()
            .flatten()
            .map(|(start, end)| &self.text[start..end])
    }

    /// Convert a byte offset to the character offset a program sees.
    pub fn char_offset(&self, byte: usize) -> usize {
        self.text[..byte].chars().count()
    }
}

#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub name: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceValue {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    /// Integer outside the `i64` range. Never holds a value that fits `Int`.
    BigInt(Rc<BigInt>),
    Float(f64),
    Str(Rc<str>),
    List(Rc<ListCell>),
    Tuple(Rc<TupleItems>),
    Dict(Rc<RefCell<Dict>>),
    /// Sets reuse the dict table with `None` values
    Set(Rc<RefCell<Dict>>),
    Range(i64, i64, i64),
    Slice(Rc<SliceValue>),
    Iter(Rc<RefCell<IterState>>),
    /// Snapshot returned by `dict.keys()`, `values()` or `items()`
    View(&'static str, Rc<TupleItems>),
    Function(Rc<Closure>),
    Builtin(&'static str),
    Module(&'static str),
    ModuleFn(&'static str, &'static str),
    Method(Rc<BoundMethod>),
    Match(Rc<MatchData>),
    Pattern(Rc<PatternData>),
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s.as_str()))
    }
}

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(ListCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(TupleItems(items)))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn set(dict: Dict) -> Self {
        Value::Set(Rc::new(RefCell::new(dict)))
    }

    pub fn iter(kind: &'static str, items: Vec<Value>) -> Self {
        Value::Iter(Rc::new(RefCell::new(IterState {
            kind,
            items: items.into(),
        })))
    }

    pub fn view(kind: &'static str, items: Vec<Value>) -> Self {
        Value::View(kind, Rc::new(TupleItems(items)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::View(kind, _) => *kind,
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::BigInt(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Range(..) => "range",
            Value::Slice(_) => "slice",
            Value::Iter(state) => state.borrow().kind,
            Value::Function(_) => "function",
            Value::Builtin(_) | Value::ModuleFn(..) | Value::Method(_) => "builtin_function_or_method",
            Value::Module(_) => "module",
            Value::Match(_) => "re.Match",
            Value::Pattern(_) => "re.Pattern",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) | Value::View(_, items) => !items.is_empty(),
            Value::Dict(d) | Value::Set(d) => !d.borrow().is_empty(),
            Value::Range(start, stop, step) => range_len(*start, *stop, *step) > 0,
            _ => true,
        }
    }

    /// Integer view of `bool` and `int` values that fit in 64 bits
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integer view of `bool` and `int` of any size
    pub fn as_bigint(&self) -> Option<BigInt> {
        match self {
            Value::Bool(b) => Some(BigInt::from(*b as i64)),
            Value::Int(i) => Some(BigInt::from(*i)),
            Value::BigInt(n) => Some((**n).clone()),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::BigInt(_))
    }

    /// Float view of any number. Integers beyond the float range become infinite.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::BigInt(n) => Some(n.to_f64().unwrap_or(f64::INFINITY)),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::BigInt(_) | Value::Float(_))
    }

    pub fn hash_key(&self) -> Result<HashKey, Exception> {
        self.hash_at(0)
    }

    fn hash_at(&self, depth: usize) -> Result<HashKey, Exception> {
        Ok(match self {
            Value::None => HashKey::None,
            Value::Bool(b) => HashKey::Int(*b as i64),
            Value::Int(i) => HashKey::Int(*i),
            Value::BigInt(n) => HashKey::BigInt(n.clone()),
            Value::Float(f) if f.is_finite() && f.fract() == 0.0 => {
                if f.abs() < 9.2e18 {
                    HashKey::Int(*f as i64)
                } else {
                    match BigInt::from_f64(*f) {
                        Some(n) => match n.to_i64() {
                            Some(i) => HashKey::Int(i),
                            None => HashKey::BigInt(Rc::new(n)),
                        },
                        None => HashKey::Float(f.to_bits()),
                    }
                }
            }
            Value::Float(f) => HashKey::Float(f.to_bits()),
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Tuple(items) => {
                if depth >= MAX_VALUE_DEPTH {
                    return Err(too_deep("while hashing"));
                }
                HashKey::Tuple(
                    items
                        .iter()
                        .map(|item| item.hash_at(depth + 1))
                        .collect::<Result<Vec<_>, _>>()?,
                )
            }
            Value::Range(a, b, c) => HashKey::Range(*a, *b, *c),
            Value::Builtin(name) | Value::Module(name) => HashKey::Name(*name),
            Value::ModuleFn(module, name) => HashKey::Tuple(vec![HashKey::Name(*module), HashKey::Name(*name)]),
            Value::Function(f) => HashKey::Ptr(Rc::as_ptr(f) as *const () as usize),
            Value::Iter(i) => HashKey::Ptr(Rc::as_ptr(i) as *const () as usize),
            Value::Pattern(p) => HashKey::Ptr(Rc::as_ptr(p) as *const () as usize),
            Value::Match(m) => HashKey::Ptr(Rc::as_ptr(m) as *const () as usize),
            Value::Method(m) => HashKey::Ptr(Rc::as_ptr(m) as *const () as usize),
            Value::List(_) | Value::Dict(_) | Value::Set(_) | Value::Slice(_) | Value::View(..) => {
                return Err(Exception::type_error(format!(
                    "unhashable type: '{}'",
                    self.type_name()
                )))
            }
        })
    }

    /// `repr()` of the value, for messages. Nesting past [`MAX_VALUE_DEPTH`]
    /// is cut short with `...`.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        if self.write_repr(&mut out, &mut Vec::new(), 0).is_err() {
            out.push_str("...");
        }
        out
    }

    /// `repr()` as a program sees it: too-deep nesting raises `RecursionError`.
    pub fn try_repr(&self) -> Result<String, Exception> {
        let mut out = String::new();
        self.write_repr(&mut out, &mut Vec::new(), 0)?;
        Ok(out)
    }

    /// `str()` of the value
    pub fn try_to_str(&self) -> Result<String, Exception> {
        match self {
            Value::Str(s) => Ok(s.to_string()),
            _ => self.try_repr(),
        }
    }

    fn write_repr(&self, out: &mut String, seen: &mut Vec<usize>, depth: usize) -> Result<(), Exception> {
        let nested = matches!(
            self,
            Value::List(_) | Value::Tuple(_) | Value::Dict(_) | Value::Set(_) | Value::View(..)
        );
        if depth >= MAX_VALUE_DEPTH && nested {
            return Err(too_deep("while getting the repr of an object"));
        }
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::BigInt(n) => out.push_str(&n.to_string()),
            Value::Float(f) => out.push_str(&float_repr(*f)),
            Value::Str(s) => out.push_str(&repr_str(s)),
            Value::List(items) => {
                let id = Rc::as_ptr(items) as *const () as usize;
                if seen.contains(&id) {
                    out.push_str("[...]");
                    return Ok(());
                }
                seen.push(id);
                out.push('[');
                write_items(out, items.borrow().iter(), seen, depth)?;
                out.push(']');
                seen.pop();
            }
            Value::Tuple(items) => {
                out.push('(');
                write_items(out, items.iter(), seen, depth)?;
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Value::Dict(d) => {
                let id = Rc::as_ptr(d) as *const () as usize;
                if seen.contains(&id) {
                    out.push_str("{...}");
                    return Ok(());
                }
                seen.push(id);
                out.push('{');
                for (i, (k, v)) in d.borrow().entries().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out, seen, depth + 1)?;
                    out.push_str(": ");
                    v.write_repr(out, seen, depth + 1)?;
                }
                out.push('}');
                seen.pop();
            }
            Value::Set(d) => {
                let d = d.borrow();
                if d.is_empty() {
                    out.push_str("set()");
                    return Ok(());
                }
                out.push('{');
                write_items(out, d.entries().iter().map(|(k, _)| k), seen, depth)?;
                out.push('}');
            }
            Value::Range(start, stop, step) => {
                if *step == 1 {
                    out.push_str(&format!("range({}, {})", start, stop));
                } else {
                    out.push_str(&format!("range({}, {}, {})", start, stop, step));
                }
            }
            Value::Slice(s) => {
                let part = |v: Option<i64>| v.map(|i| i.to_string()).unwrap_or_else(|| "None".into());
                out.push_str(&format!("slice({}, {}, {})", part(s.start), part(s.stop), part(s.step)));
            }
            Value::Iter(state) => {
                let id = Rc::as_ptr(state) as *const () as usize;
                out.push_str(&format!("<{} object at {:#x}>", state.borrow().kind, id));
            }
            Value::View(kind, items) => {
                out.push_str(kind);
                out.push_str("([");
                write_items(out, items.iter(), seen, depth)?;
                out.push_str("])");
            }
            Value::Function(f) => {
                let id = Rc::as_ptr(f) as *const () as usize;
                out.push_str(&format!("<function {} at {:#x}>", f.def.name, id));
            }
            Value::Builtin(name) => out.push_str(&format!("<built-in function {}>", name)),
            Value::ModuleFn(_, name) => out.push_str(&format!("<built-in function {}>", name)),
            Value::Method(m) => out.push_str(&format!(
                "<built-in method {} of {} object>",
                m.name,
                m.receiver.type_name()
            )),
            Value::Module(name) => out.push_str(&format!("<module '{}' (built-in)>", name)),
            Value::Match(m) => {
                let (start, end) = m.groups[0].unwrap_or((0, 0));
                out.push_str(&format!(
                    "<re.Match object; span=({}, {}), match={}>",
                    m.char_offset(start),
                    m.char_offset(end),
                    repr_str(&m.text[start..end])
                ));
            }
            Value::Pattern(p) => out.push_str(&format!("re.compile({})", repr_str(&p.source))),
        }
        Ok(())
    }
}

fn write_items<'a>(
    out: &mut String,
    items: impl Iterator<Item = &'a Value>,
    seen: &mut Vec<usize>,
    depth: usize,
) -> Result<(), Exception> {
    for (i, item) in items.enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, seen, depth + 1)?;
    }
    Ok(())
}

/// Quote a string the way `repr` does.
pub fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Number of elements in `range(start, stop, step)`
pub fn range_len(start: i64, stop: i64, step: i64) -> i64 {
    let (start, stop, step) = (start as i128, stop as i128, step as i128);
    let len = if step > 0 && start < stop {
        (stop - start - 1) / step + 1
    } else if step < 0 && start > stop {
        (start - stop - 1) / (-step) + 1
    } else {
        0
    };
    len.min(i64::MAX as i128) as i64
}

/// Python `==`
pub fn py_eq(a: &Value, b: &Value) -> Result<bool, Exception> {
    eq_at(a, b, 0)
}

fn eq_at(a: &Value, b: &Value, depth: usize) -> Result<bool, Exception> {
    Ok(match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (x, y) if x.is_number() && y.is_number() => num_cmp(x, y) == Some(Ordering::Equal),
        (Value::List(x), Value::List(y)) => {
            Rc::ptr_eq(x, y) || seq_eq(&x.borrow(), &y.borrow(), depth)?
        }
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y) || seq_eq(x, y, depth)?,
        (Value::View(k1, x), Value::View(k2, y)) if k1 == k2 && *k1 != "dict_values" => {
            if x.len() != y.len() {
                return Ok(false);
            }
            if depth >= MAX_VALUE_DEPTH {
                return Err(too_deep("in comparison"));
            }
            for a in x.iter() {
                let mut found = false;
                for b in y.iter() {
                    if eq_at(a, b, depth + 1)? {
                        found = true;
                        break;
                    }
                }
                if !found {
                    return Ok(false);
                }
            }
            true
        }
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            if depth >= MAX_VALUE_DEPTH {
                return Err(too_deep("in comparison"));
            }
            let (x, y) = (x.borrow(), y.borrow());
            if x.len() != y.len() {
                return Ok(false);
            }
            for (k, v) in x.entries() {
                match y.get(k)? {
                    Some(other) if eq_at(v, &other, depth + 1)? => {}
                    _ => return Ok(false),
                }
            }
            true
        }
        (Value::Set(x), Value::Set(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.entries().iter().all(|(k, _)| y.contains(k).unwrap_or(false))
        }
        (Value::Range(a1, b1, c1), Value::Range(a2, b2, c2)) => {
            let (l1, l2) = (range_len(*a1, *b1, *c1), range_len(*a2, *b2, *c2));
            l1 == l2 && (l1 == 0 || (a1 == a2 && (l1 == 1 || c1 == c2)))
        }
        _ => is_same(a, b),
    })
}

fn seq_eq(x: &[Value], y: &[Value], depth: usize) -> Result<bool, Exception> {
    if x.len() != y.len() {
        return Ok(false);
    }
    if depth >= MAX_VALUE_DEPTH {
        return Err(too_deep("in comparison"));
    }
    for (a, b) in x.iter().zip(y) {
        if !eq_at(a, b, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Numeric ordering, exact across small ints, big ints and floats.
/// `None` when a NaN is involved.
fn num_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(i), Some(j)) = (a.as_int(), b.as_int()) {
        return Some(i.cmp(&j));
    }
    if !matches!(a, Value::BigInt(_)) && !matches!(b, Value::BigInt(_)) {
        return a.as_f64()?.partial_cmp(&b.as_f64()?);
    }
    match (a.as_bigint(), b.as_bigint()) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        (Some(x), None) => int_float_cmp(&x, b.as_f64()?),
        (None, Some(y)) => int_float_cmp(&y, a.as_f64()?).map(Ordering::reverse),
        (None, None) => None,
    }
}

fn int_float_cmp(x: &BigInt, f: f64) -> Option<Ordering> {
    if f.is_nan() {
        return None;
    }
    if f.is_infinite() {
        return Some(if f > 0.0 { Ordering::Less } else { Ordering::Greater });
    }
    let floor = f.floor();
    Some(match x.cmp(&BigInt::from_f64(floor)?) {
        Ordering::Equal if f > floor => Ordering::Less,
        other => other,
    })
}

/// Python `is`
pub fn is_same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::BigInt(x), Value::BigInt(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
        (Value::View(_, x), Value::View(_, y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) | (Value::Set(x), Value::Set(y)) => Rc::ptr_eq(x, y),
        (Value::Iter(x), Value::Iter(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Method(x), Value::Method(y)) => Rc::ptr_eq(x, y),
        (Value::Match(x), Value::Match(y)) => Rc::ptr_eq(x, y),
        (Value::Pattern(x), Value::Pattern(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) | (Value::Module(x), Value::Module(y)) => x == y,
        (Value::ModuleFn(m1, n1), Value::ModuleFn(m2, n2)) => m1 == m2 && n1 == n2,
        (Value::Range(a1, b1, c1), Value::Range(a2, b2, c2)) => (a1, b1, c1) == (a2, b2, c2),
        _ => false,
    }
}

/// Ordering used by `<`, `<=`, `>`, `>=`, `sorted`, `min` and `max`.
/// `None` means unordered (a NaN was involved).
pub fn py_partial_cmp(a: &Value, b: &Value, op: &str) -> Result<Option<Ordering>, Exception> {
    cmp_at(a, b, op, 0)
}

fn cmp_at(a: &Value, b: &Value, op: &str, depth: usize) -> Result<Option<Ordering>, Exception> {
    match (a, b) {
        (x, y) if x.is_number() && y.is_number() => Ok(num_cmp(x, y)),
        (Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow().clone(), y.borrow().clone());
            seq_cmp(&x, &y, op, depth)
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_cmp(x, y, op, depth),
        _ => Err(Exception::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op,
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn seq_cmp(x: &[Value], y: &[Value], op: &str, depth: usize) -> Result<Option<Ordering>, Exception> {
    if depth >= MAX_VALUE_DEPTH {
        return Err(too_deep("in comparison"));
    }
    for (a, b) in x.iter().zip(y) {
        if !eq_at(a, b, depth + 1)? {
            return cmp_at(a, b, op, depth + 1);
        }
    }
    Ok(Some(x.len().cmp(&y.len())))
}

/// `a < b` as used by sorting
pub fn py_lt(a: &Value, b: &Value) -> Result<bool, Exception> {
    Ok(py_partial_cmp(a, b, "<")? == Some(Ordering::Less))
}

/// Hashable identity of a value, used to index dicts and sets.
/// Numbers that compare equal share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    BigInt(Rc<BigInt>),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
    Range(i64, i64, i64),
    Name(&'static str),
    Ptr(usize),
}

/// Insertion-ordered hash table
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
    index: HashMap<HashKey, usize>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn get(&self, key: &Value) -> Result<Option<Value>, Exception> {
        let key = key.hash_key()?;
        Ok(self.index.get(&key).map(|&i| self.entries[i].1.clone()))
    }

    pub fn contains(&self, key: &Value) -> Result<bool, Exception> {
        Ok(self.index.contains_key(&key.hash_key()?))
    }

    /// Insert or overwrite. An existing key keeps its original object.
    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), Exception> {
        let hashed = key.hash_key()?;
        match self.index.get(&hashed) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(hashed, self.entries.len());
                self.entries.push((key, value));
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> Result<Option<(Value, Value)>, Exception> {
        let hashed = key.hash_key()?;
        let Some(pos) = self.index.remove(&hashed) else {
            return Ok(None);
        };
        let entry = self.entries.remove(pos);
        for i in self.index.values_mut() {
            if *i > pos {
                *i -= 1;
            }
        }
        Ok(Some(entry))
    }

    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        let (key, value) = self.entries.pop()?;
        if let Ok(hashed) = key.hash_key() {
            self.index.remove(&hashed);
        }
        Some((key, value))
    }

    pub fn pop_first(&mut self) -> Option<(Value, Value)> {
        let key = self.entries.first()?.0.clone();
        self.remove(&key).ok().flatten()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    fn drain_into(&mut self, out: &mut Vec<Value>) {
        self.index.clear();
        for (key, value) in self.entries.drain(..) {
            out.push(key);
            out.push(value);
        }
    }
}

impl Drop for Dict {
    fn drop(&mut self) {
        let mut pending = Vec::with_capacity(self.entries.len() * 2);
        self.drain_into(&mut pending);
        release(pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr() {
        assert_eq!(Value::from("it's").repr(), "\"it's\"");
        assert_eq!(Value::from("a\nb").repr(), "'a\\nb'");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(
            Value::list(vec![Value::Float(1.0), Value::None, Value::Bool(true)]).repr(),
            "[1.0, None, True]"
        );
        assert_eq!(Value::set(Dict::new()).repr(), "set()");
        assert_eq!(Value::Range(0, 5, 1).repr(), "range(0, 5)");
    }

    #[test]
    fn test_self_referencing_list_repr() {
        let list = Value::list(vec![Value::Int(1)]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert_eq!(list.repr(), "[1, [...]]");
        if let Value::List(items) = &list {
            items.borrow_mut().clear();
        }
    }

    #[test]
    fn test_numeric_keys_collapse() {
        let mut dict = Dict::new();
        dict.insert(Value::Int(1), Value::from("int")).unwrap();
        dict.insert(Value::Float(1.0), Value::from("float")).unwrap();
        dict.insert(Value::Bool(true), Value::from("bool")).unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.entries()[0].0.repr(), "1");
        assert_eq!(dict.get(&Value::Int(1)).unwrap().unwrap().repr(), "'bool'");
    }

    #[test]
    fn test_dict_remove_keeps_order() {
        let mut dict = Dict::new();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            dict.insert(Value::from(*name), Value::Int(i as i64)).unwrap();
        }
        dict.remove(&Value::from("a")).unwrap();
        assert_eq!(dict.get(&Value::from("c")).unwrap().unwrap().repr(), "2");
        assert_eq!(Value::dict(dict).repr(), "{'b': 1, 'c': 2}");
    }

    #[test]
    fn test_unhashable() {
        let err = Value::list(vec![]).hash_key().unwrap_err();
        assert_eq!(err.message, "unhashable type: 'list'");
        let err = Value::view("dict_keys", vec![Value::Int(1)]).hash_key().unwrap_err();
        assert_eq!(err.message, "unhashable type: 'dict_keys'");
    }

    #[test]
    fn test_equality_and_ordering() {
        assert!(py_eq(&Value::Int(1), &Value::Float(1.0)).unwrap());
        assert!(py_eq(&Value::Bool(true), &Value::Int(1)).unwrap());
        assert!(!py_eq(&Value::from("1"), &Value::Int(1)).unwrap());
        assert!(py_lt(
            &Value::tuple(vec![Value::Int(1), Value::Int(2)]),
            &Value::tuple(vec![Value::Int(1), Value::Int(3)])
        )
        .unwrap());
        assert!(py_lt(&Value::Int(1), &Value::from("a")).is_err());
        assert_eq!(range_len(0, 10, 3), 4);
        assert_eq!(range_len(10, 0, -1), 10);
        assert_eq!(range_len(0, 0, 1), 0);
    }

    fn big(text: &str) -> Value {
        Value::BigInt(Rc::new(text.parse().unwrap()))
    }

    #[test]
    fn test_big_integers_compare_exactly() {
        let huge = big("100000000000000000001");
        assert_eq!(huge.type_name(), "int");
        assert_eq!(huge.repr(), "100000000000000000001");
        assert!(!py_eq(&huge, &Value::Float(1e20)).unwrap());
        assert!(py_eq(&big("100000000000000000000"), &Value::Float(1e20)).unwrap());
        assert!(py_lt(&Value::Float(1e20), &huge).unwrap());
        assert!(py_lt(&Value::Int(i64::MAX), &huge).unwrap());
        assert!(py_lt(&huge, &Value::Float(f64::INFINITY)).unwrap());
        assert_eq!(py_partial_cmp(&huge, &Value::Float(f64::NAN), "<").unwrap(), None);

        let mut dict = Dict::new();
        dict.insert(big("100000000000000000000"), Value::from("big")).unwrap();
        dict.insert(Value::Float(1e20), Value::from("float")).unwrap();
        assert_eq!(dict.len(), 1);
    }

    fn nested(depth: usize) -> Value {
        let mut value = Value::list(vec![]);
        for _ in 0..depth {
            value = Value::list(vec![value]);
        }
        value
    }

    /// Walking a thousand levels takes more stack than a default test thread has.
    fn with_big_stack(f: impl FnOnce() + Send + 'static) {
        std::thread::Builder::new()
            .stack_size(64 << 20)
            .spawn(f)
            .unwrap()
            .join()
            .unwrap();
    }

    #[test]
    fn test_deep_nesting_is_bounded() {
        with_big_stack(deep_nesting_is_bounded);
    }

    fn deep_nesting_is_bounded() {
        let shallow = nested(10);
        assert_eq!(shallow.try_repr().unwrap(), format!("{}{}", "[".repeat(11), "]".repeat(11)));

        let deep = nested(3_000_000);
        let err = deep.try_repr().unwrap_err();
        assert_eq!(err.kind, ExceptionKind::RecursionError);
        assert!(deep.repr().ends_with("..."));

        let other = nested(3_000_000);
        assert_eq!(py_eq(&deep, &other).unwrap_err().kind, ExceptionKind::RecursionError);
        assert!(py_lt(&deep, &other).is_err());

        let mut tuple = Value::tuple(vec![]);
        for _ in 0..(MAX_VALUE_DEPTH + 5) {
            tuple = Value::tuple(vec![tuple]);
        }
        assert_eq!(tuple.hash_key().unwrap_err().kind, ExceptionKind::RecursionError);

        // Both chains drop here without exhausting the stack.
        drop(deep);
        drop(other);
    }

    #[test]
    fn test_deep_dict_chain_drops() {
        let mut value = Value::None;
        for _ in 0..1_000_000 {
            let mut dict = Dict::new();
            dict.insert(Value::from("next"), value).unwrap();
            value = Value::dict(dict);
        }
        drop(value);
    }
}
