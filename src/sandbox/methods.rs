//! Methods and properties of built-in value types

use super::builtins::{check_arity, dict_update, expect_int, expect_str, kwarg, reject_extra, sort_values, to_set, Kwargs};
use super::error::{Exception, ExceptionKind};
use super::format::str_format;
use super::interp::{collect, iterate, set_op, Eval, Interpreter};
use super::ast::BinOp;
use super::modules;
use super::value::*;
use std::rc::Rc;

const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "rsplit", "splitlines", "join",
    "replace", "startswith", "endswith", "find", "rfind", "index", "rindex", "count",
    "isdigit", "isalpha", "isalnum", "isspace", "isupper", "islower", "isnumeric",
    "isdecimal", "istitle", "title", "capitalize", "swapcase", "center", "ljust", "rjust",
    "zfill", "format", "partition", "rpartition", "removeprefix", "removesuffix", "casefold",
];

const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "sort", "reverse",
    "clear", "copy",
];

const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "setdefault", "update", "clear", "copy", "popitem",
];

const SET_METHODS: &[&str] = &[
    "add", "remove", "discard", "pop", "clear", "copy", "union", "intersection", "difference",
    "symmetric_difference", "issubset", "issuperset", "isdisjoint", "update",
];

const TUPLE_METHODS: &[&str] = &["count", "index"];
const FLOAT_METHODS: &[&str] = &["is_integer"];
const INT_METHODS: &[&str] = &["bit_length"];
const MATCH_METHODS: &[&str] = &["group", "groups", "start", "end", "span", "groupdict"];
const PATTERN_METHODS: &[&str] = &["search", "match", "fullmatch", "findall", "finditer", "sub", "split"];

/// Resolve `obj.name` to a property value or a bound method.
pub fn attr(obj: &Value, name: &str) -> Option<Value> {
    match (obj, name) {
        (Value::Pattern(p), "pattern") => return Some(Value::Str(p.source.clone())),
        (Value::Pattern(p), "flags") => return Some(Value::Int(p.flags)),
        (Value::Match(m), "string") => return Some(Value::Str(m.text.clone())),
        (Value::Match(m), "re") => return Some(Value::Pattern(m.pattern.clone())),
        _ => {}
    }
    let table = match obj {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Float(_) => FLOAT_METHODS,
        Value::Int(_) | Value::BigInt(_) | Value::Bool(_) => INT_METHODS,
        Value::Match(_) => MATCH_METHODS,
        Value::Pattern(_) => PATTERN_METHODS,
        _ => return None,
    };
    let name = table.iter().copied().find(|m| *m == name)?;
    Some(Value::Method(Rc::new(BoundMethod {
        receiver: obj.clone(),
        name,
    })))
}

pub(super) fn call(interp: &mut Interpreter, receiver: &Value, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Eval {
    match receiver {
        Value::Str(s) => str_method(s, name, args, kwargs),
        Value::List(items) => list_method(interp, receiver, items, name, args, kwargs),
        Value::Dict(_) => dict_method(receiver, name, args, kwargs),
        Value::Set(_) => set_method(receiver, name, args, kwargs),
        Value::Tuple(items) => {
            reject_extra(name, kwargs)?;
            sequence_method(items, "tuple", name, &args)
        }
        Value::Float(f) => {
            check_arity(name, &args, 0, 0)?;
            reject_extra(name, kwargs)?;
            Ok(Value::Bool(f.is_finite() && f.fract() == 0.0))
        }
        Value::Int(_) | Value::BigInt(_) | Value::Bool(_) => {
            check_arity(name, &args, 0, 0)?;
            reject_extra(name, kwargs)?;
            let bits = receiver.as_bigint().map_or(0, |n| n.bits());
            Ok(Value::Int(bits as i64))
        }
        Value::Match(m) => match_method(m, name, args, kwargs),
        Value::Pattern(p) => modules::pattern_method(interp, p, name, args, kwargs),
        other => Err(Exception::attribute_error(format!(
            "'{}' object has no attribute '{}'",
            other.type_name(),
            name
        ))),
    }
}

// ----- str -----

/// Byte range of the character slice `[start:end]`, clamped like a slice.
fn char_window(s: &str, start: Option<&Value>, end: Option<&Value>) -> Result<(usize, usize), Exception> {
    let count = s.chars().count() as i64;
    let bound = |v: Option<&Value>, default: i64| -> Result<i64, Exception> {
        match v {
            None | Some(Value::None) => Ok(default),
            Some(v) => {
                let i = expect_int(v)?;
                Ok(if i < 0 { (i + count).max(0) } else { i.min(count) })
            }
        }
    };
    let (start, end) = (bound(start, 0)?, bound(end, count)?);
    let byte = |i: i64| s.char_indices().nth(i as usize).map(|(b, _)| b).unwrap_or(s.len());
    if start > end {
        return Ok((byte(start), byte(start)));
    }
    Ok((byte(start), byte(end)))
}

fn char_index(s: &str, byte: usize) -> i64 {
    s[..byte].chars().count() as i64
}

fn strip_set(chars: Option<&Value>) -> Result<Option<Vec<char>>, Exception> {
    match chars {
        None | Some(Value::None) => Ok(None),
        Some(v) => Ok(Some(expect_str(v, "strip arg")?.chars().collect())),
    }
}

fn fill_char(value: Option<&Value>) -> Result<char, Exception> {
    let Some(value) = value else {
        return Ok(' ');
    };
    let text = expect_str(value, "The fill character")?;
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(Exception::type_error(
            "The fill character must be exactly one character long",
        )),
    }
}

fn whitespace_split(s: &str, maxsplit: i64) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit >= 0 && parts.len() as i64 >= maxsplit {
            parts.push(Value::from(rest));
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(at) => {
                parts.push(Value::from(&rest[..at]));
                rest = rest[at..].trim_start();
            }
            None => {
                parts.push(Value::from(rest));
                break;
            }
        }
    }
    parts
}

fn whitespace_rsplit(s: &str, maxsplit: i64) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_end();
    while !rest.is_empty() {
        if maxsplit >= 0 && parts.len() as i64 >= maxsplit {
            parts.push(Value::from(rest));
            break;
        }
        match rest.rfind(char::is_whitespace) {
            Some(at) => {
                let width = rest[at..].chars().next().map(char::len_utf8).unwrap_or(1);
                parts.push(Value::from(&rest[at + width..]));
                rest = rest[..at].trim_end();
            }
            None => {
                parts.push(Value::from(rest));
                break;
            }
        }
    }
    parts.reverse();
    parts
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut previous_cased = false;
    for c in s.chars() {
        if previous_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_cased = c.is_alphabetic();
    }
    out
}

fn is_title(s: &str) -> bool {
    let mut previous_cased = false;
    let mut cased = false;
    for c in s.chars() {
        if c.is_uppercase() {
            if previous_cased {
                return false;
            }
            previous_cased = true;
            cased = true;
        } else if c.is_lowercase() {
            if !previous_cased {
                return false;
            }
            previous_cased = true;
            cased = true;
        } else {
            previous_cased = false;
        }
    }
    cased
}

fn split_lines(s: &str, keepends: bool) -> Vec<Value> {
    let mut lines = Vec::new();
    let mut start = 0;
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let ending = match bytes[i] {
            b'\r' if bytes.get(i + 1) == Some(&b'\n') => 2,
            b'\n' | b'\r' => 1,
            _ => 0,
        };
        if ending == 0 {
            i += 1;
            continue;
        }
        let stop = if keepends { i + ending } else { i };
        lines.push(Value::from(&s[start..stop]));
        i += ending;
        start = i;
    }
    if start < s.len() {
        lines.push(Value::from(&s[start..]));
    }
    lines
}

fn str_method(s: &Rc<str>, name: &str, args: Vec<Value>, mut kwargs: Kwargs) -> Eval {
    let s: &str = s;
    let text = |v: &Value| expect_str(v, "argument").map(str::to_string);
    match name {
        "format" => {
            let mut named = Dict::new();
            for (key, value) in kwargs {
                named.insert(Value::from(key), value)?;
            }
            return str_format(s, &args, &named).map(Value::from);
        }
        "split" | "rsplit" => {
            let sep = kwarg(&mut kwargs, "sep");
            let maxsplit = kwarg(&mut kwargs, "maxsplit");
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 0, 2)?;
            let sep = args.first().or(sep.as_ref()).filter(|v| !matches!(v, Value::None));
            let maxsplit = match args.get(1).or(maxsplit.as_ref()) {
                Some(v) => expect_int(v)?,
                None => -1,
            };
            let Some(sep) = sep else {
                return Ok(Value::list(if name == "split" {
                    whitespace_split(s, maxsplit)
                } else {
                    whitespace_rsplit(s, maxsplit)
                }));
            };
            let sep = expect_str(sep, "sep")?;
            if sep.is_empty() {
                return Err(Exception::value_error("empty separator"));
            }
            let parts: Vec<Value> = match (name, maxsplit) {
                ("split", n) if n >= 0 => s.splitn(n as usize + 1, sep).map(Value::from).collect(),
                ("split", _) => s.split(sep).map(Value::from).collect(),
                (_, n) if n >= 0 => {
                    let mut parts: Vec<Value> = s.rsplitn(n as usize + 1, sep).map(Value::from).collect();
                    parts.reverse();
                    parts
                }
                _ => s.split(sep).map(Value::from).collect(),
            };
            return Ok(Value::list(parts));
        }
        "splitlines" => {
            let keepends = kwarg(&mut kwargs, "keepends");
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 0, 1)?;
            let keepends = args.first().or(keepends.as_ref()).is_some_and(Value::truthy);
            return Ok(Value::list(split_lines(s, keepends)));
        }
        "replace" => {
            let count = kwarg(&mut kwargs, "count");
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 2, 3)?;
            let (old, new) = (text(&args[0])?, text(&args[1])?);
            let count = match args.get(2).or(count.as_ref()) {
                Some(v) => expect_int(v)?,
                None => -1,
            };
            return Ok(Value::from(if count < 0 {
                s.replace(&old, &new)
            } else {
                s.replacen(&old, &new, count as usize)
            }));
        }
        _ => {}
    }
    reject_extra(name, kwargs)?;

    match name {
        "upper" | "lower" | "casefold" | "title" | "capitalize" | "swapcase" => {
            check_arity(name, &args, 0, 0)?;
            Ok(Value::from(match name {
                "upper" => s.to_uppercase(),
                "lower" | "casefold" => s.to_lowercase(),
                "title" => title_case(s),
                "capitalize" => {
                    let mut chars = s.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                        None => String::new(),
                    }
                }
                _ => s
                    .chars()
                    .flat_map(|c| -> Box<dyn Iterator<Item = char>> {
                        if c.is_uppercase() {
                            Box::new(c.to_lowercase())
                        } else {
                            Box::new(c.to_uppercase())
                        }
                    })
                    .collect(),
            }))
        }
        "strip" | "lstrip" | "rstrip" => {
            check_arity(name, &args, 0, 1)?;
            let set = strip_set(args.first())?;
            let matcher = |c: char| match &set {
                None => c.is_whitespace(),
                Some(chars) => chars.contains(&c),
            };
            Ok(Value::from(match name {
                "strip" => s.trim_matches(matcher),
                "lstrip" => s.trim_start_matches(matcher),
                _ => s.trim_end_matches(matcher),
            }))
        }
        "join" => {
            check_arity(name, &args, 1, 1)?;
            let mut parts = Vec::new();
            for (i, item) in iterate(&args[0])?.enumerate() {
                match item {
                    Value::Str(part) => parts.push(part),
                    other => {
                        return Err(Exception::type_error(format!(
                            "sequence item {}: expected str instance, {} found",
                            i,
                            other.type_name()
                        )))
                    }
                }
            }
            let mut out = String::new();
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    out.push_str(s);
                }
                out.push_str(part);
            }
            Ok(Value::from(out))
        }
        "startswith" | "endswith" => {
            check_arity(name, &args, 1, 3)?;
            let (from, to) = char_window(s, args.get(1), args.get(2))?;
            let window = &s[from..to];
            let candidates = match &args[0] {
                Value::Tuple(items) => items.to_vec(),
                other => vec![other.clone()],
            };
            for candidate in &candidates {
                let affix = expect_str(candidate, &format!("{} first arg", name))?;
                let hit = if name == "startswith" {
                    window.starts_with(affix)
                } else {
                    window.ends_with(affix)
                };
                if hit {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "find" | "rfind" | "index" | "rindex" | "count" => {
            check_arity(name, &args, 1, 3)?;
            let needle = text(&args[0])?;
            let (from, to) = char_window(s, args.get(1), args.get(2))?;
            let window = &s[from..to];
            if name == "count" {
                return Ok(Value::Int(window.matches(needle.as_str()).count() as i64));
            }
            let found = if name.starts_with('r') {
                window.rfind(needle.as_str())
            } else {
                window.find(needle.as_str())
            };
            match found {
                Some(at) => Ok(Value::Int(char_index(s, from + at))),
                None if name.ends_with("find") => Ok(Value::Int(-1)),
                None => Err(Exception::value_error("substring not found")),
            }
        }
        "isdigit" | "isdecimal" | "isnumeric" | "isalpha" | "isalnum" | "isspace" => {
            check_arity(name, &args, 0, 0)?;
            let test: fn(char) -> bool = match name {
                "isdigit" | "isdecimal" => |c| c.is_ascii_digit(),
                "isnumeric" => char::is_numeric,
                "isalpha" => char::is_alphabetic,
                "isalnum" => char::is_alphanumeric,
                _ => char::is_whitespace,
            };
            Ok(Value::Bool(!s.is_empty() && s.chars().all(test)))
        }
        "isupper" | "islower" => {
            check_arity(name, &args, 0, 0)?;
            let (has, lacks): (fn(char) -> bool, fn(char) -> bool) = if name == "isupper" {
                (char::is_uppercase, char::is_lowercase)
            } else {
                (char::is_lowercase, char::is_uppercase)
            };
            Ok(Value::Bool(s.chars().any(has) && !s.chars().any(lacks)))
        }
        "istitle" => {
            check_arity(name, &args, 0, 0)?;
            Ok(Value::Bool(is_title(s)))
        }
        "center" | "ljust" | "rjust" => {
            check_arity(name, &args, 1, 2)?;
            let width = expect_int(&args[0])?;
            let fill = fill_char(args.get(1))?;
            let len = s.chars().count() as i64;
            if width <= len {
                return Ok(Value::from(s));
            }
            let margin = (width - len) as usize;
            let left = match name {
                "ljust" => 0,
                "rjust" => margin,
                _ => margin / 2 + (margin & width as usize & 1),
            };
            let mut out = String::new();
            out.extend(std::iter::repeat(fill).take(left));
            out.push_str(s);
            out.extend(std::iter::repeat(fill).take(margin - left));
            Ok(Value::from(out))
        }
        "zfill" => {
            check_arity(name, &args, 1, 1)?;
            let width = expect_int(&args[0])?;
            let len = s.chars().count() as i64;
            if width <= len {
                return Ok(Value::from(s));
            }
            let zeros = "0".repeat((width - len) as usize);
            Ok(Value::from(match s.chars().next() {
                Some(sign @ ('+' | '-')) => format!("{}{}{}", sign, zeros, &s[1..]),
                _ => format!("{}{}", zeros, s),
            }))
        }
        "partition" | "rpartition" => {
            check_arity(name, &args, 1, 1)?;
            let sep = text(&args[0])?;
            if sep.is_empty() {
                return Err(Exception::value_error("empty separator"));
            }
            let found = if name == "partition" {
                s.split_once(sep.as_str())
            } else {
                s.rsplit_once(sep.as_str())
            };
            let parts = match (found, name) {
                (Some((head, tail)), _) => [head, sep.as_str(), tail],
                (None, "partition") => [s, "", ""],
                (None, _) => ["", "", s],
            };
            Ok(Value::tuple(parts.iter().map(|p| Value::from(*p)).collect()))
        }
        "removeprefix" | "removesuffix" => {
            check_arity(name, &args, 1, 1)?;
            let affix = text(&args[0])?;
            let trimmed = if name == "removeprefix" {
                s.strip_prefix(affix.as_str())
            } else {
                s.strip_suffix(affix.as_str())
            };
            Ok(Value::from(trimmed.unwrap_or(s)))
        }
        _ => Err(Exception::attribute_error(format!(
            "'str' object has no attribute '{}'",
            name
        ))),
    }
}

// ----- list and tuple -----

fn sequence_method(items: &[Value], type_name: &str, name: &str, args: &[Value]) -> Eval {
    match name {
        "count" => {
            check_arity(name, args, 1, 1)?;
            let mut count = 0;
            for item in items {
                if py_eq(item, &args[0])? {
                    count += 1;
                }
            }
            Ok(Value::Int(count))
        }
        "index" => {
            check_arity(name, args, 1, 3)?;
            let len = items.len() as i64;
            let bound = |v: Option<&Value>, default: i64| -> Result<usize, Exception> {
                Ok(match v {
                    None => default,
                    Some(v) => {
                        let i = expect_int(v)?;
                        if i < 0 { (i + len).max(0) } else { i.min(len) }
                    }
                } as usize)
            };
            let (start, end) = (bound(args.get(1), 0)?, bound(args.get(2), len)?);
            for i in start..end.max(start) {
                if py_eq(&items[i], &args[0])? {
                    return Ok(Value::Int(i as i64));
                }
            }
            Err(Exception::value_error(if type_name == "list" {
                format!("{} is not in list", args[0].repr())
            } else {
                "tuple.index(x): x not in tuple".to_string()
            }))
        }
        _ => Err(Exception::attribute_error(format!(
            "'{}' object has no attribute '{}'",
            type_name, name
        ))),
    }
}

fn list_method(
    interp: &mut Interpreter,
    receiver: &Value,
    items: &Rc<ListCell>,
    name: &str,
    mut args: Vec<Value>,
    mut kwargs: Kwargs,
) -> Eval {
    if name == "sort" {
        let key = kwarg(&mut kwargs, "key");
        let reverse = kwarg(&mut kwargs, "reverse").is_some_and(|v| v.truthy());
        reject_extra(name, kwargs)?;
        if !args.is_empty() {
            return Err(Exception::type_error("sort() takes no positional arguments"));
        }
        let taken = std::mem::take(&mut *items.borrow_mut());
        let sorted = sort_values(interp, taken, key, reverse)?;
        *items.borrow_mut() = sorted;
        return Ok(Value::None);
    }
    reject_extra(name, kwargs)?;

    match name {
        "append" => {
            check_arity(name, &args, 1, 1)?;
            items.borrow_mut().push(args.remove(0));
            Ok(Value::None)
        }
        "extend" => {
            check_arity(name, &args, 1, 1)?;
            let extra = collect(&args[0])?;
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            check_arity(name, &args, 2, 2)?;
            let index = expect_int(&args[0])?;
            let mut items = items.borrow_mut();
            let len = items.len() as i64;
            let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(at as usize, args.remove(1));
            Ok(Value::None)
        }
        "pop" => {
            check_arity(name, &args, 0, 1)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(Exception::index_error("pop from empty list"));
            }
            let len = items.len() as i64;
            let index = match args.first() {
                Some(v) => expect_int(v)?,
                None => -1,
            };
            let at = if index < 0 { index + len } else { index };
            if at < 0 || at >= len {
                return Err(Exception::index_error("pop index out of range"));
            }
            Ok(items.remove(at as usize))
        }
        "remove" => {
            check_arity(name, &args, 1, 1)?;
            let mut found = None;
            for (at, item) in items.borrow().iter().enumerate() {
                if py_eq(item, &args[0])? {
                    found = Some(at);
                    break;
                }
            }
            match found {
                Some(at) => {
                    items.borrow_mut().remove(at);
                    Ok(Value::None)
                }
                None => Err(Exception::value_error("list.remove(x): x not in list")),
            }
        }
        "index" | "count" => {
            let snapshot = items.borrow().clone();
            sequence_method(&snapshot, "list", name, &args)
        }
        "reverse" => {
            check_arity(name, &args, 0, 0)?;
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        "clear" => {
            check_arity(name, &args, 0, 0)?;
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            check_arity(name, &args, 0, 0)?;
            Ok(Value::list(items.borrow().clone()))
        }
        _ => Err(Exception::attribute_error(format!(
            "'{}' object has no attribute '{}'",
            receiver.type_name(),
            name
        ))),
    }
}

// ----- dict -----

fn dict_method(receiver: &Value, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Eval {
    let Value::Dict(dict) = receiver else {
        return Err(Exception::type_error("descriptor requires a 'dict' object"));
    };
    if name == "update" {
        check_arity(name, &args, 0, 1)?;
        let mut merged = dict.borrow().clone();
        if let Some(source) = args.first() {
            dict_update(&mut merged, source)?;
        }
        for (key, value) in kwargs {
            merged.insert(Value::from(key), value)?;
        }
        *dict.borrow_mut() = merged;
        return Ok(Value::None);
    }
    reject_extra(name, kwargs)?;

    match name {
        "get" => {
            check_arity(name, &args, 1, 2)?;
            let found = dict.borrow().get(&args[0])?;
            Ok(found.or_else(|| args.get(1).cloned()).unwrap_or(Value::None))
        }
        "keys" | "values" | "items" => {
            check_arity(name, &args, 0, 0)?;
            let dict = dict.borrow();
            Ok(match name {
                "keys" => Value::view("dict_keys", dict.keys()),
                "values" => Value::view("dict_values", dict.values()),
                _ => Value::view(
                    "dict_items",
                    dict.entries()
                        .iter()
                        .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                        .collect(),
                ),
            })
        }
        "pop" => {
            check_arity(name, &args, 1, 2)?;
            let removed = dict.borrow_mut().remove(&args[0])?;
            match (removed, args.get(1)) {
                (Some((_, value)), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(Exception::key_error(&args[0].repr())),
            }
        }
        "setdefault" => {
            check_arity(name, &args, 1, 2)?;
            let mut dict = dict.borrow_mut();
            if let Some(existing) = dict.get(&args[0])? {
                return Ok(existing);
            }
            let value = args.get(1).cloned().unwrap_or(Value::None);
            dict.insert(args[0].clone(), value.clone())?;
            Ok(value)
        }
        "popitem" => {
            check_arity(name, &args, 0, 0)?;
            let popped = dict.borrow_mut().pop_last();
            popped
                .map(|(k, v)| Value::tuple(vec![k, v]))
                .ok_or_else(|| Exception::key_error("'popitem(): dictionary is empty'"))
        }
        "clear" => {
            check_arity(name, &args, 0, 0)?;
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            check_arity(name, &args, 0, 0)?;
            Ok(Value::dict(dict.borrow().clone()))
        }
        _ => Err(Exception::attribute_error(format!(
            "'dict' object has no attribute '{}'",
            name
        ))),
    }
}

// ----- set -----

fn set_method(receiver: &Value, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Eval {
    let Value::Set(set) = receiver else {
        return Err(Exception::type_error("descriptor requires a 'set' object"));
    };
    reject_extra(name, kwargs)?;

    match name {
        "add" => {
            check_arity(name, &args, 1, 1)?;
            set.borrow_mut().insert(args[0].clone(), Value::None)?;
            Ok(Value::None)
        }
        "remove" | "discard" => {
            check_arity(name, &args, 1, 1)?;
            let removed = set.borrow_mut().remove(&args[0])?;
            if removed.is_none() && name == "remove" {
                return Err(Exception::key_error(&args[0].repr()));
            }
            Ok(Value::None)
        }
        "pop" => {
            check_arity(name, &args, 0, 0)?;
            let popped = set.borrow_mut().pop_first();
            popped
                .map(|(k, _)| k)
                .ok_or_else(|| Exception::key_error("'pop from an empty set'"))
        }
        "clear" => {
            check_arity(name, &args, 0, 0)?;
            set.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            check_arity(name, &args, 0, 0)?;
            Ok(Value::set(set.borrow().clone()))
        }
        "union" | "intersection" | "difference" | "symmetric_difference" | "update" => {
            let op = match name {
                "union" | "update" => BinOp::BitOr,
                "intersection" => BinOp::BitAnd,
                "difference" => BinOp::Sub,
                _ => BinOp::BitXor,
            };
            if name == "symmetric_difference" {
                check_arity(name, &args, 1, 1)?;
            }
            let mut result = set.borrow().clone();
            for other in &args {
                result = set_op(op, &result, &to_set(other)?)?;
            }
            if name == "update" {
                *set.borrow_mut() = result;
                return Ok(Value::None);
            }
            Ok(Value::set(result))
        }
        "issubset" | "issuperset" | "isdisjoint" => {
            check_arity(name, &args, 1, 1)?;
            let other = to_set(&args[0])?;
            let mine = set.borrow();
            let within = |a: &Dict, b: &Dict| -> Result<bool, Exception> {
                for (k, _) in a.entries() {
                    if !b.contains(k)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            };
            Ok(Value::Bool(match name {
                "issubset" => within(&*mine, &other)?,
                "issuperset" => within(&other, &*mine)?,
                _ => set_op(BinOp::BitAnd, &mine, &other)?.is_empty(),
            }))
        }
        _ => Err(Exception::attribute_error(format!(
            "'set' object has no attribute '{}'",
            name
        ))),
    }
}

// ----- re.Match -----

fn group_index(m: &MatchData, group: &Value) -> Result<usize, Exception> {
    let no_such_group = || Exception::new(ExceptionKind::IndexError, "no such group");
    match group {
        Value::Str(name) => m
            .pattern
            .regex
            .capture_names()
            .position(|n| n == Some(&name[..]))
            .ok_or_else(no_such_group),
        other => {
            let i = expect_int(other)?;
            if i < 0 || i as usize >= m.groups.len() {
                return Err(no_such_group());
            }
            Ok(i as usize)
        }
    }
}

/// `m[g]` and `m.group(g)`
pub fn match_group(m: &MatchData, group: &Value) -> Eval {
    let index = group_index(m, group)?;
    Ok(m.group_str(index).map(Value::from).unwrap_or(Value::None))
}

fn match_method(m: &Rc<MatchData>, name: &str, args: Vec<Value>, mut kwargs: Kwargs) -> Eval {
    let default = kwarg(&mut kwargs, "default");
    reject_extra(name, kwargs)?;
    match name {
        "group" => match args.len() {
            0 => match_group(m, &Value::Int(0)),
            1 => match_group(m, &args[0]),
            _ => Ok(Value::tuple(
                args.iter().map(|g| match_group(m, g)).collect::<Result<Vec<_>, _>>()?,
            )),
        },
        "groups" => {
            check_arity(name, &args, 0, 1)?;
            let default = args.first().cloned().or(default).unwrap_or(Value::None);
            Ok(Value::tuple(
                (1..m.groups.len())
                    .map(|i| m.group_str(i).map(Value::from).unwrap_or_else(|| default.clone()))
                    .collect(),
            ))
        }
        "groupdict" => {
            check_arity(name, &args, 0, 1)?;
            let default = args.first().cloned().or(default).unwrap_or(Value::None);
            let mut dict = Dict::new();
            for (i, group_name) in m.pattern.regex.capture_names().enumerate() {
                if let Some(group_name) = group_name {
                    let value = m.group_str(i).map(Value::from).unwrap_or_else(|| default.clone());
                    dict.insert(Value::from(group_name), value)?;
                }
            }
            Ok(Value::dict(dict))
        }
        "start" | "end" | "span" => {
            check_arity(name, &args, 0, 1)?;
            let index = group_index(m, args.first().unwrap_or(&Value::Int(0)))?;
            let (start, end) = match m.groups[index] {
                Some((s, e)) => (m.char_offset(s) as i64, m.char_offset(e) as i64),
                None => (-1, -1),
            };
            Ok(match name {
                "start" => Value::Int(start),
                "end" => Value::Int(end),
                _ => Value::tuple(vec![Value::Int(start), Value::Int(end)]),
            })
        }
        _ => Err(Exception::attribute_error(format!(
            "'re.Match' object has no attribute '{}'",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: Vec<Value>) -> Vec<String> {
        values.iter().map(|v| v.try_to_str().unwrap()).collect()
    }

    #[test]
    fn test_whitespace_split() {
        assert_eq!(strings(whitespace_split("  a b  c  ", -1)), ["a", "b", "c"]);
        assert_eq!(strings(whitespace_split("a b  c  ", 1)), ["a", "b  c  "]);
        assert_eq!(strings(whitespace_rsplit("  a b  c", 1)), ["  a b", "c"]);
        assert!(whitespace_split("   ", -1).is_empty());
    }

    #[test]
    fn test_split_lines() {
        assert_eq!(strings(split_lines("a\nb\r\nc", false)), ["a", "b", "c"]);
        assert_eq!(strings(split_lines("a\n", true)), ["a\n"]);
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("hello wORLD 2nd"), "Hello World 2Nd");
        assert!(is_title("Hello World"));
        assert!(!is_title("Hello world"));
    }

    #[test]
    fn test_str_methods() {
        let s: Rc<str> = Rc::from("hello");
        let call = |name: &str, args: Vec<Value>| str_method(&s, name, args, Vec::new()).unwrap().repr();
        assert_eq!(call("center", vec![Value::Int(9), Value::from("*")]), "'**hello**'");
        assert_eq!(call("find", vec![Value::from("l")]), "2");
        assert_eq!(call("rfind", vec![Value::from("l")]), "3");
        assert_eq!(call("count", vec![Value::from("l")]), "2");
        assert_eq!(call("partition", vec![Value::from("l")]), "('he', 'l', 'lo')");
        assert_eq!(call("zfill", vec![Value::Int(7)]), "'00hello'");
        assert!(str_method(&s, "index", vec![Value::from("z")], Vec::new()).is_err());
    }

    #[test]
    fn test_bound_method_lookup() {
        assert!(attr(&Value::from("x"), "upper").is_some());
        assert!(attr(&Value::from("x"), "append").is_none());
        assert!(attr(&Value::Int(3), "bit_length").is_some());
        assert!(attr(&Value::None, "anything").is_none());
    }
}
