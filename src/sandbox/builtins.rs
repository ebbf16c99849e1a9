//! The catalog primitives
//!
//! Each function receives already-evaluated positional and keyword arguments.
//! Keyword arguments are consumed with [`kwarg`]; anything left over is an
//! error raised by [`reject_extra`].

use super::ast::{BinOp, CmpOp};
use super::bignum::{self, float_to_value, int_to_f64, int_value, parse_digits};
use super::error::{Exception, ExceptionKind};
use super::interp::{binary_op, collect, compare, iterate, memory_error, Eval, Interpreter, MAX_SEQUENCE_LEN};
use super::value::*;
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::Signed;

pub(super) type Kwargs = Vec<(String, Value)>;

pub(super) fn call(interp: &mut Interpreter, name: &str, args: Vec<Value>, mut kwargs: Kwargs) -> Eval {
    match name {
        "abs" => {
            check_arity(name, &args, 1, 1)?;
            reject_extra(name, kwargs)?;
            abs(&args[0])
        }
        "all" | "any" => {
            check_arity(name, &args, 1, 1)?;
            reject_extra(name, kwargs)?;
            let want = name == "any";
            for item in iterate(&args[0])? {
                if item.truthy() == want {
                    return Ok(Value::Bool(want));
                }
            }
            Ok(Value::Bool(!want))
        }
        "bool" => {
            check_arity(name, &args, 0, 1)?;
            reject_extra(name, kwargs)?;
            Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
        }
        "chr" => {
            check_arity(name, &args, 1, 1)?;
            reject_extra(name, kwargs)?;
            let code = expect_int(&args[0])?;
            u32::try_from(code)
                .ok()
                .and_then(char::from_u32)
                .map(|c| Value::from(c.to_string()))
                .ok_or_else(|| Exception::value_error("chr() arg not in range(0x110000)"))
        }
        "dict" => {
            check_arity(name, &args, 0, 1)?;
            let mut dict = Dict::new();
            if let Some(source) = args.first() {
                dict_update(&mut dict, source)?;
            }
            for (key, value) in kwargs {
                dict.insert(Value::from(key), value)?;
            }
            Ok(Value::dict(dict))
        }
        "divmod" => {
            check_arity(name, &args, 2, 2)?;
            reject_extra(name, kwargs)?;
            let quotient = binary_op(BinOp::FloorDiv, &args[0], &args[1])?;
            let remainder = binary_op(BinOp::Mod, &args[0], &args[1])?;
            Ok(Value::tuple(vec![quotient, remainder]))
        }
        "enumerate" => {
            let start = kwarg(&mut kwargs, "start");
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 1, 2)?;
            let start = match args.get(1).or(start.as_ref()) {
                Some(v) => expect_int(v)?,
                None => 0,
            };
            let mut out = Vec::new();
            for (i, item) in iterate(&args[0])?.enumerate() {
                let index = start.checked_add(i as i64).ok_or_else(Exception::overflow)?;
                out.push(Value::tuple(vec![Value::Int(index), item]));
            }
            Ok(Value::iter("enumerate", out))
        }
        "filter" => {
            check_arity(name, &args, 2, 2)?;
            reject_extra(name, kwargs)?;
            let mut out = Vec::new();
            for item in iterate(&args[1])? {
                let keep = match &args[0] {
                    Value::None => item.truthy(),
                    func => interp.call(func, vec![item.clone()], Vec::new())?.truthy(),
                };
                if keep {
                    out.push(item);
                }
            }
            Ok(Value::iter("filter", out))
        }
        "float" => {
            check_arity(name, &args, 0, 1)?;
            reject_extra(name, kwargs)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(v) => to_float(v).map(Value::Float),
            }
        }
        "int" => {
            let base = kwarg(&mut kwargs, "base");
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 0, 2)?;
            let base = args.get(1).or(base.as_ref());
            match (args.first(), base) {
                (None, _) => Ok(Value::Int(0)),
                (Some(Value::Str(s)), base) => {
                    let base = match base {
                        Some(b) => expect_int(b)?,
                        None => 10,
                    };
                    parse_int(s, base)
                }
                (Some(_), Some(_)) => Err(Exception::type_error(
                    "int() can't convert non-string with explicit base",
                )),
                (Some(v), None) => to_int(v),
            }
        }
        "len" => {
            check_arity(name, &args, 1, 1)?;
            reject_extra(name, kwargs)?;
            len(&args[0]).map(Value::Int)
        }
        "list" => {
            check_arity(name, &args, 0, 1)?;
            reject_extra(name, kwargs)?;
            match args.first() {
                None => Ok(Value::list(Vec::new())),
                Some(v) => Ok(Value::list(collect(v)?)),
            }
        }
        "map" => {
            reject_extra(name, kwargs)?;
            if args.len() < 2 {
                return Err(Exception::type_error("map() must have at least two arguments."));
            }
            let func = args[0].clone();
            let mut iters = args[1..].iter().map(iterate).collect::<Result<Vec<_>, _>>()?;
            let mut out = Vec::new();
            'outer: loop {
                let mut row = Vec::with_capacity(iters.len());
                for it in iters.iter_mut() {
                    match it.next() {
                        Some(v) => row.push(v),
                        None => break 'outer,
                    }
                }
                out.push(interp.call(&func, row, Vec::new())?);
            }
            Ok(Value::iter("map", out))
        }
        "max" | "min" => extremum(interp, name, args, kwargs),
        "pow" => {
            let modulus = kwarg(&mut kwargs, "mod");
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 2, 3)?;
            match args.get(2).or(modulus.as_ref()) {
                None | Some(Value::None) => binary_op(BinOp::Pow, &args[0], &args[1]),
                Some(m) => mod_pow(&args[0], &args[1], m),
            }
        }
        "print" => {
            let sep = text_option(kwarg(&mut kwargs, "sep"), "sep", " ")?;
            let end = text_option(kwarg(&mut kwargs, "end"), "end", "\n")?;
            kwarg(&mut kwargs, "flush");
            reject_extra(name, kwargs)?;
            let line = args.iter().map(Value::try_to_str).collect::<Result<Vec<_>, _>>()?.join(&sep);
            interp.write(&line);
            interp.write(&end);
            Ok(Value::None)
        }
        "range" => {
            check_arity(name, &args, 1, 3)?;
            reject_extra(name, kwargs)?;
            let bounds = args.iter().map(expect_int).collect::<Result<Vec<_>, _>>()?;
            let (start, stop, step) = match bounds.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => unreachable!("arity checked"),
            };
            if step == 0 {
                return Err(Exception::value_error("range() arg 3 must not be zero"));
            }
            Ok(Value::Range(start, stop, step))
        }
        "round" => {
            let ndigits = kwarg(&mut kwargs, "ndigits");
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 1, 2)?;
            match args.get(1).or(ndigits.as_ref()) {
                None | Some(Value::None) => round_to_int(&args[0]),
                Some(n) => round_digits(&args[0], expect_int(n)?),
            }
        }
        "set" => {
            check_arity(name, &args, 0, 1)?;
            reject_extra(name, kwargs)?;
            match args.first() {
                None => Ok(Value::set(Dict::new())),
                Some(v) => Ok(Value::set(to_set(v)?)),
            }
        }
        "sorted" => {
            let key = kwarg(&mut kwargs, "key");
            let reverse = kwarg(&mut kwargs, "reverse").is_some_and(|v| v.truthy());
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 1, 1)?;
            let items = collect(&args[0])?;
            Ok(Value::list(sort_values(interp, items, key, reverse)?))
        }
        "str" => {
            check_arity(name, &args, 0, 1)?;
            reject_extra(name, kwargs)?;
            match args.first() {
                None => Ok(Value::from("")),
                Some(v) => v.try_to_str().map(Value::from),
            }
        }
        "sum" => {
            let start = kwarg(&mut kwargs, "start");
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 1, 2)?;
            let mut total = args.get(1).or(start.as_ref()).cloned().unwrap_or(Value::Int(0));
            if matches!(total, Value::Str(_)) {
                return Err(Exception::type_error(
                    "sum() can't sum strings [use ''.join(seq) instead]",
                ));
            }
            for item in iterate(&args[0])? {
                total = binary_op(BinOp::Add, &total, &item)?;
            }
            Ok(total)
        }
        "zip" => {
            let strict = kwarg(&mut kwargs, "strict").is_some_and(|v| v.truthy());
            reject_extra(name, kwargs)?;
            let columns = args.iter().map(collect).collect::<Result<Vec<_>, _>>()?;
            let shortest = columns.iter().map(Vec::len).min().unwrap_or(0);
            if strict && columns.iter().any(|c| c.len() != shortest) {
                return Err(Exception::value_error("zip() arguments have different lengths"));
            }
            let rows = (0..shortest)
                .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                .collect();
            Ok(Value::iter("zip", rows))
        }
        other => Err(Exception::name(other)),
    }
}

// ----- argument helpers -----

pub(super) fn check_arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), Exception> {
    if args.len() >= min && args.len() <= max {
        return Ok(());
    }
    let plural = |n: usize| if n == 1 { "" } else { "s" };
    let message = if min == max {
        format!(
            "{}() takes exactly {} argument{} ({} given)",
            name,
            min,
            plural(min),
            args.len()
        )
    } else if args.len() < min {
        format!(
            "{}() takes at least {} argument{} ({} given)",
            name,
            min,
            plural(min),
            args.len()
        )
    } else {
        format!(
            "{}() takes at most {} argument{} ({} given)",
            name,
            max,
            plural(max),
            args.len()
        )
    };
    Err(Exception::type_error(message))
}

/// Remove and return a keyword argument.
pub(super) fn kwarg(kwargs: &mut Kwargs, key: &str) -> Option<Value> {
    let pos = kwargs.iter().position(|(k, _)| k == key)?;
    Some(kwargs.remove(pos).1)
}

pub(super) fn reject_extra(name: &str, kwargs: Kwargs) -> Result<(), Exception> {
    match kwargs.into_iter().next() {
        None => Ok(()),
        Some((key, _)) => Err(Exception::type_error(format!(
            "{}() got an unexpected keyword argument '{}'",
            name, key
        ))),
    }
}

pub(super) fn expect_int(value: &Value) -> Result<i64, Exception> {
    if let Value::BigInt(_) = value {
        return Err(Exception::new(
            ExceptionKind::OverflowError,
            "Python int too large to convert to C ssize_t",
        ));
    }
    value.as_int().ok_or_else(|| {
        Exception::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

/// Any integer, widened
pub(super) fn expect_bigint(value: &Value) -> Result<BigInt, Exception> {
    value.as_bigint().ok_or_else(|| {
        Exception::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

pub(super) fn expect_str<'v>(value: &'v Value, what: &str) -> Result<&'v str, Exception> {
    value.as_str().ok_or_else(|| {
        Exception::type_error(format!(
            "{} must be str, not {}",
            what,
            value.type_name()
        ))
    })
}

pub(super) fn expect_f64(value: &Value) -> Result<f64, Exception> {
    if let Value::BigInt(n) = value {
        return int_to_f64(n);
    }
    value.as_f64().ok_or_else(|| {
        Exception::type_error(format!(
            "must be real number, not {}",
            value.type_name()
        ))
    })
}

fn text_option(value: Option<Value>, what: &str, default: &str) -> Result<String, Exception> {
    match value {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(Exception::type_error(format!(
            "{} must be None or a string, not {}",
            what,
            other.type_name()
        ))),
    }
}

// ----- conversions -----

pub(super) fn len(value: &Value) -> Result<i64, Exception> {
    Ok(match value {
        Value::Str(s) => s.chars().count() as i64,
        Value::List(items) => items.borrow().len() as i64,
        Value::Tuple(items) | Value::View(_, items) => items.len() as i64,
        Value::Dict(d) | Value::Set(d) => d.borrow().len() as i64,
        Value::Range(start, stop, step) => range_len(*start, *stop, *step),
        other => {
            return Err(Exception::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    })
}

fn abs(value: &Value) -> Eval {
    match value {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        v => match v.as_bigint() {
            Some(n) => Ok(int_value(n.abs())),
            None => Err(Exception::type_error(format!(
                "bad operand type for abs(): '{}'",
                v.type_name()
            ))),
        },
    }
}

pub(super) fn to_float(value: &Value) -> Result<f64, Exception> {
    match value {
        Value::Str(s) => {
            let text = s.trim();
            let cleaned = if text.contains('_') && !text.contains("__") && !text.starts_with('_') && !text.ends_with('_') {
                text.replace('_', "")
            } else {
                text.to_string()
            };
            cleaned.parse::<f64>().map_err(|_| {
                Exception::value_error(format!("could not convert string to float: {}", repr_str(s)))
            })
        }
        Value::BigInt(n) => int_to_f64(n),
        v => v.as_f64().ok_or_else(|| {
            Exception::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                v.type_name()
            ))
        }),
    }
}

fn to_int(value: &Value) -> Eval {
    match value {
        Value::Float(f) => float_to_value(*f),
        Value::BigInt(_) => Ok(value.clone()),
        v => v.as_int().map(Value::Int).ok_or_else(|| {
            Exception::type_error(format!(
                "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                v.type_name()
            ))
        }),
    }
}

fn parse_int(text: &str, base: i64) -> Eval {
    if base != 0 && !(2..=36).contains(&base) {
        return Err(Exception::value_error("int() base must be >= 2 and <= 36, or 0"));
    }
    let invalid = || {
        Exception::value_error(format!(
            "invalid literal for int() with base {}: {}",
            base,
            repr_str(text)
        ))
    };
    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let lower = unsigned.to_ascii_lowercase();
    let mut radix = if base == 0 { 10 } else { base };
    let mut digits = lower.as_str();
    for (prefix, prefix_base) in [("0x", 16), ("0o", 8), ("0b", 2)] {
        if let Some(rest) = lower.strip_prefix(prefix) {
            if base == 0 || base == prefix_base {
                radix = prefix_base;
                digits = rest.strip_prefix('_').unwrap_or(rest);
            }
        }
    }
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return Err(invalid());
    }
    let digits = digits.replace('_', "");
    if !digits.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(invalid());
    }
    if digits.len() > 100_000 {
        return Err(Exception::value_error(
            "Exceeds the limit (100000 digits) for integer string conversion",
        ));
    }
    let magnitude = parse_digits(&digits, radix as u32).ok_or_else(invalid)?;
    if !negative {
        return Ok(magnitude);
    }
    binary_op(BinOp::Sub, &Value::Int(0), &magnitude)
}

fn round_to_int(value: &Value) -> Eval {
    match value {
        Value::Float(f) => float_to_value(f.round_ties_even()),
        v => v.as_bigint().map(int_value).ok_or_else(|| {
            Exception::type_error(format!(
                "type {} doesn't define __round__ method",
                v.type_name()
            ))
        }),
    }
}

fn round_digits(value: &Value, ndigits: i64) -> Eval {
    match value {
        Value::Float(f) => {
            if !f.is_finite() {
                return Ok(Value::Float(*f));
            }
            if ndigits >= 0 {
                let digits = ndigits.min(330) as usize;
                let text = format!("{:.*}", digits, f);
                return Ok(Value::Float(text.parse().unwrap_or(*f)));
            }
            let scale = 10f64.powi((-ndigits).min(400) as i32);
            Ok(Value::Float((f / scale).round_ties_even() * scale))
        }
        v => {
            let n = v.as_bigint().ok_or_else(|| {
                Exception::type_error(format!(
                    "type {} doesn't define __round__ method",
                    v.type_name()
                ))
            })?;
            if ndigits >= 0 {
                return Ok(int_value(n));
            }
            // Each decimal digit takes more than three bits.
            if ndigits.unsigned_abs() > n.bits() / 3 + 1 {
                return Ok(Value::Int(0));
            }
            let scale = BigInt::from(10).pow(ndigits.unsigned_abs() as u32);
            let (q, r) = n.div_mod_floor(&scale);
            let twice: BigInt = r * 2;
            let q = if twice > scale || (twice == scale && q.is_odd()) { q + 1 } else { q };
            Ok(int_value(q * scale))
        }
    }
}

fn mod_pow(base: &Value, exp: &Value, modulus: &Value) -> Eval {
    let (Some(b), Some(e), Some(m)) = (base.as_bigint(), exp.as_bigint(), modulus.as_bigint()) else {
        return Err(Exception::type_error(
            "pow() 3rd argument not allowed unless all arguments are integers",
        ));
    };
    bignum::mod_pow(&b, &e, &m)
}

// ----- containers -----

/// Fill `dict` from a mapping or an iterable of key/value pairs.
pub(super) fn dict_update(dict: &mut Dict, source: &Value) -> Result<(), Exception> {
    if let Value::Dict(other) = source {
        let entries = other.borrow().entries().to_vec();
        for (k, v) in entries {
            dict.insert(k, v)?;
        }
        return Ok(());
    }
    for (i, item) in iterate(source)?.enumerate() {
        let pair = collect(&item).map_err(|_| {
            Exception::type_error(format!(
                "cannot convert dictionary update sequence element #{} to a sequence",
                i
            ))
        })?;
        if pair.len() != 2 {
            return Err(Exception::value_error(format!(
                "dictionary update sequence element #{} has length {}; 2 is required",
                i,
                pair.len()
            )));
        }
        let mut pair = pair.into_iter();
        if let (Some(k), Some(v)) = (pair.next(), pair.next()) {
            dict.insert(k, v)?;
        }
    }
    Ok(())
}

pub(super) fn to_set(value: &Value) -> Result<Dict, Exception> {
    let mut set = Dict::new();
    for item in iterate(value)? {
        set.insert(item, Value::None)?;
    }
    Ok(set)
}

fn extremum(interp: &mut Interpreter, name: &str, args: Vec<Value>, mut kwargs: Kwargs) -> Eval {
    let key = kwarg(&mut kwargs, "key").filter(|k| !matches!(k, Value::None));
    let default = kwarg(&mut kwargs, "default");
    reject_extra(name, kwargs)?;
    let items = match args.len() {
        0 => {
            return Err(Exception::type_error(format!(
                "{} expected at least 1 argument, got 0",
                name
            )))
        }
        1 => collect(&args[0])?,
        _ => {
            if default.is_some() {
                return Err(Exception::type_error(format!(
                    "Cannot specify a default for {}() with multiple positional arguments",
                    name
                )));
            }
            args
        }
    };
    let op = if name == "max" { CmpOp::Gt } else { CmpOp::Lt };
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let rank = match &key {
            Some(func) => interp.call(func, vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        let better = match &best {
            None => true,
            Some((best_rank, _)) => compare(op, &rank, best_rank)?,
        };
        if better {
            best = Some((rank, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(Exception::value_error(format!("{}() arg is an empty sequence", name))),
    }
}

/// Stable sort with an optional key function. Comparison errors propagate.
pub(super) fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> Result<Vec<Value>, Exception> {
    if items.len() > MAX_SEQUENCE_LEN {
        return Err(memory_error());
    }
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let rank = match &key {
            Some(Value::None) | None => item.clone(),
            Some(func) => interp.call(func, vec![item.clone()], Vec::new())?,
        };
        keyed.push((rank, item));
    }
    Ok(merge_sort(keyed, reverse)?.into_iter().map(|(_, item)| item).collect())
}

fn merge_sort(mut items: Vec<(Value, Value)>, reverse: bool) -> Result<Vec<(Value, Value)>, Exception> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, reverse)?;
    let right = merge_sort(right, reverse)?;

    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let right_first = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) if reverse => py_lt(&l.0, &r.0)?,
            (Some(l), Some(r)) => py_lt(&r.0, &l.0)?,
            _ => break,
        };
        let next = if right_first { right.next() } else { left.next() };
        out.extend(next);
    }
    out.extend(left);
    out.extend(right);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int() {
        let parsed = |text: &str, base: i64| parse_int(text, base).unwrap().repr();
        assert_eq!(parsed(" 42 ", 10), "42");
        assert_eq!(parsed("-0x1f", 0), "-31");
        assert_eq!(parsed("ff", 16), "255");
        assert_eq!(parsed("1_000", 10), "1000");
        assert!(matches!(parse_int("-9223372036854775808", 10).unwrap(), Value::Int(i64::MIN)));
        assert_eq!(parsed("99999999999999999999", 10), "99999999999999999999");
        assert_eq!(parsed("-0b1", 0), "-1");
        let err = parse_int("4.5", 10).unwrap_err();
        assert_eq!(err.message, "invalid literal for int() with base 10: '4.5'");
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round_to_int(&Value::Float(2.5)).unwrap().repr(), "2");
        assert_eq!(round_to_int(&Value::Float(3.5)).unwrap().repr(), "4");
        assert_eq!(round_digits(&Value::Float(3.14159), 2).unwrap().repr(), "3.14");
        assert_eq!(round_digits(&Value::Int(1250), -2).unwrap().repr(), "1200");
        assert_eq!(round_digits(&Value::Int(1350), -2).unwrap().repr(), "1400");
        assert_eq!(round_digits(&Value::Int(1350), -40).unwrap().repr(), "0");
        assert_eq!(round_to_int(&Value::Float(1e20)).unwrap().repr(), "100000000000000000000");
        let big = parse_int("123456789012345678901234567890", 10).unwrap();
        assert_eq!(round_digits(&big, -10).unwrap().repr(), "123456789012345678900000000000");
    }

    #[test]
    fn test_mod_pow() {
        let v = |i| Value::Int(i);
        assert_eq!(mod_pow(&v(3), &v(4), &v(5)).unwrap().repr(), "1");
        assert_eq!(mod_pow(&v(3), &v(-1), &v(7)).unwrap().repr(), "5");
        let exp = parse_int("100000000000000000000", 10).unwrap();
        assert_eq!(mod_pow(&v(7), &exp, &v(13)).unwrap().repr(), "9");
        assert!(mod_pow(&v(2), &v(-1), &v(4)).is_err());
        assert!(mod_pow(&v(2), &v(3), &v(0)).is_err());
        assert!(mod_pow(&v(2), &Value::Float(3.0), &v(5)).is_err());
    }

    #[test]
    fn test_float_conversion() {
        assert_eq!(to_float(&Value::from(" 1.5 ")).unwrap(), 1.5);
        assert!(to_float(&Value::from("inf")).unwrap().is_infinite());
        assert!(to_float(&Value::from("abc")).is_err());
        assert_eq!(to_int(&Value::Float(-2.7)).unwrap().repr(), "-2");
        assert!(to_int(&Value::Float(f64::NAN)).is_err());
        let huge = parse_int(&"1".repeat(400), 10).unwrap();
        assert_eq!(to_float(&huge).unwrap_err().kind, ExceptionKind::OverflowError);
        assert_eq!(expect_int(&huge).unwrap_err().kind, ExceptionKind::OverflowError);
    }
}
