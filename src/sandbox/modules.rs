//! The auxiliary modules: `math`, `random`, `re`, `time`
//!
//! Modules are bound as globals and resolved through [`attr`]. Their
//! functions carry no state of their own; per-run state (RNG, compiled
//! patterns, the monotonic clock origin) lives on the [`Interpreter`].

use super::ast::BinOp;
use super::bignum::{self, float_to_value};
use super::builtins::{check_arity, expect_bigint, expect_f64, expect_int, expect_str, kwarg, reject_extra, Kwargs};
use super::error::{Exception, ExceptionKind};
use super::interp::{binary_op, collect, float_pow, iterate, Eval, Interpreter, MAX_SEQUENCE_LEN};
use super::value::*;
use num_bigint::BigInt;
use num_traits::Signed;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::rc::Rc;
use std::time::Duration;

const MATH_FUNCTIONS: &[&str] = &[
    "sqrt", "isqrt", "floor", "ceil", "trunc", "factorial", "gcd", "lcm", "comb", "perm", "log",
    "log2", "log10", "log1p", "exp", "expm1", "pow", "fabs", "fmod", "modf", "copysign", "sin",
    "cos", "tan", "asin", "acos", "atan", "atan2", "sinh", "cosh", "tanh", "asinh", "acosh",
    "atanh", "degrees", "radians", "hypot", "dist", "isclose", "isfinite", "isinf", "isnan",
    "fsum", "prod",
];

const RANDOM_FUNCTIONS: &[&str] = &[
    "random", "randint", "randrange", "uniform", "choice", "choices", "shuffle", "sample",
    "seed", "gauss",
];

const RE_FUNCTIONS: &[&str] = &[
    "search", "match", "fullmatch", "findall", "finditer", "sub", "split", "compile", "escape",
];

const TIME_FUNCTIONS: &[&str] = &["time", "monotonic", "perf_counter", "sleep", "strftime"];

const RE_IGNORECASE: i64 = 2;
const RE_MULTILINE: i64 = 8;
const RE_DOTALL: i64 = 16;
const RE_VERBOSE: i64 = 64;
const RE_ASCII: i64 = 256;

/// Resolve `module.name`.
pub fn attr(module: &'static str, name: &str) -> Option<Value> {
    let constant = match (module, name) {
        ("math", "pi") => Some(Value::Float(std::f64::consts::PI)),
        ("math", "e") => Some(Value::Float(std::f64::consts::E)),
        ("math", "tau") => Some(Value::Float(std::f64::consts::TAU)),
        ("math", "inf") => Some(Value::Float(f64::INFINITY)),
        ("math", "nan") => Some(Value::Float(f64::NAN)),
        ("re", "I" | "IGNORECASE") => Some(Value::Int(RE_IGNORECASE)),
        ("re", "M" | "MULTILINE") => Some(Value::Int(RE_MULTILINE)),
        ("re", "S" | "DOTALL") => Some(Value::Int(RE_DOTALL)),
        ("re", "X" | "VERBOSE") => Some(Value::Int(RE_VERBOSE)),
        ("re", "A" | "ASCII") => Some(Value::Int(RE_ASCII)),
        _ => None,
    };
    if constant.is_some() {
        return constant;
    }
    let table = match module {
        "math" => MATH_FUNCTIONS,
        "random" => RANDOM_FUNCTIONS,
        "re" => RE_FUNCTIONS,
        "time" => TIME_FUNCTIONS,
        _ => return None,
    };
    table
        .iter()
        .copied()
        .find(|f| *f == name)
        .map(|f| Value::ModuleFn(module, f))
}

pub(super) fn call(interp: &mut Interpreter, module: &str, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Eval {
    match module {
        "math" => math(name, args, kwargs),
        "random" => random(interp, name, args, kwargs),
        "re" => re(interp, name, args, kwargs),
        "time" => time(interp, name, args, kwargs),
        other => Err(Exception::attribute_error(format!(
            "module '{}' has no attribute '{}'",
            other, name
        ))),
    }
}

/// Positional argument `index`, or the keyword `key` in its place.
fn arg(args: &[Value], kwargs: &mut Kwargs, index: usize, key: &str) -> Option<Value> {
    let keyword = kwarg(kwargs, key);
    args.get(index).cloned().or(keyword)
}

// ----- math -----

fn domain_error() -> Exception {
    Exception::value_error("math domain error")
}

fn range_error() -> Exception {
    Exception::new(ExceptionKind::OverflowError, "math range error")
}

fn math_unary(name: &str, x: f64) -> Result<f64, Exception> {
    let result = match name {
        "sqrt" => x.sqrt(),
        "exp" => x.exp(),
        "expm1" => x.exp_m1(),
        "log2" | "log10" | "log" if x <= 0.0 => return Err(domain_error()),
        "log2" => x.log2(),
        "log10" => x.log10(),
        "log" => x.ln(),
        "log1p" if x <= -1.0 => return Err(domain_error()),
        "log1p" => x.ln_1p(),
        "fabs" => x.abs(),
        "sin" => x.sin(),
        "cos" => x.cos(),
        "tan" => x.tan(),
        "asin" => x.asin(),
        "acos" => x.acos(),
        "atan" => x.atan(),
        "sinh" => x.sinh(),
        "cosh" => x.cosh(),
        "tanh" => x.tanh(),
        "asinh" => x.asinh(),
        "acosh" => x.acosh(),
        "atanh" if x.abs() >= 1.0 => return Err(domain_error()),
        "atanh" => x.atanh(),
        "degrees" => x.to_degrees(),
        "radians" => x.to_radians(),
        _ => return Err(domain_error()),
    };
    if result.is_nan() && !x.is_nan() {
        return Err(domain_error());
    }
    if result.is_infinite() && x.is_finite() {
        return Err(range_error());
    }
    Ok(result)
}

fn int_only(value: &Value, what: &str) -> Result<BigInt, Exception> {
    match value {
        Value::Float(_) => Err(Exception::type_error(format!(
            "{} only accepts integral values",
            what
        ))),
        v => expect_bigint(v),
    }
}

/// Natural log of a number, exact in range for integers too large for a float
fn ln(value: &Value) -> Result<f64, Exception> {
    match value {
        Value::BigInt(n) if n.is_positive() => Ok(bignum::ln(n)),
        v => math_unary("log", expect_f64(v)?),
    }
}

/// Compensated summation
fn fsum(values: impl IntoIterator<Item = f64>) -> f64 {
    let (mut sum, mut compensation) = (0.0f64, 0.0f64);
    for x in values {
        let t = sum + x;
        if sum.abs() >= x.abs() {
            compensation += (sum - t) + x;
        } else {
            compensation += (x - t) + sum;
        }
        sum = t;
    }
    sum + compensation
}

fn math(name: &str, args: Vec<Value>, mut kwargs: Kwargs) -> Eval {
    match name {
        "isclose" => {
            let rel_tol = kwarg(&mut kwargs, "rel_tol").map(|v| expect_f64(&v)).transpose()?.unwrap_or(1e-9);
            let abs_tol = kwarg(&mut kwargs, "abs_tol").map(|v| expect_f64(&v)).transpose()?.unwrap_or(0.0);
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 2, 2)?;
            if rel_tol < 0.0 || abs_tol < 0.0 {
                return Err(Exception::value_error("tolerances must be non-negative"));
            }
            let (a, b) = (expect_f64(&args[0])?, expect_f64(&args[1])?);
            if a == b {
                return Ok(Value::Bool(true));
            }
            if a.is_infinite() || b.is_infinite() {
                return Ok(Value::Bool(false));
            }
            let diff = (a - b).abs();
            Ok(Value::Bool(
                diff <= (rel_tol * b.abs()).max(rel_tol * a.abs()) || diff <= abs_tol,
            ))
        }
        "prod" => {
            let start = kwarg(&mut kwargs, "start").unwrap_or(Value::Int(1));
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 1, 1)?;
            let mut total = start;
            for item in iterate(&args[0])? {
                total = binary_op(BinOp::Mul, &total, &item)?;
            }
            Ok(total)
        }
        "log" => {
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 1, 2)?;
            let x = ln(&args[0])?;
            match args.get(1) {
                None => Ok(Value::Float(x)),
                Some(base) => {
                    let base = ln(base)?;
                    if base == 0.0 {
                        return Err(Exception::zero_division("float division by zero"));
                    }
                    Ok(Value::Float(x / base))
                }
            }
        }
        "perm" => {
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 1, 2)?;
            let n = int_only(&args[0], "perm()")?;
            match args.get(1) {
                None | Some(Value::None) => bignum::factorial(&n),
                Some(k) => bignum::perm(&n, &int_only(k, "perm()")?),
            }
        }
        "gcd" | "lcm" => {
            reject_extra(name, kwargs)?;
            let ints = args
                .iter()
                .map(|v| int_only(v, &format!("{}()", name)))
                .collect::<Result<Vec<_>, _>>()?;
            if name == "gcd" {
                return Ok(bignum::gcd(&ints));
            }
            bignum::lcm(&ints)
        }
        "hypot" => {
            reject_extra(name, kwargs)?;
            let coords = args.iter().map(expect_f64).collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Float(coords.iter().map(|x| x * x).sum::<f64>().sqrt()))
        }
        "fsum" => {
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 1, 1)?;
            let values = iterate(&args[0])?.map(|v| expect_f64(&v)).collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Float(fsum(values)))
        }
        _ => {
            reject_extra(name, kwargs)?;
            math_positional(name, &args)
        }
    }
}

fn math_positional(name: &str, args: &[Value]) -> Eval {
    match name {
        "floor" | "ceil" | "trunc" => {
            check_arity(name, args, 1, 1)?;
            match &args[0] {
                Value::Float(f) => float_to_value(match name {
                    "floor" => f.floor(),
                    "ceil" => f.ceil(),
                    _ => f.trunc(),
                }),
                v => v.as_bigint().map(bignum::int_value).ok_or_else(|| {
                    Exception::type_error(format!("must be real number, not {}", v.type_name()))
                }),
            }
        }
        "isqrt" => {
            check_arity(name, args, 1, 1)?;
            bignum::isqrt(&int_only(&args[0], "isqrt()")?)
        }
        "factorial" => {
            check_arity(name, args, 1, 1)?;
            bignum::factorial(&int_only(&args[0], "factorial()")?)
        }
        "comb" => {
            check_arity(name, args, 2, 2)?;
            bignum::comb(&int_only(&args[0], "comb()")?, &int_only(&args[1], "comb()")?)
        }
        "pow" => {
            check_arity(name, args, 2, 2)?;
            let (x, y) = (expect_f64(&args[0])?, expect_f64(&args[1])?);
            match float_pow(x, y) {
                Ok(r) => Ok(Value::Float(r)),
                Err(e) if e.kind == ExceptionKind::OverflowError => Err(range_error()),
                Err(_) => Err(domain_error()),
            }
        }
        "fmod" => {
            check_arity(name, args, 2, 2)?;
            let (x, y) = (expect_f64(&args[0])?, expect_f64(&args[1])?);
            if y == 0.0 || x.is_infinite() {
                return Err(domain_error());
            }
            Ok(Value::Float(x % y))
        }
        "modf" => {
            check_arity(name, args, 1, 1)?;
            let x = expect_f64(&args[0])?;
            let int_part = x.trunc();
            let frac = if x.is_infinite() { 0.0f64.copysign(x) } else { x - int_part };
            Ok(Value::tuple(vec![Value::Float(frac), Value::Float(int_part)]))
        }
        "copysign" | "atan2" => {
            check_arity(name, args, 2, 2)?;
            let (x, y) = (expect_f64(&args[0])?, expect_f64(&args[1])?);
            Ok(Value::Float(if name == "copysign" { x.copysign(y) } else { x.atan2(y) }))
        }
        "dist" => {
            check_arity(name, args, 2, 2)?;
            let (p, q) = (collect(&args[0])?, collect(&args[1])?);
            if p.len() != q.len() {
                return Err(Exception::value_error("both points must have the same number of dimensions"));
            }
            let mut total = 0.0;
            for (a, b) in p.iter().zip(&q) {
                let d = expect_f64(a)? - expect_f64(b)?;
                total += d * d;
            }
            Ok(Value::Float(total.sqrt()))
        }
        "isfinite" | "isinf" | "isnan" => {
            check_arity(name, args, 1, 1)?;
            let x = expect_f64(&args[0])?;
            Ok(Value::Bool(match name {
                "isfinite" => x.is_finite(),
                "isinf" => x.is_infinite(),
                _ => x.is_nan(),
            }))
        }
        "log2" | "log10" if matches!(args, [Value::BigInt(_)]) => {
            let base = if name == "log2" { std::f64::consts::LN_2 } else { std::f64::consts::LN_10 };
            Ok(Value::Float(ln(&args[0])? / base))
        }
        _ => {
            check_arity(name, args, 1, 1)?;
            math_unary(name, expect_f64(&args[0])?).map(Value::Float)
        }
    }
}

// ----- random -----

/// FNV-1a, used to turn string seeds into RNG seeds
fn fnv1a(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ b as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

fn population(value: &Value) -> Result<Vec<Value>, Exception> {
    match value {
        Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Range(..) => collect(value),
        other => Err(Exception::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn empty_range() -> Exception {
    Exception::value_error("empty range for randrange()")
}

fn random(interp: &mut Interpreter, name: &str, args: Vec<Value>, mut kwargs: Kwargs) -> Eval {
    match name {
        "random" => {
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 0, 0)?;
            Ok(Value::Float(interp.rng.gen::<f64>()))
        }
        "randint" => {
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 2, 2)?;
            let (a, b) = (expect_int(&args[0])?, expect_int(&args[1])?);
            if a > b {
                return Err(empty_range());
            }
            Ok(Value::Int(interp.rng.gen_range(a..=b)))
        }
        "randrange" => {
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 1, 3)?;
            let bounds = args.iter().map(expect_int).collect::<Result<Vec<_>, _>>()?;
            let (start, stop, step) = match bounds.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return Err(empty_range()),
            };
            if step == 0 {
                return Err(Exception::value_error("zero step for randrange()"));
            }
            let n = range_len(start, stop, step);
            if n <= 0 {
                return Err(empty_range());
            }
            Ok(Value::Int(start + step * interp.rng.gen_range(0..n)))
        }
        "uniform" => {
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 2, 2)?;
            let (a, b) = (expect_f64(&args[0])?, expect_f64(&args[1])?);
            Ok(Value::Float(a + (b - a) * interp.rng.gen::<f64>()))
        }
        "gauss" => {
            let mu = arg(&args, &mut kwargs, 0, "mu").map(|v| expect_f64(&v)).transpose()?.unwrap_or(0.0);
            let sigma = arg(&args, &mut kwargs, 1, "sigma").map(|v| expect_f64(&v)).transpose()?.unwrap_or(1.0);
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 0, 2)?;
            let u1: f64 = 1.0 - interp.rng.gen::<f64>();
            let u2: f64 = interp.rng.gen();
            let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
            Ok(Value::Float(mu + sigma * z))
        }
        "choice" => {
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 1, 1)?;
            let items = population(&args[0])?;
            items
                .choose(&mut interp.rng)
                .cloned()
                .ok_or_else(|| Exception::index_error("Cannot choose from an empty sequence"))
        }
        "choices" => {
            let weights = arg(&args, &mut kwargs, 1, "weights").filter(|v| !matches!(v, Value::None));
            let cum_weights = kwarg(&mut kwargs, "cum_weights").filter(|v| !matches!(v, Value::None));
            let k = kwarg(&mut kwargs, "k").map(|v| expect_int(&v)).transpose()?.unwrap_or(1);
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 1, 2)?;
            let items = population(&args[0])?;
            if items.is_empty() {
                return Err(Exception::index_error("Cannot choose from an empty sequence"));
            }
            if k.max(0) as usize > MAX_SEQUENCE_LEN {
                return Err(super::interp::memory_error());
            }
            let cumulative = match (weights, cum_weights) {
                (Some(_), Some(_)) => {
                    return Err(Exception::type_error(
                        "Cannot specify both weights and cumulative weights",
                    ))
                }
                (Some(w), None) => {
                    let mut running = 0.0;
                    let mut out = Vec::new();
                    for w in collect(&w)? {
                        running += expect_f64(&w)?;
                        out.push(running);
                    }
                    Some(out)
                }
                (None, Some(c)) => Some(collect(&c)?.iter().map(expect_f64).collect::<Result<Vec<_>, _>>()?),
                (None, None) => None,
            };
            let mut picked = Vec::new();
            for _ in 0..k.max(0) {
                let index = match &cumulative {
                    None => interp.rng.gen_range(0..items.len()),
                    Some(cum) => {
                        if cum.len() != items.len() {
                            return Err(Exception::value_error(
                                "The number of weights does not match the population",
                            ));
                        }
                        let total = cum.last().copied().unwrap_or(0.0);
                        if !(total > 0.0) || !total.is_finite() {
                            return Err(Exception::value_error("Total of weights must be greater than zero"));
                        }
                        let target = interp.rng.gen::<f64>() * total;
                        cum.partition_point(|c| *c <= target).min(items.len() - 1)
                    }
                };
                picked.push(items[index].clone());
            }
            Ok(Value::list(picked))
        }
        "shuffle" => {
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::List(items) => {
                    items.borrow_mut().shuffle(&mut interp.rng);
                    Ok(Value::None)
                }
                other => Err(Exception::type_error(format!(
                    "'{}' object does not support item assignment",
                    other.type_name()
                ))),
            }
        }
        "sample" => {
            let k = arg(&args, &mut kwargs, 1, "k");
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 1, 2)?;
            let items = population(&args[0])?;
            let k = match k {
                Some(k) => expect_int(&k)?,
                None => return Err(Exception::type_error("sample() missing 1 required positional argument: 'k'")),
            };
            if k < 0 || k as usize > items.len() {
                return Err(Exception::value_error("Sample larger than population or is negative"));
            }
            let chosen = rand::seq::index::sample(&mut interp.rng, items.len(), k as usize);
            Ok(Value::list(chosen.iter().map(|i| items[i].clone()).collect()))
        }
        "seed" => {
            let seed = arg(&args, &mut kwargs, 0, "a");
            reject_extra(name, kwargs)?;
            check_arity(name, &args, 0, 1)?;
            interp.rng = match seed {
                None | Some(Value::None) => rand::rngs::StdRng::from_entropy(),
                Some(Value::Str(s)) => rand::rngs::StdRng::seed_from_u64(fnv1a(&s)),
                Some(Value::Float(f)) => rand::rngs::StdRng::seed_from_u64(f.to_bits()),
                Some(v) => rand::rngs::StdRng::seed_from_u64(expect_int(&v).map_err(|_| {
                    Exception::type_error(
                        "The only supported seed types are: None, int, float, str",
                    )
                })? as u64),
            };
            Ok(Value::None)
        }
        _ => Err(Exception::attribute_error(format!(
            "module 'random' has no attribute '{}'",
            name
        ))),
    }
}

// ----- time -----

fn time(interp: &mut Interpreter, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Eval {
    reject_extra(name, kwargs)?;
    match name {
        "time" => {
            check_arity(name, &args, 0, 0)?;
            Ok(Value::Float(chrono::Utc::now().timestamp_micros() as f64 / 1e6))
        }
        "monotonic" | "perf_counter" => {
            check_arity(name, &args, 0, 0)?;
            Ok(Value::Float(interp.started.elapsed().as_secs_f64()))
        }
        "sleep" => {
            check_arity(name, &args, 1, 1)?;
            let secs = expect_f64(&args[0])?;
            if !(secs >= 0.0) || !secs.is_finite() {
                return Err(Exception::value_error("sleep length must be non-negative"));
            }
            std::thread::sleep(Duration::from_secs_f64(secs));
            Ok(Value::None)
        }
        "strftime" => {
            check_arity(name, &args, 1, 1)?;
            let format = expect_str(&args[0], "strftime() argument 1")?;
            let items = chrono::format::StrftimeItems::new(format).collect::<Vec<_>>();
            if items.iter().any(|item| matches!(item, chrono::format::Item::Error)) {
                return Err(Exception::value_error("Invalid format string"));
            }
            let now = chrono::Local::now();
            Ok(Value::from(now.format_with_items(items.into_iter()).to_string()))
        }
        _ => Err(Exception::attribute_error(format!(
            "module 'time' has no attribute '{}'",
            name
        ))),
    }
}

// ----- re -----

/// Rewrite the few Python-only escapes the regex engine spells differently.
fn translate_pattern(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('Z') => out.push_str("\\z"),
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn compile(interp: &mut Interpreter, source: &str, flags: i64) -> Result<Rc<PatternData>, Exception> {
    let key = (source.to_string(), flags);
    if let Some(cached) = interp.regex_cache.get(&key) {
        return Ok(cached.clone());
    }
    let regex = regex::RegexBuilder::new(&translate_pattern(source))
        .case_insensitive(flags & RE_IGNORECASE != 0)
        .multi_line(flags & RE_MULTILINE != 0)
        .dot_matches_new_line(flags & RE_DOTALL != 0)
        .ignore_whitespace(flags & RE_VERBOSE != 0)
        .build()
        .map_err(|e| {
            let detail = e.to_string();
            let reason = detail.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("invalid pattern");
            Exception::value_error(format!(
                "bad pattern {}: {}",
                repr_str(source),
                reason.trim().trim_start_matches("error: ")
            ))
        })?;
    let pattern = Rc::new(PatternData {
        source: Rc::from(source),
        flags,
        regex,
    });
    interp.regex_cache.insert(key, pattern.clone());
    Ok(pattern)
}

/// Variant of `pattern` that only matches when it reaches the end of the text
fn full_variant(interp: &mut Interpreter, pattern: &PatternData) -> Result<Rc<PatternData>, Exception> {
    let separator = if pattern.flags & RE_VERBOSE != 0 { "\n" } else { "" };
    let source = format!("(?:{}{})\\z", pattern.source, separator);
    compile(interp, &source, pattern.flags)
}

fn pattern_arg(interp: &mut Interpreter, value: &Value, flags: i64) -> Result<Rc<PatternData>, Exception> {
    match value {
        Value::Pattern(p) => {
            if flags != 0 {
                return Err(Exception::value_error(
                    "cannot process flags argument with a compiled pattern",
                ));
            }
            Ok(p.clone())
        }
        Value::Str(s) => compile(interp, s, flags),
        other => Err(Exception::type_error(format!(
            "first argument must be string or compiled pattern, not {}",
            other.type_name()
        ))),
    }
}

fn text_arg(value: &Value) -> Result<Rc<str>, Exception> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => Err(Exception::type_error(format!(
            "expected string or bytes-like object, got '{}'",
            other.type_name()
        ))),
    }
}

fn byte_offset(text: &str, pos: Option<Value>) -> Result<usize, Exception> {
    let Some(pos) = pos else {
        return Ok(0);
    };
    let pos = expect_int(&pos)?.max(0) as usize;
    Ok(text.char_indices().nth(pos).map(|(b, _)| b).unwrap_or(text.len()))
}

fn make_match(pattern: &Rc<PatternData>, text: &Rc<str>, caps: &regex::Captures) -> Value {
    let groups = (0..caps.len())
        .map(|i| caps.get(i).map(|m| (m.start(), m.end())))
        .collect();
    Value::Match(Rc::new(MatchData {
        text: text.clone(),
        groups,
        pattern: pattern.clone(),
    }))
}

#[derive(Clone, Copy, PartialEq)]
enum Anchor {
    Search,
    Start,
    Full,
}

fn find(interp: &mut Interpreter, pattern: &Rc<PatternData>, text: &Rc<str>, pos: usize, anchor: Anchor) -> Eval {
    let (engine, public) = match anchor {
        Anchor::Full => (full_variant(interp, pattern)?, pattern.clone()),
        _ => (pattern.clone(), pattern.clone()),
    };
    let Some(caps) = engine.regex.captures_at(text, pos) else {
        return Ok(Value::None);
    };
    let starts_at_pos = caps.get(0).is_some_and(|m| m.start() == pos);
    if anchor != Anchor::Search && !starts_at_pos {
        return Ok(Value::None);
    }
    Ok(make_match(&public, text, &caps))
}

fn findall(pattern: &PatternData, text: &str) -> Value {
    let group_count = pattern.regex.captures_len() - 1;
    let group = |caps: &regex::Captures, i: usize| Value::from(caps.get(i).map_or("", |m| m.as_str()));
    let items = pattern
        .regex
        .captures_iter(text)
        .map(|caps| match group_count {
            0 => group(&caps, 0),
            1 => group(&caps, 1),
            n => Value::tuple((1..=n).map(|i| group(&caps, i)).collect()),
        })
        .collect();
    Value::list(items)
}

fn finditer(pattern: &Rc<PatternData>, text: &Rc<str>) -> Value {
    let matches = pattern
        .regex
        .captures_iter(text)
        .map(|caps| make_match(pattern, text, &caps))
        .collect();
    Value::iter("callable_iterator", matches)
}

/// Expand a replacement template such as `\1-\g<name>` against one match.
fn expand_template(template: &str, caps: &regex::Captures, pattern: &PatternData) -> Result<String, Exception> {
    let bad_group = |reference: &str| {
        Exception::new(
            ExceptionKind::IndexError,
            format!("invalid group reference {}", reference),
        )
    };
    let group_text = |index: usize| caps.get(index).map_or("", |m| m.as_str());

    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            None => return Err(Exception::value_error("bad escape (end of pattern)")),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('g') => {
                if chars.next() != Some('<') {
                    return Err(Exception::value_error("missing <"));
                }
                let mut reference = String::new();
                loop {
                    match chars.next() {
                        Some('>') => break,
                        Some(c) => reference.push(c),
                        None => return Err(Exception::value_error("missing >, unterminated name")),
                    }
                }
                let index = match reference.parse::<usize>() {
                    Ok(i) => i,
                    Err(_) => pattern
                        .regex
                        .capture_names()
                        .position(|n| n == Some(reference.as_str()))
                        .ok_or_else(|| Exception::new(
                            ExceptionKind::IndexError,
                            format!("unknown group name '{}'", reference),
                        ))?,
                };
                if index >= caps.len() {
                    return Err(bad_group(&reference));
                }
                out.push_str(group_text(index));
            }
            Some(d) if d.is_ascii_digit() => {
                let mut reference = d.to_string();
                if let Some(next) = chars.peek().copied().filter(char::is_ascii_digit) {
                    reference.push(next);
                    chars.next();
                }
                let index: usize = reference.parse().unwrap_or(0);
                if index >= caps.len() {
                    return Err(bad_group(&reference));
                }
                out.push_str(group_text(index));
            }
            Some(other) if other.is_ascii_alphabetic() => {
                return Err(Exception::value_error(format!("bad escape \\{}", other)));
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

fn substitute(
    interp: &mut Interpreter,
    pattern: &Rc<PatternData>,
    repl: &Value,
    text: &Rc<str>,
    count: i64,
) -> Eval {
    if !matches!(
        repl,
        Value::Str(_) | Value::Function(_) | Value::Builtin(_) | Value::ModuleFn(..) | Value::Method(_)
    ) {
        return Err(Exception::type_error(format!(
            "expected str instance, {} found",
            repl.type_name()
        )));
    }
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (n, caps) in pattern.regex.captures_iter(text).enumerate() {
        if count > 0 && n as i64 >= count {
            break;
        }
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&text[last..whole.start()]);
        let replacement = match repl {
            Value::Str(template) => expand_template(template, &caps, pattern)?,
            func => match interp.call(func, vec![make_match(pattern, text, &caps)], Vec::new())? {
                Value::Str(s) => s.to_string(),
                other => {
                    return Err(Exception::type_error(format!(
                        "expected str instance, {} found",
                        other.type_name()
                    )))
                }
            },
        };
        out.push_str(&replacement);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(Value::from(out))
}

fn split(pattern: &PatternData, text: &str, maxsplit: i64) -> Value {
    let mut parts = Vec::new();
    let mut last = 0;
    for (n, caps) in pattern.regex.captures_iter(text).enumerate() {
        if maxsplit > 0 && n as i64 >= maxsplit {
            break;
        }
        let Some(whole) = caps.get(0) else { continue };
        parts.push(Value::from(&text[last..whole.start()]));
        for i in 1..caps.len() {
            parts.push(caps.get(i).map_or(Value::None, |m| Value::from(m.as_str())));
        }
        last = whole.end();
    }
    parts.push(Value::from(&text[last..]));
    Value::list(parts)
}

fn re(interp: &mut Interpreter, name: &str, args: Vec<Value>, mut kwargs: Kwargs) -> Eval {
    if name == "escape" {
        reject_extra(name, kwargs)?;
        check_arity(name, &args, 1, 1)?;
        return Ok(Value::from(regex::escape(expect_str(&args[0], "escape() argument")?)));
    }
    // Position of the trailing `flags` argument
    let flags_at = match name {
        "compile" => 1,
        "sub" => 4,
        "split" => 3,
        _ => 2,
    };
    let flags = match arg(&args, &mut kwargs, flags_at, "flags") {
        Some(v) => expect_int(&v)?,
        None => 0,
    };
    let extra = match name {
        "sub" => arg(&args, &mut kwargs, 3, "count"),
        "split" => arg(&args, &mut kwargs, 2, "maxsplit"),
        _ => None,
    };
    let repl = if name == "sub" { arg(&args, &mut kwargs, 1, "repl") } else { None };
    let string_at = if name == "sub" { 2 } else { 1 };
    let string = arg(&args, &mut kwargs, string_at, "string");
    let source = arg(&args, &mut kwargs, 0, "pattern");
    reject_extra(name, kwargs)?;
    check_arity(name, &args, 0, flags_at + 1)?;

    let missing = |what: &str| Exception::type_error(format!("{}() missing required argument '{}'", name, what));
    let pattern = pattern_arg(interp, &source.ok_or_else(|| missing("pattern"))?, flags)?;
    if name == "compile" {
        return Ok(Value::Pattern(pattern));
    }
    let text = text_arg(&string.ok_or_else(|| missing("string"))?)?;
    match name {
        "search" => find(interp, &pattern, &text, 0, Anchor::Search),
        "match" => find(interp, &pattern, &text, 0, Anchor::Start),
        "fullmatch" => find(interp, &pattern, &text, 0, Anchor::Full),
        "findall" => Ok(findall(&pattern, &text)),
        "finditer" => Ok(finditer(&pattern, &text)),
        "sub" => {
            let count = extra.map(|v| expect_int(&v)).transpose()?.unwrap_or(0);
            let repl = repl.ok_or_else(|| missing("repl"))?;
            substitute(interp, &pattern, &repl, &text, count)
        }
        "split" => {
            let maxsplit = extra.map(|v| expect_int(&v)).transpose()?.unwrap_or(0);
            Ok(split(&pattern, &text, maxsplit))
        }
        _ => Err(Exception::attribute_error(format!(
            "module 're' has no attribute '{}'",
            name
        ))),
    }
}

/// Methods of a compiled pattern
pub(super) fn pattern_method(
    interp: &mut Interpreter,
    pattern: &Rc<PatternData>,
    name: &str,
    args: Vec<Value>,
    mut kwargs: Kwargs,
) -> Eval {
    let (string_at, extra_key) = match name {
        "sub" => (1, "count"),
        "split" => (0, "maxsplit"),
        _ => (0, "pos"),
    };
    let repl = if name == "sub" { arg(&args, &mut kwargs, 0, "repl") } else { None };
    let extra = arg(&args, &mut kwargs, string_at + 1, extra_key);
    let string = arg(&args, &mut kwargs, string_at, "string");
    reject_extra(name, kwargs)?;
    check_arity(name, &args, 0, string_at + 2)?;
    let text = text_arg(&string.ok_or_else(|| {
        Exception::type_error(format!("{}() missing required argument 'string'", name))
    })?)?;

    match name {
        "search" | "match" | "fullmatch" => {
            let pos = byte_offset(&text, extra)?;
            let anchor = match name {
                "search" => Anchor::Search,
                "match" => Anchor::Start,
                _ => Anchor::Full,
            };
            find(interp, pattern, &text, pos, anchor)
        }
        "findall" => Ok(findall(pattern, &text)),
        "finditer" => Ok(finditer(pattern, &text)),
        "sub" => {
            let count = extra.map(|v| expect_int(&v)).transpose()?.unwrap_or(0);
            let repl = repl.ok_or_else(|| Exception::type_error("sub() missing required argument 'repl'"))?;
            substitute(interp, pattern, &repl, &text, count)
        }
        "split" => {
            let maxsplit = extra.map(|v| expect_int(&v)).transpose()?.unwrap_or(0);
            Ok(split(pattern, &text, maxsplit))
        }
        _ => Err(Exception::attribute_error(format!(
            "'re.Pattern' object has no attribute '{}'",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_functions() {
        let call = |name: &str, args: &[i64]| {
            let args = args.iter().map(|i| Value::Int(*i)).collect();
            math(name, args, Vec::new()).unwrap().repr()
        };
        assert_eq!(call("factorial", &[5]), "120");
        assert_eq!(call("factorial", &[21]), "51090942171709440000");
        assert_eq!(call("comb", &[5, 2]), "10");
        assert_eq!(call("comb", &[2, 5]), "0");
        assert_eq!(call("perm", &[5, 2]), "20");
        assert_eq!(call("isqrt", &[17]), "4");
        assert_eq!(call("isqrt", &[i64::MAX]), "3037000499");
        assert_eq!(call("gcd", &[-12, 18]), "6");
        assert_eq!(call("lcm", &[4, 6, 10]), "60");
        assert_eq!(call("floor", &[7]), "7");

        let err = math("factorial", vec![Value::Int(-1)], Vec::new()).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::ValueError);
        let err = math("factorial", vec![Value::Float(3.0)], Vec::new()).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::TypeError);
        let floor = math("floor", vec![Value::Float(1e20)], Vec::new()).unwrap();
        assert_eq!(floor.repr(), "100000000000000000000");
        let huge = bignum::int_value(BigInt::from(10).pow(400));
        let log = math("log10", vec![huge], Vec::new()).unwrap();
        assert!(matches!(log, Value::Float(f) if (f - 400.0).abs() < 1e-9));
    }

    #[test]
    fn test_math_domain_errors() {
        assert_eq!(math_unary("sqrt", -1.0).unwrap_err().message, "math domain error");
        assert_eq!(math_unary("log", 0.0).unwrap_err().message, "math domain error");
        assert_eq!(math_unary("exp", 1000.0).unwrap_err().kind, ExceptionKind::OverflowError);
        assert_eq!(math_unary("sqrt", 16.0).unwrap(), 4.0);
    }

    #[test]
    fn test_fsum_is_compensated() {
        assert_eq!(fsum(vec![0.1; 10]), 1.0);
    }

    #[test]
    fn test_pattern_translation() {
        assert_eq!(translate_pattern(r"abc\Z"), r"abc\z");
        assert_eq!(translate_pattern(r"\\Z"), r"\\Z");
    }

    #[test]
    fn test_module_attributes() {
        assert!(matches!(attr("math", "sqrt"), Some(Value::ModuleFn("math", "sqrt"))));
        assert!(matches!(attr("re", "IGNORECASE"), Some(Value::Int(2))));
        assert!(attr("math", "system").is_none());
        assert!(attr("time", "sleep").is_some());
    }
}
