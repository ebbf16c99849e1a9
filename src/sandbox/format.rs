//! Number and string formatting
//!
//! Covers `repr` of floats, the format-spec mini-language used by f-strings
//! and `str.format`, and printf-style `%` formatting.

use super::bignum::{float_to_value, int_to_f64};
use super::error::{Exception, ExceptionKind};
use super::value::{Dict, Value};
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};

/// Shortest round-tripping float text, switching to exponent notation
/// outside `1e-4 <= |x| < 1e16`.
pub fn float_repr(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if x == 0.0 {
        return if x.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let sci = format!("{:e}", x);
    let (mantissa, exp) = split_exponent(&sci);
    if !(-4..16).contains(&exp) {
        return format!("{}e{}{:02}", mantissa, if exp < 0 { '-' } else { '+' }, exp.abs());
    }
    let plain = format!("{}", x);
    if plain.contains('.') {
        plain
    } else {
        plain + ".0"
    }
}

fn split_exponent(sci: &str) -> (&str, i32) {
    match sci.split_once('e') {
        Some((mantissa, exp)) => (mantissa, exp.parse().unwrap_or(0)),
        None => (sci, 0),
    }
}

/// Parsed `[[fill]align][sign][#][0][width][grouping][.precision][type]`
#[derive(Debug, Clone, PartialEq)]
pub struct FormatSpec {
    pub fill: char,
    pub align: Option<char>,
    pub sign: char,
    pub alternate: bool,
    pub width: usize,
    pub grouping: Option<char>,
    pub precision: Option<usize>,
    pub kind: Option<char>,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: '-',
            alternate: false,
            width: 0,
            grouping: None,
            precision: None,
            kind: None,
        }
    }
}

fn invalid_spec() -> Exception {
    Exception::value_error("Invalid format specifier")
}

impl FormatSpec {
    pub fn parse(spec: &str) -> Result<Self, Exception> {
        let chars: Vec<char> = spec.chars().collect();
        let mut out = FormatSpec::default();
        let mut i = 0;
        let is_align = |c: char| matches!(c, '<' | '>' | '=' | '^');

        if chars.len() >= 2 && is_align(chars[1]) {
            out.fill = chars[0];
            out.align = Some(chars[1]);
            i = 2;
        } else if !chars.is_empty() && is_align(chars[0]) {
            out.align = Some(chars[0]);
            i = 1;
        }
        if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
            out.sign = c;
            i += 1;
        }
        if chars.get(i) == Some(&'z') {
            i += 1;
        }
        if chars.get(i) == Some(&'#') {
            out.alternate = true;
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            if out.align.is_none() {
                out.fill = '0';
                out.align = Some('=');
            }
            i += 1;
        }
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i > start {
            let digits: String = chars[start..i].iter().collect();
            out.width = digits.parse().map_err(|_| invalid_spec())?;
        }
        if let Some(&c @ (',' | '_')) = chars.get(i) {
            out.grouping = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i == start {
                return Err(Exception::value_error("Format specifier missing precision"));
            }
            let digits: String = chars[start..i].iter().collect();
            out.precision = Some(digits.parse().map_err(|_| invalid_spec())?);
        }
        match chars.len() - i {
            0 => {}
            1 => out.kind = Some(chars[i]),
            _ => return Err(invalid_spec()),
        }
        Ok(out)
    }
}

/// `format(value, spec)`
pub fn format_value(value: &Value, spec: &str) -> Result<String, Exception> {
    if spec.is_empty() {
        return value.try_to_str();
    }
    let spec = FormatSpec::parse(spec)?;
    format_with(value, &spec)
}

pub fn format_with(value: &Value, spec: &FormatSpec) -> Result<String, Exception> {
    match value {
        Value::Str(s) => format_str(s, spec),
        Value::Bool(b) => format_int(&BigInt::from(*b as i64), spec),
        Value::Int(i) => format_int(&BigInt::from(*i), spec),
        Value::BigInt(n) => format_int(n, spec),
        Value::Float(f) => format_float(*f, spec),
        other => {
            if *spec == FormatSpec::default() {
                other.try_to_str()
            } else {
                Err(Exception::type_error(format!(
                    "unsupported format string passed to {}.__format__",
                    other.type_name()
                )))
            }
        }
    }
}

fn unknown_code(kind: char, type_name: &str) -> Exception {
    Exception::value_error(format!(
        "Unknown format code '{}' for object of type '{}'",
        kind, type_name
    ))
}

fn format_str(s: &str, spec: &FormatSpec) -> Result<String, Exception> {
    if !matches!(spec.kind, None | Some('s')) {
        return Err(unknown_code(spec.kind.unwrap_or('s'), "str"));
    }
    if spec.sign != '-' {
        return Err(Exception::value_error("Sign not allowed in string format specifier"));
    }
    if spec.align == Some('=') {
        return Err(Exception::value_error(
            "'=' alignment not allowed in string format specifier",
        ));
    }
    let body: String = match spec.precision {
        Some(p) => s.chars().take(p).collect(),
        None => s.to_string(),
    };
    Ok(pad("", &body, spec, '<'))
}

fn sign_prefix(negative: bool, spec: &FormatSpec) -> &'static str {
    match (negative, spec.sign) {
        (true, _) => "-",
        (false, '+') => "+",
        (false, ' ') => " ",
        _ => "",
    }
}

fn format_int(n: &BigInt, spec: &FormatSpec) -> Result<String, Exception> {
    let kind = spec.kind.unwrap_or('d');
    if matches!(kind, 'e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') {
        return format_float(int_to_f64(n)?, spec);
    }
    if spec.precision.is_some() {
        return Err(Exception::value_error(
            "Precision not allowed in integer format specifier",
        ));
    }
    let magnitude = n.magnitude();
    let (prefix, digits) = match kind {
        'd' | 'n' => ("", magnitude.to_string()),
        'b' => ("0b", magnitude.to_str_radix(2)),
        'o' => ("0o", magnitude.to_str_radix(8)),
        'x' => ("0x", magnitude.to_str_radix(16)),
        'X' => ("0X", magnitude.to_str_radix(16).to_uppercase()),
        'c' => {
            let c = n
                .to_u32()
                .and_then(char::from_u32)
                .ok_or_else(|| Exception::new(ExceptionKind::OverflowError, "%c arg not in range(0x110000)"))?;
            return Ok(pad("", &c.to_string(), spec, '<'));
        }
        other => return Err(unknown_code(other, "int")),
    };
    let digits = match spec.grouping {
        Some(sep) => {
            let every = if matches!(kind, 'b' | 'o' | 'x' | 'X') { 4 } else { 3 };
            group_digits(&digits, sep, every)
        }
        None => digits,
    };
    let mut head = sign_prefix(n.is_negative(), spec).to_string();
    if spec.alternate {
        head.push_str(prefix);
    }
    Ok(pad(&head, &digits, spec, '>'))
}

fn format_float(x: f64, spec: &FormatSpec) -> Result<String, Exception> {
    let kind = spec.kind;
    if let Some(k) = kind {
        if !matches!(k, 'e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%' | 'n') {
            return Err(unknown_code(k, "float"));
        }
    }
    let negative = x.is_sign_negative() && !x.is_nan();
    let abs = x.abs();
    let upper = matches!(kind, Some('E' | 'F' | 'G'));

    let mut body = if !abs.is_finite() {
        let text = if abs.is_nan() { "nan" } else { "inf" };
        let text = if upper { text.to_uppercase() } else { text.to_string() };
        if kind == Some('%') {
            text + "%"
        } else {
            text
        }
    } else {
        match kind {
            Some('f' | 'F') => fixed(abs, spec.precision.unwrap_or(6), spec.alternate),
            Some('e' | 'E') => exponent(abs, spec.precision.unwrap_or(6), upper, spec.alternate),
            Some('g' | 'G' | 'n') => general(abs, spec.precision.unwrap_or(6), upper, spec.alternate, false),
            Some('%') => fixed(abs * 100.0, spec.precision.unwrap_or(6), spec.alternate) + "%",
            _ => match spec.precision {
                Some(p) => general(abs, p, false, spec.alternate, true),
                None => float_repr(abs),
            },
        }
    };

    if let Some(sep) = spec.grouping {
        let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
        let (int_part, rest) = body.split_at(split);
        body = group_digits(int_part, sep, 3) + rest;
    }
    Ok(pad(sign_prefix(negative, spec), &body, spec, '>'))
}

fn fixed(x: f64, precision: usize, alternate: bool) -> String {
    let mut s = format!("{:.*}", precision, x);
    if alternate && precision == 0 {
        s.push('.');
    }
    s
}

fn exponent(x: f64, precision: usize, upper: bool, alternate: bool) -> String {
    let sci = format!("{:.*e}", precision, x);
    let (mantissa, exp) = split_exponent(&sci);
    let mut mantissa = mantissa.to_string();
    if alternate && precision == 0 {
        mantissa.push('.');
    }
    let e = if upper { 'E' } else { 'e' };
    format!("{}{}{}{:02}", mantissa, e, if exp < 0 { '-' } else { '+' }, exp.abs())
}

/// The `g` presentation; `repr_style` keeps at least one fractional digit
/// as the type-less form does.
fn general(x: f64, precision: usize, upper: bool, alternate: bool, repr_style: bool) -> String {
    let p = precision.max(1);
    let exp = if x == 0.0 {
        0
    } else {
        split_exponent(&format!("{:.*e}", p - 1, x)).1
    };
    if exp >= -4 && (exp as i64) < p as i64 {
        let decimals = (p as i64 - 1 - exp as i64).max(0) as usize;
        let mut s = format!("{:.*}", decimals, x);
        if !alternate {
            s = strip_zeros(s);
        }
        if repr_style && !s.contains('.') {
            s.push_str(".0");
        }
        s
    } else {
        let s = exponent(x, p - 1, upper, alternate);
        if alternate {
            return s;
        }
        let e = if upper { 'E' } else { 'e' };
        match s.split_once(e) {
            Some((mantissa, rest)) => format!("{}{}{}", strip_zeros(mantissa.to_string()), e, rest),
            None => s,
        }
    }
}

fn strip_zeros(s: String) -> String {
    if !s.contains('.') {
        return s;
    }
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn group_digits(digits: &str, sep: char, every: usize) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::with_capacity(chars.len() + chars.len() / every);
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % every == 0 {
            out.push(sep);
        }
        out.push(*c);
    }
    out
}

fn pad(head: &str, body: &str, spec: &FormatSpec, default_align: char) -> String {
    let len = head.chars().count() + body.chars().count();
    if spec.width <= len {
        return format!("{}{}", head, body);
    }
    let fill = |n: usize| std::iter::repeat(spec.fill).take(n).collect::<String>();
    let padding = spec.width - len;
    match spec.align.unwrap_or(default_align) {
        '<' => format!("{}{}{}", head, body, fill(padding)),
        '^' => format!("{}{}{}{}", fill(padding / 2), head, body, fill(padding - padding / 2)),
        '=' => format!("{}{}{}", head, fill(padding), body),
        _ => format!("{}{}{}", fill(padding), head, body),
    }
}

/// `str.format(*args, **kwargs)`
pub fn str_format(template: &str, args: &[Value], kwargs: &Dict) -> Result<String, Exception> {
    let mut numbering = Numbering::default();
    render_template(template, args, kwargs, &mut numbering, 0)
}

#[derive(Default)]
struct Numbering {
    next: usize,
    automatic: bool,
    manual: bool,
}

fn render_template(
    template: &str,
    args: &[Value],
    kwargs: &Dict,
    numbering: &mut Numbering,
    depth: usize,
) -> Result<String, Exception> {
    if depth > 2 {
        return Err(Exception::value_error("Max string recursion exceeded"));
    }
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                out.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                out.push('}');
                i += 2;
            }
            '}' => {
                return Err(Exception::value_error(
                    "Single '}' encountered in format string",
                ))
            }
            '{' => {
                let mut j = i + 1;
                let mut nested = 0usize;
                while j < chars.len() {
                    match chars[j] {
                        '{' => nested += 1,
                        '}' if nested == 0 => break,
                        '}' => nested -= 1,
                        _ => {}
                    }
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(Exception::value_error(
                        "Single '{' encountered in format string",
                    ));
                }
                let field: String = chars[i + 1..j].iter().collect();
                out.push_str(&render_field(&field, args, kwargs, numbering, depth)?);
                i = j + 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(out)
}

fn render_field(
    field: &str,
    args: &[Value],
    kwargs: &Dict,
    numbering: &mut Numbering,
    depth: usize,
) -> Result<String, Exception> {
    let (head, spec) = match field.find(':') {
        Some(pos) => (&field[..pos], &field[pos + 1..]),
        None => (field, ""),
    };
    let (name, conversion) = match head.find('!') {
        Some(pos) => (&head[..pos], head[pos + 1..].chars().next()),
        None => (head, None),
    };

    let (base, accessors) = match name.find('[') {
        Some(pos) => (&name[..pos], &name[pos..]),
        None => (name, ""),
    };

    let mut value = if base.is_empty() {
        if numbering.manual {
            return Err(Exception::value_error(
                "cannot switch from manual field specification to automatic field numbering",
            ));
        }
        numbering.automatic = true;
        let index = numbering.next;
        numbering.next += 1;
        positional(args, index)?
    } else if let Ok(index) = base.parse::<usize>() {
        if numbering.automatic {
            return Err(Exception::value_error(
                "cannot switch from automatic field numbering to manual field specification",
            ));
        }
        numbering.manual = true;
        positional(args, index)?
    } else {
        kwargs
            .get(&Value::from(base))?
            .ok_or_else(|| Exception::new(ExceptionKind::KeyError, format!("'{}'", base)))?
    };

    let mut rest = accessors;
    while let Some(stripped) = rest.strip_prefix('[') {
        let close = stripped
            .find(']')
            .ok_or_else(|| Exception::value_error("Missing ']' in format string"))?;
        let key = &stripped[..close];
        value = index_for_format(&value, key)?;
        rest = &stripped[close + 1..];
    }
    if !rest.is_empty() {
        return Err(Exception::value_error(format!(
            "unsupported field accessor '{}'",
            rest
        )));
    }

    let value = match conversion {
        None => value,
        Some('r') | Some('a') => Value::from(value.try_repr()?),
        Some('s') => Value::from(value.try_to_str()?),
        Some(other) => {
            return Err(Exception::value_error(format!(
                "Unknown conversion specifier {}",
                other
            )))
        }
    };

    let spec = if spec.contains('{') {
        render_template(spec, args, kwargs, numbering, depth + 1)?
    } else {
        spec.to_string()
    };
    format_value(&value, &spec)
}

fn positional(args: &[Value], index: usize) -> Result<Value, Exception> {
    args.get(index).cloned().ok_or_else(|| {
        Exception::index_error(format!(
            "Replacement index {} out of range for positional args tuple",
            index
        ))
    })
}

fn index_for_format(value: &Value, key: &str) -> Result<Value, Exception> {
    let as_index = key.parse::<i64>().ok();
    match (value, as_index) {
        (Value::List(items), Some(i)) => items
            .borrow()
            .get(i as usize)
            .cloned()
            .ok_or_else(|| Exception::index_error("list index out of range")),
        (Value::Tuple(items), Some(i)) => items
            .get(i as usize)
            .cloned()
            .ok_or_else(|| Exception::index_error("tuple index out of range")),
        (Value::Dict(d), _) => {
            let lookup = match as_index {
                Some(i) => Value::Int(i),
                None => Value::from(key),
            };
            d.borrow()
                .get(&lookup)?
                .ok_or_else(|| Exception::new(ExceptionKind::KeyError, lookup.repr()))
        }
        _ => Err(Exception::type_error(format!(
            "'{}' object is not subscriptable",
            value.type_name()
        ))),
    }
}

/// printf-style `template % values`
pub fn percent_format(template: &str, values: &Value) -> Result<String, Exception> {
    let (positional_args, mapping): (Vec<Value>, Option<Dict>) = match values {
        Value::Tuple(items) => (items.to_vec(), None),
        Value::Dict(d) => (vec![values.clone()], Some(d.borrow().clone())),
        other => (vec![other.clone()], None),
    };

    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut next = 0usize;
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        i += 1;
        let mut key: Option<String> = None;
        if chars.get(i) == Some(&'(') {
            let close = chars[i..]
                .iter()
                .position(|&c| c == ')')
                .ok_or_else(|| Exception::value_error("incomplete format key"))?;
            key = Some(chars[i + 1..i + close].iter().collect());
            i += close + 1;
        }

        let mut spec = FormatSpec::default();
        while let Some(&flag @ ('-' | '+' | ' ' | '0' | '#')) = chars.get(i) {
            match flag {
                '-' => spec.align = Some('<'),
                '+' => spec.sign = '+',
                ' ' if spec.sign != '+' => spec.sign = ' ',
                '0' => {
                    if spec.align.is_none() {
                        spec.fill = '0';
                        spec.align = Some('=');
                    }
                }
                '#' => spec.alternate = true,
                _ => {}
            }
            i += 1;
        }
        match spec.align {
            Some('<') => spec.fill = ' ',
            None => spec.align = Some('>'),
            _ => {}
        }
        let take_arg = |next: &mut usize| -> Result<Value, Exception> {
            if let Some(name) = &key {
                let map = mapping
                    .as_ref()
                    .ok_or_else(|| Exception::type_error("format requires a mapping"))?;
                return map
                    .get(&Value::from(name.as_str()))?
                    .ok_or_else(|| Exception::new(ExceptionKind::KeyError, format!("'{}'", name)));
            }
            let value = positional_args
                .get(*next)
                .cloned()
                .ok_or_else(|| Exception::type_error("not enough arguments for format string"))?;
            *next += 1;
            Ok(value)
        };

        if chars.get(i) == Some(&'*') {
            let width = take_arg(&mut next)?;
            spec.width = width
                .as_int()
                .ok_or_else(|| Exception::type_error("* wants int"))?
                .max(0) as usize;
            i += 1;
        } else {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                let digits: String = chars[start..i].iter().collect();
                spec.width = digits.parse().map_err(|_| invalid_spec())?;
            }
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let digits: String = chars[start..i].iter().collect();
            spec.precision = Some(digits.parse().unwrap_or(0));
        }
        while matches!(chars.get(i), Some('h' | 'l' | 'L')) {
            i += 1;
        }

        let kind = *chars
            .get(i)
            .ok_or_else(|| Exception::value_error("incomplete format"))?;
        i += 1;
        if kind == '%' {
            out.push('%');
            continue;
        }
        let arg = take_arg(&mut next)?;
        let piece = match kind {
            's' => format_with(&Value::from(arg.try_to_str()?), &spec)?,
            'r' | 'a' => format_with(&Value::from(arg.try_repr()?), &spec)?,
            'd' | 'i' | 'u' => {
                let n = match &arg {
                    Value::Float(f) => float_to_value(*f)?.as_bigint().unwrap_or_default(),
                    other => other.as_bigint().ok_or_else(|| {
                        Exception::type_error(format!(
                            "%{} format: a real number is required, not {}",
                            kind,
                            other.type_name()
                        ))
                    })?,
                };
                spec.kind = Some('d');
                format_int(&n, &spec)?
            }
            'x' | 'X' | 'o' => {
                let n = arg.as_bigint().ok_or_else(|| {
                    Exception::type_error(format!(
                        "%{} format: an integer is required, not {}",
                        kind,
                        arg.type_name()
                    ))
                })?;
                spec.kind = Some(kind);
                format_int(&n, &spec)?
            }
            'c' => match &arg {
                Value::Str(s) if s.chars().count() == 1 => format_with(&arg, &FormatSpec { kind: None, ..spec })?,
                other => {
                    let n = other
                        .as_bigint()
                        .ok_or_else(|| Exception::type_error("%c requires int or char"))?;
                    spec.kind = Some('c');
                    format_int(&n, &spec)?
                }
            },
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                let x = arg.as_f64().ok_or_else(|| {
                    Exception::type_error(format!("must be real number, not {}", arg.type_name()))
                })?;
                spec.kind = Some(kind);
                format_float(x, &spec)?
            }
            other => {
                return Err(Exception::value_error(format!(
                    "unsupported format character '{}'",
                    other
                )))
            }
        };
        out.push_str(&piece);
    }

    if mapping.is_none() && next < positional_args.len() {
        return Err(Exception::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_repr() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e16), "1.5e+16");
        assert_eq!(float_repr(1e-7), "1e-07");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(123456789012345.0), "123456789012345.0");
        assert_eq!(float_repr(-2.5), "-2.5");
        assert_eq!(float_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn test_format_numbers() {
        assert_eq!(format_value(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_value(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_value(&Value::Float(1234.5), ",.2f").unwrap(), "1,234.50");
        assert_eq!(format_value(&Value::Int(42), "05d").unwrap(), "00042");
        assert_eq!(format_value(&Value::Int(-42), "05d").unwrap(), "-0042");
        assert_eq!(format_value(&Value::Int(255), "#x").unwrap(), "0xff");
        assert_eq!(format_value(&Value::Int(5), "b").unwrap(), "101");
        assert_eq!(format_value(&Value::Float(0.25), ".1%").unwrap(), "25.0%");
        assert_eq!(format_value(&Value::Float(12345.678), "e").unwrap(), "1.234568e+04");
        assert_eq!(format_value(&Value::Float(0.0001234), "g").unwrap(), "0.0001234");
        assert_eq!(format_value(&Value::Float(1234567.0), "g").unwrap(), "1.23457e+06");
        assert_eq!(format_value(&Value::Float(2.0), ".3").unwrap(), "2.0");
        assert_eq!(format_value(&Value::Int(7), "+d").unwrap(), "+7");
    }

    #[test]
    fn test_format_big_integers() {
        let big = |text: &str| Value::BigInt(std::rc::Rc::new(text.parse().unwrap()));
        let n = big("1267650600228229401496703205376");
        assert_eq!(format_value(&n, "").unwrap(), "1267650600228229401496703205376");
        assert_eq!(format_value(&n, ",").unwrap(), "1,267,650,600,228,229,401,496,703,205,376");
        assert_eq!(format_value(&big("-18446744073709551616"), "#x").unwrap(), "-0x10000000000000000");
        assert_eq!(format_value(&n, ".3e").unwrap(), "1.268e+30");
        assert_eq!(percent_format("%d", &n).unwrap(), "1267650600228229401496703205376");
        assert_eq!(percent_format("%d", &Value::Float(1e20)).unwrap(), "100000000000000000000");
    }

    #[test]
    fn test_format_alignment() {
        assert_eq!(format_value(&Value::from("ab"), ">5").unwrap(), "   ab");
        assert_eq!(format_value(&Value::from("ab"), "*^6").unwrap(), "**ab**");
        assert_eq!(format_value(&Value::from("ab"), "5").unwrap(), "ab   ");
        assert_eq!(format_value(&Value::Int(3), "<4").unwrap(), "3   ");
        assert_eq!(format_value(&Value::from("abcdef"), ".3").unwrap(), "abc");
    }

    #[test]
    fn test_format_errors() {
        assert!(format_value(&Value::from("x"), "d").is_err());
        assert!(format_value(&Value::Float(1.0), "d").is_err());
        assert!(format_value(&Value::Int(1), ".2d").is_err());
        assert!(format_value(&Value::None, ">3").is_err());
    }

    #[test]
    fn test_str_format() {
        let mut kwargs = Dict::new();
        kwargs.insert(Value::from("name"), Value::from("Ada")).unwrap();
        let args = [Value::Int(1), Value::Float(2.5)];
        assert_eq!(
            str_format("{} + {:.2f} by {name}", &args, &kwargs).unwrap(),
            "1 + 2.50 by Ada"
        );
        assert_eq!(str_format("{1}{0}{{}}", &args, &kwargs).unwrap(), "2.51{}");
        assert_eq!(str_format("{0!r:>6}", &[Value::from("a")], &kwargs).unwrap(), "   'a'");
        assert!(str_format("{} {}", &args[..1], &kwargs).is_err());
        assert!(str_format("{}{1}", &args, &kwargs).is_err());
    }

    #[test]
    fn test_percent_format() {
        let args = Value::tuple(vec![Value::from("x"), Value::Float(3.14159), Value::Int(7)]);
        assert_eq!(
            percent_format("%s = %.2f (%03d) 100%%", &args).unwrap(),
            "x = 3.14 (007) 100%"
        );
        assert_eq!(percent_format("%5s|%-5s|", &Value::tuple(vec![Value::from("a"), Value::from("b")])).unwrap(), "    a|b    |");
        assert!(percent_format("%d", &Value::from("x")).is_err());
        assert!(percent_format("%s", &Value::tuple(vec![Value::Int(1), Value::Int(2)])).is_err());
    }
}
