//! Arbitrary-precision integers
//!
//! Integers live in `Value::Int` while they fit in an `i64`. Results that
//! leave that range are carried as `Value::BigInt` and folded back into
//! `Value::Int` as soon as they fit again.

use super::ast::BinOp;
use super::error::{Exception, ExceptionKind};
use super::interp::float_pow;
use super::value::Value;
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{FromPrimitive, One, Signed, ToPrimitive, Zero};
use std::rc::Rc;

/// Largest integer a program may build, in bits
pub const MAX_INT_BITS: u64 = 1 << 20;

pub fn too_large() -> Exception {
    Exception::new(ExceptionKind::MemoryError, "integer too large")
}

/// Smallest representation of `n`.
pub fn int_value(n: BigInt) -> Value {
    match n.to_i64() {
        Some(i) => Value::Int(i),
        None => Value::BigInt(Rc::new(n)),
    }
}

fn bounded(n: BigInt) -> Result<Value, Exception> {
    if n.bits() > MAX_INT_BITS {
        return Err(too_large());
    }
    Ok(int_value(n))
}

pub fn int_to_f64(n: &BigInt) -> Result<f64, Exception> {
    n.to_f64().filter(|f| f.is_finite()).ok_or_else(|| {
        Exception::new(ExceptionKind::OverflowError, "int too large to convert to float")
    })
}

/// Integral part of a float as an integer of any size.
pub fn float_to_value(f: f64) -> Result<Value, Exception> {
    if f.is_nan() {
        return Err(Exception::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(Exception::new(
            ExceptionKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    let t = f.trunc();
    if t.abs() < 9.2e18 {
        return Ok(Value::Int(t as i64));
    }
    BigInt::from_f64(t).map(int_value).ok_or_else(Exception::overflow)
}

/// Parse unsigned digits in `radix`, falling back to a big integer when the
/// value does not fit in 64 bits.
pub fn parse_digits(digits: &str, radix: u32) -> Option<Value> {
    if let Ok(i) = i64::from_str_radix(digits, radix) {
        return Some(Value::Int(i));
    }
    BigInt::parse_bytes(digits.as_bytes(), radix).map(int_value)
}

/// `x / y` for integers, rounded once to the nearest float.
pub fn true_div(x: &BigInt, y: &BigInt) -> Result<f64, Exception> {
    if y.is_zero() {
        return Err(Exception::zero_division("division by zero"));
    }
    let exact = |n: &BigInt| n.to_i64().filter(|i| i.unsigned_abs() < 1 << 53).map(|i| i as f64);
    if let (Some(a), Some(b)) = (exact(x), exact(y)) {
        return Ok(a / b);
    }
    // Scale so the integer quotient carries about 64 significant bits.
    let shift = 64 + y.bits() as i64 - x.bits() as i64;
    let quotient = if shift >= 0 {
        (x << shift as usize) / y
    } else {
        x / (y << shift.unsigned_abs() as usize)
    };
    let scale = (-shift).clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    let result = quotient.to_f64().unwrap_or(0.0) * 2f64.powi(scale);
    if !result.is_finite() {
        return Err(Exception::new(
            ExceptionKind::OverflowError,
            "integer division result too large for a float",
        ));
    }
    Ok(result)
}

fn shift_count(y: &BigInt) -> Result<Option<usize>, Exception> {
    if y.is_negative() {
        return Err(Exception::value_error("negative shift count"));
    }
    Ok(y.to_usize())
}

/// Integer arithmetic once either operand has left the `i64` fast path.
/// `Err(None)` means the operator does not apply.
pub fn big_op(op: BinOp, x: &BigInt, y: &BigInt) -> Result<Value, Option<Exception>> {
    let zero_div = || Some(Exception::zero_division("integer division or modulo by zero"));
    let result = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => {
            if x.bits() + y.bits() > MAX_INT_BITS + 1 {
                return Err(Some(too_large()));
            }
            x * y
        }
        BinOp::Div => return true_div(x, y).map(Value::Float).map_err(Some),
        BinOp::FloorDiv => {
            if y.is_zero() {
                return Err(zero_div());
            }
            x.div_floor(y)
        }
        BinOp::Mod => {
            if y.is_zero() {
                return Err(zero_div());
            }
            x.mod_floor(y)
        }
        BinOp::Pow => return pow(x, y).map_err(Some),
        BinOp::LShift => {
            let count = shift_count(y).map_err(Some)?;
            if x.is_zero() {
                return Ok(Value::Int(0));
            }
            match count {
                Some(n) if x.bits().saturating_add(n as u64) <= MAX_INT_BITS => x << n,
                _ => return Err(Some(too_large())),
            }
        }
        BinOp::RShift => {
            let count = shift_count(y).map_err(Some)?;
            match count {
                Some(n) if (n as u64) < x.bits() => x >> n,
                _ => BigInt::from(if x.is_negative() { -1 } else { 0 }),
            }
        }
        BinOp::BitAnd => x & y,
        BinOp::BitOr => x | y,
        BinOp::BitXor => x ^ y,
        BinOp::MatMul => return Err(None),
    };
    bounded(result).map_err(Some)
}

fn pow(x: &BigInt, y: &BigInt) -> Result<Value, Exception> {
    if y.is_negative() {
        if x.is_zero() {
            return Err(Exception::zero_division(
                "0.0 cannot be raised to a negative power",
            ));
        }
        let exp = y.to_f64().unwrap_or(f64::NEG_INFINITY);
        return float_pow(int_to_f64(x)?, exp).map(Value::Float);
    }
    if y.is_zero() {
        return Ok(Value::Int(1));
    }
    if x.is_zero() || x.is_one() {
        return Ok(int_value(x.clone()));
    }
    if *x == BigInt::from(-1) {
        return Ok(Value::Int(if y.is_even() { 1 } else { -1 }));
    }
    let exp = y
        .to_u32()
        .filter(|e| (x.bits() - 1).saturating_mul(*e as u64) <= MAX_INT_BITS)
        .ok_or_else(too_large)?;
    bounded(x.pow(exp))
}

/// Three-argument `pow`, including negative exponents via the modular inverse.
pub fn mod_pow(base: &BigInt, exp: &BigInt, modulus: &BigInt) -> Result<Value, Exception> {
    if modulus.is_zero() {
        return Err(Exception::value_error("pow() 3rd argument cannot be 0"));
    }
    let (base, exp) = if exp.is_negative() {
        let inverse = mod_inverse(base, &modulus.abs())
            .ok_or_else(|| Exception::value_error("base is not invertible for the given modulus"))?;
        (inverse, -exp)
    } else {
        (base.clone(), exp.clone())
    };
    Ok(int_value(base.modpow(&exp, modulus)))
}

fn mod_inverse(a: &BigInt, m: &BigInt) -> Option<BigInt> {
    let egcd = a.mod_floor(m).extended_gcd(m);
    egcd.gcd.is_one().then(|| egcd.x.mod_floor(m))
}

pub fn factorial(n: &BigInt) -> Result<Value, Exception> {
    if n.is_negative() {
        return Err(Exception::value_error("factorial() not defined for negative values"));
    }
    let n = n.to_u64().filter(|n| *n <= 50_000).ok_or_else(too_large)?;
    let mut acc = BigInt::one();
    for k in 2..=n {
        acc *= k;
    }
    bounded(acc)
}

fn check_non_negative(n: &BigInt, k: &BigInt) -> Result<(), Exception> {
    if n.is_negative() {
        return Err(Exception::value_error("n must be a non-negative integer"));
    }
    if k.is_negative() {
        return Err(Exception::value_error("k must be a non-negative integer"));
    }
    Ok(())
}

pub fn comb(n: &BigInt, k: &BigInt) -> Result<Value, Exception> {
    check_non_negative(n, k)?;
    if k > n {
        return Ok(Value::Int(0));
    }
    let k = k.min(&(n - k)).clone();
    let k = k.to_u64().filter(|k| *k <= 100_000).ok_or_else(too_large)?;
    let mut acc = BigInt::one();
    for i in 0..k {
        acc = acc * (n - i) / (i + 1);
        if acc.bits() > MAX_INT_BITS {
            return Err(too_large());
        }
    }
    Ok(int_value(acc))
}

pub fn perm(n: &BigInt, k: &BigInt) -> Result<Value, Exception> {
    check_non_negative(n, k)?;
    if k > n {
        return Ok(Value::Int(0));
    }
    let k = k.to_u64().filter(|k| *k <= 100_000).ok_or_else(too_large)?;
    let mut acc = BigInt::one();
    for i in 0..k {
        acc *= n - i;
        if acc.bits() > MAX_INT_BITS {
            return Err(too_large());
        }
    }
    Ok(int_value(acc))
}

pub fn isqrt(n: &BigInt) -> Result<Value, Exception> {
    if n.is_negative() {
        return Err(Exception::value_error("isqrt() argument must be nonnegative"));
    }
    Ok(int_value(n.sqrt()))
}

pub fn gcd(values: &[BigInt]) -> Value {
    int_value(values.iter().fold(BigInt::zero(), |acc, n| acc.gcd(n)))
}

pub fn lcm(values: &[BigInt]) -> Result<Value, Exception> {
    let mut acc = BigInt::one();
    for n in values {
        if n.is_zero() {
            return Ok(Value::Int(0));
        }
        acc = acc.lcm(n);
        if acc.bits() > MAX_INT_BITS {
            return Err(too_large());
        }
    }
    Ok(int_value(acc))
}

/// Natural log of a positive integer of any size.
pub fn ln(n: &BigInt) -> f64 {
    match n.to_f64().filter(|f| f.is_finite()) {
        Some(f) => f.ln(),
        None => {
            // Keep the top 64 bits; the rest only shifts the exponent.
            let drop = n.bits() - 64;
            (n >> drop as usize).to_f64().unwrap_or(f64::INFINITY).ln() + drop as f64 * std::f64::consts::LN_2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(text: &str) -> BigInt {
        text.parse().unwrap()
    }

    #[test]
    fn test_results_fold_back_into_small_ints() {
        let x = big("9223372036854775808");
        let y = big("-1");
        assert!(matches!(big_op(BinOp::Add, &x, &y).unwrap(), Value::Int(i64::MAX)));
        assert!(matches!(int_value(x.clone()), Value::BigInt(_)));
        assert_eq!(big_op(BinOp::Mul, &x, &x).unwrap().repr(), "85070591730234615865843651857942052864");
    }

    #[test]
    fn test_floor_semantics() {
        let x = big("-100000000000000000000");
        let y = BigInt::from(7);
        assert_eq!(big_op(BinOp::FloorDiv, &x, &y).unwrap().repr(), "-14285714285714285715");
        assert_eq!(big_op(BinOp::Mod, &x, &y).unwrap().repr(), "5");
        assert_eq!(big_op(BinOp::RShift, &x, &BigInt::from(200)).unwrap().repr(), "-1");
    }

    #[test]
    fn test_true_division() {
        let x = big("100000000000000000000");
        assert_eq!(true_div(&x, &BigInt::from(4)).unwrap(), 2.5e19);
        assert!((true_div(&BigInt::from(1), &x).unwrap() - 1e-20).abs() < 1e-34);
        let huge = BigInt::from(1) << 2000usize;
        assert_eq!(true_div(&huge, &BigInt::from(3)).unwrap_err().kind, ExceptionKind::OverflowError);
        assert_eq!(true_div(&x, &BigInt::zero()).unwrap_err().kind, ExceptionKind::ZeroDivisionError);
    }

    #[test]
    fn test_size_limits() {
        let err = big_op(BinOp::Pow, &BigInt::from(2), &BigInt::from(10_000_000)).unwrap_err().unwrap();
        assert_eq!(err.kind, ExceptionKind::MemoryError);
        let err = big_op(BinOp::LShift, &BigInt::from(1), &BigInt::from(u64::MAX)).unwrap_err().unwrap();
        assert_eq!(err.kind, ExceptionKind::MemoryError);
        assert!(factorial(&BigInt::from(1_000_000)).is_err());
    }

    #[test]
    fn test_combinatorics() {
        assert_eq!(factorial(&BigInt::from(25)).unwrap().repr(), "15511210043330985984000000");
        assert_eq!(comb(&BigInt::from(100), &BigInt::from(50)).unwrap().repr(), "100891344545564193334812497256");
        assert_eq!(perm(&BigInt::from(5), &BigInt::from(2)).unwrap().repr(), "20");
        assert_eq!(isqrt(&big("100000000000000000000")).unwrap().repr(), "10000000000");
        assert_eq!(gcd(&[big("-12"), big("18")]).repr(), "6");
        assert_eq!(lcm(&[big("4"), big("6"), big("0")]).unwrap().repr(), "0");
        assert!((ln(&(BigInt::from(1) << 2000usize)) - 2000.0 * std::f64::consts::LN_2).abs() < 1e-9);
    }

    #[test]
    fn test_mod_pow() {
        let v = BigInt::from;
        assert_eq!(mod_pow(&v(3), &v(4), &v(5)).unwrap().repr(), "1");
        assert_eq!(mod_pow(&v(3), &v(-1), &v(7)).unwrap().repr(), "5");
        assert_eq!(mod_pow(&v(3), &v(-1), &v(-7)).unwrap().repr(), "-2");
        assert!(mod_pow(&v(2), &v(-1), &v(4)).is_err());
        assert!(mod_pow(&v(2), &v(3), &v(0)).is_err());
    }
}
