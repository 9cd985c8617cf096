//! Arithmetic, comparison, and concatenation semantics
//!
//! Mixed-type numeric operations promote along the lattice
//! `f64 > f32 > i64 > u64 > i32 > u32 > i16 > u16 > i8 > u8`: the operand
//! with the higher-ranked type wins and both operands convert to it.
//! Division always produces `f64` regardless of operand types; modulo keeps
//! the promoted integer type. Right shift is arithmetic for signed winners
//! and logical for unsigned ones. Bit operations require integral operands.
//!
//! `+` with a string operand concatenates: runes, numbers, bools, and null
//! render as text, arrays and objects as JSON.
//!
//! The entry points test the common same-type pairs — `(i32,i32)`,
//! `(i64,i64)`, `(f64,f64)`, and mixed i32/i64 — before the general
//! promotion path, keeping the hot loop free of classification work.

use crate::error::{ErrorKind, RillError};
use crate::json;
use crate::value::Value;
use rill_core::BinaryOp;
use std::cmp::Ordering;

/// Lattice rank; higher wins promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum NumClass {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl NumClass {
    fn of(v: &Value) -> Option<NumClass> {
        match v {
            Value::U8(_) => Some(NumClass::U8),
            Value::I8(_) => Some(NumClass::I8),
            Value::U16(_) => Some(NumClass::U16),
            Value::I16(_) => Some(NumClass::I16),
            Value::U32(_) => Some(NumClass::U32),
            Value::I32(_) => Some(NumClass::I32),
            Value::U64(_) => Some(NumClass::U64),
            Value::I64(_) => Some(NumClass::I64),
            Value::F32(_) => Some(NumClass::F32),
            Value::F64(_) => Some(NumClass::F64),
            _ => None,
        }
    }

    fn is_float(self) -> bool {
        matches!(self, NumClass::F32 | NumClass::F64)
    }

    fn is_signed(self) -> bool {
        matches!(
            self,
            NumClass::I8 | NumClass::I16 | NumClass::I32 | NumClass::I64
        )
    }

    fn bits(self) -> u32 {
        match self {
            NumClass::I8 | NumClass::U8 => 8,
            NumClass::I16 | NumClass::U16 => 16,
            NumClass::I32 | NumClass::U32 | NumClass::F32 => 32,
            NumClass::I64 | NumClass::U64 | NumClass::F64 => 64,
        }
    }
}

/// Raw widening reads. Conversions into the winning class use plain `as`
/// semantics (wrap on narrowing, sign-extend signed sources).
fn raw_i64(v: &Value) -> i64 {
    match *v {
        Value::I8(n) => i64::from(n),
        Value::I16(n) => i64::from(n),
        Value::I32(n) => i64::from(n),
        Value::I64(n) => n,
        Value::U8(n) => i64::from(n),
        Value::U16(n) => i64::from(n),
        Value::U32(n) => i64::from(n),
        Value::U64(n) => n as i64,
        Value::F32(n) => n as i64,
        Value::F64(n) => n as i64,
        _ => 0,
    }
}

fn raw_u64(v: &Value) -> u64 {
    match *v {
        Value::I8(n) => n as u64,
        Value::I16(n) => n as u64,
        Value::I32(n) => n as u64,
        Value::I64(n) => n as u64,
        Value::U8(n) => u64::from(n),
        Value::U16(n) => u64::from(n),
        Value::U32(n) => u64::from(n),
        Value::U64(n) => n,
        Value::F32(n) => n as u64,
        Value::F64(n) => n as u64,
        _ => 0,
    }
}

fn raw_f64(v: &Value) -> f64 {
    match *v {
        Value::I8(n) => f64::from(n),
        Value::I16(n) => f64::from(n),
        Value::I32(n) => f64::from(n),
        Value::I64(n) => n as f64,
        Value::U8(n) => f64::from(n),
        Value::U16(n) => f64::from(n),
        Value::U32(n) => f64::from(n),
        Value::U64(n) => n as f64,
        Value::F32(n) => f64::from(n),
        Value::F64(n) => n,
        _ => 0.0,
    }
}

/// Truncate a wide signed result into the winning class.
fn wrap_signed(class: NumClass, n: i64) -> Value {
    match class {
        NumClass::I8 => Value::I8(n as i8),
        NumClass::I16 => Value::I16(n as i16),
        NumClass::I32 => Value::I32(n as i32),
        _ => Value::I64(n),
    }
}

fn wrap_unsigned(class: NumClass, n: u64) -> Value {
    match class {
        NumClass::U8 => Value::U8(n as u8),
        NumClass::U16 => Value::U16(n as u16),
        NumClass::U32 => Value::U32(n as u32),
        _ => Value::U64(n),
    }
}

/// Sign-extend / truncate an operand to the winning signed width so that
/// narrow arithmetic (including arithmetic right shift) behaves as if it
/// ran at that width.
fn narrow_signed(class: NumClass, n: i64) -> i64 {
    match class {
        NumClass::I8 => n as i8 as i64,
        NumClass::I16 => n as i16 as i64,
        NumClass::I32 => n as i32 as i64,
        _ => n,
    }
}

fn narrow_unsigned(class: NumClass, n: u64) -> u64 {
    match class {
        NumClass::U8 => n as u8 as u64,
        NumClass::U16 => n as u16 as u64,
        NumClass::U32 => n as u32 as u64,
        _ => n,
    }
}

fn type_error_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> RillError {
    RillError::new(
        ErrorKind::Type,
        format!(
            "unsupported operand types for '{}': {} and {}",
            op.symbol(),
            lhs.type_name(),
            rhs.type_name()
        ),
    )
}

/// Apply a binary operator. `&&` and `||` never reach here — the evaluator
/// short-circuits them.
pub fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, RillError> {
    // Hot-path pairs first: no classification, no promotion.
    match (op, lhs, rhs) {
        (BinaryOp::Add, Value::I32(a), Value::I32(b)) => {
            return Ok(Value::I32(a.wrapping_add(*b)));
        }
        (BinaryOp::Sub, Value::I32(a), Value::I32(b)) => {
            return Ok(Value::I32(a.wrapping_sub(*b)));
        }
        (BinaryOp::Mul, Value::I32(a), Value::I32(b)) => {
            return Ok(Value::I32(a.wrapping_mul(*b)));
        }
        (BinaryOp::Lt, Value::I32(a), Value::I32(b)) => return Ok(Value::Bool(a < b)),
        (BinaryOp::Le, Value::I32(a), Value::I32(b)) => return Ok(Value::Bool(a <= b)),
        (BinaryOp::Gt, Value::I32(a), Value::I32(b)) => return Ok(Value::Bool(a > b)),
        (BinaryOp::Ge, Value::I32(a), Value::I32(b)) => return Ok(Value::Bool(a >= b)),
        (BinaryOp::Eq, Value::I32(a), Value::I32(b)) => return Ok(Value::Bool(a == b)),
        (BinaryOp::Ne, Value::I32(a), Value::I32(b)) => return Ok(Value::Bool(a != b)),
        (BinaryOp::Add, Value::I64(a), Value::I64(b)) => {
            return Ok(Value::I64(a.wrapping_add(*b)));
        }
        (BinaryOp::Sub, Value::I64(a), Value::I64(b)) => {
            return Ok(Value::I64(a.wrapping_sub(*b)));
        }
        (BinaryOp::Mul, Value::I64(a), Value::I64(b)) => {
            return Ok(Value::I64(a.wrapping_mul(*b)));
        }
        (BinaryOp::Add, Value::F64(a), Value::F64(b)) => return Ok(Value::F64(a + b)),
        (BinaryOp::Sub, Value::F64(a), Value::F64(b)) => return Ok(Value::F64(a - b)),
        (BinaryOp::Mul, Value::F64(a), Value::F64(b)) => return Ok(Value::F64(a * b)),
        (BinaryOp::Add, Value::I32(a), Value::I64(b)) => {
            return Ok(Value::I64(i64::from(*a).wrapping_add(*b)));
        }
        (BinaryOp::Add, Value::I64(a), Value::I32(b)) => {
            return Ok(Value::I64(a.wrapping_add(i64::from(*b))));
        }
        _ => {}
    }

    // String concatenation before numeric dispatch.
    if op == BinaryOp::Add {
        if let Value::Str(s) = lhs {
            let mut out = s.to_owned_string();
            out.push_str(&concat_operand(rhs)?);
            return Ok(Value::str(out));
        }
        if let Value::Str(s) = rhs {
            let mut out = concat_operand(lhs)?;
            s.read(|body| out.push_str(body));
            return Ok(Value::str(out));
        }
    }

    match op {
        BinaryOp::Eq => return Ok(Value::Bool(values_equal(lhs, rhs))),
        BinaryOp::Ne => return Ok(Value::Bool(!values_equal(lhs, rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord =
                compare_values(lhs, rhs).ok_or_else(|| type_error_binary(op, lhs, rhs))?;
            let result = match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            return Ok(Value::Bool(result));
        }
        _ => {}
    }

    let (Some(lc), Some(rc)) = (NumClass::of(lhs), NumClass::of(rhs)) else {
        return Err(type_error_binary(op, lhs, rhs));
    };
    let class = lc.max(rc);

    // Division always lands in f64, whatever the operands were.
    if op == BinaryOp::Div {
        let d = raw_f64(rhs);
        if d == 0.0 {
            return Err(RillError::new(ErrorKind::DivisionByZero, "division by zero"));
        }
        return Ok(Value::F64(raw_f64(lhs) / d));
    }

    if class.is_float() {
        let (a, b) = (raw_f64(lhs), raw_f64(rhs));
        let out = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Mod => {
                if b == 0.0 {
                    return Err(RillError::new(ErrorKind::DivisionByZero, "modulo by zero"));
                }
                a % b
            }
            // Bit operations never apply to floats.
            _ => return Err(type_error_binary(op, lhs, rhs)),
        };
        return Ok(if class == NumClass::F32 {
            Value::F32(out as f32)
        } else {
            Value::F64(out)
        });
    }

    if class.is_signed() {
        let a = narrow_signed(class, raw_i64(lhs));
        let b = narrow_signed(class, raw_i64(rhs));
        let out = match op {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Mod => {
                if b == 0 {
                    return Err(RillError::new(ErrorKind::DivisionByZero, "modulo by zero"));
                }
                a.wrapping_rem(b)
            }
            BinaryOp::BitAnd => a & b,
            BinaryOp::BitOr => a | b,
            BinaryOp::BitXor => a ^ b,
            BinaryOp::Shl => a.wrapping_shl(b as u32 % class.bits()),
            // Arithmetic shift: the sign-extended narrow value shifts in
            // the wide domain, preserving the sign bit.
            BinaryOp::Shr => a.wrapping_shr(b as u32 % class.bits()),
            _ => return Err(type_error_binary(op, lhs, rhs)),
        };
        Ok(wrap_signed(class, out))
    } else {
        let a = narrow_unsigned(class, raw_u64(lhs));
        let b = narrow_unsigned(class, raw_u64(rhs));
        let out = match op {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Mod => {
                if b == 0 {
                    return Err(RillError::new(ErrorKind::DivisionByZero, "modulo by zero"));
                }
                a % b
            }
            BinaryOp::BitAnd => a & b,
            BinaryOp::BitOr => a | b,
            BinaryOp::BitXor => a ^ b,
            BinaryOp::Shl => a.wrapping_shl(b as u32 % class.bits()),
            // Logical shift for unsigned winners.
            BinaryOp::Shr => a.wrapping_shr(b as u32 % class.bits()),
            _ => return Err(type_error_binary(op, lhs, rhs)),
        };
        Ok(wrap_unsigned(class, out))
    }
}

/// Value equality. Types must match (numeric promotion permits
/// cross-numeric compare); strings and buffers compare by content, objects
/// and arrays by reference identity. A numeric against a non-numeric is
/// simply not equal — never a type error.
pub fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    if lhs.is_numeric() && rhs.is_numeric() {
        let class = NumClass::of(lhs)
            .expect("numeric class")
            .max(NumClass::of(rhs).expect("numeric class"));
        return if class.is_float() {
            raw_f64(lhs) == raw_f64(rhs)
        } else if class.is_signed() {
            narrow_signed(class, raw_i64(lhs)) == narrow_signed(class, raw_i64(rhs))
        } else {
            narrow_unsigned(class, raw_u64(lhs)) == narrow_unsigned(class, raw_u64(rhs))
        };
    }
    match (lhs, rhs) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Rune(a), Value::Rune(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a.content_eq(b),
        (Value::Buffer(a), Value::Buffer(b)) => a.content_eq(b),
        (Value::Ptr(a), Value::Ptr(b)) => a == b,
        _ => lhs.ref_eq(rhs),
    }
}

/// Ordering for `<` and friends: numerics after promotion, strings by
/// bytes, runes by codepoint. `None` means the pair is unordered and the
/// comparison is a type error.
pub fn compare_values(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    if lhs.is_numeric() && rhs.is_numeric() {
        let class = NumClass::of(lhs)?.max(NumClass::of(rhs)?);
        return if class.is_float() {
            raw_f64(lhs).partial_cmp(&raw_f64(rhs))
        } else if class.is_signed() {
            Some(narrow_signed(class, raw_i64(lhs)).cmp(&narrow_signed(class, raw_i64(rhs))))
        } else {
            Some(narrow_unsigned(class, raw_u64(lhs)).cmp(&narrow_unsigned(class, raw_u64(rhs))))
        };
    }
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => {
            Some(a.read(|x| b.read(|y| x.cmp(y))))
        }
        (Value::Rune(a), Value::Rune(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Render a concatenation operand. Arrays and objects serialize to JSON;
/// values with no textual form are a type error.
fn concat_operand(v: &Value) -> Result<String, RillError> {
    match v {
        Value::Null
        | Value::Bool(_)
        | Value::I8(_)
        | Value::I16(_)
        | Value::I32(_)
        | Value::I64(_)
        | Value::U8(_)
        | Value::U16(_)
        | Value::U32(_)
        | Value::U64(_)
        | Value::F32(_)
        | Value::F64(_)
        | Value::Rune(_)
        | Value::Str(_) => Ok(v.to_string()),
        Value::Array(_) | Value::Object(_) => json::serialize(v),
        other => Err(RillError::new(
            ErrorKind::Type,
            format!("cannot concatenate {} to string", other.type_name()),
        )),
    }
}

/// Unary operators. Negating an unsigned value promotes to `i64`.
pub fn unary(op: rill_core::UnaryOp, v: &Value) -> Result<Value, RillError> {
    use rill_core::UnaryOp;
    match op {
        UnaryOp::Not => Ok(Value::Bool(!v.is_truthy())),
        UnaryOp::Neg => match *v {
            Value::I8(n) => Ok(Value::I8(n.wrapping_neg())),
            Value::I16(n) => Ok(Value::I16(n.wrapping_neg())),
            Value::I32(n) => Ok(Value::I32(n.wrapping_neg())),
            Value::I64(n) => Ok(Value::I64(n.wrapping_neg())),
            Value::U8(n) => Ok(Value::I64(-i64::from(n))),
            Value::U16(n) => Ok(Value::I64(-i64::from(n))),
            Value::U32(n) => Ok(Value::I64(-i64::from(n))),
            Value::U64(n) => Ok(Value::I64((n as i64).wrapping_neg())),
            Value::F32(n) => Ok(Value::F32(-n)),
            Value::F64(n) => Ok(Value::F64(-n)),
            ref other => Err(RillError::new(
                ErrorKind::Type,
                format!("cannot negate {}", other.type_name()),
            )),
        },
        UnaryOp::BitNot => match *v {
            Value::I8(n) => Ok(Value::I8(!n)),
            Value::I16(n) => Ok(Value::I16(!n)),
            Value::I32(n) => Ok(Value::I32(!n)),
            Value::I64(n) => Ok(Value::I64(!n)),
            Value::U8(n) => Ok(Value::U8(!n)),
            Value::U16(n) => Ok(Value::U16(!n)),
            Value::U32(n) => Ok(Value::U32(!n)),
            Value::U64(n) => Ok(Value::U64(!n)),
            ref other => Err(RillError::new(
                ErrorKind::Type,
                format!("bitwise complement requires an integer, got {}", other.type_name()),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn add(a: Value, b: Value) -> Value {
        binary(BinaryOp::Add, &a, &b).unwrap()
    }

    #[test]
    fn test_promotion_lattice_add() {
        // Every pair promotes to the higher-ranked operand's type.
        assert!(matches!(add(Value::I8(1), Value::U8(2)), Value::I8(3)));
        assert!(matches!(add(Value::I16(1), Value::I8(2)), Value::I16(3)));
        assert!(matches!(add(Value::U32(1), Value::I16(2)), Value::U32(3)));
        assert!(matches!(add(Value::I32(1), Value::U32(2)), Value::I32(3)));
        assert!(matches!(add(Value::U64(1), Value::I32(2)), Value::U64(3)));
        assert!(matches!(add(Value::I64(1), Value::U64(2)), Value::I64(3)));
        assert!(matches!(add(Value::F32(1.0), Value::I64(2)), Value::F32(_)));
        assert!(matches!(add(Value::F64(1.0), Value::F32(2.0)), Value::F64(_)));
    }

    #[test]
    fn test_division_always_f64() {
        let v = binary(BinaryOp::Div, &Value::I32(7), &Value::I32(2)).unwrap();
        assert!(matches!(v, Value::F64(f) if f == 3.5));
        let v = binary(BinaryOp::Div, &Value::U8(8), &Value::U8(2)).unwrap();
        assert!(matches!(v, Value::F64(f) if f == 4.0));
    }

    #[test]
    fn test_modulo_preserves_promoted_integer_type() {
        let v = binary(BinaryOp::Mod, &Value::I32(7), &Value::I16(3)).unwrap();
        assert!(matches!(v, Value::I32(1)));
        let v = binary(BinaryOp::Mod, &Value::U64(9), &Value::I64(4)).unwrap();
        assert!(matches!(v, Value::I64(1)));
    }

    #[test]
    fn test_division_by_zero() {
        let err = binary(BinaryOp::Div, &Value::I32(1), &Value::I32(0)).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::DivisionByZero));
        let err = binary(BinaryOp::Mod, &Value::F64(1.0), &Value::F64(0.0)).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::DivisionByZero));
    }

    #[test]
    fn test_shift_signedness() {
        // Arithmetic shift for signed: sign bit propagates.
        let v = binary(BinaryOp::Shr, &Value::I8(-8), &Value::I32(1)).unwrap();
        assert!(matches!(v, Value::I8(-4)));
        // Logical shift for unsigned: zero fills.
        let v = binary(BinaryOp::Shr, &Value::U8(0x80), &Value::U8(1)).unwrap();
        assert!(matches!(v, Value::U8(0x40)));
    }

    #[test]
    fn test_bit_ops_reject_floats() {
        let err = binary(BinaryOp::BitAnd, &Value::F64(1.0), &Value::I32(1)).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Type));
        let err = binary(BinaryOp::Shl, &Value::I32(1), &Value::F32(1.0)).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Type));
    }

    #[test]
    fn test_cross_integer_equality() {
        assert!(values_equal(&Value::I8(5), &Value::U64(5)));
        assert!(values_equal(&Value::I32(-1), &Value::I64(-1)));
        assert!(!values_equal(&Value::I32(1), &Value::I32(2)));
        assert!(values_equal(&Value::F64(2.0), &Value::I32(2)));
    }

    #[test]
    fn test_numeric_vs_non_numeric_not_equal_not_error() {
        assert!(!values_equal(&Value::I32(1), &Value::str("1")));
        assert!(!values_equal(&Value::Null, &Value::I32(0)));
        // Through the operator as well.
        let v = binary(BinaryOp::Eq, &Value::I32(1), &Value::Bool(true)).unwrap();
        assert!(matches!(v, Value::Bool(false)));
    }

    #[test]
    fn test_strings_compare_by_content_arrays_by_identity() {
        assert!(values_equal(&Value::str("ab"), &Value::str("ab")));
        let a = Value::array(vec![Value::I32(1)]);
        let b = Value::array(vec![Value::I32(1)]);
        assert!(!values_equal(&a, &b));
        assert!(values_equal(&a, &a.clone()));
    }

    #[test]
    fn test_string_concat() {
        let v = add(Value::str("n = "), Value::I32(7));
        assert_eq!(v.to_string(), "n = 7");
        let v = add(Value::I32(7), Value::str("!"));
        assert_eq!(v.to_string(), "7!");
        let v = add(Value::str("r: "), Value::Rune('x'));
        assert_eq!(v.to_string(), "r: x");
        let v = add(Value::str(""), Value::array(vec![Value::I32(1), Value::I32(2)]));
        assert_eq!(v.to_string(), "[1,2]");
        let obj = crate::value::ObjectObj::empty();
        obj.set(Arc::from("a"), Value::I32(1));
        let v = add(Value::str(""), Value::Object(Arc::new(obj)));
        assert_eq!(v.to_string(), "{\"a\":1}");
    }

    #[test]
    fn test_concat_rejects_functions() {
        let ch = Value::Channel(Arc::new(crate::channel::ChannelObj::new(0)));
        let err = binary(BinaryOp::Add, &Value::str(""), &ch).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Type));
    }

    #[test]
    fn test_narrow_wrapping() {
        // i8 overflow wraps at the promoted width.
        let v = add(Value::I8(127), Value::I8(1));
        assert!(matches!(v, Value::I8(-128)));
    }

    #[test]
    fn test_unary() {
        use rill_core::UnaryOp;
        assert!(matches!(unary(UnaryOp::Neg, &Value::I32(5)).unwrap(), Value::I32(-5)));
        assert!(matches!(unary(UnaryOp::Neg, &Value::U8(5)).unwrap(), Value::I64(-5)));
        assert!(matches!(unary(UnaryOp::Not, &Value::Null).unwrap(), Value::Bool(true)));
        assert!(matches!(unary(UnaryOp::BitNot, &Value::U8(0)).unwrap(), Value::U8(0xFF)));
        assert!(unary(UnaryOp::BitNot, &Value::F64(1.0)).is_err());
    }
}
