//! Array methods
//!
//! The fixed method table dispatched on array receivers. Mutating methods
//! go through the payload's checked operations, so an element-type tag is
//! enforced on every store and a freed array degrades to silent no-ops.

use crate::arith::{compare_values, values_equal};
use crate::error::{ErrorKind, RillError};
use crate::value::{ArrayObj, ArrayStoreError, Value};
use std::sync::Arc;

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), RillError> {
    if args.len() != expected {
        return Err(RillError::type_error(format!(
            "array.{name} expects {expected} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

fn index_arg(name: &str, v: &Value) -> Result<usize, RillError> {
    match v.as_index() {
        Some(n) if n >= 0 => Ok(n as usize),
        Some(n) => Err(RillError::index_error(format!(
            "array.{name}: negative index {n}"
        ))),
        None => Err(RillError::index_error(format!(
            "array.{name}: index must be an integer, got {}",
            v.type_name()
        ))),
    }
}

fn store_error(err: ArrayStoreError, len: usize) -> RillError {
    match err {
        ArrayStoreError::OutOfBounds => {
            RillError::index_error(format!("array index out of bounds (len {len})"))
        }
        ArrayStoreError::TypeMismatch(tag) => {
            RillError::type_error(format!("array is typed {tag}; value does not match"))
        }
    }
}

/// Dispatch a method call on an array receiver.
pub fn call_method(recv: &Arc<ArrayObj>, name: &str, args: &[Value]) -> Result<Value, RillError> {
    match name {
        "length" => {
            arity(name, args, 0)?;
            Ok(Value::I32(recv.len() as i32))
        }
        "push" => {
            arity(name, args, 1)?;
            recv.push(args[0].clone())
                .map_err(|e| store_error(e, recv.len()))?;
            Ok(Value::Null)
        }
        "pop" => {
            arity(name, args, 0)?;
            Ok(recv.pop().unwrap_or(Value::Null))
        }
        "insert" => {
            arity(name, args, 2)?;
            let idx = index_arg(name, &args[0])?;
            recv.insert(idx, args[1].clone())
                .map_err(|e| store_error(e, recv.len()))?;
            Ok(Value::Null)
        }
        "remove" => {
            arity(name, args, 1)?;
            let idx = index_arg(name, &args[0])?;
            recv.remove(idx)
                .ok_or_else(|| RillError::index_error(format!(
                    "array index {idx} out of bounds (len {})",
                    recv.len()
                )))
        }
        "index_of" => {
            arity(name, args, 1)?;
            let pos = recv
                .snapshot()
                .iter()
                .position(|v| values_equal(v, &args[0]));
            Ok(match pos {
                Some(i) => Value::I32(i as i32),
                None => Value::I32(-1),
            })
        }
        "contains" => {
            arity(name, args, 1)?;
            Ok(Value::Bool(
                recv.snapshot().iter().any(|v| values_equal(v, &args[0])),
            ))
        }
        "join" => {
            arity(name, args, 1)?;
            let Value::Str(sep) = &args[0] else {
                return Err(RillError::type_error("array.join expects a string separator"));
            };
            let sep = sep.to_owned_string();
            let joined = recv
                .snapshot()
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(&sep);
            Ok(Value::str(joined))
        }
        "slice" => {
            arity(name, args, 2)?;
            let start = index_arg(name, &args[0])?;
            let end = index_arg(name, &args[1])?;
            let snap = recv.snapshot();
            if start > end || end > snap.len() {
                return Err(RillError::index_error(format!(
                    "array.slice range {start}..{end} out of bounds (len {})",
                    snap.len()
                )));
            }
            Ok(Value::array(snap[start..end].to_vec()))
        }
        "reverse" => {
            arity(name, args, 0)?;
            let mut snap = recv.snapshot();
            snap.reverse();
            Ok(Value::array(snap))
        }
        "sort" => {
            arity(name, args, 0)?;
            let mut snap = recv.snapshot();
            let mut comparable = true;
            snap.sort_by(|a, b| match compare_values(a, b) {
                Some(ord) => ord,
                None => {
                    comparable = false;
                    std::cmp::Ordering::Equal
                }
            });
            if !comparable {
                return Err(RillError::type_error(
                    "array.sort requires comparable elements",
                ));
            }
            Ok(Value::array(snap))
        }
        "clear" => {
            arity(name, args, 0)?;
            while recv.pop().is_some() {}
            Ok(Value::Null)
        }
        other => Err(RillError::new(
            ErrorKind::Field,
            format!("array has no method '{other}'"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_core::TypeTag;

    fn arr(elems: Vec<Value>) -> Arc<ArrayObj> {
        Arc::new(ArrayObj::new(elems, None))
    }

    #[test]
    fn test_push_pop_length() {
        let a = arr(vec![]);
        call_method(&a, "push", &[Value::I32(1)]).unwrap();
        call_method(&a, "push", &[Value::I32(2)]).unwrap();
        assert!(matches!(call_method(&a, "length", &[]).unwrap(), Value::I32(2)));
        assert!(matches!(call_method(&a, "pop", &[]).unwrap(), Value::I32(2)));
        assert!(matches!(call_method(&a, "pop", &[]).unwrap(), Value::I32(1)));
        assert!(call_method(&a, "pop", &[]).unwrap().is_null());
    }

    #[test]
    fn test_typed_array_push_rejected() {
        let a = Arc::new(ArrayObj::new(vec![], Some(TypeTag::I32)));
        let err = call_method(&a, "push", &[Value::str("no")]).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Type));
    }

    #[test]
    fn test_remove_out_of_bounds() {
        let a = arr(vec![Value::I32(1)]);
        let err = call_method(&a, "remove", &[Value::I32(5)]).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Index));
        let err = call_method(&a, "remove", &[Value::I32(-1)]).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Index));
    }

    #[test]
    fn test_index_of_uses_value_equality() {
        let a = arr(vec![Value::I32(1), Value::str("x"), Value::I64(9)]);
        assert!(matches!(
            call_method(&a, "index_of", &[Value::str("x")]).unwrap(),
            Value::I32(1)
        ));
        // Cross-width numeric equality finds the i64 slot.
        assert!(matches!(
            call_method(&a, "index_of", &[Value::I32(9)]).unwrap(),
            Value::I32(2)
        ));
    }

    #[test]
    fn test_join_slice_reverse() {
        let a = arr(vec![Value::I32(1), Value::I32(2), Value::I32(3)]);
        assert_eq!(
            call_method(&a, "join", &[Value::str("-")]).unwrap().to_string(),
            "1-2-3"
        );
        let v = call_method(&a, "slice", &[Value::I32(1), Value::I32(3)]).unwrap();
        assert_eq!(v.to_string(), "[2,3]");
        let v = call_method(&a, "reverse", &[]).unwrap();
        assert_eq!(v.to_string(), "[3,2,1]");
    }

    #[test]
    fn test_sort() {
        let a = arr(vec![Value::I32(3), Value::I32(1), Value::I32(2)]);
        let v = call_method(&a, "sort", &[]).unwrap();
        assert_eq!(v.to_string(), "[1,2,3]");
        let mixed = arr(vec![Value::I32(1), Value::Bool(true)]);
        assert!(call_method(&mixed, "sort", &[]).is_err());
    }
}
