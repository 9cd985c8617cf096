//! String methods
//!
//! The fixed method table dispatched on string receivers. Positions are
//! codepoint positions throughout, matching string indexing; `length` is
//! the cached codepoint count, `byte_length` the raw buffer size.

use crate::error::{ErrorKind, RillError};
use crate::value::{StrObj, Value};
use std::sync::Arc;

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), RillError> {
    if args.len() != expected {
        return Err(RillError::type_error(format!(
            "string.{name} expects {expected} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

fn str_arg(name: &str, v: &Value) -> Result<String, RillError> {
    match v {
        Value::Str(s) => Ok(s.to_owned_string()),
        other => Err(RillError::type_error(format!(
            "string.{name} expects a string argument, got {}",
            other.type_name()
        ))),
    }
}

/// Dispatch a method call on a string receiver.
pub fn call_method(recv: &Arc<StrObj>, name: &str, args: &[Value]) -> Result<Value, RillError> {
    match name {
        "length" => {
            arity(name, args, 0)?;
            Ok(Value::I32(recv.char_len() as i32))
        }
        "byte_length" => {
            arity(name, args, 0)?;
            Ok(Value::I32(recv.byte_len() as i32))
        }
        "upper" => {
            arity(name, args, 0)?;
            Ok(Value::str(recv.read(str::to_uppercase)))
        }
        "lower" => {
            arity(name, args, 0)?;
            Ok(Value::str(recv.read(str::to_lowercase)))
        }
        "trim" => {
            arity(name, args, 0)?;
            Ok(Value::str(recv.read(|s| s.trim().to_string())))
        }
        "contains" => {
            arity(name, args, 1)?;
            let needle = str_arg(name, &args[0])?;
            Ok(Value::Bool(recv.read(|s| s.contains(&needle))))
        }
        "starts_with" => {
            arity(name, args, 1)?;
            let prefix = str_arg(name, &args[0])?;
            Ok(Value::Bool(recv.read(|s| s.starts_with(&prefix))))
        }
        "ends_with" => {
            arity(name, args, 1)?;
            let suffix = str_arg(name, &args[0])?;
            Ok(Value::Bool(recv.read(|s| s.ends_with(&suffix))))
        }
        "index_of" => {
            arity(name, args, 1)?;
            let needle = str_arg(name, &args[0])?;
            Ok(recv.read(|s| match s.find(&needle) {
                // Byte offset converted to codepoint position.
                Some(byte_pos) => Value::I32(s[..byte_pos].chars().count() as i32),
                None => Value::I32(-1),
            }))
        }
        "split" => {
            arity(name, args, 1)?;
            let sep = str_arg(name, &args[0])?;
            let parts = recv.read(|s| {
                s.split(sep.as_str())
                    .map(Value::str)
                    .collect::<Vec<_>>()
            });
            Ok(Value::array(parts))
        }
        "substring" => {
            arity(name, args, 2)?;
            let (start, end) = match (args[0].as_index(), args[1].as_index()) {
                (Some(a), Some(b)) if a >= 0 && b >= a => (a as usize, b as usize),
                _ => {
                    return Err(RillError::index_error(
                        "string.substring expects 0 <= start <= end",
                    ));
                }
            };
            Ok(Value::str(recv.read(|s| {
                s.chars().skip(start).take(end - start).collect::<String>()
            })))
        }
        "replace" => {
            arity(name, args, 2)?;
            let old = str_arg(name, &args[0])?;
            let new = str_arg(name, &args[1])?;
            Ok(Value::str(recv.read(|s| s.replace(&old, &new))))
        }
        "chars" => {
            arity(name, args, 0)?;
            let runes = recv.read(|s| s.chars().map(Value::Rune).collect::<Vec<_>>());
            Ok(Value::array(runes))
        }
        "to_int" => {
            arity(name, args, 0)?;
            recv.read(|s| s.trim().parse::<i64>())
                .map(|n| match i32::try_from(n) {
                    Ok(small) => Value::I32(small),
                    Err(_) => Value::I64(n),
                })
                .map_err(|_| RillError::type_error("string.to_int: not an integer"))
        }
        "to_float" => {
            arity(name, args, 0)?;
            recv.read(|s| s.trim().parse::<f64>())
                .map(Value::F64)
                .map_err(|_| RillError::type_error("string.to_float: not a number"))
        }
        "bytes" => {
            arity(name, args, 0)?;
            Ok(Value::Buffer(Arc::new(crate::value::BufferObj::new(
                recv.read(|s| s.as_bytes().to_vec()),
            ))))
        }
        other => Err(RillError::new(
            ErrorKind::Field,
            format!("string has no method '{other}'"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Arc<StrObj> {
        Arc::new(StrObj::new(text))
    }

    #[test]
    fn test_length_is_codepoints() {
        let v = call_method(&s("héllo"), "length", &[]).unwrap();
        assert!(matches!(v, Value::I32(5)));
        let v = call_method(&s("héllo"), "byte_length", &[]).unwrap();
        assert!(matches!(v, Value::I32(6)));
    }

    #[test]
    fn test_split_and_join_shapes() {
        let v = call_method(&s("a,b,c"), "split", &[Value::str(",")]).unwrap();
        let Value::Array(arr) = v else { panic!("expected array") };
        assert_eq!(arr.len(), 3);
        assert_eq!(arr.get(1).unwrap().to_string(), "b");
    }

    #[test]
    fn test_substring_by_codepoints() {
        let v = call_method(&s("naïveté"), "substring", &[Value::I32(2), Value::I32(5)]).unwrap();
        assert_eq!(v.to_string(), "ïve");
    }

    #[test]
    fn test_index_of_returns_codepoint_position() {
        let v = call_method(&s("héllo"), "index_of", &[Value::str("llo")]).unwrap();
        assert!(matches!(v, Value::I32(2)));
        let v = call_method(&s("x"), "index_of", &[Value::str("q")]).unwrap();
        assert!(matches!(v, Value::I32(-1)));
    }

    #[test]
    fn test_to_int_staging() {
        let v = call_method(&s(" 42 "), "to_int", &[]).unwrap();
        assert!(matches!(v, Value::I32(42)));
        let v = call_method(&s("4294967296"), "to_int", &[]).unwrap();
        assert!(matches!(v, Value::I64(4294967296)));
        assert!(call_method(&s("nope"), "to_int", &[]).is_err());
    }

    #[test]
    fn test_unknown_method_is_field_error() {
        let err = call_method(&s("x"), "frobnicate", &[]).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Field));
    }

    #[test]
    fn test_bad_arity_is_type_error() {
        let err = call_method(&s("x"), "upper", &[Value::I32(1)]).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Type));
    }
}
