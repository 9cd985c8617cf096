//! Object built-in methods
//!
//! Objects expose four built-ins — `keys`, `has`, `serialize`, `delete` —
//! each shadowed by any user-defined field of the same name: the evaluator
//! consults the object's own fields before this table.

use crate::error::RillError;
use crate::json;
use crate::value::{ObjectObj, Value};
use std::sync::Arc;

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), RillError> {
    if args.len() != expected {
        return Err(RillError::type_error(format!(
            "object.{name} expects {expected} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

/// Dispatch an object built-in. `None` when `name` is not one of the four,
/// so the caller can fall through to `FieldError`.
pub fn call_builtin(
    recv: &Arc<ObjectObj>,
    name: &str,
    args: &[Value],
) -> Option<Result<Value, RillError>> {
    let result = match name {
        "keys" => arity(name, args, 0).map(|()| {
            Value::array(recv.keys().iter().map(|k| Value::str(k.as_ref())).collect())
        }),
        "has" => arity(name, args, 1).and_then(|()| match &args[0] {
            Value::Str(s) => Ok(Value::Bool(recv.has(&s.to_owned_string()))),
            other => Err(RillError::type_error(format!(
                "object.has expects a string field name, got {}",
                other.type_name()
            ))),
        }),
        "serialize" => {
            arity(name, args, 0).and_then(|()| json::serialize(&Value::Object(Arc::clone(recv))))
                .map(Value::str)
        }
        "delete" => arity(name, args, 1).and_then(|()| match &args[0] {
            Value::Str(s) => Ok(Value::Bool(recv.delete(&s.to_owned_string()))),
            other => Err(RillError::type_error(format!(
                "object.delete expects a string field name, got {}",
                other.type_name()
            ))),
        }),
        _ => return None,
    };
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj() -> Arc<ObjectObj> {
        let o = ObjectObj::empty();
        o.set(Arc::from("a"), Value::I32(1));
        o.set(Arc::from("b"), Value::I32(2));
        Arc::new(o)
    }

    #[test]
    fn test_keys_in_insertion_order() {
        let v = call_builtin(&obj(), "keys", &[]).unwrap().unwrap();
        assert_eq!(v.to_string(), r#"["a","b"]"#);
    }

    #[test]
    fn test_has_and_delete() {
        let o = obj();
        let v = call_builtin(&o, "has", &[Value::str("a")]).unwrap().unwrap();
        assert!(matches!(v, Value::Bool(true)));
        let v = call_builtin(&o, "delete", &[Value::str("a")]).unwrap().unwrap();
        assert!(matches!(v, Value::Bool(true)));
        let v = call_builtin(&o, "has", &[Value::str("a")]).unwrap().unwrap();
        assert!(matches!(v, Value::Bool(false)));
        // Deleting a missing field reports false, not an error.
        let v = call_builtin(&o, "delete", &[Value::str("zz")]).unwrap().unwrap();
        assert!(matches!(v, Value::Bool(false)));
    }

    #[test]
    fn test_serialize_builtin() {
        let v = call_builtin(&obj(), "serialize", &[]).unwrap().unwrap();
        assert_eq!(v.to_string(), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn test_unknown_name_falls_through() {
        assert!(call_builtin(&obj(), "custom", &[]).is_none());
    }
}
