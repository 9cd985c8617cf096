//! Buffer methods

use crate::error::{ErrorKind, RillError};
use crate::value::{BufferObj, Value};
use std::sync::Arc;

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), RillError> {
    if args.len() != expected {
        return Err(RillError::type_error(format!(
            "buffer.{name} expects {expected} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

/// Dispatch a method call on a buffer receiver.
pub fn call_method(recv: &Arc<BufferObj>, name: &str, args: &[Value]) -> Result<Value, RillError> {
    match name {
        "length" => {
            arity(name, args, 0)?;
            Ok(Value::I32(recv.len() as i32))
        }
        "push" => {
            arity(name, args, 1)?;
            match args[0].as_index() {
                Some(b) if (0..=255).contains(&b) => {
                    recv.push(b as u8);
                    Ok(Value::Null)
                }
                _ => Err(RillError::type_error("buffer.push expects a byte (0..=255)")),
            }
        }
        "slice" => {
            arity(name, args, 2)?;
            let (start, end) = match (args[0].as_index(), args[1].as_index()) {
                (Some(a), Some(b)) if a >= 0 && b >= a => (a as usize, b as usize),
                _ => return Err(RillError::index_error("buffer.slice expects 0 <= start <= end")),
            };
            let bytes = recv.to_vec();
            if end > bytes.len() {
                return Err(RillError::index_error(format!(
                    "buffer.slice range {start}..{end} out of bounds (len {})",
                    bytes.len()
                )));
            }
            Ok(Value::Buffer(Arc::new(BufferObj::new(
                bytes[start..end].to_vec(),
            ))))
        }
        "to_string" => {
            arity(name, args, 0)?;
            Ok(Value::str(String::from_utf8_lossy(&recv.to_vec()).into_owned()))
        }
        other => Err(RillError::new(
            ErrorKind::Field,
            format!("buffer has no method '{other}'"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_length() {
        let b = Arc::new(BufferObj::new(vec![1, 2]));
        call_method(&b, "push", &[Value::I32(255)]).unwrap();
        assert!(matches!(call_method(&b, "length", &[]).unwrap(), Value::I32(3)));
        let err = call_method(&b, "push", &[Value::I32(256)]).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Type));
    }

    #[test]
    fn test_slice_and_to_string() {
        let b = Arc::new(BufferObj::new(b"hello".to_vec()));
        let v = call_method(&b, "slice", &[Value::I32(1), Value::I32(4)]).unwrap();
        let Value::Buffer(sub) = &v else { panic!("expected buffer") };
        assert_eq!(sub.to_vec(), b"ell");
        let v = call_method(&b, "to_string", &[]).unwrap();
        assert_eq!(v.to_string(), "hello");
    }
}
