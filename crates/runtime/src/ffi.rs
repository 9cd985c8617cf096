//! Foreign function interface
//!
//! The wire representation of a value is a 16-byte C-compatible struct:
//! a 4-byte tag, 4 bytes of padding, and an 8-byte payload union. The
//! runtime packs `Value` arguments into that representation, invokes the
//! foreign pointer through a C-ABI signature descriptor, and unpacks the
//! returned word.
//!
//! Symbols declared with `extern fn` resolve against the process image
//! (`dlsym` on the default handle); the embedder can also register
//! pointers directly. Signatures are restricted to what a
//! transmuted-function-pointer call can honor on the C ABI — integer/
//! pointer parameter lists or all-double parameter lists, up to six
//! parameters. Anything else fails with `FFIError` rather than corrupting
//! a call frame.

use crate::error::{ErrorKind, RillError};
use crate::value::Value;
use rill_core::TypeTag;
use std::ffi::CString;
use std::os::raw::c_void;

/// Value tags in the wire representation.
pub const TAG_NULL: u32 = 0;
pub const TAG_BOOL: u32 = 1;
pub const TAG_I32: u32 = 2;
pub const TAG_I64: u32 = 3;
pub const TAG_U64: u32 = 4;
pub const TAG_F64: u32 = 5;
pub const TAG_PTR: u32 = 6;
pub const TAG_STR: u32 = 7;

/// The 16-byte tagged value crossing the FFI boundary.
#[repr(C)]
pub struct RawValue {
    pub tag: u32,
    pub _pad: u32,
    pub payload: RawPayload,
}

impl std::fmt::Debug for RawValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawValue").field("tag", &self.tag).finish()
    }
}

#[repr(C)]
pub union RawPayload {
    pub int: i64,
    pub uint: u64,
    pub float: f64,
    pub ptr: *mut c_void,
}

/// C-ABI parameter/return classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CType {
    Void,
    I32,
    I64,
    U64,
    F64,
    Ptr,
    Str,
}

impl CType {
    /// Map a surface type annotation onto its ABI class.
    pub fn from_tag(tag: &TypeTag) -> Result<CType, RillError> {
        match tag {
            TypeTag::I8 | TypeTag::I16 | TypeTag::I32 => Ok(CType::I32),
            TypeTag::I64 => Ok(CType::I64),
            TypeTag::U8 | TypeTag::U16 | TypeTag::U32 | TypeTag::U64 => Ok(CType::U64),
            TypeTag::F32 | TypeTag::F64 => Ok(CType::F64),
            TypeTag::Str => Ok(CType::Str),
            TypeTag::Bool => Ok(CType::I32),
            other => Err(RillError::new(
                ErrorKind::Ffi,
                format!("type '{other}' cannot cross the FFI boundary"),
            )),
        }
    }

    fn is_float(self) -> bool {
        self == CType::F64
    }
}

/// Pack one argument. Strings are copied into NUL-terminated storage that
/// must outlive the call; `holder` keeps them alive.
pub fn pack(value: &Value, ctype: CType, holder: &mut Vec<CString>) -> Result<RawValue, RillError> {
    let raw = match (ctype, value) {
        (CType::I32 | CType::I64, _) if value.is_numeric() || matches!(value, Value::Bool(_)) => {
            let n = match value {
                Value::Bool(b) => i64::from(*b),
                other => other.as_index().unwrap_or_else(|| match other {
                    Value::F32(f) => *f as i64,
                    Value::F64(f) => *f as i64,
                    _ => 0,
                }),
            };
            RawValue {
                tag: if ctype == CType::I32 { TAG_I32 } else { TAG_I64 },
                _pad: 0,
                payload: RawPayload { int: n },
            }
        }
        (CType::U64, _) if value.is_numeric() => RawValue {
            tag: TAG_U64,
            _pad: 0,
            payload: RawPayload {
                uint: value.as_index().unwrap_or(0) as u64,
            },
        },
        (CType::F64, _) if value.is_numeric() => {
            let f = match value {
                Value::F32(f) => f64::from(*f),
                Value::F64(f) => *f,
                other => other.as_index().unwrap_or(0) as f64,
            };
            RawValue {
                tag: TAG_F64,
                _pad: 0,
                payload: RawPayload { float: f },
            }
        }
        (CType::Ptr, Value::Ptr(p)) => RawValue {
            tag: TAG_PTR,
            _pad: 0,
            payload: RawPayload {
                ptr: *p as *mut c_void,
            },
        },
        (CType::Ptr, Value::Null) => RawValue {
            tag: TAG_PTR,
            _pad: 0,
            payload: RawPayload {
                ptr: std::ptr::null_mut(),
            },
        },
        (CType::Str, Value::Str(s)) => {
            let c = CString::new(s.to_owned_string()).map_err(|_| {
                RillError::new(ErrorKind::Ffi, "string argument contains a NUL byte")
            })?;
            let ptr = c.as_ptr() as *mut c_void;
            holder.push(c);
            RawValue {
                tag: TAG_STR,
                _pad: 0,
                payload: RawPayload { ptr },
            }
        }
        _ => {
            return Err(RillError::new(
                ErrorKind::Ffi,
                format!("cannot pass {} as {:?}", value.type_name(), ctype),
            ));
        }
    };
    Ok(raw)
}

/// Interpret a returned word according to the declared return class.
pub fn unpack(word: u64, fword: f64, ret: CType) -> Value {
    match ret {
        CType::Void => Value::Null,
        CType::I32 => Value::I32(word as u32 as i32),
        CType::I64 => Value::I64(word as i64),
        CType::U64 => Value::U64(word),
        CType::F64 => Value::F64(fword),
        CType::Ptr | CType::Str => Value::Ptr(word as usize),
    }
}

/// A resolved foreign function: pointer plus signature descriptor.
#[derive(Debug, Clone)]
pub struct ForeignFn {
    pub name: String,
    pub ptr: usize,
    pub params: Vec<CType>,
    pub ret: CType,
}

impl ForeignFn {
    /// Resolve `name` against the process image.
    #[cfg(unix)]
    pub fn resolve(name: &str, params: Vec<CType>, ret: CType) -> Result<ForeignFn, RillError> {
        let symbol = CString::new(name)
            .map_err(|_| RillError::new(ErrorKind::Ffi, "symbol name contains a NUL byte"))?;
        let ptr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, symbol.as_ptr()) };
        if ptr.is_null() {
            return Err(RillError::new(
                ErrorKind::Ffi,
                format!("symbol '{name}' not found"),
            ));
        }
        Ok(ForeignFn {
            name: name.to_string(),
            ptr: ptr as usize,
            params,
            ret,
        })
    }

    /// Invoke the foreign pointer with packed arguments.
    pub fn call(&self, args: &[Value]) -> Result<Value, RillError> {
        if args.len() != self.params.len() {
            return Err(RillError::new(
                ErrorKind::Ffi,
                format!(
                    "'{}' expects {} arguments, got {}",
                    self.name,
                    self.params.len(),
                    args.len()
                ),
            ));
        }
        if self.params.len() > 6 {
            return Err(RillError::new(
                ErrorKind::Ffi,
                format!("'{}': more than 6 parameters is unsupported", self.name),
            ));
        }
        let all_float = self.params.iter().all(|p| p.is_float());
        let any_float = self.params.iter().any(|p| p.is_float());
        if any_float && !all_float {
            return Err(RillError::new(
                ErrorKind::Ffi,
                format!("'{}': mixed float/integer parameters are unsupported", self.name),
            ));
        }

        let mut holder = Vec::new();
        let mut words = [0u64; 6];
        let mut floats = [0f64; 6];
        for (i, (arg, ctype)) in args.iter().zip(self.params.iter()).enumerate() {
            let raw = pack(arg, *ctype, &mut holder)?;
            // Safety: every union field is 8 bytes; reading `uint`/`float`
            // reinterprets the stored word, which is exactly the wire
            // contract.
            unsafe {
                words[i] = raw.payload.uint;
                floats[i] = raw.payload.float;
            }
        }

        let ret_float = self.ret.is_float();
        let (word, fword) = if all_float && !self.params.is_empty() {
            if !ret_float {
                return Err(RillError::new(
                    ErrorKind::Ffi,
                    format!(
                        "'{}': all-double parameters require a double return",
                        self.name
                    ),
                ));
            }
            (0u64, unsafe { call_floats(self.ptr, &floats[..args.len()])? })
        } else {
            unsafe { call_words(self.ptr, &words[..args.len()], ret_float)? }
        };
        Ok(unpack(word, fword, self.ret))
    }
}

/// Integer/pointer argument call. Returns `(integer word, float word)`;
/// only the one matching `ret_float` is meaningful.
///
/// # Safety
/// `ptr` must be a C-ABI function taking `args.len()` word-class
/// parameters; the transmutes below rely on it.
unsafe fn call_words(ptr: usize, args: &[u64], ret_float: bool) -> Result<(u64, f64), RillError> {
    if ret_float {
        let f = unsafe {
            match args {
                [] => std::mem::transmute::<usize, unsafe extern "C" fn() -> f64>(ptr)(),
                [a] => std::mem::transmute::<usize, unsafe extern "C" fn(u64) -> f64>(ptr)(*a),
                [a, b] => {
                    std::mem::transmute::<usize, unsafe extern "C" fn(u64, u64) -> f64>(ptr)(*a, *b)
                }
                [a, b, c] => std::mem::transmute::<usize, unsafe extern "C" fn(u64, u64, u64) -> f64>(
                    ptr,
                )(*a, *b, *c),
                [a, b, c, d] => std::mem::transmute::<
                    usize,
                    unsafe extern "C" fn(u64, u64, u64, u64) -> f64,
                >(ptr)(*a, *b, *c, *d),
                [a, b, c, d, e] => std::mem::transmute::<
                    usize,
                    unsafe extern "C" fn(u64, u64, u64, u64, u64) -> f64,
                >(ptr)(*a, *b, *c, *d, *e),
                [a, b, c, d, e, g] => std::mem::transmute::<
                    usize,
                    unsafe extern "C" fn(u64, u64, u64, u64, u64, u64) -> f64,
                >(ptr)(*a, *b, *c, *d, *e, *g),
                _ => return Err(RillError::new(ErrorKind::Ffi, "unsupported arity")),
            }
        };
        return Ok((0, f));
    }
    let w = unsafe {
        match args {
            [] => std::mem::transmute::<usize, unsafe extern "C" fn() -> u64>(ptr)(),
            [a] => std::mem::transmute::<usize, unsafe extern "C" fn(u64) -> u64>(ptr)(*a),
            [a, b] => {
                std::mem::transmute::<usize, unsafe extern "C" fn(u64, u64) -> u64>(ptr)(*a, *b)
            }
            [a, b, c] => {
                std::mem::transmute::<usize, unsafe extern "C" fn(u64, u64, u64) -> u64>(ptr)(
                    *a, *b, *c,
                )
            }
            [a, b, c, d] => std::mem::transmute::<
                usize,
                unsafe extern "C" fn(u64, u64, u64, u64) -> u64,
            >(ptr)(*a, *b, *c, *d),
            [a, b, c, d, e] => std::mem::transmute::<
                usize,
                unsafe extern "C" fn(u64, u64, u64, u64, u64) -> u64,
            >(ptr)(*a, *b, *c, *d, *e),
            [a, b, c, d, e, g] => std::mem::transmute::<
                usize,
                unsafe extern "C" fn(u64, u64, u64, u64, u64, u64) -> u64,
            >(ptr)(*a, *b, *c, *d, *e, *g),
            _ => return Err(RillError::new(ErrorKind::Ffi, "unsupported arity")),
        }
    };
    Ok((w, 0.0))
}

/// All-double argument call; the return must also be a double.
///
/// # Safety
/// `ptr` must be a C-ABI function taking `args.len()` double parameters.
unsafe fn call_floats(ptr: usize, args: &[f64]) -> Result<f64, RillError> {
    let f = unsafe {
        match args {
            [a] => std::mem::transmute::<usize, unsafe extern "C" fn(f64) -> f64>(ptr)(*a),
            [a, b] => {
                std::mem::transmute::<usize, unsafe extern "C" fn(f64, f64) -> f64>(ptr)(*a, *b)
            }
            [a, b, c] => {
                std::mem::transmute::<usize, unsafe extern "C" fn(f64, f64, f64) -> f64>(ptr)(
                    *a, *b, *c,
                )
            }
            [a, b, c, d] => std::mem::transmute::<
                usize,
                unsafe extern "C" fn(f64, f64, f64, f64) -> f64,
            >(ptr)(*a, *b, *c, *d),
            [a, b, c, d, e] => std::mem::transmute::<
                usize,
                unsafe extern "C" fn(f64, f64, f64, f64, f64) -> f64,
            >(ptr)(*a, *b, *c, *d, *e),
            [a, b, c, d, e, g] => std::mem::transmute::<
                usize,
                unsafe extern "C" fn(f64, f64, f64, f64, f64, f64) -> f64,
            >(ptr)(*a, *b, *c, *d, *e, *g),
            _ => return Err(RillError::new(ErrorKind::Ffi, "unsupported arity")),
        }
    };
    Ok(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};

    #[test]
    fn test_raw_value_is_16_bytes() {
        // The wire contract: 4-byte tag, 4-byte padding, 8-byte union.
        assert_eq!(size_of::<RawValue>(), 16);
        assert_eq!(align_of::<RawValue>(), 8);
        assert_eq!(size_of::<RawPayload>(), 8);
        let v = RawValue {
            tag: TAG_I64,
            _pad: 0,
            payload: RawPayload { int: -1 },
        };
        let base = &v as *const RawValue as usize;
        let payload = std::ptr::addr_of!(v.payload) as usize;
        assert_eq!(payload - base, 8);
    }

    #[test]
    fn test_pack_numeric_and_string() {
        let mut holder = Vec::new();
        let raw = pack(&Value::I32(-7), CType::I32, &mut holder).unwrap();
        assert_eq!(unsafe { raw.payload.int }, -7);
        let raw = pack(&Value::F64(2.5), CType::F64, &mut holder).unwrap();
        assert_eq!(unsafe { raw.payload.float }, 2.5);
        let raw = pack(&Value::str("abc"), CType::Str, &mut holder).unwrap();
        assert!(!unsafe { raw.payload.ptr }.is_null());
        assert_eq!(holder.len(), 1);
        // NUL bytes cannot cross.
        assert!(pack(&Value::str("a\0b"), CType::Str, &mut holder).is_err());
    }

    #[test]
    fn test_pack_type_mismatch_is_ffi_error() {
        let mut holder = Vec::new();
        let err = pack(&Value::Null, CType::I32, &mut holder).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Ffi));
    }

    #[cfg(unix)]
    #[test]
    fn test_call_libc_abs() {
        let f = ForeignFn::resolve("abs", vec![CType::I32], CType::I32).unwrap();
        let v = f.call(&[Value::I32(-42)]).unwrap();
        assert!(matches!(v, Value::I32(42)));
    }

    #[cfg(unix)]
    #[test]
    fn test_call_libc_strlen() {
        let f = ForeignFn::resolve("strlen", vec![CType::Str], CType::U64).unwrap();
        let v = f.call(&[Value::str("hello")]).unwrap();
        assert!(matches!(v, Value::U64(5)));
    }

    #[cfg(unix)]
    #[test]
    fn test_call_libc_sqrt_all_floats() {
        let f = ForeignFn::resolve("sqrt", vec![CType::F64], CType::F64).unwrap();
        let v = f.call(&[Value::F64(9.0)]).unwrap();
        assert!(matches!(v, Value::F64(x) if x == 3.0));
    }

    #[cfg(unix)]
    #[test]
    fn test_unresolved_symbol_is_ffi_error() {
        let err = ForeignFn::resolve("rill_no_such_symbol_xyz", vec![], CType::Void).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Ffi));
    }

    #[test]
    fn test_mixed_signature_rejected() {
        let f = ForeignFn {
            name: "mixed".into(),
            ptr: 8, // never called
            params: vec![CType::I32, CType::F64],
            ret: CType::Void,
        };
        let err = f.call(&[Value::I32(1), Value::F64(1.0)]).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Ffi));
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let f = ForeignFn {
            name: "f".into(),
            ptr: 8,
            params: vec![CType::I32],
            ret: CType::Void,
        };
        let err = f.call(&[]).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Ffi));
    }
}
