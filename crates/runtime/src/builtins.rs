//! Global builtins
//!
//! The name→function table consulted when a call's identifier is not
//! bound in any scope (user bindings shadow builtins). Arguments arrive
//! already evaluated.

use crate::channel::{self, ChannelObj};
use crate::context::ExecutionContext;
use crate::error::{ErrorKind, EvalResult, RillError};
use crate::eval::{run_task, Interp};
use crate::file::FileObj;
use crate::json;
use crate::os;
use crate::socket::SocketObj;
use crate::task::TaskObj;
use crate::value::{ObjectObj, Value};
use std::sync::Arc;

pub type BuiltinFn = fn(&Interp, &mut ExecutionContext, Vec<Value>, u32) -> EvalResult;

/// Resolve a builtin by name.
pub fn lookup(name: &str) -> Option<BuiltinFn> {
    Some(match name {
        "print" => builtin_print,
        "len" => builtin_len,
        "typeof" => builtin_typeof,
        "str" => builtin_str,
        "free" => builtin_free,
        "serialize" => builtin_serialize,
        "deserialize" => builtin_deserialize,
        "channel" => builtin_channel,
        "spawn" => builtin_spawn,
        "task_debug_info" => builtin_task_debug_info,
        "select" => builtin_select,
        "poll" => builtin_poll,
        "signal" => builtin_signal,
        "sleep" => builtin_sleep,
        "now" => builtin_now,
        "time_ms" => builtin_time_ms,
        "platform" => builtin_platform,
        "arch" => builtin_arch,
        "hostname" => builtin_hostname,
        "username" => builtin_username,
        "homedir" => builtin_homedir,
        "cpu_count" => builtin_cpu_count,
        "total_memory" => builtin_total_memory,
        "free_memory" => builtin_free_memory,
        "uptime" => builtin_uptime,
        "tmpdir" => builtin_tmpdir,
        "open" => builtin_open,
        "connect" => builtin_connect,
        "listen" => builtin_listen,
        _ => return None,
    })
}

fn want(name: &str, args: &[Value], expected: usize) -> Result<(), RillError> {
    if args.len() != expected {
        return Err(RillError::type_error(format!(
            "{name}() expects {expected} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

fn builtin_print(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    let rendered: Vec<String> = args.iter().map(Value::to_string).collect();
    println!("{}", rendered.join(" "));
    Ok(Value::Null)
}

fn builtin_len(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("len", &args, 1)?;
    let n = match &args[0] {
        Value::Str(s) => s.char_len(),
        Value::Array(a) => a.len(),
        Value::Buffer(b) => b.len(),
        Value::Object(o) => o.len(),
        other => {
            return Err(RillError::type_error(format!(
                "len() does not apply to {}",
                other.type_name()
            ))
            .into());
        }
    };
    Ok(Value::I32(n as i32))
}

fn builtin_typeof(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("typeof", &args, 1)?;
    Ok(Value::str(args[0].type_name()))
}

fn builtin_str(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("str", &args, 1)?;
    Ok(Value::str(args[0].to_string()))
}

fn builtin_free(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("free", &args, 1)?;
    args[0].free();
    Ok(Value::Null)
}

fn builtin_serialize(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("serialize", &args, 1)?;
    Ok(Value::str(json::serialize(&args[0])?))
}

fn builtin_deserialize(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("deserialize", &args, 1)?;
    match &args[0] {
        Value::Str(s) => Ok(json::deserialize(&s.to_owned_string())?),
        other => Err(RillError::type_error(format!(
            "deserialize() expects a string, got {}",
            other.type_name()
        ))
        .into()),
    }
}

fn builtin_channel(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    let capacity = match args.first() {
        None => 0,
        Some(v) => match v.as_index() {
            Some(n) if n >= 0 => n as usize,
            _ => {
                return Err(RillError::type_error(
                    "channel() expects a non-negative capacity",
                )
                .into());
            }
        },
    };
    if args.len() > 1 {
        return Err(RillError::type_error("channel() expects at most one argument").into());
    }
    Ok(Value::Channel(Arc::new(ChannelObj::new(capacity))))
}

/// `spawn(f, args...)`: validate the function is async, deep-copy every
/// argument, and submit the task to the pool.
fn builtin_spawn(interp: &Interp, _ctx: &mut ExecutionContext, mut args: Vec<Value>, _line: u32) -> EvalResult {
    if args.is_empty() {
        return Err(RillError::type_error("spawn() expects a function").into());
    }
    let func = args.remove(0);
    let Value::Function(f) = &func else {
        return Err(RillError::type_error(format!(
            "spawn() expects a function, got {}",
            func.type_name()
        ))
        .into());
    };
    if !f.decl.is_async {
        return Err(RillError::type_error("spawn() requires an async function").into());
    }
    let copied: Vec<Value> = args.iter().map(Value::deep_copy).collect();
    let task = Arc::new(TaskObj::new(func.clone(), copied));
    let runtime = Arc::clone(&interp.runtime);
    let worker_task = Arc::clone(&task);
    interp
        .runtime
        .pool()
        .submit(Box::new(move || run_task(runtime, worker_task)));
    tracing::trace!(task = task.id(), "task spawned");
    Ok(Value::Task(task))
}

fn builtin_task_debug_info(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("task_debug_info", &args, 1)?;
    match &args[0] {
        Value::Task(t) => {
            let info = t.debug_info();
            println!("{info}");
            Ok(Value::str(info))
        }
        other => Err(RillError::type_error(format!(
            "task_debug_info() expects a task, got {}",
            other.type_name()
        ))
        .into()),
    }
}

fn channel_list(name: &str, v: &Value) -> Result<Vec<Arc<ChannelObj>>, RillError> {
    let Value::Array(arr) = v else {
        return Err(RillError::type_error(format!(
            "{name}() expects an array of channels"
        )));
    };
    arr.snapshot()
        .into_iter()
        .map(|item| match item {
            Value::Channel(ch) => Ok(ch),
            other => Err(RillError::type_error(format!(
                "{name}(): expected channel, got {}",
                other.type_name()
            ))),
        })
        .collect()
}

fn builtin_select(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    if args.is_empty() || args.len() > 2 {
        return Err(RillError::type_error("select() expects (channels, timeout_ms?)").into());
    }
    let channels = channel_list("select", &args[0])?;
    let timeout = match args.get(1) {
        None => None,
        Some(v) => match v.as_index() {
            Some(ms) if ms >= 0 => Some(std::time::Duration::from_millis(ms as u64)),
            _ => {
                return Err(RillError::type_error(
                    "select() timeout must be a non-negative integer",
                )
                .into());
            }
        },
    };
    match channel::select(&channels, timeout) {
        Some((idx, value)) => {
            let obj = ObjectObj::empty();
            obj.set(Arc::from("channel"), Value::Channel(Arc::clone(&channels[idx])));
            obj.set(Arc::from("value"), value);
            Ok(Value::Object(Arc::new(obj)))
        }
        None => Ok(Value::Null),
    }
}

#[cfg(unix)]
fn builtin_poll(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("poll", &args, 2)?;
    let Value::Array(arr) = &args[0] else {
        return Err(RillError::type_error("poll() expects an array of files or sockets").into());
    };
    let items = arr.snapshot();
    let mut fds = Vec::with_capacity(items.len());
    for item in &items {
        let fd = match item {
            Value::File(f) => f.fd(),
            Value::Socket(s) => s.fd(),
            other => {
                return Err(RillError::type_error(format!(
                    "poll(): expected file or socket, got {}",
                    other.type_name()
                ))
                .into());
            }
        };
        fds.push(fd);
    }
    let timeout = match args[1].as_index() {
        Some(ms) if ms >= -1 => ms as i32,
        _ => return Err(RillError::type_error("poll() timeout must be an integer").into()),
    };
    let ready = channel::poll_fds(&fds, timeout)?;
    Ok(Value::array(
        ready.into_iter().map(|i| items[i].clone()).collect(),
    ))
}

#[cfg(not(unix))]
fn builtin_poll(_interp: &Interp, _ctx: &mut ExecutionContext, _args: Vec<Value>, _line: u32) -> EvalResult {
    Err(RillError::new(ErrorKind::Io, "poll() is not supported here").into())
}

fn builtin_signal(interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("signal", &args, 2)?;
    let signum = match args[0].as_index() {
        Some(n) if n > 0 => n as i32,
        _ => return Err(RillError::type_error("signal() expects a signal number").into()),
    };
    if !matches!(args[1], Value::Function(_)) {
        return Err(RillError::type_error("signal() expects a handler function").into());
    }
    interp
        .runtime
        .signals
        .install(signum, args[1].clone())
        .map_err(|e| RillError::new(ErrorKind::Io, e))?;
    Ok(Value::Null)
}

fn builtin_sleep(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("sleep", &args, 1)?;
    let seconds = match &args[0] {
        Value::F32(f) => f64::from(*f),
        Value::F64(f) => *f,
        other => other.as_index().map(|n| n as f64).ok_or_else(|| {
            RillError::type_error("sleep() expects a number of seconds")
        })?,
    };
    os::sleep(seconds);
    Ok(Value::Null)
}

fn builtin_now(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("now", &args, 0)?;
    Ok(Value::F64(os::now()))
}

fn builtin_time_ms(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("time_ms", &args, 0)?;
    Ok(Value::I64(os::time_ms()))
}

fn builtin_platform(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("platform", &args, 0)?;
    Ok(Value::str(os::platform()))
}

fn builtin_arch(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("arch", &args, 0)?;
    Ok(Value::str(os::arch()))
}

fn builtin_hostname(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("hostname", &args, 0)?;
    Ok(Value::str(os::hostname()))
}

fn builtin_username(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("username", &args, 0)?;
    Ok(Value::str(os::username()))
}

fn builtin_homedir(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("homedir", &args, 0)?;
    Ok(Value::str(os::homedir()))
}

fn builtin_cpu_count(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("cpu_count", &args, 0)?;
    Ok(Value::I32(os::cpu_count() as i32))
}

fn builtin_total_memory(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("total_memory", &args, 0)?;
    Ok(Value::U64(os::total_memory()))
}

fn builtin_free_memory(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("free_memory", &args, 0)?;
    Ok(Value::U64(os::free_memory()))
}

fn builtin_uptime(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("uptime", &args, 0)?;
    Ok(Value::U64(os::uptime()))
}

fn builtin_tmpdir(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("tmpdir", &args, 0)?;
    Ok(Value::str(os::tmpdir()))
}

fn builtin_open(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("open", &args, 2)?;
    let (Value::Str(path), Value::Str(mode)) = (&args[0], &args[1]) else {
        return Err(RillError::type_error("open() expects (path, mode) strings").into());
    };
    let file = FileObj::open(&path.to_owned_string(), &mode.to_owned_string())?;
    Ok(Value::File(Arc::new(file)))
}

fn builtin_connect(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("connect", &args, 2)?;
    let Value::Str(host) = &args[0] else {
        return Err(RillError::type_error("connect() expects (host, port)").into());
    };
    let port = match args[1].as_index() {
        Some(p) if (1..=65535).contains(&p) => p as u16,
        _ => return Err(RillError::type_error("connect(): invalid port").into()),
    };
    let sock = SocketObj::connect(&host.to_owned_string(), port)?;
    Ok(Value::Socket(Arc::new(sock)))
}

fn builtin_listen(_interp: &Interp, _ctx: &mut ExecutionContext, args: Vec<Value>, _line: u32) -> EvalResult {
    want("listen", &args, 1)?;
    let port = match args[0].as_index() {
        Some(p) if (0..=65535).contains(&p) => p as u16,
        _ => return Err(RillError::type_error("listen(): invalid port").into()),
    };
    let sock = SocketObj::listen(port)?;
    Ok(Value::Socket(Arc::new(sock)))
}
