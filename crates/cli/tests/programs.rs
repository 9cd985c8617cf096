//! End-to-end program tests
//!
//! Each test writes a Rill source file, runs the real binary against it,
//! and checks the observable output and exit code.

use std::path::Path;
use std::process::{Command, Output};

fn run_source(source: &str) -> Output {
    let dir = tempfile::tempdir().unwrap();
    run_in_dir(dir.path(), source, &[])
}

fn run_in_dir(dir: &Path, source: &str, extra_args: &[&str]) -> Output {
    let file = dir.join("main.rill");
    std::fs::write(&file, source).unwrap();
    Command::new(env!("CARGO_BIN_EXE_rill"))
        .arg(&file)
        .args(extra_args)
        .output()
        .expect("failed to run rill binary")
}

fn stdout_lines(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_for_in_sums_array() {
    let out = run_source("let xs = [1,2,3]; let s = 0; for (x in xs) { s = s + x; } print(s);");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_lines(&out), ["6"]);
}

#[test]
fn test_spawn_and_await() {
    let out = run_source("async fn f(x) { return x * 2; } let t = spawn(f, 21); print(await t);");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_lines(&out), ["42"]);
}

#[test]
fn test_buffered_channel_drain_to_null() {
    let out = run_source(
        r#"let ch = channel(2); ch.send("a"); ch.send("b"); ch.close(); print(ch.recv()); print(ch.recv()); print(ch.recv());"#,
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_lines(&out), ["a", "b", "null"]);
}

#[test]
fn test_serialize_object() {
    let out = run_source("const o = {a:1, b:[2,3]}; print(serialize(o));");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_lines(&out), [r#"{"a":1,"b":[2,3]}"#]);
}

#[test]
fn test_serialize_cycle_caught() {
    let out = run_source("let a = {}; a.self = a; try { serialize(a); } catch (e) { print(e); }");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let lines = stdout_lines(&out);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("circular reference"), "got: {}", lines[0]);
}

#[test]
fn test_recursive_factorial() {
    let out = run_source("fn f(n) { if (n <= 1) return 1; return n * f(n - 1); } print(f(5));");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_lines(&out), ["120"]);
}

#[test]
fn test_index_error_caught() {
    let out = run_source(r#"try { let a = [1,2]; print(a[5]); } catch (e) { print("caught"); }"#);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_lines(&out), ["caught"]);
}

#[test]
fn test_uncaught_exception_exit_code_and_trace() {
    let out = run_source("fn boom() { let a = [1]; return a[9]; } boom();");
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("IndexError"), "stderr: {stderr}");
    assert!(stderr.contains("Stack trace (most recent call first):"));
    assert!(stderr.contains("at boom()"));
}

#[test]
fn test_const_binding_raises_const_error() {
    let out = run_source("const x = 1; x = 2;");
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("ConstError"));
}

#[test]
fn test_const_object_contents_still_mutable() {
    let out = run_source("const o = {}; o.y = 1; print(o.y);");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_lines(&out), ["1"]);
}

#[test]
fn test_task_isolation_deep_copy() {
    // The spawned task mutates its own view of the array; the parent's
    // array is untouched.
    let out = run_source(
        "async fn mutate(xs) { xs.push(99); return xs.length(); }\n\
         let a = [1, 2];\n\
         let t = spawn(mutate, a);\n\
         print(await t);\n\
         print(a.length());",
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_lines(&out), ["3", "2"]);
}

#[test]
fn test_rendezvous_channel_between_tasks() {
    let out = run_source(
        "let ch = channel(0);\n\
         async fn producer(c) { c.send(7); return null; }\n\
         let t = spawn(producer, ch);\n\
         print(ch.recv());\n\
         await t;",
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_lines(&out), ["7"]);
}

#[test]
fn test_many_tasks_complete() {
    // Work-stealing liveness: many more tasks than workers, all finish.
    let out = run_source(
        "async fn work(n) { return n * n; }\n\
         let tasks = [];\n\
         for (let i = 0; i < 50; i++) { tasks.push(spawn(work, i)); }\n\
         let sum = 0;\n\
         for (t in tasks) { sum = sum + await t; }\n\
         print(sum);",
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    // sum of squares 0..49
    assert_eq!(stdout_lines(&out), ["40425"]);
}

#[test]
fn test_switch_patterns_and_interpolation() {
    let out = run_source(
        r#"fn describe(v) {
            switch (v) {
                case 0: return "zero";
                case 1..9: return "small";
                case string: return "text";
                case [first, ...rest]: return "list starting ${first}";
                default: return "other";
            }
            return "unreachable";
        }
        print(describe(0));
        print(describe(5));
        print(describe("hi"));
        print(describe([4, 5]));
        print(describe(true));"#,
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(
        stdout_lines(&out),
        ["zero", "small", "text", "list starting 4", "other"]
    );
}

#[test]
fn test_defer_order_and_finally() {
    let out = run_source(
        r#"fn f() {
            defer print("first deferred runs last");
            defer print("second deferred runs first");
            try { throw "boom"; } catch (e) { print("caught ${e}"); } finally { print("finally"); }
            print("body done");
        }
        f();"#,
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(
        stdout_lines(&out),
        [
            "caught boom",
            "finally",
            "body done",
            "second deferred runs first",
            "first deferred runs last",
        ]
    );
}

#[test]
fn test_division_promotes_to_f64() {
    let out = run_source("print(7 / 2); print(7 % 2); print(typeof(7 / 2));");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_lines(&out), ["3.5", "1", "f64"]);
}

#[test]
fn test_json_roundtrip_program() {
    let out = run_source(
        r#"let v = deserialize("{\"n\": 5, \"xs\": [1, 2.5, true, null]}");
        print(v.n);
        print(v.xs[1]);
        print(serialize(v));"#,
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(
        stdout_lines(&out),
        ["5", "2.5", r#"{"n":5,"xs":[1,2.5,true,null]}"#]
    );
}

#[test]
fn test_modules_import() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("mathx.rill"),
        "export fn double(n) { return n * 2; } export const BASE = 10;",
    )
    .unwrap();
    let out = run_in_dir(
        dir.path(),
        r#"import { double, BASE } from "mathx"; print(double(BASE));"#,
        &[],
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_lines(&out), ["20"]);
}

#[test]
fn test_circular_import_is_module_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.rill"), "import { b } from \"b\"; export let a = 1;").unwrap();
    std::fs::write(dir.path().join("b.rill"), "import { a } from \"a\"; export let b = 2;").unwrap();
    let out = run_in_dir(dir.path(), "import { a } from \"a\"; print(a);", &[]);
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("ModuleError"), "stderr: {stderr}");
    assert!(stderr.contains("circular"), "stderr: {stderr}");
}

#[test]
fn test_argv_visible_to_script() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_in_dir(dir.path(), "print(len(argv)); print(argv[1]);", &["alpha", "beta"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_lines(&out), ["3", "alpha"]);
}

#[test]
fn test_recursion_error() {
    let out = run_source("fn f() { return f(); } f();");
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("RecursionError"));
}

#[test]
fn test_free_then_use_reads_sentinels() {
    let out = run_source(
        "let a = [1, 2, 3]; free(a); free(a); print(a[0]); print(len(a));",
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_lines(&out), ["null", "0"]);
}

#[test]
fn test_string_codepoint_indexing() {
    let out = run_source(
        r#"let s = "héllo"; print(s[1]); print(len(s)); print(s.byte_length());"#,
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_lines(&out), ["é", "5", "6"]);
}

#[test]
fn test_channel_recv_timeout() {
    let out = run_source("let ch = channel(1); print(ch.recv_timeout(20));");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_lines(&out), ["null"]);
}

#[test]
fn test_send_on_closed_channel_raises() {
    let out = run_source(
        r#"let ch = channel(1); ch.close(); try { ch.send(1); } catch (e) { print(e); }"#,
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let lines = stdout_lines(&out);
    assert!(lines[0].contains("ChannelClosed"), "got: {}", lines[0]);
}

#[test]
fn test_select_builtin() {
    let out = run_source(
        "let a = channel(1);\n\
         let b = channel(1);\n\
         b.send(5);\n\
         let r = select([a, b], 100);\n\
         print(r.value);",
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_lines(&out), ["5"]);
}

#[test]
fn test_equality_semantics() {
    let out = run_source(
        r#"let a = {x: 1}; let b = {x: 1};
        print(a == b);
        print(a == a);
        print(a + "" == b + "");
        print(1 == "1");"#,
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout_lines(&out), ["false", "true", "true", "false"]);
}
