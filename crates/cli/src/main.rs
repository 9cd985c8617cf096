//! Rill CLI
//!
//! Runs a Rill source file: parse, execute, report. Exit code 0 on
//! success; 1 on any uncaught exception (message and stack trace on
//! stderr) or host-level failure.

use clap::Parser as ClapParser;
use rill_frontend::FsResolver;
use rill_runtime::{Env, ExecutionContext, Interp, Runtime, Value};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "rill")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Rill language interpreter", long_about = None)]
struct Cli {
    /// Rill source file to run
    file: PathBuf,

    /// Arguments passed to the script as `argv` (after the file name)
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,

    /// Additional module search paths, tried before the script's directory
    #[arg(short = 'I', long = "search-path", value_name = "DIR")]
    search_paths: Vec<PathBuf>,

    /// Worker-thread count override (clamped to the pool bounds)
    #[arg(long)]
    workers: Option<usize>,
}

fn main() {
    // RILL_LOG selects tracing output, e.g. RILL_LOG=rill_runtime=debug.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("RILL_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    if let Some(workers) = cli.workers {
        rill_runtime::pool::configure_workers(workers);
    }

    let source = match std::fs::read_to_string(&cli.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("rill: cannot read '{}': {e}", cli.file.display());
            return 1;
        }
    };

    let program = match rill_frontend::parse_program(&source) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("rill: {}: {e}", cli.file.display());
            return 1;
        }
    };

    let script_dir = cli
        .file
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let runtime = Runtime::new();
    runtime.set_resolver(Box::new(FsResolver::new(cli.search_paths.clone())));

    let root = Env::new_root();
    runtime.set_root(Arc::clone(&root));

    // Script-visible argv: the file name, then the trailing arguments.
    let mut argv = vec![Value::str(cli.file.display().to_string())];
    argv.extend(cli.args.iter().map(Value::str));
    if root
        .define(Arc::from("argv"), Value::array(argv), true)
        .is_err()
    {
        eprintln!("rill: internal error: cannot seed argv");
        return 1;
    }

    let interp = Interp::new(Arc::clone(&runtime)).with_module_dir(script_dir);
    let mut ctx = ExecutionContext::new();
    let outcome = interp.run_program(&program, &root, &mut ctx);

    let code = match outcome {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{err}");
            eprintln!("{}", ctx.render_trace());
            1
        }
    };

    runtime.shutdown();
    code
}
