//! ArenaJS shell
//!
//! Interactive shell and script runner.

use arenajs::{Context, Value};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

const SCRIPT_MEMORY: usize = 64 * 1024;
const REPL_MEMORY: usize = 256 * 1024;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        run_file(&args[1]);
    } else {
        run_repl();
    }
}

fn print_values(ctx: &mut Context, args: &[Value]) -> Value {
    let line: Vec<String> = args
        .iter()
        .map(|&a| {
            ctx.string_value(a)
                .unwrap_or_else(|| ctx.to_display_string(a))
        })
        .collect();
    println!("{}", line.join(" "));
    Value::UNDEFINED
}

fn new_context(size: usize) -> Context {
    let mut ctx = match Context::new(size) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("ajs: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = ctx.register("print", print_values) {
        eprintln!("ajs: {e}");
        std::process::exit(1);
    }
    ctx
}

fn run_file(filename: &str) {
    let source = match std::fs::read_to_string(filename) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("ajs: {filename}: {e}");
            std::process::exit(1);
        }
    };

    let mut ctx = new_context(SCRIPT_MEMORY);
    let result = ctx.eval(&source);
    if result.is_err() {
        eprintln!("{}", ctx.error_message());
        std::process::exit(1);
    }
}

fn run_repl() {
    println!("ArenaJS shell. Ctrl+D to exit.");

    let mut ctx = new_context(REPL_MEMORY);
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("ajs: {e}");
            std::process::exit(1);
        }
    };

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);
                let v = ctx.eval(line);
                if v.is_err() {
                    println!("{}", ctx.error_message());
                } else {
                    println!("{}", ctx.to_display_string(v));
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("ajs: {e}");
                break;
            }
        }
    }
}
