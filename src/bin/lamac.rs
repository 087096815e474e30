//! The main compiler binary.  Takes a source file and an output format (a
//! compiled executable by default); the executable is produced by handing
//! the generated assembly and the precompiled runtime to `gcc`.
//!
//! Run with `--help` for more info.

use std::path::{Path, PathBuf};
use std::process::Command;

use clap::{Parser, ValueEnum};

use lama::back::codegen::codegen;
use lama::front::{eval, lex, parse::parse};
use lama::middle::{interp, lower::lower, sm};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input file
    file: PathBuf,
    /// the output format
    #[arg(value_enum, short, long, default_value_t = Output::Exe)]
    out: Output,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
enum Output {
    /// the list of tokens
    Tokens,
    /// the ast data structure
    Ast,
    /// the stack machine listing
    Sm,
    /// the resulting assembly code
    Asm,
    /// an executable linked against the runtime
    Exe,
    /// interpret the ast, reading integers from stdin
    AstRun,
    /// interpret the stack machine program, reading integers from stdin
    SmRun,
}

// clap needs the default value rendered the way the user would spell it.
impl std::fmt::Display for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.to_possible_value()
            .expect("no variant is skipped")
            .get_name()
            .fmt(f)
    }
}

fn main() {
    use Output::*;
    let args = Args::parse();

    let input = std::fs::read_to_string(&args.file)
        .unwrap_or_else(|e| die(format!("{}: {e}", args.file.display())));

    match args.out {
        Tokens => {
            let mut lexer = lex::Lexer::new(&input);
            loop {
                match lexer.next() {
                    Ok(Some(token)) => println!("{token}"),
                    Ok(None) => break,
                    Err(e) => die(e),
                }
            }
        }
        Ast => {
            println!("{:?}", parse(&input).unwrap_or_else(|e| die(e)));
        }
        Sm => {
            let ast = parse(&input).unwrap_or_else(|e| die(e));
            let program = lower(&ast).unwrap_or_else(|e| die(e));
            print!("{}", sm::listing(&program));
        }
        Asm => {
            print!("{}", compile_asm(&input).unwrap_or_else(|e| die(e)));
        }
        Exe => {
            let asm = compile_asm(&input).unwrap_or_else(|e| die(e));
            let (asm_file, exe_file) = output_paths(&args.file);
            std::fs::write(&asm_file, asm)
                .unwrap_or_else(|e| die(format!("{}: {e}", asm_file.display())));
            let status = Command::new("gcc")
                .arg("-g")
                .arg("-m32")
                .arg("-o")
                .arg(&exe_file)
                .arg(runtime_object())
                .arg(&asm_file)
                .status()
                .unwrap_or_else(|e| die(format!("failed to run gcc: {e}")));
            std::process::exit(status.code().unwrap_or(1));
        }
        AstRun => {
            let ast = parse(&input).unwrap_or_else(|e| die(e));
            let output = eval::run(&ast, &stdin_ints()).unwrap_or_else(|e| die(e));
            for v in output {
                println!("{v}");
            }
        }
        SmRun => {
            let ast = parse(&input).unwrap_or_else(|e| die(e));
            let program = lower(&ast).unwrap_or_else(|e| die(e));
            let output = interp::run(&program, &stdin_ints()).unwrap_or_else(|e| die(e));
            for v in output {
                println!("{v}");
            }
        }
    }
}

fn compile_asm(input: &str) -> Result<String, Box<dyn std::error::Error>> {
    let ast = parse(input)?;
    let sm = lower(&ast)?;
    let program = codegen(&sm)?;
    Ok(program.asm_code())
}

// For an input `B.xyz`, the assembly goes to `B.s` and the executable to
// `B`.
fn output_paths(input: &Path) -> (PathBuf, PathBuf) {
    let exe = input.with_extension("");
    let asm = input.with_extension("s");
    (asm, exe)
}

/// The precompiled runtime object, next to `$LAMA_RUNTIME` (defaulting to
/// `../runtime`).
fn runtime_object() -> PathBuf {
    let dir = std::env::var("LAMA_RUNTIME").unwrap_or_else(|_| "../runtime".to_string());
    Path::new(&dir).join("runtime.o")
}

fn stdin_ints() -> Vec<i32> {
    let mut text = String::new();
    use std::io::Read as _;
    std::io::stdin()
        .read_to_string(&mut text)
        .unwrap_or_else(|e| die(format!("reading stdin: {e}")));
    text.split_whitespace()
        .map(|w| {
            w.parse()
                .unwrap_or_else(|_| die(format!("not an integer: {w}")))
        })
        .collect()
}

fn die(message: impl std::fmt::Display) -> ! {
    eprintln!("{message}");
    std::process::exit(1)
}
