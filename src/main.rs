//! Interactive CLI: connects to a database directory and runs an SQL
//! REPL over standard input, one statement per line.

use std::io::{self, BufRead};

use ferrodb::Database;

/// Connect-time configuration: database directory, buffer pool size and
/// verbosity, parsed from `std::env::args` directly rather than via an
/// external CLI-parsing crate.
struct Config {
    dir: String,
    frames: usize,
    verbose: bool,
}

impl Config {
    fn parse(args: impl Iterator<Item = String>) -> Result<Self, String> {
        let mut dir = None;
        let mut frames = 64usize;
        let mut verbose = false;
        let mut args = args.skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--frames" => {
                    let value = args.next().ok_or("--frames requires a value")?;
                    frames = value.parse().map_err(|_| format!("invalid --frames value {value:?}"))?;
                }
                "-v" | "--verbose" => verbose = true,
                _ if dir.is_none() => dir = Some(arg),
                other => return Err(format!("unexpected argument {other:?}")),
            }
        }
        Ok(Config {
            dir: dir.ok_or("usage: ferrodb <dir> [--frames N] [-v]")?,
            frames,
            verbose,
        })
    }
}

fn init_logging(verbose: bool) {
    let env = env_logger::Env::default().default_filter_or("warn");
    let mut builder = env_logger::Builder::from_env(env);
    if verbose {
        builder.filter_module(env!("CARGO_PKG_NAME"), log::LevelFilter::Debug);
    }
    builder.init();
}

fn main() {
    let config = match Config::parse(std::env::args()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };
    init_logging(config.verbose);

    let db = match Database::open(&config.dir, config.frames) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        let sql = line.trim();
        if sql.is_empty() {
            continue;
        }
        match db.execute(sql) {
            Ok(ferrodb::interpreter::ExecutionResult::Ack) => {}
            Ok(ferrodb::interpreter::ExecutionResult::Rows { rows, .. }) => {
                for row in rows {
                    let fields: Vec<String> = row.values.iter().map(|v| v.to_string()).collect();
                    println!("{}", fields.join("|"));
                }
            }
            Err(e) => println!("Error: {e}"),
        }
    }
}
