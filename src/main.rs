//! Purpose: `tdjson` CLI entry point for poking a tdjson library from a shell.
//! Role: Binary crate root; parses args, resolves the library, dispatches commands.
//! Invariants: stdout carries engine payloads only, one per line.
//! Invariants: Errors and engine log lines are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use tdjson_adapter::api::{Error, ErrorKind, default_library_file, to_exit_code};

const LIBRARY_ENV: &str = "TDJSON_LIBRARY";

#[derive(Parser, Debug)]
#[command(name = "tdjson", version, about = "Drive a tdjson shared library from the command line")]
struct Cli {
    #[arg(
        long,
        help = "Path to the tdjson shared library [default: $TDJSON_LIBRARY or platform name]",
        value_hint = ValueHint::FilePath
    )]
    library: Option<PathBuf>,
    #[arg(
        long,
        help = "Forward engine log lines up to this verbosity to stderr as JSON"
    )]
    log_verbosity: Option<i32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Run one synchronous request against engine-global state")]
    Execute {
        #[arg(help = "Request payload (JSON text)")]
        request: String,
    },
    #[command(about = "Send requests on one client and print responses until idle")]
    Session {
        #[arg(long, help = "Use the legacy per-client interface instead of client ids")]
        legacy: bool,
        #[arg(long, default_value_t = 10.0, help = "Receive timeout in seconds")]
        timeout: f64,
        #[arg(long, help = "Stop after printing this many responses")]
        max: Option<usize>,
        #[arg(required = true, help = "Request payloads (JSON text), sent in order")]
        requests: Vec<String>,
    },
}

#[derive(Debug)]
struct Config {
    library: PathBuf,
    log_verbosity: Option<i32>,
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(code);
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Run `tdjson --help` for usage."));
            }
        },
    };

    let config = Config {
        library: resolve_library(cli.library, std::env::var_os(LIBRARY_ENV)),
        log_verbosity: cli.log_verbosity,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start async runtime")
                .with_source(err)
        })?;
    runtime.block_on(command_dispatch::dispatch_command(cli.command, config))?;
    Ok(0)
}

fn resolve_library(flag: Option<PathBuf>, env: Option<OsString>) -> PathBuf {
    flag.or_else(|| env.filter(|value| !value.is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(default_library_file()))
}

fn parse_timeout(seconds: f64) -> Result<Duration, Error> {
    Duration::try_from_secs_f64(seconds).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("timeout must be a non-negative number of seconds")
            .with_source(err)
    })
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.trim_start_matches("error:").trim().to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("error: {}", error_message(err));
        if let Some(hint) = err.hint() {
            eprintln!("hint: {hint}");
        }
        return;
    }

    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::AlreadyLoaded => "tdjson is already loaded".to_string(),
        ErrorKind::LoadFailure => "failed to load tdjson".to_string(),
        ErrorKind::ConcurrentReceive => "a receive is already pending".to_string(),
        ErrorKind::NotInitialized => "not initialized".to_string(),
    }
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current = err.source();
    while let Some(source) = current {
        causes.push(source.to_string());
        current = source.source();
    }
    causes
}
