use clap::Parser;
use std::io;
use std::process::ExitCode;

mod cli;
mod config;
mod error;
mod inference;
mod output;
mod prompt;
mod request;
mod resources;
mod schema;

use crate::cli::Cli;
use crate::config::{Config, SearchDirs};
use crate::error::{Error, Result};
use crate::inference::{CommandBackend, InferenceBackend};
use crate::output::OutputTarget;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Config files are merged before logging starts so `"debug": true` in a
    // file behaves like `--debug`.
    let config = match Config::load_files(&cli.config_files) {
        Ok(files) => files.merge(cli.overrides()),
        Err(err) => {
            init_logging(cli.debug);
            return report(&err, cli.debug);
        }
    };
    let debug = config.debug_enabled();
    init_logging(debug);

    match run(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(&err, debug),
    }
}

fn run(cli: &Cli, config: &Config) -> Result<()> {
    tracing::debug!(files = ?cli.config_files, config = ?config, "configuration merged");

    let search = SearchDirs::from_config(config);
    let request = request::resolve(config, cli.inline_prompt(), &search, &mut io::stdin().lock())?;
    let backend = CommandBackend::from_config(config)?;
    tracing::debug!(
        program = %backend.program().display(),
        stream = backend.streams(),
        template = request.template().origin(),
        prompt_bytes = request.prompt().len(),
        "dispatching request"
    );

    let structured = request.grammar().is_some();
    let mut sink = OutputTarget::from_config(config).open()?;
    let generated = backend.generate(request, &mut sink)?;
    output::emit(sink, generated, structured)
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("ggen={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn report(err: &Error, debug: bool) -> ExitCode {
    eprintln!("error: {err}");
    if debug {
        match err {
            Error::Generation(inner) => eprintln!("{inner:?}"),
            _ => {
                let mut source = std::error::Error::source(err);
                while let Some(cause) = source {
                    eprintln!("  caused by: {cause}");
                    source = cause.source();
                }
            }
        }
    }
    ExitCode::from(err.exit_code())
}
