use args::parse_args;
use log::{error, info};
use logger::init_logger;
use machinehead::{
    actions::command::CommandExecutor,
    cancel::CancellationToken,
    config::Config,
    secrets::SecretResolver,
    start::Orchestrator,
};
use std::{path::Path, process};
use thiserror::Error;

mod args;
mod logger;

/// The configuration cannot be loaded.
const EXIT_CONFIG: i32 = 1;
/// The daemon cannot start.
const EXIT_START: i32 = 2;

#[derive(Debug, Error)]
pub enum MainError {
    #[error("cannot set up logger: {0}")]
    FailedLogger(#[from] log::SetLoggerError),
}

fn main() {
    let args = parse_args();
    if args.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return;
    }

    if let Err(err) = init_logger(&args) {
        eprintln!("{err}");
        process::exit(EXIT_START);
    }

    let config_path = Path::new(&args.config);
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            error!("Failed loading {}: {err}.", args.config);
            process::exit(EXIT_CONFIG);
        }
    };

    let resolver = match SecretResolver::from_config(&config) {
        Ok(resolver) => resolver,
        Err(err) => {
            error!("Failed setting up secrets: {err}.");
            process::exit(EXIT_START);
        }
    };

    let mut orchestrator = Orchestrator::new(
        config,
        config_path,
        resolver,
        Box::new(CommandExecutor::new()),
        &CancellationToken::new(),
    );
    match orchestrator.start() {
        Ok(termination) => info!("Stopped, {termination}."),
        Err(err) => {
            error!("Failed starting: {err}.");
            process::exit(EXIT_START);
        }
    }
}
