//! Sleuth CLI entry point.

use clap::Parser;
use std::path::Path;

use sleuth::cli::commands::{self, config as config_cmd, investigate, report, worker};
use sleuth::cli::{handle_error, Cli, Commands};
use sleuth::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match commands::load_config(cli.config_file.as_deref()) {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };
    let logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => handle_error(err, cli.json),
    };

    let config_file = cli.config_file.as_deref().map(Path::new);
    let result = match cli.command {
        Commands::Investigate(args) => {
            investigate::execute(args, config, config_file, cli.json).await
        }
        Commands::Worker(args) => worker::execute(args, config).await,
        Commands::Config(args) => config_cmd::execute(args, config, cli.json).map(|()| 0),
        Commands::Report(args) => report::execute(args, config, cli.json).await.map(|()| 0),
    };

    match result {
        Ok(0) => {}
        Ok(code) => {
            drop(logger);
            std::process::exit(code);
        }
        Err(err) => {
            drop(logger);
            handle_error(err, cli.json);
        }
    }
}
