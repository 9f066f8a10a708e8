#![allow(non_snake_case)]

use std::env;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use calendarScheduler::cli::{self, Cli, Commands};
use calendarScheduler::config::{AppConfig, Settings};
use calendarScheduler::{logging, runtime};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    let config_path = args.config.clone().or_else(|| env::var_os("CONFIG_FILE").map(Into::into));
    let config = match config_path {
        Some(path) => match AppConfig::from_file(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("{}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => AppConfig::default(),
    };
    let settings = match Settings::from_config(&config) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.log_level);

    let result = match args.command {
        Commands::Run => runtime::run(settings).await,
        command => match runtime::open_store(&settings.storage) {
            Ok(store) => {
                let service = runtime::event_service(&settings, store);
                cli::execute(&service, command).await.map_err(Into::into)
            }
            Err(err) => Err(err),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
