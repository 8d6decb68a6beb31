use std::env::consts::{ARCH, FAMILY, OS};
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, trace};

use crate::cli::Cli;
use crate::program::{Outcome, Program};

mod cli;
mod logging;
mod mirror;
mod program;
mod smugmug;
mod tui;

/// Exit code for configuration and setup failures.
const FATAL_EXIT: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = cli.load_config();

    // Logging needs the config, so a config error is reported through the default setup.
    let log_settings = config.as_ref().map(|c| c.logging.clone()).unwrap_or_default();
    let log_dir = match (&config, log_settings.log_to_file) {
        (Ok(config), true) => config.cache_directory().ok(),
        _ => None,
    };
    let _guard = logging::init(log_settings.log_level.trim(), cli.verbose, log_dir.as_deref());
    log_system_information();

    let outcome = match config {
        Ok(config) => match Program::new(config) {
            Ok(program) => program.run(&cli.command).await,
            Err(err) => Err(err),
        },
        Err(err) => Err(err.into()),
    };

    match outcome {
        Ok(Outcome::Clean) => ExitCode::SUCCESS,
        Ok(Outcome::Dirty) => ExitCode::from(1),
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(FATAL_EXIT)
        }
    }
}

/// Logs important information about the system being used.
fn log_system_information() {
    trace!("Printing system information out into log for debug purposes...");
    trace!("ARCH:           \"{}\"", ARCH);
    trace!("FAMILY:         \"{}\"", FAMILY);
    trace!("OS:             \"{}\"", OS);
}
