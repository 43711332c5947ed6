mod cli;
pub mod framework;
pub mod infrastructure;

#[cfg(test)]
#[path = "../tests/test_utils.rs"]
pub mod test_utils;

use std::process::ExitCode;

use clap::Parser;

use cli::logger::LoggerLevel;

fn main() -> ExitCode {
    let cli_result = cli::Cli::parse();

    let mut config = match cli::settings::read_settings() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to read settings: {e}");
            return ExitCode::from(1);
        }
    };

    if cli_result.debug {
        config.logger.level = LoggerLevel::Debug;
    }

    if let Err(e) = cli::logger::setup_logging(&config.logger) {
        eprintln!("{e}");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let result = runtime.block_on(cli::top_command_handler(config, &cli_result.command));

    match result {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::from(1)
        }
    }
}
