//! bpmcu - Backplane MCU management tool
//!
//! Talks to the microcontroller on a drive backplane over I2C/SMBus: reads
//! its identity and per-bay drive state, drives the locate LEDs, signals
//! host power and flashes new firmware.
//!
//! Commands open the MCU through the driver factory, so the same code works
//! with both protocol generations and with the simulated MCU
//! (`--bus dummy:v0` / `--bus dummy:v1`).

mod backends;
mod cli;
mod commands;
mod error;

use std::process::ExitCode;

use clap::Parser;
use cli::{Cli, Commands, LedState, LocateCommands, PowerState};
use error::CliError;

fn main() -> ExitCode {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if let CliError::Usage(_) = e {
                eprintln!();
                eprint!("{}", backends::backend_help());
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Info { bus } => commands::info::run_info(&bus),
        Commands::Status {
            bus,
            watch,
            interval_ms,
        } => {
            if watch {
                commands::status::run_watch(&bus, interval_ms)
            } else {
                commands::status::run_status(&bus)
            }
        }
        Commands::Locate { bus, action } => match action {
            LocateCommands::Set { channel, state } => {
                commands::locate::run_set(&bus, channel, state == LedState::On)
            }
            LocateCommands::Get { channel } => commands::locate::run_get(&bus, channel),
            LocateCommands::Reset => commands::locate::run_reset(&bus),
        },
        Commands::Power { bus, state } => {
            commands::power::run_power(&bus, state == PowerState::On)
        }
        Commands::Update {
            bus,
            file,
            erase,
            expected_version,
        } => commands::update::run_update(&bus, &file, erase, expected_version),
        Commands::Scan { config, dry_run } => commands::scan::run_scan(&config, dry_run),
    }
}
