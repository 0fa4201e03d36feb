//! Status command implementation

use std::thread;
use std::time::Duration;

use bpmcu_core::{ChangeCache, DriveChannelState};

use super::open_driver;
use crate::cli::BusArgs;
use crate::error::CliError;

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Render the per-channel table
pub fn format_states(states: &[DriveChannelState]) -> String {
    let mut out = format!(
        "{:<8} {:<8} {:<7} {:<10} {}\n",
        "Channel", "Present", "Failed", "Type", "Locate"
    );
    for state in states {
        let locate = match state.locate {
            Some(true) => "on",
            Some(false) => "off",
            None => "-",
        };
        out.push_str(&format!(
            "{:<8} {:<8} {:<7} {:<10} {}\n",
            state.index,
            yes_no(state.present),
            yes_no(state.failed),
            state.drive_type.to_string(),
            locate
        ));
    }
    out
}

/// Run the status command
pub fn run_status(bus: &BusArgs) -> Result<(), CliError> {
    let mut driver = open_driver(bus)?;
    let states = driver.channel_states()?;
    print!("{}", format_states(&states));
    Ok(())
}

/// Poll until interrupted, printing the table whenever it changes
pub fn run_watch(bus: &BusArgs, interval_ms: u64) -> Result<(), CliError> {
    let mut driver = open_driver(bus)?;
    let mut cache = ChangeCache::new();
    let interval = Duration::from_millis(interval_ms.max(1));

    log::info!(
        "{}: watching drive state every {} ms",
        driver.label(),
        interval.as_millis()
    );
    loop {
        if let Some(states) = driver.poll(&mut cache, false)? {
            println!();
            print!("{}", format_states(&states));
        }
        thread::sleep(interval);
    }
}
