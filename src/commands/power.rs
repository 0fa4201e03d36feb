//! Host power command

use super::open_driver;
use crate::cli::BusArgs;
use crate::error::CliError;

pub fn run_power(bus: &BusArgs, on: bool) -> Result<(), CliError> {
    let mut driver = open_driver(bus)?;
    driver.set_host_power_state(on)?;
    log::info!(
        "{}: host power state set to {}",
        driver.label(),
        if on { "on" } else { "off" }
    );
    Ok(())
}
