//! Locate LED commands

use super::open_driver;
use crate::cli::BusArgs;
use crate::error::CliError;

/// Turn the locate LED of `channel` on or off
pub fn run_set(bus: &BusArgs, channel: usize, on: bool) -> Result<(), CliError> {
    let mut driver = open_driver(bus)?;
    driver.set_channel_locate_led(channel, on)?;
    log::info!(
        "{}: locate LED {} {}",
        driver.label(),
        channel,
        if on { "on" } else { "off" }
    );
    Ok(())
}

/// Print the locate LED state of `channel`
pub fn run_get(bus: &BusArgs, channel: usize) -> Result<(), CliError> {
    let mut driver = open_driver(bus)?;
    let on = driver.channel_locate_led(channel)?;
    println!("{}", if on { "on" } else { "off" });
    Ok(())
}

/// Turn every locate LED off
pub fn run_reset(bus: &BusArgs) -> Result<(), CliError> {
    let mut driver = open_driver(bus)?;
    driver.reset_locate_leds()?;
    log::info!("{}: all locate LEDs off", driver.label());
    Ok(())
}
