//! CLI command implementations
//!
//! Every command opens its MCU through the driver factory, so none of them
//! care which protocol generation or bus backend is underneath.

pub mod info;
pub mod locate;
pub mod power;
pub mod scan;
pub mod status;
pub mod update;

use bpmcu_core::bus::SmbusBus;
use bpmcu_core::{create_driver, McuDriver};

use crate::backends::{open_connector, DynConnector};
use crate::cli::BusArgs;
use crate::error::CliError;

/// Driver type produced for any compiled-in backend
pub type Driver = McuDriver<Box<dyn SmbusBus>>;

/// Open a connector for the bus arguments
pub fn connector(bus: &BusArgs) -> Result<DynConnector, CliError> {
    open_connector(&bus.bus, bus.addr, bus.pec).map_err(CliError::Usage)
}

/// Open and identify the MCU addressed by the bus arguments
pub fn open_driver(bus: &BusArgs) -> Result<Driver, CliError> {
    let driver = create_driver(connector(bus)?)?;
    log::debug!(
        "{}: speaking protocol {}",
        driver.label(),
        driver.protocol()
    );
    Ok(driver)
}
