//! Protocol detection

use crate::bus::{Connect, SmbusBus};
use crate::error::{Error, Result};
use crate::mcu::{McuDriver, ProtoV0, ProtoV1, ProtocolVersion};
use crate::transport::I2cDevice;

/// Register both generations answer with their identification byte
pub const IDENT_REGISTER: u8 = 0x00;

/// Open a bus through `connector` and return the matching protocol driver
///
/// Fails with [`Error::NotOperational`] if the bus cannot be opened or lacks
/// the required functionality, and with [`Error::DeviceAbsent`] if no known
/// identification byte comes back.
pub fn create_driver<C: Connect>(mut connector: C) -> Result<McuDriver<C::Bus>> {
    let label = connector.label();
    let bus = connector.connect().map_err(|e| {
        log::error!("{}: failed to open bus: {}", label, e);
        Error::NotOperational {
            device: label.clone(),
        }
    })?;
    McuDriver::probe(I2cDevice::new(bus, label))
}

impl<B: SmbusBus> McuDriver<B> {
    /// Identify the device behind `dev` and wrap it in the matching driver
    pub fn probe(mut dev: I2cDevice<B>) -> Result<Self> {
        if !dev.is_ok() {
            return Err(Error::NotOperational {
                device: dev.label().to_string(),
            });
        }

        let ident = match dev.read_byte_data(IDENT_REGISTER) {
            Ok(byte) => Some(byte),
            Err(e) => {
                log::debug!("{}: identification read failed: {}", dev.label(), e);
                None
            }
        };

        match ident.and_then(ProtocolVersion::from_ident) {
            Some(ProtocolVersion::V0) => {
                log::info!("{}: found MCU, protocol v0", dev.label());
                Ok(McuDriver::V0(ProtoV0::new(dev)))
            }
            Some(ProtocolVersion::V1) => {
                log::info!("{}: found MCU, protocol v1", dev.label());
                Ok(McuDriver::V1(ProtoV1::new(dev)))
            }
            None => {
                log::debug!("{}: no supported MCU (ident {:02x?})", dev.label(), ident);
                Err(Error::DeviceAbsent {
                    device: dev.label().to_string(),
                    ident,
                })
            }
        }
    }
}
