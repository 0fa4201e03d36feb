//! Backplane MCU protocol drivers
//!
//! Two protocol generations are in the field and they share nothing on the
//! wire except the identification register. Both are modelled as variants of
//! the closed [`McuDriver`] enum; every public operation dispatches with a
//! `match`, so adding a generation is a compile error everywhere it matters.
//!
//! | Operation            | V0                          | V1                             |
//! |----------------------|-----------------------------|--------------------------------|
//! | identification       | `0xBC`                      | `0xA8`                         |
//! | drive type           | per channel, confirmed      | one word, 2 bits per channel   |
//! | locate LED           | start/stop opcodes          | read-modify-write bitmask      |
//! | read locate LED      | unsupported                 | bitmask bit                    |
//! | change detection     | bitmask fingerprint         | fingerprint + presence latch   |
//! | flash write framing  | one frame, combined readback| address, data, readback        |
//!
//! Use [`create_driver`] to probe a device and get the matching variant.

mod factory;
mod state;
pub mod v0;
pub mod v1;

pub use factory::{create_driver, IDENT_REGISTER};
pub use state::{ChangeCache, DriveChannelState};
pub use v0::ProtoV0;
pub use v1::ProtoV1;

use std::fmt;

use crate::bus::SmbusBus;
use crate::error::{BusError, Error, Result};
use crate::transport::I2cDevice;

/// Number of drive channels handled by one MCU
pub const MAX_CHANNELS: usize = 8;

/// Largest flash chunk accepted by either protocol
pub const FLASH_CHUNK_MAX: usize = 128;

/// Reads per value for registers that must be seen twice in a row
pub const CONFIRM_ATTEMPTS: usize = 5;

/// MCU wire protocol generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// First generation
    V0,
    /// Second generation
    V1,
}

impl ProtocolVersion {
    /// Order in which the factory matches identification bytes
    pub const PRIORITY: [ProtocolVersion; 2] = [ProtocolVersion::V0, ProtocolVersion::V1];

    /// Identification byte this generation answers with
    pub const fn ident(self) -> u8 {
        match self {
            ProtocolVersion::V0 => v0::IDENT_RESPONSE,
            ProtocolVersion::V1 => v1::IDENT_RESPONSE,
        }
    }

    /// Match an identification byte against the known generations
    pub fn from_ident(ident: u8) -> Option<Self> {
        Self::PRIORITY.into_iter().find(|p| p.ident() == ident)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V0 => write!(f, "v0"),
            ProtocolVersion::V1 => write!(f, "v1"),
        }
    }
}

/// Drive type reported for a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriveType {
    /// Empty bay
    NoDisk,
    /// SATA or SAS drive
    SataSas,
    /// NVMe drive
    Nvme,
    /// Anything the MCU reported that we do not recognise
    Unknown,
}

impl DriveType {
    /// Decode a wire value, `None` for values outside the enumeration
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(DriveType::NoDisk),
            1 => Some(DriveType::SataSas),
            2 => Some(DriveType::Nvme),
            _ => None,
        }
    }
}

impl fmt::Display for DriveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriveType::NoDisk => "none",
            DriveType::SataSas => "SATA/SAS",
            DriveType::Nvme => "NVMe",
            DriveType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Identity of a running MCU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Protocol generation
    pub protocol: ProtocolVersion,
    /// Firmware version string (empty if it could not be read)
    pub firmware_version: String,
    /// Board type string (empty if it could not be read)
    pub board_type: String,
}

impl DeviceInfo {
    /// True if both strings were read
    pub fn is_complete(&self) -> bool {
        !self.firmware_version.is_empty() && !self.board_type.is_empty()
    }
}

/// Decode a drive type, mapping unexpected values to [`DriveType::Unknown`]
pub(crate) fn decode_drive_type(label: &str, channel: usize, value: u8) -> DriveType {
    DriveType::from_wire(value).unwrap_or_else(|| {
        log::warn!(
            "{}: unexpected DISC_TYPE {} on channel {}",
            label,
            value,
            channel
        );
        DriveType::Unknown
    })
}

/// Read a value until the same answer comes back twice in a row
///
/// Gives up after [`CONFIRM_ATTEMPTS`] reads and settles on the last value.
/// Transport errors end the loop immediately.
pub(crate) fn read_confirmed<B, T>(
    dev: &mut I2cDevice<B>,
    what: &str,
    mut read: impl FnMut(&mut I2cDevice<B>) -> std::result::Result<T, BusError>,
) -> std::result::Result<T, BusError>
where
    B: SmbusBus,
    T: PartialEq,
{
    let mut last = read(dev)?;
    for _ in 1..CONFIRM_ATTEMPTS {
        let next = read(dev)?;
        if next == last {
            return Ok(next);
        }
        last = next;
    }

    log::warn!(
        "{}: {} not confirmed after {} reads, using last value",
        dev.label(),
        what,
        CONFIRM_ATTEMPTS
    );
    Ok(last)
}

/// Log a transport failure and turn it into a communication error
pub(crate) fn communication_error<B: SmbusBus>(
    dev: &I2cDevice<B>,
    op: &'static str,
    source: BusError,
) -> Error {
    log::error!(
        "{}: failed to {}: {} (result {})",
        dev.label(),
        op,
        source,
        source.code()
    );
    Error::Communication {
        device: dev.label().to_string(),
        op,
        source,
    }
}

pub(crate) fn check_channel(index: usize) -> Result<()> {
    if index < MAX_CHANNELS {
        Ok(())
    } else {
        Err(Error::InvalidChannel(index))
    }
}

/// Validate a chunk about to be written at `offset`
///
/// Only the final chunk of an image may have a length that is not a
/// multiple of 4, so an unaligned offset means the image already ended.
pub(crate) fn check_chunk(offset: u32, data: &[u8]) -> Result<()> {
    if data.is_empty() || data.len() > FLASH_CHUNK_MAX || offset % 4 != 0 {
        Err(Error::InvalidChunk(data.len()))
    } else {
        Ok(())
    }
}

/// Presence/failure fingerprint used for change detection
pub(crate) fn fingerprint(presence: u8, failures: u8) -> u32 {
    u32::from(presence) | (u32::from(failures) << 8)
}

/// A backplane MCU driver for whichever protocol the device speaks
pub enum McuDriver<B: SmbusBus> {
    /// Protocol version 0
    V0(ProtoV0<B>),
    /// Protocol version 1
    V1(ProtoV1<B>),
}

macro_rules! dispatch {
    ($self:expr, $drv:ident => $body:expr) => {
        match $self {
            McuDriver::V0($drv) => $body,
            McuDriver::V1($drv) => $body,
        }
    };
}

impl<B: SmbusBus> McuDriver<B> {
    /// Protocol generation of this driver
    pub fn protocol(&self) -> ProtocolVersion {
        match self {
            McuDriver::V0(_) => ProtocolVersion::V0,
            McuDriver::V1(_) => ProtocolVersion::V1,
        }
    }

    /// Transport handle
    pub fn device(&self) -> &I2cDevice<B> {
        dispatch!(self, d => d.device())
    }

    /// Mutable transport handle
    pub fn device_mut(&mut self) -> &mut I2cDevice<B> {
        dispatch!(self, d => d.device_mut())
    }

    /// Release the driver and return its transport handle
    pub fn into_device(self) -> I2cDevice<B> {
        dispatch!(self, d => d.into_device())
    }

    /// Device label, e.g. `/dev/i2c-3, 0x2a`
    pub fn label(&self) -> &str {
        self.device().label()
    }

    /// Firmware version string, empty if it could not be read
    pub fn firmware_version(&mut self) -> String {
        dispatch!(self, d => d.firmware_version())
    }

    /// Board type string, empty if it could not be read
    pub fn board_type(&mut self) -> String {
        dispatch!(self, d => d.board_type())
    }

    /// Protocol, firmware version and board type in one go
    pub fn device_info(&mut self) -> DeviceInfo {
        DeviceInfo {
            protocol: self.protocol(),
            firmware_version: self.firmware_version(),
            board_type: self.board_type(),
        }
    }

    /// Start a new poll cycle: cached bitmasks are fetched again on next use
    pub fn refresh(&mut self) {
        dispatch!(self, d => d.refresh())
    }

    /// Drive presence on a channel
    pub fn channel_present(&mut self, index: usize) -> Result<bool> {
        dispatch!(self, d => d.channel_present(index))
    }

    /// Drive failure on a channel
    pub fn channel_failed(&mut self, index: usize) -> Result<bool> {
        dispatch!(self, d => d.channel_failed(index))
    }

    /// Drive type on a channel
    pub fn channel_drive_type(&mut self, index: usize) -> Result<DriveType> {
        dispatch!(self, d => d.channel_drive_type(index))
    }

    /// Set or clear the locate LED of a channel
    pub fn set_channel_locate_led(&mut self, index: usize, assert: bool) -> Result<()> {
        dispatch!(self, d => d.set_channel_locate_led(index, assert))
    }

    /// Read the locate LED of a channel
    pub fn channel_locate_led(&mut self, index: usize) -> Result<bool> {
        dispatch!(self, d => d.channel_locate_led(index))
    }

    /// Read all locate LEDs at once, bit N for channel N
    pub fn locate_mask(&mut self) -> Result<u8> {
        dispatch!(self, d => d.locate_mask())
    }

    /// Turn off every locate LED
    pub fn reset_locate_leds(&mut self) -> Result<()> {
        dispatch!(self, d => d.reset_locate_leds())
    }

    /// Tell the MCU whether the host is powered
    pub fn set_host_power_state(&mut self, powered: bool) -> Result<()> {
        dispatch!(self, d => d.set_host_power_state(powered))
    }

    /// Refetch presence and failures and compare against `cache`
    ///
    /// The cache is updated in place. Returns true if anything changed.
    pub fn has_state_changed(&mut self, cache: &mut ChangeCache) -> Result<bool> {
        dispatch!(self, d => d.has_state_changed(cache))
    }

    /// Lightweight liveness check
    pub fn ping(&mut self) -> bool {
        dispatch!(self, d => d.ping())
    }

    /// Reboot the MCU; no answer is expected
    pub fn reboot(&mut self) -> Result<()> {
        dispatch!(self, d => d.reboot())
    }

    /// Erase the update area and rewind the flash write offset
    pub fn erase_flash(&mut self) -> Result<()> {
        dispatch!(self, d => d.erase_flash())
    }

    /// Write and verify one chunk at the current flash offset
    pub fn write_flash_chunk(&mut self, data: &[u8]) -> Result<()> {
        dispatch!(self, d => d.write_flash_chunk(data))
    }

    /// Offset the next flash chunk will be written at
    pub fn flash_offset(&self) -> u32 {
        dispatch!(self, d => d.flash_offset())
    }

    /// Blocking delay through the transport
    pub fn delay_us(&mut self, us: u32) {
        self.device_mut().delay_us(us);
    }
}

impl<B: SmbusBus> fmt::Debug for McuDriver<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McuDriver")
            .field("protocol", &self.protocol())
            .field("device", &self.label())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_priority() {
        assert_eq!(ProtocolVersion::from_ident(0xBC), Some(ProtocolVersion::V0));
        assert_eq!(ProtocolVersion::from_ident(0xA8), Some(ProtocolVersion::V1));
        assert_eq!(ProtocolVersion::from_ident(0x00), None);
        assert_eq!(ProtocolVersion::from_ident(0xFF), None);
    }

    #[test]
    fn test_drive_type_decode() {
        for value in 0..=u8::MAX {
            let decoded = decode_drive_type("test", 0, value);
            match value {
                0 => assert_eq!(decoded, DriveType::NoDisk),
                1 => assert_eq!(decoded, DriveType::SataSas),
                2 => assert_eq!(decoded, DriveType::Nvme),
                _ => assert_eq!(decoded, DriveType::Unknown),
            }
        }
    }

    #[test]
    fn test_fingerprint() {
        assert_eq!(fingerprint(0x00, 0x00), 0);
        assert_eq!(fingerprint(0x81, 0x01), 0x0181);
        assert_ne!(fingerprint(0x01, 0x00), fingerprint(0x01, 0x01));
    }

    #[test]
    fn test_chunk_bounds() {
        assert!(check_chunk(0, &[]).is_err());
        assert!(check_chunk(0, &[0u8; 128]).is_ok());
        assert!(check_chunk(128, &[0u8; 5]).is_ok());
        assert!(matches!(
            check_chunk(0, &[0u8; 129]),
            Err(Error::InvalidChunk(129))
        ));
        assert!(matches!(
            check_chunk(133, &[0u8; 4]),
            Err(Error::InvalidChunk(4))
        ));
    }

    #[test]
    fn test_channel_bounds() {
        assert!(check_channel(7).is_ok());
        assert!(matches!(check_channel(8), Err(Error::InvalidChannel(8))));
    }
}
