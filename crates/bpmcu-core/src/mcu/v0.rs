//! Protocol version 0
//!
//! Register reads on this generation are not always stable, so bitmask and
//! drive type reads are repeated until two consecutive answers agree (see
//! [`CONFIRM_ATTEMPTS`](super::CONFIRM_ATTEMPTS)).
//!
//! Flash writes go out as a single raw frame:
//!
//! ```text
//! +--------+-----------------+-------------+----------------+
//! | opcode | offset (u32 BE) | len (u16 BE)| data (len)     |
//! +--------+-----------------+-------------+----------------+
//! ```
//!
//! and are verified by sending the same header with the read opcode and
//! reading `len` bytes back in one combined transfer.

use crate::bus::SmbusBus;
use crate::error::{Error, Result};
use crate::mcu::{
    check_channel, check_chunk, communication_error, decode_drive_type, fingerprint,
    read_confirmed, ChangeCache, DriveType, ProtocolVersion, FLASH_CHUNK_MAX,
};
use crate::text::decode_field;
use crate::transport::I2cDevice;

/// Answer to the identification read
pub const IDENT_RESPONSE: u8 = 0xBC;

pub const OPC_GET_VERSION: u8 = 0x01;
pub const OPC_GET_LAST_ERROR: u8 = 0x3E;
pub const OPC_FLASH_ERASE: u8 = 0x3F;
pub const OPC_FLASH_WRITE: u8 = 0x40;
pub const OPC_REBOOT: u8 = 0x41;
pub const OPC_PRESENCE: u8 = 0x42;
pub const OPC_FAILURES: u8 = 0x43;
pub const OPC_CLEAN: u8 = 0x44;
pub const OPC_LOCATE_START: u8 = 0x45;
pub const OPC_LOCATE_STOP: u8 = 0x46;
pub const OPC_DISC_TYPE: u8 = 0x47;
pub const OPC_BOARD_TYPE: u8 = 0x48;
pub const OPC_HOST_POWER_ON: u8 = 0x68;
pub const OPC_HOST_POWER_OFF: u8 = 0x69;
pub const OPC_FLASH_READ: u8 = 0x80;

/// Length of the firmware version field
pub const VERSION_LEN: usize = 60;
/// Length of the board type field
pub const BOARD_TYPE_LEN: usize = 32;
/// Length of the flash write/read header
pub const FLASH_HEADER_LEN: usize = 7;

/// Readback attempts per flash chunk
pub const VERIFY_ATTEMPTS: usize = 5;
/// Delay before each readback attempt
pub const VERIFY_DELAY_US: u32 = 100_000;

/// Build a flash header for `opcode` ([`OPC_FLASH_WRITE`] or [`OPC_FLASH_READ`])
pub fn encode_flash_header(opcode: u8, offset: u32, len: u16) -> [u8; FLASH_HEADER_LEN] {
    let mut header = [0u8; FLASH_HEADER_LEN];
    header[0] = opcode;
    header[1..5].copy_from_slice(&offset.to_be_bytes());
    header[5..7].copy_from_slice(&len.to_be_bytes());
    header
}

/// Driver for protocol version 0
pub struct ProtoV0<B: SmbusBus> {
    dev: I2cDevice<B>,
    presence: Option<u8>,
    failures: Option<u8>,
    flash_offset: u32,
}

impl<B: SmbusBus> ProtoV0<B> {
    /// Wrap an identified device
    pub fn new(dev: I2cDevice<B>) -> Self {
        Self {
            dev,
            presence: None,
            failures: None,
            flash_offset: 0,
        }
    }

    pub fn device(&self) -> &I2cDevice<B> {
        &self.dev
    }

    pub fn device_mut(&mut self) -> &mut I2cDevice<B> {
        &mut self.dev
    }

    pub fn into_device(self) -> I2cDevice<B> {
        self.dev
    }

    pub fn firmware_version(&mut self) -> String {
        let res = read_confirmed(&mut self.dev, "firmware version", |dev| {
            let mut buf = [0u8; VERSION_LEN];
            dev.read_raw_at(OPC_GET_VERSION, &mut buf).map(|_| buf)
        });
        match res {
            Ok(raw) => decode_field(&raw),
            Err(e) => {
                communication_error(&self.dev, "read firmware version", e);
                String::new()
            }
        }
    }

    /// Board type; older V0 firmware does not implement the opcode
    pub fn board_type(&mut self) -> String {
        let res = read_confirmed(&mut self.dev, "board type", |dev| {
            let mut buf = [0u8; BOARD_TYPE_LEN];
            dev.read_block(OPC_BOARD_TYPE, &mut buf).map(|n| (buf, n))
        });
        match res {
            Ok((buf, n)) => decode_field(&buf[..n.min(BOARD_TYPE_LEN)]),
            Err(e) => {
                log::warn!(
                    "{}: board type not available ({}), firmware may predate it",
                    self.dev.label(),
                    e
                );
                String::new()
            }
        }
    }

    pub fn refresh(&mut self) {
        self.presence = None;
        self.failures = None;
    }

    fn fetch_presence(&mut self) -> Result<u8> {
        let value = read_confirmed(&mut self.dev, "presence", |dev| {
            dev.read_byte_data(OPC_PRESENCE)
        })
        .map_err(|e| communication_error(&self.dev, "read drive presence", e))?;
        self.presence = Some(value);
        Ok(value)
    }

    fn fetch_failures(&mut self) -> Result<u8> {
        let value = read_confirmed(&mut self.dev, "failures", |dev| {
            dev.read_byte_data(OPC_FAILURES)
        })
        .map_err(|e| communication_error(&self.dev, "read drive failures", e))?;
        self.failures = Some(value);
        Ok(value)
    }

    pub fn channel_present(&mut self, index: usize) -> Result<bool> {
        check_channel(index)?;
        let mask = match self.presence {
            Some(mask) => mask,
            None => self.fetch_presence()?,
        };
        Ok(mask & (1 << index) != 0)
    }

    pub fn channel_failed(&mut self, index: usize) -> Result<bool> {
        check_channel(index)?;
        let mask = match self.failures {
            Some(mask) => mask,
            None => self.fetch_failures()?,
        };
        Ok(mask & (1 << index) != 0)
    }

    pub fn channel_drive_type(&mut self, index: usize) -> Result<DriveType> {
        check_channel(index)?;
        let channel = index as u8;
        let value = read_confirmed(&mut self.dev, "drive type", |dev| {
            dev.write_byte_data(OPC_DISC_TYPE, channel)?;
            dev.read_byte()
        })
        .map_err(|e| communication_error(&self.dev, "read drive type", e))?;
        Ok(decode_drive_type(self.dev.label(), index, value))
    }

    pub fn set_channel_locate_led(&mut self, index: usize, assert: bool) -> Result<()> {
        check_channel(index)?;
        let opcode = if assert {
            OPC_LOCATE_START
        } else {
            OPC_LOCATE_STOP
        };
        self.dev
            .write_byte_data(opcode, index as u8)
            .map_err(|e| communication_error(&self.dev, "set locate LED", e))
    }

    /// Not readable on this generation
    pub fn channel_locate_led(&mut self, index: usize) -> Result<bool> {
        check_channel(index)?;
        Err(Error::Unsupported {
            op: "reading the locate LED",
            protocol: ProtocolVersion::V0,
        })
    }

    pub fn locate_mask(&mut self) -> Result<u8> {
        Err(Error::Unsupported {
            op: "reading the locate LED",
            protocol: ProtocolVersion::V0,
        })
    }

    pub fn reset_locate_leds(&mut self) -> Result<()> {
        for index in 0..super::MAX_CHANNELS {
            self.set_channel_locate_led(index, false)?;
        }
        Ok(())
    }

    pub fn set_host_power_state(&mut self, powered: bool) -> Result<()> {
        let opcode = if powered {
            OPC_HOST_POWER_ON
        } else {
            OPC_HOST_POWER_OFF
        };
        self.dev
            .write_byte(opcode)
            .map_err(|e| communication_error(&self.dev, "set host power state", e))
    }

    pub fn has_state_changed(&mut self, cache: &mut ChangeCache) -> Result<bool> {
        let presence = self.fetch_presence()?;
        let failures = self.fetch_failures()?;
        Ok(cache.update(fingerprint(presence, failures)))
    }

    pub fn ping(&mut self) -> bool {
        self.dev.read_byte_data(super::IDENT_REGISTER).is_ok()
    }

    pub fn reboot(&mut self) -> Result<()> {
        log::info!("{}: rebooting MCU", self.dev.label());
        self.dev
            .write_byte(OPC_REBOOT)
            .map_err(|e| communication_error(&self.dev, "reboot", e))
    }

    pub fn erase_flash(&mut self) -> Result<()> {
        log::info!("{}: erasing MCU flash", self.dev.label());
        self.dev
            .write_byte(OPC_FLASH_ERASE)
            .map_err(|e| communication_error(&self.dev, "erase flash", e))?;
        self.flash_offset = 0;
        Ok(())
    }

    pub fn write_flash_chunk(&mut self, data: &[u8]) -> Result<()> {
        let offset = self.flash_offset;
        check_chunk(offset, data)?;
        let len = data.len() as u16;

        let mut frame = Vec::with_capacity(FLASH_HEADER_LEN + FLASH_CHUNK_MAX);
        frame.extend_from_slice(&encode_flash_header(OPC_FLASH_WRITE, offset, len));
        frame.extend_from_slice(data);
        self.dev
            .write_raw(&frame)
            .map_err(|e| communication_error(&self.dev, "write flash", e))?;

        let header = encode_flash_header(OPC_FLASH_READ, offset, len);
        let mut readback = vec![0u8; data.len()];
        let mut last_err = None;
        for attempt in 1..=VERIFY_ATTEMPTS {
            self.dev.delay_us(VERIFY_DELAY_US);
            match self.dev.read_after_write(&header, &mut readback) {
                Ok(()) if readback == data => {
                    self.flash_offset = offset + u32::from(len);
                    return Ok(());
                }
                Ok(()) => {
                    log::debug!(
                        "{}: flash readback mismatch at 0x{:05X} (attempt {})",
                        self.dev.label(),
                        offset,
                        attempt
                    );
                    last_err = None;
                }
                Err(e) => last_err = Some(e),
            }
        }

        match last_err {
            Some(e) => Err(communication_error(&self.dev, "read back flash", e)),
            None => {
                log::error!(
                    "{}: flash verify failed at 0x{:05X}",
                    self.dev.label(),
                    offset
                );
                Err(Error::VerifyFailed {
                    device: self.dev.label().to_string(),
                    offset,
                })
            }
        }
    }

    pub fn flash_offset(&self) -> u32 {
        self.flash_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flash_header_layout() {
        let header = encode_flash_header(OPC_FLASH_WRITE, 0x0001_0280, 128);
        assert_eq!(header, [0x40, 0x00, 0x01, 0x02, 0x80, 0x00, 0x80]);

        let header = encode_flash_header(OPC_FLASH_READ, 0, 1);
        assert_eq!(header, [0x80, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_opcodes_unique() {
        let opcodes = [
            OPC_GET_VERSION,
            OPC_GET_LAST_ERROR,
            OPC_FLASH_ERASE,
            OPC_FLASH_WRITE,
            OPC_REBOOT,
            OPC_PRESENCE,
            OPC_FAILURES,
            OPC_CLEAN,
            OPC_LOCATE_START,
            OPC_LOCATE_STOP,
            OPC_DISC_TYPE,
            OPC_BOARD_TYPE,
            OPC_HOST_POWER_ON,
            OPC_HOST_POWER_OFF,
            OPC_FLASH_READ,
        ];
        for (i, a) in opcodes.iter().enumerate() {
            for b in &opcodes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
