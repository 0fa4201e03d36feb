//! Protocol version 1
//!
//! Bitmasks are plain SMBus byte reads; drive types come packed two bits per
//! channel in one word. Flash writes take three transactions:
//!
//! 1. `FLASH_ADDRESS` with `{offset: u32 BE, len: u8}`
//! 2. `FLASH_DATA` with the payload
//! 3. `FLASH_DATA` read of `len` bytes after a short settle delay

use crate::bus::SmbusBus;
use crate::error::{Error, Result};
use crate::mcu::{
    check_channel, check_chunk, communication_error, decode_drive_type, fingerprint, ChangeCache,
    DriveType, IDENT_REGISTER,
};
use crate::text::decode_field;
use crate::transport::I2cDevice;

/// Answer to the identification read
pub const IDENT_RESPONSE: u8 = 0xA8;

pub const OPC_BOARD_TYPE: u8 = 0x02;
pub const OPC_PRESENCE: u8 = 0x20;
pub const OPC_FAILURES: u8 = 0x21;
pub const OPC_CLEAN: u8 = 0x22;
pub const OPC_LOCATE: u8 = 0x23;
pub const OPC_DISC_TYPE: u8 = 0x24;
pub const OPC_PRESENCE_CHANGED: u8 = 0x25;
pub const OPC_HOST_POWER: u8 = 0x60;
pub const OPC_SGPIO: u8 = 0x61;
pub const OPC_FW_VERSION: u8 = 0xF0;
pub const OPC_FLASH_ADDRESS: u8 = 0xFA;
pub const OPC_FLASH_DATA: u8 = 0xFD;
pub const OPC_FLASH_ERASE: u8 = 0xFE;
pub const OPC_REBOOT: u8 = 0xFF;

/// Length of the firmware version field
pub const VERSION_LEN: usize = 32;
/// Length of the board type field
pub const BOARD_TYPE_LEN: usize = 19;
/// Length of the flash address payload
pub const FLASH_LOCATION_LEN: usize = 5;
/// Settle time between writing and reading back flash data
pub const FLASH_SETTLE_US: u32 = 50_000;

/// Build the `FLASH_ADDRESS` payload
pub fn encode_flash_location(offset: u32, len: u8) -> [u8; FLASH_LOCATION_LEN] {
    let mut location = [0u8; FLASH_LOCATION_LEN];
    location[..4].copy_from_slice(&offset.to_be_bytes());
    location[4] = len;
    location
}

/// Extract the 2-bit drive type of `channel` from the `DISC_TYPE` word
pub fn unpack_drive_type(word: u16, channel: usize) -> u8 {
    ((word >> (channel * 2)) & 0x3) as u8
}

/// Driver for protocol version 1
pub struct ProtoV1<B: SmbusBus> {
    dev: I2cDevice<B>,
    presence: Option<u8>,
    failures: Option<u8>,
    types: Option<u16>,
    flash_offset: u32,
}

impl<B: SmbusBus> ProtoV1<B> {
    /// Wrap an identified device
    pub fn new(dev: I2cDevice<B>) -> Self {
        Self {
            dev,
            presence: None,
            failures: None,
            types: None,
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

    fn read_string(&mut self, opcode: u8, buf: &mut [u8], what: &'static str) -> String {
        match self.dev.read_block(opcode, buf) {
            Ok(n) => decode_field(&buf[..n.min(buf.len())]),
            Err(e) => {
                communication_error(&self.dev, what, e);
                String::new()
            }
        }
    }

    pub fn firmware_version(&mut self) -> String {
        let mut buf = [0u8; VERSION_LEN];
        self.read_string(OPC_FW_VERSION, &mut buf, "read firmware version")
    }

    pub fn board_type(&mut self) -> String {
        let mut buf = [0u8; BOARD_TYPE_LEN];
        self.read_string(OPC_BOARD_TYPE, &mut buf, "read board type")
    }

    pub fn refresh(&mut self) {
        self.presence = None;
        self.failures = None;
        self.types = None;
    }

    fn fetch_byte(&mut self, opcode: u8, op: &'static str) -> Result<u8> {
        self.dev
            .read_byte_data(opcode)
            .map_err(|e| communication_error(&self.dev, op, e))
    }

    fn presence(&mut self) -> Result<u8> {
        if let Some(mask) = self.presence {
            return Ok(mask);
        }
        let mask = self.fetch_byte(OPC_PRESENCE, "read drive presence")?;
        self.presence = Some(mask);
        Ok(mask)
    }

    fn failures(&mut self) -> Result<u8> {
        if let Some(mask) = self.failures {
            return Ok(mask);
        }
        let mask = self.fetch_byte(OPC_FAILURES, "read drive failures")?;
        self.failures = Some(mask);
        Ok(mask)
    }

    fn types(&mut self) -> Result<u16> {
        if let Some(word) = self.types {
            return Ok(word);
        }
        let word = self
            .dev
            .read_word_data(OPC_DISC_TYPE)
            .map_err(|e| communication_error(&self.dev, "read drive types", e))?;
        self.types = Some(word);
        Ok(word)
    }

    pub fn channel_present(&mut self, index: usize) -> Result<bool> {
        check_channel(index)?;
        Ok(self.presence()? & (1 << index) != 0)
    }

    pub fn channel_failed(&mut self, index: usize) -> Result<bool> {
        check_channel(index)?;
        Ok(self.failures()? & (1 << index) != 0)
    }

    pub fn channel_drive_type(&mut self, index: usize) -> Result<DriveType> {
        check_channel(index)?;
        let value = unpack_drive_type(self.types()?, index);
        Ok(decode_drive_type(self.dev.label(), index, value))
    }

    /// Read-modify-write of the locate mask; nothing is written if the bit
    /// already has the requested value
    pub fn set_channel_locate_led(&mut self, index: usize, assert: bool) -> Result<()> {
        check_channel(index)?;
        let current = self.fetch_byte(OPC_LOCATE, "read locate LEDs")?;
        let bit = 1u8 << index;
        let wanted = if assert { current | bit } else { current & !bit };
        if wanted == current {
            return Ok(());
        }
        self.dev
            .write_byte_data(OPC_LOCATE, wanted)
            .map_err(|e| communication_error(&self.dev, "set locate LED", e))
    }

    pub fn channel_locate_led(&mut self, index: usize) -> Result<bool> {
        check_channel(index)?;
        Ok(self.locate_mask()? & (1 << index) != 0)
    }

    pub fn locate_mask(&mut self) -> Result<u8> {
        self.fetch_byte(OPC_LOCATE, "read locate LEDs")
    }

    pub fn reset_locate_leds(&mut self) -> Result<()> {
        self.dev
            .write_byte_data(OPC_LOCATE, 0)
            .map_err(|e| communication_error(&self.dev, "reset locate LEDs", e))
    }

    pub fn set_host_power_state(&mut self, powered: bool) -> Result<()> {
        self.dev
            .write_byte_data(OPC_HOST_POWER, u8::from(powered))
            .map_err(|e| communication_error(&self.dev, "set host power state", e))
    }

    /// Besides the fingerprint, the MCU latches presence changes it saw
    /// between polls; a non-zero latch also counts as a change. Reading the
    /// latch clears it, so it is read on every call.
    pub fn has_state_changed(&mut self, cache: &mut ChangeCache) -> Result<bool> {
        self.refresh();
        let presence = self.presence()?;
        let failures = self.failures()?;
        let latch = self.fetch_byte(OPC_PRESENCE_CHANGED, "read presence change latch")?;
        let changed = cache.update(fingerprint(presence, failures));
        Ok(changed || latch != 0)
    }

    pub fn ping(&mut self) -> bool {
        self.dev.read_byte_data(IDENT_REGISTER).is_ok()
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

        let location = encode_flash_location(offset, data.len() as u8);
        self.dev
            .write_raw_at(OPC_FLASH_ADDRESS, &location)
            .map_err(|e| communication_error(&self.dev, "set flash address", e))?;
        self.dev
            .write_raw_at(OPC_FLASH_DATA, data)
            .map_err(|e| communication_error(&self.dev, "write flash", e))?;

        self.dev.delay_us(FLASH_SETTLE_US);

        let mut readback = vec![0u8; data.len()];
        self.dev
            .read_raw_at(OPC_FLASH_DATA, &mut readback)
            .map_err(|e| communication_error(&self.dev, "read back flash", e))?;

        if readback != data {
            log::error!(
                "{}: flash verify failed at 0x{:05X}",
                self.dev.label(),
                offset
            );
            return Err(Error::VerifyFailed {
                device: self.dev.label().to_string(),
                offset,
            });
        }

        self.flash_offset = offset + data.len() as u32;
        Ok(())
    }

    pub fn flash_offset(&self) -> u32 {
        self.flash_offset
    }
}
