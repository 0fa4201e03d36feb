//! Linux i2c-dev bus implementation
//!
//! This module provides the `LinuxI2c` struct that implements the `SmbusBus`
//! trait on top of `/dev/i2c-N` character devices.

use crate::error::{LinuxI2cError, Result};

use bpmcu_core::bus::{Connect, Functionality, Message, SmbusBus, SMBUS_BLOCK_MAX};
use bpmcu_core::BusError;

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;

/// Linux i2c-dev ioctl constants
mod ioctl {
    use super::{I2cRdwrIoctlData, I2cSmbusIoctlData};
    use nix::{ioctl_read_bad, ioctl_write_int_bad, ioctl_write_ptr_bad};

    const I2C_SLAVE: u32 = 0x0703;
    const I2C_FUNCS: u32 = 0x0705;
    const I2C_RDWR: u32 = 0x0707;
    const I2C_PEC: u32 = 0x0708;
    const I2C_SMBUS: u32 = 0x0720;

    // The i2c-dev request numbers predate the _IOC encoding
    ioctl_write_int_bad!(i2c_slave, I2C_SLAVE);
    ioctl_read_bad!(i2c_funcs, I2C_FUNCS, libc::c_ulong);
    ioctl_write_ptr_bad!(i2c_rdwr, I2C_RDWR, I2cRdwrIoctlData);
    ioctl_write_int_bad!(i2c_pec, I2C_PEC);
    ioctl_write_ptr_bad!(i2c_smbus, I2C_SMBUS, I2cSmbusIoctlData);
}

/// `read_write` values of `struct i2c_smbus_ioctl_data`
const I2C_SMBUS_READ: u8 = 1;
const I2C_SMBUS_WRITE: u8 = 0;

/// SMBus transaction types
const I2C_SMBUS_BYTE: u32 = 1;
const I2C_SMBUS_BYTE_DATA: u32 = 2;
const I2C_SMBUS_WORD_DATA: u32 = 3;
const I2C_SMBUS_I2C_BLOCK_DATA: u32 = 8;

/// `struct i2c_msg` read flag
const I2C_M_RD: u16 = 0x0001;

/// Lowest and highest usable 7-bit target addresses
pub const ADDR_MIN: u8 = 0x01;
pub const ADDR_MAX: u8 = 0x7F;

/// Kernel `union i2c_smbus_data`, viewed as its block member
#[repr(C, align(2))]
#[derive(Debug, Clone)]
struct I2cSmbusData {
    block: [u8; SMBUS_BLOCK_MAX + 2],
}

impl I2cSmbusData {
    fn new() -> Self {
        Self {
            block: [0; SMBUS_BLOCK_MAX + 2],
        }
    }

    fn byte(&self) -> u8 {
        self.block[0]
    }

    fn word(&self) -> u16 {
        u16::from_ne_bytes([self.block[0], self.block[1]])
    }
}

/// Kernel `struct i2c_smbus_ioctl_data`
#[repr(C)]
struct I2cSmbusIoctlData {
    read_write: u8,
    command: u8,
    size: u32,
    data: *mut I2cSmbusData,
}

/// Kernel `struct i2c_msg`
#[repr(C)]
struct I2cMsg {
    addr: u16,
    flags: u16,
    len: u16,
    buf: *mut u8,
}

/// Kernel `struct i2c_rdwr_ioctl_data`
#[repr(C)]
struct I2cRdwrIoctlData {
    msgs: *mut I2cMsg,
    nmsgs: u32,
}

/// Configuration for opening a Linux I2C target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinuxI2cConfig {
    /// Bus device path (e.g., "/dev/i2c-3")
    pub device: String,
    /// 7-bit target address
    pub address: u8,
    /// Enable SMBus packet error checking
    pub pec: bool,
}

impl LinuxI2cConfig {
    /// Create a new configuration for a bus path and address
    pub fn new(device: impl Into<String>, address: u8) -> Self {
        Self {
            device: device.into(),
            address,
            pec: false,
        }
    }

    /// Enable or disable packet error checking
    pub fn with_pec(mut self, pec: bool) -> Self {
        self.pec = pec;
        self
    }

    /// Label used in log lines, e.g. `/dev/i2c-3, 0x2a`
    pub fn label(&self) -> String {
        format!("{}, 0x{:02x}", self.device, self.address)
    }
}

/// One target address on a Linux I2C bus
pub struct LinuxI2c {
    file: File,
    address: u8,
}

impl LinuxI2c {
    /// Open the bus and bind the handle to the configured address
    pub fn open(config: &LinuxI2cConfig) -> Result<Self> {
        if config.device.is_empty() {
            return Err(LinuxI2cError::NoDevice);
        }
        if !(ADDR_MIN..=ADDR_MAX).contains(&config.address) {
            return Err(LinuxI2cError::InvalidAddress(format!(
                "0x{:02x}",
                config.address
            )));
        }

        log::debug!("linux_i2c: Opening {}", config.label());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config.device)
            .map_err(|e| LinuxI2cError::OpenFailed {
                path: config.device.clone(),
                source: e,
            })?;

        let fd = file.as_raw_fd();

        unsafe {
            ioctl::i2c_slave(fd, libc::c_int::from(config.address)).map_err(|e| {
                LinuxI2cError::SetAddressFailed {
                    addr: config.address,
                    source: std::io::Error::from_raw_os_error(e as i32),
                }
            })?;
        }

        if config.pec {
            unsafe {
                ioctl::i2c_pec(fd, 1).map_err(|e| {
                    LinuxI2cError::SetPecFailed(std::io::Error::from_raw_os_error(e as i32))
                })?;
            }
        }

        log::debug!(
            "linux_i2c: Opened {} (pec={})",
            config.label(),
            if config.pec { "on" } else { "off" }
        );

        Ok(Self {
            file,
            address: config.address,
        })
    }

    /// Target address of this handle
    pub fn address(&self) -> u8 {
        self.address
    }

    fn smbus(
        &mut self,
        read_write: u8,
        command: u8,
        size: u32,
        data: Option<&mut I2cSmbusData>,
    ) -> std::result::Result<(), BusError> {
        let args = I2cSmbusIoctlData {
            read_write,
            command,
            size,
            data: data.map_or(std::ptr::null_mut(), |d| d as *mut I2cSmbusData),
        };
        unsafe { ioctl::i2c_smbus(self.file.as_raw_fd(), &args) }
            .map(|_| ())
            .map_err(|e| BusError::Os(e as i32))
    }
}

impl SmbusBus for LinuxI2c {
    fn functionality(&mut self) -> std::result::Result<Functionality, BusError> {
        let mut funcs: libc::c_ulong = 0;
        unsafe { ioctl::i2c_funcs(self.file.as_raw_fd(), &mut funcs) }
            .map_err(|e| BusError::Os(e as i32))?;
        Ok(Functionality::from_bits_truncate(funcs as u32))
    }

    fn read_byte(&mut self) -> std::result::Result<u8, BusError> {
        let mut data = I2cSmbusData::new();
        self.smbus(I2C_SMBUS_READ, 0, I2C_SMBUS_BYTE, Some(&mut data))?;
        Ok(data.byte())
    }

    fn write_byte(&mut self, value: u8) -> std::result::Result<(), BusError> {
        self.smbus(I2C_SMBUS_WRITE, value, I2C_SMBUS_BYTE, None)
    }

    fn read_byte_data(&mut self, command: u8) -> std::result::Result<u8, BusError> {
        let mut data = I2cSmbusData::new();
        self.smbus(I2C_SMBUS_READ, command, I2C_SMBUS_BYTE_DATA, Some(&mut data))?;
        Ok(data.byte())
    }

    fn write_byte_data(&mut self, command: u8, value: u8) -> std::result::Result<(), BusError> {
        let mut data = I2cSmbusData::new();
        data.block[0] = value;
        self.smbus(I2C_SMBUS_WRITE, command, I2C_SMBUS_BYTE_DATA, Some(&mut data))
    }

    fn read_word_data(&mut self, command: u8) -> std::result::Result<u16, BusError> {
        let mut data = I2cSmbusData::new();
        self.smbus(I2C_SMBUS_READ, command, I2C_SMBUS_WORD_DATA, Some(&mut data))?;
        Ok(data.word())
    }

    fn write_word_data(&mut self, command: u8, value: u16) -> std::result::Result<(), BusError> {
        let mut data = I2cSmbusData::new();
        data.block[..2].copy_from_slice(&value.to_ne_bytes());
        self.smbus(I2C_SMBUS_WRITE, command, I2C_SMBUS_WORD_DATA, Some(&mut data))
    }

    fn read_i2c_block_data(
        &mut self,
        command: u8,
        buf: &mut [u8],
    ) -> std::result::Result<usize, BusError> {
        if buf.len() > SMBUS_BLOCK_MAX {
            return Err(BusError::BlockTooLong(buf.len()));
        }
        let mut data = I2cSmbusData::new();
        // Requested length goes in block[0], data comes back after it
        data.block[0] = buf.len() as u8;
        self.smbus(
            I2C_SMBUS_READ,
            command,
            I2C_SMBUS_I2C_BLOCK_DATA,
            Some(&mut data),
        )?;
        let received = usize::from(data.block[0]).min(buf.len());
        buf[..received].copy_from_slice(&data.block[1..=received]);
        Ok(received)
    }

    fn transfer(&mut self, messages: &mut [Message<'_>]) -> std::result::Result<(), BusError> {
        let mut msgs = Vec::with_capacity(messages.len());
        for msg in messages.iter_mut() {
            let len = u16::try_from(msg.len()).map_err(|_| BusError::Os(libc::EINVAL))?;
            let (flags, buf) = match msg {
                // The kernel only reads from write buffers
                Message::Write(data) => (0, data.as_ptr() as *mut u8),
                Message::Read(buf) => (I2C_M_RD, buf.as_mut_ptr()),
            };
            msgs.push(I2cMsg {
                addr: u16::from(self.address),
                flags,
                len,
                buf,
            });
        }

        let args = I2cRdwrIoctlData {
            msgs: msgs.as_mut_ptr(),
            nmsgs: msgs.len() as u32,
        };
        unsafe { ioctl::i2c_rdwr(self.file.as_raw_fd(), &args) }
            .map(|_| ())
            .map_err(|e| BusError::Os(e as i32))
    }

    fn delay_us(&mut self, us: u32) {
        std::thread::sleep(std::time::Duration::from_micros(us as u64));
    }
}

/// Opens a fresh [`LinuxI2c`] handle on every connect
#[derive(Debug, Clone)]
pub struct LinuxI2cConnector {
    config: LinuxI2cConfig,
}

impl LinuxI2cConnector {
    pub fn new(config: LinuxI2cConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LinuxI2cConfig {
        &self.config
    }
}

impl Connect for LinuxI2cConnector {
    type Bus = LinuxI2c;

    fn label(&self) -> String {
        self.config.label()
    }

    fn connect(&mut self) -> std::result::Result<LinuxI2c, BusError> {
        LinuxI2c::open(&self.config).map_err(|e| {
            log::error!("linux_i2c: {}", e);
            BusError::from(e)
        })
    }
}

/// Expand a bus argument (`3`, `i2c-3` or `/dev/i2c-3`) to a device path
pub fn bus_path(bus: &str) -> std::result::Result<String, String> {
    let bus = bus.trim();
    if bus.is_empty() {
        return Err("No I2C bus specified".to_string());
    }
    if bus.starts_with('/') {
        return Ok(bus.to_string());
    }
    let number = bus.strip_prefix("i2c-").unwrap_or(bus);
    number
        .parse::<u32>()
        .map(|n| format!("/dev/i2c-{}", n))
        .map_err(|_| format!("Invalid I2C bus: {}", bus))
}

/// Parse a 7-bit target address, hex with `0x` prefix or decimal
pub fn parse_address(value: &str) -> std::result::Result<u8, String> {
    let value = value.trim();
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    }
    .map_err(|_| format!("Invalid I2C address: {}", value))?;

    match u8::try_from(parsed) {
        Ok(addr) if (ADDR_MIN..=ADDR_MAX).contains(&addr) => Ok(addr),
        _ => Err(LinuxI2cError::InvalidAddress(value.to_string()).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x2a"), Ok(0x2a));
        assert_eq!(parse_address("0X7F"), Ok(0x7f));
        assert_eq!(parse_address("42"), Ok(42));
        assert!(parse_address("0x00").is_err());
        assert!(parse_address("0x80").is_err());
        assert!(parse_address("300").is_err());
        assert!(parse_address("bogus").is_err());
    }

    #[test]
    fn test_bus_path() {
        assert_eq!(bus_path("3").unwrap(), "/dev/i2c-3");
        assert_eq!(bus_path("i2c-12").unwrap(), "/dev/i2c-12");
        assert_eq!(bus_path("/dev/i2c-0").unwrap(), "/dev/i2c-0");
        assert!(bus_path("").is_err());
        assert!(bus_path("spi0").is_err());
    }

    #[test]
    fn test_label() {
        let config = LinuxI2cConfig::new("/dev/i2c-3", 0x2a).with_pec(true);
        assert_eq!(config.label(), "/dev/i2c-3, 0x2a");
        assert!(config.pec);
    }

    #[test]
    fn test_open_rejects_bad_config() {
        let config = LinuxI2cConfig::new("", 0x2a);
        assert!(matches!(
            LinuxI2c::open(&config),
            Err(LinuxI2cError::NoDevice)
        ));
        let config = LinuxI2cConfig::new("/dev/i2c-0", 0x80);
        assert!(matches!(
            LinuxI2c::open(&config),
            Err(LinuxI2cError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_kernel_struct_layout() {
        assert_eq!(std::mem::size_of::<I2cSmbusData>(), 34);
        assert_eq!(std::mem::align_of::<I2cSmbusData>(), 2);
        #[cfg(target_pointer_width = "64")]
        {
            assert_eq!(std::mem::size_of::<I2cSmbusIoctlData>(), 16);
            assert_eq!(std::mem::size_of::<I2cMsg>(), 16);
            assert_eq!(std::mem::size_of::<I2cRdwrIoctlData>(), 16);
        }
    }

    #[test]
    fn test_open_error_maps_to_errno() {
        let err = LinuxI2cError::OpenFailed {
            path: "/dev/i2c-99".into(),
            source: std::io::Error::from_raw_os_error(libc::ENOENT),
        };
        assert_eq!(BusError::from(err), BusError::Os(libc::ENOENT));
    }
}
