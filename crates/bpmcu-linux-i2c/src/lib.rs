//! bpmcu-linux-i2c - Linux i2c-dev support
//!
//! This crate provides the bus backend for backplane MCUs reached through
//! the Linux `/dev/i2c-N` character devices.
//!
//! # Example
//!
//! ```no_run
//! use bpmcu_linux_i2c::{LinuxI2cConfig, LinuxI2cConnector};
//!
//! let connector = LinuxI2cConnector::new(LinuxI2cConfig::new("/dev/i2c-3", 0x2a));
//! let mut driver = bpmcu_core::create_driver(connector)?;
//! println!("firmware: {}", driver.firmware_version());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # System Requirements
//!
//! - Linux kernel with `CONFIG_I2C_CHARDEV`
//! - Read/write access to `/dev/i2c-N` (usually the `i2c` group)
//! - An adapter supporting SMBus byte data, I2C block transfers and PEC

pub mod device;
pub mod error;

// Re-exports
pub use device::{bus_path, parse_address, LinuxI2c, LinuxI2cConfig, LinuxI2cConnector};
pub use error::{LinuxI2cError, Result};
