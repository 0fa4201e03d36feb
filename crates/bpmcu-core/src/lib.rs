//! bpmcu-core - Backplane MCU communication library
//!
//! This crate talks to the microcontroller that sits on a drive backplane
//! and manages drive presence, failure and type detection, locate LEDs, host
//! power signalling and in-field firmware updates. It is bus-agnostic: a
//! backend only implements the single-attempt primitives of
//! [`bus::SmbusBus`], everything else is built on top.
//!
//! # Layers
//!
//! - [`transport`] - one bus/address with bounded retry, transaction logging
//!   and a per-handle log spam guard
//! - [`mcu`] - the two protocol generations behind one [`McuDriver`] enum,
//!   plus the factory that picks one by reading the identification register
//! - [`update`] - the firmware update sequencer
//! - [`image`] - read-only memory-mapped firmware images (unix only)
//!
//! # Example
//!
//! ```ignore
//! use bpmcu_core::{bus::Connect, mcu};
//!
//! fn show<C: Connect>(connector: C) -> bpmcu_core::Result<()> {
//!     let mut driver = mcu::create_driver(connector)?;
//!     println!("firmware: {}", driver.firmware_version());
//!     for state in driver.channel_states()? {
//!         println!("{}: {:?}", state.index, state.drive_type);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(rust_2018_idioms)]

pub mod bus;
pub mod error;
#[cfg(unix)]
pub mod image;
pub mod mcu;
pub mod text;
pub mod transport;
pub mod update;

pub use bus::{Connect, Functionality, Message, SmbusBus};
pub use error::{BusError, Error, FailureClass, ImageError, Result};
pub use mcu::{
    create_driver, ChangeCache, DeviceInfo, DriveChannelState, DriveType, McuDriver,
    ProtocolVersion,
};
pub use transport::I2cDevice;
pub use update::{update, NoProgress, UpdateOptions, UpdateProgress, UpdateReport, UpdateState};
#[cfg(unix)]
pub use update::update_from_file;
