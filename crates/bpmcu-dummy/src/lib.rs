//! bpmcu-dummy - Simulated backplane MCU for testing
//!
//! This crate provides an in-memory model of a backplane MCU that speaks
//! either protocol generation. It's useful for testing and development
//! without real hardware, and it can inject the faults seen on real buses:
//! NAKed identification reads, unstable registers, corrupted flash readback
//! and devices that do not come back after a reboot.
//!
//! The model is shared between a [`DummyConnector`] and every [`DummyBus`]
//! it opens, so state survives reconnects the way a real MCU does.

mod sim;

pub use sim::{Counters, DummyConfig, Faults, McuSim, NAK};

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use bpmcu_core::bus::{Connect, Functionality, Message, SmbusBus};
use bpmcu_core::{BusError, ProtocolVersion};

/// Bus handle onto a simulated MCU
#[derive(Debug, Clone)]
pub struct DummyBus {
    sim: Rc<RefCell<McuSim>>,
}

impl SmbusBus for DummyBus {
    fn functionality(&mut self) -> Result<Functionality, BusError> {
        if self.sim.borrow().functionality_ok() {
            Ok(Functionality::REQUIRED | Functionality::I2C)
        } else {
            Ok(Functionality::SMBUS_BYTE_DATA)
        }
    }

    fn read_byte(&mut self) -> Result<u8, BusError> {
        self.sim.borrow_mut().read_byte()
    }

    fn write_byte(&mut self, value: u8) -> Result<(), BusError> {
        self.sim.borrow_mut().write_byte(value)
    }

    fn read_byte_data(&mut self, command: u8) -> Result<u8, BusError> {
        self.sim.borrow_mut().read_byte_data(command)
    }

    fn write_byte_data(&mut self, command: u8, value: u8) -> Result<(), BusError> {
        self.sim.borrow_mut().write_byte_data(command, value)
    }

    fn read_word_data(&mut self, command: u8) -> Result<u16, BusError> {
        self.sim.borrow_mut().read_word_data(command)
    }

    fn write_word_data(&mut self, command: u8, value: u16) -> Result<(), BusError> {
        self.sim.borrow_mut().write_word_data(command, value)
    }

    fn read_i2c_block_data(&mut self, command: u8, buf: &mut [u8]) -> Result<usize, BusError> {
        self.sim.borrow_mut().read_block(command, buf)
    }

    fn transfer(&mut self, messages: &mut [Message<'_>]) -> Result<(), BusError> {
        self.sim.borrow_mut().transfer(messages)
    }

    fn delay_us(&mut self, us: u32) {
        self.sim.borrow_mut().delay(us);
    }
}

/// Opens [`DummyBus`] handles onto one shared [`McuSim`]
#[derive(Debug, Clone)]
pub struct DummyConnector {
    sim: Rc<RefCell<McuSim>>,
    label: String,
}

impl DummyConnector {
    /// Create a connector for a fresh MCU
    pub fn new(config: DummyConfig) -> Self {
        Self::with_faults(config, Faults::default())
    }

    /// Create a connector for a fresh MCU with faults injected
    pub fn with_faults(config: DummyConfig, faults: Faults) -> Self {
        let label = format!("dummy:{}", config.protocol);
        Self {
            sim: Rc::new(RefCell::new(McuSim::with_faults(config, faults))),
            label,
        }
    }

    /// Create a connector from a `dummy:v0` / `dummy:v1` bus argument
    pub fn from_bus_arg(arg: &str) -> Option<Self> {
        let protocol = match arg.strip_prefix("dummy")? {
            "" | ":v1" => ProtocolVersion::V1,
            ":v0" => ProtocolVersion::V0,
            _ => return None,
        };
        Some(Self::new(DummyConfig::new(protocol).with_drive(0, 2).with_drive(3, 1)))
    }

    /// Inspect the simulated MCU
    pub fn sim(&self) -> Ref<'_, McuSim> {
        self.sim.borrow()
    }

    /// Modify the simulated MCU
    pub fn sim_mut(&self) -> RefMut<'_, McuSim> {
        self.sim.borrow_mut()
    }
}

impl Connect for DummyConnector {
    type Bus = DummyBus;

    fn label(&self) -> String {
        self.label.clone()
    }

    fn connect(&mut self) -> Result<DummyBus, BusError> {
        self.sim.borrow_mut().connect()?;
        log::debug!("dummy: opened {}", self.label);
        Ok(DummyBus {
            sim: Rc::clone(&self.sim),
        })
    }
}
