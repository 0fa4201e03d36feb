//! Raw bus trait definitions
//!
//! A [`SmbusBus`] performs exactly one attempt of one bus primitive. Retry,
//! logging and the capability gate live one level up in
//! [`I2cDevice`](crate::transport::I2cDevice), so a bus implementation only
//! has to move bytes.

use bitflags::bitflags;

use crate::error::BusError;

/// Maximum payload of an SMBus block transfer
pub const SMBUS_BLOCK_MAX: usize = 32;

bitflags! {
    /// Adapter functionality flags
    ///
    /// Bit values follow the Linux `I2C_FUNC_*` definitions so a backend
    /// can pass the `I2C_FUNCS` result straight through.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Functionality: u32 {
        /// Plain I2C messages (combined transfers)
        const I2C                    = 0x0000_0001;
        /// Packet error checking
        const SMBUS_PEC              = 0x0000_0008;
        /// SMBus receive byte
        const SMBUS_READ_BYTE        = 0x0002_0000;
        /// SMBus send byte
        const SMBUS_WRITE_BYTE       = 0x0004_0000;
        /// SMBus read byte data
        const SMBUS_READ_BYTE_DATA   = 0x0008_0000;
        /// SMBus write byte data
        const SMBUS_WRITE_BYTE_DATA  = 0x0010_0000;
        /// SMBus read word data
        const SMBUS_READ_WORD_DATA   = 0x0020_0000;
        /// SMBus write word data
        const SMBUS_WRITE_WORD_DATA  = 0x0040_0000;
        /// I2C-style block read
        const SMBUS_READ_I2C_BLOCK   = 0x0400_0000;
        /// I2C-style block write
        const SMBUS_WRITE_I2C_BLOCK  = 0x0800_0000;

        /// Shorthand for byte and byte-data transfers in both directions
        const SMBUS_BYTE_DATA = Self::SMBUS_READ_BYTE_DATA.bits()
            | Self::SMBUS_WRITE_BYTE_DATA.bits();
        /// Shorthand for I2C block transfers in both directions
        const SMBUS_I2C_BLOCK = Self::SMBUS_READ_I2C_BLOCK.bits()
            | Self::SMBUS_WRITE_I2C_BLOCK.bits();
    }
}

impl Functionality {
    /// What the MCU protocols need from an adapter
    pub const REQUIRED: Self = Self::SMBUS_BYTE_DATA
        .union(Self::SMBUS_I2C_BLOCK)
        .union(Self::SMBUS_PEC);
}

impl Default for Functionality {
    fn default() -> Self {
        Functionality::empty()
    }
}

/// One message of a combined I2C transfer
#[derive(Debug)]
pub enum Message<'a> {
    /// Bytes sent to the device
    Write(&'a [u8]),
    /// Buffer filled from the device
    Read(&'a mut [u8]),
}

impl Message<'_> {
    /// Number of bytes this message moves
    pub fn len(&self) -> usize {
        match self {
            Message::Write(data) => data.len(),
            Message::Read(buf) => buf.len(),
        }
    }

    /// True for zero-length messages
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Single-attempt bus primitives for one target address
///
/// Every method performs exactly one transaction. Errors are returned as
/// [`BusError`] values and never retried here.
pub trait SmbusBus {
    /// Query the adapter functionality
    fn functionality(&mut self) -> Result<Functionality, BusError>;

    /// SMBus receive byte
    fn read_byte(&mut self) -> Result<u8, BusError>;

    /// SMBus send byte
    fn write_byte(&mut self, value: u8) -> Result<(), BusError>;

    /// SMBus read byte data
    fn read_byte_data(&mut self, command: u8) -> Result<u8, BusError>;

    /// SMBus write byte data
    fn write_byte_data(&mut self, command: u8, value: u8) -> Result<(), BusError>;

    /// SMBus read word data (little-endian on the wire)
    fn read_word_data(&mut self, command: u8) -> Result<u16, BusError>;

    /// SMBus write word data (little-endian on the wire)
    fn write_word_data(&mut self, command: u8, value: u16) -> Result<(), BusError>;

    /// I2C-style block read of `buf.len()` bytes (at most
    /// [`SMBUS_BLOCK_MAX`]), returning the number of bytes read
    fn read_i2c_block_data(&mut self, command: u8, buf: &mut [u8]) -> Result<usize, BusError>;

    /// Run the messages as one combined transfer with repeated starts and a
    /// single STOP at the end
    fn transfer(&mut self, messages: &mut [Message<'_>]) -> Result<(), BusError>;

    /// Block the calling thread for the given number of microseconds
    fn delay_us(&mut self, us: u32);
}

impl<T: SmbusBus + ?Sized> SmbusBus for Box<T> {
    fn functionality(&mut self) -> Result<Functionality, BusError> {
        (**self).functionality()
    }

    fn read_byte(&mut self) -> Result<u8, BusError> {
        (**self).read_byte()
    }

    fn write_byte(&mut self, value: u8) -> Result<(), BusError> {
        (**self).write_byte(value)
    }

    fn read_byte_data(&mut self, command: u8) -> Result<u8, BusError> {
        (**self).read_byte_data(command)
    }

    fn write_byte_data(&mut self, command: u8, value: u8) -> Result<(), BusError> {
        (**self).write_byte_data(command, value)
    }

    fn read_word_data(&mut self, command: u8) -> Result<u16, BusError> {
        (**self).read_word_data(command)
    }

    fn write_word_data(&mut self, command: u8, value: u16) -> Result<(), BusError> {
        (**self).write_word_data(command, value)
    }

    fn read_i2c_block_data(&mut self, command: u8, buf: &mut [u8]) -> Result<usize, BusError> {
        (**self).read_i2c_block_data(command, buf)
    }

    fn transfer(&mut self, messages: &mut [Message<'_>]) -> Result<(), BusError> {
        (**self).transfer(messages)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

/// Opens fresh bus handles for one bus/address pair
///
/// The driver factory goes through a connector instead of a ready-made bus
/// so it can be re-run after a firmware flash, when the MCU may come back
/// speaking a different protocol.
pub trait Connect {
    /// The bus type this connector produces
    type Bus: SmbusBus;

    /// Human-readable device label, e.g. `/dev/i2c-3, 0x2a`
    fn label(&self) -> String;

    /// Open a new exclusive handle
    fn connect(&mut self) -> Result<Self::Bus, BusError>;
}

impl<C: Connect + ?Sized> Connect for &mut C {
    type Bus = C::Bus;

    fn label(&self) -> String {
        (**self).label()
    }

    fn connect(&mut self) -> Result<Self::Bus, BusError> {
        (**self).connect()
    }
}

impl<C: Connect + ?Sized> Connect for Box<C> {
    type Bus = C::Bus;

    fn label(&self) -> String {
        (**self).label()
    }

    fn connect(&mut self) -> Result<Self::Bus, BusError> {
        (**self).connect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_functionality() {
        let required = Functionality::REQUIRED;
        assert!(required.contains(Functionality::SMBUS_READ_BYTE_DATA));
        assert!(required.contains(Functionality::SMBUS_WRITE_I2C_BLOCK));
        assert!(required.contains(Functionality::SMBUS_PEC));
        assert!(!required.contains(Functionality::I2C));
        assert_eq!(required.bits(), 0x0C18_0008);
    }

    #[test]
    fn test_message_len() {
        let mut buf = [0u8; 4];
        assert_eq!(Message::Write(&[1, 2]).len(), 2);
        assert_eq!(Message::Read(&mut buf).len(), 4);
        assert!(Message::Write(&[]).is_empty());
    }
}
