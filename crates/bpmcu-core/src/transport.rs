//! Transport layer: one bus/address with bounded retry and transaction logging
//!
//! [`I2cDevice`] wraps a [`SmbusBus`] and gives every primitive the same
//! treatment: up to [`RETRY_COUNT`] attempts while the bus reports an error,
//! then one log line describing the transaction. Errors are returned as
//! [`BusError`] values; deciding whether they are fatal is up to the caller.
//!
//! The handle checks adapter functionality when it is created. A handle that
//! fails the check is permanently non-operational and every operation on it
//! returns [`BusError::NotOperational`] without touching the bus.

use std::fmt::Write as _;

use crate::bus::{Functionality, Message, SmbusBus, SMBUS_BLOCK_MAX};
use crate::error::BusError;

/// Attempts per transaction
pub const RETRY_COUNT: usize = 3;

/// Consecutive failures logged in full before the spam guard kicks in
const MAX_LOGGED_ERRORS: u32 = 3;

/// What the spam guard allows for the current transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDecision {
    /// Log the full transaction
    Full,
    /// Log one summary line, then go quiet
    Summary,
    /// Log nothing
    Silent,
}

/// Per-handle failure counter that throttles error logging
#[derive(Debug, Default, Clone)]
pub struct SpamGuard {
    consecutive_errors: u32,
}

impl SpamGuard {
    /// Record the outcome of one transaction and decide how to log it
    pub fn record(&mut self, failed: bool) -> LogDecision {
        if !failed {
            self.consecutive_errors = 0;
            return LogDecision::Full;
        }

        let decision = match self.consecutive_errors {
            n if n < MAX_LOGGED_ERRORS => LogDecision::Full,
            MAX_LOGGED_ERRORS => LogDecision::Summary,
            _ => LogDecision::Silent,
        };
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        decision
    }

    /// Failures since the last success
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }
}

/// Append ` <tag> (<len>): xx xx ..` to a log line
fn push_payload(line: &mut String, tag: &str, bytes: &[u8]) {
    let _ = write!(line, " {} ({}):", tag, bytes.len());
    for byte in bytes {
        let _ = write!(line, " {:02x}", byte);
    }
}

/// A single I2C target with retry, logging and a capability gate
pub struct I2cDevice<B: SmbusBus> {
    bus: B,
    label: String,
    ok: bool,
    guard: SpamGuard,
}

impl<B: SmbusBus> I2cDevice<B> {
    /// Wrap a bus and validate its functionality
    pub fn new(mut bus: B, label: impl Into<String>) -> Self {
        let label = label.into();

        let ok = match bus.functionality() {
            Ok(funcs) if funcs.contains(Functionality::REQUIRED) => true,
            Ok(funcs) => {
                log::error!(
                    "{}: I2C bus does not support required operations (funcs 0x{:08x})",
                    label,
                    funcs.bits()
                );
                false
            }
            Err(e) => {
                log::error!("{}: failed to query adapter functionality: {}", label, e);
                false
            }
        };

        Self {
            bus,
            label,
            ok,
            guard: SpamGuard::default(),
        }
    }

    /// True if the handle passed its capability check
    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// Device label used in log lines and errors
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Access the underlying bus
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutable access to the underlying bus
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Consume the handle and return the bus
    pub fn into_bus(self) -> B {
        self.bus
    }

    /// Failures since the last successful transaction
    pub fn consecutive_errors(&self) -> u32 {
        self.guard.consecutive_errors()
    }

    /// Blocking delay on the calling thread
    pub fn delay_us(&mut self, us: u32) {
        self.bus.delay_us(us);
    }

    /// Run `op` up to [`RETRY_COUNT`] times while it fails
    fn with_retry<T>(
        &mut self,
        mut op: impl FnMut(&mut B) -> Result<T, BusError>,
    ) -> Result<T, BusError> {
        if !self.ok {
            log::debug!("{}: refusing I/O on non-operational handle", self.label);
            return Err(BusError::NotOperational);
        }

        let mut result = op(&mut self.bus);
        for _ in 1..RETRY_COUNT {
            if result.is_ok() {
                break;
            }
            result = op(&mut self.bus);
        }
        result
    }

    fn log_transfer(
        &mut self,
        cmd: Option<u8>,
        tx: Option<&[u8]>,
        rx: Option<&[u8]>,
        status: Result<(), BusError>,
    ) {
        let mut line = self.label.clone();
        match status {
            Ok(()) => line.push_str(" <ok>"),
            Err(e) => {
                let _ = write!(line, " <FAILED ({})!>", e.code());
            }
        }

        match self.guard.record(status.is_err()) {
            LogDecision::Full => {}
            LogDecision::Summary => {
                log::error!(
                    "{} ... (detected multiple errors, suppressing further log output)",
                    line
                );
                return;
            }
            LogDecision::Silent => return,
        }

        if let Some(cmd) = cmd {
            let _ = write!(line, " CMD: {:02x}", cmd);
        }
        if let Some(tx) = tx {
            push_payload(&mut line, "TX", tx);
        }
        if let (Some(rx), Ok(())) = (rx, status) {
            push_payload(&mut line, "RX", rx);
        }

        if status.is_err() {
            log::error!("{}", line);
        } else {
            log::debug!("{}", line);
        }
    }

    /// Receive one byte
    pub fn read_byte(&mut self) -> Result<u8, BusError> {
        let res = self.with_retry(|bus| bus.read_byte());
        let value = res.unwrap_or_default();
        self.log_transfer(None, None, Some(&[value]), res.map(|_| ()));
        res
    }

    /// Send one byte
    pub fn write_byte(&mut self, value: u8) -> Result<(), BusError> {
        let res = self.with_retry(|bus| bus.write_byte(value));
        self.log_transfer(None, Some(&[value]), None, res);
        res
    }

    /// Read one byte from register `reg`
    pub fn read_byte_data(&mut self, reg: u8) -> Result<u8, BusError> {
        let res = self.with_retry(|bus| bus.read_byte_data(reg));
        let value = res.unwrap_or_default();
        self.log_transfer(Some(reg), None, Some(&[value]), res.map(|_| ()));
        res
    }

    /// Write one byte to register `reg`
    pub fn write_byte_data(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        let res = self.with_retry(|bus| bus.write_byte_data(reg, value));
        self.log_transfer(Some(reg), Some(&[value]), None, res);
        res
    }

    /// Read a 16-bit word from register `reg`
    pub fn read_word_data(&mut self, reg: u8) -> Result<u16, BusError> {
        let res = self.with_retry(|bus| bus.read_word_data(reg));
        let value = res.unwrap_or_default();
        self.log_transfer(
            Some(reg),
            None,
            Some(&value.to_le_bytes()),
            res.map(|_| ()),
        );
        res
    }

    /// Write a 16-bit word to register `reg`
    pub fn write_word_data(&mut self, reg: u8, value: u16) -> Result<(), BusError> {
        let res = self.with_retry(|bus| bus.write_word_data(reg, value));
        self.log_transfer(Some(reg), Some(&value.to_le_bytes()), None, res);
        res
    }

    /// Block read of `buf.len()` bytes from register `reg`
    ///
    /// Limited to [`SMBUS_BLOCK_MAX`] bytes. Returns the number of bytes read.
    pub fn read_block(&mut self, reg: u8, buf: &mut [u8]) -> Result<usize, BusError> {
        if buf.len() > SMBUS_BLOCK_MAX {
            return Err(BusError::BlockTooLong(buf.len()));
        }
        let res = self.with_retry(|bus| bus.read_i2c_block_data(reg, &mut *buf));
        let received = res.map(|n| n.min(buf.len())).unwrap_or(0);
        self.log_transfer(Some(reg), None, Some(&buf[..received]), res.map(|_| ()));
        res
    }

    /// Raw read of `buf.len()` bytes, no command byte
    pub fn read_raw(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        let res = self.with_retry(|bus| bus.transfer(&mut [Message::Read(&mut *buf)]));
        self.log_transfer(None, None, Some(&*buf), res);
        res
    }

    /// Send `cmd`, then read `buf.len()` bytes in the same transfer
    pub fn read_raw_at(&mut self, cmd: u8, buf: &mut [u8]) -> Result<(), BusError> {
        let res = self.with_retry(|bus| {
            bus.transfer(&mut [Message::Write(&[cmd]), Message::Read(&mut *buf)])
        });
        self.log_transfer(Some(cmd), None, Some(&*buf), res);
        res
    }

    /// Raw write of `data`, no command byte
    pub fn write_raw(&mut self, data: &[u8]) -> Result<(), BusError> {
        let res = self.with_retry(|bus| bus.transfer(&mut [Message::Write(data)]));
        self.log_transfer(None, Some(data), None, res);
        res
    }

    /// Raw write of `cmd` followed by `data` as one message
    pub fn write_raw_at(&mut self, cmd: u8, data: &[u8]) -> Result<(), BusError> {
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(cmd);
        frame.extend_from_slice(data);

        let res = self.with_retry(|bus| bus.transfer(&mut [Message::Write(&frame)]));
        self.log_transfer(Some(cmd), Some(data), None, res);
        res
    }

    /// Write `tx`, then read `rx.len()` bytes without an intervening STOP
    pub fn read_after_write(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError> {
        let res = self
            .with_retry(|bus| bus.transfer(&mut [Message::Write(tx), Message::Read(&mut *rx)]));
        self.log_transfer(None, Some(tx), Some(&*rx), res);
        res
    }
}

impl<B: SmbusBus> std::fmt::Debug for I2cDevice<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("I2cDevice")
            .field("label", &self.label)
            .field("ok", &self.ok)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bus that fails a scripted number of times before answering
    struct FlakyBus {
        funcs: Functionality,
        failures_left: usize,
        calls: usize,
        last_transfer: Vec<Vec<u8>>,
    }

    impl FlakyBus {
        fn new(failures: usize) -> Self {
            Self {
                funcs: Functionality::REQUIRED | Functionality::I2C,
                failures_left: failures,
                calls: 0,
                last_transfer: Vec::new(),
            }
        }

        fn attempt(&mut self) -> Result<(), BusError> {
            self.calls += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                Err(BusError::Os(121))
            } else {
                Ok(())
            }
        }
    }

    impl SmbusBus for FlakyBus {
        fn functionality(&mut self) -> Result<Functionality, BusError> {
            Ok(self.funcs)
        }
        fn read_byte(&mut self) -> Result<u8, BusError> {
            self.attempt().map(|_| 0x5A)
        }
        fn write_byte(&mut self, _value: u8) -> Result<(), BusError> {
            self.attempt()
        }
        fn read_byte_data(&mut self, command: u8) -> Result<u8, BusError> {
            self.attempt().map(|_| command.wrapping_add(1))
        }
        fn write_byte_data(&mut self, _command: u8, _value: u8) -> Result<(), BusError> {
            self.attempt()
        }
        fn read_word_data(&mut self, _command: u8) -> Result<u16, BusError> {
            self.attempt().map(|_| 0xBEEF)
        }
        fn write_word_data(&mut self, _command: u8, _value: u16) -> Result<(), BusError> {
            self.attempt()
        }
        fn read_i2c_block_data(&mut self, _command: u8, buf: &mut [u8]) -> Result<usize, BusError> {
            self.attempt()?;
            buf.fill(0xAA);
            Ok(buf.len())
        }
        fn transfer(&mut self, messages: &mut [Message<'_>]) -> Result<(), BusError> {
            self.attempt()?;
            self.last_transfer.clear();
            for msg in messages.iter_mut() {
                match msg {
                    Message::Write(data) => self.last_transfer.push(data.to_vec()),
                    Message::Read(buf) => buf.fill(0x11),
                }
            }
            Ok(())
        }
        fn delay_us(&mut self, _us: u32) {}
    }

    #[test]
    fn test_retry_recovers_within_budget() {
        let mut dev = I2cDevice::new(FlakyBus::new(2), "test");
        assert_eq!(dev.read_byte_data(0x00), Ok(0x01));
        assert_eq!(dev.bus().calls, 3);
        assert_eq!(dev.consecutive_errors(), 0);
    }

    #[test]
    fn test_retry_gives_up_after_three() {
        let mut dev = I2cDevice::new(FlakyBus::new(5), "test");
        assert_eq!(dev.read_byte(), Err(BusError::Os(121)));
        assert_eq!(dev.bus().calls, 3);
        assert_eq!(dev.consecutive_errors(), 1);
    }

    #[test]
    fn test_missing_functionality_fails_fast() {
        let mut bus = FlakyBus::new(0);
        bus.funcs = Functionality::SMBUS_BYTE_DATA;
        let mut dev = I2cDevice::new(bus, "test");
        assert!(!dev.is_ok());
        assert_eq!(dev.write_byte(0x41), Err(BusError::NotOperational));
        assert_eq!(dev.read_word_data(0x24), Err(BusError::NotOperational));
        assert_eq!(dev.bus().calls, 0);
    }

    #[test]
    fn test_block_limit() {
        let mut dev = I2cDevice::new(FlakyBus::new(0), "test");
        let mut buf = [0u8; 33];
        assert_eq!(dev.read_block(0xF0, &mut buf), Err(BusError::BlockTooLong(33)));
        assert_eq!(dev.bus().calls, 0);

        let mut buf = [0u8; 32];
        assert_eq!(dev.read_block(0xF0, &mut buf), Ok(32));
        assert!(buf.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_write_raw_at_frames_command() {
        let mut dev = I2cDevice::new(FlakyBus::new(0), "test");
        dev.write_raw_at(0xFA, &[0, 0, 1, 0, 128]).unwrap();
        assert_eq!(dev.bus().last_transfer, vec![vec![0xFA, 0, 0, 1, 0, 128]]);
    }

    #[test]
    fn test_read_after_write() {
        let mut dev = I2cDevice::new(FlakyBus::new(1), "test");
        let mut rx = [0u8; 4];
        dev.read_after_write(&[0x80, 0, 0, 0, 0, 0, 4], &mut rx).unwrap();
        assert_eq!(rx, [0x11; 4]);
        assert_eq!(dev.bus().last_transfer, vec![vec![0x80, 0, 0, 0, 0, 0, 4]]);
        assert_eq!(dev.bus().calls, 2);
    }

    #[test]
    fn test_spam_guard() {
        let mut guard = SpamGuard::default();
        assert_eq!(guard.record(true), LogDecision::Full);
        assert_eq!(guard.record(true), LogDecision::Full);
        assert_eq!(guard.record(true), LogDecision::Full);
        assert_eq!(guard.record(true), LogDecision::Summary);
        assert_eq!(guard.record(true), LogDecision::Silent);
        assert_eq!(guard.record(true), LogDecision::Silent);
        assert_eq!(guard.record(false), LogDecision::Full);
        assert_eq!(guard.consecutive_errors(), 0);
        assert_eq!(guard.record(true), LogDecision::Full);
    }

    #[test]
    fn test_push_payload() {
        let mut line = String::from("dev");
        push_payload(&mut line, "TX", &[0x0a, 0xff]);
        assert_eq!(line, "dev TX (2): 0a ff");
    }
}
