//! Register-level model of a backplane MCU

use bpmcu_core::bus::Message;
use bpmcu_core::mcu::{v0, v1, IDENT_REGISTER, MAX_CHANNELS};
use bpmcu_core::update::IMAGE_SIZE_MAX;
use bpmcu_core::{BusError, ProtocolVersion};

/// What a NAKed transaction reports (`ENXIO`)
pub const NAK: BusError = BusError::Os(6);

/// Initial state of the simulated MCU
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Protocol the firmware speaks
    pub protocol: ProtocolVersion,
    /// Firmware version string
    pub firmware_version: String,
    /// Board type string
    pub board_type: String,
    /// Presence bitmask
    pub presence: u8,
    /// Failure bitmask
    pub failures: u8,
    /// Raw drive type value per channel
    pub drive_types: [u8; MAX_CHANNELS],
    /// Locate LED bitmask
    pub locate: u8,
}

impl DummyConfig {
    /// An empty backplane speaking `protocol`
    pub fn new(protocol: ProtocolVersion) -> Self {
        Self {
            protocol,
            firmware_version: "1.0.0".to_string(),
            board_type: match protocol {
                ProtocolVersion::V0 => "BP-8SFF".to_string(),
                ProtocolVersion::V1 => "BP-8NVME".to_string(),
            },
            presence: 0,
            failures: 0,
            drive_types: [0; MAX_CHANNELS],
            locate: 0,
        }
    }

    /// Seat a drive with the raw type `value` in `channel`
    pub fn with_drive(mut self, channel: usize, value: u8) -> Self {
        self.presence |= 1 << channel;
        self.drive_types[channel] = value;
        self
    }

    pub fn with_failure(mut self, channel: usize) -> Self {
        self.failures |= 1 << channel;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.firmware_version = version.into();
        self
    }
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self::new(ProtocolVersion::V1)
    }
}

/// Misbehaviour to inject
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// NAK this many identification reads
    pub nak_ident: u32,
    /// Return a glitched presence mask for this many presence reads
    pub glitch_presence: u32,
    /// NAK every attempt to write this chunk (0-based)
    pub fail_chunk: Option<usize>,
    /// Flip a bit in the readback of this chunk (0-based)
    pub corrupt_chunk: Option<usize>,
    /// The board type opcode is not implemented
    pub no_board_type: bool,
    /// The adapter lacks the required functionality
    pub missing_functionality: bool,
    /// Opening the bus fails
    pub connect_fails: bool,
    /// Stay silent forever after a reboot
    pub never_return: bool,
    /// Time the MCU needs to boot, measured in requested delays
    pub boot_time_us: u64,
    /// Firmware version reported after the next reboot
    pub version_after_reboot: Option<String>,
    /// Protocol spoken after the next reboot
    pub protocol_after_reboot: Option<ProtocolVersion>,
}

/// Transaction counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    /// Bus handles opened
    pub connects: usize,
    /// Transaction attempts of any kind, including NAKed ones
    pub transactions: usize,
    /// Attempts that carried data to the MCU
    pub bus_writes: usize,
    /// Identification register reads
    pub ident_reads: usize,
    /// Flash chunks accepted
    pub flash_chunks: usize,
    /// Erase commands accepted
    pub erases: usize,
    /// Reboot commands accepted
    pub reboots: usize,
    /// Sum of all requested delays
    pub delay_us: u64,
}

/// The simulated MCU
#[derive(Debug)]
pub struct McuSim {
    config: DummyConfig,
    faults: Faults,
    counters: Counters,
    flash: Vec<u8>,
    host_power: Option<bool>,
    presence_latch: u8,
    disc_channel: u8,
    flash_address: Option<(u32, usize)>,
    /// `Some(elapsed)` while rebooting
    booting: Option<u64>,
}

impl McuSim {
    pub fn new(config: DummyConfig) -> Self {
        Self::with_faults(config, Faults::default())
    }

    pub fn with_faults(config: DummyConfig, faults: Faults) -> Self {
        Self {
            config,
            faults,
            counters: Counters::default(),
            flash: vec![0xFF; IMAGE_SIZE_MAX],
            host_power: None,
            presence_latch: 0,
            disc_channel: 0,
            flash_address: None,
            booting: None,
        }
    }

    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut DummyConfig {
        &mut self.config
    }

    pub fn faults_mut(&mut self) -> &mut Faults {
        &mut self.faults
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Flash contents of the update region
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// Last host power state written
    pub fn host_power(&self) -> Option<bool> {
        self.host_power
    }

    /// True while the MCU is rebooting and ignores the bus
    pub fn is_booting(&self) -> bool {
        self.booting.is_some()
    }

    /// Change drive presence as a hot-plug would, setting the change latch
    pub fn hot_plug(&mut self, channel: usize, value: Option<u8>) {
        let bit = 1u8 << channel;
        match value {
            Some(v) => {
                self.config.presence |= bit;
                self.config.drive_types[channel] = v;
            }
            None => {
                self.config.presence &= !bit;
                self.config.drive_types[channel] = 0;
            }
        }
        self.presence_latch |= bit;
    }

    pub(crate) fn functionality_ok(&self) -> bool {
        !self.faults.missing_functionality
    }

    pub(crate) fn connect(&mut self) -> Result<(), BusError> {
        if self.faults.connect_fails {
            return Err(BusError::Os(2));
        }
        self.counters.connects += 1;
        Ok(())
    }

    pub(crate) fn delay(&mut self, us: u32) {
        self.counters.delay_us += u64::from(us);
        if let Some(elapsed) = self.booting.as_mut() {
            *elapsed += u64::from(us);
            if *elapsed >= self.faults.boot_time_us && !self.faults.never_return {
                self.finish_boot();
            }
        }
    }

    fn finish_boot(&mut self) {
        self.booting = None;
        if let Some(version) = self.faults.version_after_reboot.take() {
            self.config.firmware_version = version;
        }
        if let Some(protocol) = self.faults.protocol_after_reboot.take() {
            self.config.protocol = protocol;
        }
        log::debug!(
            "dummy: MCU back up, protocol {}, firmware '{}'",
            self.config.protocol,
            self.config.firmware_version
        );
    }

    fn reboot(&mut self) {
        self.counters.reboots += 1;
        self.flash_address = None;
        self.booting = Some(0);
        if self.faults.boot_time_us == 0 && !self.faults.never_return {
            self.finish_boot();
        }
    }

    fn erase(&mut self) {
        self.counters.erases += 1;
        self.flash.fill(0xFF);
    }

    /// Start one transaction attempt
    fn begin(&mut self, writes: bool) -> Result<(), BusError> {
        self.counters.transactions += 1;
        if writes {
            self.counters.bus_writes += 1;
        }
        if self.booting.is_some() {
            Err(NAK)
        } else {
            Ok(())
        }
    }

    fn flash_region(&self, offset: u32, len: usize) -> Result<std::ops::Range<usize>, BusError> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(NAK)?;
        if end > self.flash.len() {
            return Err(NAK);
        }
        Ok(start..end)
    }

    fn store_chunk(&mut self, offset: u32, data: &[u8]) -> Result<(), BusError> {
        if self.faults.fail_chunk == Some(self.counters.flash_chunks) {
            return Err(NAK);
        }
        let range = self.flash_region(offset, data.len())?;
        self.flash[range].copy_from_slice(data);
        self.counters.flash_chunks += 1;
        Ok(())
    }

    fn load_chunk(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), BusError> {
        let range = self.flash_region(offset, buf.len())?;
        buf.copy_from_slice(&self.flash[range]);
        // The chunk just stored is counted already
        let chunk = self.counters.flash_chunks.checked_sub(1);
        if chunk.is_some() && chunk == self.faults.corrupt_chunk {
            if let Some(first) = buf.first_mut() {
                *first ^= 0x01;
            }
        }
        Ok(())
    }

    fn read_string(field: &str, buf: &mut [u8]) -> usize {
        buf.fill(0);
        let bytes = field.as_bytes();
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        buf.len()
    }

    fn ident(&self) -> u8 {
        self.config.protocol.ident()
    }

    pub(crate) fn read_byte(&mut self) -> Result<u8, BusError> {
        self.begin(false)?;
        match self.config.protocol {
            ProtocolVersion::V0 => Ok(self.config.drive_types[usize::from(self.disc_channel)]),
            ProtocolVersion::V1 => Err(NAK),
        }
    }

    pub(crate) fn write_byte(&mut self, value: u8) -> Result<(), BusError> {
        self.begin(true)?;
        match (self.config.protocol, value) {
            (ProtocolVersion::V0, v0::OPC_REBOOT) | (ProtocolVersion::V1, v1::OPC_REBOOT) => {
                self.reboot();
                Ok(())
            }
            (ProtocolVersion::V0, v0::OPC_FLASH_ERASE)
            | (ProtocolVersion::V1, v1::OPC_FLASH_ERASE) => {
                self.erase();
                Ok(())
            }
            (ProtocolVersion::V0, v0::OPC_HOST_POWER_ON) => {
                self.host_power = Some(true);
                Ok(())
            }
            (ProtocolVersion::V0, v0::OPC_HOST_POWER_OFF) => {
                self.host_power = Some(false);
                Ok(())
            }
            _ => Err(NAK),
        }
    }

    pub(crate) fn read_byte_data(&mut self, command: u8) -> Result<u8, BusError> {
        if command == IDENT_REGISTER {
            self.counters.ident_reads += 1;
            self.begin(false)?;
            if self.faults.nak_ident > 0 {
                self.faults.nak_ident -= 1;
                return Err(NAK);
            }
            return Ok(self.ident());
        }

        self.begin(false)?;
        match (self.config.protocol, command) {
            (ProtocolVersion::V0, v0::OPC_PRESENCE) | (ProtocolVersion::V1, v1::OPC_PRESENCE) => {
                if self.faults.glitch_presence > 0 {
                    self.faults.glitch_presence -= 1;
                    return Ok(!self.config.presence);
                }
                Ok(self.config.presence)
            }
            (ProtocolVersion::V0, v0::OPC_FAILURES) | (ProtocolVersion::V1, v1::OPC_FAILURES) => {
                Ok(self.config.failures)
            }
            (ProtocolVersion::V1, v1::OPC_LOCATE) => Ok(self.config.locate),
            (ProtocolVersion::V1, v1::OPC_PRESENCE_CHANGED) => {
                Ok(std::mem::take(&mut self.presence_latch))
            }
            _ => Err(NAK),
        }
    }

    pub(crate) fn write_byte_data(&mut self, command: u8, value: u8) -> Result<(), BusError> {
        self.begin(true)?;
        let channel_bit = 1u8.checked_shl(u32::from(value)).unwrap_or(0);
        match (self.config.protocol, command) {
            (ProtocolVersion::V0, v0::OPC_LOCATE_START) => {
                self.config.locate |= channel_bit;
                Ok(())
            }
            (ProtocolVersion::V0, v0::OPC_LOCATE_STOP) => {
                self.config.locate &= !channel_bit;
                Ok(())
            }
            (ProtocolVersion::V0, v0::OPC_DISC_TYPE) if usize::from(value) < MAX_CHANNELS => {
                self.disc_channel = value;
                Ok(())
            }
            (ProtocolVersion::V1, v1::OPC_LOCATE) => {
                self.config.locate = value;
                Ok(())
            }
            (ProtocolVersion::V1, v1::OPC_HOST_POWER) => {
                self.host_power = Some(value != 0);
                Ok(())
            }
            _ => Err(NAK),
        }
    }

    pub(crate) fn read_word_data(&mut self, command: u8) -> Result<u16, BusError> {
        self.begin(false)?;
        match (self.config.protocol, command) {
            (ProtocolVersion::V1, v1::OPC_DISC_TYPE) => Ok(self
                .config
                .drive_types
                .iter()
                .enumerate()
                .fold(0u16, |word, (ch, &t)| word | (u16::from(t & 0x3) << (ch * 2)))),
            _ => Err(NAK),
        }
    }

    pub(crate) fn write_word_data(&mut self, _command: u8, _value: u16) -> Result<(), BusError> {
        self.begin(true)?;
        Err(NAK)
    }

    pub(crate) fn read_block(&mut self, command: u8, buf: &mut [u8]) -> Result<usize, BusError> {
        self.begin(false)?;
        match (self.config.protocol, command) {
            (ProtocolVersion::V0, v0::OPC_BOARD_TYPE) if !self.faults.no_board_type => {
                Ok(Self::read_string(&self.config.board_type, buf))
            }
            (ProtocolVersion::V1, v1::OPC_BOARD_TYPE) => {
                Ok(Self::read_string(&self.config.board_type, buf))
            }
            (ProtocolVersion::V1, v1::OPC_FW_VERSION) => {
                Ok(Self::read_string(&self.config.firmware_version, buf))
            }
            _ => Err(NAK),
        }
    }

    pub(crate) fn transfer(&mut self, messages: &mut [Message<'_>]) -> Result<(), BusError> {
        let writes = messages.iter().any(|m| matches!(m, Message::Write(_)));
        self.begin(writes)?;
        match self.config.protocol {
            ProtocolVersion::V0 => self.transfer_v0(messages),
            ProtocolVersion::V1 => self.transfer_v1(messages),
        }
    }

    fn parse_v0_header(header: &[u8]) -> Option<(u8, u32, usize)> {
        if header.len() < v0::FLASH_HEADER_LEN {
            return None;
        }
        let offset = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
        let len = u16::from_be_bytes([header[5], header[6]]);
        Some((header[0], offset, usize::from(len)))
    }

    fn transfer_v0(&mut self, messages: &mut [Message<'_>]) -> Result<(), BusError> {
        match messages {
            [Message::Write(&[v0::OPC_GET_VERSION]), Message::Read(buf)] => {
                Self::read_string(&self.config.firmware_version, buf);
                Ok(())
            }
            [Message::Write(frame)] => match Self::parse_v0_header(frame) {
                Some((v0::OPC_FLASH_WRITE, offset, len))
                    if frame.len() == v0::FLASH_HEADER_LEN + len =>
                {
                    let data = &frame[v0::FLASH_HEADER_LEN..];
                    self.store_chunk(offset, data)
                }
                _ => Err(NAK),
            },
            [Message::Write(header), Message::Read(buf)] => match Self::parse_v0_header(header) {
                Some((v0::OPC_FLASH_READ, offset, len)) if len == buf.len() => {
                    self.load_chunk(offset, buf)
                }
                _ => Err(NAK),
            },
            _ => Err(NAK),
        }
    }

    fn transfer_v1(&mut self, messages: &mut [Message<'_>]) -> Result<(), BusError> {
        match messages {
            [Message::Write(frame)] => match frame.split_first() {
                Some((&v1::OPC_FLASH_ADDRESS, location))
                    if location.len() == v1::FLASH_LOCATION_LEN =>
                {
                    let offset =
                        u32::from_be_bytes([location[0], location[1], location[2], location[3]]);
                    self.flash_address = Some((offset, usize::from(location[4])));
                    Ok(())
                }
                Some((&v1::OPC_FLASH_DATA, data)) => match self.flash_address {
                    Some((offset, len)) if len == data.len() => self.store_chunk(offset, data),
                    _ => Err(NAK),
                },
                _ => Err(NAK),
            },
            [Message::Write(&[v1::OPC_FLASH_DATA]), Message::Read(buf)] => {
                match self.flash_address {
                    Some((offset, len)) if len == buf.len() => self.load_chunk(offset, buf),
                    _ => Err(NAK),
                }
            }
            _ => Err(NAK),
        }
    }
}
