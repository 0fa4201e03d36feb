//! Firmware update sequencer
//!
//! One update is a linear walk through [`UpdateState`]:
//!
//! ```text
//! Idle -> [Erasing] -> Writing -> Rebooting -> AwaitingPing -> Reidentifying -> Done
//!                         |
//!                         +-- error: reboot, then Failed
//! ```
//!
//! Any failure while writing chunks reboots the MCU before the error is
//! returned, so the bootloader discards the partial image. After the final
//! reboot the device is pinged until it answers, then the driver factory is
//! run again because the new firmware may speak a different protocol.
//!
//! All waiting goes through [`McuDriver::delay_us`], which keeps simulated
//! runs instantaneous.

use std::fmt;
#[cfg(unix)]
use std::path::Path;

use crate::bus::{Connect, SmbusBus};
use crate::error::{Error, Result};
use crate::mcu::{create_driver, DeviceInfo, McuDriver, FLASH_CHUNK_MAX};
#[cfg(unix)]
use crate::image::MappedImage;

/// Smallest accepted image; anything shorter lacks a valid header
pub const IMAGE_SIZE_MIN: usize = 64;
/// Largest accepted image, the size of the update region
pub const IMAGE_SIZE_MAX: usize = 128 * 1024;
/// Default flash chunk size
pub const CHUNK_SIZE: usize = FLASH_CHUNK_MAX;
/// Default number of pings after the final reboot
pub const PING_ATTEMPTS: u32 = 20;
/// Default delay before each ping
pub const PING_INTERVAL_US: u32 = 1_000_000;
/// Default settle time after an erase
pub const ERASE_SETTLE_US: u32 = 2_000_000;

/// Check that an image length is within the accepted window
pub fn validate_image_size(len: usize) -> Result<()> {
    if (IMAGE_SIZE_MIN..=IMAGE_SIZE_MAX).contains(&len) {
        Ok(())
    } else {
        Err(Error::InvalidImageSize(len))
    }
}

/// Where an update currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Erasing,
    Writing,
    Rebooting,
    AwaitingPing,
    Reidentifying,
    Done,
    Failed,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateState::Idle => "idle",
            UpdateState::Erasing => "erasing",
            UpdateState::Writing => "writing",
            UpdateState::Rebooting => "rebooting",
            UpdateState::AwaitingPing => "waiting for device",
            UpdateState::Reidentifying => "re-identifying",
            UpdateState::Done => "done",
            UpdateState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Knobs for one update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Erase the update region before writing
    ///
    /// Off by default: some V0 firmware revisions erase the whole chip on
    /// this command, and the bootloader cleans up on reboot anyway.
    pub erase: bool,
    /// Version the device must report after the update
    pub expected_version: Option<String>,
    /// Bytes per flash chunk, a multiple of 4 up to 128
    pub chunk_size: usize,
    /// Pings after the final reboot before giving up
    pub ping_attempts: u32,
    /// Delay before each ping
    pub ping_interval_us: u32,
    /// Delay after the erase command
    pub erase_settle_us: u32,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            erase: false,
            expected_version: None,
            chunk_size: CHUNK_SIZE,
            ping_attempts: PING_ATTEMPTS,
            ping_interval_us: PING_INTERVAL_US,
            erase_settle_us: ERASE_SETTLE_US,
        }
    }
}

impl UpdateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn erase(mut self, erase: bool) -> Self {
        self.erase = erase;
        self
    }

    pub fn expected_version(mut self, version: impl Into<String>) -> Self {
        self.expected_version = Some(version.into());
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn ping_attempts(mut self, attempts: u32) -> Self {
        self.ping_attempts = attempts;
        self
    }

    pub fn ping_interval_us(mut self, us: u32) -> Self {
        self.ping_interval_us = us;
        self
    }

    fn validate(&self) -> Result<()> {
        let size = self.chunk_size;
        if size == 0 || size > FLASH_CHUNK_MAX || size % 4 != 0 {
            return Err(Error::InvalidChunk(size));
        }
        Ok(())
    }
}

/// Progress observer for [`update`]
pub trait UpdateProgress {
    /// Called on every state transition
    fn state(&mut self, state: UpdateState);

    /// Called with the identity of the device before flashing
    fn current_device(&mut self, info: &DeviceInfo);

    /// Called when the write loop starts
    fn writing(&mut self, total_bytes: usize);

    /// Called after each verified chunk
    fn write_progress(&mut self, bytes_written: usize);

    /// Called after each unanswered ping
    fn ping_failed(&mut self, attempt: u32, max_attempts: u32);

    /// Called once the update has been confirmed
    fn complete(&mut self, report: &UpdateReport);
}

/// A no-op progress reporter
pub struct NoProgress;

impl UpdateProgress for NoProgress {
    fn state(&mut self, _state: UpdateState) {}
    fn current_device(&mut self, _info: &DeviceInfo) {}
    fn writing(&mut self, _total_bytes: usize) {}
    fn write_progress(&mut self, _bytes_written: usize) {}
    fn ping_failed(&mut self, _attempt: u32, _max_attempts: u32) {}
    fn complete(&mut self, _report: &UpdateReport) {}
}

/// Outcome of a successful update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    /// Identity before flashing
    pub before: DeviceInfo,
    /// Identity after the device came back
    pub after: DeviceInfo,
    /// Image bytes written and verified
    pub bytes_written: usize,
    /// Pings needed until the device answered
    pub ping_attempts: u32,
}

/// Chunk cursor over an image; not resumable
#[derive(Debug)]
pub struct FlashSession<'a> {
    image: &'a [u8],
    offset: usize,
    chunk_size: usize,
}

impl<'a> FlashSession<'a> {
    pub fn new(image: &'a [u8], chunk_size: usize) -> Self {
        Self {
            image,
            offset: 0,
            chunk_size,
        }
    }

    /// Next chunk to write, `None` once the whole image is written
    pub fn pending(&self) -> Option<&'a [u8]> {
        if self.offset >= self.image.len() {
            return None;
        }
        let end = (self.offset + self.chunk_size).min(self.image.len());
        Some(&self.image[self.offset..end])
    }

    /// Mark the pending chunk as written
    pub fn advance(&mut self) {
        if let Some(chunk) = self.pending() {
            self.offset += chunk.len();
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn total(&self) -> usize {
        self.image.len()
    }
}

struct Flasher<'p, P: UpdateProgress> {
    label: String,
    state: UpdateState,
    progress: &'p mut P,
}

impl<P: UpdateProgress> Flasher<'_, P> {
    fn enter(&mut self, state: UpdateState) {
        log::debug!("{}: update {} -> {}", self.label, self.state, state);
        self.state = state;
        self.progress.state(state);
    }

    fn write_image<B: SmbusBus>(
        &mut self,
        driver: &mut McuDriver<B>,
        image: &[u8],
        options: &UpdateOptions,
    ) -> Result<usize> {
        if options.erase {
            self.enter(UpdateState::Erasing);
            driver.erase_flash()?;
            driver.delay_us(options.erase_settle_us);
        }

        self.enter(UpdateState::Writing);
        let mut session = FlashSession::new(image, options.chunk_size);
        self.progress.writing(session.total());

        while let Some(chunk) = session.pending() {
            if let Err(e) = driver.write_flash_chunk(chunk) {
                log::error!(
                    "{}: flashing failed at offset 0x{:05X}, rebooting MCU",
                    self.label,
                    session.offset()
                );
                if let Err(reboot_err) = driver.reboot() {
                    log::warn!("{}: recovery reboot failed: {}", self.label, reboot_err);
                }
                return Err(e);
            }
            session.advance();
            self.progress.write_progress(session.offset());
        }

        log::info!("{}: {} bytes written", self.label, session.offset());
        Ok(session.offset())
    }

    fn await_device<B: SmbusBus>(
        &mut self,
        driver: &mut McuDriver<B>,
        options: &UpdateOptions,
    ) -> Result<u32> {
        self.enter(UpdateState::AwaitingPing);
        for attempt in 1..=options.ping_attempts {
            driver.delay_us(options.ping_interval_us);
            if driver.ping() {
                log::info!("{}: device answered after {} ping(s)", self.label, attempt);
                return Ok(attempt);
            }
            self.progress.ping_failed(attempt, options.ping_attempts);
        }
        log::error!("{}: device did not come back after reboot", self.label);
        Err(Error::DeviceDidNotReturn(options.ping_attempts))
    }

    fn run<C: Connect>(
        &mut self,
        connector: &mut C,
        image: &[u8],
        options: &UpdateOptions,
    ) -> Result<UpdateReport> {
        validate_image_size(image.len())?;
        options.validate()?;

        let mut driver = create_driver(&mut *connector)?;
        let before = driver.device_info();
        log::info!(
            "{}: current firmware '{}', board '{}', protocol {}",
            self.label,
            before.firmware_version,
            before.board_type,
            before.protocol
        );
        self.progress.current_device(&before);

        let bytes_written = self.write_image(&mut driver, image, options)?;

        self.enter(UpdateState::Rebooting);
        driver.reboot()?;

        let ping_attempts = self.await_device(&mut driver, options)?;
        drop(driver);

        self.enter(UpdateState::Reidentifying);
        let mut driver = create_driver(&mut *connector)?;
        let after = driver.device_info();
        if !after.is_complete() {
            log::error!("{}: can not read device information", self.label);
            return Err(Error::DeviceInfoUnavailable);
        }

        if let Some(expected) = &options.expected_version {
            if *expected != after.firmware_version {
                return Err(Error::VersionMismatch {
                    expected: expected.clone(),
                    actual: after.firmware_version,
                });
            }
        }

        log::info!(
            "{}: now running firmware '{}', board '{}', protocol {}",
            self.label,
            after.firmware_version,
            after.board_type,
            after.protocol
        );

        Ok(UpdateReport {
            before,
            after,
            bytes_written,
            ping_attempts,
        })
    }
}

/// Flash `image` to the MCU behind `connector`
///
/// The connector is used twice: once to open the device for flashing and
/// once to identify it again after it came back from the reboot.
pub fn update<C: Connect, P: UpdateProgress>(
    connector: &mut C,
    image: &[u8],
    options: &UpdateOptions,
    progress: &mut P,
) -> Result<UpdateReport> {
    let mut flasher = Flasher {
        label: connector.label(),
        state: UpdateState::Idle,
        progress,
    };

    match flasher.run(connector, image, options) {
        Ok(report) => {
            flasher.enter(UpdateState::Done);
            flasher.progress.complete(&report);
            Ok(report)
        }
        Err(e) => {
            flasher.enter(UpdateState::Failed);
            Err(e)
        }
    }
}

/// Map the image at `path` and flash it
///
/// The mapping is released when this returns, whatever the outcome.
#[cfg(unix)]
pub fn update_from_file<C: Connect, P: UpdateProgress>(
    connector: &mut C,
    path: impl AsRef<Path>,
    options: &UpdateOptions,
    progress: &mut P,
) -> Result<UpdateReport> {
    let image = MappedImage::open_read_only(path.as_ref())?;
    log::debug!(
        "mapped {} ({} bytes)",
        path.as_ref().display(),
        image.len()
    );
    update(connector, image.as_slice(), options, progress)
}
