//! Per-channel state aggregation and change polling

use crate::bus::SmbusBus;
use crate::error::{Error, Result};
use crate::mcu::{DriveType, McuDriver, MAX_CHANNELS};

/// Last presence/failure fingerprint seen by a poller
///
/// Starts out empty so the first comparison always reports a change.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChangeCache(Option<u32>);

impl ChangeCache {
    /// A cache that has not seen any state yet
    pub const fn new() -> Self {
        Self(None)
    }

    /// Store `fingerprint`, returning true if it differs from the last one
    pub fn update(&mut self, fingerprint: u32) -> bool {
        let changed = self.0 != Some(fingerprint);
        self.0 = Some(fingerprint);
        changed
    }

    /// The last stored fingerprint
    pub fn get(&self) -> Option<u32> {
        self.0
    }
}

/// Aggregated view of one drive bay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveChannelState {
    /// Channel index, 0-based
    pub index: usize,
    /// A drive is seated
    pub present: bool,
    /// The drive reports a failure
    pub failed: bool,
    /// Type of the seated drive
    pub drive_type: DriveType,
    /// Locate LED state, `None` if the protocol cannot read it back
    pub locate: Option<bool>,
}

impl<B: SmbusBus> McuDriver<B> {
    /// Collect the state of one channel
    ///
    /// Presence and type are cross-checked: a present drive typed as
    /// [`DriveType::NoDisk`] is reported as [`DriveType::Unknown`], and a
    /// typed drive that is not present is reported as empty.
    pub fn channel_state(&mut self, index: usize) -> Result<DriveChannelState> {
        let locate = match self.channel_locate_led(index) {
            Ok(on) => Some(on),
            Err(Error::Unsupported { .. }) => None,
            Err(e) => return Err(e),
        };
        self.build_state(index, locate)
    }

    fn build_state(&mut self, index: usize, locate: Option<bool>) -> Result<DriveChannelState> {
        let present = self.channel_present(index)?;
        let failed = self.channel_failed(index)?;
        let reported = self.channel_drive_type(index)?;

        let drive_type = match (present, reported) {
            (true, DriveType::NoDisk) => {
                log::warn!(
                    "{}: MCU data inconsistency on channel {}: drive present but no type",
                    self.label(),
                    index
                );
                DriveType::Unknown
            }
            (false, DriveType::NoDisk) => DriveType::NoDisk,
            (false, other) => {
                log::warn!(
                    "{}: MCU data inconsistency on channel {}: type {} but no drive present",
                    self.label(),
                    index,
                    other
                );
                DriveType::NoDisk
            }
            (true, other) => other,
        };

        Ok(DriveChannelState {
            index,
            present,
            failed,
            drive_type,
            locate,
        })
    }

    /// Collect the state of every channel in one poll cycle
    pub fn channel_states(&mut self) -> Result<Vec<DriveChannelState>> {
        self.refresh();
        self.collect_states()
    }

    fn collect_states(&mut self) -> Result<Vec<DriveChannelState>> {
        let mask = match self.locate_mask() {
            Ok(mask) => Some(mask),
            Err(Error::Unsupported { .. }) => None,
            Err(e) => return Err(e),
        };
        (0..MAX_CHANNELS)
            .map(|i| {
                let locate = mask.map(|m| m & (1 << i) != 0);
                self.build_state(i, locate)
            })
            .collect()
    }

    /// Check for changes and return the full state when there are any
    ///
    /// With `force` set the state is returned even if nothing changed.
    pub fn poll(
        &mut self,
        cache: &mut ChangeCache,
        force: bool,
    ) -> Result<Option<Vec<DriveChannelState>>> {
        let changed = self.has_state_changed(cache)?;
        if !changed && !force {
            return Ok(None);
        }
        if changed {
            log::info!("{}: drive state changed", self.label());
        }
        // has_state_changed() already fetched fresh bitmasks
        self.collect_states().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_cache_first_update_reports_change() {
        let mut cache = ChangeCache::new();
        assert_eq!(cache.get(), None);
        assert!(cache.update(0));
        assert!(!cache.update(0));
        assert!(cache.update(0x0101));
        assert_eq!(cache.get(), Some(0x0101));
    }
}
