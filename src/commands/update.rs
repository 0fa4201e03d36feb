//! Update command implementation

use std::path::Path;
use std::time::Duration;

use bpmcu_core::bus::Connect;
use bpmcu_core::update::update_from_file;
use bpmcu_core::{DeviceInfo, UpdateOptions, UpdateProgress, UpdateReport, UpdateState};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::connector;
use crate::cli::BusArgs;
use crate::error::CliError;

/// Progress reporter using indicatif progress bars
pub struct IndicatifProgress {
    multi: MultiProgress,
    current_bar: Option<ProgressBar>,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            current_bar: None,
        }
    }

    fn create_bar(&mut self, total: u64) {
        let pb = self.multi.add(ProgressBar::new(total));
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) Flashing",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        self.current_bar = Some(pb);
    }

    fn create_spinner(&mut self, message: String) {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(100));
        self.current_bar = Some(pb);
    }

    fn finish(&mut self, message: &str) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish_with_message(message.to_string());
        }
    }

    fn abandon(&mut self) {
        if let Some(pb) = self.current_bar.take() {
            pb.abandon();
        }
    }
}

impl UpdateProgress for IndicatifProgress {
    fn state(&mut self, state: UpdateState) {
        match state {
            UpdateState::Erasing => self.create_spinner("Erasing flash...".to_string()),
            UpdateState::Rebooting => {
                self.finish("Write complete");
                self.create_spinner("Rebooting MCU...".to_string());
            }
            UpdateState::AwaitingPing => {
                self.finish("Reboot requested");
                self.create_spinner("Waiting for MCU to come back...".to_string());
            }
            UpdateState::Reidentifying => {
                self.finish("MCU is back");
                self.create_spinner("Reading device information...".to_string());
            }
            UpdateState::Done => self.finish("Done"),
            UpdateState::Failed => self.abandon(),
            UpdateState::Idle | UpdateState::Writing => {}
        }
    }

    fn current_device(&mut self, info: &DeviceInfo) {
        println!(
            "Current firmware: {} (board {}, protocol {})",
            info.firmware_version, info.board_type, info.protocol
        );
    }

    fn writing(&mut self, total_bytes: usize) {
        self.finish("Erase complete");
        self.create_bar(total_bytes as u64);
    }

    fn write_progress(&mut self, bytes_written: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(bytes_written as u64);
        }
    }

    fn ping_failed(&mut self, attempt: u32, max_attempts: u32) {
        if let Some(pb) = &self.current_bar {
            pb.set_message(format!(
                "Waiting for MCU to come back... ({}/{})",
                attempt, max_attempts
            ));
        }
    }

    fn complete(&mut self, report: &UpdateReport) {
        self.finish("Update complete");
        println!(
            "Updated {} -> {} ({} bytes written, board {}, protocol {})",
            report.before.firmware_version,
            report.after.firmware_version,
            report.bytes_written,
            report.after.board_type,
            report.after.protocol
        );
    }
}

/// Options for a command-line update
pub fn options(erase: bool, expected_version: Option<String>) -> UpdateOptions {
    let mut options = UpdateOptions::new().erase(erase);
    if let Some(version) = expected_version {
        options = options.expected_version(version);
    }
    options
}

/// Run the update command
pub fn run_update(
    bus: &BusArgs,
    file: &Path,
    erase: bool,
    expected_version: Option<String>,
) -> Result<(), CliError> {
    let mut connector = connector(bus)?;
    log::info!("Flashing {} to {}", file.display(), connector.label());
    if erase {
        log::warn!("Erasing before write; some V0 firmware erases the whole chip");
    }

    let mut progress = IndicatifProgress::new();
    update_from_file(
        &mut connector,
        file,
        &options(erase, expected_version),
        &mut progress,
    )
    .map_err(CliError::Update)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options() {
        let opts = options(false, None);
        assert!(!opts.erase);
        assert_eq!(opts.expected_version, None);

        let opts = options(true, Some("2.1".into()));
        assert!(opts.erase);
        assert_eq!(opts.expected_version.as_deref(), Some("2.1"));
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_update_exit_codes_against_dummy() {
        use std::io::Write;

        let bus = BusArgs {
            bus: "dummy:v0".into(),
            addr: 0x2a,
            pec: false,
        };

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x5a; 256]).unwrap();
        file.flush().unwrap();
        assert!(run_update(&bus, file.path(), false, None).is_ok());

        let err = run_update(&bus, file.path(), false, Some("9.9".into())).unwrap_err();
        assert_eq!(err.exit_code(), 13);

        let mut short = tempfile::NamedTempFile::new().unwrap();
        short.write_all(&[0u8; 10]).unwrap();
        short.flush().unwrap();
        let err = run_update(&bus, short.path(), false, None).unwrap_err();
        assert_eq!(err.exit_code(), 10);
    }
}
