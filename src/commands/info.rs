//! Info command implementation

use bpmcu_core::DeviceInfo;

use super::open_driver;
use crate::cli::BusArgs;
use crate::error::CliError;

fn or_unavailable(value: &str) -> &str {
    if value.is_empty() {
        "(unavailable)"
    } else {
        value
    }
}

/// Render the identity block printed by `bpmcu info`
pub fn format_info(label: &str, info: &DeviceInfo) -> String {
    format!(
        "Device:           {}\n\
         Protocol:         {}\n\
         Firmware version: {}\n\
         Board type:       {}\n",
        label,
        info.protocol,
        or_unavailable(&info.firmware_version),
        or_unavailable(&info.board_type),
    )
}

/// Run the info command
pub fn run_info(bus: &BusArgs) -> Result<(), CliError> {
    let mut driver = open_driver(bus)?;
    let info = driver.device_info();
    if !info.is_complete() {
        log::warn!("{}: device information incomplete", driver.label());
    }

    println!("Backplane MCU Information");
    println!("=========================");
    println!();
    print!("{}", format_info(driver.label(), &info));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpmcu_core::ProtocolVersion;

    #[test]
    fn test_format_info() {
        let info = DeviceInfo {
            protocol: ProtocolVersion::V0,
            firmware_version: "1.4.2".into(),
            board_type: String::new(),
        };
        let text = format_info("/dev/i2c-3, 0x2a", &info);
        assert!(text.contains("Device:           /dev/i2c-3, 0x2a\n"));
        assert!(text.contains("Protocol:         v0\n"));
        assert!(text.contains("Firmware version: 1.4.2\n"));
        assert!(text.contains("Board type:       (unavailable)\n"));
    }
}
