//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a 7-bit I2C address as hex (0x..) or decimal
fn parse_address(s: &str) -> Result<u8, String> {
    let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))?
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))?
    };
    match u8::try_from(value) {
        Ok(addr) if (0x01..=0x7f).contains(&addr) => Ok(addr),
        _ => Err(format!("Address {} out of range (0x01-0x7f)", s)),
    }
}

/// Parse a drive channel index
fn parse_channel(s: &str) -> Result<usize, String> {
    let channel: usize = s.parse().map_err(|e| format!("Invalid channel: {}", e))?;
    if channel < 8 {
        Ok(channel)
    } else {
        Err(format!("Channel {} out of range (0-7)", channel))
    }
}

#[derive(Parser)]
#[command(name = "bpmcu")]
#[command(author, version, about = "Backplane MCU management and firmware update tool", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Bus selection shared across commands
#[derive(clap::Args, Debug, Clone)]
pub struct BusArgs {
    /// I2C bus: number, /dev/i2c-N, or dummy:v0 / dummy:v1
    #[arg(short, long)]
    pub bus: String,

    /// MCU address (hex or decimal)
    #[arg(short, long, value_parser = parse_address, default_value = "0x2a")]
    pub addr: u8,

    /// Enable SMBus packet error checking
    #[arg(short, long)]
    pub pec: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show protocol, firmware version and board type
    Info {
        #[command(flatten)]
        bus: BusArgs,
    },

    /// Show per-channel drive state
    Status {
        #[command(flatten)]
        bus: BusArgs,

        /// Keep polling and print the table whenever it changes
        #[arg(short, long)]
        watch: bool,

        /// Poll interval in milliseconds for --watch
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },

    /// Control drive locate LEDs
    Locate {
        #[command(flatten)]
        bus: BusArgs,

        #[command(subcommand)]
        action: LocateCommands,
    },

    /// Signal host power state to the MCU
    Power {
        #[command(flatten)]
        bus: BusArgs,

        /// New host power state
        #[arg(value_enum)]
        state: PowerState,
    },

    /// Flash new MCU firmware
    Update {
        #[command(flatten)]
        bus: BusArgs,

        /// Firmware image
        #[arg(short, long)]
        file: PathBuf,

        /// Erase the update area first (may brick old V0 firmware)
        #[arg(short = 'E', long)]
        erase: bool,

        /// Version the MCU must report after the update
        #[arg(short = 'V', long)]
        expected_version: Option<String>,
    },

    /// Update every MCU listed in a configuration file
    Scan {
        /// Scan configuration (TOML format)
        #[arg(short, long)]
        config: PathBuf,

        /// Only report what would be flashed
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
pub enum LocateCommands {
    /// Turn a locate LED on or off
    Set {
        /// Drive channel (0-7)
        #[arg(value_parser = parse_channel)]
        channel: usize,

        /// New LED state
        #[arg(value_enum)]
        state: LedState,
    },

    /// Read a locate LED
    Get {
        /// Drive channel (0-7)
        #[arg(value_parser = parse_channel)]
        channel: usize,
    },

    /// Turn all locate LEDs off
    Reset,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedState {
    On,
    Off,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x2a"), Ok(0x2a));
        assert_eq!(parse_address("43"), Ok(43));
        assert!(parse_address("0").is_err());
        assert!(parse_address("0x80").is_err());
    }

    #[test]
    fn test_update_args() {
        let cli = Cli::try_parse_from([
            "bpmcu", "update", "-b", "3", "-a", "0x2b", "-f", "fw.bin", "-E", "-V", "1.2",
        ])
        .unwrap();
        match cli.command {
            Commands::Update {
                bus,
                file,
                erase,
                expected_version,
            } => {
                assert_eq!(bus.bus, "3");
                assert_eq!(bus.addr, 0x2b);
                assert!(!bus.pec);
                assert_eq!(file, PathBuf::from("fw.bin"));
                assert!(erase);
                assert_eq!(expected_version.as_deref(), Some("1.2"));
            }
            _ => panic!("expected update command"),
        }
    }

    #[test]
    fn test_pec_is_opt_in() {
        let cli = Cli::try_parse_from(["bpmcu", "info", "-b", "3"]).unwrap();
        let Commands::Info { bus } = cli.command else {
            panic!("expected info command");
        };
        assert!(!bus.pec);

        let cli = Cli::try_parse_from(["bpmcu", "info", "-b", "3", "--pec"]).unwrap();
        let Commands::Info { bus } = cli.command else {
            panic!("expected info command");
        };
        assert!(bus.pec);
    }

    #[test]
    fn test_locate_args() {
        let cli =
            Cli::try_parse_from(["bpmcu", "locate", "-b", "dummy:v1", "set", "3", "on"]).unwrap();
        match cli.command {
            Commands::Locate {
                bus,
                action: LocateCommands::Set { channel, state },
            } => {
                assert_eq!(bus.addr, 0x2a);
                assert_eq!(channel, 3);
                assert_eq!(state, LedState::On);
            }
            _ => panic!("expected locate set"),
        }
        assert!(Cli::try_parse_from(["bpmcu", "locate", "-b", "1", "get", "8"]).is_err());
    }
}
