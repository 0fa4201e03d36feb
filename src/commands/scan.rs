//! Bulk update over a configured set of buses
//!
//! The scan configuration is a TOML file:
//!
//! ```toml
//! [[target]]
//! name = "front"
//! bus = 3
//! addresses = [0x2a]
//! firmware = "bp.bin"
//! version = "1.2.3"
//! ```
//!
//! Targets without `addresses` are probed at the default MCU addresses and
//! absent devices there are skipped quietly. Explicitly listed addresses are
//! expected to answer.

use std::fs;
use std::path::{Path, PathBuf};

use bpmcu_core::bus::Connect;
use bpmcu_core::update::update_from_file;
use bpmcu_core::{create_driver, UpdateOptions};

use super::update::IndicatifProgress;
use crate::backends::open_connector;
use crate::error::CliError;

/// Addresses probed when a target lists none
pub const DEFAULT_ADDRESSES: [u8; 3] = [0x2a, 0x2b, 0x2c];

/// Scan configuration file structure
#[derive(Debug, serde::Deserialize)]
struct ScanFile {
    #[serde(default)]
    target: Vec<TomlTarget>,
}

/// Target definition in TOML
#[derive(Debug, serde::Deserialize)]
struct TomlTarget {
    name: Option<String>,
    #[serde(deserialize_with = "deserialize_bus")]
    bus: String,
    #[serde(default, deserialize_with = "deserialize_addresses")]
    addresses: Option<Vec<u8>>,
    firmware: Option<PathBuf>,
    version: Option<String>,
}

/// One bus to scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    /// Free-form label
    pub name: String,
    /// Bus argument, as accepted by `--bus`
    pub bus: String,
    /// Configured addresses, `None` for the unforced defaults
    pub addresses: Option<Vec<u8>>,
    /// Image to flash, resolved against the config file directory
    pub firmware: Option<PathBuf>,
    /// Version the image carries
    pub version: Option<String>,
}

impl ScanTarget {
    /// Addresses to visit, each with whether it was explicitly configured
    pub fn probe_list(&self) -> Vec<(u8, bool)> {
        match &self.addresses {
            Some(addrs) => addrs.iter().map(|&a| (a, true)).collect(),
            None => DEFAULT_ADDRESSES.iter().map(|&a| (a, false)).collect(),
        }
    }
}

/// Parsed scan configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    pub targets: Vec<ScanTarget>,
}

impl ScanConfig {
    /// Parse a configuration; relative firmware paths are joined to `base`
    pub fn from_toml_str(content: &str, base: &Path) -> Result<Self, toml::de::Error> {
        let file: ScanFile = toml::from_str(content)?;
        let targets = file
            .target
            .into_iter()
            .enumerate()
            .map(|(i, t)| ScanTarget {
                name: t.name.unwrap_or_else(|| format!("target{}", i)),
                bus: t.bus,
                addresses: t.addresses,
                firmware: t.firmware.map(|p| base.join(p)),
                version: t.version,
            })
            .collect();
        Ok(Self { targets })
    }

    /// Load a configuration file
    pub fn from_file(path: &Path) -> Result<Self, CliError> {
        let content = fs::read_to_string(path).map_err(|source| CliError::Config {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&content, base).map_err(|source| CliError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Deserialize a bus given as a number (`3`) or a string (`"/dev/i2c-3"`)
fn deserialize_bus<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrPath {
        Num(u32),
        Path(String),
    }

    match NumOrPath::deserialize(deserializer)? {
        NumOrPath::Num(n) => Ok(n.to_string()),
        NumOrPath::Path(s) => Ok(s),
    }
}

/// Deserialize a list of 7-bit addresses that can be hex strings or integers
fn deserialize_addresses<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Int(u32),
        Str(String),
    }

    let raw = Vec::<HexOrInt>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|value| {
            let n = match value {
                HexOrInt::Int(n) => n,
                HexOrInt::Str(s) => parse_number(&s).map_err(serde::de::Error::custom)?,
            };
            match u8::try_from(n) {
                Ok(addr) if (0x01..=0x7f).contains(&addr) => Ok(addr),
                _ => Err(serde::de::Error::custom(format!(
                    "address 0x{:x} out of range (0x01-0x7f)",
                    n
                ))),
            }
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// Parse a number that can be hex (0x...) or decimal
fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

/// What happened at one address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Nothing answered at an unforced address
    Skipped,
    /// Device found, nothing to flash
    Found,
    /// Device already runs the configured version
    UpToDate,
    /// Device was flashed
    Updated,
    /// Device missing or the update failed
    Failed,
}

fn scan_address(target: &ScanTarget, addr: u8, forced: bool, dry_run: bool) -> ScanOutcome {
    let mut connector = match open_connector(&target.bus, addr, false) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{}: {}", target.name, e);
            return ScanOutcome::Failed;
        }
    };
    let label = connector.label();

    let info = match create_driver(&mut connector) {
        Ok(mut driver) => driver.device_info(),
        Err(e) if e.is_device_absent() && !forced => {
            log::debug!("{}: nothing at {}", target.name, label);
            return ScanOutcome::Skipped;
        }
        Err(e) => {
            log::error!("{}: {}", target.name, e);
            return ScanOutcome::Failed;
        }
    };
    println!(
        "{} [{}]: firmware {}, board {}, protocol {}",
        target.name, label, info.firmware_version, info.board_type, info.protocol
    );

    let Some(firmware) = &target.firmware else {
        return ScanOutcome::Found;
    };
    if let Some(version) = &target.version {
        if *version == info.firmware_version {
            println!("{} [{}]: already running {}", target.name, label, version);
            return ScanOutcome::UpToDate;
        }
    }
    if dry_run {
        println!(
            "{} [{}]: would flash {}",
            target.name,
            label,
            firmware.display()
        );
        return ScanOutcome::Found;
    }

    let mut options = UpdateOptions::new();
    if let Some(version) = &target.version {
        options = options.expected_version(version.clone());
    }
    let mut progress = IndicatifProgress::new();
    match update_from_file(&mut connector, firmware, &options, &mut progress) {
        Ok(_) => ScanOutcome::Updated,
        Err(e) => {
            log::error!("{} [{}]: firmware update failed: {}", target.name, label, e);
            ScanOutcome::Failed
        }
    }
}

/// Visit every configured address and collect the outcomes
pub fn scan(config: &ScanConfig, dry_run: bool) -> Vec<ScanOutcome> {
    let mut outcomes = Vec::new();
    for target in &config.targets {
        for (addr, forced) in target.probe_list() {
            outcomes.push(scan_address(target, addr, forced, dry_run));
        }
    }
    outcomes
}

/// Run the scan command
pub fn run_scan(path: &Path, dry_run: bool) -> Result<(), CliError> {
    let config = ScanConfig::from_file(path)?;
    log::info!(
        "Loaded {} scan target(s) from {}",
        config.targets.len(),
        path.display()
    );

    let outcomes = scan(&config, dry_run);
    let count = |o: ScanOutcome| outcomes.iter().filter(|&&x| x == o).count();
    let failed = count(ScanOutcome::Failed);
    let total = outcomes.len() - count(ScanOutcome::Skipped);

    println!(
        "Scan complete: {} device(s), {} updated, {} up to date, {} failed",
        total,
        count(ScanOutcome::Updated),
        count(ScanOutcome::UpToDate),
        failed
    );

    if failed > 0 {
        return Err(CliError::ScanFailed { failed, total });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
            [[target]]
            name = "front"
            bus = 3
            addresses = [0x2a, "0x2b", 44]
            firmware = "bp.bin"
            version = "1.2.3"

            [[target]]
            bus = "/dev/i2c-7"
        "#;
        let config = ScanConfig::from_toml_str(toml, Path::new("/etc/bpmcu")).unwrap();
        assert_eq!(config.targets.len(), 2);

        let front = &config.targets[0];
        assert_eq!(front.name, "front");
        assert_eq!(front.bus, "3");
        assert_eq!(front.addresses, Some(vec![0x2a, 0x2b, 0x2c]));
        assert_eq!(front.firmware, Some(PathBuf::from("/etc/bpmcu/bp.bin")));
        assert_eq!(front.version.as_deref(), Some("1.2.3"));
        assert_eq!(
            front.probe_list(),
            vec![(0x2a, true), (0x2b, true), (0x2c, true)]
        );

        let rear = &config.targets[1];
        assert_eq!(rear.name, "target1");
        assert_eq!(rear.bus, "/dev/i2c-7");
        assert_eq!(rear.firmware, None);
        assert_eq!(
            rear.probe_list(),
            vec![(0x2a, false), (0x2b, false), (0x2c, false)]
        );
    }

    #[test]
    fn test_parse_config_rejects_bad_address() {
        let toml = r#"
            [[target]]
            bus = 1
            addresses = [0x80]
        "#;
        assert!(ScanConfig::from_toml_str(toml, Path::new(".")).is_err());
    }

    #[test]
    fn test_parse_config_requires_bus() {
        let toml = r#"
            [[target]]
            name = "nobus"
        "#;
        assert!(ScanConfig::from_toml_str(toml, Path::new(".")).is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_scan(&dir.path().join("scan.toml"), false).unwrap_err();
        assert!(matches!(err, CliError::Config { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_scan_dummy_targets() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bp.bin"), [0xa5u8; 300]).unwrap();

        let toml = r#"
            [[target]]
            name = "current"
            bus = "dummy:v1"
            addresses = [0x2a]
            firmware = "bp.bin"
            version = "1.0.0"

            [[target]]
            name = "stale"
            bus = "dummy:v0"
            addresses = [0x2a]
            firmware = "bp.bin"

            [[target]]
            name = "probe"
            bus = "dummy:v1"
        "#;
        let config = ScanConfig::from_toml_str(toml, dir.path()).unwrap();
        let outcomes = scan(&config, false);
        assert_eq!(
            outcomes,
            vec![
                ScanOutcome::UpToDate,
                ScanOutcome::Updated,
                ScanOutcome::Found,
                ScanOutcome::Found,
                ScanOutcome::Found,
            ]
        );
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_scan_dry_run_does_not_flash() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScanConfig {
            targets: vec![ScanTarget {
                name: "front".into(),
                bus: "dummy:v1".into(),
                addresses: Some(vec![0x2a]),
                firmware: Some(dir.path().join("missing.bin")),
                version: None,
            }],
        };
        assert_eq!(scan(&config, true), vec![ScanOutcome::Found]);
    }
}
