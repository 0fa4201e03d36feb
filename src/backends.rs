//! Bus backend registration and dispatch
//!
//! Every backend is opened behind the same boxed [`Connect`] type so the
//! command implementations stay independent of which backends were compiled
//! in.

use bpmcu_core::bus::{Connect, SmbusBus};
use bpmcu_core::BusError;

/// A connector for any compiled-in backend
pub type DynConnector = Box<dyn Connect<Bus = Box<dyn SmbusBus>>>;

/// Information about a bus backend
pub struct BackendInfo {
    /// Bus argument form
    pub syntax: &'static str,
    /// Short description
    pub description: &'static str,
}

/// Backends enabled at compile time
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_backends() -> Vec<BackendInfo> {
    let mut backends = Vec::new();

    #[cfg(feature = "linux-i2c")]
    backends.push(BackendInfo {
        syntax: "<N> | /dev/i2c-<N>",
        description: "Linux i2c-dev bus",
    });

    #[cfg(feature = "dummy")]
    backends.push(BackendInfo {
        syntax: "dummy:v0 | dummy:v1",
        description: "Simulated MCU for testing",
    });

    backends
}

/// Wraps a connector so its buses come out boxed
struct Boxed<C>(C);

impl<C> Connect for Boxed<C>
where
    C: Connect,
    C::Bus: 'static,
{
    type Bus = Box<dyn SmbusBus>;

    fn label(&self) -> String {
        self.0.label()
    }

    fn connect(&mut self) -> Result<Self::Bus, BusError> {
        let bus = self.0.connect()?;
        Ok(Box::new(bus))
    }
}

fn boxed<C>(connector: C) -> DynConnector
where
    C: Connect + 'static,
    C::Bus: 'static,
{
    Box::new(Boxed(connector))
}

/// Open a connector for `bus` and `address`
#[allow(unused_variables)]
pub fn open_connector(bus: &str, address: u8, pec: bool) -> Result<DynConnector, String> {
    #[cfg(feature = "dummy")]
    if bus.starts_with("dummy") {
        return bpmcu_dummy::DummyConnector::from_bus_arg(bus)
            .map(boxed)
            .ok_or_else(|| format!("Unknown dummy bus: {} (use dummy:v0 or dummy:v1)", bus));
    }

    #[cfg(feature = "linux-i2c")]
    if !bus.starts_with("dummy") {
        use bpmcu_linux_i2c::{bus_path, LinuxI2cConfig, LinuxI2cConnector};

        let path = bus_path(bus)?;
        let config = LinuxI2cConfig::new(path, address).with_pec(pec);
        log::debug!("Using Linux I2C bus {}", config.label());
        return Ok(boxed(LinuxI2cConnector::new(config)));
    }

    Err(format!("Unsupported bus: {} (backend not compiled in)", bus))
}

/// Help text listing the bus argument forms
pub fn backend_help() -> String {
    let backends = available_backends();
    if backends.is_empty() {
        return "No bus backends compiled in".to_string();
    }
    let mut help = String::from("Available buses:\n");
    for backend in backends {
        help.push_str(&format!("  {:<24} {}\n", backend.syntax, backend.description));
    }
    help
}
