use std::collections::BTreeMap;

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// Constructs a transport for the given address.
pub type TransportFactory = fn(&str) -> Result<Box<dyn Transport>>;

/// Explicit mapping from a transport kind to its factory.
///
/// Callers resolve transports by kind name (`"serial"`, `"unix"`, ...) instead
/// of depending on concrete types. Additional kinds can be registered by the
/// application before the first session is created.
#[derive(Debug, Clone, Default)]
pub struct TransportRegistry {
    factories: BTreeMap<&'static str, TransportFactory>,
}

impl TransportRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the transports built into this crate.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        #[cfg(unix)]
        {
            registry.register("serial", open_serial);
            registry.register("unix", open_unix);
        }
        registry
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register(&mut self, kind: &'static str, factory: TransportFactory) {
        self.factories.insert(kind, factory);
    }

    /// Create a transport of the given kind for `address`.
    pub fn create(&self, kind: &str, address: &str) -> Result<Box<dyn Transport>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| TransportError::UnknownKind(kind.to_string()))?;
        factory(address)
    }

    /// Registered kind names in sorted order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }
}

/// Serial addresses take an optional `@baud` suffix, e.g. `/dev/ttyACM0@9600`.
#[cfg(unix)]
fn open_serial(address: &str) -> Result<Box<dyn Transport>> {
    use crate::serial::{SerialConfig, SerialPort};

    let (path, config) = match address.rsplit_once('@') {
        Some((path, baud)) => {
            let baud_rate = baud.parse::<u32>().map_err(|_| TransportError::Open {
                address: address.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid baud rate '{baud}'"),
                ),
            })?;
            (path, SerialConfig { baud_rate })
        }
        None => (address, SerialConfig::default()),
    };
    Ok(Box::new(SerialPort::with_config(path, config)))
}

#[cfg(unix)]
fn open_unix(address: &str) -> Result<Box<dyn Transport>> {
    Ok(Box::new(crate::uds::UnixSocketTransport::new(address)))
}
