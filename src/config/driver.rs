//! Pluggable source drivers.
//!
//! A declarative entry such as `{ driver = "file", path = "app.toml" }` is
//! turned into a live source by the first registered driver that accepts it.

use std::sync::Arc;

use tracing::debug;

use super::bag::Bag;
use super::env::EnvDriver;
use super::file::{DirDriver, FileDriver};
use super::memory::MemoryDriver;
use super::parser::{Parser, Parsers};
use super::source::SharedSource;
use super::{ConfigError, ConfigResult};

/// Field of a declarative entry naming its driver.
pub const DRIVER_FIELD: &str = "driver";

/// Everything a driver sees when asked to create a source.
#[derive(Debug)]
pub struct DriverContext<'a> {
    pub id: &'a str,
    pub entry: &'a Bag,
    pub parsers: &'a Parsers,
}

impl DriverContext<'_> {
    /// Reads a string field, failing with `InvalidResourceConfig` when absent.
    pub fn required_string(&self, field: &str) -> ConfigResult<String> {
        self.entry
            .get(field)
            .and_then(|v| v.coerce_string())
            .ok_or_else(|| ConfigError::invalid_config(self.id, format!("missing field '{field}'")))
    }
}

/// Creates sources from declarative entries.
pub trait SourceDriver: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Whether this driver handles `entry`. Matches on the `driver` field by default.
    fn accepts(&self, entry: &Bag) -> bool {
        entry.get(DRIVER_FIELD).and_then(|v| v.as_str()) == Some(self.name())
    }

    fn create(&self, ctx: &DriverContext<'_>) -> ConfigResult<SharedSource>;
}

/// Ordered driver list. Drivers are consulted in registration order.
#[derive(Debug, Clone)]
pub struct Drivers {
    drivers: Vec<Arc<dyn SourceDriver>>,
    parsers: Parsers,
}

impl Default for Drivers {
    /// The bundled drivers: `memory`, `env`, `file`, `dir`.
    fn default() -> Self {
        Self {
            drivers: vec![
                Arc::new(MemoryDriver),
                Arc::new(EnvDriver),
                Arc::new(FileDriver),
                Arc::new(DirDriver),
            ],
            parsers: Parsers::default(),
        }
    }
}

impl Drivers {
    /// A driver list with no drivers and no parsers.
    pub fn empty() -> Self {
        Self {
            drivers: Vec::new(),
            parsers: Parsers::empty(),
        }
    }

    pub fn register(&mut self, driver: Arc<dyn SourceDriver>) {
        self.drivers.push(driver);
    }

    pub fn register_parser(&mut self, parser: Arc<dyn Parser>) {
        self.parsers.register(parser);
    }

    pub fn names(&self) -> Vec<&str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }

    /// Creates the source declared by `entry` using the first accepting driver.
    pub fn create(&self, id: &str, entry: &Bag) -> ConfigResult<SharedSource> {
        let Some(name) = entry.get(DRIVER_FIELD).and_then(|v| v.coerce_string()) else {
            return Err(ConfigError::invalid_config(id, "missing driver"));
        };

        let driver = self
            .drivers
            .iter()
            .find(|d| d.accepts(entry))
            .ok_or_else(|| ConfigError::invalid_config(id, format!("no driver accepts '{name}'")))?;

        debug!(id, driver = driver.name(), "creating config source");
        driver.create(&DriverContext {
            id,
            entry,
            parsers: &self.parsers,
        })
    }
}
