//! Configuration engine: value bags, prioritized sources, the merged view
//! and periodic reload.

mod aggregate;
mod bag;
mod builder;
mod driver;
mod env;
mod error;
mod file;
mod memory;
mod observer;
mod parser;
mod registry;
mod scheduler;
mod source;
mod trigger;
mod value;

pub use aggregate::Config;
pub use bag::{Bag, PATH_SEPARATOR};
pub use builder::ConfigBuilder;
pub use driver::{DriverContext, Drivers, SourceDriver, DRIVER_FIELD};
pub use env::{EnvDriver, EnvSource, DEFAULT_SEPARATOR};
pub use error::{ConfigError, ConfigResult};
pub use file::{DirDriver, DirSource, FileDriver, FileSource};
pub use memory::{MemoryDriver, MemorySource};
pub use observer::ObserverCallback;
pub use parser::{JsonParser, Parser, Parsers, TomlParser};
pub use registry::{
    Origin, SourceRegistry, DEFAULT_PRIORITY, PRIORITY_FIELD, PRIORITY_PATH, SEED_ID,
    SOURCES_PATH,
};
pub use scheduler::{ReloadScheduler, RELOAD_ENABLED_PATH, RELOAD_PERIOD_PATH, SCHEDULER_OWNER};
pub use source::{ConfigSource, SharedSource};
pub use trigger::{Job, ThreadTrigger, ThreadTriggerFactory, Trigger, TriggerFactory};
pub use value::Value;
