pub mod config;
pub mod context;
mod error;

pub use config::{Bag, Config, ConfigBuilder, ConfigError, ConfigSource, SourceRegistry, Value};
pub use context::{AppContext, AppContextBuilder};
pub use error::Error;
