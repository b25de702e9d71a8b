use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::aggregate::Config;
use super::bag::Bag;
use super::driver::{Drivers, SourceDriver, DRIVER_FIELD};
use super::env::DEFAULT_SEPARATOR;
use super::parser::Parser;
use super::registry::{PRIORITY_FIELD, PRIORITY_PATH, SOURCES_PATH};
use super::scheduler::{RELOAD_ENABLED_PATH, RELOAD_PERIOD_PATH};
use super::value::Value;
use super::{ConfigError, ConfigResult};

/// Builder for a [`Config`] aggregate.
///
/// Everything given to the builder ends up in the seed bag: plain values,
/// declarative source entries under `dragon.config.sources`, and the
/// engine's own knobs under `dragon.config`. Declared sources are created
/// lazily, on the first [`SourceRegistry::get`](super::SourceRegistry::get)
/// (or eagerly when booted through [`AppContext`](crate::AppContext)).
///
/// ## Example
///
/// ```no_run
/// use dragon_config::Config;
///
/// let config = Config::builder()
///     .with_value("app.name", "demo")
///     .with_file("defaults", "config/default.toml", true)
///     .with_env("env", "MYAPP", "__")
///     .with_priority("env", 10)
///     .build()?;
///
/// config.sources().get("defaults")?;
/// config.sources().get("env")?;
/// let port = config.get_int("server.port", 8080);
/// # Ok::<(), dragon_config::ConfigError>(())
/// ```
#[derive(Debug, Default)]
#[must_use = "builders do nothing until .build() is called"]
pub struct ConfigBuilder {
    seed: Bag,
    drivers: Drivers,
    error: Option<ConfigError>,
}

impl ConfigBuilder {
    fn apply(mut self, f: impl FnOnce(&mut Bag) -> ConfigResult<()>) -> Self {
        if self.error.is_none() {
            if let Err(err) = f(&mut self.seed) {
                self.error = Some(err);
            }
        }
        self
    }

    /// Merges `values` into the seed. Later calls override earlier ones.
    pub fn with_seed(mut self, values: Bag) -> Self {
        self.seed.merge(&values);
        self
    }

    /// Sets a single seed value. An invalid path fails the build.
    pub fn with_value(self, path: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.apply(|seed| seed.set(path, value))
    }

    /// Declares a source entry under `id`.
    pub fn with_source(self, id: impl Into<String>, entry: Bag) -> Self {
        let id = id.into();
        self.apply(|seed| {
            let mut sources = seed.get_bag(SOURCES_PATH);
            sources.insert(id, entry);
            seed.set(SOURCES_PATH, sources)
        })
    }

    /// Declares a file source. Missing optional files yield no values until
    /// they appear.
    pub fn with_file(self, id: impl Into<String>, path: impl AsRef<Path>, required: bool) -> Self {
        let mut entry = Bag::new();
        entry.insert(DRIVER_FIELD, "file");
        entry.insert("path", path.as_ref().to_string_lossy().into_owned());
        entry.insert("required", required);
        self.with_source(id, entry)
    }

    /// Declares an environment source reading `PREFIX{separator}...` variables.
    pub fn with_env(
        self,
        id: impl Into<String>,
        prefix: impl Into<String>,
        separator: impl Into<String>,
    ) -> Self {
        let separator = separator.into();
        let mut entry = Bag::new();
        entry.insert(DRIVER_FIELD, "env");
        entry.insert("prefix", prefix.into());
        if separator != DEFAULT_SEPARATOR {
            entry.insert("separator", separator);
        }
        self.with_source(id, entry)
    }

    /// Sets the priority of the declared source `id`.
    pub fn with_priority(self, id: &str, priority: i32) -> Self {
        let path = format!("{SOURCES_PATH}.{id}.{PRIORITY_FIELD}");
        self.apply(|seed| seed.set(&path, priority))
    }

    /// Priority given to sources that don't declare one.
    pub fn with_default_priority(self, priority: i32) -> Self {
        self.apply(|seed| seed.set(PRIORITY_PATH, priority))
    }

    /// Enables periodic reload of every source.
    pub fn with_reload(self, period: Duration) -> Self {
        self.apply(|seed| {
            seed.set(RELOAD_ENABLED_PATH, true)?;
            seed.set(RELOAD_PERIOD_PATH, period)
        })
    }

    /// Adds a driver, consulted after the bundled ones.
    pub fn with_driver(mut self, driver: impl SourceDriver + 'static) -> Self {
        self.drivers.register(Arc::new(driver));
        self
    }

    /// Adds a parser. It takes precedence over the bundled ones.
    pub fn with_parser(mut self, parser: impl Parser + 'static) -> Self {
        self.drivers.register_parser(Arc::new(parser));
        self
    }

    /// Builds the aggregate, failing with the first error recorded while
    /// building the seed.
    pub fn build(self) -> ConfigResult<Config> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(Config::new(self.seed, self.drivers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::driver::DriverContext;
    use crate::config::memory::MemorySource;
    use crate::config::source::SharedSource;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[derive(Debug)]
    struct Constant;

    impl SourceDriver for Constant {
        fn name(&self) -> &str {
            "constant"
        }

        fn create(&self, _ctx: &DriverContext<'_>) -> ConfigResult<SharedSource> {
            let mut values = Bag::new();
            values.set("constant", 1)?;
            Ok(Arc::new(MemorySource::new(values)))
        }
    }

    #[test]
    fn test_builder_declares_file_source() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "[server]\nport = 9000").unwrap();

        let config = Config::builder()
            .with_value("server.port", 80)
            .with_file("main", file.path(), true)
            .with_file("local", "/nonexistent/local.toml", false)
            .with_priority("local", 5)
            .build()
            .unwrap();

        assert_eq!(config.get_int("server.port", 0), 80);
        assert_eq!(config.sources().available(), vec!["seed", "local", "main"]);

        config.sources().get("main").unwrap();
        config.sources().get("local").unwrap();

        assert_eq!(config.get_int("server.port", 0), 9000);
        assert_eq!(config.sources().priority("local"), Some(5));
    }

    #[test]
    fn test_builder_env_source() {
        std::env::set_var("DRAGON_CONFIG_BUILDER_TEST_X_LEVEL", "9");

        let config = Config::builder()
            .with_env("env", "DRAGON_CONFIG_BUILDER_TEST", "_X_")
            .build()
            .unwrap();
        config.sources().get("env").unwrap();

        assert_eq!(config.get_int("level", 0), 9);
        std::env::remove_var("DRAGON_CONFIG_BUILDER_TEST_X_LEVEL");
    }

    #[test]
    fn test_builder_custom_driver() {
        let mut entry = Bag::new();
        entry.insert(DRIVER_FIELD, "constant");

        let config = Config::builder()
            .with_driver(Constant)
            .with_source("c", entry)
            .build()
            .unwrap();
        config.sources().get("c").unwrap();

        assert_eq!(config.get_int("constant", 0), 1);
    }

    #[test]
    fn test_builder_reports_invalid_path() {
        let result = Config::builder()
            .with_value("a..b", 1)
            .with_value("c", 2)
            .build();

        assert!(matches!(result, Err(ConfigError::InvalidPath(_))));
    }

    #[test]
    fn test_builder_reload_flags() {
        let config = Config::builder()
            .with_reload(Duration::from_secs(30))
            .with_default_priority(3)
            .build()
            .unwrap();

        assert!(config.get_bool(RELOAD_ENABLED_PATH, false));
        assert_eq!(
            config.get_duration(RELOAD_PERIOD_PATH, Duration::ZERO),
            Duration::from_secs(30)
        );
        assert_eq!(config.get_int(PRIORITY_PATH, 0), 3);
    }
}
