use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::bag::{Bag, PATH_SEPARATOR};
use super::driver::{DriverContext, SourceDriver};
use super::source::{ConfigSource, SharedSource};
use super::value::Value;
use super::{ConfigError, ConfigResult};

/// Default separator between path segments in variable names.
pub const DEFAULT_SEPARATOR: &str = "__";

/// A source reading prefixed environment variables.
///
/// `MYAPP__DATABASE__PORT=5432` with prefix `MYAPP` and separator `__`
/// becomes `database.port = 5432`. Segments are lowercased and values are
/// coerced to the most specific type: boolean, integer, float, or string.
#[derive(Debug)]
pub struct EnvSource {
    prefix: String,
    separator: String,
    current: Mutex<Bag>,
}

impl EnvSource {
    pub fn new(prefix: impl Into<String>, separator: impl Into<String>) -> ConfigResult<Self> {
        let prefix = prefix.into();
        let separator = separator.into();
        if separator.is_empty() {
            return Err(ConfigError::invalid_config(
                prefix,
                "env separator must not be empty",
            ));
        }
        let current = Mutex::new(read_vars(&prefix, &separator, std::env::vars()));
        Ok(Self {
            prefix,
            separator,
            current,
        })
    }
}

impl ConfigSource for EnvSource {
    fn snapshot(&self) -> Bag {
        self.current.lock().clone()
    }

    fn reload(&self) -> ConfigResult<bool> {
        let fresh = read_vars(&self.prefix, &self.separator, std::env::vars());
        let mut current = self.current.lock();
        if *current == fresh {
            return Ok(false);
        }
        *current = fresh;
        Ok(true)
    }
}

fn read_vars(prefix: &str, separator: &str, vars: impl Iterator<Item = (String, String)>) -> Bag {
    let prefix_with_sep = format!("{prefix}{separator}");
    let mut bag = Bag::new();

    for (key, value) in vars {
        let Some(path_str) = key.strip_prefix(&prefix_with_sep) else {
            continue;
        };
        if path_str.is_empty() {
            continue;
        }

        let path = path_str
            .split(separator)
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(&PATH_SEPARATOR.to_string());

        if let Err(err) = bag.set(&path, coerce_value(&value)) {
            debug!(var = %key, error = %err, "skipping environment variable");
        }
    }

    bag
}

fn coerce_value(s: &str) -> Value {
    if s.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if s.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }

    // Only plain digit runs become integers; "0x10" or "+5" stay strings.
    if looks_like_integer(s) {
        if let Ok(i) = s.parse::<i64>() {
            return Value::Int(i);
        }
    }

    if s.contains('.') {
        if let Ok(f) = s.parse::<f64>() {
            return Value::Float(f);
        }
    }

    Value::String(s.to_string())
}

fn looks_like_integer(s: &str) -> bool {
    let s = s.strip_prefix('-').unwrap_or(s);
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// Creates [`EnvSource`]s from `{ driver = "env", prefix = "...", separator = "__" }`.
#[derive(Debug, Default)]
pub struct EnvDriver;

impl SourceDriver for EnvDriver {
    fn name(&self) -> &str {
        "env"
    }

    fn create(&self, ctx: &DriverContext<'_>) -> ConfigResult<SharedSource> {
        let prefix = ctx.required_string("prefix")?;
        let separator = ctx.entry.get_string("separator", DEFAULT_SEPARATOR);
        Ok(Arc::new(EnvSource::new(prefix, separator)?))
    }
}
