//! Content parsers used by the file and directory sources.

use std::path::Path;
use std::sync::Arc;

use super::bag::Bag;
use super::value::Value;
use super::{ConfigError, ConfigResult};

/// Turns file contents into a [`Bag`].
pub trait Parser: Send + Sync + std::fmt::Debug {
    /// Identifier used by the `parser_id` field of declarative entries.
    fn id(&self) -> &str;

    /// File extensions (without the dot) this parser handles.
    fn extensions(&self) -> &[&str];

    fn parse(&self, path: &Path, contents: &str) -> ConfigResult<Bag>;
}

#[derive(Debug, Default)]
pub struct TomlParser;

impl Parser for TomlParser {
    fn id(&self) -> &str {
        "toml"
    }

    fn extensions(&self) -> &[&str] {
        &["toml"]
    }

    fn parse(&self, path: &Path, contents: &str) -> ConfigResult<Bag> {
        let table: toml::Table = toml::from_str(contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Bag::from(table))
    }
}

#[derive(Debug, Default)]
pub struct JsonParser;

impl Parser for JsonParser {
    fn id(&self) -> &str {
        "json"
    }

    fn extensions(&self) -> &[&str] {
        &["json"]
    }

    fn parse(&self, path: &Path, contents: &str) -> ConfigResult<Bag> {
        let value: serde_json::Value =
            serde_json::from_str(contents).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        match Value::from(value) {
            Value::Bag(bag) => Ok(bag),
            _ => Err(ConfigError::ParseError {
                path: path.to_path_buf(),
                reason: "top-level JSON value must be an object".to_string(),
            }),
        }
    }
}

/// Ordered set of parsers, looked up by id or by file extension.
#[derive(Debug, Clone)]
pub struct Parsers {
    parsers: Vec<Arc<dyn Parser>>,
}

impl Default for Parsers {
    fn default() -> Self {
        Self {
            parsers: vec![Arc::new(TomlParser), Arc::new(JsonParser)],
        }
    }
}

impl Parsers {
    pub fn empty() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// Registers a parser. Later registrations take precedence on lookup.
    pub fn register(&mut self, parser: Arc<dyn Parser>) {
        self.parsers.insert(0, parser);
    }

    /// Looks up a parser by id, failing with `UnknownResource`.
    pub fn by_id(&self, id: &str) -> ConfigResult<Arc<dyn Parser>> {
        self.parsers
            .iter()
            .find(|p| p.id() == id)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownResource(format!("parser '{id}'")))
    }

    pub fn for_path(&self, path: &Path) -> Option<Arc<dyn Parser>> {
        let ext = path.extension()?.to_str()?;
        self.parsers
            .iter()
            .find(|p| p.extensions().iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .cloned()
    }
}
