//! Path-addressed hierarchical value container.

use std::collections::btree_map::{self, BTreeMap};
use std::time::Duration;

use serde::de::DeserializeOwned;

use super::value::Value;
use super::{ConfigError, ConfigResult};

/// Separator between the segments of a configuration path.
pub const PATH_SEPARATOR: char = '.';

/// An ordered map of configuration values addressed by dotted paths.
///
/// Reads never fail: a missing path, or a path that walks through a scalar,
/// yields `None` (or the caller's default for the typed getters). Writes
/// create intermediate bags as needed, replacing any scalar in the way.
///
/// ```
/// use dragon_config::{Bag, Value};
///
/// let mut bag = Bag::new();
/// bag.set("server.port", 8080)?;
/// assert_eq!(bag.get_int("server.port", 0), 8080);
/// assert_eq!(bag.get("server.host"), None);
/// assert_eq!(bag.get_or("server.port.nested", "fallback"), Value::from("fallback"));
/// # Ok::<(), dragon_config::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bag {
    entries: BTreeMap<String, Value>,
}

/// Splits a path into segments. The empty path addresses the bag itself.
fn segments(path: &str) -> ConfigResult<Vec<&str>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let parts: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(ConfigError::InvalidPath(path.to_string()));
    }
    Ok(parts)
}

impl Bag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-level keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.entries.iter()
    }

    /// Inserts a value under a single key, without path splitting.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    /// Looks up a single top-level key, without path splitting.
    pub fn get_key(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let parts = segments(path).ok()?;
        let (last, parents) = parts.split_last()?;
        let mut current = self;
        for part in parents {
            current = current.entries.get(*part)?.as_bag()?;
        }
        current.entries.get(*last)
    }

    fn get_mut(&mut self, path: &str) -> Option<&mut Value> {
        let parts = segments(path).ok()?;
        let (last, parents) = parts.split_last()?;
        let mut current = self;
        for part in parents {
            current = current.entries.get_mut(*part)?.as_bag_mut()?;
        }
        current.entries.get_mut(*last)
    }

    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Returns a clone of the value at `path`, or `default` when absent.
    pub fn get_or(&self, path: &str, default: impl Into<Value>) -> Value {
        match self.get(path) {
            Some(value) => value.clone(),
            None => default.into(),
        }
    }

    /// Writes `value` at `path`.
    ///
    /// The empty path replaces the whole container and only accepts a bag.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> ConfigResult<()> {
        let value = value.into();
        let parts = segments(path)?;

        let Some((last, parents)) = parts.split_last() else {
            return match value {
                Value::Bag(bag) => {
                    *self = bag;
                    Ok(())
                }
                _ => Err(ConfigError::InvalidPath(path.to_string())),
            };
        };

        self.set_at(parents, last, value);
        Ok(())
    }

    /// Walks `parents`, replacing missing or scalar entries with bags.
    fn set_at(&mut self, parents: &[&str], last: &str, value: Value) {
        let Some((head, rest)) = parents.split_first() else {
            self.entries.insert(last.to_string(), value);
            return;
        };
        match self.entries.entry((*head).to_string()).or_default() {
            Value::Bag(child) => child.set_at(rest, last, value),
            slot => {
                let mut child = Bag::new();
                child.set_at(rest, last, value);
                *slot = Value::Bag(child);
            }
        }
    }

    /// Removes and returns the value at `path`.
    pub fn delete(&mut self, path: &str) -> Option<Value> {
        let (parent, last) = match path.rsplit_once(PATH_SEPARATOR) {
            Some((parent, last)) => (Some(parent), last),
            None => (None, path),
        };
        let container = match parent {
            Some(parent) => self.get_mut(parent)?.as_bag_mut()?,
            None => self,
        };
        container.entries.remove(last)
    }

    /// Merges `donor` into `self`. Donor values win; nested bags are merged
    /// recursively, other values (including sequences) are replaced entirely.
    pub fn merge(&mut self, donor: &Bag) -> &mut Self {
        for (key, value) in &donor.entries {
            match (self.entries.get_mut(key), value) {
                (Some(Value::Bag(base)), Value::Bag(overlay)) => {
                    base.merge(overlay);
                }
                (_, value) => {
                    self.entries.insert(key.clone(), value.clone());
                }
            }
        }
        self
    }

    /// Non-mutating variant of [`merge`](Self::merge).
    pub fn merged(&self, donor: &Bag) -> Bag {
        let mut out = self.clone();
        out.merge(donor);
        out
    }

    pub fn get_string(&self, path: &str, default: &str) -> String {
        self.get(path)
            .and_then(Value::coerce_string)
            .unwrap_or_else(|| default.to_string())
    }

    pub fn get_int(&self, path: &str, default: i64) -> i64 {
        self.get(path).and_then(Value::coerce_int).unwrap_or(default)
    }

    pub fn get_float(&self, path: &str, default: f64) -> f64 {
        self.get(path).and_then(Value::coerce_float).unwrap_or(default)
    }

    pub fn get_bool(&self, path: &str, default: bool) -> bool {
        self.get(path).and_then(Value::coerce_bool).unwrap_or(default)
    }

    pub fn get_duration(&self, path: &str, default: Duration) -> Duration {
        self.get(path)
            .and_then(Value::coerce_duration)
            .unwrap_or(default)
    }

    pub fn get_seq(&self, path: &str, default: Vec<Value>) -> Vec<Value> {
        match self.get(path) {
            Some(Value::Seq(items)) => items.clone(),
            _ => default,
        }
    }

    /// Returns a clone of the bag at `path`, or an empty bag.
    pub fn get_bag(&self, path: &str) -> Bag {
        self.get(path)
            .and_then(Value::as_bag)
            .cloned()
            .unwrap_or_default()
    }

    /// Leaf values keyed by their full dotted path.
    pub fn flatten(&self) -> BTreeMap<String, Value> {
        fn walk(bag: &Bag, prefix: &str, out: &mut BTreeMap<String, Value>) {
            for (key, value) in &bag.entries {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}{PATH_SEPARATOR}{key}")
                };
                match value {
                    Value::Bag(nested) if !nested.is_empty() => walk(nested, &path, out),
                    _ => {
                        out.insert(path, value.clone());
                    }
                }
            }
        }

        let mut out = BTreeMap::new();
        walk(self, "", &mut out);
        out
    }

    /// Deserializes the bag into `T`.
    ///
    /// Durations are rendered as humantime strings, so target fields should
    /// use a string-aware representation. Nil values are omitted.
    pub fn extract<T: DeserializeOwned>(&self) -> ConfigResult<T> {
        toml::Value::Table(self.to_toml_table())
            .try_into()
            .map_err(ConfigError::DeserializeError)
    }

    pub(crate) fn to_toml_table(&self) -> toml::Table {
        self.entries
            .iter()
            .filter_map(|(key, value)| value.to_toml().map(|v| (key.clone(), v)))
            .collect()
    }
}

impl From<toml::Table> for Bag {
    fn from(table: toml::Table) -> Self {
        table
            .into_iter()
            .map(|(key, value)| (key, Value::from(value)))
            .collect()
    }
}

impl FromIterator<(String, Value)> for Bag {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Bag {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn make_bag(toml_str: &str) -> Bag {
        Bag::from(toml::from_str::<toml::Table>(toml_str).unwrap())
    }

    #[test]
    fn test_set_creates_intermediate_bags() {
        let mut bag = Bag::new();
        bag.set("a.b.c", "deep").unwrap();

        assert!(bag.has("a"));
        assert!(bag.has("a.b"));
        assert_eq!(bag.get("a.b.c"), Some(&Value::from("deep")));
    }

    #[test]
    fn test_set_replaces_scalar_in_the_way() {
        let mut bag = Bag::new();
        bag.set("a", 1).unwrap();
        bag.set("a.b", 2).unwrap();

        assert_eq!(bag.get_int("a.b", 0), 2);
    }

    #[test]
    fn test_get_through_scalar_is_not_found() {
        let bag = make_bag("a = 1");

        assert_eq!(bag.get("a.b"), None);
        assert_eq!(bag.get_string("a.b", "default"), "default");
    }

    #[test]
    fn test_malformed_paths() {
        let mut bag = make_bag("a = 1");

        assert_eq!(bag.get("a..b"), None);
        assert_eq!(bag.get(""), None);
        assert!(matches!(
            bag.set("a..b", 1),
            Err(ConfigError::InvalidPath(_))
        ));
        assert!(matches!(bag.set("", 1), Err(ConfigError::InvalidPath(_))));
    }

    #[test]
    fn test_set_empty_path_replaces_container() {
        let mut bag = make_bag("a = 1");
        bag.set("", make_bag("b = 2")).unwrap();

        assert!(!bag.has("a"));
        assert_eq!(bag.get_int("b", 0), 2);
    }

    #[test]
    fn test_delete() {
        let mut bag = make_bag(
            r#"
            top = true
            [server]
            host = "localhost"
            port = 80
            "#,
        );

        assert_eq!(bag.delete("server.port"), Some(Value::Int(80)));
        assert_eq!(bag.delete("server.port"), None);
        assert_eq!(bag.delete("top"), Some(Value::Bool(true)));
        assert_eq!(bag.delete("top.nested"), None);
        assert_eq!(bag.keys().collect::<Vec<_>>(), vec!["server"]);
    }

    #[test]
    fn test_merge_overrides_and_recurses() {
        let mut base = make_bag(
            r#"
            list = [1, 2, 3]
            [server]
            host = "localhost"
            port = 80
            "#,
        );
        let donor = make_bag(
            r#"
            list = [4]
            [server]
            port = 8080
            "#,
        );

        base.merge(&donor);

        assert_eq!(base.get_string("server.host", ""), "localhost");
        assert_eq!(base.get_int("server.port", 0), 8080);
        assert_eq!(base.get_seq("list", vec![]), vec![Value::Int(4)]);
        assert_eq!(donor.get("server.host"), None);
    }

    #[test]
    fn test_merge_bag_replaces_scalar() {
        let base = make_bag("a = 1");
        let donor = make_bag("[a]\nb = 2");

        let merged = base.merged(&donor);

        assert_eq!(merged.get_int("a.b", 0), 2);
        assert_eq!(base.get_int("a", 0), 1);
    }

    #[test]
    fn test_equality_ignores_insertion_order() {
        let mut left = Bag::new();
        left.set("x", 1).unwrap();
        left.set("y.z", "a").unwrap();

        let mut right = Bag::new();
        right.set("y.z", "a").unwrap();
        right.set("x", 1).unwrap();

        assert_eq!(left, right);
    }

    #[test]
    fn test_typed_getters_fall_back() {
        let bag = make_bag(
            r#"
            name = "svc"
            port = "8080"
            debug = "yes"
            period = "1s 500ms"
            "#,
        );

        assert_eq!(bag.get_int("port", 0), 8080);
        assert_eq!(bag.get_int("name", 7), 7);
        assert!(bag.get_bool("debug", true));
        assert!(!bag.get_bool("debug", false));
        assert_eq!(
            bag.get_duration("period", Duration::ZERO),
            Duration::from_millis(1500)
        );
        assert_eq!(bag.get_float("missing", 1.5), 1.5);
        assert!(bag.get_bag("name").is_empty());
    }

    #[test]
    fn test_flatten() {
        let bag = make_bag(
            r#"
            a = 1
            [b]
            c = "x"
            [b.d]
            "#,
        );

        let flat = bag.flatten();
        let keys: Vec<_> = flat.keys().cloned().collect();

        assert_eq!(keys, vec!["a", "b.c", "b.d"]);
    }

    #[test]
    fn test_extract() {
        #[derive(Deserialize)]
        struct Server {
            host: String,
            port: u16,
        }

        let mut bag = make_bag("host = \"example.com\"");
        bag.set("port", 443).unwrap();
        bag.set("ignored", Value::Nil).unwrap();

        let server: Server = bag.extract().unwrap();

        assert_eq!(server.host, "example.com");
        assert_eq!(server.port, 443);
    }
}
