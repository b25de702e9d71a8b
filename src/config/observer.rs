//! Per-path change observers.

use std::sync::Arc;

use tracing::trace;

use super::bag::Bag;
use super::value::Value;
use super::{ConfigError, ConfigResult};

/// Callback invoked with `(old, new)` when an observed path changes.
/// A missing path is reported as [`Value::Nil`].
pub type ObserverCallback = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

struct ObserverRecord {
    owner: String,
    path: String,
    callback: ObserverCallback,
    last: Value,
}

/// Observer table. Each `(owner, path)` pair is registered at most once.
#[derive(Default)]
pub(crate) struct Observers {
    records: Vec<ObserverRecord>,
}

/// A pending callback invocation, fired after the state lock is released.
pub(crate) struct Notification {
    owner: String,
    path: String,
    callback: ObserverCallback,
    old: Value,
    new: Value,
}

impl Notification {
    pub(crate) fn fire(self) {
        trace!(owner = %self.owner, path = %self.path, old = %self.old, new = %self.new, "config observer");
        (self.callback)(&self.old, &self.new);
    }
}

fn effective(bag: &Bag, path: &str) -> Value {
    bag.get(path).cloned().unwrap_or_default()
}

impl Observers {
    pub(crate) fn contains(&self, owner: &str, path: &str) -> bool {
        self.records
            .iter()
            .any(|r| r.owner == owner && r.path == path)
    }

    /// Registers an observer whose baseline is the current value in `view`.
    pub(crate) fn add(
        &mut self,
        owner: &str,
        path: &str,
        callback: ObserverCallback,
        view: &Bag,
    ) -> ConfigResult<()> {
        if self.contains(owner, path) {
            return Err(ConfigError::DuplicateConfigObserver {
                owner: owner.to_string(),
                path: path.to_string(),
            });
        }
        self.records.push(ObserverRecord {
            owner: owner.to_string(),
            path: path.to_string(),
            callback,
            last: effective(view, path),
        });
        Ok(())
    }

    pub(crate) fn remove(&mut self, owner: &str, path: &str) -> bool {
        let before = self.records.len();
        self.records
            .retain(|r| !(r.owner == owner && r.path == path));
        self.records.len() != before
    }

    /// Compares every observed path against `view`, updating baselines, and
    /// returns one notification per observer whose value changed.
    pub(crate) fn collect_changes(&mut self, view: &Bag) -> Vec<Notification> {
        let mut fired = Vec::new();
        for record in &mut self.records {
            let current = effective(view, &record.path);
            if current == record.last {
                continue;
            }
            let old = std::mem::replace(&mut record.last, current.clone());
            fired.push(Notification {
                owner: record.owner.clone(),
                path: record.path.clone(),
                callback: record.callback.clone(),
                old,
                new: current,
            });
        }
        fired
    }
}
