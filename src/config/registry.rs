//! Source registry: lazy creation, caching and lifecycle of sources.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use super::aggregate::{Shared, State};
use super::bag::Bag;
use super::source::SharedSource;
use super::value::Value;
use super::{ConfigError, ConfigResult};

/// Reserved id of the bootstrap seed source.
pub const SEED_ID: &str = "seed";

/// Path of the declarative source entries in the merged view.
pub const SOURCES_PATH: &str = "dragon.config.sources";

/// Path of the priority given to sources that don't declare one.
pub const PRIORITY_PATH: &str = "dragon.config.priority";

/// Field of a declarative entry holding its priority.
pub const PRIORITY_FIELD: &str = "priority";

pub const DEFAULT_PRIORITY: i32 = 0;

pub(crate) const SEED_PRIORITY: i32 = i32::MIN;

/// How a source came to be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Seed,
    Declared,
    Programmatic,
}

pub(crate) struct SourceRecord {
    pub(crate) priority: i32,
    pub(crate) instance: SharedSource,
    pub(crate) origin: Origin,
    pub(crate) seq: u64,
}

fn declared(view: &Bag) -> Option<&Bag> {
    view.get(SOURCES_PATH).and_then(Value::as_bag)
}

fn is_declared(view: &Bag, id: &str) -> bool {
    declared(view).is_some_and(|d| d.get_key(id).is_some())
}

fn default_priority(view: &Bag) -> i32 {
    let priority = view.get_int(PRIORITY_PATH, i64::from(DEFAULT_PRIORITY));
    i32::try_from(priority).unwrap_or(DEFAULT_PRIORITY)
}

/// Seed first, then the remaining ids in ascending order.
fn seed_first(mut ids: BTreeSet<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(ids.len());
    if ids.remove(SEED_ID) {
        out.push(SEED_ID.to_string());
    }
    out.extend(ids);
    out
}

/// Handle to the sources feeding a [`Config`](super::Config).
///
/// Sources are either declared under `dragon.config.sources` and created on
/// first [`get`](Self::get), or added programmatically with
/// [`store`](Self::store). Both kinds share one id namespace.
#[derive(Clone)]
pub struct SourceRegistry {
    shared: Arc<Shared>,
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("available", &self.available())
            .field("stored", &self.stored())
            .finish()
    }
}

impl SourceRegistry {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Declared and instantiated ids. Never instantiates anything.
    pub fn available(&self) -> Vec<String> {
        let state = self.shared.state.read();
        let mut ids: BTreeSet<String> = state.records.keys().cloned().collect();
        if let Some(entries) = declared(&state.view) {
            ids.extend(entries.keys().map(str::to_string));
        }
        seed_first(ids)
    }

    /// Ids of instantiated sources.
    pub fn stored(&self) -> Vec<String> {
        let state = self.shared.state.read();
        seed_first(state.records.keys().cloned().collect())
    }

    pub fn has(&self, id: &str) -> bool {
        let state = self.shared.state.read();
        state.records.contains_key(id) || is_declared(&state.view, id)
    }

    pub fn priority(&self, id: &str) -> Option<i32> {
        self.shared.state.read().records.get(id).map(|r| r.priority)
    }

    pub fn origin(&self, id: &str) -> Option<Origin> {
        self.shared.state.read().records.get(id).map(|r| r.origin)
    }

    /// Returns the source `id`, creating it from its declarative entry on
    /// first use.
    pub fn get(&self, id: &str) -> ConfigResult<SharedSource> {
        if let Some(record) = self.shared.state.read().records.get(id) {
            return Ok(record.instance.clone());
        }

        let _gate = self.shared.gate.lock();
        let (entry, fallback_priority) = {
            let state = self.shared.state.read();
            if let Some(record) = state.records.get(id) {
                return Ok(record.instance.clone());
            }
            let entry = declared(&state.view)
                .and_then(|d| d.get_key(id))
                .cloned()
                .ok_or_else(|| ConfigError::UnknownResource(id.to_string()))?;
            (entry, default_priority(&state.view))
        };

        let Value::Bag(entry) = entry else {
            return Err(ConfigError::invalid_config(id, "entry is not a table"));
        };
        let priority = match entry.get(PRIORITY_FIELD) {
            None => fallback_priority,
            Some(value) => value
                .coerce_int()
                .and_then(|p| i32::try_from(p).ok())
                .ok_or_else(|| ConfigError::invalid_config(id, "priority must be an integer"))?,
        };

        let instance = self.shared.drivers.create(id, &entry)?;

        let mut state = self.shared.state.write();
        state.insert(id, priority, instance.clone(), Origin::Declared);
        info!(id, priority, "config source created");
        self.shared.recompute(state);
        Ok(instance)
    }

    /// Registers `instance` under `id` at the default priority.
    pub fn store(&self, id: &str, instance: SharedSource) -> ConfigResult<()> {
        self.store_inner(id, instance, None)
    }

    pub fn store_with_priority(
        &self,
        id: &str,
        instance: SharedSource,
        priority: i32,
    ) -> ConfigResult<()> {
        self.store_inner(id, instance, Some(priority))
    }

    fn store_inner(
        &self,
        id: &str,
        instance: SharedSource,
        priority: Option<i32>,
    ) -> ConfigResult<()> {
        let _gate = self.shared.gate.lock();
        let mut state = self.shared.state.write();
        if state.records.contains_key(id) || is_declared(&state.view, id) {
            return Err(ConfigError::DuplicateResource(id.to_string()));
        }
        let priority = priority.unwrap_or_else(|| default_priority(&state.view));
        state.insert(id, priority, instance, Origin::Programmatic);
        info!(id, priority, "config source stored");
        self.shared.recompute(state);
        Ok(())
    }

    /// Closes and unregisters `id`, removing its values from the view.
    pub fn remove(&self, id: &str) -> ConfigResult<()> {
        if id == SEED_ID {
            return Err(ConfigError::ReservedResource(id.to_string()));
        }
        let _gate = self.shared.gate.lock();
        let mut state = self.shared.state.write();
        let record = state
            .records
            .remove(id)
            .ok_or_else(|| ConfigError::UnknownResource(id.to_string()))?;
        self.shared.recompute(state);
        info!(id, "config source removed");
        record.instance.close()
    }

    /// Removes every source except the seed.
    pub fn remove_all(&self) -> ConfigResult<()> {
        let _gate = self.shared.gate.lock();
        let mut state = self.shared.state.write();
        let removed = drain(&mut state, |id| id != SEED_ID);
        self.shared.recompute(state);
        close_each(removed)
    }

    /// Closes every source, the seed included, without notifying observers.
    pub(crate) fn close_all(&self) -> ConfigResult<()> {
        let _gate = self.shared.gate.lock();
        let removed = drain(&mut self.shared.state.write(), |_| true);
        close_each(removed)
    }

    /// Reloads every source. Any change triggers one full recompute.
    ///
    /// All sources are attempted; the first error is returned.
    pub fn reload(&self) -> ConfigResult<()> {
        let _gate = self.shared.gate.lock();
        let sources: Vec<(String, SharedSource)> = self
            .shared
            .state
            .read()
            .records
            .iter()
            .map(|(id, r)| (id.clone(), r.instance.clone()))
            .collect();

        let mut changed = false;
        let mut first_error = None;
        for (id, source) in sources {
            match source.reload() {
                Ok(true) => {
                    info!(id = %id, "config source changed");
                    changed = true;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(id = %id, error = %err, "config source reload failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        if changed {
            self.shared.recompute(self.shared.state.write());
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Moves `id` to `priority` and recomputes the view.
    pub fn set_priority(&self, id: &str, priority: i32) -> ConfigResult<()> {
        if id == SEED_ID {
            return Err(ConfigError::ReservedResource(id.to_string()));
        }
        let _gate = self.shared.gate.lock();
        let mut state = self.shared.state.write();
        let record = state
            .records
            .get_mut(id)
            .ok_or_else(|| ConfigError::UnknownResource(id.to_string()))?;
        record.priority = priority;
        info!(id, priority, "config source priority changed");
        self.shared.recompute(state);
        Ok(())
    }
}

fn drain(state: &mut State, keep_out: impl Fn(&str) -> bool) -> Vec<(String, SourceRecord)> {
    let ids: Vec<String> = state
        .records
        .keys()
        .filter(|id| keep_out(id.as_str()))
        .cloned()
        .collect();
    ids.into_iter()
        .filter_map(|id| state.records.remove(&id).map(|r| (id, r)))
        .collect()
}

fn close_each(records: Vec<(String, SourceRecord)>) -> ConfigResult<()> {
    let mut first_error = None;
    for (id, record) in records {
        if let Err(err) = record.instance.close() {
            warn!(id = %id, error = %err, "failed to close config source");
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}
