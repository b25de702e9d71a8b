//! The merged, observable configuration view.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex, RwLock, RwLockWriteGuard};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::bag::Bag;
use super::builder::ConfigBuilder;
use super::driver::Drivers;
use super::memory::MemorySource;
use super::observer::{Notification, Observers};
use super::registry::{Origin, SourceRecord, SourceRegistry, SEED_ID, SEED_PRIORITY};
use super::source::SharedSource;
use super::value::Value;
use super::ConfigResult;

pub(crate) struct State {
    pub(crate) records: BTreeMap<String, SourceRecord>,
    next_seq: u64,
    pub(crate) view: Bag,
    overrides: Bag,
    observers: Observers,
}

impl State {
    pub(crate) fn insert(
        &mut self,
        id: &str,
        priority: i32,
        instance: SharedSource,
        origin: Origin,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.insert(
            id.to_string(),
            SourceRecord {
                priority,
                instance,
                origin,
                seq,
            },
        );
    }

    /// Folds every source in ascending priority, registration order breaking
    /// ties, then applies direct overrides on top.
    fn fold(&self) -> Bag {
        let mut records: Vec<&SourceRecord> = self.records.values().collect();
        records.sort_by_key(|r| (r.priority, r.seq));

        let mut view = Bag::new();
        for record in records {
            view.merge(&record.instance.snapshot());
        }
        view.merge(&self.overrides);
        view
    }
}

/// State shared by [`Config`] and [`SourceRegistry`] handles.
///
/// Lock discipline: every mutation holds `gate` for its whole duration,
/// observer callbacks included, so mutations from different threads never
/// interleave. `state` is write-locked only while the view is rebuilt and is
/// released before callbacks run, so callbacks may read the configuration.
/// The gate is reentrant: a callback that mutates from the same thread nests
/// instead of deadlocking. Notifications raised by a nested mutation are
/// queued behind the ones already pending, so every observer hears its
/// changes in order.
pub(crate) struct Shared {
    pub(crate) gate: ReentrantMutex<()>,
    pub(crate) state: RwLock<State>,
    pub(crate) drivers: Drivers,
    dispatch: Mutex<Dispatch>,
}

/// Notifications awaiting delivery. Only the outermost publish delivers.
#[derive(Default)]
struct Dispatch {
    queue: VecDeque<Notification>,
    delivering: bool,
}

/// Marks the end of delivery, also when a callback panics.
struct Delivering<'a>(&'a Mutex<Dispatch>);

impl Drop for Delivering<'_> {
    fn drop(&mut self) {
        let mut dispatch = self.0.lock();
        dispatch.delivering = false;
        dispatch.queue.clear();
    }
}

impl Shared {
    /// Rebuilds the view from all sources and notifies observers.
    /// The caller must hold the gate.
    pub(crate) fn recompute(&self, mut state: RwLockWriteGuard<'_, State>) {
        let view = state.fold();
        state.view = view;
        debug!(sources = state.records.len(), "config view recomputed");
        self.publish(state);
    }

    fn publish(&self, mut state: RwLockWriteGuard<'_, State>) {
        let notifications = {
            let State {
                view, observers, ..
            } = &mut *state;
            observers.collect_changes(view)
        };
        drop(state);

        {
            let mut dispatch = self.dispatch.lock();
            dispatch.queue.extend(notifications);
            if dispatch.delivering {
                return;
            }
            dispatch.delivering = true;
        }

        let _delivering = Delivering(&self.dispatch);
        loop {
            let next = self.dispatch.lock().queue.pop_front();
            match next {
                Some(notification) => notification.fire(),
                None => break,
            }
        }
    }
}

/// Handle to the configuration aggregate. Cheap to clone; every clone
/// shares the same sources, view and observers.
///
/// ```
/// use dragon_config::Config;
///
/// let config = Config::builder()
///     .with_value("app.name", "demo")
///     .build()?;
///
/// assert_eq!(config.get_string("app.name", ""), "demo");
/// config.set("app.name", "override")?;
/// assert_eq!(config.get_string("app.name", ""), "override");
/// # Ok::<(), dragon_config::ConfigError>(())
/// ```
#[derive(Clone)]
pub struct Config {
    shared: Arc<Shared>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("stored", &self.sources().stored())
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Creates a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Creates an aggregate whose only source is the `seed` bag.
    pub fn new(seed: Bag, drivers: Drivers) -> Self {
        let mut state = State {
            records: BTreeMap::new(),
            next_seq: 0,
            view: Bag::new(),
            overrides: Bag::new(),
            observers: Observers::default(),
        };
        state.insert(
            SEED_ID,
            SEED_PRIORITY,
            Arc::new(MemorySource::new(seed)),
            Origin::Seed,
        );
        state.view = state.fold();

        Self {
            shared: Arc::new(Shared {
                gate: ReentrantMutex::new(()),
                state: RwLock::new(state),
                drivers,
                dispatch: Mutex::new(Dispatch::default()),
            }),
        }
    }

    /// The source registry feeding this aggregate.
    pub fn sources(&self) -> SourceRegistry {
        SourceRegistry::new(self.shared.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&Bag) -> T) -> T {
        f(&self.shared.state.read().view)
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        self.read(|view| view.get(path).cloned())
    }

    pub fn get_or(&self, path: &str, default: impl Into<Value>) -> Value {
        self.read(|view| view.get_or(path, default))
    }

    pub fn has(&self, path: &str) -> bool {
        self.read(|view| view.has(path))
    }

    pub fn get_string(&self, path: &str, default: &str) -> String {
        self.read(|view| view.get_string(path, default))
    }

    pub fn get_int(&self, path: &str, default: i64) -> i64 {
        self.read(|view| view.get_int(path, default))
    }

    pub fn get_float(&self, path: &str, default: f64) -> f64 {
        self.read(|view| view.get_float(path, default))
    }

    pub fn get_bool(&self, path: &str, default: bool) -> bool {
        self.read(|view| view.get_bool(path, default))
    }

    pub fn get_duration(&self, path: &str, default: Duration) -> Duration {
        self.read(|view| view.get_duration(path, default))
    }

    pub fn get_seq(&self, path: &str, default: Vec<Value>) -> Vec<Value> {
        self.read(|view| view.get_seq(path, default))
    }

    pub fn get_bag(&self, path: &str) -> Bag {
        self.read(|view| view.get_bag(path))
    }

    /// A copy of the whole merged view.
    pub fn snapshot(&self) -> Bag {
        self.read(Bag::clone)
    }

    /// Deserializes the bag at `path` (the whole view for `""`) into `T`.
    pub fn extract<T: DeserializeOwned>(&self, path: &str) -> ConfigResult<T> {
        let bag = self.read(|view| {
            if path.is_empty() {
                view.clone()
            } else {
                view.get_bag(path)
            }
        });
        bag.extract()
    }

    /// Writes a value directly into the view.
    ///
    /// The value wins over every source. It is applied to the view as-is
    /// and, on later recomputes, merged on top of all source snapshots.
    pub fn set(&self, path: &str, value: impl Into<Value>) -> ConfigResult<()> {
        let value = value.into();
        let _gate = self.shared.gate.lock();
        let mut state = self.shared.state.write();
        state.overrides.set(path, value.clone())?;
        state.view.set(path, value)?;
        debug!(path, "config value set");
        self.shared.publish(state);
        Ok(())
    }

    /// Deletes `path` from the view and drops any direct value written
    /// there. Source values reappear on the next recompute.
    pub fn delete(&self, path: &str) -> Option<Value> {
        let _gate = self.shared.gate.lock();
        let mut state = self.shared.state.write();
        state.overrides.delete(path);
        let removed = state.view.delete(path);
        if removed.is_some() {
            debug!(path, "config value deleted");
        }
        self.shared.publish(state);
        removed
    }

    /// Registers `callback` to run whenever the effective value at `path`
    /// changes. Fails with `DuplicateConfigObserver` if `owner` already
    /// observes `path`.
    ///
    /// Callbacks run synchronously on the thread that caused the change and
    /// must not block.
    pub fn add_observer<F>(&self, owner: &str, path: &str, callback: F) -> ConfigResult<()>
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        let _gate = self.shared.gate.lock();
        let mut state = self.shared.state.write();
        let State {
            view, observers, ..
        } = &mut *state;
        observers.add(owner, path, Arc::new(callback), view)?;
        debug!(owner, path, "config observer registered");
        Ok(())
    }

    pub fn has_observer(&self, owner: &str, path: &str) -> bool {
        self.shared.state.read().observers.contains(owner, path)
    }

    /// Unregisters an observer, returning whether it existed.
    pub fn remove_observer(&self, owner: &str, path: &str) -> bool {
        let _gate = self.shared.gate.lock();
        self.shared.state.write().observers.remove(owner, path)
    }

    /// Closes every source, the seed included. The first close error is
    /// returned after all sources have been attempted.
    pub fn close(&self) -> ConfigResult<()> {
        self.sources().close_all()
    }
}
