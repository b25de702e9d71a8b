//! In-memory configuration source.

use std::sync::Arc;

use parking_lot::Mutex;

use super::bag::Bag;
use super::driver::{DriverContext, SourceDriver};
use super::source::{ConfigSource, SharedSource};
use super::ConfigResult;

/// A source backed by a bag held in memory.
///
/// New values are staged with [`stage`](Self::stage) and become visible on
/// the next reload, the same way a file edit only lands when the file
/// source is polled.
#[derive(Debug, Default)]
pub struct MemorySource {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    current: Bag,
    staged: Option<Bag>,
}

impl MemorySource {
    pub fn new(values: Bag) -> Self {
        Self {
            inner: Mutex::new(MemoryState {
                current: values,
                staged: None,
            }),
        }
    }

    /// Queues `values` to replace the current snapshot on the next reload.
    pub fn stage(&self, values: Bag) {
        self.inner.lock().staged = Some(values);
    }
}

impl ConfigSource for MemorySource {
    fn snapshot(&self) -> Bag {
        self.inner.lock().current.clone()
    }

    fn reload(&self) -> ConfigResult<bool> {
        let mut state = self.inner.lock();
        match state.staged.take() {
            Some(values) if values != state.current => {
                state.current = values;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Creates [`MemorySource`]s from `{ driver = "memory", values = { ... } }`.
#[derive(Debug, Default)]
pub struct MemoryDriver;

impl SourceDriver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    fn create(&self, ctx: &DriverContext<'_>) -> ConfigResult<SharedSource> {
        Ok(Arc::new(MemorySource::new(ctx.entry.get_bag("values"))))
    }
}
