use std::sync::Arc;

use super::bag::Bag;
use super::ConfigResult;

/// A provider of configuration values.
///
/// Implementations hand out a snapshot of their current values. Sources
/// that can re-fetch their data override [`reload`](Self::reload); the
/// registry calls it on every scheduler tick and recomputes the merged view
/// whenever any source reports a change.
pub trait ConfigSource: Send + Sync + std::fmt::Debug {
    fn snapshot(&self) -> Bag;

    /// Re-fetches the underlying data and reports whether it changed.
    fn reload(&self) -> ConfigResult<bool> {
        Ok(false)
    }

    /// Releases any resource held by the source.
    fn close(&self) -> ConfigResult<()> {
        Ok(())
    }
}

/// Shared handle to a registered source. Cached instances are handed out by
/// reference, so two lookups of the same id return the same allocation.
pub type SharedSource = Arc<dyn ConfigSource>;
