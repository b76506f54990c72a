//! Process-lifetime cache of resolved controllers.

use super::{Controller, ControllerRegistry};
use crate::errors::ControllerLookupError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Caches controller resolutions by name.
///
/// The directory scan runs while the name's shard is locked, so concurrent
/// first lookups of one name scan once and share the same `Arc`.
#[derive(Debug, Default)]
pub struct ControllerCache {
    entries: DashMap<String, Arc<Controller>>,
    scans: AtomicUsize,
}

impl ControllerCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a controller, scanning `directories` on first use.
    ///
    /// When `synthesize_missing` is set, a failed scan yields (and caches) an
    /// empty controller instead of an error.
    pub fn resolve(
        &self,
        registry: &ControllerRegistry,
        directories: &[String],
        name: &str,
        synthesize_missing: bool,
    ) -> Result<Arc<Controller>, ControllerLookupError> {
        if let Some(hit) = self.entries.get(name) {
            return Ok(hit.value().clone());
        }

        match self.entries.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                self.scans.fetch_add(1, Ordering::SeqCst);
                let controller = match registry.scan(directories, name) {
                    Ok(found) => found,
                    Err(err) if synthesize_missing => {
                        debug!(controller = name, error = %err, "using empty mock controller");
                        Arc::new(Controller::new(name))
                    }
                    Err(err) => return Err(err),
                };
                entry.insert(controller.clone());
                Ok(controller)
            }
        }
    }

    /// Number of directory scans performed.
    #[must_use]
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    /// Number of cached controllers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
