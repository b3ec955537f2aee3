//! Model Cache for the text encoder
//!
//! Implements:
//! - Lazy encoder loading on first use
//! - Last-used tracking with TTL idle eviction
//! - Scoped acquisition guards that keep an encoder alive while in use
//!
//! The cache is an explicit owner object: callers hold a reference to one
//! cache instance instead of reaching into ambient global state, and every
//! access goes through [`ModelCache::acquire`].

mod encoder;
mod error;

#[cfg(test)]
mod tests;

pub use encoder::TextEncoder;
pub use error::{ModelError, ModelResult};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::core::config::ModelConfig;

/// Identifier for a cacheable heavy resource.
///
/// Closed set: adding a resource means adding a variant here and a loader
/// arm in [`ModelCache::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelId {
    /// The text embedding encoder
    TextEncoder,
}

/// Internal state for a cached resource
struct CacheEntry {
    encoder: Arc<TextEncoder>,
    loaded_at: Instant,
    last_used: Instant,
    use_count: u64,
}

/// Summary of a cached resource, for diagnostics
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: ModelId,
    pub idle: Duration,
    pub use_count: u64,
}

/// TTL cache of loaded heavy resources.
///
/// Load-on-first-use; entries idle beyond the TTL are removed by
/// [`ModelCache::evict_idle`], which the periodic monitor calls. Guards
/// returned by [`ModelCache::acquire`] hold the underlying `Arc`, so an
/// eviction never invalidates an encoder that is still in use.
pub struct ModelCache {
    config: ModelConfig,
    entries: Mutex<HashMap<ModelId, CacheEntry>>,
}

impl ModelCache {
    /// Create an empty cache
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a resource, loading it on first use.
    ///
    /// Refreshes the last-used timestamp and returns a guard that keeps the
    /// resource alive for the duration of the computation. The guard
    /// refreshes the timestamp again when dropped, so the idle clock starts
    /// when use ends, not when it begins.
    pub fn acquire(&self, id: ModelId) -> ModelResult<ModelGuard<'_>> {
        let mut entries = self.entries.lock();

        let encoder = match entries.get_mut(&id) {
            Some(entry) => {
                entry.last_used = Instant::now();
                entry.use_count += 1;
                entry.encoder.clone()
            }
            None => {
                let encoder = Arc::new(self.load(id)?);
                let now = Instant::now();
                entries.insert(
                    id,
                    CacheEntry {
                        encoder: encoder.clone(),
                        loaded_at: now,
                        last_used: now,
                        use_count: 1,
                    },
                );
                tracing::info!(model = ?id, "Loaded model into cache");
                encoder
            }
        };

        Ok(ModelGuard {
            cache: self,
            id,
            encoder,
        })
    }

    /// Load a resource from scratch
    fn load(&self, id: ModelId) -> ModelResult<TextEncoder> {
        match id {
            ModelId::TextEncoder => TextEncoder::load(self.config.embedding_dimension),
        }
    }

    /// Remove entries idle longer than the configured TTL.
    ///
    /// Returns the number of entries evicted.
    pub fn evict_idle(&self) -> usize {
        let ttl = self.config.cache_ttl();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|id, entry| {
            let keep = entry.last_used.elapsed() <= ttl;
            if !keep {
                tracing::info!(
                    model = ?id,
                    idle_secs = entry.last_used.elapsed().as_secs(),
                    use_count = entry.use_count,
                    "Evicting idle model"
                );
            }
            keep
        });
        before - entries.len()
    }

    /// Remove every entry unconditionally.
    ///
    /// Returns the number of entries evicted.
    pub fn evict_all(&self) -> usize {
        let mut entries = self.entries.lock();
        let evicted = entries.len();
        if evicted > 0 {
            tracing::info!(evicted, "Evicted all cached models");
        }
        entries.clear();
        evicted
    }

    /// Number of currently cached resources
    pub fn loaded_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether a resource is currently cached
    pub fn is_loaded(&self, id: ModelId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Diagnostic summaries of all cached resources
    pub fn loaded_models(&self) -> Vec<ModelInfo> {
        let entries = self.entries.lock();
        entries
            .iter()
            .map(|(id, entry)| ModelInfo {
                id: *id,
                idle: entry.last_used.elapsed(),
                use_count: entry.use_count,
            })
            .collect()
    }

    /// Refresh the last-used timestamp if the entry is still cached
    fn touch(&self, id: ModelId) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&id) {
            entry.last_used = Instant::now();
        }
    }

    /// How long ago a cached resource was loaded, if present
    pub fn loaded_ago(&self, id: ModelId) -> Option<Duration> {
        let entries = self.entries.lock();
        entries.get(&id).map(|e| e.loaded_at.elapsed())
    }
}

/// Scoped handle to a cached resource.
///
/// Derefs to the encoder; holds the `Arc` so the resource survives any
/// concurrent eviction until the guard is dropped.
pub struct ModelGuard<'a> {
    cache: &'a ModelCache,
    id: ModelId,
    encoder: Arc<TextEncoder>,
}

impl std::ops::Deref for ModelGuard<'_> {
    type Target = TextEncoder;

    fn deref(&self) -> &TextEncoder {
        &self.encoder
    }
}

impl Drop for ModelGuard<'_> {
    fn drop(&mut self) {
        self.cache.touch(self.id);
    }
}
