//! Cache manager — one [`VideoFrameCache`] per video source.
//!
//! The `VideoCacheManager` handles:
//! - Creating caches lazily the first time a source is requested
//! - Sharing one session factory across all caches
//! - Evicting caches for sources no longer referenced by the timeline

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cl_common::{DecoderConfig, SourceId};
use tracing::info;

use crate::cache::VideoFrameCache;
use crate::session::SessionFactory;

/// Owns the frame caches of all active video sources.
pub struct VideoCacheManager {
    factory: Arc<dyn SessionFactory>,
    caches: HashMap<SourceId, Arc<VideoFrameCache>>,
    prefetch: bool,
}

impl std::fmt::Debug for VideoCacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoCacheManager")
            .field("active_caches", &self.caches.len())
            .field("prefetch", &self.prefetch)
            .finish()
    }
}

impl VideoCacheManager {
    /// Empty manager; caches share `factory` and the prefetch setting.
    pub fn new(factory: Arc<dyn SessionFactory>, config: &DecoderConfig) -> Self {
        Self {
            factory,
            caches: HashMap::new(),
            prefetch: config.prefetch,
        }
    }

    /// The cache for `source`, created uninitialized if absent.
    pub fn get_or_create(&mut self, source: &SourceId) -> Arc<VideoFrameCache> {
        if let Some(cache) = self.caches.get(source) {
            return Arc::clone(cache);
        }
        let cache = Arc::new(VideoFrameCache::new(
            source.clone(),
            Arc::clone(&self.factory),
            self.prefetch,
        ));
        info!(source = %source, "Created frame cache");
        self.caches.insert(source.clone(), Arc::clone(&cache));
        cache
    }

    /// The existing cache for `source`, if any.
    pub fn get(&self, source: &SourceId) -> Option<Arc<VideoFrameCache>> {
        self.caches.get(source).cloned()
    }

    /// Dispose and forget the cache for `source`. Returns `false` if there
    /// was none.
    pub fn destroy(&mut self, source: &SourceId) -> bool {
        match self.caches.remove(source) {
            Some(cache) => {
                cache.dispose();
                info!(source = %source, "Destroyed frame cache");
                true
            }
            None => false,
        }
    }

    /// Dispose every cache whose source is not in `keep`. Returns the number
    /// of caches evicted.
    pub fn retain_sources(&mut self, keep: &HashSet<SourceId>) -> usize {
        let stale: Vec<SourceId> = self
            .caches
            .keys()
            .filter(|source| !keep.contains(*source))
            .cloned()
            .collect();
        for source in &stale {
            self.destroy(source);
        }
        stale.len()
    }

    /// Wait for in-flight prefetches of every cache.
    pub fn settle_all(&self) {
        for cache in self.caches.values() {
            cache.settle();
        }
    }

    /// Number of live caches.
    pub fn active_count(&self) -> usize {
        self.caches.len()
    }

    /// Dispose every cache, cancelling in-flight work.
    pub fn destroy_all(&mut self) {
        let count = self.caches.len();
        for (_, cache) in self.caches.drain() {
            cache.dispose();
        }
        if count > 0 {
            info!(count, "Destroyed all frame caches");
        }
    }
}

impl Drop for VideoCacheManager {
    fn drop(&mut self) {
        self.destroy_all();
    }
}
