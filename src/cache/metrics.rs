use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tracks counters for the loading coordinator
#[derive(Debug, Default)]
pub struct LoaderMetrics {
    load_times: RwLock<HashMap<String, Duration>>,
    load_counts: RwLock<HashMap<String, u64>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    relinks: AtomicU64,
    dispatches: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
}

impl LoaderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record how long one bundle took from dispatch to finalize
    pub fn record_load_time(&self, bundle: String, duration: Duration) {
        *self.load_counts.write().entry(bundle.clone()).or_insert(0) += 1;
        self.load_times.write().insert(bundle, duration);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relink(&self) {
        self.relinks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the cache hit rate as a percentage
    pub fn cache_hit_rate(&self) -> f32 {
        let hits = self.cache_hits.load(Ordering::Relaxed) as f32;
        let misses = self.cache_misses.load(Ordering::Relaxed) as f32;

        if hits + misses > 0.0 {
            hits / (hits + misses) * 100.0
        } else {
            0.0
        }
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn relinks(&self) -> u64 {
        self.relinks.load(Ordering::Relaxed)
    }

    pub fn dispatches(&self) -> u64 {
        self.dispatches.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Most recent load time for a bundle
    pub fn last_load_time(&self, bundle: &str) -> Option<Duration> {
        self.load_times.read().get(bundle).cloned()
    }

    /// Get the load count for a bundle
    pub fn load_count(&self, bundle: &str) -> u64 {
        *self.load_counts.read().get(bundle).unwrap_or(&0)
    }
}

/// A thread-safe wrapper around LoaderMetrics
#[derive(Debug, Clone, Default)]
pub struct LoaderMetricsHandle(Arc<LoaderMetrics>);

impl LoaderMetricsHandle {
    pub fn new() -> Self {
        Self(Arc::new(LoaderMetrics::new()))
    }
}

impl std::ops::Deref for LoaderMetricsHandle {
    type Target = LoaderMetrics;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
