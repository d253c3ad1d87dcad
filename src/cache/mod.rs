//! Loading coordinator: deduplicated, tick-driven loads over a weak cache
//!
//! Every request is keyed by [`AssetKey`]. A key lives in exactly one of
//! four places at a time: the cache (finished, tracked weakly), the
//! finalizing set (done, result not yet cached), the active set (admitted,
//! maybe dispatched) or the backlog (registered, not yet admitted). `load`
//! checks them in that order before creating anything.
//!
//! The host drives [`LoadingCoordinator::tick`] once per frame. Each tick
//! flushes the backlog into the active set, finalizes requests the backend
//! reports done, and dispatches a bounded number of new requests. Cached
//! entries are evicted by [`LoadingCoordinator::sweep`] once neither their
//! main object nor any auxiliary object is alive.

pub mod entry;
pub mod metrics;

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backend::{BundleBackend, BundleRequest, LivenessProbe, StrongCountProbe};
use crate::error::LoadError;
use crate::host::{HostHooks, LoadingPriority, NullHost};
use crate::identity::{AssetKey, AssetObject, AssetType, BundleId};
use crate::operation::{LoadRequest, LoadResult, LoadingOperation};

pub use entry::{AuxiliaryRef, CachedEntry, DependencyClosure};
pub use metrics::{LoaderMetrics, LoaderMetricsHandle};

/// Tuning for the coordinator loop and the liveness sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Undispatched requests handed to the backend per tick (minimum 1)
    pub max_dispatch_per_tick: usize,

    /// Seconds between sweeps triggered through `sweep_if_due`
    pub sweep_interval_secs: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_dispatch_per_tick: 1,
            sweep_interval_secs: 5.0,
        }
    }
}

impl CoordinatorConfig {
    /// Negative values mean zero, values past `Duration::MAX` (such as `inf`) mean never
    pub fn sweep_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.sweep_interval_secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}

struct InFlight<R> {
    op: LoadingOperation,
    request: Option<R>,
    dispatched_at: Option<Instant>,
    /// Bundle whose stale load reference is released once this load finalizes
    superseded: Option<BundleId>,
    failure: Option<String>,
}

impl<R> InFlight<R> {
    fn new(op: LoadingOperation, superseded: Option<BundleId>) -> Self {
        Self {
            op,
            request: None,
            dispatched_at: None,
            superseded,
            failure: None,
        }
    }
}

struct CoordinatorState<R> {
    cache: HashMap<AssetKey, CachedEntry>,
    /// Taken out of `active` this tick, still visible to `load` until cached
    finalizing: HashMap<AssetKey, LoadingOperation>,
    active: HashMap<AssetKey, InFlight<R>>,
    undispatched: VecDeque<AssetKey>,
}

struct Backlog<R> {
    slots: HashMap<AssetKey, InFlight<R>>,
    order: Vec<AssetKey>,
}

impl<R> Backlog<R> {
    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Central async cache over a [`BundleBackend`]
///
/// Lock order is always `state` then `backlog`. The backlog has its own
/// lock because callers may enqueue from a context other than the tick.
pub struct LoadingCoordinator<B: BundleBackend> {
    backend: B,
    probe: Arc<dyn LivenessProbe>,
    host: Arc<dyn HostHooks>,
    config: CoordinatorConfig,
    metrics: LoaderMetricsHandle,
    state: Mutex<CoordinatorState<B::Request>>,
    backlog: Mutex<Backlog<B::Request>>,
    running: AtomicBool,
    last_sweep: Mutex<Instant>,
}

impl<B: BundleBackend> LoadingCoordinator<B> {
    /// Creates a coordinator with default config, strong-count liveness and no host hooks
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            probe: Arc::new(StrongCountProbe),
            host: Arc::new(NullHost),
            config: CoordinatorConfig::default(),
            metrics: LoaderMetricsHandle::new(),
            state: Mutex::new(CoordinatorState {
                cache: HashMap::new(),
                finalizing: HashMap::new(),
                active: HashMap::new(),
                undispatched: VecDeque::new(),
            }),
            backlog: Mutex::new(Backlog {
                slots: HashMap::new(),
                order: Vec::new(),
            }),
            running: AtomicBool::new(false),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_host(mut self, host: Arc<dyn HostHooks>) -> Self {
        self.host = host;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &LoaderMetricsHandle {
        &self.metrics
    }

    /// Whether the tick loop has outstanding work
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn cached_count(&self) -> usize {
        self.state.lock().cache.len()
    }

    /// Requests in the active set plus the backlog
    pub fn in_flight_count(&self) -> usize {
        let state = self.state.lock();
        let backlog = self.backlog.lock();
        state.finalizing.len() + state.active.len() + backlog.order.len()
    }

    /// Whether a cache entry exists for `key`, alive or not
    pub fn is_cached(&self, key: &AssetKey) -> bool {
        self.state.lock().cache.contains_key(key)
    }

    /// Load one object; an empty `object` uses the bundle's base name
    pub fn load_async(
        &self,
        bundle: &BundleId,
        object: &str,
        asset_type: AssetType,
    ) -> LoadingOperation {
        self.load(LoadRequest::new(
            AssetKey::new(bundle.clone(), object),
            asset_type,
        ))
    }

    /// Load one object, reusing any cached or outstanding operation for its key
    pub fn load(&self, request: LoadRequest) -> LoadingOperation {
        let LoadRequest { key, asset_type } = request;
        let mut state = self.state.lock();

        let cached = state
            .cache
            .get(&key)
            .map(|entry| entry.upgrade_main(&*self.probe));
        if let Some(Some(object)) = cached {
            self.metrics.record_cache_hit();
            log::trace!("Cache hit for {key}");
            return LoadingOperation::finished(key, asset_type, Ok(object));
        }

        if let Some(op) = state.finalizing.get(&key) {
            return op.clone();
        }
        if let Some(in_flight) = state.active.get(&key) {
            return in_flight.op.clone();
        }

        let mut backlog = self.backlog.lock();
        if let Some(in_flight) = backlog.slots.get(&key) {
            return in_flight.op.clone();
        }

        // Main object is gone; the stale load reference is handed to the
        // replacing operation.
        let superseded = match cached {
            Some(_) => {
                state.cache.remove(&key);
                Some(key.bundle.clone())
            }
            None => None,
        };

        if superseded.is_some() && self.backend.is_resident(&key.bundle) {
            self.metrics.record_relink();
            log::debug!("Re-linking {key} from resident bundle data");
        } else {
            self.metrics.record_cache_miss();
            log::trace!("Cache miss for {key}");
        }

        let op = LoadingOperation::pending(key.clone(), asset_type);
        backlog
            .slots
            .insert(key.clone(), InFlight::new(op.clone(), superseded));
        backlog.order.push(key);
        drop(backlog);
        drop(state);

        if !self.running.swap(true, Ordering::AcqRel) {
            log::debug!("Loading loop started");
            self.host.set_loading_priority(LoadingPriority::High);
        }
        op
    }

    /// Advance the loading loop by one step
    ///
    /// Does nothing while the loop is stopped.
    pub fn tick(&self) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }

        let now = Instant::now();
        let mut finished = Vec::new();
        let stopped;
        {
            let mut state = self.state.lock();

            {
                let mut backlog = self.backlog.lock();
                let Backlog { slots, order } = &mut *backlog;
                for key in order.drain(..) {
                    if let Some(in_flight) = slots.remove(&key) {
                        state.undispatched.push_back(key.clone());
                        state.active.insert(key, in_flight);
                    }
                }
            }

            let mut done = Vec::new();
            for (key, in_flight) in state.active.iter_mut() {
                let Some(request) = &in_flight.request else {
                    continue;
                };
                match catch_unwind(AssertUnwindSafe(|| request.is_done())) {
                    Ok(true) => done.push(key.clone()),
                    Ok(false) => {}
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        log::error!("Polling {key} panicked: {message}");
                        in_flight.failure = Some(message);
                        done.push(key.clone());
                    }
                }
            }
            for key in done {
                if let Some(in_flight) = state.active.remove(&key) {
                    state.finalizing.insert(key.clone(), in_flight.op.clone());
                    finished.push((key, in_flight));
                }
            }

            let mut dispatched = 0;
            while dispatched < self.config.max_dispatch_per_tick.max(1) {
                let Some(key) = state.undispatched.pop_front() else {
                    break;
                };
                let Some(asset_type) = state.active.get(&key).map(|f| f.op.asset_type()) else {
                    continue;
                };
                dispatched += 1;
                self.metrics.record_dispatch();
                log::trace!("Dispatching {key}");

                match catch_unwind(AssertUnwindSafe(|| self.backend.load_async(&key, asset_type))) {
                    Ok(request) => {
                        if let Some(in_flight) = state.active.get_mut(&key) {
                            in_flight.request = Some(request);
                            in_flight.dispatched_at = Some(now);
                            in_flight.op.mark_active();
                        }
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        log::error!("Dispatching {key} panicked: {message}");
                        if let Some(mut in_flight) = state.active.remove(&key) {
                            in_flight.failure = Some(message);
                            state.finalizing.insert(key.clone(), in_flight.op.clone());
                            finished.push((key, in_flight));
                        }
                    }
                }
            }

            stopped = state.active.is_empty() && self.backlog.lock().is_empty();
            if stopped {
                self.running.store(false, Ordering::Release);
            }
        }

        if stopped {
            log::debug!("Loading loop idle");
            self.host.set_loading_priority(LoadingPriority::Normal);
        }

        for (key, in_flight) in finished {
            self.finalize(key, in_flight, now);
        }
    }

    fn finalize(&self, key: AssetKey, in_flight: InFlight<B::Request>, now: Instant) {
        let InFlight {
            op,
            request,
            dispatched_at,
            superseded,
            failure,
        } = in_flight;

        let outcome = match (failure, request) {
            (Some(message), _) => Err(internal_error(&key, message)),
            (None, Some(request)) => {
                catch_unwind(AssertUnwindSafe(|| self.collect(&key, &request)))
                    .unwrap_or_else(|payload| {
                        Err(internal_error(&key, panic_message(payload.as_ref())))
                    })
            }
            (None, None) => Err(internal_error(&key, "finalized before dispatch".into())),
        };

        // Leaves the finalizing set only once the entry is visible in the
        // cache. A failed key becomes loadable again right away.
        let result: LoadResult = match outcome {
            Ok((object, entry)) => {
                let replaced = {
                    let mut state = self.state.lock();
                    state.finalizing.remove(&key);
                    state.cache.insert(key.clone(), entry)
                };
                if let Some(replaced) = replaced {
                    self.release(replaced.bundle());
                }
                if let Some(started) = dispatched_at {
                    self.metrics
                        .record_load_time(key.bundle.to_string(), now.duration_since(started));
                }
                log::debug!("Loaded {key}");
                Ok(object)
            }
            Err(error) => {
                self.state.lock().finalizing.remove(&key);
                self.metrics.record_failure();
                log::warn!("{error}");
                Err(error)
            }
        };

        if let Some(stale) = superseded {
            self.release(&stale);
        }

        op.finish(result);
    }

    fn collect(
        &self,
        key: &AssetKey,
        request: &B::Request,
    ) -> Result<(AssetObject, CachedEntry), LoadError> {
        let error = request.error();
        let Some(object) = request.asset() else {
            return Err(match error {
                Some(message) => LoadError::Backend {
                    bundle: key.bundle.to_string(),
                    object: key.object.clone(),
                    message,
                },
                None => LoadError::NotFound {
                    bundle: key.bundle.to_string(),
                    object: key.object.clone(),
                },
            });
        };
        if let Some(message) = error {
            log::warn!("{key} loaded with a backend warning: {message}");
        }

        let closure = DependencyClosure::compute(&self.backend, &key.bundle);
        let entry = CachedEntry::new(key.clone(), &object, &request.auxiliary(), &closure);
        Ok((object, entry))
    }

    /// Evict every entry whose main and auxiliary objects are all dead
    ///
    /// Dead or shared auxiliary references are pruned first. Each evicted
    /// entry releases exactly one load reference. Returns the eviction count.
    pub fn sweep(&self) -> usize {
        let mut evicted = Vec::new();
        {
            let mut state = self.state.lock();
            let probe = &*self.probe;
            let mut closures: HashMap<BundleId, DependencyClosure> = HashMap::new();

            for entry in state.cache.values_mut() {
                let closure = closures
                    .entry(entry.bundle().clone())
                    .or_insert_with(|| DependencyClosure::compute(&self.backend, entry.bundle()));
                entry.prune_auxiliary(probe, closure);
            }

            state.cache.retain(|key, entry| {
                if entry.is_referenced(probe) {
                    true
                } else {
                    evicted.push(key.clone());
                    false
                }
            });
        }
        *self.last_sweep.lock() = Instant::now();

        for key in &evicted {
            log::debug!("Evicting {key}");
            self.metrics.record_eviction();
            self.release(&key.bundle);
        }
        evicted.len()
    }

    /// Sweep if `sweep_interval` has passed since the last sweep
    pub fn sweep_if_due(&self, now: Instant) -> Option<usize> {
        let due = {
            let last = self.last_sweep.lock();
            now.saturating_duration_since(*last) >= self.config.sweep_interval()
        };
        if due {
            Some(self.sweep())
        } else {
            None
        }
    }

    /// Drop one cached entry and release its load reference
    pub fn unload_asset(&self, key: &AssetKey) -> bool {
        let removed = self.state.lock().cache.remove(key);
        match removed {
            Some(entry) => {
                self.metrics.record_eviction();
                self.release(entry.bundle());
                true
            }
            None => false,
        }
    }

    /// Drop every cached entry of a bundle, one release per entry
    pub fn unload_bundle(&self, bundle: &BundleId) -> usize {
        let removed: Vec<AssetKey> = {
            let mut state = self.state.lock();
            let keys: Vec<AssetKey> = state
                .cache
                .keys()
                .filter(|key| &key.bundle == bundle)
                .cloned()
                .collect();
            for key in &keys {
                state.cache.remove(key);
            }
            keys
        };

        for _ in &removed {
            self.metrics.record_eviction();
            self.release(bundle);
        }
        if removed.is_empty() {
            log::debug!("unload_bundle({bundle}) found nothing cached");
        }
        removed.len()
    }

    fn release(&self, bundle: &BundleId) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.backend.unload(bundle))) {
            log::error!(
                "Unloading {bundle} panicked: {}",
                panic_message(payload.as_ref())
            );
        }
    }
}

fn internal_error(key: &AssetKey, message: String) -> LoadError {
    LoadError::Internal {
        bundle: key.bundle.to_string(),
        object: key.object.clone(),
        message,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
