//! Mock bundle backend for testing
//!
//! Holds object factories in memory, completes requests after a fixed
//! number of polls and counts every dispatch and unload so tests can check
//! deduplication and eviction without a real decoder.

use super::{BundleBackend, BundleRequest};
use crate::identity::{AssetKey, AssetObject, AssetType, AuxiliaryObject, BundleId};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Factory = Arc<dyn Fn() -> AssetObject + Send + Sync>;

struct MockEntry {
    main: Factory,
    auxiliary: Vec<(BundleId, Factory)>,
}

#[derive(Default)]
struct MockBackendInner {
    entries: RwLock<HashMap<AssetKey, MockEntry>>,
    dependencies: RwLock<HashMap<BundleId, Vec<BundleId>>>,
    failures: RwLock<HashMap<BundleId, String>>,
    panicking: RwLock<HashSet<BundleId>>,
    residency: Mutex<HashMap<BundleId, usize>>,
    unloads: Mutex<HashMap<BundleId, usize>>,
    dispatches: Mutex<HashMap<AssetKey, usize>>,
    completion_polls: AtomicUsize,
}

/// Mock bundle backend
///
/// Clones share state, so a test can keep one clone for assertions while
/// the coordinator owns another.
#[derive(Clone)]
pub struct MockBackend {
    inner: Arc<MockBackendInner>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("objects", &self.inner.entries.read().len())
            .field("total_dispatches", &self.total_dispatches())
            .finish()
    }
}

impl MockBackend {
    /// Create a backend whose requests finish on their first poll
    pub fn new() -> Self {
        let inner = MockBackendInner::default();
        inner.completion_polls.store(1, Ordering::Relaxed);
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Requests report done on their `polls`-th `is_done` call
    pub fn with_completion_polls(self, polls: usize) -> Self {
        self.inner
            .completion_polls
            .store(polls.max(1), Ordering::Relaxed);
        self
    }

    /// Register an object; every load hands out a fresh clone of `value`
    pub fn insert<T>(&self, bundle: impl Into<BundleId>, object: &str, value: T)
    where
        T: Any + Clone + Send + Sync,
    {
        let key = AssetKey::new(bundle, object);
        self.inner.entries.write().insert(
            key,
            MockEntry {
                main: Arc::new(move || Arc::new(value.clone()) as AssetObject),
                auxiliary: Vec::new(),
            },
        );
    }

    /// Attach a secondary object decoded from `origin` to an existing entry
    pub fn add_auxiliary<T>(&self, key: &AssetKey, origin: impl Into<BundleId>, value: T)
    where
        T: Any + Clone + Send + Sync,
    {
        let origin = origin.into();
        if let Some(entry) = self.inner.entries.write().get_mut(key) {
            entry
                .auxiliary
                .push((origin, Arc::new(move || Arc::new(value.clone()) as AssetObject)));
        }
    }

    /// Attach an auxiliary object owned by the caller
    ///
    /// Loads hand out `object` itself while the caller keeps it alive, so
    /// tests control its liveness. The backend holds only a weak reference.
    pub fn add_shared_auxiliary(&self, key: &AssetKey, origin: impl Into<BundleId>, object: &AssetObject) {
        let origin = origin.into();
        let weak = Arc::downgrade(object);
        if let Some(entry) = self.inner.entries.write().get_mut(key) {
            entry.auxiliary.push((
                origin,
                Arc::new(move || weak.upgrade().unwrap_or_else(|| Arc::new(()) as AssetObject)),
            ));
        }
    }

    pub fn set_dependencies(&self, bundle: impl Into<BundleId>, dependencies: Vec<BundleId>) {
        self.inner
            .dependencies
            .write()
            .insert(bundle.into(), dependencies);
    }

    /// Every request against `bundle` finishes with `message` as its error
    pub fn fail_bundle(&self, bundle: impl Into<BundleId>, message: &str) {
        self.inner
            .failures
            .write()
            .insert(bundle.into(), message.to_string());
    }

    /// Every request against `bundle` panics inside `load_async`
    pub fn panic_on(&self, bundle: impl Into<BundleId>) {
        self.inner.panicking.write().insert(bundle.into());
    }

    /// Number of `load_async` calls for one key
    pub fn dispatch_count(&self, key: &AssetKey) -> usize {
        *self.inner.dispatches.lock().get(key).unwrap_or(&0)
    }

    pub fn total_dispatches(&self) -> usize {
        self.inner.dispatches.lock().values().sum()
    }

    /// Number of `unload` calls for one bundle
    pub fn unload_count(&self, bundle: &BundleId) -> usize {
        *self.inner.unloads.lock().get(bundle).unwrap_or(&0)
    }

    /// Outstanding load references on one bundle
    pub fn residency(&self, bundle: &BundleId) -> usize {
        *self.inner.residency.lock().get(bundle).unwrap_or(&0)
    }
}

impl BundleBackend for MockBackend {
    type Request = MockRequest;

    fn load_async(&self, key: &AssetKey, _asset_type: AssetType) -> Self::Request {
        *self.inner.dispatches.lock().entry(key.clone()).or_insert(0) += 1;

        if self.inner.panicking.read().contains(&key.bundle) {
            panic!("mock backend asked to panic for {key}");
        }

        let completion_polls = self.inner.completion_polls.load(Ordering::Relaxed);

        if let Some(message) = self.inner.failures.read().get(&key.bundle) {
            return MockRequest::new(completion_polls, None, Vec::new(), Some(message.clone()));
        }

        let entries = self.inner.entries.read();
        match entries.get(key) {
            Some(entry) => {
                *self
                    .inner
                    .residency
                    .lock()
                    .entry(key.bundle.clone())
                    .or_insert(0) += 1;

                let auxiliary = entry
                    .auxiliary
                    .iter()
                    .map(|(origin, factory)| AuxiliaryObject {
                        origin: origin.clone(),
                        object: factory(),
                    })
                    .collect();
                MockRequest::new(completion_polls, Some((entry.main)()), auxiliary, None)
            }
            None => MockRequest::new(completion_polls, None, Vec::new(), None),
        }
    }

    fn dependencies(&self, bundle: &BundleId) -> Vec<BundleId> {
        self.inner
            .dependencies
            .read()
            .get(bundle)
            .cloned()
            .unwrap_or_default()
    }

    fn is_resident(&self, bundle: &BundleId) -> bool {
        self.residency(bundle) > 0
    }

    fn unload(&self, bundle: &BundleId) {
        *self.inner.unloads.lock().entry(bundle.clone()).or_insert(0) += 1;

        let mut residency = self.inner.residency.lock();
        if let Some(count) = residency.get_mut(bundle) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                residency.remove(bundle);
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "Mock"
    }
}

/// Mock request that completes after a fixed number of polls
pub struct MockRequest {
    polls: AtomicUsize,
    completion_polls: usize,
    asset: Option<AssetObject>,
    auxiliary: Vec<AuxiliaryObject>,
    error: Option<String>,
}

impl MockRequest {
    fn new(
        completion_polls: usize,
        asset: Option<AssetObject>,
        auxiliary: Vec<AuxiliaryObject>,
        error: Option<String>,
    ) -> Self {
        Self {
            polls: AtomicUsize::new(0),
            completion_polls,
            asset,
            auxiliary,
            error,
        }
    }
}

impl BundleRequest for MockRequest {
    fn is_done(&self) -> bool {
        let polls = self.polls.fetch_add(1, Ordering::Relaxed) + 1;
        polls >= self.completion_polls
    }

    fn asset(&self) -> Option<AssetObject> {
        self.asset.clone()
    }

    fn auxiliary(&self) -> Vec<AuxiliaryObject> {
        self.auxiliary.clone()
    }

    fn error(&self) -> Option<String> {
        self.error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_backend_load_and_residency() {
        let backend = MockBackend::new();
        backend.insert("bundle_a", "obj_a", 10u32);
        let key = AssetKey::new("bundle_a", "obj_a");

        let request = backend.load_async(&key, AssetType::of::<u32>());
        assert!(request.is_done());
        assert!(request.asset().is_some());
        assert_eq!(backend.dispatch_count(&key), 1);
        assert!(backend.is_resident(&key.bundle));

        backend.unload(&key.bundle);
        assert!(!backend.is_resident(&key.bundle));
        assert_eq!(backend.unload_count(&key.bundle), 1);
    }

    #[test]
    fn test_mock_request_completion_polls() {
        let backend = MockBackend::new().with_completion_polls(3);
        backend.insert("bundle_a", "obj_a", 10u32);

        let request = backend.load_async(&AssetKey::new("bundle_a", "obj_a"), AssetType::of::<u32>());
        assert!(!request.is_done());
        assert!(!request.is_done());
        assert!(request.is_done());
    }

    #[test]
    fn test_mock_backend_missing_object() {
        let backend = MockBackend::new();
        let key = AssetKey::new("bundle_a", "missing");

        let request = backend.load_async(&key, AssetType::of::<u32>());
        assert!(request.asset().is_none());
        assert!(request.error().is_none());
        assert!(!backend.is_resident(&key.bundle));
    }

    #[test]
    fn test_mock_backend_failure() {
        let backend = MockBackend::new();
        backend.insert("bundle_a", "obj_a", 10u32);
        backend.fail_bundle("bundle_a", "corrupt header");

        let request = backend.load_async(&AssetKey::new("bundle_a", "obj_a"), AssetType::of::<u32>());
        assert!(request.asset().is_none());
        assert_eq!(request.error().as_deref(), Some("corrupt header"));
    }
}
