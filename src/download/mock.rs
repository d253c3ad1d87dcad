//! Scriptable transfer backend for tests and demos

use super::manifest::ContentHash;
use super::transfer::{TransferBackend, TransferHandle};
use crate::identity::BundleId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct TransferState {
    hash: ContentHash,
    done: bool,
    progress: Option<f32>,
    error: Option<String>,
    aborted: bool,
}

#[derive(Debug, Default)]
struct MockTransferInner {
    stored: Mutex<HashMap<BundleId, ContentHash>>,
    transfers: Mutex<HashMap<BundleId, Arc<Mutex<TransferState>>>>,
    fetched: Mutex<Vec<(BundleId, String)>>,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    auto_complete: bool,
}

/// Transfer backend whose transfers finish only when told to
///
/// Cloning shares state, so a test keeps one clone and hands the other to
/// the scheduler.
#[derive(Debug, Clone, Default)]
pub struct MockTransferBackend {
    inner: Arc<MockTransferInner>,
}

impl MockTransferBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transfers succeed as soon as they are started
    pub fn auto_complete() -> Self {
        Self {
            inner: Arc::new(MockTransferInner {
                auto_complete: true,
                ..Default::default()
            }),
        }
    }

    /// Pretend `bundle` is already stored at `hash`
    pub fn store(&self, bundle: impl Into<BundleId>, hash: impl Into<ContentHash>) {
        self.inner.stored.lock().insert(bundle.into(), hash.into());
    }

    pub fn complete(&self, bundle: impl Into<BundleId>) {
        let bundle = bundle.into();
        if let Some(state) = self.transfer(&bundle) {
            let mut state = state.lock();
            state.done = true;
            state.progress = Some(1.0);
            self.inner.stored.lock().insert(bundle, state.hash.clone());
        }
    }

    pub fn fail(&self, bundle: impl Into<BundleId>, message: &str) {
        if let Some(state) = self.transfer(&bundle.into()) {
            let mut state = state.lock();
            state.done = true;
            state.error = Some(message.to_string());
        }
    }

    pub fn set_progress(&self, bundle: impl Into<BundleId>, progress: f32) {
        if let Some(state) = self.transfer(&bundle.into()) {
            state.lock().progress = Some(progress);
        }
    }

    /// Make a transfer report no progress at all
    pub fn hide_progress(&self, bundle: impl Into<BundleId>) {
        if let Some(state) = self.transfer(&bundle.into()) {
            state.lock().progress = None;
        }
    }

    pub fn was_aborted(&self, bundle: impl Into<BundleId>) -> bool {
        self.transfer(&bundle.into())
            .is_some_and(|state| state.lock().aborted)
    }

    pub fn fetch_count(&self) -> usize {
        self.inner.fetched.lock().len()
    }

    /// Bundles fetched so far, in start order
    pub fn fetched(&self) -> Vec<BundleId> {
        self.inner.fetched.lock().iter().map(|(b, _)| b.clone()).collect()
    }

    pub fn urls(&self) -> Vec<String> {
        self.inner.fetched.lock().iter().map(|(_, u)| u.clone()).collect()
    }

    /// Handles currently alive
    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Most handles ever alive at once
    pub fn peak_concurrent(&self) -> usize {
        self.inner.peak_active.load(Ordering::SeqCst)
    }

    fn transfer(&self, bundle: &BundleId) -> Option<Arc<Mutex<TransferState>>> {
        self.inner.transfers.lock().get(bundle).cloned()
    }
}

impl TransferBackend for MockTransferBackend {
    type Handle = MockTransfer;

    fn fetch(&self, bundle: &BundleId, url: &str, hash: &ContentHash) -> MockTransfer {
        self.inner
            .fetched
            .lock()
            .push((bundle.clone(), url.to_string()));
        let active = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_active.fetch_max(active, Ordering::SeqCst);

        let auto = self.inner.auto_complete;
        let state = Arc::new(Mutex::new(TransferState {
            hash: hash.clone(),
            done: auto,
            progress: Some(if auto { 1.0 } else { 0.0 }),
            error: None,
            aborted: false,
        }));
        if auto {
            self.inner.stored.lock().insert(bundle.clone(), hash.clone());
        }
        self.inner
            .transfers
            .lock()
            .insert(bundle.clone(), Arc::clone(&state));

        MockTransfer {
            state,
            backend: Arc::clone(&self.inner),
        }
    }

    fn is_up_to_date(&self, bundle: &BundleId, hash: &ContentHash) -> bool {
        self.inner.stored.lock().get(bundle) == Some(hash)
    }

    fn backend_name(&self) -> &'static str {
        "Mock"
    }
}

/// Handle onto one scripted transfer
#[derive(Debug)]
pub struct MockTransfer {
    state: Arc<Mutex<TransferState>>,
    backend: Arc<MockTransferInner>,
}

impl TransferHandle for MockTransfer {
    fn is_done(&self) -> bool {
        self.state.lock().done
    }

    fn progress(&self) -> Option<f32> {
        self.state.lock().progress
    }

    fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    fn abort(&mut self) {
        let mut state = self.state.lock();
        state.aborted = true;
        state.done = true;
        state.error.get_or_insert_with(|| "aborted".to_string());
    }
}

impl Drop for MockTransfer {
    fn drop(&mut self) {
        self.backend.active.fetch_sub(1, Ordering::SeqCst);
    }
}
