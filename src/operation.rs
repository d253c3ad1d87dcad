//! Loading operations and their state machine
//!
//! A [`LoadingOperation`] is a cheap, cloneable handle. Every caller that
//! asked for the same [`AssetKey`] while the load was outstanding holds a
//! clone of the same handle, so they all observe one consistent progression:
//! `Pending -> Active -> Finished`.

use crate::error::LoadError;
use crate::identity::{AssetKey, AssetObject, AssetType, BundleId};
use parking_lot::Mutex;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Outcome stored in a finished operation
pub type LoadResult = Result<AssetObject, LoadError>;

type CompletionCallback = Box<dyn FnOnce(&LoadResult) + Send>;

/// A request to load one object of an expected type
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadRequest {
    pub key: AssetKey,
    pub asset_type: AssetType,
}

impl LoadRequest {
    pub fn new(key: AssetKey, asset_type: AssetType) -> Self {
        Self { key, asset_type }
    }

    /// Request an object of type `T`; an empty object name uses the bundle's base name
    pub fn of<T: std::any::Any>(bundle: impl Into<BundleId>, object: impl Into<String>) -> Self {
        Self::new(AssetKey::new(bundle, object), AssetType::of::<T>())
    }
}

/// Represents the current state of a load
#[derive(Clone)]
pub enum LoadState {
    /// Registered but not yet dispatched to the backend
    Pending,

    /// Dispatched, waiting for the backend to report done
    Active,

    /// Terminal; holds the object or the reason there is none
    Finished(LoadResult),
}

impl std::fmt::Debug for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadState::Pending => f.write_str("Pending"),
            LoadState::Active => f.write_str("Active"),
            LoadState::Finished(Ok(_)) => f.write_str("Finished(Ok)"),
            LoadState::Finished(Err(e)) => write!(f, "Finished(Err({e}))"),
        }
    }
}

struct OperationState {
    phase: LoadState,
    callbacks: Vec<CompletionCallback>,
    wakers: Vec<Waker>,
}

struct OperationInner {
    key: AssetKey,
    asset_type: AssetType,
    state: Mutex<OperationState>,
}

/// Handle to an outstanding or finished load
#[derive(Clone)]
pub struct LoadingOperation {
    inner: Arc<OperationInner>,
}

impl std::fmt::Debug for LoadingOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadingOperation")
            .field("key", &self.inner.key)
            .field("state", &self.inner.state.lock().phase)
            .finish()
    }
}

impl LoadingOperation {
    pub(crate) fn pending(key: AssetKey, asset_type: AssetType) -> Self {
        Self::with_phase(key, asset_type, LoadState::Pending)
    }

    pub(crate) fn finished(key: AssetKey, asset_type: AssetType, result: LoadResult) -> Self {
        Self::with_phase(key, asset_type, LoadState::Finished(result))
    }

    fn with_phase(key: AssetKey, asset_type: AssetType, phase: LoadState) -> Self {
        Self {
            inner: Arc::new(OperationInner {
                key,
                asset_type,
                state: Mutex::new(OperationState {
                    phase,
                    callbacks: Vec::new(),
                    wakers: Vec::new(),
                }),
            }),
        }
    }

    pub fn key(&self) -> &AssetKey {
        &self.inner.key
    }

    pub fn asset_type(&self) -> AssetType {
        self.inner.asset_type
    }

    /// Get the current load state
    pub fn state(&self) -> LoadState {
        self.inner.state.lock().phase.clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.inner.state.lock().phase, LoadState::Pending)
    }

    pub fn is_active(&self) -> bool {
        matches!(self.inner.state.lock().phase, LoadState::Active)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.inner.state.lock().phase, LoadState::Finished(_))
    }

    /// The result, once finished
    pub fn result(&self) -> Option<LoadResult> {
        match &self.inner.state.lock().phase {
            LoadState::Finished(result) => Some(result.clone()),
            _ => None,
        }
    }

    /// The loaded object, if finished successfully
    pub fn asset(&self) -> Option<AssetObject> {
        match &self.inner.state.lock().phase {
            LoadState::Finished(Ok(object)) => Some(Arc::clone(object)),
            _ => None,
        }
    }

    /// Whether two handles refer to the same operation
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Run `callback` once the operation finishes
    ///
    /// Runs immediately if it already has. A panicking callback is logged
    /// and does not affect the operation or other subscribers.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&LoadResult) + Send + 'static,
    {
        let result = {
            let mut state = self.inner.state.lock();
            match &state.phase {
                LoadState::Finished(result) => result.clone(),
                _ => {
                    state.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        run_guarded(&self.inner.key, Box::new(callback), &result);
    }

    /// Pending -> Active; ignored in any other state
    pub(crate) fn mark_active(&self) {
        let mut state = self.inner.state.lock();
        if matches!(state.phase, LoadState::Pending) {
            state.phase = LoadState::Active;
        }
    }

    /// Move to Finished and notify subscribers
    ///
    /// Returns `false` if the operation had already finished; the first
    /// result is kept.
    pub(crate) fn finish(&self, result: LoadResult) -> bool {
        let (callbacks, wakers) = {
            let mut state = self.inner.state.lock();
            if matches!(state.phase, LoadState::Finished(_)) {
                log::warn!("Operation for {} finished twice", self.inner.key);
                return false;
            }
            state.phase = LoadState::Finished(result.clone());
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.wakers),
            )
        };

        for callback in callbacks {
            run_guarded(&self.inner.key, callback, &result);
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }
}

fn run_guarded(key: &AssetKey, callback: CompletionCallback, result: &LoadResult) {
    if catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
        log::error!("Completion callback for {key} panicked");
    }
}

impl Future for LoadingOperation {
    type Output = LoadResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.state.lock();
        match &state.phase {
            LoadState::Finished(result) => Poll::Ready(result.clone()),
            _ => {
                if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    state.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}
