//! Preload batches
//!
//! A [`PreloadBatch`] joins any number of outstanding loads into a single
//! completion signal. Requests that are already finished when the batch is
//! built contribute nothing, so a batch of cached content completes on the
//! spot. The [`PreloadAggregator`] polls the remaining batches on the same
//! tick as the coordinator and drops each batch once it has fired.

use crate::backend::BundleBackend;
use crate::cache::LoadingCoordinator;
use crate::operation::{LoadRequest, LoadingOperation};
use parking_lot::Mutex;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

type BatchCallback = Box<dyn FnOnce() + Send>;

struct BatchState {
    fired: bool,
    subscribers: Vec<BatchCallback>,
    wakers: Vec<Waker>,
}

/// Immutable set of operations with one completion signal
pub struct PreloadBatch {
    operations: Vec<LoadingOperation>,
    requested: usize,
    state: Mutex<BatchState>,
}

impl std::fmt::Debug for PreloadBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadBatch")
            .field("requested", &self.requested)
            .field("outstanding", &self.operations.len())
            .field("fired", &self.state.lock().fired)
            .finish()
    }
}

impl PreloadBatch {
    fn new(operations: Vec<LoadingOperation>, requested: usize) -> Self {
        let fired = operations.is_empty();
        Self {
            operations,
            requested,
            state: Mutex::new(BatchState {
                fired,
                subscribers: Vec::new(),
                wakers: Vec::new(),
            }),
        }
    }

    /// Operations that were outstanding when the batch was built
    pub fn operations(&self) -> &[LoadingOperation] {
        &self.operations
    }

    /// Number of tracked operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether every request was already finished at creation
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Whether every tracked operation has finished
    pub fn is_done(&self) -> bool {
        self.operations.iter().all(LoadingOperation::is_finished)
    }

    /// Whether the completion signal has been delivered
    pub fn has_fired(&self) -> bool {
        self.state.lock().fired
    }

    /// Fraction of requests finished (0.0 to 1.0), counting those finished at creation
    pub fn progress(&self) -> f32 {
        if self.requested == 0 {
            return 1.0;
        }
        let outstanding = self.operations.iter().filter(|op| !op.is_finished()).count();
        (self.requested - outstanding) as f32 / self.requested as f32
    }

    /// Run `callback` once the batch completes; immediately if it already has
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            if !state.fired {
                state.subscribers.push(Box::new(callback));
                return;
            }
        }
        run_guarded(Box::new(callback));
    }

    /// Future that resolves once the batch has fired
    pub fn wait(self: &Arc<Self>) -> PreloadWait {
        PreloadWait {
            batch: Arc::clone(self),
        }
    }

    fn fire(&self) {
        let (subscribers, wakers) = {
            let mut state = self.state.lock();
            if state.fired {
                return;
            }
            state.fired = true;
            (
                std::mem::take(&mut state.subscribers),
                std::mem::take(&mut state.wakers),
            )
        };
        for callback in subscribers {
            run_guarded(callback);
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

fn run_guarded(callback: BatchCallback) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        log::error!("Preload completion callback panicked");
    }
}

/// Future returned by [`PreloadBatch::wait`]
pub struct PreloadWait {
    batch: Arc<PreloadBatch>,
}

impl Future for PreloadWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.batch.state.lock();
        if state.fired {
            Poll::Ready(())
        } else {
            if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                state.wakers.push(cx.waker().clone());
            }
            Poll::Pending
        }
    }
}

/// Tracks outstanding preload batches
#[derive(Default)]
pub struct PreloadAggregator {
    batches: Mutex<Vec<Arc<PreloadBatch>>>,
}

impl PreloadAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start every request and join the unfinished ones into a batch
    pub fn preload<B, I>(&self, coordinator: &LoadingCoordinator<B>, requests: I) -> Arc<PreloadBatch>
    where
        B: BundleBackend,
        I: IntoIterator<Item = LoadRequest>,
    {
        let mut requested = 0;
        let mut operations: Vec<LoadingOperation> = Vec::new();
        for request in requests {
            requested += 1;
            let op = coordinator.load(request);
            if op.is_finished() || operations.iter().any(|o| LoadingOperation::ptr_eq(o, &op)) {
                continue;
            }
            operations.push(op);
        }

        let batch = Arc::new(PreloadBatch::new(operations, requested));
        if batch.has_fired() {
            log::trace!("Preload of {requested} request(s) already satisfied");
        } else {
            log::debug!(
                "Preload batch waiting on {} of {requested} request(s)",
                batch.len()
            );
            self.batches.lock().push(Arc::clone(&batch));
        }
        batch
    }

    /// Fire and drop every batch whose operations have all finished
    ///
    /// Returns the number of batches completed this tick.
    pub fn tick(&self) -> usize {
        let ready: Vec<Arc<PreloadBatch>> = {
            let mut batches = self.batches.lock();
            let (ready, waiting): (Vec<_>, Vec<_>) =
                batches.drain(..).partition(|b| b.is_done());
            *batches = waiting;
            ready
        };
        for batch in &ready {
            batch.fire();
        }
        ready.len()
    }

    /// Batches still waiting on at least one operation
    pub fn pending_batches(&self) -> usize {
        self.batches.lock().len()
    }
}
