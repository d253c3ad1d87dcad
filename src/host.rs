//! Hooks into the host environment
//!
//! The core never spawns threads or owns the frame loop. It only asks the
//! host to change its background loading priority and, after batches of
//! downloads, to release memory it no longer needs.

use std::fmt::Debug;

/// Background loading priority requested from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadingPriority {
    /// Nothing is loading
    Normal,
    /// The coordinator has outstanding work
    High,
}

/// Best-effort requests the core makes to its host
pub trait HostHooks: Send + Sync + Debug {
    /// Called when the coordinator loop starts or stops
    fn set_loading_priority(&self, _priority: LoadingPriority) {}

    /// Release now-unused decoded memory; the host may delay this
    fn reclaim_memory(&self) {}
}

/// Host that ignores every hint
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHost;

impl HostHooks for NullHost {}

/// Host that records what it was asked to do (for testing)
#[derive(Debug, Default)]
pub struct RecordingHost {
    priorities: parking_lot::Mutex<Vec<LoadingPriority>>,
    reclaims: std::sync::atomic::AtomicUsize,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every priority change in order
    pub fn priorities(&self) -> Vec<LoadingPriority> {
        self.priorities.lock().clone()
    }

    /// Number of memory-reclaim hints received
    pub fn reclaim_count(&self) -> usize {
        self.reclaims.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl HostHooks for RecordingHost {
    fn set_loading_priority(&self, priority: LoadingPriority) {
        self.priorities.lock().push(priority);
    }

    fn reclaim_memory(&self) {
        self.reclaims
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}
