//! Bounded, stall-aware bundle download scheduler
//!
//! [`DownloadScheduler::update_all`] takes a manifest, skips every bundle the
//! transport already holds at the right hash and queues the rest. Each
//! [`DownloadScheduler::tick`] drains finished or stalled transfers, then
//! starts at most one new transfer while fewer than `max_concurrent` are
//! running. Failures are counted, never fatal. Completion is reported on the
//! returned channel exactly once, with the aggregate error count.

pub mod fs;
pub mod manifest;
pub mod mock;
pub mod transfer;

pub use fs::{FsTransfer, FsTransferBackend};
pub use manifest::{CacheManifest, ContentHash, Manifest};
pub use mock::{MockTransfer, MockTransferBackend};
pub use transfer::{TransferBackend, TransferHandle};

use crate::error::{BundleError, Result};
use crate::host::{HostHooks, NullHost};
use crate::identity::BundleId;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Scheduler limits and timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Transfers running at once (minimum 1)
    pub max_concurrent: usize,

    /// Seconds a transfer that reports progress may go without advancing
    pub progress_timeout_secs: f64,

    /// Seconds a transfer that reports no progress may run in total
    pub absolute_timeout_secs: f64,

    /// Completions between memory-reclaim hints
    pub reclaim_batch: usize,

    /// Prefix joined to each bundle identifier with `/`
    pub root_url: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            progress_timeout_secs: 30.0,
            absolute_timeout_secs: 180.0,
            reclaim_batch: 5,
            root_url: String::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn progress_timeout(&self) -> Duration {
        secs_to_duration(self.progress_timeout_secs)
    }

    pub fn absolute_timeout(&self) -> Duration {
        secs_to_duration(self.absolute_timeout_secs)
    }

    pub fn url_for(&self, bundle: &BundleId) -> String {
        let root = self.root_url.trim_end_matches('/');
        if root.is_empty() {
            bundle.to_string()
        } else {
            format!("{root}/{bundle}")
        }
    }
}

/// Negative is zero; `inf` or anything too large never expires
fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// Snapshot of a running update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateProgress {
    /// Bundles not yet finished (queued or in flight)
    pub rest: usize,
    /// Bundles that needed fetching
    pub total: usize,
    /// Transfers that failed or stalled
    pub errors: usize,
}

impl UpdateProgress {
    /// Fraction finished, 1.0 for an empty update
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            (self.total - self.rest) as f32 / self.total as f32
        }
    }
}

/// Sent on the channel returned by `update_all`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateEvent {
    Progress(UpdateProgress),
    Completed(UpdateProgress),
}

struct ActiveTransfer<H> {
    bundle: BundleId,
    handle: H,
    started: Instant,
    last_progress: Option<f32>,
    last_advance: Instant,
}

enum TransferPoll {
    Running,
    Finished(Option<String>),
}

impl<H: TransferHandle> ActiveTransfer<H> {
    fn poll(&mut self, now: Instant, config: &SchedulerConfig) -> TransferPoll {
        if self.handle.is_done() {
            return TransferPoll::Finished(self.handle.error());
        }

        match self.handle.progress() {
            Some(progress) => {
                if self.last_progress.map_or(true, |last| progress > last) {
                    self.last_progress = Some(progress);
                    self.last_advance = now;
                } else {
                    let idle = now.saturating_duration_since(self.last_advance);
                    if idle >= config.progress_timeout() {
                        self.handle.abort();
                        return TransferPoll::Finished(Some(format!(
                            "stalled at {:.0}% for {idle:?}",
                            progress * 100.0
                        )));
                    }
                }
            }
            None => {
                let elapsed = now.saturating_duration_since(self.started);
                if elapsed >= config.absolute_timeout() {
                    self.handle.abort();
                    return TransferPoll::Finished(Some(format!("no progress reported after {elapsed:?}")));
                }
            }
        }
        TransferPoll::Running
    }
}

struct SchedulerState<H> {
    pending: VecDeque<(BundleId, ContentHash)>,
    active: Vec<ActiveTransfer<H>>,
    total: usize,
    finished: usize,
    errors: usize,
    since_reclaim: usize,
    events: Option<Sender<UpdateEvent>>,
}

impl<H> SchedulerState<H> {
    fn progress(&self) -> UpdateProgress {
        UpdateProgress {
            rest: self.total - self.finished,
            total: self.total,
            errors: self.errors,
        }
    }

    fn is_running(&self) -> bool {
        self.events.is_some()
    }
}

/// Fetches a manifest's missing bundles a few at a time
pub struct DownloadScheduler<T: TransferBackend> {
    backend: T,
    host: Arc<dyn HostHooks>,
    config: SchedulerConfig,
    state: Mutex<SchedulerState<T::Handle>>,
}

impl<T: TransferBackend> DownloadScheduler<T> {
    pub fn new(backend: T) -> Self {
        Self {
            backend,
            host: Arc::new(NullHost),
            config: SchedulerConfig::default(),
            state: Mutex::new(SchedulerState {
                pending: VecDeque::new(),
                active: Vec::new(),
                total: 0,
                finished: 0,
                errors: 0,
                since_reclaim: 0,
                events: None,
            }),
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_host(mut self, host: Arc<dyn HostHooks>) -> Self {
        self.host = host;
        self
    }

    pub fn backend(&self) -> &T {
        &self.backend
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Queue every bundle in `manifest` that is not already up to date
    ///
    /// Completion is reported from a later tick, even when nothing needs
    /// fetching.
    pub fn update_all(&self, manifest: &Manifest) -> Result<Receiver<UpdateEvent>> {
        let mut state = self.state.lock();
        if state.is_running() {
            return Err(BundleError::UpdateInProgress);
        }

        let pending: VecDeque<(BundleId, ContentHash)> = manifest
            .iter()
            .filter(|(bundle, hash)| !self.backend.is_up_to_date(bundle, hash))
            .map(|(bundle, hash)| (bundle, hash.clone()))
            .collect();

        log::info!(
            "Updating {} of {} bundle(s) via {}",
            pending.len(),
            manifest.len(),
            self.backend.backend_name()
        );

        let (sender, receiver) = crossbeam_channel::unbounded();
        state.total = pending.len();
        state.pending = pending;
        state.finished = 0;
        state.errors = 0;
        state.since_reclaim = 0;
        let _ = sender.send(UpdateEvent::Progress(state.progress()));
        state.events = Some(sender);
        Ok(receiver)
    }

    pub fn tick(&self) {
        self.tick_at(Instant::now());
    }

    /// Advance the scheduler as if the current time were `now`
    pub fn tick_at(&self, now: Instant) {
        let mut reclaims = 0;
        let mut events = Vec::new();
        let sender;
        {
            let mut state = self.state.lock();
            let Some(events_tx) = state.events.clone() else {
                return;
            };

            let mut drained = false;
            let active = std::mem::take(&mut state.active);
            for mut transfer in active {
                match transfer.poll(now, &self.config) {
                    TransferPoll::Running => state.active.push(transfer),
                    TransferPoll::Finished(error) => {
                        drained = true;
                        state.finished += 1;
                        match error {
                            Some(e) => {
                                state.errors += 1;
                                log::warn!("Download of {} failed: {e}", transfer.bundle);
                            }
                            None => log::debug!("Downloaded {}", transfer.bundle),
                        }
                        state.since_reclaim += 1;
                        if state.since_reclaim >= self.config.reclaim_batch.max(1) {
                            state.since_reclaim = 0;
                            reclaims += 1;
                        }
                    }
                }
            }
            if drained {
                events.push(UpdateEvent::Progress(state.progress()));
            }

            if state.active.len() < self.config.max_concurrent.max(1) {
                if let Some((bundle, hash)) = state.pending.pop_front() {
                    let url = self.config.url_for(&bundle);
                    log::debug!("Fetching {bundle} from {url}");
                    let handle = self.backend.fetch(&bundle, &url, &hash);
                    state.active.push(ActiveTransfer {
                        bundle,
                        handle,
                        started: now,
                        last_progress: None,
                        last_advance: now,
                    });
                }
            }

            if state.pending.is_empty() && state.active.is_empty() {
                let progress = state.progress();
                log::info!(
                    "Bundle update finished: {} fetched, {} error(s)",
                    progress.total - progress.errors,
                    progress.errors
                );
                events.push(UpdateEvent::Completed(progress));
                state.events = None;
                reclaims += 1;
            }
            sender = events_tx;
        }

        for _ in 0..reclaims {
            self.host.reclaim_memory();
        }
        for event in events {
            // The caller may have dropped the receiver
            let _ = sender.send(event);
        }
    }

    pub fn progress(&self) -> UpdateProgress {
        self.state.lock().progress()
    }

    pub fn error_count(&self) -> usize {
        self.state.lock().errors
    }

    /// Whether no update is running
    pub fn is_complete(&self) -> bool {
        !self.state.lock().is_running()
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RecordingHost;

    fn manifest(bundles: &[&str]) -> Manifest {
        bundles
            .iter()
            .map(|b| (BundleId::new(b), ContentHash::new(format!("{b}-hash"))))
            .collect()
    }

    fn completed(receiver: &Receiver<UpdateEvent>) -> Vec<UpdateProgress> {
        receiver
            .try_iter()
            .filter_map(|event| match event {
                UpdateEvent::Completed(p) => Some(p),
                UpdateEvent::Progress(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_one_transfer_started_per_tick() {
        let backend = MockTransferBackend::new();
        let scheduler = DownloadScheduler::new(backend.clone());
        scheduler.update_all(&manifest(&["a", "b", "c"])).unwrap();

        scheduler.tick();
        assert_eq!(backend.fetch_count(), 1);
        scheduler.tick();
        assert_eq!(backend.fetch_count(), 2);
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[test]
    fn test_up_to_date_bundles_skipped() {
        let backend = MockTransferBackend::auto_complete();
        backend.store("b", "b-hash");
        let scheduler = DownloadScheduler::new(backend.clone());
        let events = scheduler.update_all(&manifest(&["a", "b"])).unwrap();

        for _ in 0..4 {
            scheduler.tick();
        }
        assert_eq!(backend.fetched(), vec![BundleId::new("a")]);
        assert_eq!(
            completed(&events),
            vec![UpdateProgress {
                rest: 0,
                total: 1,
                errors: 0
            }]
        );
    }

    #[test]
    fn test_empty_update_completes_on_next_tick() {
        let host = Arc::new(RecordingHost::new());
        let scheduler =
            DownloadScheduler::new(MockTransferBackend::new()).with_host(host.clone());
        let events = scheduler.update_all(&Manifest::new()).unwrap();
        assert!(!scheduler.is_complete());

        scheduler.tick();
        scheduler.tick();
        assert!(scheduler.is_complete());
        assert_eq!(completed(&events).len(), 1);
        assert_eq!(host.reclaim_count(), 1);
    }

    #[test]
    fn test_update_while_running_rejected() {
        let scheduler = DownloadScheduler::new(MockTransferBackend::new());
        scheduler.update_all(&manifest(&["a"])).unwrap();
        assert!(matches!(
            scheduler.update_all(&manifest(&["b"])),
            Err(BundleError::UpdateInProgress)
        ));
    }

    #[test]
    fn test_failure_counted_and_batch_continues() {
        let backend = MockTransferBackend::new();
        let scheduler = DownloadScheduler::new(backend.clone());
        let events = scheduler.update_all(&manifest(&["a", "b"])).unwrap();

        scheduler.tick();
        scheduler.tick();
        backend.fail("a", "404");
        backend.complete("b");
        scheduler.tick();

        assert!(scheduler.is_complete());
        assert_eq!(scheduler.error_count(), 1);
        assert_eq!(completed(&events)[0].errors, 1);
    }

    #[test]
    fn test_stalled_progress_aborted() {
        let backend = MockTransferBackend::new();
        let scheduler = DownloadScheduler::new(backend.clone());
        scheduler.update_all(&manifest(&["a"])).unwrap();

        let start = Instant::now();
        scheduler.tick_at(start);
        backend.set_progress("a", 0.4);
        scheduler.tick_at(start + Duration::from_secs(1));
        scheduler.tick_at(start + Duration::from_secs(20));
        assert!(!backend.was_aborted("a"));

        scheduler.tick_at(start + Duration::from_secs(31));
        assert!(backend.was_aborted("a"));
        assert!(scheduler.is_complete());
        assert_eq!(scheduler.error_count(), 1);
    }

    #[test]
    fn test_advancing_progress_is_not_a_stall() {
        let backend = MockTransferBackend::new();
        let scheduler = DownloadScheduler::new(backend.clone());
        scheduler.update_all(&manifest(&["a"])).unwrap();

        let start = Instant::now();
        scheduler.tick_at(start);
        for step in 1..=6u64 {
            backend.set_progress("a", step as f32 / 10.0);
            scheduler.tick_at(start + Duration::from_secs(step * 20));
        }
        assert!(!backend.was_aborted("a"));
        assert!(!scheduler.is_complete());
    }

    #[test]
    fn test_silent_transfer_hits_absolute_timeout() {
        let backend = MockTransferBackend::new();
        let scheduler = DownloadScheduler::new(backend.clone());
        scheduler.update_all(&manifest(&["a"])).unwrap();

        let start = Instant::now();
        scheduler.tick_at(start);
        backend.hide_progress("a");
        scheduler.tick_at(start + Duration::from_secs(179));
        assert!(!backend.was_aborted("a"));
        scheduler.tick_at(start + Duration::from_secs(180));
        assert!(backend.was_aborted("a"));
    }

    #[test]
    fn test_infinite_timeouts_never_abort() {
        let backend = MockTransferBackend::new();
        let scheduler = DownloadScheduler::new(backend.clone()).with_config(SchedulerConfig {
            progress_timeout_secs: f64::INFINITY,
            absolute_timeout_secs: 1e300,
            ..Default::default()
        });
        assert_eq!(scheduler.config().progress_timeout(), Duration::MAX);
        assert_eq!(scheduler.config().absolute_timeout(), Duration::MAX);
        scheduler.update_all(&manifest(&["a", "b"])).unwrap();

        let start = Instant::now();
        scheduler.tick_at(start);
        scheduler.tick_at(start);
        backend.set_progress("a", 0.5);
        backend.hide_progress("b");
        scheduler.tick_at(start + Duration::from_secs(1));
        scheduler.tick_at(start + Duration::from_secs(1_000_000));
        assert!(!backend.was_aborted("a"));
        assert!(!backend.was_aborted("b"));
        assert_eq!(scheduler.active_count(), 2);
    }

    #[test]
    fn test_url_joins_root() {
        let mut config = SchedulerConfig::default();
        assert_eq!(config.url_for(&BundleId::new("ui/title")), "ui/title");
        config.root_url = "https://cdn.example/bundles/".into();
        assert_eq!(
            config.url_for(&BundleId::new("ui/title")),
            "https://cdn.example/bundles/ui/title"
        );
    }

    #[test]
    fn test_reclaim_hint_every_batch() {
        let backend = MockTransferBackend::auto_complete();
        let host = Arc::new(RecordingHost::new());
        let scheduler = DownloadScheduler::new(backend)
            .with_config(SchedulerConfig {
                reclaim_batch: 2,
                ..Default::default()
            })
            .with_host(host.clone());
        let events = scheduler
            .update_all(&manifest(&["a", "b", "c", "d"]))
            .unwrap();

        for _ in 0..10 {
            scheduler.tick();
        }
        assert_eq!(completed(&events).len(), 1);
        // Two full batches plus the completion hint
        assert_eq!(host.reclaim_count(), 3);
    }
}
