//! Transfer Worker
//!
//! Background uploads of texture mips into device storage.
//!
//! The render thread submits handles and device commands to a
//! [`TransferQueue`]. Each [`TransferWorker::process`] iteration:
//! 1. Swaps out and runs every queued command, then flushes the device
//! 2. Swaps out new submissions and starts their transfers
//! 3. Recomputes the memory load once per batch (or when the budget changed)
//! 4. Advances at most `max_transfers_per_pass` in-flight transfers by one mip
//!
//! The queues hold weak references: dropping a handle anywhere else cancels
//! its transfer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use mipflow_core::DeviceMemory;
use mipflow_platform::{PerfCounter, PlatformResult, ScopedTimer, Thread};
use parking_lot::Mutex;
use serde::Serialize;

use crate::device::Device;
use crate::eviction::{self, SweepOutcome};
use crate::handle::{TextureHandle, WeakTextureHandle};

/// In-flight transfers advanced per worker iteration
pub const MAX_TRANSFERS_PER_PASS: usize = 2;

/// Work run on the transfer worker with access to the device
pub type DeviceCommand = Box<dyn FnOnce(&dyn Device) + Send>;

#[derive(Default)]
struct Submissions {
    textures: Vec<WeakTextureHandle>,
    commands: Vec<DeviceCommand>,
    recompute: bool,
}

/// Queues shared by the render thread and the transfer worker
pub struct TransferQueue {
    submissions: Mutex<Submissions>,
    deferred: Mutex<Vec<WeakTextureHandle>>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl TransferQueue {
    /// Create empty queues
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = channel::bounded(1);
        Self {
            submissions: Mutex::new(Submissions::default()),
            deferred: Mutex::new(Vec::new()),
            wake_tx,
            wake_rx,
        }
    }

    /// Mark a handle pending and queue it for transfer
    pub fn submit(&self, handle: &TextureHandle) {
        handle.lock().mark_pending();
        self.submissions.lock().textures.push(Arc::downgrade(handle));
        self.wake();
    }

    /// Queue work to run on the transfer worker
    pub fn queue_command<F>(&self, command: F)
    where
        F: FnOnce(&dyn Device) + Send + 'static,
    {
        self.submissions.lock().commands.push(Box::new(command));
        self.wake();
    }

    /// Ask the worker to recompute the memory load on its next iteration
    pub fn request_recompute(&self) {
        self.submissions.lock().recompute = true;
        self.wake();
    }

    /// Get the number of handles waiting to be started
    pub fn pending_submissions(&self) -> usize {
        self.submissions.lock().textures.len()
    }

    /// Queue a live demotion for the render thread
    pub(crate) fn defer_demotion(&self, handle: WeakTextureHandle) {
        let mut deferred = self.deferred.lock();
        if !deferred.iter().any(|queued| queued.ptr_eq(&handle)) {
            deferred.push(handle);
        }
    }

    /// Take the demotions waiting for the render thread
    pub fn take_deferred_demotions(&self) -> Vec<WeakTextureHandle> {
        std::mem::take(&mut *self.deferred.lock())
    }

    /// Wake the worker if it is idle
    pub fn wake(&self) {
        // A full channel already holds a wake-up
        let _ = self.wake_tx.try_send(());
    }

    fn drain(&self) -> Submissions {
        std::mem::take(&mut *self.submissions.lock())
    }

    fn wait(&self, timeout: Duration) -> bool {
        self.wake_rx.recv_timeout(timeout).is_ok()
    }
}

impl Default for TransferQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Transfer worker counters
#[derive(Debug)]
pub struct TransferStats {
    iterations: AtomicU64,
    started: AtomicU64,
    steps: AtomicU64,
    finished: AtomicU64,
    failures: AtomicU64,
    demotions: AtomicU64,
    deferred_demotions: AtomicU64,
    promotions: AtomicU64,
    sweep_timing: PerfCounter,
}

/// Copy of the transfer worker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TransferStatsSnapshot {
    pub iterations: u64,
    pub started: u64,
    pub steps: u64,
    pub finished: u64,
    pub failures: u64,
    pub sweeps: u64,
    pub demotions: u64,
    pub deferred_demotions: u64,
    pub promotions: u64,
    pub sweep_average_millis: f64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            iterations: AtomicU64::new(0),
            started: AtomicU64::new(0),
            steps: AtomicU64::new(0),
            finished: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            demotions: AtomicU64::new(0),
            deferred_demotions: AtomicU64::new(0),
            promotions: AtomicU64::new(0),
            sweep_timing: PerfCounter::new("eviction_sweep"),
        }
    }

    /// Count a demotion applied outside a sweep
    pub(crate) fn record_demotion(&self) {
        self.demotions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_sweep(&self, outcome: &SweepOutcome) {
        self.demotions
            .fetch_add(u64::from(outcome.demoted), Ordering::Relaxed);
        self.deferred_demotions
            .fetch_add(u64::from(outcome.deferred), Ordering::Relaxed);
        self.promotions
            .fetch_add(u64::from(outcome.promoted), Ordering::Relaxed);
        self.failures
            .fetch_add(u64::from(outcome.failed), Ordering::Relaxed);
    }

    /// Copy all counters
    pub fn snapshot(&self) -> TransferStatsSnapshot {
        TransferStatsSnapshot {
            iterations: self.iterations.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            steps: self.steps.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            sweeps: self.sweep_timing.count(),
            demotions: self.demotions.load(Ordering::Relaxed),
            deferred_demotions: self.deferred_demotions.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            sweep_average_millis: self.sweep_timing.average_millis(),
        }
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives transfers and the eviction sweep
///
/// Owns the in-flight and transferred sets. Starting a worker begins a
/// memory accounting session; dropping it ends the session.
pub struct TransferWorker {
    queue: Arc<TransferQueue>,
    device: Arc<dyn Device>,
    memory: Arc<DeviceMemory>,
    stats: Arc<TransferStats>,
    transferring: VecDeque<WeakTextureHandle>,
    transferred: Vec<WeakTextureHandle>,
    max_transfers_per_pass: usize,
}

impl TransferWorker {
    /// Create a worker
    pub fn new(
        queue: Arc<TransferQueue>,
        device: Arc<dyn Device>,
        memory: Arc<DeviceMemory>,
        stats: Arc<TransferStats>,
        max_transfers_per_pass: usize,
    ) -> Self {
        memory.begin();
        Self {
            queue,
            device,
            memory,
            stats,
            transferring: VecDeque::new(),
            transferred: Vec::new(),
            max_transfers_per_pass: max_transfers_per_pass.max(1),
        }
    }

    /// Get the number of transfers in flight
    pub fn in_flight(&self) -> usize {
        self.transferring.len()
    }

    /// Get the number of completed handles tracked for eviction
    pub fn transferred(&self) -> usize {
        self.transferred.len()
    }

    /// Run one worker iteration
    ///
    /// Returns whether transfers remain in flight.
    pub fn process(&mut self) -> bool {
        let _timer = ScopedTimer::traced("transfer_process");
        self.stats.iterations.fetch_add(1, Ordering::Relaxed);

        let Submissions {
            textures,
            commands,
            mut recompute,
        } = self.queue.drain();

        if !commands.is_empty() {
            for command in commands {
                command(self.device.as_ref());
            }
            self.device.flush();
        }

        if !textures.is_empty() {
            for handle in textures {
                self.start(handle);
            }
            recompute = true;
        }

        if recompute {
            self.recompute_load();
        }

        self.service();
        !self.transferring.is_empty()
    }

    fn start(&mut self, weak: WeakTextureHandle) {
        let Some(handle) = weak.upgrade() else {
            return;
        };
        let mut texture = handle.lock();
        match texture.start_transfer() {
            Ok(()) => {
                self.stats.started.fetch_add(1, Ordering::Relaxed);
                self.transferred.retain(|tracked| !tracked.ptr_eq(&weak));
                self.transferring.push_back(weak);
            }
            Err(err) => {
                texture.fail(&err);
                self.stats.record_failure();
            }
        }
    }

    /// Advance up to `max_transfers_per_pass` transfers by one mip each
    fn service(&mut self) {
        let mut serviced = 0;
        let mut index = 0;
        while serviced < self.max_transfers_per_pass && index < self.transferring.len() {
            let Some(handle) = self.transferring[index].upgrade() else {
                self.transferring.remove(index);
                continue;
            };
            serviced += 1;

            let mut texture = handle.lock();
            let result = texture.continue_transfer().and_then(|more| {
                self.stats.steps.fetch_add(1, Ordering::Relaxed);
                if more {
                    Ok(true)
                } else {
                    texture.finish_transfer().map(|()| false)
                }
            });

            match result {
                Ok(true) => index += 1,
                Ok(false) => {
                    texture.clear_pending();
                    self.stats.finished.fetch_add(1, Ordering::Relaxed);
                    if let Some(weak) = self.transferring.remove(index) {
                        self.transferred.push(weak);
                    }
                }
                Err(err) => {
                    texture.fail(&err);
                    self.stats.record_failure();
                    self.transferring.remove(index);
                }
            }
        }
    }

    /// Rebalance every tracked handle against the allowed memory
    pub fn recompute_load(&mut self) -> SweepOutcome {
        let stats = self.stats.clone();
        let outcome = stats.sweep_timing.time(|| self.sweep());
        stats.record_sweep(&outcome);
        outcome
    }

    fn sweep(&mut self) -> SweepOutcome {
        self.transferred.retain(|weak| weak.strong_count() > 0);
        self.transferring.retain(|weak| weak.strong_count() > 0);

        let transferred: Vec<TextureHandle> =
            self.transferred.iter().filter_map(Weak::upgrade).collect();
        let in_flight: Vec<TextureHandle> =
            self.transferring.iter().filter_map(Weak::upgrade).collect();

        let allowed = self.memory.allowed_memory();
        let mut deferred = Vec::new();
        let outcome = eviction::recompute_load(&transferred, &in_flight, allowed, &mut deferred);
        for handle in deferred {
            self.queue.defer_demotion(handle);
        }

        // Small textures finish first
        self.transferring
            .make_contiguous()
            .sort_by_cached_key(|weak| weak.upgrade().map_or(0, |handle| handle.lock().target_size()));

        let pressure = self.memory.memory_pressure();
        tracing::debug!(
            target: "residency",
            textures = transferred.len() + in_flight.len(),
            total_target = outcome.total_target,
            headroom = outcome.headroom,
            allowed,
            demoted = outcome.demoted,
            deferred = outcome.deferred,
            promoted = outcome.promoted,
            trimmed = outcome.trimmed,
            pressure = f64::from(pressure),
            "Recomputed texture load"
        );
        outcome
    }
}

impl Drop for TransferWorker {
    fn drop(&mut self) {
        self.transferring.clear();
        self.transferred.clear();
        let timing = &self.stats.sweep_timing;
        log::debug!(
            "{}: {} runs, {:.3} ms average",
            timing.name(),
            timing.count(),
            timing.average_millis()
        );
        self.memory.end();
    }
}

/// Transfer worker running on its own thread
pub struct TransferThread {
    queue: Arc<TransferQueue>,
    shutdown: Arc<AtomicBool>,
    thread: Option<Thread>,
}

impl TransferThread {
    /// Spawn the worker loop
    ///
    /// The thread sleeps up to `idle_wait` when nothing is in flight, and
    /// wakes early on new submissions.
    pub fn spawn(mut worker: TransferWorker, idle_wait: Duration) -> PlatformResult<Self> {
        let queue = worker.queue.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let running = shutdown.clone();

        let thread = Thread::spawn("texture-transfer", move || {
            log::debug!("Texture transfer worker started");
            while !running.load(Ordering::Acquire) {
                if !worker.process() {
                    worker.queue.wait(idle_wait);
                }
            }
            log::debug!(
                "Texture transfer worker stopped with {} transfers in flight",
                worker.in_flight()
            );
        })?;

        Ok(Self {
            queue,
            shutdown,
            thread: Some(thread),
        })
    }

    /// Stop the worker loop and wait for it to exit
    pub fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            log::debug!("Stopping thread '{}'", thread.name());
            self.shutdown.store(true, Ordering::Release);
            self.queue.wake();
            if let Err(err) = thread.join() {
                log::error!("Texture transfer worker failed: {}", err);
            }
        }
    }

    /// Whether the worker thread is still running
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }
}

impl Drop for TransferThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::TexelFormat;
    use crate::handle::tests::{filled_texture, Fixture};
    use crate::handle::{AllocationRequest, DeviceTexture, SyncState};
    use crate::resource::{TextureDesc, TextureUsage};
    use std::time::Instant;

    fn worker(fixture: &Fixture, queue: &Arc<TransferQueue>) -> TransferWorker {
        TransferWorker::new(
            queue.clone(),
            fixture.device.clone(),
            fixture.memory.clone(),
            Arc::new(TransferStats::new()),
            MAX_TRANSFERS_PER_PASS,
        )
    }

    fn dense(fixture: &Fixture, size: u32) -> (Arc<crate::Texture>, TextureHandle) {
        let texture = filled_texture(
            TextureUsage::Resource,
            TextureDesc::new_2d(TexelFormat::RGBA8, size, size),
        );
        let handle = DeviceTexture::new(&texture, AllocationRequest::Dense, &fixture.context).unwrap();
        (texture, Arc::new(Mutex::new(handle)))
    }

    #[test]
    fn test_submit_marks_pending() {
        let fixture = Fixture::new();
        let queue = Arc::new(TransferQueue::new());
        let mut worker = worker(&fixture, &queue);
        let (_texture, handle) = dense(&fixture, 8);

        queue.submit(&handle);
        assert_eq!(handle.lock().sync_state(), SyncState::Pending);
        assert_eq!(queue.pending_submissions(), 1);
        assert_eq!(fixture.memory.snapshot().pending_transfers, 1);

        while worker.process() {}
        assert_eq!(queue.pending_submissions(), 0);
        assert_eq!(worker.in_flight(), 0);
        assert_eq!(worker.transferred(), 1);
        assert_eq!(handle.lock().sync_state(), SyncState::Transferred);
        assert_eq!(fixture.memory.snapshot().pending_transfers, 0);

        handle.lock().post_transfer();
        assert!(handle.lock().is_ready());
    }

    #[test]
    fn test_at_most_two_per_pass() {
        let fixture = Fixture::new();
        let queue = Arc::new(TransferQueue::new());
        let mut worker = worker(&fixture, &queue);
        let handles: Vec<_> = (0..3).map(|_| dense(&fixture, 8)).collect();
        for (_, handle) in &handles {
            queue.submit(handle);
        }

        fixture.device.reset_stats();
        assert!(worker.process());
        assert_eq!(worker.in_flight(), 3);
        assert_eq!(fixture.device.stats().writes, 2);

        let stats = worker.stats.snapshot();
        assert_eq!(stats.started, 3);
        assert_eq!(stats.sweeps, 1);
        assert_eq!(stats.steps, 2);
    }

    #[test]
    fn test_one_sweep_per_batch() {
        let fixture = Fixture::new();
        let queue = Arc::new(TransferQueue::new());
        let mut worker = worker(&fixture, &queue);
        let (_a, a) = dense(&fixture, 8);
        let (_b, b) = dense(&fixture, 8);
        queue.submit(&a);
        queue.submit(&b);

        while worker.process() {}
        assert_eq!(worker.stats.snapshot().sweeps, 1);

        queue.request_recompute();
        worker.process();
        assert_eq!(worker.stats.snapshot().sweeps, 2);
        worker.process();
        assert_eq!(worker.stats.snapshot().sweeps, 2);
    }

    #[test]
    fn test_dropped_handle_is_skipped() {
        let fixture = Fixture::new();
        let queue = Arc::new(TransferQueue::new());
        let mut worker = worker(&fixture, &queue);
        let (_texture, handle) = dense(&fixture, 16);
        queue.submit(&handle);
        assert!(worker.process());

        drop(handle);
        assert_eq!(fixture.memory.snapshot().pending_transfers, 0);
        assert!(!worker.process());
        assert_eq!(worker.in_flight(), 0);
        assert_eq!(worker.transferred(), 0);
    }

    #[test]
    fn test_resource_dropped_mid_transfer() {
        let fixture = Fixture::new();
        let queue = Arc::new(TransferQueue::new());
        let mut worker = worker(&fixture, &queue);
        let (texture, handle) = dense(&fixture, 64);
        queue.submit(&handle);
        assert!(worker.process());

        drop(texture);
        while worker.process() {}

        let mut handle = handle.lock();
        handle.post_transfer();
        assert!(handle.is_invalid());
        assert!(!handle.is_ready());
        assert_eq!(worker.stats.snapshot().failures, 0);
    }

    #[test]
    fn test_device_error_isolated() {
        let fixture = Fixture::new();
        let queue = Arc::new(TransferQueue::new());
        let mut worker = worker(&fixture, &queue);
        let (_a, a) = dense(&fixture, 8);
        let (_b, b) = dense(&fixture, 8);
        queue.submit(&a);
        queue.submit(&b);

        fixture.device.fail_next_writes(1);
        while worker.process() {}

        let (a, b) = (a.lock(), b.lock());
        assert_ne!(a.is_failed(), b.is_failed());
        assert_eq!(worker.stats.snapshot().failures, 1);
        assert_eq!(worker.transferred(), 1);
        assert_eq!(fixture.memory.snapshot().pending_transfers, 0);
    }

    #[test]
    fn test_commands_run_before_transfers() {
        let fixture = Fixture::new();
        let queue = Arc::new(TransferQueue::new());
        let mut worker = worker(&fixture, &queue);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        queue.queue_command(move |device| {
            device.flush();
            flag.store(true, Ordering::Relaxed);
        });

        assert!(!worker.process());
        assert!(ran.load(Ordering::Relaxed));
        assert_eq!(fixture.device.stats().flushes, 2);
    }

    #[test]
    fn test_deferred_demotions_deduplicated() {
        let fixture = Fixture::new();
        let queue = TransferQueue::new();
        let (_texture, handle) = dense(&fixture, 8);
        queue.defer_demotion(Arc::downgrade(&handle));
        queue.defer_demotion(Arc::downgrade(&handle));

        assert_eq!(queue.take_deferred_demotions().len(), 1);
        assert!(queue.take_deferred_demotions().is_empty());
    }

    #[test]
    fn test_threaded_worker() {
        let fixture = Fixture::new();
        let queue = Arc::new(TransferQueue::new());
        let worker = TransferWorker::new(
            queue.clone(),
            fixture.device.clone(),
            fixture.memory.clone(),
            Arc::new(TransferStats::new()),
            MAX_TRANSFERS_PER_PASS,
        );
        let mut thread = TransferThread::spawn(worker, Duration::from_millis(1)).unwrap();
        assert!(thread.is_running());

        let (_texture, handle) = dense(&fixture, 32);
        queue.submit(&handle);

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.lock().sync_state() != SyncState::Transferred && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        handle.lock().post_transfer();
        assert!(handle.lock().is_ready());

        thread.stop();
        assert!(!thread.is_running());
    }
}
