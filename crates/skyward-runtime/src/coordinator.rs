//! Per-sensor workers and the bounded fan-in that feeds the planner.
//!
//! Every sensor gets one [`SensorWorker`] thread:
//!
//! ```text
//!  CloudPublisher ──bounded(1)──▶ SensorWorker ──bounded(1)──▶ SensorCoordinator::gather
//!                                     │
//!                          waits for sensor → local_origin
//!                          in the shared TfEngine
//! ```
//!
//! Both channels hold a single cloud and the newest one replaces an unread
//! one, so a slow consumer never works on stale data and a fast sensor never
//! blocks. Every wait is bounded; workers exit once the shared shutdown flag
//! is raised or their publisher is dropped.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use serde::{Deserialize, Serialize};
use skyward_perception::transform::{LOCAL_ORIGIN, TfEngine};
use skyward_types::{PlannerError, Vec3};
use tracing::{debug, error, trace, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Wait bounds of the sensor workers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    /// How long a worker waits for its frame transform before dropping a
    /// cloud (ms).
    pub transform_timeout_ms: u64,
    /// Granularity of every worker wait and shutdown check (ms).
    pub poll_interval_ms: u64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            transform_timeout_ms: 100,
            poll_interval_ms: 5,
        }
    }
}

impl CoordinatorSettings {
    fn transform_timeout(&self) -> Duration {
        Duration::from_millis(self.transform_timeout_ms)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Channels
// ─────────────────────────────────────────────────────────────────────────────

/// A raw cloud in the sensor's own frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCloud {
    pub frame_id: String,
    pub points: Vec<Vec3>,
}

/// Sending end of a single-slot channel; a new value replaces an unread one.
struct LatestSender<T> {
    tx: Sender<T>,
    drain: Receiver<T>,
}

impl<T> Clone for LatestSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            drain: self.drain.clone(),
        }
    }
}

impl<T> LatestSender<T> {
    /// Store `value`. Returns `true` when an unread value was discarded.
    ///
    /// With several senders another one may refill the slot between the
    /// drain and the store; `value` is then dropped in favour of theirs.
    fn send(&self, value: T) -> bool {
        let replaced = self.drain.try_recv().is_ok();
        match self.tx.try_send(value) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!("slot refilled by another sender, value dropped"),
            // `drain` keeps a receiver alive for as long as `self` exists.
            Err(TrySendError::Disconnected(_)) => {}
        }
        replaced
    }
}

fn latest_slot<T>() -> (LatestSender<T>, Receiver<T>) {
    let (tx, rx) = bounded(1);
    (
        LatestSender {
            tx,
            drain: rx.clone(),
        },
        rx,
    )
}

/// Handle a sensor driver uses to hand raw clouds to its worker.
#[derive(Clone)]
pub struct CloudPublisher {
    sensor_id: String,
    slot: LatestSender<RawCloud>,
}

impl CloudPublisher {
    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    /// Hand over `cloud`, replacing one the worker has not picked up yet.
    pub fn publish(&self, cloud: RawCloud) {
        if self.slot.send(cloud) {
            trace!(sensor = %self.sensor_id, "unread raw cloud replaced");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SensorWorker
// ─────────────────────────────────────────────────────────────────────────────

/// One OS thread bringing a sensor's clouds into the local frame.
pub struct SensorWorker {
    id: String,
    ready_rx: Receiver<Vec<Vec3>>,
    handle: Option<JoinHandle<()>>,
}

impl SensorWorker {
    /// Start the worker thread for `id`.
    pub fn spawn(
        id: &str,
        tf: Arc<RwLock<TfEngine>>,
        shutdown: Arc<AtomicBool>,
        settings: CoordinatorSettings,
    ) -> io::Result<(Self, CloudPublisher)> {
        let (raw_tx, raw_rx) = latest_slot::<RawCloud>();
        let (ready_tx, ready_rx) = latest_slot::<Vec<Vec3>>();

        let worker_id = id.to_string();
        let handle = thread::Builder::new()
            .name(format!("sensor-{id}"))
            .spawn(move || run_worker(worker_id, raw_rx, ready_tx, tf, shutdown, settings))?;

        Ok((
            Self {
                id: id.to_string(),
                ready_rx,
                handle: Some(handle),
            },
            CloudPublisher {
                sensor_id: id.to_string(),
                slot: raw_tx,
            },
        ))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The thread has exited, or was already joined.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Wait for the thread to finish.
    fn join(&mut self) {
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.join()
        {
            error!(sensor = %self.id, "sensor worker panicked: {:?}", e);
        }
    }
}

fn run_worker(
    id: String,
    raw_rx: Receiver<RawCloud>,
    ready: LatestSender<Vec<Vec3>>,
    tf: Arc<RwLock<TfEngine>>,
    shutdown: Arc<AtomicBool>,
    settings: CoordinatorSettings,
) {
    debug!(sensor = %id, "sensor worker started");
    let poll = settings.poll_interval();

    while !shutdown.load(Ordering::Relaxed) {
        let raw = match raw_rx.recv_timeout(poll) {
            Ok(raw) => raw,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        match transform_when_ready(&raw, &tf, &shutdown, &settings) {
            Ok(cloud) => {
                trace!(sensor = %id, points = cloud.len(), "cloud ready");
                if ready.send(cloud) {
                    trace!(sensor = %id, "unread ready cloud replaced");
                }
            }
            Err(e) => warn!(sensor = %id, error = %e, "dropping cloud"),
        }
    }

    debug!(sensor = %id, "sensor worker stopped");
}

/// Transform `raw` into the local frame, waiting up to the transform timeout
/// for the frame to become known.
fn transform_when_ready(
    raw: &RawCloud,
    tf: &RwLock<TfEngine>,
    shutdown: &AtomicBool,
    settings: &CoordinatorSettings,
) -> Result<Vec<Vec3>, PlannerError> {
    let deadline = Instant::now() + settings.transform_timeout();
    loop {
        let result = read_tf(tf).transform_cloud(&raw.points, &raw.frame_id, LOCAL_ORIGIN);
        match result {
            Ok(cloud) => return Ok(cloud),
            Err(e) if Instant::now() >= deadline || shutdown.load(Ordering::Relaxed) => return Err(e),
            Err(_) => thread::sleep(settings.poll_interval()),
        }
    }
}

/// Transform writers never leave the engine half-updated, so poisoning is
/// ignored.
fn read_tf(tf: &RwLock<TfEngine>) -> RwLockReadGuard<'_, TfEngine> {
    tf.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ─────────────────────────────────────────────────────────────────────────────
// SensorCoordinator
// ─────────────────────────────────────────────────────────────────────────────

/// Result of one [`SensorCoordinator::gather`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CloudBatch {
    /// `(sensor id, cloud in the local frame)` for every sensor that
    /// delivered before the deadline.
    pub clouds: Vec<(String, Vec<Vec3>)>,
    /// Sensors that did not deliver.
    pub missing: Vec<String>,
}

impl CloudBatch {
    /// IDs of the sensors that delivered.
    pub fn delivered(&self) -> impl Iterator<Item = &str> {
        self.clouds.iter().map(|(id, _)| id.as_str())
    }

    /// `Err(SensorTimeout)` naming the first sensor that did not deliver.
    pub fn check_complete(&self) -> Result<(), PlannerError> {
        match self.missing.first() {
            Some(id) => Err(PlannerError::SensorTimeout(id.clone())),
            None => Ok(()),
        }
    }

    pub fn into_clouds(self) -> Vec<Vec<Vec3>> {
        self.clouds.into_iter().map(|(_, cloud)| cloud).collect()
    }
}

/// Owns the sensor workers and gathers their output against one deadline.
pub struct SensorCoordinator {
    tf: Arc<RwLock<TfEngine>>,
    shutdown: Arc<AtomicBool>,
    settings: CoordinatorSettings,
    workers: Vec<SensorWorker>,
}

impl SensorCoordinator {
    pub fn new(tf: Arc<RwLock<TfEngine>>, settings: CoordinatorSettings) -> Self {
        Self {
            tf,
            shutdown: Arc::new(AtomicBool::new(false)),
            settings,
            workers: Vec::new(),
        }
    }

    /// Start a worker for `sensor_id` and return the handle its driver
    /// publishes raw clouds through.
    pub fn add_sensor(&mut self, sensor_id: &str) -> io::Result<CloudPublisher> {
        let (worker, publisher) = SensorWorker::spawn(
            sensor_id,
            Arc::clone(&self.tf),
            Arc::clone(&self.shutdown),
            self.settings,
        )?;
        self.workers.push(worker);
        Ok(publisher)
    }

    pub fn sensor_ids(&self) -> impl Iterator<Item = &str> {
        self.workers.iter().map(|w| w.id())
    }

    /// Number of worker threads that have not exited yet.
    pub fn running_workers(&self) -> usize {
        self.workers.iter().filter(|w| !w.is_finished()).count()
    }

    /// Shared frame graph the workers read from.
    pub fn tf(&self) -> Arc<RwLock<TfEngine>> {
        Arc::clone(&self.tf)
    }

    /// Collect the ready cloud of every sensor, waiting no later than
    /// `timeout` from now in total.
    ///
    /// A silent sensor costs at most the shared deadline and ends up in
    /// [`CloudBatch::missing`].
    pub fn gather(&self, timeout: Duration) -> CloudBatch {
        let deadline = Instant::now() + timeout;
        let mut batch = CloudBatch::default();
        for worker in &self.workers {
            let received = worker
                .ready_rx
                .try_recv()
                .or_else(|_| worker.ready_rx.recv_deadline(deadline));
            match received {
                Ok(cloud) => batch.clouds.push((worker.id.clone(), cloud)),
                Err(_) => batch.missing.push(worker.id.clone()),
            }
        }
        batch
    }

    /// Stop and join every worker. Idempotent.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for worker in &mut self.workers {
            worker.join();
        }
    }
}

impl Drop for SensorCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
