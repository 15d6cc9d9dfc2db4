use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::WorkerError;
use crate::jobs::{JobId, LeaseManager};
use crate::worker::runner::{JobRunner, RunOutcome};

const RECV_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub concurrency: usize,
    pub poll_interval: Duration,
    /// Upper bound on jobs fetched per poll.
    pub claim_batch: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get().clamp(1, 4),
            poll_interval: Duration::from_millis(500),
            claim_batch: 16,
        }
    }
}

/// Job ids handed to a worker and not yet finished.
type InFlight = Arc<Mutex<HashSet<JobId>>>;

/// Fixed set of worker threads draining claimable jobs.
///
/// A poller thread periodically asks the lease table for pending or stale
/// jobs and dispatches them; `notify` dispatches a freshly submitted job
/// without waiting for the next poll. Dispatch is only a hint: the lease
/// decides who actually runs a job.
pub struct WorkerPool {
    job_sender: Sender<JobId>,
    wake_sender: Sender<()>,
    in_flight: InFlight,
    workers: Vec<JoinHandle<()>>,
    poller: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

fn dispatch(sender: &Sender<JobId>, in_flight: &InFlight, job_id: &str) -> Result<bool, WorkerError> {
    {
        let mut set = in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(job_id.to_string()) {
            return Ok(false);
        }
    }
    match sender.try_send(job_id.to_string()) {
        Ok(()) => Ok(true),
        Err(TrySendError::Full(_)) => {
            // Picked up again by a later poll.
            forget(in_flight, job_id);
            Ok(false)
        }
        Err(TrySendError::Disconnected(_)) => {
            forget(in_flight, job_id);
            Err(WorkerError::ChannelClosed)
        }
    }
}

fn forget(in_flight: &InFlight, job_id: &str) {
    in_flight
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(job_id);
}

impl WorkerPool {
    pub fn start(
        runner: Arc<JobRunner>,
        leases: LeaseManager,
        settings: PoolSettings,
    ) -> Result<Self, WorkerError> {
        let worker_count = settings.concurrency.max(1);
        let (job_sender, job_receiver) = bounded::<JobId>(worker_count * 2);
        let (wake_sender, wake_receiver) = bounded::<()>(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let in_flight: InFlight = Arc::new(Mutex::new(HashSet::new()));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let runner = Arc::clone(&runner);
            let in_flight = Arc::clone(&in_flight);

            let handle = thread::Builder::new()
                .name(format!("yuedu-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, job_rx, shutdown_flag, runner, in_flight))
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
            workers.push(handle);
        }

        let poller = {
            let sender = job_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let in_flight = Arc::clone(&in_flight);
            thread::Builder::new()
                .name("yuedu-poller".to_string())
                .spawn(move || {
                    run_poller(leases, settings, sender, wake_receiver, shutdown_flag, in_flight)
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?
        };

        info!("Started {} workers", worker_count);

        Ok(Self {
            job_sender,
            wake_sender,
            in_flight,
            workers,
            poller: Some(poller),
            shutdown,
        })
    }

    /// Hands a job to an idle worker right away. Returns `false` when it is
    /// already in flight or all workers are busy.
    pub fn notify(&self, job_id: &str) -> Result<bool, WorkerError> {
        if self.is_shutdown() {
            return Err(WorkerError::ChannelClosed);
        }
        dispatch(&self.job_sender, &self.in_flight, job_id)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// A cloneable handle that can only dispatch.
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            job_sender: self.job_sender.clone(),
            in_flight: Arc::clone(&self.in_flight),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.wake_sender.try_send(());
    }

    pub fn wait(mut self) {
        if let Some(poller) = self.poller.take() {
            if let Err(e) = poller.join() {
                error!("Poller panicked: {:?}", e);
            }
        }
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Dispatch side of a [`WorkerPool`], shared with submitters.
#[derive(Clone)]
pub struct PoolHandle {
    job_sender: Sender<JobId>,
    in_flight: InFlight,
    shutdown: Arc<AtomicBool>,
}

impl PoolHandle {
    /// See [`WorkerPool::notify`].
    pub fn notify(&self, job_id: &str) -> Result<bool, WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }
        dispatch(&self.job_sender, &self.in_flight, job_id)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<JobId>,
    shutdown: Arc<AtomicBool>,
    runner: Arc<JobRunner>,
    in_flight: InFlight,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(RECV_TIMEOUT) {
            Ok(job_id) => {
                let token = format!("w{}-{}", worker_id, Uuid::new_v4());
                let outcome = runner.run(&job_id, &token);
                if outcome != RunOutcome::Skipped {
                    debug!("Worker {} finished {}: {:?}", worker_id, job_id, outcome);
                }
                forget(&in_flight, &job_id);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

fn run_poller(
    leases: LeaseManager,
    settings: PoolSettings,
    sender: Sender<JobId>,
    wake: Receiver<()>,
    shutdown: Arc<AtomicBool>,
    in_flight: InFlight,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match leases.claimable(settings.claim_batch) {
            Ok(ids) => {
                for id in ids {
                    match dispatch(&sender, &in_flight, &id) {
                        Ok(_) => {}
                        Err(e) => {
                            warn!("Poller stopped dispatching: {}", e);
                            return;
                        }
                    }
                }
            }
            Err(e) => warn!("Failed to list claimable translations: {}", e),
        }

        // Sleeps for the poll interval unless woken by shutdown.
        let _ = wake.recv_timeout(settings.poll_interval);
    }
    debug!("Poller stopped");
}
