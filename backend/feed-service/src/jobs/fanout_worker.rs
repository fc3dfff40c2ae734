/// Fanout worker pool
///
/// In-process queue for deferred fanout jobs:
/// - bounded MPSC channel shared by `workers` tasks
/// - every job runs under a hard timeout; a job that times out is dropped
///   mid-flight and retried from scratch
/// - failed jobs are re-enqueued whole with exponential backoff and jitter
///   until `max_attempts`, then dead-lettered
///
/// Delivery is at-least-once for the lifetime of the process. Jobs still
/// queued at shutdown are lost; the feed read path rebuilds from the store.
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::FanoutConfig;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::services::{FanoutDispatcher, FanoutEngine, FanoutJob};

/// Upper bound for a single retry delay
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Envelope {
    job: FanoutJob,
    attempt: u32,
}

#[derive(Default)]
struct QueueState {
    in_flight: AtomicUsize,
    dead_lettered: AtomicUsize,
    idle: Notify,
}

/// Producer side of the fanout queue
#[derive(Clone)]
pub struct FanoutQueue {
    tx: mpsc::Sender<Envelope>,
    state: Arc<QueueState>,
}

impl FanoutQueue {
    /// Jobs queued, running or waiting for a retry.
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    pub fn dead_lettered(&self) -> usize {
        self.state.dead_lettered.load(Ordering::SeqCst)
    }

    /// Wait until no job is in flight. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.state.idle.notified();
            if self.in_flight() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.in_flight() == 0;
            }
        }
    }

    fn track(&self) {
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_jobs_in_flight(now);
    }

    fn finish(&self) {
        let now = self.state.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_jobs_in_flight(now);
        if now == 0 {
            self.state.idle.notify_waiters();
        }
    }

    fn dead_letter(&self, job: &FanoutJob, attempts: u32, reason: &str) {
        error!(
            kind = job.kind(),
            post_id = %job.post_id(),
            attempts,
            reason,
            "Fanout job dead-lettered"
        );
        metrics::record_dead_letter(job.kind());
        self.state.dead_lettered.fetch_add(1, Ordering::SeqCst);
        self.finish();
    }

    /// Enqueue without blocking the caller; used from inside workers so a
    /// full queue cannot stall every worker at once.
    fn dispatch_detached(&self, job: FanoutJob) -> Result<()> {
        self.track();
        match self.tx.try_send(Envelope { job, attempt: 1 }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                let queue = self.clone();
                tokio::spawn(async move {
                    if let Err(mpsc::error::SendError(envelope)) = queue.tx.send(envelope).await {
                        queue.dead_letter(&envelope.job, 0, "queue closed");
                    }
                });
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.finish();
                Err(AppError::Queue("fanout queue is closed".to_string()))
            }
        }
    }

    fn schedule_retry(&self, envelope: Envelope, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(mpsc::error::SendError(envelope)) = queue.tx.send(envelope).await {
                let attempts = envelope.attempt - 1;
                queue.dead_letter(&envelope.job, attempts, "queue closed");
            }
        });
    }
}

#[async_trait]
impl FanoutDispatcher for FanoutQueue {
    async fn dispatch(&self, job: FanoutJob) -> Result<()> {
        self.track();
        if self.tx.send(Envelope { job, attempt: 1 }).await.is_err() {
            self.finish();
            return Err(AppError::Queue("fanout queue is closed".to_string()));
        }
        Ok(())
    }
}

/// Dispatcher handed to jobs running on a worker
struct WorkerDispatcher<'a>(&'a FanoutQueue);

#[async_trait]
impl<'a> FanoutDispatcher for WorkerDispatcher<'a> {
    async fn dispatch(&self, job: FanoutJob) -> Result<()> {
        self.0.dispatch_detached(job)
    }
}

/// Handle to the running workers
pub struct FanoutWorkerPool {
    queue: FanoutQueue,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl FanoutWorkerPool {
    /// Spawn `config.workers` workers and return the queue that feeds them.
    pub fn start(engine: FanoutEngine, config: FanoutConfig) -> (FanoutQueue, FanoutWorkerPool) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let queue = FanoutQueue {
            tx,
            state: Arc::new(QueueState::default()),
        };
        let engine = Arc::new(engine);
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    engine.clone(),
                    queue.clone(),
                    rx.clone(),
                    config,
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        info!(
            workers = config.workers,
            capacity = config.queue_capacity,
            timeout_secs = config.batch_timeout_secs,
            max_attempts = config.max_attempts,
            "Fanout worker pool started"
        );

        (
            queue.clone(),
            FanoutWorkerPool {
                queue,
                shutdown_tx,
                workers,
            },
        )
    }

    pub fn in_flight(&self) -> usize {
        self.queue.in_flight()
    }

    pub fn dead_lettered(&self) -> usize {
        self.queue.dead_lettered()
    }

    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.queue.wait_idle(timeout).await
    }

    /// Stop taking jobs and wait for running ones to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!("Fanout worker ended abnormally: {}", e);
            }
        }
        info!(
            pending = self.queue.in_flight(),
            "Fanout worker pool stopped"
        );
    }
}

async fn run_worker(
    worker_id: usize,
    engine: Arc<FanoutEngine>,
    queue: FanoutQueue,
    rx: Arc<Mutex<mpsc::Receiver<Envelope>>>,
    config: FanoutConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker_id, "Fanout worker started");

    loop {
        let envelope = tokio::select! {
            _ = shutdown.changed() => break,
            envelope = async { rx.lock().await.recv().await } => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let dispatcher = WorkerDispatcher(&queue);
        let outcome = tokio::time::timeout(
            config.batch_timeout(),
            engine.run_job(&envelope.job, &dispatcher),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {
                debug!(
                    worker_id,
                    kind = envelope.job.kind(),
                    post_id = %envelope.job.post_id(),
                    attempt = envelope.attempt,
                    "Fanout job done"
                );
                queue.finish();
            }
            Ok(Err(e)) => retry_or_dead_letter(&queue, &config, envelope, "error", &e.to_string()),
            Err(_) => retry_or_dead_letter(
                &queue,
                &config,
                envelope,
                "timeout",
                "job exceeded its time limit",
            ),
        }
    }

    debug!(worker_id, "Fanout worker stopped");
}

fn retry_or_dead_letter(
    queue: &FanoutQueue,
    config: &FanoutConfig,
    envelope: Envelope,
    reason: &str,
    detail: &str,
) {
    if envelope.attempt >= config.max_attempts {
        queue.dead_letter(&envelope.job, envelope.attempt, detail);
        return;
    }

    let delay = retry_delay(config.retry_backoff(), envelope.attempt);
    warn!(
        kind = envelope.job.kind(),
        post_id = %envelope.job.post_id(),
        attempt = envelope.attempt,
        reason,
        error = detail,
        delay_ms = delay.as_millis() as u64,
        "Fanout job failed, retrying"
    );
    metrics::record_job_retry(envelope.job.kind(), reason);

    queue.schedule_retry(
        Envelope {
            job: envelope.job,
            attempt: envelope.attempt + 1,
        },
        delay,
    );
}

/// `base * 2^(attempt-1)` plus up to 50% jitter, capped at one minute.
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
    let jitter_ms = if base.as_millis() > 1 {
        rand::thread_rng().gen_range(0..=(base.as_millis() as u64 / 2))
    } else {
        0
    };
    (exp + Duration::from_millis(jitter_ms)).min(MAX_RETRY_DELAY)
}
