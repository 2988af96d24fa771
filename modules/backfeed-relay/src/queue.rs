// In-process at-least-once job queue.
//
// Stands in for an external task scheduler: jobs may be delayed, duplicated,
// and are retried with backoff on handler failure. Handlers are written to be
// idempotent, so redelivery is safe by construction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use backfeed_common::{CommentId, SourceId};

/// Retries per job before it is dropped.
pub const MAX_JOB_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Job {
    Poll {
        source_id: SourceId,
        /// De-duplication token: the `last_polled` value this job expects the
        /// source to still have.
        last_polled: DateTime<Utc>,
    },
    Propagate {
        comment_id: CommentId,
    },
}

impl Job {
    fn label(&self) -> String {
        match self {
            Job::Poll { source_id, .. } => format!("poll {source_id}"),
            Job::Propagate { comment_id } => format!("propagate {comment_id}"),
        }
    }
}

#[derive(Debug)]
struct QueuedJob {
    job: Job,
    attempt: u32,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// First-retry backoff; doubles per attempt, plus jitter.
    pub retry_base: Duration,
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry_base: Duration::from_secs(30),
            max_attempts: MAX_JOB_ATTEMPTS,
        }
    }
}

/// Cheap clonable enqueue handle.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
}

pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<QueuedJob>,
}

#[cfg(any(test, feature = "test-support"))]
impl JobReceiver {
    /// Pop the next already-delivered job, if any. Lets tests drive handlers
    /// directly and still assert on what was enqueued.
    pub fn try_next(&mut self) -> Option<Job> {
        self.rx.try_recv().ok().map(|queued| queued.job)
    }
}

impl JobQueue {
    pub fn new() -> (JobQueue, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (JobQueue { tx }, JobReceiver { rx })
    }

    /// Enqueue a job, optionally delayed. Enqueueing after shutdown is a
    /// silent no-op.
    pub fn enqueue(&self, job: Job, delay: Duration) {
        self.push(QueuedJob { job, attempt: 0 }, delay);
    }

    fn push(&self, queued: QueuedJob, delay: Duration) {
        if delay.is_zero() {
            let _ = self.tx.send(queued);
            return;
        }
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(queued);
        });
    }
}

/// Spawn `workers` tasks draining the queue. The receiver is shared; each
/// worker takes the next due job, dispatches, and requeues failures with
/// exponential backoff until `max_attempts`.
pub fn spawn_workers(
    workers: usize,
    receiver: JobReceiver,
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    config: QueueConfig,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(tokio::sync::Mutex::new(receiver.rx));

    (0..workers)
        .map(|worker| {
            let rx = rx.clone();
            let queue = queue.clone();
            let handler = handler.clone();
            let config = config.clone();
            tokio::spawn(async move {
                loop {
                    let queued = match rx.lock().await.recv().await {
                        Some(queued) => queued,
                        None => break, // queue dropped, drain done
                    };
                    dispatch(worker, queued, &queue, handler.as_ref(), &config).await;
                }
            })
        })
        .collect()
}

async fn dispatch(
    worker: usize,
    queued: QueuedJob,
    queue: &JobQueue,
    handler: &dyn JobHandler,
    config: &QueueConfig,
) {
    let label = queued.job.label();
    match handler.handle(&queued.job).await {
        Ok(()) => {
            info!(worker, job = label.as_str(), attempt = queued.attempt, "Job done");
        }
        Err(e) => {
            let attempt = queued.attempt + 1;
            if attempt >= config.max_attempts {
                error!(
                    worker,
                    job = label.as_str(),
                    attempt,
                    error = %e,
                    "Job failed permanently, dropping"
                );
                return;
            }

            let delay = backoff(config.retry_base, attempt);
            warn!(
                worker,
                job = label.as_str(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Job failed, will retry"
            );
            queue.push(
                QueuedJob {
                    job: queued.job,
                    attempt,
                },
                delay,
            );
        }
    }
}

/// Exponential backoff with up to 25% random jitter.
fn backoff(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << attempt.min(10));
    let jitter = rand::rng().random_range(0.0..0.25);
    exp.mul_f64(1.0 + jitter)
}
