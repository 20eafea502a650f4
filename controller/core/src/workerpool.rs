//! A fixed-size pool of workers draining a shared job queue.
//!
//! Jobs are async. Each submission hands back a receiver that resolves once
//! the job has run, whether it completed or panicked. Ordering between jobs
//! for the same target is not provided by the pool; jobs that need it
//! serialize on their own locks.

use futures::FutureExt;
use std::{panic::AssertUnwindSafe, sync::Arc};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info_span, warn, Instrument};

#[async_trait::async_trait]
pub trait Job: Send + 'static {
    async fn run(self: Box<Self>);

    /// A short label identifying the job in logs.
    fn job_name(&self) -> String;
}

#[derive(Clone, Debug)]
pub struct WorkerPool {
    tx: mpsc::UnboundedSender<Queued>,
    workers: usize,
}

struct Queued {
    job: Box<dyn Job>,
    done: oneshot::Sender<()>,
}

type SharedQueue = Arc<Mutex<mpsc::UnboundedReceiver<Queued>>>;

// === impl WorkerPool ===

impl WorkerPool {
    /// Spawns `size` workers onto the current runtime. A size of zero uses
    /// the available parallelism.
    ///
    /// Workers stop picking up jobs once `shutdown` is signaled; a job that
    /// is already running is allowed to finish.
    pub fn spawn(size: usize, shutdown: drain::Watch) -> Self {
        let workers = if size == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            size
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let rx = SharedQueue::new(Mutex::new(rx));
        for id in 0..workers {
            tokio::spawn(
                work(rx.clone(), shutdown.clone()).instrument(info_span!("worker", id)),
            );
        }
        debug!(workers, "Started worker pool");

        Self { tx, workers }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queues a job without waiting. The returned receiver resolves once the
    /// job has finished; it errors if the pool shut down before the job ran.
    pub fn add_job(&self, job: Box<dyn Job>) -> oneshot::Receiver<()> {
        let (done, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(Queued { job, .. })) = self.tx.send(Queued { job, done })
        {
            warn!(job = %job.job_name(), "Worker pool is shut down; dropping job");
        }
        rx
    }
}

async fn work(queue: SharedQueue, shutdown: drain::Watch) {
    loop {
        let next = {
            let mut queue = queue.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.clone().signaled() => None,
                next = queue.recv() => next,
            }
        };
        let Some(Queued { job, done }) = next else {
            debug!("Worker stopped");
            return;
        };

        let name = job.job_name();
        if AssertUnwindSafe(job.run()).catch_unwind().await.is_err() {
            warn!(job = %name, "Job panicked");
        }
        let _ = done.send(());
    }
}
