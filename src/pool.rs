//! Bounded worker pool used by every fan-out stage.
//!
//! A fixed number of tokio tasks drain a bounded job queue. Producers block on
//! [`WorkerPool::submit`] while the queue is full, and [`WorkerPool::join`]
//! returns once the queue is closed, drained, and every worker has finished
//! its last job. Each job runs in its own task so a panic only loses that job.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Pool of workers applying one handler to every submitted job.
pub struct WorkerPool<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Receiver<bool>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Start `workers` workers behind a queue holding up to `capacity` jobs.
    ///
    /// The handler receives the worker index and the job. Once `shutdown`
    /// flips to `true`, workers stop pulling jobs after the current one.
    pub fn spawn<F, Fut>(
        name: &'static str,
        workers: usize,
        capacity: usize,
        shutdown: watch::Receiver<bool>,
        handler: F,
    ) -> Self
    where
        F: Fn(usize, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let handler = Arc::new(handler);

        let handles = (0..workers)
            .map(|worker_id| {
                let rx = rx.clone();
                let handler = handler.clone();
                let mut shutdown = shutdown.clone();

                tokio::spawn(async move {
                    loop {
                        if *shutdown.borrow() {
                            debug!("[{} worker {}] stopping on shutdown", name, worker_id);
                            break;
                        }

                        // Hold the receiver only while waiting for one job
                        let job = {
                            let mut rx = rx.lock().await;
                            tokio::select! {
                                job = rx.recv() => job,
                                _ = stopped(&mut shutdown) => None,
                            }
                        };
                        let Some(job) = job else { break };

                        if let Err(e) = tokio::spawn(handler(worker_id, job)).await {
                            error!("[{} worker {}] job panicked: {}", name, worker_id, e);
                        }
                    }
                })
            })
            .collect();

        Self {
            name,
            tx,
            handles,
            shutdown,
        }
    }

    /// Queue a job, waiting while the queue is full. Returns `false` if the
    /// pool is shutting down and the job was not queued.
    pub async fn submit(&self, job: T) -> bool {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return false;
        }
        tokio::select! {
            sent = self.tx.send(job) => sent.is_ok(),
            _ = stopped(&mut shutdown) => false,
        }
    }

    /// Close the queue and wait for every worker to finish.
    pub async fn join(self) {
        let WorkerPool {
            name, tx, handles, ..
        } = self;
        drop(tx);

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("[{}] worker task failed: {}", name, e);
            }
        }
    }
}

/// Resolves once shutdown is requested. A dropped sender means shutdown can
/// never be requested, so this then never resolves.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
