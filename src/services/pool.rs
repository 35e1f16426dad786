use crate::error::EngineError;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tokio::sync::oneshot;

/// Fixed-size pool for CPU-bound jobs, awaited from async code.
///
/// Jobs are plain synchronous closures; the pool only moves them to worker
/// threads and hands results back through oneshot channels. Dropping the
/// awaiting future abandons the result but lets a running job finish.
pub struct WorkerPool {
    pool: ThreadPool,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self, EngineError> {
        let size = size.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|i| format!("cardsieve-worker-{}", i))
            .panic_handler(|_| log::error!("Worker task panicked"))
            .build()?;

        Ok(Self { pool, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run one job on the pool and await its result.
    pub async fn run<F, T>(&self, job: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.pool.spawn(move || {
            let _ = tx.send(job());
        });
        rx.await.map_err(|_| EngineError::WorkerLost)
    }

    /// Fan out every job, then await all results in submission order.
    pub async fn run_all<F, T>(&self, jobs: Vec<F>) -> Result<Vec<T>, EngineError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let receivers: Vec<oneshot::Receiver<T>> = jobs
            .into_iter()
            .map(|job| {
                let (tx, rx) = oneshot::channel();
                self.pool.spawn(move || {
                    let _ = tx.send(job());
                });
                rx
            })
            .collect();

        let mut results = Vec::with_capacity(receivers.len());
        for rx in receivers {
            results.push(rx.await.map_err(|_| EngineError::WorkerLost)?);
        }
        Ok(results)
    }
}
