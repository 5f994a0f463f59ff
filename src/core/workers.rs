//! Decode thread pool for background preloading
//!
//! Work-stealing deques: jobs go to a shared injector, idle threads steal
//! from each other. Jobs queued with an epoch are dropped at execution time
//! once the epoch has moved on, which is how a preload pass is abandoned
//! between frames.

use crossbeam::deque::{Injector, Stealer, Worker};
use log::{error, info, trace};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Thread count used when the configuration asks for "auto" (0).
///
/// Three quarters of the logical CPUs, at least one.
pub fn auto_threads() -> usize {
    (num_cpus::get() * 3 / 4).max(1)
}

/// Pool of named decode threads sharing one epoch counter with
/// [`CacheManager`](super::CacheManager).
///
/// ```ignore
/// let workers = Workers::new(4, manager.epoch_ref());
/// let epoch = workers.current_epoch();
/// workers.execute_with_epoch(epoch, move || {
///     // decode a frame
/// });
/// ```
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    current_epoch: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
}

fn run(worker_id: usize, worker: Worker<Job>, injector: Arc<Injector<Job>>, stealers: Vec<Stealer<Job>>, shutdown: Arc<AtomicBool>) {
    trace!("Worker {} started", worker_id);
    loop {
        let job = worker
            .pop()
            .or_else(|| injector.steal().success())
            .or_else(|| stealers.iter().find_map(|s| s.steal().success()));
        if let Some(job) = job {
            job();
            continue;
        }
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    trace!("Worker {} stopped", worker_id);
}

impl Workers {
    /// Spawn `num_threads` workers (0 means [`auto_threads`]).
    ///
    /// A thread that fails to spawn is logged and left out; the pool runs
    /// with whatever started.
    pub fn new(num_threads: usize, epoch: Arc<AtomicU64>) -> Self {
        let num_threads = if num_threads == 0 { auto_threads() } else { num_threads };
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let locals: Vec<Worker<Job>> = (0..num_threads).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<Stealer<Job>> = locals.iter().map(Worker::stealer).collect();

        let mut handles = Vec::with_capacity(num_threads);
        for (worker_id, worker) in locals.into_iter().enumerate() {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);
            let stealers = stealers.clone();
            match thread::Builder::new()
                .name(format!("seqio-worker-{}", worker_id))
                .spawn(move || run(worker_id, worker, injector, stealers, shutdown))
            {
                Ok(handle) => handles.push(handle),
                Err(e) => error!("Failed to spawn worker {}: {}", worker_id, e),
            }
        }

        info!("Workers initialized: {} threads", handles.len());
        Self {
            injector,
            handles,
            current_epoch: epoch,
            shutdown,
        }
    }

    /// Number of running threads.
    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Queue a job unconditionally.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.injector.push(Box::new(f));
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Relaxed)
    }

    /// Queue a job that only runs if the epoch still equals `epoch` when a
    /// worker picks it up.
    pub fn execute_with_epoch<F>(&self, epoch: u64, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let current_epoch = Arc::clone(&self.current_epoch);
        self.injector.push(Box::new(move || {
            if current_epoch.load(Ordering::Relaxed) == epoch {
                f();
            } else {
                trace!("Dropped stale job (epoch {})", epoch);
            }
        }));
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);
        self.shutdown.store(true, Ordering::SeqCst);

        // Queued jobs still drain; a decode in progress is never interrupted.
        let deadline = Instant::now() + Duration::from_millis(500);
        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, detaching remaining workers");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }
        trace!("All {} workers stopped", num_threads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    /// Test: every queued job runs exactly once
    #[test]
    fn test_execute() {
        let workers = Workers::new(3, Arc::new(AtomicU64::new(0)));
        assert_eq!(workers.threads(), 3);

        let (tx, rx) = unbounded();
        for i in 0..32 {
            let tx = tx.clone();
            workers.execute(move || {
                let _ = tx.send(i);
            });
        }
        let mut got: Vec<i32> = (0..32)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        got.sort();
        assert_eq!(got, (0..32).collect::<Vec<_>>());
    }

    /// Test: jobs queued under an old epoch are dropped
    #[test]
    fn test_epoch_skip() {
        let epoch = Arc::new(AtomicU64::new(0));
        let workers = Workers::new(1, Arc::clone(&epoch));
        let (tx, rx) = unbounded();

        // Hold the only worker so the stale job is still queued when the epoch moves.
        let (gate_tx, gate_rx) = unbounded::<()>();
        workers.execute(move || {
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
        });
        let stale = tx.clone();
        workers.execute_with_epoch(0, move || {
            let _ = stale.send("stale");
        });
        epoch.store(1, Ordering::Relaxed);
        workers.execute_with_epoch(1, move || {
            let _ = tx.send("fresh");
        });
        gate_tx.send(()).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "fresh");
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_auto_threads() {
        assert!(auto_threads() >= 1);
        let workers = Workers::new(0, Arc::new(AtomicU64::new(0)));
        assert_eq!(workers.threads(), auto_threads());
    }
}
