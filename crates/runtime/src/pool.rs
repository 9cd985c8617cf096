//! Work-stealing thread pool
//!
//! A fixed set of OS worker threads, sized to the CPU count at startup and
//! clamped to `[MIN_WORKERS, MAX_WORKERS]`. Each worker owns a Chase–Lev
//! deque; a global submission queue feeds the pool and doubles as the
//! parking spot for idle workers.
//!
//! ## Worker loop
//!
//! 1. pop from the worker's own deque;
//! 2. otherwise try the global submission queue (non-blocking);
//! 3. otherwise attempt steals from pseudo-random siblings, up to about
//!    4× the worker count;
//! 4. otherwise block on the submission-queue condvar with a short timeout
//!    (~100 µs) so wake-ups amortize.
//!
//! Submitting from a worker thread pushes to that worker's own deque to
//! preserve locality; overflow past the deque's capacity ceiling, and all
//! submissions from non-pool threads, go to the global queue.
//!
//! On shutdown the flag is set and the queue is broadcast; workers drain
//! their own deque and the global queue, then exit.
//!
//! Pool initialization is idempotent under a global mutex. Signals are
//! blocked on every worker; only the main thread receives them.

use crate::deque::{Deque, Steal};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::Duration;

pub const MIN_WORKERS: usize = 2;
pub const MAX_WORKERS: usize = 64;

/// Idle-worker park interval on the submission queue.
const PARK_TIMEOUT: Duration = Duration::from_micros(100);

type Job = Box<dyn FnOnce() + Send + 'static>;

/// One unit of pool work: a job plus a completion flag with a lazily
/// allocated waiter slot.
///
/// `signal_complete` publishes the flag with at least release ordering, so
/// a waiter that observes it set also observes everything the job wrote.
pub struct WorkItem {
    job: Mutex<Option<Job>>,
    completed: AtomicBool,
    waiter: OnceLock<WaiterSlot>,
}

struct WaiterSlot {
    lock: Mutex<bool>,
    cond: Condvar,
}

impl WorkItem {
    pub fn new(job: Job) -> Arc<WorkItem> {
        Arc::new(WorkItem {
            job: Mutex::new(Some(job)),
            completed: AtomicBool::new(false),
            waiter: OnceLock::new(),
        })
    }

    /// Execute the job (at most once) and signal completion.
    pub fn run(&self) {
        let job = self.job.lock().expect("work item job lock poisoned").take();
        if let Some(job) = job {
            job();
        }
        self.signal_complete();
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Set the completed flag; if a waiter slot was attached, wake it under
    /// its mutex.
    fn signal_complete(&self) {
        self.completed.store(true, Ordering::SeqCst);
        if let Some(slot) = self.waiter.get() {
            let mut done = slot.lock.lock().expect("work item waiter lock poisoned");
            *done = true;
            slot.cond.notify_all();
        }
    }

    /// Block until the job has run. Fast-checks the flag before allocating
    /// the waiter slot.
    pub fn wait(&self) {
        if self.completed.load(Ordering::SeqCst) {
            return;
        }
        let slot = self.waiter.get_or_init(|| WaiterSlot {
            lock: Mutex::new(false),
            cond: Condvar::new(),
        });
        let mut done = slot.lock.lock().expect("work item waiter lock poisoned");
        // Re-check after attaching the slot: the completer either sees the
        // slot and notifies, or completed before we got here.
        while !*done && !self.completed.load(Ordering::SeqCst) {
            let (guard, _timeout) = slot
                .cond
                .wait_timeout(done, Duration::from_millis(10))
                .expect("work item waiter wait failed");
            done = guard;
        }
    }
}

struct PoolShared {
    injector: Mutex<VecDeque<Arc<WorkItem>>>,
    injector_cond: Condvar,
    deques: Vec<Arc<Deque>>,
    shutdown: AtomicBool,
}

impl PoolShared {
    fn try_pop_global(&self) -> Option<Arc<WorkItem>> {
        self.injector
            .lock()
            .expect("submission queue lock poisoned")
            .pop_front()
    }

    fn push_global(&self, item: Arc<WorkItem>) {
        self.injector
            .lock()
            .expect("submission queue lock poisoned")
            .push_back(item);
        self.injector_cond.notify_one();
    }
}

thread_local! {
    /// Set on pool worker threads; `submit` uses it for the own-deque fast
    /// path. The pool identity guards against a worker of one pool pushing
    /// into another pool's deque as if it owned it.
    static WORKER_IDENTITY: std::cell::Cell<Option<(usize, usize)>> =
        const { std::cell::Cell::new(None) };
}

/// The pool handle. One per process in normal operation (see [`global`]).
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
    worker_count: usize,
    stopped: AtomicBool,
    /// Tasks executed, for diagnostics.
    pub completed_count: AtomicU64,
}

impl ThreadPool {
    /// Spawn a pool with `workers` threads (clamped to the documented
    /// bounds).
    pub fn with_workers(workers: usize) -> Arc<ThreadPool> {
        let count = workers.clamp(MIN_WORKERS, MAX_WORKERS);
        let deques: Vec<Arc<Deque>> = (0..count).map(|_| Arc::new(Deque::new())).collect();
        let shared = Arc::new(PoolShared {
            injector: Mutex::new(VecDeque::new()),
            injector_cond: Condvar::new(),
            deques,
            shutdown: AtomicBool::new(false),
        });
        let pool = Arc::new(ThreadPool {
            shared: Arc::clone(&shared),
            workers: Mutex::new(Vec::new()),
            worker_count: count,
            stopped: AtomicBool::new(false),
            completed_count: AtomicU64::new(0),
        });
        let mut handles = Vec::with_capacity(count);
        for idx in 0..count {
            let shared = Arc::clone(&shared);
            let pool_ref = Arc::clone(&pool);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("rill-worker-{idx}"))
                    .spawn(move || worker_loop(idx, &shared, &pool_ref))
                    .expect("failed to spawn pool worker"),
            );
        }
        *pool.workers.lock().expect("pool worker list lock poisoned") = handles;
        tracing::debug!(workers = count, "thread pool started");
        pool
    }

    /// Pool sized to the CPU count.
    pub fn with_default_size() -> Arc<ThreadPool> {
        let cpus = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(MIN_WORKERS);
        ThreadPool::with_workers(cpus)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Submit a job, returning its work item for optional waiting.
    pub fn submit(&self, job: Job) -> Arc<WorkItem> {
        let item = WorkItem::new(job);
        self.submit_item(Arc::clone(&item));
        item
    }

    fn submit_item(&self, item: Arc<WorkItem>) {
        // From one of this pool's own workers, keep the work local.
        let own = WORKER_IDENTITY.with(|id| id.get());
        if let Some((pool_id, idx)) = own {
            if pool_id == Arc::as_ptr(&self.shared) as usize && idx < self.shared.deques.len() {
                match self.shared.deques[idx].push(item) {
                    Ok(()) => {
                        // Someone may be parked with everything else empty.
                        self.shared.injector_cond.notify_one();
                        return;
                    }
                    Err(back) => {
                        self.shared.push_global(back);
                        return;
                    }
                }
            }
        }
        self.shared.push_global(item);
    }

    /// Set the shutdown flag, broadcast the submission queue, and join the
    /// workers. Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.injector_cond.notify_all();
        let handles = std::mem::take(
            &mut *self.workers.lock().expect("pool worker list lock poisoned"),
        );
        for handle in handles {
            let _ = handle.join();
        }
        tracing::debug!("thread pool stopped");
    }
}

/// Block every signal on the calling worker thread; signal delivery is the
/// main thread's job.
#[cfg(unix)]
fn block_signals_on_worker() {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigfillset(&mut set);
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
    }
}

#[cfg(not(unix))]
fn block_signals_on_worker() {}

fn worker_loop(idx: usize, shared: &Arc<PoolShared>, pool: &Arc<ThreadPool>) {
    WORKER_IDENTITY.with(|slot| slot.set(Some((Arc::as_ptr(shared) as usize, idx))));
    block_signals_on_worker();
    let mut rng = SmallRng::seed_from_u64(0x9E3779B9u64.wrapping_mul(idx as u64 + 1));
    let own = &shared.deques[idx];
    let steal_attempts = 4 * shared.deques.len();

    loop {
        // 1. Own deque.
        if let Some(item) = own.pop() {
            item.run();
            pool.completed_count.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        // 2. Global submission queue.
        if let Some(item) = shared.try_pop_global() {
            item.run();
            pool.completed_count.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        // 3. Steal from a pseudo-random sibling.
        let mut stolen = None;
        for _ in 0..steal_attempts {
            let victim = rng.gen_range(0..shared.deques.len());
            if victim == idx {
                continue;
            }
            match shared.deques[victim].steal() {
                Steal::Item(item) => {
                    stolen = Some(item);
                    break;
                }
                Steal::Retry => std::hint::spin_loop(),
                Steal::Empty => {}
            }
        }
        if let Some(item) = stolen {
            item.run();
            pool.completed_count.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        if shared.shutdown.load(Ordering::SeqCst) {
            // Drain: anything left in the own deque or the global queue
            // still runs before exit.
            while let Some(item) = own.pop() {
                item.run();
            }
            while let Some(item) = shared.try_pop_global() {
                item.run();
            }
            break;
        }

        // 4. Park briefly on the submission queue.
        let guard = shared
            .injector
            .lock()
            .expect("submission queue lock poisoned");
        if guard.is_empty() && !shared.shutdown.load(Ordering::SeqCst) {
            let _ = shared
                .injector_cond
                .wait_timeout(guard, PARK_TIMEOUT)
                .expect("submission queue wait failed");
        }
    }
    tracing::trace!(worker = idx, "worker exited");
}

// ---------------------------------------------------------------------------
// Process-global pool
// ---------------------------------------------------------------------------

static GLOBAL_POOL: OnceLock<Arc<ThreadPool>> = OnceLock::new();
static INIT_LOCK: Mutex<Option<usize>> = Mutex::new(None);

/// Request a worker count before the pool first starts. Silently ignored
/// once the pool is running (initialization is first-wins and idempotent).
pub fn configure_workers(count: usize) {
    let mut pending = INIT_LOCK.lock().expect("pool init lock poisoned");
    if GLOBAL_POOL.get().is_none() {
        *pending = Some(count);
    }
}

/// The process-wide pool, started on first use under the init mutex.
pub fn global() -> &'static Arc<ThreadPool> {
    GLOBAL_POOL.get_or_init(|| {
        let pending = INIT_LOCK.lock().expect("pool init lock poisoned");
        match *pending {
            Some(count) => ThreadPool::with_workers(count),
            None => ThreadPool::with_default_size(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_work_item_wait_after_completion() {
        let item = WorkItem::new(Box::new(|| {}));
        item.run();
        // Fast path: already completed.
        item.wait();
        assert!(item.is_completed());
    }

    #[test]
    fn test_submit_and_wait() {
        let pool = ThreadPool::with_workers(2);
        static RAN: AtomicBool = AtomicBool::new(false);
        let item = pool.submit(Box::new(|| {
            RAN.store(true, Ordering::SeqCst);
        }));
        item.wait();
        assert!(RAN.load(Ordering::SeqCst));
        pool.shutdown();
    }

    #[test]
    fn test_many_items_all_complete() {
        // Work-stealing liveness: far more items than workers, every one
        // runs.
        let pool = ThreadPool::with_workers(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let items: Vec<_> = (0..2000)
            .map(|_| {
                let counter = Arc::clone(&counter);
                pool.submit(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
            })
            .collect();
        for item in &items {
            item.wait();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2000);
        pool.shutdown();
    }

    #[test]
    fn test_jobs_submitted_from_workers_complete() {
        // A job that submits more jobs exercises the own-deque fast path.
        let pool = ThreadPool::with_workers(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let inner_items = Arc::new(Mutex::new(Vec::new()));
        {
            let pool2 = Arc::clone(&pool);
            let counter2 = Arc::clone(&counter);
            let inner2 = Arc::clone(&inner_items);
            let outer = pool.submit(Box::new(move || {
                for _ in 0..50 {
                    let counter3 = Arc::clone(&counter2);
                    let item = pool2.submit(Box::new(move || {
                        counter3.fetch_add(1, Ordering::SeqCst);
                    }));
                    inner2.lock().unwrap().push(item);
                }
            }));
            outer.wait();
        }
        let items = std::mem::take(&mut *inner_items.lock().unwrap());
        for item in items {
            item.wait();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 50);
        pool.shutdown();
    }

    #[test]
    fn test_shutdown_is_idempotent_and_drains() {
        let pool = ThreadPool::with_workers(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.shutdown();
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_worker_count_clamped() {
        let pool = ThreadPool::with_workers(1);
        assert_eq!(pool.worker_count(), MIN_WORKERS);
        pool.shutdown();
        let pool = ThreadPool::with_workers(10_000);
        assert_eq!(pool.worker_count(), MAX_WORKERS);
        pool.shutdown();
    }

    #[test]
    #[serial_test::serial(global_pool)]
    fn test_global_pool_idempotent() {
        let a = global() as *const _;
        let b = global() as *const _;
        assert_eq!(a, b);
    }
}
