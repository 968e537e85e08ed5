use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;

use super::{DisposeFlag, Disposable, Scheduler, SchedulerError, Task, Worker};
use crate::tracing_compat::{debug, error, warn};

struct Job {
    task: Task,
    handle: Arc<DisposeFlag>,
    worker: Option<Arc<AtomicBool>>,
}

impl Job {
    fn is_cancelled(&self) -> bool {
        self.handle.is_disposed()
            || self
                .worker
                .as_ref()
                .is_some_and(|disposed| disposed.load(Ordering::Acquire))
    }
}

struct Shared {
    queue: SegQueue<Job>,
    disposed: AtomicBool,
    thread: OnceLock<Thread>,
}

impl Shared {
    fn push(&self, task: Task, worker: Option<Arc<AtomicBool>>) -> Result<Box<dyn Disposable>, SchedulerError> {
        let Some(thread) = self.thread.get() else {
            return Err(SchedulerError::Rejected(
                "scheduler thread is not running".to_owned(),
            ));
        };
        let handle = Arc::new(DisposeFlag::new());
        self.queue.push(Job {
            task,
            handle: Arc::clone(&handle),
            worker,
        });
        if self.disposed.load(Ordering::SeqCst) {
            // The thread may already be gone; pending jobs are dropped unrun.
            self.discard_pending();
            return Err(SchedulerError::Disposed);
        }
        thread.unpark();
        Ok(Box::new(handle))
    }

    fn discard_pending(&self) {
        while let Some(job) = self.queue.pop() {
            drop(job);
        }
    }

    fn run(&self) {
        loop {
            while let Some(job) = self.queue.pop() {
                if self.disposed.load(Ordering::SeqCst) {
                    drop(job);
                    break;
                }
                if job.is_cancelled() {
                    continue;
                }
                job.handle.dispose();
                if catch_unwind(AssertUnwindSafe(job.task)).is_err() {
                    error!("task panicked on the single scheduler");
                }
            }
            if self.disposed.load(Ordering::SeqCst) {
                self.discard_pending();
                return;
            }
            thread::park();
        }
    }
}

/// Runs tasks in submission order on one background thread.
///
/// The thread starts with the first scheduled task or worker and stops when
/// the scheduler is disposed or dropped. Tasks still queued at that point
/// are dropped without running.
pub struct SingleScheduler {
    shared: Arc<Shared>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl SingleScheduler {
    /// Creates an idle scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: SegQueue::new(),
                disposed: AtomicBool::new(false),
                thread: OnceLock::new(),
            }),
            join: Mutex::new(None),
        }
    }

    fn start(&self) -> Result<(), SchedulerError> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(SchedulerError::Disposed);
        }
        let mut join = self.join.lock();
        if self.shared.thread.get().is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("tributary-single".to_owned())
            .spawn(move || shared.run())
            .map_err(|err| SchedulerError::Rejected(err.to_string()))?;
        let _ = self.shared.thread.set(handle.thread().clone());
        *join = Some(handle);
        debug!("single scheduler thread started");
        Ok(())
    }
}

impl Default for SingleScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for SingleScheduler {
    fn schedule(&self, task: Task) -> Result<Box<dyn Disposable>, SchedulerError> {
        self.start()?;
        self.shared.push(task, None)
    }

    fn create_worker(&self) -> Box<dyn Worker> {
        if let Err(err) = self.start() {
            warn!("worker created on an unavailable single scheduler: {}", err);
        }
        Box::new(SingleWorker {
            shared: Arc::clone(&self.shared),
            disposed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(thread) = self.shared.thread.get() {
            thread.unpark();
        }
        let join = self.join.lock().take();
        if let Some(join) = join {
            if join.thread().id() != thread::current().id() {
                let _ = join.join();
            }
        }
        debug!("single scheduler disposed");
    }

    fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }
}

impl Drop for SingleScheduler {
    fn drop(&mut self) {
        Scheduler::dispose(self);
    }
}

/// Holds the shared queue rather than the scheduler, so a worker outliving
/// its scheduler sees it disposed.
struct SingleWorker {
    shared: Arc<Shared>,
    disposed: Arc<AtomicBool>,
}

impl Worker for SingleWorker {
    fn schedule(&self, task: Task) -> Result<Box<dyn Disposable>, SchedulerError> {
        if self.disposed.load(Ordering::Acquire) || self.shared.disposed.load(Ordering::Acquire) {
            return Err(SchedulerError::Disposed);
        }
        self.shared.push(task, Some(Arc::clone(&self.disposed)))
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
