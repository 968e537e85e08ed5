use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{DisposeFlag, Disposable, Scheduler, SchedulerError, Task, Worker};

/// Runs every task on the calling thread before `schedule` returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, task: Task) -> Result<Box<dyn Disposable>, SchedulerError> {
        task();
        Ok(Box::new(DisposeFlag::disposed()))
    }

    fn create_worker(&self) -> Box<dyn Worker> {
        Box::new(ImmediateWorker {
            disposed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn dispose(&self) {}

    fn is_disposed(&self) -> bool {
        false
    }
}

struct ImmediateWorker {
    disposed: Arc<AtomicBool>,
}

impl Worker for ImmediateWorker {
    fn schedule(&self, task: Task) -> Result<Box<dyn Disposable>, SchedulerError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(SchedulerError::Disposed);
        }
        task();
        Ok(Box::new(DisposeFlag::disposed()))
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
