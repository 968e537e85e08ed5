//! Schedulers: where `publish_on` runs its drain loop.
//!
//! A [`Scheduler`] runs tasks directly or through a [`Worker`], which keeps
//! the tasks it is given in submission order. Every scheduled task returns a
//! [`Disposable`] that prevents it from running if disposed in time.
//!
//! - [`immediate()`]: runs tasks inline on the calling thread
//! - [`single()`]: runs tasks on one dedicated background thread

mod immediate;
mod single;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

pub use immediate::ImmediateScheduler;
pub use single::SingleScheduler;

/// A unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Error returned when a task cannot be accepted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// The scheduler or worker was disposed.
    #[error("scheduler is disposed")]
    Disposed,
    /// The scheduler refused the task for another reason.
    #[error("task rejected: {0}")]
    Rejected(String),
}

/// Handle to something that can be cancelled.
pub trait Disposable: Send + Sync {
    /// Cancels the task if it did not start yet. Idempotent.
    fn dispose(&self);

    /// Returns true once disposed.
    fn is_disposed(&self) -> bool;
}

/// A serial view of a scheduler.
pub trait Worker: Send + Sync {
    /// Schedules `task` after every task this worker accepted before.
    fn schedule(&self, task: Task) -> Result<Box<dyn Disposable>, SchedulerError>;

    /// Disposes the worker; pending tasks do not run.
    fn dispose(&self);

    /// Returns true once disposed.
    fn is_disposed(&self) -> bool;
}

/// A source of execution contexts.
pub trait Scheduler: Send + Sync {
    /// Schedules a one-off task.
    fn schedule(&self, task: Task) -> Result<Box<dyn Disposable>, SchedulerError>;

    /// Creates a worker.
    fn create_worker(&self) -> Box<dyn Worker>;

    /// Disposes the scheduler and every worker created from it. Queued tasks
    /// are dropped without running.
    fn dispose(&self);

    /// Returns true once disposed.
    fn is_disposed(&self) -> bool;
}

/// The inline scheduler.
#[must_use]
pub fn immediate() -> Arc<dyn Scheduler> {
    Arc::new(ImmediateScheduler)
}

/// A scheduler backed by one new background thread.
#[must_use]
pub fn single() -> Arc<dyn Scheduler> {
    Arc::new(SingleScheduler::new())
}

/// A flag-backed [`Disposable`].
#[derive(Debug, Default)]
pub struct DisposeFlag {
    disposed: AtomicBool,
}

impl DisposeFlag {
    /// Creates a live flag.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            disposed: AtomicBool::new(false),
        }
    }

    /// Creates an already disposed flag.
    #[must_use]
    pub const fn disposed() -> Self {
        Self {
            disposed: AtomicBool::new(true),
        }
    }
}

impl Disposable for DisposeFlag {
    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Disposable for Arc<DisposeFlag> {
    fn dispose(&self) {
        DisposeFlag::dispose(self);
    }

    fn is_disposed(&self) -> bool {
        DisposeFlag::is_disposed(self)
    }
}
