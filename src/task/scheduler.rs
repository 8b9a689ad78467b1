//! Where tasks are polled
//!
//! A scheduler receives a `TaskRunnable` each time a task is woken and decides
//! which thread runs it. Code after an `.await` runs wherever the task's
//! scheduler puts it, so steps that record with a worker's pools use a pinned
//! `PoolScheduler`.

use super::task_core::{Task, TaskRunnable};
use super::TaskResult;
use crate::gpu::GpuBackend;
use crate::panic_handler::invariant_violation;
use crate::thread_pool::thread_pool_operations::add_resume_work;
use crate::thread_pool::{WorkerId, WorkerPoolHandle};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::future::Future;
use std::sync::Arc;
use std::thread::{self, ThreadId};

pub trait TaskScheduler: Send + Sync + 'static {
    fn schedule(&self, runnable: TaskRunnable);
}

/// Spawn a task on `scheduler`
pub fn spawn<S, T, F>(scheduler: &Arc<S>, name: impl Into<String>, future: F) -> Task<T>
where
    S: TaskScheduler,
    T: Send + 'static,
    F: Future<Output = TaskResult<T>> + Send + 'static,
{
    let scheduler: Arc<dyn TaskScheduler> = Arc::clone(scheduler) as Arc<dyn TaskScheduler>;
    Task::spawn(scheduler, name, future)
}

/// Tasks resumed on the thread that created the queue.
///
/// Runnables accumulate until that thread calls `run_pending`, typically once
/// per frame tick.
pub struct MainThreadQueue {
    sender: Sender<TaskRunnable>,
    receiver: Receiver<TaskRunnable>,
    owner: ThreadId,
}

impl MainThreadQueue {
    /// Create a queue owned by the calling thread
    pub fn new() -> Arc<Self> {
        let (sender, receiver) = unbounded();
        Arc::new(Self {
            sender,
            receiver,
            owner: thread::current().id(),
        })
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Poll every task that was queued before this call.
    ///
    /// Tasks woken while running are left for the next call. Returns how many
    /// polls ran.
    pub fn run_pending(&self) -> usize {
        if thread::current().id() != self.owner {
            invariant_violation("MainThreadQueue pumped from a thread other than its owner");
        }
        let queued = self.receiver.len();
        let mut ran = 0;
        for _ in 0..queued {
            match self.receiver.try_recv() {
                Ok(runnable) => {
                    runnable.run();
                    ran += 1;
                }
                Err(_) => break,
            }
        }
        if ran > 0 {
            log::trace!("[MainThreadQueue::run_pending] Ran {} task polls", ran);
        }
        ran
    }
}

impl TaskScheduler for MainThreadQueue {
    fn schedule(&self, runnable: TaskRunnable) {
        // The queue holds its own receiver, so sending cannot fail
        let _ = self.sender.send(runnable);
    }
}

/// Tasks resumed on the worker pool as foreground work
pub struct PoolScheduler<B: GpuBackend> {
    pool: WorkerPoolHandle<B>,
    pinned: Option<WorkerId>,
}

impl<B: GpuBackend> PoolScheduler<B> {
    /// Resume on whichever worker is free
    pub fn new(pool: &WorkerPoolHandle<B>) -> Arc<Self> {
        Arc::new(Self {
            pool: pool.clone(),
            pinned: None,
        })
    }

    /// Resume only on `worker`, whose pools recorded the task's buffers
    pub fn pinned(pool: &WorkerPoolHandle<B>, worker: WorkerId) -> Arc<Self> {
        Arc::new(Self {
            pool: pool.clone(),
            pinned: Some(worker),
        })
    }

    pub fn worker(&self) -> Option<WorkerId> {
        self.pinned
    }
}

impl<B: GpuBackend> TaskScheduler for PoolScheduler<B> {
    fn schedule(&self, runnable: TaskRunnable) {
        let name = runnable.task_name().to_string();
        if let Err(e) = add_resume_work(&self.pool, runnable, self.pinned) {
            log::debug!("[PoolScheduler::schedule] Dropped resumption of '{}': {}", name, e);
        }
    }
}
