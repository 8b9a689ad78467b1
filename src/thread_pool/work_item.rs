//! Work items and the closed set of schedulable work
//!
//! Everything the pool runs is a `Work<B>`: a user work item, a dependency
//! aggregator, or the resumption of a suspended task. Only user items go
//! through dynamic dispatch; the scheduler's own variants are matched.

use super::aggregator::DependencyAggregator;
use super::worker_thread::WorkerContext;
use crate::gpu::GpuBackend;
use crate::task::TaskRunnable;
use std::fmt;
use std::marker::PhantomData;

/// Priority of ordinary work
pub const DEFAULT_PRIORITY: f32 = 0.0;

/// Acceleration-structure builds run ahead of ordinary geometry work
pub const ACCELERATION_STRUCTURE_PRIORITY: f32 = 2.0;

/// Speculative preprocessing runs only when nothing else is queued
pub const SPECULATIVE_PRIORITY: f32 = -1.0;

/// A unit of CPU work, optionally producing command buffers and children.
///
/// `process` consumes the item, so it runs at most once. It has no error
/// return: a broken precondition or a GPU failure goes through
/// `panic_handler::fatal`.
pub trait WorkItem<B: GpuBackend>: Send + 'static {
    fn process(self: Box<Self>, ctx: &mut WorkerContext<'_, B>);

    /// Higher runs first
    fn priority(&self) -> f32 {
        DEFAULT_PRIORITY
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Which shared queue a child goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueTier {
    /// Must retire before its frame is submitted
    Foreground,
    /// Opportunistic
    Background,
}

/// Everything the pool can schedule
pub enum Work<B: GpuBackend> {
    Item(Box<dyn WorkItem<B>>),
    Aggregate(DependencyAggregator<B>),
    Resume(TaskRunnable),
}

impl<B: GpuBackend> Work<B> {
    pub fn item(item: impl WorkItem<B>) -> Self {
        Work::Item(Box::new(item))
    }

    /// Scheduling priority; task resumptions use the pool's configured value
    pub fn priority(&self, resume_priority: f32) -> f32 {
        match self {
            Work::Item(item) => item.priority(),
            Work::Aggregate(aggregator) => aggregator.priority(),
            Work::Resume(_) => resume_priority,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Work::Item(item) => item.name(),
            Work::Aggregate(_) => "dependency_aggregator",
            Work::Resume(runnable) => runnable.task_name(),
        }
    }
}

impl<B: GpuBackend> fmt::Debug for Work<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Work::Item(item) => write!(f, "Work::Item({})", item.name()),
            Work::Aggregate(aggregator) => {
                write!(f, "Work::Aggregate({} children)", aggregator.len())
            }
            Work::Resume(runnable) => write!(f, "Work::Resume({})", runnable.task_name()),
        }
    }
}

impl<B: GpuBackend> From<Box<dyn WorkItem<B>>> for Work<B> {
    fn from(item: Box<dyn WorkItem<B>>) -> Self {
        Work::Item(item)
    }
}

impl<B: GpuBackend> From<DependencyAggregator<B>> for Work<B> {
    fn from(aggregator: DependencyAggregator<B>) -> Self {
        Work::Aggregate(aggregator)
    }
}

impl<B: GpuBackend> From<TaskRunnable> for Work<B> {
    fn from(runnable: TaskRunnable) -> Self {
        Work::Resume(runnable)
    }
}

/// Work item built from a closure
pub struct FnWorkItem<B, F> {
    name: String,
    priority: f32,
    f: F,
    _backend: PhantomData<fn() -> B>,
}

/// Wrap a closure as a work item with the default priority
pub fn work_fn<B, F>(name: impl Into<String>, f: F) -> FnWorkItem<B, F>
where
    B: GpuBackend,
    F: FnOnce(&mut WorkerContext<'_, B>) + Send + 'static,
{
    FnWorkItem {
        name: name.into(),
        priority: DEFAULT_PRIORITY,
        f,
        _backend: PhantomData,
    }
}

impl<B, F> FnWorkItem<B, F> {
    pub fn with_priority(mut self, priority: f32) -> Self {
        self.priority = priority;
        self
    }
}

impl<B, F> WorkItem<B> for FnWorkItem<B, F>
where
    B: GpuBackend,
    F: FnOnce(&mut WorkerContext<'_, B>) + Send + 'static,
{
    fn process(self: Box<Self>, ctx: &mut WorkerContext<'_, B>) {
        (self.f)(ctx)
    }

    fn priority(&self) -> f32 {
        self.priority
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<B, F> From<FnWorkItem<B, F>> for Work<B>
where
    B: GpuBackend,
    F: FnOnce(&mut WorkerContext<'_, B>) + Send + 'static,
{
    fn from(item: FnWorkItem<B, F>) -> Self {
        Work::Item(Box::new(item))
    }
}
