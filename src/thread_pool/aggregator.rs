//! Dependency aggregator
//!
//! A barrier-then-fan-out node: queued after some item X (usually as X's
//! child), it hands its batch to the foreground queue when it runs, so the
//! batch cannot start before X retired.

use super::work_item::{Work, DEFAULT_PRIORITY};
use crate::gpu::GpuBackend;

pub struct DependencyAggregator<B: GpuBackend> {
    children: Vec<Work<B>>,
    priority: f32,
}

impl<B: GpuBackend> DependencyAggregator<B> {
    pub fn new(children: Vec<Work<B>>) -> Self {
        Self {
            children,
            priority: DEFAULT_PRIORITY,
        }
    }

    /// Priority of the aggregator itself; its children keep their own
    pub fn with_priority(mut self, priority: f32) -> Self {
        self.priority = priority;
        self
    }

    pub fn push(&mut self, work: impl Into<Work<B>>) {
        self.children.push(work.into());
    }

    pub fn priority(&self) -> f32 {
        self.priority
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn children(&self) -> &[Work<B>] {
        &self.children
    }

    /// Release the batch in its original order
    pub fn into_children(self) -> Vec<Work<B>> {
        self.children
    }
}
