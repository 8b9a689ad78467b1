//! Priority queues
//!
//! Shared queues are max-heaps on priority; equal priorities come out in
//! enqueue order so nothing of the same priority starves.

use super::thread_pool_data::{PoolState, WorkerId};
use super::work_item::Work;
use crate::frame::FrameContext;
use crate::gpu::GpuBackend;
use std::cmp::Ordering;

pub(crate) struct QueuedWork<B: GpuBackend> {
    pub work: Work<B>,
    pub priority: f32,
    pub sequence: u64,
    /// Frame whose drain waits for this work
    pub tracked_frame: Option<FrameContext>,
}

impl<B: GpuBackend> PartialEq for QueuedWork<B> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<B: GpuBackend> Eq for QueuedWork<B> {}

impl<B: GpuBackend> PartialOrd for QueuedWork<B> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<B: GpuBackend> Ord for QueuedWork<B> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Next work for `worker`: its pinned queue, then foreground, then background
pub(crate) fn pop_next<B: GpuBackend>(
    state: &mut PoolState<B>,
    worker: WorkerId,
) -> Option<QueuedWork<B>> {
    if let Some(work) = state
        .pinned
        .get_mut(worker.index())
        .and_then(|queue| queue.pop_front())
    {
        return Some(work);
    }
    state
        .foreground
        .pop()
        .or_else(|| state.background.pop())
}

/// Everything still queued, taken out so it can be dropped outside the lock
pub(crate) fn drain_queues<B: GpuBackend>(state: &mut PoolState<B>) -> Vec<QueuedWork<B>> {
    let mut drained: Vec<QueuedWork<B>> = state.foreground.drain().collect();
    drained.extend(state.background.drain());
    for queue in state.pinned.iter_mut() {
        drained.extend(queue.drain(..));
    }
    drained
}
