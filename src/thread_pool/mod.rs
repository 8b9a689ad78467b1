//! Worker pool
//!
//! A fixed set of worker threads pulling prioritized work from a foreground
//! queue, a background queue and one pinned queue per worker. Command buffers
//! produced by retiring work are collected per frame slot for submission.

pub mod aggregator;
pub mod thread_pool_data;
pub mod thread_pool_operations;
pub mod work_item;
pub(crate) mod work_queue;
pub mod worker_thread;

pub use aggregator::DependencyAggregator;
pub use thread_pool_data::{WorkerId, WorkerPoolData, WorkerPoolHandle, WorkerPoolStats};
pub use thread_pool_operations::{
    add_background_batch, add_background_work, add_foreground_batch, add_foreground_work,
    add_pinned_work, begin_frame, begin_next_frame, create_worker_pool, current_frame,
    is_poisoned, pause_workers, pool_stats, resume_workers, shutdown_worker_pool,
    take_frame_commands, wait_foreground_drained, worker_count,
};
pub use work_item::{
    work_fn, FnWorkItem, QueueTier, Work, WorkItem, ACCELERATION_STRUCTURE_PRIORITY,
    DEFAULT_PRIORITY, SPECULATIVE_PRIORITY,
};
pub use worker_thread::{current_worker, record_on_current_worker, WorkerContext, WorkerGpuPools};

#[cfg(test)]
mod tests;
