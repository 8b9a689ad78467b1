// Hearth Scheduler - frame-aware work scheduling for the Hearth renderer
//
// Work is expressed as data handed to free functions:
// - thread_pool_operations queue work against an explicit FrameContext
// - retired work publishes command buffers into per-frame-slot buckets
// - task::Task layers GPU-await coroutines on top of the same pool
//
// Worker threads own their GPU pools for their whole life; only finished
// command buffers cross threads.

// Core modules
pub mod config;
pub mod error;
pub mod panic_handler;

// Frames and resources
pub mod frame;
pub mod resource;

// GPU seam
pub mod gpu;

// Scheduling
pub mod task;
pub mod thread_pool;

pub use config::SchedulerConfig;
pub use error::{EngineError, EngineResult};
pub use frame::{FrameCommands, FrameContext, FrameSlot, PublishedCommand};
pub use gpu::{AsyncGpuSubmitter, CommandCategory, GpuBackend, GpuError, GpuResult, QueueKind};
pub use panic_handler::{install_panic_hook, FatalAction};
pub use resource::{FrameSlotted, ResourceArena, ResourceHandle, SharedArena};
pub use task::{
    query, spawn, submit, MainThreadQueue, PoolScheduler, Task, TaskError, TaskResult,
    TaskScheduler, TaskState,
};
pub use thread_pool::{
    add_background_batch, add_background_work, add_foreground_batch, add_foreground_work,
    add_pinned_work, begin_frame, begin_next_frame, create_worker_pool, current_frame,
    current_worker, is_poisoned, pause_workers, pool_stats, record_on_current_worker,
    resume_workers, shutdown_worker_pool, take_frame_commands, wait_foreground_drained,
    work_fn, worker_count, DependencyAggregator, Work, WorkItem, WorkerContext, WorkerId,
    WorkerPoolData, WorkerPoolHandle, WorkerPoolStats,
};

// Handles that user code moves between threads
static_assertions::assert_impl_all!(WorkerPoolHandle<gpu::HeadlessBackend>: Send, Sync, Clone);
static_assertions::assert_impl_all!(task::TaskRunnable: Send);
static_assertions::assert_impl_all!(Task<u32>: Send);
static_assertions::assert_impl_all!(MainThreadQueue: Send, Sync);
static_assertions::assert_impl_all!(FrameContext: Send, Sync, Copy);
static_assertions::assert_impl_all!(EngineError: Send, Sync);
static_assertions::assert_impl_all!(TaskError: Send, Sync);
