//! Worker Pool Data - Pure DOP
//!
//! Structures only. Scheduling happens in thread_pool_operations.rs and the
//! worker run loop in worker_thread.rs.

use super::work_queue::QueuedWork;
use crate::config::SchedulerConfig;
use crate::frame::FrameContext;
use crate::frame::frame_data::SlotState;
use crate::gpu::{CommandCategory, GpuBackend};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Index of a worker thread within its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(usize);

impl WorkerId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker {}", self.0)
    }
}

/// Output of background work retired while no frame could take it
pub(crate) struct DeferredCommand<CB> {
    pub buffer: CB,
    pub category: CommandCategory,
    pub worker: WorkerId,
}

/// Everything guarded by the pool lock
pub(crate) struct PoolState<B: GpuBackend> {
    pub foreground: BinaryHeap<QueuedWork<B>>,
    pub background: BinaryHeap<QueuedWork<B>>,
    /// One FIFO per worker, drained before the shared queues
    pub pinned: Vec<VecDeque<QueuedWork<B>>>,
    pub slots: Vec<SlotState<B::CommandBuffer>>,
    /// Frame that background output is published into
    pub open_frame: FrameContext,
    pub deferred: Vec<DeferredCommand<B::CommandBuffer>>,
    /// Enqueue order, the tie-break between equal priorities
    pub next_sequence: u64,
    /// Publication order across all buckets
    pub next_publication: u64,
    pub running: usize,
    pub executed: u64,
    pub published: u64,
    pub paused: bool,
    pub shutting_down: bool,
    pub poisoned: Option<String>,
}

/// State shared by the pool owner, its handles and its workers
pub(crate) struct PoolShared<B: GpuBackend> {
    pub config: SchedulerConfig,
    pub worker_count: usize,
    pub backend: Arc<B>,
    pub state: Mutex<PoolState<B>>,
    /// Signalled when work is queued, the pool resumes, or it stops
    pub work_available: Condvar,
    /// Signalled when tracked foreground work retires
    pub frame_progress: Condvar,
}

/// Cloneable reference to a running pool.
///
/// Handles enqueue work and drive frames; they do not keep the worker threads
/// alive. Once the owning `WorkerPoolData` shuts down, every operation through
/// a handle reports `EngineError::PoolShutDown`.
pub struct WorkerPoolHandle<B: GpuBackend> {
    pub(crate) shared: Arc<PoolShared<B>>,
}

impl<B: GpuBackend> Clone for WorkerPoolHandle<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// A spawned worker thread
pub(crate) struct WorkerThread {
    pub id: WorkerId,
    pub join_handle: Option<JoinHandle<()>>,
}

/// Owner of the worker threads. Dropping it shuts the pool down.
pub struct WorkerPoolData<B: GpuBackend> {
    pub(crate) handle: WorkerPoolHandle<B>,
    pub(crate) threads: Vec<WorkerThread>,
}

impl<B: GpuBackend> WorkerPoolData<B> {
    pub fn handle(&self) -> &WorkerPoolHandle<B> {
        &self.handle
    }
}

/// Snapshot of pool activity
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPoolStats {
    pub workers: usize,
    pub queued_foreground: usize,
    pub queued_background: usize,
    pub queued_pinned: usize,
    pub running: usize,
    pub executed: u64,
    pub published: u64,
    pub deferred: usize,
    /// Unretired foreground items per frame slot
    pub outstanding_per_slot: Vec<usize>,
    pub open_frame: FrameContext,
    pub paused: bool,
    pub poisoned: bool,
}

/// Produced by one executed work item, applied when it retires
pub(crate) struct WorkOutput<B: GpuBackend> {
    pub outputs: [Option<B::CommandBuffer>; CommandCategory::COUNT],
    pub children: Vec<(super::Work<B>, super::QueueTier)>,
}

impl<B: GpuBackend> WorkOutput<B> {
    pub fn empty() -> Self {
        Self {
            outputs: std::array::from_fn(|_| None),
            children: Vec::new(),
        }
    }
}
