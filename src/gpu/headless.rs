//! Headless GPU backend
//!
//! Records commands as labelled strings on the CPU and simulates a GPU queue
//! whose fences are signalled explicitly. Used by dedicated servers, tools and
//! the test suite, where no adapter is available.

use super::{
    AsyncGpuSubmitter, CompletionCallback, GpuBackend, GpuError, GpuResult, QueueKind,
};
use crate::panic_handler::invariant_violation;
use crate::thread_pool::WorkerId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

/// Default number of descriptor sets a worker's pool can hand out
pub const DEFAULT_DESCRIPTOR_CAPACITY: u32 = 256;

/// CPU-only backend
pub struct HeadlessBackend {
    next_buffer_id: AtomicU64,
    pools_created: AtomicUsize,
    buffers_finished: AtomicU64,
    descriptor_capacity: u32,
    /// Labels whose recording fails, for exercising the fatal path
    failing_labels: Mutex<Vec<String>>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::with_descriptor_capacity(DEFAULT_DESCRIPTOR_CAPACITY)
    }

    pub fn with_descriptor_capacity(descriptor_capacity: u32) -> Self {
        Self {
            next_buffer_id: AtomicU64::new(1),
            pools_created: AtomicUsize::new(0),
            buffers_finished: AtomicU64::new(0),
            descriptor_capacity,
            failing_labels: Mutex::new(Vec::new()),
        }
    }

    /// Make every later recording whose label contains `pattern` fail
    pub fn fail_recordings_matching(&self, pattern: impl Into<String>) {
        self.failing_labels.lock().push(pattern.into());
    }

    pub fn pools_created(&self) -> usize {
        self.pools_created.load(Ordering::Relaxed)
    }

    pub fn buffers_finished(&self) -> u64 {
        self.buffers_finished.load(Ordering::Relaxed)
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Command pool bound to the thread that created it
#[derive(Debug)]
pub struct HeadlessCommandPool {
    worker: WorkerId,
    queue: QueueKind,
    owner: ThreadId,
    live_encoders: usize,
    allocated: u64,
}

impl HeadlessCommandPool {
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    /// Command buffers allocated from this pool so far
    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    fn assert_owner(&self) {
        if thread::current().id() != self.owner {
            invariant_violation(format!(
                "{:?} command pool of {} used from a foreign thread",
                self.queue, self.worker
            ));
        }
    }
}

/// Descriptor pool bound to the thread that created it
#[derive(Debug)]
pub struct HeadlessDescriptorPool {
    worker: WorkerId,
    owner: ThreadId,
    allocated: u32,
    capacity: u32,
}

impl HeadlessDescriptorPool {
    /// Allocate one descriptor set, returning its index within the pool
    pub fn allocate_set(&mut self) -> GpuResult<u32> {
        if thread::current().id() != self.owner {
            invariant_violation(format!(
                "descriptor pool of {} used from a foreign thread",
                self.worker
            ));
        }
        if self.allocated >= self.capacity {
            return Err(GpuError::DescriptorPoolExhausted {
                allocated: self.allocated,
                capacity: self.capacity,
            });
        }
        self.allocated += 1;
        Ok(self.allocated - 1)
    }

    pub fn allocated(&self) -> u32 {
        self.allocated
    }
}

/// Commands being recorded
#[derive(Debug)]
pub struct HeadlessEncoder {
    label: String,
    commands: Vec<String>,
}

impl HeadlessEncoder {
    pub fn push(&mut self, command: impl Into<String>) {
        self.commands.push(command.into());
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }
}

/// A finished command buffer
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessCommandBuffer {
    pub id: u64,
    pub label: String,
    pub worker: WorkerId,
    pub queue: QueueKind,
    pub commands: Vec<String>,
}

impl GpuBackend for HeadlessBackend {
    type CommandPool = HeadlessCommandPool;
    type DescriptorPool = HeadlessDescriptorPool;
    type Encoder = HeadlessEncoder;
    type CommandBuffer = HeadlessCommandBuffer;

    fn create_command_pool(
        &self,
        worker: WorkerId,
        queue: QueueKind,
    ) -> GpuResult<HeadlessCommandPool> {
        self.pools_created.fetch_add(1, Ordering::Relaxed);
        log::trace!("[HeadlessBackend] {:?} command pool for {}", queue, worker);
        Ok(HeadlessCommandPool {
            worker,
            queue,
            owner: thread::current().id(),
            live_encoders: 0,
            allocated: 0,
        })
    }

    fn create_descriptor_pool(&self, worker: WorkerId) -> GpuResult<HeadlessDescriptorPool> {
        Ok(HeadlessDescriptorPool {
            worker,
            owner: thread::current().id(),
            allocated: 0,
            capacity: self.descriptor_capacity,
        })
    }

    fn begin_commands(
        &self,
        pool: &mut HeadlessCommandPool,
        label: &str,
    ) -> GpuResult<HeadlessEncoder> {
        pool.assert_owner();

        if self
            .failing_labels
            .lock()
            .iter()
            .any(|pattern| label.contains(pattern.as_str()))
        {
            return Err(GpuError::RecordingFailed {
                label: label.to_string(),
                message: "injected failure".to_string(),
            });
        }

        pool.live_encoders += 1;
        Ok(HeadlessEncoder {
            label: label.to_string(),
            commands: Vec::new(),
        })
    }

    fn finish_commands(
        &self,
        pool: &mut HeadlessCommandPool,
        encoder: HeadlessEncoder,
    ) -> GpuResult<HeadlessCommandBuffer> {
        pool.assert_owner();
        pool.live_encoders = pool.live_encoders.saturating_sub(1);
        pool.allocated += 1;
        self.buffers_finished.fetch_add(1, Ordering::Relaxed);

        Ok(HeadlessCommandBuffer {
            id: self.next_buffer_id.fetch_add(1, Ordering::Relaxed),
            label: encoder.label,
            worker: pool.worker,
            queue: pool.queue,
            commands: encoder.commands,
        })
    }
}

struct PendingSubmission<CB> {
    buffer: CB,
    on_complete: CompletionCallback,
}

/// Simulated GPU queue.
///
/// Submissions stay pending until the owner signals them, in submission
/// order, the way fences on a single hardware queue retire.
pub struct HeadlessQueue<CB = HeadlessCommandBuffer> {
    pending: Mutex<VecDeque<PendingSubmission<CB>>>,
    completed: Mutex<Vec<CB>>,
    submitted: AtomicU64,
}

impl<CB: Send> HeadlessQueue<CB> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            completed: Mutex::new(Vec::new()),
            submitted: AtomicU64::new(0),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Signal the oldest pending submission. Returns false if none was pending.
    pub fn signal_next(&self) -> bool {
        self.complete_next(Ok(()))
    }

    /// Fail the oldest pending submission with `error`
    pub fn fail_next(&self, error: GpuError) -> bool {
        self.complete_next(Err(error))
    }

    /// Signal everything currently pending, returning how many were signalled
    pub fn signal_all(&self) -> usize {
        let count = self.pending();
        let mut signalled = 0;
        while signalled < count && self.signal_next() {
            signalled += 1;
        }
        signalled
    }

    /// Take the buffers that finished executing
    pub fn take_completed(&self) -> Vec<CB> {
        std::mem::take(&mut *self.completed.lock())
    }

    fn complete_next(&self, result: GpuResult<()>) -> bool {
        let next = self.pending.lock().pop_front();
        match next {
            Some(submission) => {
                if result.is_ok() {
                    self.completed.lock().push(submission.buffer);
                }
                // Outside the locks: the callback may resume a task that
                // submits again.
                (submission.on_complete)(result);
                true
            }
            None => false,
        }
    }
}

impl<CB: Send> Default for HeadlessQueue<CB> {
    fn default() -> Self {
        Self::new()
    }
}

impl<CB: Send> AsyncGpuSubmitter<CB> for HeadlessQueue<CB> {
    fn submit(&self, buffer: CB, on_complete: CompletionCallback) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().push_back(PendingSubmission {
            buffer,
            on_complete,
        });
    }
}
