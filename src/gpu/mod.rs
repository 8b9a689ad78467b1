//! GPU backend seam
//!
//! The scheduler never talks to a graphics API directly. Worker threads own
//! their command and descriptor pools through `GpuBackend`, and tasks hand
//! finished command buffers to an `AsyncGpuSubmitter`, which signals once the
//! GPU is done with them.

pub mod error;
pub mod headless;
#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use error::{GpuError, GpuResult};
pub use headless::{
    HeadlessBackend, HeadlessCommandBuffer, HeadlessCommandPool, HeadlessDescriptorPool,
    HeadlessEncoder, HeadlessQueue,
};
#[cfg(feature = "wgpu-backend")]
pub use wgpu_backend::{WgpuBackend, WgpuCommandPool, WgpuDescriptorPool, WgpuSubmitter};

use crate::thread_pool::WorkerId;
use serde::{Deserialize, Serialize};

/// Hardware queue a command pool records for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueKind {
    Graphics,
    Compute,
}

/// Category of a produced command buffer
///
/// The declaration order is the order in which the submission step consumes
/// the per-frame buckets.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CommandCategory {
    GraphicsPrimary = 0,
    GraphicsSecondary = 1,
    Shadow = 2,
    Particle = 3,
    ComputePrimary = 4,
}

impl CommandCategory {
    pub const COUNT: usize = 5;

    /// Fixed submission order
    pub const ALL: [CommandCategory; Self::COUNT] = [
        CommandCategory::GraphicsPrimary,
        CommandCategory::GraphicsSecondary,
        CommandCategory::Shadow,
        CommandCategory::Particle,
        CommandCategory::ComputePrimary,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Which of the worker's pools records this category
    pub fn queue(self) -> QueueKind {
        match self {
            CommandCategory::ComputePrimary => QueueKind::Compute,
            _ => QueueKind::Graphics,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandCategory::GraphicsPrimary => "graphics_primary",
            CommandCategory::GraphicsSecondary => "graphics_secondary",
            CommandCategory::Shadow => "shadow",
            CommandCategory::Particle => "particle",
            CommandCategory::ComputePrimary => "compute_primary",
        }
    }
}

/// A graphics API as seen by the worker threads.
///
/// Pools are created on the worker thread that owns them and never leave it;
/// command buffers are recorded and finished against the pool that allocated
/// them. Finished buffers are the only values that cross threads.
pub trait GpuBackend: Send + Sync + 'static {
    type CommandPool: 'static;
    type DescriptorPool: 'static;
    type Encoder;
    type CommandBuffer: Send + 'static;

    fn create_command_pool(
        &self,
        worker: WorkerId,
        queue: QueueKind,
    ) -> GpuResult<Self::CommandPool>;

    fn create_descriptor_pool(&self, worker: WorkerId) -> GpuResult<Self::DescriptorPool>;

    fn begin_commands(
        &self,
        pool: &mut Self::CommandPool,
        label: &str,
    ) -> GpuResult<Self::Encoder>;

    fn finish_commands(
        &self,
        pool: &mut Self::CommandPool,
        encoder: Self::Encoder,
    ) -> GpuResult<Self::CommandBuffer>;
}

/// Called exactly once when the GPU has finished (or failed) a submission
pub type CompletionCallback = Box<dyn FnOnce(GpuResult<()>) + Send + 'static>;

/// Accepts finished command buffers and reports their completion.
///
/// Implementations must invoke `on_complete` at most once. Dropping it without
/// calling it is reported to the awaiting task as a dropped submission.
pub trait AsyncGpuSubmitter<CB>: Send + Sync {
    fn submit(&self, buffer: CB, on_complete: CompletionCallback);
}
