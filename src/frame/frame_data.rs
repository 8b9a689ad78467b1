//! Frame Data
//!
//! Frame identity and the per-slot buckets that completed work publishes
//! command buffers into.

use crate::gpu::CommandCategory;
use crate::thread_pool::WorkerId;
use std::fmt;

/// One of the rotating per-frame resource slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameSlot(pub(crate) usize);

impl FrameSlot {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FrameSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// Explicit frame identity passed to every call that depends on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameContext {
    /// Monotonic frame number
    pub index: u64,
    /// Slot the frame's resources live in
    pub slot: FrameSlot,
    /// Number of slots in rotation
    pub frames_in_flight: usize,
}

impl fmt::Display for FrameContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame {} ({})", self.index, self.slot)
    }
}

/// A command buffer published by a retired work item
#[derive(Debug)]
pub struct PublishedCommand<CB> {
    pub buffer: CB,
    pub category: CommandCategory,
    pub frame: FrameContext,
    pub worker: WorkerId,
    /// Pool-wide publication order
    pub sequence: u64,
}

/// Everything foreground work produced for one frame, grouped by category
#[derive(Debug)]
pub struct FrameCommands<CB> {
    pub frame: FrameContext,
    pub(crate) buckets: [Vec<PublishedCommand<CB>>; CommandCategory::COUNT],
}

/// Accumulation state of a frame slot, owned by the pool state
#[derive(Debug)]
pub(crate) struct SlotState<CB> {
    /// Frame currently occupying the slot
    pub frame: Option<FrameContext>,
    /// Foreground items enqueued for `frame` that have not retired
    pub outstanding: usize,
    /// Set once the submission step took the buckets
    pub taken: bool,
    pub buckets: [Vec<PublishedCommand<CB>>; CommandCategory::COUNT],
}
