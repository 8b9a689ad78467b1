//! Frames in flight
//!
//! A frame is identified by an explicit `FrameContext`; nothing in the
//! scheduler consults a global "current frame".

pub mod frame_data;
pub mod frame_operations;

pub use frame_data::{FrameCommands, FrameContext, FrameSlot, PublishedCommand};
pub use frame_operations::{frame_for_index, next_frame};

impl FrameContext {
    /// Frame context for frame `index` with `frames_in_flight` slots
    pub fn for_index(index: u64, frames_in_flight: usize) -> Self {
        frame_for_index(index, frames_in_flight)
    }
}
