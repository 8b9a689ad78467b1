//! Resource addressing for work items

pub mod arena;
pub mod frame_slotted;

pub use arena::{create_shared_arena, ResourceArena, ResourceHandle, SharedArena};
pub use frame_slotted::FrameSlotted;
