//! Frame Operations
//!
//! Functions over frame identities and slot buckets. The pool calls these
//! with its state lock held.

use super::frame_data::{FrameCommands, FrameContext, FrameSlot, PublishedCommand, SlotState};
use crate::gpu::CommandCategory;
use crate::panic_handler::invariant_violation;

/// Frame context for frame `index` with `frames_in_flight` slots
pub fn frame_for_index(index: u64, frames_in_flight: usize) -> FrameContext {
    if frames_in_flight == 0 {
        invariant_violation("frames_in_flight must be at least 1");
    }
    FrameContext {
        index,
        slot: FrameSlot((index % frames_in_flight as u64) as usize),
        frames_in_flight,
    }
}

/// The frame after `frame`
pub fn next_frame(frame: &FrameContext) -> FrameContext {
    frame_for_index(frame.index + 1, frame.frames_in_flight)
}

pub(crate) fn empty_buckets<CB>() -> [Vec<PublishedCommand<CB>>; CommandCategory::COUNT] {
    std::array::from_fn(|_| Vec::new())
}

pub(crate) fn create_slot_states<CB>(frames_in_flight: usize) -> Vec<SlotState<CB>> {
    (0..frames_in_flight)
        .map(|_| SlotState {
            frame: None,
            outstanding: 0,
            taken: false,
            buckets: empty_buckets(),
        })
        .collect()
}

/// Hand a slot to `frame`, returning how many untaken buffers were discarded
pub(crate) fn recycle_slot<CB>(slot: &mut SlotState<CB>, frame: FrameContext) -> usize {
    debug_assert_eq!(slot.outstanding, 0);
    let discarded = if slot.taken {
        0
    } else {
        slot.buckets.iter().map(Vec::len).sum()
    };
    slot.frame = Some(frame);
    slot.taken = false;
    slot.buckets = empty_buckets();
    discarded
}

/// Append a buffer to its category bucket
pub(crate) fn publish_into_slot<CB>(slot: &mut SlotState<CB>, command: PublishedCommand<CB>) {
    if slot.frame != Some(command.frame) {
        invariant_violation(format!(
            "publishing into {} while the slot holds {:?}",
            command.frame, slot.frame
        ));
    }
    if slot.taken {
        invariant_violation(format!(
            "publishing into {} after it was taken for submission",
            command.frame
        ));
    }
    slot.buckets[command.category.index()].push(command);
}

/// Move the slot's buckets out for submission
pub(crate) fn take_slot_commands<CB>(slot: &mut SlotState<CB>, frame: FrameContext) -> FrameCommands<CB> {
    slot.taken = true;
    FrameCommands {
        frame,
        buckets: std::mem::replace(&mut slot.buckets, empty_buckets()),
    }
}

impl<CB> FrameCommands<CB> {
    /// Buffers of one category, in publication order
    pub fn bucket(&self, category: CommandCategory) -> &[PublishedCommand<CB>] {
        &self.buckets[category.index()]
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }

    /// Borrowing iteration in the fixed category submission order
    pub fn iter_submission_order(&self) -> impl Iterator<Item = &PublishedCommand<CB>> {
        self.buckets.iter().flat_map(|bucket| bucket.iter())
    }

    /// Consume into buffers in the fixed category submission order
    pub fn into_submission_order(self) -> impl Iterator<Item = PublishedCommand<CB>> {
        self.buckets.into_iter().flat_map(|bucket| bucket.into_iter())
    }
}
