//! Per-frame-slot storage
//!
//! One value per frame slot, reachable only through a `FrameContext`. Work for
//! frame N writes slot N's copy; the submission step for frame M reads slot
//! M's copy, so frames in flight never alias.

use crate::error::{EngineError, EngineResult};
use crate::frame::FrameContext;
use crate::panic_handler::invariant_violation;

pub struct FrameSlotted<T> {
    slots: Vec<T>,
}

impl<T> FrameSlotted<T> {
    pub fn new(frames_in_flight: usize, mut init: impl FnMut(usize) -> T) -> EngineResult<Self> {
        if frames_in_flight == 0 {
            return Err(EngineError::InvalidConfig {
                field: "frames_in_flight".to_string(),
                value: "0".to_string(),
                reason: "per-frame storage needs at least one slot".to_string(),
            });
        }
        Ok(Self {
            slots: (0..frames_in_flight).map(&mut init).collect(),
        })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, frame: &FrameContext) -> &T {
        self.check(frame);
        &self.slots[frame.slot.index()]
    }

    pub fn get_mut(&mut self, frame: &FrameContext) -> &mut T {
        self.check(frame);
        &mut self.slots[frame.slot.index()]
    }

    fn check(&self, frame: &FrameContext) {
        if frame.frames_in_flight != self.slots.len() {
            invariant_violation(format!(
                "{} built for {} frames in flight used with storage for {}",
                frame,
                frame.frames_in_flight,
                self.slots.len()
            ));
        }
    }
}

impl<T: Clone> FrameSlotted<T> {
    pub fn filled(frames_in_flight: usize, value: T) -> EngineResult<Self> {
        Self::new(frames_in_flight, |_| value.clone())
    }
}
