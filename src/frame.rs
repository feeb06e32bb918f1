// Local-variable frame/subframe stack (§3 "local variable frame",
// §4.1, §9). Represented as the Design Note prescribes: a frame is a
// flat vector of slots, sized once at allocation time from the
// static two-pass allocator's `max_var_depth`; subframe enter/exit are
// just range-clears over that vector, since slot indices are assigned
// statically (stack_allocate.rs), not dynamically re-used.

use enumflags2::BitFlags;

use crate::mlrval::{Mlrval, TypeMask, MASK_ANY};

/// One block's allocation region: a fixed array of frame slots plus
/// the type mask each was declared with.
#[derive(Debug)]
pub struct Frame {
    slots: Vec<Mlrval>,
    masks: Vec<TypeMask>,
}

impl Frame {
    pub fn new(size: usize) -> Frame {
        Frame {
            slots: vec![Mlrval::Absent; size],
            masks: vec![MASK_ANY; size],
        }
    }

    /// Record the mask a slot was declared with. Called once, when the
    /// CST builder processes the declaring node; subsequent assignments
    /// are checked against it.
    pub fn declare(&mut self, index: usize, mask: TypeMask) {
        self.masks[index] = mask;
    }

    pub fn get(&self, index: usize) -> Mlrval {
        self.slots[index].clone()
    }

    pub fn mask(&self, index: usize) -> TypeMask {
        self.masks[index]
    }

    /// Assign into a slot, enforcing its declared type mask (§4.3.1).
    pub fn set(&mut self, index: usize, value: Mlrval) -> Result<(), Mlrval> {
        if value.matches_mask(self.masks[index]) {
            self.slots[index] = value;
            Ok(())
        } else {
            Err(Mlrval::Error(crate::mlrval::ErrorKind::TypeMask))
        }
    }

    /// Subframe enter/exit: clear the slots newly allocated by this
    /// block back to absent (§3, invariant: "subframe exit releases any
    /// mlrval payloads held in slots by zeroing them to absent").
    pub fn clear_range(&mut self, base: usize, count: usize) {
        for slot in &mut self.slots[base..base + count] {
            *slot = Mlrval::Absent;
        }
    }
}

/// The call stack of frames: one entry per active begin/main/end
/// invocation or UDF/subroutine call.
#[derive(Debug, Default)]
pub struct LocalFrameStack {
    stack: Vec<Frame>,
}

impl LocalFrameStack {
    pub fn new() -> LocalFrameStack {
        LocalFrameStack { stack: Vec::new() }
    }

    pub fn push(&mut self, frame: Frame) {
        self.stack.push(frame);
    }

    pub fn pop(&mut self) -> Frame {
        self.stack.pop().expect("local-frame stack underflow")
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn current(&mut self) -> &mut Frame {
        self.stack.last_mut().expect("no active local frame")
    }

    pub fn current_ref(&self) -> &Frame {
        self.stack.last().expect("no active local frame")
    }
}

/// Per-loop bitfield (§3 "loop flag"). `break` sets Broken, `continue`
/// sets Continued; a loop clears Continued at the bottom of every
/// iteration and clears both when it terminates.
#[derive(BitFlags, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopBit {
    Broken = 0b01,
    Continued = 0b10,
}

pub type LoopFlags = BitFlags<LoopBit>;

#[derive(Debug, Default)]
pub struct LoopFlagStack {
    stack: Vec<LoopFlags>,
}

impl LoopFlagStack {
    pub fn new() -> LoopFlagStack {
        LoopFlagStack { stack: Vec::new() }
    }

    pub fn push(&mut self) {
        self.stack.push(LoopFlags::empty());
    }

    pub fn pop(&mut self) {
        self.stack.pop();
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn set_broken(&mut self) {
        if let Some(top) = self.stack.last_mut() {
            *top |= LoopBit::Broken;
        }
    }

    pub fn set_continued(&mut self) {
        if let Some(top) = self.stack.last_mut() {
            *top |= LoopBit::Continued;
        }
    }

    pub fn clear_continued(&mut self) {
        if let Some(top) = self.stack.last_mut() {
            *top &= !LoopBit::Continued;
        }
    }

    pub fn is_broken(&self) -> bool {
        self.stack.last().map_or(false, |f| f.contains(LoopBit::Broken))
    }

    pub fn is_continued(&self) -> bool {
        self.stack.last().map_or(false, |f| f.contains(LoopBit::Continued))
    }

    /// True if any loop-flag bit is set on the innermost loop — the
    /// condition the loop-aware block executor checks after every
    /// statement (§4.4).
    pub fn any_set(&self) -> bool {
        self.stack.last().map_or(false, |f| !f.is_empty())
    }

    pub fn clear_top(&mut self) {
        if let Some(top) = self.stack.last_mut() {
            *top = LoopFlags::empty();
        }
    }
}

/// Return state: a single boolean plus optional held value (§3).
#[derive(Debug, Default)]
pub struct ReturnState {
    returning: bool,
    value: Option<Mlrval>,
}

impl ReturnState {
    pub fn new() -> ReturnState {
        ReturnState { returning: false, value: None }
    }

    pub fn is_returning(&self) -> bool {
        self.returning
    }

    pub fn set(&mut self, value: Option<Mlrval>) {
        self.returning = true;
        self.value = value;
    }

    /// Clear the flag and take the stashed value, if any. Called once a
    /// subroutine/UDF invocation or top-level block has observed the
    /// return (§3, invariant 4: cleared before the next caller
    /// statement runs).
    pub fn take(&mut self) -> Option<Mlrval> {
        self.returning = false;
        self.value.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mlrval::TypeTag;

    #[test]
    fn subframe_clear_zeroes_only_its_own_range() {
        let mut frame = Frame::new(4);
        frame.set(0, Mlrval::Int(1)).unwrap();
        frame.set(1, Mlrval::Int(2)).unwrap();
        frame.clear_range(1, 1);
        assert_eq!(frame.get(0), Mlrval::Int(1));
        assert_eq!(frame.get(1), Mlrval::Absent);
    }

    #[test]
    fn type_mask_rejects_mismatched_assignment() {
        let mut frame = Frame::new(1);
        frame.declare(0, BitFlags::from_flag(TypeTag::Int));
        assert!(frame.set(0, Mlrval::Str("x".into())).is_err());
        assert!(frame.set(0, Mlrval::Int(3)).is_ok());
    }

    #[test]
    fn loop_flags_clear_between_iterations_and_at_exit() {
        let mut flags = LoopFlagStack::new();
        flags.push();
        flags.set_continued();
        assert!(flags.is_continued());
        flags.clear_continued();
        assert!(!flags.is_continued());
        flags.set_broken();
        assert!(flags.is_broken());
        flags.pop();
        assert!(flags.is_empty());
    }

    #[test]
    fn return_state_clears_after_take() {
        let mut rs = ReturnState::new();
        rs.set(Some(Mlrval::Int(7)));
        assert!(rs.is_returning());
        assert_eq!(rs.take(), Some(Mlrval::Int(7)));
        assert!(!rs.is_returning());
    }
}
