// src/motion/buffer.rs
//
// The planner ring: a fixed pool of block slots queued between the line
// planner (producer) and the segment executor (consumer). Blocks outside
// [head, tail) are kept zeroed; planning walks rely on that, since a zeroed
// slot reads as exit velocity 0 and not replannable.
use crate::axis::AXES;

pub const POOL_SIZE: usize = 32;
pub const HEADROOM: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockState {
    /// Slot is free.
    #[default]
    Off,
    /// Committed, not yet picked up by the executor.
    New,
    /// First executor dispatch.
    Init,
    /// Executing.
    Active,
    /// Re-enter as New when the current pass completes (feedhold remainder).
    Restart,
}

/// What the executor should do with a block.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BlockKind {
    #[default]
    Empty,
    /// Planned line move; all the velocity fields below apply.
    Line,
    /// Timed pause handed to the stepper pipeline, seconds in payload.
    Dwell(f64),
    /// Jog cycle tick; axis velocities live in the jog runtime.
    Jog,
    /// Stall calibration tick.
    Calibrate,
}

/// One planner buffer slot.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub ts_ms: u64,
    pub line: i64,
    pub kind: BlockKind,
    pub state: BlockState,

    /// Look-ahead may still lower this block's exit velocity.
    pub replannable: bool,
    /// Executor signals a hold when this block completes at zero velocity.
    pub hold: bool,
    pub rapid: bool,
    pub inverse_time: bool,
    pub exact_stop: bool,

    pub target: [f64; AXES],
    pub unit: [f64; AXES],

    pub length: f64,
    pub head_length: f64,
    pub body_length: f64,
    pub tail_length: f64,

    pub entry_velocity: f64,
    pub cruise_velocity: f64,
    pub exit_velocity: f64,
    pub braking_velocity: f64,

    pub entry_vmax: f64,
    pub cruise_vmax: f64,
    pub exit_vmax: f64,
    pub delta_vmax: f64,

    pub jerk: f64,
    pub cbrt_jerk: f64,
}

impl Block {
    fn clear(&mut self) {
        *self = Block::default();
    }
}

#[derive(Debug, Clone)]
pub struct PlannerQueue {
    blocks: [Block; POOL_SIZE],
    head: usize,
    tail: usize,
    space: usize,
}

impl Default for PlannerQueue {
    fn default() -> Self {
        Self {
            blocks: std::array::from_fn(|_| Block::default()),
            head: 0,
            tail: 0,
            space: POOL_SIZE,
        }
    }
}

impl PlannerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Free slots above the reserved headroom. The parser side uses this as
    /// its back-pressure signal and must not plan when it reads zero.
    pub fn room(&self) -> usize {
        self.space.saturating_sub(HEADROOM)
    }

    pub fn fill(&self) -> usize {
        POOL_SIZE - self.space
    }

    pub fn is_empty(&self) -> bool {
        self.space == POOL_SIZE
    }

    pub fn has_space(&self) -> bool {
        self.space > 0
    }

    pub fn next_idx(&self, i: usize) -> usize {
        (i + 1) % POOL_SIZE
    }

    pub fn prev_idx(&self, i: usize) -> usize {
        (i + POOL_SIZE - 1) % POOL_SIZE
    }

    /// Index of the next writable slot. Callers must have checked
    /// `has_space`; the slot contents stay zeroed until committed.
    pub fn tail_idx(&self) -> usize {
        self.tail
    }

    pub fn tail_mut(&mut self) -> &mut Block {
        let tail = self.tail;
        &mut self.blocks[tail]
    }

    /// Commits the tail slot. Once pushed the slot belongs to the queue and
    /// may start executing immediately.
    pub fn push(&mut self, kind: BlockKind, line: i64, ts_ms: u64) -> Result<(), ()> {
        if self.space == 0 {
            return Err(());
        }

        let block = &mut self.blocks[self.tail];
        block.kind = kind;
        block.line = line;
        block.ts_ms = ts_ms;
        block.state = BlockState::New;

        self.tail = self.next_idx(self.tail);
        self.space -= 1;
        Ok(())
    }

    pub fn head_idx(&self) -> Option<usize> {
        if self.is_empty() { None } else { Some(self.head) }
    }

    /// Zeroes the head slot and releases it back to the pool.
    pub fn pop(&mut self) -> Result<(), ()> {
        if self.space == POOL_SIZE {
            return Err(());
        }

        let head = self.head;
        self.blocks[head].clear();
        self.head = self.next_idx(self.head);
        self.space += 1;
        Ok(())
    }

    pub fn block(&self, i: usize) -> &Block {
        &self.blocks[i]
    }

    pub fn block_mut(&mut self, i: usize) -> &mut Block {
        &mut self.blocks[i]
    }

    /// Drops every queued block. Only legal when the machine is quiescent.
    pub fn clear(&mut self) {
        while self.pop().is_ok() {}
    }

    /// Indices of occupied slots from head to tail.
    pub fn iter_idx(&self) -> impl Iterator<Item = usize> + '_ {
        let mut i = self.head;
        let mut remaining = self.fill();
        std::iter::from_fn(move || {
            if remaining == 0 {
                return None;
            }
            let idx = i;
            i = (i + 1) % POOL_SIZE;
            remaining -= 1;
            Some(idx)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_with_full_space() {
        let q = PlannerQueue::new();
        assert!(q.is_empty());
        assert_eq!(q.fill(), 0);
        assert_eq!(q.room(), POOL_SIZE - HEADROOM);
        assert!(q.head_idx().is_none());
    }

    #[test]
    fn push_pop_conserves_slots() {
        let mut q = PlannerQueue::new();
        for i in 0..10 {
            q.push(BlockKind::Line, i, 0).unwrap();
            assert_eq!(q.fill() + q.room() + HEADROOM, POOL_SIZE);
        }
        assert_eq!(q.fill(), 10);

        for _ in 0..10 {
            q.pop().unwrap();
        }
        assert!(q.is_empty());
        assert!(q.pop().is_err());
    }

    #[test]
    fn room_saturates_at_zero() {
        let mut q = PlannerQueue::new();
        for i in 0..POOL_SIZE {
            assert!(q.has_space());
            q.push(BlockKind::Line, i as i64, 0).unwrap();
        }
        assert_eq!(q.room(), 0);
        assert!(!q.has_space());
        assert!(q.push(BlockKind::Line, 0, 0).is_err());
    }

    #[test]
    fn pop_zeroes_slot() {
        let mut q = PlannerQueue::new();
        q.tail_mut().length = 42.0;
        q.tail_mut().replannable = true;
        q.push(BlockKind::Line, 1, 0).unwrap();

        let head = q.head_idx().unwrap();
        q.pop().unwrap();
        assert_eq!(q.block(head).length, 0.0);
        assert!(!q.block(head).replannable);
        assert_eq!(q.block(head).state, BlockState::Off);
    }

    #[test]
    fn ring_wraps() {
        let mut q = PlannerQueue::new();
        for round in 0..3 {
            for i in 0..POOL_SIZE {
                q.push(BlockKind::Line, (round * POOL_SIZE + i) as i64, 0).unwrap();
            }
            for _ in 0..POOL_SIZE {
                q.pop().unwrap();
            }
        }
        assert!(q.is_empty());
    }

    #[test]
    fn iter_idx_walks_head_to_tail() {
        let mut q = PlannerQueue::new();
        for i in 0..5 {
            q.tail_mut().line = i;
            q.push(BlockKind::Line, i, 0).unwrap();
        }
        q.pop().unwrap();
        let lines: Vec<i64> = q.iter_idx().map(|i| q.block(i).line).collect();
        assert_eq!(lines, vec![1, 2, 3, 4]);
    }
}
