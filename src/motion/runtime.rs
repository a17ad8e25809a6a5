// src/motion/runtime.rs
//
// Runtime state tracks the end of the most recently emitted segment, which
// leads the physical motor position by up to the stepper pipeline depth.
// Written only from the exec path; the main loop reads it for reports and
// for resetting machine position after a flush.
use crate::axis::{AXES, Axis};

#[derive(Debug, Clone, Default)]
pub struct Runtime {
    /// True while a plan-to-zero move is executing.
    busy: bool,
    /// Position in machine coordinates, mm.
    position: [f64; AXES],
    /// Work offsets captured at plan time.
    work_offset: [f64; AXES],
    /// Velocity of the current segment, mm/min.
    velocity: f64,
    /// Source line of the executing block.
    line: i64,
    /// Active tool number.
    tool: u8,
}

impl Runtime {
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    pub fn set_velocity(&mut self, velocity: f64) {
        self.velocity = velocity;
    }

    pub fn line(&self) -> i64 {
        self.line
    }

    pub fn set_line(&mut self, line: i64) {
        self.line = line;
    }

    pub fn tool(&self) -> u8 {
        self.tool
    }

    pub fn set_tool(&mut self, tool: u8) {
        self.tool = tool;
    }

    pub fn position(&self) -> &[f64; AXES] {
        &self.position
    }

    pub fn axis_position(&self, axis: Axis) -> f64 {
        self.position[axis.index()]
    }

    pub fn set_position(&mut self, position: [f64; AXES]) {
        self.position = position;
    }

    pub fn set_axis_position(&mut self, axis: Axis, position: f64) {
        self.position[axis.index()] = position;
    }

    /// Position in the work coordinates that were in effect at plan time.
    pub fn work_position(&self, axis: Axis) -> f64 {
        self.position[axis.index()] - self.work_offset[axis.index()]
    }

    pub fn set_work_offsets(&mut self, offsets: [f64; AXES]) {
        self.work_offset = offsets;
    }
}
