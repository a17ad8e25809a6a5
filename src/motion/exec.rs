// src/motion/exec.rs
//
// The segment-level executor. Runs from the step-timer's low-priority
// request path; every call emits at most one segment. A block executes as
// head, body, tail sections; each section is integrated in fixed-cadence
// segments whose velocity follows the quintic Bezier S-curve between the
// section's boundary velocities.
use crate::axis::{AXES, vector_length};
use crate::error::{ExecStatus, MotionError, MotionResult};
use crate::motion::buffer::{BlockKind, BlockState};
use crate::motion::plan::{target_length, target_velocity};
use crate::motion::velocity::velocity_curve;
use crate::motion::{
    EXEC_DELAY_MS, EXEC_MIN_FILL, HOLD_DECELERATION_TOLERANCE, MIN_SEGMENT_TIME,
    MotionCore, NOM_SEGMENT_TIME, fp_zero,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Section {
    #[default]
    Head = 0,
    Body = 1,
    Tail = 2,
}

/// Executor working state, copied out of the active block at init so the
/// planner may keep rewriting queued blocks while this one runs.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    pub(crate) unit: [f64; AXES],
    pub(crate) final_target: [f64; AXES],
    /// Exact head/body/tail endpoints, used to absorb accumulated rounding
    /// at section boundaries.
    pub(crate) waypoint: [[f64; AXES]; 3],

    pub(crate) head_length: f64,
    pub(crate) body_length: f64,
    pub(crate) tail_length: f64,
    pub(crate) entry_velocity: f64,
    pub(crate) cruise_velocity: f64,
    pub(crate) exit_velocity: f64,

    pub(crate) segment_count: u32,
    pub(crate) segment: u32,
    pub(crate) segment_velocity: f64,
    pub(crate) segment_time: f64,
    pub(crate) segment_start: [f64; AXES],
    pub(crate) segment_delta: f64,
    pub(crate) segment_dist: f64,

    pub(crate) hold_planned: bool,
    pub(crate) section: Section,
    pub(crate) section_new: bool,
    pub(crate) abort: bool,
}

impl ExecContext {
    pub fn reset(&mut self) {
        let abort = self.abort;
        *self = ExecContext::default();
        self.abort = abort;
    }
}

impl MotionCore {
    /// Requests a hard stop of the executor on its next entry.
    pub fn exec_abort(&mut self) {
        self.exec.abort = true;
    }

    /// Dequeues blocks, dispatches their executors and retires them.
    ///
    /// Returns `Done` when a segment was prepped, `Again` when the caller
    /// should call right back (a block retired without prepping), `Noop`
    /// when there is nothing to run, and an error on fatal conditions.
    pub fn exec_move(&mut self) -> MotionResult {
        use crate::motion::state::State;

        let state = self.state.get();
        let empty = self.queue.is_empty();
        if state == State::EStopped || state == State::Holding || empty {
            self.runtime.set_velocity(0.0);
            self.runtime.set_busy(false);
            if state == State::Stopping {
                self.state_holding();
            }
            return Ok(ExecStatus::Noop);
        }

        let Some(head) = self.queue.head_idx() else {
            return Ok(ExecStatus::Noop);
        };

        if self.queue.block(head).state == BlockState::New {
            // On stream start wait for the queue to fill a little, or for
            // the block to age out, to avoid stuttering.
            if !self.runtime.is_busy()
                && self.queue.fill() < EXEC_MIN_FILL
                && self.now_ms() < self.queue.block(head).ts_ms + EXEC_DELAY_MS
            {
                return Ok(ExecStatus::Noop);
            }

            // Take control: from here the planner may not touch this block.
            let block = self.queue.block_mut(head);
            block.state = BlockState::Init;
            block.replannable = false;
            let line = block.line;
            self.runtime.set_line(line);
        }

        let status = match self.queue.block(head).kind {
            BlockKind::Line => self.exec_line(head),
            BlockKind::Dwell(seconds) => self.exec_dwell(seconds),
            BlockKind::Jog => self.exec_jog(),
            BlockKind::Calibrate => self.exec_calibrate(),
            BlockKind::Empty => Err(MotionError::Internal),
        };

        // Only a queued move makes the runtime busy. Nonstop blocks (jog,
        // calibrate done-states) leave it idle so the fill wait above still
        // applies when a new stream starts.
        if matches!(status, Ok(ExecStatus::Again) | Ok(ExecStatus::Done)) {
            self.runtime.set_busy(true);
        }

        // Retire finished blocks
        if !matches!(status, Ok(ExecStatus::Again)) {
            if fp_zero(self.runtime.velocity())
                && (self.state.get() == State::Stopping || self.queue.block(head).hold)
            {
                self.state_holding();
            }

            if self.queue.block(head).state == BlockState::Restart {
                // Feedhold consumed part of this block; the remainder
                // re-enters the queue as a fresh move.
                self.queue.block_mut(head).state = BlockState::New;
            } else {
                // The successor must not be replanned once we may fetch it;
                // otherwise planning races the next dispatch.
                let next = self.queue.next_idx(head);
                self.queue.block_mut(next).replannable = false;

                if self.queue.pop().is_err() {
                    return Err(MotionError::Internal);
                }
                if self.queue.is_empty() {
                    self.state.idle();
                }
            }
        }

        // Convert for the stepper: Done means a move was prepped, Again
        // means call back immediately.
        match status {
            Ok(ExecStatus::Noop) | Ok(ExecStatus::MinimumTime) => {
                if self.queue.is_empty() {
                    Ok(ExecStatus::Noop)
                } else {
                    Ok(ExecStatus::Again)
                }
            }
            Ok(ExecStatus::Again) => Ok(ExecStatus::Done),
            other => other,
        }
    }

    /// Executes one segment of a planned line block.
    fn exec_line(&mut self, bf: usize) -> MotionResult {
        if self.exec.abort {
            self.exec.abort = false;
            self.runtime.set_velocity(0.0); // hard stop
            return Ok(ExecStatus::Noop);
        }

        if self.queue.block(bf).state == BlockState::Init {
            self.queue.block_mut(bf).state = BlockState::Active;
            if self.exec_line_init(bf) == ExecStatus::Noop {
                return Ok(ExecStatus::Noop); // zero-length block
            }
        }

        if self.state.get() == crate::motion::state::State::Stopping && !self.exec.hold_planned {
            self.plan_hold(bf);
        }

        let status = match self.exec.section {
            Section::Head => self.exec_line_head(),
            Section::Body => self.exec_line_body(),
            Section::Tail => self.exec_line_tail(),
        };

        if !matches!(status, Ok(ExecStatus::Again)) {
            self.runtime.set_velocity(self.exec.exit_velocity);
        }

        status
    }

    /// Copies block parameters into the executor and computes the section
    /// waypoints from the current runtime position.
    fn exec_line_init(&mut self, bf: usize) -> ExecStatus {
        let block = self.queue.block(bf);
        if fp_zero(block.length) {
            return ExecStatus::Noop;
        }

        self.exec.unit = block.unit;
        self.exec.final_target = block.target;
        self.exec.head_length = block.head_length;
        self.exec.body_length = block.body_length;
        self.exec.tail_length = block.tail_length;
        self.exec.entry_velocity = block.entry_velocity;
        self.exec.cruise_velocity = block.cruise_velocity;
        self.exec.exit_velocity = block.exit_velocity;

        self.exec.section = Section::Head;
        self.exec.section_new = true;
        self.exec.hold_planned = false;

        let position = *self.runtime.position();
        for axis in 0..AXES {
            self.exec.waypoint[Section::Head as usize][axis] =
                position[axis] + self.exec.unit[axis] * self.exec.head_length;
            self.exec.waypoint[Section::Body as usize][axis] = position[axis]
                + self.exec.unit[axis] * (self.exec.head_length + self.exec.body_length);
            self.exec.waypoint[Section::Tail as usize][axis] = self.exec.final_target[axis];
        }

        ExecStatus::Done
    }

    fn exec_line_head(&mut self) -> MotionResult {
        self.exec.section = Section::Head;
        let status = self.exec_line_section(
            self.exec.head_length,
            self.exec.entry_velocity,
            self.exec.cruise_velocity,
        )?;

        match status {
            ExecStatus::Noop => self.exec_line_body(),
            ExecStatus::Done => {
                self.exec.section = Section::Body;
                self.exec.section_new = true;
                Ok(ExecStatus::Again)
            }
            other => Ok(other),
        }
    }

    fn exec_line_body(&mut self) -> MotionResult {
        self.exec.section = Section::Body;
        let status = self.exec_line_section(
            self.exec.body_length,
            self.exec.cruise_velocity,
            self.exec.cruise_velocity,
        )?;

        match status {
            ExecStatus::Noop => self.exec_line_tail(),
            ExecStatus::Done => {
                self.exec.section = Section::Tail;
                self.exec.section_new = true;
                Ok(ExecStatus::Again)
            }
            other => Ok(other),
        }
    }

    fn exec_line_tail(&mut self) -> MotionResult {
        self.exec.section = Section::Tail;
        self.exec_line_section(
            self.exec.tail_length,
            self.exec.cruise_velocity,
            self.exec.exit_velocity,
        )
    }

    /// Common section integrator.
    ///
    /// The parameter increment is 1 / (segments + 1), so the curve parameter
    /// never reaches 1; the final segment snaps to the section waypoint
    /// instead, which also absorbs the forward-differencing rounding error.
    fn exec_line_section(&mut self, length: f64, vi: f64, vt: f64) -> MotionResult {
        if self.exec.section_new {
            if fp_zero(length) {
                return Ok(ExecStatus::Noop); // end the section
            }
            if vi == 0.0 && vt == 0.0 {
                return Err(MotionError::Internal); // nonzero length needs velocity
            }

            // length / average velocity
            let move_time = 2.0 * length / (vi + vt);
            let segments = (move_time / NOM_SEGMENT_TIME).ceil();
            self.exec.segment_time = move_time / segments;
            self.exec.segment_count = segments as u32;
            self.exec.segment = 0;
            self.exec.segment_dist = 0.0;
            self.exec.segment_start = *self.runtime.position();

            if vi == vt {
                self.exec.segment_delta = length / segments;
                self.exec.segment_velocity = vi;
            } else {
                self.exec.segment_delta = 1.0 / (segments + 1.0);
            }

            if self.exec.segment_time < MIN_SEGMENT_TIME {
                return Ok(ExecStatus::MinimumTime); // exit without advancing
            }

            self.exec.section_new = false;
        }

        self.exec.segment += 1;

        let mut target = [0.0; AXES];
        if self.exec.segment == self.exec.segment_count && !self.exec.hold_planned {
            // Snap to the exact section end
            target = self.exec.waypoint[self.exec.section as usize];
        } else {
            if vi == vt {
                self.exec.segment_dist += self.exec.segment_delta;
            } else {
                self.exec.segment_velocity =
                    velocity_curve(vi, vt, self.exec.segment as f64 * self.exec.segment_delta);
                self.exec.segment_dist += self.exec.segment_velocity * self.exec.segment_time;
            }

            for axis in 0..AXES {
                target[axis] =
                    self.exec.segment_start[axis] + self.exec.unit[axis] * self.exec.segment_dist;
            }
        }

        self.runtime.set_velocity(self.exec.segment_velocity);
        self.runtime_move_to_target(self.exec.segment_time, &target)?;

        Ok(if self.exec.segment < self.exec.segment_count {
            ExecStatus::Again
        } else {
            ExecStatus::Done
        })
    }

    /// Replans the in-flight block to decelerate to zero for a feedhold.
    ///
    /// If the remaining length cannot absorb the deceleration, the block
    /// decelerates as far as it can and a nonzero exit velocity carries the
    /// rest into the next block. If there is length to spare, the leftover
    /// becomes a fresh move via the RESTART state and is executed on resume.
    fn plan_hold(&mut self, bf: usize) {
        let available = vector_length(&self.exec.final_target, self.runtime.position());
        let braking_velocity = self.exec.segment_velocity;
        let jerk = self.queue.block(bf).jerk;
        let cbrt_jerk = self.queue.block(bf).cbrt_jerk;
        let mut braking_length = target_length(braking_velocity, 0.0, jerk);

        // Perfect-fit decels (homing) must not become Case 2 moves.
        if available < braking_length && fp_zero(self.queue.block(bf).exit_velocity) {
            braking_length = available;
        }

        self.exec.section = Section::Tail;
        self.exec.section_new = true;
        self.exec.cruise_velocity = braking_velocity;
        self.exec.hold_planned = true;

        if (available - braking_length).abs() < HOLD_DECELERATION_TOLERANCE {
            // Case 0: deceleration fits almost exactly
            self.exec.exit_velocity = 0.0;
            self.exec.tail_length = available;
        } else if braking_length <= available {
            // Case 1: deceleration fits entirely into the remaining length
            self.exec.exit_velocity = 0.0;
            self.exec.tail_length = braking_length;

            // Re-use the block to run the remaining length after resume
            let block = self.queue.block_mut(bf);
            block.length = available - braking_length;
            block.delta_vmax = target_velocity(0.0, block.length, block.jerk, block.cbrt_jerk);
            block.entry_vmax = 0.0;
            block.state = BlockState::Restart;
        } else {
            // Case 2: deceleration exceeds this block; the successor absorbs
            // the remainder
            self.exec.tail_length = available;
            self.exec.exit_velocity =
                braking_velocity - target_velocity(0.0, available, jerk, cbrt_jerk);
        }

        tracing::debug!(
            available,
            braking_length,
            exit = self.exec.exit_velocity,
            "feedhold planned"
        );
    }

    /// Dwell blocks emit no motion; the delay runs in the stepper pipeline.
    fn exec_dwell(&mut self, seconds: f64) -> MotionResult {
        self.stepper.prep_dwell(seconds)?;
        Ok(ExecStatus::Done)
    }
}
