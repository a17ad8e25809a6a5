// src/motion/jog.rs
//
// Jog cycle: up to six normalized axis velocity commands in [-1, 1] scale
// the per-axis velocity limits. Each executor tick ramps every axis toward
// its latest target with jerk-limited timing and the same quintic velocity
// curve the line executor uses. Reversals brake to zero first.
use crate::axis::{AXES, Axis};
use crate::error::{ExecStatus, MotionResult};
use crate::motion::plan::target_length;
use crate::motion::velocity::velocity_curve;
use crate::motion::{
    JERK_MULTIPLIER, JOG_JERK_MULT, JOG_MIN_VELOCITY, MotionCore, SEGMENT_TIME, fp_zero,
};

#[derive(Debug, Clone, Copy, Default)]
struct JogAxis {
    delta: f64,
    t: f64,
    changed: bool,

    sign: f64,
    velocity: f64,
    /// Latest commanded velocity, normalized to [-1, 1].
    next: f64,
    initial: f64,
    target: f64,
}

#[derive(Debug, Clone, Default)]
pub struct JogRuntime {
    done: bool,
    axes: [JogAxis; AXES],
}

impl JogRuntime {
    pub fn reset(&mut self) {
        *self = JogRuntime::default();
    }

    pub fn set_command(&mut self, velocities: [f64; AXES]) {
        for (axis, &v) in self.axes.iter_mut().zip(velocities.iter()) {
            axis.next = v.clamp(-1.0, 1.0);
        }
    }

    pub fn axis_velocity(&self, axis: Axis) -> f64 {
        self.axes[axis.index()].velocity
    }
}

impl MotionCore {
    /// Accepts a new jog command, entering the jog cycle if needed.
    ///
    /// No-ops unless the machine is idle in the machining cycle or already
    /// jogging.
    pub fn jog(&mut self, velocities: [f64; AXES]) -> Result<(), crate::error::MotionError> {
        use crate::motion::state::{Cycle, State};

        let jogging = self.state.cycle() == Cycle::Jogging;
        if !jogging
            && (self.state.get() != State::Ready || self.state.cycle() != Cycle::Machining)
        {
            return Ok(());
        }

        if !jogging {
            self.jog.reset();
        }
        self.jog.set_command(velocities);

        if !jogging {
            self.state.set_cycle(Cycle::Jogging)?;
            self.push_nonstop(crate::motion::buffer::BlockKind::Jog, -1)?;
        }

        Ok(())
    }

    /// One jog segment: pick up new targets, ramp each axis, emit a move.
    pub(crate) fn exec_jog(&mut self) -> MotionResult {
        self.jog.done = true;

        // Latch new per-axis targets
        for axis in Axis::ALL {
            if !self.axes.is_enabled(axis, &self.motors) {
                continue;
            }
            let changed = self.next_axis_velocity(axis);
            self.jog.axes[axis.index()].changed = changed;
        }

        // Ramp each axis toward its target
        let mut velocity_sqr = 0.0;
        for axis in Axis::ALL {
            if !self.axes.is_enabled(axis, &self.motors) {
                continue;
            }
            let v = self.compute_axis_velocity(axis);
            velocity_sqr += v * v;
            let ja = &mut self.jog.axes[axis.index()];
            ja.velocity = v * ja.sign;
            if JOG_MIN_VELOCITY < v {
                self.jog.done = false;
            }
        }

        if self.jog.done {
            // All axes at rest: sync position and leave the cycle
            self.position = *self.runtime.position();
            self.state.set_cycle(crate::motion::state::Cycle::Machining)?;
            return Ok(ExecStatus::Noop); // done, no move queued
        }

        let mut target = [0.0; AXES];
        for axis in Axis::ALL {
            target[axis.index()] = self.runtime.axis_position(axis)
                + self.jog.axes[axis.index()].velocity * SEGMENT_TIME;
        }

        self.runtime.set_velocity(velocity_sqr.sqrt());
        self.runtime_move_to_target(SEGMENT_TIME, &target)?;

        Ok(ExecStatus::Again)
    }

    /// Applies the latest command to an axis target. Returns true if the
    /// target changed. A sign flip targets zero first, so the axis brakes
    /// before reversing.
    fn next_axis_velocity(&mut self, axis: Axis) -> bool {
        let velocity_max = self.axes.get(axis).velocity_max;
        let i = axis.index();

        let mut vn = self.jog.axes[i].next * velocity_max;
        let vi = self.jog.axes[i].velocity;

        if JOG_MIN_VELOCITY < vn.abs() {
            self.jog.done = false;
        }

        if !fp_zero(vi) && (vn < 0.0) != (vi < 0.0) {
            vn = 0.0; // plan to zero on sign change
        }

        if vn.abs() < JOG_MIN_VELOCITY {
            vn = 0.0;
        }

        if self.jog.axes[i].target == vn {
            return false;
        }

        self.jog.axes[i].target = vn;
        if vn != 0.0 {
            self.jog.axes[i].sign = if vn < 0.0 { -1.0 } else { 1.0 };
        }

        true
    }

    /// Advances one axis along its jerk-limited velocity ramp.
    fn compute_axis_velocity(&mut self, axis: Axis) -> f64 {
        let jerk_max = self.axes.get(axis).jerk_max();
        let i = axis.index();

        let v = self.jog.axes[i].velocity.abs();
        let vt = self.jog.axes[i].target.abs();

        if JOG_MIN_VELOCITY < vt {
            self.jog.done = false;
        }

        if (v - vt).abs() < 1e-9 {
            return vt;
        }

        if self.jog.axes[i].changed {
            let jerk = jerk_max * JERK_MULTIPLIER;
            let length = target_length(v, vt, jerk * JOG_JERK_MULT);
            let move_time = 2.0 * length / (v + vt);

            if move_time <= SEGMENT_TIME {
                return vt;
            }

            self.jog.axes[i].initial = v;
            self.jog.axes[i].delta = SEGMENT_TIME / move_time;
            self.jog.axes[i].t = self.jog.axes[i].delta;
        }

        if self.jog.axes[i].t <= 0.0 {
            return v;
        }
        if 1.0 <= self.jog.axes[i].t {
            return vt;
        }

        let v = velocity_curve(self.jog.axes[i].initial, vt, self.jog.axes[i].t);
        self.jog.axes[i].t += self.jog.axes[i].delta;

        v
    }
}
