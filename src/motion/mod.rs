// src/motion/mod.rs

// --- Submodules ---
pub mod buffer;
pub mod exec;
pub mod jog;
pub mod line;
pub mod plan;
pub mod runtime;
pub mod state;
pub mod velocity;

// --- Re-exports for external use ---
pub use buffer::{Block, BlockKind, BlockState, PlannerQueue};
pub use line::MoveFlags;
pub use state::{Cycle, HoldReason, State};

use crate::axis::{AXES, Axes, Axis, AxisSettings, MOTORS};
use crate::calibrate::Calibrate;
use crate::config::Config;
use crate::error::MotionError;
use crate::kinematics;
use crate::motor::Motors;
use crate::stepper::Stepper;

// Planner timing and tuning constants. Times inside the planner are in
// minutes so they compose with mm/min feed rates; the segment clock is
// milliseconds.
pub const JERK_MULTIPLIER: f64 = 1e6;
pub const JERK_MATCH_PRECISION: f64 = 1000.0;

pub const SEGMENT_MS: f64 = 5.0;
pub const NOM_SEGMENT_TIME: f64 = SEGMENT_MS / 60_000.0; // minutes
pub const MIN_SEGMENT_TIME: f64 = NOM_SEGMENT_TIME / 2.0;
pub const SEGMENT_TIME: f64 = NOM_SEGMENT_TIME;

pub const EXEC_MIN_FILL: usize = 4;
pub const EXEC_DELAY_MS: u64 = 250;

/// Finish the deceleration in the current move when the leftover would be
/// shorter than this, avoiding segments around a hold that are too short to
/// process. In mm.
pub const HOLD_DECELERATION_TOLERANCE: f64 = 1.0;

pub const JOG_MIN_VELOCITY: f64 = 10.0; // mm/min
pub const JOG_JERK_MULT: f64 = 2.0;

const EPSILON: f64 = 1e-6;

pub(crate) fn fp_zero(value: f64) -> bool {
    value.abs() < EPSILON
}

/// Runtime-configurable planner parameters.
#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub junction_deviation: f64,
    pub junction_acceleration: f64,
    pub motor_idle_timeout_ms: u64,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            junction_deviation: 0.05,
            junction_acceleration: 200_000.0,
            motor_idle_timeout_ms: 2000,
        }
    }
}

/// The motion core: the planner ring, the segment executor, the stepper
/// pipeline and the machine state, owned as one value. All methods are
/// synchronous; the async controller drives `segment_tick` and
/// `state_callback` on their respective cadences.
#[derive(Debug, Default)]
pub struct MotionCore {
    pub axes: Axes,
    pub motors: Motors,
    pub queue: PlannerQueue,
    pub runtime: runtime::Runtime,
    pub state: state::PlannerState,
    pub stepper: Stepper,

    pub(crate) exec: exec::ExecContext,
    pub(crate) jog: jog::JogRuntime,
    pub(crate) cal: Calibrate,
    pub settings: PlannerSettings,

    /// The planner's last-known position: where the most recently planned
    /// block ends, ahead of both runtime and physical position.
    pub(crate) position: [f64; AXES],
    /// Single-step mode: each block plans to a stop and holds.
    pub(crate) plan_steps: bool,
    /// Tolerance-memoized (jerk, cbrt(jerk)) pair.
    pub(crate) jerk_memo: (f64, f64),

    now_ms: u64,
}

impl MotionCore {
    pub fn new(config: &Config) -> Self {
        let mut core = Self {
            motors: Motors::from_configs(&config.motors),
            settings: PlannerSettings {
                junction_deviation: config.planner.junction_deviation,
                junction_acceleration: config.planner.junction_acceleration,
                motor_idle_timeout_ms: (config.planner.motor_idle_timeout * 1000.0) as u64,
            },
            ..Self::default()
        };

        for (name, axis_config) in &config.axes {
            let Some(axis) = name.chars().next().and_then(Axis::from_char) else {
                tracing::warn!(%name, "unknown axis in config");
                continue;
            };
            *core.axes.get_mut(axis) = AxisSettings::from_config(axis_config);
        }

        for motor in 0..config.motors.len().min(MOTORS) {
            let axis = core.motors.get(motor).axis;
            core.axes.bind(axis, Some(motor));
        }

        core
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub(crate) fn advance_clock(&mut self, ms: u64) {
        self.now_ms += ms;
    }

    // --- Queue commits ---

    /// Commits the tail block, waking the state machine into RUNNING.
    pub(crate) fn push(&mut self, kind: BlockKind, line: i64) -> Result<(), MotionError> {
        self.state.running();
        self.push_nonstop(kind, line)
    }

    /// Commit variant for internal commands (jog, calibrate) that must not
    /// force RUNNING or block on queue fill.
    pub(crate) fn push_nonstop(&mut self, kind: BlockKind, line: i64) -> Result<(), MotionError> {
        let ts = self.now_ms;
        if self.queue.push(kind, line, ts).is_err() {
            return Err(self.alarm(MotionError::Internal));
        }
        Ok(())
    }

    /// Queues a dwell block.
    pub fn plan_dwell(&mut self, seconds: f64) -> Result<(), MotionError> {
        if !self.queue.has_space() {
            return Err(self.alarm(MotionError::Internal));
        }
        self.push(BlockKind::Dwell(seconds), self.runtime.line())
    }

    // --- Position ---

    pub fn axis_position(&self, axis: Axis) -> f64 {
        self.position[axis.index()]
    }

    pub fn get_position(&self) -> &[f64; AXES] {
        &self.position
    }

    /// Forces the planner's last-known position without motion. Used after
    /// homing and absolute-origin set.
    pub fn set_position(&mut self, position: [f64; AXES]) {
        self.position = position;
    }

    /// Forces one axis everywhere: planner, runtime, and the motor step
    /// counters. Only legal when no move is in flight.
    pub fn set_axis_position(&mut self, axis: Axis, position: f64) {
        self.position[axis.index()] = position;
        self.runtime.set_axis_position(axis, position);
        self.set_steps_from_position();
    }

    /// Writes the runtime position through kinematics into the motor step
    /// counters.
    pub fn set_steps_from_position(&mut self) {
        let steps = kinematics::travel_to_steps(&self.motors, self.runtime.position());
        for motor in 0..MOTORS {
            self.motors.get_mut(motor).set_position(steps[motor].round() as i64);
        }
    }

    // --- Segment handoff ---

    /// Converts a segment target to motor steps and hands it to the stepper
    /// prep stage, then advances the runtime position.
    pub(crate) fn runtime_move_to_target(
        &mut self,
        _time: f64,
        target: &[f64; AXES],
    ) -> Result<(), MotionError> {
        let steps = kinematics::travel_to_steps(&self.motors, target);
        let rates = self.max_step_rates();
        self.stepper.prep_line(
            &mut self.motors,
            &rates,
            &steps,
            self.now_ms,
            self.settings.motor_idle_timeout_ms,
        )?;
        self.runtime.set_position(*target);
        Ok(())
    }

    /// Per-motor axis velocity limits in steps/min, for the power fraction.
    pub(crate) fn max_step_rates(&self) -> [f64; MOTORS] {
        let mut rates = [0.0; MOTORS];
        for (i, rate) in rates.iter_mut().enumerate() {
            let motor = self.motors.get(i);
            *rate = self.axes.get(motor.axis).velocity_max * motor.steps_per_unit();
        }
        rates
    }

    // --- State plumbing ---

    pub(crate) fn state_holding(&mut self) {
        self.state.holding();
        self.plan_steps = false;
    }

    pub fn request_hold(&mut self) {
        self.state.request_hold();
    }

    pub fn request_start(&mut self) {
        self.state.request_start();
    }

    pub fn request_flush(&mut self) {
        self.state.request_flush();
    }

    pub fn request_resume(&mut self) {
        self.state.request_resume();
    }

    pub fn request_optional_pause(&mut self) {
        self.state.request_optional_pause();
    }

    /// Arms single-step mode and a start, so a held program advances one
    /// block at a time.
    pub fn request_step(&mut self) {
        self.plan_steps = true;
        self.state.request_start();
    }

    /// Honors a pending optional-pause at a program's optional stop point.
    pub fn optional_pause(&mut self) {
        if self.state.optional_pause_requested {
            self.state.set_hold_reason(HoldReason::UserPause);
            self.state_holding();
        }
    }

    pub fn is_quiescent(&self) -> bool {
        matches!(self.state.get(), State::Ready | State::Holding)
            && !self.stepper.is_busy()
            && !self.runtime.is_busy()
    }

    /// Discards all queued blocks and resets the executor. Callable only
    /// when quiescent.
    pub fn flush_planner(&mut self) {
        self.queue.clear();
        self.exec.reset();
        self.runtime.set_busy(false);
    }

    /// Fatal alarm path: log, latch ESTOPPED, halt the stepper pipeline and
    /// deenergize the motors. Returns the error for propagation.
    pub(crate) fn alarm(&mut self, error: MotionError) -> MotionError {
        tracing::error!(%error, "motion alarm");
        self.estop();
        error
    }

    /// Immediate stop: prep buffer cleared, stepper forced to a null move,
    /// motors deenergized, state latched ESTOPPED until external reset.
    pub fn estop(&mut self) {
        self.state.estop();
        self.stepper.shutdown(&mut self.motors);
        self.motors.deenergize_all();
        self.runtime.set_velocity(0.0);
        self.exec.reset();
    }

    /// Reconciles the request flags once per main-loop pass.
    ///
    /// A hold request during motion is honored, otherwise cleared. A flush
    /// request during motion is kept pending and honored once quiescent. A
    /// start request during motion is cleared; from a hold it replans the
    /// whole queue from zero and resumes, or returns to READY when the
    /// queue is empty.
    pub fn state_callback(&mut self) {
        if self.state.hold_requested || self.state.flush_requested {
            self.state.hold_requested = false;
            let reason = self
                .state
                .hold_reason_request
                .take()
                .unwrap_or(HoldReason::UserPause);
            self.state.set_hold_reason(reason);

            if self.state.get() == State::Running {
                self.state.stopping();
            }
        }

        // Only flush when idle or holding
        if self.state.flush_requested && self.is_quiescent() {
            if !self.queue.is_empty() {
                self.flush_planner();

                // Reset to the actual machine position; otherwise the
                // planner continues from the last discarded move.
                self.position = *self.runtime.position();
            }

            // Spindle stop goes to the spindle driver, an external
            // collaborator of this core.
            tracing::debug!("flush: spindle stop requested");

            if self.state.resume_requested {
                self.state.flush_requested = false;
                self.state.resume_requested = false;
                self.state.resume_ready();
            }
        }

        // Don't start while flushing or stopping
        if self.state.start_requested
            && !self.state.flush_requested
            && self.state.get() != State::Stopping
        {
            self.state.start_requested = false;
            self.state.optional_pause_requested = false;

            if self.state.get() == State::Holding {
                if !self.queue.is_empty() {
                    // Always replan when coming out of a hold
                    self.queue.replan_all();
                    self.state.resume_running();
                } else {
                    self.state.resume_ready();
                }
            }
        }

        // An e-stop drains whatever the queue still holds
        if self.state.get() == State::EStopped && !self.queue.is_empty() {
            self.queue.clear();
        }
    }
}
