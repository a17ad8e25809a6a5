// src/calibrate.rs
//
// Stall-guard calibration: accelerate a single motor at constant
// acceleration until the driver reports a stall, zero the step counter,
// run the same ramp in reverse, and read mechanical travel from the step
// count between the two stalls.
use crate::error::{ExecStatus, MotionResult};
use crate::kinematics;
use crate::motion::state::{Cycle, State};
use crate::motion::{MotionCore, SEGMENT_TIME};

const CAL_MIN_VELOCITY: f64 = 1000.0; // mm/min
const CAL_TARGET_SG: u16 = 100;
const CAL_MAX_DELTA_SG: i32 = 75;
const CAL_WAIT_MS: u64 = 3;
const CAL_ACCELERATION: f64 = 1_000_000.0; // mm/min^2

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum CalPhase {
    #[default]
    Start,
    Accel,
}

#[derive(Debug, Clone, Default)]
pub struct Calibrate {
    stall_valid: bool,
    stalled: bool,
    reverse: bool,

    wait_until_ms: u64,
    phase: CalPhase,
    motor: usize,

    velocity: f64,
    stallguard: u16,
    /// Steps between the forward and reverse stalls, once measured.
    travel_steps: Option<i64>,
}

impl Calibrate {
    pub fn travel_steps(&self) -> Option<i64> {
        self.travel_steps
    }
}

impl MotionCore {
    /// Steps measured between the forward and reverse stalls of the last
    /// calibration run, if one completed.
    pub fn calibration_travel_steps(&self) -> Option<i64> {
        self.cal.travel_steps()
    }

    /// Starts stall calibration for one motor. Only valid when idle in the
    /// machining cycle.
    pub fn start_calibration(&mut self, motor: usize) -> Result<(), crate::error::MotionError> {
        if self.state.cycle() != Cycle::Machining || self.state.get() != State::Ready {
            return Ok(());
        }

        self.cal = Calibrate {
            motor,
            ..Calibrate::default()
        };
        self.state.set_cycle(Cycle::Calibrating)?;
        self.push_nonstop(crate::motion::buffer::BlockKind::Calibrate, -1)?;

        Ok(())
    }

    /// Stall-guard sample callback from the motor driver layer. A sudden
    /// drop in the stall-guard value reads as a stall once the motor is
    /// above the minimum valid velocity.
    pub fn calibrate_set_stallguard(&mut self, motor: usize, sg: u16) {
        if self.cal.motor != motor {
            return;
        }

        if self.cal.stall_valid {
            let delta = sg as i32 - self.cal.stallguard as i32;
            if sg == 0 || CAL_MAX_DELTA_SG < delta.abs() {
                self.cal.stalled = true;
            }
        }

        self.cal.stallguard = sg;
    }

    pub(crate) fn exec_calibrate(&mut self) -> MotionResult {
        let max_delta_v = CAL_ACCELERATION * SEGMENT_TIME;

        if self.now_ms() >= self.cal.wait_until_ms {
            match self.cal.phase {
                CalPhase::Start => {
                    self.cal.phase = CalPhase::Accel;
                    self.cal.velocity = 0.0;
                    self.cal.stall_valid = false;
                    self.cal.stalled = false;
                    self.cal.reverse = false;
                    self.cal.wait_until_ms = self.now_ms() + CAL_WAIT_MS;
                }

                CalPhase::Accel => {
                    if CAL_MIN_VELOCITY < self.cal.velocity {
                        self.cal.stall_valid = true;
                    }

                    if self.cal.velocity < CAL_MIN_VELOCITY
                        || CAL_TARGET_SG < self.cal.stallguard
                    {
                        self.cal.velocity += max_delta_v;
                    }

                    if self.cal.stalled {
                        if self.cal.reverse {
                            let steps = -self.motors.get(self.cal.motor).position();
                            let mm =
                                steps as f64 / self.motors.get(self.cal.motor).steps_per_unit();
                            self.cal.travel_steps = Some(steps);
                            tracing::info!(steps, mm, "calibration travel");

                            self.state.set_cycle(Cycle::Machining)?;
                            return Ok(ExecStatus::Noop); // done, no move queued
                        }

                        // Forward stall: zero the counter and run back
                        self.motors.get_mut(self.cal.motor).set_position(0);
                        self.cal.reverse = true;
                        self.cal.velocity = 0.0;
                        self.cal.stall_valid = false;
                        self.cal.stalled = false;
                    }
                }
            }
        }

        // While waiting or re-starting the ramp the segment carries no
        // travel; the cadence continues either way.
        let axis = self.motors.get(self.cal.motor).axis;
        let mut travel = *self.runtime.position();
        if self.cal.velocity != 0.0 {
            let sign = if self.cal.reverse { -1.0 } else { 1.0 };
            travel[axis.index()] += SEGMENT_TIME * self.cal.velocity * sign;
        }

        let steps = kinematics::travel_to_steps(&self.motors, &travel);
        let rates = self.max_step_rates();
        let now_ms = self.now_ms();
        let idle_timeout_ms = self.settings.motor_idle_timeout_ms;
        self.stepper
            .prep_line(&mut self.motors, &rates, &steps, now_ms, idle_timeout_ms)?;
        self.runtime.set_position(travel);
        self.runtime.set_velocity(self.cal.velocity);

        Ok(ExecStatus::Again)
    }
}
