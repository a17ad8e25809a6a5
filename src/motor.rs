// src/motor.rs
//
// Per-motor state: power sequencing, fault latching and the step pulse
// generator programming. The planner and executor never touch motors
// directly; everything arrives through the stepper pipeline as prep/load
// pairs (see stepper.rs).
use serde::{Deserialize, Serialize};

use crate::axis::{Axis, MOTORS};
use crate::config::MotorConfig;
use crate::error::MotionError;
use crate::motion::SEGMENT_TIME;

/// Step-timer clock after the fixed divider, in Hz.
pub const STEP_TIMER_FREQ: u32 = 4_000_000;
/// Step-timer clocks in one full segment.
pub const SEGMENT_CLOCKS: u32 = STEP_TIMER_FREQ / 1000 * crate::motion::SEGMENT_MS as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerMode {
    Disabled,
    AlwaysPowered,
    #[default]
    PoweredInCycle,
    PoweredWhenMoving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    #[default]
    Off,
    Idle,
    Energizing,
    Active,
}

/// Latched driver fault and status flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MotorFlags {
    pub enabled: bool,
    pub stalled: bool,
    pub over_temp: bool,
    pub over_current: bool,
    pub driver_fault: bool,
    pub under_voltage: bool,
}

impl MotorFlags {
    pub fn has_error(&self) -> bool {
        self.stalled || self.over_temp || self.over_current || self.driver_fault
            || self.under_voltage
    }

    fn merge_errors(&mut self, other: MotorFlags) {
        self.stalled |= other.stalled;
        self.over_temp |= other.over_temp;
        self.over_current |= other.over_current;
        self.driver_fault |= other.driver_fault;
        self.under_voltage |= other.under_voltage;
    }
}

/// Step-pulse timer prescaler. The coarsest rate whose per-step period fits
/// in 16 bits is chosen so slow moves still step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Prescaler {
    Div1,
    Div2,
    Div4,
    Div8,
}

impl Prescaler {
    fn select(ticks_per_step: u32) -> Option<(Prescaler, u16)> {
        let (prescaler, shift) = match ticks_per_step {
            0..=0xffff => (Prescaler::Div1, 0),
            0x1_0000..=0x1_ffff => (Prescaler::Div2, 1),
            0x2_0000..=0x3_ffff => (Prescaler::Div4, 2),
            0x4_0000..=0x7_ffff => (Prescaler::Div8, 3),
            _ => return None, // Too slow to step this segment
        };

        let period = (ticks_per_step >> shift) as u16;
        if period == 0 { None } else { Some((prescaler, period)) }
    }
}

/// A programmed step burst for one segment: what the timer + DMA pair would
/// emit in hardware.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PulseTrain {
    pub steps: u16,
    pub clockwise: bool,
    pub prescaler: Prescaler,
    pub period: u16,
}

#[derive(Debug, Clone)]
pub struct Motor {
    // Config
    pub axis: Axis,
    microsteps: u16,
    step_angle: f64,
    travel_per_rev: f64,
    pub reverse: bool,
    pub power_mode: PowerMode,

    // Runtime
    power_state: PowerState,
    power_timeout_ms: u64,
    pub flags: MotorFlags,
    active: bool,

    // Move prep
    steps: u16,
    clockwise: bool,
    position: i64,
    power: f64,

    // Last loaded pulse train, for observation by tests and the simulator
    last_pulse: Option<PulseTrain>,
}

impl Default for Motor {
    fn default() -> Self {
        Self {
            axis: Axis::X,
            microsteps: 32,
            step_angle: 1.8,
            travel_per_rev: 5.0,
            reverse: false,
            power_mode: PowerMode::Disabled,
            power_state: PowerState::Off,
            power_timeout_ms: 0,
            flags: MotorFlags::default(),
            active: false,
            steps: 0,
            clockwise: true,
            position: 0,
            power: 0.0,
            last_pulse: None,
        }
    }
}

impl Motor {
    pub fn from_config(config: &MotorConfig) -> Option<Self> {
        Some(Self {
            axis: Axis::from_char(config.axis)?,
            microsteps: validate_microsteps(config.microsteps)?,
            step_angle: config.step_angle,
            travel_per_rev: config.travel_per_rev,
            reverse: config.reverse,
            power_mode: config.power_mode,
            ..Self::default()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.power_mode != PowerMode::Disabled
    }

    pub fn microsteps(&self) -> u16 {
        self.microsteps
    }

    pub fn set_microsteps(&mut self, microsteps: u16) {
        if let Some(valid) = validate_microsteps(microsteps) {
            self.microsteps = valid;
        }
    }

    pub fn steps_per_unit(&self) -> f64 {
        360.0 * self.microsteps as f64 / self.travel_per_rev / self.step_angle
    }

    pub fn units_per_step(&self) -> f64 {
        self.travel_per_rev * self.step_angle / self.microsteps as f64 / 360.0
    }

    /// Homing velocity for stall-guard homing, derived from the driver's
    /// stall sample window.
    pub fn stall_homing_velocity(&self) -> f64 {
        self.travel_per_rev * self.step_angle * 1667.0 / self.microsteps as f64
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn set_position(&mut self, position: i64) {
        self.position = position;
    }

    pub fn power_state(&self) -> PowerState {
        self.power_state
    }

    pub fn last_pulse(&self) -> Option<PulseTrain> {
        self.last_pulse
    }

    pub fn reset_flags(&mut self) {
        self.flags = MotorFlags::default();
    }

    /// Computes the step delta for the next segment and refreshes motor
    /// power. Called from the exec path via `Stepper::prep_line`.
    ///
    /// `max_step_rate` is the axis velocity limit converted to steps/min.
    pub fn prep_move(
        &mut self,
        motor: usize,
        target: f64,
        max_step_rate: f64,
        now_ms: u64,
        idle_timeout_ms: u64,
    ) -> Result<(), MotionError> {
        if target.is_nan() {
            return Err(MotionError::MoveTargetNan);
        }
        if target.is_infinite() {
            return Err(MotionError::MoveTargetInfinite);
        }

        let target = target.round() as i64;
        let mut steps = target - self.position;
        self.position = target;

        // Direction, compensating for polarity
        let negative = steps < 0;
        self.clockwise = !(negative ^ self.reverse);
        if negative {
            steps = -steps;
        }
        self.steps = steps.min(u16::MAX as i64) as u16;

        // Power fraction from this segment's step rate
        self.power = if max_step_rate > 0.0 {
            (self.steps as f64 / (max_step_rate * SEGMENT_TIME)).min(1.0)
        } else {
            0.0
        };

        match self.power_mode {
            PowerMode::PoweredWhenMoving if self.steps == 0 => {}
            PowerMode::PoweredWhenMoving | PowerMode::AlwaysPowered
            | PowerMode::PoweredInCycle => {
                self.power_timeout_ms = now_ms + idle_timeout_ms;
            }
            PowerMode::Disabled => {}
        }
        self.update_power(motor, now_ms);

        Ok(())
    }

    /// Programs the pulse timer for the prepped steps. `clocks_remaining` is
    /// the step-timer clocks left in the current segment.
    pub fn load_move(&mut self, clocks_remaining: u32) {
        if self.active {
            return; // previous burst still draining
        }

        self.last_pulse = None;

        if self.steps == 0 {
            self.active = false;
            return;
        }

        let ticks_per_step = clocks_remaining / self.steps as u32;
        if let Some((prescaler, period)) = Prescaler::select(ticks_per_step) {
            self.last_pulse = Some(PulseTrain {
                steps: self.steps,
                clockwise: self.clockwise,
                prescaler,
                period,
            });
            self.active = true;
            self.steps = 0;
        }
    }

    /// Pulse-complete handler: the hardware counterpart is the per-motor
    /// DMA-complete interrupt stopping the step stream.
    pub fn end_move(&mut self) {
        self.active = false;
    }

    /// Power state machine tick. Runs both from the prep path and the
    /// periodic power callback.
    fn update_power(&mut self, motor: usize, now_ms: u64) {
        match self.power_mode {
            PowerMode::PoweredWhenMoving | PowerMode::PoweredInCycle
                if now_ms >= self.power_timeout_ms =>
            {
                if self.power_state == PowerState::Active {
                    self.set_power_state(motor, PowerState::Idle);
                    self.flags.enabled = false;
                }
            }

            PowerMode::PoweredWhenMoving | PowerMode::PoweredInCycle
            | PowerMode::AlwaysPowered => {
                if self.power_state != PowerState::Active
                    && self.power_state != PowerState::Energizing
                    && !self.flags.has_error()
                {
                    self.set_power_state(motor, PowerState::Energizing);
                    self.driver_callback(motor);
                }
            }

            PowerMode::Disabled => {
                if self.power_state != PowerState::Off {
                    self.set_power_state(motor, PowerState::Off);
                    self.flags.enabled = false;
                }
            }
        }
    }

    /// Driver-ready callback; promotes an energizing motor to active.
    fn driver_callback(&mut self, motor: usize) {
        if self.power_state == PowerState::Idle {
            self.flags.enabled = false;
        } else {
            self.power_state = PowerState::Active;
            self.flags.enabled = true;
            tracing::debug!(motor, "motor energized");
        }
    }

    fn set_power_state(&mut self, motor: usize, state: PowerState) {
        tracing::trace!(motor, ?state, "motor power state");
        self.power_state = state;
    }

    pub fn deenergize(&mut self) {
        self.power_state = PowerState::Off;
        self.flags.enabled = false;
        self.active = false;
        self.steps = 0;
    }
}

fn validate_microsteps(microsteps: u16) -> Option<u16> {
    match microsteps {
        1 | 2 | 4 | 8 | 16 | 32 | 64 | 128 | 256 => Some(microsteps),
        _ => None,
    }
}

/// The motor table.
#[derive(Debug, Clone, Default)]
pub struct Motors {
    motors: [Motor; MOTORS],
}

impl Motors {
    pub fn from_configs(configs: &[MotorConfig]) -> Self {
        let mut motors = Self::default();
        for (i, config) in configs.iter().take(MOTORS).enumerate() {
            if let Some(motor) = Motor::from_config(config) {
                motors.motors[i] = motor;
            } else {
                tracing::warn!(motor = i, "invalid motor config, leaving disabled");
            }
        }
        motors
    }

    pub fn get(&self, motor: usize) -> &Motor {
        &self.motors[motor]
    }

    pub fn get_mut(&mut self, motor: usize) -> &mut Motor {
        &mut self.motors[motor]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Motor> {
        self.motors.iter()
    }

    pub fn is_enabled(&self, motor: usize) -> bool {
        motor < MOTORS && self.motors[motor].is_enabled()
    }

    /// Periodic power maintenance: handles power-down timeouts.
    pub fn power_callback(&mut self, now_ms: u64) {
        for (i, motor) in self.motors.iter_mut().enumerate() {
            motor.update_power(i, now_ms);
        }
    }

    /// Latches driver-reported faults. A fault on an active motor is an
    /// alarm and escalates to e-stop at the state layer.
    pub fn fault(&mut self, motor: usize, errors: MotorFlags) -> Option<MotionError> {
        let m = &mut self.motors[motor];
        if m.power_state != PowerState::Active {
            return None;
        }

        m.flags.merge_errors(errors);

        if m.flags.stalled {
            Some(MotionError::MotorStalled(motor))
        } else if m.flags.over_temp {
            Some(MotionError::MotorOverTemp(motor))
        } else if m.flags.over_current {
            Some(MotionError::MotorOverCurrent(motor))
        } else if m.flags.driver_fault {
            Some(MotionError::MotorDriverFault(motor))
        } else if m.flags.under_voltage {
            Some(MotionError::MotorUnderVoltage(motor))
        } else {
            None
        }
    }

    pub fn deenergize_all(&mut self) {
        for motor in self.motors.iter_mut() {
            motor.deenergize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_per_unit_formula() {
        let motor = Motor {
            microsteps: 32,
            step_angle: 1.8,
            travel_per_rev: 5.0,
            ..Motor::default()
        };
        // 360 * 32 / (5 * 1.8) = 1280 steps/mm
        assert!((motor.steps_per_unit() - 1280.0).abs() < 1e-9);
        assert!((motor.units_per_step() - 1.0 / 1280.0).abs() < 1e-12);
    }

    #[test]
    fn prescaler_picks_coarsest_fitting_rate() {
        assert_eq!(Prescaler::select(1000), Some((Prescaler::Div1, 1000)));
        assert_eq!(Prescaler::select(0xffff), Some((Prescaler::Div1, 0xffff)));
        assert_eq!(Prescaler::select(0x10000), Some((Prescaler::Div2, 0x8000)));
        assert_eq!(Prescaler::select(0x3ffff), Some((Prescaler::Div4, 0xffff)));
        assert_eq!(Prescaler::select(0x7ffff), Some((Prescaler::Div8, 0xffff)));
        assert_eq!(Prescaler::select(0x80000), None);
        assert_eq!(Prescaler::select(0), None);
    }

    #[test]
    fn prep_move_tracks_position_and_direction() {
        let mut motor = Motor {
            power_mode: PowerMode::PoweredInCycle,
            ..Motor::default()
        };
        motor.prep_move(0, 100.4, 1e6, 0, 2000).unwrap();
        assert_eq!(motor.position(), 100);
        assert_eq!(motor.steps, 100);
        assert!(motor.clockwise);

        motor.prep_move(0, 40.0, 1e6, 5, 2000).unwrap();
        assert_eq!(motor.position(), 40);
        assert_eq!(motor.steps, 60);
        assert!(!motor.clockwise);
    }

    #[test]
    fn reverse_polarity_flips_direction() {
        let mut motor = Motor {
            reverse: true,
            ..Motor::default()
        };
        motor.prep_move(0, 10.0, 1e6, 0, 2000).unwrap();
        assert!(!motor.clockwise);
    }

    #[test]
    fn nan_target_is_rejected() {
        let mut motor = Motor::default();
        assert_eq!(
            motor.prep_move(0, f64::NAN, 1e6, 0, 2000),
            Err(MotionError::MoveTargetNan)
        );
        assert_eq!(
            motor.prep_move(0, f64::INFINITY, 1e6, 0, 2000),
            Err(MotionError::MoveTargetInfinite)
        );
    }

    #[test]
    fn power_times_out_to_idle() {
        let mut motor = Motor {
            power_mode: PowerMode::PoweredInCycle,
            ..Motor::default()
        };
        motor.prep_move(0, 10.0, 1e6, 0, 2000).unwrap();
        assert_eq!(motor.power_state(), PowerState::Active);

        motor.update_power(0, 1999);
        assert_eq!(motor.power_state(), PowerState::Active);
        motor.update_power(0, 2000);
        assert_eq!(motor.power_state(), PowerState::Idle);
    }

    #[test]
    fn fault_on_active_motor_alarms() {
        let mut motors = Motors::default();
        motors.get_mut(0).power_mode = PowerMode::AlwaysPowered;
        motors.get_mut(0).update_power(0, 0);

        let fault = MotorFlags {
            stalled: true,
            ..MotorFlags::default()
        };
        assert_eq!(motors.fault(0, fault), Some(MotionError::MotorStalled(0)));
        assert!(motors.get(0).flags.stalled);

        // Idle motors do not alarm
        motors.get_mut(1).deenergize();
        assert_eq!(motors.fault(1, fault), None);
    }
}
