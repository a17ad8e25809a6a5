// src/machine.rs
//
// The machine layer wraps the motion core with RS274NGC semantics: modal
// state (units, planes, distance and feed modes, coordinate systems and
// offsets), target calculation, soft limits, and the entry points the
// G-code parser calls. The parser itself is an external collaborator.
use crate::axis::{AXES, Axis, MOTORS};
use crate::error::MotionError;
use crate::homing::Homing;
use crate::motion::state::{Cycle, HoldReason, State};
use crate::motion::{MotionCore, MoveFlags};
use crate::motor::MotorFlags;
use crate::switch::{SwitchId, Switches, max_switch, min_switch};

pub const MM_PER_INCH: f64 = 25.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    Inches,      // G20
    Millimeters, // G21
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    Xy, // G17
    Xz, // G18
    Yz, // G19
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMode {
    Absolute,    // G90
    Incremental, // G91
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    UnitsPerMinute, // G94
    InverseTime,    // G93
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    ExactPath,  // G61
    ExactStop,  // G61.1
    Continuous, // G64
}

/// Work coordinate systems. `Absolute` is raw machine coordinates (G53).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordSystem {
    Absolute,
    G54,
    G55,
    G56,
    G57,
    G58,
    G59,
}

impl CoordSystem {
    fn offset_index(self) -> Option<usize> {
        match self {
            CoordSystem::Absolute => None,
            CoordSystem::G54 => Some(0),
            CoordSystem::G55 => Some(1),
            CoordSystem::G56 => Some(2),
            CoordSystem::G57 => Some(3),
            CoordSystem::G58 => Some(4),
            CoordSystem::G59 => Some(5),
        }
    }
}

/// Canonical modal G-code state, unit-normalized to mm and machine
/// coordinates.
#[derive(Debug, Clone)]
pub struct GcodeState {
    pub units: Units,
    pub plane: Plane,
    pub distance_mode: DistanceMode,
    pub arc_distance_mode: DistanceMode,
    pub feed_mode: FeedMode,
    pub path_mode: PathMode,
    /// mm/min, or minutes when in inverse-time mode.
    pub feed_rate: f64,
    pub feed_override: f64,
    pub spindle_override: f64,
    pub coord_system: CoordSystem,
    coord_offsets: [[f64; AXES]; 6],
    origin_offsets: [f64; AXES], // G92
    origin_enabled: bool,
    /// G53: take targets in raw machine coordinates.
    pub absolute_override: bool,
    pub tool: u8,
}

impl Default for GcodeState {
    fn default() -> Self {
        Self {
            units: Units::Millimeters,
            plane: Plane::Xy,
            distance_mode: DistanceMode::Absolute,
            arc_distance_mode: DistanceMode::Incremental,
            feed_mode: FeedMode::UnitsPerMinute,
            path_mode: PathMode::Continuous,
            feed_rate: 0.0,
            feed_override: 1.0,
            spindle_override: 1.0,
            coord_system: CoordSystem::G54,
            coord_offsets: [[0.0; AXES]; 6],
            origin_offsets: [0.0; AXES],
            origin_enabled: false,
            absolute_override: false,
            tool: 0,
        }
    }
}

pub struct Machine {
    pub core: MotionCore,
    pub gcode: GcodeState,
    pub switches: Switches,
    pub(crate) homing: Homing,
    line: i64,
}

impl Machine {
    pub fn new(config: &crate::config::Config) -> Self {
        let core = MotionCore::new(config);
        let mut switches = Switches::default();

        // Wire homing/limit switch slots from the axis homing modes
        for axis in Axis::ALL {
            use crate::axis::HomingMode::*;
            match core.axes.get(axis).homing_mode {
                SwitchMin | StallMin => switches.set_enabled(min_switch(axis), true),
                SwitchMax | StallMax => switches.set_enabled(max_switch(axis), true),
                Disabled => {}
            }
        }

        let mut machine = Self {
            core,
            gcode: GcodeState::default(),
            switches,
            homing: Homing::default(),
            line: 0,
        };

        // The planner boots flushing; release it so the machine is usable.
        machine.core.request_resume();
        machine.core.state_callback();
        machine
    }

    pub fn set_line(&mut self, line: i64) {
        self.line = line;
    }

    fn to_mm(&self, value: f64) -> f64 {
        match self.gcode.units {
            Units::Inches => value * MM_PER_INCH,
            Units::Millimeters => value,
        }
    }

    // --- Representation (4.3.3) ---

    pub fn set_plane(&mut self, plane: Plane) {
        self.gcode.plane = plane;
    }

    pub fn set_units(&mut self, units: Units) {
        self.gcode.units = units;
    }

    pub fn set_distance_mode(&mut self, mode: DistanceMode) {
        self.gcode.distance_mode = mode;
    }

    pub fn set_arc_distance_mode(&mut self, mode: DistanceMode) {
        self.gcode.arc_distance_mode = mode;
    }

    pub fn set_path_mode(&mut self, mode: PathMode) {
        self.gcode.path_mode = mode;
    }

    pub fn set_feed_mode(&mut self, mode: FeedMode) {
        self.gcode.feed_mode = mode;
    }

    pub fn set_feed_rate(&mut self, feed_rate: f64) {
        // In inverse-time mode the F word is minutes, not a rate
        self.gcode.feed_rate = match self.gcode.feed_mode {
            FeedMode::UnitsPerMinute => self.to_mm(feed_rate),
            FeedMode::InverseTime => feed_rate,
        };
    }

    pub fn set_feed_override(&mut self, value: f64) {
        if value > 0.0 {
            self.gcode.feed_override = value;
        }
    }

    pub fn set_spindle_override(&mut self, value: f64) {
        if value > 0.0 {
            self.gcode.spindle_override = value;
        }
    }

    pub fn set_coord_system(&mut self, coord_system: CoordSystem) {
        self.gcode.coord_system = coord_system;
    }

    /// G10 L2: set a coordinate system's offsets for the flagged axes.
    pub fn set_coord_offsets(
        &mut self,
        coord_system: CoordSystem,
        offsets: &[Option<f64>; AXES],
    ) {
        let Some(index) = coord_system.offset_index() else {
            return;
        };
        for axis in 0..AXES {
            if let Some(value) = offsets[axis] {
                self.gcode.coord_offsets[index][axis] = self.to_mm(value);
            }
        }
    }

    pub fn select_tool(&mut self, tool: u8) {
        self.gcode.tool = tool;
        self.core.runtime.set_tool(tool);
    }

    /// The offset from machine to work coordinates for one axis.
    pub fn active_coord_offset(&self, axis: Axis) -> f64 {
        if self.gcode.absolute_override {
            return 0.0;
        }

        let mut offset = match self.gcode.coord_system.offset_index() {
            Some(index) => self.gcode.coord_offsets[index][axis.index()],
            None => 0.0,
        };
        if self.gcode.origin_enabled {
            offset += self.gcode.origin_offsets[axis.index()];
        }
        offset
    }

    fn work_offsets(&self) -> [f64; AXES] {
        let mut offsets = [0.0; AXES];
        for axis in Axis::ALL {
            offsets[axis.index()] = self.active_coord_offset(axis);
        }
        offsets
    }

    pub fn work_position(&self, axis: Axis) -> f64 {
        self.core.axis_position(axis) - self.active_coord_offset(axis)
    }

    // --- Targets and limits ---

    /// Converts parser axis words into a machine-coordinate target,
    /// applying units, distance mode and the active offsets.
    pub fn calc_target(&self, values: &[Option<f64>; AXES]) -> [f64; AXES] {
        let mut target = *self.core.get_position();

        for axis in Axis::ALL {
            let Some(value) = values[axis.index()] else {
                continue;
            };
            let value = if axis.is_rotary() { value } else { self.to_mm(value) };

            target[axis.index()] = match self.gcode.distance_mode {
                DistanceMode::Absolute => value + self.active_coord_offset(axis),
                DistanceMode::Incremental => self.core.axis_position(axis) + value,
            };
        }

        target
    }

    /// Soft limits apply only to homed axes with a configured travel range.
    pub fn test_soft_limits(&self, target: &[f64; AXES]) -> Result<(), MotionError> {
        for axis in Axis::ALL {
            let settings = self.core.axes.get(axis);
            if !settings.homed || settings.travel_min >= settings.travel_max {
                continue;
            }

            let position = target[axis.index()];
            if position < settings.travel_min || settings.travel_max < position {
                return Err(MotionError::SoftLimit(axis.to_char()));
            }
        }
        Ok(())
    }

    // --- Motion (4.3.4, 4.3.6) ---

    pub fn rapid(&mut self, values: &[Option<f64>; AXES]) -> Result<(), MotionError> {
        self.plan_move(values, true)
    }

    pub fn feed(&mut self, values: &[Option<f64>; AXES]) -> Result<(), MotionError> {
        self.plan_move(values, false)
    }

    fn plan_move(&mut self, values: &[Option<f64>; AXES], rapid: bool) -> Result<(), MotionError> {
        // Parser-facing motion may not interleave with homing, jogging,
        // probing or calibration; those cycles own the queue. Their own
        // moves come in through cycle_move below.
        if self.core.state.cycle() != Cycle::Machining {
            return Err(MotionError::Internal);
        }
        self.cycle_move(values, rapid)
    }

    /// Plans a move on behalf of the active cycle, bypassing the cycle
    /// gate. Homing uses this for its search and backoff moves.
    pub(crate) fn cycle_move(
        &mut self,
        values: &[Option<f64>; AXES],
        rapid: bool,
    ) -> Result<(), MotionError> {
        if self.core.state.get() == State::EStopped {
            return Err(MotionError::EStopped);
        }

        let target = self.calc_target(values);
        self.test_soft_limits(&target)?;

        let flags = MoveFlags {
            rapid,
            inverse_time: !rapid && self.gcode.feed_mode == FeedMode::InverseTime,
            exact_stop: self.gcode.path_mode == PathMode::ExactStop,
        };

        self.core.runtime.set_work_offsets(self.work_offsets());
        self.core.plan_line(
            &target,
            flags,
            self.gcode.feed_rate,
            self.gcode.feed_override,
            self.line,
        )
    }

    /// G4: dwell for `seconds`.
    pub fn dwell(&mut self, seconds: f64) -> Result<(), MotionError> {
        if self.core.state.get() == State::EStopped {
            return Err(MotionError::EStopped);
        }
        self.core.plan_dwell(seconds)
    }

    // --- Position setting (G28.3, G92) ---

    /// Forces an axis position in machine coordinates without motion.
    pub fn set_axis_position(&mut self, axis: Axis, position: f64) {
        let position = if axis.is_rotary() { position } else { self.to_mm(position) };
        self.core.set_axis_position(axis, position);
    }

    /// G92: offset the work coordinate system so the current point reads
    /// zero on the given axis.
    pub fn zero_axis(&mut self, axis: Axis) {
        let index = axis.index();
        let base = match self.gcode.coord_system.offset_index() {
            Some(i) => self.gcode.coord_offsets[i][index],
            None => 0.0,
        };
        self.gcode.origin_offsets[index] = self.core.axis_position(axis) - base;
        self.gcode.origin_enabled = true;
    }

    pub fn zero_all(&mut self) {
        for axis in Axis::ALL {
            self.zero_axis(axis);
        }
    }

    pub fn reset_origin_offsets(&mut self) {
        self.gcode.origin_offsets = [0.0; AXES];
        self.gcode.origin_enabled = false;
    }

    pub fn suspend_origin_offsets(&mut self) {
        self.gcode.origin_enabled = false;
    }

    pub fn resume_origin_offsets(&mut self) {
        self.gcode.origin_enabled = true;
    }

    /// Re-syncs the model position to the runtime after a flush or an
    /// externally-stopped cycle.
    pub fn set_position_from_runtime(&mut self) {
        self.core.set_position(*self.core.runtime.position());
    }

    // --- Program flow (4.3.10) ---

    pub fn program_stop(&mut self) {
        self.core.state.request_hold_with(HoldReason::ProgramPause);
    }

    /// M1: pauses only when the operator armed the optional-pause flag.
    pub fn optional_program_stop(&mut self) {
        self.core.optional_pause();
    }

    pub fn pallet_change_stop(&mut self) {
        self.core.state.request_hold_with(HoldReason::PalletChange);
    }

    pub fn program_end(&mut self) {
        self.core.state.request_hold_with(HoldReason::ProgramEnd);
    }

    // --- Switches ---

    /// Hardware switch edge. Closing the e-stop input is an immediate stop;
    /// any other enabled switch during motion triggers a feedhold. During
    /// homing the interrupted move is also flushed and the cycle resumed so
    /// the next homing phase can run.
    pub fn on_switch(&mut self, id: SwitchId, active: bool) {
        if !self.switches.set_active(id, active) {
            return;
        }

        if id == SwitchId::EStop {
            tracing::warn!("e-stop switch closed");
            self.core.estop();
            return;
        }

        match self.core.state.get() {
            State::Running | State::Stopping => {
                tracing::info!(?id, "switch closed during motion, feedhold");
                self.core.request_hold();

                if self.core.state.cycle() == Cycle::Homing {
                    self.core.request_flush();
                    self.core.request_resume();
                }
            }
            _ => {}
        }
    }

    // --- Motor driver callbacks ---

    /// Driver-reported motor fault. Faults latch on the motor; a fault
    /// while the motor is active raises an alarm and trips the e-stop
    /// path. Stalls are expected during calibration and are not faults
    /// there.
    pub fn on_motor_fault(&mut self, motor: usize, mut errors: MotorFlags) {
        if motor >= MOTORS {
            return;
        }

        if self.core.state.cycle() == Cycle::Calibrating {
            errors.stalled = false;
        }

        if let Some(alarm) = self.core.motors.fault(motor, errors) {
            self.core.alarm(alarm);
        }
    }

    /// Clears latched fault flags for one motor, or for all of them.
    pub fn motor_reset(&mut self, motor: Option<usize>) {
        match motor {
            Some(motor) if motor < MOTORS => self.core.motors.get_mut(motor).reset_flags(),
            Some(_) => {}
            None => {
                for motor in 0..MOTORS {
                    self.core.motors.get_mut(motor).reset_flags();
                }
            }
        }
    }

    /// Main-loop service: state reconciliation plus the active cycle's
    /// callback.
    pub fn main_loop(&mut self) {
        self.core.state_callback();
        self.homing_callback();
    }
}
