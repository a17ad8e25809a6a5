// src/homing.rs
//
// The homing cycle, driven as a phase machine from the main loop. Axes home
// in the fixed order Z, X, Y, A (B and C never home). Per axis: clear an
// already-closed switch, search for the switch at search velocity, latch
// off it at latch velocity, back off to the zero point and set zero.
//
// Each phase queues at most one move and records the next phase; the
// callback fires again when the machine is READY. A switch closure during
// a search interrupts the move with a hardware feedhold, after which the
// interrupted remainder is flushed and the next phase inspects the switch
// to decide success or abort.
use crate::axis::{AXES, Axis, HomingMode};
use crate::error::MotionError;
use crate::machine::{CoordSystem, DistanceMode, FeedMode, Machine, Units};
use crate::motion::state::{Cycle, State};
use crate::switch::{SwitchId, max_switch, min_switch};

/// Homing axis order; B and C cannot home.
const HOMING_ORDER: [Axis; 4] = [Axis::Z, Axis::X, Axis::Y, Axis::A];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum HomingPhase {
    #[default]
    AxisStart,
    Clear,
    Search,
    Latch,
    ZeroBackoff,
    SetZero,
    Abort,
}

/// Modal G-code state saved while homing rewrites it.
#[derive(Debug, Clone)]
struct SavedModal {
    units: Units,
    coord_system: CoordSystem,
    distance_mode: DistanceMode,
    feed_mode: FeedMode,
    feed_rate: f64,
    absolute_override: bool,
}

#[derive(Debug, Default)]
pub struct Homing {
    requested: [bool; AXES],
    axis: Option<Axis>,
    phase: HomingPhase,

    homing_switch: Option<SwitchId>,
    limit_switch: Option<SwitchId>,

    /// False for the G28.4 variant, which homes without setting zero.
    set_coordinates: bool,

    search_travel: f64,
    search_velocity: f64,
    latch_velocity: f64,
    latch_backoff: f64,
    zero_backoff: f64,

    saved: Option<SavedModal>,
    saved_jerk: f64,
}

impl Machine {
    /// G28.2: start the homing cycle for the flagged axes.
    pub fn homing_cycle_start(&mut self, axes: [bool; AXES]) -> Result<(), MotionError> {
        self.homing_start(axes, true)
    }

    /// G28.4: home but leave coordinates untouched.
    pub fn homing_cycle_start_no_set(&mut self, axes: [bool; AXES]) -> Result<(), MotionError> {
        self.homing_start(axes, false)
    }

    fn homing_start(&mut self, axes: [bool; AXES], set_coordinates: bool) -> Result<(), MotionError> {
        self.homing.saved = Some(SavedModal {
            units: self.gcode.units,
            coord_system: self.gcode.coord_system,
            distance_mode: self.gcode.distance_mode,
            feed_mode: self.gcode.feed_mode,
            feed_rate: self.gcode.feed_rate,
            absolute_override: self.gcode.absolute_override,
        });

        // Working modal state: millimeters, incremental, machine
        // coordinates, units-per-minute feed.
        self.gcode.units = Units::Millimeters;
        self.gcode.distance_mode = DistanceMode::Incremental;
        self.gcode.absolute_override = true;
        self.gcode.feed_mode = FeedMode::UnitsPerMinute;

        self.homing.requested = axes;
        self.homing.set_coordinates = set_coordinates;
        self.homing.axis = None;
        self.homing.phase = HomingPhase::AxisStart;

        self.core.state.set_cycle(Cycle::Homing)
    }

    pub fn is_homing(&self) -> bool {
        self.core.state.cycle() == Cycle::Homing
    }

    pub fn set_not_homed(&mut self) {
        for axis in Axis::ALL {
            self.core.axes.get_mut(axis).homed = false;
        }
    }

    /// Main-loop callback: runs the current homing phase whenever the
    /// machine is idle in the homing cycle.
    pub fn homing_callback(&mut self) {
        if self.core.state.cycle() != Cycle::Homing || self.core.state.get() != State::Ready {
            return;
        }

        if let Err(error) = self.homing_step() {
            tracing::warn!(%error, "homing cycle aborted");
        }
    }

    fn homing_step(&mut self) -> Result<(), MotionError> {
        match self.homing.phase {
            HomingPhase::AxisStart => self.homing_axis_start(),
            HomingPhase::Clear => self.homing_axis_clear(),
            HomingPhase::Search => self.homing_axis_search(),
            HomingPhase::Latch => self.homing_axis_latch(),
            HomingPhase::ZeroBackoff => self.homing_axis_zero_backoff(),
            HomingPhase::SetZero => self.homing_axis_set_zero(),
            HomingPhase::Abort => self.homing_abort(),
        }
    }

    /// Next requested axis after `current` in the fixed Z, X, Y, A order.
    fn next_axis(&self, current: Option<Axis>) -> Result<Option<Axis>, MotionError> {
        let start = match current {
            None => 0,
            Some(axis) => match HOMING_ORDER.iter().position(|&a| a == axis) {
                Some(i) => i + 1,
                None => return Err(MotionError::HomingBadAxis),
            },
        };

        for &axis in &HOMING_ORDER[start..] {
            if self.homing.requested[axis.index()] {
                return Ok(Some(axis));
            }
        }

        if current.is_none() {
            // Nothing requested at all is a G-code calling error
            let any = HOMING_ORDER.iter().any(|&a| self.homing.requested[a.index()]);
            if !any {
                return Err(MotionError::HomingBadAxis);
            }
        }

        Ok(None)
    }

    /// Picks the next axis, validates its configuration and sets up the
    /// per-axis homing parameters.
    fn homing_axis_start(&mut self) -> Result<(), MotionError> {
        let axis = match self.next_axis(self.homing.axis) {
            Ok(Some(axis)) => axis,
            Ok(None) => {
                // All axes done
                self.homing_finalize();
                return Ok(());
            }
            Err(error) => return self.homing_error_exit(error),
        };

        // Clear homed so the moves below bypass soft limits
        self.core.axes.get_mut(axis).homed = false;

        let settings = self.core.axes.get(axis);
        let homing_mode = settings.homing_mode;
        let latch_backoff = settings.latch_backoff;
        let zero_backoff = settings.zero_backoff;
        let travel_span = (settings.travel_max - settings.travel_min).abs();
        let mut search_velocity = settings.search_velocity.abs();
        let latch_velocity = settings.latch_velocity.abs();

        // Stall-guard homing derives its search velocity from the motor
        // geometry instead of the axis config.
        if matches!(homing_mode, HomingMode::StallMin | HomingMode::StallMax) {
            if let Some(motor) = self.core.axes.motor_of(axis) {
                search_velocity = self.core.motors.get(motor).stall_homing_velocity();
            }
        }

        if search_velocity == 0.0 {
            return self.homing_error_exit(MotionError::HomingZeroSearchVelocity);
        }
        if latch_velocity == 0.0 {
            return self.homing_error_exit(MotionError::HomingZeroLatchVelocity);
        }
        if latch_backoff < 0.0 {
            return self.homing_error_exit(MotionError::HomingNegativeLatchBackoff);
        }

        let travel_distance = travel_span + latch_backoff;
        if travel_span == 0.0 {
            return self.homing_error_exit(MotionError::HomingTravelMinMaxIdentical);
        }

        let min_enabled = self.switches.is_enabled(min_switch(axis));
        let max_enabled = self.switches.is_enabled(max_switch(axis));

        if min_enabled {
            // Homing toward the minimum switch: search negative, back off
            // positive.
            self.homing.homing_switch = Some(min_switch(axis));
            self.homing.limit_switch = Some(max_switch(axis));
            self.homing.search_travel = -travel_distance;
            self.homing.latch_backoff = latch_backoff;
            self.homing.zero_backoff = zero_backoff;
        } else if max_enabled {
            self.homing.homing_switch = Some(max_switch(axis));
            self.homing.limit_switch = Some(min_switch(axis));
            self.homing.search_travel = travel_distance;
            self.homing.latch_backoff = -latch_backoff;
            self.homing.zero_backoff = -zero_backoff;
        } else {
            // Homing disabled for this axis: skip to the next one
            self.homing.axis = Some(axis);
            self.homing.phase = HomingPhase::AxisStart;
            return Ok(());
        }

        self.homing.axis = Some(axis);
        self.homing.search_velocity = search_velocity;
        self.homing.latch_velocity = latch_velocity;
        self.homing.saved_jerk = self.core.axes.get(axis).jerk_max();
        self.homing.phase = HomingPhase::Clear;

        tracing::info!(axis = %axis.to_char(), "homing axis");
        Ok(())
    }

    /// Backs off a switch that is already closed at cycle start.
    fn homing_axis_clear(&mut self) -> Result<(), MotionError> {
        let axis = self.homing_axis()?;

        if self.homing.homing_switch.is_some_and(|sw| self.switches.is_active(sw)) {
            let target = self.homing.latch_backoff;
            let velocity = self.homing.search_velocity;
            self.homing_move(axis, target, velocity)?;
        } else if self.homing.limit_switch.is_some_and(|sw| self.switches.is_active(sw)) {
            let target = -self.homing.latch_backoff;
            let velocity = self.homing.search_velocity;
            self.homing_move(axis, target, velocity)?;
        }

        self.homing.phase = HomingPhase::Search;
        Ok(())
    }

    /// Fast drive toward the switch; switch closure ends the move early.
    fn homing_axis_search(&mut self) -> Result<(), MotionError> {
        let axis = self.homing_axis()?;
        let target = self.homing.search_travel;
        let velocity = self.homing.search_velocity;
        self.homing_move(axis, target, velocity)?;
        self.homing.phase = HomingPhase::Latch;
        Ok(())
    }

    /// Slow drive off the switch. If the switch is not closed the search
    /// ran its full travel without finding it, or a user hold interrupted
    /// it; either way the cycle aborts.
    fn homing_axis_latch(&mut self) -> Result<(), MotionError> {
        let axis = self.homing_axis()?;

        let switch_closed = self
            .homing
            .homing_switch
            .is_some_and(|sw| self.switches.is_active(sw));
        if !switch_closed {
            self.homing.phase = HomingPhase::Abort;
            return Ok(());
        }

        let target = self.homing.latch_backoff;
        let velocity = self.homing.latch_velocity;
        self.homing_move(axis, target, velocity)?;
        self.homing.phase = HomingPhase::ZeroBackoff;
        Ok(())
    }

    /// Back off to the zero position.
    fn homing_axis_zero_backoff(&mut self) -> Result<(), MotionError> {
        let axis = self.homing_axis()?;
        let target = self.homing.zero_backoff;
        let velocity = self.homing.search_velocity;
        self.homing_move(axis, target, velocity)?;
        self.homing.phase = HomingPhase::SetZero;
        Ok(())
    }

    /// Sets machine zero (or keeps coordinates for G28.4) and moves on.
    fn homing_axis_set_zero(&mut self) -> Result<(), MotionError> {
        let axis = self.homing_axis()?;

        if self.homing.set_coordinates {
            self.set_axis_position(axis, 0.0);
            self.core.axes.get_mut(axis).homed = true;
        } else {
            let work = self.core.runtime.work_position(axis);
            self.set_axis_position(axis, work);
        }

        let saved_jerk = self.homing.saved_jerk;
        self.core.axes.get_mut(axis).set_jerk_max(saved_jerk);

        self.homing.phase = HomingPhase::AxisStart;
        Ok(())
    }

    fn homing_abort(&mut self) -> Result<(), MotionError> {
        if let Ok(axis) = self.homing_axis() {
            let saved_jerk = self.homing.saved_jerk;
            self.core.axes.get_mut(axis).set_jerk_max(saved_jerk);
        }
        self.homing_error_exit(MotionError::HomingFailed)
    }

    fn homing_axis(&self) -> Result<Axis, MotionError> {
        self.homing.axis.ok_or(MotionError::HomingBadAxis)
    }

    /// Queues one single-axis incremental homing move.
    fn homing_move(&mut self, axis: Axis, target: f64, velocity: f64) -> Result<(), MotionError> {
        self.gcode.feed_rate = velocity;
        self.core.flush_planner();

        let mut values = [None; AXES];
        values[axis.index()] = Some(target);

        if let Err(error) = self.cycle_move(&values, false) {
            return self.homing_error_exit(error);
        }
        Ok(())
    }

    /// Restores saved modal state and returns to the machining cycle.
    fn homing_finalize(&mut self) {
        // Should already be stopped; flush in case of a switch closure
        self.core.flush_planner();

        if let Some(saved) = self.homing.saved.take() {
            self.gcode.units = saved.units;
            self.gcode.coord_system = saved.coord_system;
            self.gcode.distance_mode = saved.distance_mode;
            self.gcode.feed_mode = saved.feed_mode;
            self.gcode.feed_rate = saved.feed_rate;
            self.gcode.absolute_override = saved.absolute_override;
        }

        if let Err(error) = self.core.state.set_cycle(Cycle::Machining) {
            tracing::error!(%error, "could not leave homing cycle");
        }
    }

    fn homing_error_exit(&mut self, error: MotionError) -> Result<(), MotionError> {
        self.homing_finalize();
        Err(error)
    }
}
