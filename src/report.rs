// src/report.rs
//
// Machine state snapshots for the console and the host UI. Reports are
// serialized as single-line JSON and emitted only when something changed,
// the moral equivalent of the firmware's variable reports.
use serde::Serialize;

use crate::axis::{AXES, Axis, MOTORS};
use crate::machine::Machine;
use crate::motion::state::{Cycle, HoldReason, State};
use crate::motor::{MotorFlags, PowerState};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusReport {
    pub state: State,
    pub cycle: Cycle,
    pub hold_reason: HoldReason,
    pub line: i64,
    pub tool: u8,
    pub velocity: f64,
    pub position: [f64; AXES],
    pub work_position: [f64; AXES],
    pub homed: [bool; AXES],
    pub motor_power: [PowerState; MOTORS],
    pub motor_flags: [MotorFlags; MOTORS],
}

impl StatusReport {
    pub fn snapshot(machine: &Machine) -> Self {
        let core = &machine.core;

        let mut position = [0.0; AXES];
        let mut work_position = [0.0; AXES];
        let mut homed = [false; AXES];
        for axis in Axis::ALL {
            position[axis.index()] = core.runtime.axis_position(axis);
            work_position[axis.index()] = machine.work_position(axis);
            homed[axis.index()] = core.axes.get(axis).homed;
        }

        let mut motor_power = [PowerState::Off; MOTORS];
        let mut motor_flags = [MotorFlags::default(); MOTORS];
        for motor in 0..MOTORS {
            motor_power[motor] = core.motors.get(motor).power_state();
            motor_flags[motor] = core.motors.get(motor).flags;
        }

        Self {
            state: core.state.get(),
            cycle: core.state.cycle(),
            hold_reason: core.state.hold_reason(),
            line: core.runtime.line(),
            tool: core.runtime.tool(),
            velocity: core.runtime.velocity(),
            position,
            work_position,
            homed,
            motor_power,
            motor_flags,
        }
    }
}

/// Emits JSON reports on change.
#[derive(Debug, Default)]
pub struct Reporter {
    last: Option<StatusReport>,
}

impl Reporter {
    /// Returns the serialized report if it differs from the last one.
    pub fn update(&mut self, machine: &Machine) -> Option<String> {
        let report = StatusReport::snapshot(machine);
        if self.last.as_ref() == Some(&report) {
            return None;
        }

        let json = serde_json::to_string(&report).ok()?;
        self.last = Some(report);
        Some(json)
    }
}
