// src/kinematics.rs
//
// Cartesian kinematics: per-axis travel times steps-per-unit of the bound
// motor. A pure function so non-Cartesian machines can swap it out without
// touching the planner or the stepper pipeline.
use crate::axis::{AXES, MOTORS};
use crate::motor::Motors;

/// Maps a position vector in mm (machine coordinates) to fractional step
/// counts per motor.
pub fn travel_to_steps(motors: &Motors, travel: &[f64; AXES]) -> [f64; MOTORS] {
    let mut steps = [0.0; MOTORS];
    for (i, step) in steps.iter_mut().enumerate() {
        let motor = motors.get(i);
        *step = travel[motor.axis.index()] * motor.steps_per_unit();
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::Axis;
    use crate::config::MotorConfig;
    use crate::motor::PowerMode;

    fn motors() -> Motors {
        let configs = vec![
            MotorConfig {
                axis: 'X',
                microsteps: 32,
                step_angle: 1.8,
                travel_per_rev: 5.0,
                reverse: false,
                power_mode: PowerMode::PoweredInCycle,
            },
            MotorConfig {
                axis: 'Y',
                microsteps: 16,
                step_angle: 1.8,
                travel_per_rev: 5.0,
                reverse: false,
                power_mode: PowerMode::PoweredInCycle,
            },
        ];
        Motors::from_configs(&configs)
    }

    #[test]
    fn travel_scales_by_steps_per_unit() {
        let motors = motors();
        let mut travel = [0.0; AXES];
        travel[Axis::X.index()] = 2.0;
        travel[Axis::Y.index()] = -1.0;

        let steps = travel_to_steps(&motors, &travel);
        assert!((steps[0] - 2.0 * 1280.0).abs() < 1e-9);
        assert!((steps[1] + 640.0).abs() < 1e-9);
    }
}
