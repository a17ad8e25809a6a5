// Stall calibration cycle: forward ramp to stall, reverse ramp to stall,
// travel measured from the step count between the two.

use ferromill::axis::Axis;
use ferromill::config::{AxisConfig, Config, MotorConfig};
use ferromill::motion::{Cycle, MotionCore, State};
use ferromill::motor::PowerMode;

fn test_config() -> Config {
    let mut config = Config::default();
    config.axes.insert(
        "x".into(),
        AxisConfig {
            velocity_max: 10_000.0,
            jerk_max: 100.0,
            ..AxisConfig::default()
        },
    );
    config.motors.push(MotorConfig {
        axis: 'X',
        microsteps: 32,
        step_angle: 1.8,
        travel_per_rev: 5.0,
        reverse: false,
        power_mode: PowerMode::PoweredInCycle,
    });
    config
}

#[test]
fn calibration_measures_travel_between_stalls() {
    let mut core = MotionCore::new(&test_config());
    core.start_calibration(0).unwrap();
    assert_eq!(core.state.cycle(), Cycle::Calibrating);

    // The mechanism has hard stops 50 mm out in each direction from the
    // start. Stall-guard reads healthy until a stop is hit.
    let mut stalled_forward = false;
    let mut stalled_reverse = false;

    for _ in 0..60_000 {
        core.segment_tick().unwrap();
        let x = core.runtime.axis_position(Axis::X);

        if !stalled_forward {
            core.calibrate_set_stallguard(0, 150);
            if x >= 50.0 {
                core.calibrate_set_stallguard(0, 10); // hard stop
                stalled_forward = true;
            }
        } else if !stalled_reverse {
            core.calibrate_set_stallguard(0, 150);
            if x <= -50.0 {
                core.calibrate_set_stallguard(0, 10);
                stalled_reverse = true;
            }
        }

        if core.state.cycle() == Cycle::Machining {
            break;
        }
    }

    assert_eq!(core.state.cycle(), Cycle::Machining, "calibration never finished");

    // Roughly 100 mm of travel at 1280 steps/mm, give or take the stall
    // detection and deceleration overshoot
    let steps = core.calibration_travel_steps().expect("no travel measured");
    let mm = steps as f64 / 1280.0;
    assert!(mm > 80.0 && mm < 130.0, "implausible travel: {mm} mm");
}

#[test]
fn calibration_requires_idle_machine() {
    let mut core = MotionCore::new(&test_config());
    let mut target = [0.0; ferromill::AXES];
    target[0] = 100.0;
    core.plan_line(
        &target,
        ferromill::motion::MoveFlags {
            rapid: true,
            ..Default::default()
        },
        0.0,
        1.0,
        1,
    )
    .unwrap();
    assert_eq!(core.state.get(), State::Running);

    // Start is refused silently; the cycle does not change
    core.start_calibration(0).unwrap();
    assert_eq!(core.state.cycle(), Cycle::Machining);
}
