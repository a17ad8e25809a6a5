// Jog cycle: velocity ramps, brake-then-reverse, dead-band, and cycle exit.

use ferromill::axis::{AXES, Axis};
use ferromill::config::{AxisConfig, Config, MotorConfig};
use ferromill::machine::Machine;
use ferromill::motion::{Cycle, State};
use ferromill::motor::PowerMode;

fn test_config() -> Config {
    let mut config = Config::default();
    for (name, motor_axis) in [("x", 'X'), ("y", 'Y')] {
        config.axes.insert(
            name.into(),
            AxisConfig {
                velocity_max: 3000.0,
                jerk_max: 100.0,
                ..AxisConfig::default()
            },
        );
        config.motors.push(MotorConfig {
            axis: motor_axis,
            microsteps: 32,
            step_angle: 1.8,
            travel_per_rev: 5.0,
            reverse: false,
            power_mode: PowerMode::PoweredInCycle,
        });
    }
    config
}

fn jog_command(x: f64, y: f64) -> [f64; AXES] {
    let mut velocities = [0.0; AXES];
    velocities[Axis::X.index()] = x;
    velocities[Axis::Y.index()] = y;
    velocities
}

fn tick(machine: &mut Machine, n: usize) {
    for _ in 0..n {
        machine.core.segment_tick().unwrap();
        machine.main_loop();
    }
}

#[test]
fn jog_enters_cycle_and_ramps_up() {
    let mut machine = Machine::new(&test_config());

    machine.core.jog(jog_command(0.5, 0.0)).unwrap();
    assert_eq!(machine.core.state.cycle(), Cycle::Jogging);

    // Past the stream-start delay, the axis ramps toward 1500 mm/min
    tick(&mut machine, 400);
    let x = machine.core.runtime.axis_position(Axis::X);
    assert!(x > 0.0, "jog did not move: {x}");
    let velocity = machine.core.runtime.velocity();
    assert!(velocity > 0.0);
    assert!(velocity <= 1500.0 * 1.01);
}

#[test]
fn jog_exits_cycle_when_stopped() {
    let mut machine = Machine::new(&test_config());

    machine.core.jog(jog_command(0.5, 0.0)).unwrap();
    tick(&mut machine, 400);

    // Command all axes to zero; the ramp winds down and the cycle exits
    machine.core.jog(jog_command(0.0, 0.0)).unwrap();
    tick(&mut machine, 2000);

    assert_eq!(machine.core.state.cycle(), Cycle::Machining);
    assert_eq!(machine.core.runtime.velocity(), 0.0);

    // Machine position was synced to where the jog ended
    let planner_x = machine.core.axis_position(Axis::X);
    let runtime_x = machine.core.runtime.axis_position(Axis::X);
    assert!((planner_x - runtime_x).abs() < 1e-9);
    assert!(runtime_x > 0.0);
}

#[test]
fn jog_brakes_before_reversing() {
    let mut machine = Machine::new(&test_config());

    machine.core.jog(jog_command(0.8, 0.0)).unwrap();
    tick(&mut machine, 600);
    let peak = machine.core.runtime.axis_position(Axis::X);
    assert!(peak > 0.0);

    // Reverse: the axis must pass through zero velocity first, so position
    // keeps growing briefly before coming back
    machine.core.jog(jog_command(-0.8, 0.0)).unwrap();
    tick(&mut machine, 3000);
    let x = machine.core.runtime.axis_position(Axis::X);
    assert!(x < peak, "never reversed: {x} vs peak {peak}");
}

#[test]
fn tiny_jog_velocity_is_dead_band() {
    let mut machine = Machine::new(&test_config());

    // 0.001 of 3000 mm/min is under the jog dead-band
    machine.core.jog(jog_command(0.001, 0.0)).unwrap();
    tick(&mut machine, 500);

    assert_eq!(machine.core.state.cycle(), Cycle::Machining);
    assert!(machine.core.runtime.axis_position(Axis::X).abs() < 1e-9);
}

#[test]
fn jog_rejected_while_running_gcode() {
    let mut machine = Machine::new(&test_config());
    machine.set_feed_rate(1000.0);
    let mut values = [None; AXES];
    values[Axis::X.index()] = Some(50.0);
    machine.feed(&values).unwrap();
    assert_eq!(machine.core.state.get(), State::Running);

    // Jog during a G-code stream is a no-op
    machine.core.jog(jog_command(0.5, 0.0)).unwrap();
    assert_eq!(machine.core.state.cycle(), Cycle::Machining);
}

#[test]
fn two_axis_jog_moves_both() {
    let mut machine = Machine::new(&test_config());
    machine.core.jog(jog_command(0.5, -0.5)).unwrap();
    tick(&mut machine, 600);

    assert!(machine.core.runtime.axis_position(Axis::X) > 0.0);
    assert!(machine.core.runtime.axis_position(Axis::Y) < 0.0);
}
