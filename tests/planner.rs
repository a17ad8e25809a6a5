// Planner tests: block geometry, junction velocities, the velocity
// envelope, and the ring conservation law.

use ferromill::axis::{AXES, Axis};
use ferromill::config::{AxisConfig, Config, MotorConfig};
use ferromill::motion::{MotionCore, MoveFlags};
use ferromill::motor::PowerMode;

const JERK_MULTIPLIER: f64 = 1e6;
const POOL_SIZE: usize = 32;
const HEADROOM: usize = 4;

fn test_config() -> Config {
    let mut config = Config::default();
    for (name, motor_axis) in [("x", 'X'), ("y", 'Y'), ("z", 'Z')] {
        config.axes.insert(
            name.into(),
            AxisConfig {
                velocity_max: 5000.0,
                jerk_max: 100.0,
                travel_min: 0.0,
                travel_max: 200.0,
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

fn core() -> MotionCore {
    MotionCore::new(&test_config())
}

fn target(x: f64, y: f64, z: f64) -> [f64; AXES] {
    [x, y, z, 0.0, 0.0, 0.0]
}

fn rapid_flags() -> MoveFlags {
    MoveFlags {
        rapid: true,
        ..MoveFlags::default()
    }
}

/// Checks the block invariants P1, P2, P3 and P5 on every queued block.
fn assert_block_invariants(core: &MotionCore) {
    for i in core.queue.iter_idx() {
        let block = core.queue.block(i);

        // P1: unit vector is normalized and the block has length
        let unit_sq: f64 = block.unit.iter().map(|u| u * u).sum();
        assert!((unit_sq - 1.0).abs() < 1e-6, "unit vector not normalized");
        assert!(block.length > 0.0);

        // P2: sections sum to the block length
        let sum = block.head_length + block.body_length + block.tail_length;
        assert!(
            (sum - block.length).abs() < 1e-6,
            "sections {sum} != length {}",
            block.length
        );

        // P3: velocity ordering
        assert!(0.0 <= block.entry_velocity);
        assert!(block.entry_velocity <= block.entry_vmax * (1.0 + 1e-9) + 1e-9);
        assert!(0.0 <= block.exit_velocity);
        assert!(block.exit_velocity <= block.exit_vmax * (1.0 + 1e-9) + 1e-9);
        assert!(block.entry_velocity <= block.cruise_velocity + 1e-9);
        assert!(block.exit_velocity <= block.cruise_velocity + 1e-9);
        assert!(block.cruise_velocity <= block.cruise_vmax * (1.0 + 1e-9) + 1e-9);

        // P5: no axis exceeds its own jerk limit
        for axis in Axis::ALL {
            let axis_jerk = block.unit[axis.index()].abs() * block.jerk;
            let limit = core.axes.get(axis).jerk_max() * JERK_MULTIPLIER;
            if limit > 0.0 {
                assert!(
                    axis_jerk <= limit * (1.0 + 1e-6),
                    "axis {} jerk {axis_jerk} over limit {limit}",
                    axis.to_char()
                );
            }
        }
    }
}

#[test]
fn single_rapid_block() {
    let mut core = core();
    core.plan_line(&target(100.0, 0.0, 0.0), rapid_flags(), 0.0, 1.0, 1)
        .unwrap();

    assert_eq!(core.queue.fill(), 1);
    let block = core.queue.block(core.queue.head_idx().unwrap());

    assert!((block.length - 100.0).abs() < 1e-9);
    assert!((block.unit[0] - 1.0).abs() < 1e-9);
    for axis in 1..AXES {
        assert_eq!(block.unit[axis], 0.0);
    }

    // Rate-limited by the X axis at 5000 mm/min
    assert!((block.cruise_vmax - 5000.0).abs() < 1e-6);
    // First block: no prior junction to limit entry
    assert!((block.entry_vmax - 5000.0).abs() < 1e-6);
    assert!((block.exit_vmax - 5000.0).abs() < 1e-6);

    assert_block_invariants(&core);
}

#[test]
fn l_turn_limits_junction() {
    let mut core = core();
    core.plan_line(&target(100.0, 0.0, 0.0), rapid_flags(), 0.0, 1.0, 1)
        .unwrap();
    core.plan_line(&target(100.0, 100.0, 0.0), MoveFlags::default(), 1000.0, 1.0, 2)
        .unwrap();

    // Expected junction velocity for a 90 degree corner
    let deviation = core.settings.junction_deviation;
    let acceleration = core.settings.junction_acceleration;
    let s = 0.5f64.sqrt(); // sin(45 deg)
    let junction = (deviation * s / (1.0 - s) * acceleration).sqrt();

    let head = core.queue.head_idx().unwrap();
    let second = core.queue.next_idx(head);

    let b2 = core.queue.block(second);
    assert!((b2.entry_vmax - junction.min(b2.cruise_vmax)).abs() < 1e-6);

    // P4: the first block's exit was replanned down to the junction limit
    let b1 = core.queue.block(head);
    assert!(b1.exit_velocity <= junction * (1.0 + 1e-6));

    assert_block_invariants(&core);
}

#[test]
fn straight_continuation_joins_blocks() {
    let mut core = core();
    core.plan_line(&target(100.0, 0.0, 0.0), MoveFlags::default(), 1000.0, 1.0, 1)
        .unwrap();
    core.plan_line(&target(200.0, 0.0, 0.0), MoveFlags::default(), 1000.0, 1.0, 2)
        .unwrap();

    let head = core.queue.head_idx().unwrap();
    let second = core.queue.next_idx(head);
    let b1 = core.queue.block(head);
    let b2 = core.queue.block(second);

    // Straight line: no junction limiting, blocks join at full feed
    let joined = b1.cruise_vmax.min(b2.cruise_vmax);
    assert!((b1.exit_velocity - joined).abs() < 1e-6);
    assert!((b2.entry_velocity - joined).abs() < 1e-6);

    assert_block_invariants(&core);
}

#[test]
fn reversal_plans_to_zero_junction() {
    let mut core = core();
    core.plan_line(&target(100.0, 0.0, 0.0), MoveFlags::default(), 1000.0, 1.0, 1)
        .unwrap();
    core.plan_line(&target(0.0, 0.0, 0.0), MoveFlags::default(), 1000.0, 1.0, 2)
        .unwrap();

    let head = core.queue.head_idx().unwrap();
    let second = core.queue.next_idx(head);
    assert_eq!(core.queue.block(second).entry_vmax, 0.0);
    assert!(core.queue.block(head).exit_velocity.abs() < 1e-9);

    assert_block_invariants(&core);
}

#[test]
fn zero_length_move_is_dropped() {
    let mut core = core();
    core.plan_line(&target(10.0, 0.0, 0.0), rapid_flags(), 0.0, 1.0, 1)
        .unwrap();
    core.plan_line(&target(10.0, 0.0, 0.0), rapid_flags(), 0.0, 1.0, 2)
        .unwrap();
    assert_eq!(core.queue.fill(), 1);
}

#[test]
fn nan_and_infinite_targets_rejected() {
    use ferromill::MotionError;

    let mut core = core();
    assert_eq!(
        core.plan_line(&target(f64::NAN, 0.0, 0.0), rapid_flags(), 0.0, 1.0, 1),
        Err(MotionError::MoveTargetNan)
    );
    assert_eq!(
        core.plan_line(&target(f64::INFINITY, 0.0, 0.0), rapid_flags(), 0.0, 1.0, 1),
        Err(MotionError::MoveTargetInfinite)
    );
    assert!(core.queue.is_empty());
}

#[test]
fn exact_stop_zeroes_entry_and_exit() {
    let mut core = core();
    core.plan_line(&target(50.0, 0.0, 0.0), MoveFlags::default(), 1000.0, 1.0, 1)
        .unwrap();
    core.plan_line(
        &target(100.0, 0.0, 0.0),
        MoveFlags {
            exact_stop: true,
            ..MoveFlags::default()
        },
        1000.0,
        1.0,
        2,
    )
    .unwrap();

    let head = core.queue.head_idx().unwrap();
    let second = core.queue.next_idx(head);
    let b2 = core.queue.block(second);
    assert_eq!(b2.entry_vmax, 0.0);
    assert_eq!(b2.exit_vmax, 0.0);
    assert!(!b2.replannable);

    // The previous block must decelerate to the exact stop
    assert!(core.queue.block(head).exit_velocity.abs() < 1e-9);
}

#[test]
fn feed_override_scales_cruise() {
    let mut core = core();
    core.plan_line(&target(100.0, 0.0, 0.0), MoveFlags::default(), 1000.0, 2.0, 1)
        .unwrap();
    let block = core.queue.block(core.queue.head_idx().unwrap());
    // Override doubles the feed, still under the 5000 velocity limit
    assert!((block.cruise_vmax - 2000.0).abs() < 1e-6);
}

#[test]
fn ring_conservation_under_load() {
    let mut core = core();
    for i in 0..(POOL_SIZE - HEADROOM) {
        assert!(core.queue.room() > 0, "room exhausted early");
        core.plan_line(
            &target((i + 1) as f64, 0.0, 0.0),
            MoveFlags::default(),
            1000.0,
            1.0,
            i as i64,
        )
        .unwrap();

        // P7: fill + room + HEADROOM is conserved
        assert_eq!(core.queue.fill() + core.queue.room() + HEADROOM, POOL_SIZE);
    }
    assert_eq!(core.queue.room(), 0);
    assert_block_invariants(&core);
}

#[test]
fn random_path_invariants_hold() {
    use rand::Rng;

    let mut rng = rand::rng();
    let mut core = core();

    let mut x = 0.0;
    let mut y = 0.0;
    for i in 0..20 {
        x += rng.random_range(-40.0..40.0);
        y += rng.random_range(-40.0..40.0);
        let feed = rng.random_range(100.0..6000.0);
        core.plan_line(&target(x, y, 0.0), MoveFlags::default(), feed, 1.0, i)
            .unwrap();
        assert_block_invariants(&core);
    }

    // P4 across all junctions: entry of each block respects its ceiling,
    // and never exceeds what the previous block delivers. (A degraded fit
    // may lower an entry below the previous exit; it can never raise it.)
    let indices: Vec<usize> = core.queue.iter_idx().collect();
    for pair in indices.windows(2) {
        let prev = core.queue.block(pair[0]);
        let next = core.queue.block(pair[1]);
        assert!(next.entry_velocity <= next.entry_vmax * (1.0 + 1e-9) + 1e-9);
        assert!(next.entry_velocity <= prev.exit_velocity + 1e-6);
    }
}
