// Benchmark for line planning and look-ahead replanning throughput.
// Run with: cargo bench

use criterion::{Criterion, criterion_group, criterion_main};

use ferromill::axis::AXES;
use ferromill::config::{AxisConfig, Config, MotorConfig};
use ferromill::motion::{MotionCore, MoveFlags};
use ferromill::motor::PowerMode;

fn bench_config() -> Config {
    let mut config = Config::default();
    for (name, motor_axis) in [("x", 'X'), ("y", 'Y'), ("z", 'Z')] {
        config.axes.insert(
            name.into(),
            AxisConfig {
                velocity_max: 5000.0,
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

/// A zig-zag toolpath that keeps every junction active in the look-ahead.
fn toolpath(moves: usize) -> Vec<[f64; AXES]> {
    (0..moves)
        .map(|i| {
            let x = (i + 1) as f64 * 2.0;
            let y = if i % 2 == 0 { 1.5 } else { -1.5 };
            [x, y, 0.0, 0.0, 0.0, 0.0]
        })
        .collect()
}

fn bench_plan_line(c: &mut Criterion) {
    let config = bench_config();
    let path = toolpath(24);

    c.bench_function("plan 24-move zig-zag with look-ahead", |b| {
        b.iter_batched(
            || MotionCore::new(&config),
            |mut core| {
                for (i, target) in path.iter().enumerate() {
                    core.plan_line(target, MoveFlags::default(), 3000.0, 1.0, i as i64)
                        .unwrap();
                }
                core
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_execute_stream(c: &mut Criterion) {
    let config = bench_config();
    let path = toolpath(8);

    c.bench_function("execute 8-move stream to completion", |b| {
        b.iter_batched(
            || {
                let mut core = MotionCore::new(&config);
                for (i, target) in path.iter().enumerate() {
                    core.plan_line(target, MoveFlags::default(), 3000.0, 1.0, i as i64)
                        .unwrap();
                }
                core
            },
            |mut core| {
                for _ in 0..100_000 {
                    core.segment_tick().unwrap();
                    if core.queue.is_empty() && !core.stepper.is_busy() {
                        break;
                    }
                }
                core
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_plan_line, bench_execute_stream);
criterion_main!(benches);
