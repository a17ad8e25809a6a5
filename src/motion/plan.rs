// src/motion/plan.rs
//
// Constant-jerk planning math and the look-ahead passes over the block ring.
//
// The distance covered by a jerk-limited ramp between velocities V1 and V2 is
//
//   L = (V1 + V2) * sqrt(|V2 - V1| / J)
//
// target_velocity() inverts that relation for V2 given V1, L and J. The
// closed form exists only for V1 = 0; the general case converges with a few
// Newton-Raphson steps.
use crate::motion::buffer::{Block, PlannerQueue};
use crate::motion::{MIN_SEGMENT_TIME, NOM_SEGMENT_TIME};

/// Convergence bound for the trapezoid fit iteration, as a percentage.
pub const TRAPEZOID_ITERATION_ERROR_PERCENT: f64 = 0.1;
const TRAPEZOID_ITERATION_MAX: usize = 10;
const TRAPEZOID_LENGTH_FIT_TOLERANCE: f64 = 1e-4;

/// Distance needed to ramp between `vi` and `vf` under constant jerk.
pub fn target_length(vi: f64, vf: f64, jerk: f64) -> f64 {
    (vi + vf) * ((vf - vi).abs() / jerk).sqrt()
}

/// Velocity reachable from `vi` over `length` under constant jerk.
///
/// `cbrt_jerk` must be the cached cube root of `jerk`.
pub fn target_velocity(vi: f64, length: f64, jerk: f64, cbrt_jerk: f64) -> f64 {
    if length <= 0.0 {
        return vi;
    }
    if vi == 0.0 {
        // L = Vf * sqrt(Vf / J)  =>  Vf = (J * L^2)^(1/3)
        return cbrt_jerk * length.powf(2.0 / 3.0);
    }

    // Newton-Raphson on f(Vf) = (Vi + Vf) * sqrt((Vf - Vi) / J) - L.
    // Vi + (J L^2)^(1/3) bounds the root from above.
    let mut vf = vi + cbrt_jerk * length.powf(2.0 / 3.0);

    for _ in 0..TRAPEZOID_ITERATION_MAX {
        let dv = vf - vi;
        if dv <= 0.0 {
            break;
        }

        let sqrt_term = (dv / jerk).sqrt();
        let f = (vi + vf) * sqrt_term - length;
        let df = sqrt_term + (vi + vf) / (2.0 * (jerk * dv).sqrt());
        let step = f / df;

        vf -= step;
        if vf <= vi {
            vf = vi + dv / 2.0; // fell out of the bracket, bisect instead
            continue;
        }

        if (step / vf).abs() < TRAPEZOID_ITERATION_ERROR_PERCENT / 100.0 {
            break;
        }
    }

    vf.max(vi)
}

fn velocity_tolerance(entry: f64) -> f64 {
    (entry / 100.0).max(2.0)
}

/// Splits a block's length into head (accel), body (cruise) and tail (decel)
/// given its entry, cruise and exit velocities.
///
/// Degenerate shapes are legion: head-only, tail-only, body-only, and
/// rate-limited cases where the requested cruise velocity cannot be reached
/// within the block. Sub-minimum sections are folded into their neighbors,
/// trading a small velocity error for exact distance.
pub fn calculate_trapezoid(bf: &mut Block) {
    bf.head_length = 0.0;
    bf.body_length = 0.0;
    bf.tail_length = 0.0;

    // Block fits in a single segment: run it as a single body segment at
    // the faster boundary velocity. The distance stays exact; the tiny
    // timing error is absorbed by the next block's waypoint snap.
    let boundary_sum = bf.entry_velocity + bf.exit_velocity;
    if boundary_sum > 0.0 && 2.0 * bf.length / boundary_sum <= NOM_SEGMENT_TIME {
        bf.body_length = bf.length;
        bf.cruise_velocity = bf.entry_velocity.max(bf.exit_velocity);
        return;
    }

    // All velocities close enough: pure cruise.
    let tolerance = velocity_tolerance(bf.entry_velocity);
    if bf.cruise_velocity - bf.entry_velocity < tolerance
        && bf.cruise_velocity - bf.exit_velocity < tolerance
    {
        bf.body_length = bf.length;
        return;
    }

    // Head-only and tail-only cases, including degraded fits where the
    // block is too short to bridge entry and exit.
    let minimum_length = target_length(bf.entry_velocity, bf.exit_velocity, bf.jerk);
    if bf.length <= minimum_length + min_body_length(bf) {
        if bf.entry_velocity > bf.exit_velocity {
            if bf.length < minimum_length - TRAPEZOID_LENGTH_FIT_TOLERANCE {
                bf.entry_velocity =
                    target_velocity(bf.exit_velocity, bf.length, bf.jerk, bf.cbrt_jerk);
            }
            bf.cruise_velocity = bf.entry_velocity;
            bf.tail_length = bf.length;
            return;
        }

        if bf.entry_velocity < bf.exit_velocity {
            if bf.length < minimum_length - TRAPEZOID_LENGTH_FIT_TOLERANCE {
                bf.exit_velocity =
                    target_velocity(bf.entry_velocity, bf.length, bf.jerk, bf.cbrt_jerk);
            }
            bf.cruise_velocity = bf.exit_velocity;
            bf.head_length = bf.length;
            return;
        }
    }

    // Requested-fit head and tail
    bf.head_length = target_length(bf.entry_velocity, bf.cruise_velocity, bf.jerk);
    bf.tail_length = target_length(bf.exit_velocity, bf.cruise_velocity, bf.jerk);
    if bf.head_length < min_head_length(bf) {
        bf.head_length = 0.0;
    }
    if bf.tail_length < min_tail_length(bf) {
        bf.tail_length = 0.0;
    }

    // Rate-limited: the full ramps do not fit, so lower cruise until they do.
    if bf.length < bf.head_length + bf.tail_length {
        if (bf.entry_velocity - bf.exit_velocity).abs() < tolerance {
            // Symmetric case solves directly
            bf.head_length = bf.length / 2.0;
            bf.tail_length = bf.head_length;
            bf.cruise_velocity = bf.cruise_vmax.min(target_velocity(
                bf.entry_velocity,
                bf.head_length,
                bf.jerk,
                bf.cbrt_jerk,
            ));
        } else {
            // Asymmetric case iterates: split the length in ramp proportion,
            // recompute the reachable cruise, repeat until stable.
            let mut computed = bf.cruise_vmax;
            for _ in 0..TRAPEZOID_ITERATION_MAX {
                bf.cruise_velocity = computed;
                bf.head_length =
                    target_length(bf.entry_velocity, bf.cruise_velocity, bf.jerk);
                bf.tail_length =
                    target_length(bf.exit_velocity, bf.cruise_velocity, bf.jerk);

                let total = bf.head_length + bf.tail_length;
                if bf.head_length > bf.tail_length {
                    bf.head_length = bf.head_length / total * bf.length;
                    computed = target_velocity(
                        bf.entry_velocity,
                        bf.head_length,
                        bf.jerk,
                        bf.cbrt_jerk,
                    );
                } else {
                    bf.tail_length = bf.tail_length / total * bf.length;
                    computed = target_velocity(
                        bf.exit_velocity,
                        bf.tail_length,
                        bf.jerk,
                        bf.cbrt_jerk,
                    );
                }

                if ((bf.cruise_velocity - computed) / computed).abs()
                    < TRAPEZOID_ITERATION_ERROR_PERCENT / 100.0
                {
                    break;
                }
            }

            bf.cruise_velocity = computed;
            bf.head_length = target_length(bf.entry_velocity, bf.cruise_velocity, bf.jerk);
            bf.tail_length = bf.length - bf.head_length;
            if bf.head_length < min_head_length(bf) {
                bf.tail_length = bf.length;
                bf.head_length = 0.0;
            }
            if bf.tail_length < min_tail_length(bf) {
                bf.head_length = bf.length;
                bf.tail_length = 0.0;
            }
        }

        bf.body_length = 0.0;
        return;
    }

    // Requested fit: the leftover is the body.
    bf.body_length = bf.length - bf.head_length - bf.tail_length;

    if bf.body_length < min_body_length(bf) && bf.body_length > 0.0 {
        // Fold a sub-minimum body into the ramps, preserving distance.
        if bf.head_length > 0.0 {
            if bf.tail_length > 0.0 {
                bf.head_length += bf.body_length / 2.0;
                bf.tail_length += bf.body_length / 2.0;
            } else {
                bf.head_length += bf.body_length;
            }
        } else {
            bf.tail_length += bf.body_length;
        }
        bf.body_length = 0.0;
    } else if bf.head_length == 0.0 && bf.tail_length == 0.0 {
        // Standalone body cruises at the entry velocity
        bf.cruise_velocity = bf.entry_velocity;
    }
}

fn min_head_length(bf: &Block) -> f64 {
    MIN_SEGMENT_TIME * (bf.cruise_velocity + bf.entry_velocity)
}

fn min_tail_length(bf: &Block) -> f64 {
    MIN_SEGMENT_TIME * (bf.cruise_velocity + bf.exit_velocity)
}

fn min_body_length(bf: &Block) -> f64 {
    MIN_SEGMENT_TIME * bf.cruise_velocity
}

impl PlannerQueue {
    /// Look-ahead replanning over the contiguous run of replannable blocks
    /// ending at `bf` (the block being committed).
    ///
    /// The backward pass accumulates braking velocities: how fast each block
    /// may enter and still reach a stop by the end of the chain. The forward
    /// pass then chains entry velocities to the previous exit, clamps exits
    /// against what the next block can absorb, and refits every trapezoid.
    /// The walk relies on slots outside the queue being zeroed, which reads
    /// as a non-replannable boundary with zero exit velocity.
    pub fn plan(&mut self, bf: usize) {
        // Backward pass
        let mut bp = bf;
        loop {
            let prev = self.prev_idx(bp);
            if prev == bf || !self.block(prev).replannable {
                bp = prev;
                break;
            }

            bp = prev;
            let next = self.next_idx(bp);
            let braking =
                self.block(next).entry_vmax.min(self.block(next).braking_velocity)
                    + self.block(bp).delta_vmax;
            self.block_mut(bp).braking_velocity = braking;
        }

        // Forward pass over every block strictly before bf
        loop {
            bp = self.next_idx(bp);
            if bp == bf {
                break;
            }

            let prev = self.prev_idx(bp);
            let next = self.next_idx(bp);

            let entry = self
                .block(prev)
                .exit_velocity
                .min(self.block(bp).entry_vmax);
            let exit = self
                .block(bp)
                .exit_vmax
                .min(self.block(next).braking_velocity)
                .min(self.block(next).entry_vmax)
                .min(entry + self.block(bp).delta_vmax);

            let block = self.block_mut(bp);
            block.entry_velocity = entry;
            block.cruise_velocity = block.cruise_vmax;
            block.exit_velocity = exit;
            calculate_trapezoid(block);

            // A block planned to its ceiling cannot improve further
            let prev_fixed = !self.block(prev).replannable;
            let block = self.block(bp);
            if block.exit_velocity == block.exit_vmax
                || block.exit_velocity == self.block(next).entry_vmax
                || (prev_fixed
                    && block.exit_velocity
                        == block.entry_velocity + block.delta_vmax)
            {
                self.block_mut(bp).replannable = false;
            }
        }

        // The committed block always plans to a stop; a successor will raise
        // its exit when one arrives.
        let prev = self.prev_idx(bf);
        let entry = self.block(prev).exit_velocity;
        let block = self.block_mut(bf);
        block.entry_velocity = entry.min(block.entry_vmax);
        block.cruise_velocity = block.cruise_vmax;
        block.exit_velocity = 0.0;
        calculate_trapezoid(block);
    }

    /// Replans every queued block from a standing start. Used when resuming
    /// from a feedhold: the first block enters at zero and the chain is
    /// re-fit end to end.
    pub fn replan_all(&mut self) {
        if self.is_empty() {
            return;
        }

        let indices: Vec<usize> = self.iter_idx().collect();
        for &i in &indices {
            let block = self.block_mut(i);
            block.replannable = true;
            block.braking_velocity = block.delta_vmax;
        }

        // The machine is at rest: the head block re-enters from zero
        if let Some(head) = self.head_idx() {
            self.block_mut(head).entry_vmax = 0.0;
        }

        let tail = self.tail_idx();
        self.plan(tail);

        // plan() treated the free tail slot as the block being committed;
        // restore it to the zeroed state the ring invariant requires.
        *self.block_mut(tail) = Block::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JERK: f64 = 50.0 * 1e6;

    fn block(entry: f64, cruise: f64, exit: f64, length: f64) -> Block {
        Block {
            entry_velocity: entry,
            cruise_velocity: cruise,
            exit_velocity: exit,
            entry_vmax: entry,
            cruise_vmax: cruise,
            exit_vmax: exit,
            length,
            jerk: JERK,
            cbrt_jerk: JERK.cbrt(),
            ..Block::default()
        }
    }

    #[test]
    fn target_length_formula() {
        let length = target_length(0.0, 1000.0, JERK);
        assert!((length - 1000.0 * (1000.0f64 / JERK).sqrt()).abs() < 1e-9);
        // Symmetric in direction of change
        assert_eq!(target_length(0.0, 1000.0, JERK), target_length(1000.0, 0.0, JERK));
    }

    #[test]
    fn target_velocity_inverts_target_length() {
        for &(vi, vf) in &[(0.0, 2000.0), (500.0, 3000.0), (1200.0, 1300.0)] {
            let length = target_length(vi, vf, JERK);
            let solved = target_velocity(vi, length, JERK, JERK.cbrt());
            assert!(
                (solved - vf).abs() / vf < 0.002,
                "vi={vi} vf={vf} solved={solved}"
            );
        }
    }

    #[test]
    fn full_trapezoid_sections_sum_to_length() {
        let mut bf = block(0.0, 3000.0, 0.0, 100.0);
        calculate_trapezoid(&mut bf);
        assert!(bf.head_length > 0.0);
        assert!(bf.body_length > 0.0);
        assert!(bf.tail_length > 0.0);
        let sum = bf.head_length + bf.body_length + bf.tail_length;
        assert!((sum - bf.length).abs() < 1e-6);
    }

    #[test]
    fn rate_limited_symmetric_has_no_body() {
        // Not enough length to reach cruise
        let mut bf = block(0.0, 50_000.0, 0.0, 10.0);
        calculate_trapezoid(&mut bf);
        assert_eq!(bf.body_length, 0.0);
        assert!((bf.head_length + bf.tail_length - bf.length).abs() < 1e-6);
        assert!(bf.cruise_velocity <= bf.cruise_vmax);
        assert!(bf.cruise_velocity > 0.0);
    }

    #[test]
    fn rate_limited_asymmetric_converges() {
        let mut bf = block(1000.0, 50_000.0, 0.0, 8.0);
        bf.entry_vmax = 1000.0;
        calculate_trapezoid(&mut bf);
        assert_eq!(bf.body_length, 0.0);
        let sum = bf.head_length + bf.body_length + bf.tail_length;
        assert!((sum - bf.length).abs() < 1e-6);
        assert!(bf.cruise_velocity >= bf.entry_velocity.max(bf.exit_velocity) - 1e-6);
    }

    #[test]
    fn cruise_only_block_is_all_body() {
        let mut bf = block(3000.0, 3000.0, 3000.0, 25.0);
        calculate_trapezoid(&mut bf);
        assert_eq!(bf.body_length, bf.length);
        assert_eq!(bf.head_length, 0.0);
        assert_eq!(bf.tail_length, 0.0);
    }

    #[test]
    fn decel_only_block_is_all_tail() {
        let length = target_length(2000.0, 0.0, JERK);
        let mut bf = block(2000.0, 2000.0, 0.0, length);
        calculate_trapezoid(&mut bf);
        assert!((bf.tail_length - bf.length).abs() < 1e-9);
        assert_eq!(bf.head_length, 0.0);
    }

    #[test]
    fn too_short_decel_degrades_entry() {
        let needed = target_length(2000.0, 0.0, JERK);
        let mut bf = block(2000.0, 2000.0, 0.0, needed / 2.0);
        calculate_trapezoid(&mut bf);
        // Entry had to come down to what the length allows
        assert!(bf.entry_velocity < 2000.0);
        assert!((bf.tail_length - bf.length).abs() < 1e-9);
    }
}
