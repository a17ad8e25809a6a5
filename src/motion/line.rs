// src/motion/line.rs
//
// The line planner: geometry, per-move jerk selection, junction velocity and
// the velocity envelope for each new block. The jerk-limited trapezoid fit
// and the look-ahead passes live in plan.rs.
use crate::axis::{AXES, Axis};
use crate::error::MotionError;
use crate::motion::buffer::BlockKind;
use crate::motion::plan::target_velocity;
use crate::motion::{
    JERK_MATCH_PRECISION, JERK_MULTIPLIER, MIN_SEGMENT_TIME, MotionCore, fp_zero,
};

/// Junction velocity sentinel for straight-line continuations: large enough
/// to never limit, finite so the envelope math stays well-behaved.
const STRAIGHT_JUNCTION_VMAX: f64 = 1e7;

#[derive(Debug, Clone, Copy, Default)]
pub struct MoveFlags {
    pub rapid: bool,
    pub inverse_time: bool,
    pub exact_stop: bool,
}

/* Junction velocity per Sonny Jeon's centripetal-acceleration model: place a
 * circle tangent to both segments; the allowed corner deviation delta sets
 * its radius through
 *
 *   sin(theta/2) = R / (R + delta)   =>   R = delta * s / (1 - s)
 *
 * with s = sin(theta/2) = sqrt((1 - cos(theta)) / 2), and the velocity
 * through v = sqrt(R * junction_acceleration). The per-axis deviations are
 * fused by unit-vector contribution so axes with different dynamics (screw
 * Z vs belt XY, rotaries) each shape the corner budget.
 */
fn junction_vmax(
    a_unit: &[f64; AXES],
    b_unit: &[f64; AXES],
    deviation: f64,
    acceleration: f64,
) -> f64 {
    let mut costheta = 0.0;
    for axis in 0..AXES {
        costheta -= a_unit[axis] * b_unit[axis];
    }

    if costheta < -0.99 {
        return STRAIGHT_JUNCTION_VMAX; // straight line cases
    }
    if 0.99 < costheta {
        return 0.0; // reversal cases
    }

    // Fuse the junction deviations into a vector sum
    let mut a_delta = 0.0;
    let mut b_delta = 0.0;
    for axis in 0..AXES {
        a_delta += (a_unit[axis] * deviation) * (a_unit[axis] * deviation);
        b_delta += (b_unit[axis] * deviation) * (b_unit[axis] * deviation);
    }

    if a_delta == 0.0 || b_delta == 0.0 {
        // No previous move: nothing to corner against
        return STRAIGHT_JUNCTION_VMAX;
    }

    let delta = (a_delta.sqrt() + b_delta.sqrt()) / 2.0;
    let sintheta_over2 = ((1.0 - costheta) / 2.0).sqrt();
    let radius = delta * sintheta_over2 / (1.0 - sintheta_over2);

    (radius * acceleration).sqrt()
}

/// The axis whose jerk limit dominates the move: the one with the largest
/// axis_length^2 / jerk, i.e. the longest time to shed its share of the
/// velocity. Only the rank matters, so the scale factors cancel.
pub(crate) fn find_jerk_axis(axis_square: &[f64; AXES], recip_jerk: &[f64; AXES]) -> Axis {
    let mut max_c = 0.0;
    let mut jerk_axis = Axis::X;

    for axis in Axis::ALL {
        if axis_square[axis.index()] != 0.0 {
            let c = axis_square[axis.index()] * recip_jerk[axis.index()];
            if max_c < c {
                max_c = c;
                jerk_axis = axis;
            }
        }
    }

    jerk_axis
}

impl MotionCore {
    /// Plans a straight move to `target` and commits it to the queue.
    ///
    /// Zero-length moves return Ok without enqueuing. The caller observes
    /// `queue.room()` for back-pressure before calling.
    pub fn plan_line(
        &mut self,
        target: &[f64; AXES],
        flags: MoveFlags,
        feed_rate: f64,
        feed_override: f64,
        line: i64,
    ) -> Result<(), MotionError> {
        for &value in target {
            if value.is_nan() {
                return Err(MotionError::MoveTargetNan);
            }
            if value.is_infinite() {
                return Err(MotionError::MoveTargetInfinite);
            }
        }
        if !flags.rapid && !flags.inverse_time && feed_rate <= 0.0 {
            return Err(MotionError::ZeroFeedRate);
        }

        // Axis and move lengths
        let mut axis_length = [0.0; AXES];
        let mut axis_square = [0.0; AXES];
        let mut length_square = 0.0;
        for axis in 0..AXES {
            axis_length[axis] = target[axis] - self.position[axis];
            axis_square[axis] = axis_length[axis] * axis_length[axis];
            length_square += axis_square[axis];
        }

        let length = length_square.sqrt();
        if fp_zero(length) {
            return Ok(()); // zero moves are dropped
        }

        if !self.queue.has_space() {
            // The back-pressure contract was violated upstream
            return Err(self.alarm(MotionError::Internal));
        }

        let bf = self.queue.tail_idx();

        // Geometry
        let jerk = {
            let mut recip_jerk = [0.0; AXES];
            for axis in Axis::ALL {
                recip_jerk[axis.index()] = self.axes.get(axis).recip_jerk();
            }
            let jerk_axis = find_jerk_axis(&axis_square, &recip_jerk);
            let unit_term = (axis_length[jerk_axis.index()] / length).abs();

            // Scaling by the dominant axis's unit component means that when
            // the move decomposes, that axis runs at exactly its jerk limit.
            self.axes.get(jerk_axis).jerk_max() * JERK_MULTIPLIER / unit_term
        };

        if !jerk.is_finite() || jerk <= 0.0 {
            tracing::error!(line, "move has no usable jerk limit; check axis config");
            return Err(MotionError::Internal);
        }

        {
            let block = self.queue.block_mut(bf);
            block.length = length;
            block.target = *target;
            for axis in 0..AXES {
                block.unit[axis] = axis_length[axis] / length;
            }
            block.jerk = jerk;
            block.rapid = flags.rapid;
            block.inverse_time = flags.inverse_time;
            block.exact_stop = flags.exact_stop;
        }
        self.cache_jerk_terms(bf);

        // Move time and the velocity envelope
        let time = self.calc_move_time(&axis_length, &axis_square, flags, feed_rate, feed_override);
        self.calc_max_velocities(bf, time, flags.exact_stop);

        // Single-step mode plans every block to a stop and holds there
        if self.plan_steps {
            let block = self.queue.block_mut(bf);
            block.entry_vmax = 0.0;
            block.exit_vmax = 0.0;
            block.replannable = false;
            block.hold = true;
        }

        // These remain in order: plan against the list, update the planner
        // position, then commit.
        self.queue.plan(bf);
        self.position = *target;
        self.push(BlockKind::Line, line)?;

        tracing::debug!(line, length, jerk, "planned line");
        Ok(())
    }

    /// Tolerance-memoized cube root of the block jerk. Consecutive moves
    /// usually share a jerk value, and cbrt is worth skipping.
    fn cache_jerk_terms(&mut self, bf: usize) {
        let jerk = self.queue.block(bf).jerk;
        let (memo_jerk, memo_cbrt) = self.jerk_memo;

        let cbrt = if JERK_MATCH_PRECISION < (jerk - memo_jerk).abs() || memo_cbrt == 0.0 {
            let cbrt = jerk.cbrt();
            self.jerk_memo = (jerk, cbrt);
            cbrt
        } else {
            memo_cbrt
        };

        self.queue.block_mut(bf).cbrt_jerk = cbrt;
    }

    /// Longest of: the G93 inverse time, the coordinated time at the
    /// requested feed, and the time the slowest participating axis needs.
    /// Feed rate applies to XYZ path length when linear axes move, else to
    /// rotary degrees, per RS274NGC.
    fn calc_move_time(
        &self,
        axis_length: &[f64; AXES],
        axis_square: &[f64; AXES],
        flags: MoveFlags,
        feed_rate: f64,
        feed_override: f64,
    ) -> f64 {
        let mut max_time: f64 = 0.0;

        if !flags.rapid {
            if flags.inverse_time {
                max_time = feed_rate; // G93: the F word is minutes
            } else {
                // Linear length in mm over feed in mm/min
                let linear =
                    (axis_square[0] + axis_square[1] + axis_square[2]).sqrt();
                max_time = linear / feed_rate;

                // Rotary-only move: degrees over deg/min
                if fp_zero(max_time) {
                    let rotary =
                        (axis_square[3] + axis_square[4] + axis_square[5]).sqrt();
                    max_time = rotary / feed_rate;
                }
            }
        }

        if feed_override > 0.0 {
            max_time /= feed_override;
        }

        // Rate-limiting axis
        for axis in Axis::ALL {
            let velocity_max = self.axes.get(axis).velocity_max;
            if velocity_max > 0.0 {
                let time = axis_length[axis.index()].abs() / velocity_max;
                if max_time < time {
                    max_time = time;
                }
            }
        }

        max_time.max(MIN_SEGMENT_TIME)
    }

    fn calc_max_velocities(&mut self, bf: usize, move_time: f64, exact_stop: bool) {
        let junction_velocity = {
            let prev = self.queue.prev_idx(bf);
            junction_vmax(
                &self.queue.block(prev).unit,
                &self.queue.block(bf).unit,
                self.settings.junction_deviation,
                self.settings.junction_acceleration,
            )
        };

        let block = self.queue.block_mut(bf);
        block.cruise_vmax = block.length / move_time; // requested velocity
        block.entry_vmax = block.cruise_vmax.min(junction_velocity);
        block.delta_vmax = target_velocity(0.0, block.length, block.jerk, block.cbrt_jerk);
        block.exit_vmax = block.cruise_vmax.min(block.entry_vmax + block.delta_vmax);
        block.braking_velocity = block.delta_vmax;

        if exact_stop {
            block.entry_vmax = 0.0;
            block.exit_vmax = 0.0;
        } else {
            block.replannable = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_continuation_bypasses_junction() {
        let a = unit_x();
        let b = unit_x();
        let v = junction_vmax(&a, &b, 0.05, 200_000.0);
        assert_eq!(v, STRAIGHT_JUNCTION_VMAX);
    }

    #[test]
    fn reversal_stops_at_junction() {
        let a = unit_x();
        let mut b = unit_x();
        b[0] = -1.0;
        let v = junction_vmax(&a, &b, 0.05, 200_000.0);
        assert_eq!(v, 0.0);
    }

    #[test]
    fn right_angle_junction_velocity() {
        let a = unit_x();
        let mut b = [0.0; AXES];
        b[1] = 1.0;

        let deviation = 0.05;
        let acceleration = 200_000.0;
        let v = junction_vmax(&a, &b, deviation, acceleration);

        // cos(theta) = 0, sin(theta/2) = sqrt(1/2)
        let s = 0.5f64.sqrt();
        let radius = deviation * s / (1.0 - s);
        let expected = (radius * acceleration).sqrt();
        assert!((v - expected).abs() < 1e-9);
    }

    #[test]
    fn first_move_has_no_junction_limit() {
        let a = [0.0; AXES]; // zeroed slot before the first move
        let b = unit_x();
        let v = junction_vmax(&a, &b, 0.05, 200_000.0);
        assert_eq!(v, STRAIGHT_JUNCTION_VMAX);
    }

    #[test]
    fn jerk_axis_dominance() {
        // Y has much lower jerk; even a modest Y component dominates
        let mut axis_square = [0.0; AXES];
        axis_square[0] = 100.0;
        axis_square[1] = 25.0;
        let mut recip = [0.0; AXES];
        recip[0] = 1.0 / 50e6;
        recip[1] = 1.0 / 2e6;
        assert_eq!(find_jerk_axis(&axis_square, &recip), Axis::Y);

        // With equal jerk the longer axis dominates
        recip[1] = recip[0];
        assert_eq!(find_jerk_axis(&axis_square, &recip), Axis::X);
    }

    fn unit_x() -> [f64; AXES] {
        let mut unit = [0.0; AXES];
        unit[0] = 1.0;
        unit
    }
}
