// src/motion/velocity.rs

/// Quintic Bezier velocity blend between `vi` and `vt`.
///
/// The 10t^3 - 15t^4 + 6t^5 polynomial has zero first and second derivatives
/// at both ends, so acceleration and jerk are continuous at segment
/// boundaries. `t` is the normalized position in the ramp, 0..=1.
pub fn velocity_curve(vi: f64, vt: f64, t: f64) -> f64 {
    let t3 = t * t * t;
    let t4 = t3 * t;
    let t5 = t4 * t;

    vi + (vt - vi) * (10.0 * t3 - 15.0 * t4 + 6.0 * t5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints() {
        assert_eq!(velocity_curve(100.0, 500.0, 0.0), 100.0);
        assert_eq!(velocity_curve(100.0, 500.0, 1.0), 500.0);
    }

    #[test]
    fn midpoint_is_average() {
        let v = velocity_curve(0.0, 1000.0, 0.5);
        assert!((v - 500.0).abs() < 1e-9);
    }

    #[test]
    fn monotonic_within_ramp() {
        let mut last = velocity_curve(200.0, 4000.0, 0.0);
        for i in 1..=100 {
            let v = velocity_curve(200.0, 4000.0, i as f64 / 100.0);
            assert!(v >= last);
            last = v;
        }
    }

    #[test]
    fn flat_ends() {
        // Near the endpoints the curve should be much flatter than a linear
        // ramp, which is the point of the quintic blend.
        let dv_start = velocity_curve(0.0, 1000.0, 0.01) - velocity_curve(0.0, 1000.0, 0.0);
        assert!(dv_start < 1.0);
        let dv_end = velocity_curve(0.0, 1000.0, 1.0) - velocity_curve(0.0, 1000.0, 0.99);
        assert!(dv_end < 1.0);
    }
}
