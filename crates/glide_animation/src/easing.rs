//! Easing functions for tweens
//!
//! Every easing maps `(elapsed, duration, start, delta)` to a current value,
//! so custom host-supplied functions and the built-in curves share one
//! signature. `ContinuousLoop` is recognized specially by the engine: its
//! end-of-loop value equals its start value, so iteration boundaries snap to
//! start values regardless of reflect state.

use std::f64::consts::TAU;

/// Easing function type
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Easing {
    #[default]
    Linear,
    InQuad,
    OutQuad,
    InOutQuad,
    InCubic,
    OutCubic,
    InOutCubic,
    InQuart,
    OutQuart,
    InOutQuart,
    InExpo,
    OutExpo,
    InOutExpo,
    /// Runs from the start value out to `start + delta` and back to the start
    /// value over one iteration. Its loop endpoints are always equal.
    ContinuousLoop,
    /// CSS-style cubic bezier with control points (x1, y1), (x2, y2)
    CubicBezier(f64, f64, f64, f64),
    /// Host-supplied `(elapsed, duration, start, delta) -> value`
    Custom(fn(f64, f64, f64, f64) -> f64),
}

impl Easing {
    /// Evaluate the easing at `elapsed` of `duration`, interpolating from
    /// `start` across `delta`.
    pub fn apply(&self, elapsed: f64, duration: f64, start: f64, delta: f64) -> f64 {
        if let Easing::Custom(f) = self {
            return f(elapsed, duration, start, delta);
        }

        let t = if duration > 0.0 {
            (elapsed / duration).clamp(0.0, 1.0)
        } else {
            1.0
        };

        start + delta * self.curve(t)
    }

    /// Whether this is the continuous-loop easing, whose end-of-loop value is
    /// treated as equal to its start value.
    pub fn is_continuous_loop(&self) -> bool {
        matches!(self, Easing::ContinuousLoop)
    }

    /// Normalized curve: maps progress `t` in [0, 1] to an eased factor.
    fn curve(&self, t: f64) -> f64 {
        match self {
            Easing::Linear => t,
            Easing::InQuad => t * t,
            Easing::OutQuad => 1.0 - (1.0 - t) * (1.0 - t),
            Easing::InOutQuad => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
                }
            }
            Easing::InCubic => t * t * t,
            Easing::OutCubic => 1.0 - (1.0 - t).powi(3),
            Easing::InOutCubic => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
            Easing::InQuart => t * t * t * t,
            Easing::OutQuart => 1.0 - (1.0 - t).powi(4),
            Easing::InOutQuart => {
                if t < 0.5 {
                    8.0 * t * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(4) / 2.0
                }
            }
            Easing::InExpo => {
                if t <= 0.0 {
                    0.0
                } else {
                    (2.0_f64).powf(10.0 * t - 10.0)
                }
            }
            Easing::OutExpo => {
                if t >= 1.0 {
                    1.0
                } else {
                    1.0 - (2.0_f64).powf(-10.0 * t)
                }
            }
            Easing::InOutExpo => {
                if t <= 0.0 {
                    0.0
                } else if t >= 1.0 {
                    1.0
                } else if t < 0.5 {
                    (2.0_f64).powf(20.0 * t - 10.0) / 2.0
                } else {
                    (2.0 - (2.0_f64).powf(-20.0 * t + 10.0)) / 2.0
                }
            }
            Easing::ContinuousLoop => (1.0 - (TAU * t).cos()) / 2.0,
            Easing::CubicBezier(x1, y1, x2, y2) => cubic_bezier_ease(t, *x1, *y1, *x2, *y2),
            Easing::Custom(_) => unreachable!("custom easings bypass curve()"),
        }
    }
}

/// Cubic bezier easing calculation (matches CSS spec / browser implementations).
///
/// Uses Newton-Raphson with binary-search fallback for robustness.
fn cubic_bezier_ease(t: f64, x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    // Endpoints are always exact
    if t <= 0.0 {
        return 0.0;
    }
    if t >= 1.0 {
        return 1.0;
    }

    // Solve for parameter `p` where bezier_x(p) == t using Newton-Raphson,
    // falling back to binary search if the slope is too flat.
    let mut p = t;
    for _ in 0..8 {
        let err = bezier_sample(p, x1, x2) - t;
        if err.abs() < 1e-7 {
            return bezier_sample(p, y1, y2);
        }
        let slope = bezier_slope(p, x1, x2);
        if slope.abs() < 1e-7 {
            break; // slope too flat, switch to binary search
        }
        p -= err / slope;
    }

    // Binary search fallback (always converges)
    let mut lo = 0.0_f64;
    let mut hi = 1.0_f64;
    p = t;
    for _ in 0..20 {
        let val = bezier_sample(p, x1, x2);
        if (val - t).abs() < 1e-7 {
            break;
        }
        if val < t {
            lo = p;
        } else {
            hi = p;
        }
        p = (lo + hi) * 0.5;
    }

    bezier_sample(p, y1, y2)
}

/// Evaluate cubic bezier at parameter t: B(t) = 3(1-t)²t·p1 + 3(1-t)t²·p2 + t³
#[inline]
fn bezier_sample(t: f64, p1: f64, p2: f64) -> f64 {
    // Horner form: ((1-3p2+3p1)t + 3p2-6p1)t + 3p1) * t
    let a = 1.0 - 3.0 * p2 + 3.0 * p1;
    let b = 3.0 * p2 - 6.0 * p1;
    let c = 3.0 * p1;
    ((a * t + b) * t + c) * t
}

/// Derivative of cubic bezier: B'(t) = 3(1-t)²·p1 + 6(1-t)t·(p2-p1) + 3t²·(1-p2)
#[inline]
fn bezier_slope(t: f64, p1: f64, p2: f64) -> f64 {
    let a = 1.0 - 3.0 * p2 + 3.0 * p1;
    let b = 3.0 * p2 - 6.0 * p1;
    let c = 3.0 * p1;
    (3.0 * a * t + 2.0 * b) * t + c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_endpoints() {
        assert_eq!(Easing::Linear.apply(0.0, 1000.0, 10.0, 80.0), 10.0);
        assert_eq!(Easing::Linear.apply(1000.0, 1000.0, 10.0, 80.0), 90.0);
        assert_eq!(Easing::Linear.apply(500.0, 1000.0, 10.0, 80.0), 50.0);
    }

    #[test]
    fn test_all_curves_hit_endpoints() {
        let easings = [
            Easing::Linear,
            Easing::InQuad,
            Easing::OutQuad,
            Easing::InOutQuad,
            Easing::InCubic,
            Easing::OutCubic,
            Easing::InOutCubic,
            Easing::InQuart,
            Easing::OutQuart,
            Easing::InOutQuart,
            Easing::InExpo,
            Easing::OutExpo,
            Easing::InOutExpo,
            Easing::CubicBezier(0.25, 0.1, 0.25, 1.0),
        ];
        for easing in easings {
            let at_start = easing.apply(0.0, 400.0, 5.0, 20.0);
            let at_end = easing.apply(400.0, 400.0, 5.0, 20.0);
            assert!((at_start - 5.0).abs() < 1e-6, "{easing:?} start");
            assert!((at_end - 25.0).abs() < 1e-6, "{easing:?} end");
        }
    }

    #[test]
    fn test_continuous_loop_returns_to_start() {
        let e = Easing::ContinuousLoop;
        assert!(e.is_continuous_loop());
        assert!((e.apply(0.0, 1000.0, 3.0, 10.0) - 3.0).abs() < 1e-9);
        assert!((e.apply(1000.0, 1000.0, 3.0, 10.0) - 3.0).abs() < 1e-9);
        // Peak at the midpoint
        assert!((e.apply(500.0, 1000.0, 3.0, 10.0) - 13.0).abs() < 1e-9);
    }

    #[test]
    fn test_cubic_bezier_monotonic_progress() {
        let e = Easing::CubicBezier(0.42, 0.0, 0.58, 1.0); // ease-in-out
        let mut prev = 0.0;
        for i in 0..=20 {
            let v = e.apply(i as f64 * 50.0, 1000.0, 0.0, 1.0);
            assert!(v >= prev - 1e-9, "non-monotonic at step {i}");
            prev = v;
        }
    }

    #[test]
    fn test_custom_easing_gets_raw_arguments() {
        fn snap_to_end(_elapsed: f64, _duration: f64, start: f64, delta: f64) -> f64 {
            start + delta
        }
        let e = Easing::Custom(snap_to_end);
        assert_eq!(e.apply(1.0, 1000.0, 2.0, 8.0), 10.0);
    }

    #[test]
    fn test_zero_duration_resolves_to_end() {
        assert_eq!(Easing::OutQuad.apply(0.0, 0.0, 0.0, 7.0), 7.0);
    }
}
