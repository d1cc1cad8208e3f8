#![allow(dead_code)]
#![allow(unused_assignments)]
use crate::minimize::guard_nan;
use crate::objective::{LineProjection, ObjectiveAdapter};
use crate::params::ParameterSet;

/// Golden ratio expansion factor.
pub const GOLD: f64 = 1.618034;
/// Cap on the parabolic extrapolation step, in units of the current interval.
const GLIMIT: f64 = 100.0;
/// Floor on the parabolic denominator.
const TINY: f64 = 1e-20;

/// A triple of points along a line with the middle value lowest, so a
/// minimum is pinned between the outer two.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket {
    pub ax: f64,
    pub bx: f64, // middle point, lowest function value
    pub cx: f64,
    pub fa: f64,
    pub fb: f64,
    pub fc: f64,
}

impl Bracket {
    /// Check that the middle point really is lowest.
    pub fn is_valid(&self) -> bool {
        self.fb <= self.fa && self.fb <= self.fc
    }

    pub fn width(&self) -> f64 {
        (self.cx - self.ax).abs()
    }

    /// Best point seen during bracketing.
    pub fn best(&self) -> (f64, f64) {
        (self.bx, self.fb)
    }
}

/// Bracket a minimum of the objective restricted to `line`, starting from
/// the two line offsets `ax` and `bx`.
///
/// Golden ratio expansion with parabolic extrapolation, capped at `GLIMIT`
/// times the current step. The search walks downhill from `ax` through `bx`
/// and expands until the middle value is no longer the highest of the
/// moving triple.
///
/// Invalid objective values read as infinite, so the expansion stops at the
/// edge of the valid region instead of stepping over it. Exhausting the
/// call budget also stops the expansion; the caller sees that through the
/// adapter, not through this return value.
///
/// # Arguments
///
/// * `line` - Restriction of the objective to a line (internal coordinates)
/// * `params` - Parameter set used to externalize trial points
/// * `adapter` - Budgeted objective
/// * `ax`, `bx` - Two distinct starting offsets along the line
pub fn bracket_minimum(
    line: &LineProjection,
    params: &ParameterSet,
    adapter: &mut ObjectiveAdapter,
    ax: f64,
    bx: f64,
) -> Bracket {
    let mut ax = ax;
    let mut bx = bx;
    let mut fa = guard_nan(line.eval(params, adapter, ax));
    let mut fb = guard_nan(line.eval(params, adapter, bx));

    // Walk downhill from a to b
    if fb > fa {
        std::mem::swap(&mut ax, &mut bx);
        std::mem::swap(&mut fa, &mut fb);
    }

    let mut cx = bx + GOLD * (bx - ax);
    let mut fc = guard_nan(line.eval(params, adapter, cx));

    while fb > fc {
        if adapter.budget_exhausted() || !bx.is_finite() || !cx.is_finite() {
            break;
        }

        // Parabolic extrapolation from a, b, c
        let r = (bx - ax) * (fb - fc);
        let q = (bx - cx) * (fb - fa);
        let denom = 2.0 * (q - r).abs().max(TINY) * if q - r >= 0.0 { 1.0 } else { -1.0 };
        let mut u = bx - ((bx - cx) * q - (bx - ax) * r) / denom;
        let ulim = bx + GLIMIT * (cx - bx);
        let mut fu;

        if (bx - u) * (u - cx) > 0.0 {
            // Parabolic u lies between b and c
            fu = guard_nan(line.eval(params, adapter, u));
            if fu < fc {
                // Minimum between b and c
                ax = bx;
                fa = fb;
                bx = u;
                fb = fu;
                return Bracket {
                    ax,
                    bx,
                    cx,
                    fa,
                    fb,
                    fc,
                };
            } else if fu > fb {
                // Minimum between a and u
                cx = u;
                fc = fu;
                return Bracket {
                    ax,
                    bx,
                    cx,
                    fa,
                    fb,
                    fc,
                };
            }
            // Parabolic fit was no use, take a golden step past c
            u = cx + GOLD * (cx - bx);
            fu = guard_nan(line.eval(params, adapter, u));
        } else if (cx - u) * (u - ulim) > 0.0 {
            // Parabolic u between c and the step limit
            fu = guard_nan(line.eval(params, adapter, u));
            if fu < fc {
                bx = cx;
                cx = u;
                u = cx + GOLD * (cx - bx);
                fb = fc;
                fc = fu;
                fu = guard_nan(line.eval(params, adapter, u));
            }
        } else if (u - ulim) * (ulim - cx) >= 0.0 {
            // Cap the parabolic step at its maximum allowed value
            u = ulim;
            fu = guard_nan(line.eval(params, adapter, u));
        } else {
            // Reject the parabolic u, take a golden step
            u = cx + GOLD * (cx - bx);
            fu = guard_nan(line.eval(params, adapter, u));
        }

        ax = bx;
        bx = cx;
        cx = u;
        fa = fb;
        fb = fc;
        fc = fu;
    }

    Bracket {
        ax,
        bx,
        cx,
        fa,
        fb,
        fc,
    }
}

#[cfg(test)]
mod bracket_tests {
    use super::*;
    use crate::objective::MultiDimFn;
    use ndarray::{array, Array1};

    fn setup_1d() -> ParameterSet {
        let mut params = ParameterSet::new();
        params.init_param(0, 1.0, 0.0, 0.0, false).unwrap();
        params
    }

    #[test]
    fn test_brackets_parabola_minimum() {
        let params = setup_1d();
        let f = MultiDimFn::new(|x: &Array1<f64>| (x[0] - 3.0).powi(2) + 1.0);
        let mut adapter = ObjectiveAdapter::new(f, 1000);
        let line = LineProjection::new(array![0.0], array![1.0]);

        let br = bracket_minimum(&line, &params, &mut adapter, -1.0, 1.0);
        assert!(br.is_valid());
        let (lo, hi) = (br.ax.min(br.cx), br.ax.max(br.cx));
        assert!(lo <= 3.0 && 3.0 <= hi);
    }

    #[test]
    fn test_walks_downhill_when_seeded_uphill() {
        let params = setup_1d();
        let f = MultiDimFn::new(|x: &Array1<f64>| (x[0] + 5.0).powi(2));
        let mut adapter = ObjectiveAdapter::new(f, 1000);
        let line = LineProjection::new(array![0.0], array![1.0]);

        // both seeds on the uphill side of the minimum at -5
        let br = bracket_minimum(&line, &params, &mut adapter, 0.0, 1.0);
        assert!(br.is_valid());
        let (lo, hi) = (br.ax.min(br.cx), br.ax.max(br.cx));
        assert!(lo <= -5.0 && -5.0 <= hi);
    }

    #[test]
    fn test_stops_at_nan_wall() {
        let params = setup_1d();
        // valid only below 5, minimum of the valid branch far beyond it
        let f = MultiDimFn::new(|x: &Array1<f64>| {
            if x[0] > 5.0 {
                f64::NAN
            } else {
                (x[0] - 10.0).powi(2)
            }
        });
        let mut adapter = ObjectiveAdapter::new(f, 1000);
        let line = LineProjection::new(array![0.0], array![1.0]);

        let br = bracket_minimum(&line, &params, &mut adapter, 0.0, 1.0);
        // expansion must terminate without panicking and keep the best
        // point on the valid side
        assert!(br.fb.is_finite());
        assert!(br.bx <= 5.0);
    }

    #[test]
    fn test_budget_stops_expansion() {
        let params = setup_1d();
        // monotone decreasing, would expand forever
        let f = MultiDimFn::new(|x: &Array1<f64>| -x[0]);
        let mut adapter = ObjectiveAdapter::new(f, 12);
        let line = LineProjection::new(array![0.0], array![1.0]);

        let _ = bracket_minimum(&line, &params, &mut adapter, 0.0, 1.0);
        assert!(adapter.budget_exhausted());
        assert_eq!(adapter.n_calls(), 12);
    }
}
