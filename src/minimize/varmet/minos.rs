use super::{migrad, VmState};
use crate::minimize::{guard_nan, FitOptions, FitStatus};

/// Which side of the minimum a profile scan walks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MinosDirection {
    Lower,
    Upper,
}

impl MinosDirection {
    fn sign(&self) -> f64 {
        match self {
            MinosDirection::Lower => -1.0,
            MinosDirection::Upper => 1.0,
        }
    }
}

/// Outcome of one direction of a profile scan.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MinosOutcome {
    /// Signed distance from the fitted value to the crossing, in external
    /// units.
    Crossing(f64),
    /// The scan ran into a parameter limit before the crossing.
    AtLimit,
    /// The call budget ran out before the crossing was located.
    CallLimit,
    /// The objective never rose to the crossing level.
    NoCrossing,
}

impl MinosOutcome {
    pub fn delta(&self) -> Option<f64> {
        match self {
            MinosOutcome::Crossing(d) => Some(*d),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, MinosOutcome::Crossing(_))
    }
}

/// Asymmetric errors of one parameter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MinosResult {
    pub index: usize,
    pub lower: MinosOutcome,
    pub upper: MinosOutcome,
}

impl MinosResult {
    pub fn is_valid(&self) -> bool {
        self.lower.is_valid() && self.upper.is_valid()
    }
}

/// Cap on profile evaluations per direction, on top of the call budget.
const SCAN_MAX: usize = 40;
/// The crossing is accepted when the profile sits within this fraction of
/// `up` from the target level.
const CROSS_TOL: f64 = 1e-3;

pub(crate) fn minos_search(st: &mut VmState, opts: &FitOptions, index: usize) -> MinosResult {
    MinosResult {
        index,
        lower: scan_direction(st, opts, index, MinosDirection::Lower),
        upper: scan_direction(st, opts, index, MinosDirection::Upper),
    }
}

/// Walk one side of the minimum until the profile crosses `fmin + up`,
/// then pin the crossing down by a secant search safeguarded with
/// bisection. The walk happens in internal coordinates in multiples of
/// the parabolic error.
fn scan_direction(
    st: &mut VmState,
    opts: &FitOptions,
    index: usize,
    dir: MinosDirection,
) -> MinosOutcome {
    let sign = dir.sign();
    let aim = st.fval + opts.up;
    let x0 = st.x[index];
    let ext0 = st.params.to_external(x0, index);

    let slot = st.free.iter().position(|&i| i == index);
    let sigma = slot
        .map(|a| st.vhmat.get(a, a))
        .filter(|&v| v > 0.0)
        .map(|v| (2.0 * opts.up * v).sqrt())
        .unwrap_or_else(|| st.params.internal_step(index));

    // walk outward until the level is bracketed
    let mut tlo = 0.0;
    let mut flo = st.fval;
    let mut t = 1.0;
    let mut bracket = None;
    for _ in 0..SCAN_MAX {
        match profile(st, opts, index, x0 + sign * t * sigma) {
            ProfileEval::Budget => return MinosOutcome::CallLimit,
            ProfileEval::AtLimit => return MinosOutcome::AtLimit,
            ProfileEval::Value(f) => {
                if f >= aim {
                    bracket = Some((t, f));
                    break;
                }
                let guess = if f > flo + 1e-12 {
                    t + (aim - f) * (t - tlo) / (f - flo)
                } else {
                    2.0 * t
                };
                tlo = t;
                flo = f;
                t = guess.clamp(1.1 * t, 4.0 * t);
            }
        }
    }
    let (mut thi, mut fhi) = match bracket {
        Some(b) => b,
        None => return MinosOutcome::NoCrossing,
    };

    let mut iters = 0;
    loop {
        if fhi.is_finite() && (fhi - aim).abs() <= CROSS_TOL * opts.up {
            let ext = st.params.to_external(x0 + sign * thi * sigma, index);
            return MinosOutcome::Crossing(ext - ext0);
        }
        // the secant lands below the crossing on a convex profile, so the
        // low end is where convergence shows up first
        if tlo > 0.0 && aim - flo <= CROSS_TOL * opts.up {
            let ext = st.params.to_external(x0 + sign * tlo * sigma, index);
            return MinosOutcome::Crossing(ext - ext0);
        }
        iters += 1;
        if iters > SCAN_MAX || thi - tlo <= 1e-4 * thi.max(1.0) {
            let ext = st.params.to_external(x0 + sign * 0.5 * (tlo + thi) * sigma, index);
            return MinosOutcome::Crossing(ext - ext0);
        }

        let mut tm = if fhi.is_finite() && fhi > flo {
            thi + (aim - fhi) * (thi - tlo) / (fhi - flo)
        } else {
            0.5 * (tlo + thi)
        };
        if !(tm > tlo && tm < thi) {
            tm = 0.5 * (tlo + thi);
        }
        match profile(st, opts, index, x0 + sign * tm * sigma) {
            ProfileEval::Budget => return MinosOutcome::CallLimit,
            ProfileEval::AtLimit => return MinosOutcome::AtLimit,
            ProfileEval::Value(f) => {
                if f >= aim {
                    thi = tm;
                    fhi = f;
                } else {
                    tlo = tm;
                    flo = f;
                }
            }
        }
    }
}

enum ProfileEval {
    Value(f64),
    AtLimit,
    Budget,
}

/// Objective re-minimized over the other free parameters with `index`
/// pinned at the internal value `xk`.
fn profile(st: &mut VmState, opts: &FitOptions, index: usize, xk: f64) -> ProfileEval {
    if st.adapter.budget_exhausted() {
        return ProfileEval::Budget;
    }

    // for a limited parameter the internal coordinate saturates at pi/2,
    // beyond that the external value would fold back inside
    if st.params.has_limits(index) && xk.abs() >= std::f64::consts::FRAC_PI_2 {
        return ProfileEval::AtLimit;
    }
    let ext = st.params.to_external(xk, index);
    if let Some((lo, hi)) = st.params.limits(index) {
        let margin = 1e-6 * (hi - lo);
        if ext <= lo + margin || ext >= hi - margin {
            return ProfileEval::AtLimit;
        }
    }

    // clone the converged set with the scanned parameter frozen at the
    // trial value and the other free parameters seeded at the minimum
    let mut sub = st.params.clone();
    if sub.fix_at(index, ext).is_err() {
        return ProfileEval::Value(f64::INFINITY);
    }
    for &j in &st.free {
        if j == index {
            continue;
        }
        let seed = st.params.to_external(st.x[j], j);
        if sub.set_seed(j, seed).is_err() {
            return ProfileEval::Value(f64::INFINITY);
        }
    }

    if sub.n_free() == 0 {
        let xint = sub.start_internal();
        let f = guard_nan(st.adapter.eval(&sub.externalize(&xint)));
        if !f.is_finite() && st.adapter.budget_exhausted() {
            return ProfileEval::Budget;
        }
        return ProfileEval::Value(f);
    }

    let inner_strategy = opts.strategy.saturating_sub(1);
    let (status, inner) = migrad(&mut sub, &mut st.adapter, opts, inner_strategy);
    match status {
        FitStatus::MaxCallsExceeded => ProfileEval::Budget,
        _ => ProfileEval::Value(guard_nan(inner.fval)),
    }
}
