#![allow(dead_code)]
#![allow(unused_assignments)]
use crate::error::MinimizerError;
use crate::minimize::bracket::bracket_minimum;
use crate::minimize::brent::brent_line;
use crate::minimize::{guard_nan, FitOptions, FitResult, FitStatus, Minimizer};
use crate::objective::{LineProjection, ObjFn, ObjectiveAdapter};
use crate::params::ParameterSet;
use ndarray::{Array1, Array2};
use std::fmt;

/// Guards the fractional convergence test against a zero denominator.
const TINY: f64 = 1e-25;
/// Fractional x-tolerance handed to the inner line minimizations.
const LINMIN_TOL: f64 = 2.0e-4;
/// Cap on direction-set cycles.
const ITMAX: usize = 200;

/// Direction-set minimizer.
///
/// Cycles line minimizations over a set of directions, initially the
/// coordinate axes of the free parameters scaled by their step sizes. After
/// each cycle the direction of largest decrease may be replaced by the net
/// displacement of the cycle, which turns the set toward the valley of the
/// function without ever needing derivatives.
#[derive(Clone)]
pub struct Powell {
    pub xmin: Array1<f64>,
    pub fmin: f64,
    pub status: FitStatus,
    pub fn_evals: usize,
    pub iters: usize,
    pub opts: FitOptions,
    f: Box<dyn ObjFn>,
}

impl Powell {
    pub fn new<F>(f: F) -> Self
    where
        F: ObjFn + 'static,
    {
        Powell::new_boxed(Box::new(f))
    }

    pub fn new_boxed(f: Box<dyn ObjFn>) -> Self {
        Powell {
            xmin: Array1::zeros(0),
            fmin: f64::NAN,
            status: FitStatus::Uninitialized,
            fn_evals: 0,
            iters: 0,
            opts: FitOptions::default(),
            f,
        }
    }

    pub fn with_options<F>(f: F, opts: FitOptions) -> Self
    where
        F: ObjFn + 'static,
    {
        let mut m = Powell::new_boxed(Box::new(f));
        m.opts = opts;
        m
    }

    /// Run the minimization from the parameter seeds.
    ///
    /// Convergence is declared when one full cycle changes the function by
    /// no more than the fractional tolerance,
    /// `2*(fp - fret) <= tol*(|fp| + |fret|) + TINY`.
    ///
    /// # Errors
    ///
    /// Configuration errors from `FitOptions::validate` and
    /// `ParameterSet::validate_ready`; no objective call is made on those
    /// paths.
    pub fn minimize(&mut self, params: &mut ParameterSet) -> Result<FitResult, MinimizerError> {
        self.opts.validate()?;
        params.validate_ready()?;

        params.reset_limit_flag();
        let mut adapter = ObjectiveAdapter::new_boxed(self.f.clone(), self.opts.max_calls);

        let n = params.n_params();
        let free = params.free_indices();
        let ftol = self.opts.tolerance;

        let mut p = params.start_internal();
        // identity direction set, each free axis scaled by its step
        let mut directions: Array2<f64> = Array2::zeros((n, n));
        for &i in &free {
            directions[[i, i]] = params.internal_step(i);
        }

        let mut fret = guard_nan(adapter.eval(&params.externalize(&p)));
        let mut pt = p.clone();

        let mut status = FitStatus::Failed;
        self.iters = 0;

        for iter in 1..=ITMAX {
            self.iters = iter;
            let fp = fret;
            let mut ibig = free[0];
            let mut del = 0.0;
            let mut hit_budget = false;

            // line minimization along every free direction
            for &i in &free {
                if adapter.budget_exhausted() {
                    hit_budget = true;
                    break;
                }
                let mut xit = directions.row(i).to_owned();
                let fptt = fret;
                let fnew = linmin(&mut p, &mut xit, params, &mut adapter);
                if fnew <= fptt {
                    fret = fnew;
                    if fptt - fret > del {
                        del = fptt - fret;
                        ibig = i;
                    }
                } else {
                    // the search returned nothing better (budget spent or
                    // invalid values); undo the move
                    p -= &xit;
                }
            }

            if hit_budget || adapter.budget_exhausted() {
                status = FitStatus::MaxCallsExceeded;
                break;
            }

            if 2.0 * (fp - fret) <= ftol * (fp.abs() + fret.abs()) + TINY {
                status = FitStatus::Success;
                break;
            }

            // extrapolated point and net cycle direction
            let ptt = 2.0 * &p - &pt;
            let mut xit = &p - &pt;
            pt = p.clone();

            let fptt = guard_nan(adapter.eval(&params.externalize(&ptt)));
            if fptt < fp {
                let t = 2.0 * (fp - 2.0 * fret + fptt) * (fp - fret - del).powi(2)
                    - del * (fp - fptt).powi(2);
                if t < 0.0 {
                    let fnew = linmin(&mut p, &mut xit, params, &mut adapter);
                    if fnew <= fret {
                        fret = fnew;
                        directions.row_mut(ibig).assign(&xit);
                    } else {
                        p -= &xit;
                    }
                }
            }

            if adapter.budget_exhausted() {
                status = FitStatus::MaxCallsExceeded;
                break;
            }
        }

        if status == FitStatus::Success && !fret.is_finite() {
            status = FitStatus::Failed;
        }

        if params.limit_hit() {
            tracing::warn!("trial values were clipped at parameter limits during the fit");
        }

        self.xmin = params.externalize(&p);
        self.fmin = if fret.is_finite() { fret } else { f64::NAN };
        self.status = status;
        self.fn_evals = adapter.n_calls();

        Ok(FitResult {
            status,
            xmin: self.xmin.clone(),
            fmin: self.fmin,
            fn_evals: self.fn_evals,
            parabolic_errors: None,
            minos_errors: None,
        })
    }

    pub fn xmin(&self) -> Array1<f64> {
        self.xmin.clone()
    }

    pub fn fmin(&self) -> f64 {
        self.fmin
    }

    pub fn status(&self) -> FitStatus {
        self.status
    }

    pub fn fn_evals(&self) -> usize {
        self.fn_evals
    }

    pub fn iters(&self) -> usize {
        self.iters
    }
}

/// Minimize along `xit` from `p`, then advance `p` to the minimum and
/// rescale `xit` to the actual displacement moved.
fn linmin(
    p: &mut Array1<f64>,
    xit: &mut Array1<f64>,
    params: &ParameterSet,
    adapter: &mut ObjectiveAdapter,
) -> f64 {
    let line = LineProjection::new(p.clone(), xit.clone());
    let bracket = bracket_minimum(&line, params, adapter, 0.0, 1.0);
    let lm = brent_line(&line, params, adapter, &bracket, LINMIN_TOL);
    *xit *= lm.xmin;
    *p += &*xit;
    lm.fmin
}

impl Minimizer for Powell {
    fn minimize(&mut self, params: &mut ParameterSet) -> Result<FitResult, MinimizerError> {
        Powell::minimize(self, params)
    }
}

impl fmt::Debug for Powell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Powell")
            .field("xmin", &self.xmin)
            .field("fmin", &self.fmin)
            .field("status", &self.status)
            .field("fn_evals", &self.fn_evals)
            .field("iters", &self.iters)
            .finish()
    }
}
