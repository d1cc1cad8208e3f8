#![allow(dead_code)]
#![allow(unused_assignments)]
use crate::error::MinimizerError;
use crate::minimize::bracket::{bracket_minimum, Bracket};
use crate::minimize::{guard_nan, FitOptions, FitResult, FitStatus, Minimizer};
use crate::objective::{LineProjection, ObjFn, ObjectiveAdapter};
use crate::params::ParameterSet;
use ndarray::Array1;
use std::fmt;

/// Golden section fraction.
const CGOLD: f64 = 0.3819660;
/// Protects the x-tolerance when the minimum sits at zero.
const ZEPS: f64 = f64::EPSILON * 1e-3;
/// Iteration cap for one line minimization.
const ITMAX: usize = 100;

/// Outcome of a one-dimensional line minimization.
#[derive(Debug, Clone, Copy)]
pub struct LineMin {
    pub xmin: f64,
    pub fmin: f64,
    pub iters: usize,
    pub converged: bool,
    pub hit_budget: bool,
}

/// Minimize the objective restricted to `line` inside `bracket` using
/// Brent's method.
///
/// A parabolic step through the three best points is accepted only when it
/// falls inside the bracket and moves less than half the step before last;
/// otherwise the interval shrinks by golden section. Convergence is reached
/// when `x` sits within `2*tol1 - (b-a)/2` of the interval midpoint, with
/// `tol1 = tol*|x| + ZEPS`.
///
/// Spending the call budget ends the search immediately with the best point
/// found so far; that is a normal outcome, not an error.
pub fn brent_line(
    line: &LineProjection,
    params: &ParameterSet,
    adapter: &mut ObjectiveAdapter,
    bracket: &Bracket,
    tol: f64,
) -> LineMin {
    let mut a = bracket.ax.min(bracket.cx);
    let mut b = bracket.ax.max(bracket.cx);

    let mut x = bracket.bx;
    let mut w = bracket.bx;
    let mut v = bracket.bx;
    // middle value is already known from bracketing
    let mut fx = bracket.fb;
    let mut fw = fx;
    let mut fv = fx;

    let mut d: f64 = 0.0;
    let mut e: f64 = 0.0;

    for iter in 0..ITMAX {
        if adapter.budget_exhausted() {
            return LineMin {
                xmin: x,
                fmin: fx,
                iters: iter,
                converged: false,
                hit_budget: true,
            };
        }

        let xm = 0.5 * (a + b);
        let tol1 = tol * x.abs() + ZEPS;
        let tol2 = 2.0 * tol1;

        if (x - xm).abs() <= tol2 - 0.5 * (b - a) {
            return LineMin {
                xmin: x,
                fmin: fx,
                iters: iter,
                converged: true,
                hit_budget: false,
            };
        }

        if e.abs() > tol1 {
            // Parabolic fit through x, w, v
            let r = (x - w) * (fx - fv);
            let mut q = (x - v) * (fx - fw);
            let mut p = (x - v) * q - (x - w) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            let etemp = e;
            e = d;

            if p.abs() >= (0.5 * q * etemp).abs() || p <= q * (a - x) || p >= q * (b - x) {
                // Parabolic step rejected, golden section into the larger side
                e = if x >= xm { a - x } else { b - x };
                d = CGOLD * e;
            } else {
                d = p / q;
                let u = x + d;
                if u - a < tol2 || b - u < tol2 {
                    d = tol1.copysign(xm - x);
                }
            }
        } else {
            e = if x >= xm { a - x } else { b - x };
            d = CGOLD * e;
        }

        let u = if d.abs() >= tol1 {
            x + d
        } else {
            x + tol1.copysign(d)
        };
        let fu = guard_nan(line.eval(params, adapter, u));

        if fu <= fx {
            if u >= x {
                a = x;
            } else {
                b = x;
            }
            v = w;
            w = x;
            x = u;
            fv = fw;
            fw = fx;
            fx = fu;
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                v = w;
                w = u;
                fv = fw;
                fw = fu;
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        }
    }

    LineMin {
        xmin: x,
        fmin: fx,
        iters: ITMAX,
        converged: false,
        hit_budget: false,
    }
}

/// One-dimensional minimizer for a single free parameter.
///
/// Brackets the minimum around the seed and contracts with Brent's method
/// on the internal axis of the free parameter. Any other parameters must
/// be fixed; they keep their seeds.
#[derive(Clone)]
pub struct Brent {
    pub xmin: Array1<f64>,
    pub fmin: f64,
    pub status: FitStatus,
    pub fn_evals: usize,
    pub opts: FitOptions,
    f: Box<dyn ObjFn>,
}

impl Brent {
    pub fn new<F>(f: F) -> Self
    where
        F: ObjFn + 'static,
    {
        Brent::new_boxed(Box::new(f))
    }

    pub fn new_boxed(f: Box<dyn ObjFn>) -> Self {
        Brent {
            xmin: Array1::zeros(0),
            fmin: f64::NAN,
            status: FitStatus::Uninitialized,
            fn_evals: 0,
            opts: FitOptions::default(),
            f,
        }
    }

    pub fn with_options<F>(f: F, opts: FitOptions) -> Self
    where
        F: ObjFn + 'static,
    {
        let mut m = Brent::new_boxed(Box::new(f));
        m.opts = opts;
        m
    }

    /// Run the minimization.
    ///
    /// # Errors
    ///
    /// `InvalidParameters` unless the set holds exactly one free parameter,
    /// plus the usual configuration errors from `FitOptions::validate` and
    /// `ParameterSet::validate_ready`. No objective call is made on the
    /// error paths.
    pub fn minimize(&mut self, params: &mut ParameterSet) -> Result<FitResult, MinimizerError> {
        self.opts.validate()?;
        params.validate_ready()?;
        if params.n_free() != 1 {
            return Err(MinimizerError::InvalidParameters(format!(
                "Brent requires exactly one free parameter, got {}",
                params.n_free()
            )));
        }

        params.reset_limit_flag();
        let mut adapter = ObjectiveAdapter::new_boxed(self.f.clone(), self.opts.max_calls);

        let x0 = params.start_internal();
        let k = params.free_indices()[0];
        let step = params.internal_step(k);

        let mut dir = Array1::zeros(x0.len());
        dir[k] = 1.0;
        let line = LineProjection::new(x0.clone(), dir);

        // bracket around the seed, then contract
        let bracket = bracket_minimum(&line, params, &mut adapter, -step, step);
        let lm = brent_line(&line, params, &mut adapter, &bracket, self.opts.tolerance);

        let mut best = x0;
        best[k] += lm.xmin;

        let status = if lm.hit_budget || adapter.budget_exhausted() {
            FitStatus::MaxCallsExceeded
        } else if !lm.fmin.is_finite() {
            FitStatus::Failed
        } else {
            FitStatus::Success
        };

        if params.limit_hit() {
            tracing::warn!("trial values were clipped at parameter limits during the fit");
        }

        self.xmin = params.externalize(&best);
        self.fmin = if lm.fmin.is_finite() { lm.fmin } else { f64::NAN };
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
}

impl Minimizer for Brent {
    fn minimize(&mut self, params: &mut ParameterSet) -> Result<FitResult, MinimizerError> {
        Brent::minimize(self, params)
    }
}

impl fmt::Debug for Brent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Brent")
            .field("xmin", &self.xmin)
            .field("fmin", &self.fmin)
            .field("status", &self.status)
            .field("fn_evals", &self.fn_evals)
            .finish()
    }
}
