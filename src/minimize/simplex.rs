#![allow(dead_code)]
#![allow(unused_assignments)]
use crate::error::MinimizerError;
use crate::minimize::{guard_nan, FitOptions, FitResult, FitStatus, Minimizer};
use crate::objective::{ObjFn, ObjectiveAdapter};
use crate::params::ParameterSet;
use ndarray::{Array1, Array2, Axis};
use std::fmt;

/// Guards the relative spread against a zero denominator.
const TINY: f64 = 1e-10;
/// Cap on amoeba cycles when the budget never runs out.
const ITMAX: usize = 5000;

/// Downhill simplex minimizer.
///
/// Works on a simplex of `n_free + 1` vertices in the internal coordinate
/// space. A reflected point that beats the current best is accepted as-is;
/// there is no expansion move, so the simplex never overshoots along a
/// single lucky direction. Failed reflections fall back to one-dimensional
/// contraction and finally to shrinking the whole simplex onto the best
/// vertex.
#[derive(Clone)]
pub struct Simplex {
    pub xmin: Array1<f64>,
    pub fmin: f64,
    pub status: FitStatus,
    pub fn_evals: usize,
    pub iters: usize,
    pub opts: FitOptions,
    f: Box<dyn ObjFn>,
}

impl Simplex {
    pub fn new<F>(f: F) -> Self
    where
        F: ObjFn + 'static,
    {
        Simplex::new_boxed(Box::new(f))
    }

    pub fn new_boxed(f: Box<dyn ObjFn>) -> Self {
        Simplex {
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
        let mut m = Simplex::new_boxed(Box::new(f));
        m.opts = opts;
        m
    }

    /// Run the minimization from the parameter seeds.
    ///
    /// Convergence is declared when the relative spread of the vertex
    /// values, `2*|y_hi - y_lo| / (|y_hi| + |y_lo| + TINY)`, drops below
    /// the tolerance. The best vertex is then swapped into slot 0 and
    /// reported.
    ///
    /// # Errors
    ///
    /// `InvalidParameters` unless at least two parameters are free, plus
    /// the usual configuration errors. No objective call is made on the
    /// error paths.
    pub fn minimize(&mut self, params: &mut ParameterSet) -> Result<FitResult, MinimizerError> {
        self.opts.validate()?;
        params.validate_ready()?;
        if params.n_free() < 2 {
            return Err(MinimizerError::InvalidParameters(format!(
                "simplex requires at least two free parameters, got {}",
                params.n_free()
            )));
        }

        params.reset_limit_flag();
        let mut adapter = ObjectiveAdapter::new_boxed(self.f.clone(), self.opts.max_calls);

        let free = params.free_indices();
        let mpts = free.len() + 1;
        let ftol = self.opts.tolerance;

        let mut p = initial_simplex(params, &free);
        let mut y = Array1::zeros(mpts);
        for i in 0..mpts {
            let row = p.row(i).to_owned();
            y[i] = guard_nan(adapter.eval(&params.externalize(&row)));
        }
        let mut psum = p.sum_axis(Axis(0));

        let mut status = FitStatus::Failed;
        self.iters = 0;

        loop {
            self.iters += 1;

            // rank the vertices: best, worst and second worst
            let mut ilo = 0;
            let (mut ihi, mut inhi) = if y[0] > y[1] { (0, 1) } else { (1, 0) };
            for i in 0..mpts {
                if y[i] <= y[ilo] {
                    ilo = i;
                }
                if y[i] > y[ihi] {
                    inhi = ihi;
                    ihi = i;
                } else if y[i] > y[inhi] && i != ihi {
                    inhi = i;
                }
            }

            let rtol = 2.0 * (y[ihi] - y[ilo]).abs() / (y[ihi].abs() + y[ilo].abs() + TINY);
            if rtol < ftol {
                swap_rows(&mut p, 0, ilo);
                y.swap(0, ilo);
                status = FitStatus::Success;
                break;
            }

            if adapter.budget_exhausted() {
                swap_rows(&mut p, 0, ilo);
                y.swap(0, ilo);
                status = FitStatus::MaxCallsExceeded;
                break;
            }

            if self.iters > ITMAX {
                swap_rows(&mut p, 0, ilo);
                y.swap(0, ilo);
                break;
            }

            // reflect the worst vertex through the opposite face
            let ytry = amotry(
                &mut p,
                &mut y,
                &mut psum,
                ihi,
                -1.0,
                &free,
                params,
                &mut adapter,
            );

            if ytry <= y[ilo] {
                // good enough as-is, no expansion move
            } else if ytry >= y[inhi] {
                // reflection failed, contract away from the worst vertex
                let ysave = y[ihi];
                let ytry = amotry(
                    &mut p,
                    &mut y,
                    &mut psum,
                    ihi,
                    0.5,
                    &free,
                    params,
                    &mut adapter,
                );
                if ytry >= ysave {
                    // still no good, shrink everything onto the best vertex
                    for i in 0..mpts {
                        if i == ilo {
                            continue;
                        }
                        for &j in &free {
                            p[[i, j]] = 0.5 * (p[[i, j]] + p[[ilo, j]]);
                        }
                        let row = p.row(i).to_owned();
                        y[i] = guard_nan(adapter.eval(&params.externalize(&row)));
                    }
                    psum = p.sum_axis(Axis(0));
                }
            }
        }

        if status == FitStatus::Success && !y[0].is_finite() {
            status = FitStatus::Failed;
        }

        if params.limit_hit() {
            tracing::warn!("trial values were clipped at parameter limits during the fit");
        }

        let best = p.row(0).to_owned();
        self.xmin = params.externalize(&best);
        self.fmin = if y[0].is_finite() { y[0] } else { f64::NAN };
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

/// Build the starting simplex: vertex 0 sits at the seed, vertex k steps
/// free parameter k up by its step size and every other free parameter
/// down by its own step size. Fixed parameters hold their seeds in every
/// vertex.
///
/// The deliberate asymmetry (other parameters move down, not just the one
/// axis up) spreads the simplex across all free directions from the first
/// move on.
fn initial_simplex(params: &mut ParameterSet, free: &[usize]) -> Array2<f64> {
    let x0 = params.start_internal();
    let n = x0.len();
    let mpts = free.len() + 1;

    let mut p = Array2::zeros((mpts, n));
    for i in 0..mpts {
        p.row_mut(i).assign(&x0);
    }
    for (k, &jk) in free.iter().enumerate() {
        for &j in free {
            let step = params.internal_step(j);
            if j == jk {
                p[[k + 1, j]] += step;
            } else {
                p[[k + 1, j]] -= step;
            }
        }
    }
    p
}

/// Trial move of the worst vertex: reflect (`fac = -1`) or contract
/// (`fac = 0.5`) through the centroid of the others, keeping the running
/// column sums up to date when the move is accepted.
#[allow(clippy::too_many_arguments)]
fn amotry(
    p: &mut Array2<f64>,
    y: &mut Array1<f64>,
    psum: &mut Array1<f64>,
    ihi: usize,
    fac: f64,
    free: &[usize],
    params: &ParameterSet,
    adapter: &mut ObjectiveAdapter,
) -> f64 {
    let mpts = p.nrows();
    let fac1 = (1.0 - fac) / (mpts - 1) as f64;
    let fac2 = fac1 - fac;

    let mut ptry = p.row(ihi).to_owned();
    for &j in free {
        ptry[j] = psum[j] * fac1 - p[[ihi, j]] * fac2;
    }

    let ytry = guard_nan(adapter.eval(&params.externalize(&ptry)));
    if ytry < y[ihi] {
        y[ihi] = ytry;
        for &j in free {
            psum[j] += ptry[j] - p[[ihi, j]];
            p[[ihi, j]] = ptry[j];
        }
    }
    ytry
}

fn swap_rows(p: &mut Array2<f64>, a: usize, b: usize) {
    if a == b {
        return;
    }
    let tmp = p.row(a).to_owned();
    let rb = p.row(b).to_owned();
    p.row_mut(a).assign(&rb);
    p.row_mut(b).assign(&tmp);
}

impl Minimizer for Simplex {
    fn minimize(&mut self, params: &mut ParameterSet) -> Result<FitResult, MinimizerError> {
        Simplex::minimize(self, params)
    }
}

impl fmt::Debug for Simplex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Simplex")
            .field("xmin", &self.xmin)
            .field("fmin", &self.fmin)
            .field("status", &self.status)
            .field("fn_evals", &self.fn_evals)
            .field("iters", &self.iters)
            .finish()
    }
}

#[cfg(test)]
mod simplex_tests {
    use super::*;
    use crate::objective::MultiDimFn;
    use float_cmp::F64Margin;
    use ndarray::Array1;

    const MARGIN: F64Margin = F64Margin {
        epsilon: 1e-9,
        ulps: 10,
    };

    fn unbounded(n: usize, step: f64) -> ParameterSet {
        let mut params = ParameterSet::new();
        for i in 0..n {
            params.init_param(i, step, 0.0, 0.0, false).unwrap();
        }
        params
    }

    #[test]
    fn test_initial_simplex_construction() {
        // free, fixed, free: the fixed column must stay put and each
        // off-seed vertex moves its own axis up and the other axis down
        let mut params = ParameterSet::new();
        params.init_param(0, 0.5, 0.0, 0.0, false).unwrap();
        params.init_param(1, 0.3, 0.0, 0.0, true).unwrap();
        params.init_param(2, 0.2, 0.0, 0.0, false).unwrap();
        params.set_seed(0, 1.0).unwrap();
        params.set_seed(1, 4.0).unwrap();
        params.set_seed(2, 2.0).unwrap();

        let free = params.free_indices();
        let p = initial_simplex(&mut params, &free);

        assert_eq!(p.nrows(), 3);
        // vertex 0: the seed
        assert_eq!(p[[0, 0]], 1.0);
        assert_eq!(p[[0, 1]], 4.0);
        assert_eq!(p[[0, 2]], 2.0);
        // vertex 1: param 0 up by 0.5, param 2 down by 0.2
        assert_eq!(p[[1, 0]], 1.5);
        assert_eq!(p[[1, 1]], 4.0);
        assert_eq!(p[[1, 2]], 1.8);
        // vertex 2: param 0 down by 0.5, param 2 up by 0.2
        assert_eq!(p[[2, 0]], 0.5);
        assert_eq!(p[[2, 1]], 4.0);
        assert_eq!(p[[2, 2]], 2.2);
    }

    #[test]
    fn test_2d_quadratic() {
        let func = |x: &Array1<f64>| (x[0] - 2.0).powi(2) + (x[1] + 1.0).powi(2);
        let mut params = unbounded(2, 0.5);
        let mut simplex = Simplex::new(MultiDimFn::new(func));
        simplex.opts.tolerance = 1e-10;

        let result = simplex.minimize(&mut params).unwrap();

        assert_eq!(result.status, FitStatus::Success);
        assert!((result.xmin[0] - 2.0).abs() < 1e-3);
        assert!((result.xmin[1] + 1.0).abs() < 1e-3);
        assert!(result.fmin < 1e-6);
    }

    #[test]
    fn test_rosenbrock() {
        let rosenbrock =
            |x: &Array1<f64>| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0].powi(2)).powi(2);
        let mut params = unbounded(2, 0.1);
        params.set_seed(0, -1.2).unwrap();
        params.set_seed(1, 1.0).unwrap();

        let mut simplex = Simplex::new(MultiDimFn::new(rosenbrock));
        simplex.opts.tolerance = 1e-8;
        simplex.opts.max_calls = 10_000;

        let result = simplex.minimize(&mut params).unwrap();

        assert_eq!(result.status, FitStatus::Success);
        assert!(result.fmin < 1e-3);
        assert!((result.xmin[0] - 1.0).abs() < 0.05);
        assert!((result.xmin[1] - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_requires_two_free_parameters() {
        let mut params = ParameterSet::new();
        params.init_param(0, 0.5, 0.0, 0.0, false).unwrap();
        params.init_param(1, 0.5, 0.0, 0.0, true).unwrap();

        let mut simplex = Simplex::new(MultiDimFn::new(|x: &Array1<f64>| x[0] * x[0]));
        assert!(matches!(
            simplex.minimize(&mut params),
            Err(MinimizerError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_call_budget_is_respected() {
        let func = |x: &Array1<f64>| (x[0] - 2.0).powi(2) + (x[1] + 1.0).powi(2);
        let mut params = unbounded(2, 0.5);

        let mut simplex = Simplex::new(MultiDimFn::new(func));
        simplex.opts.tolerance = 1e-12;
        simplex.opts.max_calls = 5;

        let result = simplex.minimize(&mut params).unwrap();

        assert_eq!(result.status, FitStatus::MaxCallsExceeded);
        assert_eq!(result.fn_evals, 5);
        // best-effort result is still populated
        assert!(result.fmin.is_finite());
    }

    #[test]
    fn test_fixed_parameter_never_moves() {
        let func = |x: &Array1<f64>| {
            (x[0] - 2.0).powi(2) + (x[1] - 5.0).powi(2) + (x[2] + 3.0).powi(2)
        };
        let mut params = unbounded(3, 0.5);
        params.init_param(2, 0.5, 0.0, 0.0, true).unwrap();
        params.set_seed(2, 0.75).unwrap();

        let mut simplex = Simplex::new(MultiDimFn::new(func));
        simplex.opts.tolerance = 1e-10;
        let result = simplex.minimize(&mut params).unwrap();

        assert_eq!(result.xmin[2], 0.75);
        assert!((result.xmin[0] - 2.0).abs() < 1e-3);
        assert!((result.xmin[1] - 5.0).abs() < 1e-3);
    }

    #[test]
    fn test_never_success_with_nan() {
        // invalid everywhere: the amoeba can only see infinities
        let func = |_x: &Array1<f64>| f64::NAN;
        let mut params = unbounded(2, 0.5);

        let mut simplex = Simplex::new(MultiDimFn::new(func));
        simplex.opts.max_calls = 200;
        let result = simplex.minimize(&mut params).unwrap();

        assert_ne!(result.status, FitStatus::Success);
        assert!(result.fmin.is_nan());
    }

    #[test]
    fn test_bounded_parameters_stay_inside() {
        let func = |x: &Array1<f64>| (x[0] - 2.0).powi(2) + (x[1] + 1.0).powi(2);
        let mut params = ParameterSet::new();
        params.init_param(0, 0.5, 0.0, 10.0, false).unwrap();
        params.init_param(1, 0.5, -5.0, 5.0, false).unwrap();
        params.set_seed(0, 5.0).unwrap();
        params.set_seed(1, 2.0).unwrap();

        let mut simplex = Simplex::new(MultiDimFn::new(func));
        simplex.opts.tolerance = 1e-10;
        let result = simplex.minimize(&mut params).unwrap();

        assert_eq!(result.status, FitStatus::Success);
        assert!((0.0..=10.0).contains(&result.xmin[0]));
        assert!((-5.0..=5.0).contains(&result.xmin[1]));
        assert!((result.xmin[0] - 2.0).abs() < 1e-3);
        assert!((result.xmin[1] + 1.0).abs() < 1e-3);
    }
}
