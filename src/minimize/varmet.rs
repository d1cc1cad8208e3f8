#![allow(dead_code)]
pub mod derivatives;
pub mod matrix;
pub mod minos;

use crate::error::MinimizerError;
use crate::minimize::bracket::bracket_minimum;
use crate::minimize::brent::brent_line;
use crate::minimize::{guard_nan, FitOptions, FitResult, FitStatus, Minimizer};
use crate::objective::{LineProjection, ObjFn, ObjectiveAdapter};
use crate::params::ParameterSet;
use derivatives::gradient;
use matrix::PackedSym;
use ndarray::{Array1, Array2};
use std::fmt;

pub use minos::{MinosDirection, MinosOutcome, MinosResult};

/// Eigenvalue floor, relative to the largest eigenvalue, below which the
/// matrix estimate is repaired.
const EPS_PDF: f64 = 1e-6;
/// Fractional tolerance for the inner line searches. The update formula
/// only needs a rough minimum along the search direction.
const LINE_TOL: f64 = 0.05;
/// Cap on main-loop iterations.
const ITMAX: usize = 200;

/// Gradient-based minimizer with a running inverse-Hessian estimate.
///
/// Each iteration takes a quasi-Newton step `-V g` found by numerical
/// differentiation, line-minimizes along it, and applies a rank-2 update to
/// `V`. Convergence is declared on the estimated distance to minimum,
/// `EDM = 0.5 * g' V g`, falling below `0.1 * tolerance * up`. On top of
/// the fitted values it provides parabolic errors, the full covariance
/// matrix and asymmetric profile errors.
#[derive(Clone)]
pub struct VariableMetric {
    pub xmin: Array1<f64>,
    pub fmin: f64,
    pub status: FitStatus,
    pub fn_evals: usize,
    pub iters: usize,
    pub edm: f64,
    pub opts: FitOptions,
    f: Box<dyn ObjFn>,
    state: Option<VmState>,
}

/// Covariance description of a usable fit, in external units.
#[derive(Clone, Debug)]
pub struct ErrorMatrix {
    /// Covariance of the external parameter values. Rows and columns of
    /// fixed parameters are zero.
    pub covariance: Array2<f64>,
    /// Global correlation coefficient per parameter, in [0, 1).
    pub global_correlations: Array1<f64>,
    /// True when the matrix estimate had to be repaired during the fit.
    pub forced_pos_def: bool,
}

/// Converged internal state kept for the error analyses.
#[derive(Clone, Debug)]
pub(crate) struct VmState {
    pub(crate) params: ParameterSet,
    pub(crate) adapter: ObjectiveAdapter,
    pub(crate) x: Array1<f64>,
    pub(crate) fval: f64,
    pub(crate) vhmat: PackedSym,
    pub(crate) gsteps: Array1<f64>,
    pub(crate) free: Vec<usize>,
    pub(crate) forced_posdef: bool,
}

impl VariableMetric {
    pub fn new<F>(f: F) -> Self
    where
        F: ObjFn + 'static,
    {
        VariableMetric::new_boxed(Box::new(f))
    }

    pub fn new_boxed(f: Box<dyn ObjFn>) -> Self {
        VariableMetric {
            xmin: Array1::zeros(0),
            fmin: f64::NAN,
            status: FitStatus::Uninitialized,
            fn_evals: 0,
            iters: 0,
            edm: f64::INFINITY,
            opts: FitOptions::default(),
            f,
            state: None,
        }
    }

    pub fn with_options<F>(f: F, opts: FitOptions) -> Self
    where
        F: ObjFn + 'static,
    {
        let mut m = VariableMetric::new_boxed(Box::new(f));
        m.opts = opts;
        m
    }

    /// Run the minimization from the parameter seeds.
    ///
    /// A run at strategy 0 that fails outright is retried once at
    /// strategy 1 on the remaining call budget. A run that needed the
    /// matrix repair reports `NotPositiveDefinite` instead of `Success`;
    /// the values are still usable but the error estimates are suspect.
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
        self.state = None;
        let mut adapter = ObjectiveAdapter::new_boxed(self.f.clone(), self.opts.max_calls);

        let (mut status, mut st) = migrad(params, &mut adapter, &self.opts, self.opts.strategy);
        if status == FitStatus::Failed && self.opts.strategy == 0 && !adapter.budget_exhausted() {
            tracing::warn!("minimization failed at strategy 0, retrying at strategy 1");
            let (retry_status, retry_st) = migrad(params, &mut adapter, &self.opts, 1);
            status = retry_status;
            st = retry_st;
        }

        if status == FitStatus::Success && st.forced_posdef {
            status = FitStatus::NotPositiveDefinite;
        }
        if status == FitStatus::Success && !st.fval.is_finite() {
            status = FitStatus::Failed;
        }
        if params.limit_hit() {
            tracing::warn!("trial values were clipped at parameter limits during the fit");
        }

        let n = params.n_params();
        let free = params.free_indices();

        self.xmin = params.externalize(&st.x);
        self.fmin = if st.fval.is_finite() { st.fval } else { f64::NAN };
        self.status = status;
        self.fn_evals = adapter.n_calls();
        self.iters = st.iters;
        self.edm = st.edm;

        // parabolic errors in external units
        let mut perr = Array1::zeros(n);
        for (a, &i) in free.iter().enumerate() {
            let vkk = st.vhmat.get(a, a);
            if vkk > 0.0 {
                perr[i] = (2.0 * self.opts.up * vkk).sqrt() * params.dext_dint(st.x[i], i).abs();
            }
        }

        let result = FitResult {
            status,
            xmin: self.xmin.clone(),
            fmin: self.fmin,
            fn_evals: self.fn_evals,
            parabolic_errors: Some(perr),
            minos_errors: None,
        };

        if status.usable() {
            self.state = Some(VmState {
                params: params.clone(),
                adapter,
                x: st.x,
                fval: st.fval,
                vhmat: st.vhmat,
                gsteps: st.gsteps,
                free,
                forced_posdef: st.forced_posdef,
            });
        }
        Ok(result)
    }

    /// Run the minimization, then the profile-error scan over every free
    /// parameter, filling `minos_errors` in the result. Entries of fixed
    /// parameters and of scans that found no crossing are NaN.
    pub fn minimize_with_minos(
        &mut self,
        params: &mut ParameterSet,
    ) -> Result<FitResult, MinimizerError> {
        let mut result = self.minimize(params)?;
        if !result.status.usable() {
            return Ok(result);
        }
        let mut errs = vec![(f64::NAN, f64::NAN); params.n_params()];
        for k in params.free_indices() {
            let scan = self.minos(k)?;
            errs[k] = (
                scan.lower.delta().unwrap_or(f64::NAN),
                scan.upper.delta().unwrap_or(f64::NAN),
            );
        }
        result.minos_errors = Some(errs);
        Ok(result)
    }

    /// Asymmetric profile errors for one free parameter.
    ///
    /// Each direction searches for the parameter value at which the
    /// objective, re-minimized over all other free parameters, crosses
    /// `fmin + up`. Draws on the call budget left over from `minimize`.
    ///
    /// # Errors
    ///
    /// `InvalidParameters` when no usable minimum is stored or the
    /// parameter is fixed, `IndexOutOfRange` for a bad index.
    pub fn minos(&mut self, index: usize) -> Result<MinosResult, MinimizerError> {
        let opts = self.opts;
        let st = self.state.as_mut().ok_or_else(|| {
            MinimizerError::InvalidParameters(
                "profile errors need a usable minimum, run minimize first".to_string(),
            )
        })?;
        if index >= st.params.n_params() {
            return Err(MinimizerError::IndexOutOfRange(index));
        }
        if st.params.is_fixed(index) {
            return Err(MinimizerError::InvalidParameters(format!(
                "parameter {index} is fixed, it has no profile error"
            )));
        }
        Ok(minos::minos_search(st, &opts, index))
    }

    /// External covariance matrix and global correlations of the last
    /// usable fit, or None when no such fit is stored.
    pub fn error_matrix(&self) -> Option<ErrorMatrix> {
        let st = self.state.as_ref()?;
        let n = st.params.n_params();
        let scale = 2.0 * self.opts.up;

        let mut cov = Array2::zeros((n, n));
        for (a, &i) in st.free.iter().enumerate() {
            let ji = st.params.dext_dint(st.x[i], i);
            for (b, &j) in st.free.iter().enumerate() {
                let jj = st.params.dext_dint(st.x[j], j);
                cov[[i, j]] = scale * st.vhmat.get(a, b) * ji * jj;
            }
        }

        let mut glcc = Array1::zeros(n);
        if let Some(inv) = st.vhmat.inverse() {
            for (a, &i) in st.free.iter().enumerate() {
                let prod = st.vhmat.get(a, a) * inv.get(a, a);
                if prod > 1.0 {
                    glcc[i] = (1.0 - 1.0 / prod).sqrt();
                }
            }
        }

        Some(ErrorMatrix {
            covariance: cov,
            global_correlations: glcc,
            forced_pos_def: st.forced_posdef,
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

    pub fn edm(&self) -> f64 {
        self.edm
    }
}

/// Phases of the main loop. `migrad` advances through these explicitly
/// rather than by fall-through.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Phase {
    Seed,
    Iterate,
    Done(FitStatus),
}

/// Working state of one `migrad` run, in internal coordinates.
#[derive(Clone, Debug)]
pub(crate) struct MigradState {
    pub(crate) x: Array1<f64>,
    pub(crate) fval: f64,
    pub(crate) grad: Array1<f64>,
    pub(crate) g2: Array1<f64>,
    pub(crate) gsteps: Array1<f64>,
    pub(crate) vhmat: PackedSym,
    pub(crate) edm: f64,
    pub(crate) dcovar: f64,
    pub(crate) forced_posdef: bool,
    pub(crate) iters: usize,
}

/// One complete gradient run at a fixed strategy. Returns best-effort
/// state whatever the outcome; the caller decides what to keep.
pub(crate) fn migrad(
    params: &mut ParameterSet,
    adapter: &mut ObjectiveAdapter,
    opts: &FitOptions,
    strategy: usize,
) -> (FitStatus, MigradState) {
    let n = params.n_params();
    let free = params.free_indices();
    let nf = free.len();

    let mut st = MigradState {
        x: Array1::zeros(n),
        fval: f64::NAN,
        grad: Array1::zeros(n),
        g2: Array1::zeros(n),
        gsteps: Array1::zeros(n),
        vhmat: PackedSym::zeros(nf),
        edm: f64::INFINITY,
        dcovar: 1.0,
        forced_posdef: false,
        iters: 0,
    };

    let edm_goal = 0.1 * opts.tolerance * opts.up;
    let mut line_fails = 0usize;
    let mut phase = Phase::Seed;

    loop {
        match phase {
            Phase::Seed => {
                st.x = params.start_internal();
                st.fval = guard_nan(adapter.eval(&params.externalize(&st.x)));
                if !st.fval.is_finite() {
                    phase = Phase::Done(if adapter.budget_exhausted() {
                        FitStatus::MaxCallsExceeded
                    } else {
                        FitStatus::Failed
                    });
                    continue;
                }

                let est = gradient(
                    &st.x, st.fval, params, adapter, &free, strategy, opts.up, None,
                );
                st.grad = est.grad;
                st.g2 = est.g2;
                st.gsteps = est.steps;
                if adapter.budget_exhausted() {
                    phase = Phase::Done(FitStatus::MaxCallsExceeded);
                    continue;
                }

                st.vhmat = seed_matrix(params, &free, &st.g2);
                st.dcovar = 1.0;
                let gf = gather(&st.grad, &free);
                st.edm = 0.5 * st.vhmat.quad_form(&gf) * (1.0 + 3.0 * st.dcovar);
                phase = if st.edm < edm_goal {
                    Phase::Done(FitStatus::Success)
                } else {
                    Phase::Iterate
                };
            }

            Phase::Iterate => {
                if adapter.budget_exhausted() {
                    phase = Phase::Done(FitStatus::MaxCallsExceeded);
                    continue;
                }
                if st.iters >= ITMAX {
                    phase = Phase::Done(FitStatus::Failed);
                    continue;
                }
                st.iters += 1;

                let gf = gather(&st.grad, &free);
                let mut step_f = st.vhmat.mat_vec(&gf);
                step_f.mapv_inplace(|v| -v);
                let mut gdel = step_f.dot(&gf);
                if gdel >= 0.0 {
                    // the search direction points uphill, the matrix
                    // estimate has gone bad
                    repair_matrix(&mut st, params, &free);
                    step_f = st.vhmat.mat_vec(&gf);
                    step_f.mapv_inplace(|v| -v);
                    gdel = step_f.dot(&gf);
                    if gdel >= 0.0 {
                        phase = Phase::Done(FitStatus::Failed);
                        continue;
                    }
                }

                let line = LineProjection::new(st.x.clone(), scatter(&step_f, &free, n));
                let bracket = bracket_minimum(&line, params, adapter, 0.0, 1.0);
                let lm = brent_line(&line, params, adapter, &bracket, LINE_TOL);

                if !(lm.fmin < st.fval) || lm.xmin == 0.0 {
                    if lm.hit_budget || adapter.budget_exhausted() {
                        phase = Phase::Done(FitStatus::MaxCallsExceeded);
                        continue;
                    }
                    line_fails += 1;
                    tracing::debug!("line search found no improvement, attempt {line_fails}");
                    if line_fails > 1 {
                        phase = Phase::Done(FitStatus::Failed);
                        continue;
                    }
                    repair_matrix(&mut st, params, &free);
                    continue;
                }
                line_fails = 0;

                let dx_f = step_f.mapv(|v| v * lm.xmin);
                st.x = &st.x + &scatter(&dx_f, &free, n);
                st.fval = lm.fmin;
                if lm.hit_budget || adapter.budget_exhausted() {
                    phase = Phase::Done(FitStatus::MaxCallsExceeded);
                    continue;
                }

                let g_old = gf;
                let est = gradient(
                    &st.x,
                    st.fval,
                    params,
                    adapter,
                    &free,
                    strategy,
                    opts.up,
                    Some(&st.gsteps),
                );
                st.grad = est.grad;
                st.g2 = est.g2;
                st.gsteps = est.steps;
                if adapter.budget_exhausted() {
                    phase = Phase::Done(FitStatus::MaxCallsExceeded);
                    continue;
                }
                let g_new = gather(&st.grad, &free);

                // rank-2 update of the inverse-Hessian estimate
                let gamma = &g_new - &g_old;
                let delgam = dx_f.dot(&gamma);
                let vg = st.vhmat.mat_vec(&gamma);
                let gvg = gamma.dot(&vg);
                if delgam > 0.0 && gvg > 0.0 {
                    let before = st.vhmat.clone();
                    for a in 0..nf {
                        for b in a..nf {
                            let upd = dx_f[a] * dx_f[b] / delgam - vg[a] * vg[b] / gvg;
                            st.vhmat.add(a, b, upd);
                        }
                    }
                    st.dcovar = 0.5 * (st.dcovar + st.vhmat.relative_change(&before));
                } else {
                    tracing::debug!("curvature update skipped, delgam = {delgam:.3e}");
                }

                let mut edm_raw = 0.5 * st.vhmat.quad_form(&g_new);
                if edm_raw < 0.0 {
                    repair_matrix(&mut st, params, &free);
                    edm_raw = 0.5 * st.vhmat.quad_form(&g_new);
                    if edm_raw < 0.0 {
                        phase = Phase::Done(FitStatus::Failed);
                        continue;
                    }
                }
                st.edm = edm_raw * (1.0 + 3.0 * st.dcovar);
                tracing::debug!(
                    "iteration {}: f = {:.6e}, edm = {:.3e}, calls = {}",
                    st.iters,
                    st.fval,
                    st.edm,
                    adapter.n_calls()
                );
                if st.edm < edm_goal {
                    phase = Phase::Done(FitStatus::Success);
                }
            }

            Phase::Done(status) => {
                return (status, st);
            }
        }
    }
}

/// Diagonal inverse-Hessian seed from the second-derivative estimates,
/// falling back to the squared step size where those are unusable.
fn seed_matrix(params: &ParameterSet, free: &[usize], g2: &Array1<f64>) -> PackedSym {
    let mut diag = Array1::zeros(free.len());
    for (k, &i) in free.iter().enumerate() {
        diag[k] = if g2[i].is_finite() && g2[i] > 1e-12 {
            1.0 / g2[i]
        } else {
            let s = params.internal_step(i);
            (s * s).max(1e-12)
        };
    }
    PackedSym::from_diagonal(&diag)
}

/// Restore a usable matrix estimate, by the eigenvalue repair when it
/// triggers and otherwise by resetting to the diagonal seed.
fn repair_matrix(st: &mut MigradState, params: &ParameterSet, free: &[usize]) {
    if st.vhmat.force_pos_def(EPS_PDF).is_some() {
        tracing::warn!("matrix estimate forced positive-definite");
    } else {
        st.vhmat = seed_matrix(params, free, &st.g2);
        tracing::warn!("matrix estimate reset to its diagonal seed");
    }
    st.forced_posdef = true;
    st.dcovar = 1.0;
}

fn gather(v: &Array1<f64>, free: &[usize]) -> Array1<f64> {
    Array1::from_iter(free.iter().map(|&i| v[i]))
}

fn scatter(vf: &Array1<f64>, free: &[usize], n: usize) -> Array1<f64> {
    let mut out = Array1::zeros(n);
    for (k, &i) in free.iter().enumerate() {
        out[i] = vf[k];
    }
    out
}

impl Minimizer for VariableMetric {
    fn minimize(&mut self, params: &mut ParameterSet) -> Result<FitResult, MinimizerError> {
        VariableMetric::minimize(self, params)
    }
}

impl fmt::Debug for VariableMetric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VariableMetric")
            .field("xmin", &self.xmin)
            .field("fmin", &self.fmin)
            .field("status", &self.status)
            .field("fn_evals", &self.fn_evals)
            .field("iters", &self.iters)
            .field("edm", &self.edm)
            .field("opts", &self.opts)
            .finish()
    }
}
