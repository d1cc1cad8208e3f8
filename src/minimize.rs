#![allow(dead_code)]
use crate::error::MinimizerError;
use crate::params::ParameterSet;
use ndarray::Array1;
use std::fmt;

pub mod bracket;
pub mod brent;
pub mod powell;
pub mod simplex;
pub mod varmet;

pub use bracket::{bracket_minimum, Bracket};
pub use brent::{brent_line, Brent};
pub use powell::Powell;
pub use simplex::Simplex;
pub use varmet::{ErrorMatrix, MinosDirection, MinosOutcome, MinosResult, VariableMetric};

/// Default function call budget for one minimization run.
pub const DEFAULT_MAX_CALLS: usize = 50_000;
/// Default fractional convergence tolerance.
pub const DEFAULT_TOLERANCE: f64 = 0.01;

/// Outcome of a minimization run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FitStatus {
    /// No run has produced a result yet.
    Uninitialized,
    /// Converged within tolerance.
    Success,
    /// Call budget spent before convergence; best point so far is reported.
    MaxCallsExceeded,
    /// Converged, but the error matrix had to be forced positive-definite,
    /// so parameter errors are approximate.
    NotPositiveDefinite,
    /// The algorithm could not make progress.
    Failed,
}

impl FitStatus {
    pub fn converged(&self) -> bool {
        *self == FitStatus::Success
    }

    /// True when the reported minimum is a usable estimate (converged, with
    /// or without a trustworthy error matrix).
    pub fn usable(&self) -> bool {
        matches!(self, FitStatus::Success | FitStatus::NotPositiveDefinite)
    }
}

impl fmt::Display for FitStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FitStatus::Uninitialized => write!(f, "not yet minimized"),
            FitStatus::Success => write!(f, "converged"),
            FitStatus::MaxCallsExceeded => write!(f, "function call limit reached"),
            FitStatus::NotPositiveDefinite => {
                write!(f, "converged with forced positive-definite error matrix")
            }
            FitStatus::Failed => write!(f, "failed to converge"),
        }
    }
}

/// Result of one minimization run.
///
/// `xmin` always holds external parameter values, whatever the status; on a
/// budget or convergence failure it carries the best point seen so far.
#[derive(Clone, Debug)]
pub struct FitResult {
    pub status: FitStatus,
    pub xmin: Array1<f64>,
    pub fmin: f64,
    pub fn_evals: usize,
    /// Symmetric (parabolic) parameter errors, when the algorithm computes
    /// an error matrix.
    pub parabolic_errors: Option<Array1<f64>>,
    /// Asymmetric (negative, positive) errors from the profile scan. NaN
    /// marks a direction where no crossing was found.
    pub minos_errors: Option<Vec<(f64, f64)>>,
}

impl FitResult {
    pub fn uninitialized(n_params: usize) -> FitResult {
        FitResult {
            status: FitStatus::Uninitialized,
            xmin: Array1::zeros(n_params),
            fmin: f64::NAN,
            fn_evals: 0,
            parabolic_errors: None,
            minos_errors: None,
        }
    }

    pub fn converged(&self) -> bool {
        self.status.converged()
    }

    pub fn usable(&self) -> bool {
        self.status.usable()
    }
}

/// Knobs shared by all minimizers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FitOptions {
    /// Hard budget on objective evaluations per run.
    pub max_calls: usize,
    /// Fractional tolerance on the function value.
    pub tolerance: f64,
    /// Objective increase defining one standard deviation: 1.0 for a
    /// chi-square objective, 0.5 for a negative log-likelihood.
    pub up: f64,
    /// Effort level 0, 1 or 2 traded between speed and gradient accuracy.
    pub strategy: usize,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            max_calls: DEFAULT_MAX_CALLS,
            tolerance: DEFAULT_TOLERANCE,
            up: 0.5,
            strategy: 1,
        }
    }
}

impl FitOptions {
    pub fn validate(&self) -> Result<(), MinimizerError> {
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(MinimizerError::InvalidTolerance);
        }
        if self.max_calls == 0 {
            return Err(MinimizerError::InvalidParameters(
                "call budget must be positive".to_string(),
            ));
        }
        if !self.up.is_finite() || self.up <= 0.0 {
            return Err(MinimizerError::InvalidParameters(
                "up must be positive".to_string(),
            ));
        }
        if self.strategy > 2 {
            return Err(MinimizerError::InvalidParameters(
                "strategy must be 0, 1 or 2".to_string(),
            ));
        }
        Ok(())
    }
}

/// Common entry point implemented by every minimizer in this crate.
pub trait Minimizer {
    fn minimize(&mut self, params: &mut ParameterSet) -> Result<FitResult, MinimizerError>;
}

/// NaN marks an invalid objective value; for ordering purposes it is worse
/// than anything finite.
pub(crate) fn guard_nan(v: f64) -> f64 {
    if v.is_nan() {
        f64::INFINITY
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates() {
        assert!(FitStatus::Success.converged());
        assert!(FitStatus::Success.usable());
        assert!(!FitStatus::NotPositiveDefinite.converged());
        assert!(FitStatus::NotPositiveDefinite.usable());
        assert!(!FitStatus::MaxCallsExceeded.usable());
        assert!(!FitStatus::Failed.usable());
        assert!(!FitStatus::Uninitialized.usable());
    }

    #[test]
    fn test_default_options() {
        let opts = FitOptions::default();
        assert_eq!(opts.max_calls, 50_000);
        assert_eq!(opts.tolerance, 0.01);
        assert_eq!(opts.up, 0.5);
        assert_eq!(opts.strategy, 1);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_options_validation() {
        let mut opts = FitOptions::default();
        opts.tolerance = 0.0;
        assert_eq!(opts.validate(), Err(MinimizerError::InvalidTolerance));

        let mut opts = FitOptions::default();
        opts.max_calls = 0;
        assert!(opts.validate().is_err());

        let mut opts = FitOptions::default();
        opts.up = -0.5;
        assert!(opts.validate().is_err());

        let mut opts = FitOptions::default();
        opts.strategy = 3;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_guard_nan() {
        assert_eq!(guard_nan(1.5), 1.5);
        assert_eq!(guard_nan(f64::NAN), f64::INFINITY);
        assert_eq!(guard_nan(f64::NEG_INFINITY), f64::NEG_INFINITY);
    }
}
