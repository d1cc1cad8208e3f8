use crate::error::MinimizerError;
use ndarray::Array1;

/// Default maximum number of parameters a set can hold.
pub const MAX_PARAMS: usize = 15;

/// Definition of a single fit parameter: starting value, initial step size,
/// optional limits and a fixed flag.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParameterSpec {
    seed: f64,
    step: f64,
    lower: f64,
    upper: f64,
    fixed: bool,
    init: bool,
}

impl ParameterSpec {
    fn unset() -> ParameterSpec {
        ParameterSpec {
            seed: 0.0,
            step: 0.0,
            lower: 0.0,
            upper: 0.0,
            fixed: false,
            init: false,
        }
    }

    /// Equal bounds mean the parameter is unconstrained.
    pub fn has_limits(&self) -> bool {
        self.lower != self.upper
    }

    pub fn seed(&self) -> f64 {
        self.seed
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn limits(&self) -> Option<(f64, f64)> {
        if self.has_limits() {
            Some((self.lower, self.upper))
        } else {
            None
        }
    }
}

/// An indexed collection of fit parameters.
///
/// Bounded parameters are presented to the minimizers on an unconstrained
/// internal axis through the sine transform
///
/// ```text
/// internal = asin(2 * (external - lower) / (upper - lower) - 1)
/// external = lower + (upper - lower) / 2 * (sin(internal) + 1)
/// ```
///
/// so every internal value maps into the allowed range and the minimizers
/// never see the constraint. Unbounded parameters pass through unchanged.
///
/// # Example
///
/// ```
/// use fitkit::params::ParameterSet;
///
/// let mut params = ParameterSet::new();
/// params.init_param(0, 0.1, 0.0, 10.0, false).unwrap();
/// params.set_seed(0, 5.0).unwrap();
/// assert_eq!(params.n_free(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct ParameterSet {
    specs: Vec<ParameterSpec>,
    limit_hit: bool,
}

impl ParameterSet {
    pub fn new() -> ParameterSet {
        ParameterSet::with_capacity(MAX_PARAMS)
    }

    pub fn with_capacity(max_params: usize) -> ParameterSet {
        ParameterSet {
            specs: vec![ParameterSpec::unset(); max_params],
            limit_hit: false,
        }
    }

    /// Define parameter `index`.
    ///
    /// # Arguments
    ///
    /// * `index` - Slot of the parameter, `0..max_params`
    /// * `step` - Initial displacement used to seed searches, must be positive
    /// * `lower`, `upper` - Allowed range; equal values (conventionally both
    ///   zero) leave the parameter unconstrained
    /// * `fixed` - Fixed parameters keep their seed and are never varied
    ///
    /// The starting value defaults to zero (moved inside the limits for a
    /// bounded parameter) until `set_seed` is called. Re-defining an index
    /// overwrites the previous definition.
    ///
    /// # Errors
    ///
    /// `TooManyParameters` for an index past the capacity, `InvalidStepSize`
    /// for a non-positive or non-finite step, `InvalidLimits` for non-finite
    /// or inverted limits.
    pub fn init_param(
        &mut self,
        index: usize,
        step: f64,
        lower: f64,
        upper: f64,
        fixed: bool,
    ) -> Result<(), MinimizerError> {
        if index >= self.specs.len() {
            return Err(MinimizerError::TooManyParameters(self.specs.len()));
        }
        if !step.is_finite() || step <= 0.0 {
            return Err(MinimizerError::InvalidStepSize);
        }
        if !lower.is_finite() || !upper.is_finite() {
            return Err(MinimizerError::InvalidLimits(
                "limits must be finite".to_string(),
            ));
        }
        if lower > upper {
            return Err(MinimizerError::InvalidLimits(format!(
                "lower {} exceeds upper {}",
                lower, upper
            )));
        }
        let (lo, hi) = if lower == upper { (0.0, 0.0) } else { (lower, upper) };
        let seed = if lo != hi { (0.0_f64).clamp(lo, hi) } else { 0.0 };
        self.specs[index] = ParameterSpec {
            seed,
            step,
            lower: lo,
            upper: hi,
            fixed,
            init: true,
        };
        Ok(())
    }

    /// Set the starting value of parameter `index`.
    ///
    /// A value outside the parameter limits is moved to the nearer limit.
    ///
    /// # Errors
    ///
    /// `IndexOutOfRange`, `NotInitialized` for an undefined slot, or
    /// `InvalidParameters` for a non-finite value.
    pub fn set_seed(&mut self, index: usize, value: f64) -> Result<(), MinimizerError> {
        if index >= self.specs.len() {
            return Err(MinimizerError::IndexOutOfRange(index));
        }
        if !self.specs[index].init {
            return Err(MinimizerError::NotInitialized(index));
        }
        if !value.is_finite() {
            return Err(MinimizerError::InvalidParameters(format!(
                "seed for parameter {} must be finite",
                index
            )));
        }
        let spec = &mut self.specs[index];
        let mut v = value;
        if spec.has_limits() && (v < spec.lower || v > spec.upper) {
            v = v.clamp(spec.lower, spec.upper);
            tracing::warn!(
                index,
                seed = value,
                moved_to = v,
                "seed outside limits moved to the nearer limit"
            );
        }
        spec.seed = v;
        Ok(())
    }

    /// Fix an initialized parameter at the given external value. The
    /// profile-error scan uses this to pin the scanned parameter while the
    /// others are re-minimized.
    ///
    /// # Errors
    ///
    /// Same conditions as `set_seed`.
    pub fn fix_at(&mut self, index: usize, value: f64) -> Result<(), MinimizerError> {
        self.set_seed(index, value)?;
        self.specs[index].fixed = true;
        Ok(())
    }

    /// Forget all parameter definitions and clear the limit flag.
    pub fn clear(&mut self) {
        for spec in self.specs.iter_mut() {
            *spec = ParameterSpec::unset();
        }
        self.limit_hit = false;
    }

    /// Number of defined parameters (highest initialized index plus one).
    pub fn n_params(&self) -> usize {
        self.specs.iter().rposition(|s| s.init).map_or(0, |i| i + 1)
    }

    /// Number of parameters the minimizers may vary.
    pub fn n_free(&self) -> usize {
        self.specs.iter().filter(|s| s.init && !s.fixed).count()
    }

    pub fn max_params(&self) -> usize {
        self.specs.len()
    }

    pub fn spec(&self, index: usize) -> Option<&ParameterSpec> {
        self.specs.get(index).filter(|s| s.init)
    }

    /// Raw accessors. Indices must address defined parameters.
    pub fn seed(&self, index: usize) -> f64 {
        self.specs[index].seed
    }

    pub fn step(&self, index: usize) -> f64 {
        self.specs[index].step
    }

    pub fn is_fixed(&self, index: usize) -> bool {
        self.specs[index].fixed
    }

    pub fn has_limits(&self, index: usize) -> bool {
        self.specs[index].has_limits()
    }

    pub fn limits(&self, index: usize) -> Option<(f64, f64)> {
        self.specs[index].limits()
    }

    /// Check that the set is complete enough to run a fit: at least one
    /// parameter, no undefined slots below `n_params`, and at least one free
    /// parameter.
    pub fn validate_ready(&self) -> Result<(), MinimizerError> {
        let n = self.n_params();
        if n == 0 {
            return Err(MinimizerError::InvalidParameters(
                "no parameters defined".to_string(),
            ));
        }
        for i in 0..n {
            if !self.specs[i].init {
                return Err(MinimizerError::NotInitialized(i));
            }
        }
        if self.n_free() == 0 {
            return Err(MinimizerError::NoFreeParameters);
        }
        Ok(())
    }

    pub fn free_indices(&self) -> Vec<usize> {
        (0..self.n_params())
            .filter(|&i| !self.specs[i].fixed)
            .collect()
    }

    fn internal_of(&self, external: f64, index: usize) -> (f64, bool) {
        let spec = &self.specs[index];
        if !spec.has_limits() {
            return (external, false);
        }
        let range = spec.upper - spec.lower;
        let scaled = 2.0 * (external - spec.lower) / range - 1.0;
        let clipped = scaled.abs() >= 1.0 - 2.0 * f64::EPSILON;
        (scaled.clamp(-1.0, 1.0).asin(), clipped)
    }

    /// Map an external value of parameter `index` onto the internal axis.
    ///
    /// Values at or beyond the limits are clipped to the limit and the
    /// persistent limit flag is raised so callers can warn once per fit.
    pub fn to_internal(&mut self, external: f64, index: usize) -> f64 {
        let (t, clipped) = self.internal_of(external, index);
        if clipped {
            self.limit_hit = true;
            tracing::debug!(index, value = external, "value clipped at parameter limit");
        }
        t
    }

    /// Inverse of `to_internal`. Never clips: every internal value maps into
    /// the allowed range.
    pub fn to_external(&self, internal: f64, index: usize) -> f64 {
        let spec = &self.specs[index];
        if !spec.has_limits() {
            return internal;
        }
        spec.lower + (spec.upper - spec.lower) / 2.0 * (internal.sin() + 1.0)
    }

    /// Starting point in internal coordinates. Fixed parameters carry their
    /// external seed unchanged so they round-trip exactly.
    pub fn start_internal(&mut self) -> Array1<f64> {
        let n = self.n_params();
        let mut x = Array1::zeros(n);
        for i in 0..n {
            let spec = self.specs[i];
            x[i] = if spec.fixed || !spec.has_limits() {
                spec.seed
            } else {
                self.to_internal(spec.seed, i)
            };
        }
        x
    }

    /// Map a full internal coordinate vector to external parameter values.
    /// Fixed parameters are reported at their seed regardless of the input.
    pub fn externalize(&self, internal: &Array1<f64>) -> Array1<f64> {
        Array1::from_shape_fn(internal.len(), |i| {
            let spec = &self.specs[i];
            if spec.fixed {
                spec.seed
            } else {
                self.to_external(internal[i], i)
            }
        })
    }

    pub fn seeds_external(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.n_params(), |i| self.specs[i].seed)
    }

    /// Step size of parameter `index` on the internal axis, obtained by
    /// pushing the external step through the transform on both sides of the
    /// seed.
    pub fn internal_step(&self, index: usize) -> f64 {
        let spec = &self.specs[index];
        if !spec.has_limits() {
            return spec.step;
        }
        let (t0, _) = self.internal_of(spec.seed, index);
        let (tu, _) = self.internal_of((spec.seed + spec.step).min(spec.upper), index);
        let (td, _) = self.internal_of((spec.seed - spec.step).max(spec.lower), index);
        0.5 * ((tu - t0).abs() + (t0 - td).abs())
    }

    /// Derivative of the external value with respect to the internal one at
    /// `internal`. Unity for unconstrained parameters.
    pub fn dext_dint(&self, internal: f64, index: usize) -> f64 {
        let spec = &self.specs[index];
        if !spec.has_limits() {
            return 1.0;
        }
        (spec.upper - spec.lower) / 2.0 * internal.cos()
    }

    /// True when any transform has clipped a value at a limit since the flag
    /// was last reset.
    pub fn limit_hit(&self) -> bool {
        self.limit_hit
    }

    pub fn reset_limit_flag(&mut self) {
        self.limit_hit = false;
    }
}

impl Default for ParameterSet {
    fn default() -> Self {
        ParameterSet::new()
    }
}
