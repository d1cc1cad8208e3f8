use crate::params::ParameterSet;
use dyn_clone::DynClone;
use ndarray::Array1;
use std::fmt;

/// Objective function interface for the minimizers.
///
/// The input vector always holds EXTERNAL parameter values. A return of NaN
/// marks the point as invalid (outside the function domain); the minimizers
/// treat it as worse than any finite value and move away from it.
pub trait ObjFn: DynClone {
    fn call(&self, x: &Array1<f64>) -> f64;
}

dyn_clone::clone_trait_object!(ObjFn);

/// Wraps a multi-dimensional closure as an objective.
#[derive(Clone)]
pub struct MultiDimFn<F>
where
    F: Fn(&Array1<f64>) -> f64 + Clone,
{
    f: F,
}

impl<F> MultiDimFn<F>
where
    F: Fn(&Array1<f64>) -> f64 + Clone,
{
    pub fn new(f: F) -> MultiDimFn<F> {
        MultiDimFn { f }
    }
}

impl<F> ObjFn for MultiDimFn<F>
where
    F: Fn(&Array1<f64>) -> f64 + Clone,
{
    fn call(&self, x: &Array1<f64>) -> f64 {
        (self.f)(x)
    }
}

/// Wraps a scalar closure as an objective on the first coordinate.
#[derive(Clone)]
pub struct SingleDimFn<F>
where
    F: Fn(f64) -> f64 + Clone,
{
    f: F,
}

impl<F> SingleDimFn<F>
where
    F: Fn(f64) -> f64 + Clone,
{
    pub fn new(f: F) -> SingleDimFn<F> {
        SingleDimFn { f }
    }
}

impl<F> ObjFn for SingleDimFn<F>
where
    F: Fn(f64) -> f64 + Clone,
{
    fn call(&self, x: &Array1<f64>) -> f64 {
        (self.f)(x[0])
    }
}

/// Counting wrapper around an objective that enforces the call budget.
///
/// One adapter belongs to exactly one minimization run; the count is the
/// single monotone evaluation counter shared by every phase of that run
/// (bracketing, line searches, gradients, error analysis). Once the budget
/// is spent, `eval` returns NaN without invoking the objective, which the
/// algorithms read as "stop improving and report what you have".
pub struct ObjectiveAdapter {
    f: Box<dyn ObjFn>,
    n_calls: usize,
    max_calls: usize,
}

impl ObjectiveAdapter {
    pub fn new<F>(f: F, max_calls: usize) -> ObjectiveAdapter
    where
        F: ObjFn + 'static,
    {
        ObjectiveAdapter {
            f: Box::new(f),
            n_calls: 0,
            max_calls,
        }
    }

    pub fn new_boxed(f: Box<dyn ObjFn>, max_calls: usize) -> ObjectiveAdapter {
        ObjectiveAdapter {
            f,
            n_calls: 0,
            max_calls,
        }
    }

    /// Evaluate the objective at `x` (external values), counting the call.
    /// Returns NaN without evaluating once the budget is exhausted.
    pub fn eval(&mut self, x: &Array1<f64>) -> f64 {
        if self.n_calls >= self.max_calls {
            return f64::NAN;
        }
        self.n_calls += 1;
        self.f.call(x)
    }

    pub fn n_calls(&self) -> usize {
        self.n_calls
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn budget_exhausted(&self) -> bool {
        self.n_calls >= self.max_calls
    }

    pub fn reset_calls(&mut self) {
        self.n_calls = 0;
    }
}

impl Clone for ObjectiveAdapter {
    fn clone(&self) -> Self {
        ObjectiveAdapter {
            f: self.f.clone(),
            n_calls: self.n_calls,
            max_calls: self.max_calls,
        }
    }
}

impl fmt::Debug for ObjectiveAdapter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ObjectiveAdapter")
            .field("n_calls", &self.n_calls)
            .field("max_calls", &self.max_calls)
            .finish()
    }
}

/// Restriction of the objective to a line through `point` along `direction`
/// in INTERNAL coordinates. Evaluation maps the trial point to external
/// values first, so bounded parameters stay inside their limits and fixed
/// parameters stay at their seeds.
#[derive(Clone, Debug)]
pub struct LineProjection {
    point: Array1<f64>,
    direction: Array1<f64>,
}

impl LineProjection {
    pub fn new(point: Array1<f64>, direction: Array1<f64>) -> LineProjection {
        LineProjection { point, direction }
    }

    pub fn point_at(&self, t: f64) -> Array1<f64> {
        &self.point + &(&self.direction * t)
    }

    pub fn eval(&self, params: &ParameterSet, adapter: &mut ObjectiveAdapter, t: f64) -> f64 {
        let trial = self.point_at(t);
        adapter.eval(&params.externalize(&trial))
    }

    pub fn set_point(&mut self, point: Array1<f64>) {
        self.point = point;
    }

    pub fn set_direction(&mut self, direction: Array1<f64>) {
        self.direction = direction;
    }

    pub fn direction(&self) -> &Array1<f64> {
        &self.direction
    }
}
