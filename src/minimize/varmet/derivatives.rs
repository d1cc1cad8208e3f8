use ndarray::Array1;

use crate::minimize::guard_nan;
use crate::objective::ObjectiveAdapter;
use crate::params::ParameterSet;

/// First and second derivative estimates along each internal coordinate,
/// together with the finite-difference step that produced them. Entries for
/// fixed parameters are zero.
#[derive(Clone, Debug)]
pub struct GradientEstimate {
    pub grad: Array1<f64>,
    pub g2: Array1<f64>,
    pub steps: Array1<f64>,
}

/// Number of step-refinement cycles per coordinate for a given strategy.
pub fn gradient_cycles(strategy: usize) -> usize {
    match strategy {
        0 => 2,
        1 => 3,
        _ => 5,
    }
}

/// Central-difference gradient in internal coordinates.
///
/// Each free coordinate is probed at `x +- d` and the step is re-tuned over
/// a few cycles so that the observed sagitta `0.5*|f+ + f- - 2f|` lands near
/// `sqrt(eps)*(|f| + up)`, which balances truncation against cancellation.
/// Probes that land in an invalid region (non-finite objective) pull the
/// step in by half and retry without counting as a cycle.
#[allow(clippy::too_many_arguments)]
pub fn gradient(
    x: &Array1<f64>,
    fval: f64,
    params: &ParameterSet,
    adapter: &mut ObjectiveAdapter,
    free: &[usize],
    strategy: usize,
    up: f64,
    prev_steps: Option<&Array1<f64>>,
) -> GradientEstimate {
    let n = x.len();
    let ncyc = gradient_cycles(strategy);
    let aimsag = f64::EPSILON.sqrt() * (fval.abs() + up);

    let mut grad = Array1::zeros(n);
    let mut g2 = Array1::zeros(n);
    let mut steps = Array1::zeros(n);

    for &i in free {
        let dmin = 8.0 * f64::EPSILON * (x[i].abs() + 1.0);
        let dmax = if params.has_limits(i) { 0.5 } else { f64::INFINITY };
        let mut d = match prev_steps {
            Some(s) if s[i] > 0.0 => s[i],
            _ => 0.1 * params.internal_step(i),
        };
        d = d.clamp(dmin, dmax);

        let mut grd = 0.0;
        let mut g2v = 0.0;
        let mut cycles_done = 0;
        let mut attempts = 0;

        while cycles_done < ncyc && attempts < ncyc + 12 {
            attempts += 1;
            if adapter.budget_exhausted() {
                break;
            }

            let mut xp = x.clone();
            xp[i] = x[i] + d;
            let f1 = guard_nan(adapter.eval(&params.externalize(&xp)));
            xp[i] = x[i] - d;
            let f2 = guard_nan(adapter.eval(&params.externalize(&xp)));

            if !f1.is_finite() || !f2.is_finite() {
                d = (d * 0.5).max(dmin);
                continue;
            }

            cycles_done += 1;
            grd = (f1 - f2) / (2.0 * d);
            g2v = (f1 + f2 - 2.0 * fval) / (d * d);

            let sag = 0.5 * (f1 + f2 - 2.0 * fval).abs();
            if sag <= 0.0 {
                // no curvature signal at this step, open it up
                d = (d * 10.0).min(dmax);
                continue;
            }
            let dnew = (d * (aimsag / sag).sqrt().clamp(0.3, 10.0)).clamp(dmin, dmax);
            let settled = (dnew - d).abs() <= 0.05 * d;
            d = dnew;
            if settled {
                break;
            }
        }

        grad[i] = grd;
        g2[i] = g2v;
        steps[i] = d;
    }

    GradientEstimate { grad, g2, steps }
}

#[cfg(test)]
mod derivatives_tests {
    use super::*;
    use crate::objective::MultiDimFn;

    fn two_param_set() -> ParameterSet {
        let mut params = ParameterSet::new();
        params.init_param(0, 0.1, 0.0, 0.0, false).unwrap();
        params.init_param(1, 0.1, 0.0, 0.0, false).unwrap();
        params
    }

    #[test]
    fn test_cycle_counts_by_strategy() {
        assert_eq!(gradient_cycles(0), 2);
        assert_eq!(gradient_cycles(1), 3);
        assert_eq!(gradient_cycles(2), 5);
    }

    #[test]
    fn test_gradient_of_quadratic() {
        let mut params = two_param_set();
        params.set_seed(0, 1.0).unwrap();
        params.set_seed(1, -2.0).unwrap();
        let mut adapter = ObjectiveAdapter::new(
            MultiDimFn::new(|x: &Array1<f64>| {
                (x[0] - 3.0) * (x[0] - 3.0) + 2.0 * (x[1] + 1.0) * (x[1] + 1.0)
            }),
            1000,
        );
        let x = params.start_internal();
        let fval = adapter.eval(&params.externalize(&x));
        let free = params.free_indices();
        let est = gradient(&x, fval, &params, &mut adapter, &free, 1, 1.0, None);

        // df/dx0 = 2(x0-3) = -4, df/dx1 = 4(x1+1) = -4
        assert!((est.grad[0] + 4.0).abs() < 1e-5);
        assert!((est.grad[1] + 4.0).abs() < 1e-5);
        // d2f/dx0^2 = 2, d2f/dx1^2 = 4
        assert!((est.g2[0] - 2.0).abs() < 1e-3);
        assert!((est.g2[1] - 4.0).abs() < 1e-3);
        assert!(est.steps[0] > 0.0 && est.steps[1] > 0.0);
    }

    #[test]
    fn test_fixed_parameter_entries_are_zero() {
        let mut params = ParameterSet::new();
        params.init_param(0, 0.1, 0.0, 0.0, false).unwrap();
        params.init_param(1, 0.1, 0.0, 0.0, true).unwrap();
        params.set_seed(1, 5.0).unwrap();
        let mut adapter = ObjectiveAdapter::new(
            MultiDimFn::new(|x: &Array1<f64>| x[0] * x[0] + x[1] * x[1]),
            1000,
        );
        let x = params.start_internal();
        let fval = adapter.eval(&params.externalize(&x));
        let free = params.free_indices();
        let est = gradient(&x, fval, &params, &mut adapter, &free, 1, 1.0, None);
        assert_eq!(est.grad[1], 0.0);
        assert_eq!(est.g2[1], 0.0);
        assert_eq!(est.steps[1], 0.0);
        assert!(est.grad[0].abs() < 1e-6);
    }

    #[test]
    fn test_step_pulls_in_at_invalid_region() {
        // objective is only defined for x < 0.05; the probe at the seed
        // step lands in the invalid region and must shrink until it fits
        let mut params = ParameterSet::new();
        params.init_param(0, 1.0, 0.0, 0.0, false).unwrap();
        let mut adapter = ObjectiveAdapter::new(
            MultiDimFn::new(|x: &Array1<f64>| {
                if x[0] > 0.05 {
                    f64::NAN
                } else {
                    (x[0] + 1.0) * (x[0] + 1.0)
                }
            }),
            1000,
        );
        let x = params.start_internal();
        let fval = adapter.eval(&params.externalize(&x));
        let free = params.free_indices();
        let est = gradient(&x, fval, &params, &mut adapter, &free, 2, 1.0, None);
        assert!(est.grad[0].is_finite());
        assert!((est.grad[0] - 2.0).abs() < 1e-3);
        assert!(est.steps[0] <= 0.05);
    }

    #[test]
    fn test_gradient_respects_budget() {
        let mut params = two_param_set();
        let mut adapter =
            ObjectiveAdapter::new(MultiDimFn::new(|x: &Array1<f64>| x.dot(x)), 3);
        let x = params.start_internal();
        let fval = adapter.eval(&params.externalize(&x));
        let free = params.free_indices();
        let est = gradient(&x, fval, &params, &mut adapter, &free, 2, 1.0, None);
        assert!(adapter.budget_exhausted());
        assert_eq!(adapter.n_calls(), 3);
        for &g in est.grad.iter() {
            assert!(g.is_finite());
        }
    }
}
