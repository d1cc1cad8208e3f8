use fitkit::prelude::*;
use ndarray::prelude::*;

fn rosenbrock(x: &Array1<f64>) -> f64 {
    let a = 1.0 - x[0];
    let b = x[1] - x[0] * x[0];
    a * a + 100.0 * b * b
}

fn two_free_params(seeds: &[f64], step: f64) -> ParameterSet {
    let mut params = ParameterSet::new();
    for (i, &s) in seeds.iter().enumerate() {
        params.init_param(i, step, 0.0, 0.0, false).unwrap();
        params.set_seed(i, s).unwrap();
    }
    params
}

#[test]
fn test_brent_quadratic_from_seed_and_step() {
    let mut params = ParameterSet::new();
    params.init_param(0, 1.0, 0.0, 0.0, false).unwrap();

    let mut brent = Brent::new(MultiDimFn::new(|x: &Array1<f64>| {
        (x[0] - 3.0) * (x[0] - 3.0) + 1.0
    }));
    let result = brent.minimize(&mut params).unwrap();

    assert_eq!(result.status, FitStatus::Success);
    assert!((result.xmin[0] - 3.0).abs() < 0.05);
    assert!((result.fmin - 1.0).abs() < 0.01);
}

#[test]
fn test_minimizers_agree_on_quadratic_bowl() {
    let f = |x: &Array1<f64>| (x[0] - 1.0) * (x[0] - 1.0) + 2.0 * (x[1] + 0.5) * (x[1] + 0.5);
    let tight = FitOptions {
        tolerance: 1e-8,
        ..FitOptions::default()
    };

    let mut params = two_free_params(&[0.0, 0.0], 0.1);
    let mut powell = Powell::with_options(MultiDimFn::new(f), tight);
    let rp = powell.minimize(&mut params).unwrap();
    assert_eq!(rp.status, FitStatus::Success);
    assert!((rp.xmin[0] - 1.0).abs() < 1e-3);
    assert!((rp.xmin[1] + 0.5).abs() < 1e-3);

    let mut params = two_free_params(&[0.0, 0.0], 0.1);
    let mut simplex = Simplex::with_options(MultiDimFn::new(f), tight);
    let rs = simplex.minimize(&mut params).unwrap();
    assert_eq!(rs.status, FitStatus::Success);
    assert!((rs.xmin[0] - 1.0).abs() < 0.01);
    assert!((rs.xmin[1] + 0.5).abs() < 0.01);

    let mut params = two_free_params(&[0.0, 0.0], 0.1);
    let mut vm = VariableMetric::with_options(
        MultiDimFn::new(f),
        FitOptions {
            tolerance: 1e-6,
            ..FitOptions::default()
        },
    );
    let rv = vm.minimize(&mut params).unwrap();
    assert_eq!(rv.status, FitStatus::Success);
    assert!((rv.xmin[0] - 1.0).abs() < 1e-3);
    assert!((rv.xmin[1] + 0.5).abs() < 1e-3);
}

#[test]
fn test_powell_solves_rosenbrock() {
    let mut params = two_free_params(&[-1.2, 1.0], 0.1);
    let mut powell = Powell::with_options(
        MultiDimFn::new(rosenbrock),
        FitOptions {
            tolerance: 1e-6,
            max_calls: 10_000,
            ..FitOptions::default()
        },
    );
    let result = powell.minimize(&mut params).unwrap();

    assert_eq!(result.status, FitStatus::Success);
    assert!(result.fmin < 1e-4);
    assert!((result.xmin[0] - 1.0).abs() < 0.01);
    assert!((result.xmin[1] - 1.0).abs() < 0.01);
    assert!(result.fn_evals <= 10_000);
}

#[test]
fn test_variable_metric_solves_rosenbrock_with_errors() {
    let mut params = two_free_params(&[-1.2, 1.0], 0.1);
    let mut vm = VariableMetric::with_options(
        MultiDimFn::new(rosenbrock),
        FitOptions {
            tolerance: 1e-6,
            max_calls: 10_000,
            up: 1.0,
            ..FitOptions::default()
        },
    );
    let result = vm.minimize(&mut params).unwrap();

    assert_eq!(result.status, FitStatus::Success);
    assert!(result.fmin < 1e-4);
    assert!((result.xmin[0] - 1.0).abs() < 0.01);
    assert!((result.xmin[1] - 1.0).abs() < 0.01);

    let perr = result.parabolic_errors.unwrap();
    assert!(perr[0] > 0.0 && perr[0].is_finite());
    assert!(perr[1] > 0.0 && perr[1].is_finite());

    let em = vm.error_matrix().unwrap();
    assert_eq!(em.covariance.nrows(), 2);
    assert!(em.covariance[[0, 0]] > 0.0);
    // the two coordinates of the banana valley are strongly coupled
    assert!(em.global_correlations[0] > 0.9);
}

#[test]
fn test_fixed_parameter_survives_every_minimizer() {
    let f = |x: &Array1<f64>| {
        (x[0] - 4.0) * (x[0] - 4.0) + (x[1] - 9.9) * (x[1] - 9.9) + x[2] * x[2]
    };
    let build = || {
        let mut params = ParameterSet::new();
        params.init_param(0, 0.1, 0.0, 0.0, false).unwrap();
        params.init_param(1, 0.1, 0.0, 0.0, true).unwrap();
        params.init_param(2, 0.1, 0.0, 0.0, false).unwrap();
        params.set_seed(1, 2.5).unwrap();
        params
    };

    let mut params = build();
    let mut powell = Powell::new(MultiDimFn::new(f));
    let rp = powell.minimize(&mut params).unwrap();
    assert_eq!(rp.xmin[1], 2.5);

    let mut params = build();
    let mut simplex = Simplex::new(MultiDimFn::new(f));
    let rs = simplex.minimize(&mut params).unwrap();
    assert_eq!(rs.xmin[1], 2.5);

    let mut params = build();
    let mut vm = VariableMetric::new(MultiDimFn::new(f));
    let rv = vm.minimize(&mut params).unwrap();
    assert_eq!(rv.xmin[1], 2.5);
}

#[test]
fn test_call_budget_is_enforced_exactly() {
    let starved = FitOptions {
        max_calls: 5,
        ..FitOptions::default()
    };

    let mut params = ParameterSet::new();
    params.init_param(0, 1.0, 0.0, 0.0, false).unwrap();
    let mut brent = Brent::with_options(
        MultiDimFn::new(|x: &Array1<f64>| (x[0] - 3.0) * (x[0] - 3.0) + 1.0),
        starved,
    );
    let rb = brent.minimize(&mut params).unwrap();
    assert_eq!(rb.status, FitStatus::MaxCallsExceeded);
    assert_eq!(rb.fn_evals, 5);
    assert!(rb.fmin.is_finite());

    let mut params = two_free_params(&[-1.2, 1.0], 0.1);
    let mut powell = Powell::with_options(MultiDimFn::new(rosenbrock), starved);
    let rp = powell.minimize(&mut params).unwrap();
    assert_eq!(rp.status, FitStatus::MaxCallsExceeded);
    assert_eq!(rp.fn_evals, 5);

    let mut params = two_free_params(&[-1.2, 1.0], 0.1);
    let mut simplex = Simplex::with_options(MultiDimFn::new(rosenbrock), starved);
    let rs = simplex.minimize(&mut params).unwrap();
    assert_eq!(rs.status, FitStatus::MaxCallsExceeded);
    assert_eq!(rs.fn_evals, 5);

    let mut params = two_free_params(&[-1.2, 1.0], 0.1);
    let mut vm = VariableMetric::with_options(MultiDimFn::new(rosenbrock), starved);
    let rv = vm.minimize(&mut params).unwrap();
    assert_eq!(rv.status, FitStatus::MaxCallsExceeded);
    assert_eq!(rv.fn_evals, 5);
}

#[test]
fn test_limits_are_honored_by_every_minimizer() {
    // unconstrained minima sit outside the boxes on purpose
    let f1 = |x: &Array1<f64>| (x[0] - 12.0) * (x[0] - 12.0);
    let f2 = |x: &Array1<f64>| (x[0] - 12.0) * (x[0] - 12.0) + (x[1] + 7.0) * (x[1] + 7.0);

    let bounded1 = || {
        let mut params = ParameterSet::new();
        params.init_param(0, 0.5, 0.0, 10.0, false).unwrap();
        params.set_seed(0, 5.0).unwrap();
        params
    };
    let bounded2 = || {
        let mut params = ParameterSet::new();
        params.init_param(0, 0.5, 0.0, 10.0, false).unwrap();
        params.init_param(1, 0.5, -5.0, 5.0, false).unwrap();
        params.set_seed(0, 5.0).unwrap();
        params.set_seed(1, 0.0).unwrap();
        params
    };

    let mut params = bounded1();
    let mut brent = Brent::new(MultiDimFn::new(f1));
    let rb = brent.minimize(&mut params).unwrap();
    assert!(rb.xmin[0] >= 0.0 && rb.xmin[0] <= 10.0);

    let mut params = bounded2();
    let mut powell = Powell::new(MultiDimFn::new(f2));
    let rp = powell.minimize(&mut params).unwrap();
    assert!(rp.xmin[0] >= 0.0 && rp.xmin[0] <= 10.0);
    assert!(rp.xmin[1] >= -5.0 && rp.xmin[1] <= 5.0);

    let mut params = bounded2();
    let mut simplex = Simplex::new(MultiDimFn::new(f2));
    let rs = simplex.minimize(&mut params).unwrap();
    assert!(rs.xmin[0] >= 0.0 && rs.xmin[0] <= 10.0);
    assert!(rs.xmin[1] >= -5.0 && rs.xmin[1] <= 5.0);

    let mut params = bounded2();
    let mut vm = VariableMetric::new(MultiDimFn::new(f2));
    let rv = vm.minimize(&mut params).unwrap();
    assert!(rv.xmin[0] >= 0.0 && rv.xmin[0] <= 10.0);
    assert!(rv.xmin[1] >= -5.0 && rv.xmin[1] <= 5.0);
}

#[test]
fn test_interior_minimum_of_bounded_parameter_is_recovered() {
    let f = |x: &Array1<f64>| (x[0] - 7.3) * (x[0] - 7.3);
    let opts = FitOptions {
        tolerance: 1e-6,
        ..FitOptions::default()
    };

    let mut params = ParameterSet::new();
    params.init_param(0, 0.5, 0.0, 10.0, false).unwrap();
    params.set_seed(0, 2.0).unwrap();
    let mut brent = Brent::with_options(MultiDimFn::new(f), opts);
    let rb = brent.minimize(&mut params).unwrap();
    assert_eq!(rb.status, FitStatus::Success);
    assert!((rb.xmin[0] - 7.3).abs() < 0.01);

    let mut params = ParameterSet::new();
    params.init_param(0, 0.5, 0.0, 10.0, false).unwrap();
    params.set_seed(0, 2.0).unwrap();
    let mut vm = VariableMetric::with_options(MultiDimFn::new(f), opts);
    let rv = vm.minimize(&mut params).unwrap();
    assert_eq!(rv.status, FitStatus::Success);
    assert!((rv.xmin[0] - 7.3).abs() < 0.01);
}

#[test]
fn test_success_never_carries_a_nan_value() {
    // invalid half-plane next to the minimum
    let f = |x: &Array1<f64>| {
        if x[0] < 0.0 {
            f64::NAN
        } else {
            (x[0] - 0.5) * (x[0] - 0.5) + x[1] * x[1]
        }
    };
    let mut params = two_free_params(&[1.5, 1.0], 0.2);
    let mut powell = Powell::new(MultiDimFn::new(f));
    let rp = powell.minimize(&mut params).unwrap();
    if rp.status == FitStatus::Success {
        assert!(rp.fmin.is_finite());
    }

    // an objective that is NaN everywhere can never be a success
    let always_nan = |_x: &Array1<f64>| f64::NAN;
    let mut params = two_free_params(&[0.0, 0.0], 0.1);
    let mut simplex = Simplex::new(MultiDimFn::new(always_nan));
    let rs = simplex.minimize(&mut params).unwrap();
    assert!(!rs.status.converged());

    let mut params = two_free_params(&[0.0, 0.0], 0.1);
    let mut vm = VariableMetric::new(MultiDimFn::new(always_nan));
    let rv = vm.minimize(&mut params).unwrap();
    assert!(!rv.status.converged());
}

#[test]
fn test_minos_pipeline_on_gaussian_likelihood() {
    // -log L of two independent unit gaussians, up = 0.5, so both errors
    // come out at 1 in either direction
    let f = |x: &Array1<f64>| {
        0.5 * ((x[0] - 1.0) * (x[0] - 1.0) + (x[1] - 2.0) * (x[1] - 2.0))
    };
    let mut params = two_free_params(&[0.0, 0.0], 0.1);
    let mut vm = VariableMetric::with_options(
        MultiDimFn::new(f),
        FitOptions {
            tolerance: 1e-6,
            ..FitOptions::default()
        },
    );
    let result = vm.minimize_with_minos(&mut params).unwrap();

    assert_eq!(result.status, FitStatus::Success);
    assert!((result.xmin[0] - 1.0).abs() < 1e-3);
    assert!((result.xmin[1] - 2.0).abs() < 1e-3);

    let perr = result.parabolic_errors.as_ref().unwrap();
    assert!((perr[0] - 1.0).abs() < 0.01);
    assert!((perr[1] - 1.0).abs() < 0.01);

    let minos = result.minos_errors.as_ref().unwrap();
    assert_eq!(minos.len(), 2);
    for &(lo, hi) in minos {
        assert!((lo + 1.0).abs() < 0.05, "lower = {lo}");
        assert!((hi - 1.0).abs() < 0.05, "upper = {hi}");
    }
}

#[test]
fn test_configuration_errors_are_fast_failures() {
    let f = MultiDimFn::new(|x: &Array1<f64>| x.dot(x));

    // no parameters defined
    let mut params = ParameterSet::new();
    let mut powell = Powell::new(f.clone());
    assert!(powell.minimize(&mut params).is_err());

    // simplex needs at least two free parameters
    let mut params = ParameterSet::new();
    params.init_param(0, 0.1, 0.0, 0.0, false).unwrap();
    let mut simplex = Simplex::new(f.clone());
    assert!(simplex.minimize(&mut params).is_err());

    // brent needs exactly one
    let mut params = two_free_params(&[0.0, 0.0], 0.1);
    let mut brent = Brent::new(f.clone());
    assert!(brent.minimize(&mut params).is_err());

    // bad options never call the objective
    let mut params = two_free_params(&[0.0, 0.0], 0.1);
    let mut vm = VariableMetric::with_options(
        f,
        FitOptions {
            tolerance: -1.0,
            ..FitOptions::default()
        },
    );
    let err = vm.minimize(&mut params).unwrap_err();
    assert_eq!(err, MinimizerError::InvalidTolerance);
    assert_eq!(vm.fn_evals, 0);
}
