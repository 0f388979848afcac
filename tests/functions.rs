use nnkit::{
    Activation, Affine, Function, Init, Matrix, Residual, Series, SeriesBuilder, VectorFunction,
};

fn assert_close(analytic: f64, numeric: f64, abs_tol: f64, rel_tol: f64) {
    let diff = (analytic - numeric).abs();
    let scale = analytic.abs().max(numeric.abs());
    assert!(
        diff <= abs_tol || diff <= rel_tol * scale,
        "analytic={analytic} numeric={numeric} diff={diff}"
    );
}

fn check_jacobian(f: &dyn VectorFunction, x: &[f64]) {
    let h = 1e-5;
    let jac = f.gradient(x).unwrap();
    for j in 0..x.len() {
        let mut plus = x.to_vec();
        let mut minus = x.to_vec();
        plus[j] += h;
        minus[j] -= h;
        let y_plus = f.pass(&plus).unwrap();
        let y_minus = f.pass(&minus).unwrap();
        for i in 0..y_plus.len() {
            let numeric = (y_plus[i] - y_minus[i]) / (2.0 * h);
            assert_close(jac[(i, j)], numeric, 1e-6, 1e-5);
        }
    }
}

#[test]
fn logistic_at_zero() {
    let f = Function::LOGISTIC;
    assert_eq!(f.pass(&[0.0]).unwrap(), vec![0.5]);
    assert_eq!(f.gradient(&[0.0]).unwrap()[(0, 0)], 0.25);
}

#[test]
fn affine_identity_parameters() {
    let params = Matrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 0.0]]).unwrap();
    let f = Affine::from_parameters(params).unwrap();
    assert_eq!(f.pass(&[3.0, -2.0]).unwrap(), vec![3.0, -2.0]);
    let jac = f.gradient(&[3.0, -2.0]).unwrap();
    assert_eq!(jac.as_slice(), &[1.0, 0.0, 0.0, 1.0]);
}

#[test]
fn softmax_is_overflow_safe() {
    let f = Function::SOFTMAX;
    let y = f.pass(&[1000.0, 1000.0, 1000.0]).unwrap();
    for v in &y {
        assert!((v - 1.0 / 3.0).abs() < 1e-15);
    }
    let jac = f.gradient(&[1000.0, 1000.0, 1000.0]).unwrap();
    for row in jac.iter_rows() {
        assert_eq!(row.iter().sum::<f64>(), 0.0);
    }
}

#[test]
fn composed_network_jacobian_matches_finite_differences() {
    let model: Function = SeriesBuilder::new(3)
        .unwrap()
        .add_dense(5, Activation::Tanh)
        .unwrap()
        .add_residual(4, Activation::Softplus)
        .unwrap()
        .add_dense(4, Activation::Swish)
        .unwrap()
        .add_softmax()
        .build_with_seed(42)
        .unwrap()
        .into();

    for x in [[0.3, -0.7, 1.1], [-1.5, 0.2, 0.05]] {
        check_jacobian(&model, &x);
    }
}

#[test]
fn series_jacobian_is_the_chain_rule() {
    let a = Affine::new_with_seed(3, 2, Init::Xavier, 1).unwrap();
    let b = Function::TANH;
    let x = [0.4, -0.9, 0.25];

    let series = Series::new(vec![a.clone().into(), Function::TANH]).unwrap();
    let chained = b
        .gradient(&a.pass(&x).unwrap())
        .unwrap()
        .matmul(&a.gradient(&x).unwrap())
        .unwrap();
    let direct = series.gradient(&x).unwrap();
    for (u, v) in direct.as_slice().iter().zip(chained.as_slice()) {
        assert!((u - v).abs() < 1e-12);
    }
    assert_eq!(series.into_children().len(), 2);
}

#[test]
fn residual_adds_the_input_exactly() {
    let inner = Affine::new_with_seed(3, 3, Init::He, 9).unwrap();
    let block = Residual::new(inner.clone().into()).unwrap();
    let x = [0.1, -2.0, 3.5];
    let g = inner.pass(&x).unwrap();
    let y = block.pass(&x).unwrap();
    for ((yi, gi), xi) in y.iter().zip(&g).zip(&x) {
        assert!((yi - gi - xi).abs() < 1e-12);
    }
    assert_eq!(block.into_inner().parameter_count(), 12);
    assert!(Residual::new(Affine::new_with_seed(3, 2, Init::He, 0).unwrap().into()).is_err());
}

#[test]
fn batched_pass_matches_rows_without_batch_norm() {
    let model: Function = SeriesBuilder::new(2)
        .unwrap()
        .add_dense(6, Activation::LeakyReLU { alpha: 0.1 })
        .unwrap()
        .add_dense(3, Activation::LogLin)
        .unwrap()
        .build_with_seed(3)
        .unwrap()
        .into();

    let x = Matrix::from_rows(&[vec![0.5, -1.0], vec![2.0, 0.0], vec![-0.3, 0.8]]).unwrap();
    let batched = model.pass_all(&x).unwrap();
    for (k, row) in x.iter_rows().enumerate() {
        assert_eq!(batched.row(k), model.pass(row).unwrap().as_slice());
    }
}
