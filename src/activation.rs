//! Activation functions.
//!
//! Elementwise activations are scalar maps applied to every coordinate, so their
//! Jacobian is diagonal. Softmax couples all coordinates and has a dense Jacobian.
//!
//! Derivatives are expressed in terms of the *input* `x`, which lets the optimizers
//! backpropagate from the batch of inputs alone without caching outputs.

use crate::error::ensure_finite;
use crate::function::{Shape, VectorFunction};
use crate::{Error, Matrix, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
/// Element-wise activation function.
pub enum Activation {
    Identity,
    ReLU,
    LeakyReLU { alpha: f64 },
    Logistic,
    Tanh,
    Softplus,
    Swish,
    /// `x` for `x >= 0`, `-ln(1 - x)` below zero.
    LogLin,
}

impl Activation {
    /// Validate activation parameters.
    pub fn validate(self) -> Result<()> {
        match self {
            Activation::LeakyReLU { alpha } => {
                if !(alpha.is_finite() && alpha >= 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "leaky ReLU alpha must be finite and >= 0, got {alpha}"
                    )));
                }
            }
            Activation::Identity
            | Activation::ReLU
            | Activation::Logistic
            | Activation::Tanh
            | Activation::Softplus
            | Activation::Swish
            | Activation::LogLin => {}
        }

        Ok(())
    }

    #[inline]
    pub fn forward(self, x: f64) -> f64 {
        match self {
            Activation::Identity => x,
            Activation::ReLU => {
                if x > 0.0 {
                    x
                } else {
                    0.0
                }
            }
            Activation::LeakyReLU { alpha } => {
                if x > 0.0 {
                    x
                } else {
                    alpha * x
                }
            }
            Activation::Logistic => logistic(x),
            Activation::Tanh => x.tanh(),
            Activation::Softplus => softplus(x),
            Activation::Swish => x * logistic(x),
            Activation::LogLin => {
                if x >= 0.0 {
                    x
                } else {
                    -(-x).ln_1p()
                }
            }
        }
    }

    /// Derivative of the activation with respect to its input.
    #[inline]
    pub fn derivative(self, x: f64) -> f64 {
        match self {
            Activation::Identity => 1.0,
            Activation::ReLU => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::LeakyReLU { alpha } => {
                if x > 0.0 {
                    1.0
                } else {
                    alpha
                }
            }
            Activation::Logistic => {
                let s = logistic(x);
                s * (1.0 - s)
            }
            Activation::Tanh => {
                let y = x.tanh();
                1.0 - y * y
            }
            Activation::Softplus => logistic(x),
            Activation::Swish => {
                let s = logistic(x);
                s + x * s * (1.0 - s)
            }
            Activation::LogLin => {
                if x >= 0.0 {
                    1.0
                } else {
                    1.0 / (1.0 - x)
                }
            }
        }
    }
}

impl VectorFunction for Activation {
    fn shape(&self) -> Shape {
        Shape::Elementwise
    }

    fn pass(&self, input: &[f64]) -> Result<Vec<f64>> {
        let out: Vec<f64> = input.iter().map(|&x| self.forward(x)).collect();
        ensure_finite(&out, "activation")?;
        Ok(out)
    }

    fn gradient(&self, input: &[f64]) -> Result<Matrix> {
        let n = input.len();
        let mut jac = Matrix::zeros(n, n);
        for (i, &x) in input.iter().enumerate() {
            jac[(i, i)] = self.derivative(x);
        }
        ensure_finite(jac.as_slice(), "activation gradient")?;
        Ok(jac)
    }
}

#[inline]
fn logistic(x: f64) -> f64 {
    // Numerically stable sigmoid.
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

#[inline]
fn softplus(x: f64) -> f64 {
    // ln(1 + e^x) = max(x, 0) + ln(1 + e^-|x|)
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// `y_i = exp(x_i) / sum_j exp(x_j)`, shifted by the max for overflow safety.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Softmax;

impl VectorFunction for Softmax {
    fn shape(&self) -> Shape {
        Shape::Elementwise
    }

    fn pass(&self, input: &[f64]) -> Result<Vec<f64>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }
        ensure_finite(input, "softmax input")?;

        let max = input.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut out: Vec<f64> = input.iter().map(|&x| (x - max).exp()).collect();
        let sum: f64 = out.iter().sum();
        for y in &mut out {
            *y /= sum;
        }
        ensure_finite(&out, "softmax")?;
        Ok(out)
    }

    fn gradient(&self, input: &[f64]) -> Result<Matrix> {
        let y = self.pass(input)?;
        let n = y.len();
        let mut jac = Matrix::zeros(n, n);
        for i in 0..n {
            let mut off_diagonal = 0.0;
            for j in 0..n {
                if i != j {
                    let v = -y[i] * y[j];
                    jac[(i, j)] = v;
                    off_diagonal += v;
                }
            }
            // Equals y_i (1 - y_i) on the simplex and keeps every row summing to zero.
            jac[(i, i)] = -off_diagonal;
        }
        Ok(jac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Activation; 8] = [
        Activation::Identity,
        Activation::ReLU,
        Activation::LeakyReLU { alpha: 0.1 },
        Activation::Logistic,
        Activation::Tanh,
        Activation::Softplus,
        Activation::Swish,
        Activation::LogLin,
    ];

    #[test]
    fn leaky_relu_alpha_must_be_finite_and_non_negative() {
        assert!(
            Activation::LeakyReLU { alpha: f64::NAN }
                .validate()
                .is_err()
        );
        assert!(Activation::LeakyReLU { alpha: -0.1 }.validate().is_err());
        assert!(Activation::LeakyReLU { alpha: 0.1 }.validate().is_ok());
    }

    #[test]
    fn logistic_at_zero() {
        assert_eq!(Activation::Logistic.forward(0.0), 0.5);
        assert_eq!(Activation::Logistic.derivative(0.0), 0.25);
    }

    #[test]
    fn saturating_limits_stay_finite() {
        assert_eq!(Activation::Logistic.forward(1e4), 1.0);
        assert_eq!(Activation::Logistic.forward(-1e4), 0.0);
        assert_eq!(Activation::Tanh.forward(1e4), 1.0);
        assert_eq!(Activation::Tanh.forward(-1e4), -1.0);
        assert_eq!(Activation::Softplus.forward(1e4), 1e4);
        assert_eq!(Activation::Softplus.forward(-1e4), 0.0);
        assert!(Activation::Swish.forward(-1e4).abs() < 1e-300);
    }

    #[test]
    fn derivatives_match_central_differences() {
        let h = 1e-5;
        for act in ALL {
            for &x in &[-3.0, -0.7, 0.4, 2.5] {
                let numeric = (act.forward(x + h) - act.forward(x - h)) / (2.0 * h);
                let analytic = act.derivative(x);
                assert!(
                    (numeric - analytic).abs() < 1e-7,
                    "{act:?} at {x}: analytic={analytic} numeric={numeric}"
                );
            }
        }
    }

    #[test]
    fn vector_form_is_elementwise_with_diagonal_jacobian() {
        let x = [-1.0, 0.5, 2.0];
        let y = Activation::Swish.pass(&x).unwrap();
        let jac = Activation::Swish.gradient(&x).unwrap();
        for i in 0..3 {
            assert_eq!(y[i], Activation::Swish.forward(x[i]));
            for j in 0..3 {
                if i == j {
                    assert_eq!(jac[(i, j)], Activation::Swish.derivative(x[i]));
                } else {
                    assert_eq!(jac[(i, j)], 0.0);
                }
            }
        }
    }

    #[test]
    fn empty_input_gives_empty_output() {
        assert!(Activation::ReLU.pass(&[]).unwrap().is_empty());
        assert!(Softmax.pass(&[]).unwrap().is_empty());
    }

    #[test]
    fn non_finite_output_is_a_numerical_error() {
        let err = Activation::ReLU.pass(&[f64::INFINITY]).unwrap_err();
        assert!(matches!(err, Error::Numerical(_)));
        assert!(matches!(
            Softmax.pass(&[f64::NAN, 0.0]),
            Err(Error::Numerical(_))
        ));
    }

    #[test]
    fn softmax_is_overflow_safe_and_rows_sum_to_zero() {
        let y = Softmax.pass(&[1000.0, 1000.0, 1000.0]).unwrap();
        for &p in &y {
            assert_eq!(p, 1.0 / 3.0);
        }

        let jac = Softmax.gradient(&[1000.0, 1000.0, 1000.0]).unwrap();
        for r in 0..3 {
            let sum: f64 = jac.row(r).iter().sum();
            assert_eq!(sum, 0.0);
        }
    }

    #[test]
    fn softmax_jacobian_matches_central_differences() {
        let x = [0.3, -1.2, 2.0, 0.0];
        let jac = Softmax.gradient(&x).unwrap();
        let h = 1e-5;
        for j in 0..x.len() {
            let mut plus = x;
            let mut minus = x;
            plus[j] += h;
            minus[j] -= h;
            let yp = Softmax.pass(&plus).unwrap();
            let ym = Softmax.pass(&minus).unwrap();
            for i in 0..x.len() {
                let numeric = (yp[i] - ym[i]) / (2.0 * h);
                assert!((numeric - jac[(i, j)]).abs() < 1e-8);
            }
        }
    }
}
