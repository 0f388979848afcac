//! The vector-function algebra.
//!
//! Every differentiable building block implements [`VectorFunction`]: a forward map
//! `R^N -> R^M` plus its Jacobian. [`Function`] is the closed sum of the kinds shipped by
//! this crate (with an escape hatch for user types); the optimizer factory dispatches
//! on its tag.
//!
//! Design notes:
//! - Batched forms run rows on the rayon pool and preserve row order.
//! - Only batch normalization departs from "batched == per-row"; see
//!   [`crate::BatchNorm`].

use rayon::prelude::*;

use crate::activation::{Activation, Softmax};
use crate::affine::Affine;
use crate::batch_norm::BatchNorm;
use crate::error::ensure_len;
use crate::parallel::min_len;
use crate::residual::Residual;
use crate::series::Series;
use crate::{Error, Matrix, Result};

/// Input/output dimensions of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Accepts any length and returns the same length.
    Elementwise,
    Fixed { input: usize, output: usize },
}

impl Shape {
    /// Output length for an input of length `input`.
    pub fn output_dim(self, input: usize) -> Result<usize> {
        match self {
            Shape::Elementwise => Ok(input),
            Shape::Fixed {
                input: expected,
                output,
            } => {
                ensure_len(input, expected, "input")?;
                Ok(output)
            }
        }
    }

    /// Declared input length, if fixed.
    pub fn input_dim(self) -> Option<usize> {
        match self {
            Shape::Elementwise => None,
            Shape::Fixed { input, .. } => Some(input),
        }
    }

    /// Shape of `next ∘ self`.
    pub fn then(self, next: Shape) -> Result<Shape> {
        match (self, next) {
            (Shape::Elementwise, s) | (s, Shape::Elementwise) => Ok(s),
            (
                Shape::Fixed { input, output: mid },
                Shape::Fixed {
                    input: next_in,
                    output,
                },
            ) => {
                if mid != next_in {
                    return Err(Error::InvalidShape(format!(
                        "cannot chain output dim {mid} into input dim {next_in}"
                    )));
                }
                Ok(Shape::Fixed { input, output })
            }
        }
    }
}

/// A differentiable map `R^N -> R^M`.
///
/// `gradient(x)[i][j]` is `∂pass(x)_i / ∂x_j`.
pub trait VectorFunction: Send + Sync + std::fmt::Debug {
    fn shape(&self) -> Shape;

    fn pass(&self, input: &[f64]) -> Result<Vec<f64>>;

    /// Jacobian at `input`, shape `(M, N)`.
    fn gradient(&self, input: &[f64]) -> Result<Matrix>;

    /// Apply [`VectorFunction::pass`] to each row of a `(K, N)` batch.
    fn pass_all(&self, inputs: &Matrix) -> Result<Matrix> {
        let cols = self.shape().output_dim(inputs.cols())?;
        let rows = (0..inputs.rows())
            .into_par_iter()
            .with_min_len(min_len(inputs.cols() * cols.max(1)))
            .map(|k| {
                let out = self.pass(inputs.row(k))?;
                ensure_len(out.len(), cols, "output")?;
                Ok(out)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Matrix::from_row_vecs(rows, cols))
    }

    /// Apply [`VectorFunction::gradient`] to each row of a `(K, N)` batch.
    fn gradient_all(&self, inputs: &Matrix) -> Result<Vec<Matrix>> {
        let cols = self.shape().output_dim(inputs.cols())?;
        (0..inputs.rows())
            .into_par_iter()
            .with_min_len(min_len(inputs.cols() * cols.max(1)))
            .map(|k| self.gradient(inputs.row(k)))
            .collect()
    }
}

/// A differentiable building block.
#[derive(Debug)]
pub enum Function {
    Activation(Activation),
    Softmax(Softmax),
    Affine(Affine),
    BatchNorm(BatchNorm),
    Series(Series),
    Residual(Residual),
    /// User-defined function, trained through its Jacobian.
    Custom(Box<dyn VectorFunction>),
}

impl Function {
    pub const IDENTITY: Function = Function::Activation(Activation::Identity);
    pub const RELU: Function = Function::Activation(Activation::ReLU);
    pub const LOGISTIC: Function = Function::Activation(Activation::Logistic);
    pub const TANH: Function = Function::Activation(Activation::Tanh);
    pub const SOFTPLUS: Function = Function::Activation(Activation::Softplus);
    pub const SWISH: Function = Function::Activation(Activation::Swish);
    pub const LOGLIN: Function = Function::Activation(Activation::LogLin);
    pub const SOFTMAX: Function = Function::Softmax(Softmax);

    pub fn custom<F: VectorFunction + 'static>(f: F) -> Self {
        Function::Custom(Box::new(f))
    }

    /// The function as a trait object.
    pub fn as_dyn(&self) -> &dyn VectorFunction {
        match self {
            Function::Activation(f) => f,
            Function::Softmax(f) => f,
            Function::Affine(f) => f,
            Function::BatchNorm(f) => f,
            Function::Series(f) => f,
            Function::Residual(f) => f,
            Function::Custom(f) => f.as_ref(),
        }
    }

    /// Number of trainable scalars.
    pub fn parameter_count(&self) -> usize {
        match self {
            Function::Affine(f) => f.parameters().as_slice().len(),
            Function::BatchNorm(f) => 2 * f.dim(),
            Function::Series(f) => f.children().iter().map(Function::parameter_count).sum(),
            Function::Residual(f) => f.inner().parameter_count(),
            Function::Activation(_) | Function::Softmax(_) | Function::Custom(_) => 0,
        }
    }
}

impl VectorFunction for Function {
    #[inline]
    fn shape(&self) -> Shape {
        self.as_dyn().shape()
    }

    #[inline]
    fn pass(&self, input: &[f64]) -> Result<Vec<f64>> {
        self.as_dyn().pass(input)
    }

    #[inline]
    fn gradient(&self, input: &[f64]) -> Result<Matrix> {
        self.as_dyn().gradient(input)
    }

    #[inline]
    fn pass_all(&self, inputs: &Matrix) -> Result<Matrix> {
        self.as_dyn().pass_all(inputs)
    }

    #[inline]
    fn gradient_all(&self, inputs: &Matrix) -> Result<Vec<Matrix>> {
        self.as_dyn().gradient_all(inputs)
    }
}

impl From<Activation> for Function {
    fn from(f: Activation) -> Self {
        Function::Activation(f)
    }
}

impl From<Softmax> for Function {
    fn from(f: Softmax) -> Self {
        Function::Softmax(f)
    }
}

impl From<Affine> for Function {
    fn from(f: Affine) -> Self {
        Function::Affine(f)
    }
}

impl From<BatchNorm> for Function {
    fn from(f: BatchNorm) -> Self {
        Function::BatchNorm(f)
    }
}

impl From<Series> for Function {
    fn from(f: Series) -> Self {
        Function::Series(f)
    }
}

impl From<Residual> for Function {
    fn from(f: Residual) -> Self {
        Function::Residual(f)
    }
}
