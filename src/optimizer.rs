//! Function optimizers.
//!
//! A [`FunctionOptimizer`] mirrors the tree of a [`Function`]: it borrows the function
//! mutably, owns one [`ScalarOptimizer`] per trainable scalar, and exposes a single
//! fused step, `update(inputs, d_out) -> d_in`, that backpropagates the batch and
//! updates parameters in place.
//!
//! Design notes:
//! - `d_in` is always computed with the parameters as they were before the step.
//! - Workers only read inputs and write disjoint cells; parameter gradients are reduced
//!   after the join and the optimizer step is applied on the calling thread.
//! - A `Numerical` error leaves parameters in an unspecified (but finite-sized) state.

use rayon::prelude::*;
use tracing::trace;

use crate::activation::Activation;
use crate::affine::Affine;
use crate::batch_norm::{BatchNorm, Moments};
use crate::error::{ensure_finite, ensure_len};
use crate::function::{Function, Shape, VectorFunction};
use crate::matmul::{View, gemm};
use crate::optim::{ScalarOptimizer, Strategy, check_learning_rate};
use crate::parallel::min_len;
use crate::{Error, Matrix, Result};

/// Optimizer for one [`Function`], chosen by [`FunctionOptimizer::create`].
#[derive(Debug)]
pub enum FunctionOptimizer<'a> {
    Affine(AffineOptimizer<'a>),
    BatchNorm(BatchNormOptimizer<'a>),
    Series(SeriesOptimizer<'a>),
    Residual(ResidualOptimizer<'a>),
    Elementwise(ElementwiseOptimizer),
    /// Chain rule through batched Jacobians; used for parameter-free functions.
    Jacobian(JacobianOptimizer<'a>),
}

impl<'a> FunctionOptimizer<'a> {
    /// Build the optimizer matching the kind of `function`.
    pub fn create(function: &'a mut Function) -> Self {
        match function {
            Function::Affine(f) => {
                trace!(input = f.input_dim(), output = f.output_dim(), "affine optimizer");
                FunctionOptimizer::Affine(AffineOptimizer::new(f))
            }
            Function::BatchNorm(f) => {
                trace!(dim = f.dim(), "batch norm optimizer");
                FunctionOptimizer::BatchNorm(BatchNormOptimizer::new(f))
            }
            Function::Series(f) => {
                trace!(children = f.len(), "series optimizer");
                FunctionOptimizer::Series(SeriesOptimizer {
                    children: f
                        .children_mut()
                        .iter_mut()
                        .map(FunctionOptimizer::create)
                        .collect(),
                })
            }
            Function::Residual(f) => FunctionOptimizer::Residual(ResidualOptimizer {
                inner: Box::new(FunctionOptimizer::create(f.inner_mut())),
            }),
            Function::Activation(f) => {
                FunctionOptimizer::Elementwise(ElementwiseOptimizer { activation: *f })
            }
            other @ (Function::Softmax(_) | Function::Custom(_)) => {
                trace!("jacobian optimizer");
                FunctionOptimizer::Jacobian(JacobianOptimizer { target: other })
            }
        }
    }

    /// Backpropagate `d_out` through the batch `inputs`, updating parameters in place.
    ///
    /// `inputs` is `(K, N)`, `d_out` is `(K, M)`; the result is `d_in`, `(K, N)`.
    pub fn update(&mut self, inputs: &Matrix, d_out: &Matrix) -> Result<Matrix> {
        if inputs.rows() != d_out.rows() {
            return Err(Error::InvalidShape(format!(
                "inputs have {} rows but d_out has {}",
                inputs.rows(),
                d_out.rows()
            )));
        }
        match self {
            FunctionOptimizer::Affine(o) => o.update(inputs, d_out),
            FunctionOptimizer::BatchNorm(o) => o.update(inputs, d_out),
            FunctionOptimizer::Series(o) => o.update(inputs, d_out),
            FunctionOptimizer::Residual(o) => o.update(inputs, d_out),
            FunctionOptimizer::Elementwise(o) => o.update(inputs, d_out),
            FunctionOptimizer::Jacobian(o) => o.update(inputs, d_out),
        }
    }

    /// Training-mode forward pass of the target.
    pub fn pass_all(&self, inputs: &Matrix) -> Result<Matrix> {
        match self {
            FunctionOptimizer::Affine(o) => o.target.pass_all(inputs),
            FunctionOptimizer::BatchNorm(o) => o.target.pass_all(inputs),
            FunctionOptimizer::Series(o) => {
                let mut x = inputs.clone();
                for child in &o.children {
                    x = child.pass_all(&x)?;
                }
                Ok(x)
            }
            FunctionOptimizer::Residual(o) => {
                let mut out = o.inner.pass_all(inputs)?;
                for (y, x) in out.as_mut_slice().iter_mut().zip(inputs.as_slice()) {
                    *y += x;
                }
                Ok(out)
            }
            FunctionOptimizer::Elementwise(o) => o.activation.pass_all(inputs),
            FunctionOptimizer::Jacobian(o) => o.target.pass_all(inputs),
        }
    }

    /// Number of scalar optimizers owned by this tree.
    pub fn parameter_count(&self) -> usize {
        let mut count = 0;
        self.visit(&mut |_| count += 1);
        count
    }

    /// Smallest training time over every scalar optimizer, or `None` without parameters.
    pub fn training_time(&self) -> Option<u64> {
        let mut min: Option<u64> = None;
        self.visit(&mut |o| {
            let t = o.training_time();
            min = Some(min.map_or(t, |m| m.min(t)));
        });
        min
    }

    pub fn use_sgd(&mut self) {
        self.visit_mut(&mut |o| {
            // Sgd has no hyperparameters to reject.
            let _ = o.set_strategy(Strategy::Sgd);
        });
    }

    pub fn use_sgd_momentum(&mut self, decay: f64) -> Result<()> {
        self.use_strategy(Strategy::Momentum { decay })
    }

    pub fn use_adagrad(&mut self, epsilon: f64) -> Result<()> {
        self.use_strategy(Strategy::AdaGrad { epsilon })
    }

    pub fn use_rmsprop(&mut self, epsilon: f64, decay: f64) -> Result<()> {
        self.use_strategy(Strategy::RmsProp { decay, epsilon })
    }

    pub fn use_adam(&mut self, beta1: f64, beta2: f64, epsilon: f64) -> Result<()> {
        self.use_strategy(Strategy::Adam {
            beta1,
            beta2,
            epsilon,
        })
    }

    /// Set the strategy of every scalar optimizer that has not started training.
    pub fn use_strategy(&mut self, strategy: Strategy) -> Result<()> {
        strategy.validate()?;
        self.visit_mut(&mut |o| {
            let _ = o.set_strategy(strategy);
        });
        Ok(())
    }

    /// Set the learning rate of every scalar optimizer that has not started training.
    pub fn set_learning_rate(&mut self, learning_rate: f64) -> Result<()> {
        check_learning_rate(learning_rate)?;
        self.visit_mut(&mut |o| {
            let _ = o.set_learning_rate(learning_rate);
        });
        Ok(())
    }

    fn visit(&self, f: &mut dyn FnMut(&ScalarOptimizer)) {
        match self {
            FunctionOptimizer::Affine(o) => o.params.iter().for_each(f),
            FunctionOptimizer::BatchNorm(o) => {
                o.mean.iter().chain(&o.std).for_each(f);
            }
            FunctionOptimizer::Series(o) => {
                for child in &o.children {
                    child.visit(f);
                }
            }
            FunctionOptimizer::Residual(o) => o.inner.visit(f),
            FunctionOptimizer::Elementwise(_) | FunctionOptimizer::Jacobian(_) => {}
        }
    }

    fn visit_mut(&mut self, f: &mut dyn FnMut(&mut ScalarOptimizer)) {
        match self {
            FunctionOptimizer::Affine(o) => o.params.iter_mut().for_each(f),
            FunctionOptimizer::BatchNorm(o) => {
                o.mean.iter_mut().chain(o.std.iter_mut()).for_each(f);
            }
            FunctionOptimizer::Series(o) => {
                for child in &mut o.children {
                    child.visit_mut(f);
                }
            }
            FunctionOptimizer::Residual(o) => o.inner.visit_mut(f),
            FunctionOptimizer::Elementwise(_) | FunctionOptimizer::Jacobian(_) => {}
        }
    }
}

fn check_widths(inputs: &Matrix, d_out: &Matrix, input: usize, output: usize) -> Result<()> {
    ensure_len(inputs.cols(), input, "input row")?;
    ensure_len(d_out.cols(), output, "d_out row")
}

/// Affine layer: one scalar optimizer per cell of the `(N + 1, M)` parameter matrix.
#[derive(Debug)]
pub struct AffineOptimizer<'a> {
    target: &'a mut Affine,
    params: Vec<ScalarOptimizer>,
}

impl<'a> AffineOptimizer<'a> {
    fn new(target: &'a mut Affine) -> Self {
        let count = target.parameters().as_slice().len();
        Self {
            target,
            params: vec![ScalarOptimizer::default(); count],
        }
    }

    pub fn target(&self) -> &Affine {
        self.target
    }

    fn update(&mut self, inputs: &Matrix, d_out: &Matrix) -> Result<Matrix> {
        let n = self.target.input_dim();
        let m = self.target.output_dim();
        check_widths(inputs, d_out, n, m)?;

        let k = inputs.rows();
        let mut d_in = Matrix::zeros(k, n);
        if k == 0 {
            return Ok(d_in);
        }

        // d_in = d_out * W^T, reading W^T through strides.
        let weights = View::new(self.target.parameters().as_slice(), n, m)?;
        gemm(View::of(d_out), weights.t(), &mut d_in)?;
        ensure_finite(d_in.as_slice(), "affine d_in")?;

        // Rows reduce into per-task partial gradients, summed after the join.
        let grads = (0..k)
            .into_par_iter()
            .with_min_len(min_len(n * m))
            .fold(
                || vec![0.0; (n + 1) * m],
                |mut acc, r| {
                    let x = inputs.row(r);
                    let g = d_out.row(r);
                    for (i, &xi) in x.iter().enumerate() {
                        for (a, &gj) in acc[i * m..(i + 1) * m].iter_mut().zip(g) {
                            *a = gj.mul_add(xi, *a);
                        }
                    }
                    for (a, &gj) in acc[n * m..].iter_mut().zip(g) {
                        *a += gj;
                    }
                    acc
                },
            )
            .reduce(
                || vec![0.0; (n + 1) * m],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(&b) {
                        *x += y;
                    }
                    a
                },
            );
        ensure_finite(&grads, "affine parameter gradient")?;

        let params = self.target.parameters_mut().as_mut_slice();
        for ((p, opt), g) in params.iter_mut().zip(&mut self.params).zip(&grads) {
            *p += opt.update(*g);
        }
        ensure_finite(params, "affine parameters")?;

        Ok(d_in)
    }
}

/// Batch normalization: optimizers for the learned shift and scale of every dimension.
#[derive(Debug)]
pub struct BatchNormOptimizer<'a> {
    target: &'a mut BatchNorm,
    mean: Vec<ScalarOptimizer>,
    std: Vec<ScalarOptimizer>,
}

struct DimGradient {
    d_output_mean: f64,
    d_output_std: f64,
    d_in: Vec<f64>,
}

impl<'a> BatchNormOptimizer<'a> {
    fn new(target: &'a mut BatchNorm) -> Self {
        let dim = target.dim();
        Self {
            target,
            mean: vec![ScalarOptimizer::default(); dim],
            std: vec![ScalarOptimizer::default(); dim],
        }
    }

    pub fn target(&self) -> &BatchNorm {
        self.target
    }

    fn update(&mut self, inputs: &Matrix, d_out: &Matrix) -> Result<Matrix> {
        let dim = self.target.dim();
        check_widths(inputs, d_out, dim, dim)?;

        let k = inputs.rows();
        let mut d_in = Matrix::zeros(k, dim);
        if k == 0 {
            return Ok(d_in);
        }

        let moments = self.target.moments(inputs)?;
        let scale = self.target.output_std();
        let per_dim: Vec<DimGradient> = (0..dim)
            .into_par_iter()
            .with_min_len(min_len(k))
            .map(|d| dimension_gradient(inputs, d_out, d, moments[d], scale[d]))
            .collect();

        for (d, grad) in per_dim.iter().enumerate() {
            for (r, &v) in grad.d_in.iter().enumerate() {
                d_in[(r, d)] = v;
            }
        }
        ensure_finite(d_in.as_slice(), "batch norm d_in")?;

        let (output_mean, output_std) = self.target.affine_mut();
        for (d, grad) in per_dim.iter().enumerate() {
            output_mean[d] += self.mean[d].update(grad.d_output_mean);
            output_std[d] += self.std[d].update(grad.d_output_std);
        }
        ensure_finite(output_mean, "batch norm output_mean")?;
        ensure_finite(output_std, "batch norm output_std")?;

        self.target.record_batch(&moments);
        Ok(d_in)
    }
}

fn dimension_gradient(
    inputs: &Matrix,
    d_out: &Matrix,
    d: usize,
    moments: Moments,
    output_std: f64,
) -> DimGradient {
    let k = inputs.rows() as f64;
    let sigma = moments.variance.sqrt();

    let mut d_output_std = 0.0;
    let mut d_output_mean = 0.0;
    let mut sum_d_shift = 0.0;
    let mut sum_d_shift_shift = 0.0;
    let mut sum_shift = 0.0;
    for (x, g) in inputs.iter_rows().zip(d_out.iter_rows()) {
        let shift = x[d] - moments.mean;
        let d_shift = g[d] * output_std;
        d_output_std += g[d] * shift / sigma;
        d_output_mean += g[d];
        sum_d_shift += d_shift;
        sum_d_shift_shift += d_shift * shift;
        sum_shift += shift;
    }

    let d_var = -sum_d_shift_shift / (2.0 * sigma * sigma * sigma);
    let d_mean = -sum_d_shift / sigma - d_var * 2.0 / k * sum_shift;

    let d_in = inputs
        .iter_rows()
        .zip(d_out.iter_rows())
        .map(|(x, g)| {
            let shift = x[d] - moments.mean;
            let d_shift = g[d] * output_std;
            d_shift / sigma + d_var * 2.0 * shift / k + d_mean / k
        })
        .collect();

    DimGradient {
        d_output_mean,
        d_output_std,
        d_in,
    }
}

/// Series: forward through the children, then backpropagate right to left.
#[derive(Debug)]
pub struct SeriesOptimizer<'a> {
    children: Vec<FunctionOptimizer<'a>>,
}

impl SeriesOptimizer<'_> {
    pub fn children(&self) -> &[FunctionOptimizer<'_>] {
        &self.children
    }

    fn update(&mut self, inputs: &Matrix, d_out: &Matrix) -> Result<Matrix> {
        // activations[i] is the input batch of child i.
        let mut activations = Vec::with_capacity(self.children.len());
        activations.push(inputs.clone());
        for child in &self.children[..self.children.len().saturating_sub(1)] {
            let next = child.pass_all(activations.last().unwrap_or(inputs))?;
            activations.push(next);
        }

        let mut grad = d_out.clone();
        for (child, x) in self.children.iter_mut().zip(&activations).rev() {
            grad = child.update(x, &grad)?;
        }
        Ok(grad)
    }
}

/// Residual block: the inner optimizer plus the identity path.
#[derive(Debug)]
pub struct ResidualOptimizer<'a> {
    inner: Box<FunctionOptimizer<'a>>,
}

impl ResidualOptimizer<'_> {
    pub fn inner(&self) -> &FunctionOptimizer<'_> {
        &self.inner
    }

    fn update(&mut self, inputs: &Matrix, d_out: &Matrix) -> Result<Matrix> {
        ensure_len(d_out.cols(), inputs.cols(), "residual d_out row")?;
        let mut d_in = self.inner.update(inputs, d_out)?;
        for (a, &g) in d_in.as_mut_slice().iter_mut().zip(d_out.as_slice()) {
            *a += g;
        }
        Ok(d_in)
    }
}

/// Elementwise activation: `d_in = d_out * f'(x)`.
#[derive(Debug, Clone, Copy)]
pub struct ElementwiseOptimizer {
    activation: Activation,
}

impl ElementwiseOptimizer {
    pub fn activation(&self) -> Activation {
        self.activation
    }

    fn update(&mut self, inputs: &Matrix, d_out: &Matrix) -> Result<Matrix> {
        let n = inputs.cols();
        ensure_len(d_out.cols(), n, "d_out row")?;

        let mut d_in = Matrix::zeros(inputs.rows(), n);
        if n == 0 {
            return Ok(d_in);
        }
        let activation = self.activation;
        d_in.as_mut_slice()
            .par_chunks_mut(n)
            .with_min_len(min_len(n))
            .zip(inputs.as_slice().par_chunks(n))
            .zip(d_out.as_slice().par_chunks(n))
            .for_each(|((out, x), g)| {
                for ((o, &xi), &gi) in out.iter_mut().zip(x).zip(g) {
                    *o = gi * activation.derivative(xi);
                }
            });
        ensure_finite(d_in.as_slice(), "activation d_in")?;
        Ok(d_in)
    }
}

/// Parameter-free fallback: `d_in[k] = d_out[k]^T J(x_k)`.
#[derive(Debug)]
pub struct JacobianOptimizer<'a> {
    target: &'a Function,
}

impl JacobianOptimizer<'_> {
    pub fn target(&self) -> &Function {
        self.target
    }

    fn update(&mut self, inputs: &Matrix, d_out: &Matrix) -> Result<Matrix> {
        let output = match self.target.shape() {
            Shape::Elementwise => inputs.cols(),
            Shape::Fixed { input, output } => {
                ensure_len(inputs.cols(), input, "input row")?;
                output
            }
        };
        ensure_len(d_out.cols(), output, "d_out row")?;

        let jacobians = self.target.gradient_all(inputs)?;
        let rows = jacobians
            .par_iter()
            .enumerate()
            .with_min_len(min_len(inputs.cols() * output.max(1)))
            .map(|(k, jac)| jac.vec_mul(d_out.row(k)))
            .collect::<Result<Vec<_>>>()?;

        let d_in = Matrix::from_row_vecs(rows, inputs.cols());
        ensure_finite(d_in.as_slice(), "d_in")?;
        Ok(d_in)
    }
}
