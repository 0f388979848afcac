//! Batch normalization.
//!
//! Training-time batches are whitened with their own statistics, single inputs with
//! the running statistics, and both are followed by a learned per-dimension scale
//! (`output_std`) and shift (`output_mean`).
//!
//! Design notes:
//! - `pass_all` uses batch statistics, so it is *not* the row-wise `pass`.
//! - Per-sample Jacobians cannot express the coupling between rows, so
//!   `gradient_all` fails with [`Error::Unsupported`]; backpropagation happens inside
//!   the batch-norm optimizer instead.

use rayon::prelude::*;

use crate::error::{ensure_finite, ensure_len};
use crate::function::{Shape, VectorFunction};
use crate::parallel::min_len;
use crate::{Error, Matrix, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchNormConfig {
    /// Added to every variance before the square root.
    pub epsilon: f64,
    /// EMA factor applied to the running mean on each training batch.
    pub mean_decay: f64,
    /// EMA factor applied to the running variance on each training batch.
    pub variance_decay: f64,
}

impl Default for BatchNormConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-8,
            mean_decay: 0.9,
            variance_decay: 0.9,
        }
    }
}

impl BatchNormConfig {
    pub fn validate(self) -> Result<()> {
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "batch norm epsilon must be finite and > 0, got {}",
                self.epsilon
            )));
        }
        for (name, decay) in [
            ("mean_decay", self.mean_decay),
            ("variance_decay", self.variance_decay),
        ] {
            if !(decay.is_finite() && (0.0..1.0).contains(&decay)) {
                return Err(Error::InvalidConfig(format!(
                    "batch norm {name} must be finite and in [0,1), got {decay}"
                )));
            }
        }
        Ok(())
    }
}

/// Mean and epsilon-padded variance of one dimension over a batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Moments {
    pub mean: f64,
    pub variance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchNorm {
    config: BatchNormConfig,
    output_mean: Vec<f64>,
    output_std: Vec<f64>,
    running_mean: Vec<f64>,
    running_variance: Vec<f64>,
}

impl BatchNorm {
    pub fn new(dim: usize) -> Result<Self> {
        Self::with_config(dim, BatchNormConfig::default())
    }

    pub fn with_config(dim: usize, config: BatchNormConfig) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidConfig("batch norm dim must be > 0".to_owned()));
        }
        config.validate()?;

        Ok(Self {
            config,
            output_mean: vec![0.0; dim],
            output_std: vec![1.0; dim],
            running_mean: vec![0.0; dim],
            running_variance: vec![1.0; dim],
        })
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.output_mean.len()
    }

    #[inline]
    pub fn config(&self) -> BatchNormConfig {
        self.config
    }

    #[inline]
    pub fn output_mean(&self) -> &[f64] {
        &self.output_mean
    }

    #[inline]
    pub fn output_std(&self) -> &[f64] {
        &self.output_std
    }

    #[inline]
    pub fn running_mean(&self) -> &[f64] {
        &self.running_mean
    }

    #[inline]
    pub fn running_variance(&self) -> &[f64] {
        &self.running_variance
    }

    /// Learned `(output_mean, output_std)`.
    #[inline]
    pub(crate) fn affine_mut(&mut self) -> (&mut [f64], &mut [f64]) {
        (&mut self.output_mean, &mut self.output_std)
    }

    /// Per-dimension statistics of a `(K, D)` batch. Empty batches give no moments.
    pub(crate) fn moments(&self, inputs: &Matrix) -> Result<Vec<Moments>> {
        ensure_len(inputs.cols(), self.dim(), "batch norm input")?;
        let k = inputs.rows();
        if k == 0 {
            return Ok(Vec::new());
        }

        let eps = self.config.epsilon;
        let moments: Vec<Moments> = (0..self.dim())
            .into_par_iter()
            .with_min_len(min_len(k))
            .map(|d| {
                let mut sum = 0.0;
                let mut sum_sq = 0.0;
                for row in inputs.iter_rows() {
                    sum += row[d];
                    sum_sq += row[d] * row[d];
                }
                let mean = sum / k as f64;
                // Clamp rounding noise before padding with epsilon.
                let variance = (sum_sq / k as f64 - mean * mean).max(0.0) + eps;
                Moments { mean, variance }
            })
            .collect();

        for m in &moments {
            ensure_finite(&[m.mean, m.variance], "batch norm statistics")?;
        }
        Ok(moments)
    }

    /// Fold one batch's statistics into the running EMA.
    pub(crate) fn record_batch(&mut self, moments: &[Moments]) {
        let mean_decay = self.config.mean_decay;
        let variance_decay = self.config.variance_decay;
        for ((rm, rv), m) in self
            .running_mean
            .iter_mut()
            .zip(self.running_variance.iter_mut())
            .zip(moments)
        {
            *rm = mean_decay * *rm + (1.0 - mean_decay) * m.mean;
            *rv = variance_decay * *rv + (1.0 - variance_decay) * m.variance;
        }
    }

    #[inline]
    fn inference_scale(&self, d: usize) -> f64 {
        self.output_std[d] / (self.running_variance[d] + self.config.epsilon).sqrt()
    }
}

impl VectorFunction for BatchNorm {
    fn shape(&self) -> Shape {
        Shape::Fixed {
            input: self.dim(),
            output: self.dim(),
        }
    }

    fn pass(&self, input: &[f64]) -> Result<Vec<f64>> {
        ensure_len(input.len(), self.dim(), "batch norm input")?;

        let out: Vec<f64> = input
            .iter()
            .enumerate()
            .map(|(d, &x)| {
                self.inference_scale(d) * (x - self.running_mean[d]) + self.output_mean[d]
            })
            .collect();
        ensure_finite(&out, "batch norm")?;
        Ok(out)
    }

    fn gradient(&self, input: &[f64]) -> Result<Matrix> {
        ensure_len(input.len(), self.dim(), "batch norm input")?;

        let mut jac = Matrix::zeros(self.dim(), self.dim());
        for d in 0..self.dim() {
            jac[(d, d)] = self.inference_scale(d);
        }
        ensure_finite(jac.as_slice(), "batch norm gradient")?;
        Ok(jac)
    }

    /// Normalizes with the batch's own statistics.
    fn pass_all(&self, inputs: &Matrix) -> Result<Matrix> {
        let moments = self.moments(inputs)?;
        let dim = self.dim();

        let mut out = Matrix::zeros(inputs.rows(), dim);
        out.as_mut_slice()
            .par_chunks_mut(dim)
            .with_min_len(min_len(dim))
            .zip(inputs.as_slice().par_chunks(dim))
            .for_each(|(y, x)| {
                for d in 0..dim {
                    let m = moments[d];
                    y[d] = self.output_std[d] * (x[d] - m.mean) / m.variance.sqrt()
                        + self.output_mean[d];
                }
            });
        ensure_finite(out.as_slice(), "batch norm")?;
        Ok(out)
    }

    fn gradient_all(&self, _inputs: &Matrix) -> Result<Vec<Matrix>> {
        Err(Error::Unsupported(
            "batch norm has no per-sample Jacobian; train it through its optimizer".to_owned(),
        ))
    }
}
