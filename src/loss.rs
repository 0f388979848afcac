//! Loss functions over batches.
//!
//! These build the `d_out` batch fed to [`crate::FunctionOptimizer::update`]:
//!
//! - run `optimizer.pass_all(inputs)` to get predictions
//! - compute `(loss, d_out)` with a `*_backward` helper
//! - run `optimizer.update(inputs, &d_out)`

use crate::error::ensure_len;
use crate::{Error, Matrix, Result};

/// Added to probabilities before taking logs or reciprocals.
pub const NLL_EPSILON: f64 = 0.001;

fn check_same_shape(pred: &Matrix, target: &Matrix) -> Result<()> {
    if (pred.rows(), pred.cols()) != (target.rows(), target.cols()) {
        return Err(Error::InvalidShape(format!(
            "pred is ({}, {}) but target is ({}, {})",
            pred.rows(),
            pred.cols(),
            target.rows(),
            target.cols()
        )));
    }
    Ok(())
}

fn check_labels(probs: &Matrix, labels: &[usize]) -> Result<()> {
    ensure_len(labels.len(), probs.rows(), "labels")?;
    if let Some((k, &label)) = labels
        .iter()
        .enumerate()
        .find(|&(_, &label)| label >= probs.cols())
    {
        return Err(Error::InvalidData(format!(
            "label {label} at row {k} is out of range for {} classes",
            probs.cols()
        )));
    }
    Ok(())
}

/// Mean squared error over every entry: `0.5 * mean((pred - target)^2)`.
pub fn mse(pred: &Matrix, target: &Matrix) -> Result<f64> {
    check_same_shape(pred, target)?;
    if pred.is_empty() {
        return Ok(0.0);
    }

    let inv_n = 1.0 / pred.as_slice().len() as f64;
    let mut sum_sq = 0.0_f64;
    for (p, t) in pred.as_slice().iter().zip(target.as_slice()) {
        let diff = p - t;
        sum_sq = diff.mul_add(diff, sum_sq);
    }
    Ok(0.5 * sum_sq * inv_n)
}

/// MSE loss and its gradient `(pred - target) / n`.
pub fn mse_backward(pred: &Matrix, target: &Matrix) -> Result<(f64, Matrix)> {
    check_same_shape(pred, target)?;
    let mut d_pred = Matrix::zeros(pred.rows(), pred.cols());
    if pred.is_empty() {
        return Ok((0.0, d_pred));
    }

    let inv_n = 1.0 / pred.as_slice().len() as f64;
    let mut sum_sq = 0.0_f64;
    for ((d, p), t) in d_pred
        .as_mut_slice()
        .iter_mut()
        .zip(pred.as_slice())
        .zip(target.as_slice())
    {
        let diff = p - t;
        sum_sq = diff.mul_add(diff, sum_sq);
        *d = diff * inv_n;
    }
    Ok((0.5 * sum_sq * inv_n, d_pred))
}

/// Mean negative log-likelihood `-mean(ln(p[k][label_k] + eps))` of a batch of probabilities.
pub fn nll(probs: &Matrix, labels: &[usize]) -> Result<f64> {
    check_labels(probs, labels)?;
    if labels.is_empty() {
        return Ok(0.0);
    }

    let sum: f64 = labels
        .iter()
        .enumerate()
        .map(|(k, &label)| -(probs[(k, label)] + NLL_EPSILON).ln())
        .sum();
    Ok(sum / labels.len() as f64)
}

/// Gradient of [`nll`]: `-1 / (p + eps) / K` at each label, zero elsewhere.
pub fn nll_backward(probs: &Matrix, labels: &[usize]) -> Result<Matrix> {
    check_labels(probs, labels)?;

    let mut d_probs = Matrix::zeros(probs.rows(), probs.cols());
    let inv_k = 1.0 / labels.len().max(1) as f64;
    for (k, &label) in labels.iter().enumerate() {
        d_probs[(k, label)] = -inv_k / (probs[(k, label)] + NLL_EPSILON);
    }
    Ok(d_probs)
}
