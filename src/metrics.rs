//! Metrics.
//!
//! Evaluation helpers; they do not participate in backprop.

use crate::error::ensure_len;
use crate::{Matrix, Result};

/// Fraction of rows whose argmax equals the label.
///
/// Ties go to the lowest index. An empty batch scores 0.
pub fn accuracy(outputs: &Matrix, labels: &[usize]) -> Result<f64> {
    ensure_len(labels.len(), outputs.rows(), "labels")?;
    if labels.is_empty() {
        return Ok(0.0);
    }

    let correct = outputs
        .iter_rows()
        .zip(labels)
        .filter(|&(row, &label)| argmax(row) == Some(label))
        .count();
    Ok(correct as f64 / labels.len() as f64)
}

/// Index of the largest entry; first wins on ties, NaN never wins.
pub fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        if best.is_none_or(|(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}
