//! Gaussian elimination.
//!
//! [`rref`] reduces a matrix with full pivoting restricted to its first
//! `min(rows, cols)` columns, so an augmented system `[A | B]` only ever pivots on `A`.

use crate::error::ensure_len;
use crate::{Error, Matrix, Result};

/// Pivots below this fraction of the largest input magnitude count as zero.
const RELATIVE_PIVOT_TOLERANCE: f64 = 1e-12;

/// Reduced row-echelon form.
///
/// Row `k` of the result holds the pivot of column `k` whenever column `k` has one.
/// Rows without a pivot are zero.
pub fn rref(m: &Matrix) -> Matrix {
    reduce(m).0
}

/// Inverse of a square matrix, via `rref([A | I])`.
pub fn inverse(m: &Matrix) -> Result<Matrix> {
    let n = m.rows();
    ensure_len(m.cols(), n, "inverse matrix cols")?;

    let mut augmented = Matrix::zeros(n, 2 * n);
    for r in 0..n {
        augmented.row_mut(r)[..n].copy_from_slice(m.row(r));
        augmented[(r, n + r)] = 1.0;
    }

    let (reduced, pivots) = reduce(&augmented);
    if pivots < n {
        return Err(Error::Numerical(format!(
            "matrix is singular (rank {pivots} < {n})"
        )));
    }

    let mut out = Matrix::zeros(n, n);
    for r in 0..n {
        out.row_mut(r).copy_from_slice(&reduced.row(r)[n..]);
    }
    Ok(out)
}

/// Solve `A x = b` for square, non-singular `A`.
pub fn solve(a: &Matrix, b: &[f64]) -> Result<Vec<f64>> {
    let n = a.rows();
    ensure_len(a.cols(), n, "system matrix cols")?;
    ensure_len(b.len(), n, "right-hand side")?;

    let mut augmented = Matrix::zeros(n, n + 1);
    for r in 0..n {
        augmented.row_mut(r)[..n].copy_from_slice(a.row(r));
        augmented[(r, n)] = b[r];
    }

    let (reduced, pivots) = reduce(&augmented);
    if pivots < n {
        return Err(Error::Numerical(format!(
            "system is singular (rank {pivots} < {n})"
        )));
    }
    Ok((0..n).map(|r| reduced[(r, n)]).collect())
}

/// Returns the reduced matrix and the number of pivots found.
fn reduce(m: &Matrix) -> (Matrix, usize) {
    let rows = m.rows();
    let cols = m.cols();
    let limit = rows.min(cols);
    let mut a = m.clone();

    let scale = a.as_slice().iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let tolerance = scale * RELATIVE_PIVOT_TOLERANCE;

    let mut pivot_cols: Vec<usize> = Vec::with_capacity(limit);
    let mut is_pivot_col = vec![false; limit];

    for step in 0..limit {
        let mut best: Option<(usize, usize, f64)> = None;
        for r in step..rows {
            for (c, &taken) in is_pivot_col.iter().enumerate() {
                let v = a[(r, c)].abs();
                if !taken && best.is_none_or(|(_, _, b)| v > b) {
                    best = Some((r, c, v));
                }
            }
        }

        let Some((pivot_row, pivot_col, magnitude)) = best else {
            break;
        };
        if magnitude <= tolerance {
            for r in step..rows {
                a.row_mut(r).fill(0.0);
            }
            break;
        }

        swap_rows(&mut a, step, pivot_row);
        let p = a[(step, pivot_col)];
        for v in a.row_mut(step) {
            *v /= p;
        }
        a[(step, pivot_col)] = 1.0;

        for r in step + 1..rows {
            eliminate(&mut a, r, step, pivot_col);
        }
        pivot_cols.push(pivot_col);
        is_pivot_col[pivot_col] = true;
    }

    // Clear above each pivot.
    for (step, &c) in pivot_cols.iter().enumerate().rev() {
        for r in 0..step {
            eliminate(&mut a, r, step, c);
        }
    }

    // Row k takes the pivot of column k; pivot-free rows fill the gaps as zeros.
    let mut out = Matrix::zeros(rows, cols);
    for (step, &c) in pivot_cols.iter().enumerate() {
        out.row_mut(c).copy_from_slice(a.row(step));
    }
    (out, pivot_cols.len())
}

/// `row[target] -= row[target][col] * row[pivot]`, pinning the eliminated entry to zero.
fn eliminate(a: &mut Matrix, target: usize, pivot: usize, col: usize) {
    let factor = a[(target, col)];
    if factor == 0.0 {
        return;
    }
    let cols = a.cols();
    for c in 0..cols {
        let delta = factor * a[(pivot, c)];
        a[(target, c)] -= delta;
    }
    a[(target, col)] = 0.0;
}

fn swap_rows(a: &mut Matrix, i: usize, j: usize) {
    if i == j {
        return;
    }
    let cols = a.cols();
    let data = a.as_mut_slice();
    for c in 0..cols {
        data.swap(i * cols + c, j * cols + c);
    }
}
