//! Dense products behind [`Matrix::matmul`] and the affine backward pass.
//!
//! Operands are strided views, so a transpose is read in place instead of copied. With
//! the `matrixmultiply` feature the product runs through `dgemm`; otherwise a plain
//! row-by-row loop.

use crate::{Error, Matrix, Result};

/// Read-only strided view of a row-major block.
#[derive(Debug, Clone, Copy)]
pub(crate) struct View<'a> {
    data: &'a [f64],
    rows: usize,
    cols: usize,
    row_stride: usize,
    col_stride: usize,
}

impl<'a> View<'a> {
    /// `rows x cols` row-major block at the start of `data`.
    pub(crate) fn new(data: &'a [f64], rows: usize, cols: usize) -> Result<Self> {
        let needed = rows.checked_mul(cols).ok_or_else(|| {
            Error::InvalidShape(format!("a ({rows}, {cols}) block overflows"))
        })?;
        if data.len() < needed {
            return Err(Error::InvalidShape(format!(
                "a ({rows}, {cols}) block needs {needed} values, got {}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            rows,
            cols,
            row_stride: cols,
            col_stride: 1,
        })
    }

    pub(crate) fn of(matrix: &'a Matrix) -> Self {
        Self {
            data: matrix.as_slice(),
            rows: matrix.rows(),
            cols: matrix.cols(),
            row_stride: matrix.cols(),
            col_stride: 1,
        }
    }

    /// The transpose, sharing storage.
    pub(crate) fn t(self) -> Self {
        Self {
            rows: self.cols,
            cols: self.rows,
            row_stride: self.col_stride,
            col_stride: self.row_stride,
            ..self
        }
    }

    #[cfg(not(feature = "matrixmultiply"))]
    #[inline]
    fn at(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.row_stride + col * self.col_stride]
    }
}

/// `out = a * b`, overwriting every entry of `out`.
pub(crate) fn gemm(a: View<'_>, b: View<'_>, out: &mut Matrix) -> Result<()> {
    if a.cols != b.rows || out.rows() != a.rows || out.cols() != b.cols {
        return Err(Error::InvalidShape(format!(
            "cannot write ({}, {}) x ({}, {}) into ({}, {})",
            a.rows,
            a.cols,
            b.rows,
            b.cols,
            out.rows(),
            out.cols()
        )));
    }
    let (m, k, n) = (a.rows, a.cols, b.cols);
    if m == 0 || n == 0 {
        return Ok(());
    }
    if k == 0 {
        out.as_mut_slice().fill(0.0);
        return Ok(());
    }
    kernel(a, b, m, k, n, out.as_mut_slice());
    Ok(())
}

#[cfg(feature = "matrixmultiply")]
fn kernel(a: View<'_>, b: View<'_>, m: usize, k: usize, n: usize, c: &mut [f64]) {
    // SAFETY: both views were bounds-checked on construction and `c` is a dense
    // row-major `m x n` block.
    unsafe {
        matrixmultiply::dgemm(
            m,
            k,
            n,
            1.0,
            a.data.as_ptr(),
            a.row_stride as isize,
            a.col_stride as isize,
            b.data.as_ptr(),
            b.row_stride as isize,
            b.col_stride as isize,
            0.0,
            c.as_mut_ptr(),
            n as isize,
            1,
        );
    }
}

#[cfg(not(feature = "matrixmultiply"))]
fn kernel(a: View<'_>, b: View<'_>, _m: usize, k: usize, n: usize, c: &mut [f64]) {
    for (i, row) in c.chunks_exact_mut(n).enumerate() {
        for (j, out) in row.iter_mut().enumerate() {
            *out = (0..k).fold(0.0, |acc, p| a.at(i, p).mul_add(b.at(p, j), acc));
        }
    }
}
