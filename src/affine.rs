//! Affine (fully-connected) layer.
//!
//! Parameters live in one `(N + 1, M)` matrix: rows `0..N` hold the weights, with
//! `P[i][j]` connecting input `i` to output `j`, and row `N` holds the biases. The
//! layout lets the companion optimizer keep one scalar optimizer per cell.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{ensure_finite, ensure_len};
use crate::function::{Shape, VectorFunction};
use crate::sampling::gaussian;
use crate::{Error, Matrix, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Weight initialization scheme. Biases always start at zero.
pub enum Init {
    /// He-normal: `N(0, sqrt(2 / N))`.
    #[default]
    He,
    /// Xavier-normal: `N(0, sqrt(2 / (N + M)))`.
    Xavier,
    Zeros,
}

impl Init {
    fn std(self, input: usize, output: usize) -> f64 {
        match self {
            Init::He => (2.0 / input as f64).sqrt(),
            Init::Xavier => (2.0 / (input + output) as f64).sqrt(),
            Init::Zeros => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Affine {
    input: usize,
    output: usize,
    params: Matrix,
}

impl Affine {
    /// He-initialized layer seeded from the thread RNG.
    pub fn new(input: usize, output: usize) -> Result<Self> {
        Self::new_with_rng(input, output, Init::He, &mut rand::thread_rng())
    }

    pub fn new_with_seed(input: usize, output: usize, init: Init, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::new_with_rng(input, output, init, &mut rng)
    }

    pub fn new_with_rng<R: Rng + ?Sized>(
        input: usize,
        output: usize,
        init: Init,
        rng: &mut R,
    ) -> Result<Self> {
        if input == 0 || output == 0 {
            return Err(Error::InvalidConfig(format!(
                "affine dims must be > 0, got {input} -> {output}"
            )));
        }

        let mut params = Matrix::zeros(input + 1, output);
        let std = init.std(input, output);
        if std > 0.0 {
            for w in &mut params.as_mut_slice()[..input * output] {
                *w = gaussian(rng, 0.0, std)?;
            }
        }

        Ok(Self {
            input,
            output,
            params,
        })
    }

    /// Build from an explicit `(N + 1, M)` parameter matrix (biases in the last row).
    pub fn from_parameters(params: Matrix) -> Result<Self> {
        if params.rows() < 2 || params.cols() == 0 {
            return Err(Error::InvalidShape(format!(
                "affine parameters must be (N + 1, M) with N, M > 0, got ({}, {})",
                params.rows(),
                params.cols()
            )));
        }
        if params.as_slice().iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidData(
                "affine parameters must be finite".to_owned(),
            ));
        }

        Ok(Self {
            input: params.rows() - 1,
            output: params.cols(),
            params,
        })
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.input
    }

    #[inline]
    pub fn output_dim(&self) -> usize {
        self.output
    }

    /// The `(N + 1, M)` parameter matrix.
    #[inline]
    pub fn parameters(&self) -> &Matrix {
        &self.params
    }

    #[inline]
    pub(crate) fn parameters_mut(&mut self) -> &mut Matrix {
        &mut self.params
    }

    #[inline]
    pub fn weight(&self, input: usize, output: usize) -> f64 {
        self.params[(input, output)]
    }

    #[inline]
    pub fn bias(&self, output: usize) -> f64 {
        self.params[(self.input, output)]
    }
}

impl VectorFunction for Affine {
    fn shape(&self) -> Shape {
        Shape::Fixed {
            input: self.input,
            output: self.output,
        }
    }

    fn pass(&self, input: &[f64]) -> Result<Vec<f64>> {
        ensure_len(input.len(), self.input, "affine input")?;

        let mut out = self.params.row(self.input).to_vec();
        for (i, &x) in input.iter().enumerate() {
            for (y, &w) in out.iter_mut().zip(self.params.row(i)) {
                *y = w.mul_add(x, *y);
            }
        }
        ensure_finite(&out, "affine")?;
        Ok(out)
    }

    fn gradient(&self, input: &[f64]) -> Result<Matrix> {
        ensure_len(input.len(), self.input, "affine input")?;

        let mut jac = Matrix::zeros(self.output, self.input);
        for i in 0..self.input {
            for (j, &w) in self.params.row(i).iter().enumerate() {
                jac[(j, i)] = w;
            }
        }
        Ok(jac)
    }
}
