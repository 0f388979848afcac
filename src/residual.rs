//! Residual block: `f(x) = g(x) + x`.

use crate::function::{Function, Shape, VectorFunction};
use crate::{Error, Matrix, Result};

#[derive(Debug)]
pub struct Residual {
    inner: Box<Function>,
}

impl Residual {
    /// Wrap `inner`, which must map `R^N` to `R^N`.
    pub fn new(inner: Function) -> Result<Self> {
        match inner.shape() {
            Shape::Elementwise => {}
            Shape::Fixed { input, output } => {
                if input != output {
                    return Err(Error::InvalidShape(format!(
                        "residual inner function must preserve its dim, got {input} -> {output}"
                    )));
                }
            }
        }
        Ok(Self {
            inner: Box::new(inner),
        })
    }

    #[inline]
    pub fn inner(&self) -> &Function {
        &self.inner
    }

    #[inline]
    pub(crate) fn inner_mut(&mut self) -> &mut Function {
        &mut self.inner
    }

    pub fn into_inner(self) -> Function {
        *self.inner
    }
}

impl VectorFunction for Residual {
    fn shape(&self) -> Shape {
        self.inner.shape()
    }

    fn pass(&self, input: &[f64]) -> Result<Vec<f64>> {
        let mut out = self.inner.pass(input)?;
        for (y, x) in out.iter_mut().zip(input) {
            *y += x;
        }
        Ok(out)
    }

    fn gradient(&self, input: &[f64]) -> Result<Matrix> {
        let mut jac = self.inner.gradient(input)?;
        for i in 0..jac.rows().min(jac.cols()) {
            jac[(i, i)] += 1.0;
        }
        Ok(jac)
    }

    fn pass_all(&self, inputs: &Matrix) -> Result<Matrix> {
        let mut out = self.inner.pass_all(inputs)?;
        for (y, x) in out.as_mut_slice().iter_mut().zip(inputs.as_slice()) {
            *y += x;
        }
        Ok(out)
    }

    fn gradient_all(&self, inputs: &Matrix) -> Result<Vec<Matrix>> {
        let mut jacs = self.inner.gradient_all(inputs)?;
        for jac in &mut jacs {
            for i in 0..jac.rows().min(jac.cols()) {
                jac[(i, i)] += 1.0;
            }
        }
        Ok(jacs)
    }
}
