//! Sequential composition.
//!
//! `Series([f_0, .., f_n])` computes `f_n(..f_1(f_0(x)))`. Children are owned and their
//! shapes must chain.

use rayon::prelude::*;

use crate::function::{Function, Shape, VectorFunction};
use crate::{Error, Matrix, Result};

#[derive(Debug)]
pub struct Series {
    children: Vec<Function>,
    shape: Shape,
}

impl Series {
    pub fn new(children: Vec<Function>) -> Result<Self> {
        let Some(first) = children.first() else {
            return Err(Error::InvalidData(
                "series must have at least one function".to_owned(),
            ));
        };

        let mut shape = first.shape();
        for child in &children[1..] {
            shape = shape.then(child.shape())?;
        }
        Ok(Self { children, shape })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Always false; a series has at least one child.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    #[inline]
    pub fn children(&self) -> &[Function] {
        &self.children
    }

    #[inline]
    pub(crate) fn children_mut(&mut self) -> &mut [Function] {
        &mut self.children
    }

    pub fn into_children(self) -> Vec<Function> {
        self.children
    }
}

impl VectorFunction for Series {
    fn shape(&self) -> Shape {
        self.shape
    }

    fn pass(&self, input: &[f64]) -> Result<Vec<f64>> {
        let mut x = input.to_vec();
        for child in &self.children {
            x = child.pass(&x)?;
        }
        Ok(x)
    }

    fn gradient(&self, input: &[f64]) -> Result<Matrix> {
        let mut x = input.to_vec();
        let mut jac: Option<Matrix> = None;
        for child in &self.children {
            let local = child.gradient(&x)?;
            jac = Some(match jac {
                None => local,
                Some(acc) => local.matmul(&acc)?,
            });
            x = child.pass(&x)?;
        }
        // `children` is non-empty.
        jac.ok_or_else(|| Error::InvalidData("series has no functions".to_owned()))
    }

    /// Folds the batched form of every child, so batch-aware children see the batch.
    fn pass_all(&self, inputs: &Matrix) -> Result<Matrix> {
        let mut x = self.children[0].pass_all(inputs)?;
        for child in &self.children[1..] {
            x = child.pass_all(&x)?;
        }
        Ok(x)
    }

    /// Chains every child's batched Jacobians over its batched input, so a batch-norm
    /// child fails with [`Error::Unsupported`] instead of reporting inference slopes.
    fn gradient_all(&self, inputs: &Matrix) -> Result<Vec<Matrix>> {
        let mut x = inputs.clone();
        let mut jacs: Option<Vec<Matrix>> = None;
        for child in &self.children {
            let local = child.gradient_all(&x)?;
            jacs = Some(match jacs {
                None => local,
                Some(acc) => local
                    .into_par_iter()
                    .zip(acc)
                    .map(|(l, a)| l.matmul(&a))
                    .collect::<Result<Vec<_>>>()?,
            });
            x = child.pass_all(&x)?;
        }
        jacs.ok_or_else(|| Error::InvalidData("series has no functions".to_owned()))
    }
}
