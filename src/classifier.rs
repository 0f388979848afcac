//! Classifier training shim.
//!
//! Wraps a [`FunctionOptimizer`] whose target ends in a probability vector (usually a
//! softmax) and trains it on integer labels with the negative log-likelihood gradient.
//! The shim never inspects the tail; it only reads the probabilities it produces.

use crate::loss::{nll, nll_backward};
use crate::{Function, FunctionOptimizer, Matrix, Result};

#[derive(Debug)]
pub struct ClassifierOptimizer<'a> {
    inner: FunctionOptimizer<'a>,
}

impl<'a> ClassifierOptimizer<'a> {
    pub fn new(inner: FunctionOptimizer<'a>) -> Self {
        Self { inner }
    }

    /// Shorthand for wrapping `FunctionOptimizer::create(function)`.
    pub fn create(function: &'a mut Function) -> Self {
        Self::new(FunctionOptimizer::create(function))
    }

    #[inline]
    pub fn optimizer(&self) -> &FunctionOptimizer<'a> {
        &self.inner
    }

    /// Access the wrapped optimizer, e.g. to pick a strategy before training.
    #[inline]
    pub fn optimizer_mut(&mut self) -> &mut FunctionOptimizer<'a> {
        &mut self.inner
    }

    pub fn into_inner(self) -> FunctionOptimizer<'a> {
        self.inner
    }

    /// Class probabilities for a batch, in training mode.
    pub fn predict(&self, inputs: &Matrix) -> Result<Matrix> {
        self.inner.pass_all(inputs)
    }

    /// Mean negative log-likelihood of `labels` under the current model.
    pub fn loss(&self, inputs: &Matrix, labels: &[usize]) -> Result<f64> {
        nll(&self.predict(inputs)?, labels)
    }

    /// One NLL step on a labelled batch; returns `d_in`.
    pub fn update(&mut self, inputs: &Matrix, labels: &[usize]) -> Result<Matrix> {
        let probs = self.predict(inputs)?;
        let d_out = nll_backward(&probs, labels)?;
        self.inner.update(inputs, &d_out)
    }
}
