//! Per-parameter optimizers.
//!
//! Every trainable scalar gets its own [`ScalarOptimizer`], which turns the gradient
//! for that scalar into the signed step to add to it.
//!
//! Design notes:
//! - The update rule is a tagged [`Strategy`]; the step is a match on the tag.
//! - Strategy and learning rate freeze on the first update. Later reconfiguration is
//!   silently ignored so a layer's optimizers can never disagree mid-training.

use crate::{Error, Result};

/// Learning rate of a fresh optimizer.
pub const DEFAULT_LEARNING_RATE: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq)]
/// Update rule.
pub enum Strategy {
    /// Plain gradient descent.
    Sgd,
    /// Gradient descent with an accumulated velocity.
    Momentum { decay: f64 },
    AdaGrad { epsilon: f64 },
    /// `-lr * g / sqrt(m2) + epsilon`; the step is just `epsilon` while `m2` is zero.
    RmsProp { decay: f64, epsilon: f64 },
    /// Adam (bias-corrected).
    Adam {
        beta1: f64,
        beta2: f64,
        epsilon: f64,
    },
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Adam {
            beta1: 0.9,
            beta2: 0.99,
            epsilon: 0.01,
        }
    }
}

impl Strategy {
    /// Validate strategy hyperparameters.
    pub fn validate(self) -> Result<()> {
        match self {
            Strategy::Sgd => Ok(()),
            Strategy::Momentum { decay } => check_decay("momentum decay", decay),
            Strategy::AdaGrad { epsilon } => check_epsilon("adagrad epsilon", epsilon),
            Strategy::RmsProp { decay, epsilon } => {
                check_decay("rmsprop decay", decay)?;
                check_epsilon("rmsprop epsilon", epsilon)
            }
            Strategy::Adam {
                beta1,
                beta2,
                epsilon,
            } => {
                check_decay("adam beta1", beta1)?;
                check_decay("adam beta2", beta2)?;
                check_epsilon("adam epsilon", epsilon)
            }
        }
    }
}

fn check_decay(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && (0.0..1.0).contains(&value)) {
        return Err(Error::InvalidConfig(format!(
            "{name} must be finite and in [0,1), got {value}"
        )));
    }
    Ok(())
}

fn check_epsilon(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(Error::InvalidConfig(format!(
            "{name} must be finite and > 0, got {value}"
        )));
    }
    Ok(())
}

pub(crate) fn check_learning_rate(lr: f64) -> Result<()> {
    if !(lr.is_finite() && lr > 0.0) {
        return Err(Error::InvalidConfig(format!(
            "learning rate must be finite and > 0, got {lr}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
/// Optimizer state for a single trainable scalar.
pub struct ScalarOptimizer {
    strategy: Strategy,
    learning_rate: f64,
    first_moment: f64,
    second_moment: f64,
    training_time: u64,
}

impl Default for ScalarOptimizer {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            learning_rate: DEFAULT_LEARNING_RATE,
            first_moment: 0.0,
            second_moment: 0.0,
            training_time: 0,
        }
    }
}

impl ScalarOptimizer {
    pub fn new(strategy: Strategy, learning_rate: f64) -> Result<Self> {
        strategy.validate()?;
        check_learning_rate(learning_rate)?;
        Ok(Self {
            strategy,
            learning_rate,
            ..Self::default()
        })
    }

    #[inline]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    #[inline]
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Number of updates applied so far.
    #[inline]
    pub fn training_time(&self) -> u64 {
        self.training_time
    }

    #[inline]
    pub fn first_moment(&self) -> f64 {
        self.first_moment
    }

    #[inline]
    pub fn second_moment(&self) -> f64 {
        self.second_moment
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.training_time > 0
    }

    /// Switch strategy. No-op once training started.
    pub fn set_strategy(&mut self, strategy: Strategy) -> Result<()> {
        strategy.validate()?;
        if !self.is_frozen() {
            self.strategy = strategy;
        }
        Ok(())
    }

    /// Change the learning rate. No-op once training started.
    pub fn set_learning_rate(&mut self, learning_rate: f64) -> Result<()> {
        check_learning_rate(learning_rate)?;
        if !self.is_frozen() {
            self.learning_rate = learning_rate;
        }
        Ok(())
    }

    /// Consume one gradient and return the step to add to the parameter.
    pub fn update(&mut self, grad: f64) -> f64 {
        self.training_time += 1;
        let lr = self.learning_rate;

        match self.strategy {
            Strategy::Sgd => -lr * grad,
            Strategy::Momentum { decay } => {
                self.first_moment = decay * self.first_moment + grad;
                -lr * self.first_moment
            }
            Strategy::AdaGrad { epsilon } => {
                self.second_moment += grad * grad;
                -lr * grad / (self.second_moment.sqrt() + epsilon)
            }
            Strategy::RmsProp { decay, epsilon } => {
                // The protection term is added to the step, not to the denominator.
                self.second_moment = decay * self.second_moment + (1.0 - decay) * grad * grad;
                if self.second_moment == 0.0 {
                    epsilon
                } else {
                    -lr * grad / self.second_moment.sqrt() + epsilon
                }
            }
            Strategy::Adam {
                beta1,
                beta2,
                epsilon,
            } => {
                self.first_moment = beta1 * self.first_moment + (1.0 - beta1) * grad;
                self.second_moment = beta2 * self.second_moment + (1.0 - beta2) * grad * grad;

                let t = self.training_time as f64;
                let m_hat = self.first_moment / (1.0 - beta1.powf(t));
                let v_hat = self.second_moment / (1.0 - beta2.powf(t));
                -lr * m_hat / (v_hat.sqrt() + epsilon)
            }
        }
    }
}
