//! Series builder.
//!
//! `SeriesBuilder` is the convenient way to define a feed-forward model. It tracks the
//! running width so every layer is shape-checked as it is added, and picks a default
//! weight initializer for dense layers from the activation that follows them:
//!
//! - `tanh` / `logistic` / `identity` / `softplus`: Xavier/Glorot
//! - `relu` / `leaky relu` / `swish` / `loglin`: He/Kaiming

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{
    Activation, Affine, BatchNorm, BatchNormConfig, Error, Function, Init, Residual, Result,
    Series,
};

#[derive(Debug, Clone, Copy)]
enum LayerSpec {
    Affine { output: usize, init: Init },
    Activation(Activation),
    Softmax,
    BatchNorm(BatchNormConfig),
    Residual { hidden: usize, activation: Activation },
}

#[derive(Debug, Clone)]
/// Builder for a [`Series`].
///
/// Example:
///
/// ```rust
/// use nnkit::{Activation, SeriesBuilder};
///
/// # fn main() -> nnkit::Result<()> {
/// let model = SeriesBuilder::new(2)?
///     .add_dense(8, Activation::ReLU)?
///     .add_batch_norm()?
///     .add_dense(3, Activation::Identity)?
///     .add_softmax()
///     .build_with_seed(0)?;
/// assert_eq!(model.len(), 6);
/// # Ok(())
/// # }
/// ```
pub struct SeriesBuilder {
    input_dim: usize,
    width: usize,
    layers: Vec<LayerSpec>,
}

impl SeriesBuilder {
    /// Start building a series that accepts inputs of length `input_dim`.
    pub fn new(input_dim: usize) -> Result<Self> {
        if input_dim == 0 {
            return Err(Error::InvalidConfig("input_dim must be > 0".to_owned()));
        }
        Ok(Self {
            input_dim,
            width: input_dim,
            layers: Vec::new(),
        })
    }

    /// Current output width.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn add_affine(mut self, output: usize, init: Init) -> Result<Self> {
        if output == 0 {
            return Err(Error::InvalidConfig("layer output must be > 0".to_owned()));
        }
        self.layers.push(LayerSpec::Affine { output, init });
        self.width = output;
        Ok(self)
    }

    pub fn add_activation(mut self, activation: Activation) -> Result<Self> {
        activation.validate()?;
        self.layers.push(LayerSpec::Activation(activation));
        Ok(self)
    }

    /// An affine layer followed by `activation`.
    pub fn add_dense(self, output: usize, activation: Activation) -> Result<Self> {
        self.add_affine(output, default_init_for_activation(activation))?
            .add_activation(activation)
    }

    pub fn add_softmax(mut self) -> Self {
        self.layers.push(LayerSpec::Softmax);
        self
    }

    pub fn add_batch_norm(self) -> Result<Self> {
        self.add_batch_norm_with(BatchNormConfig::default())
    }

    pub fn add_batch_norm_with(mut self, config: BatchNormConfig) -> Result<Self> {
        config.validate()?;
        self.layers.push(LayerSpec::BatchNorm(config));
        Ok(self)
    }

    /// A residual block `x + W2 act(W1 x)` with `hidden` inner units.
    pub fn add_residual(mut self, hidden: usize, activation: Activation) -> Result<Self> {
        if hidden == 0 {
            return Err(Error::InvalidConfig(
                "residual hidden width must be > 0".to_owned(),
            ));
        }
        activation.validate()?;
        self.layers.push(LayerSpec::Residual { hidden, activation });
        Ok(self)
    }

    /// Build using a deterministic seed.
    pub fn build_with_seed(self, seed: u64) -> Result<Series> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.build_with_rng(&mut rng)
    }

    /// Build using the provided RNG.
    pub fn build_with_rng<R: Rng + ?Sized>(self, rng: &mut R) -> Result<Series> {
        if self.layers.is_empty() {
            return Err(Error::InvalidConfig(
                "series must have at least one layer".to_owned(),
            ));
        }

        let mut children = Vec::with_capacity(self.layers.len());
        let mut width = self.input_dim;
        for spec in self.layers {
            let child: Function = match spec {
                LayerSpec::Affine { output, init } => {
                    let layer = Affine::new_with_rng(width, output, init, rng)?;
                    width = output;
                    layer.into()
                }
                LayerSpec::Activation(activation) => activation.into(),
                LayerSpec::Softmax => Function::SOFTMAX,
                LayerSpec::BatchNorm(config) => BatchNorm::with_config(width, config)?.into(),
                LayerSpec::Residual { hidden, activation } => {
                    let init = default_init_for_activation(activation);
                    let inner = Series::new(vec![
                        Affine::new_with_rng(width, hidden, init, rng)?.into(),
                        activation.into(),
                        Affine::new_with_rng(hidden, width, Init::Xavier, rng)?.into(),
                    ])?;
                    Residual::new(inner.into())?.into()
                }
            };
            children.push(child);
        }

        Series::new(children)
    }
}

#[inline]
fn default_init_for_activation(act: Activation) -> Init {
    match act {
        Activation::Tanh | Activation::Logistic | Activation::Identity | Activation::Softplus => {
            Init::Xavier
        }
        Activation::ReLU
        | Activation::LeakyReLU { .. }
        | Activation::Swish
        | Activation::LogLin => Init::He,
    }
}
