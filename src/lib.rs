//! Composable differentiable functions and the solvers that sit next to them.
//!
//! `nnkit` is a small training kernel built around one abstraction, the [`VectorFunction`]:
//! a map `R^N -> R^M` that can evaluate itself (`pass`) and its Jacobian (`gradient`), one
//! sample at a time or over a batch. Layers, activations and combinators all implement it,
//! and a matching [`FunctionOptimizer`] fuses backpropagation with per-parameter updates.
//!
//! Next to the kernel sits a reinforcement-learning toolkit that only needs dense linear
//! algebra: discounted and finite-horizon MDPs, normal-form and Markov games, bandits, and
//! a two-phase simplex used by the MDP linear-programming solvers.
//!
//! # Data layout and shapes
//!
//! - Scalars are `f64`.
//! - A batch is a [`Matrix`] with one sample per row.
//! - [`Affine`] parameters are an `(N + 1) x M` matrix; the last row holds the biases.
//! - Jacobians are `M x N`: `gradient(x)[(i, j)] = d pass(x)_i / d x_j`.
//!
//! # Errors
//!
//! Every fallible operation returns [`Result`]. Shape checks run before any state is
//! touched. A [`Error::Numerical`] failure (NaN or infinity) may leave parameters partly
//! updated; discard the model when that happens.
//!
//! # Threads
//!
//! Batched forward passes and optimizer updates split work across the global `rayon`
//! pool. Call [`parallel::configure_threads`] once at startup to size it; parameter
//! updates themselves are applied on the calling thread after the workers join.
//!
//! # MSRV
//!
//! This crate's minimum supported Rust version (MSRV) is specified in `Cargo.toml`.
//!
//! # Quick start
//!
//! ```rust
//! use nnkit::{Activation, Function, FunctionOptimizer, Matrix, SeriesBuilder, loss};
//!
//! # fn main() -> nnkit::Result<()> {
//! let x = Matrix::from_rows(&[
//!     vec![0.0, 0.0],
//!     vec![0.0, 1.0],
//!     vec![1.0, 0.0],
//!     vec![1.0, 1.0],
//! ])?;
//! let y = Matrix::from_rows(&[vec![0.0], vec![1.0], vec![1.0], vec![0.0]])?;
//!
//! let mut model: Function = SeriesBuilder::new(2)?
//!     .add_dense(8, Activation::Tanh)?
//!     .add_dense(1, Activation::Identity)?
//!     .build_with_seed(0)?
//!     .into();
//!
//! let mut opt = FunctionOptimizer::create(&mut model);
//! opt.set_learning_rate(0.05)?;
//! for _ in 0..100 {
//!     let pred = opt.pass_all(&x)?;
//!     let (_loss, d_out) = loss::mse_backward(&pred, &y)?;
//!     opt.update(&x, &d_out)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Solving an MDP
//!
//! ```rust
//! use nnkit::{Mdp, MdpSolver};
//!
//! # fn main() -> nnkit::Result<()> {
//! // Action 0 stays put, action 1 swaps states.
//! let reward = [[0.0, 1.0], [1.0, 0.0]];
//! let mdp = Mdp::new(
//!     2,
//!     2,
//!     0.9,
//!     |s, a, _| reward[s][a],
//!     |s| if s == 0 { 1.0 } else { 0.0 },
//!     |s, a, next| {
//!         let target = if a == 0 { s } else { 1 - s };
//!         if next == target { 1.0 } else { 0.0 }
//!     },
//! )?;
//!
//! let mut solver = MdpSolver::with_seed(&mdp, 0);
//! let policy = solver.value_iteration(200)?;
//! assert_eq!(policy, vec![1, 0]);
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod affine;
pub mod bandit;
pub mod batch_norm;
pub mod builder;
pub mod classifier;
pub mod error;
pub mod finite_mdp;
pub mod function;
pub mod game;
pub mod linalg;
pub mod loss;
pub mod lp;
pub mod markov_game;
pub(crate) mod matmul;
pub mod matrix;
pub mod mdp;
pub mod metrics;
pub mod optim;
pub mod optimizer;
pub mod parallel;
pub mod residual;
pub mod sampling;
pub mod series;
pub mod simulator;

pub use activation::{Activation, Softmax};
pub use affine::{Affine, Init};
pub use bandit::{Bandit, BernoulliBandit, GaussianBandit, UcbSolver};
pub use batch_norm::{BatchNorm, BatchNormConfig};
pub use builder::SeriesBuilder;
pub use classifier::ClassifierOptimizer;
pub use error::{Error, Result};
pub use finite_mdp::{FiniteMdp, FiniteMdpSolver};
pub use function::{Function, Shape, VectorFunction};
pub use game::{NormalFormGame, NormalFormGameSolver, Profile};
pub use lp::{Outcome, Simplex};
pub use markov_game::{MarkovGame, MarkovGameSolver, MarkovPolicy};
pub use matrix::Matrix;
pub use mdp::{Mdp, MdpSolver};
pub use optim::{ScalarOptimizer, Strategy};
pub use optimizer::FunctionOptimizer;
pub use residual::Residual;
pub use series::Series;
pub use simulator::{Episodes, FiniteMdpSimulator, MdpGenerator, MdpSimulator, Step};
