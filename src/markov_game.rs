//! Discounted Markov games with simultaneous moves.
//!
//! Joint actions use the same mixed-radix layout as [`NormalFormGame`]. A policy gives
//! every state one mixed strategy per player: `policy[s][p][a]`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::error::ensure_len;
use crate::game::{decode_into, joint_layout};
use crate::mdp::check_distribution;
use crate::{Error, Matrix, NormalFormGame, NormalFormGameSolver, Result, linalg};

/// Stationary mixed policy, indexed `[state][player][action]`.
pub type MarkovPolicy = Vec<Vec<Vec<f64>>>;

#[derive(Debug, Clone, PartialEq)]
pub struct MarkovGame {
    states: usize,
    gamma: f64,
    actions: Vec<usize>,
    strides: Vec<usize>,
    joint: usize,
    /// `T(s, j, s')` at `(s * joint + j) * S + s'`.
    transitions: Vec<f64>,
    /// `r(s, j, s', p)` at `((s * joint + j) * S + s') * players + p`.
    rewards: Vec<f64>,
    initial: Vec<f64>,
}

impl MarkovGame {
    /// Tabulate a game from `reward(s, s', player, joint)`, `initial(s)` and
    /// `transition(s, s', joint)`.
    pub fn new<R, M, T>(
        states: usize,
        gamma: f64,
        actions: &[usize],
        reward: R,
        initial: M,
        transition: T,
    ) -> Result<Self>
    where
        R: Fn(usize, usize, usize, &[usize]) -> f64,
        M: Fn(usize) -> f64,
        T: Fn(usize, usize, &[usize]) -> f64,
    {
        if states == 0 {
            return Err(Error::InvalidConfig(
                "a Markov game needs at least one state".to_owned(),
            ));
        }
        if !(gamma.is_finite() && (0.0..1.0).contains(&gamma)) {
            return Err(Error::InvalidConfig(format!(
                "discount must be in [0, 1), got {gamma}"
            )));
        }
        let (strides, joint) = joint_layout(actions)?;
        let players = actions.len();

        let mut transitions = Vec::with_capacity(states * joint * states);
        let mut rewards = Vec::with_capacity(states * joint * states * players);
        let mut profile = vec![0; players];
        for s in 0..states {
            for j in 0..joint {
                decode_into(j, actions, &mut profile);
                for next in 0..states {
                    transitions.push(transition(s, next, &profile));
                    rewards.extend((0..players).map(|p| reward(s, next, p, &profile)));
                }
            }
        }
        let initial: Vec<f64> = (0..states).map(initial).collect();

        for (row, probs) in transitions.chunks_exact(states).enumerate() {
            check_distribution(probs, || {
                format!("transition row (s={}, joint={})", row / joint, row % joint)
            })?;
        }
        check_distribution(&initial, || "initial distribution".to_owned())?;
        if let Some(idx) = rewards.iter().position(|r| !r.is_finite()) {
            return Err(Error::InvalidData(format!(
                "reward at flat index {idx} is not finite"
            )));
        }

        Ok(Self {
            states,
            gamma,
            actions: actions.to_vec(),
            strides,
            joint,
            transitions,
            rewards,
            initial,
        })
    }

    #[inline]
    pub fn states(&self) -> usize {
        self.states
    }

    #[inline]
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    #[inline]
    pub fn players(&self) -> usize {
        self.actions.len()
    }

    #[inline]
    pub fn actions(&self) -> &[usize] {
        &self.actions
    }

    pub fn initial_distribution(&self) -> &[f64] {
        &self.initial
    }

    #[inline]
    fn transition_at(&self, state: usize, joint: usize, next: usize) -> f64 {
        self.transitions[(state * self.joint + joint) * self.states + next]
    }

    #[inline]
    fn reward_at(&self, state: usize, joint: usize, next: usize, player: usize) -> f64 {
        self.rewards[((state * self.joint + joint) * self.states + next) * self.players() + player]
    }

    /// One-shot game at `state` with continuation values `value` (`S x I`).
    fn stage_game(&self, state: usize, value: &Matrix) -> Result<NormalFormGame> {
        let players = self.players();
        let mut table = vec![0.0; self.joint * players];
        for j in 0..self.joint {
            for next in 0..self.states {
                let p_next = self.transition_at(state, j, next);
                if p_next == 0.0 {
                    continue;
                }
                for p in 0..players {
                    let backup = self.reward_at(state, j, next, p) + self.gamma * value[(next, p)];
                    table[j * players + p] += p_next * backup;
                }
            }
        }
        NormalFormGame::from_table(&self.actions, table)
    }

    fn joint_probability(&self, strategies: &[Vec<f64>], joint: usize) -> f64 {
        strategies
            .iter()
            .zip(&self.actions)
            .zip(&self.strides)
            .map(|((strategy, &n), &stride)| strategy[(joint / stride) % n])
            .product()
    }
}

#[derive(Debug)]
pub struct MarkovGameSolver<'g, R = StdRng> {
    game: &'g MarkovGame,
    rng: R,
}

impl<'g> MarkovGameSolver<'g, StdRng> {
    pub fn new(game: &'g MarkovGame) -> Self {
        Self::with_rng(game, StdRng::from_entropy())
    }

    pub fn with_seed(game: &'g MarkovGame, seed: u64) -> Self {
        Self::with_rng(game, StdRng::seed_from_u64(seed))
    }
}

impl<'g, R: Rng> MarkovGameSolver<'g, R> {
    pub fn with_rng(game: &'g MarkovGame, rng: R) -> Self {
        Self { game, rng }
    }

    /// `rounds` of policy evaluation followed by per-state fictitious play
    /// (`play_rounds` each) on the one-step lookahead game. Starts from uniform play.
    pub fn policy_iteration(&mut self, rounds: usize, play_rounds: usize) -> Result<MarkovPolicy> {
        let game = self.game;
        let uniform: Vec<Vec<f64>> = game
            .actions
            .iter()
            .map(|&n| vec![1.0 / n as f64; n])
            .collect();
        let mut policy: MarkovPolicy = vec![uniform; game.states];

        for round in 0..rounds {
            let value = self.value(&policy)?;
            let mut next_policy = Vec::with_capacity(game.states);
            for s in 0..game.states {
                let stage = game.stage_game(s, &value)?;
                let mut solver = NormalFormGameSolver::with_rng(&stage, &mut self.rng);
                next_policy.push(solver.fictitious_play(play_rounds));
            }
            policy = next_policy;
            debug!(round, "Markov game policy iteration round finished");
        }
        Ok(policy)
    }

    /// Per-player state values under `policy`, as an `S x I` matrix:
    /// `V = (I - gamma T^pi)^-1 R^pi`.
    pub fn value(&self, policy: &[Vec<Vec<f64>>]) -> Result<Matrix> {
        let game = self.game;
        self.check_policy(policy)?;
        let (n, players) = (game.states, game.players());

        let mut system = Matrix::identity(n);
        let mut reward = Matrix::zeros(n, players);
        for (s, strategies) in policy.iter().enumerate() {
            for j in 0..game.joint {
                let p_joint = game.joint_probability(strategies, j);
                if p_joint == 0.0 {
                    continue;
                }
                for next in 0..n {
                    let p = p_joint * game.transition_at(s, j, next);
                    system[(s, next)] -= game.gamma * p;
                    for player in 0..players {
                        reward[(s, player)] += p * game.reward_at(s, j, next, player);
                    }
                }
            }
        }

        let inverse = linalg::inverse(&system).inspect_err(|e| {
            warn!(error = %e, "Markov game policy evaluation hit a singular system");
        })?;
        inverse.matmul(&reward)
    }

    /// `sum_s mu(s) V(s, p)` for every player.
    pub fn expected_value(&self, value: &Matrix) -> Result<Vec<f64>> {
        let game = self.game;
        if (value.rows(), value.cols()) != (game.states, game.players()) {
            return Err(Error::InvalidShape(format!(
                "value table is ({}, {}), expected ({}, {})",
                value.rows(),
                value.cols(),
                game.states,
                game.players()
            )));
        }
        let mut out = vec![0.0; game.players()];
        for (mu, row) in game.initial.iter().zip(value.iter_rows()) {
            for (o, v) in out.iter_mut().zip(row) {
                *o += mu * v;
            }
        }
        Ok(out)
    }

    fn check_policy(&self, policy: &[Vec<Vec<f64>>]) -> Result<()> {
        let game = self.game;
        ensure_len(policy.len(), game.states, "policy")?;
        for (s, strategies) in policy.iter().enumerate() {
            ensure_len(strategies.len(), game.players(), "state strategies")?;
            for (p, (strategy, &n)) in strategies.iter().zip(&game.actions).enumerate() {
                ensure_len(strategy.len(), n, "mixed strategy")?;
                check_distribution(strategy, || format!("strategy of player {p} in state {s}"))?;
            }
        }
        Ok(())
    }
}
