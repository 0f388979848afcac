//! Normal-form games and learning dynamics for mixed strategies.
//!
//! Joint actions are indexed in mixed radix with player 0 varying fastest, so
//! `index = a_0 + A_0 * (a_1 + A_1 * (a_2 + ...))`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::ensure_len;
use crate::sampling::argmax_random_tie;
use crate::{Error, Result, Softmax, VectorFunction};

/// One mixed strategy per player.
pub type Profile = Vec<Vec<f64>>;

#[derive(Debug, Clone, PartialEq)]
pub struct NormalFormGame {
    actions: Vec<usize>,
    /// `strides[p]` is the joint-index step for one action of player `p`.
    strides: Vec<usize>,
    joint: usize,
    /// `r(p, j)` at `j * players + p`.
    rewards: Vec<f64>,
}

impl NormalFormGame {
    /// Tabulate `reward(player, joint_actions)` over every joint action.
    pub fn new<F>(actions: &[usize], reward: F) -> Result<Self>
    where
        F: Fn(usize, &[usize]) -> f64,
    {
        let (strides, joint) = joint_layout(actions)?;
        let players = actions.len();
        let mut rewards = Vec::with_capacity(joint * players);
        let mut profile = vec![0; players];
        for j in 0..joint {
            decode_into(j, actions, &mut profile);
            rewards.extend((0..players).map(|p| reward(p, &profile)));
        }
        Self::build(actions.to_vec(), strides, joint, rewards)
    }

    /// Build from a flat `joint x players` reward table.
    pub fn from_table(actions: &[usize], rewards: Vec<f64>) -> Result<Self> {
        let (strides, joint) = joint_layout(actions)?;
        ensure_len(rewards.len(), joint * actions.len(), "reward table")?;
        Self::build(actions.to_vec(), strides, joint, rewards)
    }

    fn build(
        actions: Vec<usize>,
        strides: Vec<usize>,
        joint: usize,
        rewards: Vec<f64>,
    ) -> Result<Self> {
        if let Some(idx) = rewards.iter().position(|r| !r.is_finite()) {
            return Err(Error::InvalidData(format!(
                "reward at flat index {idx} is not finite"
            )));
        }
        Ok(Self {
            actions,
            strides,
            joint,
            rewards,
        })
    }

    #[inline]
    pub fn players(&self) -> usize {
        self.actions.len()
    }

    /// Action count of each player.
    #[inline]
    pub fn actions(&self) -> &[usize] {
        &self.actions
    }

    /// Number of joint actions.
    #[inline]
    pub fn joint_actions(&self) -> usize {
        self.joint
    }

    pub fn joint_index(&self, profile: &[usize]) -> Result<usize> {
        encode(profile, &self.actions, &self.strides)
    }

    pub fn reward(&self, player: usize, profile: &[usize]) -> Result<f64> {
        if player >= self.players() {
            return Err(Error::InvalidData(format!(
                "player {player} out of range for {} players",
                self.players()
            )));
        }
        Ok(self.reward_at(player, self.joint_index(profile)?))
    }

    #[inline]
    fn reward_at(&self, player: usize, joint: usize) -> f64 {
        self.rewards[joint * self.players() + player]
    }

    #[inline]
    fn action_of(&self, player: usize, joint: usize) -> usize {
        (joint / self.strides[player]) % self.actions[player]
    }

    /// Probability of joint action `j` under `profile`, leaving out `player`.
    fn opponent_probability(&self, player: usize, joint: usize, profile: &[Vec<f64>]) -> f64 {
        profile
            .iter()
            .enumerate()
            .filter(|&(q, _)| q != player)
            .map(|(q, strategy)| strategy[self.action_of(q, joint)])
            .product()
    }

    /// Expected reward of each of `player`'s actions against the others' mixed strategies.
    pub fn action_rewards(&self, player: usize, profile: &[Vec<f64>]) -> Vec<f64> {
        let mut out = vec![0.0; self.actions[player]];
        for j in 0..self.joint {
            let prob = self.opponent_probability(player, j, profile);
            if prob != 0.0 {
                out[self.action_of(player, j)] += prob * self.reward_at(player, j);
            }
        }
        out
    }

    /// Expected reward of every player under `profile`.
    pub fn expected_rewards(&self, profile: &[Vec<f64>]) -> Result<Vec<f64>> {
        self.check_profile(profile)?;
        Ok((0..self.players())
            .map(|p| {
                self.action_rewards(p, profile)
                    .iter()
                    .zip(&profile[p])
                    .map(|(r, s)| r * s)
                    .sum()
            })
            .collect())
    }

    pub(crate) fn check_profile(&self, profile: &[Vec<f64>]) -> Result<()> {
        ensure_len(profile.len(), self.players(), "strategy profile")?;
        for (p, strategy) in profile.iter().enumerate() {
            ensure_len(strategy.len(), self.actions[p], "mixed strategy")?;
            crate::mdp::check_distribution(strategy, || format!("strategy of player {p}"))?;
        }
        Ok(())
    }

    fn uniform_profile(&self) -> Profile {
        self.actions
            .iter()
            .map(|&n| vec![1.0 / n as f64; n])
            .collect()
    }
}

pub(crate) fn joint_layout(actions: &[usize]) -> Result<(Vec<usize>, usize)> {
    if actions.is_empty() || actions.contains(&0) {
        return Err(Error::InvalidConfig(format!(
            "a game needs at least one player and one action each, got {actions:?}"
        )));
    }
    let mut strides = Vec::with_capacity(actions.len());
    let mut joint = 1usize;
    for &n in actions {
        strides.push(joint);
        joint = joint.checked_mul(n).ok_or_else(|| {
            Error::InvalidConfig(format!("joint action space {actions:?} overflows"))
        })?;
    }
    Ok((strides, joint))
}

pub(crate) fn decode_into(mut joint: usize, actions: &[usize], out: &mut [usize]) {
    for (slot, &n) in out.iter_mut().zip(actions) {
        *slot = joint % n;
        joint /= n;
    }
}

pub(crate) fn encode(profile: &[usize], actions: &[usize], strides: &[usize]) -> Result<usize> {
    ensure_len(profile.len(), actions.len(), "joint action")?;
    let mut idx = 0;
    for (p, ((&a, &n), &stride)) in profile.iter().zip(actions).zip(strides).enumerate() {
        if a >= n {
            return Err(Error::InvalidData(format!(
                "player {p} plays action {a}, but has only {n}"
            )));
        }
        idx += a * stride;
    }
    Ok(idx)
}

#[derive(Debug)]
pub struct NormalFormGameSolver<'g, R = StdRng> {
    game: &'g NormalFormGame,
    rng: R,
}

impl<'g> NormalFormGameSolver<'g, StdRng> {
    pub fn new(game: &'g NormalFormGame) -> Self {
        Self::with_rng(game, StdRng::from_entropy())
    }

    pub fn with_seed(game: &'g NormalFormGame, seed: u64) -> Self {
        Self::with_rng(game, StdRng::seed_from_u64(seed))
    }
}

impl<'g, R: Rng> NormalFormGameSolver<'g, R> {
    pub fn with_rng(game: &'g NormalFormGame, rng: R) -> Self {
        Self { game, rng }
    }

    /// Empirical play frequencies after `rounds` of simultaneous fictitious play.
    ///
    /// Every round each player best-responds to the others' empirical frequencies,
    /// picking uniformly among tied actions. Zero rounds give the uniform profile.
    pub fn fictitious_play(&mut self, rounds: usize) -> Profile {
        let game = self.game;
        let mut beliefs = game.uniform_profile();
        let mut counts: Vec<Vec<usize>> = game.actions.iter().map(|&n| vec![0; n]).collect();

        for round in 1..=rounds {
            for (p, count) in counts.iter_mut().enumerate() {
                let rewards = game.action_rewards(p, &beliefs);
                if let Some(best) = argmax_random_tie(&rewards, &mut self.rng) {
                    count[best] += 1;
                }
            }
            for (belief, count) in beliefs.iter_mut().zip(&counts) {
                for (b, &c) in belief.iter_mut().zip(count) {
                    *b = c as f64 / round as f64;
                }
            }
        }
        debug!(rounds, ?beliefs, "fictitious play finished");
        beliefs
    }

    /// Simultaneous gradient ascent on softmax-parameterized strategies.
    ///
    /// Each player's logits start at zero and move by `step` times the gradient of its
    /// expected reward, taken through the softmax Jacobian.
    pub fn gradient_ascent(&mut self, rounds: usize, step: f64) -> Result<Profile> {
        if !(step.is_finite() && step > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "step size must be finite and > 0, got {step}"
            )));
        }
        let game = self.game;
        let mut logits: Vec<Vec<f64>> = game.actions.iter().map(|&n| vec![0.0; n]).collect();
        let mut strategies = softmax_all(&logits)?;

        for _ in 0..rounds {
            for (p, theta) in logits.iter_mut().enumerate() {
                let rewards = game.action_rewards(p, &strategies);
                let jacobian = Softmax.gradient(theta)?;
                let ascent = jacobian.vec_mul(&rewards)?;
                for (t, g) in theta.iter_mut().zip(&ascent) {
                    *t += step * g;
                }
            }
            strategies = softmax_all(&logits)?;
        }
        debug!(rounds, step, ?strategies, "gradient ascent finished");
        Ok(strategies)
    }

    /// Smoothed fictitious play over best-response distributions.
    ///
    /// Each round, every opponent profile adds its probability to the player's
    /// best responses against it, split evenly across ties. The result is the running
    /// average of those distributions.
    pub fn distribution_expectation(&mut self, rounds: usize) -> Profile {
        let game = self.game;
        let mut beliefs = game.uniform_profile();
        let mut mass: Vec<Vec<f64>> = game.actions.iter().map(|&n| vec![0.0; n]).collect();

        for round in 1..=rounds {
            for (p, player_mass) in mass.iter_mut().enumerate() {
                let stride = game.strides[p];
                let own = game.actions[p];
                let mut rewards = vec![0.0; own];
                for base in (0..game.joint).filter(|&j| game.action_of(p, j) == 0) {
                    for (a, r) in rewards.iter_mut().enumerate() {
                        *r = game.reward_at(p, base + a * stride);
                    }
                    let best = rewards.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    let ties = rewards.iter().filter(|&&r| r == best).count();
                    let share = game.opponent_probability(p, base, &beliefs) / ties as f64;
                    for (m, _) in player_mass
                        .iter_mut()
                        .zip(&rewards)
                        .filter(|&(_, &r)| r == best)
                    {
                        *m += share;
                    }
                }
            }
            for (belief, player_mass) in beliefs.iter_mut().zip(&mass) {
                for (b, &m) in belief.iter_mut().zip(player_mass) {
                    *b = m / round as f64;
                }
            }
        }
        debug!(rounds, ?beliefs, "distribution expectation finished");
        beliefs
    }
}

fn softmax_all(logits: &[Vec<f64>]) -> Result<Profile> {
    logits.iter().map(|theta| Softmax.pass(theta)).collect()
}
