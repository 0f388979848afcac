//! Finite-horizon MDPs with time-indexed dynamics.
//!
//! Time runs over `0..H`; the value after the last step is zero. There is no discount.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::ensure_len;
use crate::mdp::PROBABILITY_TOLERANCE;
use crate::sampling::argmax_random_tie;
use crate::{Error, Matrix, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct FiniteMdp {
    horizon: usize,
    states: usize,
    actions: usize,
    /// `T_t(s, a, s')` at `((t * S + s) * A + a) * S + s'`.
    transitions: Vec<f64>,
    rewards: Vec<f64>,
    initial: Vec<f64>,
}

impl FiniteMdp {
    /// Tabulate and validate a finite-horizon MDP.
    pub fn new<R, M, T>(
        horizon: usize,
        states: usize,
        actions: usize,
        reward: R,
        initial: M,
        transition: T,
    ) -> Result<Self>
    where
        R: Fn(usize, usize, usize, usize) -> f64,
        M: Fn(usize) -> f64,
        T: Fn(usize, usize, usize, usize) -> f64,
    {
        check_dims(horizon, states, actions)?;
        let len = horizon * states * actions * states;
        let mut transitions = Vec::with_capacity(len);
        let mut rewards = Vec::with_capacity(len);
        for t in 0..horizon {
            for s in 0..states {
                for a in 0..actions {
                    for next in 0..states {
                        transitions.push(transition(t, s, a, next));
                        rewards.push(reward(t, s, a, next));
                    }
                }
            }
        }

        let mdp = Self {
            horizon,
            states,
            actions,
            transitions,
            rewards,
            initial: (0..states).map(initial).collect(),
        };
        if mdp.rewards.iter().any(|r| !r.is_finite()) {
            return Err(Error::InvalidData("rewards must be finite".to_owned()));
        }
        mdp.check(PROBABILITY_TOLERANCE, f64::NEG_INFINITY, f64::INFINITY)?;
        Ok(mdp)
    }

    /// Maximum-likelihood model from `N` observed episodes.
    ///
    /// Episode `k` visits `states[k]` (length `H + 1`), takes `actions[k]` and collects
    /// `rewards[k]` (both length `H`). Rewards are averaged per observed transition.
    /// A `(t, s, a)` that was never tried gets uniform transitions and NaN rewards; the
    /// solver skips such actions, but a `(t, s)` with no visits at all has no finite
    /// action value and [`FiniteMdpSolver::backward_induction`] fails with
    /// [`Error::Numerical`]. The initial distribution is the empirical one, or uniform
    /// without episodes.
    pub fn from_trajectories(
        horizon: usize,
        states: usize,
        actions: usize,
        state_history: &[Vec<usize>],
        action_history: &[Vec<usize>],
        reward_history: &[Vec<f64>],
    ) -> Result<Self> {
        check_dims(horizon, states, actions)?;
        let episodes = state_history.len();
        ensure_len(action_history.len(), episodes, "action history")?;
        ensure_len(reward_history.len(), episodes, "reward history")?;

        let cells = horizon * states * actions;
        let mut tried = vec![0usize; cells];
        let mut transition_counts = vec![0usize; cells * states];
        let mut reward_totals = vec![0.0; cells * states];
        let mut initial_counts = vec![0usize; states];

        for (k, ((visited, taken), earned)) in state_history
            .iter()
            .zip(action_history)
            .zip(reward_history)
            .enumerate()
        {
            ensure_len(visited.len(), horizon + 1, "episode state sequence")?;
            ensure_len(taken.len(), horizon, "episode action sequence")?;
            ensure_len(earned.len(), horizon, "episode reward sequence")?;
            if let Some(&s) = visited.iter().find(|&&s| s >= states) {
                return Err(Error::InvalidData(format!(
                    "episode {k} visits state {s}, but there are only {states} states"
                )));
            }
            if let Some(&a) = taken.iter().find(|&&a| a >= actions) {
                return Err(Error::InvalidData(format!(
                    "episode {k} takes action {a}, but there are only {actions} actions"
                )));
            }

            initial_counts[visited[0]] += 1;
            for t in 0..horizon {
                let cell = (t * states + visited[t]) * actions + taken[t];
                let idx = cell * states + visited[t + 1];
                tried[cell] += 1;
                transition_counts[idx] += 1;
                reward_totals[idx] += earned[t];
            }
        }

        let uniform = 1.0 / states as f64;
        let mut transitions = vec![uniform; cells * states];
        let mut rewards = vec![f64::NAN; cells * states];
        for (cell, &n) in tried.iter().enumerate() {
            if n == 0 {
                continue;
            }
            for next in 0..states {
                let idx = cell * states + next;
                let seen = transition_counts[idx];
                transitions[idx] = seen as f64 / n as f64;
                rewards[idx] = if seen > 0 {
                    reward_totals[idx] / seen as f64
                } else {
                    0.0
                };
            }
        }

        let initial = if episodes == 0 {
            vec![uniform; states]
        } else {
            initial_counts
                .iter()
                .map(|&c| c as f64 / episodes as f64)
                .collect()
        };

        debug!(episodes, horizon, states, actions, "estimated finite-horizon MDP");
        Ok(Self {
            horizon,
            states,
            actions,
            transitions,
            rewards,
            initial,
        })
    }

    /// Every transition row and the initial distribution sum to 1 within `tolerance`,
    /// and every reward lies in `[reward_min, reward_max]`.
    pub fn check(&self, tolerance: f64, reward_min: f64, reward_max: f64) -> Result<()> {
        for (row, probs) in self.transitions.chunks_exact(self.states).enumerate() {
            let total: f64 = probs.iter().sum();
            if probs.iter().any(|p| !(p.is_finite() && *p >= 0.0))
                || (total - 1.0).abs() > tolerance
            {
                let a = row % self.actions;
                let s = (row / self.actions) % self.states;
                let t = row / (self.actions * self.states);
                return Err(Error::InvalidData(format!(
                    "transition row (t={t}, s={s}, a={a}) is not a distribution (sum {total})"
                )));
            }
        }
        let total: f64 = self.initial.iter().sum();
        if self.initial.iter().any(|p| !(p.is_finite() && *p >= 0.0))
            || (total - 1.0).abs() > tolerance
        {
            return Err(Error::InvalidData(format!(
                "initial distribution sums to {total}"
            )));
        }
        if let Some(idx) = self
            .rewards
            .iter()
            .position(|r| !(*r >= reward_min && *r <= reward_max))
        {
            return Err(Error::InvalidData(format!(
                "reward {} at flat index {idx} is outside [{reward_min}, {reward_max}]",
                self.rewards[idx]
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    #[inline]
    pub fn states(&self) -> usize {
        self.states
    }

    #[inline]
    pub fn actions(&self) -> usize {
        self.actions
    }

    #[inline]
    pub fn transition(&self, time: usize, state: usize, action: usize, next: usize) -> f64 {
        self.transitions[self.index(time, state, action, next)]
    }

    #[inline]
    pub fn reward(&self, time: usize, state: usize, action: usize, next: usize) -> f64 {
        self.rewards[self.index(time, state, action, next)]
    }

    #[inline]
    pub fn initial(&self, state: usize) -> f64 {
        self.initial[state]
    }

    pub fn initial_distribution(&self) -> &[f64] {
        &self.initial
    }

    pub fn transition_row(&self, time: usize, state: usize, action: usize) -> &[f64] {
        let start = self.index(time, state, action, 0);
        &self.transitions[start..start + self.states]
    }

    /// `sum_s' T_t(s, a, s') (r_t(s, a, s') + V_next(s'))`. Unreachable successors are
    /// skipped, so unestimated cells elsewhere stay out of the sum.
    fn backup(&self, time: usize, state: usize, action: usize, next_value: &[f64]) -> f64 {
        let start = self.index(time, state, action, 0);
        let t = &self.transitions[start..start + self.states];
        let r = &self.rewards[start..start + self.states];
        t.iter()
            .zip(r)
            .zip(next_value)
            .filter(|((p, _), _)| **p != 0.0)
            .map(|((p, r), v)| p * (r + v))
            .sum()
    }

    #[inline]
    fn index(&self, time: usize, state: usize, action: usize, next: usize) -> usize {
        ((time * self.states + state) * self.actions + action) * self.states + next
    }
}

fn check_dims(horizon: usize, states: usize, actions: usize) -> Result<()> {
    if horizon == 0 || states == 0 || actions == 0 {
        return Err(Error::InvalidConfig(format!(
            "horizon, states and actions must be > 0, got ({horizon}, {states}, {actions})"
        )));
    }
    Ok(())
}

/// Policies are `H x S` tables of actions, `policy[t][s]`.
#[derive(Debug)]
pub struct FiniteMdpSolver<'m, R = StdRng> {
    mdp: &'m FiniteMdp,
    rng: R,
}

impl<'m> FiniteMdpSolver<'m, StdRng> {
    pub fn new(mdp: &'m FiniteMdp) -> Self {
        Self::with_rng(mdp, StdRng::from_entropy())
    }

    pub fn with_seed(mdp: &'m FiniteMdp, seed: u64) -> Self {
        Self::with_rng(mdp, StdRng::seed_from_u64(seed))
    }
}

impl<'m, R: Rng> FiniteMdpSolver<'m, R> {
    pub fn with_rng(mdp: &'m FiniteMdp, rng: R) -> Self {
        Self { mdp, rng }
    }

    #[inline]
    pub fn mdp(&self) -> &'m FiniteMdp {
        self.mdp
    }

    /// Optimal time-indexed policy. Ties go to a uniformly random maximizer.
    pub fn backward_induction(&mut self) -> Result<Vec<Vec<usize>>> {
        let mdp = self.mdp;
        let mut policy = vec![vec![0; mdp.states]; mdp.horizon];
        let mut next_value = vec![0.0; mdp.states];
        let mut q = vec![0.0; mdp.actions];

        for t in (0..mdp.horizon).rev() {
            let mut value = vec![0.0; mdp.states];
            for s in 0..mdp.states {
                for (a, out) in q.iter_mut().enumerate() {
                    *out = mdp.backup(t, s, a, &next_value);
                }
                let best = argmax_random_tie(&q, &mut self.rng).ok_or_else(|| {
                    Error::Numerical(format!("no finite action value at t={t}, s={s}"))
                })?;
                policy[t][s] = best;
                value[s] = q[best];
            }
            next_value = value;
        }
        debug!(
            horizon = mdp.horizon,
            value = ?next_value,
            "backward induction finished"
        );
        Ok(policy)
    }

    /// `V_t(s)` under `policy`, as an `H x S` matrix.
    pub fn value(&self, policy: &[Vec<usize>]) -> Result<Matrix> {
        let mdp = self.mdp;
        self.check_policy(policy)?;

        let mut value = Matrix::zeros(mdp.horizon, mdp.states);
        let mut next_value = vec![0.0; mdp.states];
        for t in (0..mdp.horizon).rev() {
            for (s, &a) in policy[t].iter().enumerate() {
                value[(t, s)] = mdp.backup(t, s, a, &next_value);
            }
            next_value.copy_from_slice(value.row(t));
        }
        Ok(value)
    }

    /// `Q_t(s, a)` from an `H x S` value table: one `S x A` matrix per step, built
    /// from `V_{t+1}` (zero after the last step).
    pub fn action_values(&self, value: &Matrix) -> Result<Vec<Matrix>> {
        let mdp = self.mdp;
        self.check_value(value)?;

        let terminal = vec![0.0; mdp.states];
        (0..mdp.horizon)
            .map(|t| {
                let next = if t + 1 < mdp.horizon {
                    value.row(t + 1)
                } else {
                    &terminal
                };
                let mut q = Matrix::zeros(mdp.states, mdp.actions);
                for s in 0..mdp.states {
                    for (a, out) in q.row_mut(s).iter_mut().enumerate() {
                        *out = mdp.backup(t, s, a, next);
                    }
                }
                Ok(q)
            })
            .collect()
    }

    /// `V_t(s) = Q_t(s, policy[t][s])`.
    pub fn value_from_q(&self, q: &[Matrix], policy: &[Vec<usize>]) -> Result<Matrix> {
        let mdp = self.mdp;
        self.check_policy(policy)?;
        ensure_len(q.len(), mdp.horizon, "action-value table")?;

        let mut value = Matrix::zeros(mdp.horizon, mdp.states);
        for (t, (q_t, actions)) in q.iter().zip(policy).enumerate() {
            if (q_t.rows(), q_t.cols()) != (mdp.states, mdp.actions) {
                return Err(Error::InvalidShape(format!(
                    "Q at t={t} is ({}, {}), expected ({}, {})",
                    q_t.rows(),
                    q_t.cols(),
                    mdp.states,
                    mdp.actions
                )));
            }
            for (s, &a) in actions.iter().enumerate() {
                value[(t, s)] = q_t[(s, a)];
            }
        }
        Ok(value)
    }

    /// `sum_s mu(s) V_0(s)`.
    pub fn expected_value(&self, value: &Matrix) -> Result<f64> {
        self.check_value(value)?;
        Ok(self
            .mdp
            .initial
            .iter()
            .zip(value.row(0))
            .map(|(mu, v)| mu * v)
            .sum())
    }

    fn check_value(&self, value: &Matrix) -> Result<()> {
        let mdp = self.mdp;
        if (value.rows(), value.cols()) != (mdp.horizon, mdp.states) {
            return Err(Error::InvalidShape(format!(
                "value table is ({}, {}), expected ({}, {})",
                value.rows(),
                value.cols(),
                mdp.horizon,
                mdp.states
            )));
        }
        Ok(())
    }

    fn check_policy(&self, policy: &[Vec<usize>]) -> Result<()> {
        let mdp = self.mdp;
        ensure_len(policy.len(), mdp.horizon, "policy horizon")?;
        for (t, actions) in policy.iter().enumerate() {
            ensure_len(actions.len(), mdp.states, "policy step")?;
            if let Some(&a) = actions.iter().find(|&&a| a >= mdp.actions) {
                return Err(Error::InvalidData(format!(
                    "policy picks action {a} at t={t}, but there are only {} actions",
                    mdp.actions
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two states, two actions, three steps: action 1 moves to state 1, which pays 2 per
    /// step, but moving costs 1.
    fn corridor() -> FiniteMdp {
        FiniteMdp::new(
            3,
            2,
            2,
            |_, s, a, _| (if s == 1 { 2.0 } else { 0.0 }) - a as f64,
            |s| if s == 0 { 1.0 } else { 0.0 },
            |_, s, a, next| {
                let target = if a == 1 { 1 } else { s };
                if next == target { 1.0 } else { 0.0 }
            },
        )
        .unwrap()
    }

    #[test]
    fn one_step_induction_is_greedy() {
        let rewards = [[0.5, 2.0, -1.0], [3.0, 3.0, 1.0]];
        let mdp = FiniteMdp::new(
            1,
            2,
            3,
            |_, s, a, _| rewards[s][a],
            |_| 0.5,
            |_, _, _, next| if next == 0 { 1.0 } else { 0.0 },
        )
        .unwrap();

        let mut solver = FiniteMdpSolver::with_seed(&mdp, 0);
        let policy = solver.backward_induction().unwrap();
        assert_eq!(policy[0][0], 1);
        assert!(policy[0][1] < 2);

        let value = solver.value(&policy).unwrap();
        assert_eq!(value.row(0), &[2.0, 3.0]);
        assert!((solver.expected_value(&value).unwrap() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn induction_plans_ahead() {
        let mdp = corridor();
        let mut solver = FiniteMdpSolver::with_seed(&mdp, 7);
        let policy = solver.backward_induction().unwrap();
        // Moving at t=0 costs 1 and earns 2 at t=1 and t=2.
        assert_eq!(policy[0][0], 1);
        // Too late to recoup the cost at the last step.
        assert_eq!(policy[2][0], 0);

        let value = solver.value(&policy).unwrap();
        assert!((value[(0, 0)] - 3.0).abs() < 1e-12);
        assert!((value[(0, 1)] - 6.0).abs() < 1e-12);
    }

    #[test]
    fn q_table_round_trips_to_value() {
        let mdp = corridor();
        let solver = FiniteMdpSolver::with_seed(&mdp, 0);
        let policy = vec![vec![0, 1], vec![1, 0], vec![0, 0]];
        let value = solver.value(&policy).unwrap();
        let q = solver.action_values(&value).unwrap();
        assert_eq!(q.len(), 3);
        let rebuilt = solver.value_from_q(&q, &policy).unwrap();
        for (a, b) in rebuilt.as_slice().iter().zip(value.as_slice()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn estimates_counts_and_falls_back_to_uniform() {
        let states = vec![vec![0, 1, 1], vec![0, 0, 1], vec![1, 1, 0]];
        let actions = vec![vec![1, 0], vec![0, 1], vec![0, 0]];
        let rewards = vec![vec![1.0, 2.0], vec![0.0, 3.0], vec![5.0, 4.0]];
        let mdp = FiniteMdp::from_trajectories(2, 2, 2, &states, &actions, &rewards).unwrap();

        assert!((mdp.initial(0) - 2.0 / 3.0).abs() < 1e-12);
        assert!((mdp.initial(1) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(mdp.transition_row(0, 0, 1), &[0.0, 1.0]);
        assert_eq!(mdp.reward(0, 0, 1, 1), 1.0);
        assert_eq!(mdp.reward(0, 0, 1, 0), 0.0);
        // (t=1, s=1, a=0) was tried twice with different outcomes.
        assert_eq!(mdp.transition_row(1, 1, 0), &[0.5, 0.5]);
        assert_eq!(mdp.reward(1, 1, 0, 1), 2.0);
        assert_eq!(mdp.reward(1, 1, 0, 0), 4.0);
        // (t=1, s=1, a=1) was never tried.
        assert_eq!(mdp.transition_row(1, 1, 1), &[0.5, 0.5]);
        assert!(mdp.reward(1, 1, 1, 0).is_nan());
        assert!(mdp.check(1e-9, -10.0, 10.0).is_err());
    }

    #[test]
    fn planning_needs_every_state_visited() {
        // Each state tried with one action; the untried action is skipped.
        let mdp = FiniteMdp::from_trajectories(
            1,
            2,
            2,
            &[vec![0, 1], vec![1, 1]],
            &[vec![0], vec![1]],
            &[vec![1.0], vec![2.0]],
        )
        .unwrap();
        let policy = FiniteMdpSolver::with_seed(&mdp, 0)
            .backward_induction()
            .unwrap();
        assert_eq!(policy, vec![vec![0, 1]]);

        // State 1 never shows up.
        let mdp =
            FiniteMdp::from_trajectories(1, 2, 2, &[vec![0, 1]], &[vec![0]], &[vec![1.0]]).unwrap();
        let err = FiniteMdpSolver::with_seed(&mdp, 0).backward_induction();
        assert!(matches!(err, Err(Error::Numerical(_))));
    }

    #[test]
    fn no_episodes_means_uniform_start() {
        let mdp = FiniteMdp::from_trajectories(1, 4, 1, &[], &[], &[]).unwrap();
        assert_eq!(mdp.initial_distribution(), &[0.25; 4]);
    }

    #[test]
    fn malformed_episodes_are_rejected() {
        let short = vec![vec![0, 1]];
        let err = FiniteMdp::from_trajectories(2, 2, 1, &short, &[vec![0, 0]], &[vec![0.0, 0.0]]);
        assert!(matches!(err, Err(Error::InvalidShape(_))));

        let err = FiniteMdp::from_trajectories(1, 2, 1, &[vec![0, 2]], &[vec![0]], &[vec![0.0]]);
        assert!(matches!(err, Err(Error::InvalidData(_))));
    }

    #[test]
    fn check_enforces_reward_bounds() {
        let mdp = corridor();
        assert!(mdp.check(1e-9, -1.0, 2.0).is_ok());
        assert!(mdp.check(1e-9, 0.0, 2.0).is_err());
    }
}
