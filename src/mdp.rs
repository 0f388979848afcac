//! Discounted Markov decision processes.
//!
//! An [`Mdp`] is a dense table of `T(s, a, s')`, `r(s, a, s')` and `mu(s)` built once from
//! closures (or raw tables) and validated up front. [`MdpSolver`] finds deterministic
//! policies by policy iteration, value iteration, or either linear-programming form.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::error::ensure_len;
use crate::linalg;
use crate::lp::{Outcome, Simplex};
use crate::sampling::{argmax_random_tie, categorical};
use crate::{Error, Matrix, Result};

/// Allowed deviation of a probability vector's total from 1.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct Mdp {
    states: usize,
    actions: usize,
    gamma: f64,
    /// `T(s, a, s')` at `(s * actions + a) * states + s'`.
    transitions: Vec<f64>,
    /// Same layout as `transitions`.
    rewards: Vec<f64>,
    initial: Vec<f64>,
}

impl Mdp {
    /// Tabulate an MDP from its reward, initial-distribution and transition functions.
    pub fn new<R, M, T>(
        states: usize,
        actions: usize,
        gamma: f64,
        reward: R,
        initial: M,
        transition: T,
    ) -> Result<Self>
    where
        R: Fn(usize, usize, usize) -> f64,
        M: Fn(usize) -> f64,
        T: Fn(usize, usize, usize) -> f64,
    {
        let len = states * actions * states;
        let mut transitions = Vec::with_capacity(len);
        let mut rewards = Vec::with_capacity(len);
        for s in 0..states {
            for a in 0..actions {
                for next in 0..states {
                    transitions.push(transition(s, a, next));
                    rewards.push(reward(s, a, next));
                }
            }
        }
        let initial = (0..states).map(initial).collect();
        Self::from_tables(states, actions, gamma, transitions, rewards, initial)
    }

    /// Build from flat `S x A x S` transition and reward tables and an initial distribution.
    pub fn from_tables(
        states: usize,
        actions: usize,
        gamma: f64,
        transitions: Vec<f64>,
        rewards: Vec<f64>,
        initial: Vec<f64>,
    ) -> Result<Self> {
        if states == 0 || actions == 0 {
            return Err(Error::InvalidConfig(format!(
                "an MDP needs states > 0 and actions > 0, got ({states}, {actions})"
            )));
        }
        if !(gamma.is_finite() && (0.0..1.0).contains(&gamma)) {
            return Err(Error::InvalidConfig(format!(
                "discount must be in [0, 1), got {gamma}"
            )));
        }
        ensure_len(transitions.len(), states * actions * states, "transition table")?;
        ensure_len(rewards.len(), states * actions * states, "reward table")?;
        ensure_len(initial.len(), states, "initial distribution")?;

        for (row, probs) in transitions.chunks_exact(states).enumerate() {
            check_distribution(probs, || {
                format!("transition row (s={}, a={})", row / actions, row % actions)
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
            actions,
            gamma,
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
    pub fn actions(&self) -> usize {
        self.actions
    }

    #[inline]
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    #[inline]
    pub fn transition(&self, state: usize, action: usize, next: usize) -> f64 {
        self.transitions[self.index(state, action, next)]
    }

    #[inline]
    pub fn reward(&self, state: usize, action: usize, next: usize) -> f64 {
        self.rewards[self.index(state, action, next)]
    }

    #[inline]
    pub fn initial(&self, state: usize) -> f64 {
        self.initial[state]
    }

    pub fn initial_distribution(&self) -> &[f64] {
        &self.initial
    }

    /// Distribution over next states after taking `action` in `state`.
    pub fn transition_row(&self, state: usize, action: usize) -> &[f64] {
        let start = self.index(state, action, 0);
        &self.transitions[start..start + self.states]
    }

    /// `sum_s' T(s, a, s') r(s, a, s')`.
    pub fn expected_reward(&self, state: usize, action: usize) -> f64 {
        let start = self.index(state, action, 0);
        let t = &self.transitions[start..start + self.states];
        let r = &self.rewards[start..start + self.states];
        t.iter().zip(r).map(|(p, r)| p * r).sum()
    }

    /// One-step lookahead `sum_s' T(s, a, s') (r(s, a, s') + gamma V(s'))`.
    fn backup(&self, state: usize, action: usize, value: &[f64]) -> f64 {
        let start = self.index(state, action, 0);
        let t = &self.transitions[start..start + self.states];
        let r = &self.rewards[start..start + self.states];
        t.iter()
            .zip(r)
            .zip(value)
            .map(|((p, r), v)| p * (r + self.gamma * v))
            .sum()
    }

    #[inline]
    fn index(&self, state: usize, action: usize, next: usize) -> usize {
        (state * self.actions + action) * self.states + next
    }
}

pub(crate) fn check_distribution(probs: &[f64], what: impl Fn() -> String) -> Result<()> {
    let mut total = 0.0;
    for &p in probs {
        if !(p.is_finite() && p >= 0.0) {
            return Err(Error::InvalidData(format!(
                "{} has invalid probability {p}",
                what()
            )));
        }
        total += p;
    }
    if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
        return Err(Error::InvalidData(format!("{} sums to {total}", what())));
    }
    Ok(())
}

/// Solver over a borrowed [`Mdp`].
///
/// The generator breaks ties between equally good actions and seeds policy iteration.
#[derive(Debug)]
pub struct MdpSolver<'m, R = StdRng> {
    mdp: &'m Mdp,
    rng: R,
}

impl<'m> MdpSolver<'m, StdRng> {
    pub fn new(mdp: &'m Mdp) -> Self {
        Self::with_rng(mdp, StdRng::from_entropy())
    }

    pub fn with_seed(mdp: &'m Mdp, seed: u64) -> Self {
        Self::with_rng(mdp, StdRng::seed_from_u64(seed))
    }
}

impl<'m, R: Rng> MdpSolver<'m, R> {
    pub fn with_rng(mdp: &'m Mdp, rng: R) -> Self {
        Self { mdp, rng }
    }

    #[inline]
    pub fn mdp(&self) -> &'m Mdp {
        self.mdp
    }

    /// `Q(s, a)` for a state-value function, as an `S x A` matrix.
    pub fn action_values(&self, value: &[f64]) -> Result<Matrix> {
        let mdp = self.mdp;
        ensure_len(value.len(), mdp.states, "value function")?;
        let mut q = Matrix::zeros(mdp.states, mdp.actions);
        for s in 0..mdp.states {
            for (a, out) in q.row_mut(s).iter_mut().enumerate() {
                *out = mdp.backup(s, a, value);
            }
        }
        Ok(q)
    }

    /// `V'(s) = max_a Q(s, a)`.
    pub fn bellman_update(&self, value: &[f64]) -> Result<Vec<f64>> {
        let q = self.action_values(value)?;
        Ok(q.iter_rows()
            .map(|row| row.iter().copied().fold(f64::NEG_INFINITY, f64::max))
            .collect())
    }

    /// Greedy deterministic policy for `value`, ties broken uniformly at random.
    pub fn policy(&mut self, value: &[f64]) -> Result<Vec<usize>> {
        let q = self.action_values(value)?;
        q.iter_rows()
            .enumerate()
            .map(|(s, row)| {
                argmax_random_tie(row, &mut self.rng).ok_or_else(|| {
                    Error::Numerical(format!("no finite action value in state {s}"))
                })
            })
            .collect()
    }

    /// Value of a deterministic policy: solves `(I - gamma T^pi) V = R^pi`.
    pub fn value(&self, policy: &[usize]) -> Result<Vec<f64>> {
        let mdp = self.mdp;
        self.check_policy(policy)?;

        let n = mdp.states;
        let mut system = Matrix::identity(n);
        let mut reward = vec![0.0; n];
        for (s, &a) in policy.iter().enumerate() {
            for (next, &p) in mdp.transition_row(s, a).iter().enumerate() {
                system[(s, next)] -= mdp.gamma * p;
            }
            reward[s] = mdp.expected_reward(s, a);
        }

        let inverse = linalg::inverse(&system).inspect_err(|e| {
            warn!(error = %e, "policy evaluation hit a singular system");
        })?;
        inverse.mul_vec(&reward)
    }

    /// `sum_s mu(s) V(s)`.
    pub fn expected_value(&self, value: &[f64]) -> Result<f64> {
        ensure_len(value.len(), self.mdp.states, "value function")?;
        Ok(self
            .mdp
            .initial
            .iter()
            .zip(value)
            .map(|(mu, v)| mu * v)
            .sum())
    }

    /// `iterations` rounds of exact evaluation followed by greedy improvement, starting
    /// from a uniformly random deterministic policy.
    pub fn policy_iteration(&mut self, iterations: usize) -> Result<Vec<usize>> {
        let actions = self.mdp.actions;
        let mut policy: Vec<usize> = (0..self.mdp.states)
            .map(|_| self.rng.gen_range(0..actions))
            .collect();

        for _ in 0..iterations {
            let value = self.value(&policy)?;
            policy = self.policy(&value)?;
        }
        debug!(iterations, ?policy, "policy iteration finished");
        Ok(policy)
    }

    /// `iterations` Bellman updates from `V = 0`, then the greedy policy.
    pub fn value_iteration(&mut self, iterations: usize) -> Result<Vec<usize>> {
        let mut value = vec![0.0; self.mdp.states];
        for _ in 0..iterations {
            value = self.bellman_update(&value)?;
        }
        debug!(iterations, ?value, "value iteration finished");
        self.policy(&value)
    }

    /// Optimal values from `min mu·V  s.t.  V(s) >= Q_V(s, a)` for every `(s, a)`;
    /// returns the greedy policy.
    ///
    /// `V` is free in sign, so it is split as `V+ - V-` over `2S` non-negative variables.
    /// Only states reachable under `mu` are pinned to their optimal value.
    pub fn primal_lp(&mut self) -> Result<Vec<usize>> {
        let mdp = self.mdp;
        let n = mdp.states;

        let mut lp = Simplex::new(2 * n)?;
        let mut row = vec![0.0; 2 * n + 1];
        for s in 0..n {
            for a in 0..mdp.actions {
                row.fill(0.0);
                for (next, &p) in mdp.transition_row(s, a).iter().enumerate() {
                    let own = if next == s { 1.0 } else { 0.0 };
                    let coef = own - mdp.gamma * p;
                    row[next] = coef;
                    row[n + next] = -coef;
                }
                row[2 * n] = mdp.expected_reward(s, a);
                lp.subject_to_ge(&row)?;
            }
        }

        let objective: Vec<f64> = mdp
            .initial
            .iter()
            .copied()
            .chain(mdp.initial.iter().map(|mu| -mu))
            .collect();
        lp.minimize(&objective)?;

        let (objective_value, x) = optimum(&mut lp, "primal")?;
        let value: Vec<f64> = (0..n).map(|s| x[s] - x[n + s]).collect();
        debug!(objective = objective_value, ?value, "primal LP solved");
        self.policy(&value)
    }

    /// Optimal occupancy measure from `max sum d(s, a) R(s, a)` subject to
    /// `sum_a d(s', a) - gamma sum_{s,a} T(s, a, s') d(s, a) = mu(s')`.
    ///
    /// Each state's action is sampled in proportion to `d(s, .)`; states with no
    /// occupancy get a uniformly random action.
    pub fn dual_lp(&mut self) -> Result<Vec<usize>> {
        let mdp = self.mdp;
        let (n, m) = (mdp.states, mdp.actions);

        let mut lp = Simplex::new(n * m)?;
        let mut row = vec![0.0; n * m + 1];
        for target in 0..n {
            row.fill(0.0);
            for s in 0..n {
                for a in 0..m {
                    let inflow = mdp.gamma * mdp.transition(s, a, target);
                    let own = if s == target { 1.0 } else { 0.0 };
                    row[s * m + a] = own - inflow;
                }
            }
            row[n * m] = mdp.initial[target];
            lp.subject_to_eq(&row)?;
        }

        let objective: Vec<f64> = (0..n)
            .flat_map(|s| (0..m).map(move |a| (s, a)))
            .map(|(s, a)| mdp.expected_reward(s, a))
            .collect();
        lp.maximize(&objective)?;

        let (objective_value, occupancy) = optimum(&mut lp, "dual")?;
        debug!(objective = objective_value, "dual LP solved");

        occupancy
            .chunks_exact(m)
            .map(|d| {
                if d.iter().any(|&v| v > 0.0) {
                    let weights: Vec<f64> = d.iter().map(|v| v.max(0.0)).collect();
                    categorical(&weights, &mut self.rng)
                } else {
                    Ok(self.rng.gen_range(0..m))
                }
            })
            .collect()
    }

    fn check_policy(&self, policy: &[usize]) -> Result<()> {
        ensure_len(policy.len(), self.mdp.states, "policy")?;
        if let Some((s, &a)) = policy
            .iter()
            .enumerate()
            .find(|&(_, &a)| a >= self.mdp.actions)
        {
            return Err(Error::InvalidData(format!(
                "policy picks action {a} in state {s}, but there are only {} actions",
                self.mdp.actions
            )));
        }
        Ok(())
    }
}

fn optimum(lp: &mut Simplex, which: &str) -> Result<(f64, Vec<f64>)> {
    lp.solve()?;
    match lp.outcome() {
        Some(Outcome::Optimal { value, parameters }) => Ok((*value, parameters.clone())),
        other => Err(Error::Solver(format!(
            "{which} LP did not reach an optimum: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Action 0 stays, action 1 swaps; staying in state 1 or leaving state 0 pays 1.
    fn two_state() -> Mdp {
        let r = [[0.0, 1.0], [1.0, 0.0]];
        Mdp::new(
            2,
            2,
            0.9,
            |s, a, _| r[s][a],
            |s| if s == 0 { 1.0 } else { 0.0 },
            |s, a, next| {
                let target = if a == 0 { s } else { 1 - s };
                if next == target { 1.0 } else { 0.0 }
            },
        )
        .unwrap()
    }

    fn three_state() -> Mdp {
        let t = [
            [[0.5, 0.5, 0.0], [0.0, 0.2, 0.8]],
            [[0.1, 0.6, 0.3], [1.0, 0.0, 0.0]],
            [[0.3, 0.3, 0.4], [0.0, 0.0, 1.0]],
        ];
        Mdp::new(
            3,
            2,
            0.8,
            |s, a, next| (s as f64) - 0.5 * (a as f64) + 0.25 * (next as f64),
            |_| 1.0 / 3.0,
            |s, a, next| t[s][a][next],
        )
        .unwrap()
    }

    #[test]
    fn value_iteration_finds_swap_then_stay() {
        let mdp = two_state();
        let mut solver = MdpSolver::with_seed(&mdp, 0);
        let policy = solver.value_iteration(400).unwrap();
        assert_eq!(policy, vec![1, 0]);

        let value = solver.value(&policy).unwrap();
        assert!((value[0] - 10.0).abs() < 1e-8, "{value:?}");
        assert!((value[1] - 10.0).abs() < 1e-8, "{value:?}");
        assert!((solver.expected_value(&value).unwrap() - 10.0).abs() < 1e-8);
    }

    #[test]
    fn bellman_updates_contract_towards_optimum() {
        let mdp = two_state();
        let solver = MdpSolver::with_seed(&mdp, 0);
        let mut value = vec![0.0; 2];
        for _ in 0..400 {
            value = solver.bellman_update(&value).unwrap();
        }
        for v in value {
            assert!((v - 10.0).abs() < 1e-8);
        }
    }

    #[test]
    fn value_iteration_error_shrinks_by_gamma_each_step() {
        let mdp = three_state();
        let mut solver = MdpSolver::with_seed(&mdp, 4);
        let optimal = solver.value_iteration(500).unwrap();
        let target = solver.value(&optimal).unwrap();
        let distance = |v: &[f64]| {
            v.iter()
                .zip(&target)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max)
        };

        let gamma = mdp.gamma();
        let initial = target.iter().map(|v| v.abs()).fold(0.0, f64::max);
        let epsilon = 1e-6;
        let steps = ((initial / epsilon).ln() / (1.0 / gamma).ln()).ceil() as i32;
        assert!(steps > 0 && steps < 100, "{steps}");

        let mut value = vec![0.0; 3];
        for k in 1..=steps {
            value = solver.bellman_update(&value).unwrap();
            assert!(distance(value.as_slice()) <= gamma.powi(k) * initial + 1e-9, "step {k}");
        }
        assert!(distance(value.as_slice()) <= epsilon + 1e-9);
    }

    #[test]
    fn policy_value_satisfies_bellman_equation() {
        let mdp = three_state();
        let solver = MdpSolver::with_seed(&mdp, 1);
        for policy in [[0, 0, 0], [1, 0, 1], [0, 1, 1]] {
            let v = solver.value(&policy).unwrap();
            for (s, &a) in policy.iter().enumerate() {
                let rhs = mdp.backup(s, a, &v);
                assert!((v[s] - rhs).abs() < 1e-8, "state {s}: {} vs {rhs}", v[s]);
            }
        }
    }

    #[test]
    fn solvers_agree_on_optimal_policy() {
        let mdp = three_state();
        let mut solver = MdpSolver::with_seed(&mdp, 2);
        let reference = solver.value_iteration(500).unwrap();
        let reference_value = solver.value(&reference).unwrap();

        for policy in [
            solver.policy_iteration(10).unwrap(),
            solver.primal_lp().unwrap(),
            solver.dual_lp().unwrap(),
        ] {
            let value = solver.value(&policy).unwrap();
            for (v, r) in value.iter().zip(&reference_value) {
                assert!((v - r).abs() < 1e-6, "{value:?} vs {reference_value:?}");
            }
        }
    }

    #[test]
    fn lp_forms_solve_two_state_problem() {
        let mdp = two_state();
        let mut solver = MdpSolver::with_seed(&mdp, 3);
        assert_eq!(solver.primal_lp().unwrap(), vec![1, 0]);
        assert_eq!(solver.dual_lp().unwrap(), vec![1, 0]);
        assert_eq!(solver.policy_iteration(5).unwrap(), vec![1, 0]);
    }

    #[test]
    fn construction_is_validated() {
        let bad_row = Mdp::from_tables(1, 1, 0.5, vec![0.9], vec![0.0], vec![1.0]);
        assert!(matches!(bad_row, Err(Error::InvalidData(_))));

        let bad_gamma = Mdp::from_tables(1, 1, 1.0, vec![1.0], vec![0.0], vec![1.0]);
        assert!(matches!(bad_gamma, Err(Error::InvalidConfig(_))));

        let bad_reward = Mdp::from_tables(1, 1, 0.5, vec![1.0], vec![f64::NAN], vec![1.0]);
        assert!(matches!(bad_reward, Err(Error::InvalidData(_))));

        let bad_shape = Mdp::from_tables(2, 1, 0.5, vec![1.0], vec![0.0], vec![1.0]);
        assert!(matches!(bad_shape, Err(Error::InvalidShape(_))));
    }

    #[test]
    fn policies_are_checked() {
        let mdp = two_state();
        let solver = MdpSolver::with_seed(&mdp, 0);
        assert!(matches!(solver.value(&[0]), Err(Error::InvalidShape(_))));
        assert!(matches!(solver.value(&[0, 2]), Err(Error::InvalidData(_))));
    }
}
