//! Sampling interactions with MDPs.
//!
//! Simulators own their generator so a seed reproduces a whole run.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::ensure_len;
use crate::sampling::categorical;
use crate::{Error, FiniteMdp, Mdp, Result};

/// Outcome of one transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub next: usize,
    pub reward: f64,
}

/// Samples `(s', r)` for a submitted `(s, a)`.
#[derive(Debug, Clone, Copy)]
pub struct MdpGenerator<'m> {
    mdp: &'m Mdp,
}

impl<'m> MdpGenerator<'m> {
    pub fn new(mdp: &'m Mdp) -> Self {
        Self { mdp }
    }

    pub fn submit<R: Rng + ?Sized>(
        &self,
        state: usize,
        action: usize,
        rng: &mut R,
    ) -> Result<Step> {
        let mdp = self.mdp;
        if state >= mdp.states() || action >= mdp.actions() {
            return Err(Error::InvalidData(format!(
                "(state {state}, action {action}) is outside ({}, {})",
                mdp.states(),
                mdp.actions()
            )));
        }
        let next = categorical(mdp.transition_row(state, action), rng)?;
        Ok(Step {
            next,
            reward: mdp.reward(state, action, next),
        })
    }
}

/// Stateful walk through an [`Mdp`] that records its trajectory.
#[derive(Debug)]
pub struct MdpSimulator<'m, R = StdRng> {
    generator: MdpGenerator<'m>,
    rng: R,
    state: usize,
    reward: f64,
    states: Vec<usize>,
    actions: Vec<usize>,
    rewards: Vec<f64>,
}

impl<'m> MdpSimulator<'m, StdRng> {
    pub fn new(mdp: &'m Mdp) -> Result<Self> {
        Self::with_rng(mdp, StdRng::from_entropy())
    }

    pub fn with_seed(mdp: &'m Mdp, seed: u64) -> Result<Self> {
        Self::with_rng(mdp, StdRng::seed_from_u64(seed))
    }
}

impl<'m, R: Rng> MdpSimulator<'m, R> {
    /// Start a simulator at a state drawn from the initial distribution.
    pub fn with_rng(mdp: &'m Mdp, rng: R) -> Result<Self> {
        let mut sim = Self {
            generator: MdpGenerator::new(mdp),
            rng,
            state: 0,
            reward: 0.0,
            states: Vec::new(),
            actions: Vec::new(),
            rewards: Vec::new(),
        };
        sim.reset()?;
        Ok(sim)
    }

    /// Draw a fresh initial state and clear the trajectory.
    pub fn reset(&mut self) -> Result<()> {
        self.state = categorical(self.generator.mdp.initial_distribution(), &mut self.rng)?;
        self.reward = 0.0;
        self.states.clear();
        self.actions.clear();
        self.rewards.clear();
        self.states.push(self.state);
        Ok(())
    }

    /// Take `action` from the current state; returns the reward.
    pub fn submit(&mut self, action: usize) -> Result<f64> {
        let step = self.generator.submit(self.state, action, &mut self.rng)?;
        self.state = step.next;
        self.reward = step.reward;
        self.states.push(step.next);
        self.actions.push(action);
        self.rewards.push(step.reward);
        Ok(step.reward)
    }

    /// Follow a stationary deterministic policy for `steps` transitions.
    pub fn simulate(&mut self, policy: &[usize], steps: usize) -> Result<()> {
        ensure_len(policy.len(), self.generator.mdp.states(), "policy")?;
        for _ in 0..steps {
            self.submit(policy[self.state])?;
        }
        Ok(())
    }

    #[inline]
    pub fn state(&self) -> usize {
        self.state
    }

    /// Reward of the last transition, 0 right after a reset.
    #[inline]
    pub fn reward(&self) -> f64 {
        self.reward
    }

    /// Visited states, starting with the initial one.
    pub fn state_trajectory(&self) -> &[usize] {
        &self.states
    }

    pub fn action_trajectory(&self) -> &[usize] {
        &self.actions
    }

    pub fn reward_trajectory(&self) -> &[f64] {
        &self.rewards
    }

    /// Discounted return of the recorded trajectory.
    pub fn discounted_return(&self) -> f64 {
        let gamma = self.generator.mdp.gamma();
        self.rewards
            .iter()
            .rev()
            .fold(0.0, |acc, r| r + gamma * acc)
    }
}

/// A batch of finite-horizon episodes in the layout [`FiniteMdp::from_trajectories`] reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Episodes {
    /// `H + 1` states per episode.
    pub states: Vec<Vec<usize>>,
    /// `H` actions per episode.
    pub actions: Vec<Vec<usize>>,
    /// `H` rewards per episode.
    pub rewards: Vec<Vec<f64>>,
}

impl Episodes {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Maximum-likelihood model of the MDP that produced these episodes.
    pub fn estimate(&self, horizon: usize, states: usize, actions: usize) -> Result<FiniteMdp> {
        FiniteMdp::from_trajectories(
            horizon,
            states,
            actions,
            &self.states,
            &self.actions,
            &self.rewards,
        )
    }
}

/// Runs time-indexed policies on a [`FiniteMdp`].
#[derive(Debug)]
pub struct FiniteMdpSimulator<'m, R = StdRng> {
    mdp: &'m FiniteMdp,
    rng: R,
}

impl<'m> FiniteMdpSimulator<'m, StdRng> {
    pub fn new(mdp: &'m FiniteMdp) -> Self {
        Self::with_rng(mdp, StdRng::from_entropy())
    }

    pub fn with_seed(mdp: &'m FiniteMdp, seed: u64) -> Self {
        Self::with_rng(mdp, StdRng::seed_from_u64(seed))
    }
}

impl<'m, R: Rng> FiniteMdpSimulator<'m, R> {
    pub fn with_rng(mdp: &'m FiniteMdp, rng: R) -> Self {
        Self { mdp, rng }
    }

    /// Sample `count` episodes under `policy[t][s]`.
    pub fn episodes(&mut self, policy: &[Vec<usize>], count: usize) -> Result<Episodes> {
        let mdp = self.mdp;
        ensure_len(policy.len(), mdp.horizon(), "policy horizon")?;
        for actions in policy {
            ensure_len(actions.len(), mdp.states(), "policy step")?;
            if let Some(&a) = actions.iter().find(|&&a| a >= mdp.actions()) {
                return Err(Error::InvalidData(format!(
                    "policy picks action {a}, but there are only {} actions",
                    mdp.actions()
                )));
            }
        }

        let mut out = Episodes::default();
        for _ in 0..count {
            let mut s = categorical(mdp.initial_distribution(), &mut self.rng)?;
            let mut states = Vec::with_capacity(mdp.horizon() + 1);
            let mut actions = Vec::with_capacity(mdp.horizon());
            let mut rewards = Vec::with_capacity(mdp.horizon());
            states.push(s);
            for (t, step_policy) in policy.iter().enumerate() {
                let a = step_policy[s];
                let next = categorical(mdp.transition_row(t, s, a), &mut self.rng)?;
                actions.push(a);
                rewards.push(mdp.reward(t, s, a, next));
                states.push(next);
                s = next;
            }
            out.states.push(states);
            out.actions.push(actions);
            out.rewards.push(rewards);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Mdp {
        // Action 0 moves right with probability 1, action 1 stays; leaving state 2 pays 1.
        Mdp::new(
            3,
            2,
            0.5,
            |s, _, _| if s == 2 { 1.0 } else { 0.0 },
            |s| if s == 0 { 1.0 } else { 0.0 },
            |s, a, next| {
                let target = if a == 0 { (s + 1) % 3 } else { s };
                if next == target { 1.0 } else { 0.0 }
            },
        )
        .unwrap()
    }

    #[test]
    fn simulator_records_the_walk() {
        let mdp = chain();
        let mut sim = MdpSimulator::with_seed(&mdp, 1).unwrap();
        assert_eq!(sim.state(), 0);
        sim.simulate(&[0, 0, 1], 4).unwrap();

        assert_eq!(sim.state_trajectory(), &[0, 1, 2, 2, 2]);
        assert_eq!(sim.action_trajectory(), &[0, 0, 1, 1]);
        assert_eq!(sim.reward_trajectory(), &[0.0, 0.0, 1.0, 1.0]);
        assert_eq!(sim.reward(), 1.0);
        assert!((sim.discounted_return() - (0.25 + 0.125)).abs() < 1e-12);

        sim.reset().unwrap();
        assert_eq!(sim.state_trajectory(), &[0]);
        assert!(sim.action_trajectory().is_empty());
    }

    #[test]
    fn generator_rejects_unknown_actions() {
        let mdp = chain();
        let mut rng = StdRng::seed_from_u64(0);
        let generator = MdpGenerator::new(&mdp);
        assert_eq!(
            generator.submit(1, 0, &mut rng).unwrap(),
            Step {
                next: 2,
                reward: 0.0
            }
        );
        assert!(generator.submit(0, 2, &mut rng).is_err());
    }

    #[test]
    fn episodes_feed_the_estimator() {
        let mdp = FiniteMdp::new(
            2,
            2,
            2,
            |_, s, a, _| (s + a) as f64,
            |_| 0.5,
            |_, _, a, next| if a == 0 { 0.5 } else if next == 1 { 1.0 } else { 0.0 },
        )
        .unwrap();

        let mut sim = FiniteMdpSimulator::with_seed(&mdp, 3);
        let policy = vec![vec![0, 1], vec![1, 1]];
        let episodes = sim.episodes(&policy, 200).unwrap();
        assert_eq!(episodes.len(), 200);
        assert!(episodes.states.iter().all(|s| s.len() == 3));

        let estimate = episodes.estimate(2, 2, 2).unwrap();
        // Action 1 always lands in state 1.
        assert_eq!(estimate.transition_row(1, 0, 1), &[0.0, 1.0]);
        assert_eq!(estimate.reward(1, 1, 1, 1), 2.0);
        let p = estimate.transition(0, 0, 0, 0);
        assert!((p - 0.5).abs() < 0.2, "p={p}");
    }
}
