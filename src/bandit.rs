//! Multi-armed bandits and the UCB strategy.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::sampling::argmax_random_tie;
use crate::{Error, Result};

/// Samples per arm when expected rewards have to be estimated.
pub const DEFAULT_ESTIMATE_SAMPLES: usize = 256;

/// A bandit with a fixed number of arms and a stochastic reward per pull.
pub trait Bandit {
    fn arms(&self) -> usize;

    /// Reward of one pull of `arm`. `arm < self.arms()`.
    fn sample<R: Rng + ?Sized>(&self, arm: usize, rng: &mut R) -> f64;
}

/// Arms with normally distributed rewards.
#[derive(Debug, Clone)]
pub struct GaussianBandit {
    arms: Vec<Normal<f64>>,
}

impl GaussianBandit {
    pub fn new(means: &[f64], stds: &[f64]) -> Result<Self> {
        crate::error::ensure_len(stds.len(), means.len(), "standard deviations")?;
        if means.is_empty() {
            return Err(Error::InvalidConfig("a bandit needs at least one arm".to_owned()));
        }
        let arms = means
            .iter()
            .zip(stds)
            .map(|(&mean, &std)| {
                Normal::new(mean, std).map_err(|e| {
                    Error::InvalidConfig(format!("arm N({mean}, {std}^2): {e}"))
                })
            })
            .collect::<Result<_>>()?;
        Ok(Self { arms })
    }
}

impl Bandit for GaussianBandit {
    fn arms(&self) -> usize {
        self.arms.len()
    }

    fn sample<R: Rng + ?Sized>(&self, arm: usize, rng: &mut R) -> f64 {
        self.arms[arm].sample(rng)
    }
}

/// Arms paying 1 with probability `p` and 0 otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct BernoulliBandit {
    probabilities: Vec<f64>,
}

impl BernoulliBandit {
    pub fn new(probabilities: &[f64]) -> Result<Self> {
        if probabilities.is_empty() {
            return Err(Error::InvalidConfig("a bandit needs at least one arm".to_owned()));
        }
        if let Some(p) = probabilities.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(Error::InvalidConfig(format!(
                "arm probability must be in [0, 1], got {p}"
            )));
        }
        Ok(Self {
            probabilities: probabilities.to_vec(),
        })
    }
}

impl Bandit for BernoulliBandit {
    fn arms(&self) -> usize {
        self.probabilities.len()
    }

    fn sample<R: Rng + ?Sized>(&self, arm: usize, rng: &mut R) -> f64 {
        if rng.gen_bool(self.probabilities[arm]) {
            1.0
        } else {
            0.0
        }
    }
}

/// Empirical mean reward of every arm over `samples` pulls each.
pub fn estimate_means<B, R>(bandit: &B, samples: usize, rng: &mut R) -> Result<Vec<f64>>
where
    B: Bandit + ?Sized,
    R: Rng + ?Sized,
{
    if samples == 0 {
        return Err(Error::InvalidConfig(
            "estimating means needs at least one sample per arm".to_owned(),
        ));
    }
    Ok((0..bandit.arms())
        .map(|arm| {
            let total: f64 = (0..samples).map(|_| bandit.sample(arm, rng)).sum();
            total / samples as f64
        })
        .collect())
}

/// Runs UCB on a bandit and scores action histories against its expected rewards.
///
/// Expected rewards are either supplied or estimated on first use.
#[derive(Debug)]
pub struct UcbSolver<'b, B, R = StdRng> {
    bandit: &'b B,
    means: Option<Vec<f64>>,
    samples: usize,
    rng: R,
}

impl<'b, B: Bandit> UcbSolver<'b, B, StdRng> {
    pub fn new(bandit: &'b B) -> Self {
        Self::with_rng(bandit, StdRng::from_entropy())
    }

    pub fn with_seed(bandit: &'b B, seed: u64) -> Self {
        Self::with_rng(bandit, StdRng::seed_from_u64(seed))
    }
}

impl<'b, B: Bandit, R: Rng> UcbSolver<'b, B, R> {
    pub fn with_rng(bandit: &'b B, rng: R) -> Self {
        Self {
            bandit,
            means: None,
            samples: DEFAULT_ESTIMATE_SAMPLES,
            rng,
        }
    }

    /// Use known expected rewards instead of estimating them.
    pub fn with_means(mut self, means: Vec<f64>) -> Result<Self> {
        crate::error::ensure_len(means.len(), self.bandit.arms(), "expected rewards")?;
        crate::error::ensure_finite(&means, "expected rewards")?;
        self.means = Some(means);
        Ok(self)
    }

    /// Pulls per arm when the expected rewards have to be estimated.
    pub fn with_samples(mut self, samples: usize) -> Result<Self> {
        if samples == 0 {
            return Err(Error::InvalidConfig(
                "estimating means needs at least one sample per arm".to_owned(),
            ));
        }
        self.samples = samples;
        Ok(self)
    }

    /// Expected reward of every arm, estimating them first if needed.
    pub fn expected_rewards(&mut self) -> Result<&[f64]> {
        if self.means.is_none() {
            let means = estimate_means(self.bandit, self.samples, &mut self.rng)?;
            debug!(samples = self.samples, ?means, "estimated bandit means");
            self.means = Some(means);
        }
        match &self.means {
            Some(means) => Ok(means),
            None => Err(Error::NotSolved("expected rewards are unavailable".to_owned())),
        }
    }

    /// Arm with the highest expected reward; ties go to a random maximizer.
    pub fn optimal_action(&mut self) -> Result<usize> {
        let means = self.expected_rewards()?.to_vec();
        argmax_random_tie(&means, &mut self.rng)
            .ok_or_else(|| Error::Numerical("no arm has a comparable mean".to_owned()))
    }

    /// Pull every arm once, then `argmax_a mean_a + scale / sqrt(n_a)` until `pulls`
    /// actions have been taken. Returns the arm pulled at each step.
    pub fn ucb(&mut self, pulls: usize, scale: f64) -> Result<Vec<usize>> {
        let arms = self.bandit.arms();
        if pulls < arms {
            return Err(Error::InvalidConfig(format!(
                "UCB needs at least one pull per arm ({arms}), got {pulls}"
            )));
        }
        if !(scale.is_finite() && scale >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "exploration scale must be finite and >= 0, got {scale}"
            )));
        }

        let mut history = Vec::with_capacity(pulls);
        let mut counts = vec![1usize; arms];
        let mut totals: Vec<f64> = (0..arms)
            .map(|arm| self.bandit.sample(arm, &mut self.rng))
            .collect();
        history.extend(0..arms);

        let mut bounds = vec![0.0; arms];
        for _ in arms..pulls {
            for ((b, &total), &n) in bounds.iter_mut().zip(&totals).zip(&counts) {
                let n = n as f64;
                *b = total / n + scale / n.sqrt();
            }
            let arm = argmax_random_tie(&bounds, &mut self.rng).ok_or_else(|| {
                Error::Numerical("upper confidence bounds are not comparable".to_owned())
            })?;
            counts[arm] += 1;
            totals[arm] += self.bandit.sample(arm, &mut self.rng);
            history.push(arm);
        }
        debug!(pulls, scale, ?counts, "UCB run finished");
        Ok(history)
    }

    /// Per-step regret `max_a mean_a - mean_{history[t]}`.
    pub fn regret(&mut self, history: &[usize]) -> Result<Vec<f64>> {
        let means = self.expected_rewards()?;
        let best = means.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        history
            .iter()
            .map(|&arm| {
                means.get(arm).map(|m| best - m).ok_or_else(|| {
                    Error::InvalidData(format!(
                        "history pulls arm {arm}, but there are only {} arms",
                        means.len()
                    ))
                })
            })
            .collect()
    }

    /// Running sum of [`Self::regret`].
    pub fn total_regret(&mut self, history: &[usize]) -> Result<Vec<f64>> {
        let mut out = self.regret(history)?;
        for t in 1..out.len() {
            out[t] += out[t - 1];
        }
        Ok(out)
    }

    /// Running mean of [`Self::regret`].
    pub fn average_regret(&mut self, history: &[usize]) -> Result<Vec<f64>> {
        let mut out = self.total_regret(history)?;
        for (t, r) in out.iter_mut().enumerate() {
            *r /= (t + 1) as f64;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regret_against_supplied_means() {
        let bandit = BernoulliBandit::new(&[0.1, 0.9, 0.5]).unwrap();
        let mut solver = UcbSolver::with_seed(&bandit, 0)
            .with_means(vec![0.1, 0.9, 0.5])
            .unwrap();
        assert_eq!(solver.optimal_action().unwrap(), 1);

        let history = [0, 1, 2, 1];
        let regret = solver.regret(&history).unwrap();
        let expected = [0.8, 0.0, 0.4, 0.0];
        for (r, e) in regret.iter().zip(expected) {
            assert!((r - e).abs() < 1e-12);
        }
        let total = solver.total_regret(&history).unwrap();
        assert!((total[3] - 1.2).abs() < 1e-12);
        let average = solver.average_regret(&history).unwrap();
        assert!((average[3] - 0.3).abs() < 1e-12);
        assert!(solver.regret(&[3]).is_err());
    }

    #[test]
    fn ucb_concentrates_on_best_arm() {
        let bandit = BernoulliBandit::new(&[0.1, 0.9, 0.5]).unwrap();
        let mut solver = UcbSolver::with_seed(&bandit, 11);
        let history = solver.ucb(2000, 1.0).unwrap();
        assert_eq!(history.len(), 2000);
        assert_eq!(&history[..3], &[0, 1, 2]);

        let best_pulls = history.iter().filter(|&&a| a == 1).count();
        assert!(best_pulls > 1500, "best arm pulled {best_pulls} times");

        let average = solver.average_regret(&history).unwrap();
        assert!(average[1999] < 0.1, "average regret {}", average[1999]);
    }

    #[test]
    fn estimated_means_are_close() {
        let bandit = GaussianBandit::new(&[1.0, -2.0], &[0.0, 0.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        assert_eq!(estimate_means(&bandit, 4, &mut rng).unwrap(), vec![1.0, -2.0]);

        let mut solver = UcbSolver::with_seed(&bandit, 5).with_samples(8).unwrap();
        assert_eq!(solver.expected_rewards().unwrap(), &[1.0, -2.0]);
        assert_eq!(solver.optimal_action().unwrap(), 0);
    }

    #[test]
    fn too_few_pulls_is_a_config_error() {
        let bandit = BernoulliBandit::new(&[0.5, 0.5]).unwrap();
        let mut solver = UcbSolver::with_seed(&bandit, 0);
        assert!(matches!(solver.ucb(1, 1.0), Err(Error::InvalidConfig(_))));
        assert!(BernoulliBandit::new(&[1.5]).is_err());
        assert!(GaussianBandit::new(&[0.0], &[-1.0]).is_err());
    }
}
