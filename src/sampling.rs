//! Random helpers shared by initializers, solvers and simulators.
//!
//! Nothing here owns a generator: callers pass any `rand::Rng`, which keeps every
//! consumer reproducible under a seeded `StdRng`.

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::{Error, Result};

/// Draw from `N(mean, std^2)`.
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R, mean: f64, std: f64) -> Result<f64> {
    let normal = Normal::new(mean, std)
        .map_err(|e| Error::InvalidConfig(format!("gaussian(mean={mean}, std={std}): {e}")))?;
    Ok(normal.sample(rng))
}

/// Sample an index with probability proportional to `weights`.
///
/// Weights must be finite and non-negative with a positive total.
pub fn categorical<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Result<usize> {
    let mut total = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        if !(w.is_finite() && w >= 0.0) {
            return Err(Error::InvalidData(format!(
                "weight {i} must be finite and >= 0, got {w}"
            )));
        }
        total += w;
    }
    if total <= 0.0 {
        return Err(Error::InvalidData(
            "weights must have a positive total".to_owned(),
        ));
    }

    let mut choice = rng.gen_range(0.0..total);
    let mut last_positive = 0;
    for (i, &w) in weights.iter().enumerate() {
        if w > 0.0 {
            last_positive = i;
            if choice < w {
                return Ok(i);
            }
            choice -= w;
        }
    }
    // Rounding can leave a sliver of mass past the last bucket.
    Ok(last_positive)
}

/// Index of the maximum value, breaking exact ties uniformly at random.
///
/// Returns `None` for an empty slice. NaN entries never win.
pub fn argmax_random_tie<R: Rng + ?Sized>(values: &[f64], rng: &mut R) -> Option<usize> {
    let mut best = f64::NEG_INFINITY;
    let mut count = 0usize;
    for &v in values {
        if v > best {
            best = v;
            count = 1;
        } else if v == best {
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }

    let mut choice = rng.gen_range(0..count);
    for (i, &v) in values.iter().enumerate() {
        if v == best {
            if choice == 0 {
                return Some(i);
            }
            choice -= 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn gaussian_rejects_negative_std() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(gaussian(&mut rng, 0.0, -1.0).is_err());
        assert!(gaussian(&mut rng, 0.0, 1.0).unwrap().is_finite());
    }

    #[test]
    fn categorical_never_picks_zero_weight() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let i = categorical(&[0.0, 1.0, 0.0, 3.0], &mut rng).unwrap();
            assert!(i == 1 || i == 3);
        }
        assert!(categorical(&[0.0, 0.0], &mut rng).is_err());
        assert!(categorical(&[1.0, -1.0], &mut rng).is_err());
    }

    #[test]
    fn argmax_breaks_ties_over_every_maximum() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen = [false; 4];
        for _ in 0..200 {
            let i = argmax_random_tie(&[1.0, 5.0, 2.0, 5.0], &mut rng).unwrap();
            assert!(i == 1 || i == 3);
            seen[i] = true;
        }
        assert!(seen[1] && seen[3]);
        assert_eq!(argmax_random_tie(&[], &mut rng), None);
        assert_eq!(argmax_random_tie(&[f64::NAN, 0.0], &mut rng), Some(1));
    }
}
