//! Negative sampling by endpoint corruption.
//!
//! The first half of a batch gets a random user, the second half a random
//! subreddit. Repeating the pass `num_nce` times and concatenating yields the
//! negative batch the margin loss compares against.

use rand::Rng;

use crate::error::TrainError;
use crate::training::data::{KnownTriplets, Triplet};

/// Negatives for one positive batch.
#[derive(Debug, Clone)]
pub struct NegativeBatch {
    /// `num_nce * batch` corrupted rows, one pass after another.
    pub triplets: Vec<Triplet>,
    /// Per-row collision flags against the known-triplet set, when filtering
    /// is enabled. Not consumed by the loss.
    pub false_negatives: Option<Vec<bool>>,
}

impl NegativeBatch {
    pub fn len(&self) -> usize {
        self.triplets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triplets.is_empty()
    }

    /// Number of corrupted rows that collide with a known triplet.
    pub fn num_false_negatives(&self) -> usize {
        self.false_negatives
            .as_ref()
            .map(|flags| flags.iter().filter(|&&f| f).count())
            .unwrap_or(0)
    }
}

/// Uniform endpoint-corruption sampler.
#[derive(Debug, Clone, Copy)]
pub struct NegativeSampler {
    num_users: usize,
    num_subreddits: usize,
}

impl NegativeSampler {
    pub fn new(num_users: usize, num_subreddits: usize) -> Self {
        assert!(num_users > 0, "num_users must be > 0");
        assert!(num_subreddits > 0, "num_subreddits must be > 0");
        Self {
            num_users,
            num_subreddits,
        }
    }

    pub fn num_users(&self) -> usize {
        self.num_users
    }

    pub fn num_subreddits(&self) -> usize {
        self.num_subreddits
    }

    /// One corruption pass over `batch`.
    ///
    /// Rows `[0, B/2)` get a uniform user in `[0, num_users)`, rows `[B/2, B)`
    /// a uniform subreddit in `[0, num_subreddits)`. Relation is untouched.
    pub fn corrupt(&self, batch: &[Triplet], rng: &mut impl Rng) -> Result<Vec<Triplet>, TrainError> {
        check_batch(batch.len())?;
        let half = batch.len() / 2;
        let corrupted = batch
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let mut c = *t;
                if i < half {
                    c.user = rng.gen_range(0..self.num_users) as i64;
                } else {
                    c.subreddit = rng.gen_range(0..self.num_subreddits) as i64;
                }
                c
            })
            .collect();
        Ok(corrupted)
    }

    /// Run `num_nce` corruption passes and concatenate them in pass order.
    ///
    /// When `known` is given, every corrupted row is tested against it and the
    /// collision flags are returned alongside the rows.
    pub fn sample(
        &self,
        batch: &[Triplet],
        num_nce: usize,
        known: Option<&KnownTriplets>,
        rng: &mut impl Rng,
    ) -> Result<NegativeBatch, TrainError> {
        let mut triplets = Vec::with_capacity(batch.len() * num_nce);
        let mut false_negatives = known.map(|_| Vec::with_capacity(batch.len() * num_nce));

        for _ in 0..num_nce {
            let pass = self.corrupt(batch, rng)?;
            if let (Some(known), Some(flags)) = (known, false_negatives.as_mut()) {
                flags.extend(pass.iter().map(|t| known.contains(t)));
            }
            triplets.extend(pass);
        }

        Ok(NegativeBatch {
            triplets,
            false_negatives,
        })
    }
}

/// Reject batch sizes the midpoint split cannot handle.
pub fn check_batch(len: usize) -> Result<(), TrainError> {
    if len == 0 {
        return Err(TrainError::EmptyBatch);
    }
    if len % 2 != 0 {
        return Err(TrainError::OddBatch(len));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn make_batch(n: usize) -> Vec<Triplet> {
        (0..n as i64).map(|i| Triplet::new(1000 + i, 2000 + i, i % 3)).collect()
    }

    #[test]
    fn test_corrupt_split_at_midpoint() {
        let sampler = NegativeSampler::new(50, 40);
        let batch = make_batch(8);
        let mut rng = StdRng::seed_from_u64(11);

        let corrupted = sampler.corrupt(&batch, &mut rng).unwrap();
        assert_eq!(corrupted.len(), 8);

        for (i, (orig, neg)) in batch.iter().zip(&corrupted).enumerate() {
            assert_eq!(orig.relation, neg.relation, "row {i}: relation changed");
            if i < 4 {
                // Original users are >= 1000 so any draw in [0, 50) differs
                assert_ne!(orig.user, neg.user, "row {i}: user not replaced");
                assert!((0..50).contains(&neg.user));
                assert_eq!(orig.subreddit, neg.subreddit, "row {i}: subreddit changed");
            } else {
                assert_eq!(orig.user, neg.user, "row {i}: user changed");
                assert_ne!(orig.subreddit, neg.subreddit, "row {i}: subreddit not replaced");
                assert!((0..40).contains(&neg.subreddit));
            }
        }
    }

    #[test]
    fn test_corrupt_rejects_odd_and_empty() {
        let sampler = NegativeSampler::new(10, 10);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            sampler.corrupt(&make_batch(5), &mut rng),
            Err(TrainError::OddBatch(5))
        ));
        assert!(matches!(
            sampler.corrupt(&[], &mut rng),
            Err(TrainError::EmptyBatch)
        ));
    }

    #[test]
    fn test_sample_concatenates_passes() {
        let sampler = NegativeSampler::new(10, 10);
        let batch = make_batch(6);
        let mut rng = StdRng::seed_from_u64(5);

        let negatives = sampler.sample(&batch, 3, None, &mut rng).unwrap();
        assert_eq!(negatives.len(), 18);
        assert!(negatives.false_negatives.is_none());
        assert_eq!(negatives.num_false_negatives(), 0);

        // Each pass keeps the source row's untouched endpoint at the same offset
        for pass in 0..3 {
            for i in 0..6 {
                let neg = negatives.triplets[pass * 6 + i];
                if i < 3 {
                    assert_eq!(neg.subreddit, batch[i].subreddit);
                } else {
                    assert_eq!(neg.user, batch[i].user);
                }
            }
        }
    }

    #[test]
    fn test_false_negative_flags() {
        // A single user/subreddit space forces every corruption to collide
        let sampler = NegativeSampler::new(1, 1);
        let batch = vec![Triplet::new(0, 0, 0); 4];
        let known = KnownTriplets::from_triplets(&batch);
        let mut rng = StdRng::seed_from_u64(1);

        let negatives = sampler.sample(&batch, 2, Some(&known), &mut rng).unwrap();
        let flags = negatives.false_negatives.as_ref().unwrap();
        assert_eq!(flags.len(), 8);
        assert!(flags.iter().all(|&f| f));
        assert_eq!(negatives.num_false_negatives(), 8);
    }

    #[test]
    fn test_false_negative_flags_no_collision() {
        let sampler = NegativeSampler::new(5, 5);
        let batch = make_batch(4);
        let known = KnownTriplets::from_triplets(&batch);
        let mut rng = StdRng::seed_from_u64(2);

        let negatives = sampler.sample(&batch, 1, Some(&known), &mut rng).unwrap();
        assert_eq!(negatives.num_false_negatives(), 0);
    }
}
