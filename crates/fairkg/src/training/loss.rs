//! Noise-contrastive margin ranking loss.
//!
//! Generic over `B: Backend` and operating on burn tensors.
//! Convention: energies are distance-like, lower energy = more plausible triplet.

use burn::prelude::*;

use crate::error::TrainError;

/// Hinge loss between positive energies and their `num_nce` corrupted copies.
#[derive(Debug, Clone, Copy)]
pub struct MarginRankingLoss {
    margin: f64,
    num_nce: usize,
}

impl MarginRankingLoss {
    pub fn new(margin: f64, num_nce: usize) -> Self {
        assert!(num_nce >= 1, "num_nce must be >= 1");
        Self { margin, num_nce }
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    pub fn num_nce(&self) -> usize {
        self.num_nce
    }

    /// Compute `max(0, margin + pos - neg)` element-wise.
    ///
    /// # Arguments
    /// - `pos_energy`: shape `(batch,)`
    /// - `neg_energy`: shape `(num_nce * batch,)`, laid out pass after pass
    /// - `weights`: optional per-negative weights, shape `(num_nce * batch,)`;
    ///   scores are rescaled by `weight / mean(weight)`
    ///
    /// # Returns
    /// `(mean score of shape (1,), per-element scores of shape (num_nce * batch,))`.
    pub fn forward<B: Backend>(
        &self,
        pos_energy: Tensor<B, 1>,
        neg_energy: Tensor<B, 1>,
        weights: Option<Tensor<B, 1>>,
    ) -> Result<(Tensor<B, 1>, Tensor<B, 1>), TrainError> {
        let [batch] = pos_energy.dims();
        let [n_neg] = neg_energy.dims();
        if n_neg != batch * self.num_nce {
            return Err(TrainError::ShapeMismatch(format!(
                "{n_neg} negative energies for {batch} positives with num_nce={}",
                self.num_nce
            )));
        }

        // Tile [p0..pB] num_nce times so row i lines up with negative row i
        let pos_tiled = pos_energy.repeat_dim(0, self.num_nce);
        let mut scores = (pos_tiled - neg_energy).add_scalar(self.margin).clamp_min(0.0);

        if let Some(w) = weights {
            let [n_w] = w.dims();
            if n_w != n_neg {
                return Err(TrainError::ShapeMismatch(format!(
                    "{n_w} weights for {n_neg} negative energies"
                )));
            }
            let w_mean = w.clone().mean();
            scores = scores * w / w_mean;
        }

        Ok((scores.clone().mean(), scores))
    }
}
