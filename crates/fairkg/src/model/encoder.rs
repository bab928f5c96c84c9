//! Knowledge-graph encoder: the link predictor the adversaries try to read.
//!
//! The training loop only talks to encoders through [`KgEncoder`]. The
//! crate ships [`TransEncoder`], a translation-style model with a bank of
//! per-attribute filters:
//!
//! ```text
//! triplets (n, 3) = [user, subreddit, relation]
//!   → u = E_user[user], s = E_sub[subreddit], r = E_rel[relation]
//!   → lhs = mean_k filter_k(u)        (discriminator mode, k ∈ selected)
//!   → energy = ‖lhs + r − s‖₂         (n,)
//! ```
//!
//! Energies are distance-like: true triplets should end up low.

use burn::nn::{Embedding, EmbeddingConfig, Linear, LinearConfig};
use burn::prelude::*;

/// Output of a discriminator-mode forward pass.
#[derive(Debug, Clone)]
pub struct EncoderOutput<B: Backend> {
    /// Per-row energy, shape `(n,)`.
    pub energies: Tensor<B, 1>,
    /// Filtered user-side embedding, shape `(n, d)`.
    pub lhs: Tensor<B, 2>,
    /// Subreddit-side embedding, shape `(n, d)`.
    pub rhs: Tensor<B, 2>,
}

/// Encoder contract consumed by the adversarial trainer.
pub trait KgEncoder<B: Backend>: Module<B> {
    /// Plain mode: energies for `(n, 3)` triplets, no filters applied.
    fn energies(&self, triplets: Tensor<B, 2, Int>) -> Tensor<B, 1>;

    /// Discriminator mode: energies plus the embeddings the adversaries see,
    /// with the listed filters composed onto the user side.
    fn encode_filtered(&self, triplets: Tensor<B, 2, Int>, filters: &[usize]) -> EncoderOutput<B>;

    /// Number of filters in the bank; valid filter indices are `0..num_filters()`.
    fn num_filters(&self) -> usize;

    /// Embedding width seen by the discriminators.
    fn embed_dim(&self) -> usize;
}

/// Configuration for [`AttributeFilter`].
#[derive(Config, Debug)]
pub struct AttributeFilterConfig {
    pub embed_dim: usize,
    #[config(default = 0.2)]
    pub negative_slope: f64,
}

/// Two-layer LeakyReLU MLP that strips one attribute from an embedding.
#[derive(Module, Debug)]
pub struct AttributeFilter<B: Backend> {
    linear1: Linear<B>,
    linear2: Linear<B>,
    negative_slope: f64,
}

impl AttributeFilterConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> AttributeFilter<B> {
        AttributeFilter {
            linear1: LinearConfig::new(self.embed_dim, self.embed_dim * 2).init(device),
            linear2: LinearConfig::new(self.embed_dim * 2, self.embed_dim).init(device),
            negative_slope: self.negative_slope,
        }
    }
}

impl<B: Backend> AttributeFilter<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear1.forward(x);
        let x = burn::tensor::activation::leaky_relu(x, self.negative_slope);
        self.linear2.forward(x)
    }
}

/// Configuration for [`TransEncoder`].
#[derive(Config, Debug)]
pub struct TransEncoderConfig {
    /// Size of the user id space.
    pub num_users: usize,
    /// Size of the subreddit id space.
    pub num_subreddits: usize,
    /// Size of the relation id space.
    #[config(default = 1)]
    pub num_relations: usize,
    /// Embedding width.
    #[config(default = 20)]
    pub embed_dim: usize,
    /// One filter per sensitive attribute.
    #[config(default = 0)]
    pub num_filters: usize,
}

/// Translation encoder over users and subreddits.
#[derive(Module, Debug)]
pub struct TransEncoder<B: Backend> {
    users: Embedding<B>,
    subreddits: Embedding<B>,
    relations: Embedding<B>,
    filters: Vec<AttributeFilter<B>>,
}

impl TransEncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TransEncoder<B> {
        TransEncoder {
            users: EmbeddingConfig::new(self.num_users, self.embed_dim).init(device),
            subreddits: EmbeddingConfig::new(self.num_subreddits, self.embed_dim).init(device),
            relations: EmbeddingConfig::new(self.num_relations.max(1), self.embed_dim).init(device),
            filters: (0..self.num_filters)
                .map(|_| AttributeFilterConfig::new(self.embed_dim).init(device))
                .collect(),
        }
    }
}

impl<B: Backend> TransEncoder<B> {
    /// Split `(n, 3)` triplets into user, subreddit and relation id columns.
    fn columns(
        triplets: Tensor<B, 2, Int>,
    ) -> (Tensor<B, 1, Int>, Tensor<B, 1, Int>, Tensor<B, 1, Int>) {
        let [n, _] = triplets.dims();
        let column = |i: usize| triplets.clone().slice([0..n, i..i + 1]).reshape([n]);
        (column(0), column(1), column(2))
    }

    /// Look up `(n,)` ids in an embedding table, returning `(n, d)`.
    fn lookup(table: &Embedding<B>, ids: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        let [n] = ids.dims();
        let out = table.forward(ids.reshape([n, 1])); // (n, 1, d)
        let [_, _, d] = out.dims();
        out.reshape([n, d])
    }

    /// Mean of the selected filters applied to `emb`. No filters = identity.
    fn apply_filters(&self, emb: Tensor<B, 2>, filters: &[usize]) -> Tensor<B, 2> {
        let Some((&first, rest)) = filters.split_first() else {
            return emb;
        };
        let summed = rest.iter().fold(self.filters[first].forward(emb.clone()), |acc, &k| {
            acc + self.filters[k].forward(emb.clone())
        });
        summed.div_scalar(filters.len() as f32)
    }

    fn distance(lhs: Tensor<B, 2>, rel: Tensor<B, 2>, rhs: Tensor<B, 2>) -> Tensor<B, 1> {
        let [n, _] = lhs.dims();
        (lhs + rel - rhs)
            .powf_scalar(2.0)
            .sum_dim(1)
            .add_scalar(1e-9)
            .sqrt()
            .reshape([n])
    }
}

impl<B: Backend> KgEncoder<B> for TransEncoder<B> {
    fn energies(&self, triplets: Tensor<B, 2, Int>) -> Tensor<B, 1> {
        let (users, subs, rels) = Self::columns(triplets);
        let u = Self::lookup(&self.users, users);
        let s = Self::lookup(&self.subreddits, subs);
        let r = Self::lookup(&self.relations, rels);
        Self::distance(u, r, s)
    }

    fn encode_filtered(&self, triplets: Tensor<B, 2, Int>, filters: &[usize]) -> EncoderOutput<B> {
        let (users, subs, rels) = Self::columns(triplets);
        let u = Self::lookup(&self.users, users);
        let s = Self::lookup(&self.subreddits, subs);
        let r = Self::lookup(&self.relations, rels);
        let lhs = self.apply_filters(u, filters);
        let energies = Self::distance(lhs.clone(), r, s.clone());
        EncoderOutput {
            energies,
            lhs,
            rhs: s,
        }
    }

    fn num_filters(&self) -> usize {
        self.filters.len()
    }

    fn embed_dim(&self) -> usize {
        let [_, d] = self.users.weight.val().dims();
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::bridge::triplets_to_tensor;
    use crate::training::data::Triplet;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;
    use burn::optim::GradientsParams;

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    fn rows() -> Vec<Triplet> {
        vec![
            Triplet::new(0, 1, 0),
            Triplet::new(1, 2, 0),
            Triplet::new(2, 0, 0),
            Triplet::new(3, 3, 0),
        ]
    }

    #[test]
    fn test_energy_shape_and_sign() {
        let device = Default::default();
        let model = TransEncoderConfig::new(4, 4)
            .with_embed_dim(8)
            .init::<TestBackend>(&device);
        let energies = model.energies(triplets_to_tensor(&rows(), &device));
        assert_eq!(energies.dims(), [4]);
        let min: f32 = energies.min().into_scalar().elem();
        assert!(min >= 0.0, "energies are distances, got {min}");
    }

    #[test]
    fn test_no_filters_matches_plain_mode() {
        let device = Default::default();
        let model = TransEncoderConfig::new(4, 4)
            .with_embed_dim(8)
            .with_num_filters(2)
            .init::<TestBackend>(&device);
        let input = triplets_to_tensor(&rows(), &device);

        let plain = model.energies(input.clone());
        let filtered = model.encode_filtered(input, &[]);
        let diff: f32 = (plain - filtered.energies).abs().max().into_scalar().elem();
        assert!(diff < 1e-6, "empty filter selection should be the identity, diff={diff}");
    }

    #[test]
    fn test_filtered_output_shapes() {
        let device = Default::default();
        let model = TransEncoderConfig::new(4, 4)
            .with_embed_dim(8)
            .with_num_filters(2)
            .init::<TestBackend>(&device);
        let out = model.encode_filtered(triplets_to_tensor(&rows(), &device), &[0, 1]);
        assert_eq!(out.energies.dims(), [4]);
        assert_eq!(out.lhs.dims(), [4, 8]);
        assert_eq!(out.rhs.dims(), [4, 8]);
        assert_eq!(model.num_filters(), 2);
        assert_eq!(model.embed_dim(), 8);
    }

    #[test]
    fn test_filter_gradients_only_when_selected() {
        let device = Default::default();
        let model = TransEncoderConfig::new(4, 4)
            .with_embed_dim(8)
            .with_num_filters(2)
            .init::<TestAutodiffBackend>(&device);

        let out = model.encode_filtered(triplets_to_tensor(&rows(), &device), &[1]);
        let grads = GradientsParams::from_grads(out.energies.sum().backward(), &model);

        assert!(grads
            .get::<NdArray<f32>, 2>(model.filters[1].linear1.weight.id)
            .is_some());
        assert!(grads
            .get::<NdArray<f32>, 2>(model.filters[0].linear1.weight.id)
            .is_none());
        assert!(grads
            .get::<NdArray<f32>, 2>(model.users.weight.id)
            .is_some());
    }
}
