//! Fairness discriminators: classifiers that try to recover a sensitive
//! attribute from encoder embeddings.
//!
//! Discriminators are stateless with respect to training progress. Their
//! correct-prediction counts live in the trainer's
//! [`AccuracyTally`](crate::training::metrics::AccuracyTally).

use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::*;

use crate::model::bridge::count_equal;

/// Result of [`Discriminator::predict`].
#[derive(Debug, Clone)]
pub struct Prediction<B: Backend> {
    /// Class probabilities, shape `(n, classes)`.
    pub probs: Tensor<B, 2>,
    /// Ground-truth labels, shape `(n,)`.
    pub labels: Tensor<B, 1, Int>,
    /// Argmax predictions, shape `(n,)`.
    pub predicted: Tensor<B, 1, Int>,
}

impl<B: Backend> Prediction<B> {
    pub fn num_correct(&self) -> usize {
        count_equal(self.predicted.clone(), self.labels.clone())
    }
}

/// Discriminator contract consumed by the adversarial trainer.
pub trait Discriminator<B: Backend>: Module<B> {
    /// Prediction loss on `(n, d)` embeddings against `(n,)` labels.
    ///
    /// Returns a scalar of shape `(1,)`. Lower means the attribute is easier
    /// to recover.
    fn score(&self, embedding: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> Tensor<B, 1>;

    /// Predicted classes for `(n, d)` embeddings.
    fn predict(&self, embedding: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> Prediction<B>;
}

/// Configuration for [`AttributeDiscriminator`].
///
/// ```text
/// (n, embed_dim)
///   → Linear(embed_dim→hidden) → LeakyReLU → Dropout
///   → Linear(hidden→hidden) → LeakyReLU → Dropout
///   → Linear(hidden→num_classes)
///   → logits: (n, num_classes)
/// ```
#[derive(Config, Debug)]
pub struct AttributeDiscriminatorConfig {
    /// Width of the embeddings being classified.
    pub embed_dim: usize,
    /// Number of attribute classes.
    pub num_classes: usize,
    #[config(default = 64)]
    pub hidden_dim: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
    #[config(default = 0.2)]
    pub negative_slope: f64,
}

/// MLP classifier over embeddings.
#[derive(Module, Debug)]
pub struct AttributeDiscriminator<B: Backend> {
    linear1: Linear<B>,
    linear2: Linear<B>,
    output: Linear<B>,
    dropout: Dropout,
    negative_slope: f64,
}

impl AttributeDiscriminatorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> AttributeDiscriminator<B> {
        AttributeDiscriminator {
            linear1: LinearConfig::new(self.embed_dim, self.hidden_dim).init(device),
            linear2: LinearConfig::new(self.hidden_dim, self.hidden_dim).init(device),
            output: LinearConfig::new(self.hidden_dim, self.num_classes).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            negative_slope: self.negative_slope,
        }
    }
}

impl<B: Backend> AttributeDiscriminator<B> {
    /// Class logits, shape `(n, num_classes)`.
    pub fn forward(&self, embedding: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear1.forward(embedding);
        let x = burn::tensor::activation::leaky_relu(x, self.negative_slope);
        let x = self.dropout.forward(x);

        let x = self.linear2.forward(x);
        let x = burn::tensor::activation::leaky_relu(x, self.negative_slope);
        let x = self.dropout.forward(x);

        self.output.forward(x)
    }
}

impl<B: Backend> Discriminator<B> for AttributeDiscriminator<B> {
    fn score(&self, embedding: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        let device = embedding.device();
        let logits = self.forward(embedding);
        CrossEntropyLossConfig::new()
            .init(&device)
            .forward(logits, labels)
    }

    fn predict(&self, embedding: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> Prediction<B> {
        let logits = self.forward(embedding);
        let probs = burn::tensor::activation::softmax(logits, 1);
        let predicted = probs.clone().argmax(1).squeeze::<1>(1);
        Prediction {
            probs,
            labels,
            predicted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::bridge::labels_to_tensor;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;
    use burn::optim::{AdamConfig, GradientsParams, Optimizer};
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn test_predict_shapes() {
        let device = Default::default();
        let disc = AttributeDiscriminatorConfig::new(8, 3)
            .with_hidden_dim(16)
            .init::<TestBackend>(&device);
        let emb = Tensor::<TestBackend, 2>::random([5, 8], Distribution::Normal(0.0, 1.0), &device);
        let labels = labels_to_tensor::<TestBackend>(&[0, 1, 2, 0, 1], &device);

        let pred = disc.predict(emb, labels);
        assert_eq!(pred.probs.dims(), [5, 3]);
        assert_eq!(pred.predicted.dims(), [5]);
        assert!(pred.num_correct() <= 5);

        let row_sums: Vec<f32> = pred.probs.sum_dim(1).reshape([5]).into_data().to_vec().unwrap();
        for s in row_sums {
            assert!((s - 1.0).abs() < 1e-5, "probabilities should sum to 1, got {s}");
        }
    }

    #[test]
    fn test_score_is_scalar_and_positive() {
        let device = Default::default();
        let disc = AttributeDiscriminatorConfig::new(8, 2).init::<TestBackend>(&device);
        let emb = Tensor::<TestBackend, 2>::random([4, 8], Distribution::Normal(0.0, 1.0), &device);
        let labels = labels_to_tensor::<TestBackend>(&[0, 1, 0, 1], &device);

        let score = disc.score(emb, labels);
        assert_eq!(score.dims(), [1]);
        let v: f32 = score.into_scalar().elem();
        assert!(v > 0.0);
    }

    #[test]
    fn test_learns_separable_attribute() {
        let device = Default::default();
        let mut disc = AttributeDiscriminatorConfig::new(4, 2)
            .with_hidden_dim(16)
            .with_dropout(0.0)
            .init::<TestAutodiffBackend>(&device);
        let mut optim = AdamConfig::new().init();

        // Class encoded in the sign of the first coordinate
        let emb = Tensor::<TestAutodiffBackend, 2>::from_data(
            TensorData::from([
                [2.0_f32, 0.1, 0.0, 0.3],
                [-2.0, 0.2, 0.1, 0.0],
                [1.5, -0.3, 0.2, 0.1],
                [-1.5, 0.0, -0.2, 0.2],
            ]),
            &device,
        );
        let labels = labels_to_tensor::<TestAutodiffBackend>(&[1, 0, 1, 0], &device);

        let initial: f32 = disc
            .score(emb.clone(), labels.clone())
            .into_scalar()
            .elem();
        for _ in 0..100 {
            let loss = disc.score(emb.clone(), labels.clone());
            let grads = GradientsParams::from_grads(loss.backward(), &disc);
            disc = optim.step(1e-2, disc, grads);
        }
        let trained: f32 = disc.score(emb.clone(), labels.clone()).into_scalar().elem();
        assert!(trained < initial, "loss should drop: {initial} -> {trained}");

        let pred = disc.predict(emb, labels);
        assert_eq!(pred.num_correct(), 4);
    }
}
