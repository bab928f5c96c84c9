//! Tensor bridge: utilities to move host-side triplets and labels onto a burn
//! device, and to pull scalar results back off it.
//!
//! Sampling, masking and label lookup all happen on the host with plain
//! `Vec`s. This module is the only place where those rows become tensors.

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::training::data::Triplet;

/// Number of integer columns in a triplet tensor: user, subreddit, relation.
pub const TRIPLET_WIDTH: usize = 3;

/// Convert a batch of triplets to an integer tensor of shape `(batch, 3)`.
///
/// # Panics
/// Panics if `triplets` is empty.
pub fn triplets_to_tensor<B: Backend>(triplets: &[Triplet], device: &B::Device) -> Tensor<B, 2, Int> {
    assert!(!triplets.is_empty(), "triplets must not be empty");
    let flat: Vec<i64> = triplets
        .iter()
        .flat_map(|t| [t.user, t.subreddit, t.relation])
        .collect();
    Tensor::from_data(
        TensorData::new(flat, [triplets.len(), TRIPLET_WIDTH]),
        device,
    )
}

/// Convert class labels to an integer tensor of shape `(batch,)`.
pub fn labels_to_tensor<B: Backend>(labels: &[i64], device: &B::Device) -> Tensor<B, 1, Int> {
    Tensor::from_data(TensorData::new(labels.to_vec(), [labels.len()]), device)
}

/// Extract a single f64 scalar from a burn 1D tensor.
///
/// # Panics
/// Panics if the tensor does not contain exactly one element.
pub fn tensor_to_f64<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    let val: f32 = tensor.into_scalar().elem();
    val as f64
}

/// Count positions where two integer tensors agree.
pub fn count_equal<B: Backend>(a: Tensor<B, 1, Int>, b: Tensor<B, 1, Int>) -> usize {
    let n: i64 = a.equal(b).int().sum().into_scalar().elem();
    n.max(0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_triplets_tensor_layout() {
        let device = Default::default();
        let rows = vec![Triplet::new(1, 2, 0), Triplet::new(3, 4, 5)];

        let tensor = triplets_to_tensor::<TestBackend>(&rows, &device);
        assert_eq!(tensor.dims(), [2, 3]);

        let values: Vec<i64> = tensor
            .into_data()
            .convert::<i64>()
            .to_vec()
            .unwrap();
        assert_eq!(values, vec![1, 2, 0, 3, 4, 5]);
    }

    #[test]
    fn test_labels_tensor() {
        let device = Default::default();
        let tensor = labels_to_tensor::<TestBackend>(&[0, 1, 1], &device);
        assert_eq!(tensor.dims(), [3]);
    }

    #[test]
    fn test_count_equal() {
        let device = Default::default();
        let a = labels_to_tensor::<TestBackend>(&[0, 1, 2, 1], &device);
        let b = labels_to_tensor::<TestBackend>(&[0, 0, 2, 1], &device);
        assert_eq!(count_equal(a, b), 3);
    }
}
