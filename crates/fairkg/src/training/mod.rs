//! Training pipeline: triplet data, negative sampling, the margin loss,
//! discriminator masking, metrics and the adversarial loop.

pub mod data;
pub mod loss;
pub mod mask;
pub mod metrics;
pub mod sampler;
pub mod trainer;
