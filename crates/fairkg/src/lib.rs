//! Adversarial fairness training for knowledge-graph embeddings.
//!
//! A link-prediction encoder over `(user, subreddit, relation)` triplets is
//! trained with a margin ranking loss against corrupted negatives while a set
//! of per-attribute discriminators try to recover sensitive user attributes
//! from its embeddings. The encoder is penalized whenever a discriminator
//! succeeds; the discriminators are trained to succeed.

pub mod error;
pub mod model;
pub mod training;

pub use error::TrainError;
pub use model::discriminator::{AttributeDiscriminator, AttributeDiscriminatorConfig, Discriminator};
pub use model::encoder::{KgEncoder, TransEncoder, TransEncoderConfig};
pub use training::data::{SensitiveAttribute, Triplet, TripletDataset, TripletLoader};
pub use training::trainer::{AdversarialTrainer, FairSlot, FairTrainingConfig};
