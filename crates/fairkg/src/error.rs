/// Errors raised by the adversarial training core.
///
/// None of these are recovered inside the training loop: a step that fails
/// aborts the epoch and the error is returned to the caller.
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    /// The midpoint corruption split needs an even number of rows.
    #[error("batch size must be even for the user/subreddit corruption split, got {0}")]
    OddBatch(usize),

    /// A step was asked to train on zero rows.
    #[error("batch is empty")]
    EmptyBatch,

    /// Positive and negative tensors do not line up.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A mask vector does not have one entry per fairness slot.
    #[error("mask has {got} entries, expected {expected}")]
    MaskLength { expected: usize, got: usize },

    /// Masking was enabled without any mask vectors to choose from.
    #[error("mask sampling enabled but the mask set is empty")]
    EmptyMaskSet,

    /// A user id has no sensitive-attribute label.
    #[error("user {user} has no label for attribute '{attribute}' ({num_users} users labelled)")]
    UnknownUser {
        attribute: String,
        user: i64,
        num_users: usize,
    },

    /// An entity id falls outside the embedding tables.
    #[error("{kind} id {id} out of range (table size {size})")]
    EntityOutOfRange {
        kind: &'static str,
        id: i64,
        size: usize,
    },
}
