//! Model components: the knowledge-graph encoder, attribute discriminators
//! and the host/tensor bridge.

pub mod bridge;
pub mod discriminator;
pub mod encoder;
