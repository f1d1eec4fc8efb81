pub mod causal_self_attention;
pub mod decoder;
pub mod generation;
pub mod inference;
pub mod mlp;
pub mod models;
pub mod placement;
pub mod sampling;
