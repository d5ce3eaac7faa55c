//! Shared utilities for neural network implementations
//!
//! This module provides common utilities like random number generation,
//! activation functions, learning-rate scheduling and weight initialization.

pub mod activations;
pub mod lr_scheduler;
pub mod rng;

pub use activations::{softmax_rows, Activation};
pub use rng::SimpleRng;

use crate::tensor::Tensor;

/// Xavier/Glorot uniform initialization.
///
/// Samples every element from `[-limit, limit]` where
/// `limit = sqrt(6 / (fan_in + fan_out))`.
pub fn xavier_uniform(
    shape: Vec<usize>,
    fan_in: usize,
    fan_out: usize,
    rng: &mut SimpleRng,
) -> Tensor {
    let limit = (6.0f32 / (fan_in + fan_out) as f32).sqrt();
    Tensor::from_fn(shape, || rng.gen_range_f32(-limit, limit))
}
