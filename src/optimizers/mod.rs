//! Optimizer abstractions for neural network parameter updates
//!
//! Each layer's update contribution is expressed through the [`Optimizer`] trait:
//! the layer decides *which* of its tensors are trainable and hands them, together
//! with their gradients, to the optimizer the train step built from the current
//! learning rate.

pub mod sgd;

pub use sgd::SGD;

/// Core trait for neural network optimizers.
pub trait Optimizer {
    /// Update parameters in place using gradients of the same length.
    fn update(&mut self, parameters: &mut [f32], gradients: &[f32]);

    /// Step size this optimizer applies.
    fn learning_rate(&self) -> f32;
}
