//! Learning rate scheduling
//!
//! This module defines the LRScheduler trait and the inverse-time decay used by
//! networks, plus the shared scalar through which the current rate reaches every
//! layer's update rule.

use std::cell::Cell;
use std::rc::Rc;

/// Core trait for learning rate schedulers.
///
/// A scheduler maps an epoch count to a learning rate. The epoch counter itself
/// lives with the caller (the network's training parameters), so schedulers are
/// stateless and `rate_at` is pure.
///
/// # Example
///
/// ```
/// use layernet::utils::lr_scheduler::{InverseTimeDecay, LRScheduler};
///
/// let schedule = InverseTimeDecay::new(0.1, 10.0);
/// assert_eq!(schedule.rate_at(0), 0.1);
/// assert_eq!(schedule.rate_at(10), 0.05);
/// ```
pub trait LRScheduler {
    /// Learning rate to use during `epoch` (0-indexed).
    fn rate_at(&self, epoch: usize) -> f32;
}

/// Inverse-time decay: `lr = initial_lr / (1 + epoch / epochs_to_half)`.
///
/// The rate halves after `epochs_to_half` epochs, drops to a third after twice that,
/// and so on. It never increases.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InverseTimeDecay {
    initial_lr: f32,
    epochs_to_half: f32,
}

impl InverseTimeDecay {
    /// Creates a new inverse-time decay schedule.
    ///
    /// # Arguments
    ///
    /// * `initial_lr` - Rate at epoch 0 (must be positive)
    /// * `epochs_to_half` - Epoch at which the rate reaches `initial_lr / 2` (must be positive)
    pub fn new(initial_lr: f32, epochs_to_half: f32) -> Self {
        Self {
            initial_lr,
            epochs_to_half,
        }
    }

    pub fn initial_lr(&self) -> f32 {
        self.initial_lr
    }
}

impl LRScheduler for InverseTimeDecay {
    fn rate_at(&self, epoch: usize) -> f32 {
        self.initial_lr / (1.0 + epoch as f32 / self.epochs_to_half)
    }
}

/// Learning-rate scalar shared between a network and its compiled train functions.
///
/// Clones point at the same cell, so a rate change after compilation is seen by every
/// train function on its next call.
#[derive(Debug, Clone, Default)]
pub struct SharedRate(Rc<Cell<f32>>);

impl SharedRate {
    pub fn new(rate: f32) -> Self {
        Self(Rc::new(Cell::new(rate)))
    }

    pub fn get(&self) -> f32 {
        self.0.get()
    }

    pub fn set(&self, rate: f32) {
        self.0.set(rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_at_zero_is_initial() {
        let schedule = InverseTimeDecay::new(0.03, 7.0);
        assert_eq!(schedule.rate_at(0), 0.03);
    }

    #[test]
    fn test_rate_halves() {
        let schedule = InverseTimeDecay::new(0.2, 4.0);
        assert_eq!(schedule.rate_at(4), 0.1);
    }

    #[test]
    fn test_shared_rate_clones_alias() {
        let rate = SharedRate::new(1.0);
        let alias = rate.clone();
        rate.set(0.25);
        assert_eq!(alias.get(), 0.25);
    }
}
