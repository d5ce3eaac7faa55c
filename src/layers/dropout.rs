//! Dropout layer implementation for regularization
//!
//! This module provides a DropoutLayer that randomly drops (sets to zero) a fraction
//! of input units during training to prevent overfitting. The evaluation variant
//! passes inputs through unchanged.

use crate::architecture::DropoutOptions;
use crate::error::{NetError, Result};
use crate::layers::{Gradients, Layer, LayerShape, Mode};
use crate::tensor::Tensor;
use crate::utils::rng::SimpleRng;
use std::cell::RefCell;

/// Dropout layer for regularization.
///
/// During training, sets each unit to zero with probability `pdrop` and scales the
/// survivors by `1 / (1 - pdrop)` (inverted dropout), so the evaluation variant
/// needs no rescaling. The output keeps the input's shape.
///
/// # Fields
///
/// * `shape` - Shape metadata of the layer feeding this one, passed through unchanged
/// * `pdrop` - Probability of dropping each unit, in `[0.0, 1.0)`
/// * `mask` - Scaled keep-mask of the last training forward pass
/// * `rng` - Stream owned by this layer position, derived from `SEED`
///
/// # Example
///
/// ```
/// use layernet::architecture::DropoutOptions;
/// use layernet::layers::{DropoutLayer, Layer, LayerShape, Mode};
/// use layernet::utils::SimpleRng;
///
/// let shape = LayerShape::Flat { n_out: 512 };
/// let opts = DropoutOptions { pdrop: 0.5 };
/// let layer = DropoutLayer::new(2, &opts, shape, SimpleRng::for_layer(42, 2));
/// assert_eq!(layer.mode(), Mode::Train);
/// assert_eq!(layer.shape().n_out(), 512);
/// assert_eq!(layer.test_version().mode(), Mode::Test);
/// ```
#[derive(Debug)]
pub struct DropoutLayer {
    position: usize,
    mode: Mode,
    shape: LayerShape,
    pdrop: f32,
    mask: RefCell<Vec<f32>>,
    rng: RefCell<SimpleRng>,
}

impl DropoutLayer {
    /// Creates a training-mode dropout layer.
    ///
    /// # Arguments
    ///
    /// * `position` - Index of the layer in the network
    /// * `opts` - Drop probability
    /// * `shape` - Shape of the previous layer's output
    /// * `rng` - Random stream for mask generation
    pub fn new(position: usize, opts: &DropoutOptions, shape: LayerShape, rng: SimpleRng) -> Self {
        Self {
            position,
            mode: Mode::Train,
            shape,
            pdrop: opts.pdrop,
            mask: RefCell::new(Vec::new()),
            rng: RefCell::new(rng),
        }
    }

    pub fn pdrop(&self) -> f32 {
        self.pdrop
    }

    fn active(&self) -> bool {
        self.mode == Mode::Train && self.pdrop > 0.0
    }
}

impl Layer for DropoutLayer {
    fn tag(&self) -> &'static str {
        "DropOutLayer"
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn shape(&self) -> LayerShape {
        self.shape
    }

    /// Applies dropout in training mode; identity otherwise.
    fn forward(
        &self,
        input: &Tensor,
        _aux: Option<&Tensor>,
        _weights: &[Tensor],
    ) -> Result<Tensor> {
        if !self.active() {
            return Ok(input.clone());
        }

        let keep_scale = 1.0 / (1.0 - self.pdrop);
        let mut rng = self.rng.borrow_mut();
        let mut mask = self.mask.borrow_mut();
        mask.clear();
        mask.extend((0..input.len()).map(|_| {
            if rng.next_f32() < self.pdrop {
                0.0
            } else {
                keep_scale
            }
        }));

        let mut out = input.clone();
        for (v, &m) in out.data_mut().iter_mut().zip(mask.iter()) {
            *v *= m;
        }
        Ok(out)
    }

    /// Multiplies the gradient by the mask of the last forward pass.
    fn backward(
        &self,
        _input: &Tensor,
        _aux: Option<&Tensor>,
        _output: &Tensor,
        grad_output: &Tensor,
        _weights: &[Tensor],
    ) -> Result<Gradients> {
        let mut grad = grad_output.clone();
        if self.active() {
            let mask = self.mask.borrow();
            if mask.len() != grad.len() {
                return Err(NetError::ShapeMismatch {
                    layer: self.position,
                    reason: format!(
                        "gradient has {} values but the last mask covers {}",
                        grad.len(),
                        mask.len()
                    ),
                });
            }
            for (g, &m) in grad.data_mut().iter_mut().zip(mask.iter()) {
                *g *= m;
            }
        }
        Ok(Gradients {
            input: grad,
            weights: Vec::new(),
        })
    }

    fn test_version(&self) -> Box<dyn Layer> {
        Box::new(Self {
            position: self.position,
            mode: Mode::Test,
            shape: self.shape,
            pdrop: self.pdrop,
            mask: RefCell::new(Vec::new()),
            rng: RefCell::new(self.rng.borrow().clone()),
        })
    }

    fn describe(&self) -> String {
        format!("DropOutLayer: p = {}, {} units", self.pdrop, self.shape.n_out())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn layer(pdrop: f32) -> DropoutLayer {
        DropoutLayer::new(
            1,
            &DropoutOptions { pdrop },
            LayerShape::Flat { n_out: 1000 },
            SimpleRng::new(42),
        )
    }

    #[test]
    fn test_dropout_drops_about_pdrop() {
        let dropout = layer(0.3);
        let input = Tensor::new(vec![1, 1000], vec![1.0; 1000]).unwrap();
        let out = dropout.forward(&input, None, &[]).unwrap();

        let dropped = out.data().iter().filter(|&&v| v == 0.0).count();
        let ratio = dropped as f32 / 1000.0;
        assert!((ratio - 0.3).abs() < 0.06, "drop ratio {}", ratio);

        for &v in out.data().iter().filter(|&&v| v != 0.0) {
            assert_relative_eq!(v, 1.0 / 0.7, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_dropout_backward_uses_forward_mask() {
        let dropout = layer(0.5);
        let input = Tensor::new(vec![2, 500], vec![1.0; 1000]).unwrap();
        let out = dropout.forward(&input, None, &[]).unwrap();
        let ones = Tensor::new(vec![2, 500], vec![1.0; 1000]).unwrap();
        let g = dropout.backward(&input, None, &out, &ones, &[]).unwrap();
        assert_eq!(g.input.data(), out.data());
    }

    #[test]
    fn test_dropout_test_variant_is_identity() {
        let test_layer = layer(0.5).test_version();
        let input = Tensor::new(vec![1, 4], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(test_layer.forward(&input, None, &[]).unwrap(), input);
    }

    #[test]
    fn test_dropout_masks_differ_between_calls() {
        let dropout = layer(0.5);
        let input = Tensor::new(vec![1, 1000], vec![1.0; 1000]).unwrap();
        let first = dropout.forward(&input, None, &[]).unwrap();
        let second = dropout.forward(&input, None, &[]).unwrap();
        assert_ne!(first, second);
    }
}
