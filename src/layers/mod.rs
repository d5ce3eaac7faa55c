//! Layer abstractions for neural networks
//!
//! This module provides the [`Layer`] trait and one implementation per supported
//! layer type-tag. Layers are built by the network assembler from parsed
//! [`LayerKind`](crate::architecture::LayerKind)s; each constructor returns the layer
//! together with its weight group, either checked from a supplied set or freshly
//! initialized through [`WeightInit`].

mod r#trait;
pub mod centered;
pub mod conv2d;
pub mod dense;
pub mod dropout;
pub mod input;
pub mod output;
pub mod pool;

pub use centered::CenteredOutLayer;
pub use conv2d::ConvLayer;
pub use dense::{AuxConcatLayer, HiddenLayer};
pub use dropout::DropoutLayer;
pub use input::{ElasticLayer, InputLayer};
pub use output::{HeadKind, LinearOutputLayer};
pub use pool::{PoolLayer, PoolMode};
pub use r#trait::{ErrorRates, Gradients, Layer, LayerShape, Mode, OutputLayer};

use crate::error::{NetError, Result};
use crate::tensor::Tensor;
use crate::utils::SimpleRng;

/// Source of one layer's weight group during assembly.
///
/// Exactly one of the two sources is present: the supplied group when the network
/// is rebuilt from a weight set, or the shared initialization generator when it is
/// built fresh.
pub struct WeightInit<'a> {
    position: usize,
    preset: Option<Vec<Tensor>>,
    rng: Option<&'a mut SimpleRng>,
}

impl<'a> WeightInit<'a> {
    pub fn new(
        position: usize,
        preset: Option<Vec<Tensor>>,
        rng: Option<&'a mut SimpleRng>,
    ) -> Self {
        Self {
            position,
            preset,
            rng,
        }
    }

    /// Fresh-initialization source for a standalone layer.
    pub fn fresh(position: usize, rng: &'a mut SimpleRng) -> Self {
        Self::new(position, None, Some(rng))
    }

    /// Supplied-weights source for a standalone layer.
    pub fn preset(position: usize, group: Vec<Tensor>) -> Self {
        Self::new(position, Some(group), None)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns the supplied group after checking it against `shapes`, or draws a
    /// fresh group with `init`.
    pub fn resolve<F>(self, shapes: &[Vec<usize>], init: F) -> Result<Vec<Tensor>>
    where
        F: FnOnce(&mut SimpleRng) -> Vec<Tensor>,
    {
        match self.preset {
            Some(group) => {
                check_group(self.position, &group, shapes)?;
                Ok(group)
            }
            None if shapes.is_empty() => Ok(Vec::new()),
            None => match self.rng {
                Some(rng) => Ok(init(rng)),
                None => Err(NetError::MalformedWeights {
                    layer: self.position,
                    reason: "no weights supplied and no generator to initialize them".to_string(),
                }),
            },
        }
    }

    /// Empty group for parameter-free layers.
    pub fn none(self) -> Result<Vec<Tensor>> {
        self.resolve(&[], |_| Vec::new())
    }

    pub(crate) fn into_parts(self) -> (usize, Option<Vec<Tensor>>, Option<&'a mut SimpleRng>) {
        (self.position, self.preset, self.rng)
    }
}

/// Checks that `group` holds one tensor per entry of `shapes`, each with that shape.
pub(crate) fn check_group(layer: usize, group: &[Tensor], shapes: &[Vec<usize>]) -> Result<()> {
    if group.len() != shapes.len() {
        return Err(NetError::MalformedWeights {
            layer,
            reason: format!("expected {} tensors, got {}", shapes.len(), group.len()),
        });
    }
    for (i, (tensor, shape)) in group.iter().zip(shapes).enumerate() {
        if tensor.shape() != shape.as_slice() || tensor.len() != shape.iter().product::<usize>() {
            return Err(NetError::MalformedWeights {
                layer,
                reason: format!(
                    "tensor {} has shape {:?}, expected {:?}",
                    i,
                    tensor.shape(),
                    shape
                ),
            });
        }
    }
    Ok(())
}

/// Fails unless every sample of `input` holds `expected` values.
pub(crate) fn check_row_len(
    layer: usize,
    tag: &str,
    input: &Tensor,
    expected: usize,
) -> Result<()> {
    if input.ndim() < 2 || input.row_len() != expected {
        return Err(NetError::ShapeMismatch {
            layer,
            reason: format!(
                "{} expects {} values per sample, got input of shape {:?}",
                tag,
                expected,
                input.shape()
            ),
        });
    }
    Ok(())
}

pub(crate) fn check_labels(n_classes: usize, output: &Tensor, labels: &[usize]) -> Result<()> {
    if labels.len() != output.rows() {
        return Err(NetError::InvalidLabels(format!(
            "{} labels for a batch of {}",
            labels.len(),
            output.rows()
        )));
    }
    if let Some(&bad) = labels.iter().find(|&&y| y >= n_classes) {
        return Err(NetError::InvalidLabels(format!(
            "label {} out of range for {} classes",
            bad, n_classes
        )));
    }
    Ok(())
}

/// `l2 * sum(W^2)` over the weight matrix.
pub(crate) fn l2_cost(l2_reg: f32, w: &Tensor) -> f32 {
    if l2_reg == 0.0 {
        0.0
    } else {
        l2_reg * w.sum_squares()
    }
}

/// Adds the gradient of [`l2_cost`] to `grad`.
pub(crate) fn add_l2_grad(l2_reg: f32, w: &Tensor, grad: &mut Tensor) {
    if l2_reg == 0.0 {
        return;
    }
    for (g, &v) in grad.data_mut().iter_mut().zip(w.data()) {
        *g += 2.0 * l2_reg * v;
    }
}
