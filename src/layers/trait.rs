//! Layer protocol
//!
//! Every layer variant implements [`Layer`]; the terminal classifier layers also
//! implement [`OutputLayer`]. Layers never own their weights: the network keeps one
//! weight group per layer position and passes it to every call, so the train and
//! test variants of a layer always read the same values.

use crate::error::Result;
use crate::optimizers::Optimizer;
use crate::tensor::Tensor;

/// Whether a layer instance belongs to the training or the evaluation chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Test,
}

/// Shape metadata a layer exposes to the layer after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerShape {
    /// `num_maps` square feature maps of side `out_sz`.
    Maps { num_maps: usize, out_sz: usize },
    /// A flat feature vector of width `n_out`.
    Flat { n_out: usize },
}

impl LayerShape {
    /// Flattened output width per sample.
    pub fn n_out(&self) -> usize {
        match *self {
            LayerShape::Maps { num_maps, out_sz } => num_maps * out_sz * out_sz,
            LayerShape::Flat { n_out } => n_out,
        }
    }

    /// `(num_maps, out_sz)` for map-shaped outputs.
    pub fn maps(&self) -> Option<(usize, usize)> {
        match *self {
            LayerShape::Maps { num_maps, out_sz } => Some((num_maps, out_sz)),
            LayerShape::Flat { .. } => None,
        }
    }
}

/// Result of a backward pass through one layer.
#[derive(Debug, Clone)]
pub struct Gradients {
    /// Gradient with respect to the layer input, shaped like the input.
    pub input: Tensor,
    /// One gradient per tensor of the layer's weight group (empty for parameter-free layers).
    pub weights: Vec<Tensor>,
}

/// Core trait for network layers.
///
/// Forward and backward passes receive the layer's weight group from the shared
/// store. `aux` is only ever `Some` for the one layer that declares an auxiliary
/// input.
pub trait Layer {
    /// Type-tag of the spec this layer was built from.
    fn tag(&self) -> &'static str;

    fn mode(&self) -> Mode;

    fn shape(&self) -> LayerShape;

    fn forward(&self, input: &Tensor, aux: Option<&Tensor>, weights: &[Tensor]) -> Result<Tensor>;

    /// Back-propagates `grad_output` (shaped like `output`).
    ///
    /// Weight gradients include the gradient of [`Layer::weight_cost`].
    fn backward(
        &self,
        input: &Tensor,
        aux: Option<&Tensor>,
        output: &Tensor,
        grad_output: &Tensor,
        weights: &[Tensor],
    ) -> Result<Gradients>;

    /// Regularization term this layer adds to the training cost.
    fn weight_cost(&self, _weights: &[Tensor]) -> f32 {
        0.0
    }

    /// Applies this layer's parameter updates in place.
    ///
    /// The default updates every tensor of the group; layers with fixed tensors
    /// override it.
    fn apply_updates(
        &self,
        weights: &mut [Tensor],
        grads: &[Tensor],
        optimizer: &mut dyn Optimizer,
    ) {
        for (w, g) in weights.iter_mut().zip(grads) {
            optimizer.update(w.data_mut(), g.data());
        }
    }

    /// Width of the auxiliary input this layer consumes, if any.
    fn aux_width(&self) -> Option<usize> {
        None
    }

    /// Evaluation-mode twin with the same architecture.
    fn test_version(&self) -> Box<dyn Layer>;

    /// The classifier interface, for layers that can end a network.
    fn as_output(&self) -> Option<&dyn OutputLayer> {
        None
    }

    /// One-line human-readable summary.
    fn describe(&self) -> String;
}

/// Primary and secondary error metrics of a test batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorRates {
    /// Fraction of samples whose predicted label is wrong.
    pub error_rate: f32,
    /// Mean negative log-probability of the true label.
    pub nll: f32,
}

/// Terminal layers that turn class scores into a loss, features and predictions.
///
/// `output` is always the tensor the layer's `forward` produced: one row of class
/// scores per sample.
pub trait OutputLayer {
    fn n_classes(&self) -> usize;

    /// Mean supervised loss over the batch and its gradient with respect to `output`.
    fn cost(&self, output: &Tensor, labels: &[usize]) -> Result<(f32, Tensor)>;

    /// Feature representation reported alongside predictions.
    fn features(
        &self,
        input: &Tensor,
        aux: Option<&Tensor>,
        output: &Tensor,
        weights: &[Tensor],
    ) -> Result<Tensor>;

    /// Row-wise log-probabilities of each class.
    fn logprob(&self, output: &Tensor) -> Tensor {
        let mut data = output.data().to_vec();
        crate::utils::activations::log_softmax_rows(&mut data, output.rows(), output.row_len());
        Tensor::new(output.shape().to_vec(), data).unwrap_or_else(|_| output.clone())
    }

    fn predictions(&self, output: &Tensor) -> Vec<usize> {
        crate::utils::activations::argmax_rows(output.data(), output.row_len())
    }

    fn error_rates(&self, output: &Tensor, labels: &[usize]) -> Result<ErrorRates> {
        super::check_labels(self.n_classes(), output, labels)?;
        let predictions = self.predictions(output);
        let wrong = predictions
            .iter()
            .zip(labels)
            .filter(|(p, y)| p != y)
            .count();
        let logprob = self.logprob(output);
        let nll = labels
            .iter()
            .enumerate()
            .map(|(i, &y)| -logprob.row(i)[y])
            .sum::<f32>();
        let n = labels.len().max(1) as f32;
        Ok(ErrorRates {
            error_rate: wrong as f32 / n,
            nll: nll / n,
        })
    }
}
