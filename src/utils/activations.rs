//! Activation functions for neural networks
//!
//! This module provides the element-wise activations selectable per layer and the
//! row-wise softmax used by the output layers.

use serde::{Deserialize, Serialize};

/// Element-wise nonlinearity applied after an affine or convolution transform.
///
/// Derivatives are expressed in terms of the activation *output*, so backward passes
/// only need the forward result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Relu,
    Tanh,
    Sigmoid,
    Linear,
}

impl Activation {
    pub fn apply_inplace(self, data: &mut [f32]) {
        match self {
            Activation::Relu => relu_inplace(data),
            Activation::Tanh => data.iter_mut().for_each(|v| *v = v.tanh()),
            Activation::Sigmoid => data.iter_mut().for_each(|v| *v = sigmoid(*v)),
            Activation::Linear => {}
        }
    }

    /// Derivative of the activation given its output `y`.
    pub fn derivative_from_output(self, y: f32) -> f32 {
        match self {
            Activation::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Tanh => 1.0 - y * y,
            Activation::Sigmoid => y * (1.0 - y),
            Activation::Linear => 1.0,
        }
    }

    /// Multiplies `grad` in place by the activation derivative at `output`.
    pub fn backprop_inplace(self, output: &[f32], grad: &mut [f32]) {
        if self == Activation::Linear {
            return;
        }
        for (g, &y) in grad.iter_mut().zip(output) {
            *g *= self.derivative_from_output(y);
        }
    }
}

/// Sigmoid activation function: 1 / (1 + exp(-x)).
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// ReLU activation function applied in-place.
///
/// Sets all negative values to 0.0, keeps positive values unchanged.
pub fn relu_inplace(data: &mut [f32]) {
    for value in data.iter_mut() {
        if *value < 0.0 {
            *value = 0.0;
        }
    }
}

/// Softmax activation function applied row-wise.
///
/// Converts logits to probabilities for each row. Uses the max-subtraction
/// trick for numerical stability to avoid overflow with large values.
///
/// # Arguments
/// * `outputs` - Flat array containing row-major matrix data
/// * `rows` - Number of rows in the matrix
/// * `cols` - Number of columns in the matrix
pub fn softmax_rows(outputs: &mut [f32], rows: usize, cols: usize) {
    if cols == 0 {
        return;
    }
    assert_eq!(outputs.len(), rows * cols, "outputs length mismatch in softmax_rows");

    for row in outputs.chunks_exact_mut(cols).take(rows) {
        let max_value = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        let mut sum = 0.0f32;
        for value in row.iter_mut() {
            *value = (*value - max_value).exp();
            sum += *value;
        }

        let inv_sum = 1.0f32 / sum;
        for value in row.iter_mut() {
            *value *= inv_sum;
        }
    }
}

/// Row-wise log-softmax: `x - max - ln(sum(exp(x - max)))`.
pub fn log_softmax_rows(outputs: &mut [f32], rows: usize, cols: usize) {
    if cols == 0 {
        return;
    }
    assert_eq!(outputs.len(), rows * cols, "outputs length mismatch in log_softmax_rows");

    for row in outputs.chunks_exact_mut(cols).take(rows) {
        let max_value = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let log_sum = row
            .iter()
            .map(|v| (v - max_value).exp())
            .sum::<f32>()
            .ln();
        for value in row.iter_mut() {
            *value = *value - max_value - log_sum;
        }
    }
}

/// Index of the largest entry of each row.
pub fn argmax_rows(values: &[f32], cols: usize) -> Vec<usize> {
    values
        .chunks_exact(cols)
        .map(|row| {
            let mut best = 0;
            for (j, &v) in row.iter().enumerate() {
                if v > row[best] {
                    best = j;
                }
            }
            best
        })
        .collect()
}
