//! Linear classifier heads
//!
//! One affine map from flat features to class scores, with three loss flavours:
//! softmax cross-entropy, the same with the auxiliary input appended to the
//! features, and a one-vs-rest squared-hinge SVM.

use crate::architecture::{OutputOptions, SoftAuxOptions};
use crate::error::Result;
use crate::layers::dense::{affine_backward, affine_forward, concat_rows, require_aux};
use crate::layers::{
    add_l2_grad, check_labels, check_row_len, l2_cost, Gradients, Layer, LayerShape, Mode,
    OutputLayer, WeightInit,
};
use crate::tensor::Tensor;
use crate::utils::activations::log_softmax_rows;
use crate::utils::{softmax_rows, xavier_uniform};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadKind {
    Softmax,
    SoftAux { n_aux: usize },
    Svm,
}

/// Affine classifier head.
///
/// # Weight group
///
/// * `[0]` weights, shape `[n_in + n_aux, n_classes]` (`n_aux` is 0 except for
///   `SoftAux`, whose auxiliary rows come last)
/// * `[1]` biases, shape `[n_classes]`
#[derive(Debug, Clone)]
pub struct LinearOutputLayer {
    position: usize,
    mode: Mode,
    kind: HeadKind,
    n_in: usize,
    n_classes: usize,
    l2_reg: f32,
}

impl LinearOutputLayer {
    pub fn softmax(
        position: usize,
        opts: &OutputOptions,
        n_in: usize,
        init: WeightInit,
    ) -> Result<(Self, Vec<Tensor>)> {
        Self::build(position, HeadKind::Softmax, opts.n_out, opts.l2_reg, n_in, init)
    }

    pub fn soft_aux(
        position: usize,
        opts: &SoftAuxOptions,
        n_in: usize,
        init: WeightInit,
    ) -> Result<(Self, Vec<Tensor>)> {
        Self::build(
            position,
            HeadKind::SoftAux { n_aux: opts.n_aux },
            opts.n_out,
            opts.l2_reg,
            n_in,
            init,
        )
    }

    pub fn svm(
        position: usize,
        opts: &OutputOptions,
        n_in: usize,
        init: WeightInit,
    ) -> Result<(Self, Vec<Tensor>)> {
        Self::build(position, HeadKind::Svm, opts.n_out, opts.l2_reg, n_in, init)
    }

    fn build(
        position: usize,
        kind: HeadKind,
        n_classes: usize,
        l2_reg: f32,
        n_in: usize,
        init: WeightInit,
    ) -> Result<(Self, Vec<Tensor>)> {
        let layer = Self {
            position,
            mode: Mode::Train,
            kind,
            n_in,
            n_classes,
            l2_reg,
        };
        let fan_in = n_in + layer.n_aux();
        let shapes = vec![vec![fan_in, n_classes], vec![n_classes]];
        let weights = init.resolve(&shapes, |rng| {
            vec![
                xavier_uniform(shapes[0].clone(), fan_in, n_classes, rng),
                Tensor::zeros(shapes[1].clone()),
            ]
        })?;
        Ok((layer, weights))
    }

    pub fn kind(&self) -> HeadKind {
        self.kind
    }

    fn n_aux(&self) -> usize {
        match self.kind {
            HeadKind::SoftAux { n_aux } => n_aux,
            _ => 0,
        }
    }

    /// Features the affine map reads: the input, with the auxiliary columns for `SoftAux`.
    fn joined_input(&self, input: &Tensor, aux: Option<&Tensor>) -> Result<Tensor> {
        check_row_len(self.position, self.tag(), input, self.n_in)?;
        match self.kind {
            HeadKind::SoftAux { n_aux } => {
                let aux = require_aux(self.position, input, aux, n_aux)?;
                Ok(concat_rows(input, aux))
            }
            _ => Ok(input.clone()),
        }
    }
}

impl Layer for LinearOutputLayer {
    fn tag(&self) -> &'static str {
        match self.kind {
            HeadKind::Softmax => "SoftmaxLayer",
            HeadKind::SoftAux { .. } => "SoftAuxLayer",
            HeadKind::Svm => "SVMLayer",
        }
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn shape(&self) -> LayerShape {
        LayerShape::Flat {
            n_out: self.n_classes,
        }
    }

    /// Raw class scores (logits for the softmax heads, margins for the SVM).
    fn forward(&self, input: &Tensor, aux: Option<&Tensor>, weights: &[Tensor]) -> Result<Tensor> {
        let z = self.joined_input(input, aux)?;
        Ok(affine_forward(&z, &weights[0], &weights[1]))
    }

    fn backward(
        &self,
        input: &Tensor,
        aux: Option<&Tensor>,
        _output: &Tensor,
        grad_output: &Tensor,
        weights: &[Tensor],
    ) -> Result<Gradients> {
        let z = self.joined_input(input, aux)?;
        let (gz, mut gw, gb) = affine_backward(&z, &weights[0], grad_output.data());
        add_l2_grad(self.l2_reg, &weights[0], &mut gw);

        let gx = if self.n_aux() == 0 {
            gz
        } else {
            let width = z.row_len();
            let mut data = Vec::with_capacity(input.rows() * self.n_in);
            for r in 0..input.rows() {
                data.extend_from_slice(&gz.data()[r * width..r * width + self.n_in]);
            }
            Tensor::new(vec![input.rows(), self.n_in], data)?
        };

        Ok(Gradients {
            input: gx,
            weights: vec![gw, gb],
        })
    }

    fn weight_cost(&self, weights: &[Tensor]) -> f32 {
        l2_cost(self.l2_reg, &weights[0])
    }

    fn aux_width(&self) -> Option<usize> {
        match self.kind {
            HeadKind::SoftAux { n_aux } => Some(n_aux),
            _ => None,
        }
    }

    fn test_version(&self) -> Box<dyn Layer> {
        Box::new(Self {
            mode: Mode::Test,
            ..self.clone()
        })
    }

    fn as_output(&self) -> Option<&dyn OutputLayer> {
        Some(self)
    }

    fn describe(&self) -> String {
        match self.kind {
            HeadKind::SoftAux { n_aux } => format!(
                "SoftAuxLayer: {} + {} aux -> {} classes, l2 {}",
                self.n_in, n_aux, self.n_classes, self.l2_reg
            ),
            _ => format!(
                "{}: {} -> {} classes, l2 {}",
                self.tag(),
                self.n_in,
                self.n_classes,
                self.l2_reg
            ),
        }
    }
}

impl OutputLayer for LinearOutputLayer {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn cost(&self, output: &Tensor, labels: &[usize]) -> Result<(f32, Tensor)> {
        check_labels(self.n_classes, output, labels)?;
        match self.kind {
            HeadKind::Svm => Ok(squared_hinge(output, labels)),
            _ => Ok(softmax_nll(output, labels)),
        }
    }

    /// Class probabilities for the softmax heads, raw margins for the SVM.
    fn features(
        &self,
        _input: &Tensor,
        _aux: Option<&Tensor>,
        output: &Tensor,
        _weights: &[Tensor],
    ) -> Result<Tensor> {
        let mut features = output.clone();
        if self.kind != HeadKind::Svm {
            softmax_rows(features.data_mut(), output.rows(), self.n_classes);
        }
        Ok(features)
    }
}

/// Mean negative log-likelihood of softmax(`logits`) and its gradient:
/// `(softmax - onehot) / batch`.
pub(crate) fn softmax_nll(logits: &Tensor, labels: &[usize]) -> (f32, Tensor) {
    let rows = logits.rows();
    let cols = logits.row_len();
    let scale = 1.0 / rows.max(1) as f32;

    let mut logp = logits.data().to_vec();
    log_softmax_rows(&mut logp, rows, cols);

    let mut grad = logits.clone();
    let mut loss = 0.0f32;
    for (r, &y) in labels.iter().enumerate() {
        loss -= logp[r * cols + y];
        let g = &mut grad.data_mut()[r * cols..(r + 1) * cols];
        for (j, gj) in g.iter_mut().enumerate() {
            let p = logp[r * cols + j].exp();
            *gj = (p - if j == y { 1.0 } else { 0.0 }) * scale;
        }
    }
    (loss * scale, grad)
}

/// One-vs-rest squared hinge: `mean_i sum_j max(0, 1 - t_ij s_ij)^2` with
/// `t_ij = +1` for the true class and `-1` otherwise.
fn squared_hinge(scores: &Tensor, labels: &[usize]) -> (f32, Tensor) {
    let rows = scores.rows();
    let cols = scores.row_len();
    let scale = 1.0 / rows.max(1) as f32;
    let mut grad = Tensor::zeros(scores.shape().to_vec());
    let mut loss = 0.0f32;

    for (r, &y) in labels.iter().enumerate() {
        for j in 0..cols {
            let t = if j == y { 1.0 } else { -1.0 };
            let margin = (1.0 - t * scores.data()[r * cols + j]).max(0.0);
            loss += margin * margin;
            grad.data_mut()[r * cols + j] = -2.0 * t * margin * scale;
        }
    }
    (loss * scale, grad)
}
