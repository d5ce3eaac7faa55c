//! Centered output layer
//!
//! A hidden transform maps the input to an `n_features`-dimensional feature space
//! holding one fixed center per class. Class scores compare each sample's features
//! with every center, either as the negative squared distance (`rbf`) or as a dot
//! product (`logit`), and feed a softmax cross-entropy. Only the hidden transform
//! is trained; the centers stay where they were placed.

use crate::architecture::{CenterKind, CenteredOptions};
use crate::error::{NetError, Result};
use crate::layers::dense::{affine_backward, affine_forward};
use crate::layers::output::softmax_nll;
use crate::layers::{
    add_l2_grad, check_group, check_labels, check_row_len, l2_cost, Gradients, Layer, LayerShape,
    Mode, OutputLayer, WeightInit,
};
use crate::optimizers::Optimizer;
use crate::tensor::Tensor;
use crate::utils::{xavier_uniform, Activation};

/// Number of tensors in a centered-output weight group.
pub const CENTERED_GROUP_LEN: usize = 4;

/// # Weight group
///
/// * `[0]` hidden weights `[n_in, n_features]`
/// * `[1]` hidden biases `[n_features]`
/// * `[2]` squared norm of each center `[n_classes]`, always recomputed from `[3]`
/// * `[3]` class centers `[n_classes, n_features]`
#[derive(Debug, Clone)]
pub struct CenteredOutLayer {
    position: usize,
    mode: Mode,
    n_in: usize,
    n_features: usize,
    n_classes: usize,
    kind: CenterKind,
    actvn: Activation,
    l2_reg: f32,
}

impl CenteredOutLayer {
    /// Builds the layer; supplied groups must hold exactly four tensors.
    ///
    /// Fresh centers are drawn uniformly from `[-1, 1]`.
    pub fn new(
        position: usize,
        opts: &CenteredOptions,
        n_in: usize,
        init: WeightInit,
    ) -> Result<(Self, Vec<Tensor>)> {
        let layer = Self {
            position,
            mode: Mode::Train,
            n_in,
            n_features: opts.n_features,
            n_classes: opts.n_classes,
            kind: opts.kind,
            actvn: opts.actvn,
            l2_reg: opts.l2_reg,
        };

        let hidden_shapes = vec![vec![n_in, opts.n_features], vec![opts.n_features]];
        let center_shape = vec![opts.n_classes, opts.n_features];

        let (_, preset, rng) = init.into_parts();
        let (hidden, centers) = match (preset, rng) {
            (Some(mut group), _) => {
                if group.len() != CENTERED_GROUP_LEN {
                    return Err(NetError::MalformedWeights {
                        layer: position,
                        reason: format!(
                            "centered output needs {} tensors \
                             (weights, biases, norms, centers), got {}",
                            CENTERED_GROUP_LEN,
                            group.len()
                        ),
                    });
                }
                check_group(
                    position,
                    std::slice::from_ref(&group[2]),
                    &[vec![opts.n_classes]],
                )?;
                let centers = group.swap_remove(3);
                group.truncate(2);
                check_group(position, &group, &hidden_shapes)?;
                check_group(position, std::slice::from_ref(&centers), &[center_shape])?;
                (group, centers)
            }
            (None, Some(rng)) => {
                let hidden = vec![
                    xavier_uniform(hidden_shapes[0].clone(), n_in, opts.n_features, rng),
                    Tensor::zeros(hidden_shapes[1].clone()),
                ];
                let centers = Tensor::from_fn(center_shape, || rng.gen_range_f32(-1.0, 1.0));
                (hidden, centers)
            }
            (None, None) => {
                return Err(NetError::MalformedWeights {
                    layer: position,
                    reason: "no weights supplied and no generator to initialize them".to_string(),
                })
            }
        };

        let mut weights = hidden;
        weights.push(layer.center_norms(&centers));
        weights.push(centers);
        Ok((layer, weights))
    }

    fn center_norms(&self, centers: &Tensor) -> Tensor {
        let norms: Vec<f32> = (0..self.n_classes)
            .map(|k| centers.row(k).iter().map(|c| c * c).sum::<f32>())
            .collect();
        Tensor::new(vec![self.n_classes], norms)
            .unwrap_or_else(|_| Tensor::zeros(vec![self.n_classes]))
    }

    /// Hidden-transform features `actvn(x · W + b)`.
    fn hidden(&self, input: &Tensor, weights: &[Tensor]) -> Result<Tensor> {
        check_row_len(self.position, self.tag(), input, self.n_in)?;
        let mut f = affine_forward(input, &weights[0], &weights[1]);
        self.actvn.apply_inplace(f.data_mut());
        Ok(f)
    }
}

impl Layer for CenteredOutLayer {
    fn tag(&self) -> &'static str {
        "CenteredOutLayer"
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn shape(&self) -> LayerShape {
        LayerShape::Flat {
            n_out: self.n_classes,
        }
    }

    fn forward(&self, input: &Tensor, _aux: Option<&Tensor>, weights: &[Tensor]) -> Result<Tensor> {
        let f = self.hidden(input, weights)?;
        let (norms, centers) = (weights[2].data(), &weights[3]);
        let rows = f.rows();
        let mut scores = Tensor::zeros(vec![rows, self.n_classes]);

        for r in 0..rows {
            let fr = f.row(r);
            let f_sq: f32 = fr.iter().map(|v| v * v).sum();
            for k in 0..self.n_classes {
                let dot: f32 = fr.iter().zip(centers.row(k)).map(|(a, c)| a * c).sum();
                scores.data_mut()[r * self.n_classes + k] = match self.kind {
                    CenterKind::Rbf => -(f_sq - 2.0 * dot + norms[k]),
                    CenterKind::Logit => dot,
                };
            }
        }
        Ok(scores)
    }

    /// Gradients for the hidden transform; the norm and center entries are zero.
    fn backward(
        &self,
        input: &Tensor,
        _aux: Option<&Tensor>,
        _output: &Tensor,
        grad_output: &Tensor,
        weights: &[Tensor],
    ) -> Result<Gradients> {
        let f = self.hidden(input, weights)?;
        let centers = &weights[3];
        let nf = self.n_features;
        let g = grad_output.data();
        let mut g_f = vec![0.0f32; f.len()];

        for r in 0..f.rows() {
            let g_row = &g[r * self.n_classes..(r + 1) * self.n_classes];
            let gf_row = &mut g_f[r * nf..(r + 1) * nf];
            for (k, &gk) in g_row.iter().enumerate() {
                let ck = centers.row(k);
                match self.kind {
                    // d/df of -(|f|^2 - 2 f·c + |c|^2) = -2 (f - c)
                    CenterKind::Rbf => {
                        for ((gfi, &fi), &ci) in gf_row.iter_mut().zip(f.row(r)).zip(ck) {
                            *gfi += -2.0 * gk * (fi - ci);
                        }
                    }
                    CenterKind::Logit => {
                        for (gfi, &ci) in gf_row.iter_mut().zip(ck) {
                            *gfi += gk * ci;
                        }
                    }
                }
            }
        }

        self.actvn.backprop_inplace(f.data(), &mut g_f);
        let (gx, mut gw, gb) = affine_backward(input, &weights[0], &g_f);
        add_l2_grad(self.l2_reg, &weights[0], &mut gw);

        Ok(Gradients {
            input: gx,
            weights: vec![
                gw,
                gb,
                Tensor::zeros(weights[2].shape().to_vec()),
                Tensor::zeros(centers.shape().to_vec()),
            ],
        })
    }

    fn weight_cost(&self, weights: &[Tensor]) -> f32 {
        l2_cost(self.l2_reg, &weights[0])
    }

    /// Trains the hidden transform only.
    fn apply_updates(
        &self,
        weights: &mut [Tensor],
        grads: &[Tensor],
        optimizer: &mut dyn Optimizer,
    ) {
        for (w, g) in weights.iter_mut().zip(grads).take(2) {
            optimizer.update(w.data_mut(), g.data());
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
        format!(
            "CenteredOutLayer: {} -> {} features, {} centers ({:?}), {:?}, l2 {}",
            self.n_in, self.n_features, self.n_classes, self.kind, self.actvn, self.l2_reg
        )
    }
}

impl OutputLayer for CenteredOutLayer {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn cost(&self, output: &Tensor, labels: &[usize]) -> Result<(f32, Tensor)> {
        check_labels(self.n_classes, output, labels)?;
        Ok(softmax_nll(output, labels))
    }

    /// The hidden-transform features, the space the centers live in.
    fn features(
        &self,
        input: &Tensor,
        _aux: Option<&Tensor>,
        _output: &Tensor,
        weights: &[Tensor],
    ) -> Result<Tensor> {
        self.hidden(input, weights)
    }
}
