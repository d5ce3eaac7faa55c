//! Fully connected layers
//!
//! [`HiddenLayer`] is the affine transform plus activation. [`AuxConcatLayer`]
//! appends the network's auxiliary input to its flat input. The affine helpers are
//! shared with the output layers.

use crate::architecture::{AuxConcatOptions, HiddenOptions};
use crate::error::{NetError, Result};
use crate::layers::{
    add_l2_grad, check_row_len, l2_cost, Gradients, Layer, LayerShape, Mode, WeightInit,
};
use crate::tensor::Tensor;
use crate::utils::{xavier_uniform, Activation};

/// `x · W + b` for a row-major `[rows, n_in]` input and `W` of shape `[n_in, n_out]`.
pub(crate) fn affine_forward(x: &Tensor, w: &Tensor, b: &Tensor) -> Tensor {
    let rows = x.rows();
    let n_in = x.row_len();
    let n_out = b.len();
    let (xd, wd, bd) = (x.data(), w.data(), b.data());
    let mut out = Tensor::zeros(vec![rows, n_out]);
    let y = out.data_mut();

    for r in 0..rows {
        let y_row = &mut y[r * n_out..(r + 1) * n_out];
        y_row.copy_from_slice(bd);
        for i in 0..n_in {
            let xi = xd[r * n_in + i];
            if xi == 0.0 {
                continue;
            }
            let w_row = &wd[i * n_out..(i + 1) * n_out];
            for (yj, &wij) in y_row.iter_mut().zip(w_row) {
                *yj += xi * wij;
            }
        }
    }
    out
}

/// Gradients of [`affine_forward`] given `grad` at its output: `(dx, dW, db)`.
pub(crate) fn affine_backward(x: &Tensor, w: &Tensor, grad: &[f32]) -> (Tensor, Tensor, Tensor) {
    let rows = x.rows();
    let n_in = x.row_len();
    let n_out = w.row_len();
    let (xd, wd) = (x.data(), w.data());

    let mut gx = Tensor::zeros(vec![rows, n_in]);
    let mut gw = Tensor::zeros(w.shape().to_vec());
    let mut gb = Tensor::zeros(vec![n_out]);
    {
        let (gxd, gwd, gbd) = (gx.data_mut(), gw.data_mut(), gb.data_mut());
        for r in 0..rows {
            let g_row = &grad[r * n_out..(r + 1) * n_out];
            for (b, &g) in gbd.iter_mut().zip(g_row) {
                *b += g;
            }
            for i in 0..n_in {
                let xi = xd[r * n_in + i];
                let w_row = &wd[i * n_out..(i + 1) * n_out];
                let gw_row = &mut gwd[i * n_out..(i + 1) * n_out];
                let mut acc = 0.0f32;
                for j in 0..n_out {
                    gw_row[j] += xi * g_row[j];
                    acc += w_row[j] * g_row[j];
                }
                gxd[r * n_in + i] = acc;
            }
        }
    }
    (gx, gw, gb)
}

/// Row-wise `[a | b]`.
pub(crate) fn concat_rows(a: &Tensor, b: &Tensor) -> Tensor {
    let rows = a.rows();
    let (na, nb) = (a.row_len(), b.row_len());
    let mut data = Vec::with_capacity(rows * (na + nb));
    for r in 0..rows {
        data.extend_from_slice(a.row(r));
        data.extend_from_slice(b.row(r));
    }
    Tensor::new(vec![rows, na + nb], data).unwrap_or_else(|_| Tensor::zeros(vec![rows, na + nb]))
}

/// Checks the auxiliary tensor bound to `layer` against the batch and its width.
pub(crate) fn require_aux<'a>(
    layer: usize,
    input: &Tensor,
    aux: Option<&'a Tensor>,
    n_aux: usize,
) -> Result<&'a Tensor> {
    let aux = aux.ok_or(NetError::MissingAuxiliaryData)?;
    if aux.rows() != input.rows() || aux.row_len() != n_aux {
        return Err(NetError::ShapeMismatch {
            layer,
            reason: format!(
                "auxiliary input of shape {:?} does not match batch {} x {}",
                aux.shape(),
                input.rows(),
                n_aux
            ),
        });
    }
    Ok(aux)
}

/// Fully connected layer: `actvn(x · W + b)`.
///
/// # Weight group
///
/// * `[0]` weights, shape `[n_in, n_out]`, row-major so `W[i * n_out + j]` connects
///   input `i` to output `j`
/// * `[1]` biases, shape `[n_out]`
#[derive(Debug, Clone)]
pub struct HiddenLayer {
    position: usize,
    mode: Mode,
    n_in: usize,
    n_out: usize,
    actvn: Activation,
    l2_reg: f32,
}

impl HiddenLayer {
    /// Fresh weights use Xavier initialization; biases start at zero.
    pub fn new(
        position: usize,
        opts: &HiddenOptions,
        n_in: usize,
        init: WeightInit,
    ) -> Result<(Self, Vec<Tensor>)> {
        let layer = Self {
            position,
            mode: Mode::Train,
            n_in,
            n_out: opts.n_out,
            actvn: opts.actvn,
            l2_reg: opts.l2_reg,
        };
        let shapes = vec![vec![n_in, opts.n_out], vec![opts.n_out]];
        let weights = init.resolve(&shapes, |rng| {
            vec![
                xavier_uniform(shapes[0].clone(), n_in, opts.n_out, rng),
                Tensor::zeros(shapes[1].clone()),
            ]
        })?;
        Ok((layer, weights))
    }
}

impl Layer for HiddenLayer {
    fn tag(&self) -> &'static str {
        "HiddenLayer"
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn shape(&self) -> LayerShape {
        LayerShape::Flat { n_out: self.n_out }
    }

    fn forward(&self, input: &Tensor, _aux: Option<&Tensor>, weights: &[Tensor]) -> Result<Tensor> {
        check_row_len(self.position, self.tag(), input, self.n_in)?;
        let mut out = affine_forward(input, &weights[0], &weights[1]);
        self.actvn.apply_inplace(out.data_mut());
        Ok(out)
    }

    fn backward(
        &self,
        input: &Tensor,
        _aux: Option<&Tensor>,
        output: &Tensor,
        grad_output: &Tensor,
        weights: &[Tensor],
    ) -> Result<Gradients> {
        let mut g = grad_output.data().to_vec();
        self.actvn.backprop_inplace(output.data(), &mut g);
        let (gx, mut gw, gb) = affine_backward(input, &weights[0], &g);
        add_l2_grad(self.l2_reg, &weights[0], &mut gw);
        Ok(Gradients {
            input: gx,
            weights: vec![gw, gb],
        })
    }

    fn weight_cost(&self, weights: &[Tensor]) -> f32 {
        l2_cost(self.l2_reg, &weights[0])
    }

    fn test_version(&self) -> Box<dyn Layer> {
        Box::new(Self {
            mode: Mode::Test,
            ..self.clone()
        })
    }

    fn describe(&self) -> String {
        format!(
            "HiddenLayer: {} -> {}, {:?}, l2 {}",
            self.n_in, self.n_out, self.actvn, self.l2_reg
        )
    }
}

/// Parameter-free layer emitting `[x | aux]`, the network's one auxiliary input
/// appended to each flat sample.
#[derive(Debug, Clone)]
pub struct AuxConcatLayer {
    position: usize,
    mode: Mode,
    n_in: usize,
    n_aux: usize,
}

impl AuxConcatLayer {
    pub fn new(position: usize, opts: &AuxConcatOptions, n_in: usize) -> Self {
        Self {
            position,
            mode: Mode::Train,
            n_in,
            n_aux: opts.n_aux,
        }
    }
}

impl Layer for AuxConcatLayer {
    fn tag(&self) -> &'static str {
        "AuxConcatLayer"
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn shape(&self) -> LayerShape {
        LayerShape::Flat {
            n_out: self.n_in + self.n_aux,
        }
    }

    fn forward(&self, input: &Tensor, aux: Option<&Tensor>, _weights: &[Tensor]) -> Result<Tensor> {
        check_row_len(self.position, self.tag(), input, self.n_in)?;
        let aux = require_aux(self.position, input, aux, self.n_aux)?;
        Ok(concat_rows(input, aux))
    }

    fn backward(
        &self,
        input: &Tensor,
        _aux: Option<&Tensor>,
        _output: &Tensor,
        grad_output: &Tensor,
        _weights: &[Tensor],
    ) -> Result<Gradients> {
        let width = self.n_in + self.n_aux;
        let mut data = Vec::with_capacity(input.len());
        for r in 0..input.rows() {
            data.extend_from_slice(&grad_output.data()[r * width..r * width + self.n_in]);
        }
        Ok(Gradients {
            input: Tensor::new(input.shape().to_vec(), data)?,
            weights: Vec::new(),
        })
    }

    fn aux_width(&self) -> Option<usize> {
        Some(self.n_aux)
    }

    fn test_version(&self) -> Box<dyn Layer> {
        Box::new(Self {
            mode: Mode::Test,
            ..self.clone()
        })
    }

    fn describe(&self) -> String {
        format!("AuxConcatLayer: {} + {} aux -> {}", self.n_in, self.n_aux, self.n_in + self.n_aux)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::SimpleRng;
    use approx::assert_relative_eq;

    #[test]
    fn test_affine_forward_known_values() {
        let x = Tensor::new(vec![2, 2], vec![1.0, 2.0, 0.0, 1.0]).unwrap();
        let w = Tensor::new(vec![2, 3], vec![1.0, 0.0, 2.0, 0.5, 1.0, 0.0]).unwrap();
        let b = Tensor::new(vec![3], vec![0.1, 0.2, 0.3]).unwrap();
        let y = affine_forward(&x, &w, &b);
        assert_eq!(y.shape(), &[2, 3]);
        let expected = [2.1, 2.2, 2.3, 0.6, 1.2, 0.3];
        for (a, e) in y.data().iter().zip(expected) {
            assert_relative_eq!(*a, e, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_affine_backward_shapes_and_bias() {
        let x = Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let w = Tensor::new(vec![2, 1], vec![0.5, -1.0]).unwrap();
        let (gx, gw, gb) = affine_backward(&x, &w, &[1.0, 2.0]);
        assert_eq!(gx.data(), &[0.5, -1.0, 1.0, -2.0]);
        assert_eq!(gw.data(), &[7.0, 10.0]);
        assert_eq!(gb.data(), &[3.0]);
    }

    #[test]
    fn test_hidden_gradient_matches_finite_difference() {
        let mut rng = SimpleRng::new(3);
        let opts = HiddenOptions {
            n_out: 3,
            actvn: Activation::Sigmoid,
            l2_reg: 0.1,
        };
        let (layer, weights) =
            HiddenLayer::new(1, &opts, 4, WeightInit::fresh(1, &mut rng)).unwrap();
        let x = Tensor::new(vec![2, 4], (0..8).map(|v| (v as f32 * 0.3).cos()).collect()).unwrap();

        let loss = |w: &[Tensor]| -> f32 {
            layer.forward(&x, None, w).unwrap().data().iter().sum::<f32>() + layer.weight_cost(w)
        };
        let out = layer.forward(&x, None, &weights).unwrap();
        let ones = Tensor::new(out.shape().to_vec(), vec![1.0; out.len()]).unwrap();
        let grads = layer.backward(&x, None, &out, &ones, &weights).unwrap();

        let eps = 1e-3f32;
        for idx in 0..weights[0].len() {
            let mut plus = weights.clone();
            plus[0].data_mut()[idx] += eps;
            let mut minus = weights.clone();
            minus[0].data_mut()[idx] -= eps;
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
            assert_relative_eq!(grads.weights[0].data()[idx], numeric, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_aux_concat_requires_aux() {
        let layer = AuxConcatLayer::new(2, &AuxConcatOptions { n_aux: 2 }, 3);
        let x = Tensor::zeros(vec![2, 3]);
        assert!(matches!(
            layer.forward(&x, None, &[]),
            Err(NetError::MissingAuxiliaryData)
        ));

        let aux = Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let out = layer.forward(&x, Some(&aux), &[]).unwrap();
        assert_eq!(out.shape(), &[2, 5]);
        assert_eq!(out.row(1), &[0.0, 0.0, 0.0, 3.0, 4.0]);
        assert_eq!(layer.aux_width(), Some(2));
    }

    #[test]
    fn test_aux_concat_backward_drops_aux_columns() {
        let layer = AuxConcatLayer::new(2, &AuxConcatOptions { n_aux: 1 }, 2);
        let x = Tensor::zeros(vec![2, 2]);
        let grad = Tensor::new(vec![2, 3], vec![1.0, 2.0, 9.0, 3.0, 4.0, 9.0]).unwrap();
        let g = layer.backward(&x, None, &grad, &grad, &[]).unwrap();
        assert_eq!(g.input.data(), &[1.0, 2.0, 3.0, 4.0]);
    }
}
