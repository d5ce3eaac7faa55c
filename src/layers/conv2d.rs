//! 2D Convolutional layer implementation
//!
//! This module provides a ConvLayer that performs "valid" 2D convolution with stride
//! 1 over square feature maps, followed by an element-wise activation.

use crate::architecture::ConvOptions;
use crate::error::{NetError, Result};
use crate::layers::{
    add_l2_grad, check_row_len, l2_cost, Gradients, Layer, LayerShape, Mode, WeightInit,
};
use crate::tensor::Tensor;
use crate::utils::{xavier_uniform, Activation};

/// 2D Convolutional layer with learnable filters.
///
/// Slides `num_maps` filters of size `filter_sz x filter_sz` over the input maps;
/// no padding, so each output map has side `in_sz - filter_sz + 1`.
///
/// # Weight group
///
/// * `[0]` filters, shape `[num_maps, in_maps, filter_sz, filter_sz]`
/// * `[1]` biases, shape `[num_maps]`
///
/// # Example
///
/// ```
/// use layernet::architecture::ConvOptions;
/// use layernet::layers::{ConvLayer, WeightInit};
/// use layernet::utils::{Activation, SimpleRng};
///
/// let mut rng = SimpleRng::new(42);
/// let opts = ConvOptions { num_maps: 8, filter_sz: 3, actvn: Activation::Relu, l2_reg: 0.0 };
/// let init = WeightInit::fresh(1, &mut rng);
/// let (layer, weights) = ConvLayer::new(1, &opts, 1, 28, 20, init).unwrap();
/// assert_eq!(layer.out_sz(), 26);
/// assert_eq!(weights[0].shape(), &[8, 1, 3, 3]);
/// ```
#[derive(Debug, Clone)]
pub struct ConvLayer {
    position: usize,
    mode: Mode,
    in_maps: usize,
    in_sz: usize,
    num_maps: usize,
    filter_sz: usize,
    actvn: Activation,
    l2_reg: f32,
    batch_sz: usize,
}

impl ConvLayer {
    /// Create a ConvLayer reading `in_maps` maps of side `in_sz`.
    ///
    /// Fresh filters use Xavier initialization with
    /// `fan_in = in_maps * filter_sz²` and `fan_out = num_maps * filter_sz²`;
    /// biases start at zero.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` when the filter is larger than the input maps,
    /// `MalformedWeights` when a supplied group does not match the filter shapes.
    pub fn new(
        position: usize,
        opts: &ConvOptions,
        in_maps: usize,
        in_sz: usize,
        batch_sz: usize,
        init: WeightInit,
    ) -> Result<(Self, Vec<Tensor>)> {
        if opts.filter_sz > in_sz {
            return Err(NetError::ShapeMismatch {
                layer: position,
                reason: format!(
                    "filter of size {} does not fit input maps of size {}",
                    opts.filter_sz, in_sz
                ),
            });
        }

        let layer = Self {
            position,
            mode: Mode::Train,
            in_maps,
            in_sz,
            num_maps: opts.num_maps,
            filter_sz: opts.filter_sz,
            actvn: opts.actvn,
            l2_reg: opts.l2_reg,
            batch_sz,
        };

        let shapes = layer.weight_shapes();
        let area = layer.filter_sz * layer.filter_sz;
        let weights = init.resolve(&shapes, |rng| {
            vec![
                xavier_uniform(shapes[0].clone(), in_maps * area, layer.num_maps * area, rng),
                Tensor::zeros(shapes[1].clone()),
            ]
        })?;

        Ok((layer, weights))
    }

    /// Side length of every output map.
    pub fn out_sz(&self) -> usize {
        self.in_sz - self.filter_sz + 1
    }

    pub fn weight_shapes(&self) -> Vec<Vec<usize>> {
        vec![
            vec![self.num_maps, self.in_maps, self.filter_sz, self.filter_sz],
            vec![self.num_maps],
        ]
    }
}

impl Layer for ConvLayer {
    fn tag(&self) -> &'static str {
        "ConvLayer"
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn shape(&self) -> LayerShape {
        LayerShape::Maps {
            num_maps: self.num_maps,
            out_sz: self.out_sz(),
        }
    }

    fn forward(&self, input: &Tensor, _aux: Option<&Tensor>, weights: &[Tensor]) -> Result<Tensor> {
        check_row_len(
            self.position,
            self.tag(),
            input,
            self.in_maps * self.in_sz * self.in_sz,
        )?;
        let (w, bias) = (weights[0].data(), weights[1].data());
        let batch = input.rows();
        let k = self.filter_sz;
        let out_sz = self.out_sz();
        let out_spatial = out_sz * out_sz;
        let in_spatial = self.in_sz * self.in_sz;
        let x = input.data();

        let mut out = Tensor::zeros(vec![batch, self.num_maps, out_sz, out_sz]);
        let y = out.data_mut();

        for b in 0..batch {
            let in_base = b * self.in_maps * in_spatial;
            let out_base_b = b * self.num_maps * out_spatial;

            for oc in 0..self.num_maps {
                let out_base = out_base_b + oc * out_spatial;

                for oy in 0..out_sz {
                    for ox in 0..out_sz {
                        let mut sum = bias[oc];

                        for ic in 0..self.in_maps {
                            let w_base = (oc * self.in_maps + ic) * k * k;
                            let in_base_c = in_base + ic * in_spatial;

                            for ky in 0..k {
                                let row = in_base_c + (oy + ky) * self.in_sz + ox;
                                for kx in 0..k {
                                    sum += x[row + kx] * w[w_base + ky * k + kx];
                                }
                            }
                        }

                        y[out_base + oy * out_sz + ox] = sum;
                    }
                }
            }
        }

        self.actvn.apply_inplace(y);
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
        let w = &weights[0];
        let batch = input.rows();
        let k = self.filter_sz;
        let out_sz = self.out_sz();
        let out_spatial = out_sz * out_sz;
        let in_spatial = self.in_sz * self.in_sz;
        let x = input.data();

        // Gradient at the pre-activation sums.
        let mut g_pre = grad_output.data().to_vec();
        self.actvn.backprop_inplace(output.data(), &mut g_pre);

        let mut grad_w = Tensor::zeros(w.shape().to_vec());
        let mut grad_b = Tensor::zeros(weights[1].shape().to_vec());
        let mut grad_in = Tensor::zeros(input.shape().to_vec());
        {
            let gw = grad_w.data_mut();
            let gb = grad_b.data_mut();
            let gx = grad_in.data_mut();

            for b in 0..batch {
                let in_base = b * self.in_maps * in_spatial;
                let g_base_b = b * self.num_maps * out_spatial;

                for oc in 0..self.num_maps {
                    let g_base = g_base_b + oc * out_spatial;

                    for oy in 0..out_sz {
                        for ox in 0..out_sz {
                            let g = g_pre[g_base + oy * out_sz + ox];
                            if g == 0.0 {
                                continue;
                            }
                            gb[oc] += g;

                            for ic in 0..self.in_maps {
                                let w_base = (oc * self.in_maps + ic) * k * k;
                                let in_base_c = in_base + ic * in_spatial;

                                for ky in 0..k {
                                    let row = in_base_c + (oy + ky) * self.in_sz + ox;
                                    for kx in 0..k {
                                        let w_idx = w_base + ky * k + kx;
                                        gw[w_idx] += g * x[row + kx];
                                        gx[row + kx] += g * w.data()[w_idx];
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        add_l2_grad(self.l2_reg, w, &mut grad_w);

        Ok(Gradients {
            input: grad_in,
            weights: vec![grad_w, grad_b],
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
            "ConvLayer: {} -> {} maps, filter {}x{}, maps {}x{} -> {}x{}, {:?}, batch {}",
            self.in_maps,
            self.num_maps,
            self.filter_sz,
            self.filter_sz,
            self.in_sz,
            self.in_sz,
            self.out_sz(),
            self.out_sz(),
            self.actvn,
            self.batch_sz
        )
    }
}
