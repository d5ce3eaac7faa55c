//! Input layers
//!
//! [`InputLayer`] reshapes raw samples into square feature maps. [`ElasticLayer`]
//! does the same and, in its training variant, warps every sample with a random
//! smooth displacement field and a random translation.

use crate::architecture::{ElasticOptions, InputOptions};
use crate::error::Result;
use crate::layers::{check_row_len, Gradients, Layer, LayerShape, Mode};
use crate::tensor::Tensor;
use crate::utils::SimpleRng;
use std::cell::RefCell;

fn to_maps(
    position: usize,
    tag: &str,
    input: &Tensor,
    num_maps: usize,
    img_sz: usize,
) -> Result<Tensor> {
    check_row_len(position, tag, input, num_maps * img_sz * img_sz)?;
    input
        .clone()
        .reshape(vec![input.rows(), num_maps, img_sz, img_sz])
}

/// Entry point of a network: accepts any `[batch, ...]` tensor with
/// `num_maps * img_sz * img_sz` values per sample.
#[derive(Debug, Clone)]
pub struct InputLayer {
    position: usize,
    mode: Mode,
    num_maps: usize,
    img_sz: usize,
}

impl InputLayer {
    pub fn new(position: usize, opts: &InputOptions) -> Self {
        Self {
            position,
            mode: Mode::Train,
            num_maps: opts.num_maps,
            img_sz: opts.img_sz,
        }
    }
}

impl Layer for InputLayer {
    fn tag(&self) -> &'static str {
        "InputLayer"
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn shape(&self) -> LayerShape {
        LayerShape::Maps {
            num_maps: self.num_maps,
            out_sz: self.img_sz,
        }
    }

    fn forward(
        &self,
        input: &Tensor,
        _aux: Option<&Tensor>,
        _weights: &[Tensor],
    ) -> Result<Tensor> {
        to_maps(self.position, self.tag(), input, self.num_maps, self.img_sz)
    }

    fn backward(
        &self,
        input: &Tensor,
        _aux: Option<&Tensor>,
        _output: &Tensor,
        grad_output: &Tensor,
        _weights: &[Tensor],
    ) -> Result<Gradients> {
        Ok(Gradients {
            input: grad_output.clone().reshape(input.shape().to_vec())?,
            weights: Vec::new(),
        })
    }

    fn test_version(&self) -> Box<dyn Layer> {
        Box::new(Self {
            mode: Mode::Test,
            ..self.clone()
        })
    }

    fn describe(&self) -> String {
        format!("InputLayer: {} map(s) of {}x{}", self.num_maps, self.img_sz, self.img_sz)
    }
}

/// Input layer with elastic-distortion augmentation.
///
/// Each training sample gets its own displacement field: uniform noise in
/// `[-1, 1]` box-blurred with radius `sigma`, rescaled so its largest component is
/// `magnitude` pixels, plus a whole-image shift of up to `translation` pixels in
/// each direction. Pixels are resampled bilinearly; positions outside the image
/// read as zero. All maps of a sample share the same field.
///
/// The evaluation variant only reshapes.
#[derive(Debug)]
pub struct ElasticLayer {
    position: usize,
    mode: Mode,
    opts: ElasticOptions,
    rng: RefCell<SimpleRng>,
}

impl ElasticLayer {
    pub fn new(position: usize, opts: &ElasticOptions, rng: SimpleRng) -> Self {
        Self {
            position,
            mode: Mode::Train,
            opts: opts.clone(),
            rng: RefCell::new(rng),
        }
    }

    fn distorts(&self) -> bool {
        self.mode == Mode::Train && (self.opts.magnitude > 0.0 || self.opts.translation > 0.0)
    }

    /// Per-pixel source offsets `(dx, dy)` for one sample.
    fn displacement(&self, rng: &mut SimpleRng) -> (Vec<f32>, Vec<f32>) {
        let sz = self.opts.img_sz;
        let n = sz * sz;
        let t = self.opts.translation;
        let shift_x = rng.gen_range_f32(-t, t);
        let shift_y = rng.gen_range_f32(-t, t);

        let field = |shift: f32, rng: &mut SimpleRng| {
            let mut d = vec![0.0f32; n];
            if self.opts.magnitude > 0.0 {
                d.iter_mut().for_each(|v| *v = rng.gen_range_f32(-1.0, 1.0));
                box_blur(&mut d, sz, self.opts.sigma);
                let peak = d.iter().fold(0.0f32, |m, v| m.max(v.abs()));
                if peak > 0.0 {
                    let scale = self.opts.magnitude / peak;
                    d.iter_mut().for_each(|v| *v *= scale);
                }
            }
            d.iter_mut().for_each(|v| *v += shift);
            d
        };

        let dx = field(shift_x, &mut *rng);
        let dy = field(shift_y, rng);
        (dx, dy)
    }
}

/// Separable box blur of radius `radius` over a `sz x sz` plane, edges clamped.
fn box_blur(plane: &mut [f32], sz: usize, radius: usize) {
    if radius == 0 {
        return;
    }
    let mut tmp = vec![0.0f32; plane.len()];

    for y in 0..sz {
        for x in 0..sz {
            let lo = x.saturating_sub(radius);
            let hi = (x + radius).min(sz - 1);
            let sum: f32 = (lo..=hi).map(|xx| plane[y * sz + xx]).sum();
            tmp[y * sz + x] = sum / (hi - lo + 1) as f32;
        }
    }
    for y in 0..sz {
        for x in 0..sz {
            let lo = y.saturating_sub(radius);
            let hi = (y + radius).min(sz - 1);
            let sum: f32 = (lo..=hi).map(|yy| tmp[yy * sz + x]).sum();
            plane[y * sz + x] = sum / (hi - lo + 1) as f32;
        }
    }
}

fn bilinear(src: &[f32], sz: usize, x: f32, y: f32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let at = |xi: f32, yi: f32| {
        if xi < 0.0 || yi < 0.0 || xi >= sz as f32 || yi >= sz as f32 {
            0.0
        } else {
            src[yi as usize * sz + xi as usize]
        }
    };
    (1.0 - fx) * (1.0 - fy) * at(x0, y0)
        + fx * (1.0 - fy) * at(x0 + 1.0, y0)
        + (1.0 - fx) * fy * at(x0, y0 + 1.0)
        + fx * fy * at(x0 + 1.0, y0 + 1.0)
}

impl Layer for ElasticLayer {
    fn tag(&self) -> &'static str {
        "ElasticLayer"
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn shape(&self) -> LayerShape {
        LayerShape::Maps {
            num_maps: self.opts.num_maps,
            out_sz: self.opts.img_sz,
        }
    }

    fn forward(
        &self,
        input: &Tensor,
        _aux: Option<&Tensor>,
        _weights: &[Tensor],
    ) -> Result<Tensor> {
        let maps = to_maps(
            self.position,
            self.tag(),
            input,
            self.opts.num_maps,
            self.opts.img_sz,
        )?;
        if !self.distorts() {
            return Ok(maps);
        }

        let sz = self.opts.img_sz;
        let plane = sz * sz;
        let mut out = Tensor::zeros(maps.shape().to_vec());
        let mut rng = self.rng.borrow_mut();

        for b in 0..maps.rows() {
            let (dx, dy) = self.displacement(&mut rng);
            for c in 0..self.opts.num_maps {
                let base = (b * self.opts.num_maps + c) * plane;
                let src = &maps.data()[base..base + plane];
                let dst = &mut out.data_mut()[base..base + plane];
                for y in 0..sz {
                    for x in 0..sz {
                        let i = y * sz + x;
                        dst[i] = bilinear(src, sz, x as f32 + dx[i], y as f32 + dy[i]);
                    }
                }
            }
        }
        Ok(out)
    }

    /// The distortion is part of the data; gradients pass through unchanged.
    fn backward(
        &self,
        input: &Tensor,
        _aux: Option<&Tensor>,
        _output: &Tensor,
        grad_output: &Tensor,
        _weights: &[Tensor],
    ) -> Result<Gradients> {
        Ok(Gradients {
            input: grad_output.clone().reshape(input.shape().to_vec())?,
            weights: Vec::new(),
        })
    }

    fn test_version(&self) -> Box<dyn Layer> {
        Box::new(Self {
            position: self.position,
            mode: Mode::Test,
            opts: self.opts.clone(),
            rng: RefCell::new(self.rng.borrow().clone()),
        })
    }

    fn describe(&self) -> String {
        format!(
            "ElasticLayer: {} map(s) of {}x{}, translation {}, magnitude {}, sigma {}",
            self.opts.num_maps,
            self.opts.img_sz,
            self.opts.img_sz,
            self.opts.translation,
            self.opts.magnitude,
            self.opts.sigma
        )
    }
}
