//! Max and mean pooling over non-overlapping square windows.

use crate::architecture::PoolOptions;
use crate::error::{NetError, Result};
use crate::layers::{check_row_len, Gradients, Layer, LayerShape, Mode};
use crate::tensor::Tensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    Max,
    Mean,
}

/// Downsamples each map by `pool_sz`; trailing rows and columns that do not fill a
/// whole window are dropped.
///
/// Max pooling routes the gradient to the first maximal element of each window;
/// mean pooling spreads it evenly.
#[derive(Debug, Clone)]
pub struct PoolLayer {
    position: usize,
    mode: Mode,
    pool: PoolMode,
    num_maps: usize,
    in_sz: usize,
    pool_sz: usize,
}

impl PoolLayer {
    pub fn new(
        position: usize,
        pool: PoolMode,
        opts: &PoolOptions,
        num_maps: usize,
        in_sz: usize,
    ) -> Result<Self> {
        if opts.pool_sz > in_sz {
            return Err(NetError::ShapeMismatch {
                layer: position,
                reason: format!("pool size {} exceeds map size {}", opts.pool_sz, in_sz),
            });
        }
        Ok(Self {
            position,
            mode: Mode::Train,
            pool,
            num_maps,
            in_sz,
            pool_sz: opts.pool_sz,
        })
    }

    pub fn out_sz(&self) -> usize {
        self.in_sz / self.pool_sz
    }

    /// Calls `f(out_index, window_input_indices)` for every output cell.
    fn for_each_window(
        &self,
        batch: usize,
        mut f: impl FnMut(usize, &mut dyn Iterator<Item = usize>),
    ) {
        let p = self.pool_sz;
        let out_sz = self.out_sz();
        let in_spatial = self.in_sz * self.in_sz;
        let out_spatial = out_sz * out_sz;

        for plane in 0..batch * self.num_maps {
            let in_base = plane * in_spatial;
            let out_base = plane * out_spatial;
            for oy in 0..out_sz {
                for ox in 0..out_sz {
                    let in_sz = self.in_sz;
                    let mut window = (0..p).flat_map(move |dy| {
                        (0..p).map(move |dx| in_base + (oy * p + dy) * in_sz + ox * p + dx)
                    });
                    f(out_base + oy * out_sz + ox, &mut window);
                }
            }
        }
    }
}

impl Layer for PoolLayer {
    fn tag(&self) -> &'static str {
        match self.pool {
            PoolMode::Max => "PoolLayer",
            PoolMode::Mean => "MeanLayer",
        }
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

    fn forward(
        &self,
        input: &Tensor,
        _aux: Option<&Tensor>,
        _weights: &[Tensor],
    ) -> Result<Tensor> {
        check_row_len(
            self.position,
            self.tag(),
            input,
            self.num_maps * self.in_sz * self.in_sz,
        )?;
        let batch = input.rows();
        let out_sz = self.out_sz();
        let area = (self.pool_sz * self.pool_sz) as f32;
        let x = input.data();
        let mut out = Tensor::zeros(vec![batch, self.num_maps, out_sz, out_sz]);
        let y = out.data_mut();

        self.for_each_window(batch, |o, window| {
            y[o] = match self.pool {
                PoolMode::Max => window.map(|i| x[i]).fold(f32::NEG_INFINITY, f32::max),
                PoolMode::Mean => window.map(|i| x[i]).sum::<f32>() / area,
            };
        });
        Ok(out)
    }

    fn backward(
        &self,
        input: &Tensor,
        _aux: Option<&Tensor>,
        _output: &Tensor,
        grad_output: &Tensor,
        _weights: &[Tensor],
    ) -> Result<Gradients> {
        let area = (self.pool_sz * self.pool_sz) as f32;
        let x = input.data();
        let g = grad_output.data();
        let mut grad_in = Tensor::zeros(input.shape().to_vec());
        let gx = grad_in.data_mut();

        self.for_each_window(input.rows(), |o, window| match self.pool {
            PoolMode::Max => {
                let mut best: Option<usize> = None;
                for i in window {
                    if best.map_or(true, |b| x[i] > x[b]) {
                        best = Some(i);
                    }
                }
                if let Some(i) = best {
                    gx[i] += g[o];
                }
            }
            PoolMode::Mean => {
                for i in window {
                    gx[i] += g[o] / area;
                }
            }
        });

        Ok(Gradients {
            input: grad_in,
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
        format!(
            "{}: {} maps, {}x{} windows, {}x{} -> {}x{}",
            self.tag(),
            self.num_maps,
            self.pool_sz,
            self.pool_sz,
            self.in_sz,
            self.in_sz,
            self.out_sz(),
            self.out_sz()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(pool: PoolMode) -> PoolLayer {
        PoolLayer::new(2, pool, &PoolOptions { pool_sz: 2 }, 1, 4).unwrap()
    }

    fn input() -> Tensor {
        Tensor::new(vec![1, 1, 4, 4], (0..16).map(|v| v as f32).collect()).unwrap()
    }

    #[test]
    fn test_max_pool_forward() {
        let out = layer(PoolMode::Max).forward(&input(), None, &[]).unwrap();
        assert_eq!(out.shape(), &[1, 1, 2, 2]);
        assert_eq!(out.data(), &[5.0, 7.0, 13.0, 15.0]);
    }

    #[test]
    fn test_mean_pool_forward() {
        let out = layer(PoolMode::Mean).forward(&input(), None, &[]).unwrap();
        assert_eq!(out.data(), &[2.5, 4.5, 10.5, 12.5]);
    }

    #[test]
    fn test_max_pool_routes_gradient_to_argmax() {
        let pool = layer(PoolMode::Max);
        let x = input();
        let out = pool.forward(&x, None, &[]).unwrap();
        let grad = Tensor::new(vec![1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let g = pool.backward(&x, None, &out, &grad, &[]).unwrap();
        assert_eq!(g.input.data()[5], 1.0);
        assert_eq!(g.input.data()[7], 2.0);
        assert_eq!(g.input.data()[13], 3.0);
        assert_eq!(g.input.data()[15], 4.0);
        assert_eq!(g.input.data().iter().sum::<f32>(), 10.0);
    }

    #[test]
    fn test_odd_size_drops_border() {
        let pool = PoolLayer::new(1, PoolMode::Mean, &PoolOptions { pool_sz: 2 }, 3, 5).unwrap();
        assert_eq!(pool.out_sz(), 2);
        assert_eq!(pool.tag(), "MeanLayer");
    }

    #[test]
    fn test_pool_larger_than_map() {
        assert!(PoolLayer::new(1, PoolMode::Max, &PoolOptions { pool_sz: 6 }, 1, 4).is_err());
    }
}
