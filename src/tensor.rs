//! Dense row-major tensors
//!
//! Every tensor in the network is a flat `Vec<f32>` plus a shape. Axis 0 is the batch
//! (or sample) axis for activations and the leading axis for weights.

use crate::error::{NetError, Result};
use serde::{Deserialize, Serialize};

/// Row-major f32 tensor with explicit shape.
///
/// # Example
///
/// ```
/// use layernet::tensor::Tensor;
///
/// let t = Tensor::new(vec![2, 1, 2, 2], (0..8).map(|v| v as f32).collect()).unwrap();
/// let flat = t.flatten2();
/// assert_eq!(flat.shape(), &[2, 4]);
/// assert_eq!(flat.row(1), &[4.0, 5.0, 6.0, 7.0]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// Deserialized form of [`Tensor`], checked through [`Tensor::new`].
#[derive(Deserialize)]
struct RawTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl TryFrom<RawTensor> for Tensor {
    type Error = NetError;

    fn try_from(raw: RawTensor) -> Result<Self> {
        Tensor::new(raw.shape, raw.data)
    }
}

impl Tensor {
    /// Wraps `data` with `shape`, checking that the element counts agree.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(NetError::TensorShape(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0f32; len],
        }
    }

    /// Builds a tensor by sampling every element from `f`.
    pub fn from_fn(shape: Vec<usize>, mut f: impl FnMut() -> f32) -> Self {
        let len: usize = shape.iter().product();
        let data = (0..len).map(|_| f()).collect();
        Self { shape, data }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Element type name, used by the weight report.
    pub fn dtype(&self) -> &'static str {
        "float32"
    }

    /// Size of the leading axis (0 for a scalar-shaped tensor).
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Number of elements per leading-axis entry.
    pub fn row_len(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    pub fn row(&self, index: usize) -> &[f32] {
        let width = self.row_len();
        &self.data[index * width..(index + 1) * width]
    }

    /// Collapses every trailing axis into one: `[n, a, b, c]` becomes `[n, a*b*c]`.
    pub fn flatten2(&self) -> Tensor {
        Tensor {
            shape: vec![self.rows(), self.row_len()],
            data: self.data.clone(),
        }
    }

    /// Same data under a new shape with the same element count.
    pub fn reshape(self, shape: Vec<usize>) -> Result<Tensor> {
        Tensor::new(shape, self.data)
    }

    /// Copies leading-axis entries `[start, end)`.
    pub fn slice_rows(&self, start: usize, end: usize) -> Tensor {
        let width = self.row_len();
        let mut shape = self.shape.clone();
        shape[0] = end - start;
        Tensor {
            shape,
            data: self.data[start * width..end * width].to_vec(),
        }
    }

    pub fn min(&self) -> f32 {
        self.data.iter().copied().fold(f32::INFINITY, f32::min)
    }

    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }

    /// Sum of squared elements.
    pub fn sum_squares(&self) -> f32 {
        self.data.iter().map(|v| v * v).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_length() {
        assert!(Tensor::new(vec![2, 3], vec![0.0; 5]).is_err());
        assert!(Tensor::new(vec![2, 3], vec![0.0; 6]).is_ok());
    }

    #[test]
    fn test_deserialize_checks_length() {
        let short = r#"{"shape": [2, 2], "data": [1.0, 2.0, 3.0]}"#;
        assert!(serde_json::from_str::<Tensor>(short).is_err());

        let full = r#"{"shape": [2, 2], "data": [1.0, 2.0, 3.0, 4.0]}"#;
        let t: Tensor = serde_json::from_str(full).unwrap();
        assert_eq!(t.shape(), &[2, 2]);
        assert_eq!(t.row(1), &[3.0, 4.0]);
    }

    #[test]
    fn test_slice_rows_keeps_trailing_shape() {
        let t = Tensor::new(vec![4, 1, 1, 2], (0..8).map(|v| v as f32).collect()).unwrap();
        let s = t.slice_rows(1, 3);
        assert_eq!(s.shape(), &[2, 1, 1, 2]);
        assert_eq!(s.data(), &[2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_statistics() {
        let t = Tensor::new(vec![4], vec![-1.0, 0.0, 1.0, 4.0]).unwrap();
        assert_eq!(t.min(), -1.0);
        assert_eq!(t.max(), 4.0);
        assert_eq!(t.mean(), 1.0);
        assert_eq!(t.sum_squares(), 18.0);
    }

    #[test]
    fn test_row_len_of_vector_is_one() {
        let t = Tensor::zeros(vec![5]);
        assert_eq!(t.rows(), 5);
        assert_eq!(t.row_len(), 1);
    }
}
