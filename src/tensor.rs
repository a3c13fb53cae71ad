use serde::{Deserialize, Serialize};
use crate::error::{CalibError, Result};

/// Dense row-major f32 array. First dimension is the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let n: usize = shape.iter().product();
        if n != data.len() {
            return Err(CalibError::shape(format!("shape {:?} needs {} values, got {}", shape, n, data.len())));
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let n = shape.iter().product();
        Self { shape, data: vec![0.0; n] }
    }

    /// Build a batch from nested rows; every row must have the same length.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * width);
        for (i, r) in rows.iter().enumerate() {
            if r.len() != width { return Err(CalibError::shape(format!("row {} has {} values, expected {}", i, r.len(), width))); }
            data.extend_from_slice(r);
        }
        Self::new(vec![rows.len(), width], data)
    }

    #[inline]
    pub fn rank(&self) -> usize { self.shape.len() }

    #[inline]
    pub fn len(&self) -> usize { self.data.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    #[inline]
    pub fn batch_size(&self) -> usize { self.shape.first().copied().unwrap_or(0) }

    /// Size of one sample (product of the non-batch dimensions).
    #[inline]
    pub fn sample_len(&self) -> usize { self.shape.iter().skip(1).product() }

    #[inline]
    pub fn last_dim(&self) -> usize { self.shape.last().copied().unwrap_or(0) }

    /// Map a possibly negative axis onto `0..rank`.
    pub fn resolve_axis(&self, axis: isize) -> Result<usize> {
        let rank = self.rank() as isize;
        let a = if axis < 0 { rank + axis } else { axis };
        if a < 0 || a >= rank {
            return Err(CalibError::shape(format!("axis {} out of range for shape {:?}", axis, self.shape)));
        }
        Ok(a as usize)
    }

    pub fn max_abs(&self) -> f32 {
        self.data.iter().fold(0.0f32, |m, v| m.max(v.abs()))
    }

    /// Max absolute value over every dimension except `axis`.
    pub fn max_abs_along(&self, axis: isize) -> Result<Vec<f32>> {
        let a = self.resolve_axis(axis)?;
        let size = self.shape[a];
        let inner: usize = self.shape[a + 1..].iter().product();
        let mut out = vec![0.0f32; size];
        if inner == 0 || size == 0 { return Ok(out); }
        for (i, v) in self.data.iter().enumerate() {
            let c = (i / inner) % size;
            out[c] = out[c].max(v.abs());
        }
        Ok(out)
    }

    /// Copy `count` samples starting at `start`.
    pub fn slice_samples(&self, start: usize, count: usize) -> Result<Tensor> {
        if start + count > self.batch_size() {
            return Err(CalibError::shape(format!("samples {}..{} out of {}", start, start + count, self.batch_size())));
        }
        let sl = self.sample_len();
        let mut shape = self.shape.clone();
        shape[0] = count;
        Ok(Tensor { shape, data: self.data[start * sl..(start + count) * sl].to_vec() })
    }

    pub fn map_inplace(&mut self, f: impl Fn(f32) -> f32) {
        for v in &mut self.data { *v = f(*v); }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_abs_along_last_axis() {
        let t = Tensor::new(vec![2, 3], vec![1.0, -5.0, 2.0, -3.0, 4.0, 0.5]).unwrap();
        assert_eq!(t.max_abs_along(-1).unwrap(), vec![3.0, 5.0, 2.0]);
        assert_eq!(t.max_abs_along(0).unwrap(), vec![5.0, 4.0]);
        assert_eq!(t.max_abs(), 5.0);
    }

    #[test]
    fn max_abs_along_middle_axis() {
        // shape (1, 2, 2): axis 1 groups pairs
        let t = Tensor::new(vec![1, 2, 2], vec![1.0, 2.0, -7.0, 3.0]).unwrap();
        assert_eq!(t.max_abs_along(1).unwrap(), vec![2.0, 7.0]);
    }

    #[test]
    fn axis_out_of_range() {
        let t = Tensor::zeros(vec![2, 3]);
        assert!(matches!(t.resolve_axis(2), Err(CalibError::ShapeMismatch(_))));
        assert!(matches!(t.resolve_axis(-3), Err(CalibError::ShapeMismatch(_))));
    }
}
