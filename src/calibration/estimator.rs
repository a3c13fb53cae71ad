use serde::{Deserialize, Serialize};
use crate::error::{CalibError, Result};
use crate::tensor::Tensor;

/// Estimated maximum absolute value, one per channel or one for the whole tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RangeEstimate {
    PerTensor(f32),
    PerAxis(Vec<f32>),
}

impl RangeEstimate {
    pub fn len(&self) -> usize {
        match self { RangeEstimate::PerTensor(_) => 1, RangeEstimate::PerAxis(v) => v.len() }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Range for channel `c` (per-tensor estimates ignore `c`).
    #[inline]
    pub fn at(&self, c: usize) -> f32 {
        match self { RangeEstimate::PerTensor(m) => *m, RangeEstimate::PerAxis(v) => v[c] }
    }

    pub fn as_vec(&self) -> Vec<f32> {
        match self { RangeEstimate::PerTensor(m) => vec![*m], RangeEstimate::PerAxis(v) => v.clone() }
    }
}

#[inline]
fn moving_max(prev: f32, batch_max: f32, momentum: f32) -> f32 {
    momentum * prev + (1.0 - momentum) * batch_max
}

/// Moving-maximum range tracker.
///
/// The first batch sets the estimate to its exact max; every later batch blends in
/// with `new = momentum * prev + (1 - momentum) * batch_max`.
#[derive(Debug, Clone)]
pub struct RangeEstimator {
    axis: Option<isize>,
    momentum: f32,
    estimate: Option<RangeEstimate>,
    updates: usize,
}

impl RangeEstimator {
    pub fn new(axis: Option<isize>, momentum: f32) -> Result<Self> {
        if !(0.0..1.0).contains(&momentum) {
            return Err(CalibError::config(format!("momentum must be in [0, 1), got {}", momentum)));
        }
        Ok(Self { axis, momentum, estimate: None, updates: 0 })
    }

    pub fn per_tensor(momentum: f32) -> Result<Self> { Self::new(None, momentum) }

    pub fn per_axis(axis: isize, momentum: f32) -> Result<Self> { Self::new(Some(axis), momentum) }

    pub fn axis(&self) -> Option<isize> { self.axis }
    pub fn momentum(&self) -> f32 { self.momentum }
    pub fn is_initialized(&self) -> bool { self.estimate.is_some() }
    /// Number of updates applied after initialization.
    pub fn updates(&self) -> usize { self.updates }

    fn batch_max(&self, batch: &Tensor) -> Result<RangeEstimate> {
        match self.axis {
            None => Ok(RangeEstimate::PerTensor(batch.max_abs())),
            Some(a) => Ok(RangeEstimate::PerAxis(batch.max_abs_along(a)?)),
        }
    }

    pub fn initialize(&mut self, first_batch: &Tensor) -> Result<()> {
        if self.estimate.is_some() {
            return Err(CalibError::state("range estimator already initialized"));
        }
        self.estimate = Some(self.batch_max(first_batch)?);
        Ok(())
    }

    pub fn update(&mut self, batch: &Tensor) -> Result<()> {
        if self.estimate.is_none() {
            return Err(CalibError::state("update called before initialize"));
        }
        let batch_max = self.batch_max(batch)?;
        let m = self.momentum;
        let prev = self.estimate.as_mut().ok_or_else(|| CalibError::state("update called before initialize"))?;
        match (prev, batch_max) {
            (RangeEstimate::PerTensor(p), RangeEstimate::PerTensor(b)) => {
                *p = moving_max(*p, b, m);
            }
            (RangeEstimate::PerAxis(p), RangeEstimate::PerAxis(b)) => {
                if p.len() != b.len() {
                    return Err(CalibError::shape(format!("batch axis has {} channels, estimate has {}", b.len(), p.len())));
                }
                for (pv, bv) in p.iter_mut().zip(b) { *pv = moving_max(*pv, bv, m); }
            }
            _ => return Err(CalibError::shape("per-tensor/per-axis estimate kind changed")),
        }
        self.updates += 1;
        Ok(())
    }

    /// Initialize on the first batch, update afterwards.
    pub fn observe(&mut self, batch: &Tensor) -> Result<()> {
        if self.estimate.is_none() { self.initialize(batch) } else { self.update(batch) }
    }

    pub fn current(&self) -> Option<&RangeEstimate> { self.estimate.as_ref() }

    /// End of calibration: hand out the estimate for read-only use.
    pub fn freeze(self) -> Result<RangeEstimate> {
        self.estimate.ok_or_else(|| CalibError::state("range estimator never observed a batch"))
    }
}
