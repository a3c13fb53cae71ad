pub mod estimator;
pub mod samples;

use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use crate::error::{CalibError, Result};
use crate::tensor::Tensor;
pub use estimator::{RangeEstimate, RangeEstimator};
pub use samples::{RandomSamples, SampleSet, SampleSource};

#[derive(Debug, Clone)]
pub struct CalibrationParams {
    pub num_samples: usize,
    pub batch_size: Option<usize>, // None => one sample per step
    pub epochs: usize,
    pub momentum: f32,
    pub show_progress: bool,
    /// Seed for synthetic samples.
    pub seed: u64,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self { num_samples: 1024, batch_size: Some(100), epochs: 2, momentum: 0.9, show_progress: false, seed: 0 }
    }
}

impl CalibrationParams {
    pub fn steps(&self) -> usize {
        match self.batch_size {
            Some(bs) if bs > 0 => self.num_samples.div_ceil(bs),
            _ => self.num_samples,
        }
    }

    /// Samples drawn per step.
    pub fn effective_batch_size(&self) -> usize { self.batch_size.unwrap_or(1) }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == Some(0) { return Err(CalibError::config("batch_size must be positive")); }
        if self.epochs == 0 { return Err(CalibError::config("epochs must be positive")); }
        if self.steps() == 0 { return Err(CalibError::config("num_samples must be positive")); }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(CalibError::config(format!("momentum must be in [0, 1), got {}", self.momentum)));
        }
        Ok(())
    }
}

/// Anything that consumes calibration batches in order.
pub trait BatchObserver {
    fn observe(&mut self, batch: &Tensor) -> Result<()>;
}

impl BatchObserver for RangeEstimator {
    fn observe(&mut self, batch: &Tensor) -> Result<()> { RangeEstimator::observe(self, batch) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationStats {
    pub epochs: usize,
    pub steps: usize,
    pub batches: usize,
    pub samples: usize,
}

/// Run `epochs x steps` batches from `source` through `observer`.
///
/// The first batch initializes the observer's estimates; the rest update them.
/// Errors abort the run immediately.
pub fn calibrate(source: &mut dyn SampleSource, observer: &mut dyn BatchObserver, params: &CalibrationParams) -> Result<CalibrationStats> {
    params.validate()?;
    let steps = params.steps();
    let bs = params.effective_batch_size();
    let total = (params.epochs * steps) as u64;
    let pb = if params.show_progress {
        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::with_template("calibrating [{bar:40}] {pos}/{len} batches ({elapsed})") {
            pb.set_style(style);
        }
        pb
    } else {
        ProgressBar::hidden()
    };
    info!("calibration: {} epochs x {} steps, batch size {}, momentum {}", params.epochs, steps, bs, params.momentum);
    let mut stats = CalibrationStats { epochs: params.epochs, steps, batches: 0, samples: 0 };
    for _epoch in 0..params.epochs {
        for _step in 0..steps {
            let batch = source.next_batch(bs)?;
            observer.observe(&batch)?;
            stats.batches += 1;
            stats.samples += batch.batch_size();
            pb.inc(1);
        }
    }
    pb.finish_and_clear();
    info!("calibration done: {} batches, {} samples", stats.batches, stats.samples);
    Ok(stats)
}
