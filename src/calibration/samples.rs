use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::debug;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};

use crate::error::{CalibError, Result};
use crate::tensor::Tensor;

/// Endless supply of calibration batches.
pub trait SampleSource {
    /// Next `batch_size` samples; wraps around when the source runs out.
    fn next_batch(&mut self, batch_size: usize) -> Result<Tensor>;
    /// Shape of one sample (without the batch dimension).
    fn sample_shape(&self) -> &[usize];
}

/// Real calibration samples held in memory.
#[derive(Debug, Clone)]
pub struct SampleSet {
    samples: Tensor,
    cursor: usize,
}

impl SampleSet {
    pub fn new(samples: Tensor) -> Result<Self> {
        if samples.rank() < 2 || samples.batch_size() == 0 {
            return Err(CalibError::config(format!("sample set needs at least one sample, got shape {:?}", samples.shape)));
        }
        Ok(Self { samples, cursor: 0 })
    }

    /// Read `{"shape": [n, ...], "data": [...]}`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let f = File::open(p).map_err(|source| CalibError::Io { path: p.to_path_buf(), source })?;
        let t: Tensor = serde_json::from_reader(BufReader::new(f)).map_err(|source| CalibError::Json { path: p.to_path_buf(), source })?;
        let t = Tensor::new(t.shape, t.data)?;
        debug!("loaded {} calibration samples of shape {:?} from {}", t.batch_size(), &t.shape[1..], p.display());
        Self::new(t)
    }

    pub fn len(&self) -> usize { self.samples.batch_size() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
    pub fn tensor(&self) -> &Tensor { &self.samples }
}

impl SampleSource for SampleSet {
    fn next_batch(&mut self, batch_size: usize) -> Result<Tensor> {
        let n = self.len();
        let sl = self.samples.sample_len();
        let mut shape = self.samples.shape.clone();
        shape[0] = batch_size;
        let mut data = Vec::with_capacity(batch_size * sl);
        for _ in 0..batch_size {
            data.extend_from_slice(&self.samples.data[self.cursor * sl..(self.cursor + 1) * sl]);
            self.cursor = (self.cursor + 1) % n;
        }
        Tensor::new(shape, data)
    }

    fn sample_shape(&self) -> &[usize] { &self.samples.shape[1..] }
}

/// Synthetic integer-valued samples.
///
/// Inputs with 1 or 3 channels look like images and get values in [0, 255];
/// anything else gets signed 8-bit values in [-128, 127].
pub struct RandomSamples {
    shape: Vec<usize>,
    dist: Uniform<i32>,
    rng: SmallRng,
}

impl RandomSamples {
    pub fn new(sample_shape: Vec<usize>, seed: u64) -> Result<Self> {
        if sample_shape.is_empty() || sample_shape.contains(&0) {
            return Err(CalibError::config(format!("cannot generate samples for input shape {:?}", sample_shape)));
        }
        let dist = match sample_shape.last() {
            Some(1) | Some(3) => Uniform::new_inclusive(0, 255),
            _ => Uniform::new_inclusive(-128, 127),
        };
        Ok(Self { shape: sample_shape, dist, rng: SmallRng::seed_from_u64(seed) })
    }

    /// Draw `count` samples once and freeze them into a cycling set, so every
    /// epoch replays the same data.
    pub fn into_sample_set(mut self, count: usize) -> Result<SampleSet> {
        SampleSet::new(self.next_batch(count)?)
    }

    /// Inclusive value range used for this input shape.
    pub fn value_range(sample_shape: &[usize]) -> (i32, i32) {
        match sample_shape.last() { Some(1) | Some(3) => (0, 255), _ => (-128, 127) }
    }
}

impl SampleSource for RandomSamples {
    fn next_batch(&mut self, batch_size: usize) -> Result<Tensor> {
        let mut shape = Vec::with_capacity(self.shape.len() + 1);
        shape.push(batch_size);
        shape.extend_from_slice(&self.shape);
        let n: usize = shape.iter().product();
        let data = (0..n).map(|_| self.dist.sample(&mut self.rng) as f32).collect();
        Tensor::new(shape, data)
    }

    fn sample_shape(&self) -> &[usize] { &self.shape }
}

/// Draw `count` samples from any source into one tensor and write it as JSON.
pub fn write_samples<P: AsRef<Path>>(source: &mut dyn SampleSource, count: usize, path: P) -> Result<Tensor> {
    let t = source.next_batch(count)?;
    let p = path.as_ref();
    let io_err = |source| CalibError::Io { path: p.to_path_buf(), source };
    let mut w = BufWriter::new(File::create(p).map_err(io_err)?);
    serde_json::to_writer(&mut w, &t).map_err(|source| CalibError::Json { path: p.to_path_buf(), source })?;
    w.flush().map_err(io_err)?;
    Ok(t)
}
