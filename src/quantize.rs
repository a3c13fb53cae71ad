use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::calibration::{calibrate, BatchObserver, CalibrationParams, CalibrationStats, RandomSamples, RangeEstimate, RangeEstimator, SampleSource};
use crate::config::{resolve, LayerConfig, QConfig, QuantAxis, QuantizationParams, QuantizerConfig};
use crate::error::{CalibError, Result};
use crate::model::{dense_forward, Layer, LayerKind, Model};
use crate::quant::{fake_quantize, quantize_value, scale_for};
use crate::tensor::Tensor;

/// Symmetric integer weights for a Dense kernel (input_dim x units, row-major).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedWeights {
    pub bits: u32,
    pub axis: QuantAxis,
    pub input_dim: usize,
    pub units: usize,
    /// One scale per channel along `axis`, or a single scale.
    pub scales: Vec<f32>,
    /// i64 so unsigned 32-bit values fit.
    pub values: Vec<i64>,
}

impl QuantizedWeights {
    pub fn quantize(weights: &[f32], input_dim: usize, units: usize, cfg: &QuantizerConfig) -> Result<Self> {
        let (bits, signed) = (cfg.bitwidth, cfg.signed);
        // kernel axes: 0 = inputs, 1 = units
        let axis = match cfg.axis {
            QuantAxis::PerTensor => None,
            QuantAxis::PerAxis(a) => Some(match a { 0 | -2 => 0usize, 1 | -1 => 1, other => {
                return Err(CalibError::shape(format!("axis {} out of range for a 2-d kernel", other)));
            } }),
        };
        if units == 0 || weights.len() != input_dim * units {
            return Err(CalibError::shape(format!("{} weights do not form a {}x{} kernel", weights.len(), input_dim, units)));
        }
        let channel_of = |i: usize| -> usize { match axis { None => 0, Some(0) => i / units, Some(_) => i % units } };
        let channels = match axis { None => 1, Some(0) => input_dim, Some(_) => units };
        // one pass over the kernel rows, per-row partial maxima merged at the end
        let maxima = weights
            .par_chunks(units)
            .enumerate()
            .fold(|| vec![0.0f32; channels], |mut acc, (r, row)| {
                match axis {
                    None => acc[0] = row.iter().fold(acc[0], |m, w| m.max(w.abs())),
                    Some(0) => acc[r] = row.iter().fold(acc[r], |m, w| m.max(w.abs())),
                    Some(_) => for (a, w) in acc.iter_mut().zip(row) { *a = a.max(w.abs()); },
                }
                acc
            })
            .reduce(|| vec![0.0f32; channels], |mut a, b| {
                for (x, y) in a.iter_mut().zip(b) { *x = x.max(y); }
                a
            });
        let scales: Vec<f32> = maxima.into_iter().map(|m| scale_for(m, bits, signed)).collect();
        let values = weights.par_iter().enumerate().map(|(i, w)| quantize_value(*w, scales[channel_of(i)], bits, signed)).collect();
        Ok(Self { bits, axis: cfg.axis, input_dim, units, scales, values })
    }

    /// Consistency of a deserialized kernel.
    pub fn validate(&self, layer: &str) -> Result<()> {
        if !(1..=32).contains(&self.bits) {
            return Err(CalibError::config(format!("{}: weight bitwidth {} outside 1..=32", layer, self.bits)));
        }
        if self.values.len() != self.input_dim * self.units {
            return Err(CalibError::shape(format!("{}: {} weight values for a {}x{} kernel", layer, self.values.len(), self.input_dim, self.units)));
        }
        let channels = match self.axis {
            QuantAxis::PerTensor => 1,
            QuantAxis::PerAxis(0) | QuantAxis::PerAxis(-2) => self.input_dim,
            QuantAxis::PerAxis(1) | QuantAxis::PerAxis(-1) => self.units,
            QuantAxis::PerAxis(a) => return Err(CalibError::shape(format!("{}: axis {} out of range for a 2-d kernel", layer, a))),
        };
        if self.scales.len() != channels {
            return Err(CalibError::shape(format!("{}: {} weight scales, expected {}", layer, self.scales.len(), channels)));
        }
        Ok(())
    }

    fn scale_at(&self, i: usize) -> f32 {
        match self.axis {
            QuantAxis::PerTensor => self.scales[0],
            QuantAxis::PerAxis(0) | QuantAxis::PerAxis(-2) => self.scales[i / self.units],
            QuantAxis::PerAxis(_) => self.scales[i % self.units],
        }
    }

    pub fn dequantize(&self) -> Vec<f32> {
        self.values.iter().enumerate().map(|(i, q)| *q as f32 * self.scale_at(i)).collect()
    }
}

/// Output quantizer with its calibrated, frozen range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputQuantizer {
    pub bits: u32,
    pub signed: bool,
    pub axis: QuantAxis,
    pub range_max: RangeEstimate,
}

impl OutputQuantizer {
    /// Consistency of a deserialized quantizer.
    pub fn validate(&self, layer: &str) -> Result<()> {
        if !(1..=32).contains(&self.bits) {
            return Err(CalibError::config(format!("{}: output bitwidth {} outside 1..=32", layer, self.bits)));
        }
        match (self.axis, &self.range_max) {
            (_, r) if r.is_empty() => Err(CalibError::shape(format!("{}: empty range_max", layer))),
            (QuantAxis::PerTensor, r) if r.len() != 1 => {
                Err(CalibError::shape(format!("{}: per-tensor quantizer with {} ranges", layer, r.len())))
            }
            _ => Ok(()),
        }
    }

    pub fn scales(&self) -> Vec<f32> {
        self.range_max.as_vec().into_iter().map(|m| scale_for(m, self.bits, self.signed)).collect()
    }

    /// Fake-quantize `x` in place using the calibrated range.
    pub fn apply(&self, x: &mut Tensor) -> Result<()> {
        let scales = self.scales();
        match self.axis.axis() {
            None => {
                if scales.len() != 1 {
                    return Err(CalibError::shape(format!("per-tensor quantizer holds {} ranges", scales.len())));
                }
                let s = scales[0];
                let (b, sg) = (self.bits, self.signed);
                x.map_inplace(|v| fake_quantize(v, s, b, sg));
            }
            Some(a) => {
                let a = x.resolve_axis(a)?;
                let size = x.shape[a];
                if size != scales.len() {
                    return Err(CalibError::shape(format!("output has {} channels, quantizer was calibrated on {}", size, scales.len())));
                }
                let inner: usize = x.shape[a + 1..].iter().product();
                for (i, v) in x.data.iter_mut().enumerate() {
                    let s = scales[(i / inner.max(1)) % size];
                    *v = fake_quantize(*v, s, self.bits, self.signed);
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedLayer {
    pub name: String,
    pub kind: LayerKind,
    pub config: Option<LayerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<QuantizedWeights>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_quantizer: Option<OutputQuantizer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedModel {
    pub name: String,
    pub input_shape: Vec<usize>,
    pub layers: Vec<QuantizedLayer>,
}

impl QuantizedModel {
    pub fn layer(&self, name: &str) -> Option<&QuantizedLayer> { self.layers.iter().find(|l| l.name == name) }

    /// Effective per-layer configuration, ready to be edited and fed back to `quantize`.
    pub fn dump_config(&self) -> QConfig {
        let mut out = QConfig::default();
        for l in &self.layers {
            if let Some(cfg) = &l.config { out.insert(&l.name, cfg.clone()); }
        }
        out
    }

    /// Forward pass with quantized weights and calibrated output quantizers.
    pub fn predict(&self, x: &Tensor) -> Result<Tensor> {
        if x.rank() != self.input_shape.len() + 1 || x.shape[1..] != self.input_shape[..] {
            return Err(CalibError::shape(format!("model {} expects samples of shape {:?}, got batch {:?}", self.name, self.input_shape, x.shape)));
        }
        let mut cur = x.clone();
        for l in &self.layers {
            cur = match (&l.kind, &l.weights) {
                (LayerKind::Dense { units, bias, .. }, Some(qw)) => dense_forward(&l.name, &cur, *units, &qw.dequantize(), bias)?,
                _ => Layer { name: l.name.clone(), kind: l.kind.clone() }.forward(&cur)?,
            };
            if let Some(oq) = &l.output_quantizer { oq.apply(&mut cur)?; }
        }
        Ok(cur)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let p = path.as_ref();
        let io_err = |source| CalibError::Io { path: p.to_path_buf(), source };
        let mut w = BufWriter::new(File::create(p).map_err(io_err)?);
        serde_json::to_writer_pretty(&mut w, self).map_err(|source| CalibError::Json { path: p.to_path_buf(), source })?;
        w.flush().map_err(io_err)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let f = File::open(p).map_err(|source| CalibError::Io { path: p.to_path_buf(), source })?;
        let m: QuantizedModel = serde_json::from_reader(BufReader::new(f)).map_err(|source| CalibError::Json { path: p.to_path_buf(), source })?;
        m.validate()?;
        Ok(m)
    }

    /// Reject hand-edited files whose quantizers disagree with their layers.
    pub fn validate(&self) -> Result<()> {
        let mut ch = self.input_shape.last().copied().unwrap_or(0);
        for l in &self.layers {
            if let Some(cfg) = &l.config { cfg.validate(&l.name)?; }
            let out_ch = match &l.kind { LayerKind::Dense { units, .. } => *units, _ => ch };
            if let Some(qw) = &l.weights {
                qw.validate(&l.name)?;
                if !matches!(l.kind, LayerKind::Dense { .. }) || qw.input_dim != ch || qw.units != out_ch {
                    return Err(CalibError::shape(format!("{}: {}x{} quantized kernel does not match a {}x{} layer", l.name, qw.input_dim, qw.units, ch, out_ch)));
                }
            }
            if let Some(oq) = &l.output_quantizer {
                oq.validate(&l.name)?;
                if matches!(oq.axis, QuantAxis::PerAxis(-1)) && oq.range_max.len() != out_ch {
                    return Err(CalibError::shape(format!("{}: {} ranges for {} output channels", l.name, oq.range_max.len(), out_ch)));
                }
            }
            ch = out_ch;
        }
        Ok(())
    }
}

/// Feeds each calibration batch through the float model and tracks the output
/// range of every layer that carries an output quantizer.
pub struct ModelCalibrator<'a> {
    model: &'a Model,
    estimators: Vec<Option<RangeEstimator>>,
}

impl<'a> ModelCalibrator<'a> {
    pub fn new(model: &'a Model, config: &QConfig, momentum: f32) -> Result<Self> {
        let mut estimators = Vec::with_capacity(model.layers.len());
        for l in &model.layers {
            let est = match config.get(&l.name).and_then(|c| c.output_quantizer.as_ref()) {
                Some(oq) => Some(RangeEstimator::new(oq.axis.axis(), momentum)?),
                None => None,
            };
            estimators.push(est);
        }
        Ok(Self { model, estimators })
    }

    pub fn tracked_layers(&self) -> usize { self.estimators.iter().filter(|e| e.is_some()).count() }

    pub fn estimate(&self, layer: usize) -> Option<&RangeEstimate> {
        self.estimators.get(layer).and_then(|e| e.as_ref()).and_then(|e| e.current())
    }

    /// Stop calibrating and return the frozen ranges, indexed by layer.
    pub fn finish(self) -> Result<Vec<Option<RangeEstimate>>> {
        self.estimators.into_iter().map(|e| e.map(|e| e.freeze()).transpose()).collect()
    }
}

impl BatchObserver for ModelCalibrator<'_> {
    fn observe(&mut self, batch: &Tensor) -> Result<()> {
        let estimators = &mut self.estimators;
        self.model.forward_collect(batch, |i, _, out| {
            match estimators[i].as_mut() { Some(e) => e.observe(out), None => Ok(()) }
        })?;
        Ok(())
    }
}

/// Quantize `model` and calibrate its output quantizers.
///
/// `q_config` entries take priority over `qparams`. Without `samples`,
/// `calib.num_samples` random samples sized for the model input are generated
/// once and cycled like a real sample set.
pub fn quantize(
    model: &Model,
    qparams: &QuantizationParams,
    q_config: Option<&QConfig>,
    samples: Option<&mut dyn SampleSource>,
    calib: &CalibrationParams,
) -> Result<(QuantizedModel, Option<CalibrationStats>)> {
    model.validate()?;
    let config = resolve(model, qparams, q_config)?;

    let mut calibrator = ModelCalibrator::new(model, &config, calib.momentum)?;
    let stats = if calibrator.tracked_layers() == 0 {
        warn!("model {} has no output quantizers; skipping calibration", model.name);
        None
    } else {
        let mut random;
        let source: &mut dyn SampleSource = match samples {
            Some(s) => s,
            None => {
                info!("no calibration samples given, generating {} random samples for input {:?}", calib.num_samples, model.input_shape);
                random = RandomSamples::new(model.input_shape.clone(), calib.seed)?.into_sample_set(calib.num_samples)?;
                &mut random
            }
        };
        Some(calibrate(source, &mut calibrator, calib)?)
    };
    let ranges = calibrator.finish()?;

    let mut layers = Vec::with_capacity(model.layers.len());
    let mut in_ch = model.input_channels();
    for (l, range) in model.layers.iter().zip(ranges) {
        let cfg = config.get(&l.name).cloned();
        let weights = match (&l.kind, cfg.as_ref().and_then(|c| c.weight_quantizer.as_ref())) {
            (LayerKind::Dense { units, weights, .. }, Some(wq)) => Some(QuantizedWeights::quantize(weights, in_ch, *units, wq)?),
            _ => None,
        };
        let output_quantizer = match (cfg.as_ref().and_then(|c| c.output_quantizer.as_ref()), range) {
            (Some(oq), Some(range_max)) => Some(OutputQuantizer { bits: oq.bitwidth, signed: oq.signed, axis: oq.axis, range_max }),
            _ => None,
        };
        layers.push(QuantizedLayer { name: l.name.clone(), kind: l.kind.clone(), config: cfg, weights, output_quantizer });
        in_ch = l.output_channels(in_ch);
    }
    info!("quantized model {} ({} configured layers)", model.name, config.len());
    Ok((QuantizedModel { name: model.name.clone(), input_shape: model.input_shape.clone(), layers }, stats))
}
