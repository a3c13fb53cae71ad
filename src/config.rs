//! Quantization scheme: global parameters and the per-layer JSON configuration.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::debug;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CalibError, Result};
use crate::model::Model;

/// Homogeneous scheme applied to every layer that has no explicit configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizationParams {
    pub input_weight_bits: u32,
    pub weight_bits: u32,
    pub activation_bits: u32,
    pub per_tensor_activations: bool,
    pub output_bits: u32,
    pub buffer_bits: u32,
}

impl Default for QuantizationParams {
    fn default() -> Self {
        Self { input_weight_bits: 8, weight_bits: 8, activation_bits: 8, per_tensor_activations: false, output_bits: 8, buffer_bits: 32 }
    }
}

/// Quantization granularity. In JSON: `"per-axis"` (channel axis -1), an integer axis,
/// or `null` / `"per-tensor"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantAxis {
    PerTensor,
    PerAxis(isize),
}

impl QuantAxis {
    pub const CHANNELS: QuantAxis = QuantAxis::PerAxis(-1);

    pub fn axis(&self) -> Option<isize> {
        match self { QuantAxis::PerTensor => None, QuantAxis::PerAxis(a) => Some(*a) }
    }
}

impl Default for QuantAxis {
    fn default() -> Self { QuantAxis::CHANNELS }
}

impl Serialize for QuantAxis {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            QuantAxis::PerTensor => s.serialize_none(),
            QuantAxis::PerAxis(-1) => s.serialize_str("per-axis"),
            QuantAxis::PerAxis(a) => s.serialize_i64(*a as i64),
        }
    }
}

impl<'de> Deserialize<'de> for QuantAxis {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr { Name(String), Index(i64) }
        match Option::<Repr>::deserialize(d)? {
            None => Ok(QuantAxis::PerTensor),
            Some(Repr::Index(a)) => Ok(QuantAxis::PerAxis(a as isize)),
            Some(Repr::Name(n)) => match n.as_str() {
                "per-axis" => Ok(QuantAxis::CHANNELS),
                "per-tensor" => Ok(QuantAxis::PerTensor),
                other => Err(serde::de::Error::custom(format!("unknown quantization axis '{}'", other))),
            },
        }
    }
}

fn default_signed() -> bool { true }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuantizerConfig {
    pub bitwidth: u32,
    #[serde(default)]
    pub axis: QuantAxis,
    #[serde(default = "default_signed")]
    pub signed: bool,
}

impl QuantizerConfig {
    pub fn new(bitwidth: u32, axis: QuantAxis, signed: bool) -> Self { Self { bitwidth, axis, signed } }

    pub fn validate(&self, what: &str) -> Result<()> {
        if !(1..=32).contains(&self.bitwidth) {
            return Err(CalibError::config(format!("{}: bitwidth {} outside 1..=32", what, self.bitwidth)));
        }
        if self.signed && self.bitwidth < 2 {
            return Err(CalibError::config(format!("{}: signed quantizer needs at least 2 bits", what)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_quantizer: Option<QuantizerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_quantizer: Option<QuantizerConfig>,
    pub buffer_bitwidth: u32,
}

impl LayerConfig {
    pub fn validate(&self, layer: &str) -> Result<()> {
        for (tag, q) in [("output_quantizer", &self.output_quantizer), ("weight_quantizer", &self.weight_quantizer)] {
            if let Some(q) = q {
                q.validate(&format!("{}.{}", layer, tag))?;
                if q.bitwidth > self.buffer_bitwidth {
                    return Err(CalibError::config(format!("{}.{}: bitwidth {} exceeds buffer_bitwidth {}", layer, tag, q.bitwidth, self.buffer_bitwidth)));
                }
            }
        }
        Ok(())
    }
}

/// Layer name -> configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QConfig(pub BTreeMap<String, LayerConfig>);

impl QConfig {
    pub fn get(&self, layer: &str) -> Option<&LayerConfig> { self.0.get(layer) }
    pub fn get_mut(&mut self, layer: &str) -> Option<&mut LayerConfig> { self.0.get_mut(layer) }
    pub fn insert(&mut self, layer: &str, cfg: LayerConfig) { self.0.insert(layer.to_string(), cfg); }
    pub fn remove(&mut self, layer: &str) -> Option<LayerConfig> { self.0.remove(layer) }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn layers(&self) -> impl Iterator<Item = &str> { self.0.keys().map(|k| k.as_str()) }

    pub fn from_json(s: &str) -> std::result::Result<Self, serde_json::Error> { serde_json::from_str(s) }

    pub fn to_json_pretty(&self) -> std::result::Result<String, serde_json::Error> { serde_json::to_string_pretty(self) }

    /// Strict load: a partial entry is an error, never filled from defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let f = File::open(p).map_err(|source| CalibError::Io { path: p.to_path_buf(), source })?;
        let cfg: QConfig = serde_json::from_reader(BufReader::new(f)).map_err(|source| CalibError::Json { path: p.to_path_buf(), source })?;
        for (name, lc) in &cfg.0 { lc.validate(name)?; }
        debug!("loaded quantization config for {} layers from {}", cfg.len(), p.display());
        Ok(cfg)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let p = path.as_ref();
        let io_err = |source| CalibError::Io { path: p.to_path_buf(), source };
        let mut w = BufWriter::new(File::create(p).map_err(io_err)?);
        serde_json::to_writer_pretty(&mut w, self).map_err(|source| CalibError::Json { path: p.to_path_buf(), source })?;
        w.flush().map_err(io_err)?;
        Ok(())
    }
}

/// Configuration derived from `qparams` for layer `idx` of `model`.
pub fn default_layer_config(model: &Model, idx: usize, qparams: &QuantizationParams) -> Option<LayerConfig> {
    let layer = &model.layers[idx];
    if layer.is_relu() {
        let axis = if qparams.per_tensor_activations { QuantAxis::PerTensor } else { QuantAxis::CHANNELS };
        return Some(LayerConfig {
            output_quantizer: Some(QuantizerConfig::new(qparams.activation_bits, axis, false)),
            weight_quantizer: None,
            buffer_bitwidth: qparams.buffer_bits,
        });
    }
    if layer.is_dense() {
        let first_weighted = !model.layers[..idx].iter().any(|l| l.is_dense());
        let wbits = if first_weighted { qparams.input_weight_bits } else { qparams.weight_bits };
        let followed_by_relu = model.layers.get(idx + 1).map(|l| l.is_relu()).unwrap_or(false);
        let output_quantizer = if followed_by_relu { None } else { Some(QuantizerConfig::new(qparams.output_bits, QuantAxis::CHANNELS, true)) };
        return Some(LayerConfig {
            output_quantizer,
            weight_quantizer: Some(QuantizerConfig::new(wbits, QuantAxis::CHANNELS, true)),
            buffer_bitwidth: qparams.buffer_bits,
        });
    }
    None
}

/// Effective configuration: explicit `q_config` entries win, the rest come from `qparams`.
pub fn resolve(model: &Model, qparams: &QuantizationParams, q_config: Option<&QConfig>) -> Result<QConfig> {
    if let Some(qc) = q_config {
        for name in qc.layers() {
            let layer = model.layer(name).ok_or_else(|| CalibError::config(format!("configuration names unknown layer '{}'", name)))?;
            if let Some(lc) = qc.get(name) {
                if lc.weight_quantizer.is_some() && !layer.is_dense() {
                    return Err(CalibError::config(format!("layer '{}' has no weights to quantize", name)));
                }
            }
        }
    }
    let mut out = QConfig::default();
    for (i, layer) in model.layers.iter().enumerate() {
        let cfg = match q_config.and_then(|qc| qc.get(&layer.name)) {
            Some(explicit) => Some(explicit.clone()),
            None => default_layer_config(model, i, qparams),
        };
        if let Some(cfg) = cfg {
            cfg.validate(&layer.name)?;
            out.insert(&layer.name, cfg);
        }
    }
    Ok(out)
}
