//! Float reference model.
//!
//! A small sequential network whose intermediate outputs are what calibration observes.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CalibError, Result};
use crate::tensor::Tensor;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LayerKind {
    /// `weights` is (input_dim x units), row-major.
    Dense { units: usize, weights: Vec<f32>, bias: Vec<f32> },
    #[serde(rename = "ReLU")]
    Relu {
        #[serde(default)]
        max_value: Option<f32>,
    },
    Rescaling { scale: f32, offset: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    #[serde(flatten)]
    pub kind: LayerKind,
}

impl Layer {
    pub fn dense(name: &str, input_dim: usize, units: usize, weights: Vec<f32>, bias: Vec<f32>) -> Result<Self> {
        if weights.len() != input_dim * units || bias.len() != units {
            return Err(CalibError::shape(format!("dense {}: {} weights / {} biases for {}x{}", name, weights.len(), bias.len(), input_dim, units)));
        }
        Ok(Self { name: name.to_string(), kind: LayerKind::Dense { units, weights, bias } })
    }

    pub fn relu(name: &str) -> Self { Self { name: name.to_string(), kind: LayerKind::Relu { max_value: None } } }

    pub fn rescaling(name: &str, scale: f32, offset: f32) -> Self {
        Self { name: name.to_string(), kind: LayerKind::Rescaling { scale, offset } }
    }

    pub fn is_dense(&self) -> bool { matches!(self.kind, LayerKind::Dense { .. }) }
    pub fn is_relu(&self) -> bool { matches!(self.kind, LayerKind::Relu { .. }) }

    /// Output channel count given the input channel count.
    pub fn output_channels(&self, input_channels: usize) -> usize {
        match &self.kind { LayerKind::Dense { units, .. } => *units, _ => input_channels }
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match &self.kind {
            LayerKind::Dense { units, weights, bias } => dense_forward(&self.name, x, *units, weights, bias),
            LayerKind::Relu { max_value } => {
                let mut y = x.clone();
                let cap = max_value.unwrap_or(f32::INFINITY);
                y.map_inplace(|v| v.max(0.0).min(cap));
                Ok(y)
            }
            LayerKind::Rescaling { scale, offset } => {
                let mut y = x.clone();
                let (s, o) = (*scale, *offset);
                y.map_inplace(|v| v * s + o);
                Ok(y)
            }
        }
    }
}

/// Dense over the last dimension: y[.., u] = sum_i x[.., i] * w[i, u] + b[u].
pub fn dense_forward(name: &str, x: &Tensor, units: usize, weights: &[f32], bias: &[f32]) -> Result<Tensor> {
    let in_dim = x.last_dim();
    if in_dim * units != weights.len() {
        return Err(CalibError::shape(format!("dense {}: input has {} channels, kernel expects {}", name, in_dim, weights.len() / units.max(1))));
    }
    let rows = if in_dim == 0 { 0 } else { x.len() / in_dim };
    let mut shape = x.shape.clone();
    if let Some(last) = shape.last_mut() { *last = units; }
    let mut out = Vec::with_capacity(rows * units);
    for r in 0..rows {
        let xr = &x.data[r * in_dim..(r + 1) * in_dim];
        for u in 0..units {
            let mut acc = bias[u];
            for (i, xv) in xr.iter().enumerate() { acc += xv * weights[i * units + u]; }
            out.push(acc);
        }
    }
    Tensor::new(shape, out)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Model {
    pub name: String,
    /// Per-sample input shape (no batch dimension); the last entry is the channel count.
    pub input_shape: Vec<usize>,
    pub layers: Vec<Layer>,
}

impl Model {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let f = File::open(p).map_err(|source| CalibError::Io { path: p.to_path_buf(), source })?;
        let m: Model = serde_json::from_reader(BufReader::new(f)).map_err(|source| CalibError::Json { path: p.to_path_buf(), source })?;
        m.validate()?;
        Ok(m)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_shape.is_empty() {
            return Err(CalibError::config(format!("model {} has an empty input shape", self.name)));
        }
        let mut seen = std::collections::HashSet::new();
        let mut ch = self.input_channels();
        for l in &self.layers {
            if !seen.insert(l.name.as_str()) {
                return Err(CalibError::config(format!("duplicate layer name {}", l.name)));
            }
            if let LayerKind::Dense { units, weights, bias } = &l.kind {
                if bias.len() != *units || weights.len() != ch * units {
                    return Err(CalibError::shape(format!("dense {}: expected {}x{} kernel and {} biases", l.name, ch, units, units)));
                }
            }
            ch = l.output_channels(ch);
        }
        Ok(())
    }

    pub fn input_channels(&self) -> usize { self.input_shape.last().copied().unwrap_or(0) }

    pub fn layer(&self, name: &str) -> Option<&Layer> { self.layers.iter().find(|l| l.name == name) }

    fn check_input(&self, x: &Tensor) -> Result<()> {
        if x.rank() != self.input_shape.len() + 1 || x.shape[1..] != self.input_shape[..] {
            return Err(CalibError::shape(format!("model {} expects samples of shape {:?}, got batch {:?}", self.name, self.input_shape, x.shape)));
        }
        Ok(())
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.forward_collect(x, |_, _, _| Ok(()))
    }

    /// Forward pass calling `visit(layer_index, layer, output)` after every layer.
    pub fn forward_collect<F>(&self, x: &Tensor, mut visit: F) -> Result<Tensor>
    where
        F: FnMut(usize, &Layer, &Tensor) -> Result<()>,
    {
        self.check_input(x)?;
        let mut cur = x.clone();
        for (i, l) in self.layers.iter().enumerate() {
            cur = l.forward(&cur)?;
            visit(i, l, &cur)?;
        }
        Ok(cur)
    }
}
