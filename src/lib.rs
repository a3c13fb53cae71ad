// Post-training quantization with moving-maximum calibration
pub mod error;
pub mod tensor;
pub mod calibration;
pub mod config;
pub mod model;
pub mod quant;
pub mod quantize;

pub use calibration::{calibrate, CalibrationParams, RangeEstimate, RangeEstimator};
pub use config::{QConfig, QuantizationParams};
pub use error::{CalibError, Result};
pub use model::Model;
pub use quantize::{quantize, QuantizedModel};
pub use tensor::Tensor;
