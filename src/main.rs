use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use quantcal::calibration::{CalibrationParams, SampleSet, SampleSource};
use quantcal::config::{QConfig, QuantizationParams};
use quantcal::model::Model;
use quantcal::quantize::{quantize, QuantizedModel};

#[derive(Parser, Debug)]
#[command(name = "quantcal", author, version, about = "Quantize and calibrate sequential float models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Quantize a float model, calibrating its output quantizers
    Quantize(QuantizeArgs),
    /// Print the quantization configuration of a quantized model
    #[command(name = "dump-config")]
    DumpConfig {
        /// Quantized model (.json)
        #[arg(short, long)]
        model: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct QuantizeArgs {
    /// Model to quantize
    #[arg(short, long)]
    model: PathBuf,
    /// Quantization configuration file; has priority over the bitwidth flags
    #[arg(short = 'c', long = "quantization_config")]
    quantization_config: Option<PathBuf>,
    /// Activation quantization bitwidth
    #[arg(short = 'a', long = "activation_bits", default_value_t = 8)]
    activation_bits: u32,
    /// Quantize activations per-tensor
    #[arg(long = "per_tensor_activations")]
    per_tensor_activations: bool,
    /// Weight quantization bitwidth
    #[arg(short = 'w', long = "weight_bits", default_value_t = 8)]
    weight_bits: u32,
    /// Input layer weight quantization bitwidth
    #[arg(short = 'i', long = "input_weight_bits", default_value_t = 8)]
    input_weight_bits: u32,
    /// Intermediate output quantization bitwidth
    #[arg(short = 'o', long = "output_bits", default_value_t = 8)]
    output_bits: u32,
    /// Buffer quantization bitwidth
    #[arg(short = 'b', long = "buffer_bits", default_value_t = 32)]
    buffer_bits: u32,
    /// Name for saving the quantized model
    #[arg(short = 's', long = "save_name")]
    save_name: Option<PathBuf>,
    /// Set of samples to calibrate the model (.json)
    #[arg(long)]
    samples: Option<PathBuf>,
    /// Number of samples to use for calibration; with --samples it only sets the step count
    #[arg(long = "num_samples", default_value_t = 1024)]
    num_samples: usize,
    /// Batch size for calibration
    #[arg(long = "batch_size")]
    batch_size: Option<usize>,
    /// Number of epochs for calibration
    #[arg(short = 'e', long, default_value_t = 2)]
    epochs: usize,
    /// Moving-maximum momentum in [0, 1); higher values smooth more
    #[arg(long, default_value_t = 0.9)]
    momentum: f32,
    /// Seed for random calibration samples
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Hide the calibration progress bar
    #[arg(long = "no_progress")]
    no_progress: bool,
}

fn run_quantize(a: QuantizeArgs) -> Result<()> {
    let model = Model::load(&a.model).with_context(|| format!("load model {}", a.model.display()))?;
    let qparams = QuantizationParams {
        input_weight_bits: a.input_weight_bits,
        weight_bits: a.weight_bits,
        activation_bits: a.activation_bits,
        per_tensor_activations: a.per_tensor_activations,
        output_bits: a.output_bits,
        buffer_bits: a.buffer_bits,
    };
    let q_config = match &a.quantization_config {
        Some(p) => Some(QConfig::load(p).with_context(|| format!("load quantization config {}", p.display()))?),
        None => None,
    };
    let mut sample_set = match &a.samples {
        Some(p) => Some(SampleSet::load(p).with_context(|| format!("load samples {}", p.display()))?),
        None => None,
    };
    let calib = CalibrationParams {
        num_samples: a.num_samples,
        batch_size: a.batch_size,
        epochs: a.epochs,
        momentum: a.momentum,
        show_progress: !a.no_progress,
        seed: a.seed,
    };
    eprintln!("Quantizing {} ({} layers, steps={}, epochs={})", model.name, model.layers.len(), calib.steps(), calib.epochs);
    let (qmodel, stats) = quantize(&model, &qparams, q_config.as_ref(), sample_set.as_mut().map(|s| s as &mut dyn SampleSource), &calib)?;
    if let Some(st) = stats {
        eprintln!("Calibrated on {} batches ({} samples)", st.batches, st.samples);
    }
    for l in &qmodel.layers {
        if let Some(oq) = &l.output_quantizer {
            info!("{}: range_max {:?}", l.name, oq.range_max.as_vec());
        }
    }
    let save = a.save_name.clone().unwrap_or_else(|| {
        let stem = a.model.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| model.name.clone());
        a.model.with_file_name(format!("{}_quantized.json", stem))
    });
    qmodel.save(&save).with_context(|| format!("save quantized model {}", save.display()))?;
    eprintln!("Saved quantized model to {}", save.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Quantize(a) => run_quantize(a),
        Command::DumpConfig { model } => {
            let q = QuantizedModel::load(&model).with_context(|| format!("load quantized model {}", model.display()))?;
            println!("{}", q.dump_config().to_json_pretty()?);
            Ok(())
        }
    }
}
