use anyhow::Context;
use clap::Parser;
use quantcal::calibration::samples::{write_samples, RandomSamples, SampleSource};
use quantcal::model::Model;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "quantcal-random-samples", about = "Write a file of synthetic random calibration samples for a model input (no dataset extraction)")]
struct Args {
    /// Float model whose input shape sizes the samples
    #[arg(short, long)]
    model: PathBuf,
    /// Number of samples to generate
    #[arg(long = "num_samples", default_value_t = 1024)]
    num_samples: usize,
    /// Random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Output samples file (.json)
    #[arg(long, default_value = "samples.json")]
    out: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let a = Args::parse();
    let model = Model::load(&a.model).with_context(|| format!("load model {}", a.model.display()))?;
    let mut src = RandomSamples::new(model.input_shape.clone(), a.seed)?;
    let (lo, hi) = RandomSamples::value_range(src.sample_shape());
    eprintln!("Generating {} samples of shape {:?} in [{}, {}]", a.num_samples, model.input_shape, lo, hi);
    let t = write_samples(&mut src, a.num_samples, &a.out)?;
    eprintln!("Wrote {} samples to {}", t.batch_size(), a.out.display());
    Ok(())
}
