use anyhow::{Context, Result};
use burn::backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu};
use clap::Parser;
use melspec_genre::{
    cli::{Args, Device},
    training::run,
};
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

fn main() -> Result<()> {
    let format = fmt::layer().with_target(false).compact();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .init();

    let args = Args::parse();
    let config = args.experiment_config().context("invalid arguments")?;
    let options = args.run_options();
    let backbone = config.model.backbone;

    let run_dir = match args.device {
        Device::Gpu => {
            type Backend = Autodiff<Wgpu<f32, i32>>;
            run::<Backend>(&options, &config, WgpuDevice::default())
        }
        Device::Cpu => {
            type Backend = Autodiff<NdArray<f32>>;
            run::<Backend>(&options, &config, NdArrayDevice::Cpu)
        }
    }
    .with_context(|| format!("{backbone} run failed"))?;

    info!(run_dir = %run_dir.display(), "done");
    Ok(())
}
