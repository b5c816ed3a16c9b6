use std::time::Instant;

use fluxgen_core::{
    DiffusionGenerationParams, FluxPipeline, FluxVariant, ImagePipeline, LoadOptions,
};

use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Args {
    /// Which model to use
    #[arg(long, value_enum, default_value_t = FluxVariant::Schnell)]
    which: FluxVariant,

    /// Prompt to use
    #[arg(short, long)]
    prompt: String,

    /// Seed for the initial noise
    #[arg(short, long, default_value_t = 0)]
    seed: u64,

    /// Load the full precision transformer
    #[arg(long)]
    no_quantize: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut pipeline = FluxPipeline::load(
        args.which,
        &LoadOptions {
            quantized: !args.no_quantize,
            ..Default::default()
        },
    )?;
    let variant = pipeline.variant();
    let num_steps = match variant {
        FluxVariant::Dev => 50,
        FluxVariant::Schnell => 4,
    };

    let start = Instant::now();

    let image = pipeline.generate(
        &args.prompt,
        &DiffusionGenerationParams {
            height: 720,
            width: 1280,
            num_steps,
            guidance_scale: variant.default_guidance_scale(),
            seed: args.seed,
        },
    )?;

    let end = Instant::now();
    println!(
        "FLUX.1-{variant} took: {:.2}s",
        end.duration_since(start).as_secs_f32()
    );

    image.save("image.png")?;

    Ok(())
}
