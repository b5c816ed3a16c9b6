mod config;
mod driver;
mod error;
mod metadata;
mod output;

use std::time::Instant;

use chrono::Local;
use fluxgen_core::FluxPipeline;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use config::RunConfig;
use error::{ConfigError, FluxGenError};
use output::{run_timestamp, OutputTemplate};

fn main() -> anyhow::Result<()> {
    let config = match RunConfig::parse_from(std::env::args_os()) {
        Ok(config) => config,
        // Prints help, version or usage errors the way clap normally does.
        Err(FluxGenError::Config(ConfigError::Arguments(e))) => e.exit(),
        Err(e) => return Err(e.into()),
    };

    let default_level = if config.load_options.silent {
        LevelFilter::WARN
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let template = OutputTemplate::new(
        config.output_path_template.as_deref(),
        &config.output_dir,
        run_timestamp(&Local::now()),
    );

    info!("loading model FLUX.1-{} ({}).", config.model, config.model.model_id());
    let start = Instant::now();
    let mut pipeline =
        FluxPipeline::load(config.model, &config.load_options).map_err(FluxGenError::ModelLoad)?;
    info!("model loaded in {:.2}s", start.elapsed().as_secs_f32());

    let results = driver::run(&config, &mut pipeline, &mut rand::thread_rng(), &template)?;
    for result in &results {
        info!(
            "seed {} -> {}{}",
            result.seed_used,
            result.output_path.display(),
            result
                .metadata_path
                .as_ref()
                .map(|p| format!(" (metadata {})", p.display()))
                .unwrap_or_default()
        );
    }
    info!("generated {} image(s).", results.len());

    Ok(())
}
