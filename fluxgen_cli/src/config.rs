use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use clap::Parser;
use fluxgen_core::{DiffusionGenerationParams, FluxVariant, LoadOptions, ModelDType, TokenSource};

use crate::error::{ConfigError, FluxGenError};

pub const DEFAULT_OUTPUT_DIR: &str = "/app/output";
/// Largest batch accepted by `--randgen`.
pub const MAX_RANDGEN: usize = 999;

/// `out/`, `./` and `out/..` name a directory, not a file.
fn names_a_file(path: &Path) -> bool {
    let ends_with_separator = path
        .as_os_str()
        .to_string_lossy()
        .ends_with(std::path::is_separator);
    !ends_with_separator && path.file_name().is_some()
}

#[derive(Parser, Debug)]
#[command(name = "fluxgen", version, about = "Generate images from a text prompt with FLUX.1")]
pub struct Args {
    /// Text prompt for image generation
    #[arg(short, long)]
    prompt: String,

    /// Image width, a multiple of 16
    #[arg(long, default_value_t = 512)]
    width: usize,

    /// Image height, a multiple of 16
    #[arg(long, default_value_t = 512)]
    height: usize,

    /// Number of denoising steps. A higher number of steps often means higher quality.
    #[arg(long, default_value_t = 20)]
    steps: usize,

    /// Seed for reproducible generation
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Generate this many images, each with its own random seed. Overrides `--seed`.
    #[arg(long, value_name = "COUNT")]
    randgen: Option<usize>,

    /// Output file path. With `--randgen`, a `-NNN` sequence number is inserted before the extension.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Which model to use
    #[arg(short, long, value_enum, default_value_t = FluxVariant::Dev)]
    model: FluxVariant,

    /// Write a JSON metadata file next to every image
    #[arg(long)]
    meta: bool,

    /// Directory for timestamped file names, used when `--output` is not given
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Guidance scale. Defaults to 3.5 for dev; schnell ignores it.
    #[arg(long)]
    guidance: Option<f64>,

    /// DType for the text encoders and autoencoder
    #[arg(long, value_enum, default_value_t = ModelDType::Auto)]
    dtype: ModelDType,

    /// Hugging Face token source: literal:<token>, env[:<var>], path:<file>, cache or none.
    /// By default, the Hugging Face token at ~/.cache/huggingface/token is used.
    #[arg(long, default_value = "cache")]
    token: TokenSource,

    /// Run on CPU rather than on GPU
    #[arg(long)]
    cpu: bool,

    /// Load the full transformer checkpoint instead of the quantized one
    #[arg(long)]
    no_quantize: bool,

    /// Only log warnings and errors, hide progress bars
    #[arg(long)]
    silent: bool,
}

/// A validated set of options for one invocation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub model: FluxVariant,
    pub prompt: String,
    pub width: usize,
    pub height: usize,
    pub steps: usize,
    /// Unused when `randgen_count` is set.
    pub seed: u64,
    pub randgen_count: Option<usize>,
    pub output_path_template: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub emit_metadata: bool,
    pub guidance_scale: f64,
    pub load_options: LoadOptions,
}

impl RunConfig {
    /// Parse and validate command line arguments. The first item is the binary name.
    pub fn parse_from<I, T>(itr: I) -> Result<Self, FluxGenError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let args = Args::try_parse_from(itr).map_err(ConfigError::Arguments)?;
        Self::try_from(args)
    }

    pub fn generation_params(&self, seed: u64) -> DiffusionGenerationParams {
        DiffusionGenerationParams {
            height: self.height,
            width: self.width,
            num_steps: self.steps,
            guidance_scale: self.guidance_scale,
            seed,
        }
    }
}

impl TryFrom<Args> for RunConfig {
    type Error = FluxGenError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        if args.prompt.trim().is_empty() {
            return Err(FluxGenError::invalid("prompt must not be empty"));
        }
        for (name, value) in [("width", args.width), ("height", args.height)] {
            if value == 0 || value % 16 != 0 {
                return Err(FluxGenError::invalid(format!(
                    "--{name} must be a nonzero multiple of 16, got {value}"
                )));
            }
        }
        if args.steps == 0 {
            return Err(FluxGenError::invalid("--steps must be at least 1"));
        }
        if let Some(count) = args.randgen {
            if count == 0 || count > MAX_RANDGEN {
                return Err(FluxGenError::invalid(format!(
                    "--randgen must be between 1 and {MAX_RANDGEN}, got {count}"
                )));
            }
        }
        if let Some(output) = &args.output {
            if !names_a_file(output) {
                return Err(FluxGenError::invalid(format!(
                    "--output must name a file, got {}; use --output-dir for a directory",
                    output.display()
                )));
            }
        }

        Ok(Self {
            model: args.model,
            prompt: args.prompt,
            width: args.width,
            height: args.height,
            steps: args.steps,
            seed: args.seed,
            randgen_count: args.randgen,
            output_path_template: args.output,
            output_dir: args.output_dir,
            emit_metadata: args.meta,
            guidance_scale: args
                .guidance
                .unwrap_or_else(|| args.model.default_guidance_scale()),
            load_options: LoadOptions {
                token: args.token,
                dtype: args.dtype,
                quantized: !args.no_quantize,
                force_cpu: args.cpu,
                silent: args.silent,
            },
        })
    }
}
