mod flux;

use anyhow::Result;
use candle_core::{DType, Tensor};
use image::{DynamicImage, RgbImage};

use crate::{ModelDType, TokenSource};

pub use flux::FluxPipeline;

/// Generation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffusionGenerationParams {
    pub height: usize,
    pub width: usize,
    /// The number of denoising steps. More denoising steps usually lead to a higher quality image at the
    /// expense of slower inference but depends on the model being used.
    pub num_steps: usize,
    /// Higher guidance scale encourages to generate images that are closely linked to the text `prompt`,
    /// usually at the expense of lower image quality. Ignored by models without guidance distillation.
    pub guidance_scale: f64,
    /// Seeds the initial latent noise. The same seed and parameters give the same image.
    pub seed: u64,
}

/// Something that turns a prompt into an image. Loaded once, then called for every image of a run.
pub trait ImagePipeline {
    fn generate(
        &mut self,
        prompt: &str,
        params: &DiffusionGenerationParams,
    ) -> Result<DynamicImage>;
}

/// Settings used when loading a pipeline.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub token: TokenSource,
    pub dtype: ModelDType,
    /// Load the transformer from quantized GGUF weights instead of the full checkpoint.
    pub quantized: bool,
    pub force_cpu: bool,
    /// Disable logging and progress bars.
    pub silent: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            token: TokenSource::CacheToken,
            dtype: ModelDType::Auto,
            quantized: true,
            force_cpu: false,
            silent: false,
        }
    }
}

/// Convert a decoded `(1, 3, height, width)` tensor with values in `0..=255` into an RGB image.
pub fn tensor_to_image(img: &Tensor) -> Result<DynamicImage> {
    let (b, c, h, w) = img.dims4()?;
    if b != 1 {
        anyhow::bail!("Expected a single image in the batch, got {b}");
    }
    if c != 3 {
        anyhow::bail!("Expected 3 channels in image output, got {c}");
    }
    let flattened = img
        .squeeze(0)?
        .permute((1, 2, 0))?
        .to_dtype(DType::U8)?
        .flatten_all()?;
    #[allow(clippy::cast_possible_truncation)]
    let image = RgbImage::from_raw(w as u32, h as u32, flattened.to_vec1::<u8>()?)
        .ok_or_else(|| anyhow::anyhow!("RgbImage has invalid capacity."))?;
    Ok(DynamicImage::ImageRgb8(image))
}
