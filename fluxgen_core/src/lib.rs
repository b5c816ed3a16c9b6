//! Core crate of fluxgen: loads a FLUX text-to-image model and turns prompts into images.
//!
//! Weights are fetched from the Hugging Face hub on first use and cached locally afterwards.
//!
//! ```rust,no_run
//! use fluxgen_core::{DiffusionGenerationParams, FluxPipeline, FluxVariant, ImagePipeline, LoadOptions};
//!
//! let variant = FluxVariant::Schnell;
//! let mut pipeline = FluxPipeline::load(variant, &LoadOptions::default())?;
//!
//! let image = pipeline.generate(
//!     "A rusty robot walking on a sandy beach",
//!     &DiffusionGenerationParams {
//!         height: 512,
//!         width: 512,
//!         num_steps: 4,
//!         guidance_scale: variant.default_guidance_scale(),
//!         seed: 42,
//!     },
//! )?;
//!
//! image.save("image.png")?;
//!
//! # Ok::<(), anyhow::Error>(())
//! ```

#[cfg(feature = "accelerate")]
extern crate accelerate_src;
#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

mod model_source;
mod pipelines;
mod tokens;
mod util;

pub use model_source::{FluxVariant, ModelFiles, TransformerWeights};
pub use pipelines::{
    tensor_to_image, DiffusionGenerationParams, FluxPipeline, ImagePipeline, LoadOptions,
};
pub use tokens::{get_token, TokenSource};
pub use util::{select_device, ModelDType, TryIntoDType};
