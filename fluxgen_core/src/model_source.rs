use std::{fmt::Display, path::PathBuf};

use anyhow::{Context, Result};
use hf_hub::{
    api::sync::{Api, ApiBuilder},
    Repo, RepoType,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{get_token, TokenSource};

const T5_MODEL_ID: &str = "google/t5-v1_1-xxl";
const T5_REVISION: &str = "refs/pr/2";
const T5_TOKENIZER_MODEL_ID: &str = "lmz/mt5-tokenizers";
const T5_TOKENIZER_FILE: &str = "t5-v1_1-xxl.tokenizer.json";
const CLIP_MODEL_ID: &str = "openai/clip-vit-large-patch14";
const QUANTIZED_MODEL_ID: &str = "lmz/candle-flux";

/// Which FLUX.1 checkpoint to run.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum FluxVariant {
    /// Guidance-distilled model, higher quality, needs more steps.
    #[default]
    #[value(name = "dev")]
    Dev,
    /// Timestep-distilled model, good results in 1-4 steps.
    #[value(name = "schnell")]
    Schnell,
}

impl Display for FluxVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dev => write!(f, "dev"),
            Self::Schnell => write!(f, "schnell"),
        }
    }
}

impl FluxVariant {
    /// Hugging Face repository holding the base weights (autoencoder, full-precision transformer).
    pub fn model_id(&self) -> &'static str {
        match self {
            Self::Dev => "black-forest-labs/FLUX.1-dev",
            Self::Schnell => "black-forest-labs/FLUX.1-schnell",
        }
    }

    /// Repository and file name of the quantized GGUF transformer.
    fn quantized_transformer(&self) -> (&'static str, &'static str) {
        match self {
            Self::Dev => (QUANTIZED_MODEL_ID, "flux1-dev.gguf"),
            Self::Schnell => (QUANTIZED_MODEL_ID, "flux1-schnell.gguf"),
        }
    }

    fn transformer_file(&self) -> &'static str {
        match self {
            Self::Dev => "flux1-dev.safetensors",
            Self::Schnell => "flux1-schnell.safetensors",
        }
    }

    /// Schnell ignores guidance, it was not trained with a guidance embedding.
    pub fn default_guidance_scale(&self) -> f64 {
        match self {
            Self::Dev => 3.5,
            Self::Schnell => 0.0,
        }
    }

    pub fn max_t5_tokens(&self) -> usize {
        match self {
            Self::Dev => 512,
            Self::Schnell => 256,
        }
    }

    /// Whether the timestep schedule is shifted towards high noise for large images.
    pub fn uses_shifted_schedule(&self) -> bool {
        matches!(self, Self::Dev)
    }

    pub(crate) fn transformer_config(&self) -> candle_transformers::models::flux::model::Config {
        use candle_transformers::models::flux::model::Config;
        match self {
            Self::Dev => Config::dev(),
            Self::Schnell => Config::schnell(),
        }
    }

    pub(crate) fn autoencoder_config(
        &self,
    ) -> candle_transformers::models::flux::autoencoder::Config {
        use candle_transformers::models::flux::autoencoder::Config;
        match self {
            Self::Dev => Config::dev(),
            Self::Schnell => Config::schnell(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TransformerWeights {
    Gguf(PathBuf),
    Safetensors(PathBuf),
}

/// Local paths of every file the FLUX pipeline needs, downloaded on demand.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub t5_weights: PathBuf,
    pub t5_config: PathBuf,
    pub t5_tokenizer: PathBuf,
    pub clip_weights: PathBuf,
    pub clip_tokenizer: PathBuf,
    pub transformer: TransformerWeights,
    pub autoencoder: PathBuf,
}

fn fetch(api: &Api, model_id: &str, revision: Option<&str>, file: &str) -> Result<PathBuf> {
    let repo = match revision {
        Some(revision) => Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            revision.to_string(),
        ),
        None => Repo::model(model_id.to_string()),
    };
    api.repo(repo)
        .get(file)
        .with_context(|| format!("failed to fetch `{file}` from `{model_id}`"))
}

impl ModelFiles {
    /// Resolve all files for `variant`, downloading the ones not yet in the local hub cache.
    pub fn fetch(
        variant: FluxVariant,
        quantized: bool,
        token: &TokenSource,
        silent: bool,
    ) -> Result<Self> {
        let api = ApiBuilder::new()
            .with_progress(!silent)
            .with_token(get_token(token)?)
            .build()?;

        if !silent {
            info!("fetching weights for FLUX.1-{variant} (quantized: {quantized}).");
        }

        let t5_weights = fetch(&api, T5_MODEL_ID, Some(T5_REVISION), "model.safetensors")?;
        let t5_config = fetch(&api, T5_MODEL_ID, Some(T5_REVISION), "config.json")?;
        let t5_tokenizer = fetch(&api, T5_TOKENIZER_MODEL_ID, None, T5_TOKENIZER_FILE)?;

        let clip_weights = fetch(&api, CLIP_MODEL_ID, None, "model.safetensors")?;
        let clip_tokenizer = fetch(&api, CLIP_MODEL_ID, None, "tokenizer.json")?;

        let transformer = if quantized {
            let (model_id, file) = variant.quantized_transformer();
            TransformerWeights::Gguf(fetch(&api, model_id, None, file)?)
        } else {
            TransformerWeights::Safetensors(fetch(
                &api,
                variant.model_id(),
                None,
                variant.transformer_file(),
            )?)
        };
        let autoencoder = fetch(&api, variant.model_id(), None, "ae.safetensors")?;

        Ok(Self {
            t5_weights,
            t5_config,
            t5_tokenizer,
            clip_weights,
            clip_tokenizer,
            transformer,
            autoencoder,
        })
    }
}
