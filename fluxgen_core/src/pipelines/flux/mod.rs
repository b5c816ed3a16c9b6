mod sampling;

use std::fs;

use anyhow::Result;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::{
    models::{
        clip::text_model::{Activation, ClipTextConfig, ClipTextTransformer},
        flux::{self, autoencoder::AutoEncoder, sampling::State},
        t5,
    },
    quantized_var_builder,
};
use image::DynamicImage;
use tokenizers::Tokenizer;
use tracing::info;

use crate::{
    model_source::TransformerWeights, select_device, FluxVariant, ModelFiles, TryIntoDType,
};

use super::{tensor_to_image, DiffusionGenerationParams, ImagePipeline, LoadOptions};

const CLIP_MAX_TOKENS: usize = 77;

// https://huggingface.co/openai/clip-vit-large-patch14/blob/main/config.json
fn clip_config() -> ClipTextConfig {
    ClipTextConfig {
        vocab_size: 49408,
        projection_dim: 768,
        activation: Activation::QuickGelu,
        intermediate_size: 3072,
        embed_dim: 768,
        max_position_embeddings: CLIP_MAX_TOKENS,
        pad_with: None,
        num_hidden_layers: 12,
        num_attention_heads: 12,
    }
}

enum Transformer {
    Full(flux::model::Flux),
    /// GGUF weights; activations run in F32.
    Quantized(flux::quantized_model::Flux),
}

/// FLUX.1 with a T5-XXL and a CLIP-L text encoder. All components stay resident between calls.
pub struct FluxPipeline {
    variant: FluxVariant,
    t5_tokenizer: Tokenizer,
    t5_model: t5::T5EncoderModel,
    clip_tokenizer: Tokenizer,
    clip_model: ClipTextTransformer,
    transformer: Transformer,
    autoencoder: AutoEncoder,
    device: Device,
    dtype: DType,
    silent: bool,
}

impl FluxPipeline {
    /// Fetch and load every component of `variant`.
    pub fn load(variant: FluxVariant, opts: &LoadOptions) -> Result<Self> {
        let silent = opts.silent;
        let device = select_device(opts.force_cpu, silent)?;
        let dtype = opts.dtype.try_into_dtype(&device, silent)?;
        let files = ModelFiles::fetch(variant, opts.quantized, &opts.token, silent)?;

        if !silent {
            info!("loading T5 model");
        }
        let t5_config: t5::Config = serde_json::from_str(&fs::read_to_string(&files.t5_config)?)?;
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[&files.t5_weights], dtype, &device)? };
        let t5_model = t5::T5EncoderModel::load(vb, &t5_config)?;
        let t5_tokenizer = Tokenizer::from_file(&files.t5_tokenizer).map_err(anyhow::Error::msg)?;

        if !silent {
            info!("loading CLIP model");
        }
        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&[&files.clip_weights], dtype, &device)? };
        let clip_model = ClipTextTransformer::new(vb.pp("text_model"), &clip_config())?;
        let clip_tokenizer =
            Tokenizer::from_file(&files.clip_tokenizer).map_err(anyhow::Error::msg)?;

        if !silent {
            info!("loading FLUX model");
        }
        let cfg = variant.transformer_config();
        let transformer = match &files.transformer {
            TransformerWeights::Gguf(path) => {
                let vb = quantized_var_builder::VarBuilder::from_gguf(path, &device)?;
                Transformer::Quantized(flux::quantized_model::Flux::new(&cfg, vb)?)
            }
            TransformerWeights::Safetensors(path) => {
                let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], dtype, &device)? };
                Transformer::Full(flux::model::Flux::new(&cfg, vb)?)
            }
        };

        if !silent {
            info!("loading VAE model");
        }
        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&[&files.autoencoder], dtype, &device)? };
        let autoencoder = AutoEncoder::new(&variant.autoencoder_config(), vb)?;

        if !silent {
            info!(
                "FLUX.1-{variant} pipeline ready, guidance-distilled: {}",
                cfg.guidance_embed
            );
        }

        Ok(Self {
            variant,
            t5_tokenizer,
            t5_model,
            clip_tokenizer,
            clip_model,
            transformer,
            autoencoder,
            device,
            dtype,
            silent,
        })
    }

    pub fn variant(&self) -> FluxVariant {
        self.variant
    }

    fn encode_t5(&mut self, prompt: &str) -> Result<Tensor> {
        let mut tokens = self
            .t5_tokenizer
            .encode(prompt, true)
            .map_err(anyhow::Error::msg)?
            .get_ids()
            .to_vec();
        tokens.resize(self.variant.max_t5_tokens(), 0);
        let input_ids = Tensor::new(&tokens[..], &self.device)?.unsqueeze(0)?;
        Ok(self.t5_model.forward(&input_ids)?)
    }

    fn encode_clip(&self, prompt: &str) -> Result<Tensor> {
        let mut tokens = self
            .clip_tokenizer
            .encode(prompt, true)
            .map_err(anyhow::Error::msg)?
            .get_ids()
            .to_vec();
        tokens.truncate(CLIP_MAX_TOKENS);
        let input_ids = Tensor::new(&tokens[..], &self.device)?.unsqueeze(0)?;
        Ok(self.clip_model.forward(&input_ids)?)
    }
}

fn validate(params: &DiffusionGenerationParams) -> Result<()> {
    if params.num_steps == 0 {
        anyhow::bail!("At least one denoising step is required");
    }
    for (name, value) in [("height", params.height), ("width", params.width)] {
        if value == 0 || value % 16 != 0 {
            anyhow::bail!("Image {name} must be a nonzero multiple of 16, got {value}");
        }
    }
    Ok(())
}

impl ImagePipeline for FluxPipeline {
    fn generate(
        &mut self,
        prompt: &str,
        params: &DiffusionGenerationParams,
    ) -> Result<DynamicImage> {
        validate(params)?;

        let t5_emb = self.encode_t5(prompt)?;
        let clip_emb = self.encode_clip(prompt)?;
        let noise = sampling::get_noise(params.seed, params.height, params.width, &self.device)?;

        let img = match &self.transformer {
            Transformer::Quantized(model) => {
                let state = State::new(
                    &t5_emb.to_dtype(DType::F32)?,
                    &clip_emb.to_dtype(DType::F32)?,
                    &noise,
                )?;
                let timesteps = sampling::schedule(self.variant, params.num_steps, state.img.dim(1)?);
                sampling::denoise(
                    model,
                    &state,
                    &timesteps,
                    params.guidance_scale,
                    self.silent,
                )?
                .to_dtype(self.dtype)?
            }
            Transformer::Full(model) => {
                let state = State::new(&t5_emb, &clip_emb, &noise.to_dtype(self.dtype)?)?;
                let timesteps = sampling::schedule(self.variant, params.num_steps, state.img.dim(1)?);
                sampling::denoise(
                    model,
                    &state,
                    &timesteps,
                    params.guidance_scale,
                    self.silent,
                )?
            }
        };

        let img = sampling::unpack(&img, params.height, params.width)?;
        let img = self.autoencoder.decode(&img)?;
        let img = ((img.clamp(-1f32, 1f32)? + 1.0)? * 127.5)?.to_dtype(DType::U8)?;

        tensor_to_image(&img)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(height: usize, width: usize, num_steps: usize) -> DiffusionGenerationParams {
        DiffusionGenerationParams {
            height,
            width,
            num_steps,
            guidance_scale: 3.5,
            seed: 42,
        }
    }

    #[test]
    fn accepts_patch_aligned_sizes() {
        assert!(validate(&params(512, 512, 20)).is_ok());
        assert!(validate(&params(720, 1280, 1)).is_ok());
    }

    #[test]
    fn rejects_unaligned_or_empty_requests() {
        assert!(validate(&params(500, 512, 20)).is_err());
        assert!(validate(&params(512, 0, 20)).is_err());
        assert!(validate(&params(512, 512, 0)).is_err());
    }

    #[test]
    fn clip_config_matches_clip_vit_large() {
        let cfg = clip_config();
        assert_eq!(cfg.max_position_embeddings, CLIP_MAX_TOKENS);
        assert_eq!(cfg.embed_dim, 768);
    }
}
