#![allow(clippy::cast_possible_truncation)]

use anyhow::Result;
use candle_core::{Device, Tensor};
use candle_transformers::models::flux::{
    self,
    sampling::{get_schedule, State},
    WithForward,
};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::FluxVariant;

/// Latent channels of the FLUX autoencoder.
const LATENT_CHANNELS: usize = 16;

/// Draw the initial latents on the host so that a seed means the same image on every device.
pub fn get_noise(seed: u64, height: usize, width: usize, device: &Device) -> Result<Tensor> {
    let height = height.div_ceil(16) * 2;
    let width = width.div_ceil(16) * 2;
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<f32> = (0..LATENT_CHANNELS * height * width)
        .map(|_| rng.sample(StandardNormal))
        .collect();
    Ok(Tensor::from_vec(
        data,
        (1, LATENT_CHANNELS, height, width),
        device,
    )?)
}

/// Timesteps from 1 (pure noise) down to 0. Dev shifts them based on the number of image tokens.
pub fn schedule(variant: FluxVariant, num_steps: usize, image_seq_len: usize) -> Vec<f64> {
    if variant.uses_shifted_schedule() {
        get_schedule(num_steps, Some((image_seq_len, 0.5, 1.15)))
    } else {
        get_schedule(num_steps, None)
    }
}

fn progress_bar(len: usize, silent: bool) -> Result<ProgressBar> {
    if silent {
        return Ok(ProgressBar::hidden());
    }
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
        )?
        .progress_chars("#>-"),
    );
    bar.set_message("Denoising");
    Ok(bar)
}

/// Euler sampling of the flow-matching ODE.
pub fn denoise<M: WithForward>(
    model: &M,
    state: &State,
    timesteps: &[f64],
    guidance: f64,
    silent: bool,
) -> Result<Tensor> {
    let b_sz = state.img.dim(0)?;
    let dev = state.img.device();
    let guidance = Tensor::full(guidance as f32, b_sz, dev)?;
    let bar = progress_bar(timesteps.len().saturating_sub(1), silent)?;

    let mut img = state.img.clone();
    for window in timesteps.windows(2) {
        let (t_curr, t_prev) = (window[0], window[1]);
        let t_vec = Tensor::full(t_curr as f32, b_sz, dev)?;
        let pred = model.forward(
            &img,
            &state.img_ids,
            &state.txt,
            &state.txt_ids,
            &t_vec,
            &state.vec,
            Some(&guidance),
        )?;
        img = (img + pred * (t_prev - t_curr))?;
        bar.inc(1);
    }
    bar.finish_and_clear();

    Ok(img)
}

/// Inverse of the 2x2 patch packing done by [`State::new`].
pub fn unpack(xs: &Tensor, height: usize, width: usize) -> Result<Tensor> {
    Ok(flux::sampling::unpack(xs, height, width)?)
}
