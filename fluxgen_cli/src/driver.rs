use std::{path::PathBuf, time::Instant};

use fluxgen_core::ImagePipeline;
use rand::Rng;
use tracing::info;

use crate::{
    config::RunConfig,
    error::FluxGenError,
    metadata::{create_parent_dir, Metadata},
    output::OutputTemplate,
};

/// Random seeds are drawn from `0..=MAX_RANDOM_SEED`.
pub const MAX_RANDOM_SEED: u64 = (1 << 31) - 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub seed_used: u64,
    pub output_path: PathBuf,
    pub metadata_path: Option<PathBuf>,
}

/// Generate every image `config` asks for, one after the other, stopping at the first failure.
pub fn run<P, R>(
    config: &RunConfig,
    pipeline: &mut P,
    rng: &mut R,
    template: &OutputTemplate,
) -> Result<Vec<GenerationResult>, FluxGenError>
where
    P: ImagePipeline,
    R: Rng,
{
    let Some(count) = config.randgen_count else {
        return Ok(vec![generate_one(
            config,
            pipeline,
            config.seed,
            template,
            None,
        )?]);
    };

    let mut results = Vec::new();
    for index in 1..=count {
        let seed = rng.gen_range(0..=MAX_RANDOM_SEED);
        info!("image {index}/{count}");
        results.push(generate_one(config, pipeline, seed, template, Some(index))?);
    }
    Ok(results)
}

fn generate_one<P: ImagePipeline>(
    config: &RunConfig,
    pipeline: &mut P,
    seed: u64,
    template: &OutputTemplate,
    index: Option<usize>,
) -> Result<GenerationResult, FluxGenError> {
    info!("generating image for: '{}' with seed {seed}", config.prompt);
    let start = Instant::now();
    let image = pipeline
        .generate(&config.prompt, &config.generation_params(seed))
        .map_err(FluxGenError::Generation)?;
    info!(
        "image generation took: {:.2}s",
        start.elapsed().as_secs_f32()
    );

    let output_path = template.image_path(index);
    create_parent_dir(&output_path)?;
    image
        .save(&output_path)
        .map_err(|e| FluxGenError::io(&output_path, e))?;
    println!("Image saved to {}", output_path.display());

    let metadata_path = if config.emit_metadata {
        let path = template.metadata_path(index);
        Metadata::new(config, seed, &output_path).write(&path)?;
        println!("Metadata saved to {}", path.display());
        Some(path)
    } else {
        None
    };

    Ok(GenerationResult {
        seed_used: seed,
        output_path,
        metadata_path,
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use fluxgen_core::{DiffusionGenerationParams, FluxVariant};
    use image::DynamicImage;
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    /// Returns blank images and records every call.
    #[derive(Default)]
    struct FakePipeline {
        calls: Vec<(String, DiffusionGenerationParams)>,
        fail_on_call: Option<usize>,
    }

    impl ImagePipeline for FakePipeline {
        fn generate(
            &mut self,
            prompt: &str,
            params: &DiffusionGenerationParams,
        ) -> anyhow::Result<DynamicImage> {
            self.calls.push((prompt.to_string(), params.clone()));
            if self.fail_on_call == Some(self.calls.len()) {
                anyhow::bail!("out of memory");
            }
            #[allow(clippy::cast_possible_truncation)]
            Ok(DynamicImage::new_rgb8(
                params.width as u32,
                params.height as u32,
            ))
        }
    }

    fn config(args: &[&str]) -> RunConfig {
        let base = ["fluxgen", "--width", "32", "--height", "16"];
        RunConfig::parse_from(base.iter().chain(args.iter()).copied()).unwrap()
    }

    fn explicit(dir: &Path, name: &str) -> OutputTemplate {
        OutputTemplate::new(Some(&dir.join(name)), dir, String::new())
    }

    #[test]
    fn single_image_uses_the_explicit_seed() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&["--prompt", "a fox", "--seed", "7"]);
        let mut pipeline = FakePipeline::default();
        let mut rng = StdRng::seed_from_u64(0);

        let results = run(&config, &mut pipeline, &mut rng, &explicit(dir.path(), "fox.png")).unwrap();

        assert_eq!(
            results,
            vec![GenerationResult {
                seed_used: 7,
                output_path: dir.path().join("fox.png"),
                metadata_path: None,
            }]
        );
        assert_eq!(pipeline.calls.len(), 1);
        assert_eq!(pipeline.calls[0].0, "a fox");
        assert_eq!(pipeline.calls[0].1.seed, 7);
        let saved = image::open(dir.path().join("fox.png")).unwrap();
        assert_eq!((saved.width(), saved.height()), (32, 16));
    }

    #[test]
    fn default_seed_without_randgen() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&["--prompt", "a fox"]);
        let mut pipeline = FakePipeline::default();
        let mut rng = StdRng::seed_from_u64(0);

        let results = run(&config, &mut pipeline, &mut rng, &explicit(dir.path(), "fox")).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].seed_used, 42);
        assert_eq!(results[0].output_path, dir.path().join("fox.png"));
    }

    #[test]
    fn randgen_batch_writes_numbered_images_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&["--prompt", "a fox", "--randgen", "5", "--meta", "--seed", "7"]);
        let mut pipeline = FakePipeline::default();
        let mut rng = StdRng::seed_from_u64(1);

        let results = run(&config, &mut pipeline, &mut rng, &explicit(dir.path(), "fox.png")).unwrap();

        assert_eq!(results.len(), 5);
        assert_eq!(pipeline.calls.len(), 5);
        for (i, result) in results.iter().enumerate() {
            let n = i + 1;
            assert!(result.seed_used <= MAX_RANDOM_SEED);
            assert_eq!(pipeline.calls[i].1.seed, result.seed_used);
            assert_eq!(result.output_path, dir.path().join(format!("fox-{n:03}.png")));
            assert!(result.output_path.exists());

            let meta_path = result.metadata_path.clone().unwrap();
            assert_eq!(meta_path, dir.path().join(format!("meta-fox-{n:03}.json")));
            let meta = Metadata::read(&meta_path).unwrap();
            assert_eq!(meta.seed, result.seed_used);
            assert_eq!(meta.model, FluxVariant::Dev);
            assert_eq!(meta.prompt, "a fox");
            assert_eq!((meta.width, meta.height, meta.steps), (32, 16, 20));
            assert_eq!(meta.output, result.output_path.display().to_string());
        }
        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 10);
    }

    #[test]
    fn every_batch_image_draws_its_own_seed() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&["--prompt", "a fox", "--randgen", "5", "--seed", "7"]);
        let mut pipeline = FakePipeline::default();
        let mut rng = StdRng::seed_from_u64(9);
        let mut expected_rng = rng.clone();

        let results = run(&config, &mut pipeline, &mut rng, &explicit(dir.path(), "fox.png")).unwrap();

        let seeds = results.iter().map(|r| r.seed_used).collect::<Vec<_>>();
        let expected = (0..5)
            .map(|_| expected_rng.gen_range(0..=MAX_RANDOM_SEED))
            .collect::<Vec<_>>();
        assert_eq!(seeds, expected);
        assert!(seeds.iter().any(|s| *s != seeds[0]));
        assert!(pipeline.calls.iter().all(|(_, params)| params.seed != 7));
    }

    #[test]
    fn timestamped_names_share_one_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&["--prompt", "a fox", "--randgen", "2", "--meta"]);
        let template = OutputTemplate::new(None, dir.path(), "20250309-140507".to_string());
        let mut pipeline = FakePipeline::default();
        let mut rng = StdRng::seed_from_u64(2);

        let results = run(&config, &mut pipeline, &mut rng, &template).unwrap();

        assert_eq!(
            results[1].output_path,
            dir.path().join("picture-20250309-140507-002.png")
        );
        assert_eq!(
            results[1].metadata_path,
            Some(dir.path().join("meta-20250309-140507-002.json"))
        );
    }

    #[test]
    fn schnell_single_run_with_seed_lands_on_the_timestamped_path() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("output");
        let config = config(&["--prompt", "a fox", "--seed", "7", "--model", "schnell"]);
        let template = OutputTemplate::new(None, &out_dir, "20250309-140507".to_string());
        let mut pipeline = FakePipeline::default();
        let mut rng = StdRng::seed_from_u64(3);

        let results = run(&config, &mut pipeline, &mut rng, &template).unwrap();

        assert_eq!(config.model.model_id(), "black-forest-labs/FLUX.1-schnell");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].seed_used, 7);
        assert_eq!(
            results[0].output_path,
            out_dir.join("picture-20250309-140507.png")
        );
        assert!(results[0].output_path.exists());
        assert_eq!(pipeline.calls[0].1.guidance_scale, 0.0);
    }

    #[test]
    fn failure_aborts_the_rest_of_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&["--prompt", "a fox", "--randgen", "4"]);
        let mut pipeline = FakePipeline {
            fail_on_call: Some(2),
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(4);

        let err = run(&config, &mut pipeline, &mut rng, &explicit(dir.path(), "fox.png")).unwrap_err();

        assert!(matches!(err, FluxGenError::Generation(_)));
        assert_eq!(pipeline.calls.len(), 2);
        assert!(dir.path().join("fox-001.png").exists());
        assert!(!dir.path().join("fox-002.png").exists());
    }

    #[test]
    fn unwritable_output_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let config = config(&["--prompt", "a fox"]);
        let mut pipeline = FakePipeline::default();
        let mut rng = StdRng::seed_from_u64(5);

        let template = OutputTemplate::new(Some(&blocker.join("fox.png")), dir.path(), String::new());
        let err = run(&config, &mut pipeline, &mut rng, &template).unwrap_err();

        assert!(matches!(err, FluxGenError::Io { .. }));
    }
}
