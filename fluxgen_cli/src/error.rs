use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Unknown flag, missing `--prompt`, bad value for `--model`, or a help/version request.
    #[error(transparent)]
    Arguments(#[from] clap::Error),
    #[error("{0}")]
    Invalid(String),
}

/// Everything that can end a run. None of these are retried.
#[derive(Debug, Error)]
pub enum FluxGenError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to load model: {0:#}")]
    ModelLoad(anyhow::Error),
    #[error("image generation failed: {0:#}")]
    Generation(anyhow::Error),
    #[error("failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl FluxGenError {
    pub fn io<E>(path: &Path, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Io {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::Invalid(msg.into()))
    }
}
