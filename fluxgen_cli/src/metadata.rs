use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

use fluxgen_core::FluxVariant;
use serde::{Deserialize, Serialize};

use crate::{config::RunConfig, error::FluxGenError};

/// Sidecar record describing how one image was made. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub model: FluxVariant,
    pub prompt: String,
    pub height: usize,
    pub width: usize,
    pub steps: usize,
    /// The seed handed to the pipeline.
    pub seed: u64,
    pub output: String,
}

impl Metadata {
    pub fn new(config: &RunConfig, seed: u64, output: &Path) -> Self {
        Self {
            model: config.model,
            prompt: config.prompt.clone(),
            height: config.height,
            width: config.width,
            steps: config.steps,
            seed,
            output: output.display().to_string(),
        }
    }

    /// Pretty-printed JSON, parent directories created as needed.
    pub fn write(&self, path: &Path) -> Result<(), FluxGenError> {
        create_parent_dir(path)?;
        let file = File::create(path).map_err(|e| FluxGenError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|e| FluxGenError::io(path, e))?;
        writeln!(writer).map_err(|e| FluxGenError::io(path, e))?;
        writer.flush().map_err(|e| FluxGenError::io(path, e))
    }

    #[cfg(test)]
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

pub(crate) fn create_parent_dir(path: &Path) -> Result<(), FluxGenError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| FluxGenError::io(parent, e))
        }
        _ => Ok(()),
    }
}
