use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};

const DEFAULT_EXTENSION: &str = "png";
const IMAGE_PREFIX: &str = "picture-";
const METADATA_PREFIX: &str = "meta-";

/// Build a file name from `base`: `prefix` goes in front, and an `index` becomes a `-NNN` suffix
/// before the last extension. A base without extension gets `.png`.
pub fn derive_path(base: &Path, index: Option<usize>, prefix: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = base
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    let suffix = index.map(|i| format!("-{i:03}")).unwrap_or_default();
    base.with_file_name(format!("{prefix}{stem}{suffix}.{extension}"))
}

/// Timestamp shared by every file of one run.
pub fn run_timestamp<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format("%Y%m%d-%H%M%S").to_string()
}

/// Where the images and metadata files of a run go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTemplate {
    /// Derived from the `--output` path.
    Explicit(PathBuf),
    /// `picture-<timestamp>.png` and `meta-<timestamp>.json` inside `dir`.
    Timestamped { dir: PathBuf, timestamp: String },
}

impl OutputTemplate {
    pub fn new(output: Option<&Path>, dir: &Path, timestamp: String) -> Self {
        match output {
            Some(base) => Self::Explicit(base.to_path_buf()),
            None => Self::Timestamped {
                dir: dir.to_path_buf(),
                timestamp,
            },
        }
    }

    /// `index` is 1-based and only set for batch runs.
    pub fn image_path(&self, index: Option<usize>) -> PathBuf {
        match self {
            Self::Explicit(base) => derive_path(base, index, ""),
            Self::Timestamped { dir, timestamp } => derive_path(
                &dir.join(format!("{timestamp}.{DEFAULT_EXTENSION}")),
                index,
                IMAGE_PREFIX,
            ),
        }
    }

    pub fn metadata_path(&self, index: Option<usize>) -> PathBuf {
        match self {
            Self::Explicit(base) => derive_path(&base.with_extension("json"), index, METADATA_PREFIX),
            Self::Timestamped { dir, timestamp } => {
                derive_path(&dir.join(format!("{timestamp}.json")), index, METADATA_PREFIX)
            }
        }
    }
}
