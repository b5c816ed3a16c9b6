use std::{env, fmt, fs, str::FromStr};

use anyhow::Result;
use thiserror::Error;
use tracing::warn;

const DEFAULT_TOKEN_ENV_VAR: &str = "HUGGING_FACE_HUB_TOKEN";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Where to read the Hugging Face access token from. FLUX.1-dev is gated, so it needs one.
pub enum TokenSource {
    Literal(String),
    EnvVar(String),
    Path(String),
    #[default]
    CacheToken,
    None,
}

impl FromStr for TokenSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = match s.split_once(':') {
            Some((kind, value)) => (kind, Some(value)),
            None => (s, None),
        };
        match kind {
            "literal" => value
                .map(|v| Self::Literal(v.to_string()))
                .ok_or_else(|| "expected a value for `literal`".to_string()),
            "env" => Ok(Self::EnvVar(
                value.unwrap_or(DEFAULT_TOKEN_ENV_VAR).to_string(),
            )),
            "path" => value
                .map(|v| Self::Path(v.to_string()))
                .ok_or_else(|| "expected a value for `path`".to_string()),
            "cache" => Ok(Self::CacheToken),
            "none" => Ok(Self::None),
            other => Err(format!(
                "invalid token source `{other}`, expected one of literal:<token>, env[:<var>], path:<file>, cache, none"
            )),
        }
    }
}

impl fmt::Display for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "literal:{value}"),
            Self::EnvVar(value) => write!(f, "env:{value}"),
            Self::Path(value) => write!(f, "path:{value}"),
            Self::CacheToken => write!(f, "cache"),
            Self::None => write!(f, "none"),
        }
    }
}

#[derive(Error, Debug)]
enum TokenRetrievalError {
    #[error("No home directory.")]
    HomeDirectoryMissing,
}

/// Read the token from `source`. An unreadable source is logged and no token is used.
pub fn get_token(source: &TokenSource) -> Result<Option<String>> {
    fn skip_token(input: &str) -> Option<String> {
        warn!("could not load token at {input:?}, using no HF token.");
        None
    }

    let token = match source {
        TokenSource::Literal(data) => Some(data.clone()),
        TokenSource::EnvVar(envvar) => env::var(envvar).ok().or_else(|| skip_token(envvar)),
        TokenSource::Path(path) => fs::read_to_string(path).ok().or_else(|| skip_token(path)),
        TokenSource::CacheToken => {
            let path = dirs::home_dir()
                .ok_or(TokenRetrievalError::HomeDirectoryMissing)?
                .join(".cache")
                .join("huggingface")
                .join("token");
            fs::read_to_string(&path)
                .ok()
                .or_else(|| skip_token(&path.display().to_string()))
        }
        TokenSource::None => None,
    };

    Ok(token
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}
