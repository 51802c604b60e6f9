//! Layered settings: command-line flag, then environment variable, then the
//! value persisted with `config set`, then the built-in default.

use std::{fmt, path::PathBuf, str::FromStr};

use secrecy::Secret;
use serde::Serialize;

use crate::{
    data_dir::DataDir,
    error::{Error, Result},
    memory::LongTermMemory,
    model_manager::DEFAULT_MODEL_ID,
    processor::DEFAULT_SAMPLE_SIZE,
    search::{DEFAULT_TAG_MATCH_BOOST, DEFAULT_TAG_ONLY_SCORE, RankingWeights},
    vector_store::DEFAULT_TOP_K,
};

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// Environment variables checked, in order, for the language model key.
pub const API_KEY_ENV_VARS: &[&str] = &["CONCIERGE_API_KEY", "OPENAI_API_KEY"];

/// A persistable setting and the environment variable that overrides it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingKey {
    pub key: &'static str,
    pub env: &'static str,
    pub help: &'static str,
}

pub const SANDBOX_DIR: SettingKey = SettingKey {
    key: "sandbox_dir",
    env: "CONCIERGE_SANDBOX",
    help: "directory whose files are indexed",
};
pub const TEXT_SAMPLE_SIZE: SettingKey = SettingKey {
    key: "text_sample_size",
    env: "CONCIERGE_SAMPLE_SIZE",
    help: "characters of text kept per file when indexing",
};
pub const TOP_K: SettingKey = SettingKey {
    key: "top_k",
    env: "CONCIERGE_TOP_K",
    help: "default number of search results",
};
pub const TAG_MATCH_BOOST: SettingKey = SettingKey {
    key: "tag_match_boost",
    env: "CONCIERGE_TAG_BOOST",
    help: "similarity bonus for semantic hits matching the tags",
};
pub const TAG_ONLY_SCORE: SettingKey = SettingKey {
    key: "tag_only_score",
    env: "CONCIERGE_TAG_ONLY_SCORE",
    help: "similarity given to files found only through tags",
};
pub const EMBEDDER: SettingKey = SettingKey {
    key: "embedder",
    env: "CONCIERGE_EMBEDDER",
    help: "embedding backend: colbert or hashed",
};
pub const EMBEDDING_MODEL: SettingKey = SettingKey {
    key: "embedding_model",
    env: "CONCIERGE_MODEL",
    help: "HuggingFace model id for the colbert embedder",
};
pub const LLM_BASE_URL: SettingKey = SettingKey {
    key: "llm_base_url",
    env: "CONCIERGE_LLM_BASE_URL",
    help: "OpenAI-compatible API base URL",
};
pub const LLM_MODEL: SettingKey = SettingKey {
    key: "llm_model",
    env: "CONCIERGE_LLM_MODEL",
    help: "chat model used for queries and tag suggestions",
};

pub const ALL_SETTINGS: &[SettingKey] = &[
    SANDBOX_DIR,
    TEXT_SAMPLE_SIZE,
    TOP_K,
    TAG_MATCH_BOOST,
    TAG_ONLY_SCORE,
    EMBEDDER,
    EMBEDDING_MODEL,
    LLM_BASE_URL,
    LLM_MODEL,
];

/// Look up a setting by its persisted key.
pub fn setting_key(key: &str) -> Result<SettingKey> {
    ALL_SETTINGS
        .iter()
        .copied()
        .find(|s| s.key == key)
        .ok_or_else(|| Error::Validation(format!("unknown setting: {key}")))
}

/// Embedding backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// ColBERT model loaded through pylate-rs.
    Colbert,
    /// Offline feature-hashing embedder.
    Hashed,
}

impl FromStr for EmbedderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "colbert" => Ok(Self::Colbert),
            "hashed" => Ok(Self::Hashed),
            other => Err(Error::Config(format!(
                "unknown embedder '{other}' (expected colbert or hashed)"
            ))),
        }
    }
}

impl fmt::Display for EmbedderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Colbert => "colbert",
            Self::Hashed => "hashed",
        })
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub sandbox_dir: Option<PathBuf>,
    pub embedder: Option<EmbedderKind>,
    pub embedding_model: Option<String>,
}

/// Connection details for the hosted language model.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<Secret<String>>,
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: DataDir,
    pub sandbox_dir: PathBuf,
    pub text_sample_size: usize,
    pub top_k: usize,
    pub ranking: RankingWeights,
    pub embedder: EmbedderKind,
    pub embedding_model: String,
    pub llm: LlmSettings,
}

impl Settings {
    /// Resolve against the process environment.
    pub fn resolve(
        data_dir: DataDir,
        memory: &LongTermMemory,
        overrides: &Overrides,
    ) -> Result<Self> {
        Self::resolve_with(data_dir, memory, overrides, |name| {
            std::env::var(name).ok()
        })
    }

    /// Resolve with an explicit environment lookup.
    pub fn resolve_with<F>(
        data_dir: DataDir,
        memory: &LongTermMemory,
        overrides: &Overrides,
        env: F,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let layered = |setting: SettingKey| -> Result<Option<String>> {
            if let Some(v) = env(setting.env).filter(|v| !v.is_empty()) {
                return Ok(Some(v));
            }
            memory.get_setting(setting.key)
        };

        let sandbox_dir = match &overrides.sandbox_dir {
            Some(p) => p.clone(),
            None => layered(SANDBOX_DIR)?
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.default_sandbox()),
        };

        let embedder = match overrides.embedder {
            Some(kind) => kind,
            None => match layered(EMBEDDER)? {
                Some(v) => v.parse()?,
                None => EmbedderKind::Colbert,
            },
        };

        let embedding_model = match &overrides.embedding_model {
            Some(m) => m.clone(),
            None => layered(EMBEDDING_MODEL)?
                .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
        };

        let api_key = API_KEY_ENV_VARS
            .iter()
            .find_map(|name| env(name).filter(|v| !v.trim().is_empty()))
            .map(Secret::new);

        Ok(Self {
            sandbox_dir,
            text_sample_size: parse_or(
                TEXT_SAMPLE_SIZE,
                layered(TEXT_SAMPLE_SIZE)?,
                DEFAULT_SAMPLE_SIZE,
            )?,
            top_k: parse_or(TOP_K, layered(TOP_K)?, DEFAULT_TOP_K)?,
            ranking: RankingWeights {
                tag_match_boost: parse_or(
                    TAG_MATCH_BOOST,
                    layered(TAG_MATCH_BOOST)?,
                    DEFAULT_TAG_MATCH_BOOST,
                )?,
                tag_only_score: parse_or(
                    TAG_ONLY_SCORE,
                    layered(TAG_ONLY_SCORE)?,
                    DEFAULT_TAG_ONLY_SCORE,
                )?,
            },
            embedder,
            embedding_model,
            llm: LlmSettings {
                base_url: layered(LLM_BASE_URL)?
                    .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
                model: layered(LLM_MODEL)?
                    .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
                api_key,
            },
            data_dir,
        })
    }

    /// Resolved values as displayable `(key, value)` pairs.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            (SANDBOX_DIR.key, self.sandbox_dir.display().to_string()),
            (TEXT_SAMPLE_SIZE.key, self.text_sample_size.to_string()),
            (TOP_K.key, self.top_k.to_string()),
            (TAG_MATCH_BOOST.key, self.ranking.tag_match_boost.to_string()),
            (TAG_ONLY_SCORE.key, self.ranking.tag_only_score.to_string()),
            (EMBEDDER.key, self.embedder.to_string()),
            (EMBEDDING_MODEL.key, self.embedding_model.clone()),
            (LLM_BASE_URL.key, self.llm.base_url.clone()),
            (LLM_MODEL.key, self.llm.model.clone()),
        ]
    }
}

fn parse_or<T: FromStr>(
    setting: SettingKey,
    raw: Option<String>,
    default: T,
) -> Result<T> {
    match raw {
        Some(v) => v.trim().parse().map_err(|_| {
            Error::Config(format!("invalid value for {}: '{v}'", setting.key))
        }),
        None => Ok(default),
    }
}

/// Check a value before it is persisted with `config set`.
pub fn validate_setting(key: &str, value: &str) -> Result<SettingKey> {
    let setting = setting_key(key)?;
    let value = value.trim();
    match setting.key {
        "text_sample_size" | "top_k" => {
            value.parse::<usize>().map_err(|_| {
                Error::Validation(format!("{key} must be a whole number"))
            })?;
        }
        "tag_match_boost" | "tag_only_score" => {
            value.parse::<f32>().map_err(|_| {
                Error::Validation(format!("{key} must be a number"))
            })?;
        }
        "embedder" => {
            value
                .parse::<EmbedderKind>()
                .map_err(|e| Error::Validation(e.to_string()))?;
        }
        _ if value.is_empty() => {
            return Err(Error::Validation(format!("{key} must not be empty")));
        }
        _ => {}
    }
    Ok(setting)
}
