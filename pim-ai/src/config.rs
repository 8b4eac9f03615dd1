//! Configuration resolution for pim-ai
//!
//! API keys resolve with ENV → TOML priority. A missing key does not stop the
//! service: the collaborator that needs it is replaced by one that fails
//! every call, so only the affected stage reports the problem.

use pim_common::config::{TomlConfig, VariantGeneratorKind};
use pim_common::{Error, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::services::{
    Collaborators, FfmpegFrameSource, GeminiClient, HuggingFaceClient, ItemIdentifier, Segmenter,
    UnconfiguredCollaborator, VariantGenerator, YtDlpFetcher,
};

pub const GEMINI_KEY_ENV: &str = "GEMINI_API_KEY";
pub const HUGGINGFACE_TOKEN_ENV: &str = "HUGGINGFACE_API_TOKEN";

/// Resolve an API key from `env_var`, falling back to the TOML value
pub fn resolve_api_key(env_var: &str, toml_value: Option<&str>) -> Result<String> {
    let env_key = std::env::var(env_var).ok().filter(|k| is_valid_key(k));
    let toml_key = toml_value.filter(|k| is_valid_key(k));

    if env_key.is_some() && toml_key.is_some() {
        warn!("{} found in environment and TOML config. Using environment.", env_var);
    }

    if let Some(key) = env_key {
        info!("{} loaded from environment variable", env_var);
        return Ok(key.trim().to_string());
    }

    if let Some(key) = toml_key {
        info!("{} loaded from TOML config", env_var);
        return Ok(key.trim().to_string());
    }

    Err(Error::Config(format!(
        "{} not configured. Set the {} environment variable or the {} key in pim-ai.toml",
        env_var,
        env_var,
        env_var.to_lowercase()
    )))
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

fn gemini_client(toml: &TomlConfig) -> Option<Arc<GeminiClient>> {
    let key = match resolve_api_key(GEMINI_KEY_ENV, toml.gemini_api_key.as_deref()) {
        Ok(key) => key,
        Err(e) => {
            warn!("{}. Identification and segmentation will fail until it is set.", e);
            return None;
        }
    };

    match GeminiClient::new(key) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!("Failed to initialize Gemini client: {}", e);
            None
        }
    }
}

fn huggingface_client(toml: &TomlConfig) -> Option<Arc<HuggingFaceClient>> {
    let token = match resolve_api_key(HUGGINGFACE_TOKEN_ENV, toml.huggingface_api_token.as_deref()) {
        Ok(token) => token,
        Err(e) => {
            warn!("{}. Enhancement will fail until it is set.", e);
            return None;
        }
    };

    match HuggingFaceClient::new(token) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!("Failed to initialize Hugging Face client: {}", e);
            None
        }
    }
}

/// Production collaborators wired from configuration
pub fn build_collaborators(toml: &TomlConfig) -> Collaborators {
    let gemini = gemini_client(toml);

    let (identifier, segmenter): (Arc<dyn ItemIdentifier>, Arc<dyn Segmenter>) = match &gemini {
        Some(client) => (
            client.clone() as Arc<dyn ItemIdentifier>,
            client.clone() as Arc<dyn Segmenter>,
        ),
        None => {
            let missing = Arc::new(UnconfiguredCollaborator::new(format!("{} not configured", GEMINI_KEY_ENV)));
            (
                missing.clone() as Arc<dyn ItemIdentifier>,
                missing as Arc<dyn Segmenter>,
            )
        }
    };

    let generator: Arc<dyn VariantGenerator> = match toml.pipeline.variant_generator {
        VariantGeneratorKind::Huggingface => match huggingface_client(toml) {
            Some(client) => client,
            None => Arc::new(UnconfiguredCollaborator::new(format!(
                "{} not configured",
                HUGGINGFACE_TOKEN_ENV
            ))),
        },
        VariantGeneratorKind::Gemini => match &gemini {
            Some(client) => client.clone(),
            None => Arc::new(UnconfiguredCollaborator::new(format!("{} not configured", GEMINI_KEY_ENV))),
        },
    };
    info!(backend = ?toml.pipeline.variant_generator, "Variant generator selected");

    Collaborators {
        fetcher: Arc::new(YtDlpFetcher::default()),
        frames: Arc::new(FfmpegFrameSource::default()),
        identifier,
        segmenter,
        generator,
    }
}
