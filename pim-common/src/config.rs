//! Configuration loading and root folder resolution
//!
//! Resolution follows the same priority order everywhere:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing TOML file is never fatal: the service logs a warning and starts
//! with defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default bind address for the imagery service
pub const DEFAULT_BIND: &str = "127.0.0.1:8000";

/// Logging section of the TOML config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing filter directive (e.g. "info", "pim_ai=debug")
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Which generation backend produces the enhanced variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VariantGeneratorKind {
    /// Hugging Face text-to-image inference
    #[default]
    Huggingface,
    /// Gemini image model (image + prompt)
    Gemini,
}

/// `[pipeline]` section: tunables for the processing stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Frames sampled per second of source video
    pub frame_sample_rate_fps: f64,
    /// Hard cap on extracted frames
    pub max_frames: usize,
    /// Frames shown to the identification call
    pub identify_sample_count: usize,
    /// Frames offered when choosing an item's best frame
    pub best_frame_sample_count: usize,
    /// Per-item concurrency inside Segment and Enhance
    pub max_parallel_items: usize,
    pub variant_generator: VariantGeneratorKind,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            frame_sample_rate_fps: 1.0,
            max_frames: 120,
            identify_sample_count: 10,
            best_frame_sample_count: 20,
            max_parallel_items: 2,
            variant_generator: VariantGeneratorKind::default(),
        }
    }
}

/// Contents of `pim-ai.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub bind: Option<String>,
    pub gemini_api_key: Option<String>,
    pub huggingface_api_token: Option<String>,
    pub cors_origins: Vec<String>,
    pub logging: LoggingConfig,
    pub pipeline: PipelineSettings,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            bind: None,
            gemini_api_key: None,
            huggingface_api_token: None,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:3001".to_string(),
            ],
            logging: LoggingConfig::default(),
            pipeline: PipelineSettings::default(),
        }
    }
}

/// Load TOML config from `path`
///
/// A missing file yields defaults (with a warning); a malformed file is an error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;

    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Resolve the config file path: CLI → ENV → platform config dir
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str, file_name: &str) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    dirs::config_dir()
        .map(|d| d.join("pim").join(file_name))
        .unwrap_or_else(|| PathBuf::from(file_name))
}

/// Root folder resolution: CLI → ENV → TOML → OS default
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_config: &TomlConfig,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = &toml_config.root_folder {
        return path.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("pim"))
        .unwrap_or_else(|| PathBuf::from("./pim_data"))
}

/// Creates the root folder layout on startup
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create root folder and the per-job parent directory if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(self.jobs_dir())?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parent of every `<job_id>/` work directory
    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs")
    }
}
