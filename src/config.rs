//! Configuration loading and management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::catalog::{CONTROLS_FILE, GUARDRAILS_FILE, RISKS_FILE, SAMPLES_FILE};
use crate::{Error, Result};

/// Directory holding the local config file
pub const CONFIG_DIR: &str = ".rcsa";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Harness configuration
    #[serde(default)]
    pub harness: HarnessConfig,

    /// Catalog data location
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Run record storage
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from file or default locations
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(|| {
            // Try .rcsa/config.toml in current directory
            let local = Path::new(CONFIG_DIR).join("config.toml");
            if local.exists() {
                return Some(local);
            }

            // Try ~/.rcsa/config.toml
            dirs::home_dir().map(|h| h.join(CONFIG_DIR).join("config.toml"))
        });

        match config_path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(&p)?;
                let config: Config = toml::from_str(&content)?;
                Ok(config)
            }
            Some(p) if path.is_some() => Err(Error::Config(format!(
                "Config file not found: {}",
                p.display()
            ))),
            _ => Ok(Config::default()),
        }
    }

    /// Catalog data directory, with `~` expanded
    pub fn data_dir(&self) -> PathBuf {
        expand_path(&self.catalog.data_dir)
    }

    /// Run record directory, with `~` expanded
    pub fn store_dir(&self) -> PathBuf {
        expand_path(&self.store.directory)
    }
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}

/// Harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Which harness to use (`openai` or `azure`)
    #[serde(default = "default_harness_kind")]
    pub kind: String,

    /// API base URL; for Azure the resource endpoint
    #[serde(default)]
    pub api_base: Option<String>,

    /// API key (can also be in environment)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model name for OpenAI-compatible endpoints
    #[serde(default = "default_model")]
    pub model: String,

    /// Azure deployment name
    #[serde(default)]
    pub deployment: Option<String>,

    /// Azure API version
    #[serde(default)]
    pub api_version: Option<String>,

    /// Per-request timeout, e.g. "90s" or "2m"
    #[serde(default = "default_timeout")]
    pub timeout: String,

    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_harness_kind() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4.1".to_string()
}

fn default_timeout() -> String {
    "120s".to_string()
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            kind: default_harness_kind(),
            api_base: None,
            api_key: None,
            model: default_model(),
            deployment: None,
            api_version: None,
            timeout: default_timeout(),
            temperature: None,
        }
    }
}

/// Catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Directory with risks, controls, guardrails and sample submissions
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory for `workflow_context_<run_id>.json` records
    #[serde(default = "default_store_dir")]
    pub directory: PathBuf,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".rcsa/runs")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            directory: default_store_dir(),
        }
    }
}

/// Initialize the `.rcsa` directory and an empty catalog under `root`
///
/// Existing files are left alone unless `force` is set.
pub fn init(root: &Path, force: bool) -> Result<()> {
    let config_dir = root.join(CONFIG_DIR);
    std::fs::create_dir_all(&config_dir)?;

    let defaults = Config::default();
    std::fs::create_dir_all(root.join(&defaults.store.directory))?;

    // Create default config if it doesn't exist
    let config_path = config_dir.join("config.toml");
    if force || !config_path.exists() {
        let config_str =
            toml::to_string_pretty(&defaults).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(&config_path, config_str)?;
        info!("Wrote {}", config_path.display());
    }

    // Empty catalog tables
    let data_dir = root.join(&defaults.catalog.data_dir);
    std::fs::create_dir_all(&data_dir)?;
    for file in [RISKS_FILE, CONTROLS_FILE, GUARDRAILS_FILE, SAMPLES_FILE] {
        let path = data_dir.join(file);
        if force || !path.exists() {
            std::fs::write(&path, "[]\n")?;
        }
    }

    Ok(())
}
