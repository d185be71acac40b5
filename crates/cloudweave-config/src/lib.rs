pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{EngineConfig, PollSettings, RetrySettings};

use std::path::{Path, PathBuf};

const CONFIG_ENV: &str = "CLOUDWEAVE_CONFIG";
const CANDIDATES: [&str; 3] = ["cloudweave.local.yaml", "cloudweave.yaml", ".cloudweave.yaml"];

/// Cloudweave's global config directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("cloudweave");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Locate the engine config file
///
/// Search order:
/// 1. `CLOUDWEAVE_CONFIG` (direct path)
/// 2. current directory: cloudweave.local.yaml, cloudweave.yaml, .cloudweave.yaml
/// 3. ~/.config/cloudweave/cloudweave.yaml
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!("{} points to missing file {}", CONFIG_ENV, path.display());
    }

    let current_dir = std::env::current_dir()?;
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    match get_config_dir() {
        Ok(config_dir) => {
            let global_config = config_dir.join("cloudweave.yaml");
            if global_config.exists() {
                return Ok(global_config);
            }
        }
        Err(e) => tracing::debug!("Skipping global config: {}", e),
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Read, parse and validate an engine config file
pub fn load_config(path: impl AsRef<Path>) -> Result<EngineConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let config = EngineConfig::from_yaml(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;

    tracing::debug!("Loaded engine config from {}", path.display());
    Ok(config)
}

/// Load the discovered config file, falling back to defaults when none exists
pub fn load_or_default() -> Result<EngineConfig> {
    match find_config_file() {
        Ok(path) => load_config(path),
        Err(ConfigError::ConfigFileNotFound) => {
            tracing::debug!("No engine config file found, using defaults");
            Ok(EngineConfig::default())
        }
        Err(e) => Err(e),
    }
}
