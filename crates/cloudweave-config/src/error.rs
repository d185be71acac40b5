use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "Engine config file not found. Looked in:\n\
        - $CLOUDWEAVE_CONFIG\n\
        - current directory: cloudweave.local.yaml, cloudweave.yaml, .cloudweave.yaml\n\
        - ~/.config/cloudweave/cloudweave.yaml"
    )]
    ConfigFileNotFound,

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid setting '{field}': {message}")]
    InvalidSetting { field: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
