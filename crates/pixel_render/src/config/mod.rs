//! Configuration files
//!
//! Settings are plain serde structs stored as TOML or RON, the format being
//! picked from the file extension. Missing keys take their defaults and every
//! loaded file is validated before use.

mod renderer;

pub use renderer::{RendererConfig, ShaderConfig, WindowConfig};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Frames the CPU may record ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Encodings a configuration file can use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `.toml`
    Toml,
    /// `.ron`
    Ron,
}

impl ConfigFormat {
    /// Format implied by the extension of `path`
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("ron") => Ok(Self::Ron),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Parse `text` in this format
    pub fn decode<T: DeserializeOwned>(self, text: &str) -> Result<T, ConfigError> {
        match self {
            Self::Toml => toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string())),
            Self::Ron => ron::from_str(text).map_err(|e| ConfigError::Parse(e.to_string())),
        }
    }

    /// Render `value` in this format
    pub fn encode<T: Serialize>(self, value: &T) -> Result<String, ConfigError> {
        match self {
            Self::Toml => toml::to_string_pretty(value).map_err(|e| ConfigError::Serialize(e.to_string())),
            Self::Ron => ron::ser::to_string_pretty(value, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string())),
        }
    }
}

/// A settings struct that can live in a file
pub trait Config: Serialize + DeserializeOwned + Default {
    /// Reject values the library cannot work with
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Read, decode and validate `path`
    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let text = std::fs::read_to_string(path)?;

        let config: Self = format.decode(&text)?;
        config.validate()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Encode and write to `path`
    fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let text = ConfigFormat::from_path(path)?.encode(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// Failure to read, write or accept a configuration
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The file could not be read or written
    #[error("config file: {0}")]
    Io(#[from] std::io::Error),

    /// The contents are not valid in the file's format
    #[error("malformed config: {0}")]
    Parse(String),

    /// The value could not be encoded
    #[error("cannot encode config: {0}")]
    Serialize(String),

    /// The extension names no known format
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}
