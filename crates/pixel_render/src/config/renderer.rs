//! Renderer, shader and window settings

use serde::{Serialize, Deserialize};
use std::path::Path;

use super::{Config, ConfigError};

/// Locations of the SPIR-V programs used by the 2D pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Create shader config with automatic path resolution
    ///
    /// Tries the usual shader output directories so binaries work from the
    /// workspace root as well as from a crate directory.
    pub fn with_path_resolution(base_vertex: &str, base_fragment: &str) -> Self {
        let shader_dirs = [
            "target/shaders/",
            "../target/shaders/",
            "../../target/shaders/",
            "shaders/",
            "./",
        ];

        let find = |file: &str| {
            shader_dirs
                .iter()
                .map(|dir| format!("{}{}", dir, file))
                .find(|candidate| Path::new(candidate).exists())
                .unwrap_or_else(|| format!("target/shaders/{}", file))
        };

        Self {
            vertex_shader_path: find(base_vertex),
            fragment_shader_path: find(base_fragment),
        }
    }

    /// Check that both SPIR-V files exist
    pub fn check_files(&self) -> Result<(), ConfigError> {
        for path in [&self.vertex_shader_path, &self.fragment_shader_path] {
            if !Path::new(path).exists() {
                return Err(ConfigError::Invalid(format!("shader not found: {}", path)));
            }
        }
        Ok(())
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution("2d.vert.spv", "2d.frag.spv")
    }
}

/// Defaults for newly opened windows
///
/// Windows are fixed-size unless `resizable` is set; the pixel layer keeps the
/// size a window was opened with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Title used when none is given
    pub title: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Whether the user may resize the window
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "pixel_render".to_string(),
            width: 400,
            height: 400,
            resizable: false,
        }
    }
}

/// Settings for the render core and every renderer created from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Whether to enable Vulkan validation layers; `None` follows the build type
    pub enable_validation: Option<bool>,
    /// Shader configuration
    pub shaders: ShaderConfig,
    /// Color the frame is cleared to, RGBA in 0..=1
    pub clear_color: [f32; 4],
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Window defaults
    pub window: WindowConfig,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            enable_validation: None,
            shaders: ShaderConfig::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            log_level: "info".to_string(),
            window: WindowConfig::default(),
        }
    }

    /// Set custom shader configuration
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Set the clear color
    pub fn with_clear_color(mut self, rgba: [f32; 4]) -> Self {
        self.clear_color = rgba;
        self
    }

    /// Set the default log filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Validation layers requested for this run
    ///
    /// Layers are only ever enabled in debug builds.
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.enable_validation.unwrap_or(true)
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("pixel_render application")
    }
}

impl Config for RendererConfig {
    /// Shader files are checked separately by [`ShaderConfig::check_files`]
    fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("application name cannot be empty".to_string()));
        }

        if self.clear_color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err(ConfigError::Invalid(format!(
                "clear color components must be within 0..=1, got {:?}",
                self.clear_color
            )));
        }

        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid("window size must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("pixel_render_{}_{}", std::process::id(), name))
    }

    #[test]
    fn toml_round_trip() {
        let config = RendererConfig::new("round trip")
            .with_clear_color([0.1, 0.2, 0.3, 1.0])
            .with_validation(false);
        let path = scratch_path("config.toml");

        config.save(&path).unwrap();
        let loaded = RendererConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, config);
    }

    #[test]
    fn ron_round_trip() {
        let config = RendererConfig::new("ron").with_log_level("debug");
        let path = scratch_path("config.ron");

        config.save(&path).unwrap();
        let loaded = RendererConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.log_level, "debug");
        assert_eq!(loaded.window, config.window);
    }

    #[test]
    fn missing_keys_take_defaults() {
        let text = "application_name = \"partial\"\n\n[window]\nwidth = 640\n";
        let config: RendererConfig = ConfigFormat::Toml.decode(text).unwrap();

        assert_eq!(config.application_name, "partial");
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, WindowConfig::default().height);
        assert_eq!(config.clear_color, RendererConfig::default().clear_color);
    }

    #[test]
    fn loading_rejects_invalid_values() {
        let path = scratch_path("bad_color.toml");
        std::fs::write(&path, "clear_color = [2.0, 0.0, 0.0, 1.0]\n").unwrap();

        let err = RendererConfig::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();

        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = RendererConfig::default().save(scratch_path("settings.json")).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
        assert!(matches!(RendererConfig::load("settings"), Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = RendererConfig::load(scratch_path("absent.ron")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn clear_color_out_of_range_fails_validation() {
        let config = RendererConfig::default().with_clear_color([2.0, 0.0, 0.0, 1.0]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn empty_name_fails_validation() {
        let config = RendererConfig::new("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn windows_are_fixed_size_by_default() {
        assert!(!WindowConfig::default().resizable);
        assert!(!RendererConfig::default().window.resizable);
    }
}
