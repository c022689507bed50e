// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every field has a default, so a partial file (or none at all) works.

use crate::backend::device::DeviceKind;
use crate::renderer::RendererSettings;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title and Vulkan application name
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Only affects window creation
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Kestrel".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub vertex_count: u32,
    pub device_priority: Vec<DeviceKind>,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            vertex_shader: PathBuf::from("shaders/triangle.vert.spv"),
            fragment_shader: PathBuf::from("shaders/triangle.frag.spv"),
            vertex_count: 3,
            device_priority: DeviceKind::PRIORITY.to_vec(),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Validation layer, debug messenger and verbose logs
    pub enabled: bool,
    /// Write logs here instead of stderr
    pub log_file: Option<PathBuf>,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: cfg!(debug_assertions),
            log_file: None,
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults on any failure.
    ///
    /// The failure is handed back instead of logged, since this runs before
    /// the logger exists.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// The part of the configuration the renderer consumes.
    pub fn renderer_settings(&self) -> RendererSettings {
        RendererSettings {
            app_name: self.window.title.clone(),
            debug: self.debug.enabled,
            vertex_shader: self.graphics.vertex_shader.clone(),
            fragment_shader: self.graphics.fragment_shader.clone(),
            clear_color: self.graphics.clear_color,
            vertex_count: self.graphics.vertex_count,
            device_priority: self.graphics.device_priority.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            title = "Triangle"
            width = 1920

            [debug]
            enabled = true
            log_file = "kestrel.log"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Triangle");
        assert_eq!(config.window.width, 1920);
        assert_eq!(config.window.height, 720);
        assert!(!config.window.fullscreen);
        assert!(config.debug.enabled);
        assert_eq!(config.debug.log_file, Some(PathBuf::from("kestrel.log")));
        assert_eq!(config.graphics, GraphicsConfig::default());
    }

    #[test]
    fn device_priority_parses_lowercase_kinds() {
        let config = Config::parse(
            r#"
            [graphics]
            device_priority = ["integrated", "discrete", "cpu"]
            "#,
        )
        .unwrap();

        assert_eq!(
            config.graphics.device_priority,
            [DeviceKind::Integrated, DeviceKind::Discrete, DeviceKind::Cpu]
        );
    }

    #[test]
    fn unknown_device_kind_is_an_error() {
        assert!(Config::parse("[graphics]\ndevice_priority = [\"quantum\"]").is_err());
    }

    #[test]
    fn renderer_settings_follow_config() {
        let config = Config::parse(
            r#"
            [window]
            title = "Demo"

            [graphics]
            clear_color = [0.1, 0.2, 0.3, 1.0]
            vertex_count = 6

            [debug]
            enabled = false
            "#,
        )
        .unwrap();

        let settings = config.renderer_settings();
        assert_eq!(settings.app_name, "Demo");
        assert!(!settings.debug);
        assert_eq!(settings.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(settings.vertex_count, 6);
        assert_eq!(settings.device_priority, DeviceKind::PRIORITY);
    }

    #[test]
    fn malformed_file_gives_defaults_and_the_error() {
        let path = std::env::temp_dir().join("kestrel-malformed-config.toml");
        std::fs::write(&path, "[debug]\nenabled = \"yes\"\n").unwrap();

        let (config, error) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config, Config::default());
        let message = format!("{:#}", error.expect("malformed file must report an error"));
        assert!(message.contains("Failed to parse config file"), "{}", message);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("kestrel-missing-config.toml");
        assert_eq!(Config::load_from_path(&path).unwrap(), Config::default());
        assert!(Config::load_or_default(&path).1.is_none());
    }
}
