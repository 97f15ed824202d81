// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every key is optional; missing sections fall back to defaults.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backend::debug::DebugLevel;

/// Frames the CPU may record ahead of the GPU unless configured otherwise.
pub const DEFAULT_MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Upper bound accepted from the config file.
pub const MAX_FRAMES_IN_FLIGHT_LIMIT: usize = 4;

/// Root configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub renderer: RendererConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "lumen-vk".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Renderer settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RendererConfig {
    pub max_frames_in_flight: usize,
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub alpha_blend: bool,
    pub assets_dir: PathBuf,
    pub shader: String,
    /// Device extensions required on top of the swapchain extension.
    pub required_device_extensions: Vec<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: DEFAULT_MAX_FRAMES_IN_FLIGHT,
            present_mode: "mailbox".to_string(),
            clear_color: [0.0, 0.0, 0.2, 1.0],
            alpha_blend: false,
            assets_dir: PathBuf::from("assets"),
            shader: "Basic".to_string(),
            required_device_extensions: Vec::new(),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub validation_level: String,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            validation_level: "warning".to_string(),
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
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

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Frames in flight, clamped into the supported range
    pub fn max_frames_in_flight(&self) -> usize {
        let requested = self.renderer.max_frames_in_flight;
        let clamped = requested.clamp(1, MAX_FRAMES_IN_FLIGHT_LIMIT);
        if clamped != requested {
            log::warn!(
                "max_frames_in_flight = {} is out of range, using {}",
                requested,
                clamped
            );
        }
        clamped
    }

    /// Preferred present mode as Vulkan enum
    ///
    /// The swapchain still falls back to MAILBOX and then FIFO when the
    /// preference is not supported by the surface.
    pub fn preferred_present_mode(&self) -> vk::PresentModeKHR {
        match self.renderer.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.renderer.present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }

    /// Debug messenger verbosity, or `None` when validation is disabled
    pub fn validation_level(&self) -> Option<DebugLevel> {
        if !self.debug.validation_layers {
            return None;
        }
        Some(
            DebugLevel::parse(&self.debug.validation_level).unwrap_or_else(|| {
                log::warn!(
                    "Unknown validation level '{}', defaulting to warning",
                    self.debug.validation_level
                );
                DebugLevel::Warning
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.renderer.max_frames_in_flight, DEFAULT_MAX_FRAMES_IN_FLIGHT);
        assert_eq!(config.renderer.shader, "Basic");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[renderer]\npresent_mode = \"fifo\"\nrequired_device_extensions = [\"VK_KHR_foo\"]"
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.renderer.required_device_extensions, vec!["VK_KHR_foo"]);
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.renderer.assets_dir, PathBuf::from("assets"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[renderer\nshader = ").unwrap();
        assert!(Config::load_from_path(file.path()).is_err());
    }

    #[test]
    fn frames_in_flight_is_clamped() {
        let mut config = Config::default();
        config.renderer.max_frames_in_flight = 0;
        assert_eq!(config.max_frames_in_flight(), 1);
        config.renderer.max_frames_in_flight = 16;
        assert_eq!(config.max_frames_in_flight(), MAX_FRAMES_IN_FLIGHT_LIMIT);
    }

    #[test]
    fn unknown_present_mode_falls_back_to_mailbox() {
        let mut config = Config::default();
        config.renderer.present_mode = "vsync-please".to_string();
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn validation_level_follows_toggle() {
        let mut config = Config::default();
        config.debug.validation_layers = false;
        assert_eq!(config.validation_level(), None);

        config.debug.validation_layers = true;
        config.debug.validation_level = "verbose".to_string();
        assert_eq!(config.validation_level(), Some(DebugLevel::Verbose));
    }
}
