// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every field has a default, so a missing file, a missing section or a
// missing key all fall back to something that runs.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use crate::backend::DeviceOptions;
use crate::renderer::RendererConfig;

pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "frameloop".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Clamped to `1..=MAX_FRAMES_IN_FLIGHT`.
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
    pub msaa_samples: u32,
    /// Holds `mesh.vert.spv` and `mesh.frag.spv`.
    pub shader_dir: PathBuf,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            clear_color: [0.1, 0.2, 0.8, 1.0],
            msaa_samples: 4,
            shader_dir: PathBuf::from("shaders"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub object_names: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            object_names: true,
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

    pub fn frames_in_flight(&self) -> usize {
        let requested = self.graphics.frames_in_flight;
        let clamped = requested.clamp(1, MAX_FRAMES_IN_FLIGHT);
        if clamped != requested {
            log::warn!(
                "frames_in_flight = {} is out of range, using {}",
                requested,
                clamped
            );
        }
        clamped
    }

    pub fn renderer_config(&self) -> RendererConfig {
        RendererConfig {
            frames_in_flight: self.frames_in_flight(),
            clear_color: self.graphics.clear_color,
            msaa_samples: self.graphics.msaa_samples.max(1),
        }
    }

    /// Validation only ever runs in debug builds.
    pub fn device_options(&self) -> DeviceOptions {
        DeviceOptions {
            app_name: self.window.title.clone(),
            validation: cfg!(debug_assertions) && self.debug.validation_layers,
            object_names: self.debug.object_names,
        }
    }

    /// Unknown level names fall back to `Info`.
    pub fn log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or_else(|_| {
            log::warn!("Unknown log level '{}', defaulting to info", self.debug.log_level);
            log::LevelFilter::Info
        })
    }
}
