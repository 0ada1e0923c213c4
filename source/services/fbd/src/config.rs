// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Daemon configuration loaded from TOML.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::screen::Visual;

/// Errors produced while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`FbConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of its allowed range.
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Screen geometry and pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScreenConfig {
    /// Horizontal resolution in pixels.
    #[serde(default = "default_width")]
    pub width: u32,
    /// Vertical resolution in pixels.
    #[serde(default = "default_height")]
    pub height: u32,
    /// Pixel encoding.
    #[serde(default = "default_visual")]
    pub visual: Visual,
}

/// Table capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Limits {
    /// Viewport slots, including viewport 0.
    #[serde(default = "default_viewports")]
    pub viewports: usize,
    /// Pixmap slots.
    #[serde(default = "default_pixmaps")]
    pub pixmaps: usize,
    /// Animation slots.
    #[serde(default = "default_animations")]
    pub animations: usize,
}

/// Default text colours, `0xRRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StyleConfig {
    /// Foreground colour.
    #[serde(default = "default_fg")]
    pub fg: u32,
    /// Background colour.
    #[serde(default = "default_bg")]
    pub bg: u32,
}

/// Background work pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Timing {
    /// Wait timeout while background work is pending, in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Animations advance one frame every this many ticks.
    #[serde(default = "default_anim_rate_divisor")]
    pub anim_rate_divisor: u32,
}

/// Framebuffer daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FbConfig {
    /// Name registered with the naming service.
    #[serde(default = "default_service")]
    pub service: String,
    /// Screen geometry.
    #[serde(default)]
    pub screen: ScreenConfig,
    /// Table capacities.
    #[serde(default)]
    pub limits: Limits,
    /// Style of newly created viewports.
    #[serde(default)]
    pub style: StyleConfig,
    /// Background work pacing.
    #[serde(default)]
    pub timing: Timing,
}

fn default_service() -> String {
    "disp1".to_string()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_visual() -> Visual {
    Visual::Rgb0888
}
fn default_viewports() -> usize {
    128
}
fn default_pixmaps() -> usize {
    256
}
fn default_animations() -> usize {
    4
}
fn default_fg() -> u32 {
    0x000000
}
fn default_bg() -> u32 {
    0xf0f0f0
}
fn default_tick_ms() -> u64 {
    250
}
fn default_anim_rate_divisor() -> u32 {
    8
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self { width: default_width(), height: default_height(), visual: default_visual() }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self { viewports: default_viewports(), pixmaps: default_pixmaps(), animations: default_animations() }
    }
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self { fg: default_fg(), bg: default_bg() }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self { tick_ms: default_tick_ms(), anim_rate_divisor: default_anim_rate_divisor() }
    }
}

impl Default for FbConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            screen: ScreenConfig::default(),
            limits: Limits::default(),
            style: StyleConfig::default(),
            timing: Timing::default(),
        }
    }
}

// Handles carry the slot index in 16 bits.
const MAX_SLOTS: usize = 1 << 16;

impl FbConfig {
    /// Reads and validates the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config = Self::from_toml_str(&data)?;
        log::debug!("fbd: loaded config from {}", path.display());
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(data: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.is_empty() {
            return Err(ConfigError::Invalid("service name is empty"));
        }
        if self.screen.width == 0 || self.screen.height == 0 {
            return Err(ConfigError::Invalid("screen extent must be non-zero"));
        }
        if self.screen.width > u16::MAX as u32 || self.screen.height > u16::MAX as u32 {
            return Err(ConfigError::Invalid("screen extent does not fit a packed coordinate"));
        }
        if self.limits.viewports == 0 || self.limits.viewports > MAX_SLOTS {
            return Err(ConfigError::Invalid("viewport capacity out of range"));
        }
        if self.limits.pixmaps > MAX_SLOTS || self.limits.animations > MAX_SLOTS {
            return Err(ConfigError::Invalid("table capacity out of range"));
        }
        if self.timing.tick_ms == 0 {
            return Err(ConfigError::Invalid("tick period must be non-zero"));
        }
        if self.timing.anim_rate_divisor == 0 {
            return Err(ConfigError::Invalid("animation rate divisor must be non-zero"));
        }
        Ok(())
    }

    /// Wait timeout while background work is pending.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.timing.tick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_document_yields_defaults() {
        let config = FbConfig::from_toml_str("").unwrap();
        assert_eq!(config, FbConfig::default());
        assert_eq!(config.service, "disp1");
        assert_eq!(config.tick(), Duration::from_millis(250));
        assert_eq!(config.timing.anim_rate_divisor, 8);
        assert_eq!(config.style.bg, 0xf0f0f0);
    }

    #[test]
    fn load_from_file_overrides_fields() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "service = \"disp2\"\n[screen]\nwidth = 320\nvisual = \"rgb565\"\n[limits]\npixmaps = 16").unwrap();
        let config = FbConfig::load(file.path()).unwrap();
        assert_eq!(config.service, "disp2");
        assert_eq!(config.screen.width, 320);
        assert_eq!(config.screen.height, 480);
        assert_eq!(config.screen.visual, Visual::Rgb565);
        assert_eq!(config.limits.pixmaps, 16);
        assert_eq!(config.limits.viewports, 128);
    }

    #[test]
    fn unknown_visual_is_rejected() {
        let err = FbConfig::from_toml_str("[screen]\nvisual = \"rgb444\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        assert!(matches!(FbConfig::from_toml_str("[timing]\ntick_ms = 0"), Err(ConfigError::Invalid(_))));
        assert!(matches!(FbConfig::from_toml_str("[limits]\nviewports = 0"), Err(ConfigError::Invalid(_))));
        assert!(matches!(FbConfig::from_toml_str("[screen]\nwidth = 70000"), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = FbConfig::load(Path::new("/nonexistent/fbd.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/fbd.toml"));
    }
}
