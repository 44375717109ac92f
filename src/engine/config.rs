//! Runtime configuration.
//!
//! Loaded from an optional JSON file; every field has a default so a partial
//! file (or none at all) is valid. CLI flags are applied on top by `cli`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::{EngineError, EngineResult};

/// Vulkan `VkFormat` values used for swapchain selection.
pub mod vk_format {
    pub const R8G8B8A8_SRGB: i64 = 43;
    pub const B8G8R8A8_SRGB: i64 = 50;
    pub const D16_UNORM: i64 = 124;
}

/// Reference space the views, hands and layer are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceSpace {
    /// Floor-level, room-scale origin.
    Stage,
    /// Seated origin at the initial head position.
    Local,
}

/// What to do when the runtime does not offer the configured depth format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthPolicy {
    /// Render every view without a depth target.
    Disable,
    /// Fail at startup.
    Require,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XrConfig {
    pub app_name: String,
    pub reference_space: ReferenceSpace,
    pub near_z: f32,
    pub far_z: f32,
    pub swapchain_wait_timeout_ms: u64,
    pub grab_threshold: f32,
    pub haptic_amplitude: f32,
    /// Tried in order; the runtime's first format is the fallback.
    pub preferred_color_formats: Vec<i64>,
    pub depth_format: i64,
    pub depth_policy: DepthPolicy,
    pub companion_window: bool,
    pub idle_poll_interval_ms: u64,
}

impl Default for XrConfig {
    fn default() -> Self {
        Self {
            app_name: "xr-frame-loop".to_string(),
            reference_space: ReferenceSpace::Stage,
            near_z: 0.01,
            far_z: 100.0,
            swapchain_wait_timeout_ms: 10,
            grab_threshold: 0.75,
            haptic_amplitude: 0.5,
            preferred_color_formats: vec![vk_format::R8G8B8A8_SRGB, vk_format::B8G8R8A8_SRGB],
            depth_format: vk_format::D16_UNORM,
            depth_policy: DepthPolicy::Disable,
            companion_window: true,
            idle_poll_interval_ms: 100,
        }
    }
}

impl XrConfig {
    pub fn load(path: &Path) -> EngineResult<Self> {
        let text = fs::read_to_string(path)?;
        let config: XrConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.app_name.is_empty() {
            return Err(EngineError::Config("app_name must not be empty".into()));
        }
        if !(self.near_z > 0.0) {
            return Err(EngineError::Config(format!("near_z must be positive, got {}", self.near_z)));
        }
        if self.near_z >= self.far_z {
            return Err(EngineError::Config(format!(
                "near_z ({}) must be less than far_z ({})",
                self.near_z, self.far_z
            )));
        }
        if !(0.0..=1.0).contains(&self.grab_threshold) {
            return Err(EngineError::Config(format!(
                "grab_threshold must be in [0, 1], got {}",
                self.grab_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.haptic_amplitude) {
            return Err(EngineError::Config(format!(
                "haptic_amplitude must be in [0, 1], got {}",
                self.haptic_amplitude
            )));
        }
        if self.swapchain_wait_timeout_ms == 0 {
            return Err(EngineError::Config("swapchain_wait_timeout_ms must be non-zero".into()));
        }
        Ok(())
    }
}
