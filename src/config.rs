//! Renderer options

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::util::Result;

/// Smallest and largest number of global illumination bounces.
pub const MIN_BOUNCES: u32 = 1;
pub const MAX_BOUNCES: u32 = 6;

/// Tone curve applied when composing HDR radiance to the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToneMapping {
    #[default]
    Linear,
    Reinhard,
    Uncharted2,
    Cineon,
    AcesFilmic,
}

impl ToneMapping {
    /// Value of the `TONE_MAPPING` shader constant.
    pub fn shader_id(self) -> u32 {
        match self {
            Self::Linear => 0,
            Self::Reinhard => 1,
            Self::Uncharted2 => 2,
            Self::Cineon => 3,
            Self::AcesFilmic => 4,
        }
    }
}

/// User-facing renderer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererOptions {
    /// Global illumination bounces, clamped to `1..=6` when the pipeline is built
    pub bounces: u32,
    /// Full-resolution frame every call instead of tiled accumulation (debug/benchmark)
    pub max_hardware_usage: bool,
    pub tone_mapping: ToneMapping,
    pub tone_mapping_exposure: f32,
    pub tone_mapping_white_point: f32,
    /// Keep rendering while the host reports no input focus
    pub render_when_off_focus: bool,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            bounces: 2,
            max_hardware_usage: false,
            tone_mapping: ToneMapping::Linear,
            tone_mapping_exposure: 1.0,
            tone_mapping_white_point: 1.0,
            render_when_off_focus: true,
        }
    }
}

impl RendererOptions {
    /// Bounce count as the shaders will see it.
    pub fn clamped_bounces(&self) -> u32 {
        self.bounces.clamp(MIN_BOUNCES, MAX_BOUNCES)
    }

    pub fn set_bounces(&mut self, bounces: u32) {
        self.bounces = bounces.clamp(MIN_BOUNCES, MAX_BOUNCES);
    }

    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Save options as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let o = RendererOptions::default();
        assert_eq!(o.bounces, 2);
        assert!(!o.max_hardware_usage);
        assert_eq!(o.tone_mapping, ToneMapping::Linear);
        assert_eq!(o.tone_mapping_exposure, 1.0);
        assert_eq!(o.tone_mapping_white_point, 1.0);
        assert!(o.render_when_off_focus);
    }

    #[test]
    fn test_bounces_clamped() {
        let mut o = RendererOptions::default();
        o.set_bounces(0);
        assert_eq!(o.bounces, 1);
        o.set_bounces(40);
        assert_eq!(o.bounces, 6);

        o.bounces = 99;
        assert_eq!(o.clamped_bounces(), 6);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let o: RendererOptions =
            serde_json::from_str(r#"{ "bounces": 4, "tone_mapping": "acesFilmic" }"#).unwrap();
        assert_eq!(o.bounces, 4);
        assert_eq!(o.tone_mapping, ToneMapping::AcesFilmic);
        assert!(o.render_when_off_focus);
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        let mut o = RendererOptions::default();
        o.tone_mapping = ToneMapping::Uncharted2;
        o.tone_mapping_white_point = 4.0;
        o.save(&path).unwrap();
        assert_eq!(RendererOptions::load(&path).unwrap(), o);
    }
}
