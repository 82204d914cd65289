//! Named presets mapping to fixed optimization configs.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::OptimizationConfig;
use crate::error::SlimgError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    High,
    Medium,
    Low,
}

impl Preset {
    /// The fixed config bundle behind each preset. `low` keeps PNGs
    /// lossless; the aggressive presets allow palette quantization.
    pub fn config(&self) -> OptimizationConfig {
        match self {
            Preset::High => OptimizationConfig {
                quality: 40,
                png_lossy: true,
                ..OptimizationConfig::default()
            },
            Preset::Medium => OptimizationConfig {
                quality: 60,
                png_lossy: true,
                ..OptimizationConfig::default()
            },
            Preset::Low => OptimizationConfig {
                quality: 80,
                png_lossy: false,
                ..OptimizationConfig::default()
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::High => "high",
            Preset::Medium => "medium",
            Preset::Low => "low",
        }
    }
}

impl FromStr for Preset {
    type Err = SlimgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Preset::High),
            "medium" => Ok(Preset::Medium),
            "low" => Ok(Preset::Low),
            _ => Err(SlimgError::InvalidPreset(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_parsing() {
        assert_eq!("high".parse::<Preset>().unwrap(), Preset::High);
        assert_eq!("HIGH".parse::<Preset>().unwrap(), Preset::High);
        assert_eq!("High".parse::<Preset>().unwrap(), Preset::High);
        assert_eq!("mEdIuM".parse::<Preset>().unwrap(), Preset::Medium);
        assert_eq!("low".parse::<Preset>().unwrap(), Preset::Low);
    }

    #[test]
    fn unknown_preset_is_rejected() {
        assert!(matches!(
            "ultra".parse::<Preset>(),
            Err(SlimgError::InvalidPreset(_))
        ));
        assert!("".parse::<Preset>().is_err());
    }

    #[test]
    fn preset_configs() {
        assert_eq!(Preset::High.config().quality, 40);
        assert!(Preset::High.config().png_lossy);
        assert_eq!(Preset::Medium.config().quality, 60);
        assert!(Preset::Medium.config().png_lossy);
        assert_eq!(Preset::Low.config().quality, 80);
        assert!(!Preset::Low.config().png_lossy);
    }
}
