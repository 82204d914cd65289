//! Optimization parameters.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SlimgError};

pub const QUALITY_MIN: u8 = 1;
pub const QUALITY_MAX: u8 = 100;
pub const DEFAULT_QUALITY: u8 = 80;

/// Per-request optimization parameters. Lower `quality` means more
/// aggressive compression. Values are validated at construction; configs
/// arriving through serde must pass [`OptimizationConfig::validate`]
/// before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    pub quality: u8,
    pub strip_metadata: bool,
    pub progressive_jpeg: bool,
    pub png_lossy: bool,
    /// Cap on lossy size reduction, in percent. Lossless methods are never
    /// capped.
    pub max_reduction: Option<f32>,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            strip_metadata: true,
            progressive_jpeg: false,
            png_lossy: true,
            max_reduction: None,
        }
    }
}

impl OptimizationConfig {
    pub fn new(quality: u8) -> Result<Self> {
        let config = Self {
            quality,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(QUALITY_MIN..=QUALITY_MAX).contains(&self.quality) {
            return Err(SlimgError::InvalidConfig(format!(
                "quality {} out of range [{QUALITY_MIN}, {QUALITY_MAX}]",
                self.quality
            )));
        }
        if let Some(cap) = self.max_reduction {
            if !(0.0..=100.0).contains(&cap) || cap.is_nan() {
                return Err(SlimgError::InvalidConfig(format!(
                    "max_reduction {cap} out of range [0, 100]"
                )));
            }
        }
        Ok(())
    }

    pub fn with_strip_metadata(mut self, strip: bool) -> Self {
        self.strip_metadata = strip;
        self
    }

    pub fn with_progressive_jpeg(mut self, progressive: bool) -> Self {
        self.progressive_jpeg = progressive;
        self
    }

    pub fn with_png_lossy(mut self, lossy: bool) -> Self {
        self.png_lossy = lossy;
        self
    }

    pub fn with_max_reduction(mut self, cap: f32) -> Result<Self> {
        self.max_reduction = Some(cap);
        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = OptimizationConfig::default();
        assert_eq!(config.quality, 80);
        assert!(config.strip_metadata);
        assert!(config.png_lossy);
        assert!(!config.progressive_jpeg);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn quality_bounds_are_enforced() {
        assert!(OptimizationConfig::new(0).is_err());
        assert!(OptimizationConfig::new(1).is_ok());
        assert!(OptimizationConfig::new(100).is_ok());
        assert!(matches!(
            OptimizationConfig::new(101),
            Err(SlimgError::InvalidConfig(_))
        ));
    }

    #[test]
    fn max_reduction_bounds() {
        let config = OptimizationConfig::default();
        assert!(config.clone().with_max_reduction(50.0).is_ok());
        assert!(config.clone().with_max_reduction(100.0).is_ok());
        assert!(config.clone().with_max_reduction(-1.0).is_err());
        assert!(config.with_max_reduction(100.5).is_err());
    }

    #[test]
    fn deserialized_config_can_be_invalid_until_validated() {
        let config: OptimizationConfig = serde_json::from_str(r#"{"quality": 0}"#).unwrap();
        assert!(config.validate().is_err());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn validation_matches_range(q in any::<u8>()) {
            let result = OptimizationConfig::new(q);
            prop_assert_eq!(result.is_ok(), (1..=100).contains(&q));
        }
    }
}
