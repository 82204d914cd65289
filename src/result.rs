//! The optimize result record and the output-never-larger contract.

use serde::Serialize;

use crate::format::ImageFormat;

pub const METHOD_NONE: &str = "none";

#[derive(Debug, Clone, Serialize)]
pub struct OptimizeResult {
    pub success: bool,
    pub original_size: usize,
    pub optimized_size: usize,
    pub reduction_percent: f32,
    pub format: ImageFormat,
    pub method: String,
    #[serde(skip)]
    pub optimized_bytes: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OptimizeResult {
    pub fn is_noop(&self) -> bool {
        self.method == METHOD_NONE
    }
}

/// Build a result from the winning candidate, enforcing the guarantee that
/// output is never larger than input. Every optimizer and the estimator's
/// exact path funnel through here; nothing else constructs a result.
pub fn finalize(original: &[u8], optimized: Vec<u8>, method: &str, format: ImageFormat) -> OptimizeResult {
    let original_size = original.len();
    let optimized_size = optimized.len();

    if optimized_size >= original_size {
        return OptimizeResult {
            success: true,
            original_size,
            optimized_size: original_size,
            reduction_percent: 0.0,
            format,
            method: METHOD_NONE.to_string(),
            optimized_bytes: original.to_vec(),
            message: Some("image is already optimized".to_string()),
        };
    }

    let reduction = (1.0 - optimized_size as f64 / original_size as f64) * 100.0;
    OptimizeResult {
        success: true,
        original_size,
        optimized_size,
        reduction_percent: round1(reduction),
        format,
        method: method.to_string(),
        optimized_bytes: optimized,
        message: None,
    }
}

/// Pass-through result for inputs where every candidate failed or none
/// applied.
pub fn unchanged(original: &[u8], format: ImageFormat) -> OptimizeResult {
    finalize(original, original.to_vec(), METHOD_NONE, format)
}

fn round1(value: f64) -> f32 {
    ((value * 10.0).round() / 10.0) as f32
}
