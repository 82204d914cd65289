//! Error types shared across the optimization and estimation core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SlimgError {
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid preset {0:?}: expected \"high\", \"medium\" or \"low\"")]
    InvalidPreset(String),

    #[error("file of {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: usize, limit: usize },

    #[error("{tool} timed out after {timeout_secs}s")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("{tool} failed: {stderr}")]
    OptimizationFailed { tool: String, stderr: String },

    #[error("compression queue full, retry after {retry_after_secs}s")]
    Overloaded { retry_after_secs: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, SlimgError>;
