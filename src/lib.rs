//! slimg: the optimization and estimation core of an image compression
//! service.
//!
//! The crate does two things:
//! - **Optimize**: detect one of twelve formats from magic bytes, run the
//!   format's competing compression candidates concurrently, and return
//!   the smallest output under an absolute output-never-larger guarantee.
//! - **Estimate**: predict the optimized size by compressing a downsized
//!   sample with the same encoders and extrapolating bits-per-pixel.
//!
//! Transport, fetching, auth and storage are the caller's business; the
//! inputs and outputs here are plain byte buffers and value records.

pub mod codec;
pub mod config;
pub mod container;
pub mod error;
pub mod estimate;
pub mod format;
pub mod gate;
pub mod logging;
pub mod metadata;
pub mod optimize;
pub mod preset;
pub mod quality;
pub mod result;
pub mod runner;
pub mod settings;
pub mod tools;

pub use config::OptimizationConfig;
pub use error::{Result, SlimgError};
pub use estimate::{estimate, estimate_from_thumbnail, EstimateResponse};
pub use format::{detect_format, ImageFormat};
pub use gate::CompressionGate;
pub use optimize::{optimize_image, sanitize_svg};
pub use preset::Preset;
pub use result::OptimizeResult;
pub use settings::Settings;
