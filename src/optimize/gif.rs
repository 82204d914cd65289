//! GIF optimization through gifsicle.
//!
//! `--optimize=3` is the lossless baseline (frame bounding boxes, disposal
//! methods, LZW recompression); the aggressive tiers add lossy LZW and a
//! palette budget. Animated inputs keep all frames.

use async_trait::async_trait;

use crate::config::OptimizationConfig;
use crate::error::Result;
use crate::format::ImageFormat;
use crate::optimize::Optimizer;
use crate::quality;
use crate::result::{finalize, OptimizeResult};
use crate::runner::{run_tool, DEFAULT_TOOL_TIMEOUT};
use crate::tools;

pub struct GifOptimizer;

#[async_trait]
impl Optimizer for GifOptimizer {
    async fn optimize(&self, data: &[u8], config: &OptimizationConfig) -> Result<OptimizeResult> {
        if !tools::have("gifsicle") {
            return Ok(crate::result::unchanged(data, ImageFormat::Gif));
        }

        let (tier_args, method) = quality::gifsicle_tier(config.quality);
        let mut args = vec!["--optimize=3"];
        args.extend_from_slice(tier_args);

        match run_tool("gifsicle", &args, data, DEFAULT_TOOL_TIMEOUT, &[]).await {
            Ok(out) if !out.stdout.is_empty() => {
                Ok(finalize(data, out.stdout, method, ImageFormat::Gif))
            }
            _ => Ok(crate::result::unchanged(data, ImageFormat::Gif)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container;
    use crate::format::detect_format;

    fn single_frame_gif() -> Vec<u8> {
        use image::codecs::gif::GifEncoder;
        use image::{Frame, RgbaImage};

        let img = RgbaImage::from_fn(64, 64, |x, y| {
            image::Rgba([(x * 3) as u8, (y * 3) as u8, 128, 255])
        });
        let mut out = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut out);
            encoder.encode_frame(Frame::new(img)).unwrap();
        }
        out
    }

    #[tokio::test]
    async fn gif_stays_gif_with_same_frame_count() {
        let input = single_frame_gif();
        let result = GifOptimizer
            .optimize(&input, &OptimizationConfig::new(60).unwrap())
            .await
            .unwrap();
        assert_eq!(result.format, ImageFormat::Gif);
        assert!(result.optimized_size <= result.original_size);
        assert!(result.method.starts_with("gifsicle") || result.is_noop());
        assert_eq!(detect_format(&result.optimized_bytes).unwrap(), ImageFormat::Gif);
        assert_eq!(container::gif::frame_count(&result.optimized_bytes), 1);
        let img = image::load_from_memory(&result.optimized_bytes).unwrap();
        assert_eq!((img.width(), img.height()), (64, 64));
    }

    #[tokio::test]
    async fn missing_tool_falls_back_to_original() {
        // Regardless of whether gifsicle is installed, the result obeys the
        // output contract.
        let input = single_frame_gif();
        let result = GifOptimizer
            .optimize(&input, &OptimizationConfig::new(90).unwrap())
            .await
            .unwrap();
        assert!(result.optimized_size <= result.original_size);
    }
}
