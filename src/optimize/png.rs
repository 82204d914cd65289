//! PNG and APNG optimization: pngquant (lossy palette quantization) plus
//! oxipng (lossless recompression).
//!
//! APNG never goes through pngquant: quantization would flatten the frame
//! sequence. Exit code 99 from pngquant means the quality floor could not
//! be met; that candidate is discarded, not an error.

use async_trait::async_trait;

use crate::config::OptimizationConfig;
use crate::container;
use crate::error::Result;
use crate::format::ImageFormat;
use crate::metadata;
use crate::optimize::{pick_smallest, run_codec, Optimizer};
use crate::quality;
use crate::result::{finalize, OptimizeResult};
use crate::runner::{run_tool, DEFAULT_TOOL_TIMEOUT};
use crate::tools;

pub struct PngOptimizer;

#[async_trait]
impl Optimizer for PngOptimizer {
    async fn optimize(&self, data: &[u8], config: &OptimizationConfig) -> Result<OptimizeResult> {
        let animated = container::png::is_apng(data);
        let fmt = if animated {
            ImageFormat::Apng
        } else {
            ImageFormat::Png
        };

        let cleaned: Vec<u8> = if config.strip_metadata {
            metadata::strip_metadata(data, fmt)?.into_owned()
        } else {
            data.to_vec()
        };

        // APNG and lossless-only requests skip quantization entirely.
        if animated || !config.png_lossy {
            let lossless = lossless_pass(cleaned.clone(), config.quality, config.strip_metadata)
                .await
                .unwrap_or(cleaned);
            return Ok(finalize(data, lossless, "oxipng", fmt));
        }

        let quality = config.quality;
        let strip = config.strip_metadata;
        let (quantized, lossless) = tokio::join!(
            quantize_pass(cleaned.clone(), quality, strip),
            lossless_pass(cleaned.clone(), quality, strip),
        );

        let mut candidates = Vec::new();
        if let Ok(Some(bytes)) = quantized {
            candidates.push((Ok(bytes), "pngquant + oxipng"));
        }
        candidates.push((
            Ok(lossless.unwrap_or(cleaned)),
            "oxipng",
        ));

        match pick_smallest(candidates) {
            Some((bytes, method)) => Ok(finalize(data, bytes, method, fmt)),
            None => Ok(crate::result::unchanged(data, fmt)),
        }
    }
}

/// pngquant then oxipng on its output. `Ok(None)` when pngquant is absent
/// or its quality floor was not met.
async fn quantize_pass(data: Vec<u8>, quality: u8, strip: bool) -> Result<Option<Vec<u8>>> {
    if !tools::have("pngquant") {
        return Ok(None);
    }

    let (floor, ceil) = quality::pngquant_range(quality);
    let range = format!("{floor}-{ceil}");
    let speed = quality::pngquant_speed(quality).to_string();
    let out = run_tool(
        "pngquant",
        &["--quality", &range, "--speed", &speed, "-", "--output", "-"],
        &data,
        DEFAULT_TOOL_TIMEOUT,
        &[99],
    )
    .await?;

    if out.exit_code == 99 {
        return Ok(None);
    }

    // Squeeze the quantized output losslessly as well.
    let squeezed = run_oxipng(out.stdout.clone(), quality, strip)
        .await
        .unwrap_or(out.stdout);
    Ok(Some(squeezed))
}

async fn lossless_pass(data: Vec<u8>, quality: u8, strip: bool) -> Result<Vec<u8>> {
    run_oxipng(data, quality, strip).await
}

async fn run_oxipng(data: Vec<u8>, quality: u8, strip: bool) -> Result<Vec<u8>> {
    run_codec("oxipng", move || {
        let mut options = oxipng::Options::from_preset(quality::oxipng_preset(quality));
        options.strip = if strip {
            oxipng::StripChunks::Safe
        } else {
            oxipng::StripChunks::None
        };
        oxipng::optimize_from_memory(&data, &options).map_err(|e| {
            crate::error::SlimgError::OptimizationFailed {
                tool: "oxipng".to_string(),
                stderr: e.to_string(),
            }
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::detect_format;

    /// Truecolor gradient PNG at no compression: plenty of room for oxipng.
    fn bloated_png(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgba8(image::RgbaImage::from_fn(
            width,
            height,
            |x, y| image::Rgba([(x / 4) as u8, (y / 4) as u8, 200, 255]),
        ));
        crate::codec::encode_png_rgba(&img, ::png::Compression::Fast).unwrap()
    }

    #[tokio::test]
    async fn lossless_path_shrinks_and_preserves_format() {
        let input = bloated_png(128, 128);
        let config = OptimizationConfig {
            png_lossy: false,
            ..OptimizationConfig::default()
        };
        let result = PngOptimizer.optimize(&input, &config).await.unwrap();
        assert!(result.optimized_size <= result.original_size);
        assert_eq!(
            detect_format(&result.optimized_bytes).unwrap(),
            ImageFormat::Png
        );
        let img = image::load_from_memory(&result.optimized_bytes).unwrap();
        assert_eq!((img.width(), img.height()), (128, 128));
    }

    #[tokio::test]
    async fn apng_keeps_animation_control_chunk() {
        // Splice an acTL chunk into a valid PNG so it reads as APNG.
        let plain = bloated_png(32, 32);
        let mut spliced = container::png::SIGNATURE.to_vec();
        for chunk in container::png::chunks(&plain) {
            spliced.extend_from_slice(chunk.raw);
            if chunk.chunk_type == b"IHDR" {
                spliced.extend_from_slice(&actl_chunk(3));
            }
        }
        assert!(container::png::is_apng(&spliced));

        let result = PngOptimizer
            .optimize(&spliced, &OptimizationConfig::new(40).unwrap())
            .await
            .unwrap();
        assert_eq!(result.format, ImageFormat::Apng);
        // Quantization must not have run, and the animation chunk survives.
        assert!(result.method == "oxipng" || result.method == "none");
        assert!(container::png::is_apng(&result.optimized_bytes));
        assert_eq!(container::png::frame_count(&result.optimized_bytes), 3);
    }

    fn actl_chunk(frames: u32) -> Vec<u8> {
        let mut payload = frames.to_be_bytes().to_vec();
        payload.extend_from_slice(&0u32.to_be_bytes());
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(b"acTL");
        out.extend_from_slice(&payload);
        let mut crc = flate2::Crc::new();
        crc.update(b"acTL");
        crc.update(&payload);
        out.extend_from_slice(&crc.sum().to_be_bytes());
        out
    }
}
