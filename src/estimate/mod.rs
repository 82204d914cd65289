//! Sample-based size estimation.
//!
//! Rather than predicting from heuristics, the estimator runs real
//! encoders on a downsized sample and extrapolates bits-per-pixel to the
//! original pixel count. BPP for a given content/quality pair is
//! approximately resolution-invariant for block-based codecs, provided
//! the sample is large enough for the codec's rate-distortion behavior to
//! settle; hence the per-format width caps.
//!
//! Small images, SVG and animated inputs skip sampling and run the real
//! optimizer on the full file for an exact answer.

pub mod header;
pub mod sample;

use std::time::Duration;

use image::DynamicImage;
use serde::Serialize;
use tracing::debug;

use crate::codec;
use crate::config::OptimizationConfig;
use crate::error::Result;
use crate::format::{detect_format, ImageFormat};
use crate::optimize::{optimize_ungated, run_codec};
use crate::runner::DEFAULT_TOOL_TIMEOUT;
use header::ColorKind;

/// Images at or below this pixel count are optimized outright.
pub const EXACT_PIXEL_THRESHOLD: u64 = 150_000;

/// Budget for the sample compression step before the conservative
/// fallback answer is returned.
pub const SAMPLE_TIMEOUT: Duration = Duration::from_secs(3);

const DIRECT_WIDTH_JPEG: u32 = 1600;
const DIRECT_WIDTH_MODERN: u32 = 800;
const GENERIC_SAMPLE_WIDTH: u32 = 300;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Potential {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct EstimateResponse {
    pub original_size: usize,
    pub original_format: ImageFormat,
    pub dimensions: Dimensions,
    pub color_type: Option<ColorKind>,
    pub bit_depth: Option<u8>,
    pub estimated_optimized_size: usize,
    pub estimated_reduction_percent: f32,
    pub optimization_potential: Potential,
    pub method: String,
    pub already_optimized: bool,
    pub confidence: Confidence,
}

/// Estimate compression savings for `data` without running the full
/// optimizer pipeline on large inputs.
///
/// The returned estimate never exceeds the original size, and this call
/// does not fail for inputs the optimizer itself could handle.
pub async fn estimate(data: &[u8], config: &OptimizationConfig) -> Result<EstimateResponse> {
    config.validate()?;
    let fmt = detect_format(data)?;

    // SVG has no pixel grid to sample; compress the real thing.
    if matches!(fmt, ImageFormat::Svg | ImageFormat::Svgz) {
        let info = header::analyze(data, fmt);
        return estimate_exact(data, fmt, config, info.width, info.height, None, None).await;
    }

    let info = header::analyze(data, fmt);
    let img = match decode_for_sampling(fmt, data).await {
        Ok(img) => img,
        // Undecodable input: the optimizer path still produces a valid
        // (possibly no-op) result, so fall through to exact mode.
        Err(e) => {
            debug!(format = %fmt, error = %e, "estimator decode failed, using exact mode");
            return estimate_exact(data, fmt, config, info.width, info.height, None, None).await;
        }
    };

    let (width, height) = (img.width(), img.height());
    let (color, depth) = header::color_from_image(&img);
    let original_pixels = width as u64 * height as u64;

    if info.frame_count > 1 || original_pixels <= EXACT_PIXEL_THRESHOLD {
        return estimate_exact(data, fmt, config, width, height, Some(color), Some(depth)).await;
    }

    match fmt {
        ImageFormat::Jpeg => {
            direct_estimate(data, img, fmt, config, DIRECT_WIDTH_JPEG, color, depth).await
        }
        ImageFormat::Png
        | ImageFormat::Apng
        | ImageFormat::Webp
        | ImageFormat::Avif
        | ImageFormat::Heic
        | ImageFormat::Jxl => {
            direct_estimate(data, img, fmt, config, DIRECT_WIDTH_MODERN, color, depth).await
        }
        ImageFormat::Bmp | ImageFormat::Tiff | ImageFormat::Gif => {
            generic_estimate(data, img, fmt, config, color, depth).await
        }
        ImageFormat::Svg | ImageFormat::Svgz => unreachable!("handled above"),
    }
}

/// Estimate from a pre-resized thumbnail of a large original, avoiding the
/// full download. The thumbnail was produced externally, so confidence is
/// capped at `medium`.
pub async fn estimate_from_thumbnail(
    thumbnail: &[u8],
    original_file_size: usize,
    original_width: u32,
    original_height: u32,
    config: &OptimizationConfig,
) -> Result<EstimateResponse> {
    config.validate()?;
    let fmt = detect_format(thumbnail)?;
    let dimensions = Dimensions {
        width: original_width,
        height: original_height,
    };

    let (color, depth) = match decode_for_sampling(fmt, thumbnail).await {
        Ok(img) => {
            let (c, d) = header::color_from_image(&img);
            (Some(c), Some(d))
        }
        Err(_) => (None, None),
    };

    let info = header::analyze(thumbnail, fmt);
    let thumb_pixels = if info.width > 0 && info.height > 0 {
        info.width as u64 * info.height as u64
    } else {
        0
    };

    let result =
        match tokio::time::timeout(SAMPLE_TIMEOUT, optimize_ungated(fmt, thumbnail, config)).await
        {
            Ok(Ok(result)) => result,
            _ => {
                return Ok(conservative_fallback(
                    fmt,
                    config,
                    original_file_size,
                    dimensions,
                    color,
                    depth,
                ))
            }
        };

    if result.is_noop() || thumb_pixels == 0 {
        return Ok(EstimateResponse {
            original_size: original_file_size,
            original_format: fmt,
            dimensions,
            color_type: color,
            bit_depth: depth,
            estimated_optimized_size: original_file_size,
            estimated_reduction_percent: 0.0,
            optimization_potential: Potential::Low,
            method: result.method,
            already_optimized: true,
            confidence: Confidence::Medium,
        });
    }

    let original_pixels = original_width as u64 * original_height as u64;
    Ok(extrapolate(
        fmt,
        original_file_size,
        dimensions,
        color,
        depth,
        result.optimized_size,
        thumb_pixels,
        original_pixels,
        result.method,
        Confidence::Medium,
    ))
}

async fn decode_for_sampling(fmt: ImageFormat, data: &[u8]) -> Result<DynamicImage> {
    match fmt {
        ImageFormat::Jxl => {
            let png = codec::decode_jxl_to_png(data, DEFAULT_TOOL_TIMEOUT).await?;
            run_codec("image", move || Ok(image::load_from_memory(&png)?)).await
        }
        _ => {
            let data = data.to_vec();
            run_codec("image", move || codec::decode_raster(fmt, &data)).await
        }
    }
}

/// Exact mode: run the real optimizer on the full payload.
async fn estimate_exact(
    data: &[u8],
    fmt: ImageFormat,
    config: &OptimizationConfig,
    width: u32,
    height: u32,
    color: Option<ColorKind>,
    depth: Option<u8>,
) -> Result<EstimateResponse> {
    let result = optimize_ungated(fmt, data, config).await?;
    let already_optimized = result.is_noop();
    let reduction = if already_optimized {
        0.0
    } else {
        result.reduction_percent
    };

    Ok(EstimateResponse {
        original_size: data.len(),
        original_format: fmt,
        dimensions: Dimensions { width, height },
        color_type: color,
        bit_depth: depth,
        estimated_optimized_size: result.optimized_size,
        estimated_reduction_percent: reduction,
        optimization_potential: classify_potential(reduction),
        method: result.method,
        already_optimized,
        confidence: Confidence::High,
    })
}

/// Direct-encode mode: downsample, run the codec once at the mapped
/// quality, extrapolate BPP.
async fn direct_estimate(
    data: &[u8],
    img: DynamicImage,
    fmt: ImageFormat,
    config: &OptimizationConfig,
    max_width: u32,
    color: ColorKind,
    depth: u8,
) -> Result<EstimateResponse> {
    let file_size = data.len();
    let dimensions = Dimensions {
        width: img.width(),
        height: img.height(),
    };
    let original_pixels = img.width() as u64 * img.height() as u64;

    let sample = run_codec("resize", move || Ok(sample::downsample(&img, max_width))).await?;
    let sample_pixels = sample.width() as u64 * sample.height() as u64;

    let encoded = tokio::time::timeout(
        SAMPLE_TIMEOUT,
        sample::direct_encode(sample, fmt, config),
    )
    .await;

    match encoded {
        Ok(Ok((encoded_len, method))) => Ok(extrapolate(
            fmt,
            file_size,
            dimensions,
            Some(color),
            Some(depth),
            encoded_len,
            sample_pixels,
            original_pixels,
            method.to_string(),
            Confidence::High,
        )),
        _ => Ok(conservative_fallback(
            fmt,
            config,
            file_size,
            dimensions,
            Some(color),
            Some(depth),
        )),
    }
}

/// Generic-sample mode: re-encode the sample as the input format at
/// minimal compression, then run the real optimizer on it.
async fn generic_estimate(
    data: &[u8],
    img: DynamicImage,
    fmt: ImageFormat,
    config: &OptimizationConfig,
    color: ColorKind,
    depth: u8,
) -> Result<EstimateResponse> {
    let file_size = data.len();
    let dimensions = Dimensions {
        width: img.width(),
        height: img.height(),
    };
    let original_pixels = img.width() as u64 * img.height() as u64;

    let (sample_bytes, sample_pixels) = {
        let built = run_codec("resize", move || {
            let sample = sample::downsample(&img, GENERIC_SAMPLE_WIDTH);
            let pixels = sample.width() as u64 * sample.height() as u64;
            Ok((sample::generic_sample_bytes(&sample, fmt)?, pixels))
        })
        .await;
        match built {
            Ok(v) => v,
            Err(_) => {
                return Ok(conservative_fallback(
                    fmt,
                    config,
                    file_size,
                    dimensions,
                    Some(color),
                    Some(depth),
                ))
            }
        }
    };

    let result = match tokio::time::timeout(
        SAMPLE_TIMEOUT,
        optimize_ungated(fmt, &sample_bytes, config),
    )
    .await
    {
        Ok(Ok(result)) => result,
        _ => {
            return Ok(conservative_fallback(
                fmt,
                config,
                file_size,
                dimensions,
                Some(color),
                Some(depth),
            ))
        }
    };

    if result.is_noop() {
        return Ok(EstimateResponse {
            original_size: file_size,
            original_format: fmt,
            dimensions,
            color_type: Some(color),
            bit_depth: Some(depth),
            estimated_optimized_size: file_size,
            estimated_reduction_percent: 0.0,
            optimization_potential: Potential::Low,
            method: result.method,
            already_optimized: true,
            confidence: Confidence::High,
        });
    }

    Ok(extrapolate(
        fmt,
        file_size,
        dimensions,
        Some(color),
        Some(depth),
        result.optimized_size,
        sample_pixels,
        original_pixels,
        result.method,
        Confidence::High,
    ))
}

/// Scale the sample's output BPP to the original pixel count and clamp to
/// the original size.
#[allow(clippy::too_many_arguments)]
fn extrapolate(
    fmt: ImageFormat,
    file_size: usize,
    dimensions: Dimensions,
    color: Option<ColorKind>,
    depth: Option<u8>,
    sample_output_size: usize,
    sample_pixels: u64,
    original_pixels: u64,
    method: String,
    confidence: Confidence,
) -> EstimateResponse {
    let sample_bpp = sample_output_size as f64 * 8.0 / sample_pixels.max(1) as f64;
    let mut estimated = (sample_bpp * original_pixels as f64 / 8.0) as usize;
    estimated = estimated.min(file_size);

    let reduction = round1((file_size - estimated) as f64 / file_size.max(1) as f64 * 100.0);
    EstimateResponse {
        original_size: file_size,
        original_format: fmt,
        dimensions,
        color_type: color,
        bit_depth: depth,
        estimated_optimized_size: estimated,
        estimated_reduction_percent: reduction,
        optimization_potential: classify_potential(reduction),
        method,
        already_optimized: reduction == 0.0,
        confidence,
    }
}

/// 30% for lossy-leaning configs, 5% for lossless: the answer returned
/// when the sample could not be compressed within the time budget.
fn conservative_fallback(
    fmt: ImageFormat,
    config: &OptimizationConfig,
    file_size: usize,
    dimensions: Dimensions,
    color: Option<ColorKind>,
    depth: Option<u8>,
) -> EstimateResponse {
    let reduction: f32 = if config.quality < 70 { 30.0 } else { 5.0 };
    let estimated = (file_size as f64 * (1.0 - reduction as f64 / 100.0)) as usize;
    EstimateResponse {
        original_size: file_size,
        original_format: fmt,
        dimensions,
        color_type: color,
        bit_depth: depth,
        estimated_optimized_size: estimated.min(file_size),
        estimated_reduction_percent: reduction,
        optimization_potential: classify_potential(reduction),
        method: default_method_label(fmt, config).to_string(),
        already_optimized: false,
        confidence: Confidence::Low,
    }
}

fn default_method_label(fmt: ImageFormat, config: &OptimizationConfig) -> &'static str {
    match fmt {
        ImageFormat::Jpeg => "mozjpeg",
        ImageFormat::Webp => "webp",
        ImageFormat::Avif => "avif-reencode",
        ImageFormat::Heic => "heic-reencode",
        ImageFormat::Jxl => "jxl-reencode",
        ImageFormat::Png | ImageFormat::Apng => {
            if config.png_lossy && config.quality < 70 {
                "pngquant + oxipng"
            } else {
                "oxipng"
            }
        }
        ImageFormat::Gif => "gifsicle",
        ImageFormat::Bmp => "bmp-palette",
        ImageFormat::Tiff => "tiff-deflate",
        ImageFormat::Svg | ImageFormat::Svgz => "svg-minify",
    }
}

fn classify_potential(reduction: f32) -> Potential {
    if reduction >= 30.0 {
        Potential::High
    } else if reduction >= 10.0 {
        Potential::Medium
    } else {
        Potential::Low
    }
}

fn round1(value: f64) -> f32 {
    (((value.max(0.0)) * 10.0).round() / 10.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_bmp(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            width,
            height,
            image::Rgb([0x64, 0x96, 0xC8]),
        ));
        let mut cursor = std::io::Cursor::new(Vec::new());
        img.write_to(&mut cursor, image::ImageFormat::Bmp).unwrap();
        cursor.into_inner()
    }

    fn photo_jpeg(width: u32, height: u32, quality: u8) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_fn(width, height, |x, y| {
            let r = ((x as f32 / width as f32) * 220.0 + ((x * y) % 11) as f32) as u8;
            let g = ((y as f32 / height as f32) * 200.0 + ((x + y) % 9) as f32) as u8;
            let b = (((x + y) as f32 / (width + height) as f32) * 240.0) as u8;
            image::Rgb([r, g, b])
        }));
        codec::encode_jpeg(&img, quality, false).unwrap()
    }

    #[test]
    fn potential_buckets() {
        assert_eq!(classify_potential(45.0), Potential::High);
        assert_eq!(classify_potential(30.0), Potential::High);
        assert_eq!(classify_potential(15.0), Potential::Medium);
        assert_eq!(classify_potential(9.9), Potential::Low);
    }

    #[tokio::test]
    async fn small_image_takes_the_exact_path() {
        // 100x100 = 10_000 pixels, well under the threshold.
        let data = solid_bmp(100, 100);
        let config = OptimizationConfig::new(40).unwrap();
        let response = estimate(&data, &config).await.unwrap();
        assert_eq!(response.original_format, ImageFormat::Bmp);
        assert_eq!(response.confidence, Confidence::High);
        assert!(response.estimated_optimized_size <= response.original_size);
        // Exact mode on a solid BMP finds the palette/RLE win.
        assert!(response.estimated_reduction_percent >= 90.0);
    }

    #[tokio::test]
    async fn large_bmp_takes_the_generic_sample_path() {
        let data = solid_bmp(1200, 900);
        let config = OptimizationConfig::new(40).unwrap();
        let response = estimate(&data, &config).await.unwrap();
        assert_eq!((response.dimensions.width, response.dimensions.height), (1200, 900));
        assert!(response.estimated_optimized_size <= response.original_size);
        assert!(
            response.estimated_reduction_percent >= 30.0,
            "solid BMP should estimate high: {}",
            response.estimated_reduction_percent
        );
        assert_eq!(response.optimization_potential, Potential::High);
    }

    #[tokio::test]
    async fn large_jpeg_takes_the_direct_path() {
        let data = photo_jpeg(1000, 1000, 95);
        let config = OptimizationConfig::new(40).unwrap();
        let response = estimate(&data, &config).await.unwrap();
        assert_eq!(response.original_format, ImageFormat::Jpeg);
        assert_eq!(response.method, "mozjpeg");
        assert_eq!(response.confidence, Confidence::High);
        assert!(response.estimated_optimized_size <= response.original_size);
        assert!(
            response.estimated_reduction_percent > 0.0,
            "q95 source at target 40 must predict savings"
        );
    }

    #[tokio::test]
    async fn estimator_bound_holds_across_presets() {
        for preset in ["high", "medium", "low"] {
            let config = preset.parse::<crate::preset::Preset>().unwrap().config();
            let data = photo_jpeg(800, 600, 85);
            let response = estimate(&data, &config).await.unwrap();
            assert!(
                response.estimated_optimized_size <= response.original_size,
                "estimate exceeded original for preset {preset}"
            );
        }
    }

    #[tokio::test]
    async fn thumbnail_path_reports_medium_confidence() {
        let thumb = photo_jpeg(200, 150, 90);
        let config = OptimizationConfig::new(40).unwrap();
        let response = estimate_from_thumbnail(&thumb, 5_000_000, 4000, 3000, &config)
            .await
            .unwrap();
        assert_eq!(response.confidence, Confidence::Medium);
        assert_eq!(response.original_size, 5_000_000);
        assert_eq!(
            (response.dimensions.width, response.dimensions.height),
            (4000, 3000)
        );
        assert!(response.estimated_optimized_size <= 5_000_000);
    }

    #[tokio::test]
    async fn undecodable_isobmff_falls_back_to_exact_noop() {
        let mut data = 16u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"ftypavif");
        data.extend_from_slice(&[0, 0, 0, 0]);
        data.extend_from_slice(&[0u8; 64]);
        let response = estimate(&data, &OptimizationConfig::default()).await.unwrap();
        assert!(response.already_optimized);
        assert_eq!(response.estimated_optimized_size, data.len());
    }

    #[tokio::test]
    async fn preset_monotonicity_on_estimates() {
        let data = photo_jpeg(900, 700, 95);
        let high = estimate(&data, &crate::preset::Preset::High.config())
            .await
            .unwrap();
        let medium = estimate(&data, &crate::preset::Preset::Medium.config())
            .await
            .unwrap();
        let low = estimate(&data, &crate::preset::Preset::Low.config())
            .await
            .unwrap();
        let eps = 2.0;
        assert!(high.estimated_reduction_percent >= medium.estimated_reduction_percent - eps);
        assert!(medium.estimated_reduction_percent >= low.estimated_reduction_percent - eps);
    }
}
