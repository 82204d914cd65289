//! Sample construction and direct-encode paths for the estimator.
//!
//! Direct-encode samples must be large enough for the codec's
//! rate-distortion behavior to match full-size output; the per-format
//! width caps live in the mode table in `estimate::mod`. Quality mappings
//! are the shared ones from `crate::quality`, so the sample encoders track
//! the real optimizers.

use image::imageops::FilterType;
use image::DynamicImage;

use crate::codec;
use crate::config::OptimizationConfig;
use crate::error::Result;
use crate::format::ImageFormat;
use crate::optimize::run_codec;
use crate::quality;
use crate::runner::DEFAULT_TOOL_TIMEOUT;

/// Proportional Lanczos downsample to at most `max_width` columns.
pub fn downsample(img: &DynamicImage, max_width: u32) -> DynamicImage {
    if img.width() <= max_width {
        return img.clone();
    }
    let ratio = max_width as f64 / img.width() as f64;
    let height = ((img.height() as f64 * ratio) as u32).max(1);
    img.resize_exact(max_width, height, FilterType::Lanczos3)
}

/// Encode the sample directly with the codec library at the same quality
/// mapping the optimizer would use. Returns the encoded size and the
/// method label the prediction reports.
pub async fn direct_encode(
    sample: DynamicImage,
    fmt: ImageFormat,
    config: &OptimizationConfig,
) -> Result<(usize, &'static str)> {
    let q = config.quality;
    let progressive = config.progressive_jpeg;
    let png_lossy = config.png_lossy;

    match fmt {
        ImageFormat::Jpeg => {
            let len = run_codec("mozjpeg", move || {
                Ok(codec::encode_jpeg(&sample, q, progressive)?.len())
            })
            .await?;
            Ok((len, "mozjpeg"))
        }
        ImageFormat::Webp => {
            let len =
                run_codec("webp", move || Ok(codec::encode_webp(&sample, q, None)?.len())).await?;
            Ok((len, "webp"))
        }
        ImageFormat::Avif => {
            let target = quality::avif_quality(q);
            let len = run_codec("ravif", move || {
                // Samples predict size only; the profile is not carried.
                Ok(codec::encode_avif(&sample, target, quality::AVIF_SPEED, None)?.len())
            })
            .await?;
            Ok((len, "avif-reencode"))
        }
        ImageFormat::Heic => {
            let target = quality::heic_quality(q);
            let len = run_codec("libheif", move || {
                Ok(codec::encode_heic(&sample, Some(target), None)?.len())
            })
            .await?;
            Ok((len, "heic-reencode"))
        }
        ImageFormat::Jxl => {
            let png = run_codec("png", move || {
                codec::encode_png_rgba(&sample, ::png::Compression::Fast)
            })
            .await?;
            let target = quality::jxl_quality(q);
            let out =
                codec::encode_png_to_jxl(&png, Some(target), DEFAULT_TOOL_TIMEOUT).await?;
            Ok((out.len(), "jxl-reencode"))
        }
        ImageFormat::Png | ImageFormat::Apng => {
            if png_lossy && q < 70 {
                let colors = quality::png_sample_colors(q);
                let len = run_codec("imagequant", move || {
                    Ok(codec::encode_png_indexed(&sample, colors)?.len())
                })
                .await?;
                Ok((len, "pngquant + oxipng"))
            } else {
                let len = run_codec("png", move || {
                    Ok(codec::encode_png_rgba(&sample, ::png::Compression::Best)?.len())
                })
                .await?;
                Ok((len, "oxipng"))
            }
        }
        _ => Err(crate::error::SlimgError::OptimizationFailed {
            tool: "direct-encode".to_string(),
            stderr: format!("{fmt} has no direct-encode path"),
        }),
    }
}

/// Re-encode the downsized sample as its own format at minimal
/// compression, so the real optimizer always has room to work on it.
pub fn generic_sample_bytes(sample: &DynamicImage, fmt: ImageFormat) -> Result<Vec<u8>> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    match fmt {
        ImageFormat::Bmp => {
            DynamicImage::ImageRgb8(sample.to_rgb8())
                .write_to(&mut cursor, image::ImageFormat::Bmp)?;
        }
        ImageFormat::Tiff => {
            use tiff::encoder::{colortype, compression::Uncompressed, TiffEncoder};
            let rgb = sample.to_rgb8();
            let mut encoder = TiffEncoder::new(&mut cursor).map_err(|e| {
                crate::error::SlimgError::OptimizationFailed {
                    tool: "tiff".to_string(),
                    stderr: e.to_string(),
                }
            })?;
            encoder
                .write_image_with_compression::<colortype::RGB8, _>(
                    rgb.width(),
                    rgb.height(),
                    Uncompressed,
                    rgb.as_raw(),
                )
                .map_err(|e| crate::error::SlimgError::OptimizationFailed {
                    tool: "tiff".to_string(),
                    stderr: e.to_string(),
                })?;
        }
        ImageFormat::Gif => {
            use image::codecs::gif::GifEncoder;
            use image::Frame;
            let mut encoder = GifEncoder::new(&mut cursor);
            encoder
                .encode_frame(Frame::new(sample.to_rgba8()))
                .map_err(|e| crate::error::SlimgError::OptimizationFailed {
                    tool: "gif".to_string(),
                    stderr: e.to_string(),
                })?;
        }
        _ => {
            sample.write_to(&mut cursor, image::ImageFormat::Png)?;
        }
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 251) as u8, (y % 241) as u8, ((x * y) % 253) as u8])
        }))
    }

    #[test]
    fn downsample_preserves_aspect_ratio() {
        let img = gradient(1600, 1200);
        let sample = downsample(&img, 800);
        assert_eq!(sample.width(), 800);
        assert_eq!(sample.height(), 600);

        // Already small enough: untouched.
        let small = gradient(300, 200);
        let same = downsample(&small, 800);
        assert_eq!((same.width(), same.height()), (300, 200));
    }

    #[tokio::test]
    async fn jpeg_direct_encode_tracks_quality() {
        let sample = gradient(400, 300);
        let config_low = OptimizationConfig::new(30).unwrap();
        let config_high = OptimizationConfig::new(95).unwrap();
        let (len_low, method) = direct_encode(sample.clone(), ImageFormat::Jpeg, &config_low)
            .await
            .unwrap();
        let (len_high, _) = direct_encode(sample, ImageFormat::Jpeg, &config_high)
            .await
            .unwrap();
        assert_eq!(method, "mozjpeg");
        assert!(len_low < len_high);
    }

    #[tokio::test]
    async fn png_direct_encode_labels_follow_config() {
        let sample = gradient(200, 200);
        let lossy = OptimizationConfig::new(40).unwrap();
        let (_, method) = direct_encode(sample.clone(), ImageFormat::Png, &lossy)
            .await
            .unwrap();
        assert_eq!(method, "pngquant + oxipng");

        let lossless = OptimizationConfig {
            png_lossy: false,
            ..OptimizationConfig::new(40).unwrap()
        };
        let (_, method) = direct_encode(sample, ImageFormat::Png, &lossless)
            .await
            .unwrap();
        assert_eq!(method, "oxipng");
    }

    #[test]
    fn generic_samples_reencode_as_input_format() {
        let sample = gradient(120, 80);
        let bmp = generic_sample_bytes(&sample, ImageFormat::Bmp).unwrap();
        assert_eq!(
            crate::format::detect_format(&bmp).unwrap(),
            ImageFormat::Bmp
        );
        let tiff = generic_sample_bytes(&sample, ImageFormat::Tiff).unwrap();
        assert_eq!(
            crate::format::detect_format(&tiff).unwrap(),
            ImageFormat::Tiff
        );
        let gif = generic_sample_bytes(&sample, ImageFormat::Gif).unwrap();
        assert_eq!(
            crate::format::detect_format(&gif).unwrap(),
            ImageFormat::Gif
        );
    }
}
