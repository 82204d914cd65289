//! BMP optimization in quality tiers: 24-bit re-save always, palette
//! quantization under q70, RLE8 on top of the palette under q50.
//!
//! RLE8 pays off on long runs of identical palette indices. No content
//! classification happens up front; the candidate is simply produced and
//! the size comparison discards it when it loses.

use async_trait::async_trait;
use image::DynamicImage;

use crate::config::OptimizationConfig;
use crate::error::{Result, SlimgError};
use crate::format::ImageFormat;
use crate::optimize::{run_codec, Optimizer};
use crate::result::{finalize, OptimizeResult};

pub struct BmpOptimizer;

#[async_trait]
impl Optimizer for BmpOptimizer {
    async fn optimize(&self, data: &[u8], config: &OptimizationConfig) -> Result<OptimizeResult> {
        let original = data.to_vec();
        let quality = config.quality;

        let (best, method) = run_codec("bmp", move || {
            let img = normalize(image::load_from_memory(&original)?);

            let mut best = original;
            let mut method = crate::result::METHOD_NONE;

            if let Ok(candidate) = encode_bmp_24(&img) {
                if candidate.len() < best.len() {
                    best = candidate;
                    method = "bmp-24bit";
                }
            }

            if quality < 70 {
                if let Ok(palette) = quantize(&img) {
                    if let Ok(candidate) = encode_bmp_palette(&palette) {
                        if candidate.len() < best.len() {
                            best = candidate;
                            method = "bmp-palette";
                        }
                    }
                    if quality < 50 {
                        if let Ok(candidate) = encode_bmp_rle8(&palette) {
                            if candidate.len() < best.len() {
                                best = candidate;
                                method = "bmp-rle8";
                            }
                        }
                    }
                }
            }

            Ok((best, method))
        })
        .await?;

        Ok(finalize(data, best, method, ImageFormat::Bmp))
    }
}

/// Fully opaque RGBA collapses to RGB; exotic modes normalize to RGB.
fn normalize(img: DynamicImage) -> DynamicImage {
    match img.color() {
        image::ColorType::Rgba8 | image::ColorType::Rgba16 => {
            let rgba = img.to_rgba8();
            if rgba.pixels().all(|p| p[3] == 255) {
                DynamicImage::ImageRgb8(img.to_rgb8())
            } else {
                DynamicImage::ImageRgba8(rgba)
            }
        }
        image::ColorType::L8 | image::ColorType::Rgb8 => img,
        _ => DynamicImage::ImageRgb8(img.to_rgb8()),
    }
}

fn encode_bmp_24(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    img.write_to(&mut cursor, image::ImageFormat::Bmp)?;
    Ok(cursor.into_inner())
}

/// A palette image: per-pixel indices plus up to 256 RGB entries.
struct PaletteImage {
    width: u32,
    height: u32,
    indices: Vec<u8>,
    palette: Vec<[u8; 3]>,
}

fn quantize(img: &DynamicImage) -> Result<PaletteImage> {
    let rgba = img.to_rgba8();
    let (width, height) = (rgba.width(), rgba.height());
    let pixels: Vec<rgb::RGBA<u8>> = rgba
        .chunks_exact(4)
        .map(|c| rgb::RGBA::new(c[0], c[1], c[2], c[3]))
        .collect();

    let failed = |e: &dyn std::fmt::Display| SlimgError::OptimizationFailed {
        tool: "imagequant".to_string(),
        stderr: e.to_string(),
    };

    let mut attr = imagequant::Attributes::new();
    attr.set_speed(3).map_err(|e| failed(&e))?;
    attr.set_max_colors(256).map_err(|e| failed(&e))?;
    let mut liq_img = imagequant::Image::new(
        &attr,
        pixels.as_slice(),
        width as usize,
        height as usize,
        0.0,
    )
    .map_err(|e| failed(&e))?;
    let mut quantized = attr.quantize(&mut liq_img).map_err(|e| failed(&e))?;
    quantized.set_dithering_level(1.0).map_err(|e| failed(&e))?;
    let (palette, indices) = quantized.remapped(&mut liq_img).map_err(|e| failed(&e))?;

    Ok(PaletteImage {
        width,
        height,
        indices,
        palette: palette.iter().map(|p| [p.r, p.g, p.b]).collect(),
    })
}

/// Shared BMP header plumbing: file header, info header, 256-entry BGRA
/// palette table.
fn bmp_headers(img: &PaletteImage, compression: u32, pixel_data_len: usize) -> Vec<u8> {
    const PIXEL_OFFSET: u32 = 14 + 40 + 1024;
    let file_size = PIXEL_OFFSET + pixel_data_len as u32;

    let mut out = Vec::with_capacity(PIXEL_OFFSET as usize + pixel_data_len);
    // BITMAPFILEHEADER
    out.extend_from_slice(b"BM");
    out.extend_from_slice(&file_size.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&PIXEL_OFFSET.to_le_bytes());
    // BITMAPINFOHEADER
    out.extend_from_slice(&40u32.to_le_bytes());
    out.extend_from_slice(&(img.width as i32).to_le_bytes());
    out.extend_from_slice(&(img.height as i32).to_le_bytes()); // bottom-up
    out.extend_from_slice(&1u16.to_le_bytes()); // planes
    out.extend_from_slice(&8u16.to_le_bytes()); // bits per pixel
    out.extend_from_slice(&compression.to_le_bytes());
    out.extend_from_slice(&(pixel_data_len as u32).to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&256u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    // Palette: 256 BGRA entries, zero-filled past the real palette.
    for i in 0..256 {
        let [r, g, b] = img.palette.get(i).copied().unwrap_or([0, 0, 0]);
        out.extend_from_slice(&[b, g, r, 0]);
    }
    out
}

/// Uncompressed 8-bit BMP: bottom-up rows padded to 4 bytes.
fn encode_bmp_palette(img: &PaletteImage) -> Result<Vec<u8>> {
    let width = img.width as usize;
    let row_stride = (width + 3) & !3;
    let mut pixel_data = Vec::with_capacity(row_stride * img.height as usize);

    for y in (0..img.height as usize).rev() {
        let row = &img.indices[y * width..(y + 1) * width];
        pixel_data.extend_from_slice(row);
        pixel_data.resize(pixel_data.len() + (row_stride - width), 0);
    }

    let mut out = bmp_headers(img, 0 /* BI_RGB */, pixel_data.len());
    out.extend_from_slice(&pixel_data);
    Ok(out)
}

/// 8-bit BMP with BI_RLE8 compression.
fn encode_bmp_rle8(img: &PaletteImage) -> Result<Vec<u8>> {
    let width = img.width as usize;
    let mut rle = Vec::new();

    for y in (0..img.height as usize).rev() {
        let row = &img.indices[y * width..(y + 1) * width];
        rle8_encode_row(row, &mut rle);
        rle.extend_from_slice(&[0x00, 0x00]); // end of line
    }
    rle.extend_from_slice(&[0x00, 0x01]); // end of bitmap

    let mut out = bmp_headers(img, 1 /* BI_RLE8 */, rle.len());
    out.extend_from_slice(&rle);
    Ok(out)
}

/// RLE8-encode one row: encoded runs for repeats, absolute mode for
/// literal stretches of three or more, single-pixel runs otherwise.
fn rle8_encode_row(row: &[u8], out: &mut Vec<u8>) {
    let n = row.len();
    let mut i = 0;

    while i < n {
        let value = row[i];
        let mut run = 1;
        while i + run < n && row[i + run] == value && run < 255 {
            run += 1;
        }

        if run >= 3 {
            out.extend_from_slice(&[run as u8, value]);
            i += run;
            continue;
        }

        // Collect a literal stretch until the next run of 3+ begins.
        let lit_start = i;
        i += run;
        while i < n {
            let next = row[i];
            let mut peek = 1;
            while i + peek < n && row[i + peek] == next && peek < 3 {
                peek += 1;
            }
            if peek >= 3 {
                break;
            }
            i += 1;
            if i - lit_start >= 255 {
                break;
            }
        }

        let lit_len = i - lit_start;
        if lit_len >= 3 {
            out.push(0x00);
            out.push(lit_len as u8);
            out.extend_from_slice(&row[lit_start..lit_start + lit_len]);
            if lit_len % 2 != 0 {
                out.push(0x00); // absolute mode pads to even
            }
        } else {
            for &v in &row[lit_start..lit_start + lit_len] {
                out.extend_from_slice(&[1, v]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::detect_format;

    fn solid_bmp(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            width,
            height,
            image::Rgb(color),
        ));
        let mut cursor = std::io::Cursor::new(Vec::new());
        img.write_to(&mut cursor, image::ImageFormat::Bmp).unwrap();
        cursor.into_inner()
    }

    #[test]
    fn rle8_compresses_runs() {
        let mut out = Vec::new();
        rle8_encode_row(&[7u8; 100], &mut out);
        assert_eq!(out, vec![100, 7]);

        out.clear();
        rle8_encode_row(&[1, 2, 3, 4, 5], &mut out);
        // Absolute mode: marker, count, data, pad to even.
        assert_eq!(out, vec![0x00, 5, 1, 2, 3, 4, 5, 0x00]);

        out.clear();
        rle8_encode_row(&[9, 9], &mut out);
        assert_eq!(out, vec![1, 9, 1, 9]);
    }

    #[test]
    fn rle8_mixed_content() {
        let mut out = Vec::new();
        rle8_encode_row(&[5, 5, 5, 5, 1, 2, 8, 8, 8], &mut out);
        assert_eq!(out[..2], [4, 5]);
        assert_eq!(out[out.len() - 2..], [3, 8]);
    }

    #[tokio::test]
    async fn solid_color_bmp_crushes_at_quality_40() {
        // 800x600 solid RGB(0x64, 0x96, 0xC8).
        let input = solid_bmp(800, 600, [0x64, 0x96, 0xC8]);
        let result = BmpOptimizer
            .optimize(&input, &OptimizationConfig::new(40).unwrap())
            .await
            .unwrap();

        assert_eq!(result.format, ImageFormat::Bmp);
        assert!(
            result.method == "bmp-rle8" || result.method == "bmp-palette",
            "unexpected method {}",
            result.method
        );
        assert!(
            result.reduction_percent >= 90.0,
            "only reduced {}%",
            result.reduction_percent
        );
        assert_eq!(detect_format(&result.optimized_bytes).unwrap(), ImageFormat::Bmp);
        let img = image::load_from_memory(&result.optimized_bytes).unwrap();
        assert_eq!((img.width(), img.height()), (800, 600));
        // Dominant color survives quantization exactly.
        let px = img.to_rgb8().get_pixel(400, 300).0;
        assert_eq!(px, [0x64, 0x96, 0xC8]);
    }

    #[tokio::test]
    async fn high_quality_stays_lossless() {
        let input = solid_bmp(64, 64, [1, 2, 3]);
        let result = BmpOptimizer
            .optimize(&input, &OptimizationConfig::new(80).unwrap())
            .await
            .unwrap();
        // q >= 70: no palette tiers ran.
        assert!(result.method == "bmp-24bit" || result.is_noop());
        assert!(result.optimized_size <= result.original_size);
    }

    #[tokio::test]
    async fn optimizing_twice_is_stable() {
        let input = solid_bmp(320, 200, [10, 20, 30]);
        let config = OptimizationConfig::new(40).unwrap();
        let first = BmpOptimizer.optimize(&input, &config).await.unwrap();
        let second = BmpOptimizer
            .optimize(&first.optimized_bytes, &config)
            .await
            .unwrap();
        // Idempotence tendency: the second pass never expands.
        assert!(second.optimized_size <= first.optimized_size);
    }
}
