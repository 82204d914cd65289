//! TIFF optimization: decode once, race Adobe Deflate, LZW and (on lossy
//! presets, RGB/grayscale only) JPEG-in-TIFF, keep the smallest.
//!
//! Re-encoding drops every source tag, so the two required-to-preserve
//! fields are pulled from the source IFD up front and written back into
//! each candidate: the ICC profile (tag 34675) and the orientation
//! (tag 274).

use std::io::{Cursor, Seek, Write};

use async_trait::async_trait;
use image::DynamicImage;
use tiff::encoder::compression::{Compression, Deflate, Lzw};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

use crate::codec;
use crate::config::OptimizationConfig;
use crate::error::{Result, SlimgError};
use crate::format::ImageFormat;
use crate::metadata;
use crate::optimize::{pick_smallest, run_codec, Optimizer};
use crate::quality;
use crate::result::{finalize, OptimizeResult};

pub struct TiffOptimizer;

#[async_trait]
impl Optimizer for TiffOptimizer {
    async fn optimize(&self, data: &[u8], config: &OptimizationConfig) -> Result<OptimizeResult> {
        // One decode shared by all candidates, plus the preserved fields
        // from the source IFD.
        let (icc, orientation) = metadata::tiff_preserved_fields(data);
        let img = {
            let data = data.to_vec();
            run_codec("tiff", move || Ok(image::load_from_memory(&data)?)).await?
        };

        let deflate_task = {
            let img = img.clone();
            let icc = icc.clone();
            run_codec("tiff-deflate", move || {
                encode_tiff(&img, Method::Deflate, icc.as_deref(), orientation)
            })
        };
        let lzw_task = {
            let img = img.clone();
            let icc = icc.clone();
            run_codec("tiff-lzw", move || {
                encode_tiff(&img, Method::Lzw, icc.as_deref(), orientation)
            })
        };

        let grayscale_or_rgb = matches!(
            img.color(),
            image::ColorType::L8 | image::ColorType::L16 | image::ColorType::Rgb8 | image::ColorType::Rgb16
        );
        let jpeg_task = if quality::tiff_use_jpeg(config.quality) && grayscale_or_rgb {
            let img = img.clone();
            let icc = icc.clone();
            let q = config.quality;
            Some(run_codec("tiff-jpeg", move || {
                encode_jpeg_in_tiff(&img, q, icc.as_deref(), orientation)
            }))
        } else {
            None
        };

        let (deflated, lzw, jpeg) = match jpeg_task {
            Some(task) => {
                let (a, b, c) = tokio::join!(deflate_task, lzw_task, task);
                (a, b, Some(c))
            }
            None => {
                let (a, b) = tokio::join!(deflate_task, lzw_task);
                (a, b, None)
            }
        };

        let mut candidates = vec![(deflated, "tiff-deflate"), (lzw, "tiff-lzw")];
        if let Some(jpeg) = jpeg {
            candidates.push((jpeg, "tiff-jpeg"));
        }

        match pick_smallest(candidates) {
            Some((bytes, method)) => Ok(finalize(data, bytes, method, ImageFormat::Tiff)),
            None => Ok(crate::result::unchanged(data, ImageFormat::Tiff)),
        }
    }
}

enum Method {
    Deflate,
    Lzw,
}

const ICC_TAG: u16 = 34675;
const ORIENTATION_TAG: u16 = 274;

fn encode_tiff(
    img: &DynamicImage,
    method: Method,
    icc: Option<&[u8]>,
    orientation: Option<u16>,
) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut cursor).map_err(tiff_failed)?;
        match img.color() {
            image::ColorType::L8 | image::ColorType::L16 => {
                let gray = img.to_luma8();
                write_frame::<colortype::Gray8, _>(
                    &mut encoder,
                    gray.width(),
                    gray.height(),
                    &method,
                    gray.as_raw(),
                    icc,
                    orientation,
                )?;
            }
            image::ColorType::Rgba8
            | image::ColorType::Rgba16
            | image::ColorType::La8
            | image::ColorType::La16 => {
                let rgba = img.to_rgba8();
                write_frame::<colortype::RGBA8, _>(
                    &mut encoder,
                    rgba.width(),
                    rgba.height(),
                    &method,
                    rgba.as_raw(),
                    icc,
                    orientation,
                )?;
            }
            _ => {
                let rgb = img.to_rgb8();
                write_frame::<colortype::RGB8, _>(
                    &mut encoder,
                    rgb.width(),
                    rgb.height(),
                    &method,
                    rgb.as_raw(),
                    icc,
                    orientation,
                )?;
            }
        }
    }
    Ok(cursor.into_inner())
}

fn write_frame<C, W>(
    encoder: &mut TiffEncoder<W>,
    width: u32,
    height: u32,
    method: &Method,
    data: &[C::Inner],
    icc: Option<&[u8]>,
    orientation: Option<u16>,
) -> Result<()>
where
    C: colortype::ColorType,
    W: Write + Seek,
{
    match method {
        Method::Deflate => write_frame_with::<C, _, W>(
            encoder,
            width,
            height,
            Deflate::default(),
            data,
            icc,
            orientation,
        ),
        Method::Lzw => write_frame_with::<C, _, W>(
            encoder,
            width,
            height,
            Lzw::default(),
            data,
            icc,
            orientation,
        ),
    }
}

fn write_frame_with<C, D, W>(
    encoder: &mut TiffEncoder<W>,
    width: u32,
    height: u32,
    compression: D,
    data: &[C::Inner],
    icc: Option<&[u8]>,
    orientation: Option<u16>,
) -> Result<()>
where
    C: colortype::ColorType,
    D: Compression,
    W: Write + Seek,
{
    let mut image = encoder
        .new_image_with_compression::<C, D>(width, height, compression)
        .map_err(tiff_failed)?;
    if let Some(o) = orientation {
        image
            .encoder()
            .write_tag(Tag::Orientation, o)
            .map_err(tiff_failed)?;
    }
    if let Some(icc) = icc {
        image
            .encoder()
            .write_tag(Tag::Unknown(ICC_TAG), icc)
            .map_err(tiff_failed)?;
    }
    image.write_data(data).map_err(tiff_failed)?;
    Ok(())
}

fn tiff_failed(e: impl std::fmt::Display) -> SlimgError {
    SlimgError::OptimizationFailed {
        tool: "tiff".to_string(),
        stderr: e.to_string(),
    }
}

/// Wrap a mozjpeg stream in a minimal single-strip little-endian TIFF
/// container (Compression = 7, new-style JPEG). The `tiff` crate has no
/// JPEG compression support, so the IFD is written by hand, including the
/// preserved orientation and ICC entries.
fn encode_jpeg_in_tiff(
    img: &DynamicImage,
    quality: u8,
    icc: Option<&[u8]>,
    orientation: Option<u16>,
) -> Result<Vec<u8>> {
    let grayscale = matches!(img.color(), image::ColorType::L8 | image::ColorType::L16);
    let jpeg = codec::encode_jpeg(img, quality, false)?;
    let (width, height) = (img.width(), img.height());

    let mut out = Vec::with_capacity(jpeg.len() + 256);
    out.extend_from_slice(b"II\x2a\x00");
    let strip_offset = 8u32;
    // JPEG strip sits right after the header; the IFD follows, word-aligned.
    let mut ifd_offset = strip_offset as usize + jpeg.len();
    if ifd_offset % 2 != 0 {
        ifd_offset += 1;
    }
    out.extend_from_slice(&(ifd_offset as u32).to_le_bytes());
    out.extend_from_slice(&jpeg);
    if out.len() < ifd_offset {
        out.push(0);
    }

    const TYPE_SHORT: u16 = 3;
    const TYPE_LONG: u16 = 4;
    const TYPE_UNDEFINED: u16 = 7;

    // Fixed entries: 7 base + 3 layout-dependent, plus the optional pair.
    let entry_count = 10 + usize::from(orientation.is_some()) + usize::from(icc.is_some());
    // External value area follows the IFD: the RGB bits-per-sample triple
    // (does not fit inline), then the ICC profile.
    let external_base = ifd_offset + 2 + entry_count * 12 + 4;
    let bps_offset = external_base;
    let icc_offset = external_base + if grayscale { 0 } else { 6 };

    let mut entries: Vec<(u16, u16, u32, u32)> = vec![
        (256, TYPE_LONG, 1, width),
        (257, TYPE_LONG, 1, height),
        (259, TYPE_SHORT, 1, 7), // new-style JPEG
        (273, TYPE_LONG, 1, strip_offset),
        (278, TYPE_LONG, 1, height),
        (279, TYPE_LONG, 1, jpeg.len() as u32),
        (284, TYPE_SHORT, 1, 1),
    ];
    if grayscale {
        entries.push((258, TYPE_SHORT, 1, 8));
        entries.push((262, TYPE_SHORT, 1, 1)); // BlackIsZero
        entries.push((277, TYPE_SHORT, 1, 1));
    } else {
        entries.push((258, TYPE_SHORT, 3, bps_offset as u32));
        entries.push((262, TYPE_SHORT, 1, 6)); // YCbCr
        entries.push((277, TYPE_SHORT, 1, 3));
    }
    if let Some(o) = orientation {
        entries.push((ORIENTATION_TAG, TYPE_SHORT, 1, o as u32));
    }
    if let Some(icc) = icc {
        entries.push((ICC_TAG, TYPE_UNDEFINED, icc.len() as u32, icc_offset as u32));
    }
    entries.sort_by_key(|e| e.0);
    debug_assert_eq!(entries.len(), entry_count);

    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for (tag, kind, count, value) in &entries {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
    }
    out.extend_from_slice(&0u32.to_le_bytes()); // no next IFD
    if !grayscale {
        for _ in 0..3 {
            out.extend_from_slice(&8u16.to_le_bytes());
        }
    }
    if let Some(icc) = icc {
        out.extend_from_slice(icc);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::detect_format;

    fn uncompressed_tiff(width: u32, height: u32) -> Vec<u8> {
        use tiff::encoder::compression::Uncompressed;
        let rgb = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x / 3) as u8, (y / 3) as u8, 77])
        });
        let mut cursor = Cursor::new(Vec::new());
        let mut encoder = TiffEncoder::new(&mut cursor).unwrap();
        encoder
            .write_image_with_compression::<colortype::RGB8, _>(
                width,
                height,
                Uncompressed::default(),
                rgb.as_raw(),
            )
            .unwrap();
        cursor.into_inner()
    }

    #[tokio::test]
    async fn uncompressed_input_shrinks_losslessly_at_high_quality() {
        let input = uncompressed_tiff(120, 90);
        let result = TiffOptimizer
            .optimize(&input, &OptimizationConfig::new(80).unwrap())
            .await
            .unwrap();
        assert!(result.reduction_percent > 0.0);
        // Lossless-only at q >= 70.
        assert!(result.method == "tiff-deflate" || result.method == "tiff-lzw");
        assert_eq!(detect_format(&result.optimized_bytes).unwrap(), ImageFormat::Tiff);
        let img = image::load_from_memory(&result.optimized_bytes).unwrap();
        assert_eq!((img.width(), img.height()), (120, 90));
    }

    #[tokio::test]
    async fn lossy_preset_may_pick_jpeg_in_tiff() {
        let input = uncompressed_tiff(200, 150);
        let result = TiffOptimizer
            .optimize(&input, &OptimizationConfig::new(40).unwrap())
            .await
            .unwrap();
        assert!(result.optimized_size < result.original_size);
        assert!(["tiff-deflate", "tiff-lzw", "tiff-jpeg"].contains(&result.method.as_str()));
        assert_eq!(detect_format(&result.optimized_bytes).unwrap(), ImageFormat::Tiff);
    }

    #[test]
    fn jpeg_in_tiff_container_shape() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            32,
            16,
            image::Rgb([10, 200, 30]),
        ));
        let out = encode_jpeg_in_tiff(&img, 50, None, None).unwrap();
        assert_eq!(&out[0..4], b"II\x2a\x00");
        // The embedded strip is a JFIF stream at offset 8.
        assert_eq!(&out[8..11], &[0xFF, 0xD8, 0xFF]);
        assert_eq!(detect_format(&out).unwrap(), ImageFormat::Tiff);
    }

    #[test]
    fn preserved_fields_roundtrip_through_both_writers() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            24,
            24,
            image::Rgb([5, 6, 7]),
        ));
        let profile = vec![0x11u8; 40];

        let deflated = encode_tiff(&img, Method::Deflate, Some(&profile), Some(6)).unwrap();
        let (icc, orientation) = metadata::tiff_preserved_fields(&deflated);
        assert_eq!(icc.as_deref(), Some(profile.as_slice()));
        assert_eq!(orientation, Some(6));

        let wrapped = encode_jpeg_in_tiff(&img, 60, Some(&profile), Some(6)).unwrap();
        let (icc, orientation) = metadata::tiff_preserved_fields(&wrapped);
        assert_eq!(icc.as_deref(), Some(profile.as_slice()));
        assert_eq!(orientation, Some(6));
        assert_eq!(detect_format(&wrapped).unwrap(), ImageFormat::Tiff);
    }

    #[tokio::test]
    async fn source_icc_survives_every_candidate() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_fn(160, 120, |x, y| {
            image::Rgb([(x / 2) as u8, (y / 2) as u8, 33])
        }));
        let profile = vec![0x5Cu8; 64];
        let input = encode_tiff(&img, Method::Deflate, Some(&profile), Some(3)).unwrap();

        let result = TiffOptimizer
            .optimize(&input, &OptimizationConfig::new(40).unwrap())
            .await
            .unwrap();
        if !result.is_noop() {
            let (icc, orientation) = metadata::tiff_preserved_fields(&result.optimized_bytes);
            assert_eq!(icc.as_deref(), Some(profile.as_slice()));
            assert_eq!(orientation, Some(3));
        }
    }
}
