//! In-process codec helpers shared by the optimizers and the estimator.
//!
//! Everything here is CPU-bound and synchronous; callers offload through
//! the blocking pool. The JXL pair is the exception: no in-process JXL
//! codec exists in this stack, so decode/encode round-trip through the
//! `djxl`/`cjxl` child processes.

use std::io::Cursor;

use image::DynamicImage;
use libheif_rs::{
    Channel, ColorProfileRaw, ColorProfileType, ColorSpace, CompressionFormat, EncoderQuality,
    HeifContext, Image as HeifImage, LibHeif, RgbChroma,
};

use crate::error::{Result, SlimgError};
use crate::runner;

fn codec_failed(tool: &str, detail: impl std::fmt::Display) -> SlimgError {
    SlimgError::OptimizationFailed {
        tool: tool.to_string(),
        stderr: detail.to_string(),
    }
}

/// Decode an ISOBMFF still (HEIC or AVIF) to RGB via libheif, returning
/// the pixels together with the ICC profile the container carried, so
/// re-encode candidates can embed it again.
pub fn decode_heif(data: &[u8]) -> Result<(DynamicImage, Option<Vec<u8>>)> {
    let lib_heif = LibHeif::new();
    let ctx = HeifContext::read_from_bytes(data).map_err(|e| codec_failed("libheif", e))?;
    let handle = ctx
        .primary_image_handle()
        .map_err(|e| codec_failed("libheif", e))?;
    let width = handle.width();
    let height = handle.height();
    let icc = handle.color_profile_raw().map(|profile| profile.data);

    let decoded = lib_heif
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
        .map_err(|e| codec_failed("libheif", e))?;
    let planes = decoded.planes();
    let plane = planes
        .interleaved
        .ok_or_else(|| codec_failed("libheif", "no interleaved RGB plane"))?;

    // The plane stride may exceed width * 3; copy row by row.
    let row_bytes = width as usize * 3;
    let mut raw = Vec::with_capacity(row_bytes * height as usize);
    for y in 0..height as usize {
        let start = y * plane.stride;
        raw.extend_from_slice(&plane.data[start..start + row_bytes]);
    }

    let img = image::RgbImage::from_raw(width, height, raw)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| codec_failed("libheif", "decoded plane size mismatch"))?;
    Ok((img, icc))
}

/// Encode to HEIC via libheif. `quality: None` selects lossless mode; an
/// ICC profile is attached to the image before encoding.
pub fn encode_heic(img: &DynamicImage, quality: Option<u8>, icc: Option<&[u8]>) -> Result<Vec<u8>> {
    encode_with_libheif(img, CompressionFormat::Hevc, quality, icc)
}

fn encode_with_libheif(
    img: &DynamicImage,
    format: CompressionFormat,
    quality: Option<u8>,
    icc: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let rgb = img.to_rgb8();
    let (width, height) = (rgb.width(), rgb.height());

    let lib_heif = LibHeif::new();
    let mut heif_img = HeifImage::new(width, height, ColorSpace::Rgb(RgbChroma::Rgb))
        .map_err(|e| codec_failed("libheif", e))?;
    heif_img
        .create_plane(Channel::Interleaved, width, height, 8)
        .map_err(|e| codec_failed("libheif", e))?;
    {
        let planes = heif_img.planes_mut();
        let plane = planes
            .interleaved
            .ok_or_else(|| codec_failed("libheif", "no interleaved plane"))?;
        let stride = plane.stride;
        let row_bytes = width as usize * 3;
        for (y, row) in rgb.as_raw().chunks_exact(row_bytes).enumerate() {
            plane.data[y * stride..y * stride + row_bytes].copy_from_slice(row);
        }
    }
    if let Some(icc) = icc {
        let profile = ColorProfileRaw::new(ColorProfileType::Prof, icc.to_vec());
        heif_img
            .set_color_profile_raw(&profile)
            .map_err(|e| codec_failed("libheif", e))?;
    }

    let mut ctx = HeifContext::new().map_err(|e| codec_failed("libheif", e))?;
    let mut encoder = lib_heif
        .encoder_for_format(format)
        .map_err(|e| codec_failed("libheif", e))?;
    let encoder_quality = match quality {
        Some(q) => EncoderQuality::Lossy(q),
        None => EncoderQuality::LossLess,
    };
    encoder
        .set_quality(encoder_quality)
        .map_err(|e| codec_failed("libheif", e))?;
    ctx.encode_image(&heif_img, &mut encoder, None)
        .map_err(|e| codec_failed("libheif", e))?;
    ctx.write_to_bytes().map_err(|e| codec_failed("libheif", e))
}

/// Encode to AVIF. Without a profile this is the rav1e path in ravif;
/// with one, the encode routes through libheif's AV1 encoder instead,
/// since that is the codec library with a color-profile facility (ravif
/// writes no ICC box).
pub fn encode_avif(img: &DynamicImage, quality: u8, speed: u8, icc: Option<&[u8]>) -> Result<Vec<u8>> {
    if icc.is_some() {
        return encode_with_libheif(img, CompressionFormat::Av1, Some(quality), icc);
    }

    let rgba = img.to_rgba8();
    let (width, height) = (rgba.width() as usize, rgba.height() as usize);
    let pixels: Vec<rgb::RGBA<u8>> = rgba
        .chunks_exact(4)
        .map(|c| rgb::RGBA::new(c[0], c[1], c[2], c[3]))
        .collect();

    let encoded = ravif::Encoder::new()
        .with_quality(quality as f32)
        .with_speed(speed)
        .encode_rgba(ravif::Img::new(pixels.as_slice(), width, height))
        .map_err(|e| codec_failed("ravif", e))?;
    Ok(encoded.avif_file)
}

/// Read the ICC profile from a WebP container's ICCP chunk.
pub fn webp_icc_profile(data: &[u8]) -> Option<Vec<u8>> {
    use img_parts::ImageICC;
    img_parts::webp::WebP::from_bytes(img_parts::Bytes::copy_from_slice(data))
        .ok()
        .and_then(|w| w.icc_profile())
        .map(|b| b.to_vec())
}

/// Encode to WebP at the given quality with the shared method setting.
/// An ICC profile is re-attached through container surgery, the same way
/// the JPEG path carries its preserved fields.
pub fn encode_webp(img: &DynamicImage, quality: u8, icc: Option<&[u8]>) -> Result<Vec<u8>> {
    let rgba = img.to_rgba8();
    let encoder = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());

    let mut config =
        webp::WebPConfig::new().map_err(|_| codec_failed("webp", "config init failed"))?;
    config.quality = quality as f32;
    config.method = crate::quality::WEBP_METHOD;
    let memory = encoder
        .encode_advanced(&config)
        .map_err(|e| codec_failed("webp", format!("{e:?}")))?;
    Ok(embed_webp_icc(memory.to_vec(), icc))
}

/// Insert an ICCP chunk into an encoded WebP stream. Best-effort: a
/// stream img-parts cannot reparse is returned as encoded.
pub fn embed_webp_icc(encoded: Vec<u8>, icc: Option<&[u8]>) -> Vec<u8> {
    use img_parts::ImageICC;

    let Some(icc) = icc else {
        return encoded;
    };
    match img_parts::webp::WebP::from_bytes(img_parts::Bytes::from(encoded.clone())) {
        Ok(mut webp_img) => {
            webp_img.set_icc_profile(Some(img_parts::Bytes::copy_from_slice(icc)));
            webp_img.encoder().bytes().to_vec()
        }
        Err(_) => encoded,
    }
}

/// Encode to JPEG via mozjpeg with Huffman optimization.
pub fn encode_jpeg(img: &DynamicImage, quality: u8, progressive: bool) -> Result<Vec<u8>> {
    let rgb = img.to_rgb8();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);

    let mut comp = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_RGB);
    comp.set_size(width, height);
    comp.set_quality(quality as f32);
    comp.set_optimize_coding(true);
    if progressive {
        comp.set_progressive_mode();
        comp.set_scan_optimization_mode(mozjpeg::ScanMode::AllComponentsTogether);
    }

    let mut started = comp.start_compress(Vec::new())?;
    started.write_scanlines(rgb.as_raw())?;
    Ok(started.finish()?)
}

/// Palette-quantize and write an indexed PNG at maximum deflate.
pub fn encode_png_indexed(img: &DynamicImage, max_colors: u32) -> Result<Vec<u8>> {
    let rgba = img.to_rgba8();
    let (width, height) = (rgba.width() as usize, rgba.height() as usize);
    let pixels: Vec<rgb::RGBA<u8>> = rgba
        .chunks_exact(4)
        .map(|c| rgb::RGBA::new(c[0], c[1], c[2], c[3]))
        .collect();

    let mut attr = imagequant::Attributes::new();
    attr.set_speed(3)
        .map_err(|e| codec_failed("imagequant", e))?;
    attr.set_max_colors(max_colors)
        .map_err(|e| codec_failed("imagequant", e))?;
    let mut liq_img = imagequant::Image::new(&attr, pixels.as_slice(), width, height, 0.0)
        .map_err(|e| codec_failed("imagequant", e))?;
    let mut quantized = attr
        .quantize(&mut liq_img)
        .map_err(|e| codec_failed("imagequant", e))?;
    quantized
        .set_dithering_level(1.0)
        .map_err(|e| codec_failed("imagequant", e))?;
    let (palette, indices) = quantized
        .remapped(&mut liq_img)
        .map_err(|e| codec_failed("imagequant", e))?;

    let mut out = Vec::new();
    {
        let mut encoder = ::png::Encoder::new(&mut out, rgba.width(), rgba.height());
        encoder.set_color(::png::ColorType::Indexed);
        encoder.set_depth(::png::BitDepth::Eight);
        encoder.set_compression(::png::Compression::Best);
        let plte: Vec<u8> = palette.iter().flat_map(|p| [p.r, p.g, p.b]).collect();
        encoder.set_palette(plte);
        if palette.iter().any(|p| p.a != 255) {
            let trns: Vec<u8> = palette.iter().map(|p| p.a).collect();
            encoder.set_trns(trns);
        }
        let mut writer = encoder
            .write_header()
            .map_err(|e| codec_failed("png", e))?;
        writer
            .write_image_data(&indices)
            .map_err(|e| codec_failed("png", e))?;
    }
    Ok(out)
}

/// Write a truecolor PNG at the given compression level.
pub fn encode_png_rgba(img: &DynamicImage, compression: ::png::Compression) -> Result<Vec<u8>> {
    let rgba = img.to_rgba8();
    let mut out = Vec::new();
    {
        let mut encoder = ::png::Encoder::new(&mut out, rgba.width(), rgba.height());
        encoder.set_color(::png::ColorType::Rgba);
        encoder.set_depth(::png::BitDepth::Eight);
        encoder.set_compression(compression);
        let mut writer = encoder
            .write_header()
            .map_err(|e| codec_failed("png", e))?;
        writer
            .write_image_data(rgba.as_raw())
            .map_err(|e| codec_failed("png", e))?;
    }
    Ok(out)
}

/// Decode a JXL stream to PNG bytes via `djxl`.
pub async fn decode_jxl_to_png(data: &[u8], timeout: std::time::Duration) -> Result<Vec<u8>> {
    let out = runner::run_tool("djxl", &["-", "-", "--output_format", "png"], data, timeout, &[])
        .await?;
    Ok(out.stdout)
}

/// Encode PNG bytes to JXL via `cjxl`. `quality: None` requests the
/// mathematically lossless mode.
pub async fn encode_png_to_jxl(
    png_data: &[u8],
    quality: Option<u8>,
    timeout: std::time::Duration,
) -> Result<Vec<u8>> {
    let quality_arg;
    let args: Vec<&str> = match quality {
        Some(q) => {
            quality_arg = q.to_string();
            vec!["-", "-", "-q", &quality_arg]
        }
        None => vec!["-", "-", "-d", "0"],
    };
    let out = runner::run_tool("cjxl", &args, png_data, timeout, &[]).await?;
    Ok(out.stdout)
}

/// Generic decode used by the estimator: image-crate formats directly,
/// ISOBMFF stills via libheif.
pub fn decode_raster(fmt: crate::format::ImageFormat, data: &[u8]) -> Result<DynamicImage> {
    use crate::format::ImageFormat;
    match fmt {
        ImageFormat::Avif | ImageFormat::Heic => decode_heif(data).map(|(img, _)| img),
        _ => Ok(image::ImageReader::new(Cursor::new(data))
            .with_guessed_format()?
            .decode()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
        }))
    }

    #[test]
    fn jpeg_encode_decodes_to_same_dimensions() {
        let img = gradient(64, 48);
        let jpeg = encode_jpeg(&img, 80, false).unwrap();
        let back = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((back.width(), back.height()), (64, 48));
    }

    #[test]
    fn jpeg_quality_affects_size() {
        let img = gradient(128, 128);
        let high = encode_jpeg(&img, 95, false).unwrap();
        let low = encode_jpeg(&img, 30, false).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn webp_encode_is_valid_webp() {
        let img = gradient(32, 32);
        let out = encode_webp(&img, 75, None).unwrap();
        assert_eq!(&out[0..4], b"RIFF");
        assert_eq!(&out[8..12], b"WEBP");
    }

    #[test]
    fn webp_icc_roundtrips_through_container_surgery() {
        let img = gradient(32, 32);
        let profile = vec![0xAAu8; 64];
        let out = encode_webp(&img, 75, Some(&profile)).unwrap();
        assert_eq!(webp_icc_profile(&out), Some(profile));
        assert_eq!(webp_icc_profile(&encode_webp(&img, 75, None).unwrap()), None);
    }

    #[test]
    fn indexed_png_respects_color_budget() {
        let img = gradient(64, 64);
        let out = encode_png_indexed(&img, 64).unwrap();
        let palette = crate::container::png::palette_size(&out).unwrap();
        assert!(palette <= 64, "palette has {palette} entries");
        let back = image::load_from_memory(&out).unwrap();
        assert_eq!((back.width(), back.height()), (64, 64));
    }

    #[test]
    fn rgba_png_roundtrip() {
        let img = gradient(16, 16);
        let out = encode_png_rgba(&img, ::png::Compression::Best).unwrap();
        let back = image::load_from_memory(&out).unwrap();
        assert_eq!((back.width(), back.height()), (16, 16));
    }
}
