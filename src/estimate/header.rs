//! Cheap header analysis: everything the estimate response reports about
//! the input that does not require a full pixel decode.

use image::DynamicImage;
use serde::Serialize;

use crate::container;
use crate::format::ImageFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorKind {
    Rgb,
    Rgba,
    Palette,
    Grayscale,
    Cmyk,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeaderInfo {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub color_type: Option<ColorKind>,
    pub bit_depth: Option<u8>,
    pub frame_count: u32,
    pub has_icc_profile: bool,
    pub has_exif: bool,
    /// JPEG only, read from the quantization tables.
    pub estimated_quality: Option<u8>,
    pub is_progressive: bool,
    pub palette_size: Option<usize>,
    pub has_text_chunks: bool,
    pub file_size: usize,
}

impl HeaderInfo {
    fn empty(format: ImageFormat, file_size: usize) -> Self {
        Self {
            format,
            width: 0,
            height: 0,
            color_type: None,
            bit_depth: None,
            frame_count: 1,
            has_icc_profile: false,
            has_exif: false,
            estimated_quality: None,
            is_progressive: false,
            palette_size: None,
            has_text_chunks: false,
            file_size,
        }
    }
}

/// Probe container structures without decoding pixels.
pub fn analyze(data: &[u8], fmt: ImageFormat) -> HeaderInfo {
    let mut info = HeaderInfo::empty(fmt, data.len());

    match fmt {
        ImageFormat::Png | ImageFormat::Apng => {
            if let Some(ihdr) = container::png::ihdr(data) {
                info.width = ihdr.width;
                info.height = ihdr.height;
                info.bit_depth = Some(ihdr.bit_depth);
                info.color_type = Some(match ihdr.color_type {
                    0 | 4 => ColorKind::Grayscale,
                    3 => ColorKind::Palette,
                    6 => ColorKind::Rgba,
                    _ => ColorKind::Rgb,
                });
            }
            info.frame_count = container::png::frame_count(data);
            info.palette_size = container::png::palette_size(data);
            info.has_text_chunks = container::png::has_text_chunks(data);
            info.has_icc_profile = container::png::has_chunk(data, b"iCCP");
        }
        ImageFormat::Jpeg => {
            if let Some((w, h)) = container::jpeg::dimensions(data) {
                info.width = w;
                info.height = h;
            }
            info.color_type = Some(ColorKind::Rgb);
            info.bit_depth = Some(8);
            info.estimated_quality = container::jpeg::estimate_quality(data);
            info.is_progressive = container::jpeg::is_progressive(data);
            info.has_exif = container::jpeg::has_exif(data);
            info.has_icc_profile = container::jpeg::has_icc_profile(data);
        }
        ImageFormat::Gif => {
            if data.len() >= 10 {
                info.width = u16::from_le_bytes([data[6], data[7]]) as u32;
                info.height = u16::from_le_bytes([data[8], data[9]]) as u32;
            }
            info.color_type = Some(ColorKind::Palette);
            info.bit_depth = Some(8);
            info.frame_count = container::gif::frame_count(data).max(1);
        }
        ImageFormat::Webp => {
            info.frame_count = if container::webp::is_animated(data) {
                container::webp::frame_count(data)
            } else {
                1
            };
            if let Ok(reader) =
                image::ImageReader::new(std::io::Cursor::new(data)).with_guessed_format()
            {
                if let Ok((w, h)) = reader.into_dimensions() {
                    info.width = w;
                    info.height = h;
                }
            }
        }
        ImageFormat::Bmp | ImageFormat::Tiff => {
            if let Ok(reader) =
                image::ImageReader::new(std::io::Cursor::new(data)).with_guessed_format()
            {
                if let Ok((w, h)) = reader.into_dimensions() {
                    info.width = w;
                    info.height = h;
                }
            }
        }
        ImageFormat::Svg | ImageFormat::Svgz => {
            if let Some((w, h)) = svg_dimensions(data, fmt) {
                info.width = w;
                info.height = h;
            }
        }
        // ISOBMFF dims come from libheif during decode; JXL from djxl.
        ImageFormat::Avif | ImageFormat::Heic | ImageFormat::Jxl => {}
    }

    info
}

/// Map a decoded image's mode onto the response fields.
pub fn color_from_image(img: &DynamicImage) -> (ColorKind, u8) {
    match img.color() {
        image::ColorType::L8 | image::ColorType::La8 => (ColorKind::Grayscale, 8),
        image::ColorType::L16 | image::ColorType::La16 => (ColorKind::Grayscale, 16),
        image::ColorType::Rgb8 => (ColorKind::Rgb, 8),
        image::ColorType::Rgb16 | image::ColorType::Rgb32F => (ColorKind::Rgb, 16),
        image::ColorType::Rgba8 => (ColorKind::Rgba, 8),
        _ => (ColorKind::Rgba, 16),
    }
}

/// Best-effort SVG canvas size from the viewBox, parsed without a full XML
/// pass.
fn svg_dimensions(data: &[u8], fmt: ImageFormat) -> Option<(u32, u32)> {
    let text = if fmt == ImageFormat::Svgz {
        use std::io::Read;
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(data).read_to_end(&mut out).ok()?;
        String::from_utf8_lossy(&out).into_owned()
    } else {
        String::from_utf8_lossy(data).into_owned()
    };

    let at = text.find("viewBox=")?;
    let rest = &text[at + 8..];
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let inner = &rest[1..rest[1..].find(quote)? + 1];
    let parts: Vec<f64> = inner
        .split_whitespace()
        .filter_map(|p| p.parse().ok())
        .collect();
    if parts.len() == 4 {
        Some((parts[2].max(0.0) as u32, parts[3].max(0.0) as u32))
    } else {
        None
    }
}
