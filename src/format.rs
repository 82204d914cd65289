//! Magic-byte format detection.
//!
//! Identification never trusts file extensions or declared content types;
//! only the leading bytes of the payload decide the tag. Misidentification
//! would silently corrupt output, so the signature set is treated as part
//! of the external contract.

use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::container;
use crate::error::{Result, SlimgError};

/// The closed set of supported formats, in registry order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Apng,
    Jpeg,
    Webp,
    Gif,
    Svg,
    Svgz,
    Avif,
    Heic,
    Tiff,
    Bmp,
    Jxl,
}

pub const FORMAT_COUNT: usize = 12;

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Apng => "apng",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Webp => "webp",
            ImageFormat::Gif => "gif",
            ImageFormat::Svg => "svg",
            ImageFormat::Svgz => "svgz",
            ImageFormat::Avif => "avif",
            ImageFormat::Heic => "heic",
            ImageFormat::Tiff => "tiff",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Jxl => "jxl",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Apng => "image/apng",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Svg | ImageFormat::Svgz => "image/svg+xml",
            ImageFormat::Avif => "image/avif",
            ImageFormat::Heic => "image/heic",
            ImageFormat::Tiff => "image/tiff",
            ImageFormat::Bmp => "image/bmp",
            ImageFormat::Jxl => "image/jxl",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detect the format of `data` from its magic bytes.
///
/// At least the first ~32 bytes should be present. Returns
/// [`SlimgError::UnsupportedFormat`] when nothing matches.
pub fn detect_format(data: &[u8]) -> Result<ImageFormat> {
    if data.len() < 4 {
        return Err(SlimgError::UnsupportedFormat(
            "file too small to identify".into(),
        ));
    }

    // JXL bare codestream: FF 0A. Checked before JPEG's FF D8 FF.
    if data.starts_with(&[0xFF, 0x0A]) {
        return Ok(ImageFormat::Jxl);
    }

    // JXL ISOBMFF container signature box.
    if data.starts_with(&[0x00, 0x00, 0x00, 0x0C, 0x4A, 0x58, 0x4C, 0x20]) {
        return Ok(ImageFormat::Jxl);
    }

    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        if container::png::is_apng(data) {
            return Ok(ImageFormat::Apng);
        }
        return Ok(ImageFormat::Png);
    }

    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Ok(ImageFormat::Jpeg);
    }

    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Ok(ImageFormat::Gif);
    }

    if data.starts_with(b"RIFF") && data.len() >= 12 && &data[8..12] == b"WEBP" {
        return Ok(ImageFormat::Webp);
    }

    if data.starts_with(b"BM") {
        return Ok(ImageFormat::Bmp);
    }

    if data.starts_with(&[0x49, 0x49, 0x2A, 0x00]) || data.starts_with(&[0x4D, 0x4D, 0x00, 0x2A]) {
        return Ok(ImageFormat::Tiff);
    }

    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return detect_isobmff(data);
    }

    // SVGZ: gzip stream whose inflated content is SVG.
    if data.starts_with(&[0x1F, 0x8B]) {
        if let Some(inflated) = inflate_prefix(data) {
            if is_svg_content(&inflated) {
                return Ok(ImageFormat::Svgz);
            }
        }
    }

    if is_svg_content(data) {
        return Ok(ImageFormat::Svg);
    }

    Err(SlimgError::UnsupportedFormat(format!(
        "unrecognized signature {:02x?}",
        &data[..data.len().min(16)]
    )))
}

/// Resolve AVIF vs HEIC vs JXL from an ISOBMFF `ftyp` box.
///
/// The major brand is checked first; `mif1`/`msf1` majors are ambiguous and
/// require scanning the compatible-brands list.
fn detect_isobmff(data: &[u8]) -> Result<ImageFormat> {
    let major = &data[8..12];

    if major == b"jxl " {
        return Ok(ImageFormat::Jxl);
    }
    if major == b"avif" || major == b"avis" {
        return Ok(ImageFormat::Avif);
    }
    if major == b"heic" || major == b"heix" || major == b"mif1" {
        // mif1 can front an AVIF file; the compatible brands settle it.
        if major == b"mif1" {
            if let Some(fmt) = scan_compatible_brands(data) {
                return Ok(fmt);
            }
        }
        return Ok(ImageFormat::Heic);
    }

    if let Some(fmt) = scan_compatible_brands(data) {
        return Ok(fmt);
    }

    Err(SlimgError::UnsupportedFormat(format!(
        "ISOBMFF with unrecognized brand {:?}",
        String::from_utf8_lossy(major)
    )))
}

fn scan_compatible_brands(data: &[u8]) -> Option<ImageFormat> {
    let box_size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let box_end = box_size.min(data.len());

    // compatible_brands start after size + "ftyp" + major_brand + minor_version
    let mut offset = 16;
    while offset + 4 <= box_end {
        let brand = &data[offset..offset + 4];
        match brand {
            b"jxl " => return Some(ImageFormat::Jxl),
            b"avif" | b"avis" => return Some(ImageFormat::Avif),
            b"heic" | b"heix" | b"mif1" => return Some(ImageFormat::Heic),
            _ => {}
        }
        offset += 4;
    }
    None
}

/// Inflate up to 4 KiB of a gzip stream, enough to sniff the content.
fn inflate_prefix(data: &[u8]) -> Option<Vec<u8>> {
    let decoder = flate2::read::GzDecoder::new(data);
    let mut buf = Vec::new();
    match decoder.take(4096).read_to_end(&mut buf) {
        Ok(n) if n > 0 => Some(buf),
        _ => None,
    }
}

/// SVG sniff: after an optional BOM and leading whitespace, the content
/// starts with `<?xml` or `<svg`.
fn is_svg_content(data: &[u8]) -> bool {
    let mut text = data;
    if text.starts_with(&[0xEF, 0xBB, 0xBF]) {
        text = &text[3..];
    }
    let start = text
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(text.len());
    let head = &text[start..text.len().min(start + 256)];
    let lower: Vec<u8> = head.iter().map(|b| b.to_ascii_lowercase()).collect();
    lower.starts_with(b"<?xml") || lower.starts_with(b"<svg")
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn detection_never_panics(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = detect_format(&data);
        }

        #[test]
        fn detected_tag_is_stable(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let a = detect_format(&data).ok();
            let b = detect_format(&data).ok();
            prop_assert_eq!(a, b);
        }
    }
}
