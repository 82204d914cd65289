//! Selective metadata stripping.
//!
//! Only two pieces of metadata survive a strip: the EXIF orientation tag
//! (a stripped photo must not render rotated) and the ICC color profile
//! (product photography must not shift colors). GPS, camera info, XMP,
//! IPTC, thumbnails, comments and PNG text chunks are all dropped.

use std::borrow::Cow;

use img_parts::jpeg::Jpeg;
use img_parts::{Bytes, ImageEXIF, ImageICC};

use crate::container;
use crate::error::{Result, SlimgError};
use crate::format::ImageFormat;

const ORIENTATION_TAG: u16 = 0x0112;

/// Strip non-essential metadata for the given format.
///
/// JPEG is rewritten at the segment level (no pixel re-encode); PNG at the
/// chunk level. Formats whose optimizers re-encode anyway (WebP, GIF, SVG,
/// BMP, TIFF, the ISOBMFF family) are returned unchanged here; their
/// metadata disappears in the re-encode candidates.
pub fn strip_metadata<'a>(data: &'a [u8], fmt: ImageFormat) -> Result<Cow<'a, [u8]>> {
    match fmt {
        ImageFormat::Jpeg => strip_jpeg(data).map(Cow::Owned),
        ImageFormat::Png | ImageFormat::Apng => Ok(Cow::Owned(container::png::filter_chunks(
            data,
            &[b"tEXt", b"iTXt", b"zTXt"],
        ))),
        _ => Ok(Cow::Borrowed(data)),
    }
}

/// Segment-level JPEG strip: drop every APPn and COM segment, then
/// re-attach the ICC profile and a minimal orientation-only EXIF block.
fn strip_jpeg(data: &[u8]) -> Result<Vec<u8>> {
    let mut jpeg =
        Jpeg::from_bytes(Bytes::copy_from_slice(data)).map_err(|e| {
            SlimgError::OptimizationFailed {
                tool: "jpeg-metadata".to_string(),
                stderr: e.to_string(),
            }
        })?;

    let icc = jpeg.icc_profile();
    let orientation = jpeg.exif().as_deref().and_then(parse_orientation);

    jpeg.segments_mut().retain(|segment| {
        let marker = segment.marker();
        !((0xE0..=0xEF).contains(&marker) || marker == 0xFE)
    });

    apply_preserved(&mut jpeg, icc, orientation);
    Ok(jpeg.encoder().bytes().to_vec())
}

/// Re-attach preserved metadata to a freshly encoded JPEG. Used by the
/// JPEG optimizer after its re-encode candidates, which emit bare streams.
pub fn embed_jpeg_metadata(
    encoded: Vec<u8>,
    icc: Option<Vec<u8>>,
    orientation: Option<u16>,
) -> Vec<u8> {
    if icc.is_none() && orientation.is_none() {
        return encoded;
    }
    match Jpeg::from_bytes(Bytes::from(encoded.clone())) {
        Ok(mut jpeg) => {
            apply_preserved(&mut jpeg, icc.map(Bytes::from), orientation);
            jpeg.encoder().bytes().to_vec()
        }
        Err(_) => encoded,
    }
}

fn apply_preserved(jpeg: &mut Jpeg, icc: Option<Bytes>, orientation: Option<u16>) {
    if let Some(o) = orientation {
        jpeg.set_exif(Some(Bytes::from(orientation_only_exif(o))));
    }
    if icc.is_some() {
        jpeg.set_icc_profile(icc);
    }
}

/// Extract metadata worth preserving from a JPEG stream.
pub fn preserved_jpeg_fields(data: &[u8]) -> (Option<Vec<u8>>, Option<u16>) {
    match Jpeg::from_bytes(Bytes::copy_from_slice(data)) {
        Ok(jpeg) => {
            let icc = jpeg.icc_profile().map(|b| b.to_vec());
            let orientation = jpeg.exif().as_deref().and_then(parse_orientation);
            (icc, orientation)
        }
        Err(_) => (None, None),
    }
}

const ICC_TAG: u16 = 34675;

/// Extract the fields a TIFF re-encode must carry forward: the ICC
/// profile (tag 34675) and the orientation (tag 274). A TIFF file shares
/// the IFD layout of an EXIF block, so the same walk covers both tags.
pub fn tiff_preserved_fields(data: &[u8]) -> (Option<Vec<u8>>, Option<u16>) {
    (parse_tiff_icc(data), parse_orientation(data))
}

fn parse_tiff_icc(data: &[u8]) -> Option<Vec<u8>> {
    if data.len() < 14 {
        return None;
    }
    let le = match &data[0..2] {
        b"II" => true,
        b"MM" => false,
        _ => return None,
    };
    let rd16 = |b: &[u8]| {
        if le {
            u16::from_le_bytes([b[0], b[1]])
        } else {
            u16::from_be_bytes([b[0], b[1]])
        }
    };
    let rd32 = |b: &[u8]| {
        if le {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        }
    };

    if rd16(&data[2..4]) != 42 {
        return None;
    }
    let ifd = rd32(&data[4..8]) as usize;
    if ifd + 2 > data.len() {
        return None;
    }
    let entries = rd16(&data[ifd..ifd + 2]) as usize;
    for i in 0..entries {
        let at = ifd + 2 + i * 12;
        if at + 12 > data.len() {
            break;
        }
        if rd16(&data[at..at + 2]) != ICC_TAG {
            continue;
        }
        let count = rd32(&data[at + 4..at + 8]) as usize;
        if count == 0 {
            return None;
        }
        // The profile never fits inline; the value field is an offset.
        let offset = rd32(&data[at + 8..at + 12]) as usize;
        let end = offset.checked_add(count)?;
        if end > data.len() {
            return None;
        }
        return Some(data[offset..end].to_vec());
    }
    None
}

/// Walk IFD0 of a raw TIFF-structured EXIF block for the orientation tag.
fn parse_orientation(exif: &[u8]) -> Option<u16> {
    if exif.len() < 14 {
        return None;
    }
    let le = match &exif[0..2] {
        b"II" => true,
        b"MM" => false,
        _ => return None,
    };
    let rd16 = |b: &[u8]| {
        if le {
            u16::from_le_bytes([b[0], b[1]])
        } else {
            u16::from_be_bytes([b[0], b[1]])
        }
    };
    let rd32 = |b: &[u8]| {
        if le {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        }
    };

    if rd16(&exif[2..4]) != 42 {
        return None;
    }
    let ifd = rd32(&exif[4..8]) as usize;
    if ifd + 2 > exif.len() {
        return None;
    }
    let entries = rd16(&exif[ifd..ifd + 2]) as usize;
    for i in 0..entries {
        let at = ifd + 2 + i * 12;
        if at + 12 > exif.len() {
            break;
        }
        if rd16(&exif[at..at + 2]) == ORIENTATION_TAG {
            let value = rd16(&exif[at + 8..at + 10]);
            if (1..=8).contains(&value) {
                return Some(value);
            }
        }
    }
    None
}

/// A minimal little-endian TIFF block holding only the orientation tag.
fn orientation_only_exif(orientation: u16) -> Vec<u8> {
    let mut b = Vec::with_capacity(26);
    b.extend_from_slice(b"II\x2a\x00");
    b.extend_from_slice(&8u32.to_le_bytes()); // IFD0 offset
    b.extend_from_slice(&1u16.to_le_bytes()); // entry count
    b.extend_from_slice(&ORIENTATION_TAG.to_le_bytes());
    b.extend_from_slice(&3u16.to_le_bytes()); // type SHORT
    b.extend_from_slice(&1u32.to_le_bytes()); // count
    b.extend_from_slice(&orientation.to_le_bytes());
    b.extend_from_slice(&[0, 0]); // value field padding
    b.extend_from_slice(&0u32.to_le_bytes()); // no next IFD
    b
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::RgbImage;

    fn test_jpeg() -> Vec<u8> {
        let img = RgbImage::from_fn(16, 16, |x, y| image::Rgb([x as u8 * 10, y as u8 * 10, 128]));
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90)
            .encode_image(&img)
            .unwrap();
        out
    }

    #[test]
    fn orientation_roundtrip() {
        let block = orientation_only_exif(6);
        assert_eq!(parse_orientation(&block), Some(6));
    }

    #[test]
    fn orientation_parse_rejects_garbage() {
        assert_eq!(parse_orientation(b"XXnothing here at all"), None);
        assert_eq!(parse_orientation(&[]), None);
    }

    #[test]
    fn jpeg_strip_preserves_icc_and_orientation_drops_the_rest() {
        let mut jpeg = Jpeg::from_bytes(Bytes::from(test_jpeg())).unwrap();
        let icc = vec![1u8, 2, 3, 4, 5];
        jpeg.set_icc_profile(Some(Bytes::from(icc.clone())));
        jpeg.set_exif(Some(Bytes::from(orientation_only_exif(3))));
        jpeg.segments_mut().push(img_parts::jpeg::JpegSegment::new_with_contents(
            0xFE,
            Bytes::from_static(b"shot on a potato"),
        ));
        let tagged = jpeg.encoder().bytes().to_vec();

        let stripped = strip_jpeg(&tagged).unwrap();
        let reparsed = Jpeg::from_bytes(Bytes::from(stripped.clone())).unwrap();
        assert_eq!(reparsed.icc_profile().map(|b| b.to_vec()), Some(icc));
        assert_eq!(reparsed.exif().as_deref().and_then(parse_orientation), Some(3));
        assert!(!reparsed
            .segments()
            .iter()
            .any(|s| s.marker() == 0xFE));
        // Pixels untouched: still decodes to the same dimensions.
        let img = image::load_from_memory(&stripped).unwrap();
        assert_eq!((img.width(), img.height()), (16, 16));
    }

    #[test]
    fn png_strip_keeps_animation_and_profile_chunks() {
        use crate::container::png;

        // A real 1x1 PNG from the png crate, with injected chunks.
        let mut raw = Vec::new();
        {
            let mut encoder = ::png::Encoder::new(&mut raw, 1, 1);
            encoder.set_color(::png::ColorType::Rgb);
            encoder.set_depth(::png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(&[10, 20, 30]).unwrap();
        }

        // Splice a tEXt chunk ahead of IDAT by filtering/rebuilding.
        let mut spliced = png::SIGNATURE.to_vec();
        for chunk in png::chunks(&raw) {
            if chunk.chunk_type == b"IDAT" {
                spliced.extend_from_slice(&make_test_chunk(b"tEXt", b"Software\0slimg-test"));
                spliced.extend_from_slice(&make_test_chunk(b"pHYs", &[0; 9]));
            }
            spliced.extend_from_slice(chunk.raw);
        }

        let stripped = strip_metadata(&spliced, ImageFormat::Png).unwrap();
        assert!(!png::has_text_chunks(&stripped));
        assert!(png::has_chunk(&stripped, b"pHYs"));
        assert!(png::has_chunk(&stripped, b"IDAT"));
    }

    fn make_test_chunk(chunk_type: &[u8; 4], data: &[u8]) -> Vec<u8> {
        let mut out = (data.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(chunk_type);
        out.extend_from_slice(data);
        let mut crc = flate2::Crc::new();
        crc.update(chunk_type);
        crc.update(data);
        out.extend_from_slice(&crc.sum().to_be_bytes());
        out
    }

    #[test]
    fn other_formats_pass_through_borrowed() {
        let data = b"RIFF....WEBP".to_vec();
        let out = strip_metadata(&data, ImageFormat::Webp).unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
    }
}
