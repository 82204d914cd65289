//! Byte-level container helpers shared by detection, stripping and
//! estimation. Nothing here decodes pixel data.

/// PNG chunk walking and filtering.
pub mod png {
    pub const SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    /// One chunk as it appears in the stream: type plus the full byte span
    /// (length + type + data + CRC).
    pub struct Chunk<'a> {
        pub chunk_type: &'a [u8],
        pub data: &'a [u8],
        pub raw: &'a [u8],
    }

    /// Iterate chunks after the signature. Stops at `IEND` or at the first
    /// truncated chunk.
    pub fn chunks(data: &[u8]) -> impl Iterator<Item = Chunk<'_>> {
        let mut pos = if data.starts_with(&SIGNATURE) { 8 } else { data.len() };
        std::iter::from_fn(move || {
            if pos + 12 > data.len() {
                return None;
            }
            let len =
                u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
                    as usize;
            let end = pos.checked_add(12 + len)?;
            if end > data.len() {
                return None;
            }
            let chunk = Chunk {
                chunk_type: &data[pos + 4..pos + 8],
                data: &data[pos + 8..pos + 8 + len],
                raw: &data[pos..end],
            };
            let stop = chunk.chunk_type == b"IEND";
            pos = if stop { data.len() } else { end };
            Some(chunk)
        })
    }

    /// True when an `acTL` chunk appears before the first `IDAT`.
    pub fn is_apng(data: &[u8]) -> bool {
        for chunk in chunks(data) {
            if chunk.chunk_type == b"acTL" {
                return true;
            }
            if chunk.chunk_type == b"IDAT" {
                return false;
            }
        }
        false
    }

    /// Frame count: the `acTL` num_frames field when present, else 1.
    pub fn frame_count(data: &[u8]) -> u32 {
        for chunk in chunks(data) {
            if chunk.chunk_type == b"acTL" && chunk.data.len() >= 4 {
                let n = u32::from_be_bytes([
                    chunk.data[0],
                    chunk.data[1],
                    chunk.data[2],
                    chunk.data[3],
                ]);
                return n.max(1);
            }
            if chunk.chunk_type == b"IDAT" {
                break;
            }
        }
        1
    }

    /// Rebuild the stream without chunks of the given types.
    pub fn filter_chunks(data: &[u8], drop: &[&[u8; 4]]) -> Vec<u8> {
        if !data.starts_with(&SIGNATURE) {
            return data.to_vec();
        }
        let mut out = Vec::with_capacity(data.len());
        out.extend_from_slice(&SIGNATURE);
        for chunk in chunks(data) {
            if !drop.iter().any(|t| chunk.chunk_type == *t) {
                out.extend_from_slice(chunk.raw);
            }
        }
        out
    }

    pub fn has_text_chunks(data: &[u8]) -> bool {
        chunks(data).any(|c| matches!(c.chunk_type, b"tEXt" | b"iTXt" | b"zTXt"))
    }

    pub fn has_chunk(data: &[u8], chunk_type: &[u8; 4]) -> bool {
        chunks(data).any(|c| c.chunk_type == chunk_type)
    }

    /// PLTE entry count, if the stream has a palette.
    pub fn palette_size(data: &[u8]) -> Option<usize> {
        chunks(data)
            .find(|c| c.chunk_type == b"PLTE")
            .map(|c| c.data.len() / 3)
    }

    /// Inflate the embedded ICC profile from the `iCCP` chunk, if any.
    /// Payload layout: profile name, NUL, compression method byte (0 =
    /// zlib), compressed profile.
    pub fn icc_profile(data: &[u8]) -> Option<Vec<u8>> {
        use std::io::Read;

        let chunk = chunks(data).find(|c| c.chunk_type == b"iCCP")?;
        let nul = chunk.data.iter().position(|&b| b == 0)?;
        let compressed = chunk.data.get(nul + 2..)?;
        let mut profile = Vec::new();
        flate2::read::ZlibDecoder::new(compressed)
            .read_to_end(&mut profile)
            .ok()?;
        if profile.is_empty() {
            None
        } else {
            Some(profile)
        }
    }

    pub struct Ihdr {
        pub width: u32,
        pub height: u32,
        pub bit_depth: u8,
        pub color_type: u8,
    }

    pub fn ihdr(data: &[u8]) -> Option<Ihdr> {
        let c = chunks(data).find(|c| c.chunk_type == b"IHDR")?;
        if c.data.len() < 13 {
            return None;
        }
        Some(Ihdr {
            width: u32::from_be_bytes([c.data[0], c.data[1], c.data[2], c.data[3]]),
            height: u32::from_be_bytes([c.data[4], c.data[5], c.data[6], c.data[7]]),
            bit_depth: c.data[8],
            color_type: c.data[9],
        })
    }
}

/// GIF block walking.
pub mod gif {
    /// Count image descriptors, skipping the global color table and
    /// extension sub-blocks.
    pub fn frame_count(data: &[u8]) -> u32 {
        if data.len() < 13 || !data.starts_with(b"GIF") {
            return 0;
        }

        let packed = data[10];
        let gct_size = if packed & 0x80 != 0 {
            3 * (1usize << ((packed & 0x07) + 1))
        } else {
            0
        };
        let mut pos = 13 + gct_size;

        let mut frames = 0u32;
        while pos < data.len() {
            match data[pos] {
                0x2C => {
                    frames += 1;
                    if pos + 10 > data.len() {
                        break;
                    }
                    let img_packed = data[pos + 9];
                    let lct_size = if img_packed & 0x80 != 0 {
                        3 * (1usize << ((img_packed & 0x07) + 1))
                    } else {
                        0
                    };
                    pos += 10 + lct_size;
                    if pos >= data.len() {
                        break;
                    }
                    pos += 1; // LZW minimum code size
                    pos = skip_sub_blocks(data, pos);
                }
                0x21 => {
                    if pos + 2 >= data.len() {
                        break;
                    }
                    pos += 2;
                    pos = skip_sub_blocks(data, pos);
                }
                0x3B => break,
                _ => pos += 1,
            }
        }
        frames
    }

    fn skip_sub_blocks(data: &[u8], mut pos: usize) -> usize {
        while pos < data.len() {
            let size = data[pos] as usize;
            pos += 1;
            if size == 0 {
                break;
            }
            pos += size;
        }
        pos
    }

    pub fn is_animated(data: &[u8]) -> bool {
        frame_count(data) > 1
    }
}

/// WebP RIFF chunk probes.
pub mod webp {
    pub fn is_lossless(data: &[u8]) -> bool {
        data.windows(4).any(|w| w == b"VP8L")
    }

    pub fn is_animated(data: &[u8]) -> bool {
        data.windows(4).any(|w| w == b"ANIM")
    }

    pub fn frame_count(data: &[u8]) -> u32 {
        let n = data.windows(4).filter(|w| *w == b"ANMF").count() as u32;
        n.max(1)
    }
}

/// JPEG marker-segment probes.
pub mod jpeg {
    /// Walk marker segments, yielding (marker, payload) for segments that
    /// carry a length. Stops at SOS.
    fn segments(data: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
        let mut pos = 2usize; // past SOI
        std::iter::from_fn(move || {
            loop {
                if pos + 4 > data.len() {
                    return None;
                }
                if data[pos] != 0xFF {
                    pos += 1;
                    continue;
                }
                let marker = data[pos + 1];
                // Standalone markers without a length field.
                if marker == 0xFF || (0xD0..=0xD9).contains(&marker) || marker == 0x01 {
                    pos += 2;
                    continue;
                }
                let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
                if len < 2 || pos + 2 + len > data.len() {
                    return None;
                }
                if marker == 0xDA {
                    // Entropy-coded data follows; stop walking.
                    return None;
                }
                let payload = &data[pos + 4..pos + 2 + len];
                pos += 2 + len;
                return Some((marker, payload));
            }
        })
    }

    pub fn is_progressive(data: &[u8]) -> bool {
        segments(data).any(|(m, _)| m == 0xC2)
    }

    /// Width and height from the first SOF segment.
    pub fn dimensions(data: &[u8]) -> Option<(u32, u32)> {
        let (_, sof) = segments(data).find(|(m, _)| {
            matches!(m, 0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF)
        })?;
        if sof.len() < 5 {
            return None;
        }
        let height = u16::from_be_bytes([sof[1], sof[2]]) as u32;
        let width = u16::from_be_bytes([sof[3], sof[4]]) as u32;
        Some((width, height))
    }

    pub fn has_exif(data: &[u8]) -> bool {
        segments(data).any(|(m, p)| m == 0xE1 && p.starts_with(b"Exif\0\0"))
    }

    pub fn has_icc_profile(data: &[u8]) -> bool {
        segments(data).any(|(m, p)| m == 0xE2 && p.starts_with(b"ICC_PROFILE\0"))
    }

    /// Estimate the encoder quality from the first (luminance) quantization
    /// table, via the inverse of the IJG scaling formula. The base
    /// luminance table averages ~25, so `avg ≈ 25 * scale / 100`.
    pub fn estimate_quality(data: &[u8]) -> Option<u8> {
        let dqt = segments(data).find(|(m, _)| *m == 0xDB)?.1;
        // DQT payload: precision/id byte, then 64 (or 128 for 16-bit) values.
        if dqt.len() < 65 {
            return None;
        }
        let precision_16 = dqt[0] >> 4 != 0;
        let values: Vec<u32> = if precision_16 {
            if dqt.len() < 129 {
                return None;
            }
            dqt[1..129]
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]) as u32)
                .collect()
        } else {
            dqt[1..65].iter().map(|&v| v as u32).collect()
        };
        let avg = values.iter().sum::<u32>() as f64 / values.len() as f64;
        Some(quality_from_average(avg))
    }

    fn quality_from_average(avg: f64) -> u8 {
        if avg <= 0.5 {
            return 100;
        }
        let scale = (avg / 25.0) * 100.0;
        let quality = if scale < 100.0 {
            (200.0 - scale) / 2.0
        } else {
            5000.0 / scale
        };
        quality.round().clamp(1.0, 100.0) as u8
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn quality_curve_is_monotonic() {
            // Higher average quantizer means lower quality.
            let q_fine = quality_from_average(2.0);
            let q_mid = quality_from_average(25.0);
            let q_coarse = quality_from_average(120.0);
            assert!(q_fine > q_mid && q_mid > q_coarse);
            assert_eq!(quality_from_average(0.3), 100);
        }
    }
}
