//! JPEG optimization: in-process mozjpeg re-encode racing a lossless
//! jpegtran pass.
//!
//! When the source quality (read from its quantization tables) is already
//! at or below the target, re-encoding would add generation loss for a
//! larger file; the jpegtran candidate wins the size comparison and the
//! pixels are untouched.

use async_trait::async_trait;
use image::DynamicImage;

use crate::codec;
use crate::config::OptimizationConfig;
use crate::error::Result;
use crate::format::ImageFormat;
use crate::metadata;
use crate::optimize::{pick_smallest, run_codec, Optimizer};
use crate::result::{finalize, OptimizeResult};
use crate::runner::{run_tool, DEFAULT_TOOL_TIMEOUT};
use crate::tools;

pub struct JpegOptimizer;

#[async_trait]
impl Optimizer for JpegOptimizer {
    async fn optimize(&self, data: &[u8], config: &OptimizationConfig) -> Result<OptimizeResult> {
        let (icc, orientation) = metadata::preserved_jpeg_fields(data);

        let reencode = reencode_candidate(
            data.to_vec(),
            config.clone(),
            icc.clone(),
            orientation,
        );
        let jpegtran = jpegtran_candidate(data, config, icc.clone(), orientation);

        let (lossy, lossless) = tokio::join!(reencode, jpegtran);

        let candidates = vec![(lossy, "mozjpeg"), (lossless, "jpegtran")];
        match pick_smallest(candidates) {
            Some((bytes, method)) => Ok(finalize(data, bytes, method, ImageFormat::Jpeg)),
            None => Ok(crate::result::unchanged(data, ImageFormat::Jpeg)),
        }
    }
}

/// Decode once, re-encode at the target quality, and honor the
/// `max_reduction` cap with a bounded binary search over quality.
async fn reencode_candidate(
    data: Vec<u8>,
    config: OptimizationConfig,
    icc: Option<Vec<u8>>,
    orientation: Option<u16>,
) -> Result<Vec<u8>> {
    let original_size = data.len();
    let inproc_data = data.clone();
    let inproc_config = config.clone();
    let encoded = run_codec("mozjpeg", move || {
        let config = inproc_config;
        let img = image::load_from_memory(&inproc_data)?;
        let out = codec::encode_jpeg(&img, config.quality, config.progressive_jpeg)?;

        let out = match config.max_reduction {
            Some(cap) => match cap_lossy_reduction(&img, &config, original_size, out, cap)? {
                Some(capped) => capped,
                // Even q=100 exceeds the cap: withdraw the lossy candidate.
                None => {
                    return Err(crate::error::SlimgError::OptimizationFailed {
                        tool: "mozjpeg".to_string(),
                        stderr: "reduction cap cannot be met".to_string(),
                    })
                }
            },
            None => out,
        };
        Ok(out)
    })
    .await;

    match encoded {
        Ok(out) => Ok(attach_metadata(out, icc, orientation)),
        // Optional CLI fallback when the in-process encoder is unusable.
        Err(_) if tools::have("cjpeg") => {
            let out = cjpeg_fallback(data, &config).await?;
            Ok(attach_metadata(out, icc, orientation))
        }
        Err(e) => Err(e),
    }
}

/// MozJPEG's `cjpeg` wants an uncompressed stream; decode to BMP and pipe
/// it through.
async fn cjpeg_fallback(data: Vec<u8>, config: &OptimizationConfig) -> Result<Vec<u8>> {
    let bmp = run_codec("cjpeg", move || {
        let img = image::load_from_memory(&data)?;
        let mut cursor = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img.to_rgb8())
            .write_to(&mut cursor, image::ImageFormat::Bmp)?;
        Ok(cursor.into_inner())
    })
    .await?;

    let quality = config.quality.to_string();
    let mut args = vec!["-quality", quality.as_str()];
    if config.progressive_jpeg {
        args.push("-progressive");
    }
    let out = run_tool("cjpeg", &args, &bmp, DEFAULT_TOOL_TIMEOUT, &[]).await?;
    Ok(out.stdout)
}

fn cap_lossy_reduction(
    img: &DynamicImage,
    config: &OptimizationConfig,
    original_size: usize,
    at_target: Vec<u8>,
    cap: f32,
) -> Result<Option<Vec<u8>>> {
    let reduction = |len: usize| (1.0 - len as f64 / original_size as f64) * 100.0;
    if reduction(at_target.len()) <= cap as f64 {
        return Ok(Some(at_target));
    }

    let at_100 = codec::encode_jpeg(img, 100, config.progressive_jpeg)?;
    if reduction(at_100.len()) > cap as f64 {
        return Ok(None);
    }

    // Lowest quality whose reduction stays within the cap, five probes max.
    let (mut lo, mut hi) = (config.quality, 100u8);
    let mut best = at_100;
    for _ in 0..5 {
        if hi - lo <= 1 {
            break;
        }
        let mid = lo + (hi - lo) / 2;
        let at_mid = codec::encode_jpeg(img, mid, config.progressive_jpeg)?;
        if reduction(at_mid.len()) > cap as f64 {
            lo = mid;
        } else {
            hi = mid;
            best = at_mid;
        }
    }
    Ok(Some(best))
}

/// Lossless Huffman-table optimization. jpegtran's `-copy none` drops all
/// markers, so preserved fields are re-attached afterwards.
async fn jpegtran_candidate(
    data: &[u8],
    config: &OptimizationConfig,
    icc: Option<Vec<u8>>,
    orientation: Option<u16>,
) -> Result<Vec<u8>> {
    let copy_mode = if config.strip_metadata { "none" } else { "all" };
    let mut args = vec!["-optimize", "-copy", copy_mode];
    if config.progressive_jpeg {
        args.push("-progressive");
    }
    let out = run_tool("jpegtran", &args, data, DEFAULT_TOOL_TIMEOUT, &[]).await?;
    if config.strip_metadata {
        // `-copy none` dropped the preserved fields too; restore them.
        Ok(attach_metadata(out.stdout, icc, orientation))
    } else {
        Ok(out.stdout)
    }
}

fn attach_metadata(encoded: Vec<u8>, icc: Option<Vec<u8>>, orientation: Option<u16>) -> Vec<u8> {
    metadata::embed_jpeg_metadata(encoded, icc, orientation)
}
