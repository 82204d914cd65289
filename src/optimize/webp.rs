//! WebP optimization: in-process re-encode, with a cwebp CLI fallback
//! when the in-process result barely improved on the input.

use async_trait::async_trait;
use image::DynamicImage;

use crate::codec;
use crate::config::OptimizationConfig;
use crate::container;
use crate::error::Result;
use crate::format::ImageFormat;
use crate::optimize::{pick_smallest, run_codec, Optimizer};
use crate::result::{finalize, OptimizeResult};
use crate::runner::{run_tool, DEFAULT_TOOL_TIMEOUT};
use crate::tools;

pub struct WebpOptimizer;

#[async_trait]
impl Optimizer for WebpOptimizer {
    async fn optimize(&self, data: &[u8], config: &OptimizationConfig) -> Result<OptimizeResult> {
        // No animated re-encoder in this stack; hand back the original.
        if container::webp::is_animated(data) {
            return Ok(crate::result::unchanged(data, ImageFormat::Webp));
        }

        // The source's ICC profile rides along on every candidate; the
        // webp encoder writes bare streams, so it goes back in through
        // container surgery.
        let icc = codec::webp_icc_profile(data);

        let inproc = {
            let data = data.to_vec();
            let config = config.clone();
            let icc = icc.clone();
            run_codec("webp", move || {
                let img = image::load_from_memory(&data)?;
                let out = codec::encode_webp(&img, config.quality, icc.as_deref())?;
                match config.max_reduction {
                    Some(cap) => {
                        cap_reduction(&img, &config, data.len(), out, cap, icc.as_deref())
                    }
                    None => Ok(out),
                }
            })
            .await
        };

        // Only reach for the CLI when the in-process result is still at
        // least 90% of the input size (or failed outright).
        let want_cli_fallback = match &inproc {
            Ok(out) => out.len() * 10 >= data.len() * 9,
            Err(_) => true,
        };
        let mut candidates = Vec::new();
        candidates.push((inproc, "webp"));

        if want_cli_fallback && tools::have("cwebp") {
            let quality = config.quality.to_string();
            let cli = run_tool(
                "cwebp",
                &["-q", &quality, "-m", "4", "-mt", "-o", "-", "--", "-"],
                data,
                DEFAULT_TOOL_TIMEOUT,
                &[],
            )
            .await
            .map(|out| codec::embed_webp_icc(out.stdout, icc.as_deref()));
            candidates.push((cli, "cwebp"));
        }

        match pick_smallest(candidates) {
            Some((bytes, method)) => Ok(finalize(data, bytes, method, ImageFormat::Webp)),
            None => Ok(crate::result::unchanged(data, ImageFormat::Webp)),
        }
    }
}

/// Binary-search quality upward until the reduction fits under the cap.
fn cap_reduction(
    img: &DynamicImage,
    config: &OptimizationConfig,
    original_size: usize,
    at_target: Vec<u8>,
    cap: f32,
    icc: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let reduction = |len: usize| (1.0 - len as f64 / original_size as f64) * 100.0;
    if reduction(at_target.len()) <= cap as f64 {
        return Ok(at_target);
    }

    let at_100 = codec::encode_webp(img, 100, icc)?;
    if reduction(at_100.len()) > cap as f64 {
        return Err(crate::error::SlimgError::OptimizationFailed {
            tool: "webp".to_string(),
            stderr: "reduction cap cannot be met".to_string(),
        });
    }

    let (mut lo, mut hi) = (config.quality, 100u8);
    let mut best = at_100;
    for _ in 0..5 {
        if hi - lo <= 1 {
            break;
        }
        let mid = lo + (hi - lo) / 2;
        let at_mid = codec::encode_webp(img, mid, icc)?;
        if reduction(at_mid.len()) > cap as f64 {
            lo = mid;
        } else {
            hi = mid;
            best = at_mid;
        }
    }
    Ok(best)
}
