//! JPEG XL optimization through the `djxl`/`cjxl` pair.
//!
//! The stream is decoded to PNG once, then two candidates run: a lossless
//! re-encode (`-d 0`, the metadata-strip equivalent) and a lossy re-encode
//! at the mapped quality. With the tools absent, the result is the
//! original bytes with `method = "none"`.

use async_trait::async_trait;
use tracing::debug;

use crate::codec;
use crate::config::OptimizationConfig;
use crate::container;
use crate::error::Result;
use crate::format::ImageFormat;
use crate::optimize::{pick_smallest, Optimizer};
use crate::quality;
use crate::result::{finalize, OptimizeResult};
use crate::runner::DEFAULT_TOOL_TIMEOUT;
use crate::tools;

pub struct JxlOptimizer;

#[async_trait]
impl Optimizer for JxlOptimizer {
    async fn optimize(&self, data: &[u8], config: &OptimizationConfig) -> Result<OptimizeResult> {
        if !tools::have("djxl") || !tools::have("cjxl") {
            return Ok(crate::result::unchanged(data, ImageFormat::Jxl));
        }

        let decoded = match codec::decode_jxl_to_png(data, DEFAULT_TOOL_TIMEOUT).await {
            Ok(png) => png,
            Err(_) => return Ok(crate::result::unchanged(data, ImageFormat::Jxl)),
        };

        // djxl surfaces the stream's ICC profile as an iCCP chunk in its
        // PNG output. Strip the intermediate's text chunks but keep iCCP:
        // cjxl reads it from the PNG and embeds the profile in both
        // candidates' output containers.
        let icc = container::png::icc_profile(&decoded);
        let decoded = container::png::filter_chunks(&decoded, &[b"tEXt", b"iTXt", b"zTXt"]);
        debug!(has_icc = icc.is_some(), "jxl intermediate prepared");

        let target = quality::jxl_quality(config.quality);
        let (lossless, lossy) = tokio::join!(
            run_cjxl(&decoded, None, config.strip_metadata),
            run_cjxl(&decoded, Some(target), true),
        );

        let candidates = vec![(lossless, "metadata-strip"), (lossy, "jxl-reencode")];
        match pick_smallest(candidates) {
            Some((bytes, method)) => Ok(finalize(data, bytes, method, ImageFormat::Jxl)),
            None => Ok(crate::result::unchanged(data, ImageFormat::Jxl)),
        }
    }
}

async fn run_cjxl(png: &[u8], target: Option<u8>, enabled: bool) -> Result<Vec<u8>> {
    if !enabled {
        return Err(crate::error::SlimgError::OptimizationFailed {
            tool: "cjxl".to_string(),
            stderr: "strip disabled by config".to_string(),
        });
    }
    codec::encode_png_to_jxl(png, target, DEFAULT_TOOL_TIMEOUT).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bare_codestream_without_tools_is_a_noop() {
        if tools::have("djxl") {
            // Tool present: contract-level assertions only.
            return;
        }
        let data = vec![0xFF, 0x0A, 0x00, 0x13, 0x37];
        let result = JxlOptimizer
            .optimize(&data, &OptimizationConfig::default())
            .await
            .unwrap();
        assert!(result.is_noop());
        assert_eq!(result.optimized_bytes, data);
    }

    #[tokio::test]
    async fn garbage_codestream_never_errors() {
        let data = vec![0xFF, 0x0A, 1, 2, 3, 4, 5];
        let result = JxlOptimizer
            .optimize(&data, &OptimizationConfig::new(40).unwrap())
            .await
            .unwrap();
        assert!(result.optimized_size <= result.original_size);
        assert_eq!(result.format, ImageFormat::Jxl);
    }
}
