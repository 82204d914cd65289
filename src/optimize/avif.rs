//! AVIF optimization: metadata-strip re-pack racing a lossy AV1 re-encode.
//!
//! Decode goes through libheif, encode through rav1e at speed 6. Either
//! candidate may fail (missing AV1 plugin, unsupported color mode); when
//! both do, the original bytes come back with `method = "none"`.

use async_trait::async_trait;

use crate::codec;
use crate::config::OptimizationConfig;
use crate::error::Result;
use crate::format::ImageFormat;
use crate::optimize::{pick_smallest, run_codec, Optimizer};
use crate::quality;
use crate::result::{finalize, OptimizeResult};

pub struct AvifOptimizer;

#[async_trait]
impl Optimizer for AvifOptimizer {
    async fn optimize(&self, data: &[u8], config: &OptimizationConfig) -> Result<OptimizeResult> {
        let strip_task = {
            let data = data.to_vec();
            let enabled = config.strip_metadata;
            run_codec("avif-strip", move || {
                if !enabled {
                    return Err(crate::error::SlimgError::OptimizationFailed {
                        tool: "avif-strip".to_string(),
                        stderr: "strip disabled by config".to_string(),
                    });
                }
                // Near-lossless re-pack drops Exif/XMP boxes on the floor;
                // the ICC profile is the one box carried forward.
                let (img, icc) = codec::decode_heif(&data)?;
                codec::encode_avif(&img, 100, quality::AVIF_SPEED, icc.as_deref())
            })
        };
        let reencode_task = {
            let data = data.to_vec();
            let target = quality::avif_quality(config.quality);
            run_codec("avif-reencode", move || {
                let (img, icc) = codec::decode_heif(&data)?;
                codec::encode_avif(&img, target, quality::AVIF_SPEED, icc.as_deref())
            })
        };

        let (stripped, reencoded) = tokio::join!(strip_task, reencode_task);
        let candidates = vec![
            (stripped, "metadata-strip"),
            (reencoded, "avif-reencode"),
        ];

        match pick_smallest(candidates) {
            Some((bytes, method)) => Ok(finalize(data, bytes, method, ImageFormat::Avif)),
            None => Ok(crate::result::unchanged(data, ImageFormat::Avif)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn undecodable_avif_falls_back_to_original() {
        // A syntactically minimal ftyp box with no image payload: both
        // candidates fail, the contract still holds.
        let mut data = 16u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"ftypavif");
        data.extend_from_slice(&[0, 0, 0, 0]);
        data.extend_from_slice(&[0u8; 16]);

        let result = AvifOptimizer
            .optimize(&data, &OptimizationConfig::default())
            .await
            .unwrap();
        assert!(result.is_noop());
        assert_eq!(result.optimized_bytes, data);
        assert_eq!(result.format, ImageFormat::Avif);
    }
}
