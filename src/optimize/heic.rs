//! HEIC optimization: lossless metadata-strip re-pack racing a lossy HEVC
//! re-encode, both through libheif.

use async_trait::async_trait;

use crate::codec;
use crate::config::OptimizationConfig;
use crate::error::Result;
use crate::format::ImageFormat;
use crate::optimize::{pick_smallest, run_codec, Optimizer};
use crate::quality;
use crate::result::{finalize, OptimizeResult};

pub struct HeicOptimizer;

#[async_trait]
impl Optimizer for HeicOptimizer {
    async fn optimize(&self, data: &[u8], config: &OptimizationConfig) -> Result<OptimizeResult> {
        let strip_task = {
            let data = data.to_vec();
            let enabled = config.strip_metadata;
            run_codec("heic-strip", move || {
                if !enabled {
                    return Err(crate::error::SlimgError::OptimizationFailed {
                        tool: "heic-strip".to_string(),
                        stderr: "strip disabled by config".to_string(),
                    });
                }
                let (img, icc) = codec::decode_heif(&data)?;
                codec::encode_heic(&img, None, icc.as_deref())
            })
        };
        let reencode_task = {
            let data = data.to_vec();
            let target = quality::heic_quality(config.quality);
            run_codec("heic-reencode", move || {
                let (img, icc) = codec::decode_heif(&data)?;
                codec::encode_heic(&img, Some(target), icc.as_deref())
            })
        };

        let (stripped, reencoded) = tokio::join!(strip_task, reencode_task);
        let candidates = vec![
            (stripped, "metadata-strip"),
            (reencoded, "heic-reencode"),
        ];

        match pick_smallest(candidates) {
            Some((bytes, method)) => Ok(finalize(data, bytes, method, ImageFormat::Heic)),
            None => Ok(crate::result::unchanged(data, ImageFormat::Heic)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn undecodable_heic_falls_back_to_original() {
        let mut data = 16u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"ftypheic");
        data.extend_from_slice(&[0, 0, 0, 0]);
        data.extend_from_slice(&[0u8; 16]);

        let result = HeicOptimizer
            .optimize(&data, &OptimizationConfig::default())
            .await
            .unwrap();
        assert!(result.is_noop());
        assert_eq!(result.format, ImageFormat::Heic);
    }
}
