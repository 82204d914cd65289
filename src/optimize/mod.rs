//! Per-format optimizers and the dispatch registry.
//!
//! Every optimizer implements the same contract: bytes and a config in,
//! an [`OptimizeResult`] out. Optimizers run their candidate methods
//! concurrently, keep the smallest output, and route it through
//! [`crate::result::finalize`] so the output-never-larger guarantee holds
//! on every path. A single failed candidate is discarded; only when every
//! candidate fails does the result fall back to the original bytes with
//! `method = "none"`.

mod avif;
mod bmp;
mod gif;
mod heic;
mod jpeg;
mod jxl;
mod png;
mod svg;
mod tiff;
mod webp;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::config::OptimizationConfig;
use crate::error::{Result, SlimgError};
use crate::format::{detect_format, ImageFormat, FORMAT_COUNT};
use crate::gate::CompressionGate;
use crate::result::OptimizeResult;

pub use svg::sanitize_svg;

#[async_trait]
pub trait Optimizer: Send + Sync {
    async fn optimize(&self, data: &[u8], config: &OptimizationConfig) -> Result<OptimizeResult>;
}

/// Format-indexed lookup table, built once. APNG shares the PNG optimizer
/// and SVGZ shares the SVG optimizer; both re-derive the subtype from the
/// payload.
static REGISTRY: Lazy<[Box<dyn Optimizer>; FORMAT_COUNT]> = Lazy::new(|| {
    [
        Box::new(png::PngOptimizer),   // Png
        Box::new(png::PngOptimizer),   // Apng
        Box::new(jpeg::JpegOptimizer), // Jpeg
        Box::new(webp::WebpOptimizer), // Webp
        Box::new(gif::GifOptimizer),   // Gif
        Box::new(svg::SvgOptimizer),   // Svg
        Box::new(svg::SvgOptimizer),   // Svgz
        Box::new(avif::AvifOptimizer), // Avif
        Box::new(heic::HeicOptimizer), // Heic
        Box::new(tiff::TiffOptimizer), // Tiff
        Box::new(bmp::BmpOptimizer),   // Bmp
        Box::new(jxl::JxlOptimizer),   // Jxl
    ]
});

pub fn optimizer_for(fmt: ImageFormat) -> &'static dyn Optimizer {
    &*REGISTRY[fmt as usize]
}

/// Detect the format, take a compression-gate slot, and dispatch.
///
/// The permit is released on every exit path, including errors and
/// cancellation, via its drop guard.
pub async fn optimize_image(
    data: &[u8],
    config: &OptimizationConfig,
    gate: &CompressionGate,
) -> Result<OptimizeResult> {
    config.validate()?;
    let fmt = detect_format(data)?;
    let _permit = gate.acquire().await?;
    debug!(format = %fmt, size = data.len(), quality = config.quality, "dispatching optimizer");
    optimizer_for(fmt).optimize(data, config).await
}

/// Gate-free dispatch for callers that carry their own bound (the
/// estimator's sample work is capped at one small decode + encode).
pub(crate) async fn optimize_ungated(
    fmt: ImageFormat,
    data: &[u8],
    config: &OptimizationConfig,
) -> Result<OptimizeResult> {
    optimizer_for(fmt).optimize(data, config).await
}

/// Offload CPU-bound codec work to the blocking pool. A panicking codec
/// (libjpeg-style error handling) surfaces as a failed candidate, not a
/// crashed task tree.
pub(crate) async fn run_codec<T, F>(label: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(move || {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
    })
    .await
    {
        Ok(Ok(result)) => result,
        Ok(Err(_panic)) => Err(SlimgError::OptimizationFailed {
            tool: label.to_string(),
            stderr: "codec panicked".to_string(),
        }),
        Err(join_err) if join_err.is_cancelled() => Err(SlimgError::Cancelled),
        Err(join_err) => Err(SlimgError::OptimizationFailed {
            tool: label.to_string(),
            stderr: join_err.to_string(),
        }),
    }
}

/// Keep the smallest successful candidate.
pub(crate) fn pick_smallest(
    candidates: Vec<(Result<Vec<u8>>, &'static str)>,
) -> Option<(Vec<u8>, &'static str)> {
    let mut best: Option<(Vec<u8>, &'static str)> = None;
    for (candidate, method) in candidates {
        match candidate {
            Ok(bytes) => {
                if best.as_ref().map_or(true, |(b, _)| bytes.len() < b.len()) {
                    best = Some((bytes, method));
                }
            }
            Err(e) => debug!(method, error = %e, "candidate discarded"),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_format() {
        for fmt in [
            ImageFormat::Png,
            ImageFormat::Apng,
            ImageFormat::Jpeg,
            ImageFormat::Webp,
            ImageFormat::Gif,
            ImageFormat::Svg,
            ImageFormat::Svgz,
            ImageFormat::Avif,
            ImageFormat::Heic,
            ImageFormat::Tiff,
            ImageFormat::Bmp,
            ImageFormat::Jxl,
        ] {
            // Indexing must not panic for any tag.
            let _ = optimizer_for(fmt);
        }
    }

    #[test]
    fn pick_smallest_ignores_failures() {
        let best = pick_smallest(vec![
            (Ok(vec![0u8; 50]), "b"),
            (
                Err(SlimgError::OptimizationFailed {
                    tool: "x".into(),
                    stderr: "y".into(),
                }),
                "failed",
            ),
            (Ok(vec![0u8; 20]), "a"),
        ]);
        let (bytes, method) = best.unwrap();
        assert_eq!(bytes.len(), 20);
        assert_eq!(method, "a");
    }

    #[test]
    fn pick_smallest_of_nothing_is_none() {
        assert!(pick_smallest(vec![]).is_none());
    }

    #[tokio::test]
    async fn unsupported_input_is_rejected_before_the_gate() {
        let gate = CompressionGate::new(1, 1);
        let junk: Vec<u8> = (0..64u8).map(|i| i.wrapping_mul(41).wrapping_add(7)).collect();
        let err = optimize_image(&junk, &OptimizationConfig::default(), &gate)
            .await
            .unwrap_err();
        assert!(matches!(err, SlimgError::UnsupportedFormat(_)));
        // The gate was never held.
        assert_eq!(gate.active_jobs(), 0);
        assert_eq!(gate.queued_jobs(), 0);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let gate = CompressionGate::new(1, 1);
        let config = OptimizationConfig {
            quality: 0,
            ..OptimizationConfig::default()
        };
        let err = optimize_image(b"\x89PNG\r\n\x1a\n", &config, &gate)
            .await
            .unwrap_err();
        assert!(matches!(err, SlimgError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn codec_panic_becomes_failed_candidate() {
        let err = run_codec::<Vec<u8>, _>("boom", || panic!("libjpeg fatal"))
            .await
            .unwrap_err();
        assert!(matches!(err, SlimgError::OptimizationFailed { .. }));
    }
}
