//! Quality mappings shared by the optimizers and the estimator.
//!
//! The estimator's direct-encode sample paths deliberately reuse these
//! functions so its predictions track the optimizer's actual settings.
//! Keep every encoder-facing quality derivation here.

/// pngquant quality range: floor is 15 below the ceiling, never under 1.
pub fn pngquant_range(quality: u8) -> (u8, u8) {
    (quality.saturating_sub(15).max(1), quality)
}

/// pngquant speed. Aggressive requests run speed 3 rather than 1: the
/// compression regression is under 3% for a 3-5x latency win.
pub fn pngquant_speed(quality: u8) -> u8 {
    if quality < 50 {
        3
    } else {
        4
    }
}

/// oxipng effort preset. Presets 2/3/4 correspond to 8/16/24 filter and
/// compression trials.
pub fn oxipng_preset(quality: u8) -> u8 {
    if quality >= 70 {
        2
    } else if quality >= 50 {
        3
    } else {
        4
    }
}

/// AVIF and HEIC target quality: shifted up by 10 and clipped to [30, 90].
pub fn avif_quality(quality: u8) -> u8 {
    (quality.saturating_add(10)).clamp(30, 90)
}

pub fn heic_quality(quality: u8) -> u8 {
    avif_quality(quality)
}

/// JXL target quality: shifted up by 10 and clipped to [30, 95].
pub fn jxl_quality(quality: u8) -> u8 {
    (quality.saturating_add(10)).clamp(30, 95)
}

pub const AVIF_SPEED: u8 = 6;
pub const WEBP_METHOD: i32 = 4;

/// gifsicle lossiness tier: extra args plus the reported method label.
pub fn gifsicle_tier(quality: u8) -> (&'static [&'static str], &'static str) {
    if quality < 50 {
        (&["--lossy=80", "--colors", "128"], "gifsicle --lossy=80")
    } else if quality < 70 {
        (&["--lossy=30", "--colors", "192"], "gifsicle --lossy=30")
    } else {
        (&[], "gifsicle")
    }
}

/// Whether TIFF gets the JPEG-in-TIFF lossy candidate.
pub fn tiff_use_jpeg(quality: u8) -> bool {
    quality < 70
}

/// Palette size for the PNG direct-encode estimation sample.
pub fn png_sample_colors(quality: u8) -> u32 {
    if quality < 50 {
        64
    } else {
        256
    }
}

/// SVG numeric precision (decimal places) per quality tier; `None` leaves
/// coordinates untouched.
pub fn svg_precision(quality: u8) -> Option<u8> {
    if quality < 50 {
        Some(3)
    } else if quality < 70 {
        Some(5)
    } else {
        None
    }
}
