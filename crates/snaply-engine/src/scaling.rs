//! Output resolution and bitrate selection.

use snaply_capture::DisplayMetrics;
use snaply_ipc::BitrateProfile;

/// Scale applied when display metrics are unusable.
pub const FALLBACK_SCALE: f64 = 0.5;

/// Encoder target derived from the display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledOutput {
    /// Factor applied to both sides.
    pub scale: f64,

    /// Encoded width (even).
    pub width: u32,

    /// Encoded height (even).
    pub height: u32,

    /// Target bitrate in bits per second.
    pub bitrate: u32,
}

/// Scale factor for a display, chosen by its longer side.
pub fn scale_factor(metrics: &DisplayMetrics) -> f64 {
    if !metrics.is_valid() {
        return FALLBACK_SCALE;
    }
    match metrics.longer_side() {
        side if side > 3600 => 0.25,
        side if side > 2400 => 0.4,
        side if side > 1200 => 0.5,
        _ => 1.0,
    }
}

/// Compute the encoder target for a display.
///
/// Each side is scaled and truncated on its own, then rounded up to an even
/// number.
pub fn scale_for(metrics: &DisplayMetrics, profile: BitrateProfile) -> ScaledOutput {
    let scale = scale_factor(metrics);
    let width = scale_side(metrics.width_px, scale);
    let height = scale_side(metrics.height_px, scale);

    ScaledOutput {
        scale,
        width,
        height,
        bitrate: profile.bitrate_for(width, height),
    }
}

fn scale_side(px: i32, scale: f64) -> u32 {
    let scaled = (px.max(0) as f64 * scale) as u32;
    scaled + scaled % 2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaled(width: i32, height: i32) -> ScaledOutput {
        scale_for(&DisplayMetrics::new(width, height, 420), BitrateProfile::default())
    }

    #[test]
    fn test_small_display_keeps_size() {
        let out = scaled(719, 1200);
        assert_eq!(out.scale, 1.0);
        assert_eq!((out.width, out.height), (720, 1200));
    }

    #[test]
    fn test_tall_display_scaled_by_0_4() {
        let out = scaled(1440, 3200);
        assert_eq!(out.scale, 0.4);
        assert_eq!((out.width, out.height), (576, 1280));
        assert_eq!(out.bitrate, 576 * 1280 * 4);
    }

    #[test]
    fn test_fhd_plus_display_halved() {
        let out = scaled(1080, 2400);
        assert_eq!(out.scale, 0.5);
        assert_eq!((out.width, out.height), (540, 1200));
    }

    #[test]
    fn test_huge_display_quartered() {
        let out = scaled(2160, 3840);
        assert_eq!(out.scale, 0.25);
        assert_eq!((out.width, out.height), (540, 960));
    }

    #[test]
    fn test_invalid_metrics_fall_back_to_half() {
        assert_eq!(scale_factor(&DisplayMetrics::new(0, 2400, 420)), 0.5);
        assert_eq!(scale_factor(&DisplayMetrics::new(-1, -1, 0)), 0.5);
    }

    #[test]
    fn test_fixed_bitrate_profile() {
        let out = scale_for(
            &DisplayMetrics::new(1080, 2400, 420),
            BitrateProfile::Fixed {
                bits_per_second: 2_000_000,
            },
        );
        assert_eq!(out.bitrate, 2_000_000);
    }
}
