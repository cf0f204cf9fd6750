//! Numeric guards shared by analysis and mapping
//!
//! Audio features arrive from device callbacks, decoders and synthetic
//! generators; any of them can produce NaN or out-of-range values. These
//! helpers substitute safe defaults instead of letting bad values propagate
//! into parameter writes.

/// Clamp to [0, 1]. NaN becomes 0.
pub fn clamp01(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Replace non-finite values with `fallback`.
pub fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Linear interpolation between `min` and `max` with `t` clamped to [0, 1].
///
/// A NaN `t` yields `min`, the lowest permitted value.
pub fn lerp(min: f32, max: f32, t: f32) -> f32 {
    if t.is_nan() {
        return min;
    }
    let t = t.clamp(0.0, 1.0);
    min + (max - min) * t
}

/// Wrap a hue in degrees into [0, 360).
pub fn wrap_hue(value: f32) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    let wrapped = ((value % 360.0) + 360.0) % 360.0;
    // -0.0 and float noise right at the seam
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped.abs()
    }
}

/// Sanitize a frame delta in seconds: negative or non-finite becomes 0.
pub fn sanitize_dt(dt: f64) -> f64 {
    if dt.is_finite() && dt > 0.0 {
        dt
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx(actual: f32, expected: f32, tolerance: f32) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected} +/- {tolerance}, got {actual}"
        );
    }

    #[test]
    fn wrap_hue_handles_negative_and_overflow() {
        assert_approx(wrap_hue(-10.0), 350.0, 1e-4);
        assert_approx(wrap_hue(370.0), 10.0, 1e-4);
        assert_approx(wrap_hue(180.0), 180.0, 1e-4);
        assert_approx(wrap_hue(720.0), 0.0, 1e-4);
        assert_eq!(wrap_hue(f32::NAN), 0.0);
    }

    #[test]
    fn clamp01_rejects_nan() {
        assert_eq!(clamp01(f32::NAN), 0.0);
        assert_eq!(clamp01(-0.5), 0.0);
        assert_eq!(clamp01(1.5), 1.0);
        assert_eq!(clamp01(0.25), 0.25);
    }

    #[test]
    fn lerp_uses_minimum_for_nan() {
        assert_eq!(lerp(10.0, 20.0, f32::NAN), 10.0);
        assert_approx(lerp(10.0, 20.0, 0.5), 15.0, 1e-5);
        assert_eq!(lerp(10.0, 20.0, 3.0), 20.0);
        assert_eq!(lerp(10.0, 20.0, -3.0), 10.0);
    }

    #[test]
    fn sanitize_dt_drops_bad_frames() {
        assert_eq!(sanitize_dt(-0.1), 0.0);
        assert_eq!(sanitize_dt(f64::NAN), 0.0);
        assert_eq!(sanitize_dt(f64::INFINITY), 0.0);
        assert_eq!(sanitize_dt(0.016), 0.016);
    }
}
