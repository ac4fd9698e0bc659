// Brightness Module - converts per-block channel peaks into 8-bit brightness
// via dB scaling against a dynamic-range floor, with quiet-color fallback

use crate::types::Rgb;

/// Maps channel peak magnitudes to the uniform color-organ output triple.
///
/// The dB formula is kept exactly as calibrated:
/// `255 - 255 * (20*log10(v/max)) / (-dynamic_range_db)`. For some gain
/// combinations it is perceptually uneven across channels; the gain constants
/// were tuned against this formula, so it stays.
pub struct BrightnessMapper {
    gains: [f32; 3],
    dynamic_range_db: f32,
    full_scale: f32,
}

// All-equal quantized outputs below this strobe visibly on some LED hardware
// unless nudged off the exact gray axis
const LOW_GRAY_THRESHOLD: u8 = 32;

impl BrightnessMapper {
    /// `full_scale` is the peak magnitude that maps to full brightness
    /// (the AGC ceiling, since gained samples never exceed it).
    pub fn new(gains: [f32; 3], dynamic_range_db: f32, full_scale: f32) -> Self {
        BrightnessMapper {
            gains,
            dynamic_range_db,
            full_scale,
        }
    }

    // One channel: gain, clamp, dB map. None means the peak fell below the
    // dynamic-range floor (silence for this channel, not an error).
    fn channel(&self, peak: f32, gain: f32) -> Option<u8> {
        let v = (peak * gain).clamp(0.0, self.full_scale);
        if v <= 0.0 {
            return None;
        }
        let db = 20.0 * (v / self.full_scale).log10();
        let brightness = 255.0 - 255.0 * db / (-self.dynamic_range_db);
        if brightness < 0.0 {
            None
        } else {
            Some(brightness.min(255.0).round() as u8)
        }
    }

    /// Map the three peak values, substituting the corresponding quiet-color
    /// component for any channel below the floor.
    pub fn map(&self, peaks: [f32; 3], quiet: Rgb) -> Rgb {
        let r = self.channel(peaks[0], self.gains[0]).unwrap_or(quiet.r);
        let g = self.channel(peaks[1], self.gains[1]).unwrap_or(quiet.g);
        let mut b = self.channel(peaks[2], self.gains[2]).unwrap_or(quiet.b);

        // Degenerate-black anti-flicker: equal, nonzero, very dim output gets
        // the blue channel biased up one quantum
        if r == g && g == b && r != 0 && r < LOW_GRAY_THRESHOLD {
            b = b.saturating_add(1);
        }

        Rgb { r, g, b }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_SCALE: f32 = 256.0;
    const RANGE_DB: f32 = 30.0;

    fn mapper() -> BrightnessMapper {
        BrightnessMapper::new([1.0, 1.0, 1.0], RANGE_DB, FULL_SCALE)
    }

    const QUIET: Rgb = Rgb { r: 40, g: 10, b: 120 };

    #[test]
    fn full_scale_peak_maps_to_255() {
        let out = mapper().map([FULL_SCALE, 0.0, 0.0], Rgb::BLACK);
        assert_eq!(out.r, 255);
    }

    #[test]
    fn peak_at_the_floor_maps_to_zero() {
        // v/max = 10^(-RANGE_DB/20) sits exactly at the floor
        let v = FULL_SCALE * 10.0f32.powf(-RANGE_DB / 20.0);
        let out = mapper().map([v * 1.001, 0.0, 0.0], Rgb::BLACK);
        assert!(out.r <= 1, "floor peak gave {}", out.r);
    }

    #[test]
    fn halfway_in_db_maps_to_half_range() {
        // -15 dB out of a 30 dB range: brightness 255 - 255*(15/30) = 127.5
        let v = FULL_SCALE * 10.0f32.powf(-15.0 / 20.0);
        let out = mapper().map([v, 0.0, 0.0], Rgb::BLACK);
        assert!(out.r == 127 || out.r == 128, "got {}", out.r);
    }

    #[test]
    fn below_floor_substitutes_quiet_component() {
        let below = FULL_SCALE * 10.0f32.powf(-(RANGE_DB + 6.0) / 20.0);
        let out = mapper().map([below, below, FULL_SCALE], QUIET);
        assert_eq!(out.r, QUIET.r);
        assert_eq!(out.g, QUIET.g);
        assert_eq!(out.b, 255); // loud channel unaffected
    }

    #[test]
    fn zero_peak_substitutes_quiet_component() {
        let out = mapper().map([0.0, 0.0, 0.0], QUIET);
        assert_eq!(out, Rgb { r: QUIET.r, g: QUIET.g, b: QUIET.b });
    }

    #[test]
    fn output_is_monotonic_in_peak() {
        let m = mapper();
        let mut prev = 0u8;
        let mut v = FULL_SCALE * 10.0f32.powf(-RANGE_DB / 20.0);
        while v <= FULL_SCALE {
            let out = m.map([v, 0.0, 0.0], Rgb::BLACK);
            assert!(out.r >= prev, "not monotonic at peak {}", v);
            prev = out.r;
            v *= 1.05;
        }
        assert_eq!(prev, 255);
    }

    #[test]
    fn channel_gain_scales_before_mapping() {
        let m = BrightnessMapper::new([2.0, 1.0, 1.0], RANGE_DB, FULL_SCALE);
        // Gain of 2 on a half-scale peak reaches full brightness
        let out = m.map([FULL_SCALE / 2.0, 0.0, 0.0], Rgb::BLACK);
        assert_eq!(out.r, 255);
        // Overshoot clamps rather than wrapping
        let out = m.map([FULL_SCALE, 0.0, 0.0], Rgb::BLACK);
        assert_eq!(out.r, 255);
    }

    #[test]
    fn dim_gray_gets_blue_bias() {
        // Quiet color that is an equal dim gray triggers the anti-flicker rule
        let gray = Rgb { r: 8, g: 8, b: 8 };
        let out = mapper().map([0.0, 0.0, 0.0], gray);
        assert_eq!((out.r, out.g, out.b), (8, 8, 9));

        // Black stays black
        let out = mapper().map([0.0, 0.0, 0.0], Rgb::BLACK);
        assert_eq!(out, Rgb::BLACK);

        // Bright gray is left alone
        let bright = Rgb { r: 200, g: 200, b: 200 };
        let out = mapper().map([0.0, 0.0, 0.0], bright);
        assert_eq!(out, bright);
    }
}
