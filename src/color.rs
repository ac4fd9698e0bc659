// Color Module - HSB to RGB mapping shared by the effect engine and the
// quiet-color fallback
use crate::types::RgbF;

/// Wrap an arbitrary hue back into [0, 1). The hue axis is cyclic, so values
/// pushed past either boundary by repeated nudging wrap around rather than
/// clamping.
pub fn make_hue_valid(hue: f32) -> f32 {
    let wrapped = hue.rem_euclid(1.0);
    // rem_euclid(1.0) can return 1.0 for tiny negative inputs
    if wrapped >= 1.0 {
        0.0
    } else {
        wrapped
    }
}

// One piecewise-linear ramp: peak 1.0 at `center`, falling linearly to zero
// over one third of the hue cycle on either side.
fn hue_ramp(hue: f32, center: f32) -> f32 {
    let mut d = (hue - center).abs();
    if d > 0.5 {
        d = 1.0 - d;
    }
    (1.0 - d * 3.0).clamp(0.0, 1.0)
}

/// Map (hue, saturation, brightness) to normalized RGB.
///
/// Red peaks at hue 0, green at 1/3, blue at 2/3, each ramp spanning a third
/// of the cycle. Saturation blends linearly toward full white, brightness
/// scales last, and every stage clamps.
pub fn hsb_to_rgb(hue: f32, saturation: f32, brightness: f32) -> RgbF {
    let h = make_hue_valid(hue);
    let s = saturation.clamp(0.0, 1.0);
    let b = brightness.clamp(0.0, 1.0);

    let r = hue_ramp(h, 0.0);
    let g = hue_ramp(h, 1.0 / 3.0);
    let bl = hue_ramp(h, 2.0 / 3.0);

    RgbF::new(
        ((1.0 - s) + s * r) * b,
        ((1.0 - s) + s * g) * b,
        ((1.0 - s) + s * bl) * b,
    )
    .clamped()
}
