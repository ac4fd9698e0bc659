// Effects Module - the non-audio animations and the sparkle overlay. All
// effects render into the shared normalized frame buffer; quantization
// happens at the display sink boundary.

use anyhow::Result;
use rand::Rng;
use std::time::{Duration, Instant};

use crate::color::{hsb_to_rgb, make_hue_valid};
use crate::display::DisplaySink;
use crate::types::RgbF;

/// Fill the whole strip with one color.
pub fn render_solid(frame: &mut [RgbF], color: RgbF) {
    frame.fill(color);
}

// Fraction of the strip, centered, that takes the fine hue step
const RAINBOW_FINE_FRACTION: f32 = 1.0 / 3.0;
// Coarse step is this many times the fine step
const RAINBOW_STEP_RATIO: f32 = 3.0;

/// One full hue cycle across the entire strip. The middle fraction of the
/// array advances in fine steps and the rest coarsely, so the perceptually
/// rapid hue region does not dominate the visible gradient. `hue_offset`
/// rotates the whole cycle for animation.
pub fn render_rainbow(frame: &mut [RgbF], hue_offset: f32, saturation: f32, brightness: f32) {
    let n = frame.len();
    if n == 0 {
        return;
    }

    // Normalize so fine + coarse steps sum to exactly one cycle:
    // (1 - fine_frac) * coarse + fine_frac * (coarse / ratio) = 1
    let coarse = 1.0
        / (n as f32 * ((1.0 - RAINBOW_FINE_FRACTION) + RAINBOW_FINE_FRACTION / RAINBOW_STEP_RATIO));
    let fine = coarse / RAINBOW_STEP_RATIO;

    let fine_start = ((1.0 - RAINBOW_FINE_FRACTION) / 2.0 * n as f32) as usize;
    let fine_end = n - fine_start;

    let mut hue = make_hue_valid(hue_offset);
    for (i, px) in frame.iter_mut().enumerate() {
        *px = hsb_to_rgb(hue, saturation, brightness);
        let step = if i >= fine_start && i < fine_end { fine } else { coarse };
        hue = make_hue_valid(hue + step);
    }
}

/// Independently re-roll a uniform hue per LED.
pub fn render_random<R: Rng>(frame: &mut [RgbF], rng: &mut R, saturation: f32, brightness: f32) {
    for px in frame.iter_mut() {
        *px = hsb_to_rgb(rng.gen::<f32>(), saturation, brightness);
    }
}

/// Independent fast timer that probabilistically flashes single LEDs full
/// white: display, restore, display again - a brief flash on top of whatever
/// the active effect rendered. Composable with any non-color-organ mode.
pub struct SparkleOverlay {
    probability: f64,
    last_check: Instant,
}

impl SparkleOverlay {
    /// `sparkles_per_minute` is calibrated against `base_interval_ms`; the
    /// state machine halves the live interval to speed sparkles up.
    pub fn new(sparkles_per_minute: f64, base_interval_ms: u64) -> Self {
        SparkleOverlay {
            probability: (sparkles_per_minute / 60.0 * base_interval_ms as f64 / 1000.0)
                .clamp(0.0, 1.0),
            last_check: Instant::now(),
        }
    }

    /// Check the timer; on an elapsed interval roll the dice and maybe flash.
    pub fn tick<R: Rng>(
        &mut self,
        interval_ms: u64,
        frame: &mut [u8],
        sink: &mut dyn DisplaySink,
        rng: &mut R,
    ) -> Result<()> {
        if self.last_check.elapsed() < Duration::from_millis(interval_ms) {
            return Ok(());
        }
        self.last_check = Instant::now();

        if !rng.gen_bool(self.probability) {
            return Ok(());
        }

        let led = rng.gen_range(0..frame.len() / 3);
        flash_led(led, frame, sink)
    }
}

/// Drive one LED full white for exactly one display latency, then put its
/// prior value back.
pub fn flash_led(led: usize, frame: &mut [u8], sink: &mut dyn DisplaySink) -> Result<()> {
    let o = led * 3;
    let saved = [frame[o], frame[o + 1], frame[o + 2]];

    frame[o] = 255;
    frame[o + 1] = 255;
    frame[o + 2] = 255;
    sink.display(frame)?;

    frame[o] = saved[0];
    frame[o + 1] = saved[1];
    frame[o + 2] = saved[2];
    sink.display(frame)
}
