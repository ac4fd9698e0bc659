// Shared types module - color types and frame buffer helpers

// Mode exit reason - whether the outer loop should quit or restart
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunExit {
    UserQuit,
    Restart,
}

// 8-bit RGB, the on-the-wire representation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };
}

// Normalized RGB in [0.0, 1.0] - all internal rendering happens in this range,
// quantized to 8 bits only at the point of transfer to the display sink
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RgbF {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl RgbF {
    pub const BLACK: RgbF = RgbF { r: 0.0, g: 0.0, b: 0.0 };

    pub fn new(r: f32, g: f32, b: f32) -> Self {
        RgbF { r, g, b }
    }

    // Clamp every component into [0,1] - nothing overflowed or negative ever
    // reaches the wire
    pub fn clamped(self) -> Self {
        RgbF {
            r: self.r.clamp(0.0, 1.0),
            g: self.g.clamp(0.0, 1.0),
            b: self.b.clamp(0.0, 1.0),
        }
    }

    pub fn quantize(self) -> Rgb {
        let c = self.clamped();
        Rgb {
            r: (c.r * 255.0).round() as u8,
            g: (c.g * 255.0).round() as u8,
            b: (c.b * 255.0).round() as u8,
        }
    }
}

/// Quantize a normalized frame into the flat 8-bit RGB layout the sinks expect.
pub fn quantize_frame(frame: &[RgbF], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(frame.len() * 3);
    for px in frame {
        let q = px.quantize();
        out.push(q.r);
        out.push(q.g);
        out.push(q.b);
    }
}

/// Fill a flat 8-bit frame with a single color (the color organ output is
/// uniform across the whole string array).
pub fn fill_frame(out: &mut [u8], color: Rgb) {
    for px in out.chunks_exact_mut(3) {
        px[0] = color.r;
        px[1] = color.g;
        px[2] = color.b;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_clamps_out_of_range() {
        let q = RgbF::new(1.5, -0.25, 0.5).quantize();
        assert_eq!(q, Rgb { r: 255, g: 0, b: 128 });
    }

    #[test]
    fn frame_quantization_layout() {
        let frame = vec![RgbF::new(1.0, 0.0, 0.0), RgbF::new(0.0, 0.0, 1.0)];
        let mut out = Vec::new();
        quantize_frame(&frame, &mut out);
        assert_eq!(out, vec![255, 0, 0, 0, 0, 255]);
    }
}
