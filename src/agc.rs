// AGC Module - adaptive input gain with instant downward correction and slow
// exponential recovery

/// Automatic gain control. Gain starts at unity and is cut immediately,
/// within the same sample, whenever `gain * block_peak` would exceed the
/// ceiling - clipping distortion is worse than a momentary gain drop. Upward
/// recovery happens only across block boundaries, with a time constant slow
/// enough (~1 s) that gain does not pump on normal music dynamics.
pub struct Agc {
    gain: f32,
    max_gain: f32,
    recovery_coeff: f32,
    block_peak: f32,
    ceiling: f32,
}

impl Agc {
    /// `max_boost_db` is the configured maximum boost; `recovery_s` the
    /// recovery time constant; `block_period_s` the block/display update
    /// period the recovery coefficient is derived against; `ceiling` the
    /// largest post-gain magnitude allowed.
    pub fn new(max_boost_db: f32, recovery_s: f32, block_period_s: f32, ceiling: f32) -> Self {
        Agc {
            gain: 1.0,
            max_gain: 10.0f32.powf(max_boost_db / 20.0),
            recovery_coeff: 1.0 - (-block_period_s / recovery_s).exp(),
            block_peak: 0.0,
            ceiling,
        }
    }

    /// Track the de-biased sample's magnitude, correct gain downward if
    /// needed, and return the gained sample. Gain never rises here.
    #[inline]
    pub fn apply(&mut self, sample: f32) -> f32 {
        let mag = sample.abs();
        if mag > self.block_peak {
            self.block_peak = mag;
        }
        if self.gain * self.block_peak > self.ceiling {
            // Exact value that pins the product at the ceiling
            self.gain = self.ceiling / self.block_peak;
        }
        sample * self.gain
    }

    /// One exponential recovery step toward the maximum boost. Called once
    /// per completed block, never mid-block.
    pub fn end_block(&mut self) {
        self.block_peak = 0.0;
        if self.gain < self.max_gain {
            self.gain += self.recovery_coeff * (self.max_gain - self.gain);
            if self.gain > self.max_gain {
                self.gain = self.max_gain;
            }
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn max_gain(&self) -> f32 {
        self.max_gain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CEILING: f32 = 256.0;

    fn agc() -> Agc {
        Agc::new(20.0, 1.0, 0.0128, CEILING)
    }

    #[test]
    fn max_gain_from_db() {
        assert!((agc().max_gain() - 10.0).abs() < 1e-4);
        assert!((Agc::new(6.0, 1.0, 0.0128, CEILING).max_gain() - 1.9953).abs() < 1e-3);
    }

    #[test]
    fn product_never_exceeds_ceiling_within_a_sample() {
        let mut agc = agc();
        // Let gain recover upward first
        for _ in 0..200 {
            agc.end_block();
        }
        assert!(agc.gain() > 9.0);

        // A loud sample must be caught in the same call
        let out = agc.apply(500.0);
        assert!(out.abs() <= CEILING + 1e-3, "clipped output {}", out);
        assert!((agc.gain() * 500.0 - CEILING).abs() < 1e-2);
    }

    #[test]
    fn gain_never_rises_within_a_block() {
        let mut agc = agc();
        agc.apply(400.0); // forces a cut below unity
        let cut = agc.gain();
        assert!(cut < 1.0);

        // Quieter samples in the same block must not restore the gain
        for _ in 0..100 {
            agc.apply(1.0);
        }
        assert_eq!(agc.gain(), cut);
    }

    #[test]
    fn recovery_is_gradual_and_monotonic() {
        let mut agc = agc();
        agc.apply(2000.0);
        let mut prev = agc.gain();
        for _ in 0..50 {
            agc.end_block();
            let g = agc.gain();
            assert!(g >= prev, "gain decreased during recovery");
            assert!(g <= agc.max_gain() + 1e-6);
            prev = g;
        }
        // One block at a 1 s time constant cannot jump straight to max
        let mut fresh = Agc::new(20.0, 1.0, 0.0128, CEILING);
        fresh.apply(2000.0);
        let before = fresh.gain();
        fresh.end_block();
        assert!(fresh.gain() < before + 0.5 * (fresh.max_gain() - before));
    }

    #[test]
    fn recovery_converges_to_max_boost() {
        let mut agc = agc();
        agc.apply(3000.0);
        for _ in 0..2000 {
            agc.end_block();
        }
        assert!((agc.gain() - agc.max_gain()).abs() < 1e-3);
    }
}
