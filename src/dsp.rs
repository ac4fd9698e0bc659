// DSP Module - the per-block sample pipeline: bias removal, AGC, windowing,
// filter bank, per-channel peak detection, all inside a fixed per-sample
// timing budget

use std::time::{Duration, Instant};

use crate::agc::Agc;
use crate::filter::{BandCorners, FilterBank, OnePole};

/// Full scale of the raw unsigned sample range (10-bit ADC model).
pub const ADC_FULL_SCALE: f32 = 1024.0;
/// Largest magnitude a de-biased sample can reach.
pub const MAX_SAMPLE_MAGNITUDE: f32 = ADC_FULL_SCALE / 2.0;
/// AGC ceiling: half the maximum representable sample magnitude.
pub const AGC_CEILING: f32 = MAX_SAMPLE_MAGNITUDE / 2.0;

/// One raw scalar reading per call, in [0, ADC_FULL_SCALE). The caller
/// guarantees constant call spacing; `BlockProcessor::run_block` pads its
/// loop to maintain it.
pub trait SampleSource {
    fn next_sample(&mut self) -> f32;
}

// Asymmetric peak-hold: instant rise to a larger magnitude, exponential decay
// toward a smaller one. The decay time constant is independent of the AGC's.
#[derive(Debug, Clone)]
pub struct PeakDetector {
    peak: f32,
    decay_coeff: f32,
}

impl PeakDetector {
    pub fn new(decay_s: f32, sample_interval_s: f32) -> Self {
        PeakDetector {
            peak: 0.0,
            decay_coeff: 1.0 - (-sample_interval_s / decay_s).exp(),
        }
    }

    #[inline]
    pub fn update(&mut self, magnitude: f32) {
        if magnitude > self.peak {
            self.peak = magnitude;
        } else {
            self.peak += self.decay_coeff * (magnitude - self.peak);
        }
    }

    pub fn value(&self) -> f32 {
        self.peak
    }
}

/// Tuning for the whole block pipeline, taken from the config file.
#[derive(Debug, Clone, Copy)]
pub struct DspParams {
    pub sample_rate_hz: f32,
    pub block_size: usize,
    pub corners: BandCorners,
    pub agc_max_boost_db: f32,
    pub agc_recovery_s: f32,
    pub peak_decay_s: f32,
    pub bias_corner_hz: f32,
}

/// Orchestrates one block of N samples. Created once at startup; filter, AGC
/// and peak state persist for the process lifetime (re-entering ColorOrgan
/// mode resumes the chain without any reset).
pub struct BlockProcessor {
    bias: OnePole,
    window: Vec<f32>,
    agc: Agc,
    bank: FilterBank,
    peaks: [PeakDetector; 3],
    sample_interval: Duration,
}

impl BlockProcessor {
    pub fn new(params: DspParams) -> Self {
        let dt = 1.0 / params.sample_rate_hz;
        let n = params.block_size;

        // Hann taper: zero at both block edges, unity at center. Suppresses
        // spectral leakage that would flicker a tone sitting on a filter edge.
        let window: Vec<f32> = (0..n)
            .map(|i| {
                let phase = std::f32::consts::TAU * i as f32 / (n - 1) as f32;
                0.5 * (1.0 - phase.cos())
            })
            .collect();

        let block_period_s = n as f32 * dt;
        let peak = PeakDetector::new(params.peak_decay_s, dt);

        BlockProcessor {
            // Bias tracker starts at mid-scale, the resting point of a
            // single-supply analog front end
            bias: OnePole::with_state(params.bias_corner_hz, dt, ADC_FULL_SCALE / 2.0),
            window,
            agc: Agc::new(
                params.agc_max_boost_db,
                params.agc_recovery_s,
                block_period_s,
                AGC_CEILING,
            ),
            bank: FilterBank::new(params.corners, params.sample_rate_hz),
            peaks: [peak.clone(), peak.clone(), peak],
            sample_interval: Duration::from_secs_f64(dt as f64),
        }
    }

    pub fn block_size(&self) -> usize {
        self.window.len()
    }

    pub fn sample_interval(&self) -> Duration {
        self.sample_interval
    }

    /// The unpaced per-sample path; `position` indexes the window table.
    #[inline]
    pub fn process_sample(&mut self, raw: f32, position: usize) {
        // Slow low-pass on the raw (non-de-biased) value tracks the DC offset
        let bias = self.bias.process(raw);
        let signed = raw - bias;

        let gained = self.agc.apply(signed);
        let windowed = gained * self.window[position];

        let out = self.bank.process(windowed);
        for (det, y) in self.peaks.iter_mut().zip(out.iter()) {
            // Full-wave rectification into the asymmetric hold/decay rule
            det.update(y.abs());
        }
    }

    /// Finish a block: AGC recovers one step. Never called mid-block.
    pub fn end_block(&mut self) {
        self.agc.end_block();
    }

    /// Run one complete block against the source, padding every iteration to
    /// the fixed sample period so the precomputed alphas stay valid. If an
    /// iteration overruns its slot the loop continues immediately; it never
    /// stretches the period on purpose.
    pub fn run_block(&mut self, source: &mut dyn SampleSource) {
        let n = self.window.len();
        let mut deadline = Instant::now();
        for i in 0..n {
            let raw = source.next_sample();
            self.process_sample(raw, i);

            deadline += self.sample_interval;
            while Instant::now() < deadline {
                std::hint::spin_loop();
            }
        }
        self.end_block();
    }

    /// Current smoothed peak magnitude per channel [red, green, blue].
    pub fn peak_values(&self) -> [f32; 3] {
        [
            self.peaks[0].value(),
            self.peaks[1].value(),
            self.peaks[2].value(),
        ]
    }

    pub fn agc_gain(&self) -> f32 {
        self.agc.gain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DspParams {
        DspParams {
            sample_rate_hz: 10_000.0,
            block_size: 128,
            corners: BandCorners {
                red_highpass_hz: 2000.0,
                green_lowpass_hz: 1200.0,
                green_highpass_hz: 400.0,
                blue_lowpass_hz: 250.0,
                blue_highpass_hz: 60.0,
            },
            agc_max_boost_db: 20.0,
            agc_recovery_s: 1.0,
            peak_decay_s: 0.05,
            bias_corner_hz: 0.5,
        }
    }

    struct Tone {
        freq_hz: f32,
        amplitude: f32,
        rate: f32,
        n: u64,
    }

    impl SampleSource for Tone {
        fn next_sample(&mut self) -> f32 {
            let t = self.n as f32 / self.rate;
            self.n += 1;
            ADC_FULL_SCALE / 2.0
                + self.amplitude * (std::f32::consts::TAU * self.freq_hz * t).sin()
        }
    }

    struct Silence;

    impl SampleSource for Silence {
        fn next_sample(&mut self) -> f32 {
            ADC_FULL_SCALE / 2.0
        }
    }

    #[test]
    fn window_is_zero_at_edges_unity_at_center() {
        let proc = BlockProcessor::new(params());
        let w = &proc.window;
        assert!(w[0].abs() < 1e-6);
        assert!(w[w.len() - 1].abs() < 1e-6);
        let center = w[w.len() / 2];
        assert!(center > 0.99 && center <= 1.0 + 1e-6);
    }

    #[test]
    fn peak_detector_rises_instantly_and_decays_exponentially() {
        let mut det = PeakDetector::new(0.05, 1.0 / 10_000.0);
        det.update(0.8);
        assert_eq!(det.value(), 0.8);

        // Decay toward zero input: after one time constant, ~1/e remains
        for _ in 0..500 {
            det.update(0.0);
        }
        let expected = 0.8 * (-1.0f32).exp();
        assert!((det.value() - expected).abs() < 0.02, "value {}", det.value());

        // Any larger magnitude snaps straight up
        det.update(0.9);
        assert_eq!(det.value(), 0.9);
    }

    #[test]
    fn bias_is_removed_from_offset_input() {
        let mut proc = BlockProcessor::new(params());
        // Offset silence well away from mid-scale; all peaks should stay low
        // once the bias tracker converges
        for _ in 0..200 {
            for i in 0..proc.block_size() {
                proc.process_sample(700.0, i);
            }
            proc.end_block();
        }
        let peaks = proc.peak_values();
        assert!(peaks.iter().all(|&p| p < 1.0), "peaks {:?}", peaks);
    }

    #[test]
    fn bass_tone_excites_blue_channel() {
        let mut proc = BlockProcessor::new(params());
        let mut tone = Tone { freq_hz: 120.0, amplitude: 200.0, rate: 10_000.0, n: 0 };
        for _ in 0..40 {
            for i in 0..proc.block_size() {
                proc.process_sample(tone.next_sample(), i);
            }
            proc.end_block();
        }
        let peaks = proc.peak_values();
        assert!(peaks[2] > 3.0 * peaks[0], "peaks {:?}", peaks);
    }

    #[test]
    fn silence_decays_all_peaks() {
        let mut proc = BlockProcessor::new(params());
        let mut tone = Tone { freq_hz: 120.0, amplitude: 200.0, rate: 10_000.0, n: 0 };
        for _ in 0..40 {
            for i in 0..proc.block_size() {
                proc.process_sample(tone.next_sample(), i);
            }
            proc.end_block();
        }
        assert!(proc.peak_values()[2] > 1.0);

        // Peak decay constant (50 ms) against ~12.8 ms blocks: bounded number
        // of blocks to converge
        let mut silence = Silence;
        for _ in 0..100 {
            for i in 0..proc.block_size() {
                proc.process_sample(silence.next_sample(), i);
            }
            proc.end_block();
        }
        let peaks = proc.peak_values();
        assert!(peaks.iter().all(|&p| p < 0.05), "peaks {:?}", peaks);
    }

    #[test]
    fn run_block_paces_to_the_sample_period() {
        let mut p = params();
        p.block_size = 32;
        let mut proc = BlockProcessor::new(p);
        let mut silence = Silence;

        let start = Instant::now();
        proc.run_block(&mut silence);
        let elapsed = start.elapsed();

        let budget = proc.sample_interval() * 32;
        assert!(elapsed >= budget, "ran fast: {:?} < {:?}", elapsed, budget);
    }
}
