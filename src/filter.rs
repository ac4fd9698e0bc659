// Filter Module - one-pole exponential filter cascades forming the three
// color bands (red = highs, green = mids, blue = lows)

use std::f32::consts::TAU;

// One-pole exponential moving average low-pass: y += alpha * (x - y).
// The smoothing coefficient is derived once from the corner frequency and the
// fixed sample interval; the steady-state path is a single multiply-add.
#[derive(Debug, Clone)]
pub struct OnePole {
    alpha: f32,
    state: f32,
}

impl OnePole {
    pub fn new(corner_hz: f32, sample_interval_s: f32) -> Self {
        OnePole {
            alpha: 1.0 - (-sample_interval_s * TAU * corner_hz).exp(),
            state: 0.0,
        }
    }

    /// Like `new` but with the accumulator preset, so slow trackers (DC bias)
    /// start near their expected operating point instead of ramping from zero.
    pub fn with_state(corner_hz: f32, sample_interval_s: f32, state: f32) -> Self {
        let mut lp = OnePole::new(corner_hz, sample_interval_s);
        lp.state = state;
        lp
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        self.state += self.alpha * (x - self.state);
        self.state
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }
}

// A high-pass section is synthesized as "input minus its own low-pass"
#[derive(Debug, Clone)]
pub enum Stage {
    LowPass(OnePole),
    HighPass(OnePole),
}

impl Stage {
    #[inline]
    fn process(&mut self, x: f32) -> f32 {
        match self {
            Stage::LowPass(lp) => lp.process(x),
            Stage::HighPass(lp) => x - lp.process(x),
        }
    }
}

// An ordered cascade of first-order sections. Cascading identical stages
// raises the effective filter order for steeper rejection.
#[derive(Debug, Clone)]
pub struct Chain {
    stages: Vec<Stage>,
}

impl Chain {
    pub fn new(stages: Vec<Stage>) -> Self {
        Chain { stages }
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let mut y = x;
        for stage in &mut self.stages {
            y = stage.process(y);
        }
        y
    }
}

/// Corner frequencies of the three bands. Corners are allowed to overlap so
/// simultaneous energy in two bands produces secondary hues (magenta, cyan,
/// yellow) - that is a feature of the instrument, not a defect.
#[derive(Debug, Clone, Copy)]
pub struct BandCorners {
    pub red_highpass_hz: f32,
    pub green_lowpass_hz: f32,
    pub green_highpass_hz: f32,
    pub blue_lowpass_hz: f32,
    pub blue_highpass_hz: f32,
}

/// Three independent filter chains driven in lock-step, once per sample.
/// State lives for the process lifetime and is never reset, including across
/// ON/OFF cycles and mode switches.
pub struct FilterBank {
    red: Chain,
    green: Chain,
    blue: Chain,
}

impl FilterBank {
    pub fn new(corners: BandCorners, sample_rate_hz: f32) -> Self {
        let dt = 1.0 / sample_rate_hz;

        // Red: third-order high-pass at a single corner
        let red = Chain::new(vec![
            Stage::HighPass(OnePole::new(corners.red_highpass_hz, dt)),
            Stage::HighPass(OnePole::new(corners.red_highpass_hz, dt)),
            Stage::HighPass(OnePole::new(corners.red_highpass_hz, dt)),
        ]);

        // Green: band-pass, third-order low-pass into third-order high-pass
        let green = Chain::new(vec![
            Stage::LowPass(OnePole::new(corners.green_lowpass_hz, dt)),
            Stage::LowPass(OnePole::new(corners.green_lowpass_hz, dt)),
            Stage::LowPass(OnePole::new(corners.green_lowpass_hz, dt)),
            Stage::HighPass(OnePole::new(corners.green_highpass_hz, dt)),
            Stage::HighPass(OnePole::new(corners.green_highpass_hz, dt)),
            Stage::HighPass(OnePole::new(corners.green_highpass_hz, dt)),
        ]);

        // Blue: third-order low-pass plus one rumble-blocking high-pass below it
        let blue = Chain::new(vec![
            Stage::LowPass(OnePole::new(corners.blue_lowpass_hz, dt)),
            Stage::LowPass(OnePole::new(corners.blue_lowpass_hz, dt)),
            Stage::LowPass(OnePole::new(corners.blue_lowpass_hz, dt)),
            Stage::HighPass(OnePole::new(corners.blue_highpass_hz, dt)),
        ]);

        FilterBank { red, green, blue }
    }

    /// Run one sample through all three chains, returning [red, green, blue]
    /// outputs (signed; the caller rectifies).
    #[inline]
    pub fn process(&mut self, x: f32) -> [f32; 3] {
        [
            self.red.process(x),
            self.green.process(x),
            self.blue.process(x),
        ]
    }
}
