// Modes Module - the top-level state machine driven by remote key events.
// Owns the shared HSB triple, the animation/sparkle settings, and the
// quiet-color snapshot.

use crate::color::{hsb_to_rgb, make_hue_valid};
use crate::types::RgbF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ColorOrgan,
    Rainbow,
    SolidColor,
    RandomColors,
    QuietColor,
}

impl Mode {
    pub fn name(self) -> &'static str {
        match self {
            Mode::ColorOrgan => "Color Organ",
            Mode::Rainbow => "Rainbow",
            Mode::SolidColor => "Solid Color",
            Mode::RandomColors => "Random Colors",
            Mode::QuietColor => "Quiet Color",
        }
    }
}

/// Logical remote function codes. The IR decoder (out of scope) has already
/// collapsed raw pulses into one event per press or held repeat; held repeats
/// arrive as additional events of the same code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKey {
    Power,
    OrganKey,
    RainbowKey,
    SolidKey,
    RandomKey,
    QuietKey,
    HueUp,
    HueDown,
    SatUp,
    SatDown,
    BrightUp,
    BrightDown,
    SparkleToggle,
    SparkleOff,
    Trickle,
}

/// What the caller owes the user after a key: a re-render, and/or the
/// limit-feedback blink (deliberately distinct from normal rendering).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyResponse {
    pub redraw: bool,
    pub limit_blink: bool,
}

/// The quiet-color snapshot: shown in QuietColor mode and substituted by the
/// brightness mapper below the dynamic-range floor. Session-volatile only.
#[derive(Debug, Clone, Copy)]
pub struct QuietColor {
    pub hue: f32,
    pub saturation: f32,
    pub brightness: f32,
    pub rgb: RgbF,
}

impl QuietColor {
    fn snapshot(hue: f32, saturation: f32, brightness: f32) -> Self {
        QuietColor {
            hue,
            saturation,
            brightness,
            rgb: hsb_to_rgb(hue, saturation, brightness),
        }
    }
}

/// Step sizes and limits for the key handlers, from the config file.
#[derive(Debug, Clone, Copy)]
pub struct ModeTuning {
    pub hue_step: f32,
    pub nudge_ratio: f32,
    pub nudge_add: f32,
    pub brightness_floor: f32,
    pub initial_period_ms: u64,
    pub min_period_ms: u64,
    pub initial_sparkle_interval_ms: u64,
    pub min_sparkle_interval_ms: u64,
}

impl Default for ModeTuning {
    fn default() -> Self {
        ModeTuning {
            hue_step: 1.0 / 24.0,
            nudge_ratio: 1.15,
            nudge_add: 0.02,
            brightness_floor: 0.05,
            initial_period_ms: 4000,
            min_period_ms: 125,
            initial_sparkle_interval_ms: 2000,
            min_sparkle_interval_ms: 125,
        }
    }
}

// Near the limit the multiplicative step degenerates; switch to additive
const NUDGE_ADDITIVE_BAND: f32 = 0.85;

/// Explicit mode-context structure - everything the old-school globals would
/// have held, in one place.
pub struct OrganState {
    pub mode: Mode,
    pub powered: bool,
    pub hue: f32,
    pub saturation: f32,
    pub brightness: f32,
    /// Milliseconds between animation advances; 0 = static.
    pub animation_period_ms: u64,
    pub sparkle_enabled: bool,
    pub sparkle_interval_ms: u64,
    pub quiet: QuietColor,
    tuning: ModeTuning,
}

impl OrganState {
    pub fn new(tuning: ModeTuning, quiet_hue: f32, quiet_sat: f32, quiet_brightness: f32) -> Self {
        OrganState {
            mode: Mode::ColorOrgan,
            powered: true,
            hue: 0.0,
            saturation: 1.0,
            brightness: 1.0,
            animation_period_ms: 0,
            sparkle_enabled: false,
            sparkle_interval_ms: tuning.initial_sparkle_interval_ms,
            quiet: QuietColor::snapshot(quiet_hue, quiet_sat, quiet_brightness),
            tuning,
        }
    }

    /// Dispatch one logical key event. Pure over (state, event): all the
    /// caller has to act on comes back in the `KeyResponse`.
    pub fn handle_key(&mut self, key: RemoteKey) -> KeyResponse {
        // OFF suspends everything except the power key itself
        if !self.powered {
            if key == RemoteKey::Power {
                self.powered = true;
                return KeyResponse { redraw: true, limit_blink: false };
            }
            return KeyResponse::default();
        }

        match key {
            RemoteKey::Power => {
                // Everything else is preserved for the next ON
                self.powered = false;
                KeyResponse { redraw: true, limit_blink: false }
            }
            RemoteKey::OrganKey => self.select_mode(Mode::ColorOrgan),
            RemoteKey::RainbowKey => self.select_mode(Mode::Rainbow),
            RemoteKey::SolidKey => self.select_mode(Mode::SolidColor),
            RemoteKey::RandomKey => self.select_mode(Mode::RandomColors),
            RemoteKey::QuietKey => self.select_mode(Mode::QuietColor),
            RemoteKey::HueUp => self.step_hue(1.0),
            RemoteKey::HueDown => self.step_hue(-1.0),
            RemoteKey::SatUp => self.nudge_saturation(true),
            RemoteKey::SatDown => self.nudge_saturation(false),
            RemoteKey::BrightUp => self.nudge_brightness(true),
            RemoteKey::BrightDown => self.nudge_brightness(false),
            RemoteKey::SparkleToggle => self.sparkle_toggle(),
            RemoteKey::SparkleOff => {
                self.sparkle_enabled = false;
                KeyResponse { redraw: true, limit_blink: false }
            }
            RemoteKey::Trickle => {
                // Gentle sparkles: on at the base rate, never faster
                self.sparkle_enabled = true;
                self.sparkle_interval_ms = self.tuning.initial_sparkle_interval_ms;
                KeyResponse { redraw: true, limit_blink: false }
            }
        }
    }

    fn select_mode(&mut self, target: Mode) -> KeyResponse {
        if self.mode != target {
            // First entry: static animation and the mode's HSB defaults.
            // QuietColor instead loads the snapshot so edits start from it.
            self.mode = target;
            self.animation_period_ms = 0;
            match target {
                Mode::QuietColor => {
                    self.hue = self.quiet.hue;
                    self.saturation = self.quiet.saturation;
                    self.brightness = self.quiet.brightness;
                }
                _ => {
                    self.hue = 0.0;
                    self.saturation = 1.0;
                    self.brightness = 1.0;
                }
            }
            return KeyResponse { redraw: true, limit_blink: false };
        }

        // Re-press while already in the mode: animation speed toggle.
        // ColorOrgan follows the audio and QuietColor is static by
        // definition, so neither animates.
        if matches!(target, Mode::ColorOrgan | Mode::QuietColor) {
            return KeyResponse::default();
        }

        if self.animation_period_ms == 0 {
            self.animation_period_ms = self.tuning.initial_period_ms;
            KeyResponse { redraw: true, limit_blink: false }
        } else if self.animation_period_ms / 2 >= self.tuning.min_period_ms {
            self.animation_period_ms /= 2;
            KeyResponse { redraw: true, limit_blink: false }
        } else {
            // At the cap: idempotent, with the feedback blink
            KeyResponse { redraw: false, limit_blink: true }
        }
    }

    fn step_hue(&mut self, direction: f32) -> KeyResponse {
        let mut step = self.tuning.hue_step;
        // Hue changes perceptually fast through the middle third of the
        // cycle; take a third of the step there
        if self.hue >= 1.0 / 3.0 && self.hue < 2.0 / 3.0 {
            step /= 3.0;
        }
        self.hue = make_hue_valid(self.hue + direction * step);
        self.after_color_edit();
        KeyResponse { redraw: true, limit_blink: false }
    }

    // Multiplicative step toward the limit, additive near it
    fn nudge_up(v: f32, ratio: f32, add: f32) -> f32 {
        if v < NUDGE_ADDITIVE_BAND {
            (v * ratio).min(1.0)
        } else {
            (v + add).min(1.0)
        }
    }

    fn nudge_down(v: f32, floor: f32, ratio: f32, add: f32) -> f32 {
        // Additive near both limits; the division alone decays geometrically
        // and would never land on the floor
        if v > NUDGE_ADDITIVE_BAND || v <= floor + add {
            (v - add).max(floor)
        } else {
            (v / ratio).max(floor)
        }
    }

    fn nudge_saturation(&mut self, up: bool) -> KeyResponse {
        let t = self.tuning;
        self.saturation = if up {
            Self::nudge_up(self.saturation, t.nudge_ratio, t.nudge_add)
        } else {
            Self::nudge_down(self.saturation, 0.0, t.nudge_ratio, t.nudge_add)
        };
        self.after_color_edit();
        let at_limit = if up { self.saturation >= 1.0 } else { self.saturation <= 0.0 };
        KeyResponse { redraw: true, limit_blink: at_limit }
    }

    fn nudge_brightness(&mut self, up: bool) -> KeyResponse {
        let t = self.tuning;
        self.brightness = if up {
            Self::nudge_up(self.brightness, t.nudge_ratio, t.nudge_add)
        } else {
            Self::nudge_down(self.brightness, t.brightness_floor, t.nudge_ratio, t.nudge_add)
        };
        self.after_color_edit();
        let at_limit = if up {
            self.brightness >= 1.0
        } else {
            self.brightness <= t.brightness_floor
        };
        KeyResponse { redraw: true, limit_blink: at_limit }
    }

    fn sparkle_toggle(&mut self) -> KeyResponse {
        if !self.sparkle_enabled {
            self.sparkle_enabled = true;
            self.sparkle_interval_ms = self.tuning.initial_sparkle_interval_ms;
            return KeyResponse { redraw: true, limit_blink: false };
        }
        if self.sparkle_interval_ms / 2 >= self.tuning.min_sparkle_interval_ms {
            self.sparkle_interval_ms /= 2;
            KeyResponse { redraw: true, limit_blink: false }
        } else {
            KeyResponse { redraw: false, limit_blink: true }
        }
    }

    // Editing HSB while in QuietColor mode updates the snapshot live
    fn after_color_edit(&mut self) {
        if self.mode == Mode::QuietColor {
            self.quiet = QuietColor::snapshot(self.hue, self.saturation, self.brightness);
        }
    }

    /// The current effect color for the static modes.
    pub fn current_rgb(&self) -> RgbF {
        hsb_to_rgb(self.hue, self.saturation, self.brightness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> OrganState {
        OrganState::new(ModeTuning::default(), 0.08, 1.0, 0.25)
    }

    #[test]
    fn mode_switch_resets_to_static_defaults() {
        let mut s = state();
        s.hue = 0.5;
        s.animation_period_ms = 500;
        let resp = s.handle_key(RemoteKey::SolidKey);
        assert!(resp.redraw);
        assert_eq!(s.mode, Mode::SolidColor);
        assert_eq!(s.animation_period_ms, 0);
        assert_eq!(s.hue, 0.0);
        assert_eq!(s.saturation, 1.0);
        assert_eq!(s.brightness, 1.0);
    }

    #[test]
    fn mode_repress_halves_period_to_floor_then_blinks() {
        let mut s = state();
        s.handle_key(RemoteKey::SolidKey);

        // First re-press starts the animation
        s.handle_key(RemoteKey::SolidKey);
        assert_eq!(s.animation_period_ms, 4000);

        // Halve down to the minimum
        let mut presses = 0;
        while s.animation_period_ms > 125 {
            s.handle_key(RemoteKey::SolidKey);
            presses += 1;
            assert!(presses < 20, "period never reached the floor");
        }
        assert_eq!(s.animation_period_ms, 125);

        // Idempotent at the cap, with the feedback blink
        let resp = s.handle_key(RemoteKey::SolidKey);
        assert_eq!(s.animation_period_ms, 125);
        assert!(resp.limit_blink);
        let resp = s.handle_key(RemoteKey::SolidKey);
        assert_eq!(s.animation_period_ms, 125);
        assert!(resp.limit_blink);
    }

    #[test]
    fn organ_and_quiet_repress_do_not_animate() {
        let mut s = state();
        let resp = s.handle_key(RemoteKey::OrganKey); // already in ColorOrgan
        assert_eq!(resp, KeyResponse::default());
        assert_eq!(s.animation_period_ms, 0);

        s.handle_key(RemoteKey::QuietKey);
        s.handle_key(RemoteKey::QuietKey);
        assert_eq!(s.animation_period_ms, 0);
    }

    #[test]
    fn off_then_on_restores_everything() {
        let mut s = state();
        s.handle_key(RemoteKey::RainbowKey);
        s.handle_key(RemoteKey::RainbowKey); // start animation
        s.handle_key(RemoteKey::HueUp);
        s.handle_key(RemoteKey::SparkleToggle);
        let (mode, hue, sat, bri) = (s.mode, s.hue, s.saturation, s.brightness);
        let (period, sparkle, quiet_hue) =
            (s.animation_period_ms, s.sparkle_enabled, s.quiet.hue);

        s.handle_key(RemoteKey::Power);
        assert!(!s.powered);

        // Everything except power is suspended while off
        let resp = s.handle_key(RemoteKey::SolidKey);
        assert_eq!(resp, KeyResponse::default());
        assert_eq!(s.mode, mode);

        s.handle_key(RemoteKey::Power);
        assert!(s.powered);
        assert_eq!(s.mode, mode);
        assert_eq!(s.hue, hue);
        assert_eq!(s.saturation, sat);
        assert_eq!(s.brightness, bri);
        assert_eq!(s.animation_period_ms, period);
        assert_eq!(s.sparkle_enabled, sparkle);
        assert_eq!(s.quiet.hue, quiet_hue);
    }

    #[test]
    fn hue_steps_shrink_in_the_middle_third() {
        let mut s = state();
        s.handle_key(RemoteKey::SolidKey);

        s.hue = 0.1;
        s.handle_key(RemoteKey::HueUp);
        let outer_step = s.hue - 0.1;

        s.hue = 0.5;
        s.handle_key(RemoteKey::HueUp);
        let inner_step = s.hue - 0.5;

        assert!((outer_step / inner_step - 3.0).abs() < 1e-4);
    }

    #[test]
    fn hue_wraps_at_the_boundary() {
        let mut s = state();
        s.hue = 0.99;
        s.handle_key(RemoteKey::HueUp);
        assert!(s.hue < 0.1, "hue did not wrap: {}", s.hue);

        s.hue = 0.01;
        s.handle_key(RemoteKey::HueDown);
        assert!(s.hue > 0.9, "hue did not wrap down: {}", s.hue);
    }

    #[test]
    fn brightness_nudges_blink_at_the_limits() {
        let mut s = state();

        // Already at full brightness: up presses blink
        let resp = s.handle_key(RemoteKey::BrightUp);
        assert!(resp.limit_blink);
        assert_eq!(s.brightness, 1.0);

        // Walk down to the floor
        let mut presses = 0;
        loop {
            let resp = s.handle_key(RemoteKey::BrightDown);
            presses += 1;
            assert!(presses < 200);
            if resp.limit_blink {
                break;
            }
        }
        assert!((s.brightness - 0.05).abs() < 1e-5);

        // Idempotent at the floor
        let resp = s.handle_key(RemoteKey::BrightDown);
        assert!(resp.limit_blink);
        assert!((s.brightness - 0.05).abs() < 1e-5);
    }

    #[test]
    fn saturation_nudges_blink_at_the_limits() {
        let mut s = state();

        // Already fully saturated: up presses blink
        let resp = s.handle_key(RemoteKey::SatUp);
        assert!(resp.limit_blink);
        assert_eq!(s.saturation, 1.0);

        // Walk down to zero; the floor must actually be reachable
        let mut presses = 0;
        loop {
            let resp = s.handle_key(RemoteKey::SatDown);
            presses += 1;
            assert!(presses < 200, "saturation never reached the limit blink");
            if resp.limit_blink {
                break;
            }
        }
        assert_eq!(s.saturation, 0.0);

        // Idempotent at the floor
        let resp = s.handle_key(RemoteKey::SatDown);
        assert!(resp.limit_blink);
        assert_eq!(s.saturation, 0.0);
    }

    #[test]
    fn nudge_is_multiplicative_then_additive() {
        let mut s = state();
        s.brightness = 0.5;
        s.handle_key(RemoteKey::BrightUp);
        assert!((s.brightness - 0.575).abs() < 1e-4); // 0.5 * 1.15

        s.brightness = 0.9;
        s.handle_key(RemoteKey::BrightUp);
        assert!((s.brightness - 0.92).abs() < 1e-4); // 0.9 + 0.02
    }

    #[test]
    fn quiet_mode_edits_update_the_snapshot_live() {
        let mut s = state();
        let before = s.quiet.hue;

        // Edits outside QuietColor do not touch the snapshot
        s.handle_key(RemoteKey::HueUp);
        assert_eq!(s.quiet.hue, before);

        s.handle_key(RemoteKey::QuietKey);
        assert_eq!(s.hue, before); // snapshot loaded
        s.handle_key(RemoteKey::HueUp);
        assert_ne!(s.quiet.hue, before);
        assert_eq!(s.quiet.hue, s.hue);

        // Derived RGB tracks the snapshot
        let expected = hsb_to_rgb(s.quiet.hue, s.quiet.saturation, s.quiet.brightness);
        assert_eq!(s.quiet.rgb, expected);
    }

    #[test]
    fn sparkle_toggle_then_speedup_then_cap() {
        let mut s = state();
        assert!(!s.sparkle_enabled);

        s.handle_key(RemoteKey::SparkleToggle);
        assert!(s.sparkle_enabled);
        assert_eq!(s.sparkle_interval_ms, 2000);

        s.handle_key(RemoteKey::SparkleToggle);
        assert_eq!(s.sparkle_interval_ms, 1000);

        while s.sparkle_interval_ms > 125 {
            s.handle_key(RemoteKey::SparkleToggle);
        }
        let resp = s.handle_key(RemoteKey::SparkleToggle);
        assert!(resp.limit_blink);
        assert_eq!(s.sparkle_interval_ms, 125);

        s.handle_key(RemoteKey::SparkleOff);
        assert!(!s.sparkle_enabled);
    }

    #[test]
    fn trickle_enables_sparkles_at_the_base_rate() {
        let mut s = state();
        s.handle_key(RemoteKey::Trickle);
        assert!(s.sparkle_enabled);
        assert_eq!(s.sparkle_interval_ms, 2000);

        // Speed up, then trickle drops back to the base rate
        s.handle_key(RemoteKey::SparkleToggle);
        s.handle_key(RemoteKey::SparkleToggle);
        assert_eq!(s.sparkle_interval_ms, 500);
        s.handle_key(RemoteKey::Trickle);
        assert_eq!(s.sparkle_interval_ms, 2000);
    }
}
