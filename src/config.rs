// Config Module - Configuration management and command-line argument parsing
use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::brightness::BrightnessMapper;
use crate::dsp::{DspParams, AGC_CEILING};
use crate::filter::BandCorners;
use crate::modes::ModeTuning;

// Global storage for custom config path
static CUSTOM_CONFIG_PATH: OnceLock<Option<String>> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Three-band color organ for WLED LED strips via DDP protocol",
    long_about = "Splits live audio into bass, midrange and treble bands and drives WLED LED strips\n\
                  with the band levels as blue, green and red brightness. Also provides rainbow,\n\
                  solid color and random color effect modes with a sparkle overlay, all driven\n\
                  from the keyboard like a handheld remote."
)]
pub struct Args {
    /// WLED device address
    #[arg(short, long)]
    pub wled_ip: Option<String>,

    /// Total number of LEDs
    #[arg(short = 'L', long)]
    pub leds: Option<usize>,

    /// Audio input device name (substring match)
    #[arg(short = 'a', long)]
    pub audio_device: Option<String>,

    /// List available audio devices and exit
    #[arg(long)]
    pub list_audio: bool,

    /// Global brightness multiplier (0.0 to 1.0)
    #[arg(short, long)]
    pub brightness: Option<f64>,

    /// Effect mode frame rate (frames per second)
    #[arg(long)]
    pub fps: Option<f64>,

    /// Brightness dynamic range in dB for the color organ mapping
    #[arg(long)]
    pub dynamic_range: Option<f32>,

    /// Sparkle rate in sparkles per minute
    #[arg(long)]
    pub sparkles: Option<f64>,

    /// Config file path or name (e.g., --cfg /full/path or --cfg myconf for ~/.config/rustorgan/myconf.conf)
    #[arg(long)]
    pub cfg: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WledDeviceConfig {
    pub ip: String,
    pub led_offset: usize,
    pub led_count: usize,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganConfig {
    #[serde(skip)]
    pub config_path: Option<PathBuf>,  // Stores the config file path (not serialized)

    pub wled_ip: String,
    pub wled_devices: Vec<WledDeviceConfig>,
    pub total_leds: usize,
    pub global_brightness: f64,
    pub audio_device: String,  // Audio input device name (empty = default input)
    pub sample_rate_hz: f32,
    pub block_size: usize,
    pub red_highpass_hz: f32,  // Treble band high-pass corner
    pub green_lowpass_hz: f32,  // Midrange band low-pass corner
    pub green_highpass_hz: f32,  // Midrange band high-pass corner
    pub blue_lowpass_hz: f32,  // Bass band low-pass corner
    pub blue_highpass_hz: f32,  // Bass band rumble-reject corner
    pub agc_max_boost_db: f32,
    pub agc_recovery_s: f32,
    pub peak_decay_ms: f32,
    pub bias_corner_hz: f32,
    pub dynamic_range_db: f32,
    pub red_gain: f32,
    pub green_gain: f32,
    pub blue_gain: f32,
    pub quiet_hue: f32,  // Quiet color hue (0.0 to 1.0)
    pub quiet_saturation: f32,
    pub quiet_brightness: f32,
    pub effect_fps: f64,
    pub sparkles_per_minute: f64,
    pub hue_step: f32,  // Hue change per remote press (fraction of the cycle)
    pub nudge_ratio: f32,  // Multiplicative saturation/brightness step per press
    pub initial_animation_period_ms: u64,  // Animation period when first enabled
    pub initial_sparkle_interval_ms: u64,  // Sparkle check interval when first enabled
    pub limit_blink_ms: u64,  // Duration of the white blink when a setting hits its limit
}

impl Default for OrganConfig {
    fn default() -> Self {
        OrganConfig {
            config_path: None,
            wled_ip: "led.local".to_string(),
            wled_devices: vec![
                WledDeviceConfig {
                    ip: "led.local".to_string(),
                    led_offset: 0,
                    led_count: 100,
                    enabled: true,
                }
            ],
            total_leds: 100,
            global_brightness: 1.0,  // Default to 100% brightness
            audio_device: "".to_string(),  // Empty = default input device
            sample_rate_hz: 10000.0,
            block_size: 128,
            red_highpass_hz: 2000.0,
            green_lowpass_hz: 1200.0,
            green_highpass_hz: 400.0,
            blue_lowpass_hz: 250.0,
            blue_highpass_hz: 60.0,
            agc_max_boost_db: 20.0,
            agc_recovery_s: 1.0,
            peak_decay_ms: 50.0,
            bias_corner_hz: 0.5,
            dynamic_range_db: 30.0,
            red_gain: 1.0,
            green_gain: 2.0,  // Midrange cascade is narrower, compensate
            blue_gain: 1.0,
            quiet_hue: 0.08,  // Warm amber
            quiet_saturation: 1.0,
            quiet_brightness: 0.25,
            effect_fps: 60.0,
            sparkles_per_minute: 6.0,
            hue_step: 1.0 / 24.0,
            nudge_ratio: 1.15,
            initial_animation_period_ms: 4000,
            initial_sparkle_interval_ms: 2000,
            limit_blink_ms: 120,
        }
    }
}

impl OrganConfig {
    pub fn merge_with_args(&mut self, args: &Args) -> bool {
        // Track if any args were actually provided
        let mut args_provided = false;

        // Only override config values if explicitly specified on command line
        if let Some(ref wled_ip) = args.wled_ip {
            self.wled_ip = wled_ip.clone();
            args_provided = true;
        }

        if let Some(leds) = args.leds {
            self.total_leds = leds;
            args_provided = true;
        }

        if let Some(ref audio_device) = args.audio_device {
            self.audio_device = audio_device.clone();
            args_provided = true;
        }

        if let Some(brightness) = args.brightness {
            self.global_brightness = brightness;
            args_provided = true;
        }

        if let Some(fps) = args.fps {
            self.effect_fps = fps;
            args_provided = true;
        }

        if let Some(dynamic_range) = args.dynamic_range {
            self.dynamic_range_db = dynamic_range;
            args_provided = true;
        }

        if let Some(sparkles) = args.sparkles {
            self.sparkles_per_minute = sparkles;
            args_provided = true;
        }

        args_provided
    }

    /// Set the global config path (called once at startup)
    pub fn set_config_path(cfg: Option<String>) {
        let _ = CUSTOM_CONFIG_PATH.set(cfg);
    }

    /// Get the global config path (if set)
    fn get_config_path_arg() -> Option<&'static str> {
        CUSTOM_CONFIG_PATH.get()
            .and_then(|opt| opt.as_deref())
    }

    pub fn config_path(cfg_arg: Option<&str>) -> Result<PathBuf> {
        // Priority: explicit arg > global > None
        let cfg = cfg_arg.or_else(|| Self::get_config_path_arg());

        if let Some(cfg) = cfg {
            // Check if it's an absolute path
            let path = PathBuf::from(cfg);
            if path.is_absolute() {
                return Ok(path);
            }

            // Check if it contains path separators (relative path)
            if cfg.contains('/') || cfg.contains('\\') {
                return Ok(path);
            }

            // Otherwise treat as config name in config directory
            let home = std::env::var("HOME")?;
            let config_dir = PathBuf::from(home).join(".config").join("rustorgan");
            std::fs::create_dir_all(&config_dir)?;

            // Add .conf extension if not present
            let filename = if cfg.ends_with(".conf") {
                cfg.to_string()
            } else {
                format!("{}.conf", cfg)
            };

            Ok(config_dir.join(filename))
        } else {
            // Default config path
            let home = std::env::var("HOME")?;
            let config_dir = PathBuf::from(home).join(".config").join("rustorgan");
            std::fs::create_dir_all(&config_dir)?;
            Ok(config_dir.join("config.conf"))
        }
    }

    pub fn load_with_path(cfg_arg: Option<&str>) -> Result<Self> {
        let path = Self::config_path(cfg_arg)?;
        let contents = std::fs::read_to_string(&path)?;
        let mut parsed: Self = toml::from_str(&contents)?;
        parsed.config_path = Some(path);
        parsed.sanitize();

        // Auto-migrate: If wled_devices is empty but wled_ip exists, create device[0]
        if parsed.wled_devices.is_empty() && !parsed.wled_ip.is_empty() {
            eprintln!("Migrating wled_ip to multi-device config (device 0)");
            parsed.wled_devices.push(WledDeviceConfig {
                ip: parsed.wled_ip.clone(),
                led_offset: 0,
                led_count: parsed.total_leds,
                enabled: true,
            });
            // Save the migrated config
            let _ = parsed.save();
        }

        // Auto-calculate total_leds from multi-device config if devices exist
        if !parsed.wled_devices.is_empty() {
            // Always use calculated value, update silently in memory only
            parsed.total_leds = parsed.enabled_led_span().unwrap_or(parsed.total_leds);
        }

        Ok(parsed)
    }

    /// Highest LED index any enabled device drives; the unified frame must
    /// cover every device's slice, not just device 0
    fn enabled_led_span(&self) -> Option<usize> {
        self.wled_devices
            .iter()
            .filter(|d| d.enabled)
            .map(|d| d.led_offset + d.led_count)
            .max()
    }

    /// Sanitize config values to handle common formatting issues
    pub fn sanitize(&mut self) {
        // Sanitize string values (trim whitespace)
        self.wled_ip = self.wled_ip.trim().to_string();
        self.audio_device = self.audio_device.trim().to_string();

        // Clamp numeric values to reasonable ranges
        self.total_leds = self.total_leds.max(1).min(100000);
        self.global_brightness = self.global_brightness.max(0.0).min(1.0);
        self.sample_rate_hz = self.sample_rate_hz.max(1000.0).min(48000.0);
        self.block_size = self.block_size.max(16).min(4096);

        // Filter corners must sit below Nyquist
        let nyquist = self.sample_rate_hz / 2.0;
        self.red_highpass_hz = self.red_highpass_hz.max(1.0).min(nyquist);
        self.green_lowpass_hz = self.green_lowpass_hz.max(1.0).min(nyquist);
        self.green_highpass_hz = self.green_highpass_hz.max(1.0).min(nyquist);
        self.blue_lowpass_hz = self.blue_lowpass_hz.max(1.0).min(nyquist);
        self.blue_highpass_hz = self.blue_highpass_hz.max(1.0).min(nyquist);

        self.agc_max_boost_db = self.agc_max_boost_db.max(0.0).min(60.0);
        self.agc_recovery_s = self.agc_recovery_s.max(0.05).min(30.0);
        self.peak_decay_ms = self.peak_decay_ms.max(1.0).min(5000.0);
        self.bias_corner_hz = self.bias_corner_hz.max(0.01).min(50.0);
        self.dynamic_range_db = self.dynamic_range_db.max(5.0).min(96.0);
        self.red_gain = self.red_gain.max(0.0).min(100.0);
        self.green_gain = self.green_gain.max(0.0).min(100.0);
        self.blue_gain = self.blue_gain.max(0.0).min(100.0);
        self.quiet_hue = self.quiet_hue.rem_euclid(1.0);
        self.quiet_saturation = self.quiet_saturation.max(0.0).min(1.0);
        self.quiet_brightness = self.quiet_brightness.max(0.0).min(1.0);
        self.effect_fps = self.effect_fps.max(1.0).min(240.0);
        self.sparkles_per_minute = self.sparkles_per_minute.max(0.0).min(6000.0);
        self.hue_step = self.hue_step.max(1.0 / 360.0).min(0.5);
        self.nudge_ratio = self.nudge_ratio.max(1.01).min(4.0);
        self.initial_animation_period_ms = self.initial_animation_period_ms.max(125).min(60000);
        self.initial_sparkle_interval_ms = self.initial_sparkle_interval_ms.max(125).min(60000);
        self.limit_blink_ms = self.limit_blink_ms.max(20).min(2000);
    }

    /// Assemble the audio processing parameters from this config
    pub fn dsp_params(&self) -> DspParams {
        DspParams {
            sample_rate_hz: self.sample_rate_hz,
            block_size: self.block_size,
            corners: BandCorners {
                red_highpass_hz: self.red_highpass_hz,
                green_lowpass_hz: self.green_lowpass_hz,
                green_highpass_hz: self.green_highpass_hz,
                blue_lowpass_hz: self.blue_lowpass_hz,
                blue_highpass_hz: self.blue_highpass_hz,
            },
            agc_max_boost_db: self.agc_max_boost_db,
            agc_recovery_s: self.agc_recovery_s,
            peak_decay_s: self.peak_decay_ms / 1000.0,
            bias_corner_hz: self.bias_corner_hz,
        }
    }

    /// Key-handler step sizes and timer settings from this config. Limits
    /// that are hardware invariants rather than taste stay at their defaults.
    pub fn mode_tuning(&self) -> ModeTuning {
        ModeTuning {
            hue_step: self.hue_step,
            nudge_ratio: self.nudge_ratio,
            initial_period_ms: self.initial_animation_period_ms,
            initial_sparkle_interval_ms: self.initial_sparkle_interval_ms,
            ..ModeTuning::default()
        }
    }

    pub fn brightness_mapper(&self) -> BrightnessMapper {
        BrightnessMapper::new(
            [self.red_gain, self.green_gain, self.blue_gain],
            self.dynamic_range_db,
            AGC_CEILING,
        )
    }

    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn save(&self) -> Result<()> {
        let path = self.config_path.clone()
            .unwrap_or_else(|| Self::config_path(None).unwrap());

        // Sanitize values before saving
        let mut sanitized = self.clone();
        sanitized.sanitize();

        // Sync: keep wled_ip pointing at device[0] for backwards compat, and
        // total_leds covering the whole enabled span
        if !sanitized.wled_devices.is_empty() {
            sanitized.wled_ip = sanitized.wled_devices[0].ip.clone();
            sanitized.total_leds = sanitized.enabled_led_span().unwrap_or(sanitized.total_leds);
        }

        // Build TOML with comments manually for better documentation
        let mut contents = format!(
            r#"# RustOrgan Configuration File
# Edit this file and restart to change settings

# WLED device IP address or hostname
wled_ip = "{}"

# Total number of LEDs in the strip
total_leds = {}

# Global brightness multiplier (0.0 to 1.0)
# Applies to all RGB values before sending to WLED
# Set WLED's brightness to 255 (100%) and control brightness from here
global_brightness = {}

# Audio input device name (substring match, empty = default input device)
# Example: "BlackHole 2ch" or "MacBook Pro Microphone"
audio_device = "{}"

# Audio processing sample rate in Hz
# Captured audio is decimated down to this rate before filtering
sample_rate_hz = {}

# Samples per analysis block (one LED update per block)
block_size = {}

# Treble band (red channel) high-pass corner in Hz
red_highpass_hz = {}

# Midrange band (green channel) low-pass and high-pass corners in Hz
green_lowpass_hz = {}
green_highpass_hz = {}

# Bass band (blue channel) low-pass corner in Hz, plus a rumble-reject
# high-pass below the musical range
blue_lowpass_hz = {}
blue_highpass_hz = {}

# Automatic gain control: maximum boost in dB and recovery time constant
# in seconds. Gain cuts are instant, recovery is gradual.
agc_max_boost_db = {}
agc_recovery_s = {}

# Band peak decay time constant in milliseconds (attack is instant)
peak_decay_ms = {}

# DC bias tracking filter corner in Hz
bias_corner_hz = {}

# Brightness dynamic range in dB: a band peak this far below full scale
# maps to LED brightness 0
dynamic_range_db = {}

# Per-band gain applied before brightness mapping
red_gain = {}
green_gain = {}
blue_gain = {}

# Quiet color shown by a channel when its band falls below the dynamic
# range floor (hue 0.0-1.0, red=0, green=1/3, blue=2/3)
quiet_hue = {}
quiet_saturation = {}
quiet_brightness = {}

# Frame rate for the effect modes (rainbow, solid, random)
effect_fps = {}

# Sparkle overlay rate in sparkles per minute (at the default interval)
sparkles_per_minute = {}

# Remote step sizes: hue change per press (fraction of the cycle) and the
# multiplicative saturation/brightness step
hue_step = {}
nudge_ratio = {}

# Timer periods in milliseconds when an animation or the sparkle overlay
# is first enabled (re-pressing the key halves them)
initial_animation_period_ms = {}
initial_sparkle_interval_ms = {}

# Duration in milliseconds of the white blink shown when a setting
# reaches its limit
limit_blink_ms = {}
"#,
            sanitized.wled_ip,
            sanitized.total_leds,
            sanitized.global_brightness,
            sanitized.audio_device,
            sanitized.sample_rate_hz,
            sanitized.block_size,
            sanitized.red_highpass_hz,
            sanitized.green_lowpass_hz,
            sanitized.green_highpass_hz,
            sanitized.blue_lowpass_hz,
            sanitized.blue_highpass_hz,
            sanitized.agc_max_boost_db,
            sanitized.agc_recovery_s,
            sanitized.peak_decay_ms,
            sanitized.bias_corner_hz,
            sanitized.dynamic_range_db,
            sanitized.red_gain,
            sanitized.green_gain,
            sanitized.blue_gain,
            sanitized.quiet_hue,
            sanitized.quiet_saturation,
            sanitized.quiet_brightness,
            sanitized.effect_fps,
            sanitized.sparkles_per_minute,
            sanitized.hue_step,
            sanitized.nudge_ratio,
            sanitized.initial_animation_period_ms,
            sanitized.initial_sparkle_interval_ms,
            sanitized.limit_blink_ms,
        );

        // Append wled_devices array if devices are configured
        if !sanitized.wled_devices.is_empty() {
            contents.push_str("\n# Multi-Device Configuration\n");
            contents.push_str("# Configure multiple WLED controllers - each gets a portion of the LED frame\n");
            contents.push_str("# led_offset: Starting LED position in unified frame\n");
            contents.push_str("# led_count: Number of LEDs this device controls\n\n");

            for device in &sanitized.wled_devices {
                contents.push_str("[[wled_devices]]\n");
                contents.push_str(&format!("ip = \"{}\"\n", device.ip));
                contents.push_str(&format!("led_offset = {}\n", device.led_offset));
                contents.push_str(&format!("led_count = {}\n", device.led_count));
                contents.push_str(&format!("enabled = {}\n\n", device.enabled));
            }
        }

        std::fs::write(path, contents)?;
        Ok(())
    }
}
