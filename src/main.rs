// RustOrgan - three-band audio color organ for WLED LED strips via DDP
use anyhow::Result;
use clap::Parser;
use crossterm::event::{poll, read, Event, KeyCode, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Terminal;
use std::io::{self, Stdout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

mod agc;
mod audio;
mod brightness;
mod color;
mod config;
mod display;
mod dsp;
mod effects;
mod filter;
mod modes;
mod types;

use audio::CpalSource;
use config::{Args, OrganConfig};
use display::{DdpSink, DisplaySink};
use dsp::{BlockProcessor, AGC_CEILING};
use effects::{render_rainbow, render_random, render_solid, SparkleOverlay};
use modes::{Mode, OrganState, RemoteKey};
use types::{fill_frame, quantize_frame, Rgb, RgbF, RunExit};

type Tui = Terminal<CrosstermBackend<Stdout>>;

/// Map a keyboard event to a logical remote function
fn key_to_remote(code: KeyCode) -> Option<RemoteKey> {
    match code {
        KeyCode::Char('p') | KeyCode::Char('P') => Some(RemoteKey::Power),
        KeyCode::Char('1') => Some(RemoteKey::OrganKey),
        KeyCode::Char('2') => Some(RemoteKey::RainbowKey),
        KeyCode::Char('3') => Some(RemoteKey::SolidKey),
        KeyCode::Char('4') => Some(RemoteKey::RandomKey),
        KeyCode::Char('5') => Some(RemoteKey::QuietKey),
        KeyCode::Right => Some(RemoteKey::HueUp),
        KeyCode::Left => Some(RemoteKey::HueDown),
        KeyCode::Char(']') => Some(RemoteKey::SatUp),
        KeyCode::Char('[') => Some(RemoteKey::SatDown),
        KeyCode::Up => Some(RemoteKey::BrightUp),
        KeyCode::Down => Some(RemoteKey::BrightDown),
        KeyCode::Char('s') => Some(RemoteKey::SparkleToggle),
        KeyCode::Char('S') => Some(RemoteKey::SparkleOff),
        KeyCode::Char('t') | KeyCode::Char('T') => Some(RemoteKey::Trickle),
        _ => None,
    }
}

fn setup_terminal() -> Result<Tui> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    terminal.hide_cursor()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Tui) -> Result<()> {
    terminal.show_cursor()?;
    disable_raw_mode()?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    Ok(())
}

/// Whole-strip white flash confirming that a setting has hit its limit.
/// The next render pass puts the real frame back.
fn limit_blink(sink: &mut dyn DisplaySink, total_leds: usize, blink_ms: u64) -> Result<()> {
    let mut blink = vec![0u8; total_leds * 3];
    fill_frame(&mut blink, Rgb { r: 255, g: 255, b: 255 });
    sink.display(&blink)?;
    thread::sleep(Duration::from_millis(blink_ms));
    Ok(())
}

fn draw_status(
    terminal: &mut Tui,
    config: &OrganConfig,
    state: &OrganState,
    peaks: [f32; 3],
    agc_gain: f32,
) -> Result<()> {
    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),  // Header
                Constraint::Min(6),     // Main content
                Constraint::Length(3),  // Footer
            ])
            .split(f.size());

        let power = if state.powered { "ON" } else { "OFF" };
        let sparkle = if state.sparkle_enabled {
            format!("sparkle {}ms", state.sparkle_interval_ms)
        } else {
            "sparkle off".to_string()
        };
        let header_text = format!(
            "🎹 RustOrgan | Mode: {} | Power: {} | {}",
            state.mode.name(),
            power,
            sparkle
        );
        let header = Paragraph::new(header_text)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(header, chunks[0]);

        let mut lines: Vec<Line> = Vec::new();
        if state.mode == Mode::ColorOrgan {
            let names = ["Red  (treble)", "Green (mid)  ", "Blue (bass)  "];
            let colors = [Color::Red, Color::Green, Color::Blue];
            for i in 0..3 {
                let level = (peaks[i] / AGC_CEILING).clamp(0.0, 1.0);
                let filled = (level * 40.0).round() as usize;
                let bar = format!("{}{}", "█".repeat(filled), "░".repeat(40 - filled));
                lines.push(Line::from(vec![
                    Span::raw(format!("{} ", names[i])),
                    Span::styled(bar, Style::default().fg(colors[i])),
                    Span::raw(format!(" {:5.0}", peaks[i])),
                ]));
            }
            lines.push(Line::from(format!("AGC gain: {:.2}x", agc_gain)));
        } else {
            lines.push(Line::from(format!(
                "Hue: {:.3}  Saturation: {:.2}  Brightness: {:.2}",
                state.hue, state.saturation, state.brightness
            )));
            let anim = if state.animation_period_ms == 0 {
                "static".to_string()
            } else {
                format!("{}ms/step", state.animation_period_ms)
            };
            lines.push(Line::from(format!("Animation: {}", anim)));
        }
        lines.push(Line::from(format!(
            "Quiet color: hue {:.3} sat {:.2} bri {:.2}",
            state.quiet.hue, state.quiet.saturation, state.quiet.brightness
        )));
        let body = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("Status"));
        f.render_widget(body, chunks[1]);

        let footer_text = format!(
            "WLED: {} | LEDs: {} | p power, 1-5 modes, ←/→ hue, ↑/↓ brightness, [/] saturation, s sparkle, S sparkle off, t trickle, r reconnect, q quit",
            config.wled_ip, config.total_leds
        );
        let footer = Paragraph::new(footer_text)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(footer, chunks[2]);
    })?;
    Ok(())
}

/// One full session against a live WLED connection. Returns whether the user
/// quit or asked for a reconnect.
fn run_organ(config: &OrganConfig, shutdown: Arc<AtomicBool>) -> Result<RunExit> {
    let mut sink = DdpSink::new(&config.wled_devices, config.global_brightness)?;
    log::info!("Connected to {} WLED device(s)", sink.device_count());

    let mut source = CpalSource::new(&config.audio_device, config.sample_rate_hz)?;
    // Whole-sample decimation lands near the configured rate, not on it;
    // the filter alphas must match the real sample spacing
    let mut dsp_params = config.dsp_params();
    dsp_params.sample_rate_hz = source.effective_rate_hz();
    let mut processor = BlockProcessor::new(dsp_params);
    let mapper = config.brightness_mapper();

    let tuning = config.mode_tuning();
    let mut state = OrganState::new(
        tuning,
        config.quiet_hue,
        config.quiet_saturation,
        config.quiet_brightness,
    );
    let mut sparkle = SparkleOverlay::new(
        config.sparkles_per_minute,
        tuning.initial_sparkle_interval_ms,
    );
    let mut rng = rand::thread_rng();

    let total_leds = config.total_leds;
    let mut frame: Vec<RgbF> = vec![RgbF::BLACK; total_leds];
    let mut bytes: Vec<u8> = vec![0u8; total_leds * 3];

    let frame_duration = Duration::from_secs_f64(1.0 / config.effect_fps);
    let mut prev_mode = state.mode;
    let mut was_powered = true;
    let mut anim_offset: f32 = 0.0;
    let mut anim_last = Instant::now();
    let mut effect_dirty = true;
    let mut last_peaks = [0.0f32; 3];
    let mut last_tui = Instant::now() - Duration::from_secs(1);

    let mut terminal = setup_terminal()?;

    loop {
        let loop_start = Instant::now();

        if shutdown.load(Ordering::SeqCst) {
            restore_terminal(&mut terminal)?;
            return Ok(RunExit::UserQuit);
        }

        // Brief poll timeout so the block loop keeps its pacing
        if poll(Duration::from_millis(2))? {
            if let Event::Key(key) = read()? {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Char('Q') => {
                        restore_terminal(&mut terminal)?;
                        return Ok(RunExit::UserQuit);
                    }
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        restore_terminal(&mut terminal)?;
                        return Ok(RunExit::UserQuit);
                    }
                    KeyCode::Char('r') | KeyCode::Char('R') => {
                        restore_terminal(&mut terminal)?;
                        return Ok(RunExit::Restart);
                    }
                    code => {
                        if let Some(remote) = key_to_remote(code) {
                            let resp = state.handle_key(remote);
                            if resp.limit_blink && state.powered {
                                limit_blink(&mut sink, total_leds, config.limit_blink_ms)?;
                            }
                            if resp.redraw {
                                effect_dirty = true;
                            }
                        }
                    }
                }
            }
        }

        if state.mode != prev_mode {
            prev_mode = state.mode;
            anim_offset = 0.0;
            anim_last = Instant::now();
            effect_dirty = true;
        }

        // OFF: idle with a black frame until the power key. The frame goes
        // out every iteration or WLED's DDP timeout would resume its local
        // effect; the sink throttles the repeats to the keepalive rate.
        if !state.powered {
            if was_powered {
                fill_frame(&mut bytes, Rgb::BLACK);
                was_powered = false;
            }
            sink.display(&bytes)?;
            thread::sleep(Duration::from_millis(50));
            if last_tui.elapsed() >= Duration::from_millis(250) {
                draw_status(&mut terminal, config, &state, last_peaks, processor.agc_gain())?;
                last_tui = Instant::now();
            }
            continue;
        }
        if !was_powered {
            was_powered = true;
            effect_dirty = true;
        }

        if state.mode == Mode::ColorOrgan {
            // The block loop paces this branch to real time on its own
            processor.run_block(&mut source);
            last_peaks = processor.peak_values();
            let rgb = mapper.map(last_peaks, state.quiet.rgb.quantize());
            fill_frame(&mut bytes, rgb);
            sink.display(&bytes)?;
        } else {
            // Animation advances on its own timer, independent of frame rate
            if state.animation_period_ms > 0
                && anim_last.elapsed() >= Duration::from_millis(state.animation_period_ms)
            {
                anim_last = Instant::now();
                anim_offset += tuning.hue_step / 3.0;
                // RandomColors re-rolls on the dirty flag, the others rotate
                effect_dirty = true;
            }

            if effect_dirty {
                match state.mode {
                    Mode::Rainbow => {
                        render_rainbow(
                            &mut frame,
                            state.hue + anim_offset,
                            state.saturation,
                            state.brightness,
                        );
                    }
                    Mode::SolidColor => {
                        let color = color::hsb_to_rgb(
                            color::make_hue_valid(state.hue + anim_offset),
                            state.saturation,
                            state.brightness,
                        );
                        render_solid(&mut frame, color);
                    }
                    Mode::RandomColors => {
                        render_random(&mut frame, &mut rng, state.saturation, state.brightness);
                    }
                    Mode::QuietColor => {
                        render_solid(&mut frame, state.quiet.rgb);
                    }
                    Mode::ColorOrgan => unreachable!(),
                }
                quantize_frame(&frame, &mut bytes);
                effect_dirty = false;
            }

            sink.display(&bytes)?;

            if state.sparkle_enabled {
                sparkle.tick(state.sparkle_interval_ms, &mut bytes, &mut sink, &mut rng)?;
            }

            // Frame rate limiting
            let elapsed = loop_start.elapsed();
            if elapsed < frame_duration {
                thread::sleep(frame_duration - elapsed);
            }
        }

        if last_tui.elapsed() >= Duration::from_millis(250) {
            draw_status(&mut terminal, config, &state, last_peaks, processor.agc_gain())?;
            last_tui = Instant::now();
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    // Set global config path immediately (before any config loads)
    OrganConfig::set_config_path(args.cfg.clone());

    if args.list_audio {
        let device_list = audio::list_audio_devices()?;
        println!("Available audio devices:");
        for (i, (name, _is_output)) in device_list.iter().enumerate() {
            println!("  {}. {}", i + 1, name);
        }
        return Ok(());
    }

    // Load existing config or create default, then merge with command line args
    let cfg_arg = args.cfg.as_deref();
    let config_path = OrganConfig::config_path(cfg_arg)?;
    let config_file_exists = config_path.exists();

    let mut config = if config_file_exists {
        match OrganConfig::load_with_path(cfg_arg) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("\n❌ Failed to load config file: {}", e);
                eprintln!("Config file: {}", config_path.display());
                eprintln!("\nPlease fix the config file or delete it to regenerate with defaults.");
                return Err(e);
            }
        }
    } else {
        let mut default_config = OrganConfig::default();
        default_config.config_path = Some(config_path.clone());
        default_config
    };

    let args_provided = config.merge_with_args(&args);

    // Save config ONLY if:
    // - Config file doesn't exist (first run - need to create it)
    // - Command-line args were provided (persist the user's CLI choices)
    if !config_file_exists || args_provided {
        config.save()?;
    }

    println!("Using config file: {}", config.config_path.as_ref().unwrap().display());
    println!("✓ WLED: {} ({} LEDs)", config.wled_ip, config.total_leds);
    println!(
        "✓ Audio: {} @ {} Hz, {} sample blocks",
        if config.audio_device.is_empty() { "default input" } else { &config.audio_device },
        config.sample_rate_hz,
        config.block_size
    );
    println!(
        "✓ Bands: blue ≤{} Hz, green {}-{} Hz, red ≥{} Hz",
        config.blue_lowpass_hz, config.green_highpass_hz, config.green_lowpass_hz,
        config.red_highpass_hz
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_handler.store(true, Ordering::SeqCst);
    })?;

    loop {
        match run_organ(&config, shutdown.clone()) {
            Ok(RunExit::UserQuit) => {
                println!("\n👋 Color organ stopped.\n");
                return Ok(());
            }
            Ok(RunExit::Restart) => {
                println!("\n🔄 Reconnecting...");
            }
            Err(e) => {
                eprintln!("\n❌ Color organ error: {}", e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brightness::BrightnessMapper;
    use crate::display::CaptureSink;
    use crate::dsp::{DspParams, SampleSource, ADC_FULL_SCALE};
    use crate::filter::BandCorners;

    /// Fixed-frequency tone centered at mid-scale, like a biased ADC would
    /// capture from a line input.
    struct ToneSource {
        freq_hz: f32,
        sample_rate_hz: f32,
        amplitude: f32,
        n: u64,
    }

    impl SampleSource for ToneSource {
        fn next_sample(&mut self) -> f32 {
            let t = self.n as f32 / self.sample_rate_hz;
            self.n += 1;
            ADC_FULL_SCALE / 2.0
                + self.amplitude * (2.0 * std::f32::consts::PI * self.freq_hz * t).sin()
        }
    }

    fn test_params() -> DspParams {
        DspParams {
            sample_rate_hz: 10000.0,
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

    // Feed blocks without the real-time pacing of run_block
    fn feed_blocks(processor: &mut BlockProcessor, source: &mut dyn SampleSource, blocks: usize) {
        let n = processor.block_size();
        for _ in 0..blocks {
            for i in 0..n {
                let raw = source.next_sample();
                processor.process_sample(raw, i);
            }
            processor.end_block();
        }
    }

    #[test]
    fn bass_tone_lights_a_blue_dominated_frame() {
        let mut processor = BlockProcessor::new(test_params());
        let mut source = ToneSource {
            freq_hz: 100.0,
            sample_rate_hz: 10000.0,
            amplitude: 400.0,
            n: 0,
        };
        feed_blocks(&mut processor, &mut source, 80);

        let mapper = BrightnessMapper::new([1.0, 1.0, 1.0], 30.0, AGC_CEILING);
        let quiet = Rgb { r: 10, g: 4, b: 0 };
        let rgb = mapper.map(processor.peak_values(), quiet);

        assert!(rgb.b > 100, "bass tone should drive blue hard, got {:?}", rgb);
        assert!(rgb.b > rgb.r, "blue should dominate red, got {:?}", rgb);
        assert!(rgb.b > rgb.g, "blue should dominate green, got {:?}", rgb);
    }

    #[test]
    fn whole_chain_produces_a_uniform_frame() {
        let mut processor = BlockProcessor::new(test_params());
        let mut source = ToneSource {
            freq_hz: 3000.0,
            sample_rate_hz: 10000.0,
            amplitude: 300.0,
            n: 0,
        };
        feed_blocks(&mut processor, &mut source, 80);

        let mapper = BrightnessMapper::new([1.0, 1.0, 1.0], 30.0, AGC_CEILING);
        let quiet = Rgb { r: 10, g: 4, b: 0 };
        let rgb = mapper.map(processor.peak_values(), quiet);

        let mut sink = CaptureSink::new();
        let mut bytes = vec![0u8; 8 * 3];
        fill_frame(&mut bytes, rgb);
        sink.display(&bytes).unwrap();

        let frame = sink.last().unwrap();
        assert_eq!(frame.len(), 24);
        for led in frame.chunks(3) {
            assert_eq!(led, &[rgb.r, rgb.g, rgb.b]);
        }
        assert!(rgb.r > rgb.b, "treble tone should drive red, got {:?}", rgb);
    }

    #[test]
    fn silence_falls_back_to_the_quiet_color() {
        let mut processor = BlockProcessor::new(test_params());
        // Pure DC at mid-scale: no signal in any band
        struct Silence;
        impl SampleSource for Silence {
            fn next_sample(&mut self) -> f32 {
                ADC_FULL_SCALE / 2.0
            }
        }
        let mut source = Silence;
        feed_blocks(&mut processor, &mut source, 40);

        let mapper = BrightnessMapper::new([1.0, 1.0, 1.0], 30.0, AGC_CEILING);
        let quiet = Rgb { r: 40, g: 16, b: 2 };
        let rgb = mapper.map(processor.peak_values(), quiet);
        assert_eq!(rgb, Rgb { r: 40, g: 16, b: 2 });
    }

    #[test]
    fn remote_key_mapping_covers_the_full_remote() {
        assert_eq!(key_to_remote(KeyCode::Char('p')), Some(RemoteKey::Power));
        assert_eq!(key_to_remote(KeyCode::Char('1')), Some(RemoteKey::OrganKey));
        assert_eq!(key_to_remote(KeyCode::Char('5')), Some(RemoteKey::QuietKey));
        assert_eq!(key_to_remote(KeyCode::Right), Some(RemoteKey::HueUp));
        assert_eq!(key_to_remote(KeyCode::Down), Some(RemoteKey::BrightDown));
        assert_eq!(key_to_remote(KeyCode::Char('s')), Some(RemoteKey::SparkleToggle));
        assert_eq!(key_to_remote(KeyCode::Char('S')), Some(RemoteKey::SparkleOff));
        assert_eq!(key_to_remote(KeyCode::Char('t')), Some(RemoteKey::Trickle));
        assert_eq!(key_to_remote(KeyCode::Char('z')), None);
    }
}
