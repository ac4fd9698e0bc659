// Audio Module - capture device plumbing and the raw sample source feeding
// the block processor
use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::dsp::{SampleSource, ADC_FULL_SCALE};

/// List all available audio devices (both input and output)
/// Returns a vector of (device_name, is_output) tuples
pub fn list_audio_devices() -> Result<Vec<(String, bool)>> {
    let host = cpal::default_host();
    let mut device_list = Vec::new();
    let mut seen_devices = HashSet::new();

    // Get default devices first to avoid hanging on some macOS systems
    if let Some(device) = host.default_input_device() {
        if let Ok(name) = device.name() {
            device_list.push((format!("{} [INPUT] (default)", name), false));
            seen_devices.insert(name);
        }
    }

    if let Some(device) = host.default_output_device() {
        if let Ok(name) = device.name() {
            device_list.push((format!("{} [OUTPUT] (default)", name), true));
            seen_devices.insert(name);
        }
    }

    if let Ok(devices) = host.input_devices() {
        for device in devices {
            if let Ok(name) = device.name() {
                if !seen_devices.contains(&name) {
                    device_list.push((format!("{} [INPUT]", name), false));
                    seen_devices.insert(name);
                }
            }
        }
    }

    if let Ok(devices) = host.output_devices() {
        for device in devices {
            if let Ok(name) = device.name() {
                if !seen_devices.contains(&name) {
                    device_list.push((format!("{} [OUTPUT/LOOPBACK]", name), true));
                    seen_devices.insert(name);
                }
            }
        }
    }

    if device_list.is_empty() {
        return Err(anyhow!("No audio devices found"));
    }

    Ok(device_list)
}

/// Find an audio device by name (case-insensitive substring match), checking
/// defaults first, then inputs, then outputs. Empty name means the default
/// input device.
pub fn find_audio_device(device_name: &str) -> Result<Device> {
    let host = cpal::default_host();

    if device_name.trim().is_empty() {
        return host
            .default_input_device()
            .ok_or_else(|| anyhow!("No default audio input device available"));
    }

    // Strip the tags list_audio_devices() appends
    let clean_name = device_name
        .replace(" [INPUT] (default)", "")
        .replace(" [OUTPUT] (default)", "")
        .replace(" [OUTPUT/LOOPBACK] (default)", "")
        .replace(" [INPUT]", "")
        .replace(" [OUTPUT/LOOPBACK]", "")
        .replace(" (default)", "")
        .to_lowercase();

    if let Some(device) = host.default_input_device() {
        if let Ok(name) = device.name() {
            if name.to_lowercase().contains(&clean_name) {
                return Ok(device);
            }
        }
    }

    if let Some(device) = host.default_output_device() {
        if let Ok(name) = device.name() {
            if name.to_lowercase().contains(&clean_name) {
                return Ok(device);
            }
        }
    }

    if let Ok(devices) = host.input_devices() {
        for device in devices {
            if let Ok(name) = device.name() {
                if name.to_lowercase().contains(&clean_name) {
                    return Ok(device);
                }
            }
        }
    }

    if let Ok(devices) = host.output_devices() {
        for device in devices {
            if let Ok(name) = device.name() {
                if name.to_lowercase().contains(&clean_name) {
                    return Ok(device);
                }
            }
        }
    }

    Err(anyhow!("Audio device '{}' not found", device_name))
}

// Bound the ring to ~2 seconds of device-rate audio
fn ring_capacity(device_rate: f32) -> usize {
    (device_rate * 2.0) as usize
}

// Nearest whole-sample decimation of the device rate toward the target.
// The effective rate is device_rate / factor, not the target itself; the
// filter coefficients must be derived from the effective rate.
fn decimation_factor(device_rate: f32, target_rate_hz: f32) -> usize {
    ((device_rate / target_rate_hz).round() as usize).max(1)
}

fn push_samples(ring: &Arc<Mutex<VecDeque<f32>>>, samples: impl Iterator<Item = f32>, cap: usize) {
    let mut ring = match ring.lock() {
        Ok(r) => r,
        Err(_) => return,
    };
    ring.extend(samples);
    while ring.len() > cap {
        ring.pop_front();
    }
}

/// Pulls mono samples from a cpal input stream and re-times them to the
/// organ's fixed sample rate by decimation, rescaled into the unsigned
/// ADC-like range the DSP chain models. When the ring runs dry it returns
/// mid-scale (silence) so the block loop keeps its pacing.
pub struct CpalSource {
    ring: Arc<Mutex<VecDeque<f32>>>,
    decimation: usize,
    effective_rate_hz: f32,
    _stream: cpal::Stream,
}

impl CpalSource {
    pub fn new(device_name: &str, target_rate_hz: f32) -> Result<Self> {
        let device = find_audio_device(device_name)?;
        let config = device.default_input_config()?;
        let device_rate = config.sample_rate().0 as f32;
        let channels = config.channels() as usize;
        let sample_format = config.sample_format();

        if device_rate < target_rate_hz {
            return Err(anyhow!(
                "Device rate {} Hz is below the organ sample rate {} Hz",
                device_rate,
                target_rate_hz
            ));
        }
        let decimation = decimation_factor(device_rate, target_rate_hz);
        let effective_rate_hz = device_rate / decimation as f32;

        log::info!(
            "Audio capture: {} Hz, {} channel(s), {:?}, decimation 1/{} -> {} Hz effective",
            device_rate,
            channels,
            sample_format,
            decimation,
            effective_rate_hz
        );

        let ring = Arc::new(Mutex::new(VecDeque::new()));
        let cap = ring_capacity(device_rate);

        // Mono: take the first channel of each interleaved group
        let stream = match sample_format {
            SampleFormat::F32 => {
                let ring = ring.clone();
                device.build_input_stream(
                    &config.into(),
                    move |data: &[f32], _| {
                        push_samples(&ring, data.iter().step_by(channels).copied(), cap);
                    },
                    |err| log::error!("Audio stream error: {}", err),
                    None,
                )?
            }
            SampleFormat::I16 => {
                let ring = ring.clone();
                device.build_input_stream(
                    &config.into(),
                    move |data: &[i16], _| {
                        push_samples(
                            &ring,
                            data.iter().step_by(channels).map(|&s| s as f32 / 32768.0),
                            cap,
                        );
                    },
                    |err| log::error!("Audio stream error: {}", err),
                    None,
                )?
            }
            SampleFormat::U16 => {
                let ring = ring.clone();
                device.build_input_stream(
                    &config.into(),
                    move |data: &[u16], _| {
                        push_samples(
                            &ring,
                            data.iter()
                                .step_by(channels)
                                .map(|&s| (s as f32 - 32768.0) / 32768.0),
                            cap,
                        );
                    },
                    |err| log::error!("Audio stream error: {}", err),
                    None,
                )?
            }
            other => {
                return Err(anyhow!("Unsupported sample format: {:?}", other));
            }
        };

        stream.play()?;

        Ok(CpalSource {
            ring,
            decimation,
            effective_rate_hz,
            _stream: stream,
        })
    }

    /// The true post-decimation sample rate. A 44.1 kHz device decimated by
    /// 4 delivers samples spaced 1/11025 s apart, and every filter alpha has
    /// to be derived from that spacing, not from the requested rate.
    pub fn effective_rate_hz(&self) -> f32 {
        self.effective_rate_hz
    }
}

impl SampleSource for CpalSource {
    fn next_sample(&mut self) -> f32 {
        let mut ring = match self.ring.lock() {
            Ok(r) => r,
            Err(_) => return ADC_FULL_SCALE / 2.0,
        };

        // Drop decimation-1 samples, keep the last of the group
        let mut sample = None;
        for _ in 0..self.decimation {
            if let Some(s) = ring.pop_front() {
                sample = Some(s);
            } else {
                break;
            }
        }

        match sample {
            // [-1, 1] onto the unsigned ADC range around mid-scale
            Some(s) => ADC_FULL_SCALE / 2.0 + s.clamp(-1.0, 1.0) * (ADC_FULL_SCALE / 2.0 - 1.0),
            None => ADC_FULL_SCALE / 2.0,
        }
    }
}
