// Display Module - frame sinks. The core treats output as a synchronous
// "display(frame)" call with bounded latency; the sparkle overlay depends on
// issuing two such calls back to back.

use anyhow::{anyhow, Result};
use ddp_rs::connection::DDPConnection;
use ddp_rs::protocol::{ID, PixelConfig};
use std::net::UdpSocket;
use std::time::{Duration, Instant};

use crate::config::WledDeviceConfig;

// WLED's DDP timeout is ~1 second; keep the link warm even when the frame is
// all black
const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(500);

/// A sink accepts one whole ordered RGB frame per call and presents it
/// atomically - a render pass is never observed half-written.
pub trait DisplaySink {
    fn display(&mut self, frame: &[u8]) -> Result<()>;
}

struct DeviceConnection {
    ip: String,
    led_offset: usize,
    led_count: usize,
    conn: DDPConnection,
    last_send: Instant,
    last_was_zero: bool,
}

impl DeviceConnection {
    fn new(device: &WledDeviceConfig) -> Result<Self> {
        // Default DDP port unless the address names one explicitly
        let dest_addr = if device.ip.contains(':') {
            device.ip.clone()
        } else {
            format!("{}:4048", device.ip)
        };
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        let conn = DDPConnection::try_new(&dest_addr, PixelConfig::default(), ID::Default, socket)?;
        Ok(DeviceConnection {
            ip: device.ip.clone(),
            led_offset: device.led_offset,
            led_count: device.led_count,
            conn,
            last_send: Instant::now(),
            last_was_zero: false,
        })
    }
}

/// DDP/UDP output to one or more WLED controllers, each owning a slice of the
/// flat frame. Sends are sequential; a global brightness multiplier is
/// applied at transmission, after every component is already clamped.
pub struct DdpSink {
    devices: Vec<DeviceConnection>,
    global_brightness: f64,
    scaled: Vec<u8>,
}

impl DdpSink {
    pub fn new(devices: &[WledDeviceConfig], global_brightness: f64) -> Result<Self> {
        let mut connections = Vec::new();
        for device in devices {
            if !device.enabled {
                continue;
            }
            match DeviceConnection::new(device) {
                Ok(conn) => connections.push(conn),
                Err(e) => {
                    log::warn!("Failed to connect to {}: {}", device.ip, e);
                }
            }
        }

        if connections.is_empty() {
            return Err(anyhow!("No WLED devices connected successfully"));
        }

        Ok(DdpSink {
            devices: connections,
            global_brightness: global_brightness.clamp(0.0, 1.0),
            scaled: Vec::new(),
        })
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}

impl DisplaySink for DdpSink {
    fn display(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() % 3 != 0 {
            return Err(anyhow!(
                "Frame size must be divisible by 3 (RGB), got {} bytes",
                frame.len()
            ));
        }

        let frame = if self.global_brightness < 1.0 {
            self.scaled.clear();
            self.scaled.extend(
                frame
                    .iter()
                    .map(|&v| (v as f64 * self.global_brightness).round() as u8),
            );
            &self.scaled[..]
        } else {
            frame
        };

        for device in &mut self.devices {
            let byte_offset = device.led_offset * 3;
            let byte_count = device.led_count * 3;

            if byte_offset + byte_count > frame.len() {
                log::warn!(
                    "Device {} range exceeds frame size: wants LEDs {}-{}, frame has {}",
                    device.ip,
                    device.led_offset,
                    device.led_offset + device.led_count - 1,
                    frame.len() / 3
                );
                continue;
            }

            let device_frame = &frame[byte_offset..byte_offset + byte_count];

            // Throttle repeated all-black frames to the keepalive interval.
            // The first black frame after a lit one always goes out.
            let all_zeros = device_frame.iter().all(|&b| b == 0);
            if all_zeros && device.last_was_zero && device.last_send.elapsed() < KEEPALIVE_INTERVAL
            {
                continue;
            }

            match device.conn.write(device_frame) {
                Ok(_) => {
                    device.last_send = Instant::now();
                    device.last_was_zero = all_zeros;
                }
                Err(e) => log::warn!("Failed to send to {}: {}", device.ip, e),
            }
        }

        Ok(())
    }
}

/// Records every transmitted frame; used by the tests in place of hardware.
#[derive(Default)]
pub struct CaptureSink {
    pub frames: Vec<Vec<u8>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        CaptureSink { frames: Vec::new() }
    }

    pub fn last(&self) -> Option<&Vec<u8>> {
        self.frames.last()
    }
}

impl DisplaySink for CaptureSink {
    fn display(&mut self, frame: &[u8]) -> Result<()> {
        self.frames.push(frame.to_vec());
        Ok(())
    }
}
