//! Synthetic `stub://` camera.
//!
//! Produces solid-color frames that cycle through the reference palette, so
//! the color-prototype classifier sees a changing "shelf". Query options:
//!
//! - `frames=N`: the source fails with a capture error after N frames.
//! - `hold=H`: each palette color is held for H frames (default 10).
//! - `fail=connect`: the device is reported unavailable on connect.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use super::camera::{CameraConfig, CameraStats};
use crate::classify::REFERENCE_COLORS;
use crate::error::ScanError;
use crate::frame::Frame;

const DEFAULT_HOLD: u64 = 10;

#[derive(Debug, Default, PartialEq, Eq)]
struct StubOptions {
    frames: Option<u64>,
    hold: Option<u64>,
    fail_connect: bool,
}

fn parse_options(device: &str) -> Result<StubOptions> {
    let mut options = StubOptions::default();
    let Some(query) = device.split_once('?').map(|(_, q)| q) else {
        return Ok(options);
    };
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("stub camera option '{}' needs a value", pair))?;
        match key {
            "frames" => {
                options.frames = Some(
                    value
                        .parse()
                        .map_err(|_| anyhow!("stub camera frames must be an integer"))?,
                )
            }
            "hold" => {
                let hold: u64 = value
                    .parse()
                    .map_err(|_| anyhow!("stub camera hold must be an integer"))?;
                if hold == 0 {
                    return Err(anyhow!("stub camera hold must be greater than zero"));
                }
                options.hold = Some(hold);
            }
            "fail" if value == "connect" => options.fail_connect = true,
            _ => return Err(anyhow!("unknown stub camera option '{}'", pair)),
        }
    }
    Ok(options)
}

pub(crate) struct SyntheticCamera {
    config: CameraConfig,
    options: StubOptions,
    connected: bool,
    frame_count: u64,
}

impl SyntheticCamera {
    pub(crate) fn new(config: CameraConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("stub camera needs a non-zero frame size"));
        }
        let options = parse_options(&config.device)?;
        Ok(Self {
            config,
            options,
            connected: false,
            frame_count: 0,
        })
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        if self.options.fail_connect {
            return Err(ScanError::capture(format!(
                "camera {} unavailable",
                self.config.device
            )));
        }
        self.connected = true;
        log::info!("CameraSource: connected to {} (synthetic)", self.config.device);
        Ok(())
    }

    pub(crate) fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(ScanError::capture("stub camera not connected"));
        }
        if let Some(limit) = self.options.frames {
            if self.frame_count >= limit {
                return Err(ScanError::capture(format!(
                    "stub camera {} exhausted after {} frames",
                    self.config.device, limit
                )));
            }
        }
        self.frame_count += 1;
        Ok(Frame::new(self.render(), self.frame_count))
    }

    /// Solid palette color with a faint horizontal shading.
    fn render(&self) -> RgbImage {
        let hold = self.options.hold.unwrap_or(DEFAULT_HOLD);
        let slot = ((self.frame_count - 1) / hold) as usize % REFERENCE_COLORS.len();
        let base = REFERENCE_COLORS[slot];
        let width = self.config.width;
        RgbImage::from_fn(width, self.config.height, |x, _| {
            let shade = (x * 16 / width) as i16 - 8;
            Rgb(base.map(|c| (c as i16 + shade).clamp(0, 255) as u8))
        })
    }

    pub(crate) fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}
