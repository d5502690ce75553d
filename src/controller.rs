use crate::capture::{CameraDriver, CameraHandle, DeviceInfo, Encoding, Format, NegotiatedFormat};
use crate::error::{CameraError, Result};
use crate::sink::FrameSink;
use clap::ValueEnum;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// How pending frames are handed to the display side on each pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DeliveryPolicy {
    /// Skip to the newest frame and emit only that one.
    #[default]
    LatestOnly,
    /// Emit every received frame in order.
    EveryFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Unselected,
    Selected,
    Running,
}

/// Owns the camera handle and the latest decoded frame.
///
/// ```text
/// Unselected --select--> Selected --open--> Running
///                           ^                  |
///                           +------close-------+
/// ```
pub struct CameraController {
    driver: Box<dyn CameraDriver>,
    handle: Option<Box<dyn CameraHandle>>,
    device: Option<DeviceInfo>,
    format: Format,
    policy: DeliveryPolicy,
    jpeg_quality: u8,
    frames: Option<Receiver<RgbImage>>,
    live: Option<RgbImage>,
    running: bool,
}

impl CameraController {
    pub fn new(driver: Box<dyn CameraDriver>) -> Self {
        Self {
            driver,
            handle: None,
            device: None,
            format: Format::default(),
            policy: DeliveryPolicy::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            frames: None,
            live: None,
            running: false,
        }
    }

    pub fn with_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn devices(&self) -> Result<Vec<DeviceInfo>> {
        self.driver.devices()
    }

    /// Bind the first camera the driver reports.
    pub fn select_default_device(&mut self) -> Result<()> {
        let first = self
            .driver
            .devices()?
            .into_iter()
            .next()
            .ok_or(CameraError::NoDevice)?;
        self.select_device(&first.identify)
    }

    /// Bind `identify`, keeping the requested format. A running session is
    /// stopped and resumed on the new device.
    pub fn select_device(&mut self, identify: &str) -> Result<()> {
        let restart = self.running;
        if restart {
            self.close()?;
        }

        self.handle = None;
        self.device = None;

        let description = self
            .driver
            .devices()
            .ok()
            .and_then(|devices| devices.into_iter().find(|d| d.identify == identify))
            .map(|d| d.description)
            .unwrap_or_else(|| identify.to_string());

        let mut handle = self.driver.open(identify)?;
        apply_format(handle.as_mut(), &self.format);

        tracing::info!(
            "Selected camera {} ({}) via {}",
            identify,
            description,
            self.driver.name()
        );
        self.handle = Some(handle);
        self.device = Some(DeviceInfo {
            identify: identify.to_string(),
            description,
            ..Default::default()
        });

        if restart {
            self.open()?;
        }
        Ok(())
    }

    /// Descriptor of the selected device with live capability lists.
    pub fn device_info(&mut self) -> Result<DeviceInfo> {
        let handle = self.handle.as_mut().ok_or(CameraError::NoDevice)?;
        let caps = handle.capabilities()?;

        let mut info = self.device.clone().unwrap_or_default();
        info.resolutions = caps.resolutions;
        info.formats = caps.formats;
        Ok(info)
    }

    /// Format currently reported by the device.
    pub fn format(&mut self) -> Result<Format> {
        let handle = self.handle.as_mut().ok_or(CameraError::NoDevice)?;
        let reported = handle.format()?;
        self.format = merge_format(&self.format, &reported);
        Ok(self.format)
    }

    /// Request a new format. Without a device the request is kept for the
    /// next selection; while running the stream is restarted with it.
    pub fn set_format(&mut self, format: Format) -> Result<()> {
        self.format = format;

        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };

        if !self.running {
            apply_format(handle.as_mut(), &format);
            return Ok(());
        }

        if let Err(e) = handle.stop() {
            self.running = false;
            self.frames = None;
            return Err(e);
        }
        apply_format(handle.as_mut(), &format);
        if let Err(e) = self.start_stream() {
            self.running = false;
            self.frames = None;
            return Err(e);
        }
        Ok(())
    }

    pub fn open(&mut self) -> Result<()> {
        if self.running {
            return Err(CameraError::AlreadyRunning);
        }
        let Some(device) = &self.device else {
            return Err(CameraError::NoDevice);
        };

        if self.handle.is_none() {
            let mut handle = self.driver.open(&device.identify)?;
            apply_format(handle.as_mut(), &self.format);
            self.handle = Some(handle);
        }

        self.start_stream()?;
        tracing::info!("Camera opened");
        Ok(())
    }

    /// Stop streaming. The device stays selected and the Live Image is
    /// dropped so a later session starts clean.
    pub fn close(&mut self) -> Result<()> {
        let handle = self.handle.as_mut().ok_or(CameraError::NoDevice)?;
        if !self.running {
            return Err(CameraError::NotRunning);
        }

        let stopped = handle.stop();
        self.running = false;
        self.frames = None;
        self.live = None;
        tracing::info!("Camera closed");
        stopped
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn state(&self) -> ControllerState {
        if self.running {
            ControllerState::Running
        } else if self.device.is_some() {
            ControllerState::Selected
        } else {
            ControllerState::Unselected
        }
    }

    pub fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    pub fn live_image(&self) -> Option<&RgbImage> {
        self.live.as_ref()
    }

    /// Write the Live Image to `path` as JPEG, replacing any existing file.
    pub fn capture(&self, path: impl AsRef<Path>) -> Result<()> {
        if !self.running {
            return Err(CameraError::NotRunning);
        }
        let image = self.live.as_ref().ok_or(CameraError::NoFrame)?;

        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        image.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality))?;
        writer.flush()?;

        tracing::info!(
            "Captured {}x{} frame to {}",
            image.width(),
            image.height(),
            path.display()
        );
        Ok(())
    }

    /// Take every frame already decoded, without blocking.
    /// Returns how many frames arrived.
    pub fn pump(&mut self, on_frame: impl FnMut(&RgbImage)) -> usize {
        self.deliver(None, on_frame)
    }

    /// Like [`pump`](Self::pump) but waits up to `timeout` for the first frame.
    pub fn pump_timeout(&mut self, timeout: Duration, on_frame: impl FnMut(&RgbImage)) -> usize {
        self.deliver(Some(timeout), on_frame)
    }

    fn start_stream(&mut self) -> Result<()> {
        let handle = self.handle.as_mut().ok_or(CameraError::NoDevice)?;
        let (sink, frames) = FrameSink::channel();
        handle.start(sink)?;
        self.frames = Some(frames);
        self.running = true;
        Ok(())
    }

    fn deliver(&mut self, wait: Option<Duration>, mut on_frame: impl FnMut(&RgbImage)) -> usize {
        let Some(frames) = self.frames.take() else {
            return 0;
        };

        let mut received = 0;
        let mut connected = true;

        if let Some(timeout) = wait {
            match frames.recv_timeout(timeout) {
                Ok(image) => {
                    received += 1;
                    self.receive(image, &mut on_frame);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => connected = false,
            }
        }

        while connected {
            match frames.try_recv() {
                Ok(image) => {
                    received += 1;
                    self.receive(image, &mut on_frame);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => connected = false,
            }
        }

        if self.policy == DeliveryPolicy::LatestOnly && received > 0 {
            if let Some(image) = &self.live {
                on_frame(image);
            }
        }

        if connected {
            self.frames = Some(frames);
        } else {
            tracing::warn!("Camera stopped delivering frames");
        }

        if received > 1 {
            tracing::trace!("Pumped {} frames", received);
        }
        received
    }

    fn receive(&mut self, image: RgbImage, on_frame: &mut impl FnMut(&RgbImage)) {
        if self.policy == DeliveryPolicy::EveryFrame {
            on_frame(&image);
        }
        self.live = Some(image);
    }
}

impl Drop for CameraController {
    fn drop(&mut self) {
        if !self.running {
            return;
        }
        if let Some(handle) = self.handle.as_mut().filter(|h| h.is_streaming()) {
            if let Err(e) = handle.stop() {
                tracing::warn!("Failed to stop camera on shutdown: {}", e);
            }
        }
    }
}

fn apply_format(handle: &mut dyn CameraHandle, format: &Format) {
    match handle.set_format(format) {
        Ok(applied) => tracing::debug!(
            "Requested {}, device applied {}x{} {:?} @ {}fps",
            format,
            applied.width,
            applied.height,
            applied.layout,
            applied.frame_rate
        ),
        Err(e) => tracing::warn!("Could not apply {}: {}", format, e),
    }
}

/// Reported values win; an encoding outside the requestable set keeps the
/// last requested one.
fn merge_format(requested: &Format, reported: &NegotiatedFormat) -> Format {
    Format {
        width: reported.width,
        height: reported.height,
        encoding: reported
            .layout
            .and_then(Encoding::from_layout)
            .unwrap_or(requested.encoding),
        frame_rate: if reported.frame_rate == 0 {
            requested.frame_rate
        } else {
            reported.frame_rate
        },
    }
}
