use super::OutputSink;
use crate::sink::rgb_to_yuv;
use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, FourCC};

/// Preview surface backed by a v4l2loopback device, viewable in any video player.
pub struct V4L2Output {
    // keeps the negotiated output format alive
    _device: Device,
    file: File,
    width: u32,
    height: u32,
    packed: Vec<u8>,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening preview loopback {} ({}x{})",
            path.display(),
            width,
            height
        );

        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open loopback device {}", path.display()))?;
        let format = Output::set_format(
            &device,
            &v4l::Format::new(width, height, FourCC::new(b"YUYV")),
        )
        .context("Failed to set loopback output format")?;
        tracing::debug!("Loopback format: {}", format);

        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open {} for writing", path.display()))?;

        Ok(Self {
            _device: device,
            file,
            width: format.width,
            height: format.height,
            packed: Vec::new(),
        })
    }
}

/// Pack an RGB image as YUYV, averaging chroma over each horizontal pair.
fn pack_yuyv(image: &RgbImage, out: &mut Vec<u8>) {
    let (width, height) = image.dimensions();
    out.clear();
    out.reserve((width.div_ceil(2) * 4 * height) as usize);

    for row in image.rows() {
        let pixels: Vec<_> = row.collect();
        for pair in pixels.chunks(2) {
            let first = pair[0];
            let second = pair.get(1).copied().unwrap_or(first);

            let (y0, u0, v0) = rgb_to_yuv(first[0], first[1], first[2]);
            let (y1, u1, v1) = rgb_to_yuv(second[0], second[1], second[2]);
            let u = ((u0 as u16 + u1 as u16) / 2) as u8;
            let v = ((v0 as u16 + v1 as u16) / 2) as u8;

            out.extend_from_slice(&[y0, u, y1, v]);
        }
    }
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let _span = tracing::trace_span!("loopback_write").entered();

        if frame.dimensions() == (self.width, self.height) {
            pack_yuyv(frame, &mut self.packed);
        } else {
            let fitted = imageops::resize(frame, self.width, self.height, FilterType::Triangle);
            pack_yuyv(&fitted, &mut self.packed);
        }

        self.file
            .write_all(&self.packed)
            .context("Failed to write frame to loopback device")?;
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
