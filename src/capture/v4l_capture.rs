use super::thread::CaptureThread;
use super::{
    format_name, CameraDriver, CameraHandle, Capabilities, DeviceInfo, Format, NegotiatedFormat,
    RawFrame, Resolution,
};
use crate::error::{CameraError, Result};
use crate::sink::{FrameSink, PixelLayout};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

const BACKEND: &str = "v4l";
const BUFFER_COUNT: u32 = 4;

/// Linux driver talking to V4L2 device nodes directly.
#[derive(Default)]
pub struct V4lDriver;

impl V4lDriver {
    pub fn new() -> Self {
        Self
    }
}

impl CameraDriver for V4lDriver {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let mut devices = Vec::new();

        for node in v4l::context::enum_devices() {
            let path = node.path().display().to_string();
            let Ok(device) = Device::with_path(node.path()) else {
                tracing::debug!("Skipping {}: cannot open", path);
                continue;
            };
            let Ok(caps) = device.query_caps() else {
                continue;
            };
            // UVC cameras expose metadata nodes next to the capture node
            if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                continue;
            }

            devices.push(DeviceInfo {
                identify: path,
                description: node.name().unwrap_or(caps.card),
                ..Default::default()
            });
        }

        Ok(devices)
    }

    fn open(&self, identify: &str) -> Result<Box<dyn CameraHandle>> {
        let path = device_path(identify);
        let device = Device::with_path(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CameraError::DeviceNotFound {
                identify: identify.to_string(),
            },
            _ => CameraError::Io(e),
        })?;

        tracing::info!("Opened {}", path.display());
        Ok(Box::new(V4lHandle {
            path,
            device,
            capture: None,
        }))
    }
}

/// The control descriptor stays on the caller's thread; streaming happens on
/// a second descriptor owned by the capture thread.
struct V4lHandle {
    path: PathBuf,
    device: Device,
    capture: Option<CaptureThread>,
}

impl CameraHandle for V4lHandle {
    fn capabilities(&mut self) -> Result<Capabilities> {
        let mut caps = Capabilities::default();

        for description in self.device.enum_formats()? {
            let fourcc = description.fourcc;
            caps.formats.push(format_name(
                PixelLayout::from_fourcc(&fourcc.repr),
                &fourcc.to_string(),
            ));

            for size in self.device.enum_framesizes(fourcc)? {
                match size.size {
                    FrameSizeEnum::Discrete(discrete) => caps
                        .resolutions
                        .push(Resolution::new(discrete.width, discrete.height)),
                    FrameSizeEnum::Stepwise(stepwise) => {
                        caps.resolutions
                            .push(Resolution::new(stepwise.min_width, stepwise.min_height));
                        caps.resolutions
                            .push(Resolution::new(stepwise.max_width, stepwise.max_height));
                    }
                }
            }
        }

        Ok(caps.normalize())
    }

    fn format(&mut self) -> Result<NegotiatedFormat> {
        let format = self.device.format()?;
        let params = self.device.params()?;
        Ok(negotiated(&format, &params))
    }

    fn set_format(&mut self, format: &Format) -> Result<NegotiatedFormat> {
        let wanted = v4l::Format::new(
            format.width,
            format.height,
            FourCC::new(&format.encoding.layout().fourcc()),
        );
        let applied = self.device.set_format(&wanted)?;

        let params = match self.device.set_params(&Parameters::with_fps(format.frame_rate)) {
            Ok(params) => params,
            Err(e) => {
                tracing::debug!("{} rejected frame rate: {}", self.path.display(), e);
                self.device.params()?
            }
        };

        let applied = negotiated(&applied, &params);
        if applied.width != format.width
            || applied.height != format.height
            || applied.layout != Some(format.encoding.layout())
        {
            tracing::debug!(
                "{} fell back to {}x{} {:?} for requested {}",
                self.path.display(),
                applied.width,
                applied.height,
                applied.layout,
                format
            );
        }
        Ok(applied)
    }

    fn start(&mut self, sink: FrameSink) -> Result<()> {
        if self.capture.is_some() {
            return Ok(());
        }

        let path = self.path.clone();
        let (capture, format) = CaptureThread::spawn("v4l-capture", move |stop, ready| {
            let device = match Device::with_path(&path) {
                Ok(device) => device,
                Err(e) => {
                    let _ = ready.send(Err(e.into()));
                    return;
                }
            };
            let (format, layout) = match stream_format(&device) {
                Ok(negotiated) => negotiated,
                Err(e) => {
                    let _ = ready.send(Err(e));
                    return;
                }
            };
            let mut stream = match Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready.send(Err(e.into()));
                    return;
                }
            };
            let _ = ready.send(Ok(format.clone()));

            while !stop.load(Ordering::Acquire) {
                let (data, meta) = match stream.next() {
                    Ok(next) => next,
                    Err(e) => {
                        tracing::warn!("{} stream failed: {}", path.display(), e);
                        break;
                    }
                };

                let used = meta.bytesused as usize;
                let data = if used > 0 && used <= data.len() {
                    &data[..used]
                } else {
                    data
                };

                let frame = RawFrame {
                    layout,
                    width: format.width,
                    height: format.height,
                    bytes_per_line: format.stride as usize,
                    data: data.to_vec(),
                };
                sink.present(&frame);
            }
        })?;

        tracing::info!("{} streaming {}", self.path.display(), format);
        self.capture = Some(capture);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(mut capture) = self.capture.take() {
            capture.join()?;
            tracing::info!("{} stream stopped", self.path.display());
        }
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.capture.is_some()
    }
}

/// Current device format, refused when the sink cannot decode it.
fn stream_format(device: &Device) -> Result<(v4l::Format, PixelLayout)> {
    let format = device.format()?;
    match PixelLayout::from_fourcc(&format.fourcc.repr) {
        Some(layout) if FrameSink::accepts(layout) => Ok((format, layout)),
        _ => Err(CameraError::unsupported(format.fourcc.to_string())),
    }
}

fn negotiated(format: &v4l::Format, params: &Parameters) -> NegotiatedFormat {
    let interval = params.interval;
    let frame_rate = if interval.numerator == 0 {
        0
    } else {
        interval.denominator / interval.numerator
    };

    NegotiatedFormat {
        width: format.width,
        height: format.height,
        layout: PixelLayout::from_fourcc(&format.fourcc.repr),
        frame_rate,
    }
}

/// Accepts either a device path or a bare index (`0` for `/dev/video0`).
fn device_path(identify: &str) -> PathBuf {
    match identify.parse::<usize>() {
        Ok(index) => PathBuf::from(format!("/dev/video{}", index)),
        Err(_) => Path::new(identify).to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_index_maps_to_device_node() {
        assert_eq!(device_path("2"), PathBuf::from("/dev/video2"));
        assert_eq!(device_path("/dev/video7"), PathBuf::from("/dev/video7"));
    }

    #[test]
    fn frame_rate_comes_from_the_interval() {
        let format = v4l::Format::new(1280, 720, FourCC::new(b"YUYV"));
        let params = Parameters::with_fps(30);
        let reported = negotiated(&format, &params);

        assert_eq!((reported.width, reported.height), (1280, 720));
        assert_eq!(reported.layout, Some(PixelLayout::Yuyv));
        assert_eq!(reported.frame_rate, 30);
    }

    #[test]
    fn missing_device_is_reported_as_not_found() {
        let err = V4lDriver::new()
            .open("/dev/camgrab-missing-node")
            .err()
            .expect("open should fail");
        assert!(matches!(err, CameraError::DeviceNotFound { .. }));
    }
}
