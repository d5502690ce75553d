use super::thread::CaptureThread;
use super::{
    format_name, CameraDriver, CameraHandle, Capabilities, DeviceInfo, Encoding, Format,
    NegotiatedFormat, RawFrame, Resolution,
};
use crate::error::{CameraError, Result};
use crate::sink::{FrameSink, PixelLayout};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution as NokhwaResolution,
};
use nokhwa::Camera;
use std::sync::atomic::Ordering;

const BACKEND: &str = "nokhwa";

/// Consecutive frame errors tolerated before the stream is given up.
const MAX_FRAME_ERRORS: u32 = 5;

/// Cross-platform driver on top of nokhwa.
#[derive(Default)]
pub struct NokhwaDriver;

impl NokhwaDriver {
    pub fn new() -> Self {
        Self
    }
}

impl CameraDriver for NokhwaDriver {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let cameras = nokhwa::query(ApiBackend::Auto)?;
        tracing::debug!("nokhwa reported {} camera(s)", cameras.len());

        Ok(cameras
            .into_iter()
            .map(|info| DeviceInfo {
                identify: info.index().to_string(),
                description: info.human_name(),
                ..Default::default()
            })
            .collect())
    }

    fn open(&self, identify: &str) -> Result<Box<dyn CameraHandle>> {
        let index = parse_index(identify);
        let cameras = nokhwa::query(ApiBackend::Auto)?;
        if !cameras.iter().any(|info| info.index() == &index) {
            return Err(CameraError::DeviceNotFound {
                identify: identify.to_string(),
            });
        }

        tracing::info!("Opening camera {} via nokhwa", index);
        Ok(Box::new(NokhwaHandle {
            index,
            requested: None,
            negotiated: None,
            capabilities: None,
            capture: None,
        }))
    }
}

/// nokhwa cameras are created on the thread that uses them; the handle only
/// keeps what is needed to recreate one.
struct NokhwaHandle {
    index: CameraIndex,
    requested: Option<Format>,
    negotiated: Option<CameraFormat>,
    capabilities: Option<Capabilities>,
    capture: Option<CaptureThread>,
}

impl NokhwaHandle {
    fn probe(&self) -> Result<Camera> {
        Ok(Camera::new(self.index.clone(), request(self.requested.as_ref()))?)
    }
}

impl CameraHandle for NokhwaHandle {
    fn capabilities(&mut self) -> Result<Capabilities> {
        if self.capture.is_none() {
            let mut camera = self.probe()?;
            self.capabilities = Some(query_capabilities(&mut camera)?);
        }
        Ok(self.capabilities.clone().unwrap_or_default())
    }

    fn format(&mut self) -> Result<NegotiatedFormat> {
        if let Some(format) = self.negotiated {
            return Ok(negotiated(format));
        }
        let format = self.probe()?.camera_format();
        self.negotiated = Some(format);
        Ok(negotiated(format))
    }

    fn set_format(&mut self, format: &Format) -> Result<NegotiatedFormat> {
        if self.capture.is_some() {
            return Err(CameraError::backend(
                BACKEND,
                "format cannot change while streaming",
            ));
        }

        self.requested = Some(*format);
        let applied = self.probe()?.camera_format();
        tracing::debug!("nokhwa applied {} for requested {}", applied, format);
        self.negotiated = Some(applied);
        Ok(negotiated(applied))
    }

    fn start(&mut self, sink: FrameSink) -> Result<()> {
        if self.capture.is_some() {
            return Ok(());
        }

        let index = self.index.clone();
        let requested = request(self.requested.as_ref());
        let (capture, (format, capabilities)) =
            CaptureThread::spawn("nokhwa-capture", move |stop, ready| {
                let mut camera = match start_camera(index, requested) {
                    Ok((camera, format, capabilities)) => {
                        let _ = ready.send(Ok((format, capabilities)));
                        camera
                    }
                    Err(e) => {
                        let _ = ready.send(Err(e));
                        return;
                    }
                };

                let mut errors = 0;
                while !stop.load(Ordering::Acquire) {
                    let buffer = match camera.frame() {
                        Ok(buffer) => buffer,
                        Err(e) => {
                            errors += 1;
                            tracing::warn!("nokhwa frame capture failed: {}", e);
                            if errors >= MAX_FRAME_ERRORS {
                                break;
                            }
                            continue;
                        }
                    };
                    errors = 0;

                    let Some(layout) = layout_of(buffer.source_frame_format()) else {
                        continue;
                    };
                    let resolution = buffer.resolution();
                    let frame = RawFrame {
                        layout,
                        width: resolution.width(),
                        height: resolution.height(),
                        bytes_per_line: 0,
                        data: buffer.buffer().to_vec(),
                    };
                    sink.present(&frame);
                }

                if let Err(e) = camera.stop_stream() {
                    tracing::warn!("Failed to stop nokhwa stream: {}", e);
                }
            })?;

        tracing::info!("nokhwa streaming {}", format);
        self.negotiated = Some(format);
        self.capabilities = Some(capabilities);
        self.capture = Some(capture);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(mut capture) = self.capture.take() {
            capture.join()?;
            tracing::info!("nokhwa stream stopped");
        }
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.capture.is_some()
    }
}

fn start_camera(
    index: CameraIndex,
    requested: RequestedFormat<'static>,
) -> Result<(Camera, CameraFormat, Capabilities)> {
    let mut camera = Camera::new(index, requested)?;
    let capabilities = query_capabilities(&mut camera).unwrap_or_default();

    let format = camera.camera_format();
    match layout_of(format.format()) {
        Some(layout) if FrameSink::accepts(layout) => {}
        _ => return Err(CameraError::unsupported(format.format().to_string())),
    }

    camera.open_stream()?;
    let format = camera.camera_format();
    Ok((camera, format, capabilities))
}

fn query_capabilities(camera: &mut Camera) -> Result<Capabilities> {
    let resolutions = camera
        .compatible_camera_formats()?
        .into_iter()
        .map(|format| Resolution::new(format.width(), format.height()))
        .collect();
    let formats = camera
        .compatible_fourcc()?
        .into_iter()
        .map(|fourcc| format_name(layout_of(fourcc), &fourcc.to_string()))
        .collect();

    Ok(Capabilities {
        resolutions,
        formats,
    }
    .normalize())
}

fn request(format: Option<&Format>) -> RequestedFormat<'static> {
    let format = format.copied().unwrap_or_default();
    RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(camera_format(&format)))
}

fn camera_format(format: &Format) -> CameraFormat {
    let frame_format = match format.encoding {
        Encoding::Mjpeg => FrameFormat::MJPEG,
        Encoding::Yuyv => FrameFormat::YUYV,
    };
    CameraFormat::new(
        NokhwaResolution::new(format.width, format.height),
        frame_format,
        format.frame_rate,
    )
}

fn negotiated(format: CameraFormat) -> NegotiatedFormat {
    NegotiatedFormat {
        width: format.width(),
        height: format.height(),
        layout: layout_of(format.format()),
        frame_rate: format.frame_rate(),
    }
}

fn layout_of(format: FrameFormat) -> Option<PixelLayout> {
    match format {
        FrameFormat::MJPEG => Some(PixelLayout::Jpeg),
        FrameFormat::YUYV => Some(PixelLayout::Yuyv),
        FrameFormat::NV12 => Some(PixelLayout::Nv12),
        FrameFormat::GRAY => Some(PixelLayout::Gray8),
        FrameFormat::RAWRGB => Some(PixelLayout::Rgb24),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

fn parse_index(identify: &str) -> CameraIndex {
    match identify.parse::<u32>() {
        Ok(index) => CameraIndex::Index(index),
        Err(_) => CameraIndex::String(identify.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_identify_is_an_index() {
        assert_eq!(parse_index("2"), CameraIndex::Index(2));
        assert_eq!(
            parse_index("/dev/video0"),
            CameraIndex::String("/dev/video0".to_string())
        );
    }

    #[test]
    fn requested_format_maps_onto_nokhwa() {
        let format = Format {
            width: 1280,
            height: 720,
            encoding: Encoding::Yuyv,
            frame_rate: 30,
        };
        let mapped = camera_format(&format);
        assert_eq!((mapped.width(), mapped.height()), (1280, 720));
        assert_eq!(mapped.format(), FrameFormat::YUYV);
        assert_eq!(mapped.frame_rate(), 30);
        assert_eq!(negotiated(mapped).layout, Some(PixelLayout::Yuyv));
    }

    #[test]
    fn nokhwa_frame_formats_are_accepted_by_the_sink() {
        for format in [
            FrameFormat::MJPEG,
            FrameFormat::YUYV,
            FrameFormat::NV12,
            FrameFormat::GRAY,
            FrameFormat::RAWRGB,
        ] {
            let layout = layout_of(format).expect("known frame format");
            assert!(FrameSink::accepts(layout));
        }
    }
}
