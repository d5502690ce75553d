mod nokhwa_capture;
mod thread;
mod v4l_capture;

#[cfg(test)]
pub mod mock;

pub use nokhwa_capture::NokhwaDriver;
pub use v4l_capture::V4lDriver;

use crate::error::Result;
use crate::sink::{FrameSink, PixelLayout};
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Stream encodings a caller can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Encoding {
    Mjpeg,
    Yuyv,
}

impl Encoding {
    pub fn layout(self) -> PixelLayout {
        match self {
            Encoding::Mjpeg => PixelLayout::Jpeg,
            Encoding::Yuyv => PixelLayout::Yuyv,
        }
    }

    pub fn from_layout(layout: PixelLayout) -> Option<Encoding> {
        match layout {
            PixelLayout::Jpeg => Some(Encoding::Mjpeg),
            PixelLayout::Yuyv => Some(Encoding::Yuyv),
            _ => None,
        }
    }
}

/// Requested (or reported) capture format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format {
    pub width: u32,
    pub height: u32,
    pub encoding: Encoding,
    pub frame_rate: u32,
}

impl Default for Format {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            encoding: Encoding::Mjpeg,
            frame_rate: 15,
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} {:?} @ {}fps",
            self.width, self.height, self.encoding, self.frame_rate
        )
    }
}

/// Format a driver actually applied. The layout is whatever the device
/// settled on and may be outside the requestable encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub width: u32,
    pub height: u32,
    pub layout: Option<PixelLayout>,
    pub frame_rate: u32,
}

/// Metadata snapshot of a camera.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device path or backend index used to open the camera.
    pub identify: String,
    pub description: String,
    pub resolutions: Vec<Resolution>,
    pub formats: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub resolutions: Vec<Resolution>,
    pub formats: Vec<String>,
}

impl Capabilities {
    /// Sorts resolutions and drops duplicates. Format order is kept.
    pub fn normalize(mut self) -> Self {
        self.resolutions.sort();
        self.resolutions.dedup();
        let mut seen = std::collections::HashSet::new();
        self.formats.retain(|name| seen.insert(name.clone()));
        self
    }
}

/// One buffer as pushed by a driver.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub layout: PixelLayout,
    pub width: u32,
    pub height: u32,
    /// Row stride of the first plane, 0 when tightly packed.
    pub bytes_per_line: usize,
    pub data: Vec<u8>,
}

/// Platform camera driver: enumerates and opens devices.
pub trait CameraDriver {
    fn name(&self) -> &'static str;

    /// Query available devices. Always asks the platform afresh.
    fn devices(&self) -> Result<Vec<DeviceInfo>>;

    fn open(&self, identify: &str) -> Result<Box<dyn CameraHandle>>;
}

/// An opened camera device.
pub trait CameraHandle {
    fn capabilities(&mut self) -> Result<Capabilities>;

    fn format(&mut self) -> Result<NegotiatedFormat>;

    /// Request `format`. The driver substitutes a supported format when the
    /// request is rejected and returns what it applied.
    fn set_format(&mut self, format: &Format) -> Result<NegotiatedFormat>;

    /// Start pushing buffers into `sink`.
    fn start(&mut self, sink: FrameSink) -> Result<()>;

    /// Stop streaming. No buffer is pushed after this returns.
    fn stop(&mut self) -> Result<()>;

    fn is_streaming(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    Nokhwa,
    V4l,
}

pub fn create_driver(backend: Backend) -> Box<dyn CameraDriver> {
    match backend {
        Backend::Nokhwa => Box::new(NokhwaDriver::new()),
        Backend::V4l => Box::new(V4lDriver::new()),
    }
}

/// Display name for a pixel format reported by a device.
pub(crate) fn format_name(layout: Option<PixelLayout>, raw: &str) -> String {
    match layout {
        Some(layout) => layout.name().to_string(),
        None => raw.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_format_is_vga_mjpeg_15fps() {
        let format = Format::default();
        assert_eq!((format.width, format.height), (640, 480));
        assert_eq!(format.encoding, Encoding::Mjpeg);
        assert_eq!(format.frame_rate, 15);
    }

    #[test]
    fn encodings_map_to_sink_layouts() {
        for encoding in [Encoding::Mjpeg, Encoding::Yuyv] {
            assert_eq!(Encoding::from_layout(encoding.layout()), Some(encoding));
        }
        assert_eq!(Encoding::from_layout(PixelLayout::Nv12), None);
    }

    #[test]
    fn capabilities_are_sorted_and_deduplicated() {
        let caps = Capabilities {
            resolutions: vec![
                Resolution::new(1280, 720),
                Resolution::new(640, 480),
                Resolution::new(1280, 720),
            ],
            formats: vec!["YUYV".into(), "Jpeg".into(), "YUYV".into()],
        }
        .normalize();

        assert_eq!(
            caps.resolutions,
            vec![Resolution::new(640, 480), Resolution::new(1280, 720)]
        );
        assert_eq!(caps.formats, vec!["YUYV".to_string(), "Jpeg".to_string()]);
    }
}
