mod loopback;
mod stats;

pub use loopback::V4L2Output;
pub use stats::StatsSurface;

use anyhow::Result;
use image::RgbImage;

/// Display surface that live frames are rendered onto.
pub trait OutputSink {
    /// Show a frame
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Size of the surface; follows the last frame for surfaces without a fixed size
    fn resolution(&self) -> (u32, u32);
}
