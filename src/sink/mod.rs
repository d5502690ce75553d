mod convert;
mod layout;

pub use convert::{decode, rgb_to_yuv};
#[cfg(test)]
pub use convert::frame_len;
pub use layout::PixelLayout;

use crate::capture::RawFrame;
use image::RgbImage;
use std::sync::mpsc::{self, Receiver, Sender};

/// Receives raw buffers from a camera driver and forwards decoded images.
///
/// A sink has exactly one listener: the receiving half of the channel
/// created by [`FrameSink::channel`]. Drivers call [`FrameSink::present`]
/// on their own delivery thread, once per buffer, without rate limiting.
pub struct FrameSink {
    listener: Sender<RgbImage>,
}

impl FrameSink {
    pub fn channel() -> (FrameSink, Receiver<RgbImage>) {
        let (listener, frames) = mpsc::channel();
        (FrameSink { listener }, frames)
    }

    /// Every layout this sink can decode. Drivers must negotiate one of these.
    pub fn supported_layouts() -> &'static [PixelLayout] {
        &PixelLayout::ALL
    }

    pub fn accepts(layout: PixelLayout) -> bool {
        Self::supported_layouts().contains(&layout)
    }

    /// Decode `frame` and hand the image to the listener.
    ///
    /// Returns `false`, emitting nothing, when the buffer is invalid or the
    /// listener has gone away.
    pub fn present(&self, frame: &RawFrame) -> bool {
        let _span = tracing::trace_span!("present", layout = %frame.layout).entered();

        let Some(image) = decode(frame) else {
            tracing::debug!(
                "Dropping invalid {} buffer ({}x{}, {} bytes)",
                frame.layout,
                frame.width,
                frame.height,
                frame.data.len()
            );
            return false;
        };

        self.listener.send(image).is_ok()
    }
}
