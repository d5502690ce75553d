use super::OutputSink;
use anyhow::Result;
use image::RgbImage;
use std::time::{Duration, Instant};

const REPORT_EVERY: u64 = 30;

/// Surface that only counts frames and logs the measured rate.
pub struct StatsSurface {
    frames: u64,
    window_start: Instant,
    resolution: (u32, u32),
}

impl StatsSurface {
    pub fn new() -> Self {
        Self {
            frames: 0,
            window_start: Instant::now(),
            resolution: (0, 0),
        }
    }

    fn report(&mut self) {
        let elapsed = self.window_start.elapsed();
        let fps = REPORT_EVERY as f64 / elapsed.max(Duration::from_millis(1)).as_secs_f64();
        tracing::info!(
            "Frame {}: {}x{}, fps={:.1}",
            self.frames,
            self.resolution.0,
            self.resolution.1,
            fps
        );
        self.window_start = Instant::now();
    }
}

impl Default for StatsSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for StatsSurface {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        self.resolution = frame.dimensions();
        self.frames += 1;
        if self.frames % REPORT_EVERY == 0 {
            self.report();
        }
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_count_and_last_frame_size() {
        let mut surface = StatsSurface::new();
        assert_eq!(surface.resolution(), (0, 0));

        surface.write_frame(&RgbImage::new(4, 2)).expect("write");
        surface.write_frame(&RgbImage::new(8, 6)).expect("write");

        assert_eq!(surface.frames, 2);
        assert_eq!(surface.resolution(), (8, 6));
    }
}
