use super::layout::PixelLayout;
use crate::capture::RawFrame;
use image::{ImageFormat, RgbImage};

/// Decode a raw driver buffer into an RGB bitmap.
///
/// Returns `None` for empty, zero-sized, short or undecodable buffers.
pub fn decode(frame: &RawFrame) -> Option<RgbImage> {
    if frame.data.is_empty() || frame.width == 0 || frame.height == 0 {
        return None;
    }

    if frame.layout.is_compressed() {
        return decode_jpeg(frame);
    }

    match frame.layout.packed_bytes_per_pixel() {
        Some(_) => decode_packed(frame),
        None => decode_planar(frame),
    }
}

/// Length of a tightly packed buffer of the given layout and size.
/// `None` for compressed layouts or sizes that overflow `usize`.
#[cfg(test)]
pub fn frame_len(layout: PixelLayout, width: u32, height: u32) -> Option<usize> {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let luma = w.checked_mul(h)?;
    match layout {
        PixelLayout::Jpeg => None,
        PixelLayout::Nv12 | PixelLayout::Nv21 => luma.checked_add(w.max(cw * 2).checked_mul(ch)?),
        PixelLayout::Yuv420p | PixelLayout::Yv12 => {
            luma.checked_add(cw.checked_mul(ch)?.checked_mul(2)?)
        }
        _ => packed_row_bytes(layout, w)?.checked_mul(h),
    }
}

fn decode_jpeg(frame: &RawFrame) -> Option<RgbImage> {
    let image = match image::load_from_memory_with_format(&frame.data, ImageFormat::Jpeg) {
        Ok(image) => image.to_rgb8(),
        Err(e) => {
            tracing::debug!("Dropping undecodable jpeg buffer: {}", e);
            return None;
        }
    };

    if image.dimensions() != (frame.width, frame.height) {
        tracing::debug!(
            "Dropping jpeg buffer: decoded {}x{}, declared {}x{}",
            image.width(),
            image.height(),
            frame.width,
            frame.height
        );
        return None;
    }
    Some(image)
}

fn packed_row_bytes(layout: PixelLayout, width: usize) -> Option<usize> {
    match layout {
        PixelLayout::Yuyv | PixelLayout::Uyvy | PixelLayout::Yvyu => width.div_ceil(2).checked_mul(4),
        _ => width.checked_mul(layout.packed_bytes_per_pixel()?),
    }
}

fn stride_or(frame: &RawFrame, packed: usize) -> usize {
    if frame.bytes_per_line == 0 {
        packed
    } else {
        frame.bytes_per_line
    }
}

fn decode_packed(frame: &RawFrame) -> Option<RgbImage> {
    let layout = frame.layout;
    let width = frame.width as usize;
    let height = frame.height as usize;
    let row = packed_row_bytes(layout, width)?;
    let stride = stride_or(frame, row);
    let required = stride.checked_mul(height - 1)?.checked_add(row)?;

    if stride < row || frame.data.len() < required {
        return None;
    }

    let mut out = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let line = &frame.data[y * stride..y * stride + row];
        match layout {
            PixelLayout::Yuyv | PixelLayout::Uyvy | PixelLayout::Yvyu => {
                push_yuv422_row(layout, line, width, &mut out)
            }
            _ => {
                let bpp = layout.packed_bytes_per_pixel()?;
                for px in line.chunks_exact(bpp) {
                    out.extend_from_slice(&packed_to_rgb(layout, px));
                }
            }
        }
    }

    RgbImage::from_raw(frame.width, frame.height, out)
}

fn push_yuv422_row(layout: PixelLayout, line: &[u8], width: usize, out: &mut Vec<u8>) {
    // (y0, u, y1, v) byte positions inside each 4-byte macropixel
    let (y0, u, y1, v) = match layout {
        PixelLayout::Uyvy => (1, 0, 3, 2),
        PixelLayout::Yvyu => (0, 3, 2, 1),
        _ => (0, 1, 2, 3),
    };

    for (i, pair) in line.chunks_exact(4).enumerate() {
        out.extend_from_slice(&yuv_to_rgb(pair[y0], pair[u], pair[v]));
        if 2 * i + 1 < width {
            out.extend_from_slice(&yuv_to_rgb(pair[y1], pair[u], pair[v]));
        }
    }
}

fn packed_to_rgb(layout: PixelLayout, px: &[u8]) -> [u8; 3] {
    match layout {
        PixelLayout::Rgb24 | PixelLayout::Rgbx32 | PixelLayout::Rgba32 => [px[0], px[1], px[2]],
        PixelLayout::Bgr24 | PixelLayout::Bgrx32 | PixelLayout::Bgra32 => [px[2], px[1], px[0]],
        PixelLayout::Argb32 => [px[1], px[2], px[3]],
        PixelLayout::Rgba32Premultiplied => unpremultiply([px[0], px[1], px[2]], px[3]),
        PixelLayout::Bgra32Premultiplied => unpremultiply([px[2], px[1], px[0]], px[3]),
        PixelLayout::Argb32Premultiplied => unpremultiply([px[1], px[2], px[3]], px[0]),
        PixelLayout::Rgb565 => {
            let v = u16::from_le_bytes([px[0], px[1]]);
            [expand5(v >> 11), expand6(v >> 5), expand5(v)]
        }
        PixelLayout::Bgr565 => {
            let v = u16::from_le_bytes([px[0], px[1]]);
            [expand5(v), expand6(v >> 5), expand5(v >> 11)]
        }
        PixelLayout::Rgb555 => {
            let v = u16::from_le_bytes([px[0], px[1]]);
            [expand5(v >> 10), expand5(v >> 5), expand5(v)]
        }
        PixelLayout::Bgr555 => {
            let v = u16::from_le_bytes([px[0], px[1]]);
            [expand5(v), expand5(v >> 5), expand5(v >> 10)]
        }
        PixelLayout::Gray8 => [px[0]; 3],
        PixelLayout::Gray16 => [px[1]; 3],
        PixelLayout::Yuv444 => yuv_to_rgb(px[0], px[1], px[2]),
        PixelLayout::Ayuv444 => yuv_to_rgb(px[1], px[2], px[3]),
        // not packed
        PixelLayout::Yuyv
        | PixelLayout::Uyvy
        | PixelLayout::Yvyu
        | PixelLayout::Nv12
        | PixelLayout::Nv21
        | PixelLayout::Yuv420p
        | PixelLayout::Yv12
        | PixelLayout::Jpeg => [0; 3],
    }
}

fn expand5(v: u16) -> u8 {
    let v = (v & 0x1f) as u8;
    (v << 3) | (v >> 2)
}

fn expand6(v: u16) -> u8 {
    let v = (v & 0x3f) as u8;
    (v << 2) | (v >> 4)
}

fn unpremultiply(rgb: [u8; 3], alpha: u8) -> [u8; 3] {
    if alpha == 0 {
        return [0; 3];
    }
    rgb.map(|c| ((c as u32 * 255 + alpha as u32 / 2) / alpha as u32).min(255) as u8)
}

enum Chroma {
    Interleaved {
        offset: usize,
        stride: usize,
        u_first: bool,
    },
    Planar {
        u: usize,
        v: usize,
        stride: usize,
    },
}

fn decode_planar(frame: &RawFrame) -> Option<RgbImage> {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let luma_stride = stride_or(frame, width);
    if luma_stride < width {
        return None;
    }

    let (cw, ch) = (width.div_ceil(2), height.div_ceil(2));
    let luma_len = luma_stride.checked_mul(height)?;

    let (chroma, required) = match frame.layout {
        PixelLayout::Nv12 | PixelLayout::Nv21 => {
            let stride = luma_stride.max(cw * 2);
            let chroma = Chroma::Interleaved {
                offset: luma_len,
                stride,
                u_first: frame.layout == PixelLayout::Nv12,
            };
            (chroma, luma_len.checked_add(stride.checked_mul(ch)?)?)
        }
        PixelLayout::Yuv420p | PixelLayout::Yv12 => {
            let stride = luma_stride.div_ceil(2).max(cw);
            let plane = stride.checked_mul(ch)?;
            let first = luma_len;
            let second = luma_len.checked_add(plane)?;
            let (u, v) = if frame.layout == PixelLayout::Yuv420p {
                (first, second)
            } else {
                (second, first)
            };
            (Chroma::Planar { u, v, stride }, second.checked_add(plane)?)
        }
        _ => return None,
    };

    if frame.data.len() < required {
        return None;
    }

    let data = &frame.data;
    let mut out = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        for x in 0..width {
            let luma = data[y * luma_stride + x];
            let (cx, cy) = (x / 2, y / 2);
            let (u, v) = match chroma {
                Chroma::Interleaved {
                    offset,
                    stride,
                    u_first,
                } => {
                    let at = offset + cy * stride + cx * 2;
                    if u_first {
                        (data[at], data[at + 1])
                    } else {
                        (data[at + 1], data[at])
                    }
                }
                Chroma::Planar { u, v, stride } => {
                    (data[u + cy * stride + cx], data[v + cy * stride + cx])
                }
            };
            out.extend_from_slice(&yuv_to_rgb(luma, u, v));
        }
    }

    RgbImage::from_raw(frame.width, frame.height, out)
}

/// BT.601 full-range YCbCr to RGB.
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    let r = y + 1.402 * v;
    let g = y - 0.344_136 * u - 0.714_136 * v;
    let b = y + 1.772 * u;

    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    ]
}

/// BT.601 full-range RGB to YCbCr.
pub fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as f32;
    let g = g as f32;
    let b = b as f32;

    let y = (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8;
    let u = (-0.168_736 * r - 0.331_264 * g + 0.5 * b + 128.0)
        .round()
        .clamp(0.0, 255.0) as u8;
    let v = (0.5 * r - 0.418_688 * g - 0.081_312 * b + 128.0)
        .round()
        .clamp(0.0, 255.0) as u8;

    (y, u, v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(layout: PixelLayout, width: u32, height: u32, data: Vec<u8>) -> RawFrame {
        RawFrame {
            layout,
            width,
            height,
            bytes_per_line: 0,
            data,
        }
    }

    #[test]
    fn yuyv_mid_grey_decodes_to_grey() {
        let data = [128, 128, 128, 128].repeat(2);
        let image = decode(&frame(PixelLayout::Yuyv, 2, 2, data)).expect("valid buffer");
        assert_eq!(image.dimensions(), (2, 2));
        for px in image.pixels() {
            assert_eq!(px.0, [128, 128, 128]);
        }
    }

    #[test]
    fn uyvy_and_yuyv_agree_on_the_same_pixels() {
        let (y0, u, y1, v) = (80, 90, 160, 200);
        let yuyv = decode(&frame(PixelLayout::Yuyv, 2, 1, vec![y0, u, y1, v])).expect("yuyv");
        let uyvy = decode(&frame(PixelLayout::Uyvy, 2, 1, vec![u, y0, v, y1])).expect("uyvy");
        assert_eq!(yuyv, uyvy);
    }

    #[test]
    fn rgb565_pure_red() {
        let data = 0xf800u16.to_le_bytes().to_vec();
        let image = decode(&frame(PixelLayout::Rgb565, 1, 1, data)).expect("valid buffer");
        assert_eq!(image.get_pixel(0, 0).0, [255, 0, 0]);
    }

    #[test]
    fn bgra_swaps_channels() {
        let image =
            decode(&frame(PixelLayout::Bgra32, 1, 1, vec![10, 20, 30, 255])).expect("valid buffer");
        assert_eq!(image.get_pixel(0, 0).0, [30, 20, 10]);
    }

    #[test]
    fn premultiplied_alpha_is_undone() {
        let image = decode(&frame(
            PixelLayout::Rgba32Premultiplied,
            1,
            1,
            vec![64, 32, 0, 128],
        ))
        .expect("valid buffer");
        assert_eq!(image.get_pixel(0, 0).0, [128, 64, 0]);
    }

    #[test]
    fn row_padding_is_skipped() {
        let mut data = vec![1, 2, 3, 0xEE, 0xEE];
        data.extend_from_slice(&[4, 5, 6, 0xEE, 0xEE]);
        let mut raw = frame(PixelLayout::Rgb24, 1, 2, data);
        raw.bytes_per_line = 5;

        let image = decode(&raw).expect("valid buffer");
        assert_eq!(image.get_pixel(0, 0).0, [1, 2, 3]);
        assert_eq!(image.get_pixel(0, 1).0, [4, 5, 6]);
    }

    #[test]
    fn nv12_and_nv21_differ_only_in_chroma_order() {
        let luma = vec![100; 4];
        let mut nv12 = luma.clone();
        nv12.extend_from_slice(&[60, 200]);
        let mut nv21 = luma;
        nv21.extend_from_slice(&[200, 60]);

        let a = decode(&frame(PixelLayout::Nv12, 2, 2, nv12)).expect("nv12");
        let b = decode(&frame(PixelLayout::Nv21, 2, 2, nv21)).expect("nv21");
        assert_eq!(a, b);
        assert_eq!(a.get_pixel(1, 1).0, yuv_to_rgb(100, 60, 200));
    }

    #[test]
    fn yv12_swaps_chroma_planes() {
        let mut i420 = vec![50; 4];
        i420.extend_from_slice(&[30, 220]);
        let mut yv12 = vec![50; 4];
        yv12.extend_from_slice(&[220, 30]);

        let a = decode(&frame(PixelLayout::Yuv420p, 2, 2, i420)).expect("i420");
        let b = decode(&frame(PixelLayout::Yv12, 2, 2, yv12)).expect("yv12");
        assert_eq!(a, b);
    }

    #[test]
    fn short_buffers_are_rejected() {
        for layout in PixelLayout::ALL {
            let Some(len) = frame_len(layout, 4, 4) else {
                continue;
            };
            let raw = frame(layout, 4, 4, vec![0; len - 1]);
            assert!(decode(&raw).is_none(), "{layout} accepted a short buffer");
        }
    }

    #[test]
    fn oversized_dimensions_are_rejected() {
        for layout in PixelLayout::ALL {
            let raw = frame(layout, u32::MAX, u32::MAX, vec![0; 16]);
            assert!(decode(&raw).is_none(), "{layout} accepted a huge frame");
        }

        let mut padded = frame(PixelLayout::Rgb24, 1, 3, vec![0; 16]);
        padded.bytes_per_line = usize::MAX / 2 + 1;
        assert!(decode(&padded).is_none());

        let mut planar = frame(PixelLayout::Nv12, 2, u32::MAX, vec![0; 16]);
        planar.bytes_per_line = usize::MAX / 4;
        assert!(decode(&planar).is_none());
    }

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, image::Rgb([90, 140, 60]));
        let mut data = Vec::new();
        image
            .write_with_encoder(image::codecs::jpeg::JpegEncoder::new(&mut data))
            .expect("jpeg encode");
        data
    }

    #[test]
    fn jpeg_must_match_declared_size() {
        let data = jpeg(32, 16);

        let image = decode(&frame(PixelLayout::Jpeg, 32, 16, data.clone())).expect("matching jpeg");
        assert_eq!(image.dimensions(), (32, 16));

        assert!(decode(&frame(PixelLayout::Jpeg, 640, 480, data.clone())).is_none());
        assert!(decode(&frame(PixelLayout::Jpeg, 0, 0, data)).is_none());
    }

    #[test]
    fn empty_and_zero_sized_buffers_are_rejected() {
        assert!(decode(&frame(PixelLayout::Rgb24, 2, 2, Vec::new())).is_none());
        assert!(decode(&frame(PixelLayout::Rgb24, 0, 2, vec![0; 12])).is_none());
        assert!(decode(&frame(PixelLayout::Jpeg, 2, 2, vec![0xFF, 0xD8, 0x00])).is_none());
    }

    #[test]
    fn rgb_yuv_round_trip_is_close() {
        let (y, u, v) = rgb_to_yuv(200, 100, 50);
        let [r, g, b] = yuv_to_rgb(y, u, v);
        assert!((r as i16 - 200).abs() <= 2);
        assert!((g as i16 - 100).abs() <= 2);
        assert!((b as i16 - 50).abs() <= 2);
    }
}
