/// Pixel layouts a raw driver buffer can arrive in.
///
/// Names describe the byte order in memory, e.g. `Bgra32` is B, G, R, A.
/// 16-bit packed RGB and `Gray16` are little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelLayout {
    Rgb24,
    Bgr24,
    Rgbx32,
    Bgrx32,
    Rgba32,
    Bgra32,
    Argb32,
    Rgba32Premultiplied,
    Bgra32Premultiplied,
    Argb32Premultiplied,
    Rgb565,
    Bgr565,
    Rgb555,
    Bgr555,
    Gray8,
    Gray16,
    Yuyv,
    Uyvy,
    Yvyu,
    Nv12,
    Nv21,
    Yuv420p,
    Yv12,
    Yuv444,
    Ayuv444,
    Jpeg,
}

impl PixelLayout {
    pub const ALL: [PixelLayout; 26] = [
        PixelLayout::Rgb24,
        PixelLayout::Bgr24,
        PixelLayout::Rgbx32,
        PixelLayout::Bgrx32,
        PixelLayout::Rgba32,
        PixelLayout::Bgra32,
        PixelLayout::Argb32,
        PixelLayout::Rgba32Premultiplied,
        PixelLayout::Bgra32Premultiplied,
        PixelLayout::Argb32Premultiplied,
        PixelLayout::Rgb565,
        PixelLayout::Bgr565,
        PixelLayout::Rgb555,
        PixelLayout::Bgr555,
        PixelLayout::Gray8,
        PixelLayout::Gray16,
        PixelLayout::Yuyv,
        PixelLayout::Uyvy,
        PixelLayout::Yvyu,
        PixelLayout::Nv12,
        PixelLayout::Nv21,
        PixelLayout::Yuv420p,
        PixelLayout::Yv12,
        PixelLayout::Yuv444,
        PixelLayout::Ayuv444,
        PixelLayout::Jpeg,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PixelLayout::Rgb24 => "RGB24",
            PixelLayout::Bgr24 => "BGR24",
            PixelLayout::Rgbx32 => "RGBX32",
            PixelLayout::Bgrx32 => "BGRX32",
            PixelLayout::Rgba32 => "RGBA32",
            PixelLayout::Bgra32 => "BGRA32",
            PixelLayout::Argb32 => "ARGB32",
            PixelLayout::Rgba32Premultiplied => "RGBA32_Premultiplied",
            PixelLayout::Bgra32Premultiplied => "BGRA32_Premultiplied",
            PixelLayout::Argb32Premultiplied => "ARGB32_Premultiplied",
            PixelLayout::Rgb565 => "RGB565",
            PixelLayout::Bgr565 => "BGR565",
            PixelLayout::Rgb555 => "RGB555",
            PixelLayout::Bgr555 => "BGR555",
            PixelLayout::Gray8 => "Y8",
            PixelLayout::Gray16 => "Y16",
            PixelLayout::Yuyv => "YUYV",
            PixelLayout::Uyvy => "UYVY",
            PixelLayout::Yvyu => "YVYU",
            PixelLayout::Nv12 => "NV12",
            PixelLayout::Nv21 => "NV21",
            PixelLayout::Yuv420p => "YUV420P",
            PixelLayout::Yv12 => "YV12",
            PixelLayout::Yuv444 => "YUV444",
            PixelLayout::Ayuv444 => "AYUV444",
            PixelLayout::Jpeg => "Jpeg",
        }
    }

    pub fn is_compressed(self) -> bool {
        matches!(self, PixelLayout::Jpeg)
    }

    /// Bytes per pixel for packed layouts, `None` for planar and compressed ones.
    pub fn packed_bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelLayout::Gray8 => Some(1),
            PixelLayout::Rgb565
            | PixelLayout::Bgr565
            | PixelLayout::Rgb555
            | PixelLayout::Bgr555
            | PixelLayout::Gray16
            | PixelLayout::Yuyv
            | PixelLayout::Uyvy
            | PixelLayout::Yvyu => Some(2),
            PixelLayout::Rgb24 | PixelLayout::Bgr24 | PixelLayout::Yuv444 => Some(3),
            PixelLayout::Rgbx32
            | PixelLayout::Bgrx32
            | PixelLayout::Rgba32
            | PixelLayout::Bgra32
            | PixelLayout::Argb32
            | PixelLayout::Rgba32Premultiplied
            | PixelLayout::Bgra32Premultiplied
            | PixelLayout::Argb32Premultiplied
            | PixelLayout::Ayuv444 => Some(4),
            PixelLayout::Nv12
            | PixelLayout::Nv21
            | PixelLayout::Yuv420p
            | PixelLayout::Yv12
            | PixelLayout::Jpeg => None,
        }
    }

    /// V4L2 four character code for this layout.
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            PixelLayout::Rgb24 => *b"RGB3",
            PixelLayout::Bgr24 => *b"BGR3",
            PixelLayout::Rgbx32 => *b"XB24",
            PixelLayout::Bgrx32 => *b"XR24",
            PixelLayout::Rgba32 => *b"AB24",
            PixelLayout::Bgra32 => *b"AR24",
            PixelLayout::Argb32 => *b"BA24",
            PixelLayout::Rgba32Premultiplied => *b"AB24",
            PixelLayout::Bgra32Premultiplied => *b"AR24",
            PixelLayout::Argb32Premultiplied => *b"BA24",
            PixelLayout::Rgb565 => *b"RGBP",
            PixelLayout::Bgr565 => *b"BGRP",
            PixelLayout::Rgb555 => *b"RGBO",
            PixelLayout::Bgr555 => *b"BGRO",
            PixelLayout::Gray8 => *b"GREY",
            PixelLayout::Gray16 => *b"Y16 ",
            PixelLayout::Yuyv => *b"YUYV",
            PixelLayout::Uyvy => *b"UYVY",
            PixelLayout::Yvyu => *b"YVYU",
            PixelLayout::Nv12 => *b"NV12",
            PixelLayout::Nv21 => *b"NV21",
            PixelLayout::Yuv420p => *b"YU12",
            PixelLayout::Yv12 => *b"YV12",
            PixelLayout::Yuv444 => *b"YUV3",
            PixelLayout::Ayuv444 => *b"AYUV",
            PixelLayout::Jpeg => *b"MJPG",
        }
    }

    /// Maps a V4L2 four character code onto a layout. Premultiplied variants
    /// have no code of their own and are never returned.
    pub fn from_fourcc(code: &[u8; 4]) -> Option<PixelLayout> {
        let layout = match code {
            b"MJPG" | b"JPEG" => PixelLayout::Jpeg,
            b"RGB3" => PixelLayout::Rgb24,
            b"BGR3" => PixelLayout::Bgr24,
            b"XB24" => PixelLayout::Rgbx32,
            b"XR24" => PixelLayout::Bgrx32,
            b"AB24" => PixelLayout::Rgba32,
            b"AR24" => PixelLayout::Bgra32,
            b"BA24" => PixelLayout::Argb32,
            b"RGBP" => PixelLayout::Rgb565,
            b"BGRP" => PixelLayout::Bgr565,
            b"RGBO" => PixelLayout::Rgb555,
            b"BGRO" => PixelLayout::Bgr555,
            b"GREY" => PixelLayout::Gray8,
            b"Y16 " => PixelLayout::Gray16,
            b"YUYV" => PixelLayout::Yuyv,
            b"UYVY" => PixelLayout::Uyvy,
            b"YVYU" => PixelLayout::Yvyu,
            b"NV12" => PixelLayout::Nv12,
            b"NV21" => PixelLayout::Nv21,
            b"YU12" => PixelLayout::Yuv420p,
            b"YV12" => PixelLayout::Yv12,
            b"YUV3" => PixelLayout::Yuv444,
            b"AYUV" => PixelLayout::Ayuv444,
            _ => return None,
        };
        Some(layout)
    }
}

impl std::fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::PixelLayout;

    #[test]
    fn fourcc_mapping_is_consistent_for_straight_alpha_layouts() {
        for layout in PixelLayout::ALL {
            let premultiplied = matches!(
                layout,
                PixelLayout::Rgba32Premultiplied
                    | PixelLayout::Bgra32Premultiplied
                    | PixelLayout::Argb32Premultiplied
            );
            if premultiplied {
                continue;
            }
            assert_eq!(PixelLayout::from_fourcc(&layout.fourcc()), Some(layout));
        }
    }

    #[test]
    fn unknown_fourcc_is_rejected() {
        assert_eq!(PixelLayout::from_fourcc(b"H264"), None);
    }

    #[test]
    fn only_jpeg_is_compressed() {
        let compressed: Vec<_> = PixelLayout::ALL
            .into_iter()
            .filter(|layout| layout.is_compressed())
            .collect();
        assert_eq!(compressed, vec![PixelLayout::Jpeg]);
    }
}
