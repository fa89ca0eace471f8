// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Pixel format translation table.
//!
//! Maps the abstract [`PixelFormat`]s the filter accepts onto the V4L2
//! multi-planar pixel code used on the video queues, the media-bus code used
//! on the subdevice pads and the number of memory planes.
//!
//! | Format | V4L2 pixel code | Bus code | Planes |
//! |--------|-----------------|----------|--------|
//! | `RGB16` | `RGBP` | ARGB8888_1X32 | 1 |
//! | `RGB` | `RGB3` | ARGB8888_1X32 | 1 |
//! | `BGR` | `BGR3` | ARGB8888_1X32 | 1 |
//! | `ARGB` | `BA24` | ARGB8888_1X32 | 1 |
//! | `xRGB` | `BX24` | ARGB8888_1X32 | 1 |
//! | `BGRA` | `AR24` | ARGB8888_1X32 | 1 |
//! | `BGRx` | `XR24` | ARGB8888_1X32 | 1 |
//! | `I420` | `YM12` | AYUV8_1X32 | 3 |
//! | `NV12` | `NM12` | AYUV8_1X32 | 2 |
//! | `NV21` | `NM21` | AYUV8_1X32 | 2 |
//! | `NV16` | `NM16` | AYUV8_1X32 | 2 |
//! | `UYVY` | `UYVY` | AYUV8_1X32 | 1 |
//! | `YUY2` | `YUYV` | AYUV8_1X32 | 1 |

use crate::{fourcc::FourCC, Error};
use std::{fmt, str::FromStr};
use vspfilter_sys as sys;

/// Largest frame width or height the VSP read and write units handle.
pub const MAX_DIMENSION: u32 = 8190;

/// Pixel formats the VSP can read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgb16,
    Rgb,
    Bgr,
    Argb,
    Xrgb,
    Bgra,
    Bgrx,
    I420,
    Nv12,
    Nv21,
    Nv16,
    Uyvy,
    Yuy2,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 13] = [
        PixelFormat::Rgb16,
        PixelFormat::Rgb,
        PixelFormat::Bgr,
        PixelFormat::Argb,
        PixelFormat::Xrgb,
        PixelFormat::Bgra,
        PixelFormat::Bgrx,
        PixelFormat::I420,
        PixelFormat::Nv12,
        PixelFormat::Nv21,
        PixelFormat::Nv16,
        PixelFormat::Uyvy,
        PixelFormat::Yuy2,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Rgb16 => "RGB16",
            PixelFormat::Rgb => "RGB",
            PixelFormat::Bgr => "BGR",
            PixelFormat::Argb => "ARGB",
            PixelFormat::Xrgb => "xRGB",
            PixelFormat::Bgra => "BGRA",
            PixelFormat::Bgrx => "BGRx",
            PixelFormat::I420 => "I420",
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Nv21 => "NV21",
            PixelFormat::Nv16 => "NV16",
            PixelFormat::Uyvy => "UYVY",
            PixelFormat::Yuy2 => "YUY2",
        }
    }

    pub fn is_yuv(&self) -> bool {
        !matches!(
            self,
            PixelFormat::Rgb16
                | PixelFormat::Rgb
                | PixelFormat::Bgr
                | PixelFormat::Argb
                | PixelFormat::Xrgb
                | PixelFormat::Bgra
                | PixelFormat::Bgrx
        )
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PixelFormat::ALL
            .iter()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| Error::UnsupportedFormat(s.to_string()))
    }
}

/// Layout of one memory plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneGeometry {
    /// Bytes per horizontal sample of this plane
    pub pixel_stride: u32,
    /// log2 of the horizontal subsampling
    pub x_shift: u32,
    /// log2 of the vertical subsampling
    pub y_shift: u32,
}

const fn plane(pixel_stride: u32, x_shift: u32, y_shift: u32) -> PlaneGeometry {
    PlaneGeometry {
        pixel_stride,
        x_shift,
        y_shift,
    }
}

const UNUSED: PlaneGeometry = plane(0, 0, 0);

/// One row of the translation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatEntry {
    pub format: PixelFormat,
    pub fourcc: FourCC,
    pub mbus_code: u32,
    pub n_planes: usize,
    planes: [PlaneGeometry; 3],
    x_align: u32,
    y_align: u32,
}

macro_rules! entry {
    ($fmt:ident, $pix:ident, $code:ident, $x_align:expr, $y_align:expr, [$($plane:expr),+]) => {{
        let planes = [$($plane),+];
        let mut padded = [UNUSED; 3];
        let mut i = 0;
        while i < planes.len() {
            padded[i] = planes[i];
            i += 1;
        }
        FormatEntry {
            format: PixelFormat::$fmt,
            fourcc: FourCC::from_code(sys::$pix),
            mbus_code: sys::$code,
            n_planes: planes.len(),
            planes: padded,
            x_align: $x_align,
            y_align: $y_align,
        }
    }};
}

static TABLE: [FormatEntry; 13] = [
    entry!(Rgb16, V4L2_PIX_FMT_RGB565, MEDIA_BUS_FMT_ARGB8888_1X32, 1, 1, [plane(2, 0, 0)]),
    entry!(Rgb, V4L2_PIX_FMT_RGB24, MEDIA_BUS_FMT_ARGB8888_1X32, 1, 1, [plane(3, 0, 0)]),
    entry!(Bgr, V4L2_PIX_FMT_BGR24, MEDIA_BUS_FMT_ARGB8888_1X32, 1, 1, [plane(3, 0, 0)]),
    entry!(Argb, V4L2_PIX_FMT_ARGB32, MEDIA_BUS_FMT_ARGB8888_1X32, 1, 1, [plane(4, 0, 0)]),
    entry!(Xrgb, V4L2_PIX_FMT_XRGB32, MEDIA_BUS_FMT_ARGB8888_1X32, 1, 1, [plane(4, 0, 0)]),
    entry!(Bgra, V4L2_PIX_FMT_ABGR32, MEDIA_BUS_FMT_ARGB8888_1X32, 1, 1, [plane(4, 0, 0)]),
    entry!(Bgrx, V4L2_PIX_FMT_XBGR32, MEDIA_BUS_FMT_ARGB8888_1X32, 1, 1, [plane(4, 0, 0)]),
    entry!(
        I420,
        V4L2_PIX_FMT_YUV420M,
        MEDIA_BUS_FMT_AYUV8_1X32,
        2,
        2,
        [plane(1, 0, 0), plane(1, 1, 1), plane(1, 1, 1)]
    ),
    entry!(Nv12, V4L2_PIX_FMT_NV12M, MEDIA_BUS_FMT_AYUV8_1X32, 2, 2, [plane(1, 0, 0), plane(2, 1, 1)]),
    entry!(Nv21, V4L2_PIX_FMT_NV21M, MEDIA_BUS_FMT_AYUV8_1X32, 2, 2, [plane(1, 0, 0), plane(2, 1, 1)]),
    entry!(Nv16, V4L2_PIX_FMT_NV16M, MEDIA_BUS_FMT_AYUV8_1X32, 2, 1, [plane(1, 0, 0), plane(2, 1, 0)]),
    entry!(Uyvy, V4L2_PIX_FMT_UYVY, MEDIA_BUS_FMT_AYUV8_1X32, 2, 1, [plane(2, 0, 0)]),
    entry!(Yuy2, V4L2_PIX_FMT_YUYV, MEDIA_BUS_FMT_AYUV8_1X32, 2, 1, [plane(2, 0, 0)]),
];

/// Looks up the hardware codes for `format`.
pub fn lookup(format: PixelFormat) -> Result<&'static FormatEntry, Error> {
    TABLE
        .iter()
        .find(|e| e.format == format)
        .ok_or_else(|| Error::UnsupportedFormat(format.to_string()))
}

/// Reverse lookup by V4L2 pixel code.
pub fn lookup_fourcc(fourcc: FourCC) -> Result<&'static FormatEntry, Error> {
    TABLE
        .iter()
        .find(|e| e.fourcc == fourcc)
        .ok_or_else(|| Error::UnsupportedFormat(fourcc.to_string()))
}

/// The whole table, in declaration order.
pub fn entries() -> &'static [FormatEntry] {
    &TABLE
}

impl FormatEntry {
    pub fn plane(&self, index: usize) -> Option<&PlaneGeometry> {
        self.planes[..self.n_planes].get(index)
    }

    pub fn planes(&self) -> &[PlaneGeometry] {
        &self.planes[..self.n_planes]
    }

    /// Minimum bytes per row of `plane` at `width` pixels, 0 for a plane
    /// the format does not have.
    pub fn row_bytes(&self, plane: usize, width: u32) -> Result<u32, Error> {
        let Some(p) = self.plane(plane) else {
            return Ok(0);
        };
        div_round_up(width, p.x_shift)
            .checked_mul(p.pixel_stride)
            .ok_or_else(|| too_large(self.format, "row", width))
    }

    /// Rows of `plane` at `height` pixels.
    pub fn plane_height(&self, plane: usize, height: u32) -> u32 {
        self.plane(plane)
            .map(|p| div_round_up(height, p.y_shift))
            .unwrap_or(0)
    }

    /// Whether chroma is subsampled horizontally, forcing even widths.
    pub fn needs_even_width(&self) -> bool {
        self.x_align > 1
    }

    /// Whether chroma is subsampled vertically, forcing even heights.
    pub fn needs_even_height(&self) -> bool {
        self.y_align > 1
    }

    pub fn round_down_width(&self, width: u32) -> u32 {
        width - width % self.x_align
    }

    pub fn round_down_height(&self, height: u32) -> u32 {
        height - height % self.y_align
    }

    pub fn round_up_width(&self, width: u32) -> Result<u32, Error> {
        round_up(width, self.x_align).ok_or_else(|| too_large(self.format, "width", width))
    }

    pub fn round_up_height(&self, height: u32) -> Result<u32, Error> {
        round_up(height, self.y_align).ok_or_else(|| too_large(self.format, "height", height))
    }
}

fn div_round_up(value: u32, shift: u32) -> u32 {
    let mask = (1 << shift) - 1;
    (value >> shift) + u32::from(value & mask != 0)
}

fn round_up(value: u32, align: u32) -> Option<u32> {
    match value % align {
        0 => Some(value),
        rem => value.checked_add(align - rem),
    }
}

fn too_large(format: PixelFormat, what: &str, value: u32) -> Error {
    Error::ConfigInvalid(format!("{} {} of {} is out of range", format, what, value))
}
