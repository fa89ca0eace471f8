// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Negotiated video descriptions and plane layouts.

use crate::{
    format::{self, FormatEntry, PixelFormat},
    Error,
};
use std::fmt;
use vspfilter_sys as sys;

/// Encoding used in place of BT.709 when the range is full. The VSP has
/// no BT.709 full-range matrix, so such streams get BT.601 full-range.
pub const BT709_FULL_RANGE_FALLBACK: u32 = sys::V4L2_YCBCR_ENC_601;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fraction {
    pub num: i32,
    pub den: i32,
}

impl Fraction {
    pub const fn new(num: i32, den: i32) -> Self {
        Fraction { num, den }
    }
}

impl Default for Fraction {
    /// 0/1, a variable frame rate.
    fn default() -> Self {
        Fraction::new(0, 1)
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterlaceMode {
    #[default]
    Progressive,
    Interleaved,
    Mixed,
    Fields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMatrix {
    #[default]
    Unknown,
    Rgb,
    Bt601,
    Bt709,
    Bt2020,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorRange {
    #[default]
    Unknown,
    Full,
    Limited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Colorimetry {
    pub matrix: ColorMatrix,
    pub range: ColorRange,
}

/// Kernel YCbCr encoding and quantization for one side of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YcbcrParams {
    pub encoding: u32,
    pub quantization: u32,
}

impl YcbcrParams {
    /// Pairs `encoding` with `quantization`, substituting
    /// [`BT709_FULL_RANGE_FALLBACK`] for BT.709 at full range.
    pub fn new(encoding: u32, quantization: u32) -> Self {
        let encoding = if encoding == sys::V4L2_YCBCR_ENC_709
            && quantization == sys::V4L2_QUANTIZATION_FULL_RANGE
        {
            log::debug!("BT.709 full range is not supported, using BT.601 full range");
            BT709_FULL_RANGE_FALLBACK
        } else {
            encoding
        };
        YcbcrParams {
            encoding,
            quantization,
        }
    }

    pub fn from_colorimetry(colorimetry: &Colorimetry) -> Self {
        let encoding = match colorimetry.matrix {
            ColorMatrix::Bt601 => sys::V4L2_YCBCR_ENC_601,
            ColorMatrix::Bt709 => sys::V4L2_YCBCR_ENC_709,
            _ => sys::V4L2_YCBCR_ENC_DEFAULT,
        };
        let quantization = match colorimetry.range {
            ColorRange::Full => sys::V4L2_QUANTIZATION_FULL_RANGE,
            ColorRange::Limited => sys::V4L2_QUANTIZATION_LIM_RANGE,
            ColorRange::Unknown => sys::V4L2_QUANTIZATION_DEFAULT,
        };
        YcbcrParams::new(encoding, quantization)
    }
}

impl Default for YcbcrParams {
    fn default() -> Self {
        YcbcrParams {
            encoding: sys::V4L2_YCBCR_ENC_DEFAULT,
            quantization: sys::V4L2_QUANTIZATION_DEFAULT,
        }
    }
}

/// A fully negotiated video format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfo {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub fps: Fraction,
    pub interlace: InterlaceMode,
    pub colorimetry: Colorimetry,
}

impl VideoInfo {
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        VideoInfo {
            format,
            width,
            height,
            fps: Fraction::default(),
            interlace: InterlaceMode::Progressive,
            colorimetry: Colorimetry::default(),
        }
    }

    pub fn with_fps(mut self, num: i32, den: i32) -> Self {
        self.fps = Fraction::new(num, den);
        self
    }

    pub fn with_colorimetry(mut self, matrix: ColorMatrix, range: ColorRange) -> Self {
        self.colorimetry = Colorimetry { matrix, range };
        self
    }

    pub fn with_interlace(mut self, interlace: InterlaceMode) -> Self {
        self.interlace = interlace;
        self
    }

    pub fn entry(&self) -> Result<&'static FormatEntry, Error> {
        format::lookup(self.format)
    }

    /// Checks the description is usable at all.
    pub fn validate(&self) -> Result<(), Error> {
        if self.width == 0
            || self.height == 0
            || self.width > format::MAX_DIMENSION
            || self.height > format::MAX_DIMENSION
        {
            return Err(Error::ConfigInvalid(format!(
                "{}x{} is not a valid frame size",
                self.width, self.height
            )));
        }
        if self.fps.den == 0 {
            return Err(Error::ConfigInvalid("frame rate denominator is 0".into()));
        }
        self.entry().map(|_| ())
    }

    /// Tightly packed layout with each row padded to 4 bytes.
    pub fn default_layout(&self) -> Result<PlaneLayout, Error> {
        let entry = self.entry()?;
        let strides = (0..entry.n_planes)
            .map(|i| {
                entry
                    .row_bytes(i, self.width)?
                    .checked_add(3)
                    .map(|bytes| bytes & !3)
                    .ok_or_else(|| {
                        Error::ConfigInvalid(format!("{} row is out of range", self))
                    })
            })
            .collect::<Result<Vec<u32>, Error>>()?;
        PlaneLayout::new(entry, self.height, &strides)
    }
}

impl fmt::Display for VideoInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} @ {}",
            self.format, self.width, self.height, self.fps
        )
    }
}

/// Per-plane strides and offsets attached to a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMeta {
    pub offsets: Vec<usize>,
    pub strides: Vec<u32>,
}

/// Offsets, strides and sizes of each plane of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneLayout {
    pub strides: Vec<u32>,
    pub offsets: Vec<usize>,
    pub sizes: Vec<usize>,
}

impl PlaneLayout {
    /// Planes laid out back to back.
    pub fn new(entry: &FormatEntry, height: u32, strides: &[u32]) -> Result<Self, Error> {
        let mut offsets = Vec::with_capacity(strides.len());
        let mut sizes = Vec::with_capacity(strides.len());
        let mut total = 0usize;
        for (i, stride) in strides.iter().enumerate() {
            let size = plane_size(entry, i, *stride, height).ok_or_else(|| {
                Error::ConfigInvalid(format!("{} plane {} is too large", entry.format, i))
            })?;
            offsets.push(total);
            sizes.push(size);
            total = total.checked_add(size).ok_or_else(|| {
                Error::ConfigInvalid(format!("{} frame is too large", entry.format))
            })?;
        }
        Ok(PlaneLayout {
            strides: strides.to_vec(),
            offsets,
            sizes,
        })
    }

    /// Layout described by `meta`, sized for `height` rows.
    pub fn from_meta(entry: &FormatEntry, height: u32, meta: &VideoMeta) -> Result<Self, Error> {
        if meta.strides.len() < entry.n_planes || meta.offsets.len() < entry.n_planes {
            return Err(Error::InvalidBuffer(format!(
                "video meta describes {} planes, format needs {}",
                meta.strides.len().min(meta.offsets.len()),
                entry.n_planes
            )));
        }
        let strides = meta.strides[..entry.n_planes].to_vec();
        let offsets = meta.offsets[..entry.n_planes].to_vec();
        let sizes = strides
            .iter()
            .enumerate()
            .map(|(i, s)| {
                plane_size(entry, i, *s, height).ok_or_else(|| {
                    Error::InvalidBuffer(format!("plane {} with stride {} is too large", i, s))
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(PlaneLayout {
            strides,
            offsets,
            sizes,
        })
    }

    pub fn n_planes(&self) -> usize {
        self.strides.len()
    }

    /// Bytes needed to hold every plane.
    pub fn total_size(&self) -> Result<usize, Error> {
        let mut total = 0;
        for (offset, size) in self.offsets.iter().zip(&self.sizes) {
            let end = offset.checked_add(*size).ok_or_else(|| {
                Error::InvalidBuffer(format!("plane at offset {} overflows", offset))
            })?;
            total = total.max(end);
        }
        Ok(total)
    }

    pub fn meta(&self) -> VideoMeta {
        VideoMeta {
            offsets: self.offsets.clone(),
            strides: self.strides.clone(),
        }
    }
}

fn plane_size(entry: &FormatEntry, plane: usize, stride: u32, height: u32) -> Option<usize> {
    (stride as usize).checked_mul(entry.plane_height(plane, height) as usize)
}
