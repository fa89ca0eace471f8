// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! `linux/v4l2-subdev.h` and `linux/media-bus-format.h` subset.

pub const V4L2_SUBDEV_FORMAT_TRY: u32 = 0;
pub const V4L2_SUBDEV_FORMAT_ACTIVE: u32 = 1;

pub const V4L2_SEL_TGT_CROP: u32 = 0x0000;

pub const MEDIA_BUS_FMT_ARGB8888_1X32: u32 = 0x100d;
pub const MEDIA_BUS_FMT_AYUV8_1X32: u32 = 0x2017;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_mbus_framefmt {
    pub width: u32,
    pub height: u32,
    pub code: u32,
    pub field: u32,
    pub colorspace: u32,
    pub ycbcr_enc: u16,
    pub quantization: u16,
    pub xfer_func: u16,
    pub flags: u16,
    pub reserved: [u16; 10],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_subdev_format {
    pub which: u32,
    pub pad: u32,
    pub format: v4l2_mbus_framefmt,
    pub stream: u32,
    pub reserved: [u32; 7],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct v4l2_rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_subdev_selection {
    pub which: u32,
    pub pad: u32,
    pub target: u32,
    pub flags: u32,
    pub r: v4l2_rect,
    pub stream: u32,
    pub reserved: [u32; 7],
}

crate::zeroed_default!(
    v4l2_mbus_framefmt,
    v4l2_subdev_format,
    v4l2_rect,
    v4l2_subdev_selection
);

nix::ioctl_readwrite!(vidioc_subdev_s_fmt, b'V', 5, v4l2_subdev_format);
nix::ioctl_readwrite!(vidioc_subdev_s_selection, b'V', 62, v4l2_subdev_selection);
