// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Kernel ABI for the VSP filter.
//!
//! Hand-maintained mirrors of the structures in `linux/videodev2.h`,
//! `linux/v4l2-subdev.h`, `linux/media.h` and `linux/dma-buf.h`, together
//! with `nix` ioctl wrappers for the handful of requests the filter issues.
//! Layouts follow the 64-bit and 32-bit Linux ABIs; unions that contain
//! pointers in the kernel headers are aligned with a zero-length
//! `c_ulong` array.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(clippy::missing_safety_doc)]

/// Implements `Default` as the all-zero bit pattern, which is how every
/// one of these structures is initialised before an ioctl.
macro_rules! zeroed_default {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Default for $ty {
                fn default() -> Self {
                    // SAFETY: plain-old-data kernel structure, all-zero is valid.
                    unsafe { std::mem::zeroed() }
                }
            }
        )*
    };
}
pub(crate) use zeroed_default;

mod dma_buf;
mod media;
mod subdev;
mod videodev2;

pub use dma_buf::*;
pub use media::*;
pub use subdev::*;
pub use videodev2::*;

/// Builds a little-endian fourcc code.
pub const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}
