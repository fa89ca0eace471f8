// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Four-character codes as used by V4L2 pixel formats.
#![forbid(unsafe_code)]

use crate::Error;
use core::{fmt, str::FromStr};

/// A V4L2 pixel format code, stored in the kernel's little-endian packing.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(u32);

impl FourCC {
    pub const fn new(code: &[u8; 4]) -> Self {
        FourCC(vspfilter_sys::fourcc(code[0], code[1], code[2], code[3]))
    }

    pub const fn from_code(code: u32) -> Self {
        FourCC(code)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl From<u32> for FourCC {
    fn from(val: u32) -> FourCC {
        FourCC(val)
    }
}

impl From<FourCC> for u32 {
    fn from(val: FourCC) -> Self {
        val.0
    }
}

impl FromStr for FourCC {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| Error::ConfigInvalid(format!("fourcc must be 4 characters: {}", s)))?;
        Ok(FourCC::new(&bytes))
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.bytes();
        match core::str::from_utf8(&b) {
            Ok(s) => f.write_str(s),
            // format!() panics on fmt::Error, so escape instead
            Err(_) => b
                .iter()
                .try_for_each(|c| write!(f, "{}", core::ascii::escape_default(*c))),
        }
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FourCC")
            .field(&format_args!("{}", self))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_str() {
        let cc: FourCC = "NM12".parse().unwrap();
        assert_eq!(cc.as_u32(), vspfilter_sys::V4L2_PIX_FMT_NV12M);
        assert_eq!(cc.to_string(), "NM12");
    }

    #[test]
    fn test_bad_length() {
        assert!("NV1".parse::<FourCC>().is_err());
        assert!("NV123".parse::<FourCC>().is_err());
    }

    #[test]
    fn test_unprintable() {
        let cc = FourCC::from(0x00ff_4142);
        assert_eq!(cc.to_string(), "BA\\xff\\x00");
        assert_eq!(format!("{:?}", cc), "FourCC(BA\\xff\\x00)");
    }
}
