// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! `linux/media.h` subset: entity and link enumeration, link setup.

use libc::c_char;

pub const MEDIA_ENT_ID_FLAG_NEXT: u32 = 1 << 31;

pub const MEDIA_LNK_FL_ENABLED: u32 = 1 << 0;
pub const MEDIA_LNK_FL_IMMUTABLE: u32 = 1 << 1;
pub const MEDIA_LNK_FL_DYNAMIC: u32 = 1 << 2;

pub const MEDIA_PAD_FL_SINK: u32 = 1 << 0;
pub const MEDIA_PAD_FL_SOURCE: u32 = 1 << 1;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct media_entity_desc {
    pub id: u32,
    pub name: [c_char; 32],
    pub type_: u32,
    pub revision: u32,
    pub flags: u32,
    pub group_id: u32,
    pub pads: u16,
    pub links: u16,
    pub reserved: [u32; 4],
    /// `dev.major`/`dev.minor` or driver specific data.
    pub raw: [u8; 184],
}

impl media_entity_desc {
    /// Entity name up to the first NUL.
    pub fn name_str(&self) -> String {
        let bytes: Vec<u8> = self
            .name
            .iter()
            .take_while(|c| **c != 0)
            .map(|c| *c as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct media_pad_desc {
    pub entity: u32,
    pub index: u16,
    pub flags: u32,
    pub reserved: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct media_link_desc {
    pub source: media_pad_desc,
    pub sink: media_pad_desc,
    pub flags: u32,
    pub reserved: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct media_links_enum {
    pub entity: u32,
    pub pads: *mut media_pad_desc,
    pub links: *mut media_link_desc,
    pub reserved: [u32; 4],
}

crate::zeroed_default!(media_entity_desc, media_pad_desc, media_link_desc, media_links_enum);

nix::ioctl_readwrite!(media_ioc_enum_entities, b'|', 0x01, media_entity_desc);
nix::ioctl_readwrite!(media_ioc_enum_links, b'|', 0x02, media_links_enum);
nix::ioctl_readwrite!(media_ioc_setup_link, b'|', 0x03, media_link_desc);
