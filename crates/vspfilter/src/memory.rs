// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Frame buffers handed to the filter.
//!
//! A [`Buffer`] is one video frame in one of three kinds of memory:
//!
//! | Memory | Origin | Reaches the device as |
//! |--------|--------|-----------------------|
//! | [`Memory::DmaBuf`] | another hardware producer | imported dma-buf |
//! | [`Memory::Pooled`] | a [`crate::pool::BufferPool`] | MMAP index or dma-buf |
//! | [`Memory::Host`] | plain process memory | copy into a pool buffer, or USERPTR |

use crate::{
    pool::PoolBuffer,
    video::{PlaneLayout, VideoInfo, VideoMeta},
    Error,
};
use dma_buf::DmaBuf;
use memmap2::{MmapMut, MmapOptions};
use nix::errno::Errno;
use std::{
    fmt,
    os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd},
};
use vspfilter_sys as sys;

/// Page-aligned anonymous memory.
#[derive(Debug)]
pub struct HostMemory {
    map: MmapMut,
}

impl HostMemory {
    pub fn new(len: usize) -> Result<Self, Error> {
        if len == 0 {
            return Err(Error::InvalidBuffer("zero sized host buffer".into()));
        }
        Ok(HostMemory {
            map: MmapMut::map_anon(len)?,
        })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }
}

/// Backing store of a [`Buffer`].
pub enum Memory {
    /// One dma-buf per plane
    DmaBuf(Vec<DmaBuf>),
    Pooled(PoolBuffer),
    Host(HostMemory),
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Memory::DmaBuf(planes) => {
                let fds: Vec<_> = planes.iter().map(|p| p.as_raw_fd()).collect();
                f.debug_tuple("DmaBuf").field(&fds).finish()
            }
            Memory::Pooled(buf) => f.debug_tuple("Pooled").field(buf).finish(),
            Memory::Host(mem) => f.debug_tuple("Host").field(&mem.len()).finish(),
        }
    }
}

/// A video frame plus its optional plane layout.
#[derive(Debug)]
pub struct Buffer {
    memory: Memory,
    meta: Option<VideoMeta>,
}

impl Buffer {
    /// Host memory sized and laid out for `info`.
    pub fn alloc_host(info: &VideoInfo) -> Result<Self, Error> {
        let layout = info.default_layout()?;
        Ok(Buffer {
            memory: Memory::Host(HostMemory::new(layout.total_size()?)?),
            meta: Some(layout.meta()),
        })
    }

    pub fn from_host(memory: HostMemory, meta: Option<VideoMeta>) -> Self {
        Buffer {
            memory: Memory::Host(memory),
            meta,
        }
    }

    pub fn from_dmabufs(planes: Vec<DmaBuf>, meta: Option<VideoMeta>) -> Self {
        Buffer {
            memory: Memory::DmaBuf(planes),
            meta,
        }
    }

    pub fn from_pool(buffer: PoolBuffer) -> Self {
        let meta = Some(buffer.meta().clone());
        Buffer {
            memory: Memory::Pooled(buffer),
            meta,
        }
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn meta(&self) -> Option<&VideoMeta> {
        self.meta.as_ref()
    }

    pub fn set_meta(&mut self, meta: Option<VideoMeta>) {
        self.meta = meta;
    }

    /// Host bytes, `None` unless the buffer is host memory.
    pub fn host_slice(&self) -> Option<&[u8]> {
        match &self.memory {
            Memory::Host(mem) => Some(mem.as_slice()),
            _ => None,
        }
    }

    pub fn host_slice_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.memory {
            Memory::Host(mem) => Some(mem.as_mut_slice()),
            _ => None,
        }
    }

    /// Gives back the pool buffer, if this frame wraps one.
    pub fn into_pool_buffer(self) -> Option<PoolBuffer> {
        match self.memory {
            Memory::Pooled(buf) => Some(buf),
            _ => None,
        }
    }

    /// Plane layout from the attached meta, or the default one for `info`.
    pub fn layout(&self, info: &VideoInfo) -> Result<PlaneLayout, Error> {
        match &self.meta {
            Some(meta) => PlaneLayout::from_meta(info.entry()?, info.height, meta),
            None => info.default_layout(),
        }
    }
}

fn sync(fd: BorrowedFd<'_>, flags: u64) -> Result<(), Error> {
    let req = sys::dma_buf_sync { flags };
    match unsafe { sys::dma_buf_ioctl_sync(fd.as_raw_fd(), &req) } {
        Ok(_) => Ok(()),
        // not a dma-buf exporter that implements CPU access sync
        Err(Errno::ENOTTY) => Ok(()),
        Err(errno) => Err(Error::rejected(
            "DMA_BUF_IOCTL_SYNC",
            format!("fd {}", fd.as_raw_fd()),
            errno,
        )),
    }
}

/// CPU mapping of one dma-buf plane, bracketed by dma-buf sync calls.
pub struct PlaneMap {
    map: MmapMut,
    fd: OwnedFd,
    flags: u64,
}

impl PlaneMap {
    /// Maps the first `len` bytes of `buf`. `write` requests write access.
    pub fn new(buf: &DmaBuf, len: usize, write: bool) -> Result<Self, Error> {
        if len == 0 {
            return Err(Error::InvalidBuffer("cannot map an empty plane".into()));
        }
        // SAFETY: the dma-buf is open for the whole call.
        let borrowed = unsafe { BorrowedFd::borrow_raw(buf.as_raw_fd()) };
        let fd = borrowed.try_clone_to_owned()?;
        // SAFETY: the mapping keeps its own descriptor; the frame is not
        // resized while mapped.
        let map = unsafe { MmapOptions::new().len(len).map_mut(&fd) }.map_err(|err| {
            log::warn!("mmap of {} bytes failed: {}", len, err);
            Error::InvalidBuffer(format!("cannot map plane: {}", err))
        })?;
        let flags = if write {
            sys::DMA_BUF_SYNC_RW
        } else {
            sys::DMA_BUF_SYNC_READ
        };
        sync(fd.as_fd(), sys::DMA_BUF_SYNC_START | flags)?;
        Ok(PlaneMap { map, fd, flags })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for PlaneMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaneMap")
            .field("fd", &self.fd.as_raw_fd())
            .field("len", &self.map.len())
            .finish()
    }
}

impl Drop for PlaneMap {
    fn drop(&mut self) {
        if let Err(err) = sync(self.fd.as_fd(), sys::DMA_BUF_SYNC_END | self.flags) {
            log::warn!("ending CPU access failed: {}", err);
        }
    }
}

/// Copies `rows` rows of `row_bytes` between two strided planes.
pub(crate) fn copy_plane(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_bytes: usize,
    rows: usize,
) -> Result<(), Error> {
    if rows == 0 || row_bytes == 0 {
        return Ok(());
    }
    let src_needed = src_stride * (rows - 1) + row_bytes;
    let dst_needed = dst_stride * (rows - 1) + row_bytes;
    if src.len() < src_needed || dst.len() < dst_needed || src_stride < row_bytes || dst_stride < row_bytes {
        return Err(Error::InvalidBuffer(format!(
            "plane copy of {} rows x {} bytes does not fit ({} -> {} bytes)",
            rows,
            row_bytes,
            src.len(),
            dst.len()
        )));
    }
    for row in 0..rows {
        let s = row * src_stride;
        let d = row * dst_stride;
        dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
    }
    Ok(())
}
