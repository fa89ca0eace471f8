// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Per-frame buffer strategy.
//!
//! For every frame and side, [`select`] picks how the caller's buffer
//! reaches the device, and [`prepare_input`] / [`prepare_output`] turn it
//! into a [`FrameDescriptor`] for `VIDIOC_QBUF`.
//!
//! | Caller memory | `IoMode::Auto` | `IoMode::UserPtr` |
//! |---------------|----------------|-------------------|
//! | buffer of this side's pool | [`Plan::Pooled`] | [`Plan::UserPtr`] |
//! | other pool buffer or dma-buf | [`Plan::Import`] | [`Plan::UserPtr`] |
//! | host memory | [`Plan::CopyToPool`] | [`Plan::UserPtr`] |

use crate::{
    config::IoMode,
    format::FormatEntry,
    memory::{copy_plane, Buffer, Memory, PlaneMap},
    pool::{BufferPool, PoolBuffer},
    session,
    v4l2::MemoryMode,
    video::{PlaneLayout, VideoInfo},
    Error,
};
use dma_buf::DmaBuf;
use std::os::fd::AsRawFd;
use vspfilter_sys as sys;

/// How one frame reaches the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Hand the frame's dma-bufs to the device
    Import,
    /// Queue the frame's own pool index
    Pooled,
    /// Copy between the frame and a buffer of the side's pool
    CopyToPool,
    /// Hand the device host pointers into the frame
    UserPtr,
}

impl Plan {
    /// Queue memory mode the plan needs.
    pub fn memory(self) -> MemoryMode {
        match self {
            Plan::Import => MemoryMode::DmaBuf,
            Plan::Pooled | Plan::CopyToPool => MemoryMode::Mmap,
            Plan::UserPtr => MemoryMode::UserPtr,
        }
    }

    pub fn needs_pool(self) -> bool {
        matches!(self, Plan::Pooled | Plan::CopyToPool)
    }
}

/// Picks the plan for `buffer` on a side running `mode` with `pool`.
pub fn select(mode: IoMode, buffer: &Buffer, pool: Option<&BufferPool>) -> Plan {
    if mode == IoMode::UserPtr {
        return Plan::UserPtr;
    }
    match buffer.memory() {
        Memory::Pooled(buf) => match pool {
            Some(pool) if pool.owns(buf) && !pool.is_orphaned() => Plan::Pooled,
            _ => Plan::Import,
        },
        Memory::DmaBuf(_) => Plan::Import,
        Memory::Host(_) => Plan::CopyToPool,
    }
}

/// One imported plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaBufPlane {
    pub fd: i32,
    pub length: u32,
    pub bytesused: u32,
}

/// One host-pointer plane, starting on a page boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserPtrPlane {
    pub userptr: usize,
    pub length: u32,
    pub data_offset: u32,
    pub bytesused: u32,
}

/// A frame as the device sees it for one `VIDIOC_QBUF`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDescriptor {
    DmaBuf(Vec<DmaBufPlane>),
    Mmap { index: u32, sizes: Vec<u32> },
    UserPtr(Vec<UserPtrPlane>),
}

impl FrameDescriptor {
    pub fn memory(&self) -> MemoryMode {
        match self {
            FrameDescriptor::DmaBuf(_) => MemoryMode::DmaBuf,
            FrameDescriptor::Mmap { .. } => MemoryMode::Mmap,
            FrameDescriptor::UserPtr(_) => MemoryMode::UserPtr,
        }
    }

    /// Buffer index to queue. Imported and host frames share index 0.
    pub fn index(&self) -> u32 {
        match self {
            FrameDescriptor::Mmap { index, .. } => *index,
            FrameDescriptor::DmaBuf(_) | FrameDescriptor::UserPtr(_) => 0,
        }
    }

    pub fn n_planes(&self) -> usize {
        match self {
            FrameDescriptor::DmaBuf(planes) => planes.len(),
            FrameDescriptor::Mmap { sizes, .. } => sizes.len(),
            FrameDescriptor::UserPtr(planes) => planes.len(),
        }
    }

    /// Plane array for `VIDIOC_QBUF`.
    pub fn to_planes(&self) -> Vec<sys::v4l2_plane> {
        match self {
            FrameDescriptor::DmaBuf(planes) => planes
                .iter()
                .map(|p| {
                    let mut plane = sys::v4l2_plane {
                        bytesused: p.bytesused,
                        length: p.length,
                        ..Default::default()
                    };
                    plane.m.fd = p.fd;
                    plane
                })
                .collect(),
            FrameDescriptor::Mmap { sizes, .. } => sizes
                .iter()
                .map(|size| sys::v4l2_plane {
                    bytesused: *size,
                    length: *size,
                    ..Default::default()
                })
                .collect(),
            FrameDescriptor::UserPtr(planes) => planes
                .iter()
                .map(|p| {
                    let mut plane = sys::v4l2_plane {
                        bytesused: p.bytesused,
                        length: p.length,
                        data_offset: p.data_offset,
                        ..Default::default()
                    };
                    plane.m.userptr = p.userptr as libc::c_ulong;
                    plane
                })
                .collect(),
        }
    }
}

/// A descriptor plus whatever must outlive it until the frame is dequeued.
///
/// Descriptors carry raw descriptors and addresses into the caller's frame;
/// the frame must stay alive and in place until then.
#[derive(Debug)]
pub struct Prepared {
    pub descriptor: FrameDescriptor,
    pub plan: Plan,
    staging: Option<PoolBuffer>,
    maps: Vec<PlaneMap>,
}

impl Prepared {
    fn new(descriptor: FrameDescriptor, plan: Plan) -> Self {
        Prepared {
            descriptor,
            plan,
            staging: None,
            maps: Vec::new(),
        }
    }

    /// Pool buffer standing in for the caller's frame.
    pub fn staging(&self) -> Option<&PoolBuffer> {
        self.staging.as_ref()
    }
}

fn n_planes_checked(entry: &FormatEntry, count: usize, what: &str) -> Result<(), Error> {
    if count < entry.n_planes {
        return Err(Error::InvalidBuffer(format!(
            "{} has {} planes, {} needs {}",
            what, count, entry.format, entry.n_planes
        )));
    }
    Ok(())
}

fn dmabuf_planes(
    buffer: &Buffer,
    entry: &FormatEntry,
    lengths: &[u32],
    input: bool,
) -> Result<Vec<DmaBufPlane>, Error> {
    let handles: Vec<i32> = match buffer.memory() {
        Memory::DmaBuf(planes) => planes.iter().map(|p| p.as_raw_fd()).collect(),
        Memory::Pooled(buf) => buf.planes().iter().map(|p| p.as_raw_fd()).collect(),
        Memory::Host(_) => {
            return Err(Error::InvalidBuffer(
                "host memory cannot be imported".into(),
            ))
        }
    };
    n_planes_checked(entry, handles.len(), "dma-buf frame")?;
    Ok(handles
        .into_iter()
        .take(entry.n_planes)
        .enumerate()
        .map(|(i, fd)| {
            let length = lengths.get(i).copied().unwrap_or(0);
            if input {
                DmaBufPlane {
                    fd,
                    length,
                    bytesused: length,
                }
            } else {
                // the driver sizes capture planes from the format
                DmaBufPlane {
                    fd,
                    length: 0,
                    bytesused: 0,
                }
            }
        })
        .collect())
}

fn page_align(addr: usize, size: usize, input: bool) -> UserPtrPlane {
    let page = page_size::get();
    let aligned = addr & !(page - 1);
    let data_offset = addr - aligned;
    let length = (data_offset + size + page - 1) & !(page - 1);
    UserPtrPlane {
        userptr: aligned,
        length: length as u32,
        data_offset: data_offset as u32,
        bytesused: if input { (data_offset + size) as u32 } else { 0 },
    }
}

fn userptr_planes(
    buffer: &mut Buffer,
    layout: &PlaneLayout,
    input: bool,
) -> Result<(Vec<UserPtrPlane>, Vec<PlaneMap>), Error> {
    let mut maps = Vec::new();
    let bases: Vec<usize> = match buffer.host_slice_mut() {
        Some(slice) => {
            let needed = layout.total_size()?;
            if needed > slice.len() {
                return Err(Error::InvalidBuffer(format!(
                    "frame of {} bytes is smaller than its layout ({} bytes)",
                    slice.len(),
                    needed
                )));
            }
            let base = slice.as_mut_ptr() as usize;
            layout.offsets.iter().map(|offset| base + offset).collect()
        }
        None => {
            // device memory is reached through a CPU mapping of each plane
            let handles: &[DmaBuf] = match buffer.memory() {
                Memory::DmaBuf(planes) => planes.as_slice(),
                Memory::Pooled(buf) => buf.planes(),
                Memory::Host(_) => &[],
            };
            n_planes_checked_layout(layout, handles.len())?;
            for (plane, size) in handles.iter().zip(&layout.sizes) {
                maps.push(PlaneMap::new(plane, *size, !input)?);
            }
            maps.iter().map(|m| m.as_ptr() as usize).collect()
        }
    };
    let planes = bases
        .iter()
        .zip(&layout.sizes)
        .map(|(addr, size)| page_align(*addr, *size, input))
        .collect();
    Ok((planes, maps))
}

fn n_planes_checked_layout(layout: &PlaneLayout, count: usize) -> Result<(), Error> {
    if count < layout.n_planes() {
        return Err(Error::InvalidBuffer(format!(
            "frame has {} handles for {} planes",
            count,
            layout.n_planes()
        )));
    }
    Ok(())
}

fn pool_of(pool: Option<&BufferPool>) -> Result<&BufferPool, Error> {
    pool.ok_or_else(|| Error::PoolActivationFailed("side has no buffer pool".into()))
}

fn pooled(buffer: &Buffer) -> Result<FrameDescriptor, Error> {
    match buffer.memory() {
        Memory::Pooled(buf) => Ok(FrameDescriptor::Mmap {
            index: buf.index(),
            sizes: buf.sizes().iter().map(|s| *s as u32).collect(),
        }),
        _ => Err(Error::InvalidBuffer("frame is not a pool buffer".into())),
    }
}

fn host_layout(buffer: &Buffer, info: &VideoInfo) -> Result<(PlaneLayout, usize), Error> {
    let layout = buffer.layout(info)?;
    let len = buffer
        .host_slice()
        .map(|s| s.len())
        .ok_or_else(|| Error::InvalidBuffer("frame is not host memory".into()))?;
    let needed = layout.total_size()?;
    if needed > len {
        return Err(Error::InvalidBuffer(format!(
            "frame of {} bytes is smaller than its layout ({} bytes)",
            len, needed
        )));
    }
    Ok((layout, len))
}

/// Builds the input descriptor for `buffer`. `queue_sizes` are the plane
/// sizes the input queue was set to.
pub fn prepare_input(
    plan: Plan,
    buffer: &mut Buffer,
    info: &VideoInfo,
    pool: Option<&BufferPool>,
    queue_sizes: &[u32],
) -> Result<Prepared, Error> {
    let entry = info.entry()?;
    let prepared = match plan {
        Plan::Import => Prepared::new(
            FrameDescriptor::DmaBuf(dmabuf_planes(buffer, entry, queue_sizes, true)?),
            plan,
        ),
        Plan::Pooled => Prepared::new(pooled(buffer)?, plan),
        Plan::CopyToPool => {
            let pool = pool_of(pool)?;
            let (src_layout, _) = host_layout(buffer, info)?;
            let staging = pool.acquire()?;
            let dst_layout = PlaneLayout::from_meta(entry, info.height, staging.meta())?;
            let src = buffer
                .host_slice()
                .ok_or_else(|| Error::InvalidBuffer("frame is not host memory".into()))?;
            for plane in 0..entry.n_planes {
                let size = staging.sizes()[plane];
                let mut map = PlaneMap::new(&staging.planes()[plane], size, true)?;
                copy_plane(
                    &src[src_layout.offsets[plane]..],
                    src_layout.strides[plane] as usize,
                    map.as_mut_slice(),
                    dst_layout.strides[plane] as usize,
                    entry.row_bytes(plane, info.width)? as usize,
                    entry.plane_height(plane, info.height) as usize,
                )?;
            }
            log::trace!("copied input frame into pool buffer {}", staging.index());
            let descriptor = FrameDescriptor::Mmap {
                index: staging.index(),
                sizes: staging.sizes().iter().map(|s| *s as u32).collect(),
            };
            let mut prepared = Prepared::new(descriptor, plan);
            prepared.staging = Some(staging);
            prepared
        }
        Plan::UserPtr => {
            let layout = buffer.layout(info)?;
            let (planes, maps) = userptr_planes(buffer, &layout, true)?;
            let mut prepared = Prepared::new(FrameDescriptor::UserPtr(planes), plan);
            prepared.maps = maps;
            prepared
        }
    };
    log::trace!("input {:?}", prepared.descriptor);
    Ok(prepared)
}

/// Builds the output descriptor for `buffer`.
pub fn prepare_output(
    plan: Plan,
    buffer: &mut Buffer,
    info: &VideoInfo,
    pool: Option<&BufferPool>,
) -> Result<Prepared, Error> {
    let entry = info.entry()?;
    let prepared = match plan {
        Plan::Import => Prepared::new(
            FrameDescriptor::DmaBuf(dmabuf_planes(buffer, entry, &[], false)?),
            plan,
        ),
        Plan::Pooled => Prepared::new(pooled(buffer)?, plan),
        Plan::CopyToPool => {
            let pool = pool_of(pool)?;
            host_layout(buffer, info)?;
            let staging = pool.acquire()?;
            let descriptor = FrameDescriptor::Mmap {
                index: staging.index(),
                sizes: staging.sizes().iter().map(|s| *s as u32).collect(),
            };
            let mut prepared = Prepared::new(descriptor, plan);
            prepared.staging = Some(staging);
            prepared
        }
        Plan::UserPtr => {
            let layout = buffer.layout(info)?;
            let (planes, maps) = userptr_planes(buffer, &layout, false)?;
            let mut prepared = Prepared::new(FrameDescriptor::UserPtr(planes), plan);
            prepared.maps = maps;
            prepared
        }
    };
    log::trace!("output {:?}", prepared.descriptor);
    Ok(prepared)
}

/// Completes a dequeued output frame, copying staged pixels back into
/// `buffer`. Staging buffers return to their pool.
pub fn finish_output(prepared: Prepared, buffer: &mut Buffer, info: &VideoInfo) -> Result<(), Error> {
    let Prepared { staging, maps, .. } = prepared;
    drop(maps);
    let Some(staging) = staging else {
        return Ok(());
    };
    let entry = info.entry()?;
    let (dst_layout, _) = host_layout(buffer, info)?;
    // the device wrote the rounded-down frame
    let (width, height) = session::frame_size(entry, info);
    let src_layout = PlaneLayout::from_meta(entry, height, staging.meta())?;
    let dst = buffer
        .host_slice_mut()
        .ok_or_else(|| Error::InvalidBuffer("frame is not host memory".into()))?;
    for plane in 0..entry.n_planes {
        let map = PlaneMap::new(&staging.planes()[plane], staging.sizes()[plane], false)?;
        copy_plane(
            map.as_slice(),
            src_layout.strides[plane] as usize,
            &mut dst[dst_layout.offsets[plane]..],
            dst_layout.strides[plane] as usize,
            entry.row_bytes(plane, width)? as usize,
            entry.plane_height(plane, height) as usize,
        )?;
    }
    log::trace!("copied pool buffer {} to output frame", staging.index());
    Ok(())
}
