// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Streaming queue primitives.
//!
//! Thin wrappers over the V4L2 requests the filter issues against its two
//! queues. Every request goes through [`retrying`], every failure is
//! logged once with the request name, the device and the errno, and
//! surfaces as [`Error::DeviceRejected`].

use crate::{
    format::{self, FormatEntry},
    fourcc::FourCC,
    node::VideoNode,
    video::YcbcrParams,
    Error,
};
use dma_buf::DmaBuf;
use nix::errno::Errno;
use std::{fmt, os::fd::FromRawFd};
use vspfilter_sys as sys;

/// One of the two streaming queues of the mem2mem device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    /// Source frames, fed by the filter's input side
    Output,
    /// Converted frames, read by the filter's output side
    Capture,
}

impl Queue {
    pub fn buf_type(self) -> u32 {
        match self {
            Queue::Output => sys::V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE,
            Queue::Capture => sys::V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE,
        }
    }

    /// Capability bit a device must advertise to serve this queue.
    pub fn capability(self) -> u32 {
        match self {
            Queue::Output => sys::V4L2_CAP_VIDEO_OUTPUT_MPLANE,
            Queue::Capture => sys::V4L2_CAP_VIDEO_CAPTURE_MPLANE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Queue::Output => "OUTPUT_MPLANE",
            Queue::Capture => "CAPTURE_MPLANE",
        }
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How buffer memory reaches the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryMode {
    /// Device allocated, addressed by index
    Mmap,
    /// Host pointers
    UserPtr,
    /// Imported dma-buf handles
    DmaBuf,
}

impl MemoryMode {
    pub fn as_raw(self) -> u32 {
        match self {
            MemoryMode::Mmap => sys::V4L2_MEMORY_MMAP,
            MemoryMode::UserPtr => sys::V4L2_MEMORY_USERPTR,
            MemoryMode::DmaBuf => sys::V4L2_MEMORY_DMABUF,
        }
    }
}

impl fmt::Display for MemoryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryMode::Mmap => write!(f, "MMAP"),
            MemoryMode::UserPtr => write!(f, "USERPTR"),
            MemoryMode::DmaBuf => write!(f, "DMABUF"),
        }
    }
}

/// Runs `f` again for as long as it fails with `EINTR`.
pub fn retrying<T>(mut f: impl FnMut() -> nix::Result<T>) -> nix::Result<T> {
    loop {
        match f() {
            Err(Errno::EINTR) => continue,
            res => return res,
        }
    }
}

fn rejected(op: &'static str, node: &dyn VideoNode, queue: Queue, errno: Errno) -> Error {
    if errno == Errno::EBUSY {
        log::error!(
            "{} for {} {} failed: {} (buffers still in use)",
            op,
            node.path().display(),
            queue,
            errno
        );
    } else {
        log::error!(
            "{} for {} {} failed: {}",
            op,
            node.path().display(),
            queue,
            errno
        );
    }
    Error::rejected(op, node.path().display().to_string(), errno)
}

fn c_str(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

/// Identity of one VSP port, decoded from `VIDIOC_QUERYCAP`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardInfo {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    pub capabilities: u32,
    /// IP block name shared by every node of one VSP, e.g. `fe960000.vsp`
    pub ip_name: String,
    /// Entity of this port, e.g. `rpf.0`
    pub entity: String,
}

/// Splits a VSP card string into its IP block and port entity names.
pub fn parse_card(card: &str) -> Result<(String, String), Error> {
    let mut tokens = card.split(' ').filter(|t| !t.is_empty());
    let ip_name = tokens
        .next()
        .ok_or_else(|| Error::ConfigInvalid(format!("empty card name '{}'", card)))?;
    let entity = tokens
        .next()
        .ok_or_else(|| Error::ConfigInvalid(format!("entity name not found in '{}'", card)))?;
    Ok((ip_name.to_string(), entity.to_string()))
}

/// Queries the device and checks it can serve `queue` with streaming I/O.
pub fn query_card(node: &dyn VideoNode, queue: Queue) -> Result<CardInfo, Error> {
    let cap = retrying(|| node.querycap()).map_err(|e| rejected("VIDIOC_QUERYCAP", node, queue, e))?;
    let capabilities = if cap.capabilities & sys::V4L2_CAP_DEVICE_CAPS != 0 {
        cap.device_caps
    } else {
        cap.capabilities
    };

    let wanted = queue.capability() | sys::V4L2_CAP_VIDEO_M2M_MPLANE;
    if capabilities & wanted == 0 {
        log::error!(
            "{} is not suitable device ({:08x} lacks {:08x})",
            node.path().display(),
            capabilities,
            queue.capability()
        );
        return Err(Error::ConfigInvalid(format!(
            "{} has no {} queue",
            node.path().display(),
            queue
        )));
    }
    if capabilities & sys::V4L2_CAP_STREAMING == 0 {
        log::error!("{} does not support streaming i/o", node.path().display());
        return Err(Error::ConfigInvalid(format!(
            "{} does not support streaming i/o",
            node.path().display()
        )));
    }

    let card = c_str(&cap.card);
    let (ip_name, entity) = parse_card(&card)?;
    Ok(CardInfo {
        driver: c_str(&cap.driver),
        bus_info: c_str(&cap.bus_info),
        card,
        capabilities,
        ip_name,
        entity,
    })
}

/// Asks for `count` buffers and returns how many the device granted.
/// A count of 0 releases every buffer of the queue.
pub fn request_buffers(
    node: &dyn VideoNode,
    queue: Queue,
    count: u32,
    memory: MemoryMode,
) -> Result<u32, Error> {
    let mut req = sys::v4l2_requestbuffers {
        count,
        type_: queue.buf_type(),
        memory: memory.as_raw(),
        ..Default::default()
    };
    retrying(|| node.reqbufs(&mut req)).map_err(|e| rejected("VIDIOC_REQBUFS", node, queue, e))?;
    log::debug!(
        "{} {}: requested {} {} buffers, got {}",
        node.path().display(),
        queue,
        count,
        memory,
        req.count
    );
    Ok(req.count)
}

/// Geometry requested from a queue.
#[derive(Debug, Clone)]
pub struct FormatRequest<'a> {
    pub width: u32,
    pub height: u32,
    pub entry: &'a FormatEntry,
    /// Per-plane bytes per line; 0 lets the driver choose
    pub strides: &'a [u32],
    pub queue: Queue,
    pub memory: MemoryMode,
    pub ycbcr: YcbcrParams,
}

/// Geometry the device settled on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCC,
    pub strides: Vec<u32>,
    pub sizes: Vec<u32>,
}

impl Negotiated {
    pub fn n_planes(&self) -> usize {
        self.strides.len()
    }
}

fn build_format(req: &FormatRequest<'_>) -> sys::v4l2_format {
    // BT.709 at full range is never handed to the device
    let ycbcr = YcbcrParams::new(req.ycbcr.encoding, req.ycbcr.quantization);

    let mut pix = sys::v4l2_pix_format_mplane {
        width: req.width,
        height: req.height,
        pixelformat: req.entry.fourcc.as_u32(),
        field: sys::V4L2_FIELD_NONE,
        num_planes: req.entry.n_planes as u8,
        ycbcr_enc: ycbcr.encoding as u8,
        quantization: ycbcr.quantization as u8,
        ..Default::default()
    };
    let mut planes = pix.plane_fmt;
    for (plane, stride) in planes
        .iter_mut()
        .zip(req.strides.iter())
        .take(req.entry.n_planes)
    {
        if *stride > 0 {
            plane.bytesperline = *stride;
        }
    }
    pix.plane_fmt = planes;

    let mut fmt = sys::v4l2_format {
        type_: req.queue.buf_type(),
        ..Default::default()
    };
    fmt.set_pix_mp(pix);
    fmt
}

fn read_back(fmt: &sys::v4l2_format) -> Negotiated {
    let pix = fmt.pix_mp();
    let planes = pix.plane_fmt;
    let num_planes = (pix.num_planes as usize).min(sys::VIDEO_MAX_PLANES);
    Negotiated {
        width: pix.width,
        height: pix.height,
        fourcc: FourCC::from(pix.pixelformat),
        strides: planes[..num_planes].iter().map(|p| p.bytesperline).collect(),
        sizes: planes[..num_planes].iter().map(|p| p.sizeimage).collect(),
    }
}

fn check_fourcc(req: &FormatRequest<'_>, got: &Negotiated) -> Result<(), Error> {
    if got.fourcc != req.entry.fourcc {
        let replaced = format::lookup_fourcc(got.fourcc)
            .map(|e| e.format.to_string())
            .unwrap_or_else(|_| got.fourcc.to_string());
        return Err(Error::UnsupportedFormat(format!(
            "{} ({}) replaced with {} on {}",
            req.entry.format, req.entry.fourcc, replaced, req.queue
        )));
    }
    Ok(())
}

/// Sets the queue format and returns the strides and plane sizes the
/// device actually uses.
pub fn set_format(node: &dyn VideoNode, req: &FormatRequest<'_>) -> Result<Negotiated, Error> {
    let mut fmt = build_format(req);
    retrying(|| node.s_fmt(&mut fmt)).map_err(|e| rejected("VIDIOC_S_FMT", node, req.queue, e))?;
    let got = read_back(&fmt);
    log::debug!(
        "{} {}: {}x{} {} ({} requested, {}) strides {:?} sizes {:?}",
        node.path().display(),
        req.queue,
        got.width,
        got.height,
        got.fourcc,
        req.entry.fourcc,
        req.memory,
        got.strides,
        got.sizes
    );
    check_fourcc(req, &got)?;
    Ok(got)
}

/// Like [`set_format`] but leaves the device untouched.
pub fn try_format(node: &dyn VideoNode, req: &FormatRequest<'_>) -> Result<Negotiated, Error> {
    let mut fmt = build_format(req);
    retrying(|| node.try_fmt(&mut fmt))
        .map_err(|e| rejected("VIDIOC_TRY_FMT", node, req.queue, e))?;
    let got = read_back(&fmt);
    check_fourcc(req, &got)?;
    Ok(got)
}

pub fn stream_on(node: &dyn VideoNode, queue: Queue) -> Result<(), Error> {
    retrying(|| node.streamon(queue.buf_type()))
        .map_err(|e| rejected("VIDIOC_STREAMON", node, queue, e))?;
    log::debug!("{} {}: streaming", node.path().display(), queue);
    Ok(())
}

pub fn stream_off(node: &dyn VideoNode, queue: Queue) -> Result<(), Error> {
    retrying(|| node.streamoff(queue.buf_type()))
        .map_err(|e| rejected("VIDIOC_STREAMOFF", node, queue, e))?;
    log::debug!("{} {}: stopped", node.path().display(), queue);
    Ok(())
}

/// Queues buffer `index` described by `planes`.
pub fn queue_buffer(
    node: &dyn VideoNode,
    queue: Queue,
    memory: MemoryMode,
    index: u32,
    planes: &mut [sys::v4l2_plane],
) -> Result<(), Error> {
    let mut buf = sys::v4l2_buffer {
        index,
        type_: queue.buf_type(),
        memory: memory.as_raw(),
        length: planes.len() as u32,
        ..Default::default()
    };
    buf.m.planes = planes.as_mut_ptr();
    retrying(|| node.qbuf(&mut buf)).map_err(|e| rejected("VIDIOC_QBUF", node, queue, e))?;
    log::trace!("{} {}: queued {} buffer {}", node.path().display(), queue, memory, index);
    Ok(())
}

/// Dequeues the next finished buffer, returning its index and the bytes
/// used per plane.
pub fn dequeue_buffer(
    node: &dyn VideoNode,
    queue: Queue,
    memory: MemoryMode,
    n_planes: usize,
) -> Result<(u32, Vec<u32>), Error> {
    let mut planes = vec![sys::v4l2_plane::default(); n_planes];
    let mut buf = sys::v4l2_buffer {
        type_: queue.buf_type(),
        memory: memory.as_raw(),
        length: n_planes as u32,
        ..Default::default()
    };
    buf.m.planes = planes.as_mut_ptr();
    retrying(|| node.dqbuf(&mut buf)).map_err(|e| rejected("VIDIOC_DQBUF", node, queue, e))?;
    log::trace!(
        "{} {}: dequeued buffer {}",
        node.path().display(),
        queue,
        buf.index
    );
    Ok((buf.index, planes.iter().map(|p| p.bytesused).collect()))
}

/// Exports one plane of an MMAP buffer as a dma-buf.
pub fn export_buffer(
    node: &dyn VideoNode,
    queue: Queue,
    index: u32,
    plane: u32,
) -> Result<DmaBuf, Error> {
    let mut exp = sys::v4l2_exportbuffer {
        type_: queue.buf_type(),
        index,
        plane,
        flags: (libc::O_CLOEXEC | libc::O_RDWR) as u32,
        ..Default::default()
    };
    retrying(|| node.expbuf(&mut exp)).map_err(|e| rejected("VIDIOC_EXPBUF", node, queue, e))?;
    log::trace!(
        "{} {}: exported buffer {} plane {} as fd {}",
        node.path().display(),
        queue,
        index,
        plane,
        exp.fd
    );
    // SAFETY: VIDIOC_EXPBUF returned a new descriptor owned by nobody else.
    Ok(unsafe { DmaBuf::from_raw_fd(exp.fd) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retrying_eintr() {
        let mut calls = 0;
        let res = retrying(|| {
            calls += 1;
            if calls < 3 {
                Err(Errno::EINTR)
            } else {
                Ok(calls)
            }
        });
        assert_eq!(res, Ok(3));
    }

    #[test]
    fn test_retrying_propagates() {
        let mut calls = 0;
        let res: nix::Result<()> = retrying(|| {
            calls += 1;
            Err(Errno::EBUSY)
        });
        assert_eq!(res, Err(Errno::EBUSY));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_parse_card() {
        let (ip, entity) = parse_card("fe960000.vsp rpf.0 input").unwrap();
        assert_eq!(ip, "fe960000.vsp");
        assert_eq!(entity, "rpf.0");
        assert!(matches!(
            parse_card("fe960000.vsp"),
            Err(Error::ConfigInvalid(_))
        ));
        assert!(matches!(parse_card(""), Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn test_build_format_downgrades() {
        let entry = format::lookup(crate::format::PixelFormat::Nv12).unwrap();
        let req = FormatRequest {
            width: 64,
            height: 32,
            entry,
            strides: &[128, 0],
            queue: Queue::Output,
            memory: MemoryMode::DmaBuf,
            ycbcr: YcbcrParams {
                encoding: sys::V4L2_YCBCR_ENC_709,
                quantization: sys::V4L2_QUANTIZATION_FULL_RANGE,
            },
        };
        let fmt = build_format(&req);
        let pix = fmt.pix_mp();
        let (enc, planes, num) = (pix.ycbcr_enc, pix.plane_fmt, pix.num_planes);
        assert_eq!(enc as u32, sys::V4L2_YCBCR_ENC_601);
        assert_eq!(num, 2);
        let (first, second) = (planes[0].bytesperline, planes[1].bytesperline);
        assert_eq!(first, 128);
        assert_eq!(second, 0);
        assert_eq!(fmt.type_, sys::V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE);
    }
}
