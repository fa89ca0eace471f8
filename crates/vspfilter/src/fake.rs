// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Simulated VSP kernel interface for tests.
//!
//! MMAP buffers are backed by temporary files, so exported handles are real
//! descriptors that can be mapped and passed around like dma-bufs.

use crate::{
    format,
    fourcc::FourCC,
    node::{MediaNode, Platform, SubdevNode, VideoNode},
    v4l2::{MemoryMode, Queue},
    Error,
};
use nix::errno::Errno;
use std::{
    collections::{HashMap, VecDeque},
    fs::File,
    os::{
        fd::{BorrowedFd, IntoRawFd},
        unix::fs::FileExt,
    },
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use vspfilter_sys as sys;

pub const IP: &str = "fe960000.vsp";
pub const FILL: u8 = 0xa5;

fn queue_of(buf_type: u32) -> nix::Result<Queue> {
    match buf_type {
        sys::V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE => Ok(Queue::Output),
        sys::V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE => Ok(Queue::Capture),
        _ => Err(Errno::EINVAL),
    }
}

fn memory_of(raw: u32) -> nix::Result<MemoryMode> {
    match raw {
        sys::V4L2_MEMORY_MMAP => Ok(MemoryMode::Mmap),
        sys::V4L2_MEMORY_USERPTR => Ok(MemoryMode::UserPtr),
        sys::V4L2_MEMORY_DMABUF => Ok(MemoryMode::DmaBuf),
        _ => Err(Errno::EINVAL),
    }
}

fn errno_of(err: std::io::Error) -> Errno {
    Errno::from_raw(err.raw_os_error().unwrap_or(libc::EIO))
}

/// Opens a second handle on a descriptor owned by the caller.
fn dup_file(fd: i32) -> nix::Result<File> {
    if fd < 0 {
        return Err(Errno::EBADF);
    }
    // SAFETY: the caller keeps the descriptor open for the whole call.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    borrowed
        .try_clone_to_owned()
        .map(File::from)
        .map_err(errno_of)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeFormat {
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCC,
    pub strides: Vec<u32>,
    pub sizes: Vec<u32>,
}

#[derive(Debug, Clone, Copy)]
struct QueuedPlane {
    bytesused: u32,
    length: u32,
    fd: i32,
    userptr: u64,
    data_offset: u32,
}

#[derive(Debug)]
struct Queued {
    index: u32,
    planes: Vec<QueuedPlane>,
}

#[derive(Default)]
struct QueueState {
    format: Option<FakeFormat>,
    /// Size asked for by the last S_FMT, before adjustment
    requested: Option<(u32, u32)>,
    memory: Option<MemoryMode>,
    count: u32,
    backing: Vec<Vec<File>>,
    queued: VecDeque<Queued>,
    streaming: bool,
    streamons: usize,
}

struct VideoState {
    queues: HashMap<Queue, QueueState>,
    max_buffers: u32,
    hang: bool,
    substitute: Option<FourCC>,
    last_input: Option<Vec<Vec<u8>>>,
    reqbufs_log: Vec<(Queue, u32, MemoryMode)>,
    s_fmt_count: usize,
    expbuf_count: usize,
    fail_expbuf: bool,
}

/// A fake multi-planar video node.
pub struct FakeVideo {
    path: PathBuf,
    card: String,
    caps: u32,
    state: Mutex<VideoState>,
}

impl FakeVideo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_card(
            path,
            &format!("{} rpf.0 input", IP),
            sys::V4L2_CAP_VIDEO_M2M_MPLANE | sys::V4L2_CAP_STREAMING,
        )
    }

    pub fn input(path: impl Into<PathBuf>) -> Self {
        Self::with_card(
            path,
            &format!("{} rpf.0 input", IP),
            sys::V4L2_CAP_VIDEO_OUTPUT_MPLANE | sys::V4L2_CAP_STREAMING,
        )
    }

    pub fn output(path: impl Into<PathBuf>) -> Self {
        Self::with_card(
            path,
            &format!("{} wpf.0 output", IP),
            sys::V4L2_CAP_VIDEO_CAPTURE_MPLANE | sys::V4L2_CAP_STREAMING,
        )
    }

    pub fn with_card(path: impl Into<PathBuf>, card: &str, caps: u32) -> Self {
        FakeVideo {
            path: path.into(),
            card: card.to_string(),
            caps,
            state: Mutex::new(VideoState {
                queues: HashMap::new(),
                max_buffers: 32,
                hang: false,
                substitute: None,
                last_input: None,
                reqbufs_log: Vec::new(),
                s_fmt_count: 0,
                expbuf_count: 0,
                fail_expbuf: false,
            }),
        }
    }

    pub fn set_max_buffers(&self, max: u32) {
        self.state.lock().unwrap().max_buffers = max;
    }

    /// Makes the device stop completing frames.
    pub fn set_hang(&self, hang: bool) {
        self.state.lock().unwrap().hang = hang;
    }

    /// Makes S_FMT answer with `fourcc` whatever was asked for.
    pub fn substitute(&self, fourcc: Option<FourCC>) {
        self.state.lock().unwrap().substitute = fourcc;
    }

    pub fn format(&self, queue: Queue) -> Option<((u32, u32), FourCC, Vec<u32>)> {
        let state = self.state.lock().unwrap();
        state
            .queues
            .get(&queue)
            .and_then(|q| q.format.clone())
            .map(|f| ((f.width, f.height), f.fourcc, f.strides))
    }

    pub fn sizes(&self, queue: Queue) -> Vec<u32> {
        let state = self.state.lock().unwrap();
        state
            .queues
            .get(&queue)
            .and_then(|q| q.format.as_ref())
            .map(|f| f.sizes.clone())
            .unwrap_or_default()
    }

    pub fn buffer_count(&self, queue: Queue) -> u32 {
        let state = self.state.lock().unwrap();
        state.queues.get(&queue).map(|q| q.count).unwrap_or(0)
    }

    pub fn memory(&self, queue: Queue) -> Option<MemoryMode> {
        let state = self.state.lock().unwrap();
        state.queues.get(&queue).and_then(|q| q.memory)
    }

    pub fn is_streaming(&self, queue: Queue) -> bool {
        let state = self.state.lock().unwrap();
        state.queues.get(&queue).map(|q| q.streaming).unwrap_or(false)
    }

    pub fn streamons(&self, queue: Queue) -> usize {
        let state = self.state.lock().unwrap();
        state.queues.get(&queue).map(|q| q.streamons).unwrap_or(0)
    }

    pub fn queued(&self, queue: Queue) -> usize {
        let state = self.state.lock().unwrap();
        state.queues.get(&queue).map(|q| q.queued.len()).unwrap_or(0)
    }

    pub fn reqbufs_log(&self) -> Vec<(Queue, u32, MemoryMode)> {
        self.state.lock().unwrap().reqbufs_log.clone()
    }

    pub fn s_fmt_count(&self) -> usize {
        self.state.lock().unwrap().s_fmt_count
    }

    /// Width and height passed to the last S_FMT on `queue`.
    pub fn requested_size(&self, queue: Queue) -> Option<(u32, u32)> {
        let state = self.state.lock().unwrap();
        state.queues.get(&queue).and_then(|q| q.requested)
    }

    pub fn expbuf_count(&self) -> usize {
        self.state.lock().unwrap().expbuf_count
    }

    /// Makes EXPBUF fail with ENOMEM.
    pub fn set_fail_expbuf(&self, fail: bool) {
        self.state.lock().unwrap().fail_expbuf = fail;
    }

    /// Plane contents seen by the last QBUF on the output queue.
    pub fn last_input(&self) -> Option<Vec<Vec<u8>>> {
        self.state.lock().unwrap().last_input.clone()
    }

    fn negotiate(substitute: Option<FourCC>, fmt: &mut sys::v4l2_format) -> FakeFormat {
        let mut pix = fmt.pix_mp();
        let (width, height, pixelformat) = (pix.width, pix.height, pix.pixelformat);
        let requested = FourCC::from(pixelformat);
        let entry = substitute
            .and_then(|f| format::lookup_fourcc(f).ok())
            .or_else(|| format::lookup_fourcc(requested).ok())
            .unwrap_or(&format::entries()[8]);

        // clamped to the hardware range like the driver does
        let min_width = entry.round_up_width(1).unwrap_or(1);
        let min_height = entry.round_up_height(1).unwrap_or(1);
        let width = entry
            .round_down_width(width.min(format::MAX_DIMENSION))
            .max(min_width);
        let height = entry
            .round_down_height(height.min(format::MAX_DIMENSION))
            .max(min_height);
        let mut planes = pix.plane_fmt;
        let mut strides = Vec::new();
        let mut sizes = Vec::new();
        for (i, plane) in planes.iter_mut().enumerate().take(entry.n_planes) {
            let min = (entry.row_bytes(i, width).unwrap_or(0) + 15) & !15;
            let asked = plane.bytesperline;
            let stride = asked.max(min);
            let size = stride * entry.plane_height(i, height);
            plane.bytesperline = stride;
            plane.sizeimage = size;
            strides.push(stride);
            sizes.push(size);
        }
        pix.plane_fmt = planes;
        pix.width = width;
        pix.height = height;
        pix.pixelformat = entry.fourcc.as_u32();
        pix.num_planes = entry.n_planes as u8;
        fmt.set_pix_mp(pix);
        FakeFormat {
            width,
            height,
            fourcc: entry.fourcc,
            strides,
            sizes,
        }
    }

    fn snapshot(q: &QueueState, queued: &Queued) -> nix::Result<Vec<Vec<u8>>> {
        let mut planes = Vec::new();
        for (p, plane) in queued.planes.iter().enumerate() {
            let len = plane.bytesused.saturating_sub(plane.data_offset) as usize;
            let mut data = vec![0u8; len];
            match q.memory {
                Some(MemoryMode::Mmap) => {
                    let file = &q.backing[queued.index as usize][p];
                    file.read_exact_at(&mut data, 0).map_err(errno_of)?;
                }
                Some(MemoryMode::DmaBuf) => {
                    let file = dup_file(plane.fd)?;
                    file.read_exact_at(&mut data, plane.data_offset as u64)
                        .map_err(errno_of)?;
                }
                Some(MemoryMode::UserPtr) => {
                    let ptr = (plane.userptr + plane.data_offset as u64) as *const u8;
                    // SAFETY: USERPTR planes point at memory the caller keeps
                    // mapped until the buffer is dequeued.
                    data.copy_from_slice(unsafe { std::slice::from_raw_parts(ptr, len) });
                }
                None => return Err(Errno::EINVAL),
            }
            planes.push(data);
        }
        Ok(planes)
    }

    fn fill(q: &QueueState, queued: &Queued) -> nix::Result<Vec<u32>> {
        let sizes = q.format.as_ref().map(|f| f.sizes.clone()).unwrap_or_default();
        let mut used = Vec::new();
        for (p, plane) in queued.planes.iter().enumerate() {
            let size = sizes.get(p).copied().unwrap_or(0);
            match q.memory {
                Some(MemoryMode::Mmap) => {
                    let file = &q.backing[queued.index as usize][p];
                    file.write_all_at(&vec![FILL; size as usize], 0)
                        .map_err(errno_of)?;
                }
                Some(MemoryMode::DmaBuf) => {
                    let file = dup_file(plane.fd)?;
                    file.write_all_at(&vec![FILL; size as usize], 0)
                        .map_err(errno_of)?;
                }
                Some(MemoryMode::UserPtr) => {
                    let room = plane.length.saturating_sub(plane.data_offset);
                    let len = size.min(room) as usize;
                    let ptr = (plane.userptr + plane.data_offset as u64) as *mut u8;
                    // SAFETY: see `snapshot`.
                    unsafe { std::ptr::write_bytes(ptr, FILL, len) };
                }
                None => return Err(Errno::EINVAL),
            }
            used.push(size);
        }
        Ok(used)
    }
}

impl VideoNode for FakeVideo {
    fn path(&self) -> &Path {
        &self.path
    }

    fn querycap(&self) -> nix::Result<sys::v4l2_capability> {
        let mut cap = sys::v4l2_capability::default();
        for (dst, src) in cap.card.iter_mut().zip(self.card.bytes()) {
            *dst = src;
        }
        for (dst, src) in cap.driver.iter_mut().zip(b"vsp1".iter()) {
            *dst = *src;
        }
        cap.capabilities = self.caps | sys::V4L2_CAP_DEVICE_CAPS;
        cap.device_caps = self.caps;
        Ok(cap)
    }

    fn s_fmt(&self, fmt: &mut sys::v4l2_format) -> nix::Result<()> {
        let queue = queue_of(fmt.type_)?;
        let mut state = self.state.lock().unwrap();
        let substitute = state.substitute;
        let q = state.queues.entry(queue).or_default();
        if q.count > 0 {
            return Err(Errno::EBUSY);
        }
        let pix = fmt.pix_mp();
        q.requested = Some((pix.width, pix.height));
        q.format = Some(Self::negotiate(substitute, fmt));
        state.s_fmt_count += 1;
        Ok(())
    }

    fn try_fmt(&self, fmt: &mut sys::v4l2_format) -> nix::Result<()> {
        queue_of(fmt.type_)?;
        let substitute = self.state.lock().unwrap().substitute;
        Self::negotiate(substitute, fmt);
        Ok(())
    }

    fn reqbufs(&self, req: &mut sys::v4l2_requestbuffers) -> nix::Result<()> {
        let queue = queue_of(req.type_)?;
        let memory = memory_of(req.memory)?;
        let mut state = self.state.lock().unwrap();
        let max = state.max_buffers;
        state.reqbufs_log.push((queue, req.count, memory));
        let q = state.queues.entry(queue).or_default();
        if q.streaming {
            return Err(Errno::EBUSY);
        }
        q.backing.clear();
        q.queued.clear();
        q.count = 0;
        q.memory = Some(memory);
        if req.count == 0 {
            return Ok(());
        }
        let fmt = q.format.clone().ok_or(Errno::EINVAL)?;
        let count = req.count.min(max);
        if memory == MemoryMode::Mmap {
            for _ in 0..count {
                let mut planes = Vec::new();
                for size in &fmt.sizes {
                    let file = tempfile::tempfile().map_err(errno_of)?;
                    file.set_len(*size as u64).map_err(errno_of)?;
                    planes.push(file);
                }
                q.backing.push(planes);
            }
        }
        q.count = count;
        req.count = count;
        Ok(())
    }

    fn qbuf(&self, buf: &mut sys::v4l2_buffer) -> nix::Result<()> {
        let queue = queue_of(buf.type_)?;
        let memory = memory_of(buf.memory)?;
        // SAFETY: multi-planar buffers always carry a plane array of
        // `length` entries.
        let raw = unsafe { std::slice::from_raw_parts(buf.m.planes, buf.length as usize) };
        let planes: Vec<QueuedPlane> = raw
            .iter()
            .map(|p| {
                // SAFETY: reading plain integers out of the plane union.
                let (fd, userptr) = unsafe { (p.m.fd, p.m.userptr as u64) };
                QueuedPlane {
                    bytesused: p.bytesused,
                    length: p.length,
                    fd,
                    userptr,
                    data_offset: p.data_offset,
                }
            })
            .collect();

        let mut state = self.state.lock().unwrap();
        let q = state.queues.entry(queue).or_default();
        if q.memory != Some(memory) || buf.index >= q.count {
            return Err(Errno::EINVAL);
        }
        if q.queued.iter().any(|b| b.index == buf.index) {
            return Err(Errno::EINVAL);
        }
        let n_planes = q.format.as_ref().map(|f| f.sizes.len()).unwrap_or(0);
        if planes.len() != n_planes {
            return Err(Errno::EINVAL);
        }
        if memory == MemoryMode::DmaBuf {
            for plane in &planes {
                dup_file(plane.fd)?;
            }
        }
        let queued = Queued {
            index: buf.index,
            planes,
        };
        let snapshot = if queue == Queue::Output {
            Some(Self::snapshot(q, &queued)?)
        } else {
            None
        };
        q.queued.push_back(queued);
        if snapshot.is_some() {
            state.last_input = snapshot;
        }
        Ok(())
    }

    fn dqbuf(&self, buf: &mut sys::v4l2_buffer) -> nix::Result<()> {
        let queue = queue_of(buf.type_)?;
        let mut state = self.state.lock().unwrap();
        let q = state.queues.entry(queue).or_default();
        if !q.streaming {
            return Err(Errno::EINVAL);
        }
        let queued = q.queued.pop_front().ok_or(Errno::EAGAIN)?;
        let used = if queue == Queue::Capture {
            Self::fill(q, &queued)?
        } else {
            queued.planes.iter().map(|p| p.bytesused).collect()
        };
        buf.index = queued.index;
        // SAFETY: see `qbuf`.
        let planes = unsafe { std::slice::from_raw_parts_mut(buf.m.planes, buf.length as usize) };
        for (plane, bytes) in planes.iter_mut().zip(used) {
            plane.bytesused = bytes;
        }
        Ok(())
    }

    fn expbuf(&self, exp: &mut sys::v4l2_exportbuffer) -> nix::Result<()> {
        let queue = queue_of(exp.type_)?;
        let mut state = self.state.lock().unwrap();
        state.expbuf_count += 1;
        if state.fail_expbuf {
            return Err(Errno::ENOMEM);
        }
        let q = state.queues.get(&queue).ok_or(Errno::EINVAL)?;
        if q.memory != Some(MemoryMode::Mmap) {
            return Err(Errno::EINVAL);
        }
        let file = q
            .backing
            .get(exp.index as usize)
            .and_then(|planes| planes.get(exp.plane as usize))
            .ok_or(Errno::EINVAL)?;
        exp.fd = file.try_clone().map_err(errno_of)?.into_raw_fd();
        Ok(())
    }

    fn streamon(&self, buf_type: u32) -> nix::Result<()> {
        let queue = queue_of(buf_type)?;
        let mut state = self.state.lock().unwrap();
        let q = state.queues.entry(queue).or_default();
        if q.count == 0 {
            return Err(Errno::EINVAL);
        }
        q.streaming = true;
        q.streamons += 1;
        Ok(())
    }

    fn streamoff(&self, buf_type: u32) -> nix::Result<()> {
        let queue = queue_of(buf_type)?;
        let mut state = self.state.lock().unwrap();
        let q = state.queues.entry(queue).or_default();
        q.streaming = false;
        q.queued.clear();
        Ok(())
    }

    fn wait_ready(&self, _timeout: Duration) -> nix::Result<bool> {
        let state = self.state.lock().unwrap();
        if state.hang {
            return Ok(false);
        }
        Ok(state
            .queues
            .get(&Queue::Capture)
            .map(|q| q.streaming && !q.queued.is_empty())
            .unwrap_or(false))
    }
}

#[derive(Debug, Clone)]
struct FakeEntity {
    id: u32,
    name: String,
    pads: u16,
}

#[derive(Debug, Clone, Copy)]
struct FakeLink {
    source: (u32, u16),
    sink: (u32, u16),
    flags: u32,
}

#[derive(Default)]
struct MediaState {
    entities: Vec<FakeEntity>,
    links: Vec<FakeLink>,
    log: Vec<(String, String, bool)>,
    setups: usize,
}

impl MediaState {
    fn name(&self, id: u32) -> String {
        self.entities
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.name.clone())
            .unwrap_or_default()
    }

    fn id(&self, name: &str) -> Option<u32> {
        self.entities.iter().find(|e| e.name == name).map(|e| e.id)
    }

    fn add_entity(&mut self, name: &str, pads: u16) -> u32 {
        if let Some(id) = self.id(name) {
            return id;
        }
        let id = self.entities.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        self.entities.push(FakeEntity {
            id,
            name: name.to_string(),
            pads,
        });
        id
    }

    fn link(&mut self, source: (u32, u16), sink: (u32, u16), flags: u32) {
        self.links.push(FakeLink {
            source,
            sink,
            flags,
        });
    }
}

/// A fake media graph. Clones share the same graph.
#[derive(Clone, Default)]
pub struct FakeMedia {
    state: Arc<Mutex<MediaState>>,
}

impl FakeMedia {
    /// The graph of one VSP with a single input port, a scaler and a single
    /// output port.
    pub fn vsp(ip: &str) -> Self {
        let mut state = MediaState::default();
        let input = state.add_entity(&format!("{} rpf.0 input", ip), 1);
        let rpf = state.add_entity(&format!("{} rpf.0", ip), 2);
        let uds = state.add_entity(&format!("{} uds.0", ip), 2);
        let wpf = state.add_entity(&format!("{} wpf.0", ip), 2);
        let output = state.add_entity(&format!("{} wpf.0 output", ip), 1);
        let fixed = sys::MEDIA_LNK_FL_ENABLED | sys::MEDIA_LNK_FL_IMMUTABLE;
        state.link((input, 0), (rpf, 0), fixed);
        state.link((rpf, 1), (uds, 0), 0);
        state.link((rpf, 1), (wpf, 0), 0);
        state.link((uds, 1), (wpf, 0), 0);
        state.link((wpf, 1), (output, 0), 0);
        FakeMedia {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn has_entity(&self, name: &str) -> bool {
        self.state.lock().unwrap().id(name).is_some()
    }

    /// Adds an enabled immutable link from `source` to `sink`, creating the
    /// sink entity if needed.
    pub fn add_immutable_link(&self, source: &str, sink: &str) {
        let mut state = self.state.lock().unwrap();
        let src = state.add_entity(source, 2);
        let dst = state.add_entity(sink, 1);
        state.link(
            (src, 1),
            (dst, 0),
            sys::MEDIA_LNK_FL_ENABLED | sys::MEDIA_LNK_FL_IMMUTABLE,
        );
    }

    pub fn is_enabled(&self, source: &str, sink: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.links.iter().any(|l| {
            state.name(l.source.0) == source
                && state.name(l.sink.0) == sink
                && l.flags & sys::MEDIA_LNK_FL_ENABLED != 0
        })
    }

    pub fn any_mutable_enabled(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.links.iter().any(|l| {
            l.flags & sys::MEDIA_LNK_FL_ENABLED != 0 && l.flags & sys::MEDIA_LNK_FL_IMMUTABLE == 0
        })
    }

    /// Every link as (source, sink, flags).
    pub fn snapshot(&self) -> Vec<(String, String, u32)> {
        let state = self.state.lock().unwrap();
        state
            .links
            .iter()
            .map(|l| (state.name(l.source.0), state.name(l.sink.0), l.flags))
            .collect()
    }

    pub fn setup_count(&self) -> usize {
        self.state.lock().unwrap().setups
    }

    /// SETUP_LINK calls as (source, sink, enabled), oldest first.
    pub fn log(&self) -> Vec<(String, String, bool)> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().unwrap().log.clear();
    }
}

impl MediaNode for FakeMedia {
    fn enum_entities(&self, desc: &mut sys::media_entity_desc) -> nix::Result<()> {
        let state = self.state.lock().unwrap();
        let found = if desc.id & sys::MEDIA_ENT_ID_FLAG_NEXT != 0 {
            let after = desc.id & !sys::MEDIA_ENT_ID_FLAG_NEXT;
            state
                .entities
                .iter()
                .filter(|e| e.id > after)
                .min_by_key(|e| e.id)
        } else {
            state.entities.iter().find(|e| e.id == desc.id)
        };
        let entity = found.ok_or(Errno::EINVAL)?;

        *desc = sys::media_entity_desc::default();
        desc.id = entity.id;
        for (dst, src) in desc.name.iter_mut().zip(entity.name.bytes()) {
            *dst = src as libc::c_char;
        }
        desc.pads = entity.pads;
        desc.links = state
            .links
            .iter()
            .filter(|l| l.source.0 == entity.id)
            .count() as u16;
        Ok(())
    }

    fn enum_links(&self, links: &mut sys::media_links_enum) -> nix::Result<()> {
        let state = self.state.lock().unwrap();
        let entity = state
            .entities
            .iter()
            .find(|e| e.id == links.entity)
            .ok_or(Errno::EINVAL)?;
        if !links.pads.is_null() {
            for pad in 0..entity.pads {
                let desc = sys::media_pad_desc {
                    entity: entity.id,
                    index: pad,
                    ..Default::default()
                };
                // SAFETY: the caller sized the pad array from `pads`.
                unsafe { links.pads.add(pad as usize).write(desc) };
            }
        }
        if !links.links.is_null() {
            let outbound = state.links.iter().filter(|l| l.source.0 == entity.id);
            for (i, link) in outbound.enumerate() {
                let desc = sys::media_link_desc {
                    source: sys::media_pad_desc {
                        entity: link.source.0,
                        index: link.source.1,
                        flags: sys::MEDIA_PAD_FL_SOURCE,
                        ..Default::default()
                    },
                    sink: sys::media_pad_desc {
                        entity: link.sink.0,
                        index: link.sink.1,
                        flags: sys::MEDIA_PAD_FL_SINK,
                        ..Default::default()
                    },
                    flags: link.flags,
                    ..Default::default()
                };
                // SAFETY: the caller sized the link array from `links`.
                unsafe { links.links.add(i).write(desc) };
            }
        }
        Ok(())
    }

    fn setup_link(&self, desc: &mut sys::media_link_desc) -> nix::Result<()> {
        let mut state = self.state.lock().unwrap();
        let source = (desc.source.entity, desc.source.index);
        let sink = (desc.sink.entity, desc.sink.index);
        let enable = desc.flags & sys::MEDIA_LNK_FL_ENABLED != 0;
        let link = state
            .links
            .iter_mut()
            .find(|l| l.source == source && l.sink == sink)
            .ok_or(Errno::EINVAL)?;
        let enabled = link.flags & sys::MEDIA_LNK_FL_ENABLED != 0;
        if link.flags & sys::MEDIA_LNK_FL_IMMUTABLE != 0 {
            return if enabled == enable {
                Ok(())
            } else {
                Err(Errno::EINVAL)
            };
        }
        if enable {
            link.flags |= sys::MEDIA_LNK_FL_ENABLED;
        } else {
            link.flags &= !sys::MEDIA_LNK_FL_ENABLED;
        }
        let entry = (state.name(source.0), state.name(sink.0), enable);
        state.log.push(entry);
        state.setups += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadFormat {
    pub pad: u32,
    pub width: u32,
    pub height: u32,
    pub code: u32,
    pub field: u32,
    pub colorspace: u32,
    pub ycbcr_enc: u16,
    pub quantization: u16,
}

/// Calls seen by every handle opened on one subdevice.
#[derive(Debug, Default)]
pub struct SubdevRecord {
    pub formats: Vec<PadFormat>,
    pub crops: Vec<(u32, sys::v4l2_rect)>,
    pub controls: Vec<(u32, i32)>,
    pub opened: usize,
    pub closed: usize,
    pub reject_controls: bool,
}

impl SubdevRecord {
    /// Latest format set on `pad`.
    pub fn pad(&self, pad: u32) -> Option<PadFormat> {
        self.formats.iter().rev().find(|f| f.pad == pad).copied()
    }

    pub fn is_open(&self) -> bool {
        self.opened > self.closed
    }
}

pub struct FakeSubdev {
    name: String,
    record: Arc<Mutex<SubdevRecord>>,
}

impl SubdevNode for FakeSubdev {
    fn name(&self) -> &str {
        &self.name
    }

    fn s_fmt(&self, fmt: &mut sys::v4l2_subdev_format) -> nix::Result<()> {
        if fmt.which != sys::V4L2_SUBDEV_FORMAT_ACTIVE {
            return Err(Errno::EINVAL);
        }
        let f = fmt.format;
        self.record.lock().unwrap().formats.push(PadFormat {
            pad: fmt.pad,
            width: f.width,
            height: f.height,
            code: f.code,
            field: f.field,
            colorspace: f.colorspace,
            ycbcr_enc: f.ycbcr_enc,
            quantization: f.quantization,
        });
        Ok(())
    }

    fn s_selection(&self, sel: &mut sys::v4l2_subdev_selection) -> nix::Result<()> {
        if sel.target != sys::V4L2_SEL_TGT_CROP {
            return Err(Errno::EINVAL);
        }
        self.record.lock().unwrap().crops.push((sel.pad, sel.r));
        Ok(())
    }

    fn s_ctrl(&self, ctrl: &mut sys::v4l2_control) -> nix::Result<()> {
        let mut record = self.record.lock().unwrap();
        if record.reject_controls {
            return Err(Errno::EINVAL);
        }
        record.controls.push((ctrl.id, ctrl.value));
        Ok(())
    }
}

impl Drop for FakeSubdev {
    fn drop(&mut self) {
        self.record.lock().unwrap().closed += 1;
    }
}

/// Node factory over one fake VSP: `/dev/video0` is the input port,
/// `/dev/video1` the output port.
#[derive(Clone)]
pub struct FakePlatform {
    pub input: Arc<FakeVideo>,
    pub output: Arc<FakeVideo>,
    pub media: FakeMedia,
    subdevs: Arc<Mutex<HashMap<String, Arc<Mutex<SubdevRecord>>>>>,
}

impl FakePlatform {
    pub fn vsp() -> Self {
        FakePlatform {
            input: Arc::new(FakeVideo::input("/dev/video0")),
            output: Arc::new(FakeVideo::output("/dev/video1")),
            media: FakeMedia::vsp(IP),
            subdevs: Arc::default(),
        }
    }

    pub fn with_videos(input: FakeVideo, output: FakeVideo) -> Self {
        FakePlatform {
            input: Arc::new(input),
            output: Arc::new(output),
            ..Self::vsp()
        }
    }

    /// Record of the subdevice for `entity`, e.g. `uds.0`.
    pub fn subdev(&self, entity: &str) -> Arc<Mutex<SubdevRecord>> {
        self.subdevs
            .lock()
            .unwrap()
            .entry(entity.to_string())
            .or_default()
            .clone()
    }
}

impl Platform for FakePlatform {
    fn open_video(&self, path: &Path) -> Result<Arc<dyn VideoNode>, Error> {
        if path == self.input.path() {
            Ok(self.input.clone())
        } else if path == self.output.path() {
            Ok(self.output.clone())
        } else {
            Err(Error::rejected(
                "stat",
                path.display().to_string(),
                Errno::ENOENT,
            ))
        }
    }

    fn open_subdev(&self, ip_name: &str, entity: &str) -> Result<Box<dyn SubdevNode>, Error> {
        let name = format!("{} {}", ip_name, entity);
        if !self.media.has_entity(&name) {
            return Err(Error::EntityNotFound(name));
        }
        let record = self.subdev(entity);
        record.lock().unwrap().opened += 1;
        Ok(Box::new(FakeSubdev { name, record }))
    }

    fn open_media(&self, _video: &Path) -> Result<Box<dyn MediaNode>, Error> {
        Ok(Box::new(self.media.clone()))
    }

    fn video_entity_name(&self, video: &Path) -> Result<String, Error> {
        if video == self.output.path() {
            Ok(format!("{} wpf.0 output", IP))
        } else {
            Ok(format!("{} rpf.0 input", IP))
        }
    }
}
