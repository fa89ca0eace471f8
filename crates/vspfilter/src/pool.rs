// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Exported buffer pool.
//!
//! A [`BufferPool`] owns the MMAP buffers of one queue. Every buffer is
//! exported plane by plane as a dma-buf when the pool starts and the same
//! handles are lent out again on each acquire, so the memory can travel
//! through the rest of the pipeline and come back to the filter without a
//! copy.
//!
//! The pool is fixed size: the buffer count granted by `VIDIOC_REQBUFS` in
//! [`BufferPool::start`] never changes until the pool is reconfigured.
//!
//! # Orphaning
//!
//! When the hardware has to be reconfigured while buffers are still on loan,
//! [`BufferPool::orphan`] hands the device memory back to the kernel and
//! detaches the pool. Loaned buffers keep their exported handles and stay
//! usable until their holders release them; the pool itself never hands out
//! another buffer.

use crate::{
    format::FormatEntry,
    node::VideoNode,
    session,
    v4l2::{self, FormatRequest, MemoryMode, Queue},
    video::{PlaneLayout, VideoInfo, VideoMeta, YcbcrParams},
    Error,
};
use dma_buf::DmaBuf;
use std::{
    fmt,
    os::fd::AsRawFd,
    sync::{Arc, Mutex, MutexGuard, Weak},
};

#[derive(Debug)]
struct Config {
    info: VideoInfo,
    entry: &'static FormatEntry,
    layout: PlaneLayout,
    n_buffers: u32,
}

struct PoolState {
    node: Option<Arc<dyn VideoNode>>,
    queue: Queue,
    config: Option<Config>,
    /// Loan flag per buffer index; empty until started
    exported: Vec<bool>,
    /// Plane handles per buffer index, exported on start
    handles: Vec<Arc<[DmaBuf]>>,
    started: bool,
    orphaned: bool,
    /// Bumped whenever the device buffers are released, so late returns
    /// from an earlier allocation leave the current flags alone
    generation: u64,
}

impl PoolState {
    fn release_device_buffers(&mut self) -> Result<(), Error> {
        self.generation += 1;
        self.exported.clear();
        self.handles.clear();
        let was_started = std::mem::replace(&mut self.started, false);
        match (&self.node, was_started) {
            (Some(node), true) => {
                // REQBUFS fails with EBUSY on a streaming queue
                v4l2::stream_off(node.as_ref(), self.queue)?;
                v4l2::request_buffers(node.as_ref(), self.queue, 0, MemoryMode::Mmap).map(drop)
            }
            _ => Ok(()),
        }
    }
}

/// A pool of device buffers for one queue. Clones share the same pool.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Mutex<PoolState>>,
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("BufferPool")
            .field("queue", &state.queue)
            .field("started", &state.started)
            .field("orphaned", &state.orphaned)
            .field("buffers", &state.exported.len())
            .finish()
    }
}

impl BufferPool {
    pub fn new(node: Arc<dyn VideoNode>, queue: Queue) -> Self {
        BufferPool {
            inner: Arc::new(Mutex::new(PoolState {
                node: Some(node),
                queue,
                config: None,
                exported: Vec::new(),
                handles: Vec::new(),
                started: false,
                orphaned: false,
                generation: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // a panic while holding the lock leaves plain flags behind
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sets the queue format for `info` and remembers `count` as the number
    /// of buffers to request on [`start`](Self::start).
    ///
    /// Reconfiguring a started pool first releases its device buffers.
    pub fn configure(&self, info: &VideoInfo, count: u32) -> Result<(), Error> {
        if count == 0 {
            log::error!("do not allow unlimited buffers");
            return Err(Error::ConfigInvalid("pool needs at least one buffer".into()));
        }
        info.validate()?;
        let entry = info.entry()?;

        let mut state = self.lock();
        if state.orphaned {
            return Err(Error::PoolOrphaned);
        }
        if state.started {
            log::debug!("{}: releasing buffers before reconfiguring", state.queue);
            state.release_device_buffers()?;
        }
        let node = state.node.clone().ok_or(Error::PoolOrphaned)?;

        let (width, height) = session::queue_size(state.queue, entry, info)?;
        let req = FormatRequest {
            width,
            height,
            entry,
            strides: &[],
            queue: state.queue,
            memory: MemoryMode::Mmap,
            ycbcr: YcbcrParams::from_colorimetry(&info.colorimetry),
        };
        let negotiated = v4l2::set_format(node.as_ref(), &req).map_err(|err| {
            log::error!(
                "set_format for {} failed ({}x{})",
                state.queue,
                info.width,
                info.height
            );
            err
        })?;
        let layout = PlaneLayout::new(entry, height, &negotiated.strides)?;
        log::debug!(
            "{} pool: {} x {} buffers, strides {:?}",
            state.queue,
            info,
            count,
            layout.strides
        );
        state.config = Some(Config {
            info: *info,
            entry,
            layout,
            n_buffers: count,
        });
        Ok(())
    }

    /// Allocates the device buffers and exports every plane of each.
    pub fn start(&self) -> Result<(), Error> {
        let mut state = self.lock();
        if state.orphaned {
            return Err(Error::PoolOrphaned);
        }
        if state.started {
            return Ok(());
        }
        let (requested, n_planes) = state
            .config
            .as_ref()
            .map(|c| (c.n_buffers, c.entry.n_planes))
            .ok_or_else(|| Error::PoolActivationFailed("pool is not configured".into()))?;
        let node = state.node.clone().ok_or(Error::PoolOrphaned)?;
        let granted = v4l2::request_buffers(node.as_ref(), state.queue, requested, MemoryMode::Mmap)
            .map_err(|err| {
                log::error!("request_buffers for {} failed", state.queue);
                Error::PoolActivationFailed(err.to_string())
            })?;
        if granted == 0 {
            return Err(Error::PoolActivationFailed(format!(
                "{} granted no buffers",
                state.queue
            )));
        }
        state.started = true;

        let queue = state.queue;
        let mut handles: Vec<Arc<[DmaBuf]>> = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            let planes = (0..n_planes as u32)
                .map(|plane| v4l2::export_buffer(node.as_ref(), queue, index, plane))
                .collect::<Result<Vec<_>, _>>();
            match planes {
                Ok(planes) => handles.push(Arc::from(planes)),
                Err(err) => {
                    log::error!("exporting {} buffer {} failed", queue, index);
                    // the exported handles pin the device memory
                    drop(handles);
                    if let Err(release) = state.release_device_buffers() {
                        log::warn!("releasing {} buffers: {}", queue, release);
                    }
                    return Err(Error::PoolActivationFailed(err.to_string()));
                }
            }
        }
        log::debug!("{}: exported {} buffers of {} planes", queue, granted, n_planes);
        state.exported = vec![false; granted as usize];
        state.handles = handles;
        Ok(())
    }

    /// Lends out the lowest free buffer index.
    pub fn acquire(&self) -> Result<PoolBuffer, Error> {
        let mut state = self.lock();
        if state.orphaned {
            return Err(Error::PoolOrphaned);
        }
        if !state.started {
            return Err(Error::PoolActivationFailed("pool is not started".into()));
        }
        let index = state
            .exported
            .iter()
            .position(|loaned| !loaned)
            .ok_or_else(|| {
                log::error!("no buffers are left");
                Error::PoolExhausted
            })?;
        let config = state
            .config
            .as_ref()
            .ok_or_else(|| Error::PoolActivationFailed("pool is not configured".into()))?;
        let planes = state
            .handles
            .get(index)
            .cloned()
            .ok_or_else(|| Error::PoolActivationFailed(format!("buffer {} is not exported", index)))?;
        let buffer = PoolBuffer {
            index: index as u32,
            planes,
            meta: config.layout.meta(),
            sizes: config.layout.sizes.clone(),
            generation: state.generation,
            pool: Arc::downgrade(&self.inner),
        };
        state.exported[index] = true;
        log::trace!("{}: lent buffer {}", state.queue, index);
        Ok(buffer)
    }

    /// Returns `buffer` to the pool. Buffers also return themselves when
    /// dropped.
    pub fn release(&self, buffer: PoolBuffer) -> Result<(), Error> {
        if !self.owns(&buffer) {
            return Err(Error::InvalidBuffer(format!(
                "buffer {} belongs to another pool",
                buffer.index
            )));
        }
        drop(buffer);
        Ok(())
    }

    /// Releases the device buffers and detaches from the device for good.
    /// Buffers on loan stay valid for their holders.
    pub fn orphan(&self) -> Result<(), Error> {
        let mut state = self.lock();
        if state.orphaned {
            return Ok(());
        }
        let loaned = state.exported.iter().filter(|l| **l).count();
        log::debug!("{}: orphaning pool with {} buffers on loan", state.queue, loaned);
        let res = state.release_device_buffers();
        state.node = None;
        state.orphaned = true;
        res
    }

    /// Stops the queue and releases every device buffer. The pool can be
    /// configured and started again afterwards.
    pub fn stop(&self) -> Result<(), Error> {
        let mut state = self.lock();
        if state.orphaned || !state.started {
            return Ok(());
        }
        state.release_device_buffers()
    }

    pub fn queue(&self) -> Queue {
        self.lock().queue
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    pub fn is_orphaned(&self) -> bool {
        self.lock().orphaned
    }

    /// Number of buffers granted by the device, 0 before start.
    pub fn n_buffers(&self) -> usize {
        self.lock().exported.len()
    }

    pub fn loaned(&self) -> usize {
        self.lock().exported.iter().filter(|l| **l).count()
    }

    pub fn has_loans(&self) -> bool {
        self.loaned() > 0
    }

    /// The configured format, if any.
    pub fn info(&self) -> Option<VideoInfo> {
        self.lock().config.as_ref().map(|c| c.info)
    }

    /// Plane layout of every buffer, if configured.
    pub fn layout(&self) -> Option<PlaneLayout> {
        self.lock().config.as_ref().map(|c| c.layout.clone())
    }

    /// Whether `buffer` was handed out by this pool.
    pub fn owns(&self, buffer: &PoolBuffer) -> bool {
        std::ptr::eq(buffer.pool.as_ptr(), Arc::as_ptr(&self.inner))
    }

    /// Whether this pool allocates on `node`.
    pub fn is_on(&self, node: &Arc<dyn VideoNode>) -> bool {
        self.lock()
            .node
            .as_ref()
            .map(|n| Arc::ptr_eq(n, node))
            .unwrap_or(false)
    }
}

/// A buffer on loan from a [`BufferPool`].
pub struct PoolBuffer {
    index: u32,
    planes: Arc<[DmaBuf]>,
    meta: VideoMeta,
    sizes: Vec<usize>,
    generation: u64,
    pool: Weak<Mutex<PoolState>>,
}

impl PoolBuffer {
    /// Device buffer index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Exported handle of each plane.
    pub fn planes(&self) -> &[DmaBuf] {
        &self.planes
    }

    pub fn meta(&self) -> &VideoMeta {
        &self.meta
    }

    /// Bytes of each plane.
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }
}

impl fmt::Debug for PoolBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fds: Vec<_> = self.planes.iter().map(|p| p.as_raw_fd()).collect();
        f.debug_struct("PoolBuffer")
            .field("index", &self.index)
            .field("fds", &fds)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Drop for PoolBuffer {
    fn drop(&mut self) {
        let Some(inner) = self.pool.upgrade() else {
            return;
        };
        let mut state = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.generation != self.generation {
            return;
        }
        if let Some(loaned) = state.exported.get_mut(self.index as usize) {
            *loaned = false;
            log::trace!("{}: buffer {} returned", state.queue, self.index);
        }
    }
}
