// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! The colorspace conversion and scaling element.
//!
//! [`VspFilter`] is driven by the host pipeline through a small set of
//! operations and moves through these states:
//!
//! ```text
//! Idle ──start()──► DevicesOpen ──set_caps()──► FormatNegotiated
//!                                                    │ ▲
//!                                       transform()  │ │ caps change,
//!                                                    ▼ │ timeout
//!                                                 Streaming
//! any ──stop()──► Idle
//! ```

use crate::{
    caps::{self, AllocationQuery, Candidate, Direction, PoolOffer, Proposal},
    config::Settings,
    memory::Buffer,
    node::Platform,
    pool::BufferPool,
    session::Session,
    strategy::{self, Plan},
    sysfs::SysfsPlatform,
    v4l2::{MemoryMode, Queue},
    video::{VideoInfo, YcbcrParams},
    Error,
};
use std::fmt;

/// Buffers in a pool the element creates for itself.
pub const POOL_BUFFERS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    DevicesOpen,
    FormatNegotiated,
    Streaming,
}

impl State {
    pub fn name(self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::DevicesOpen => "devices open",
            State::FormatNegotiated => "format negotiated",
            State::Streaming => "streaming",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one [`VspFilter::transform`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transformed {
    /// The output frame holds the converted input
    Done,
    /// The input could not be used; the output frame is untouched
    Dropped,
}

#[derive(Debug, Clone, Copy)]
struct Caps {
    input: VideoInfo,
    output: VideoInfo,
    input_ycbcr: YcbcrParams,
    output_ycbcr: YcbcrParams,
}

impl Caps {
    fn side(&self, queue: Queue) -> (&VideoInfo, YcbcrParams) {
        match queue {
            Queue::Output => (&self.input, self.input_ycbcr),
            Queue::Capture => (&self.output, self.output_ycbcr),
        }
    }
}

fn not_open(op: &'static str) -> Error {
    Error::InvalidState {
        op,
        state: State::Idle.name(),
    }
}

/// Stops `pool`, or orphans it when buffers are still on loan.
fn retire(pool: BufferPool) {
    let res = if pool.has_loans() {
        log::debug!("{}: orphaning pool with {} loans", pool.queue(), pool.loaned());
        pool.orphan()
    } else {
        pool.stop()
    };
    if let Err(err) = res {
        log::warn!("{}: releasing pool: {}", pool.queue(), err);
    }
}

/// Returns the started pool in `slot`, creating and starting one for
/// `info` if needed.
fn activate_pool(
    slot: &mut Option<BufferPool>,
    session: &Session,
    queue: Queue,
    info: &VideoInfo,
    count: u32,
) -> Result<BufferPool, Error> {
    let pool = match slot.take() {
        Some(pool) if !pool.is_orphaned() => pool,
        _ => BufferPool::new(session.node(queue), queue),
    };
    *slot = Some(pool.clone());
    if !pool.is_started() {
        pool.configure(info, count)?;
        pool.start()?;
        log::debug!("{}: pool of {} buffers for {}", queue, pool.n_buffers(), info);
    }
    Ok(pool)
}

/// Hardware colorspace converter and scaler.
pub struct VspFilter {
    settings: Settings,
    platform: Box<dyn Platform>,
    session: Option<Session>,
    caps: Option<Caps>,
    input_pool: Option<BufferPool>,
    output_pool: Option<BufferPool>,
}

impl fmt::Debug for VspFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VspFilter")
            .field("state", &self.state())
            .field("settings", &self.settings)
            .field("session", &self.session)
            .finish()
    }
}

impl VspFilter {
    /// An element using the devices found through sysfs.
    pub fn new(settings: Settings) -> Self {
        Self::with_platform(settings, Box::new(SysfsPlatform::new()))
    }

    pub fn with_platform(settings: Settings, platform: Box<dyn Platform>) -> Self {
        VspFilter {
            settings,
            platform,
            session: None,
            caps: None,
            input_pool: None,
            output_pool: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Sets an element property by name. Device paths apply on the next
    /// [`start`](Self::start), the other properties on the next
    /// [`set_caps`](Self::set_caps) or frame.
    pub fn set_property(&mut self, name: &str, value: &str) -> Result<(), Error> {
        self.settings.set_property(name, value)
    }

    pub fn state(&self) -> State {
        match (&self.session, &self.caps) {
            (None, _) => State::Idle,
            (Some(_), None) => State::DevicesOpen,
            (Some(session), Some(_)) if session.is_streaming() => State::Streaming,
            (Some(_), Some(_)) => State::FormatNegotiated,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn input_info(&self) -> Option<&VideoInfo> {
        self.caps.as_ref().map(|c| &c.input)
    }

    pub fn output_info(&self) -> Option<&VideoInfo> {
        self.caps.as_ref().map(|c| &c.output)
    }

    /// Opens the devices named by the settings and the config file.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.session.is_some() {
            return Err(Error::InvalidState {
                op: "start",
                state: self.state().name(),
            });
        }
        self.settings.load_config()?;
        let session = Session::open(self.platform.as_ref(), &self.settings).map_err(|err| {
            log::error!("failed to initialize the vsp device: {}", err);
            err
        })?;
        self.session = Some(session);
        Ok(())
    }

    /// Releases pools and closes every device. Safe in any state.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if let Err(err) = session.stop_streaming() {
                log::warn!("stopping streams: {}", err);
            }
        }
        self.release_pools();
        self.caps = None;
        self.session = None;
    }

    fn release_pools(&mut self) {
        for pool in [self.input_pool.take(), self.output_pool.take()]
            .into_iter()
            .flatten()
        {
            retire(pool);
        }
    }

    /// Everything the other side of `caps` could be.
    pub fn transform_caps(&self, caps: &Candidate) -> Vec<Candidate> {
        caps::transform_caps(caps)
    }

    /// Fixes the side opposite `direction` from the peer's `candidates`.
    /// With the devices open every choice is checked with TRY_FMT.
    pub fn fixate(
        &self,
        direction: Direction,
        known: &VideoInfo,
        candidates: &[Candidate],
    ) -> Result<VideoInfo, Error> {
        let session = self.session.as_ref();
        caps::fixate(direction, known, candidates, |input, output| {
            match session {
                Some(session) => session.try_formats(input, output),
                None => Ok(()),
            }
        })
    }

    /// Applies negotiated caps: checks them, tears down any previous
    /// configuration and wires the hardware for `input` → `output`.
    pub fn set_caps(&mut self, input: &VideoInfo, output: &VideoInfo) -> Result<(), Error> {
        if self.session.is_none() {
            return Err(not_open("set_caps"));
        }
        input.validate()?;
        output.validate()?;
        if input.fps != output.fps {
            log::error!("frame rates differ: {} vs {}", input.fps, output.fps);
            return Err(Error::FormatMismatch(format!(
                "input frame rate {} differs from output {}",
                input.fps, output.fps
            )));
        }
        if input.interlace != output.interlace {
            log::error!(
                "interlace modes differ: {:?} vs {:?}",
                input.interlace,
                output.interlace
            );
            return Err(Error::FormatMismatch(format!(
                "input interlacing {:?} differs from output {:?}",
                input.interlace, output.interlace
            )));
        }
        if let Some(current) = &self.caps {
            if current.input == *input && current.output == *output {
                log::debug!("caps unchanged");
                return Ok(());
            }
        }

        let mut colorimetry = input.colorimetry;
        colorimetry.range = self.settings.input_color_range.apply(colorimetry.range);
        let caps = Caps {
            input: *input,
            output: *output,
            input_ycbcr: YcbcrParams::from_colorimetry(&colorimetry),
            output_ycbcr: YcbcrParams::from_colorimetry(&output.colorimetry),
        };

        self.caps = None;
        if let Some(session) = self.session.as_mut() {
            session.stop_streaming()?;
        }
        self.release_pools();

        let platform = self.platform.as_ref();
        let session = self.session.as_mut().ok_or_else(|| not_open("set_caps"))?;
        session.release_queue(Queue::Output)?;
        session.release_queue(Queue::Capture)?;
        session.invalidate();
        session.try_formats(&caps.input, &caps.output)?;
        session.wire(
            platform,
            (&caps.input, caps.input_ycbcr),
            (&caps.output, caps.output_ycbcr),
            (self.settings.hflip, self.settings.vflip),
        )?;
        log::info!("negotiated {} -> {}", caps.input, caps.output);
        self.caps = Some(caps);
        Ok(())
    }

    /// Converts `src` into `dst`.
    ///
    /// A frame that cannot be mapped or does not match the negotiated
    /// layout is skipped with a warning and reported as
    /// [`Transformed::Dropped`]; every other failure is returned.
    pub fn transform(&mut self, src: &mut Buffer, dst: &mut Buffer) -> Result<Transformed, Error> {
        if self.session.is_none() {
            return Err(not_open("transform"));
        }
        let caps = self.caps.ok_or(Error::NotNegotiated)?;
        match self.process(&caps, src, dst) {
            Ok(()) => Ok(Transformed::Done),
            Err(Error::InvalidBuffer(msg)) => {
                log::warn!("dropping frame: {}", msg);
                Ok(Transformed::Dropped)
            }
            Err(err) => Err(err),
        }
    }

    fn process(&mut self, caps: &Caps, src: &mut Buffer, dst: &mut Buffer) -> Result<(), Error> {
        let in_plan = strategy::select(self.settings.input_io_mode, src, self.input_pool.as_ref());
        let out_plan =
            strategy::select(self.settings.output_io_mode, dst, self.output_pool.as_ref());
        log::trace!("plans: input {:?}, output {:?}", in_plan, out_plan);

        let in_changed = self.ensure_queue(Queue::Output, in_plan, src, caps)?;
        let out_changed = self.ensure_queue(Queue::Capture, out_plan, dst, caps)?;

        let platform = self.platform.as_ref();
        let session = self.session.as_mut().ok_or_else(|| not_open("transform"))?;
        if in_changed || out_changed {
            session.invalidate();
            session.wire(
                platform,
                (&caps.input, caps.input_ycbcr),
                (&caps.output, caps.output_ycbcr),
                (self.settings.hflip, self.settings.vflip),
            )?;
        }

        let input = strategy::prepare_input(
            in_plan,
            src,
            &caps.input,
            self.input_pool.as_ref(),
            session.sizes(Queue::Output),
        )?;
        let output = strategy::prepare_output(out_plan, dst, &caps.output, self.output_pool.as_ref())?;
        session.run(&input.descriptor, &output.descriptor, self.settings.timeout)?;
        drop(input);
        strategy::finish_output(output, dst, &caps.output)
    }

    /// Makes `queue` ready for a frame handled with `plan`. Returns true
    /// when the queue had to be set up again.
    fn ensure_queue(
        &mut self,
        queue: Queue,
        plan: Plan,
        buffer: &Buffer,
        caps: &Caps,
    ) -> Result<bool, Error> {
        let (info, ycbcr) = caps.side(queue);
        let VspFilter {
            session,
            input_pool,
            output_pool,
            ..
        } = self;
        let session = session.as_mut().ok_or_else(|| not_open("transform"))?;
        let slot = match queue {
            Queue::Output => input_pool,
            Queue::Capture => output_pool,
        };
        let current = session.memory(queue);

        match plan.memory() {
            MemoryMode::Mmap => {
                if current == Some(MemoryMode::Mmap) {
                    return Ok(false);
                }
                session.release_queue(queue)?;
                let pool = activate_pool(slot, session, queue, info, POOL_BUFFERS)?;
                let layout = pool.layout().ok_or_else(|| {
                    Error::PoolActivationFailed(format!("{} pool has no layout", queue))
                })?;
                session.adopt_pool(queue, &layout)?;
            }
            memory => {
                let strides = buffer.layout(info)?.strides;
                if current == Some(memory) && session.requested_strides(queue) == strides.as_slice() {
                    return Ok(false);
                }
                session.stop_streaming()?;
                if let Some(pool) = slot.take() {
                    retire(pool);
                }
                session.setup_queue(queue, info, ycbcr, memory, &strides)?;
            }
        }
        log::debug!(
            "{}: switched from {} to {}",
            queue,
            current.map(|m| m.to_string()).unwrap_or_else(|| "nothing".into()),
            plan.memory()
        );
        Ok(true)
    }

    /// Offers upstream a pool of input-queue buffers, so frames arrive in
    /// memory the hardware reads without copying.
    pub fn propose_allocation(&mut self, min_buffers: u32) -> Result<Proposal, Error> {
        let VspFilter {
            session,
            caps,
            input_pool,
            ..
        } = self;
        let session = session.as_mut().ok_or_else(|| not_open("propose_allocation"))?;
        let caps = caps.as_ref().ok_or(Error::NotNegotiated)?;
        if let Some(memory) = session.memory(Queue::Output) {
            if memory != MemoryMode::Mmap {
                session.release_queue(Queue::Output)?;
            }
        }
        let count = min_buffers.max(POOL_BUFFERS);
        let pool = activate_pool(input_pool, session, Queue::Output, &caps.input, count)?;
        let size = match pool.layout() {
            Some(layout) => layout.total_size()?,
            None => 0,
        };
        let n_buffers = pool.n_buffers() as u32;
        Ok(Proposal {
            pool: PoolOffer {
                pool,
                size,
                min_buffers: count.min(n_buffers),
                max_buffers: n_buffers,
            },
            video_meta: true,
        })
    }

    /// Settles how output frames are allocated.
    ///
    /// A dma-buf allocator offered downstream is moved to the front and
    /// used as is. Otherwise a pool already in the query is kept, or the
    /// element's output-queue pool is added.
    pub fn decide_allocation(&mut self, query: &mut AllocationQuery) -> Result<(), Error> {
        let VspFilter {
            session,
            caps,
            output_pool,
            ..
        } = self;
        let session = session.as_mut().ok_or_else(|| not_open("decide_allocation"))?;
        let caps = caps.as_ref().ok_or(Error::NotNegotiated)?;
        query.video_meta = true;

        if query.prefer_dmabuf() {
            log::debug!("found a dmabuf allocator");
            return Ok(());
        }
        if !query.pools.is_empty() {
            log::debug!("keeping the downstream pool");
            return Ok(());
        }
        if let Some(memory) = session.memory(Queue::Capture) {
            if memory != MemoryMode::Mmap {
                session.release_queue(Queue::Capture)?;
            }
        }
        let count = query.min_buffers.max(POOL_BUFFERS);
        let pool = activate_pool(output_pool, session, Queue::Capture, &caps.output, count)?;
        let n_buffers = pool.n_buffers() as u32;
        let size = match pool.layout() {
            Some(layout) => layout.total_size()?,
            None => 0,
        };
        query.pools.push(PoolOffer {
            size,
            min_buffers: count.min(n_buffers),
            max_buffers: n_buffers,
            pool,
        });
        Ok(())
    }
}

impl Drop for VspFilter {
    fn drop(&mut self) {
        self.stop();
    }
}
