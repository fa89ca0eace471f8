// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Open hardware session.
//!
//! A [`Session`] owns every handle of one VSP instance: both video queues,
//! the subdevices of the input and output ports, the media controller with
//! its entity table and, when scaling, the resize subdevice. Dropping the
//! session stops streaming and closes everything it opened, whichever way
//! it is left.
//!
//! Wiring follows a small state machine:
//!
//! ```text
//! Unconfigured ──wire()──► Direct   (equal sizes after rounding)
//!              └─────────► Resized  (rpf → uds.0 → wpf)
//! any ──invalidate()────► Unconfigured
//! ```

use crate::{
    config::Settings,
    format::FormatEntry,
    media::{self, EntityTable},
    node::{MediaNode, Platform, SubdevNode, VideoNode},
    strategy::FrameDescriptor,
    v4l2::{self, CardInfo, FormatRequest, MemoryMode, Queue},
    video::{PlaneLayout, VideoInfo, YcbcrParams},
    Error,
};
use nix::errno::Errno;
use std::{sync::Arc, time::Duration};
use vspfilter_sys as sys;

/// Entity of the scaler inside the VSP.
pub const RESIZE_ENTITY: &str = "uds.0";

const INPUT_PAD: u32 = 0;
const OUTPUT_PAD: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wiring {
    Unconfigured,
    /// Input port linked straight to the output port
    Direct,
    /// Input port linked to the output port through the scaler
    Resized,
}

/// One side of the hardware: a video queue and the subdevice of its port.
struct Port {
    queue: Queue,
    node: Arc<dyn VideoNode>,
    card: CardInfo,
    /// Entity name including the IP block
    entity: String,
    subdev: Box<dyn SubdevNode>,
    memory: Option<MemoryMode>,
    /// Buffers requested by the session itself, as opposed to a pool
    own_buffers: bool,
    /// Strides of the frames the queue was set up for
    requested: Vec<u32>,
    strides: Vec<u32>,
    sizes: Vec<u32>,
    n_planes: usize,
}

impl Port {
    fn probe(
        platform: &dyn Platform,
        settings: &Settings,
        queue: Queue,
    ) -> Result<(Arc<dyn VideoNode>, CardInfo), Error> {
        let path = match queue {
            Queue::Output => settings.devfile_input(),
            Queue::Capture => settings.devfile_output(),
        };
        let node = platform.open_video(path)?;
        let card = v4l2::query_card(node.as_ref(), queue)?;
        log::debug!(
            "{}: driver {} card '{}' ({})",
            path.display(),
            card.driver,
            card.card,
            queue
        );
        Ok((node, card))
    }

    fn open(
        platform: &dyn Platform,
        queue: Queue,
        (node, card): (Arc<dyn VideoNode>, CardInfo),
    ) -> Result<Self, Error> {
        let subdev = platform.open_subdev(&card.ip_name, &card.entity)?;
        Ok(Port {
            queue,
            entity: format!("{} {}", card.ip_name, card.entity),
            node,
            card,
            subdev,
            memory: None,
            own_buffers: false,
            requested: Vec::new(),
            strides: Vec::new(),
            sizes: Vec::new(),
            n_planes: 0,
        })
    }

    fn release_buffers(&mut self) -> Result<(), Error> {
        if let (true, Some(memory)) = (self.own_buffers, self.memory) {
            v4l2::stream_off(self.node.as_ref(), self.queue)?;
            v4l2::request_buffers(self.node.as_ref(), self.queue, 0, memory)?;
        }
        self.own_buffers = false;
        self.memory = None;
        self.requested.clear();
        Ok(())
    }
}

/// Every open handle of one VSP instance.
pub struct Session {
    // dropped first: the scaler is released before the ports
    resize: Option<Box<dyn SubdevNode>>,
    input: Port,
    output: Port,
    media: Box<dyn MediaNode>,
    table: EntityTable,
    terminal: String,
    wiring: Wiring,
    streaming: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("input", &self.input.entity)
            .field("output", &self.output.entity)
            .field("wiring", &self.wiring)
            .field("streaming", &self.streaming)
            .finish()
    }
}

impl Session {
    /// Opens and validates both devices and discovers the media graph.
    pub fn open(platform: &dyn Platform, settings: &Settings) -> Result<Self, Error> {
        let input = Port::probe(platform, settings, Queue::Output)?;
        let output = Port::probe(platform, settings, Queue::Capture)?;
        if input.1.ip_name != output.1.ip_name {
            log::error!(
                "input {} and output {} belong to different VSPs",
                input.1.ip_name,
                output.1.ip_name
            );
            return Err(Error::ConfigInvalid(format!(
                "{} and {} are not the same VSP",
                input.1.ip_name, output.1.ip_name
            )));
        }
        let input = Port::open(platform, Queue::Output, input)?;
        let output = Port::open(platform, Queue::Capture, output)?;

        let media = platform.open_media(output.node.path())?;
        let table = EntityTable::discover(media.as_ref())?;
        table.get(&input.entity)?;
        table.get(&output.entity)?;
        let terminal = platform.video_entity_name(output.node.path())?;
        table.get(&terminal)?;
        log::info!(
            "opened {} ({} -> {}), {} entities",
            input.card.ip_name,
            input.card.entity,
            output.card.entity,
            table.len()
        );

        Ok(Session {
            resize: None,
            input,
            output,
            media,
            table,
            terminal,
            wiring: Wiring::Unconfigured,
            streaming: false,
        })
    }

    fn port(&self, queue: Queue) -> &Port {
        match queue {
            Queue::Output => &self.input,
            Queue::Capture => &self.output,
        }
    }

    fn port_mut(&mut self, queue: Queue) -> &mut Port {
        match queue {
            Queue::Output => &mut self.input,
            Queue::Capture => &mut self.output,
        }
    }

    pub fn node(&self, queue: Queue) -> Arc<dyn VideoNode> {
        self.port(queue).node.clone()
    }

    pub fn card(&self, queue: Queue) -> &CardInfo {
        &self.port(queue).card
    }

    pub fn entities(&self) -> &EntityTable {
        &self.table
    }

    pub fn media(&self) -> &dyn MediaNode {
        self.media.as_ref()
    }

    /// Entity the output port feeds, named by the output node's sysfs entry.
    pub fn terminal(&self) -> &str {
        &self.terminal
    }

    pub fn wiring(&self) -> Wiring {
        self.wiring
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn has_resize(&self) -> bool {
        self.resize.is_some()
    }

    /// Memory mode the queue is currently set up for.
    pub fn memory(&self, queue: Queue) -> Option<MemoryMode> {
        self.port(queue).memory
    }

    pub fn strides(&self, queue: Queue) -> &[u32] {
        &self.port(queue).strides
    }

    /// Frame strides `queue` was last set up for with
    /// [`setup_queue`](Self::setup_queue).
    pub fn requested_strides(&self, queue: Queue) -> &[u32] {
        &self.port(queue).requested
    }

    pub fn sizes(&self, queue: Queue) -> &[u32] {
        &self.port(queue).sizes
    }

    /// Forgets the wiring; the next [`wire`](Self::wire) rebuilds it.
    pub fn invalidate(&mut self) {
        self.wiring = Wiring::Unconfigured;
    }

    /// Stops both queues. Buffers still queued return to their owners.
    pub fn stop_streaming(&mut self) -> Result<(), Error> {
        if !self.streaming {
            return Ok(());
        }
        self.halt()
    }

    fn halt(&mut self) -> Result<(), Error> {
        self.streaming = false;
        let input = v4l2::stream_off(self.input.node.as_ref(), Queue::Output);
        let output = v4l2::stream_off(self.output.node.as_ref(), Queue::Capture);
        input.and(output)
    }

    /// Frees the buffers the session requested on `queue`, so a pool can
    /// take the queue over.
    pub fn release_queue(&mut self, queue: Queue) -> Result<(), Error> {
        self.stop_streaming()?;
        self.port_mut(queue).release_buffers()
    }

    /// Sets `queue` up for frames in `memory` mode (DMABUF or USERPTR) with
    /// the given strides, and requests the one buffer slot it needs.
    pub fn setup_queue(
        &mut self,
        queue: Queue,
        info: &VideoInfo,
        ycbcr: YcbcrParams,
        memory: MemoryMode,
        strides: &[u32],
    ) -> Result<(), Error> {
        self.stop_streaming()?;
        let port = self.port_mut(queue);
        port.release_buffers()?;

        let entry = info.entry()?;
        let (width, height) = queue_size(queue, entry, info)?;
        let req = FormatRequest {
            width,
            height,
            entry,
            strides,
            queue,
            memory,
            ycbcr,
        };
        let negotiated = v4l2::set_format(port.node.as_ref(), &req)?;
        if !strides.is_empty() && negotiated.strides.as_slice() != strides {
            log::warn!(
                "{}: device strides {:?} differ from frame strides {:?}",
                queue,
                negotiated.strides,
                strides
            );
        }
        v4l2::request_buffers(port.node.as_ref(), queue, 1, memory)?;
        port.memory = Some(memory);
        port.own_buffers = true;
        port.requested = strides.to_vec();
        port.n_planes = entry.n_planes;
        port.strides = negotiated.strides;
        port.sizes = negotiated.sizes;
        Ok(())
    }

    /// Asks both queues with TRY_FMT whether they take `input` and
    /// `output`, without touching the devices.
    pub fn try_formats(&self, input: &VideoInfo, output: &VideoInfo) -> Result<(), Error> {
        for (queue, info) in [(Queue::Output, input), (Queue::Capture, output)] {
            let entry = info.entry()?;
            let (width, height) = queue_size(queue, entry, info)?;
            let req = FormatRequest {
                width,
                height,
                entry,
                strides: &[],
                queue,
                memory: MemoryMode::DmaBuf,
                ycbcr: YcbcrParams::from_colorimetry(&info.colorimetry),
            };
            v4l2::try_format(self.port(queue).node.as_ref(), &req)?;
        }
        Ok(())
    }

    /// Marks `queue` as running from a pool with `layout`; the pool has
    /// already set the format and requested the buffers.
    pub fn adopt_pool(&mut self, queue: Queue, layout: &PlaneLayout) -> Result<(), Error> {
        let port = self.port_mut(queue);
        if port.own_buffers {
            port.release_buffers()?;
        }
        port.memory = Some(MemoryMode::Mmap);
        port.requested.clear();
        port.n_planes = layout.n_planes();
        port.strides = layout.strides.clone();
        port.sizes = layout.sizes.iter().map(|s| *s as u32).collect();
        Ok(())
    }

    /// Links the chain for `input` → `output` and programs every pad.
    pub fn wire(
        &mut self,
        platform: &dyn Platform,
        input: (&VideoInfo, YcbcrParams),
        output: (&VideoInfo, YcbcrParams),
        flips: (bool, bool),
    ) -> Result<(), Error> {
        let (in_info, in_ycbcr) = input;
        let (out_info, out_ycbcr) = output;
        let in_entry = in_info.entry()?;
        let out_entry = out_info.entry()?;

        let crop = frame_size(in_entry, in_info);
        let out_size = queue_size(Queue::Capture, out_entry, out_info)?;
        let resize = crop != out_size;
        log::debug!(
            "wiring {}x{} (crop {}x{}) -> {}x{}, {}",
            in_info.width,
            in_info.height,
            crop.0,
            crop.1,
            out_size.0,
            out_size.1,
            if resize { "resized" } else { "direct" }
        );

        self.wiring = Wiring::Unconfigured;
        media::deactivate_link(self.media.as_ref(), &self.table, &self.input.entity)?;
        let uds = format!("{} {}", self.input.card.ip_name, RESIZE_ENTITY);
        if resize {
            if self.resize.is_none() {
                self.resize = Some(platform.open_subdev(&self.input.card.ip_name, RESIZE_ENTITY)?);
                log::debug!("opened {}", uds);
            }
            media::activate_link(self.media.as_ref(), &self.table, &self.input.entity, &uds)?;
            media::activate_link(self.media.as_ref(), &self.table, &uds, &self.output.entity)?;
        } else {
            if self.resize.take().is_some() {
                log::debug!("closed {}", uds);
            }
            media::activate_link(
                self.media.as_ref(),
                &self.table,
                &self.input.entity,
                &self.output.entity,
            )?;
        }
        media::activate_link(
            self.media.as_ref(),
            &self.table,
            &self.output.entity,
            &self.terminal,
        )?;

        let queue = queue_size(Queue::Output, in_entry, in_info)?;
        let rpf = self.input.subdev.as_ref();
        set_pad(rpf, INPUT_PAD, queue, in_entry.mbus_code, in_ycbcr)?;
        if crop != (in_info.width, in_info.height) {
            set_crop(rpf, INPUT_PAD, crop)?;
        }
        set_pad(rpf, OUTPUT_PAD, crop, out_entry.mbus_code, in_ycbcr)?;
        if let Some(uds) = self.resize.as_deref() {
            set_pad(uds, INPUT_PAD, crop, out_entry.mbus_code, out_ycbcr)?;
            set_pad(uds, OUTPUT_PAD, out_size, out_entry.mbus_code, out_ycbcr)?;
        }
        let wpf = self.output.subdev.as_ref();
        set_pad(wpf, INPUT_PAD, out_size, out_entry.mbus_code, out_ycbcr)?;
        set_pad(wpf, OUTPUT_PAD, out_size, out_entry.mbus_code, out_ycbcr)?;
        set_flip(wpf, sys::V4L2_CID_HFLIP, flips.0)?;
        set_flip(wpf, sys::V4L2_CID_VFLIP, flips.1)?;

        self.wiring = if resize {
            Wiring::Resized
        } else {
            Wiring::Direct
        };
        Ok(())
    }

    /// Runs one frame: queues both descriptors, starts streaming if needed,
    /// waits up to `timeout` and dequeues output then input.
    pub fn run(
        &mut self,
        input: &FrameDescriptor,
        output: &FrameDescriptor,
        timeout: Duration,
    ) -> Result<(), Error> {
        let res = self.cycle(input, output, timeout);
        if res.is_err() {
            // STREAMOFF hands every queued buffer back
            if let Err(err) = self.halt() {
                log::warn!("stopping after a failed frame: {}", err);
            }
        }
        res
    }

    fn cycle(
        &mut self,
        input: &FrameDescriptor,
        output: &FrameDescriptor,
        timeout: Duration,
    ) -> Result<(), Error> {
        for (port, desc) in [(&self.input, input), (&self.output, output)] {
            if port.memory != Some(desc.memory()) {
                return Err(Error::InvalidState {
                    op: "queue frame",
                    state: "queue memory mode differs",
                });
            }
            let mut planes = desc.to_planes();
            v4l2::queue_buffer(
                port.node.as_ref(),
                port.queue,
                desc.memory(),
                desc.index(),
                &mut planes,
            )?;
        }

        if !self.streaming {
            v4l2::stream_on(self.input.node.as_ref(), Queue::Output)?;
            v4l2::stream_on(self.output.node.as_ref(), Queue::Capture)?;
            self.streaming = true;
        }

        let node = self.output.node.as_ref();
        let ready = v4l2::retrying(|| node.wait_ready(timeout)).map_err(|errno| {
            log::error!("waiting on {} failed: {}", node.path().display(), errno);
            Error::rejected("poll", node.path().display().to_string(), errno)
        })?;
        if !ready {
            log::error!("no frame from {} within {:?}", node.path().display(), timeout);
            return Err(Error::DeviceTimeout(timeout));
        }

        let (index, used) = v4l2::dequeue_buffer(
            self.output.node.as_ref(),
            Queue::Capture,
            output.memory(),
            self.output.n_planes,
        )?;
        log::trace!("output buffer {} done, {:?} bytes", index, used);
        v4l2::dequeue_buffer(
            self.input.node.as_ref(),
            Queue::Output,
            input.memory(),
            self.input.n_planes,
        )?;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.stop_streaming() {
            log::warn!("stopping streams on close: {}", err);
        }
        for port in [&mut self.input, &mut self.output] {
            if let Err(err) = port.release_buffers() {
                log::warn!("releasing {} buffers on close: {}", port.queue, err);
            }
        }
        log::debug!("closed {}", self.input.card.ip_name);
    }
}

/// Geometry the queue is set to. The input queue is sized up to the
/// format's alignment so a full frame always fits; the output queue takes
/// the rounded-down size the write pads produce.
pub(crate) fn queue_size(
    queue: Queue,
    entry: &FormatEntry,
    info: &VideoInfo,
) -> Result<(u32, u32), Error> {
    match queue {
        Queue::Output => Ok((
            entry.round_up_width(info.width)?,
            entry.round_up_height(info.height)?,
        )),
        Queue::Capture => Ok(frame_size(entry, info)),
    }
}

/// Size the hardware actually processes for `info`.
pub(crate) fn frame_size(entry: &FormatEntry, info: &VideoInfo) -> (u32, u32) {
    (
        entry.round_down_width(info.width),
        entry.round_down_height(info.height),
    )
}

fn set_pad(
    subdev: &dyn SubdevNode,
    pad: u32,
    (width, height): (u32, u32),
    code: u32,
    ycbcr: YcbcrParams,
) -> Result<(), Error> {
    let mut fmt = sys::v4l2_subdev_format {
        which: sys::V4L2_SUBDEV_FORMAT_ACTIVE,
        pad,
        format: sys::v4l2_mbus_framefmt {
            width,
            height,
            code,
            field: sys::V4L2_FIELD_NONE,
            colorspace: sys::V4L2_COLORSPACE_SRGB,
            ycbcr_enc: ycbcr.encoding as u16,
            quantization: ycbcr.quantization as u16,
            ..Default::default()
        },
        ..Default::default()
    };
    v4l2::retrying(|| subdev.s_fmt(&mut fmt)).map_err(|errno| {
        log::error!(
            "VIDIOC_SUBDEV_S_FMT on {} pad {} failed: {}",
            subdev.name(),
            pad,
            errno
        );
        Error::rejected("VIDIOC_SUBDEV_S_FMT", subdev.name(), errno)
    })?;
    log::debug!(
        "{} pad {}: {}x{} code {:#x}",
        subdev.name(),
        pad,
        fmt.format.width,
        fmt.format.height,
        fmt.format.code
    );
    Ok(())
}

fn set_crop(subdev: &dyn SubdevNode, pad: u32, (width, height): (u32, u32)) -> Result<(), Error> {
    let mut sel = sys::v4l2_subdev_selection {
        which: sys::V4L2_SUBDEV_FORMAT_ACTIVE,
        pad,
        target: sys::V4L2_SEL_TGT_CROP,
        r: sys::v4l2_rect {
            left: 0,
            top: 0,
            width,
            height,
        },
        ..Default::default()
    };
    v4l2::retrying(|| subdev.s_selection(&mut sel)).map_err(|errno| {
        log::error!("VIDIOC_SUBDEV_S_SELECTION on {} failed: {}", subdev.name(), errno);
        Error::rejected("VIDIOC_SUBDEV_S_SELECTION", subdev.name(), errno)
    })?;
    log::debug!("{} pad {}: crop {}x{}", subdev.name(), pad, width, height);
    Ok(())
}

fn set_flip(subdev: &dyn SubdevNode, id: u32, on: bool) -> Result<(), Error> {
    let mut ctrl = sys::v4l2_control {
        id,
        value: on as i32,
    };
    match v4l2::retrying(|| subdev.s_ctrl(&mut ctrl)) {
        Ok(()) => Ok(()),
        Err(errno @ (Errno::EINVAL | Errno::ENOTTY)) => {
            if on {
                log::warn!("{} cannot flip ({:#x}): {}", subdev.name(), id, errno);
            }
            Ok(())
        }
        Err(errno) => {
            log::error!("VIDIOC_S_CTRL on {} failed: {}", subdev.name(), errno);
            Err(Error::rejected("VIDIOC_S_CTRL", subdev.name(), errno))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fake::{FakePlatform, FakeVideo, IP},
        format::PixelFormat,
    };

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.set_devfile_input("/dev/video0");
        settings.set_devfile_output("/dev/video1");
        settings
    }

    fn wire(session: &mut Session, platform: &FakePlatform, input: VideoInfo, output: VideoInfo) {
        session
            .wire(
                platform,
                (&input, YcbcrParams::default()),
                (&output, YcbcrParams::default()),
                (false, false),
            )
            .unwrap();
    }

    #[test]
    fn test_open() {
        let platform = FakePlatform::vsp();
        let session = Session::open(&platform, &settings()).unwrap();
        assert_eq!(session.card(Queue::Output).entity, "rpf.0");
        assert_eq!(session.card(Queue::Capture).entity, "wpf.0");
        assert_eq!(session.wiring(), Wiring::Unconfigured);
        assert!(session.terminal().ends_with("wpf.0 output"));
        assert!(platform.subdev("rpf.0").lock().unwrap().is_open());
        assert!(platform.subdev("wpf.0").lock().unwrap().is_open());
        drop(session);
        assert!(!platform.subdev("rpf.0").lock().unwrap().is_open());
        assert!(!platform.subdev("wpf.0").lock().unwrap().is_open());
    }

    #[test]
    fn test_open_mismatched_ip() {
        let platform = FakePlatform::with_videos(
            FakeVideo::input("/dev/video0"),
            FakeVideo::with_card(
                "/dev/video1",
                "fea28000.vsp wpf.0 output",
                sys::V4L2_CAP_VIDEO_CAPTURE_MPLANE | sys::V4L2_CAP_STREAMING,
            ),
        );
        assert!(matches!(
            Session::open(&platform, &settings()),
            Err(Error::ConfigInvalid(_))
        ));
        assert_eq!(platform.subdev("rpf.0").lock().unwrap().opened, 0);
    }

    #[test]
    fn test_open_wrong_queue() {
        let platform = FakePlatform::with_videos(
            FakeVideo::output("/dev/video0"),
            FakeVideo::output("/dev/video1"),
        );
        assert!(matches!(
            Session::open(&platform, &settings()),
            Err(Error::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_wire_direct_then_resized_then_direct() {
        let platform = FakePlatform::vsp();
        let mut session = Session::open(&platform, &settings()).unwrap();
        let media = platform.media.clone();
        let rpf = format!("{} rpf.0", IP);
        let uds = format!("{} uds.0", IP);
        let wpf = format!("{} wpf.0", IP);

        wire(
            &mut session,
            &platform,
            VideoInfo::new(PixelFormat::I420, 1920, 1080),
            VideoInfo::new(PixelFormat::Bgrx, 1920, 1080),
        );
        assert_eq!(session.wiring(), Wiring::Direct);
        assert!(!session.has_resize());
        assert!(media.is_enabled(&rpf, &wpf));
        assert_eq!(platform.subdev(RESIZE_ENTITY).lock().unwrap().opened, 0);

        wire(
            &mut session,
            &platform,
            VideoInfo::new(PixelFormat::Nv12, 1280, 720),
            VideoInfo::new(PixelFormat::Nv12, 640, 480),
        );
        assert_eq!(session.wiring(), Wiring::Resized);
        assert!(media.is_enabled(&rpf, &uds));
        assert!(media.is_enabled(&uds, &wpf));
        assert!(!media.is_enabled(&rpf, &wpf));
        assert!(platform.subdev(RESIZE_ENTITY).lock().unwrap().is_open());

        wire(
            &mut session,
            &platform,
            VideoInfo::new(PixelFormat::Nv12, 640, 480),
            VideoInfo::new(PixelFormat::Bgrx, 640, 480),
        );
        assert_eq!(session.wiring(), Wiring::Direct);
        assert!(!platform.subdev(RESIZE_ENTITY).lock().unwrap().is_open());
        assert!(!media.is_enabled(&rpf, &uds));
        assert!(media.is_enabled(&rpf, &wpf));
    }

    #[test]
    fn test_wire_crops_odd_input() {
        let platform = FakePlatform::vsp();
        let mut session = Session::open(&platform, &settings()).unwrap();
        wire(
            &mut session,
            &platform,
            VideoInfo::new(PixelFormat::I420, 1279, 720),
            VideoInfo::new(PixelFormat::Nv12, 640, 480),
        );
        let rpf = platform.subdev("rpf.0");
        let rpf = rpf.lock().unwrap();
        assert_eq!(rpf.crops.len(), 1);
        let (pad, rect) = rpf.crops[0];
        assert_eq!(pad, 0);
        assert_eq!((rect.width, rect.height), (1278, 720));
        let sink = rpf.pad(0).unwrap();
        assert_eq!((sink.width, sink.height), (1280, 720));
        assert_eq!(sink.code, sys::MEDIA_BUS_FMT_AYUV8_1X32);
        let source = rpf.pad(1).unwrap();
        assert_eq!((source.width, source.height), (1278, 720));

        let uds = platform.subdev(RESIZE_ENTITY);
        let uds = uds.lock().unwrap();
        assert_eq!(uds.pad(0).map(|p| (p.width, p.height)), Some((1278, 720)));
        assert_eq!(uds.pad(1).map(|p| (p.width, p.height)), Some((640, 480)));
    }

    #[test]
    fn test_capture_queue_matches_write_pads() {
        let platform = FakePlatform::vsp();
        let mut session = Session::open(&platform, &settings()).unwrap();
        let output = VideoInfo::new(PixelFormat::I420, 641, 481);
        wire(
            &mut session,
            &platform,
            VideoInfo::new(PixelFormat::Nv12, 1280, 720),
            output,
        );
        session
            .setup_queue(Queue::Capture, &output, YcbcrParams::default(), MemoryMode::DmaBuf, &[])
            .unwrap();

        let wpf = platform.subdev("wpf.0");
        let wpf = wpf.lock().unwrap();
        for pad in [INPUT_PAD, OUTPUT_PAD] {
            let fmt = wpf.pad(pad).unwrap();
            assert_eq!((fmt.width, fmt.height), (640, 480));
        }
        assert_eq!(platform.output.requested_size(Queue::Capture), Some((640, 480)));
        // the input queue still rounds up
        assert_eq!(
            queue_size(Queue::Output, output.entry().unwrap(), &output).unwrap(),
            (642, 482)
        );
    }

    #[test]
    fn test_wire_pad_colorimetry() {
        let platform = FakePlatform::vsp();
        let mut session = Session::open(&platform, &settings()).unwrap();
        let input = VideoInfo::new(PixelFormat::Nv12, 64, 64);
        let output = VideoInfo::new(PixelFormat::Argb, 64, 64);
        session
            .wire(
                &platform,
                (
                    &input,
                    YcbcrParams::new(sys::V4L2_YCBCR_ENC_709, sys::V4L2_QUANTIZATION_FULL_RANGE),
                ),
                (&output, YcbcrParams::default()),
                (true, false),
            )
            .unwrap();
        let rpf = platform.subdev("rpf.0");
        let pad = rpf.lock().unwrap().pad(0).unwrap();
        assert_eq!(pad.ycbcr_enc as u32, sys::V4L2_YCBCR_ENC_601);
        assert_eq!(pad.quantization as u32, sys::V4L2_QUANTIZATION_FULL_RANGE);
        assert_eq!(pad.field, sys::V4L2_FIELD_NONE);
        assert_eq!(pad.colorspace, sys::V4L2_COLORSPACE_SRGB);

        let wpf = platform.subdev("wpf.0");
        let wpf = wpf.lock().unwrap();
        assert_eq!(wpf.pad(1).unwrap().code, sys::MEDIA_BUS_FMT_ARGB8888_1X32);
        assert!(wpf.controls.contains(&(sys::V4L2_CID_HFLIP, 1)));
        assert!(wpf.controls.contains(&(sys::V4L2_CID_VFLIP, 0)));
    }

    #[test]
    fn test_flip_rejected_is_not_fatal() {
        let platform = FakePlatform::vsp();
        let mut session = Session::open(&platform, &settings()).unwrap();
        platform.subdev("wpf.0").lock().unwrap().reject_controls = true;
        let info = VideoInfo::new(PixelFormat::Yuy2, 32, 32);
        session
            .wire(
                &platform,
                (&info, YcbcrParams::default()),
                (&info, YcbcrParams::default()),
                (true, true),
            )
            .unwrap();
        assert_eq!(session.wiring(), Wiring::Direct);
    }

    #[test]
    fn test_setup_queue_busy_is_released_first() {
        let platform = FakePlatform::vsp();
        let mut session = Session::open(&platform, &settings()).unwrap();
        let info = VideoInfo::new(PixelFormat::Nv12, 64, 32);
        session
            .setup_queue(Queue::Output, &info, YcbcrParams::default(), MemoryMode::DmaBuf, &[64, 64])
            .unwrap();
        assert_eq!(platform.input.buffer_count(Queue::Output), 1);
        // switching modes re-requests buffers instead of failing with EBUSY
        session
            .setup_queue(Queue::Output, &info, YcbcrParams::default(), MemoryMode::UserPtr, &[64, 64])
            .unwrap();
        assert_eq!(platform.input.memory(Queue::Output), Some(MemoryMode::UserPtr));
        assert_eq!(session.memory(Queue::Output), Some(MemoryMode::UserPtr));
        assert_eq!(session.strides(Queue::Output), &[64, 64]);
    }

    #[test]
    fn test_setup_queue_substituted_format() {
        let platform = FakePlatform::vsp();
        platform
            .output
            .substitute(Some(crate::fourcc::FourCC::from_code(sys::V4L2_PIX_FMT_YUYV)));
        let mut session = Session::open(&platform, &settings()).unwrap();
        let info = VideoInfo::new(PixelFormat::Bgrx, 64, 32);
        assert!(matches!(
            session.setup_queue(Queue::Capture, &info, YcbcrParams::default(), MemoryMode::DmaBuf, &[]),
            Err(Error::UnsupportedFormat(_))
        ));
    }
}
