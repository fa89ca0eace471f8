// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Kernel device nodes.
//!
//! The filter talks to three kinds of character devices:
//!
//! - [`VideoNode`] - a multi-planar V4L2 queue (`/dev/videoN`)
//! - [`SubdevNode`] - a V4L2 subdevice of one VSP block (`/dev/v4l-subdevN`)
//! - [`MediaNode`] - the media controller of the VSP (`/dev/mediaN`)
//!
//! Each trait method issues exactly one ioctl and reports the raw errno, so
//! callers can wrap any of them in [`crate::v4l2::retrying`]. The
//! [`Platform`] trait locates and opens the nodes; [`crate::sysfs::SysfsPlatform`]
//! is the implementation backed by `/sys/class/video4linux` and `/dev`.

use crate::Error;
use nix::{
    errno::Errno,
    poll::{poll, PollFd, PollFlags, PollTimeout},
};
use std::{
    fs::{File, OpenOptions},
    os::{
        fd::{AsFd, AsRawFd},
        unix::fs::FileTypeExt,
    },
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use vspfilter_sys as sys;

/// A multi-planar V4L2 video queue.
pub trait VideoNode: Send + Sync {
    /// Path the node was opened from, used in log and error messages.
    fn path(&self) -> &Path;
    fn querycap(&self) -> nix::Result<sys::v4l2_capability>;
    fn s_fmt(&self, fmt: &mut sys::v4l2_format) -> nix::Result<()>;
    fn try_fmt(&self, fmt: &mut sys::v4l2_format) -> nix::Result<()>;
    fn reqbufs(&self, req: &mut sys::v4l2_requestbuffers) -> nix::Result<()>;
    fn qbuf(&self, buf: &mut sys::v4l2_buffer) -> nix::Result<()>;
    fn dqbuf(&self, buf: &mut sys::v4l2_buffer) -> nix::Result<()>;
    fn expbuf(&self, exp: &mut sys::v4l2_exportbuffer) -> nix::Result<()>;
    fn streamon(&self, buf_type: u32) -> nix::Result<()>;
    fn streamoff(&self, buf_type: u32) -> nix::Result<()>;
    /// Waits until a buffer can be dequeued. `Ok(false)` on timeout.
    fn wait_ready(&self, timeout: Duration) -> nix::Result<bool>;
}

/// A V4L2 subdevice exposing pad formats, selections and controls.
pub trait SubdevNode: Send {
    fn name(&self) -> &str;
    fn s_fmt(&self, fmt: &mut sys::v4l2_subdev_format) -> nix::Result<()>;
    fn s_selection(&self, sel: &mut sys::v4l2_subdev_selection) -> nix::Result<()>;
    fn s_ctrl(&self, ctrl: &mut sys::v4l2_control) -> nix::Result<()>;
}

/// A media controller device.
pub trait MediaNode: Send {
    fn enum_entities(&self, desc: &mut sys::media_entity_desc) -> nix::Result<()>;
    /// `links.pads` and `links.links` must point at arrays sized from the
    /// entity's pad and link counts.
    fn enum_links(&self, links: &mut sys::media_links_enum) -> nix::Result<()>;
    fn setup_link(&self, link: &mut sys::media_link_desc) -> nix::Result<()>;
}

/// Locates and opens the device nodes of one VSP instance.
pub trait Platform: Send {
    fn open_video(&self, path: &Path) -> Result<Arc<dyn VideoNode>, Error>;

    /// Opens the subdevice whose name starts with `ip_name` and contains
    /// `entity`.
    fn open_subdev(&self, ip_name: &str, entity: &str) -> Result<Box<dyn SubdevNode>, Error>;

    /// Opens the media controller the video node belongs to.
    fn open_media(&self, video: &Path) -> Result<Box<dyn MediaNode>, Error>;

    /// Name of the media entity backing the video node itself, which
    /// terminates the processing chain.
    fn video_entity_name(&self, video: &Path) -> Result<String, Error>;
}

/// Opens a character device read-write.
pub(crate) fn open_char_device(path: &Path) -> Result<File, Error> {
    let meta = std::fs::metadata(path).map_err(|err| {
        log::error!("cannot identify '{}': {}", path.display(), err);
        io_rejected("stat", path, &err)
    })?;
    if !meta.file_type().is_char_device() {
        return Err(Error::ConfigInvalid(format!(
            "{} is not a device",
            path.display()
        )));
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|err| {
            log::error!("cannot open '{}': {}", path.display(), err);
            io_rejected("open", path, &err)
        })
}

pub(crate) fn io_rejected(op: &'static str, path: &Path, err: &std::io::Error) -> Error {
    let errno = Errno::from_raw(err.raw_os_error().unwrap_or(libc::EIO));
    Error::rejected(op, path.display().to_string(), errno)
}

/// [`VideoNode`] over an open `/dev/videoN`.
#[derive(Debug)]
pub struct V4l2Node {
    path: PathBuf,
    file: File,
}

impl V4l2Node {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = open_char_device(path)?;
        Ok(V4l2Node {
            path: path.to_path_buf(),
            file,
        })
    }
}

impl VideoNode for V4l2Node {
    fn path(&self) -> &Path {
        &self.path
    }

    fn querycap(&self) -> nix::Result<sys::v4l2_capability> {
        let mut cap = sys::v4l2_capability::default();
        unsafe { sys::vidioc_querycap(self.file.as_raw_fd(), &mut cap) }?;
        Ok(cap)
    }

    fn s_fmt(&self, fmt: &mut sys::v4l2_format) -> nix::Result<()> {
        unsafe { sys::vidioc_s_fmt(self.file.as_raw_fd(), fmt) }.map(drop)
    }

    fn try_fmt(&self, fmt: &mut sys::v4l2_format) -> nix::Result<()> {
        unsafe { sys::vidioc_try_fmt(self.file.as_raw_fd(), fmt) }.map(drop)
    }

    fn reqbufs(&self, req: &mut sys::v4l2_requestbuffers) -> nix::Result<()> {
        unsafe { sys::vidioc_reqbufs(self.file.as_raw_fd(), req) }.map(drop)
    }

    fn qbuf(&self, buf: &mut sys::v4l2_buffer) -> nix::Result<()> {
        unsafe { sys::vidioc_qbuf(self.file.as_raw_fd(), buf) }.map(drop)
    }

    fn dqbuf(&self, buf: &mut sys::v4l2_buffer) -> nix::Result<()> {
        unsafe { sys::vidioc_dqbuf(self.file.as_raw_fd(), buf) }.map(drop)
    }

    fn expbuf(&self, exp: &mut sys::v4l2_exportbuffer) -> nix::Result<()> {
        unsafe { sys::vidioc_expbuf(self.file.as_raw_fd(), exp) }.map(drop)
    }

    fn streamon(&self, buf_type: u32) -> nix::Result<()> {
        let buf_type = buf_type as libc::c_int;
        unsafe { sys::vidioc_streamon(self.file.as_raw_fd(), &buf_type) }.map(drop)
    }

    fn streamoff(&self, buf_type: u32) -> nix::Result<()> {
        let buf_type = buf_type as libc::c_int;
        unsafe { sys::vidioc_streamoff(self.file.as_raw_fd(), &buf_type) }.map(drop)
    }

    fn wait_ready(&self, timeout: Duration) -> nix::Result<bool> {
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
        if poll(&mut fds, PollTimeout::from(millis))? == 0 {
            return Ok(false);
        }
        match fds[0].revents() {
            Some(revents) if revents.contains(PollFlags::POLLERR) => Err(Errno::EIO),
            _ => Ok(true),
        }
    }
}

/// [`SubdevNode`] over an open `/dev/v4l-subdevN`.
#[derive(Debug)]
pub struct SubdevFile {
    name: String,
    file: File,
}

impl SubdevFile {
    pub fn open(path: impl AsRef<Path>, name: impl Into<String>) -> Result<Self, Error> {
        let file = open_char_device(path.as_ref())?;
        Ok(SubdevFile {
            name: name.into(),
            file,
        })
    }
}

impl SubdevNode for SubdevFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn s_fmt(&self, fmt: &mut sys::v4l2_subdev_format) -> nix::Result<()> {
        unsafe { sys::vidioc_subdev_s_fmt(self.file.as_raw_fd(), fmt) }.map(drop)
    }

    fn s_selection(&self, sel: &mut sys::v4l2_subdev_selection) -> nix::Result<()> {
        unsafe { sys::vidioc_subdev_s_selection(self.file.as_raw_fd(), sel) }.map(drop)
    }

    fn s_ctrl(&self, ctrl: &mut sys::v4l2_control) -> nix::Result<()> {
        unsafe { sys::vidioc_s_ctrl(self.file.as_raw_fd(), ctrl) }.map(drop)
    }
}

/// [`MediaNode`] over an open `/dev/mediaN`.
#[derive(Debug)]
pub struct MediaFile {
    file: File,
}

impl MediaFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(MediaFile {
            file: open_char_device(path.as_ref())?,
        })
    }
}

impl MediaNode for MediaFile {
    fn enum_entities(&self, desc: &mut sys::media_entity_desc) -> nix::Result<()> {
        unsafe { sys::media_ioc_enum_entities(self.file.as_raw_fd(), desc) }.map(drop)
    }

    fn enum_links(&self, links: &mut sys::media_links_enum) -> nix::Result<()> {
        unsafe { sys::media_ioc_enum_links(self.file.as_raw_fd(), links) }.map(drop)
    }

    fn setup_link(&self, link: &mut sys::media_link_desc) -> nix::Result<()> {
        unsafe { sys::media_ioc_setup_link(self.file.as_raw_fd(), link) }.map(drop)
    }
}
