// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! VSP Filter Library for Rust
//!
//! Drives the Renesas R-Car VSP (video signal processor) to convert the
//! colorspace and scale video frames in hardware. The VSP is exposed by the
//! kernel as two multi-planar V4L2 queues (one fed with source frames, one
//! producing converted frames), a set of V4L2 subdevices for its processing
//! blocks and a media-controller graph linking them.
//!
//! The library wires that graph for each negotiated input/output format pair,
//! chooses per frame how buffer memory reaches the hardware (imported
//! dma-buf, exported pool buffer or page-aligned user pointer) and runs the
//! queue/wait/dequeue cycle.
//!
//! # Quick Start
//!
//! ```no_run
//! use vspfilter::config::Settings;
//! use vspfilter::element::{Transformed, VspFilter};
//! use vspfilter::format::PixelFormat;
//! use vspfilter::memory::Buffer;
//! use vspfilter::video::VideoInfo;
//!
//! let mut filter = VspFilter::new(Settings::default());
//! filter.start()?;
//!
//! let input = VideoInfo::new(PixelFormat::Nv12, 1920, 1080);
//! let output = VideoInfo::new(PixelFormat::Bgrx, 1280, 720);
//! filter.set_caps(&input, &output)?;
//!
//! let mut src = Buffer::alloc_host(&input)?;
//! let mut dst = Buffer::alloc_host(&output)?;
//! match filter.transform(&mut src, &mut dst)? {
//!     Transformed::Done => println!("converted"),
//!     Transformed::Dropped => println!("frame skipped"),
//! }
//! filter.stop();
//! # Ok::<(), vspfilter::Error>(())
//! ```
//!
//! # Modules
//!
//! - [`format`] - pixel format translation table
//! - [`v4l2`] - retrying ioctl wrapper and queue primitives
//! - [`media`] - entity discovery and link control
//! - [`pool`] - exported buffer pool
//! - [`strategy`] - per-frame buffer strategy
//! - [`element`] - the pipeline state machine

use nix::errno::Errno;
use std::{error, fmt, io, time::Duration};

pub mod caps;
pub mod config;
pub mod element;
pub mod format;
pub mod fourcc;
pub mod media;
pub mod memory;
pub mod node;
pub mod pool;
pub mod session;
pub mod strategy;
pub mod sysfs;
pub mod v4l2;
pub mod video;

#[cfg(test)]
mod fake;

/// Error type for VSP filter operations
#[derive(Debug)]
pub enum Error {
    /// I/O error outside of an ioctl (opening device nodes, reading sysfs)
    Io(io::Error),

    /// Bad or unreadable configuration, or caps that cannot be parsed
    ConfigInvalid(String),

    /// The kernel rejected an ioctl
    DeviceRejected {
        /// Request name, e.g. `VIDIOC_REQBUFS`
        op: &'static str,
        /// Device node or entity the request targeted
        target: String,
        errno: Errno,
    },

    /// Input and output disagree on frame rate or interlace mode
    FormatMismatch(String),

    /// No hardware mapping for a pixel format
    UnsupportedFormat(String),

    /// A named entity is absent from the media graph
    EntityNotFound(String),

    /// The source entity has no link to the requested sink
    LinkNotFound { source: String, sink: String },

    /// The source entity already has another enabled outbound link
    ConflictingLink { source: String, active_sink: String },

    /// Every pool buffer is on loan
    PoolExhausted,

    /// The pool could not be configured or started
    PoolActivationFailed(String),

    /// The pool was detached from its device and hands out no more buffers
    PoolOrphaned,

    /// A frame could not be mapped or does not match the negotiated layout
    InvalidBuffer(String),

    /// The hardware did not complete a frame within the wait bound
    DeviceTimeout(Duration),

    /// `transform` was called before caps were negotiated
    NotNegotiated,

    /// The operation is not valid in the element's current state
    InvalidState {
        op: &'static str,
        state: &'static str,
    },
}

impl Error {
    /// True when the kernel reported `EBUSY`, meaning buffers of the queue
    /// are still held by a consumer.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Error::DeviceRejected {
                errno: Errno::EBUSY,
                ..
            }
        )
    }

    /// True when a device node or entity could not be found or opened.
    pub fn is_device_missing(&self) -> bool {
        match self {
            Error::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ),
            Error::DeviceRejected { errno, .. } => matches!(
                errno,
                Errno::ENOENT | Errno::ENODEV | Errno::ENXIO | Errno::EACCES | Errno::EPERM
            ),
            Error::EntityNotFound(_) => true,
            _ => false,
        }
    }

    pub(crate) fn rejected(op: &'static str, target: impl Into<String>, errno: Errno) -> Self {
        Error::DeviceRejected {
            op,
            target: target.into(),
            errno,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::ConfigInvalid(msg) => write!(f, "invalid configuration: {}", msg),
            Error::DeviceRejected { op, target, errno } => {
                write!(f, "{} on {} failed: {}", op, target, errno)
            }
            Error::FormatMismatch(msg) => write!(f, "format mismatch: {}", msg),
            Error::UnsupportedFormat(fmt_name) => write!(f, "unsupported format: {}", fmt_name),
            Error::EntityNotFound(name) => write!(f, "no media entity named '{}'", name),
            Error::LinkNotFound { source, sink } => {
                write!(f, "no link from '{}' to '{}'", source, sink)
            }
            Error::ConflictingLink {
                source,
                active_sink,
            } => write!(
                f,
                "'{}' already has an active link to '{}'",
                source, active_sink
            ),
            Error::PoolExhausted => write!(f, "no buffers are left in the pool"),
            Error::PoolActivationFailed(msg) => write!(f, "buffer pool activation failed: {}", msg),
            Error::PoolOrphaned => write!(f, "buffer pool is orphaned"),
            Error::InvalidBuffer(msg) => write!(f, "invalid video buffer: {}", msg),
            Error::DeviceTimeout(timeout) => {
                write!(f, "device did not complete within {:?}", timeout)
            }
            Error::NotNegotiated => write!(f, "caps are not negotiated"),
            Error::InvalidState { op, state } => {
                write!(f, "{} is not allowed in state {}", op, state)
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::DeviceRejected { errno, .. } => Some(errno),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        Error::Io(io::Error::from(errno))
    }
}

/// Library version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
