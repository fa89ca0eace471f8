// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Format and allocation negotiation with the host pipeline.
//!
//! Negotiation runs in two steps. [`transform_caps`] turns the caps of one
//! side into everything the other side could be: every supported format at
//! any size, with frame rate, interlacing and colorimetry carried across.
//! [`fixate`] then picks one concrete [`VideoInfo`] out of the candidates
//! the peer accepted.

use crate::{
    format::{self, PixelFormat},
    pool::BufferPool,
    video::{Colorimetry, Fraction, InterlaceMode, VideoInfo},
    Error,
};

/// Largest frame dimension accepted during negotiation.
pub const MAX_DIMENSION: u32 = format::MAX_DIMENSION;

/// Side of the element a set of caps belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Caps flowing in, i.e. the input side
    Input,
    /// Caps flowing out, i.e. the output side
    Output,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Input => Direction::Output,
            Direction::Output => Direction::Input,
        }
    }
}

/// A partially fixed format: fields left as `None` are free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub format: PixelFormat,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<Fraction>,
    pub interlace: Option<InterlaceMode>,
    pub colorimetry: Option<Colorimetry>,
}

impl Candidate {
    /// A candidate with only the format fixed.
    pub fn any(format: PixelFormat) -> Self {
        Candidate {
            format,
            width: None,
            height: None,
            fps: None,
            interlace: None,
            colorimetry: None,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}

impl From<&VideoInfo> for Candidate {
    fn from(info: &VideoInfo) -> Self {
        Candidate {
            format: info.format,
            width: Some(info.width),
            height: Some(info.height),
            fps: Some(info.fps),
            interlace: Some(info.interlace),
            colorimetry: Some(info.colorimetry),
        }
    }
}

/// Caps the other side can take given `caps` on this side: any supported
/// format at any size, keeping rate, interlacing and colorimetry.
pub fn transform_caps(caps: &Candidate) -> Vec<Candidate> {
    PixelFormat::ALL
        .iter()
        .map(|format| Candidate {
            format: *format,
            width: None,
            height: None,
            fps: caps.fps,
            interlace: caps.interlace,
            colorimetry: caps.colorimetry,
        })
        .collect()
}

/// Scales `other` of the known frame by the ratio `set / known`.
fn scale(set: u32, known: u32, other: u32) -> u32 {
    if known == 0 {
        return other;
    }
    let scaled = set as u64 * other as u64 / known as u64;
    scaled.clamp(1, MAX_DIMENSION as u64) as u32
}

/// Completes `candidate` against the known side.
fn complete(known: &VideoInfo, candidate: &Candidate) -> Result<VideoInfo, Error> {
    let entry = format::lookup(candidate.format)?;
    let (width, height) = match (candidate.width, candidate.height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, scale(w, known.width, known.height)),
        (None, Some(h)) => (scale(h, known.height, known.width), h),
        (None, None) => (known.width, known.height),
    };
    let width = entry.round_down_width(width.min(MAX_DIMENSION));
    let height = entry.round_down_height(height.min(MAX_DIMENSION));
    if width == 0 || height == 0 {
        return Err(Error::UnsupportedFormat(format!(
            "{} cannot hold a {}x{} frame",
            candidate.format, known.width, known.height
        )));
    }
    let info = VideoInfo {
        format: candidate.format,
        width,
        height,
        fps: known.fps,
        interlace: known.interlace,
        colorimetry: candidate.colorimetry.unwrap_or_default(),
    };
    info.validate()?;
    Ok(info)
}

/// Picks the output of negotiation for the side opposite `direction`.
///
/// `known` is the fixed caps on `direction`; `candidates` are what the
/// peer on the other side accepts, in order of preference. `validate` is
/// called with the (input, output) pair and may reject it, typically by
/// asking the hardware with TRY_FMT.
pub fn fixate<F>(
    direction: Direction,
    known: &VideoInfo,
    candidates: &[Candidate],
    mut validate: F,
) -> Result<VideoInfo, Error>
where
    F: FnMut(&VideoInfo, &VideoInfo) -> Result<(), Error>,
{
    known.validate()?;
    for candidate in candidates {
        let info = match complete(known, candidate) {
            Ok(info) => info,
            Err(err) => {
                log::trace!("skipping {:?}: {}", candidate.format, err);
                continue;
            }
        };
        let pair = match direction {
            Direction::Input => (known, &info),
            Direction::Output => (&info, known),
        };
        match validate(pair.0, pair.1) {
            Ok(()) => {
                log::debug!("fixated {:?} side to {}", direction.opposite(), info);
                return Ok(info);
            }
            Err(err) => log::debug!("{} rejected: {}", info, err),
        }
    }
    Err(Error::UnsupportedFormat(format!(
        "no candidate format fits {}",
        known
    )))
}

/// A memory allocator offered during allocation negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocatorKind {
    DmaBuf,
    System,
    Other(String),
}

/// A buffer pool offered during allocation negotiation.
#[derive(Debug, Clone)]
pub struct PoolOffer {
    pub pool: BufferPool,
    /// Bytes per buffer over all planes
    pub size: usize,
    pub min_buffers: u32,
    pub max_buffers: u32,
}

/// Allocation query exchanged with the downstream peer.
#[derive(Debug, Clone, Default)]
pub struct AllocationQuery {
    pub allocators: Vec<AllocatorKind>,
    pub pools: Vec<PoolOffer>,
    pub min_buffers: u32,
    /// Per-plane offsets and strides are requested on every buffer
    pub video_meta: bool,
}

impl AllocationQuery {
    pub fn new(min_buffers: u32) -> Self {
        AllocationQuery {
            min_buffers,
            ..Default::default()
        }
    }

    pub fn with_allocator(mut self, allocator: AllocatorKind) -> Self {
        self.allocators.push(allocator);
        self
    }

    /// Moves the dma-buf allocator to the front, dropping those ahead of
    /// it. Returns false when no dma-buf allocator is offered.
    pub fn prefer_dmabuf(&mut self) -> bool {
        match self
            .allocators
            .iter()
            .position(|a| *a == AllocatorKind::DmaBuf)
        {
            Some(pos) => {
                self.allocators.drain(..pos);
                true
            }
            None => false,
        }
    }
}

/// What the element hands upstream when asked for an allocation proposal.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub pool: PoolOffer,
    pub video_meta: bool,
}
