// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Device discovery through `/sys/class/video4linux`.
//!
//! The VSP driver registers one subdevice per processing block and names
//! each of them `"<ip> <entity>"`, e.g. `"fe960000.vsp rpf.0"`. Video nodes
//! carry a `device/mediaN` link to their media controller and a `name`
//! attribute matching their own media entity.

use crate::{
    node::{MediaFile, MediaNode, Platform, SubdevFile, SubdevNode, V4l2Node, VideoNode},
    Error,
};
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Highest index probed for `v4l-subdevN` and `mediaN`.
const MAX_NODES: u32 = 256;

/// [`Platform`] for a running Linux system.
#[derive(Debug, Clone)]
pub struct SysfsPlatform {
    sysfs: PathBuf,
    dev: PathBuf,
}

impl Default for SysfsPlatform {
    fn default() -> Self {
        SysfsPlatform {
            sysfs: PathBuf::from("/sys/class/video4linux"),
            dev: PathBuf::from("/dev"),
        }
    }
}

impl SysfsPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `sysfs` in place of `/sys/class/video4linux` and `dev` in place
    /// of `/dev`.
    pub fn with_roots(sysfs: impl Into<PathBuf>, dev: impl Into<PathBuf>) -> Self {
        SysfsPlatform {
            sysfs: sysfs.into(),
            dev: dev.into(),
        }
    }

    /// Path and name of the first subdevice whose name starts with
    /// `ip_name` and contains `entity`.
    pub fn find_subdev(&self, ip_name: &str, entity: &str) -> Result<(PathBuf, String), Error> {
        for index in 0..MAX_NODES {
            let attr = self.sysfs.join(format!("v4l-subdev{}", index)).join("name");
            let name = match fs::read_to_string(&attr) {
                Ok(name) => name,
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) => return Err(Error::Io(err)),
            };
            let name = name.trim_end_matches('\n');
            if name.starts_with(ip_name) && name.contains(entity) {
                log::debug!("subdevice for {} {} is v4l-subdev{}", ip_name, entity, index);
                return Ok((
                    self.dev.join(format!("v4l-subdev{}", index)),
                    name.to_string(),
                ));
            }
        }
        Err(Error::EntityNotFound(format!("{} {}", ip_name, entity)))
    }

    /// Path of the media controller `video` belongs to.
    pub fn find_media(&self, video: &Path) -> Result<PathBuf, Error> {
        let node = node_name(video)?;
        let device = self.sysfs.join(node).join("device");
        for index in 0..MAX_NODES {
            if device.join(format!("media{}", index)).exists() {
                let path = self.dev.join(format!("media{}", index));
                log::debug!("media device = {}", path.display());
                return Ok(path);
            }
        }
        log::error!("no media device for {}", video.display());
        Err(Error::EntityNotFound(format!(
            "media device of {}",
            video.display()
        )))
    }
}

fn node_name(video: &Path) -> Result<&str, Error> {
    video
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::ConfigInvalid(format!("bad device path {}", video.display())))
}

impl Platform for SysfsPlatform {
    fn open_video(&self, path: &Path) -> Result<Arc<dyn VideoNode>, Error> {
        Ok(Arc::new(V4l2Node::open(path)?))
    }

    fn open_subdev(&self, ip_name: &str, entity: &str) -> Result<Box<dyn SubdevNode>, Error> {
        let (path, name) = self.find_subdev(ip_name, entity)?;
        Ok(Box::new(SubdevFile::open(path, name)?))
    }

    fn open_media(&self, video: &Path) -> Result<Box<dyn MediaNode>, Error> {
        let path = self.find_media(video)?;
        Ok(Box::new(MediaFile::open(path)?))
    }

    fn video_entity_name(&self, video: &Path) -> Result<String, Error> {
        let attr = self.sysfs.join(node_name(video)?).join("name");
        let name = fs::read_to_string(&attr).map_err(|err| {
            log::error!("{} couldn't be read: {}", attr.display(), err);
            Error::Io(err)
        })?;
        Ok(name.trim_end_matches('\n').to_string())
    }
}
