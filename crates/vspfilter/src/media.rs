// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Media-controller entity discovery and link control.
//!
//! A VSP instance exposes its blocks as entities of one media graph. The
//! filter only ever routes a single chain through it:
//!
//! ```text
//! rpf.N ──────────────► wpf.N ──► wpf.N output
//! rpf.N ──► uds.0 ────► wpf.N ──► wpf.N output
//! ```
//!
//! Each source entity may have at most one enabled outbound link. Wiring a
//! new chain therefore starts by tearing down whatever the previous chain
//! left enabled, see [`deactivate_link`].

use crate::{node::MediaNode, v4l2::retrying, Error};
use nix::errno::Errno;
use std::collections::HashMap;
use vspfilter_sys as sys;

/// Upper bound on chain length; the VSP graph is at most a few hops deep.
const MAX_DEPTH: usize = 16;

/// A node of the media graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: u32,
    /// Full name including the IP block, e.g. `fe960000.vsp rpf.0`
    pub name: String,
    pub pads: u16,
    pub links: u16,
}

/// An outbound link of an entity.
#[derive(Clone, Copy)]
pub struct Link {
    desc: sys::media_link_desc,
}

impl Link {
    pub fn source(&self) -> (u32, u16) {
        (self.desc.source.entity, self.desc.source.index)
    }

    pub fn sink(&self) -> (u32, u16) {
        (self.desc.sink.entity, self.desc.sink.index)
    }

    pub fn flags(&self) -> u32 {
        self.desc.flags
    }

    pub fn is_enabled(&self) -> bool {
        self.desc.flags & sys::MEDIA_LNK_FL_ENABLED != 0
    }

    pub fn is_immutable(&self) -> bool {
        self.desc.flags & sys::MEDIA_LNK_FL_IMMUTABLE != 0
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("source", &self.source())
            .field("sink", &self.sink())
            .field("flags", &self.flags())
            .finish()
    }
}

/// Entities of one media device, keyed by full name.
#[derive(Debug, Default)]
pub struct EntityTable {
    by_name: HashMap<String, Entity>,
}

impl EntityTable {
    /// Enumerates every entity of `media`.
    pub fn discover(media: &dyn MediaNode) -> Result<Self, Error> {
        let mut by_name = HashMap::new();
        let mut next = 0u32;
        loop {
            let mut desc = sys::media_entity_desc {
                id: next | sys::MEDIA_ENT_ID_FLAG_NEXT,
                ..Default::default()
            };
            match retrying(|| media.enum_entities(&mut desc)) {
                Ok(()) => {}
                Err(Errno::EINVAL) => break,
                Err(errno) => {
                    log::error!("MEDIA_IOC_ENUM_ENTITIES after id {} failed: {}", next, errno);
                    return Err(Error::rejected(
                        "MEDIA_IOC_ENUM_ENTITIES",
                        format!("entity {}", next),
                        errno,
                    ));
                }
            }
            let entity = Entity {
                id: desc.id,
                name: desc.name_str(),
                pads: desc.pads,
                links: desc.links,
            };
            log::debug!(
                "entity {} '{}' pads={} links={}",
                entity.id,
                entity.name,
                entity.pads,
                entity.links
            );
            next = desc.id;
            by_name.insert(entity.name.clone(), entity);
        }
        Ok(EntityTable { by_name })
    }

    pub fn get(&self, name: &str) -> Result<&Entity, Error> {
        self.by_name.get(name).ok_or_else(|| {
            log::error!("no media entity for {}", name);
            Error::EntityNotFound(name.to_string())
        })
    }

    pub fn by_id(&self, id: u32) -> Option<&Entity> {
        self.by_name.values().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Entities ordered by id.
    pub fn entities(&self) -> Vec<&Entity> {
        let mut all: Vec<_> = self.by_name.values().collect();
        all.sort_by_key(|e| e.id);
        all
    }

    fn name_of(&self, id: u32) -> String {
        self.by_id(id)
            .map(|e| e.name.clone())
            .unwrap_or_else(|| format!("entity {}", id))
    }
}

/// Outbound links of `entity`.
pub fn links(media: &dyn MediaNode, entity: &Entity) -> Result<Vec<Link>, Error> {
    if entity.links == 0 {
        return Ok(Vec::new());
    }
    let mut pads = vec![sys::media_pad_desc::default(); entity.pads.max(1) as usize];
    let mut descs = vec![sys::media_link_desc::default(); entity.links as usize];
    let mut req = sys::media_links_enum {
        entity: entity.id,
        pads: pads.as_mut_ptr(),
        links: descs.as_mut_ptr(),
        ..Default::default()
    };
    retrying(|| media.enum_links(&mut req)).map_err(|errno| {
        log::error!("MEDIA_IOC_ENUM_LINKS for {} failed: {}", entity.name, errno);
        Error::rejected("MEDIA_IOC_ENUM_LINKS", entity.name.clone(), errno)
    })?;
    Ok(descs
        .into_iter()
        .filter(|d| d.source.entity == entity.id)
        .map(|desc| Link { desc })
        .collect())
}

fn setup_link(
    media: &dyn MediaNode,
    table: &EntityTable,
    link: &mut Link,
    enable: bool,
) -> Result<(), Error> {
    if enable {
        link.desc.flags |= sys::MEDIA_LNK_FL_ENABLED;
    } else {
        link.desc.flags &= !sys::MEDIA_LNK_FL_ENABLED;
    }
    retrying(|| media.setup_link(&mut link.desc)).map_err(|errno| {
        let target = format!(
            "{} -> {}",
            table.name_of(link.desc.source.entity),
            table.name_of(link.desc.sink.entity)
        );
        log::error!("MEDIA_IOC_SETUP_LINK {} failed: {}", target, errno);
        Error::rejected("MEDIA_IOC_SETUP_LINK", target, errno)
    })
}

/// Enables the link from `source` to `sink`.
///
/// Fails with [`Error::ConflictingLink`] when `source` already has another
/// enabled outbound link and with [`Error::LinkNotFound`] when no link to
/// `sink` exists. Nothing is modified on failure.
pub fn activate_link(
    media: &dyn MediaNode,
    table: &EntityTable,
    source: &str,
    sink: &str,
) -> Result<(), Error> {
    let src = table.get(source)?;
    let dst = table.get(sink)?;

    let mut target = None;
    for link in links(media, src)? {
        if link.sink().0 == dst.id {
            target = Some(link);
        } else if link.is_enabled() {
            let active_sink = table.name_of(link.sink().0);
            log::warn!("an active link from {} to {} found", source, active_sink);
            return Err(Error::ConflictingLink {
                source: source.to_string(),
                active_sink,
            });
        }
    }

    let mut link = target.ok_or_else(|| Error::LinkNotFound {
        source: source.to_string(),
        sink: sink.to_string(),
    })?;
    setup_link(media, table, &mut link, true)?;
    log::debug!("a link from {} to {} enabled", source, sink);
    Ok(())
}

/// Disables every enabled, mutable link downstream of `source`, the far end
/// of the chain first.
pub fn deactivate_link(media: &dyn MediaNode, table: &EntityTable, source: &str) -> Result<(), Error> {
    let src = table.get(source)?;
    deactivate_from(media, table, src, 0)
}

fn deactivate_from(
    media: &dyn MediaNode,
    table: &EntityTable,
    src: &Entity,
    depth: usize,
) -> Result<(), Error> {
    if depth > MAX_DEPTH {
        return Err(Error::ConfigInvalid(format!(
            "link chain from {} is deeper than {}",
            src.name, MAX_DEPTH
        )));
    }
    for mut link in links(media, src)? {
        if !link.is_enabled() || link.is_immutable() {
            continue;
        }
        let sink = table
            .by_id(link.sink().0)
            .ok_or_else(|| Error::EntityNotFound(format!("entity {}", link.sink().0)))?;
        deactivate_from(media, table, sink, depth + 1)?;
        setup_link(media, table, &mut link, false)?;
        log::debug!("a link from {} to {} deactivated", src.name, sink.name);
    }
    Ok(())
}
