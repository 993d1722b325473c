//! Global pointers and their resolution to fabric coordinates.

use std::collections::HashMap;
use std::fmt;

use fabric::Rank;

use crate::error::{Error, Result};
use crate::segment::LOCAL_ALLOC_SEG;
use crate::team::TeamId;

/// Identifier of a global memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub u16);

impl SegmentId {
    /// Each unit's local-allocation window.
    pub const LOCAL: SegmentId = SegmentId(0);
}

/// Unit id relative to the whole runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalUnit(pub u32);

/// Unit id relative to a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TeamUnit(pub u32);

/// Address of a byte range owned by one unit.
///
/// For [`SegmentId::LOCAL`] the unit is global; for team-allocated
/// segments it is relative to the allocating team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalPtr {
    pub unit: u32,
    pub segid: SegmentId,
    pub offset: u64,
}

impl GlobalPtr {
    pub const fn new(unit: u32, segid: SegmentId, offset: u64) -> Self {
        Self {
            unit,
            segid,
            offset,
        }
    }

    /// Same region, `bytes` further in.
    pub const fn add(self, bytes: u64) -> Self {
        Self {
            offset: self.offset + bytes,
            ..self
        }
    }

    /// Same offset, on another unit.
    pub const fn with_unit(self, unit: u32) -> Self {
        Self { unit, ..self }
    }
}

impl fmt::Display for GlobalPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {:#x})", self.unit, self.segid.0, self.offset)
    }
}

/// Fabric coordinates of a global pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Resolved {
    pub(crate) rank: Rank,
    pub(crate) seg: fabric::SegmentId,
    pub(crate) offset: u64,
}

/// Translation of one team-allocated segment.
#[derive(Debug, Clone)]
pub(crate) struct TranslationEntry {
    pub(crate) team: TeamId,
    /// Bytes per unit.
    pub(crate) size: usize,
    /// Global rank of each team unit.
    pub(crate) ranks: Vec<Rank>,
    /// Fabric segment of each team unit.
    pub(crate) segs: Vec<fabric::SegmentId>,
}

impl TranslationEntry {
    /// Fabric segment backing `rank`'s share, if `rank` is in the team.
    pub(crate) fn own_segment(&self, rank: Rank) -> Option<fabric::SegmentId> {
        let unit = self.ranks.binary_search(&rank).ok()?;
        self.segs.get(unit).copied()
    }
}

/// Segment translation table of one unit.
pub(crate) struct Translation {
    nranks: usize,
    local_size: usize,
    entries: HashMap<SegmentId, TranslationEntry>,
}

impl Translation {
    pub(crate) fn new(nranks: usize, local_size: usize) -> Self {
        Self {
            nranks,
            local_size,
            entries: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, segid: SegmentId, entry: TranslationEntry) {
        self.entries.insert(segid, entry);
    }

    pub(crate) fn remove(&mut self, segid: SegmentId) -> Option<TranslationEntry> {
        self.entries.remove(&segid)
    }

    pub(crate) fn get(&self, segid: SegmentId) -> Option<&TranslationEntry> {
        self.entries.get(&segid)
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (SegmentId, TranslationEntry)> + '_ {
        self.entries.drain()
    }

    /// Resolve `[gptr, gptr + nbytes)` to fabric coordinates.
    pub(crate) fn resolve(&self, gptr: GlobalPtr, nbytes: usize) -> Result<Resolved> {
        let (rank, seg, size) = if gptr.segid == SegmentId::LOCAL {
            let unit = usize::try_from(gptr.unit).unwrap_or(usize::MAX);
            if unit >= self.nranks {
                return Err(Error::invalid(format!("unit {} out of range", gptr.unit)));
            }
            (unit as Rank, LOCAL_ALLOC_SEG, self.local_size)
        } else {
            let entry = self
                .entries
                .get(&gptr.segid)
                .ok_or_else(|| Error::NotFound(format!("segment {}", gptr.segid.0)))?;
            let unit = gptr.unit as usize;
            let (Some(&rank), Some(&seg)) = (entry.ranks.get(unit), entry.segs.get(unit)) else {
                return Err(Error::invalid(format!(
                    "unit {} out of range for segment {}",
                    gptr.unit, gptr.segid.0
                )));
            };
            (rank, seg, entry.size)
        };
        let end = gptr.offset.checked_add(nbytes as u64);
        if end.is_none_or(|end| end > size as u64) {
            return Err(Error::invalid(format!(
                "{nbytes} bytes at {gptr} exceed segment of {size} bytes"
            )));
        }
        Ok(Resolved {
            rank,
            seg,
            offset: gptr.offset,
        })
    }
}
