//! Global memory: local-window allocations and team-allocated segments.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::gptr::{GlobalPtr, SegmentId, Translation, TranslationEntry};
use crate::runtime::Runtime;
use crate::team::TeamId;

const ALIGN: u64 = 8;

/// First-fit allocator over the local-allocation window.
#[derive(Debug)]
pub(crate) struct LocalHeap {
    /// Free `(offset, len)` blocks sorted by offset, never adjacent.
    free: Vec<(u64, u64)>,
    used: HashMap<u64, u64>,
}

impl LocalHeap {
    pub(crate) fn new(size: usize) -> Self {
        let size = size as u64 / ALIGN * ALIGN;
        let free = if size > 0 { vec![(0, size)] } else { Vec::new() };
        Self {
            free,
            used: HashMap::new(),
        }
    }

    pub(crate) fn alloc(&mut self, nbytes: usize) -> Option<u64> {
        let len = (nbytes as u64).max(1).checked_next_multiple_of(ALIGN)?;
        let i = self.free.iter().position(|&(_, l)| l >= len)?;
        let (offset, avail) = self.free[i];
        if avail == len {
            self.free.remove(i);
        } else {
            self.free[i] = (offset + len, avail - len);
        }
        self.used.insert(offset, len);
        Some(offset)
    }

    /// Returns `false` if `offset` is not the start of a live allocation.
    pub(crate) fn free(&mut self, offset: u64) -> bool {
        let Some(len) = self.used.remove(&offset) else {
            return false;
        };
        let i = self.free.partition_point(|&(o, _)| o < offset);
        self.free.insert(i, (offset, len));
        if i + 1 < self.free.len() && self.free[i].0 + self.free[i].1 == self.free[i + 1].0 {
            self.free[i].1 += self.free[i + 1].1;
            self.free.remove(i + 1);
        }
        if i > 0 && self.free[i - 1].0 + self.free[i - 1].1 == self.free[i].0 {
            self.free[i - 1].1 += self.free[i].1;
            self.free.remove(i);
        }
        true
    }
}

/// Per-unit global-memory bookkeeping.
pub(crate) struct GlobalMemory {
    pub(crate) heap: LocalHeap,
    pub(crate) translation: Translation,
    /// Lowest team segment id this unit has not seen in use.
    pub(crate) next_segid: u16,
}

impl GlobalMemory {
    pub(crate) fn new(nranks: usize, local_size: usize) -> Self {
        Self {
            heap: LocalHeap::new(local_size),
            translation: Translation::new(nranks, local_size),
            next_segid: 1,
        }
    }
}

impl Runtime {
    /// Allocate `nbytes` in the calling unit's local-allocation window.
    pub fn memalloc(&self, nbytes: usize) -> Result<GlobalPtr> {
        let offset = self.memory.lock().heap.alloc(nbytes).ok_or_else(|| {
            Error::ResourceExhausted(format!("no {nbytes} bytes left in the local window"))
        })?;
        let gptr = GlobalPtr::new(u32::from(self.endpoint.rank()), SegmentId::LOCAL, offset);
        tracing::trace!(%gptr, nbytes, "memalloc");
        Ok(gptr)
    }

    /// Release memory from [`Runtime::memalloc`].
    pub fn memfree(&self, gptr: GlobalPtr) -> Result<()> {
        if gptr.segid != SegmentId::LOCAL || gptr.unit != u32::from(self.endpoint.rank()) {
            return Err(Error::invalid(format!(
                "{gptr} was not allocated by this unit's memalloc"
            )));
        }
        if !self.memory.lock().heap.free(gptr.offset) {
            return Err(Error::invalid(format!("{gptr} is not a live allocation")));
        }
        tracing::trace!(%gptr, "memfree");
        Ok(())
    }

    /// Allocate `nbytes` on every unit of `team`. Collective over the team.
    ///
    /// The returned pointer addresses team unit 0 at offset 0; use
    /// [`GlobalPtr::with_unit`] to reach the other units' shares.
    pub fn team_memalloc(&self, team: TeamId, nbytes: usize) -> Result<GlobalPtr> {
        let team = self.team(team)?;
        let group = team.group();

        let proposal = self.memory.lock().next_segid;
        let mut agreed = [0u8; 2];
        self.endpoint
            .allreduce_user(group, &proposal.to_le_bytes(), &mut agreed, |acc, other| {
                let max = u16::from_le_bytes([acc[0], acc[1]])
                    .max(u16::from_le_bytes([other[0], other[1]]));
                acc.copy_from_slice(&max.to_le_bytes());
            })?;
        let segid = SegmentId(u16::from_le_bytes(agreed));
        let next = segid
            .0
            .checked_add(1)
            .ok_or_else(|| Error::ResourceExhausted("segment ids exhausted".into()))?;
        self.memory.lock().next_segid = next;

        let mut seg = self.pool.acquire(&self.endpoint)?;
        seg.create(nbytes, group)?;

        // Every unit contributes its own slot; OR-folding fills the rest.
        let mut mine = vec![0u8; team.size()];
        mine[team.myid] = seg.id();
        let mut segs = vec![0u8; team.size()];
        self.endpoint.allreduce_user(group, &mine, &mut segs, |acc, other| {
            for (a, o) in acc.iter_mut().zip(other) {
                *a |= *o;
            }
        })?;
        seg.release();

        self.memory.lock().translation.insert(
            segid,
            TranslationEntry {
                team: team.id,
                size: nbytes,
                ranks: team.ranks.clone(),
                segs,
            },
        );
        tracing::debug!(team = team.id, segment = segid.0, nbytes, "team memory allocated");
        Ok(GlobalPtr::new(0, segid, 0))
    }

    /// Release memory from [`Runtime::team_memalloc`]. Collective over the
    /// allocating team.
    pub fn team_memfree(&self, gptr: GlobalPtr) -> Result<()> {
        let entry = self
            .memory
            .lock()
            .translation
            .get(gptr.segid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("segment {}", gptr.segid.0)))?;
        let team = self.team(entry.team)?;
        self.endpoint.barrier(team.group())?;
        self.memory.lock().translation.remove(gptr.segid);
        let seg = entry
            .own_segment(self.endpoint.rank())
            .ok_or_else(|| Error::invalid(format!("segment {} has no share here", gptr.segid.0)))?;
        tracing::debug!(team = team.id, segment = gptr.segid.0, "team memory freed");
        self.pool.reclaim(&self.endpoint, seg)
    }
}
