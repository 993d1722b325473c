//! Segments and their notification slots.
//!
//! A segment exposes a contiguous byte range of one rank for one-sided
//! access by the ranks it is registered with. Memory is either allocated by
//! the fabric ([`Endpoint::segment_create`](crate::Endpoint::segment_create))
//! or supplied by the caller
//! ([`Endpoint::segment_bind`](crate::Endpoint::segment_bind)).

use std::alloc::{self, Layout};
use std::collections::BTreeMap;
use std::ptr::NonNull;

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::{NotificationId, NotificationValue, Rank, SegmentId};

/// Alignment of fabric-allocated segment memory.
const SEGMENT_ALIGN: usize = 64;

bitflags! {
    /// Remote access granted by a segment.
    ///
    /// The owning rank always has full access to its own segments.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        /// Remote ranks may read.
        const REMOTE_READ = 1 << 0;
        /// Remote ranks may write and notify.
        const REMOTE_WRITE = 1 << 1;
        /// Remote ranks may perform atomics.
        const REMOTE_ATOMIC = 1 << 2;
    }
}

/// Memory backing a segment.
enum Backing {
    /// Zeroed memory allocated (and freed) by the fabric.
    Owned(Layout),
    /// Caller memory; the caller keeps it alive until the segment is deleted.
    Bound,
}

pub(crate) struct Region {
    ptr: NonNull<u8>,
    len: usize,
    backing: Backing,
}

// Safety: the region is only dereferenced under the owning rank's segment lock
// or by protocols that order accesses through notifications.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    pub(crate) fn allocate(len: usize) -> Self {
        if len == 0 {
            return Self {
                ptr: NonNull::dangling(),
                len: 0,
                backing: Backing::Bound,
            };
        }
        let layout = match Layout::from_size_align(len, SEGMENT_ALIGN) {
            Ok(layout) => layout,
            Err(_) => alloc::handle_alloc_error(Layout::new::<u8>()),
        };
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = match NonNull::new(raw) {
            Some(ptr) => ptr,
            None => alloc::handle_alloc_error(layout),
        };
        Self {
            ptr,
            len,
            backing: Backing::Owned(layout),
        }
    }

    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` bytes until the
    /// region is dropped.
    pub(crate) unsafe fn bind(ptr: *mut u8, len: usize) -> Self {
        Self {
            ptr: NonNull::new(ptr).unwrap_or(NonNull::dangling()),
            len,
            backing: Backing::Bound,
        }
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Backing::Owned(layout) = self.backing {
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

/// A segment with its registrations and notification slots.
pub(crate) struct Segment {
    region: Region,
    access: AccessFlags,
    /// Ranks allowed to access the segment remotely.
    registered: Vec<bool>,
    /// Posted, not yet reset notifications. Only non-zero values are stored.
    notifications: BTreeMap<NotificationId, NotificationValue>,
}

impl Segment {
    pub(crate) fn new(region: Region, access: AccessFlags, nranks: usize) -> Self {
        Self {
            region,
            access,
            registered: vec![false; nranks],
            notifications: BTreeMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.region.len()
    }

    pub(crate) fn base(&self) -> *mut u8 {
        self.region.as_ptr()
    }

    pub(crate) fn register(&mut self, rank: Rank) {
        if let Some(slot) = self.registered.get_mut(usize::from(rank)) {
            *slot = true;
        }
    }

    /// Check that `initiator` may access this segment of `owner` with `access`.
    pub(crate) fn check_remote(
        &self,
        owner: Rank,
        segment: SegmentId,
        initiator: Rank,
        access: AccessFlags,
    ) -> Result<()> {
        if owner == initiator {
            return Ok(());
        }
        if !self
            .registered
            .get(usize::from(initiator))
            .copied()
            .unwrap_or(false)
        {
            return Err(Error::SegmentNotRegistered {
                owner,
                segment,
                initiator,
            });
        }
        if !self.access.contains(access) {
            return Err(Error::AccessDenied {
                owner,
                segment,
                access: access_name(access),
            });
        }
        Ok(())
    }

    /// Resolve `[offset, offset + size)` to a pointer into the segment.
    pub(crate) fn range(&self, segment: SegmentId, offset: u64, size: usize) -> Result<*mut u8> {
        let out_of_bounds = || Error::OutOfBounds {
            segment,
            offset,
            size,
            len: self.region.len(),
        };
        let start = usize::try_from(offset).map_err(|_| out_of_bounds())?;
        let end = start.checked_add(size).ok_or_else(out_of_bounds)?;
        if end > self.region.len() {
            return Err(out_of_bounds());
        }
        Ok(unsafe { self.region.as_ptr().add(start) })
    }

    pub(crate) fn post(&mut self, id: NotificationId, value: NotificationValue) {
        self.notifications.insert(id, value);
    }

    /// Lowest posted notification id in `[begin, begin + num)`.
    pub(crate) fn first_ready(&self, begin: NotificationId, num: u32) -> Option<NotificationId> {
        let end = u64::from(begin) + u64::from(num);
        self.notifications
            .range(begin..)
            .map(|(&id, _)| id)
            .find(|&id| u64::from(id) < end)
    }

    pub(crate) fn reset(&mut self, id: NotificationId) -> NotificationValue {
        self.notifications.remove(&id).unwrap_or(0)
    }
}

fn access_name(access: AccessFlags) -> &'static str {
    if access.contains(AccessFlags::REMOTE_ATOMIC) {
        "atomic"
    } else if access.contains(AccessFlags::REMOTE_WRITE) {
        "write"
    } else {
        "read"
    }
}

/// Fixed-size table of a rank's segments, indexed by segment id.
pub(crate) struct SegmentTable {
    slots: Vec<Option<Segment>>,
}

impl SegmentTable {
    pub(crate) fn new(segment_max: usize) -> Self {
        let mut slots = Vec::with_capacity(segment_max);
        slots.resize_with(segment_max, || None);
        Self { slots }
    }

    pub(crate) fn get(&self, rank: Rank, id: SegmentId) -> Result<&Segment> {
        self.slots
            .get(usize::from(id))
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidSegment { rank, segment: id })
    }

    pub(crate) fn get_mut(&mut self, rank: Rank, id: SegmentId) -> Result<&mut Segment> {
        self.slots
            .get_mut(usize::from(id))
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidSegment { rank, segment: id })
    }

    pub(crate) fn insert(&mut self, rank: Rank, id: SegmentId, segment: Segment) -> Result<()> {
        let slot = self
            .slots
            .get_mut(usize::from(id))
            .ok_or(Error::InvalidSegment { rank, segment: id })?;
        if slot.is_some() {
            return Err(Error::SegmentExists(id));
        }
        *slot = Some(segment);
        Ok(())
    }

    pub(crate) fn remove(&mut self, rank: Rank, id: SegmentId) -> Result<Segment> {
        self.slots
            .get_mut(usize::from(id))
            .and_then(Option::take)
            .ok_or(Error::InvalidSegment { rank, segment: id })
    }

    pub(crate) fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocated_region_is_zeroed_and_aligned() {
        let region = Region::allocate(256);
        assert_eq!(region.len(), 256);
        assert_eq!(region.as_ptr() as usize % SEGMENT_ALIGN, 0);
        let bytes = unsafe { std::slice::from_raw_parts(region.as_ptr(), 256) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_range_checks() {
        let seg = Segment::new(Region::allocate(64), AccessFlags::all(), 2);
        assert!(seg.range(1, 0, 64).is_ok());
        assert!(seg.range(1, 60, 4).is_ok());
        assert!(matches!(
            seg.range(1, 60, 8),
            Err(Error::OutOfBounds { len: 64, .. })
        ));
        assert!(seg.range(1, u64::MAX, 1).is_err());
    }

    #[test]
    fn test_remote_access_requires_registration_and_flags() {
        let mut seg = Segment::new(Region::allocate(8), AccessFlags::REMOTE_READ, 3);
        assert!(seg.check_remote(0, 4, 0, AccessFlags::REMOTE_WRITE).is_ok());
        assert!(matches!(
            seg.check_remote(0, 4, 1, AccessFlags::REMOTE_READ),
            Err(Error::SegmentNotRegistered { initiator: 1, .. })
        ));
        seg.register(1);
        assert!(seg.check_remote(0, 4, 1, AccessFlags::REMOTE_READ).is_ok());
        assert!(matches!(
            seg.check_remote(0, 4, 1, AccessFlags::REMOTE_WRITE),
            Err(Error::AccessDenied { access: "write", .. })
        ));
    }

    #[test]
    fn test_first_ready_respects_range() {
        let mut seg = Segment::new(Region::allocate(0), AccessFlags::all(), 1);
        seg.post(7, 42);
        seg.post(2, 42);
        assert_eq!(seg.first_ready(0, 8), Some(2));
        assert_eq!(seg.first_ready(3, 4), None);
        assert_eq!(seg.first_ready(3, 5), Some(7));
        assert_eq!(seg.reset(2), 42);
        assert_eq!(seg.reset(2), 0);
        assert_eq!(seg.first_ready(0, 8), Some(7));
    }

    #[test]
    fn test_table_insert_and_remove() {
        let mut table = SegmentTable::new(4);
        let seg = || Segment::new(Region::allocate(8), AccessFlags::all(), 1);
        table.insert(0, 1, seg()).unwrap();
        assert!(matches!(table.insert(0, 1, seg()), Err(Error::SegmentExists(1))));
        assert!(table.insert(0, 9, seg()).is_err());
        assert!(table.remove(0, 1).is_ok());
        assert!(table.get(0, 1).is_err());
    }
}
