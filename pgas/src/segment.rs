//! Reserved fabric segment ids and scoped segment bindings.

use fabric::{AccessFlags, Endpoint, GroupId, SegmentId};
use parking_lot::MutexGuard;

use crate::error::Result;

/// Local-allocation window of every unit.
pub const LOCAL_ALLOC_SEG: SegmentId = 0;
/// Staging binding for blocking transfers and collective send buffers.
pub const ONESIDED_SEG: SegmentId = 1;
/// Collective receive binding.
pub const COLL_SEG: SegmentId = 2;
/// One-byte source read back from a target to complete puts.
pub const PUT_COMPLETION_SRC_SEG: SegmentId = 3;
/// Local landing byte of put-completion reads.
pub const PUT_COMPLETION_DST_SEG: SegmentId = 4;
/// First id handed out by the segment pool.
pub const FIRST_POOL_SEG: SegmentId = 5;

/// A caller buffer bound to a persistent transfer segment for the
/// duration of one call.
///
/// Holding the binding keeps the segment's lock; the fabric binding is
/// deleted on drop.
pub(crate) struct Binding<'a> {
    endpoint: &'a Endpoint,
    id: SegmentId,
    _lock: MutexGuard<'a, ()>,
}

impl<'a> Binding<'a> {
    /// Bind `[ptr, ptr + len)` as segment `id`, visible to this unit only.
    ///
    /// # Safety
    /// The memory must stay valid until the binding is dropped.
    pub(crate) unsafe fn local(
        endpoint: &'a Endpoint,
        lock: MutexGuard<'a, ()>,
        id: SegmentId,
        ptr: *mut u8,
        len: usize,
    ) -> Result<Self> {
        unsafe { endpoint.segment_bind(id, ptr, len, AccessFlags::all())? };
        Ok(Self {
            endpoint,
            id,
            _lock: lock,
        })
    }

    /// Bind `[ptr, ptr + len)` as segment `id` for every member of `group`.
    ///
    /// Synchronises the group: on return every member has bound its buffer.
    ///
    /// # Safety
    /// Same contract as [`Binding::local`].
    pub(crate) unsafe fn group(
        endpoint: &'a Endpoint,
        lock: MutexGuard<'a, ()>,
        id: SegmentId,
        ptr: *mut u8,
        len: usize,
        group: GroupId,
    ) -> Result<Self> {
        unsafe { endpoint.segment_use(id, ptr, len, group, AccessFlags::all())? };
        Ok(Self {
            endpoint,
            id,
            _lock: lock,
        })
    }
}

impl Drop for Binding<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.endpoint.segment_delete(self.id) {
            tracing::error!(segment = self.id, error = %e, "failed to unbind segment");
        }
    }
}
