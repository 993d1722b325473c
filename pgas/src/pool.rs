//! Segment pool.
//!
//! A bounded arena of transient fabric segment ids. Each id exposes one
//! caller buffer for exactly one in-flight operation and goes back to the
//! pool once its binding has been deleted.

use fabric::{AccessFlags, Endpoint, SegmentId};
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Pool of transient segment ids.
pub struct SegmentPool {
    /// Fabric ids owned by the pool, indexed by arena slot.
    ids: Vec<SegmentId>,
    /// Stack of free arena slots.
    free_list: Mutex<Vec<usize>>,
}

impl SegmentPool {
    /// Create a pool of `size` ids starting at `first`.
    pub fn new(first: SegmentId, size: usize) -> Self {
        let ids: Vec<SegmentId> = (0..size).map(|i| first.wrapping_add(i as u8)).collect();
        // Lowest id on top of the stack.
        let free_list = (0..size).rev().collect();
        Self {
            ids,
            free_list: Mutex::new(free_list),
        }
    }

    /// Total number of ids owned by the pool.
    pub fn capacity(&self) -> usize {
        self.ids.len()
    }

    /// Number of ids currently available.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Take an id from the pool.
    ///
    /// The returned guard deletes any binding made through it and returns
    /// the id when dropped.
    pub(crate) fn acquire<'a>(&'a self, endpoint: &'a Endpoint) -> Result<PooledSegment<'a>> {
        let index = self
            .free_list
            .lock()
            .pop()
            .ok_or_else(|| Error::ResourceExhausted("segment pool is empty".into()))?;
        tracing::trace!(segment = self.ids[index], "segment acquired");
        Ok(PooledSegment {
            pool: self,
            endpoint,
            index,
            bound: false,
        })
    }

    fn index_of(&self, id: SegmentId) -> Option<usize> {
        let first = *self.ids.first()?;
        let index = usize::from(id.wrapping_sub(first));
        (index < self.ids.len() && self.ids[index] == id).then_some(index)
    }

    fn push(&self, index: usize) {
        let mut free_list = self.free_list.lock();
        debug_assert!(!free_list.contains(&index), "segment returned twice");
        free_list.push(index);
    }

    /// Delete the fabric binding of a released id and return it to the pool.
    ///
    /// The id is returned even when the deletion fails.
    pub(crate) fn reclaim(&self, endpoint: &Endpoint, id: SegmentId) -> Result<()> {
        let index = self
            .index_of(id)
            .ok_or_else(|| Error::invalid(format!("segment {id} does not belong to the pool")))?;
        let deleted = endpoint.segment_delete(id);
        self.push(index);
        tracing::trace!(segment = id, "segment reclaimed");
        deleted.map_err(Error::from)
    }
}

/// RAII guard for an id taken from the pool.
pub(crate) struct PooledSegment<'a> {
    pool: &'a SegmentPool,
    endpoint: &'a Endpoint,
    index: usize,
    bound: bool,
}

impl PooledSegment<'_> {
    pub(crate) fn id(&self) -> SegmentId {
        self.pool.ids[self.index]
    }

    /// Bind `[ptr, ptr + len)` under this id, visible to this unit only.
    ///
    /// # Safety
    /// The memory must stay valid until the binding is deleted, either by
    /// dropping the guard or by [`SegmentPool::reclaim`] after
    /// [`PooledSegment::release`].
    pub(crate) unsafe fn bind(&mut self, ptr: *mut u8, len: usize) -> Result<()> {
        unsafe {
            self.endpoint
                .segment_bind(self.id(), ptr, len, AccessFlags::all())?
        };
        self.bound = true;
        Ok(())
    }

    /// Create a fabric-allocated segment under this id, registered with `group`.
    pub(crate) fn create(&mut self, len: usize, group: fabric::GroupId) -> Result<()> {
        self.endpoint
            .segment_create(self.id(), len, group, AccessFlags::all())?;
        self.bound = true;
        Ok(())
    }

    /// Keep the id (and its binding) beyond the guard.
    ///
    /// The caller must eventually hand it to [`SegmentPool::reclaim`].
    pub(crate) fn release(self) -> SegmentId {
        let id = self.id();
        std::mem::forget(self);
        id
    }
}

impl Drop for PooledSegment<'_> {
    fn drop(&mut self) {
        let id = self.id();
        if self.bound
            && let Err(e) = self.endpoint.segment_delete(id)
        {
            tracing::error!(segment = id, error = %e, "failed to delete pooled segment");
        }
        self.pool.push(self.index);
        tracing::trace!(segment = id, "segment returned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric::{FabricConfig, World};

    fn endpoint() -> Endpoint {
        World::create(FabricConfig::default(), 1)
            .unwrap()
            .pop()
            .unwrap()
    }

    #[test]
    fn test_acquire_until_exhausted() {
        let ep = endpoint();
        let pool = SegmentPool::new(5, 2);
        let a = pool.acquire(&ep).unwrap();
        let b = pool.acquire(&ep).unwrap();
        assert_eq!((a.id(), b.id()), (5, 6));
        assert_eq!(
            pool.acquire(&ep).err().map(|e| e.kind()),
            Some(crate::ErrorKind::ResourceExhausted)
        );
        drop(a);
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.acquire(&ep).unwrap().id(), 5);
    }

    #[test]
    fn test_drop_deletes_binding() {
        let ep = endpoint();
        let pool = SegmentPool::new(10, 4);
        let mut buf = [0u8; 16];
        {
            let mut seg = pool.acquire(&ep).unwrap();
            unsafe { seg.bind(buf.as_mut_ptr(), buf.len()).unwrap() };
            assert_eq!(ep.segment_size(10).unwrap(), 16);
        }
        assert!(ep.segment_size(10).is_err());
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn test_release_and_reclaim() {
        let ep = endpoint();
        let pool = SegmentPool::new(10, 4);
        let mut buf = [0u8; 8];
        let mut seg = pool.acquire(&ep).unwrap();
        unsafe { seg.bind(buf.as_mut_ptr(), buf.len()).unwrap() };
        let id = seg.release();
        assert_eq!(pool.free_count(), 3);
        assert!(ep.segment_size(id).is_ok());

        pool.reclaim(&ep, id).unwrap();
        assert_eq!(pool.free_count(), 4);
        assert!(ep.segment_size(id).is_err());
        assert!(pool.reclaim(&ep, 3).is_err());
    }
}
