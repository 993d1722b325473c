//! One-sided get and put.

use fabric::{QueueId, Rank};

use crate::error::{Error, Result};
use crate::gptr::{GlobalPtr, Resolved};
use crate::handle::{CommKind, Handle};
use crate::runtime::Runtime;
use crate::segment::{Binding, ONESIDED_SEG, PUT_COMPLETION_DST_SEG, PUT_COMPLETION_SRC_SEG};
use crate::types::{DataType, convert};

pub(crate) fn check_len(len: usize, need: usize, what: &str) -> Result<()> {
    if len < need {
        return Err(Error::invalid(format!(
            "{what} holds {len} bytes, {need} required"
        )));
    }
    Ok(())
}

impl Runtime {
    fn prepare(
        &self,
        gptr: GlobalPtr,
        nelem: usize,
        src_type: &DataType,
        dst_type: &DataType,
        buf_len: usize,
    ) -> Result<(usize, Resolved)> {
        let plan = convert(src_type, dst_type, nelem)?;
        check_len(buf_len, plan.nbytes, "local buffer")?;
        let target = self.resolve(gptr, plan.nbytes)?;
        Ok((plan.nbytes, target))
    }

    fn is_local(&self, target: Resolved) -> bool {
        target.rank == self.endpoint.rank()
    }

    /// Read back one byte from `rank` on `queue` so that earlier writes on
    /// the queue are complete at the target once the queue drains.
    pub(crate) fn put_completion_test(&self, rank: Rank, queue: QueueId) -> Result<()> {
        self.endpoint.read(
            PUT_COMPLETION_DST_SEG,
            0,
            rank,
            PUT_COMPLETION_SRC_SEG,
            0,
            1,
            queue,
        )?;
        Ok(())
    }

    /// Drain `queue` after a post failed behind an accepted transfer.
    ///
    /// The transfer may still be held on a stalled queue and reference the
    /// pool segment that is about to be returned.
    fn settle(&self, queue: QueueId, err: impl Into<Error>) -> Error {
        let err = err.into();
        if let Err(e) = self.endpoint.wait(queue) {
            tracing::error!(queue, error = %e, "failed to drain queue after post error");
        }
        err
    }

    /// Copy `nelem` elements at `gptr` into `dst`; returns once `dst` holds them.
    pub fn get_blocking(
        &self,
        dst: &mut [u8],
        gptr: GlobalPtr,
        nelem: usize,
        src_type: &DataType,
        dst_type: &DataType,
    ) -> Result<()> {
        let (nbytes, target) = self.prepare(gptr, nelem, src_type, dst_type, dst.len())?;
        if self.is_local(target) {
            let src = self.local_ptr(target)?;
            unsafe { std::ptr::copy(src, dst.as_mut_ptr(), nbytes) };
            return Ok(());
        }
        let _binding = unsafe {
            Binding::local(
                &self.endpoint,
                self.onesided.lock(),
                ONESIDED_SEG,
                dst.as_mut_ptr(),
                nbytes,
            )?
        };
        let queue = self.select_queue()?;
        self.endpoint.read(
            ONESIDED_SEG,
            0,
            target.rank,
            target.seg,
            target.offset,
            nbytes,
            queue,
        )?;
        self.endpoint.wait(queue)?;
        Ok(())
    }

    /// Copy `nelem` elements of `src` to `gptr`; returns once they are
    /// visible at the target.
    pub fn put_blocking(
        &self,
        gptr: GlobalPtr,
        src: &[u8],
        nelem: usize,
        src_type: &DataType,
        dst_type: &DataType,
    ) -> Result<()> {
        let (nbytes, target) = self.prepare(gptr, nelem, src_type, dst_type, src.len())?;
        if self.is_local(target) {
            let dst = self.local_ptr(target)?;
            unsafe { std::ptr::copy(src.as_ptr(), dst, nbytes) };
            return Ok(());
        }
        let _binding = unsafe {
            Binding::local(
                &self.endpoint,
                self.onesided.lock(),
                ONESIDED_SEG,
                src.as_ptr().cast_mut(),
                nbytes,
            )?
        };
        let queue = self.select_queue()?;
        self.endpoint.write(
            ONESIDED_SEG,
            0,
            target.rank,
            target.seg,
            target.offset,
            nbytes,
            queue,
        )?;
        self.put_completion_test(target.rank, queue)?;
        self.endpoint.wait(queue)?;
        Ok(())
    }

    /// Start a get tracked by the request table; complete it with
    /// [`Runtime::flush`] or one of its variants.
    ///
    /// # Safety
    /// `dst` must stay valid and untouched until the request is flushed.
    pub unsafe fn get(
        &self,
        dst: &mut [u8],
        gptr: GlobalPtr,
        nelem: usize,
        src_type: &DataType,
        dst_type: &DataType,
    ) -> Result<()> {
        let (nbytes, target) = self.prepare(gptr, nelem, src_type, dst_type, dst.len())?;
        if self.is_local(target) {
            let src = self.local_ptr(target)?;
            unsafe { std::ptr::copy(src, dst.as_mut_ptr(), nbytes) };
            return Ok(());
        }
        let mut seg = self.pool.acquire(&self.endpoint)?;
        unsafe { seg.bind(dst.as_mut_ptr(), nbytes)? };
        let mut requests = self.requests.lock();
        let key = (gptr.unit, gptr.segid);
        let queue = match requests.queue_of(key) {
            Some(queue) => queue,
            None => self.select_queue()?,
        };
        self.endpoint.read(
            seg.id(),
            0,
            target.rank,
            target.seg,
            target.offset,
            nbytes,
            queue,
        )?;
        requests.record(key, queue, seg.release());
        Ok(())
    }

    /// Start a put tracked by the request table.
    ///
    /// # Safety
    /// `src` must stay valid and unmodified until the request is flushed.
    pub unsafe fn put(
        &self,
        gptr: GlobalPtr,
        src: &[u8],
        nelem: usize,
        src_type: &DataType,
        dst_type: &DataType,
    ) -> Result<()> {
        let (nbytes, target) = self.prepare(gptr, nelem, src_type, dst_type, src.len())?;
        if self.is_local(target) {
            let dst = self.local_ptr(target)?;
            unsafe { std::ptr::copy(src.as_ptr(), dst, nbytes) };
            return Ok(());
        }
        let mut seg = self.pool.acquire(&self.endpoint)?;
        unsafe { seg.bind(src.as_ptr().cast_mut(), nbytes)? };
        let mut requests = self.requests.lock();
        let key = (gptr.unit, gptr.segid);
        let queue = match requests.queue_of(key) {
            Some(queue) => queue,
            None => self.select_queue()?,
        };
        self.endpoint.write(
            seg.id(),
            0,
            target.rank,
            target.seg,
            target.offset,
            nbytes,
            queue,
        )?;
        self.put_completion_test(target.rank, queue)
            .map_err(|e| self.settle(queue, e))?;
        requests.record(key, queue, seg.release());
        Ok(())
    }

    /// Start a get completed through the returned handle.
    ///
    /// A get whose source is the calling unit completes immediately and
    /// yields a null handle.
    ///
    /// # Safety
    /// `dst` must stay valid and untouched until the handle completes.
    pub unsafe fn get_handle(
        &self,
        dst: &mut [u8],
        gptr: GlobalPtr,
        nelem: usize,
        src_type: &DataType,
        dst_type: &DataType,
    ) -> Result<Handle> {
        let (nbytes, target) = self.prepare(gptr, nelem, src_type, dst_type, dst.len())?;
        if self.is_local(target) {
            let src = self.local_ptr(target)?;
            unsafe { std::ptr::copy(src, dst.as_mut_ptr(), nbytes) };
            return Ok(Handle::null());
        }
        let mut seg = self.pool.acquire(&self.endpoint)?;
        unsafe { seg.bind(dst.as_mut_ptr(), nbytes)? };
        let id = seg.id();
        let queue = self.select_queue()?;
        self.endpoint
            .read(id, 0, target.rank, target.seg, target.offset, nbytes, queue)?;
        self.endpoint
            .notify(self.endpoint.rank(), id, u32::from(id), u32::from(id), queue)
            .map_err(|e| self.settle(queue, e))?;
        tracing::trace!(segment = id, queue, nbytes, "get posted");
        Ok(Handle::pending(CommKind::Read, queue, seg.release(), None))
    }

    /// Start a put completed through the returned handle.
    ///
    /// # Safety
    /// `src` must stay valid and unmodified until the handle completes.
    pub unsafe fn put_handle(
        &self,
        gptr: GlobalPtr,
        src: &[u8],
        nelem: usize,
        src_type: &DataType,
        dst_type: &DataType,
    ) -> Result<Handle> {
        let (nbytes, target) = self.prepare(gptr, nelem, src_type, dst_type, src.len())?;
        if self.is_local(target) {
            let dst = self.local_ptr(target)?;
            unsafe { std::ptr::copy(src.as_ptr(), dst, nbytes) };
            return Ok(Handle::null());
        }
        let mut seg = self.pool.acquire(&self.endpoint)?;
        unsafe { seg.bind(src.as_ptr().cast_mut(), nbytes)? };
        let id = seg.id();
        let me = self.endpoint.rank();
        let queue = self.select_queue()?;
        self.endpoint
            .write(id, 0, target.rank, target.seg, target.offset, nbytes, queue)?;
        self.endpoint
            .notify(me, id, u32::from(id), u32::from(id), queue)
            .map_err(|e| self.settle(queue, e))?;
        self.put_completion_test(target.rank, queue)
            .map_err(|e| self.settle(queue, e))?;
        let remote = u32::from(PUT_COMPLETION_DST_SEG);
        self.endpoint
            .notify(me, id, remote, remote, queue)
            .map_err(|e| self.settle(queue, e))?;
        tracing::trace!(segment = id, queue, nbytes, "put posted");
        Ok(Handle::pending(CommKind::Write, queue, seg.release(), Some(remote)))
    }
}
