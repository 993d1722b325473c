//! Completion handles for individually tracked transfers.

use fabric::{NotificationId, QueueId, SegmentId, Timeout};

use crate::error::{Error, Result};
use crate::runtime::Runtime;

/// Direction of a tracked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommKind {
    Read,
    Write,
}

#[derive(Debug)]
struct Pending {
    kind: CommKind,
    queue: QueueId,
    /// Pool segment bound to the caller's buffer.
    local_seg: SegmentId,
    /// Notification signalling remote completion of a write.
    notify_remote: Option<NotificationId>,
}

impl Pending {
    fn local_id(&self) -> NotificationId {
        NotificationId::from(self.local_seg)
    }

    fn completion_id(&self, local_only: bool) -> NotificationId {
        match (self.kind, self.notify_remote) {
            (CommKind::Write, Some(remote)) if !local_only => remote,
            _ => self.local_id(),
        }
    }
}

/// Handle of a transfer started with [`Runtime::get_handle`] or
/// [`Runtime::put_handle`].
///
/// A null handle refers to no transfer. Waiting, a successful test or
/// [`Runtime::handle_free`] leave the handle null.
#[derive(Debug, Default)]
#[must_use = "transfer must be waited on, tested to completion or freed"]
pub struct Handle {
    pending: Option<Pending>,
}

impl Handle {
    pub const fn null() -> Self {
        Self { pending: None }
    }

    pub(crate) fn pending(
        kind: CommKind,
        queue: QueueId,
        local_seg: SegmentId,
        notify_remote: Option<NotificationId>,
    ) -> Self {
        Self {
            pending: Some(Pending {
                kind,
                queue,
                local_seg,
                notify_remote,
            }),
        }
    }

    pub fn is_null(&self) -> bool {
        self.pending.is_none()
    }

    pub fn kind(&self) -> Option<CommKind> {
        self.pending.as_ref().map(|p| p.kind)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Some(p) = &self.pending {
            tracing::warn!(
                segment = p.local_seg,
                queue = p.queue,
                "handle dropped before completion; its pool segment is not returned"
            );
        }
    }
}

impl Runtime {
    /// Block until the transfer of `handle` is complete, then free it.
    pub fn wait(&self, handle: &mut Handle) -> Result<()> {
        let Some(p) = &handle.pending else {
            return Ok(());
        };
        let waited = self.endpoint.wait(p.queue).map_err(Error::from);
        let freed = self.handle_free(handle);
        waited.and(freed)
    }

    /// Block until the local buffer of `handle` may be reused.
    pub fn wait_local(&self, handle: &mut Handle) -> Result<()> {
        self.wait(handle)
    }

    /// Wait for every handle in `handles`.
    ///
    /// Each queue is drained once; every handle is freed even when a wait
    /// fails, and the first error is returned.
    pub fn waitall(&self, handles: &mut [Handle]) -> Result<()> {
        let mut queues: Vec<QueueId> = handles
            .iter()
            .filter_map(|h| h.pending.as_ref().map(|p| p.queue))
            .collect();
        queues.sort_unstable();
        queues.dedup();
        let mut result = Ok(());
        for queue in queues {
            result = result.and(self.endpoint.wait(queue).map_err(Error::from));
        }
        for handle in handles.iter_mut() {
            result = result.and(self.handle_free(handle));
        }
        result
    }

    pub fn waitall_local(&self, handles: &mut [Handle]) -> Result<()> {
        self.waitall(handles)
    }

    fn test_inner(&self, handle: &mut Handle, local_only: bool) -> Result<bool> {
        let Some(p) = &handle.pending else {
            return Ok(true);
        };
        let id = p.completion_id(local_only);
        match self
            .endpoint
            .notify_waitsome(p.local_seg, id, 1, Timeout::Test)?
        {
            Some(_) => {
                self.handle_free(handle)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Whether the transfer of `handle` is complete; a complete handle is
    /// freed. Never blocks.
    pub fn test(&self, handle: &mut Handle) -> Result<bool> {
        self.test_inner(handle, false)
    }

    /// Whether the local buffer of `handle` may be reused.
    pub fn test_local(&self, handle: &mut Handle) -> Result<bool> {
        self.test_inner(handle, true)
    }

    /// Test every handle; `true` if all are complete.
    pub fn testall(&self, handles: &mut [Handle]) -> Result<bool> {
        let mut all = true;
        for handle in handles.iter_mut() {
            all &= self.test(handle)?;
        }
        Ok(all)
    }

    pub fn testall_local(&self, handles: &mut [Handle]) -> Result<bool> {
        let mut all = true;
        for handle in handles.iter_mut() {
            all &= self.test_local(handle)?;
        }
        Ok(all)
    }

    /// Release the resources of `handle`; a null handle is left untouched.
    ///
    /// An incomplete transfer is completed first.
    pub fn handle_free(&self, handle: &mut Handle) -> Result<()> {
        let Some(p) = handle.pending.take() else {
            return Ok(());
        };
        let drained = self.drain_pending(&p);
        let reclaimed = self.pool.reclaim(&self.endpoint, p.local_seg);
        drained.and(reclaimed)
    }

    fn drain_pending(&self, p: &Pending) -> Result<()> {
        let seg = p.local_seg;
        let done = self
            .endpoint
            .notify_waitsome(seg, p.completion_id(false), 1, Timeout::Test)?;
        if done.is_none() {
            tracing::debug!(segment = seg, queue = p.queue, "freeing incomplete handle");
            self.endpoint.wait(p.queue)?;
        }
        let ids = std::iter::once(p.local_id()).chain(p.notify_remote);
        for id in ids {
            let value = self.endpoint.notify_reset(seg, id)?;
            if value != id {
                tracing::error!(segment = seg, id, value, "unexpected handle notification");
            }
        }
        Ok(())
    }
}
