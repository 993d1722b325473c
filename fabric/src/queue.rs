//! Asynchronous operation queues.

use std::collections::VecDeque;

use crate::{NotificationId, NotificationValue, Rank, SegmentId};

/// A one-sided operation posted on a queue.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Op {
    /// Copy local bytes into a remote segment, optionally followed by a notification.
    Write {
        local_seg: SegmentId,
        local_offset: u64,
        rank: Rank,
        remote_seg: SegmentId,
        remote_offset: u64,
        size: usize,
        notify: Option<(NotificationId, NotificationValue)>,
    },
    /// Copy remote bytes into a local segment.
    Read {
        local_seg: SegmentId,
        local_offset: u64,
        rank: Rank,
        remote_seg: SegmentId,
        remote_offset: u64,
        size: usize,
    },
    /// Post a notification on a (possibly local) segment.
    Notify {
        rank: Rank,
        remote_seg: SegmentId,
        id: NotificationId,
        value: NotificationValue,
    },
}

/// Per-queue bookkeeping of an endpoint.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    /// Posted operations not yet reaped by a wait.
    pub(crate) outstanding: usize,
    /// Held operations are executed only on resume or wait.
    pub(crate) stalled: bool,
    /// Operations posted while stalled, in submission order.
    pub(crate) held: VecDeque<Op>,
}
