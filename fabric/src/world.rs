//! World construction and per-rank endpoints.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::FabricConfig;
use crate::error::{Error, Result};
use crate::group::GroupRegistry;
use crate::passive::{self, PassiveChannel};
use crate::queue::{Op, QueueState};
use crate::segment::{AccessFlags, Region, Segment, SegmentTable};
use crate::{GroupId, NotificationId, NotificationValue, QueueId, Rank, SegmentId, Timeout};

struct RankState {
    segments: Mutex<SegmentTable>,
    /// Signalled whenever a notification is posted to, or a segment is
    /// deleted from, this rank.
    notified: Condvar,
}

struct Shared {
    config: FabricConfig,
    ranks: Vec<RankState>,
    groups: GroupRegistry,
}

/// Factory for a set of connected endpoints.
pub struct World;

impl World {
    /// Create a world of `nranks` endpoints, indexed by rank.
    pub fn create(config: FabricConfig, nranks: usize) -> Result<Vec<Endpoint>> {
        config.validate()?;
        if nranks == 0 || nranks > usize::from(Rank::MAX) + 1 {
            return Err(Error::InvalidConfig(format!(
                "world size must be in 1..=65536, got {nranks}"
            )));
        }
        let ranks = (0..nranks)
            .map(|_| RankState {
                segments: Mutex::new(SegmentTable::new(config.segment_max)),
                notified: Condvar::new(),
            })
            .collect();
        let all = (0..nranks).map(|r| r as Rank).collect();
        let queue_num = config.queue_num;
        let shared = Arc::new(Shared {
            config,
            ranks,
            groups: GroupRegistry::new(all),
        });
        tracing::debug!(nranks, "created fabric world");

        Ok(passive::create_channels(nranks)
            .into_iter()
            .enumerate()
            .map(|(rank, passive)| Endpoint {
                rank: rank as Rank,
                shared: Arc::clone(&shared),
                queues: Mutex::new((0..queue_num).map(|_| QueueState::default()).collect()),
                passive,
            })
            .collect())
    }
}

/// Segment tables of two ranks, locked in rank order.
struct PairGuard<'a> {
    lo_rank: Rank,
    lo: MutexGuard<'a, SegmentTable>,
    hi: Option<MutexGuard<'a, SegmentTable>>,
}

impl PairGuard<'_> {
    fn table(&self, rank: Rank) -> &SegmentTable {
        match &self.hi {
            Some(hi) if rank != self.lo_rank => hi,
            _ => &self.lo,
        }
    }

    fn table_mut(&mut self, rank: Rank) -> &mut SegmentTable {
        match &mut self.hi {
            Some(hi) if rank != self.lo_rank => hi,
            _ => &mut self.lo,
        }
    }
}

/// One rank's handle on the world.
///
/// All operations take `&self`; an endpoint may be shared by the threads of
/// its rank.
pub struct Endpoint {
    rank: Rank,
    shared: Arc<Shared>,
    queues: Mutex<Vec<QueueState>>,
    passive: PassiveChannel,
}

impl Endpoint {
    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn nranks(&self) -> usize {
        self.shared.ranks.len()
    }

    pub fn config(&self) -> &FabricConfig {
        &self.shared.config
    }

    fn rank_state(&self, rank: Rank) -> Result<&RankState> {
        self.shared
            .ranks
            .get(usize::from(rank))
            .ok_or(Error::InvalidRank(rank))
    }

    fn lock_pair(&self, a: Rank, b: Rank) -> Result<PairGuard<'_>> {
        let (lo_rank, hi_rank) = if a <= b { (a, b) } else { (b, a) };
        let lo = self.rank_state(lo_rank)?.segments.lock();
        let hi = if hi_rank != lo_rank {
            Some(self.rank_state(hi_rank)?.segments.lock())
        } else {
            None
        };
        Ok(PairGuard { lo_rank, lo, hi })
    }

    fn check_notification(&self, id: NotificationId, value: NotificationValue) -> Result<()> {
        if id >= self.shared.config.notification_num {
            return Err(Error::InvalidNotification(id));
        }
        if value == 0 {
            return Err(Error::InvalidNotificationValue);
        }
        Ok(())
    }

    // ---- segments -------------------------------------------------------

    /// Allocate a zeroed segment, register it with every member of `group`
    /// and wait until all members have done the same.
    pub fn segment_create(
        &self,
        id: SegmentId,
        size: usize,
        group: GroupId,
        access: AccessFlags,
    ) -> Result<()> {
        let group_ref = self.shared.groups.get(group)?;
        group_ref.position(self.rank)?;
        self.insert_segment(id, Region::allocate(size), access, group_ref.members())?;
        tracing::trace!(rank = self.rank, segment = id, size, "segment created");
        self.barrier(group)
    }

    /// Expose caller memory as a segment visible to this rank only.
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` bytes until the
    /// segment is deleted.
    pub unsafe fn segment_bind(
        &self,
        id: SegmentId,
        ptr: *mut u8,
        len: usize,
        access: AccessFlags,
    ) -> Result<()> {
        let region = unsafe { Region::bind(ptr, len) };
        self.insert_segment(id, region, access, &[])
    }

    /// Bind caller memory, register it with every member of `group` and
    /// wait until all members have done the same.
    ///
    /// # Safety
    /// Same contract as [`Endpoint::segment_bind`].
    pub unsafe fn segment_use(
        &self,
        id: SegmentId,
        ptr: *mut u8,
        len: usize,
        group: GroupId,
        access: AccessFlags,
    ) -> Result<()> {
        let group_ref = self.shared.groups.get(group)?;
        group_ref.position(self.rank)?;
        let region = unsafe { Region::bind(ptr, len) };
        self.insert_segment(id, region, access, group_ref.members())?;
        self.barrier(group)
    }

    fn insert_segment(
        &self,
        id: SegmentId,
        region: Region,
        access: AccessFlags,
        register: &[Rank],
    ) -> Result<()> {
        let mut segment = Segment::new(region, access, self.nranks());
        for &rank in register {
            segment.register(rank);
        }
        self.rank_state(self.rank)?
            .segments
            .lock()
            .insert(self.rank, id, segment)
    }

    /// Allow `rank` to access this rank's segment `id`.
    pub fn segment_register(&self, id: SegmentId, rank: Rank) -> Result<()> {
        self.rank_state(rank)?;
        let state = self.rank_state(self.rank)?;
        state.segments.lock().get_mut(self.rank, id)?.register(rank);
        Ok(())
    }

    pub fn segment_delete(&self, id: SegmentId) -> Result<()> {
        let state = self.rank_state(self.rank)?;
        let removed = state.segments.lock().remove(self.rank, id)?;
        state.notified.notify_all();
        drop(removed);
        tracing::trace!(rank = self.rank, segment = id, "segment deleted");
        Ok(())
    }

    pub fn segment_ptr(&self, id: SegmentId) -> Result<*mut u8> {
        let state = self.rank_state(self.rank)?;
        Ok(state.segments.lock().get(self.rank, id)?.base())
    }

    pub fn segment_size(&self, id: SegmentId) -> Result<usize> {
        let state = self.rank_state(self.rank)?;
        Ok(state.segments.lock().get(self.rank, id)?.len())
    }

    // ---- one-sided operations -------------------------------------------

    /// Post a write of `size` bytes from the local segment to a remote one.
    #[allow(clippy::too_many_arguments)]
    pub fn write(
        &self,
        local_seg: SegmentId,
        local_offset: u64,
        rank: Rank,
        remote_seg: SegmentId,
        remote_offset: u64,
        size: usize,
        queue: QueueId,
    ) -> Result<()> {
        self.post(
            queue,
            Op::Write {
                local_seg,
                local_offset,
                rank,
                remote_seg,
                remote_offset,
                size,
                notify: None,
            },
        )
    }

    /// Post a write followed by a notification on the remote segment.
    ///
    /// The notification becomes visible only after the data.
    #[allow(clippy::too_many_arguments)]
    pub fn write_notify(
        &self,
        local_seg: SegmentId,
        local_offset: u64,
        rank: Rank,
        remote_seg: SegmentId,
        remote_offset: u64,
        size: usize,
        notification_id: NotificationId,
        notification_value: NotificationValue,
        queue: QueueId,
    ) -> Result<()> {
        self.check_notification(notification_id, notification_value)?;
        self.post(
            queue,
            Op::Write {
                local_seg,
                local_offset,
                rank,
                remote_seg,
                remote_offset,
                size,
                notify: Some((notification_id, notification_value)),
            },
        )
    }

    /// Post a read of `size` bytes from a remote segment into a local one.
    #[allow(clippy::too_many_arguments)]
    pub fn read(
        &self,
        local_seg: SegmentId,
        local_offset: u64,
        rank: Rank,
        remote_seg: SegmentId,
        remote_offset: u64,
        size: usize,
        queue: QueueId,
    ) -> Result<()> {
        self.post(
            queue,
            Op::Read {
                local_seg,
                local_offset,
                rank,
                remote_seg,
                remote_offset,
                size,
            },
        )
    }

    /// Post a notification on a segment of `rank` (possibly this rank).
    pub fn notify(
        &self,
        rank: Rank,
        remote_seg: SegmentId,
        id: NotificationId,
        value: NotificationValue,
        queue: QueueId,
    ) -> Result<()> {
        self.check_notification(id, value)?;
        self.post(
            queue,
            Op::Notify {
                rank,
                remote_seg,
                id,
                value,
            },
        )
    }

    fn post(&self, queue: QueueId, op: Op) -> Result<()> {
        let max = self.shared.config.queue_size_max;
        let mut queues = self.queues.lock();
        let q = queues
            .get_mut(usize::from(queue))
            .ok_or(Error::InvalidQueue(queue))?;
        if q.outstanding >= max {
            return Err(Error::QueueFull(queue));
        }
        q.outstanding += 1;
        if q.stalled {
            q.held.push_back(op);
            return Ok(());
        }
        if let Err(e) = self.execute(op) {
            q.outstanding -= 1;
            return Err(e);
        }
        Ok(())
    }

    fn execute(&self, op: Op) -> Result<()> {
        match op {
            Op::Write {
                local_seg,
                local_offset,
                rank,
                remote_seg,
                remote_offset,
                size,
                notify,
            } => {
                let mut pair = self.lock_pair(self.rank, rank)?;
                let src = pair
                    .table(self.rank)
                    .get(self.rank, local_seg)?
                    .range(local_seg, local_offset, size)?;
                let target = pair.table(rank).get(rank, remote_seg)?;
                target.check_remote(rank, remote_seg, self.rank, AccessFlags::REMOTE_WRITE)?;
                let dst = target.range(remote_seg, remote_offset, size)?;
                unsafe { std::ptr::copy(src, dst, size) };
                if let Some((id, value)) = notify {
                    pair.table_mut(rank).get_mut(rank, remote_seg)?.post(id, value);
                    drop(pair);
                    self.rank_state(rank)?.notified.notify_all();
                }
                Ok(())
            }
            Op::Read {
                local_seg,
                local_offset,
                rank,
                remote_seg,
                remote_offset,
                size,
            } => {
                let pair = self.lock_pair(self.rank, rank)?;
                let source = pair.table(rank).get(rank, remote_seg)?;
                source.check_remote(rank, remote_seg, self.rank, AccessFlags::REMOTE_READ)?;
                let src = source.range(remote_seg, remote_offset, size)?;
                let dst = pair
                    .table(self.rank)
                    .get(self.rank, local_seg)?
                    .range(local_seg, local_offset, size)?;
                unsafe { std::ptr::copy(src, dst, size) };
                Ok(())
            }
            Op::Notify {
                rank,
                remote_seg,
                id,
                value,
            } => {
                let state = self.rank_state(rank)?;
                {
                    let mut table = state.segments.lock();
                    let target = table.get_mut(rank, remote_seg)?;
                    target.check_remote(rank, remote_seg, self.rank, AccessFlags::REMOTE_WRITE)?;
                    target.post(id, value);
                }
                state.notified.notify_all();
                Ok(())
            }
        }
    }

    // ---- queues ---------------------------------------------------------

    pub fn queue_num(&self) -> usize {
        self.shared.config.queue_num
    }

    pub fn queue_size_max(&self) -> usize {
        self.shared.config.queue_size_max
    }

    /// Number of posted operations on `queue` not yet reaped by [`Endpoint::wait`].
    pub fn queue_size(&self, queue: QueueId) -> Result<usize> {
        self.queues
            .lock()
            .get(usize::from(queue))
            .map(|q| q.outstanding)
            .ok_or(Error::InvalidQueue(queue))
    }

    /// Complete every operation posted on `queue`.
    ///
    /// Held operations of a stalled queue are executed in submission order;
    /// the first failure is returned after the queue has been drained.
    pub fn wait(&self, queue: QueueId) -> Result<()> {
        let mut queues = self.queues.lock();
        let q = queues
            .get_mut(usize::from(queue))
            .ok_or(Error::InvalidQueue(queue))?;
        let result = self.drain(q);
        q.outstanding = 0;
        result
    }

    /// Hold back operations posted on `queue` until it is resumed or waited on.
    pub fn stall_queue(&self, queue: QueueId) -> Result<()> {
        let mut queues = self.queues.lock();
        let q = queues
            .get_mut(usize::from(queue))
            .ok_or(Error::InvalidQueue(queue))?;
        q.stalled = true;
        Ok(())
    }

    /// Execute held operations and let `queue` progress again.
    pub fn resume_queue(&self, queue: QueueId) -> Result<()> {
        let mut queues = self.queues.lock();
        let q = queues
            .get_mut(usize::from(queue))
            .ok_or(Error::InvalidQueue(queue))?;
        q.stalled = false;
        self.drain(q)
    }

    fn drain(&self, q: &mut QueueState) -> Result<()> {
        let mut result = Ok(());
        while let Some(op) = q.held.pop_front() {
            if let Err(e) = self.execute(op) {
                tracing::debug!(rank = self.rank, error = %e, "held operation failed");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    // ---- notifications --------------------------------------------------

    /// Wait for any notification in `[begin, begin + num)` of the local segment.
    ///
    /// Returns the lowest posted id, or `None` if `timeout` is
    /// [`Timeout::Test`] and nothing has been posted yet.
    pub fn notify_waitsome(
        &self,
        segment: SegmentId,
        begin: NotificationId,
        num: u32,
        timeout: Timeout,
    ) -> Result<Option<NotificationId>> {
        if num == 0 {
            return Ok(None);
        }
        let end = u64::from(begin) + u64::from(num);
        if end > u64::from(self.shared.config.notification_num) {
            return Err(Error::InvalidNotification(begin));
        }
        let state = self.rank_state(self.rank)?;
        let mut table = state.segments.lock();
        loop {
            if let Some(id) = table.get(self.rank, segment)?.first_ready(begin, num) {
                return Ok(Some(id));
            }
            if timeout == Timeout::Test {
                return Ok(None);
            }
            state.notified.wait(&mut table);
        }
    }

    /// Atomically read and clear a notification; returns the old value.
    pub fn notify_reset(&self, segment: SegmentId, id: NotificationId) -> Result<NotificationValue> {
        if id >= self.shared.config.notification_num {
            return Err(Error::InvalidNotification(id));
        }
        let state = self.rank_state(self.rank)?;
        Ok(state.segments.lock().get_mut(self.rank, segment)?.reset(id))
    }

    // ---- groups ---------------------------------------------------------

    /// Create (or join) group `id` with `members`.
    ///
    /// Every member calls this with the same member list.
    pub fn group_create(&self, id: GroupId, members: &[Rank]) -> Result<()> {
        if let Some(&bad) = members.iter().find(|&&r| usize::from(r) >= self.nranks()) {
            return Err(Error::InvalidRank(bad));
        }
        self.shared.groups.create(id, members.to_vec(), self.rank)
    }

    /// Create (or join) a group whose id is chosen by the fabric.
    ///
    /// Every member calls this with the same member list; the `k`-th such
    /// call of each member returns the same id. Returns that id.
    pub fn group_create_fresh(&self, members: &[Rank]) -> Result<GroupId> {
        if let Some(&bad) = members.iter().find(|&&r| usize::from(r) >= self.nranks()) {
            return Err(Error::InvalidRank(bad));
        }
        self.shared.groups.create_fresh(members.to_vec(), self.rank)
    }

    pub fn group_delete(&self, id: GroupId) -> Result<()> {
        self.shared.groups.delete(id, self.rank)
    }

    /// Sorted member ranks of `group`.
    pub fn group_members(&self, group: GroupId) -> Result<Vec<Rank>> {
        Ok(self.shared.groups.get(group)?.members().to_vec())
    }

    pub fn barrier(&self, group: GroupId) -> Result<()> {
        self.shared
            .groups
            .get(group)?
            .rendezvous(self.rank, Vec::new())
            .map(|_| ())
    }

    /// All-reduce `send` over `group` into `recv` with a user-supplied operator.
    ///
    /// `op(acc, other)` folds `other` into `acc`; contributions are folded in
    /// member order, so every member obtains the same bytes.
    pub fn allreduce_user<F>(&self, group: GroupId, send: &[u8], recv: &mut [u8], op: F) -> Result<()>
    where
        F: Fn(&mut [u8], &[u8]),
    {
        if send.len() != recv.len() {
            return Err(Error::GroupMismatch(group));
        }
        let all = self
            .shared
            .groups
            .get(group)?
            .rendezvous(self.rank, send.to_vec())?;
        if all.iter().any(|c| c.len() != send.len()) {
            return Err(Error::GroupMismatch(group));
        }
        recv.copy_from_slice(&all[0]);
        for other in &all[1..] {
            op(recv, other);
        }
        Ok(())
    }

    // ---- passive channel ------------------------------------------------

    /// Send `size` bytes at `offset` of the local segment to `rank`.
    ///
    /// Blocks until the receiver has taken the message.
    pub fn passive_send(&self, segment: SegmentId, offset: u64, rank: Rank, size: usize) -> Result<()> {
        let data = {
            let table = self.rank_state(self.rank)?.segments.lock();
            let src = table.get(self.rank, segment)?.range(segment, offset, size)?;
            unsafe { std::slice::from_raw_parts(src, size) }.to_vec()
        };
        self.passive.send(rank, &data)
    }

    /// Receive the next passive message from any rank into `[offset, offset + size)`
    /// of the local segment; returns the sender.
    pub fn passive_receive(&self, segment: SegmentId, offset: u64, size: usize) -> Result<Rank> {
        self.rank_state(self.rank)?
            .segments
            .lock()
            .get(self.rank, segment)?
            .range(segment, offset, size)?;
        let mut buf = vec![0u8; size];
        let (from, len) = self.passive.receive(&mut buf)?;
        let table = self.rank_state(self.rank)?.segments.lock();
        let dst = table.get(self.rank, segment)?.range(segment, offset, len)?;
        unsafe { std::ptr::copy_nonoverlapping(buf.as_ptr(), dst, len) };
        Ok(from)
    }

    // ---- atomics --------------------------------------------------------

    fn atomic_at<R>(
        &self,
        rank: Rank,
        segment: SegmentId,
        offset: u64,
        f: impl FnOnce(&AtomicU64) -> R,
    ) -> Result<R> {
        if offset % 8 != 0 {
            return Err(Error::Misaligned(offset));
        }
        let table = self.rank_state(rank)?.segments.lock();
        let target = table.get(rank, segment)?;
        target.check_remote(rank, segment, self.rank, AccessFlags::REMOTE_ATOMIC)?;
        let ptr = target.range(segment, offset, 8)?;
        if ptr as usize % 8 != 0 {
            return Err(Error::Misaligned(offset));
        }
        let atomic = unsafe { AtomicU64::from_ptr(ptr.cast::<u64>()) };
        Ok(f(atomic))
    }

    /// Atomically add `value` to the 64-bit word at `offset`; returns the old value.
    pub fn atomic_fetch_add(
        &self,
        rank: Rank,
        segment: SegmentId,
        offset: u64,
        value: u64,
    ) -> Result<u64> {
        self.atomic_at(rank, segment, offset, |a| a.fetch_add(value, Ordering::SeqCst))
    }

    /// Replace the word at `offset` with `new` if it equals `comparator`;
    /// returns the old value either way.
    pub fn atomic_compare_swap(
        &self,
        rank: Rank,
        segment: SegmentId,
        offset: u64,
        comparator: u64,
        new: u64,
    ) -> Result<u64> {
        self.atomic_at(rank, segment, offset, |a| {
            match a.compare_exchange(comparator, new, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(old) | Err(old) => old,
            }
        })
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Some(state) = self.shared.ranks.get(usize::from(self.rank)) {
            state.segments.lock().clear();
            state.notified.notify_all();
        }
    }
}
