//! Per-unit runtime context.

use fabric::{AccessFlags, Endpoint, GROUP_ALL, QueueId};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::globmem::GlobalMemory;
use crate::gptr::{GlobalPtr, Resolved};
use crate::pool::SegmentPool;
use crate::request::RequestTable;
use crate::segment::{
    FIRST_POOL_SEG, LOCAL_ALLOC_SEG, PUT_COMPLETION_DST_SEG, PUT_COMPLETION_SRC_SEG,
};
use crate::team::{TEAM_ALL, Team, TeamRegistry};

/// One unit's participation in the global address space.
///
/// Owns the unit's fabric endpoint, segment pool, request table, team
/// registry and global-memory bookkeeping. Every operation takes `&self`.
pub struct Runtime {
    pub(crate) endpoint: Endpoint,
    pub(crate) config: Config,
    pub(crate) pool: SegmentPool,
    pub(crate) requests: Mutex<RequestTable>,
    pub(crate) teams: Mutex<TeamRegistry>,
    pub(crate) memory: Mutex<GlobalMemory>,
    /// Serialises use of the one-sided staging segment.
    pub(crate) onesided: Mutex<()>,
    /// Serialises use of the collective segment.
    pub(crate) coll: Mutex<()>,
    finalized: bool,
}

impl Runtime {
    /// Join the address space. Collective over every unit of the world.
    pub fn init(endpoint: Endpoint, config: Config) -> Result<Self> {
        config.validate(endpoint.config())?;
        let me = endpoint.rank();
        let nranks = endpoint.nranks();

        endpoint.segment_create(
            LOCAL_ALLOC_SEG,
            config.local_alloc_size,
            GROUP_ALL,
            AccessFlags::all(),
        )?;
        endpoint.segment_create(PUT_COMPLETION_SRC_SEG, 1, GROUP_ALL, AccessFlags::REMOTE_READ)?;
        endpoint.segment_create(PUT_COMPLETION_DST_SEG, 1, GROUP_ALL, AccessFlags::empty())?;

        let ranks = (0..nranks).map(|r| r as fabric::Rank).collect();
        let all = Team::new(TEAM_ALL, GROUP_ALL, ranks, me)?;
        let runtime = Self {
            pool: SegmentPool::new(FIRST_POOL_SEG, config.pool_size),
            requests: Mutex::new(RequestTable::new()),
            teams: Mutex::new(TeamRegistry::new(all)),
            memory: Mutex::new(GlobalMemory::new(nranks, config.local_alloc_size)),
            onesided: Mutex::new(()),
            coll: Mutex::new(()),
            finalized: false,
            endpoint,
            config,
        };
        runtime.endpoint.barrier(GROUP_ALL)?;
        tracing::debug!(unit = me, nranks, "runtime initialised");
        Ok(runtime)
    }

    /// Leave the address space. Collective over every unit of the world.
    ///
    /// Completes outstanding request-table operations and releases every
    /// segment the runtime still holds.
    pub fn finalize(mut self) -> Result<()> {
        let mut result = Ok(());
        let entries = self.requests.lock().take_all();
        for entry in entries {
            result = result.and(self.drain_entry(entry));
        }
        self.endpoint.barrier(GROUP_ALL)?;

        let allocations: Vec<_> = self.memory.lock().translation.drain().collect();
        for (segid, entry) in allocations {
            tracing::debug!(segment = segid.0, "releasing team allocation at finalize");
            if let Some(seg) = entry.own_segment(self.endpoint.rank()) {
                result = result.and(self.pool.reclaim(&self.endpoint, seg));
            }
        }
        for seg in [LOCAL_ALLOC_SEG, PUT_COMPLETION_SRC_SEG, PUT_COMPLETION_DST_SEG] {
            result = result.and(self.endpoint.segment_delete(seg).map_err(Error::from));
        }
        let teams = self.teams.lock().ids();
        for team in teams.into_iter().filter(|&t| t != TEAM_ALL) {
            result = result.and(self.team_destroy(team));
        }
        if self.pool.free_count() != self.pool.capacity() {
            tracing::warn!(
                leaked = self.pool.capacity() - self.pool.free_count(),
                "pool segments still held at finalize"
            );
        }
        self.endpoint.barrier(GROUP_ALL)?;
        self.finalized = true;
        tracing::debug!(unit = self.endpoint.rank(), "runtime finalized");
        result
    }

    /// The unit's fabric endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The unit's segment pool.
    pub fn pool(&self) -> &SegmentPool {
        &self.pool
    }

    pub(crate) fn resolve(&self, gptr: GlobalPtr, nbytes: usize) -> Result<Resolved> {
        self.memory.lock().translation.resolve(gptr, nbytes)
    }

    /// Address of resolved memory owned by the calling unit.
    pub(crate) fn local_ptr(&self, target: Resolved) -> Result<*mut u8> {
        let base = self.endpoint.segment_ptr(target.seg)?;
        Ok(unsafe { base.add(target.offset as usize) })
    }

    /// Least-loaded queue; a full queue is drained first.
    pub(crate) fn select_queue(&self) -> Result<QueueId> {
        let mut best: Option<(QueueId, usize)> = None;
        for q in 0..self.endpoint.queue_num() {
            let q = q as QueueId;
            let load = self.endpoint.queue_size(q)?;
            if best.is_none_or(|(_, min)| load < min) {
                best = Some((q, load));
            }
        }
        let (queue, load) = best.ok_or_else(|| Error::invalid("fabric has no queues"))?;
        if load >= self.endpoint.queue_size_max() {
            tracing::debug!(queue, "all queues full, draining");
            self.endpoint.wait(queue)?;
        }
        Ok(queue)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if !self.finalized {
            tracing::warn!(
                unit = self.endpoint.rank(),
                "runtime dropped without finalize"
            );
        }
    }
}
