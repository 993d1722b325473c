//! Request table: transfers completed by flushing their target.

use std::collections::HashMap;

use fabric::QueueId;
use slab::Slab;

use crate::error::{Error, Result};
use crate::gptr::{GlobalPtr, SegmentId};
use crate::runtime::Runtime;

type Key = (u32, SegmentId);

/// Outstanding transfers to one `(unit, segment)` target.
#[derive(Debug)]
pub(crate) struct RequestEntry {
    pub(crate) unit: u32,
    pub(crate) segid: SegmentId,
    /// Every transfer to the target is posted on this queue.
    pub(crate) queue: QueueId,
    /// Pool segments bound to the transfers' local buffers.
    pub(crate) pool_segs: Vec<fabric::SegmentId>,
}

pub(crate) struct RequestTable {
    entries: Slab<RequestEntry>,
    index: HashMap<Key, usize>,
}

impl RequestTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Slab::new(),
            index: HashMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn queue_of(&self, key: Key) -> Option<QueueId> {
        self.index.get(&key).map(|&i| self.entries[i].queue)
    }

    /// Track `seg` under `key`. An existing entry keeps its queue.
    pub(crate) fn record(&mut self, key: Key, queue: QueueId, seg: fabric::SegmentId) {
        match self.index.get(&key) {
            Some(&i) => {
                let entry = &mut self.entries[i];
                debug_assert_eq!(entry.queue, queue);
                entry.pool_segs.push(seg);
            }
            None => {
                let i = self.entries.insert(RequestEntry {
                    unit: key.0,
                    segid: key.1,
                    queue,
                    pool_segs: vec![seg],
                });
                self.index.insert(key, i);
            }
        }
    }

    pub(crate) fn take(&mut self, key: Key) -> Option<RequestEntry> {
        let i = self.index.remove(&key)?;
        Some(self.entries.remove(i))
    }

    /// Remove every entry targeting `segid`, on any unit.
    pub(crate) fn take_segment(&mut self, segid: SegmentId) -> Vec<RequestEntry> {
        let keys: Vec<Key> = self.index.keys().filter(|k| k.1 == segid).copied().collect();
        keys.into_iter().filter_map(|k| self.take(k)).collect()
    }

    pub(crate) fn take_all(&mut self) -> Vec<RequestEntry> {
        self.index.clear();
        self.entries.drain().collect()
    }
}

impl Runtime {
    /// Complete an entry's transfers and return its pool segments.
    pub(crate) fn drain_entry(&self, entry: RequestEntry) -> Result<()> {
        tracing::trace!(
            unit = entry.unit,
            segment = entry.segid.0,
            queue = entry.queue,
            n = entry.pool_segs.len(),
            "flushing requests"
        );
        let mut result = self.endpoint.wait(entry.queue).map_err(Error::from);
        for seg in entry.pool_segs {
            result = result.and(self.pool.reclaim(&self.endpoint, seg));
        }
        result
    }

    /// Complete every [`Runtime::get`]/[`Runtime::put`] to the unit and
    /// segment of `gptr`.
    pub fn flush(&self, gptr: GlobalPtr) -> Result<()> {
        let entry = self.requests.lock().take((gptr.unit, gptr.segid));
        match entry {
            Some(entry) => self.drain_entry(entry),
            None => Ok(()),
        }
    }

    /// Complete every tracked transfer to the segment of `gptr` on all units.
    pub fn flush_all(&self, gptr: GlobalPtr) -> Result<()> {
        let entries = self.requests.lock().take_segment(gptr.segid);
        let mut result = Ok(());
        for entry in entries {
            result = result.and(self.drain_entry(entry));
        }
        result
    }

    pub fn flush_local(&self, gptr: GlobalPtr) -> Result<()> {
        self.flush(gptr)
    }

    pub fn flush_local_all(&self, gptr: GlobalPtr) -> Result<()> {
        self.flush_all(gptr)
    }

    /// Number of targets with unflushed transfers.
    pub fn pending_requests(&self) -> usize {
        self.requests.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_keep_their_queue() {
        let mut t = RequestTable::new();
        let key = (1, SegmentId(0));
        assert_eq!(t.queue_of(key), None);
        t.record(key, 3, 10);
        t.record(key, 3, 11);
        t.record((2, SegmentId(0)), 1, 12);
        t.record((1, SegmentId(5)), 0, 13);
        assert_eq!(t.queue_of(key), Some(3));
        assert_eq!(t.len(), 3);

        let e = t.take(key).unwrap();
        assert_eq!(e.pool_segs, vec![10, 11]);
        assert!(t.take(key).is_none());

        let rest = t.take_segment(SegmentId(0));
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].unit, 2);
        assert_eq!(t.take_all().len(), 1);
        assert_eq!(t.len(), 0);
    }
}
