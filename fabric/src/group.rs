//! Groups: native barrier and all-reduce rendezvous.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::{GroupId, Rank};

struct RendezvousState {
    /// Completed rounds.
    round: u64,
    arrived: usize,
    contributions: Vec<Option<Vec<u8>>>,
    /// Contributions of the last completed round, in member order.
    completed: Arc<Vec<Vec<u8>>>,
}

/// A committed group of ranks.
pub(crate) struct Group {
    id: GroupId,
    /// Sorted member ranks.
    members: Vec<Rank>,
    state: Mutex<RendezvousState>,
    cv: Condvar,
}

impl Group {
    fn new(id: GroupId, members: Vec<Rank>) -> Self {
        let n = members.len();
        Self {
            id,
            members,
            state: Mutex::new(RendezvousState {
                round: 0,
                arrived: 0,
                contributions: vec![None; n],
                completed: Arc::new(Vec::new()),
            }),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn members(&self) -> &[Rank] {
        &self.members
    }

    pub(crate) fn position(&self, rank: Rank) -> Result<usize> {
        self.members
            .binary_search(&rank)
            .map_err(|_| Error::NotGroupMember {
                group: self.id,
                rank,
            })
    }

    /// Deposit a contribution and block until every member has deposited one.
    ///
    /// Returns all contributions of this round in member order. A member
    /// cannot enter the next round before it has left this one, so the
    /// completed snapshot stays valid until every member has read it.
    pub(crate) fn rendezvous(&self, rank: Rank, contribution: Vec<u8>) -> Result<Arc<Vec<Vec<u8>>>> {
        let pos = self.position(rank)?;
        let mut st = self.state.lock();
        let round = st.round;
        st.contributions[pos] = Some(contribution);
        st.arrived += 1;
        if st.arrived == self.members.len() {
            let all: Vec<Vec<u8>> = st
                .contributions
                .iter_mut()
                .map(|c| c.take().unwrap_or_default())
                .collect();
            st.completed = Arc::new(all);
            st.arrived = 0;
            st.round += 1;
            self.cv.notify_all();
            return Ok(Arc::clone(&st.completed));
        }
        while st.round == round {
            self.cv.wait(&mut st);
        }
        Ok(Arc::clone(&st.completed))
    }
}

struct Entry {
    group: Arc<Group>,
    /// Members that have deleted their view of the group.
    deleted: usize,
}

struct Registry {
    groups: HashMap<GroupId, Entry>,
    /// Groups made by [`GroupRegistry::create_fresh`], keyed by member set
    /// and generation.
    instances: HashMap<(Vec<Rank>, u64), GroupId>,
    /// Calls to [`GroupRegistry::create_fresh`] each rank made per member set.
    generations: HashMap<(Vec<Rank>, Rank), u64>,
    /// Next candidate for a fabric-chosen id.
    next_id: GroupId,
}

impl Registry {
    fn allocate_id(&mut self) -> Result<GroupId> {
        let mut id = self.next_id;
        while id == crate::GROUP_ALL || self.groups.contains_key(&id) {
            id = id.checked_add(1).ok_or(Error::InvalidGroup(GroupId::MAX))?;
        }
        self.next_id = id.saturating_add(1);
        Ok(id)
    }
}

fn normalize(mut members: Vec<Rank>, rank: Rank) -> Result<Vec<Rank>> {
    members.sort_unstable();
    members.dedup();
    if members.binary_search(&rank).is_err() {
        return Err(Error::InvalidRank(rank));
    }
    Ok(members)
}

/// World-wide group registry.
pub(crate) struct GroupRegistry {
    inner: Mutex<Registry>,
}

impl GroupRegistry {
    pub(crate) fn new(all: Vec<Rank>) -> Self {
        let mut groups = HashMap::new();
        groups.insert(
            crate::GROUP_ALL,
            Entry {
                group: Arc::new(Group::new(crate::GROUP_ALL, all)),
                deleted: 0,
            },
        );
        Self {
            inner: Mutex::new(Registry {
                groups,
                instances: HashMap::new(),
                generations: HashMap::new(),
                next_id: crate::GROUP_ALL + 1,
            }),
        }
    }

    /// Create the group or join the existing one with the same membership.
    pub(crate) fn create(&self, id: GroupId, members: Vec<Rank>, rank: Rank) -> Result<()> {
        let members =
            normalize(members, rank).map_err(|_| Error::NotGroupMember { group: id, rank })?;
        let mut reg = self.inner.lock();
        match reg.groups.get(&id) {
            Some(entry) if entry.group.members != members => Err(Error::GroupMismatch(id)),
            Some(_) => Ok(()),
            None => {
                reg.groups.insert(
                    id,
                    Entry {
                        group: Arc::new(Group::new(id, members)),
                        deleted: 0,
                    },
                );
                Ok(())
            }
        }
    }

    /// Create or join a group with an id chosen by the registry.
    ///
    /// The `k`-th call of every member with the same member set lands in
    /// the same group; distinct member sets never share one.
    pub(crate) fn create_fresh(&self, members: Vec<Rank>, rank: Rank) -> Result<GroupId> {
        let members = normalize(members, rank)?;
        let mut reg = self.inner.lock();
        let generation = {
            let counter = reg.generations.entry((members.clone(), rank)).or_insert(0);
            let current = *counter;
            *counter += 1;
            current
        };
        let key = (members, generation);
        if let Some(&id) = reg.instances.get(&key) {
            return Ok(id);
        }
        let id = reg.allocate_id()?;
        reg.groups.insert(
            id,
            Entry {
                group: Arc::new(Group::new(id, key.0.clone())),
                deleted: 0,
            },
        );
        reg.instances.insert(key, id);
        Ok(id)
    }

    pub(crate) fn get(&self, id: GroupId) -> Result<Arc<Group>> {
        self.inner
            .lock()
            .groups
            .get(&id)
            .map(|entry| Arc::clone(&entry.group))
            .ok_or(Error::InvalidGroup(id))
    }

    /// Drop `rank`'s view of the group; the group disappears once every member deleted it.
    pub(crate) fn delete(&self, id: GroupId, rank: Rank) -> Result<()> {
        if id == crate::GROUP_ALL {
            return Err(Error::InvalidGroup(id));
        }
        let mut reg = self.inner.lock();
        let entry = reg.groups.get_mut(&id).ok_or(Error::InvalidGroup(id))?;
        entry.group.position(rank)?;
        entry.deleted += 1;
        if entry.deleted == entry.group.members.len() {
            reg.groups.remove(&id);
            reg.instances.retain(|_, &mut v| v != id);
        }
        Ok(())
    }
}
