//! Teams: named subsets of units with their own collective context.

use std::collections::HashMap;
use std::sync::Arc;

use fabric::{GroupId, Rank};

use crate::error::{Error, Result};
use crate::gptr::{GlobalUnit, TeamUnit};
use crate::runtime::Runtime;

/// Team identifier.
pub type TeamId = u16;

/// The team of every unit.
pub const TEAM_ALL: TeamId = 0;

/// Membership of one team as seen by a member.
#[derive(Debug)]
pub(crate) struct Team {
    pub(crate) id: TeamId,
    /// Fabric group of the members.
    group: GroupId,
    /// Global rank of each team unit; team unit ids follow global order.
    pub(crate) ranks: Vec<Rank>,
    /// Calling unit's team-relative id.
    pub(crate) myid: usize,
}

impl Team {
    pub(crate) fn new(id: TeamId, group: GroupId, ranks: Vec<Rank>, me: Rank) -> Result<Self> {
        let myid = ranks
            .binary_search(&me)
            .map_err(|_| Error::invalid(format!("unit {me} is not a member of team {id}")))?;
        Ok(Self {
            id,
            group,
            ranks,
            myid,
        })
    }

    pub(crate) fn group(&self) -> GroupId {
        self.group
    }

    pub(crate) fn size(&self) -> usize {
        self.ranks.len()
    }

    /// Global rank of team unit `unit`.
    pub(crate) fn rank(&self, unit: usize) -> Result<Rank> {
        self.ranks
            .get(unit)
            .copied()
            .ok_or_else(|| Error::invalid(format!("unit {unit} out of range for team {}", self.id)))
    }
}

/// Teams the calling unit belongs to.
pub(crate) struct TeamRegistry {
    teams: HashMap<TeamId, Arc<Team>>,
    /// Lowest id this unit has not seen in use.
    next_id: TeamId,
}

impl TeamRegistry {
    pub(crate) fn new(all: Team) -> Self {
        let mut teams = HashMap::new();
        teams.insert(TEAM_ALL, Arc::new(all));
        Self {
            teams,
            next_id: TEAM_ALL + 1,
        }
    }

    pub(crate) fn get(&self, id: TeamId) -> Result<Arc<Team>> {
        self.teams
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("team {id}")))
    }

    pub(crate) fn ids(&self) -> Vec<TeamId> {
        self.teams.keys().copied().collect()
    }
}

impl Runtime {
    pub(crate) fn team(&self, id: TeamId) -> Result<Arc<Team>> {
        self.teams.lock().get(id)
    }

    /// Create a team of `members` out of `parent`.
    ///
    /// Collective over `parent`. Members receive the new team's id,
    /// every other unit of the parent receives `None`.
    pub fn team_create(&self, parent: TeamId, members: &[GlobalUnit]) -> Result<Option<TeamId>> {
        let parent = self.team(parent)?;
        let mut ranks = Vec::with_capacity(members.len());
        for unit in members {
            let rank = Rank::try_from(unit.0)
                .ok()
                .filter(|r| parent.ranks.binary_search(r).is_ok())
                .ok_or_else(|| {
                    Error::invalid(format!("unit {} is not in team {}", unit.0, parent.id))
                })?;
            ranks.push(rank);
        }
        ranks.sort_unstable();
        ranks.dedup();
        if ranks.is_empty() {
            return Err(Error::invalid("a team needs at least one member"));
        }

        // Agree on an id no member of the parent has in use.
        let proposal = self.teams.lock().next_id;
        let mut agreed = [0u8; 2];
        self.endpoint.allreduce_user(
            parent.group(),
            &proposal.to_le_bytes(),
            &mut agreed,
            |acc, other| {
                let max = u16::from_le_bytes([acc[0], acc[1]])
                    .max(u16::from_le_bytes([other[0], other[1]]));
                acc.copy_from_slice(&max.to_le_bytes());
            },
        )?;
        let id = TeamId::from_le_bytes(agreed);
        let next = id
            .checked_add(1)
            .ok_or_else(|| Error::ResourceExhausted("team ids exhausted".into()))?;
        self.teams.lock().next_id = next;

        let me = self.endpoint.rank();
        if ranks.binary_search(&me).is_err() {
            tracing::debug!(team = id, "not a member of new team");
            return Ok(None);
        }
        // Team ids are only unique within the parent; the fabric names the group.
        let group = self.endpoint.group_create_fresh(&ranks)?;
        let team = Team::new(id, group, ranks, me)?;
        tracing::debug!(team = id, group, size = team.size(), myid = team.myid, "team created");
        self.teams.lock().teams.insert(id, Arc::new(team));
        self.endpoint.barrier(group)?;
        Ok(Some(id))
    }

    /// Leave and forget `team`. Called by every member.
    pub fn team_destroy(&self, team: TeamId) -> Result<()> {
        if team == TEAM_ALL {
            return Err(Error::invalid("the team of all units cannot be destroyed"));
        }
        let removed = self
            .teams
            .lock()
            .teams
            .remove(&team)
            .ok_or_else(|| Error::NotFound(format!("team {team}")))?;
        self.endpoint.group_delete(removed.group())?;
        tracing::debug!(team, "team destroyed");
        Ok(())
    }

    /// Calling unit's global id.
    pub fn myid(&self) -> GlobalUnit {
        GlobalUnit(u32::from(self.endpoint.rank()))
    }

    /// Number of units in the runtime.
    pub fn size(&self) -> usize {
        self.endpoint.nranks()
    }

    pub fn team_myid(&self, team: TeamId) -> Result<TeamUnit> {
        Ok(TeamUnit(self.team(team)?.myid as u32))
    }

    pub fn team_size(&self, team: TeamId) -> Result<usize> {
        Ok(self.team(team)?.size())
    }

    /// Global id of team unit `unit`.
    pub fn team_unit_l2g(&self, team: TeamId, unit: TeamUnit) -> Result<GlobalUnit> {
        let rank = self.team(team)?.rank(unit.0 as usize)?;
        Ok(GlobalUnit(u32::from(rank)))
    }

    /// Team-relative id of global unit `unit`.
    pub fn team_unit_g2l(&self, team: TeamId, unit: GlobalUnit) -> Result<TeamUnit> {
        let t = self.team(team)?;
        Rank::try_from(unit.0)
            .ok()
            .and_then(|r| t.ranks.binary_search(&r).ok())
            .map(|i| TeamUnit(i as u32))
            .ok_or_else(|| Error::NotFound(format!("unit {} in team {team}", unit.0)))
    }
}
