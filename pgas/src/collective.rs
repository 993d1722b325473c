//! Collective operations over teams.
//!
//! Receive buffers are exposed to the team through the collective
//! segment; send buffers through the one-sided segment. Data arrives
//! with a notification per sender, and every collective ends with a team
//! barrier so the next one can reuse both segments.

use crate::error::{Error, Result};
use crate::gptr::TeamUnit;
use crate::notify::{binomial_tree, gather_slot};
use crate::reduce::{ReduceOp, Reducer};
use crate::rma::check_len;
use crate::runtime::Runtime;
use crate::segment::{Binding, COLL_SEG, ONESIDED_SEG};
use crate::team::{Team, TeamId};
use crate::types::{DataType, plan};

fn root_index(root: TeamUnit, team: &Team) -> Result<usize> {
    let root = root.0 as usize;
    if root >= team.size() {
        return Err(Error::invalid(format!(
            "root {root} out of range for team {} of {} units",
            team.id,
            team.size()
        )));
    }
    Ok(root)
}

fn total(nbytes: usize, units: usize) -> Result<usize> {
    nbytes
        .checked_mul(units)
        .ok_or_else(|| Error::invalid("collective size overflows"))
}

impl Runtime {
    /// Block until every unit of `team` has entered the barrier.
    pub fn barrier(&self, team: TeamId) -> Result<()> {
        self.endpoint.barrier(self.team(team)?.group())?;
        Ok(())
    }

    /// Unit `root` sends the `u`-th block of `nelem` elements of `send`
    /// to team unit `u`.
    pub fn scatter(
        &self,
        send: &[u8],
        recv: &mut [u8],
        nelem: usize,
        dtype: &DataType,
        root: TeamUnit,
        team: TeamId,
    ) -> Result<()> {
        let nbytes = plan(dtype, nelem)?.nbytes;
        let team = self.team(team)?;
        let root = root_index(root, &team)?;
        let me = team.myid;
        check_len(recv.len(), nbytes, "scatter receive buffer")?;
        if me == root {
            check_len(send.len(), total(nbytes, team.size())?, "scatter send buffer")?;
        }
        tracing::debug!(team = team.id, root, nbytes, "scatter");
        let queue = self.config.collective_queue;
        let recv_ptr = recv.as_mut_ptr();
        {
            let _coll = unsafe {
                Binding::group(
                    &self.endpoint,
                    self.coll.lock(),
                    COLL_SEG,
                    recv_ptr,
                    nbytes,
                    team.group(),
                )?
            };
            if me == root {
                let send_len = total(nbytes, team.size())?;
                let _onesided = unsafe {
                    Binding::local(
                        &self.endpoint,
                        self.onesided.lock(),
                        ONESIDED_SEG,
                        send.as_ptr().cast_mut(),
                        send_len,
                    )?
                };
                for unit in (0..team.size()).filter(|&u| u != me) {
                    self.endpoint.write_notify(
                        ONESIDED_SEG,
                        (unit * nbytes) as u64,
                        team.rank(unit)?,
                        COLL_SEG,
                        0,
                        nbytes,
                        0,
                        self.config.notify_value,
                        queue,
                    )?;
                }
                unsafe {
                    std::ptr::copy_nonoverlapping(send.as_ptr().add(me * nbytes), recv_ptr, nbytes)
                };
                self.endpoint.wait(queue)?;
            } else {
                self.wait_notifications(COLL_SEG, 0, 1, 1, None)?;
            }
        }
        self.endpoint.barrier(team.group())?;
        Ok(())
    }

    /// Broadcast `nelem` elements of `buf` from `root` along a binomial tree.
    pub fn bcast(
        &self,
        buf: &mut [u8],
        nelem: usize,
        dtype: &DataType,
        root: TeamUnit,
        team: TeamId,
    ) -> Result<()> {
        let nbytes = plan(dtype, nelem)?.nbytes;
        let team = self.team(team)?;
        let root = root_index(root, &team)?;
        check_len(buf.len(), nbytes, "broadcast buffer")?;
        let tree = binomial_tree(team.myid, root, team.size());
        tracing::debug!(team = team.id, root, nbytes, children = tree.children.len(), "bcast");
        let queue = self.config.collective_queue;
        {
            let _coll = unsafe {
                Binding::group(
                    &self.endpoint,
                    self.coll.lock(),
                    COLL_SEG,
                    buf.as_mut_ptr(),
                    nbytes,
                    team.group(),
                )?
            };
            if tree.parent.is_some() {
                self.wait_notifications(COLL_SEG, 0, 1, 1, None)?;
            }
            for &child in &tree.children {
                self.endpoint.write_notify(
                    COLL_SEG,
                    0,
                    team.rank(child)?,
                    COLL_SEG,
                    0,
                    nbytes,
                    0,
                    self.config.notify_value,
                    queue,
                )?;
            }
            self.endpoint.wait(queue)?;
        }
        self.endpoint.barrier(team.group())?;
        Ok(())
    }

    /// Unit `root` receives the `nelem` elements of every unit's `send`,
    /// ordered by team unit id. `recv` is only accessed at the root.
    pub fn gather(
        &self,
        send: &[u8],
        recv: &mut [u8],
        nelem: usize,
        dtype: &DataType,
        root: TeamUnit,
        team: TeamId,
    ) -> Result<()> {
        let nbytes = plan(dtype, nelem)?.nbytes;
        let team = self.team(team)?;
        let root = root_index(root, &team)?;
        let me = team.myid;
        check_len(send.len(), nbytes, "gather send buffer")?;
        let recv_len = total(nbytes, team.size())?;
        if me == root {
            check_len(recv.len(), recv_len, "gather receive buffer")?;
        }
        tracing::debug!(team = team.id, root, nbytes, "gather");
        let queue = self.config.collective_queue;
        if me == root {
            let recv_ptr = recv.as_mut_ptr();
            let _coll = unsafe {
                Binding::group(
                    &self.endpoint,
                    self.coll.lock(),
                    COLL_SEG,
                    recv_ptr,
                    recv_len,
                    team.group(),
                )?
            };
            unsafe {
                std::ptr::copy_nonoverlapping(send.as_ptr(), recv_ptr.add(me * nbytes), nbytes)
            };
            let senders = team.size() - 1;
            self.wait_notifications(COLL_SEG, 0, senders as u32, senders, None)?;
        } else {
            // Pairs with the root's collective binding.
            self.endpoint.barrier(team.group())?;
            let _onesided = unsafe {
                Binding::local(
                    &self.endpoint,
                    self.onesided.lock(),
                    ONESIDED_SEG,
                    send.as_ptr().cast_mut(),
                    nbytes,
                )?
            };
            self.endpoint.write_notify(
                ONESIDED_SEG,
                0,
                team.rank(root)?,
                COLL_SEG,
                (me * nbytes) as u64,
                nbytes,
                gather_slot(me, root),
                self.config.notify_value,
                queue,
            )?;
            self.endpoint.wait(queue)?;
        }
        self.endpoint.barrier(team.group())?;
        Ok(())
    }

    /// Post block `block(u) = (send offset, receive offset, len)` of `send`
    /// to the collective segment of every other unit `u`, copy the own
    /// block, then wait for one block from every peer.
    fn exchange_blocks(
        &self,
        team: &Team,
        send: &[u8],
        recv: &mut [u8],
        block: impl Fn(usize) -> (usize, usize, usize),
    ) -> Result<()> {
        let me = team.myid;
        let size = team.size();
        let queue = self.config.collective_queue;
        let recv_ptr = recv.as_mut_ptr();
        {
            let _coll = unsafe {
                Binding::group(
                    &self.endpoint,
                    self.coll.lock(),
                    COLL_SEG,
                    recv_ptr,
                    recv.len(),
                    team.group(),
                )?
            };
            {
                let _onesided = unsafe {
                    Binding::local(
                        &self.endpoint,
                        self.onesided.lock(),
                        ONESIDED_SEG,
                        send.as_ptr().cast_mut(),
                        send.len(),
                    )?
                };
                for unit in (0..size).filter(|&u| u != me) {
                    let (src, dst, len) = block(unit);
                    self.endpoint.write_notify(
                        ONESIDED_SEG,
                        src as u64,
                        team.rank(unit)?,
                        COLL_SEG,
                        dst as u64,
                        len,
                        me as u32,
                        self.config.notify_value,
                        queue,
                    )?;
                }
                let (src, dst, len) = block(me);
                unsafe {
                    std::ptr::copy_nonoverlapping(send.as_ptr().add(src), recv_ptr.add(dst), len)
                };
                self.endpoint.wait(queue)?;
            }
            self.wait_notifications(COLL_SEG, 0, size as u32, size - 1, Some(me as u32))?;
        }
        self.endpoint.barrier(team.group())?;
        Ok(())
    }

    /// Every unit receives the `nelem` elements of every unit's `send`,
    /// ordered by team unit id.
    pub fn allgather(
        &self,
        send: &[u8],
        recv: &mut [u8],
        nelem: usize,
        dtype: &DataType,
        team: TeamId,
    ) -> Result<()> {
        let nbytes = plan(dtype, nelem)?.nbytes;
        let team = self.team(team)?;
        check_len(send.len(), nbytes, "allgather send buffer")?;
        let recv_len = total(nbytes, team.size())?;
        check_len(recv.len(), recv_len, "allgather receive buffer")?;
        tracing::debug!(team = team.id, nbytes, "allgather");
        let me = team.myid;
        self.exchange_blocks(&team, &send[..nbytes], &mut recv[..recv_len], |_| {
            (0, me * nbytes, nbytes)
        })
    }

    /// Like [`Runtime::allgather`] with per-unit element counts.
    ///
    /// Unit `u`'s `nrecv[u]` elements land at element `displs[u]` of `recv`.
    #[allow(clippy::too_many_arguments)]
    pub fn allgatherv(
        &self,
        send: &[u8],
        nsend: usize,
        recv: &mut [u8],
        nrecv: &[usize],
        displs: &[usize],
        dtype: &DataType,
        team: TeamId,
    ) -> Result<()> {
        let elem = plan(dtype, 1)?.nbytes;
        let team = self.team(team)?;
        let me = team.myid;
        if nrecv.len() != team.size() || displs.len() != team.size() {
            return Err(Error::invalid(format!(
                "allgatherv needs {} counts and displacements",
                team.size()
            )));
        }
        if nrecv[me] != nsend {
            return Err(Error::invalid(format!(
                "unit {me} sends {nsend} elements but {} are expected",
                nrecv[me]
            )));
        }
        let mut extent = 0usize;
        for (&n, &d) in nrecv.iter().zip(displs) {
            let end = d
                .checked_add(n)
                .and_then(|e| e.checked_mul(elem))
                .ok_or_else(|| Error::invalid("allgatherv extent overflows"))?;
            extent = extent.max(end);
        }
        let send_len = nsend * elem;
        check_len(send.len(), send_len, "allgatherv send buffer")?;
        check_len(recv.len(), extent, "allgatherv receive buffer")?;
        tracing::debug!(team = team.id, send_len, extent, "allgatherv");
        let offset = displs[me] * elem;
        self.exchange_blocks(&team, &send[..send_len], &mut recv[..extent], |_| {
            (0, offset, send_len)
        })
    }

    /// Block `u` of every unit's `send` goes to unit `u`, landing at block
    /// `sender` of its `recv`.
    pub fn alltoall(
        &self,
        send: &[u8],
        recv: &mut [u8],
        nelem: usize,
        dtype: &DataType,
        team: TeamId,
    ) -> Result<()> {
        let nbytes = plan(dtype, nelem)?.nbytes;
        let team = self.team(team)?;
        let len = total(nbytes, team.size())?;
        check_len(send.len(), len, "alltoall send buffer")?;
        check_len(recv.len(), len, "alltoall receive buffer")?;
        tracing::debug!(team = team.id, nbytes, "alltoall");
        let me = team.myid;
        self.exchange_blocks(&team, &send[..len], &mut recv[..len], |unit| {
            (unit * nbytes, me * nbytes, nbytes)
        })
    }

    /// Reduce every unit's `send` element-wise with `op` into `recv` at `root`.
    #[allow(clippy::too_many_arguments)]
    pub fn reduce(
        &self,
        send: &[u8],
        recv: &mut [u8],
        nelem: usize,
        dtype: &DataType,
        op: ReduceOp,
        root: TeamUnit,
        team: TeamId,
    ) -> Result<()> {
        let plan = plan(dtype, nelem)?;
        let reducer = Reducer::new(op, plan.base, plan.nelem)?;
        let nbytes = plan.nbytes;
        let team_ref = self.team(team)?;
        let is_root = team_ref.myid == root_index(root, &team_ref)?;
        if is_root {
            check_len(recv.len(), nbytes, "reduce receive buffer")?;
        }
        let mut gathered = if is_root {
            vec![0u8; total(nbytes, team_ref.size())?]
        } else {
            Vec::new()
        };
        self.gather(send, &mut gathered, nelem, dtype, root, team)?;
        if is_root && nbytes > 0 {
            let acc = &mut recv[..nbytes];
            let (first, rest) = gathered.split_at(nbytes);
            acc.copy_from_slice(first);
            for chunk in rest.chunks_exact(nbytes) {
                reducer.apply(acc, chunk);
            }
        }
        self.endpoint.barrier(team_ref.group())?;
        Ok(())
    }

    /// Reduce every unit's `send` element-wise with `op`; every unit
    /// receives the result.
    pub fn allreduce(
        &self,
        send: &[u8],
        recv: &mut [u8],
        nelem: usize,
        dtype: &DataType,
        op: ReduceOp,
        team: TeamId,
    ) -> Result<()> {
        let plan = plan(dtype, nelem)?;
        let reducer = Reducer::new(op, plan.base, plan.nelem)?;
        let nbytes = plan.nbytes;
        let team = self.team(team)?;
        check_len(send.len(), nbytes, "allreduce send buffer")?;
        check_len(recv.len(), nbytes, "allreduce receive buffer")?;
        tracing::debug!(team = team.id, ?op, nbytes, "allreduce");
        self.endpoint
            .allreduce_user(team.group(), &send[..nbytes], &mut recv[..nbytes], |acc, other| {
                reducer.apply(acc, other)
            })?;
        self.endpoint.barrier(team.group())?;
        Ok(())
    }
}
