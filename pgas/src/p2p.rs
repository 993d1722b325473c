//! Two-sided messaging over the passive channel.

use crate::error::{Error, Result};
use crate::gptr::GlobalUnit;
use crate::rma::check_len;
use crate::runtime::Runtime;
use crate::types::{DataType, plan};

impl Runtime {
    fn peer(&self, unit: GlobalUnit) -> Result<fabric::Rank> {
        fabric::Rank::try_from(unit.0)
            .ok()
            .filter(|&r| usize::from(r) < self.endpoint.nranks())
            .ok_or_else(|| Error::invalid(format!("unit {} out of range", unit.0)))
    }

    /// Send `nelem` elements of `buf` to `unit`; blocks until `unit`
    /// has received them.
    ///
    /// Tags are accepted but not matched.
    pub fn send(
        &self,
        buf: &[u8],
        nelem: usize,
        dtype: &DataType,
        tag: i32,
        unit: GlobalUnit,
    ) -> Result<()> {
        let nbytes = plan(dtype, nelem)?.nbytes;
        check_len(buf.len(), nbytes, "send buffer")?;
        let rank = self.peer(unit)?;
        let mut seg = self.pool.acquire(&self.endpoint)?;
        unsafe { seg.bind(buf.as_ptr().cast_mut(), nbytes)? };
        tracing::trace!(to = rank, nbytes, tag, "send");
        self.endpoint.passive_send(seg.id(), 0, rank, nbytes)?;
        Ok(())
    }

    /// Receive `nelem` elements from `unit` into `buf`.
    ///
    /// The next message from any unit is taken; one from another sender
    /// is a protocol error.
    pub fn recv(
        &self,
        buf: &mut [u8],
        nelem: usize,
        dtype: &DataType,
        tag: i32,
        unit: GlobalUnit,
    ) -> Result<()> {
        let nbytes = plan(dtype, nelem)?.nbytes;
        check_len(buf.len(), nbytes, "receive buffer")?;
        let expected = self.peer(unit)?;
        let mut seg = self.pool.acquire(&self.endpoint)?;
        unsafe { seg.bind(buf.as_mut_ptr(), nbytes)? };
        let from = self.endpoint.passive_receive(seg.id(), 0, nbytes)?;
        tracing::trace!(from, nbytes, tag, "recv");
        if from != expected {
            return Err(Error::Protocol(format!(
                "expected a message from unit {expected}, got one from unit {from}"
            )));
        }
        Ok(())
    }

    /// Combined send and receive. Not provided by this runtime.
    #[allow(clippy::too_many_arguments)]
    pub fn sendrecv(
        &self,
        _send: &[u8],
        _nsend: usize,
        _send_type: &DataType,
        _send_tag: i32,
        _dest: GlobalUnit,
        _recv: &mut [u8],
        _nrecv: usize,
        _recv_type: &DataType,
        _recv_tag: i32,
        _src: GlobalUnit,
    ) -> Result<()> {
        Err(Error::Unsupported("sendrecv"))
    }
}
