//! Remote atomics on 64-bit words.

use crate::error::{Error, Result};
use crate::gptr::GlobalPtr;
use crate::reduce::ReduceOp;
use crate::runtime::Runtime;
use crate::types::BasicType;

fn check_word(gptr: GlobalPtr, dtype: BasicType) -> Result<()> {
    if !matches!(
        dtype,
        BasicType::Long | BasicType::ULong | BasicType::LongLong | BasicType::ULongLong
    ) {
        return Err(Error::invalid(format!(
            "atomics operate on 64-bit integers, not {dtype:?}"
        )));
    }
    if gptr.offset % 8 != 0 {
        return Err(Error::invalid(format!("{gptr} is not 8-byte aligned")));
    }
    Ok(())
}

impl Runtime {
    /// Apply `op` with `value` to the word at `gptr`; returns the previous
    /// word. Only [`ReduceOp::Sum`] is provided.
    pub fn fetch_and_op(
        &self,
        gptr: GlobalPtr,
        value: u64,
        dtype: BasicType,
        op: ReduceOp,
    ) -> Result<u64> {
        if op != ReduceOp::Sum {
            return Err(Error::Unsupported("fetch_and_op with operators other than Sum"));
        }
        check_word(gptr, dtype)?;
        let target = self.resolve(gptr, 8)?;
        let old = self
            .endpoint
            .atomic_fetch_add(target.rank, target.seg, target.offset, value)?;
        Ok(old)
    }

    /// Replace the word at `gptr` with `new` if it equals `compare`;
    /// returns the previous word.
    pub fn compare_and_swap(
        &self,
        gptr: GlobalPtr,
        new: u64,
        compare: u64,
        dtype: BasicType,
    ) -> Result<u64> {
        check_word(gptr, dtype)?;
        let target = self.resolve(gptr, 8)?;
        let old = self.endpoint.atomic_compare_swap(
            target.rank,
            target.seg,
            target.offset,
            compare,
            new,
        )?;
        Ok(old)
    }

    /// Element-wise accumulate into remote memory. Not provided.
    pub fn accumulate(
        &self,
        _gptr: GlobalPtr,
        _values: &[u8],
        _nelem: usize,
        _dtype: BasicType,
        _op: ReduceOp,
    ) -> Result<()> {
        Err(Error::Unsupported("accumulate"))
    }

    pub fn accumulate_blocking_local(
        &self,
        _gptr: GlobalPtr,
        _values: &[u8],
        _nelem: usize,
        _dtype: BasicType,
        _op: ReduceOp,
    ) -> Result<()> {
        Err(Error::Unsupported("accumulate_blocking_local"))
    }
}
