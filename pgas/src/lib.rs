//! One-sided communication and collectives for a partitioned global
//! address space.
//!
//! Every unit drives a [`Runtime`] built on a [`fabric::Endpoint`]. Memory
//! of any unit is addressed through a [`GlobalPtr`]; transfers are plain
//! byte slices described by a [`DataType`].
//!
//! - Blocking RMA: [`Runtime::get_blocking`], [`Runtime::put_blocking`]
//! - Request-table RMA: [`Runtime::get`], [`Runtime::put`], completed by
//!   [`Runtime::flush`] and its variants
//! - Handle RMA: [`Runtime::get_handle`], [`Runtime::put_handle`], completed
//!   by [`Runtime::wait`] / [`Runtime::test`] and their batch forms
//! - Collectives over teams: barrier, bcast, scatter, gather, allgather(v),
//!   alltoall, reduce, allreduce
//! - Two-sided messaging and 64-bit atomics
//!
//! # Example
//!
//! ```
//! use fabric::FabricConfig;
//! use pgas::{BasicType, Config, DataType, TEAM_ALL, launch};
//!
//! let sums = launch(3, FabricConfig::default(), Config::default(), |rt| {
//!     let me = rt.myid().0 as i32;
//!     let mut sum = [0i32];
//!     rt.allreduce(
//!         pgas::bytes_of(&[me]),
//!         pgas::bytes_of_mut(&mut sum),
//!         1,
//!         &DataType::Basic(BasicType::Int),
//!         pgas::ReduceOp::Sum,
//!         TEAM_ALL,
//!     )?;
//!     Ok(sum[0])
//! })
//! .unwrap();
//! assert_eq!(sums, vec![3, 3, 3]);
//! ```

mod atomic;
mod collective;
pub mod config;
pub mod error;
mod globmem;
mod gptr;
mod handle;
mod launch;
mod notify;
mod p2p;
mod pool;
mod reduce;
mod request;
mod rma;
mod runtime;
pub mod segment;
mod team;
mod types;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use gptr::{GlobalPtr, GlobalUnit, SegmentId, TeamUnit};
pub use handle::{CommKind, Handle};
pub use launch::launch;
pub use pool::SegmentPool;
pub use reduce::ReduceOp;
pub use runtime::Runtime;
pub use team::{TEAM_ALL, TeamId};
pub use types::{
    BasicType, ConversionPlan, DataType, Primitive, TransferKind, bytes_of, bytes_of_mut, convert,
};
