//! # fabric - in-process one-sided interconnect
//!
//! A small interconnect with the vocabulary of a partitioned-global-address-space
//! fabric: every rank exposes memory *segments* for one-sided access, pairs
//! writes with *notifications*, posts work on a handful of asynchronous
//! *queues*, and synchronises through *groups* (native barrier and
//! all-reduce). A passive channel and 64-bit remote atomics complete the set.
//!
//! All ranks live in one process. [`World::create`] returns one [`Endpoint`]
//! per rank; each endpoint is meant to be moved into the thread that drives
//! that rank.
//!
//! ## Progress model
//!
//! The in-process "NIC" is always progressing: an operation posted on a queue
//! is executed before the post returns. A queue can be stalled with
//! [`Endpoint::stall_queue`] to model congestion; operations posted while
//! stalled are held in submission order and executed on
//! [`Endpoint::resume_queue`] or [`Endpoint::wait`].
//!
//! ## Usage
//!
//! ```ignore
//! let endpoints = World::create(FabricConfig::default(), 2)?;
//! for ep in endpoints {
//!     std::thread::spawn(move || {
//!         ep.segment_create(7, 4096, GROUP_ALL, AccessFlags::all())?;
//!         // ... write_notify / notify_waitsome ...
//!         ep.segment_delete(7)
//!     });
//! }
//! ```

pub mod config;
pub mod error;

mod group;
mod passive;
mod queue;
mod segment;
mod world;

pub use config::FabricConfig;
pub use error::{Error, Result};
pub use segment::AccessFlags;
pub use world::{Endpoint, World};

/// Rank of an endpoint inside a world.
pub type Rank = u16;

/// Segment identifier, unique per rank.
pub type SegmentId = u8;

/// Notification slot inside a segment.
pub type NotificationId = u32;

/// Value posted to a notification slot. Zero means "not notified".
pub type NotificationValue = u32;

/// Asynchronous operation queue of an endpoint.
pub type QueueId = u8;

/// Group of ranks sharing a barrier and reduction context.
pub type GroupId = u32;

/// The group containing every rank of the world.
pub const GROUP_ALL: GroupId = 0;

/// Blocking behaviour of a wait primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Block until the condition holds.
    Block,
    /// Check once and return immediately.
    Test,
}
