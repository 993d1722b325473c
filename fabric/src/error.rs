//! Error types for the fabric.

use crate::{GroupId, NotificationId, QueueId, Rank, SegmentId};

/// Error type for fabric operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration or world size.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Rank is outside the world.
    #[error("invalid rank {0}")]
    InvalidRank(Rank),
    /// Segment id is out of range or not present on the rank.
    #[error("segment {segment} does not exist on rank {rank}")]
    InvalidSegment { rank: Rank, segment: SegmentId },
    /// Segment id is already in use.
    #[error("segment {0} already exists")]
    SegmentExists(SegmentId),
    /// Remote segment has not been registered for the initiating rank.
    #[error("segment {segment} of rank {owner} is not registered for rank {initiator}")]
    SegmentNotRegistered {
        owner: Rank,
        segment: SegmentId,
        initiator: Rank,
    },
    /// Remote segment does not grant the requested access.
    #[error("segment {segment} of rank {owner} denies {access} access")]
    AccessDenied {
        owner: Rank,
        segment: SegmentId,
        access: &'static str,
    },
    /// Access beyond the end of a segment.
    #[error("access [{offset}, {offset}+{size}) exceeds segment {segment} of {len} bytes")]
    OutOfBounds {
        segment: SegmentId,
        offset: u64,
        size: usize,
        len: usize,
    },
    /// Notification id is out of range.
    #[error("invalid notification id {0}")]
    InvalidNotification(NotificationId),
    /// Notification value zero cannot be posted.
    #[error("notification value must be non-zero")]
    InvalidNotificationValue,
    /// Queue id is out of range.
    #[error("invalid queue {0}")]
    InvalidQueue(QueueId),
    /// Queue holds the maximum number of outstanding operations.
    #[error("queue {0} is full")]
    QueueFull(QueueId),
    /// Group does not exist.
    #[error("group {0} does not exist")]
    InvalidGroup(GroupId),
    /// Calling rank is not a member of the group.
    #[error("rank {rank} is not a member of group {group}")]
    NotGroupMember { group: GroupId, rank: Rank },
    /// Ranks disagree on group membership or contribution sizes.
    #[error("group {0} mismatch between members")]
    GroupMismatch(GroupId),
    /// Atomic access is not 8-byte aligned.
    #[error("atomic access at offset {0} is not 8-byte aligned")]
    Misaligned(u64),
    /// Passive message does not fit the receive buffer.
    #[error("message of {size} bytes exceeds receive buffer of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },
    /// Peer endpoint is gone.
    #[error("peer endpoint disconnected")]
    Disconnected,
}

/// Result type for fabric operations.
pub type Result<T> = std::result::Result<T, Error>;
