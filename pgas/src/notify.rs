//! Notification protocol shared by handles and collectives.

use fabric::{NotificationId, SegmentId, Timeout};

use crate::error::{Error, Result};
use crate::runtime::Runtime;

/// Position of a unit in the binomial broadcast tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TreeNode {
    pub(crate) parent: Option<usize>,
    /// Largest subtree first.
    pub(crate) children: Vec<usize>,
}

/// Binomial spanning tree over `size` team units rooted at `root`.
pub(crate) fn binomial_tree(rank: usize, root: usize, size: usize) -> TreeNode {
    let rel = (rank + size - root) % size;
    let mut parent = None;
    let mut mask = 1;
    while mask < size {
        if rel & mask != 0 {
            parent = Some((rel - mask + root) % size);
            break;
        }
        mask <<= 1;
    }
    let mut children = Vec::new();
    mask >>= 1;
    while mask > 0 {
        if rel + mask < size {
            children.push((rel + mask + root) % size);
        }
        mask >>= 1;
    }
    TreeNode { parent, children }
}

/// Notification id a gather sender uses at the root.
///
/// Ids of the `size - 1` senders are contiguous in `[0, size - 1)`.
pub(crate) fn gather_slot(rank: usize, root: usize) -> NotificationId {
    if rank < root {
        rank as NotificationId
    } else {
        (rank - 1) as NotificationId
    }
}

impl Runtime {
    /// Consume `count` notifications in `[begin, begin + num)` of `segment`.
    ///
    /// Every consumed value must be the sentinel. A notification at `own`
    /// cannot be sent by a peer; it is logged and skipped without counting.
    pub(crate) fn wait_notifications(
        &self,
        segment: SegmentId,
        begin: NotificationId,
        num: u32,
        count: usize,
        own: Option<NotificationId>,
    ) -> Result<()> {
        let mut left = count;
        while left > 0 {
            let Some(id) = self
                .endpoint
                .notify_waitsome(segment, begin, num, Timeout::Block)?
            else {
                return Err(Error::Protocol(format!(
                    "no notification in [{begin}, {}) of segment {segment}",
                    u64::from(begin) + u64::from(num)
                )));
            };
            let value = self.endpoint.notify_reset(segment, id)?;
            if Some(id) == own {
                tracing::error!(id, segment, "notification from self, skipped");
                continue;
            }
            if value != self.config.notify_value {
                tracing::error!(id, value, segment, "unexpected notification value");
                return Err(Error::Protocol(format!(
                    "notification {id} of segment {segment} carried {value}, expected {}",
                    self.config.notify_value
                )));
            }
            left -= 1;
        }
        Ok(())
    }
}
