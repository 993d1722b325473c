//! Configuration types for the fabric.

use crate::error::{Error, Result};

/// Fabric configuration.
///
/// Bounds the identifier spaces every endpoint of a world shares.
#[derive(Debug, Clone)]
pub struct FabricConfig {
    /// Number of segment ids per rank.
    /// Default: 256
    pub segment_max: usize,
    /// Number of notification slots per segment.
    /// Default: 65536
    pub notification_num: u32,
    /// Number of asynchronous queues per endpoint.
    /// Default: 8
    pub queue_num: usize,
    /// Maximum number of outstanding operations per queue.
    /// Default: 1024
    pub queue_size_max: usize,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            segment_max: 256,
            notification_num: 65536,
            queue_num: 8,
            queue_size_max: 1024,
        }
    }
}

impl FabricConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of segment ids per rank.
    pub fn with_segment_max(mut self, segment_max: usize) -> Self {
        self.segment_max = segment_max;
        self
    }

    /// Set the number of notification slots per segment.
    pub fn with_notification_num(mut self, notification_num: u32) -> Self {
        self.notification_num = notification_num;
        self
    }

    /// Set the number of queues per endpoint.
    pub fn with_queue_num(mut self, queue_num: usize) -> Self {
        self.queue_num = queue_num;
        self
    }

    /// Set the maximum number of outstanding operations per queue.
    pub fn with_queue_size_max(mut self, queue_size_max: usize) -> Self {
        self.queue_size_max = queue_size_max;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.segment_max == 0 || self.segment_max > usize::from(u8::MAX) + 1 {
            return Err(Error::InvalidConfig(format!(
                "segment_max must be in 1..=256, got {}",
                self.segment_max
            )));
        }
        if self.queue_num == 0 || self.queue_num > usize::from(u8::MAX) + 1 {
            return Err(Error::InvalidConfig(format!(
                "queue_num must be in 1..=256, got {}",
                self.queue_num
            )));
        }
        if self.notification_num == 0 {
            return Err(Error::InvalidConfig(
                "notification_num must be non-zero".into(),
            ));
        }
        if self.queue_size_max == 0 {
            return Err(Error::InvalidConfig(
                "queue_size_max must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
