//! Configuration types for the runtime.

use fabric::FabricConfig;

use crate::error::{Error, Result};
use crate::segment::FIRST_POOL_SEG;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Size of each unit's local-allocation window in bytes.
    /// Default: 16 MiB
    pub local_alloc_size: usize,
    /// Number of transient segment ids in the segment pool.
    /// Default: 64
    pub pool_size: usize,
    /// Queue used by every collective.
    /// Default: 0
    pub collective_queue: u8,
    /// Sentinel value posted with every protocol notification. Must be non-zero.
    /// Default: 42
    pub notify_value: u32,
    /// Pin each unit thread started by [`launch`](crate::launch) to its own core.
    /// Default: false
    pub pin_threads: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_alloc_size: 16 * 1024 * 1024,
            pool_size: 64,
            collective_queue: 0,
            notify_value: 42,
            pin_threads: false,
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the local-allocation window size.
    pub fn with_local_alloc_size(mut self, size: usize) -> Self {
        self.local_alloc_size = size;
        self
    }

    /// Set the number of pool segments.
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the collective queue.
    pub fn with_collective_queue(mut self, queue: u8) -> Self {
        self.collective_queue = queue;
        self
    }

    /// Set the notification sentinel.
    pub fn with_notify_value(mut self, value: u32) -> Self {
        self.notify_value = value;
        self
    }

    /// Enable or disable thread pinning.
    pub fn with_pin_threads(mut self, pin: bool) -> Self {
        self.pin_threads = pin;
        self
    }

    pub(crate) fn validate(&self, fabric: &FabricConfig) -> Result<()> {
        let first = usize::from(FIRST_POOL_SEG);
        if first + self.pool_size > fabric.segment_max {
            return Err(Error::invalid(format!(
                "pool of {} segments does not fit {} fabric segment ids",
                self.pool_size, fabric.segment_max
            )));
        }
        if usize::from(self.collective_queue) >= fabric.queue_num {
            return Err(Error::invalid(format!(
                "collective queue {} out of {} queues",
                self.collective_queue, fabric.queue_num
            )));
        }
        if self.notify_value == 0 {
            return Err(Error::invalid("notify_value must be non-zero"));
        }
        Ok(())
    }
}
