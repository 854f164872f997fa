use std::time::Duration;

use crate::error::DirectoryError;

/// A peer must be able to miss this many sweep periods before it is reclaimed.
pub const MIN_MISSED_INTERVALS: u32 = 3;

/// Tunables for [`DirectoryService`](crate::DirectoryService).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryConfig {
    /// How often the liveness sweep runs.
    pub sweep_interval: Duration,
    /// Peers silent for longer than this are reclaimed.
    pub liveness_timeout: Duration,
    /// Peers seen within this window are reported online by `/peers`.
    pub online_window: Duration,
    /// Capacity of the mutation command queue.
    pub queue_capacity: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            liveness_timeout: Duration::from_secs(300),
            online_window: Duration::from_secs(300),
            queue_capacity: 100,
        }
    }
}

impl DirectoryConfig {
    pub fn validate(&self) -> Result<(), DirectoryError> {
        if self.sweep_interval.is_zero() {
            return Err(DirectoryError::InvalidConfig(
                "sweep interval must be non-zero".into(),
            ));
        }
        if self.liveness_timeout < self.sweep_interval * MIN_MISSED_INTERVALS {
            return Err(DirectoryError::InvalidConfig(format!(
                "liveness timeout ({:?}) must be at least {} sweep intervals ({:?})",
                self.liveness_timeout, MIN_MISSED_INTERVALS, self.sweep_interval
            )));
        }
        if self.queue_capacity == 0 {
            return Err(DirectoryError::InvalidConfig(
                "command queue capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
