//! Configuration for a [`ShapeCollector`](crate::ShapeCollector).
//!
//! These values control how many workers are spawned and how much slack each
//! internal channel has. Small buffers keep back-pressure tight: a slow
//! consumer stalls the workers, which stalls forwarding, which stalls the
//! producer.
//!
//! ## Channels
//! - **inbound**: producer → dispatcher.
//! - **distribution**: dispatcher → workers. `1` is the closest to a
//!   rendezvous hand-off the channel supports.
//! - **completion**: workers → dispatcher. Sized to the worker count so a
//!   finishing worker never waits on the dispatcher.
//! - **output**: workers → consumer.

use crate::{Error, Result};
use core::time::Duration;

/// Number of workers used when nothing else is configured.
pub const DEFAULT_NUM_WORKERS: usize = 4;

/// Default capacity of the producer → dispatcher channel.
pub const DEFAULT_INBOUND_BUFFER_SIZE: usize = 1;

/// Default capacity of the dispatcher → worker channel.
pub const DEFAULT_DISTRIBUTION_BUFFER_SIZE: usize = 1;

/// Default capacity of the worker → consumer channel.
pub const DEFAULT_OUTPUT_BUFFER_SIZE: usize = 1;

/// Default time allowed for tasks to stop after cancellation.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Number of concurrent fetch workers. Fixed for the pipeline's lifetime.
    pub num_workers: usize,
    pub inbound_buffer_size: usize,
    pub distribution_buffer_size: usize,
    /// Must be at least 1 so a completion signal never blocks on the
    /// dispatcher being ready to receive it.
    pub completion_buffer_size: usize,
    pub output_buffer_size: usize,
    /// Upper bound on how long [`CollectorHandle::shutdown`] waits for tasks.
    ///
    /// [`CollectorHandle::shutdown`]: crate::CollectorHandle::shutdown
    pub shutdown_timeout: Duration,
}

impl CollectorConfig {
    /// Creates a configuration with `num_workers` workers and default buffer
    /// sizes. The completion buffer is sized to the worker count.
    pub const fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            inbound_buffer_size: DEFAULT_INBOUND_BUFFER_SIZE,
            distribution_buffer_size: DEFAULT_DISTRIBUTION_BUFFER_SIZE,
            completion_buffer_size: if num_workers == 0 { 1 } else { num_workers },
            output_buffer_size: DEFAULT_OUTPUT_BUFFER_SIZE,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_inbound_buffer_size(mut self, size: usize) -> Self {
        self.inbound_buffer_size = size;
        self
    }

    #[must_use]
    pub const fn with_distribution_buffer_size(mut self, size: usize) -> Self {
        self.distribution_buffer_size = size;
        self
    }

    #[must_use]
    pub const fn with_completion_buffer_size(mut self, size: usize) -> Self {
        self.completion_buffer_size = size;
        self
    }

    #[must_use]
    pub const fn with_output_buffer_size(mut self, size: usize) -> Self {
        self.output_buffer_size = size;
        self
    }

    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the worker count or any buffer size
    /// is zero.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("num_workers", self.num_workers),
            ("inbound_buffer_size", self.inbound_buffer_size),
            ("distribution_buffer_size", self.distribution_buffer_size),
            ("completion_buffer_size", self.completion_buffer_size),
            ("output_buffer_size", self.output_buffer_size),
        ];

        for (name, value) in checks {
            if value == 0 {
                return Err(Error::InvalidConfig {
                    reason: format!("{name} must be greater than 0"),
                });
            }
        }

        Ok(())
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self::new(DEFAULT_NUM_WORKERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_buffer_tracks_worker_count() {
        assert_eq!(CollectorConfig::new(8).completion_buffer_size, 8);
        assert_eq!(CollectorConfig::default().num_workers, DEFAULT_NUM_WORKERS);
        assert!(CollectorConfig::new(1).validate().is_ok());
    }

    #[test]
    fn rejects_zero_values() {
        let err = CollectorConfig::new(0).validate().unwrap_err();
        assert_eq!(
            err,
            Error::InvalidConfig {
                reason: "num_workers must be greater than 0".to_string()
            }
        );

        let err = CollectorConfig::new(2)
            .with_completion_buffer_size(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { reason } if reason.starts_with("completion")));
    }
}
