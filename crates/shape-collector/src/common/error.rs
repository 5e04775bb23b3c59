//! Error types for the shape collector.
//!
//! This module defines the central `Error` enum. Only two variants describe
//! what happens to a single location (`Fetch` and `FetchPanicked`); the worker
//! pool counts and drops both without surfacing them to the consumer. The
//! rest describe the lifecycle of the pipeline itself.
//!
//! ## Error Cases
//! - `Fetch`: a fetcher could not produce data for a location.
//! - `FetchPanicked`: a fetcher panicked while processing a location.
//! - `ChannelError`: an internal channel was closed unexpectedly.
//! - `InvalidConfig`: a configuration value is out of range.
//! - `ServiceShutdown`: the pipeline was cancelled instead of drained.
//! - `NoRuntime`: the pipeline was started outside a Tokio runtime.
//! - `ShutdownTimeout`: tasks did not stop within the shutdown window.

use crate::Location;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the shape collector.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The fetcher did not yield shape data.
    #[error("Fetch failed for {location}: {reason}")]
    Fetch { location: Location, reason: String },

    /// The fetcher panicked.
    #[error("Fetch panicked for {location}")]
    FetchPanicked { location: Location },

    /// Internal channel send/receive failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// A configuration value was rejected.
    #[error("Invalid config: {reason}")]
    InvalidConfig { reason: String },

    /// The pipeline is shutting down.
    #[error("Collector is shutting down")]
    ServiceShutdown,

    /// Tasks cannot be spawned without a Tokio runtime.
    #[error("No Tokio runtime available: {context}")]
    NoRuntime { context: String },

    /// Some tasks were still running when the shutdown window elapsed.
    #[error("Shutdown timed out with {remaining} task(s) still running")]
    ShutdownTimeout { remaining: usize },
}

impl Error {
    /// Returns `true` for errors that concern a single fetch rather than the
    /// pipeline.
    pub const fn is_fetch_failure(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::FetchPanicked { .. })
    }
}
