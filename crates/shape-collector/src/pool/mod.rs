//! Fixed-size pool of fetch workers.
//!
//! - [`manager`] - spawns the workers and waits for them on shutdown.
//! - [`worker`] - the per-task loop and the completion guard.

pub mod manager;
pub mod worker;

pub use manager::WorkerPool;
pub use worker::WorkerChannels;
