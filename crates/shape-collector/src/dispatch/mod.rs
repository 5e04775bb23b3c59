//! Admission control for the worker pool.
//!
//! - [`dispatcher`] - the single-writer loop that owns the in-flight set and
//!   decides which locations reach a worker.

pub mod dispatcher;

pub use dispatcher::Dispatcher;
