//! Shared types and error definitions used across the pipeline.
//!
//! ## Submodules
//!
//! - [`error`] - Centralized error type used by fetchers, the dispatcher and
//!   the worker pool.
//! - [`types`] - The [`Location`], [`ShapeData`] and [`Shape`] values that flow
//!   through the channels.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Location, Shape, ShapeData};
