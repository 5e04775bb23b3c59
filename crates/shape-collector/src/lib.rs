#![doc = include_str!("../README.md")]

mod collector;
mod common;
mod config;
mod dispatch;
mod fetcher;
mod pool;
mod stats;

pub use collector::{CollectorHandle, Pipeline, ShapeCollector};
pub use common::*;
pub use config::*;
pub use dispatch::Dispatcher;
pub use fetcher::{ShapeFetcher, SimulatedFetcher};
pub use pool::{WorkerChannels, WorkerPool};
pub use stats::{PipelineStats, StatsSnapshot};
