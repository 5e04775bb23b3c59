//! Demo endpoints of the pipeline: a timed random location producer and a
//! counting shape consumer.

mod consumer;
mod producer;

pub use consumer::consume_shapes;
pub use producer::send_locations;
