use crate::telemetry;
use shape_collector::Shape;
use tokio::sync::mpsc;

/// Reads shapes until the pipeline closes the stream and returns how many
/// arrived.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub async fn consume_shapes(mut shapes: mpsc::Receiver<Shape>) -> u64 {
    let mut received = 0;
    while let Some(_shape) = shapes.recv().await {
        #[cfg(feature = "tracing")]
        tracing::trace!(
            "Shape for {} ({} bytes)",
            _shape.location(),
            _shape.data().len()
        );
        received += 1;
        telemetry::increment_shapes_received();
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Received {received} shapes");
    received
}

#[cfg(test)]
mod tests {
    use super::*;
    use shape_collector::{Location, ShapeData};

    #[tokio::test]
    async fn counts_until_the_stream_closes() {
        let (tx, rx) = mpsc::channel(4);
        let consumer = tokio::spawn(consume_shapes(rx));

        for i in 0..10 {
            let shape = Shape::new(Location::new(i, i), ShapeData::new(vec![0u8; 4]));
            tx.send(shape).await.unwrap();
        }
        drop(tx);

        assert_eq!(consumer.await.unwrap(), 10);
    }
}
