use crate::{config::FeedConfig, telemetry};
use rand::{Rng, SeedableRng, rngs::StdRng};
use shape_collector::Location;
use tokio::{sync::mpsc, time::timeout};

/// Sends random locations until `config.duration` elapses or the pipeline
/// stops accepting them, then drops `locations` so the pipeline can drain.
///
/// Returns the number of locations handed to the pipeline.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(duration = ?config.duration, range = ?config.range)))]
pub async fn send_locations(locations: mpsc::Sender<Location>, config: FeedConfig) -> u64 {
    let mut rng = StdRng::from_rng(&mut rand::rng());
    let mut sent = 0;

    let feed = async {
        loop {
            let location = random_location(&mut rng, config.range);
            if locations.send(location).await.is_err() {
                #[cfg(feature = "tracing")]
                tracing::debug!("Pipeline closed, stopping feed");
                break;
            }
            sent += 1;
            telemetry::increment_locations_sent();
        }
    };

    if timeout(config.duration, feed).await.is_err() {
        #[cfg(feature = "tracing")]
        tracing::info!("Feed finished after {:?}", config.duration);
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Sent {sent} locations");
    sent
}

fn random_location(rng: &mut impl Rng, range: Option<i32>) -> Location {
    match range {
        Some(r) => Location::new(rng.random_range(-r..=r), rng.random_range(-r..=r)),
        None => Location::new(rng.random(), rng.random()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use tokio::time::{Instant, sleep};

    #[tokio::test(start_paused = true)]
    async fn stops_after_duration_and_closes_the_channel() {
        let (tx, mut rx) = mpsc::channel(1);
        let config = FeedConfig {
            duration: Duration::from_millis(100),
            range: Some(3),
        };
        let start = Instant::now();
        let feed = tokio::spawn(send_locations(tx, config));

        let mut received = 0;
        while let Some(location) = rx.recv().await {
            assert!((-3..=3).contains(&location.x), "{location}");
            assert!((-3..=3).contains(&location.y), "{location}");
            received += 1;
            sleep(Duration::from_millis(1)).await;
        }

        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(received > 0);
        assert_eq!(feed.await.unwrap(), received);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_the_pipeline_goes_away() {
        let (tx, mut rx) = mpsc::channel(1);
        let config = FeedConfig {
            duration: Duration::from_secs(3600),
            range: None,
        };
        let feed = tokio::spawn(send_locations(tx, config));

        for _ in 0..3 {
            rx.recv().await.unwrap();
        }
        drop(rx);

        let sent = feed.await.unwrap();
        assert!((3..=4).contains(&sent), "{sent}");
    }

    #[test]
    fn zero_range_pins_the_origin() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..16 {
            assert_eq!(random_location(&mut rng, Some(0)), Location::new(0, 0));
        }
    }
}
