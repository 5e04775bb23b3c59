//! The fetch seam of the pipeline.
//!
//! Workers call a [`ShapeFetcher`] for every admitted location. The pipeline
//! makes no assumption about latency beyond "eventually completes" and runs
//! up to `num_workers` calls concurrently. A fetcher is free to fail; the
//! worker drops the result and still releases the location.

use crate::{Error, Location, Result, ShapeData};
use core::{num::NonZeroU64, time::Duration};
use portable_atomic::{AtomicU64, Ordering};

/// Looks up the shape data for a location.
pub trait ShapeFetcher: Send + Sync + 'static {
    /// Returns a future that resolves to the data at `location`.
    ///
    /// # Errors
    ///
    /// Implementations should return [`Error::Fetch`] when no data could be
    /// produced. The pipeline treats every error the same way: the shape is
    /// dropped and the in-flight slot is released.
    fn fetch(&self, location: Location) -> impl Future<Output = Result<ShapeData>> + Send;
}

/// A fetcher that waits a fixed latency and returns the location's
/// coordinates as the payload.
///
/// Optionally fails every `k`-th call, which is handy for exercising the
/// failure path deterministically.
#[derive(Debug)]
pub struct SimulatedFetcher {
    latency: Duration,
    fail_every: Option<NonZeroU64>,
    calls: AtomicU64,
}

impl SimulatedFetcher {
    pub const DEFAULT_LATENCY: Duration = Duration::from_millis(10);

    pub const fn new(latency: Duration) -> Self {
        Self {
            latency,
            fail_every: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Makes every `k`-th call fail after sleeping for the usual latency.
    #[must_use]
    pub const fn with_fail_every(mut self, k: NonZeroU64) -> Self {
        self.fail_every = Some(k);
        self
    }

    pub const fn latency(&self) -> Duration {
        self.latency
    }

    /// Number of fetches started so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Default for SimulatedFetcher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LATENCY)
    }
}

impl ShapeFetcher for SimulatedFetcher {
    async fn fetch(&self, location: Location) -> Result<ShapeData> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        tokio::time::sleep(self.latency).await;

        if let Some(k) = self.fail_every {
            if call % k.get() == 0 {
                return Err(Error::Fetch {
                    location,
                    reason: format!("simulated failure on call {call}"),
                });
            }
        }

        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&location.x.to_le_bytes());
        payload.extend_from_slice(&location.y.to_le_bytes());
        Ok(ShapeData::new(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn waits_for_latency_and_encodes_location() {
        let fetcher = SimulatedFetcher::new(Duration::from_millis(10));
        let start = tokio::time::Instant::now();

        let data = fetcher.fetch(Location::new(1, -1)).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(10));
        assert_eq!(data.as_bytes(), &[1, 0, 0, 0, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_every_kth_call() {
        let fetcher =
            SimulatedFetcher::new(Duration::ZERO).with_fail_every(NonZeroU64::new(2).unwrap());
        let location = Location::new(4, 4);

        assert!(fetcher.fetch(location).await.is_ok());
        let err = fetcher.fetch(location).await.unwrap_err();
        assert!(err.is_fetch_failure());
        assert!(fetcher.fetch(location).await.is_ok());
    }
}
