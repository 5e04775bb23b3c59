//! Fixed-size pool of fetch workers.
//!
//! This module defines the [`WorkerPool`] struct, which spawns `N` workers
//! that all pull from the same distribution channel. There is no per-worker
//! queue and no round-robin: an idle worker takes the next location, so at
//! most `N` fetches run at any time regardless of how bursty the input is.
//!
//! Workers share a [`CancellationToken`] with the dispatcher. Cancelling it
//! stops every worker at its next suspension point.

use super::worker::{WorkerChannels, worker_loop};
use crate::{Error, PipelineStats, Result, ShapeFetcher};
use core::time::Duration;
use std::sync::Arc;
use tokio::{task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;

pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown_token: CancellationToken,
}

impl WorkerPool {
    /// Spawns `num_workers` worker tasks on the current Tokio runtime.
    ///
    /// Every worker receives a clone of `channels`; the pool itself keeps no
    /// channel ends, so once the workers exit the output channel closes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `num_workers` is zero.
    pub fn spawn<F: ShapeFetcher>(
        num_workers: usize,
        fetcher: Arc<F>,
        channels: WorkerChannels,
        stats: Arc<PipelineStats>,
        shutdown_token: CancellationToken,
    ) -> Result<Self> {
        if num_workers == 0 {
            return Err(Error::InvalidConfig {
                reason: "num_workers must be greater than 0".to_string(),
            });
        }

        let workers = (0..num_workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&fetcher),
                    channels.clone(),
                    Arc::clone(&stats),
                    shutdown_token.clone(),
                ))
            })
            .collect();

        #[cfg(feature = "tracing")]
        tracing::debug!("Spawned {num_workers} workers");

        Ok(Self {
            workers,
            shutdown_token,
        })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Returns `true` once every worker task has exited.
    pub fn is_finished(&self) -> bool {
        self.workers.iter().all(JoinHandle::is_finished)
    }

    /// Cancels the shared token. Workers stop at their next suspension point
    /// and abandon any fetch in progress.
    pub fn cancel(&self) {
        self.shutdown_token.cancel();
    }

    /// Waits for every worker to exit, giving each one up to `per_worker`.
    ///
    /// Workers that are still running when their window elapses are aborted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownTimeout`] with the number of aborted workers.
    pub async fn join(self, per_worker: Duration) -> Result<()> {
        let waits = self.workers.into_iter().enumerate().map(|(_i, handle)| {
            let abort = handle.abort_handle();
            async move {
                match timeout(per_worker, handle).await {
                    Ok(Ok(())) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!("Worker {_i} stopped");
                        false
                    }
                    Ok(Err(_e)) => {
                        #[cfg(feature = "tracing")]
                        tracing::error!("Worker {_i} failed: {_e}");
                        false
                    }
                    Err(_) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Worker {_i} shutdown timed out, aborting");
                        abort.abort();
                        true
                    }
                }
            }
        });

        let remaining = futures::future::join_all(waits)
            .await
            .into_iter()
            .filter(|timed_out| *timed_out)
            .count();

        if remaining > 0 {
            return Err(Error::ShutdownTimeout { remaining });
        }

        Ok(())
    }

    /// Cancels the pool and waits for the workers to stop.
    ///
    /// # Errors
    ///
    /// See [`WorkerPool::join`].
    pub async fn shutdown(self, per_worker: Duration) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::debug!("Notifying {} workers to shut down", self.workers.len());
        self.cancel();
        self.join(per_worker).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Location, SimulatedFetcher};
    use tokio::sync::mpsc;

    fn channels() -> (
        async_channel::Sender<Location>,
        mpsc::Receiver<Location>,
        WorkerChannels,
    ) {
        let (work_tx, work_rx) = async_channel::bounded(1);
        let (done_tx, done_rx) = mpsc::channel(8);
        // The shape receiver is dropped; these tests only watch completions.
        let (shape_tx, _) = mpsc::channel(8);
        (
            work_tx,
            done_rx,
            WorkerChannels {
                work: work_rx,
                completions: done_tx,
                shapes: shape_tx,
            },
        )
    }

    #[tokio::test]
    async fn rejects_empty_pool() {
        let (_work, _done, channels) = channels();
        let result = WorkerPool::spawn(
            0,
            Arc::new(SimulatedFetcher::default()),
            channels,
            Arc::new(PipelineStats::new()),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_worker_count() {
        let (work, mut done, channels) = channels();
        let stats = Arc::new(PipelineStats::new());
        let pool = WorkerPool::spawn(
            3,
            Arc::new(SimulatedFetcher::new(Duration::from_millis(10))),
            channels,
            Arc::clone(&stats),
            CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(pool.len(), 3);

        let feeder = tokio::spawn(async move {
            for i in 0..20 {
                work.send(Location::new(i, i)).await.unwrap();
            }
        });

        for _ in 0..20 {
            done.recv().await.unwrap();
        }
        feeder.await.unwrap();

        assert_eq!(stats.peak_active_fetches(), 3);
        pool.join(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_busy_workers() {
        let (work, _done, channels) = channels();
        let pool = WorkerPool::spawn(
            2,
            Arc::new(SimulatedFetcher::new(Duration::from_secs(3600))),
            channels,
            Arc::new(PipelineStats::new()),
            CancellationToken::new(),
        )
        .unwrap();

        work.send(Location::new(1, 1)).await.unwrap();
        work.send(Location::new(2, 2)).await.unwrap();

        pool.shutdown(Duration::from_secs(1)).await.unwrap();
    }
}
