use crate::{Error, Location, PipelineStats, Result, Shape, ShapeFetcher};
use core::panic::AssertUnwindSafe;
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// The channel ends every worker holds.
///
/// All workers share one multi-consumer `work` receiver, so whichever worker
/// is idle picks up the next location.
#[derive(Clone)]
pub struct WorkerChannels {
    pub work: async_channel::Receiver<Location>,
    pub completions: mpsc::Sender<Location>,
    pub shapes: mpsc::Sender<Shape>,
}

/// Worker task that fetches shapes for locations handed out by the
/// dispatcher.
///
/// For every location received the worker:
/// 1. calls the fetcher;
/// 2. on success, sends the [`Shape`] to the output channel;
/// 3. always sends the location back on the completion channel.
///
/// Step 3 runs on every exit path through a [`CompletionGuard`], so a failed,
/// panicking or cancelled fetch never leaves a location stuck in flight.
///
/// The loop ends when the work channel is closed and empty, or when the
/// shutdown token is cancelled.
pub async fn worker_loop<F: ShapeFetcher>(
    worker_id: usize,
    fetcher: Arc<F>,
    channels: WorkerChannels,
    stats: Arc<PipelineStats>,
    shutdown_token: CancellationToken,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} started");

    loop {
        let location = tokio::select! {
            () = shutdown_token.cancelled() => break,
            received = channels.work.recv() => match received {
                Ok(location) => location,
                // Closed and drained.
                Err(_) => break,
            },
        };

        let guard = CompletionGuard::new(location, &channels.completions);

        let outcome = tokio::select! {
            () = shutdown_token.cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::debug!(%location, "Worker {worker_id} abandoning fetch on shutdown");
                break;
            }
            outcome = process_location(worker_id, fetcher.as_ref(), location, &channels.shapes, &stats) => outcome,
        };

        if let Err(_e) = outcome {
            #[cfg(feature = "tracing")]
            tracing::debug!("Worker {worker_id} dropped shape: {_e}");
        }

        guard.release().await;
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} stopped");
}

/// Fetches one location and emits the resulting shape.
///
/// Any error returned by the fetcher, and any panic inside it, is counted as
/// a fetch failure and logged here; nothing is emitted and `Ok` is returned.
/// The only error this returns is [`Error::ChannelError`] for a closed
/// output channel.
async fn process_location<F: ShapeFetcher>(
    worker_id: usize,
    fetcher: &F,
    location: Location,
    shapes: &mpsc::Sender<Shape>,
    stats: &PipelineStats,
) -> Result<()> {
    let fetched = {
        let _active = stats.track_fetch();
        AssertUnwindSafe(fetcher.fetch(location))
            .catch_unwind()
            .await
    };

    let data = match fetched {
        Ok(Ok(data)) => data,
        Ok(Err(_e)) => {
            stats.record_fetch_failure();
            #[cfg(feature = "tracing")]
            tracing::warn!("Worker {worker_id}: fetch failed for {location}: {_e}");
            return Ok(());
        }
        Err(_panic) => {
            stats.record_fetch_failure();
            #[cfg(feature = "tracing")]
            tracing::warn!("Worker {worker_id}: {}", Error::FetchPanicked { location });
            return Ok(());
        }
    };

    shapes
        .send(Shape::new(location, data))
        .await
        .map_err(|_| Error::ChannelError {
            context: format!("Worker {worker_id} output channel closed"),
        })?;
    stats.record_shape_emitted();

    Ok(())
}

/// Sends the completion signal for one location exactly once.
///
/// The normal path calls [`CompletionGuard::release`], which waits for room
/// on the completion channel. If the guard is dropped without being released
/// (the fetch unwound, or the worker was cancelled mid-flight), `Drop` makes a
/// best-effort send instead: immediately if there is room, otherwise from a
/// spawned task on the current runtime.
pub(crate) struct CompletionGuard<'a> {
    location: Option<Location>,
    completions: &'a mpsc::Sender<Location>,
}

impl<'a> CompletionGuard<'a> {
    pub(crate) const fn new(location: Location, completions: &'a mpsc::Sender<Location>) -> Self {
        Self {
            location: Some(location),
            completions,
        }
    }

    pub(crate) async fn release(mut self) {
        let Some(location) = self.location else {
            return;
        };

        // Only disarm once the send has landed; if this future is dropped
        // mid-send, `Drop` still fires with the location.
        if let Err(_e) = self.completions.send(location).await {
            #[cfg(feature = "tracing")]
            tracing::debug!(%location, "Completion channel closed: {_e}");
        }
        self.location = None;
    }
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        let Some(location) = self.location.take() else {
            return;
        };

        match self.completions.try_send(location) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(location)) => {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let completions = self.completions.clone();
                    handle.spawn(async move {
                        let _ = completions.send(location).await;
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ShapeData, SimulatedFetcher};
    use core::time::Duration;

    /// Fails on negative x, panics on negative y, succeeds otherwise.
    struct PickyFetcher;

    impl ShapeFetcher for PickyFetcher {
        async fn fetch(&self, location: Location) -> Result<ShapeData> {
            if location.y < 0 {
                panic!("boom at {location}");
            }
            if location.x < 0 {
                return Err(Error::Fetch {
                    location,
                    reason: "negative x".to_string(),
                });
            }
            Ok(ShapeData::default())
        }
    }

    struct Rig {
        work: async_channel::Sender<Location>,
        completions: mpsc::Receiver<Location>,
        shapes: mpsc::Receiver<Shape>,
        stats: Arc<PipelineStats>,
        token: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn_worker<F: ShapeFetcher>(fetcher: F) -> Rig {
        let (work_tx, work_rx) = async_channel::bounded(1);
        let (done_tx, done_rx) = mpsc::channel(4);
        let (shape_tx, shape_rx) = mpsc::channel(4);
        let stats = Arc::new(PipelineStats::new());
        let token = CancellationToken::new();

        let channels = WorkerChannels {
            work: work_rx,
            completions: done_tx,
            shapes: shape_tx,
        };
        let task = tokio::spawn(worker_loop(
            0,
            Arc::new(fetcher),
            channels,
            Arc::clone(&stats),
            token.clone(),
        ));

        Rig {
            work: work_tx,
            completions: done_rx,
            shapes: shape_rx,
            stats,
            token,
            task,
        }
    }

    #[tokio::test]
    async fn emits_shape_then_completion() {
        let mut rig = spawn_worker(PickyFetcher);
        let a = Location::new(1, 2);

        rig.work.send(a).await.unwrap();

        assert_eq!(rig.shapes.recv().await.unwrap().location(), a);
        assert_eq!(rig.completions.recv().await.unwrap(), a);
        assert_eq!(rig.stats.shapes_emitted(), 1);

        drop(rig.work);
        rig.task.await.unwrap();
    }

    #[tokio::test]
    async fn releases_failed_and_panicking_fetches() {
        let mut rig = spawn_worker(PickyFetcher);
        let failing = Location::new(-1, 0);
        let panicking = Location::new(0, -1);
        let ok = Location::new(7, 7);

        rig.work.send(failing).await.unwrap();
        rig.work.send(panicking).await.unwrap();
        rig.work.send(ok).await.unwrap();

        assert_eq!(rig.completions.recv().await.unwrap(), failing);
        assert_eq!(rig.completions.recv().await.unwrap(), panicking);
        assert_eq!(rig.shapes.recv().await.unwrap().location(), ok);
        assert_eq!(rig.completions.recv().await.unwrap(), ok);

        assert_eq!(rig.stats.fetch_failures(), 2);
        assert_eq!(rig.stats.shapes_emitted(), 1);
        assert_eq!(rig.stats.active_fetches(), 0);

        drop(rig.work);
        rig.task.await.unwrap();
    }

    /// Fails with an error that is not `Error::Fetch`.
    struct UpstreamDownFetcher;

    impl ShapeFetcher for UpstreamDownFetcher {
        async fn fetch(&self, _location: Location) -> Result<ShapeData> {
            Err(Error::ChannelError {
                context: "upstream connection reset".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn counts_any_fetcher_error_as_a_fetch_failure() {
        let mut rig = spawn_worker(UpstreamDownFetcher);
        let a = Location::new(3, 3);

        rig.work.send(a).await.unwrap();
        assert_eq!(rig.completions.recv().await.unwrap(), a);

        drop(rig.work);
        rig.task.await.unwrap();

        assert!(rig.shapes.recv().await.is_none());
        assert_eq!(rig.stats.fetch_failures(), 1);
        assert_eq!(rig.stats.shapes_emitted(), 0);
    }

    #[tokio::test]
    async fn closed_output_is_not_a_fetch_failure() {
        let mut rig = spawn_worker(PickyFetcher);
        let a = Location::new(2, 2);
        rig.shapes.close();

        rig.work.send(a).await.unwrap();
        assert_eq!(rig.completions.recv().await.unwrap(), a);

        assert_eq!(rig.stats.fetch_failures(), 0);
        assert_eq!(rig.stats.shapes_emitted(), 0);

        drop(rig.work);
        rig.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_still_releases_in_flight_location() {
        let mut rig = spawn_worker(SimulatedFetcher::new(Duration::from_secs(60)));
        let a = Location::new(8, 8);

        rig.work.send(a).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(rig.stats.active_fetches(), 1);

        rig.token.cancel();
        rig.task.await.unwrap();

        assert_eq!(rig.completions.recv().await.unwrap(), a);
        assert_eq!(rig.stats.active_fetches(), 0);
        assert!(rig.shapes.try_recv().is_err());
    }

    #[tokio::test]
    async fn guard_sends_on_drop() {
        let (tx, mut rx) = mpsc::channel(1);
        let a = Location::new(1, 1);

        drop(CompletionGuard::new(a, &tx));
        assert_eq!(rx.recv().await.unwrap(), a);

        CompletionGuard::new(a, &tx).release().await;
        assert_eq!(rx.recv().await.unwrap(), a);
        assert!(rx.try_recv().is_err());
    }
}
