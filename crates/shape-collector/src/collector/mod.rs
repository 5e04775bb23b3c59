//! Composition root for the shape pipeline.
//!
//! [`ShapeCollector`] wires a [`Dispatcher`] and a [`WorkerPool`] together:
//!
//! ```text
//!  producer ──locations──► Dispatcher ──work──► Worker × N ──shapes──► consumer
//!                              ▲                    │
//!                              └────completions─────┘
//! ```
//!
//! The caller gets a [`Pipeline`]: a sender for locations, a receiver for
//! shapes and a [`CollectorHandle`] to observe and stop the tasks.
//!
//! ## Shutdown
//!
//! - **Drain**: drop every location sender. The dispatcher stops admitting,
//!   waits for all in-flight fetches to complete, then closes the work
//!   channel; workers exit and the shape receiver yields `None` once every
//!   produced shape has been read. [`CollectorHandle::join`] waits for this.
//! - **Abort**: [`CollectorHandle::shutdown`] (or [`CollectorHandle::cancel`],
//!   or dropping the handle) cancels the shared token. In-flight fetches are
//!   abandoned and nothing more is emitted.

use crate::{
    CollectorConfig, Dispatcher, Error, Location, PipelineStats, Result, Shape, ShapeFetcher,
    WorkerChannels, WorkerPool,
};
use core::time::Duration;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tokio_util::sync::{CancellationToken, DropGuard};


/// Builds and starts a shape pipeline.
pub struct ShapeCollector<F> {
    config: CollectorConfig,
    fetcher: Arc<F>,
}

/// A running pipeline.
pub struct Pipeline {
    /// Feed locations in. Dropping every clone starts a graceful drain.
    pub locations: mpsc::Sender<Location>,
    /// Completed shapes, in completion order.
    pub shapes: mpsc::Receiver<Shape>,
    pub handle: CollectorHandle,
}

/// Control handle for the dispatcher and worker tasks.
///
/// Dropping the handle cancels the pipeline.
pub struct CollectorHandle {
    dispatcher: JoinHandle<()>,
    workers: WorkerPool,
    stats: Arc<PipelineStats>,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
    _cancel_on_drop: DropGuard,
}

impl<F: ShapeFetcher> ShapeCollector<F> {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new(config: CollectorConfig, fetcher: F) -> Result<Self> {
        Self::new_shared(config, Arc::new(fetcher))
    }

    /// Like [`ShapeCollector::new`], for a fetcher the caller keeps a handle
    /// to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new_shared(config: CollectorConfig, fetcher: Arc<F>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, fetcher })
    }

    pub const fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Creates the inbound and output channels and starts the pipeline.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`ShapeCollector::start_with`], including
    /// [`Error::NoRuntime`] when called outside a Tokio runtime.
    pub fn start(self) -> Result<Pipeline> {
        let (locations, inbound) = mpsc::channel(self.config.inbound_buffer_size);
        let (output, shapes) = mpsc::channel(self.config.output_buffer_size);
        let handle = self.start_with(inbound, output)?;

        Ok(Pipeline {
            locations,
            shapes,
            handle,
        })
    }

    /// Starts the pipeline on caller-owned inbound and output channels.
    ///
    /// Spawns `num_workers` workers bound to (work, completions, `output`)
    /// and one dispatcher bound to (`inbound`, work, completions).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] when called outside a Tokio runtime, or
    /// [`Error::InvalidConfig`] if the worker pool cannot be built.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(num_workers = self.config.num_workers)))]
    pub fn start_with(
        self,
        inbound: mpsc::Receiver<Location>,
        output: mpsc::Sender<Shape>,
    ) -> Result<CollectorHandle> {
        tokio::runtime::Handle::try_current().map_err(|e| Error::NoRuntime {
            context: e.to_string(),
        })?;

        let stats = Arc::new(PipelineStats::new());
        let shutdown_token = CancellationToken::new();

        let (work_tx, work_rx) = async_channel::bounded(self.config.distribution_buffer_size);
        let (done_tx, done_rx) = mpsc::channel(self.config.completion_buffer_size);

        let workers = WorkerPool::spawn(
            self.config.num_workers,
            self.fetcher,
            WorkerChannels {
                work: work_rx,
                completions: done_tx,
                shapes: output,
            },
            Arc::clone(&stats),
            shutdown_token.clone(),
        )?;

        let dispatcher = Dispatcher::new(Arc::clone(&stats), shutdown_token.clone());
        let dispatcher = tokio::spawn(dispatcher.run(inbound, work_tx, done_rx));

        #[cfg(feature = "tracing")]
        tracing::info!("Shape collector started");

        Ok(CollectorHandle {
            dispatcher,
            workers,
            stats,
            _cancel_on_drop: shutdown_token.clone().drop_guard(),
            shutdown_token,
            shutdown_timeout: self.config.shutdown_timeout,
        })
    }
}

impl CollectorHandle {
    pub const fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// A clone of the token shared by the dispatcher and the workers.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Cancels the pipeline without waiting for the tasks to stop.
    pub fn cancel(&self) {
        self.shutdown_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Returns `true` once the dispatcher and every worker have exited.
    pub fn is_finished(&self) -> bool {
        self.dispatcher.is_finished() && self.workers.is_finished()
    }

    /// Waits for the pipeline to finish on its own.
    ///
    /// This only returns after every location sender has been dropped and the
    /// in-flight set has drained, or after the pipeline was cancelled from
    /// elsewhere through [`CollectorHandle::shutdown_token`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelError`] if the dispatcher task panicked,
    /// [`Error::ShutdownTimeout`] if workers linger past the shutdown window
    /// after the dispatcher has finished, or [`Error::ServiceShutdown`] if the
    /// pipeline was cancelled instead of drained.
    pub async fn join(self) -> Result<()> {
        let Self {
            dispatcher,
            workers,
            shutdown_token,
            shutdown_timeout,
            _cancel_on_drop,
            ..
        } = self;

        dispatcher.await.map_err(|e| Error::ChannelError {
            context: format!("Dispatcher task failed: {e}"),
        })?;
        workers.join(shutdown_timeout).await?;

        if shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Shape collector drained");
        Ok(())
    }

    /// Cancels the pipeline and waits, up to the configured shutdown timeout
    /// per task, for the dispatcher and workers to stop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownTimeout`] with the number of tasks that had to
    /// be aborted.
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            dispatcher,
            workers,
            shutdown_token,
            shutdown_timeout,
            _cancel_on_drop,
            ..
        } = self;

        #[cfg(feature = "tracing")]
        tracing::info!("Shutting down shape collector");
        shutdown_token.cancel();

        let mut remaining = 0;
        let abort = dispatcher.abort_handle();
        match timeout(shutdown_timeout, dispatcher).await {
            Ok(Ok(())) => {}
            Ok(Err(_e)) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Dispatcher failed: {_e}");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Dispatcher shutdown timed out, aborting");
                abort.abort();
                remaining += 1;
            }
        }

        match workers.join(shutdown_timeout).await {
            Ok(()) => {}
            Err(Error::ShutdownTimeout { remaining: n }) => remaining += n,
            Err(e) => return Err(e),
        }

        if remaining > 0 {
            return Err(Error::ShutdownTimeout { remaining });
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Shape collector shut down");
        Ok(())
    }
}
