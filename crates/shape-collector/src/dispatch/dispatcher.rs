//! Deduplicating dispatcher.
//!
//! The [`Dispatcher`] is the only owner of the in-flight set. It multiplexes
//! three event sources in one `tokio::select!` with no fixed priority:
//!
//! - a completion signal from a worker, which releases a location;
//! - a new inbound location, which is admitted unless already in flight;
//! - a free slot on the distribution channel for the pending location.
//!
//! Forwarding and completion handling live in the same wait, so a dispatcher
//! that is blocked handing work to busy workers still releases locations as
//! they finish. While a location is pending, inbound is not read and the
//! producer feels the back-pressure.

use crate::{Location, PipelineStats};
use std::{collections::HashSet, sync::Arc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct Dispatcher {
    in_flight: HashSet<Location>,
    stats: Arc<PipelineStats>,
    shutdown_token: CancellationToken,
}

impl Dispatcher {
    /// Creates a dispatcher with an empty in-flight set.
    ///
    /// `stats` receives every admission, duplicate and completion;
    /// cancelling `shutdown_token` stops [`Dispatcher::run`].
    pub fn new(stats: Arc<PipelineStats>, shutdown_token: CancellationToken) -> Self {
        Self {
            in_flight: HashSet::new(),
            stats,
            shutdown_token,
        }
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    #[cfg(test)]
    fn is_in_flight(&self, location: &Location) -> bool {
        self.in_flight.contains(location)
    }

    /// Records `location` as in flight.
    ///
    /// Returns `false`, and leaves the set untouched, if the location is
    /// already being processed.
    fn admit(&mut self, location: Location) -> bool {
        self.stats.record_received();

        if !self.in_flight.insert(location) {
            self.stats.record_duplicate();
            #[cfg(feature = "tracing")]
            tracing::trace!(%location, "Dropping duplicate location");
            return false;
        }

        self.stats.record_admitted(self.in_flight.len());
        true
    }

    /// Releases `location`. Releasing a location that is not in flight is a
    /// no-op apart from the completion counter.
    fn release(&mut self, location: Location) {
        let _removed = self.in_flight.remove(&location);
        #[cfg(feature = "tracing")]
        if !_removed {
            tracing::debug!(%location, "Completion for a location that was not in flight");
        }
        self.stats.record_completed(self.in_flight.len());
    }

    /// Runs the dispatch loop.
    ///
    /// The loop ends when:
    /// - the shutdown token is cancelled (abrupt, in-flight work abandoned);
    /// - `inbound` is closed and every admitted location has completed
    ///   (graceful drain);
    /// - every worker is gone, so nothing could ever complete again.
    ///
    /// Dropping `to_workers` on return closes the distribution channel, which
    /// lets idle workers exit.
    #[cfg_attr(feature = "tracing", tracing::instrument(name = "dispatcher", skip_all))]
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Location>,
        to_workers: async_channel::Sender<Location>,
        mut completions: mpsc::Receiver<Location>,
    ) {
        let shutdown = self.shutdown_token.clone();
        let mut pending: Option<Location> = None;
        let mut inbound_open = true;

        #[cfg(feature = "tracing")]
        tracing::debug!("Dispatcher started");

        loop {
            if !inbound_open && pending.is_none() && self.in_flight.is_empty() {
                #[cfg(feature = "tracing")]
                tracing::debug!("Inbound closed and all locations released");
                break;
            }

            tokio::select! {
                () = shutdown.cancelled() => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        in_flight = self.in_flight.len(),
                        "Dispatcher cancelled"
                    );
                    break;
                }
                completion = completions.recv() => match completion {
                    Some(location) => self.release(location),
                    None => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("All workers gone, stopping dispatcher");
                        break;
                    }
                },
                sent = forward(&to_workers, pending), if pending.is_some() => match sent {
                    Ok(()) => pending = None,
                    Err(_e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Distribution channel closed: {_e}");
                        break;
                    }
                },
                arrival = inbound.recv(), if inbound_open && pending.is_none() => match arrival {
                    Some(location) => {
                        if self.admit(location) {
                            pending = Some(location);
                        }
                    }
                    None => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(
                            in_flight = self.in_flight.len(),
                            "Inbound closed, draining"
                        );
                        inbound_open = false;
                    }
                },
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Dispatcher stopped");
    }
}

/// Hands `pending` to a worker, or never resolves when there is nothing to
/// hand over.
async fn forward(
    to_workers: &async_channel::Sender<Location>,
    pending: Option<Location>,
) -> Result<(), async_channel::SendError<Location>> {
    match pending {
        Some(location) => to_workers.send(location).await,
        None => core::future::pending().await,
    }
}
