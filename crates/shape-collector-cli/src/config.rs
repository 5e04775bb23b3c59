use anyhow::bail;
use clap::Parser;
use core::{num::NonZeroU64, time::Duration};
use shape_collector::{CollectorConfig, SimulatedFetcher};

/// Runtime configuration for the `shape-collector` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first if present).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "shape-collector",
    version,
    about = "Feeds random locations through a deduplicating shape pipeline"
)]
pub struct CliArgs {
    /// Number of concurrent fetch workers.
    ///
    /// At most this many fetches run at the same time.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 4)]
    pub num_workers: usize,

    /// Simulated latency of a single fetch, in milliseconds.
    ///
    /// Environment variable: `FETCH_LATENCY_MS`
    #[arg(long, env = "FETCH_LATENCY_MS", default_value_t = 10)]
    pub fetch_latency_ms: u64,

    /// Make every N-th fetch fail. Failed fetches are counted and dropped.
    ///
    /// Environment variable: `FAIL_EVERY`
    #[arg(long, env = "FAIL_EVERY")]
    pub fail_every: Option<u64>,

    /// How long the random feed keeps producing locations, in milliseconds.
    ///
    /// When the feed stops, the pipeline drains and the program exits.
    ///
    /// Environment variable: `FEED_DURATION_MS`
    #[arg(long, env = "FEED_DURATION_MS", default_value_t = 3000)]
    pub feed_duration_ms: u64,

    /// Draw coordinates from `[-range, range]` instead of the full `i32`
    /// space. Small ranges produce many duplicates.
    ///
    /// Environment variable: `COORDINATE_RANGE`
    #[arg(long, env = "COORDINATE_RANGE")]
    pub coordinate_range: Option<u32>,

    /// Capacity of the producer → dispatcher channel.
    ///
    /// Environment variable: `INBOUND_BUFFER_SIZE`
    #[arg(long, env = "INBOUND_BUFFER_SIZE", default_value_t = 1)]
    pub inbound_buffer_size: usize,

    /// Capacity of the dispatcher → worker channel.
    ///
    /// Environment variable: `DISTRIBUTION_BUFFER_SIZE`
    #[arg(long, env = "DISTRIBUTION_BUFFER_SIZE", default_value_t = 1)]
    pub distribution_buffer_size: usize,

    /// Capacity of the worker → dispatcher completion channel. Defaults to
    /// the number of workers.
    ///
    /// Environment variable: `COMPLETION_BUFFER_SIZE`
    #[arg(long, env = "COMPLETION_BUFFER_SIZE")]
    pub completion_buffer_size: Option<usize>,

    /// Capacity of the worker → consumer channel.
    ///
    /// Environment variable: `OUTPUT_BUFFER_SIZE`
    #[arg(long, env = "OUTPUT_BUFFER_SIZE", default_value_t = 1)]
    pub output_buffer_size: usize,

    /// Seconds each task is given to stop after Ctrl-C or SIGTERM.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,
}

/// Settings for the random location feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedConfig {
    pub duration: Duration,
    /// `None` draws from the full `i32` space.
    pub range: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub collector: CollectorConfig,
    pub feed: FeedConfig,
    pub fetch_latency: Duration,
    pub fail_every: Option<NonZeroU64>,
}

impl AppConfig {
    pub fn fetcher(&self) -> SimulatedFetcher {
        let fetcher = SimulatedFetcher::new(self.fetch_latency);
        match self.fail_every {
            Some(k) => fetcher.with_fail_every(k),
            None => fetcher,
        }
    }
}

impl TryFrom<CliArgs> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        if args.feed_duration_ms == 0 {
            bail!("FEED_DURATION_MS must be greater than 0");
        }

        let fail_every = match args.fail_every {
            Some(0) => bail!("FAIL_EVERY must be greater than 0"),
            Some(k) => NonZeroU64::new(k),
            None => None,
        };

        let range = match args.coordinate_range {
            Some(r) => Some(i32::try_from(r).map_err(|_| {
                anyhow::anyhow!("COORDINATE_RANGE ({r}) exceeds i32::MAX ({})", i32::MAX)
            })?),
            None => None,
        };

        let collector = CollectorConfig::new(args.num_workers)
            .with_inbound_buffer_size(args.inbound_buffer_size)
            .with_distribution_buffer_size(args.distribution_buffer_size)
            .with_completion_buffer_size(args.completion_buffer_size.unwrap_or(args.num_workers))
            .with_output_buffer_size(args.output_buffer_size)
            .with_shutdown_timeout(Duration::from_secs(args.shutdown_timeout));
        collector.validate()?;

        Ok(Self {
            collector,
            feed: FeedConfig {
                duration: Duration::from_millis(args.feed_duration_ms),
                range,
            },
            fetch_latency: Duration::from_millis(args.fetch_latency_ms),
            fail_every,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<AppConfig> {
        let args = CliArgs::try_parse_from(core::iter::once("shape-collector").chain(args.iter().copied()))?;
        AppConfig::try_from(args)
    }

    #[test]
    fn defaults_mirror_collector_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.collector, CollectorConfig::new(4));
        assert_eq!(config.feed.duration, Duration::from_secs(3));
        assert_eq!(config.feed.range, None);
        assert_eq!(config.fetch_latency, Duration::from_millis(10));
        assert_eq!(config.fetcher().latency(), Duration::from_millis(10));
    }

    #[test]
    fn completion_buffer_follows_worker_count() {
        let config = parse(&["--num-workers", "16"]).unwrap();
        assert_eq!(config.collector.completion_buffer_size, 16);

        let config = parse(&["--num-workers", "16", "--completion-buffer-size", "2"]).unwrap();
        assert_eq!(config.collector.completion_buffer_size, 2);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(parse(&["--num-workers", "0"]).is_err());
        assert!(parse(&["--fail-every", "0"]).is_err());
        assert!(parse(&["--output-buffer-size", "0"]).is_err());
        assert!(parse(&["--coordinate-range", "3000000000"]).is_err());
        assert!(parse(&["--coordinate-range", "8"]).unwrap().feed.range == Some(8));
    }
}
