#![doc = include_str!("../README.md")]

mod config;
mod feed;
mod telemetry;

use clap::Parser;
use config::{AppConfig, CliArgs};
use shape_collector::ShapeCollector;
use std::sync::Arc;
use telemetry::{init_telemetry, register_pipeline_metrics, shutdown_telemetry};
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = AppConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let result = run(config).await;

    shutdown_telemetry(providers);
    result
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let pipeline = ShapeCollector::new(config.collector.clone(), config.fetcher())?.start()?;
    let handle = pipeline.handle;
    register_pipeline_metrics(Arc::clone(handle.stats()));

    let producer = tokio::spawn(feed::send_locations(pipeline.locations, config.feed));
    let mut consumer = tokio::spawn(feed::consume_shapes(pipeline.shapes));
    let stats = Arc::clone(handle.stats());

    let received = tokio::select! {
        () = shutdown_signal() => {
            #[cfg(feature = "tracing")]
            tracing::info!("Shutdown signal received, terminating...");
            producer.abort();
            if let Err(_e) = handle.shutdown().await {
                #[cfg(feature = "tracing")]
                tracing::error!("Error during pipeline shutdown: {:?}", _e);
            }
            consumer.await?
        }
        received = &mut consumer => {
            let received = received?;
            handle.join().await?;
            received
        }
    };

    // The producer has either finished or been aborted by now.
    let _sent = match producer.await {
        Ok(sent) => sent,
        Err(e) if e.is_cancelled() => 0,
        Err(e) => return Err(e.into()),
    };

    let _summary = stats.snapshot();
    #[cfg(feature = "tracing")]
    tracing::info!(
        "Received {} shapes ({} locations sent): {:?}",
        received,
        _sent,
        _summary
    );
    #[cfg(not(feature = "tracing"))]
    println!("Received {received} shapes");

    Ok(())
}

fn log_startup_info(_config: &AppConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!("Starting shape collector with full config: {:#?}", _config);
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting shape collector with {} workers for {:?}",
            _config.collector.num_workers,
            _config.feed.duration
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {_e}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {_e}");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }
}
