use std::error::Error;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use conflux_core::config::{Settings, SinkKind};
use conflux_core::consumer::FanInConsumer;
use conflux_core::metrics::start_metrics_server;
use conflux_core::sink::blackhole::BlackholeSink;
use conflux_core::sink::log::LogSink;
use conflux_kafka::KafkaLogClient;

mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    if let Err(e) = run().await {
        error!("{e:?}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let settings = Settings::load()?;
    info!(?settings, "Starting Conflux");

    // wait for SIG{INT,TERM} and invoke the cancellation token.
    let cln_token = CancellationToken::new();
    let shutdown_cln_token = cln_token.clone();
    let shutdown_handle = tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_cln_token.cancel();
    });

    let metrics_addr = settings.metrics_addr;
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_addr).await {
            error!(?e, "Metrics server exited");
        }
    });

    let mut client = KafkaLogClient::connect((&settings.log).into()).await?;
    let streams = client.partition_streams()?;
    let session = client.session()?;
    info!(partitions = streams.len(), "Claimed partition streams");

    let result = match settings.sink {
        SinkKind::Log => {
            FanInConsumer::new(LogSink, session)
                .run(streams, cln_token.clone())
                .await
        }
        SinkKind::Blackhole => {
            FanInConsumer::new(BlackholeSink, session)
                .run(streams, cln_token.clone())
                .await
        }
    };

    if let Err(e) = result {
        // abort the signal handler task since we are shutting down on error
        if !shutdown_handle.is_finished() {
            shutdown_handle.abort();
        }
        return Err(e.into());
    }

    info!("Gracefully Exiting...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("Received Ctrl+C signal");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
        info!("Received terminate signal");
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
