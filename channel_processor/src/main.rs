#![warn(clippy::pedantic)]

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use channel_processor::amqp::consume_uplinks;
use channel_processor::error::MainError;
use channel_processor::metrics::describe as describe_metrics;
use channel_processor::pipeline::ChannelPipeline;
use channel_processor::store::PgChannelStore;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::RwLock;
use shared::error::InitializationError;
use shared::{initialize_db, load_config, shutdown_listener};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), MainError> {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(InitializationError::from)?;

    // Set up config
    let config = load_config().map_err(InitializationError::from)?;
    info!(name: "config.loaded", config = ?config, "config loaded");

    // Initialize DB
    let db_pool = initialize_db(&config.postgres, true).await?;

    // Prometheus registry, rendered by the axum /metrics route
    let prometheus = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();

    // Arc for state for health check endpoint
    let last_processed = Arc::new(RwLock::new(None));

    let store = Arc::new(PgChannelStore::new(db_pool));
    let pipeline = ChannelPipeline::new(store, Arc::clone(&last_processed));

    // Intake buffer: the bounded hand-off between the AMQP receive loop and
    // the pipeline. Its capacity plus the prefetch window is the only
    // backpressure toward the broker.
    let (intake_tx, intake_rx) = mpsc::channel::<Vec<u8>>(config.intake.capacity.max(1));

    // Cancellation token shared across tasks; listener cancels on SIGINT/SIGTERM.
    let shutdown_token = CancellationToken::new();

    let mut signal_handle = tokio::spawn(shutdown_listener(Some(shutdown_token.clone())));
    let mut axum_handle = tokio::spawn(run_metrics_server(
        config.metrics.port,
        AxumState {
            prometheus,
            last_processed,
        },
        shutdown_token.clone(),
    ));
    let amqp_config = config.amqp.clone();
    let consumer_token = shutdown_token.clone();
    let mut consumer_handle =
        tokio::spawn(async move { consume_uplinks(&amqp_config, intake_tx, consumer_token).await });
    let mut pipeline_handle = tokio::spawn(pipeline.run(intake_rx));

    let mut first_err: Option<MainError> = None;
    let mut axum_done = false;
    let mut consumer_done = false;
    let mut pipeline_done = false;

    tokio::select! {
        res = &mut axum_handle => {
            info!("axum task completed first, propagating cancellation token to other tasks");
            axum_done = true;
            shutdown_token.cancel();
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = ?e, "axum task completed due to error");
                    first_err.get_or_insert(e.into());
                }
                Err(join) => {
                    warn!(error = ?join, "axum task completed due to error");
                    first_err.get_or_insert(join.into());
                }
            }
        }
        res = &mut consumer_handle => {
            info!("AMQP consumer task completed first, propagating cancellation token to other tasks");
            consumer_done = true;
            shutdown_token.cancel();
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = ?e, "AMQP consumer task completed due to error");
                    first_err.get_or_insert(e.into());
                }
                Err(join) => {
                    warn!(error = ?join, "AMQP consumer task completed due to error");
                    first_err.get_or_insert(join.into());
                }
            }
        }
        res = &mut pipeline_handle => {
            info!("pipeline task completed first, propagating cancellation token to other tasks");
            pipeline_done = true;
            shutdown_token.cancel();
            if let Err(join) = res {
                warn!(error = ?join, "pipeline task completed due to error");
                first_err.get_or_insert(join.into());
            }
        }
        res = &mut signal_handle => {
            info!("SIGINT/SIGTERM listener task completed first, propagating cancellation token to other tasks");
            shutdown_token.cancel();
            if let Err(join) = res {
                warn!(error = ?join, "error with SIGINT/SIGTERM listener task");
                first_err.get_or_insert(join.into());
            }
        }
    }

    if !consumer_done {
        info!("awaiting completion of AMQP consumer task");
        match consumer_handle.await {
            Ok(Ok(())) => {
                info!("AMQP consumer task completed successfully");
            }
            Ok(Err(e)) => {
                info!(error = ?e, "AMQP consumer task completed with error");
                first_err.get_or_insert(e.into());
            }
            Err(join) => {
                info!(error = ?join, "AMQP consumer task completed with error");
                first_err.get_or_insert(join.into());
            }
        }
    }
    if !pipeline_done {
        info!("awaiting completion of pipeline task");
        match pipeline_handle.await {
            Ok(()) => {
                info!("pipeline task completed successfully");
            }
            Err(join) => {
                info!(error = ?join, "pipeline task completed with error");
                first_err.get_or_insert(join.into());
            }
        }
    }
    if !axum_done {
        info!("awaiting completion of axum task");
        match axum_handle.await {
            Ok(Ok(())) => {
                info!("axum task completed successfully");
            }
            Ok(Err(e)) => {
                info!(error = ?e, "axum task completed with error");
                first_err.get_or_insert(e.into());
            }
            Err(join) => {
                info!(error = ?join, "axum task completed with error");
                first_err.get_or_insert(join.into());
            }
        }
    }

    if let Some(err) = first_err {
        Err(err)
    } else {
        Ok(())
    }
}

#[derive(Clone)]
struct AxumState {
    prometheus: PrometheusHandle,
    last_processed: Arc<RwLock<Option<DateTime<Utc>>>>,
}

async fn run_metrics_server(
    port: u16,
    state: AxumState,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    info!(port, "starting axum metrics server");
    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .route("/health", get(health_check))
        .with_state(state);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}

async fn render_metrics(State(state): State<AxumState>) -> String {
    state.prometheus.render()
}

async fn health_check(State(state): State<AxumState>) -> impl IntoResponse {
    let last_processed = *state.last_processed.read();
    let msg = if let Some(timestamp) = last_processed {
        format!("Last processed delivery at: {timestamp}")
    } else {
        "No deliveries processed yet".into()
    };

    (StatusCode::OK, msg)
}
