//! Market Dispatch Binary
//!
//! Replays a captured market-data session through the dispatch engines and
//! prints the result.
//!
//! # Usage
//!
//! ```bash
//! DISPATCH_REPLAY_SCRIPT=session.json cargo run --bin market-dispatch
//! ```
//!
//! A script with a `request` runs it to completion and prints the result
//! table as JSON. A script with a `subscription` streams its events into
//! the live field table until Ctrl+C/SIGTERM, then prints the final table.
//!
//! # Environment Variables
//!
//! ## Required
//! - `DISPATCH_REPLAY_SCRIPT`: Path of the replay script
//!
//! ## Optional
//! - `DISPATCH_REQUEST_DEADLINE_MS`: Request deadline, 0 = none (default: 0)
//! - `DISPATCH_SUBSCRIPTION_INTERVAL_SECS`: Default update interval (default: 0)
//! - `DISPATCH_DIAGNOSTICS_CAPACITY`: Status report buffer (default: 256)
//! - `DISPATCH_METRICS_ENABLED`: Install the Prometheus recorder (default: true)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-dispatch)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use market_dispatch::infrastructure::telemetry;
use market_dispatch::{
    DispatchConfig, ReplayScript, RequestContext, RequestEngine, ScriptMode, ScriptedGateway,
    StatusReport, SubscriptionEngine, SubscriptionEntry, TracingObserver, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting Market Dispatch");

    let config = DispatchConfig::from_env()?;
    log_config(&config);

    // Initialize Prometheus metrics
    let _metrics_handle = if config.metrics.enabled {
        Some(init_metrics().context("failed to install metrics recorder")?)
    } else {
        None
    };

    let script_path = config.replay_script()?;
    let script = ReplayScript::load(script_path)?;
    tracing::info!(
        script = %script_path.display(),
        events = script.events.len(),
        "Replay script loaded"
    );

    let gateway = Arc::new(ScriptedGateway::new());
    for event in script.events.iter().cloned() {
        gateway.push_event(event);
    }

    match script.mode()? {
        ScriptMode::Request(request) => {
            // Nothing follows the scripted response; the request is still sent
            gateway.close();
            run_request(gateway, request.clone(), &config).await?;
        }
        ScriptMode::Subscription(scripted) => {
            let entries = scripted
                .iter()
                .map(|s| s.to_entry(config.subscription.interval_seconds))
                .collect();
            run_subscription(gateway, entries, &config).await?;
        }
    }

    tracing::info!("Market Dispatch stopped");
    Ok(())
}

/// Execute the scripted request and print its result.
async fn run_request(
    gateway: Arc<ScriptedGateway>,
    request: RequestContext,
    config: &DispatchConfig,
) -> anyhow::Result<()> {
    let mut engine = RequestEngine::with_config(gateway, config.request.into());
    engine
        .observers()
        .register(Arc::new(TracingObserver::aggregate_only()));

    let outcome = tokio::select! {
        result = engine.execute(request) => result?,
        () = shutdown_signal() => {
            tracing::info!("Request abandoned");
            return Ok(());
        }
    };

    let stats = engine.stats().snapshot();
    tracing::info!(
        events = stats.events_pulled,
        notifications = stats.notifications,
        decode_errors = stats.decode_errors,
        unknown_tokens = stats.unknown_tokens,
        "Request finished"
    );

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

/// Stream the scripted subscription until shutdown and print the final
/// live table.
async fn run_subscription(
    gateway: Arc<ScriptedGateway>,
    entries: Vec<SubscriptionEntry>,
    config: &DispatchConfig,
) -> anyhow::Result<()> {
    let (status_tx, status_rx) = mpsc::channel(config.subscription.diagnostics_capacity);
    tokio::spawn(log_status_reports(status_rx));

    let engine = SubscriptionEngine::new(gateway).with_diagnostics(status_tx);
    engine.observers().register(Arc::new(TracingObserver::new()));

    let handle = engine.start(entries).await?;
    tracing::info!("Subscription streaming, press Ctrl+C to stop");

    shutdown_signal().await;

    let stats = handle.stats().snapshot();
    let table = handle.stop().await?;
    tracing::info!(
        events = stats.events_pulled,
        notifications = stats.notifications,
        decode_errors = stats.decode_errors,
        unknown_tokens = stats.unknown_tokens,
        "Subscription finished"
    );

    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(())
}

/// Log status reports forwarded by the subscription engine.
async fn log_status_reports(mut rx: mpsc::Receiver<StatusReport>) {
    while let Some(report) = rx.recv().await {
        tracing::debug!(
            kind = %report.kind,
            tokens = ?report.correlation_tokens,
            message_type = report.message_type.as_deref().unwrap_or("unknown"),
            "Status report"
        );
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &DispatchConfig) {
    tracing::info!(
        deadline = ?config.request.deadline,
        interval_secs = config.subscription.interval_seconds,
        diagnostics_capacity = config.subscription.diagnostics_capacity,
        metrics = config.metrics.enabled,
        "Configuration loaded"
    );
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
