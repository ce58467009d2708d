//! Boot: load config, connect storage/KV, run migrations, assemble
//! `AppState`, spawn the background event batcher, serve HTTP/WS, shut down
//! on SIGINT/SIGTERM. Grounded in the teacher's `main.rs` boot order
//! (dotenv → config → logging → pool → router → serve), translated from its
//! actix-web/env_logger stack to this crate's axum/tracing one.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use wa_analytics_server::api::{self, AppState};
use wa_analytics_server::bus::EventBus;
use wa_analytics_server::config::AppConfig;
use wa_analytics_server::correlation::{CorrelationEngine, VerificationManager};
use wa_analytics_server::journey::JourneyMapper;
use wa_analytics_server::kv::KvGateway;
use wa_analytics_server::metrics::{MetricsCacheConfig, MetricsContext};
use wa_analytics_server::storage::StorageGateway;
use wa_analytics_server::whatsapp::{EventProcessor, MessageHandler, SessionSupervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    init_tracing(&config);

    let storage = Arc::new(StorageGateway::connect(&config.database)?);
    storage.run_migrations()?;
    let kv = Arc::new(KvGateway::connect(&config.redis).await?);
    let bus = Arc::new(EventBus::new(kv.clone()));

    let messages = Arc::new(MessageHandler::new(storage.clone()));
    let supervisor = Arc::new(SessionSupervisor::new(
        storage.clone(),
        kv.clone(),
        bus.clone(),
        messages.clone(),
        config.session.max_sessions,
    ));
    let verification = Arc::new(VerificationManager::new(storage.clone(), kv.clone()));
    let correlation = Arc::new(CorrelationEngine::new(storage.clone(), verification.clone()));
    let journey = Arc::new(JourneyMapper::new(storage.clone()));
    let metrics = MetricsContext::new(storage.clone(), kv.clone(), MetricsCacheConfig::default());
    let event_processor = Arc::new(EventProcessor::new(storage.clone(), kv.clone(), bus.clone(), config.event.batch_size));

    spawn_event_batcher(event_processor, config.event.process_interval_ms);

    let state = AppState {
        storage,
        kv,
        bus,
        supervisor,
        messages,
        correlation,
        verification,
        journey,
        metrics,
        config: Arc::new(config.clone()),
    };

    let app = api::router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log.structured {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Drains the cross-tenant event queue every `process_interval_ms` until
/// shutdown; the processor's own single-flight guard absorbs overlap if a
/// batch runs long (spec.md §4.6).
fn spawn_event_batcher(processor: Arc<EventProcessor>, process_interval_ms: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(process_interval_ms));
        loop {
            ticker.tick().await;
            match processor.drain_batch().await {
                Ok(0) => {}
                Ok(n) => tracing::debug!(drained = n, "event batch inserted"),
                Err(e) => tracing::warn!(error = %e, "event batch drain failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
