//! Gateway process entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use gateway_config::{load_settings, Settings};
use gateway_llm::HttpLlmBackend;
use gateway_server::{AppState, ResourceManager, SessionRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::var("GATEWAY_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("failed to load configuration: {err}. Using defaults.");
            Settings::default()
        }
    };
    settings.validate()?;

    init_tracing(&settings);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?settings.environment,
        "starting gateway"
    );

    let settings = Arc::new(settings);

    let registry = Arc::new(SessionRegistry::new(settings.server.max_concurrent_sessions));
    let resource_manager = Arc::new(ResourceManager::new(
        registry.clone(),
        Duration::from_millis(settings.session.idle_timeout_ms),
        Duration::from_millis(settings.session.max_duration_ms),
        Duration::from_millis(settings.session.sweep_interval_ms),
        Duration::from_millis(settings.server.shutdown_per_session_timeout_ms),
    ));
    let sweep_handle = resource_manager.clone().spawn();

    let llm_backend: Arc<dyn gateway_llm::LlmBackend> =
        Arc::new(HttpLlmBackend::new((&settings.llm).into())?);

    let state = Arc::new(AppState::new(
        settings.clone(),
        registry,
        resource_manager.clone(),
        llm_backend,
    ));

    if settings.observability.metrics_enabled {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], settings.observability.metrics_port));
        gateway_server::metrics::init_metrics(metrics_addr)?;
        tracing::info!(%metrics_addr, "metrics listening");
    }

    let app = gateway_server::create_router(state);
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, ws_path = %settings.server.ws_path, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweep_handle.abort();
    resource_manager.shutdown().await;
    tracing::info!("gateway shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
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
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("gateway_server={level},gateway_pipeline={level},gateway_llm={level},tower_http=info",
            level = settings.observability.log_level)
            .into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if settings.environment.wants_json_logs() {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
