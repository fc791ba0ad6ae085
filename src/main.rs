//! Process entry point: load configuration, initialize tracing, build the
//! dependency container, serve HTTP, shut down gracefully on signal.

use anyhow::Context;
use marketdata_service::api::{self, AppState};
use marketdata_service::config::{LogFormat, LogOutput, SystemConfig};
use marketdata_service::container::Container;
use marketdata_service::middleware::rate_limit::RateLimiter;
use std::process::ExitCode;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

fn init_tracing(config: &marketdata_service::config::LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("marketdata_service={},tower_http=info", config.level).into());

    let registry = tracing_subscriber::registry().with(filter);

    match config.output {
        LogOutput::Stdout | LogOutput::Stderr => {
            let json = matches!(config.format, LogFormat::Json);
            if json {
                registry.with(tracing_subscriber::fmt::layer().json()).init();
            } else {
                registry.with(tracing_subscriber::fmt::layer()).init();
            }
            None
        }
        LogOutput::File | LogOutput::Both => {
            let rotation = &config.rotation;
            let appender = tracing_appender::rolling::daily(&rotation.directory, &rotation.file_prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let json = matches!(config.format, LogFormat::Json);

            let file_layer = if json {
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .boxed()
            } else {
                tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .boxed()
            };

            if matches!(config.output, LogOutput::Both) {
                registry.with(file_layer).with(tracing_subscriber::fmt::layer()).init();
            } else {
                registry.with(file_layer).init();
            }
            Some(guard)
        }
    }
}

fn build_cors(config: &marketdata_service::config::CorsConfig) -> CorsLayer {
    let origin = if config.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins: Vec<axum::http::HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        AllowOrigin::list(origins)
    };
    let methods: Vec<axum::http::Method> = config
        .allowed_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();
    let headers: Vec<axum::http::HeaderName> = config
        .allowed_headers
        .iter()
        .filter_map(|h| h.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(methods)
        .allow_headers(headers)
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn run() -> anyhow::Result<()> {
    let config = SystemConfig::from_env().context("loading configuration")?;
    let _log_guard = init_tracing(&config.logging);

    info!(app = %config.app.name, version = %config.app.version, env = %config.app.env, "starting");

    let container = Container::build(config.clone())
        .await
        .context("building dependency container")?;

    let limiter = Arc::new(RateLimiter::new(config.api.rate_limit.clone()));
    let state = AppState::from_container(&container);

    let app = api::router(state)
        .layer(axum::middleware::from_fn_with_state(
            limiter,
            marketdata_service::middleware::rate_limit::enforce,
        ))
        .layer(axum::middleware::from_fn(
            marketdata_service::middleware::logging::request_logging,
        ))
        .layer(build_cors(&config.api.cors));

    let addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown signal received, draining");
    container.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

fn main() -> ExitCode {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run()) {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            error!(error = %e, "fatal error");
            ExitCode::from(2)
        }
    }
}
