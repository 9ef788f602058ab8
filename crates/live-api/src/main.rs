use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use live_api::sweeper::run_sweeper;
use live_api::{AppState, LiveRegistry, Services, build_router};
use shared::config::{LiveApiConfig, load_dotenv};
use shared::session_mirror_redis::RedisSessionMirror;
use shared::session_store::SessionStore;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(err) = load_dotenv() {
        eprintln!("{err}");
        std::process::exit(1);
    }

    let config = match LiveApiConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load live api config: {err}");
            std::process::exit(1);
        }
    };

    init_tracing(config.log_json);

    let sessions = match config.redis_url.as_deref() {
        Some(redis_url) => match RedisSessionMirror::connect(redis_url).await {
            Ok(mirror) => {
                info!("session store mirrored to redis");
                SessionStore::with_mirror(config.session_ttl_seconds, Arc::new(mirror))
            }
            Err(err) => {
                error!(error = %err, "failed to connect to redis");
                std::process::exit(1);
            }
        },
        None => SessionStore::in_memory(config.session_ttl_seconds),
    };

    let services = match Services::from_config(&config, sessions) {
        Ok(services) => Arc::new(services),
        Err(err) => {
            error!(error = %err, "failed to build live api services");
            std::process::exit(1);
        }
    };

    let registry = LiveRegistry::new();
    let sweeper = tokio::spawn(run_sweeper(
        services.clone(),
        Duration::from_secs(config.sweep_interval_seconds),
        registry.subscribe_shutdown(),
    ));

    let app = build_router(AppState::new(
        services,
        registry.clone(),
        config.max_upload_bytes,
        config.detector.model_id.clone(),
    ));

    let addr: SocketAddr = match config.bind_addr.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, bind_addr = %config.bind_addr, "invalid bind address");
            std::process::exit(1);
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, %addr, "failed to bind listener");
            std::process::exit(1);
        }
    };

    info!(
        addr = %listener.local_addr().unwrap_or(addr),
        session_ttl_seconds = config.session_ttl_seconds,
        "live api listening"
    );

    let shutdown_registry = registry.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = signal::ctrl_c().await {
                error!(error = %err, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
            shutdown_registry.drain();
        })
        .await;
    if let Err(err) = served {
        error!(error = %err, "live api server failed");
        registry.drain();
    }

    if let Err(err) = sweeper.await {
        error!(error = %err, "session sweeper task failed");
    }
}

fn init_tracing(log_json: bool) {
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "live_api=info,shared=info,axum=info".to_string());
    if log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
