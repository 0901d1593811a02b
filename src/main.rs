//! # TalentAI Avatar Backend - Main Application Entry Point
//!
//! Boots the HTTP server that fronts the avatar streaming pipeline:
//!
//! 1. **Loads configuration** from config.toml and environment variables
//! 2. **Sets up logging** via tracing
//! 3. **Creates the session manager** and starts its idle-eviction heartbeat
//! 4. **Configures the HTTP server** with middleware and routes (REST API
//!    plus the signaling WebSocket)
//! 5. **Handles graceful shutdown**: SIGTERM/SIGINT close every live viewer
//!    session before the server stops

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use talentai_avatar_backend::config::AppConfig;
use talentai_avatar_backend::handlers;
use talentai_avatar_backend::health;
use talentai_avatar_backend::middleware::RequestTelemetry;
use talentai_avatar_backend::session::{LogObserver, SessionManager};
use talentai_avatar_backend::state::AppState;
use talentai_avatar_backend::websocket::{
    signaling_websocket, LoopbackMediaGateway, MediaGateway,
};

/// Global shutdown flag flipped by the signal handlers.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting talentai-avatar-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{}",
        config.server.host, config.server.port
    );

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    // The session manager owns the viewer pool exclusively; handlers and
    // sockets reach it through the shared handle
    let manager = Arc::new(SessionManager::new(
        &config.session,
        &config.streaming,
        Arc::new(LogObserver),
    ));
    manager.clone().start_heartbeat();

    // The neural renderer is an external collaborator; without one attached
    // the loopback gateway answers demo and validation sessions
    let gateway: Arc<dyn MediaGateway> = Arc::new(LoopbackMediaGateway);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let manager_data = web::Data::from(manager.clone());
    let gateway_data = web::Data::from(gateway);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(manager_data.clone())
            .app_data(gateway_data.clone())
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(RequestTelemetry)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/sessions", web::get().to(handlers::list_sessions))
                    .route("/encode", web::post().to(handlers::encode_frames))
                    .route("/encode/upload", web::post().to(handlers::encode_upload)),
            )
            .route("/ws/signaling", web::get().to(signaling_websocket))
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            // Live viewers are closed with reason "server_shutdown" before
            // the HTTP listener goes away
            manager.shutdown();
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "talentai_avatar_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Install SIGTERM/SIGINT handlers that flip the global shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag without blocking other tasks.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
