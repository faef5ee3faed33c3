mod config;
mod frame;
mod routes;
mod services;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use services::content::FileCompiler;
use services::session::SessionState;
use services::watcher::{ChangeWatcher, WatcherSettings};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = match config::AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        tracing::warn!(dir = %config.data_dir.display(), error = %e, "data dir unavailable; exports will fail");
    }

    let session = match config.presenter_token.clone() {
        Some(token) => {
            tracing::info!("presenter credential configured");
            SessionState::with_credential(token)
        }
        None => SessionState::new(),
    };
    let token = session.issue_presenter_credential();
    if config.presenter_token.is_none() {
        tracing::info!(%token, "presenter credential generated");
    }

    let compiler = Arc::new(FileCompiler::new(config.content_dir.clone()));
    let state = state::AppState::new(config, session, compiler);

    let watcher = ChangeWatcher::new(WatcherSettings::from_config(&state.config), state.reload_targets());
    if let Err(e) = watcher.start(&state.config.content_dir) {
        tracing::warn!(error = %e, "content watcher disabled");
    }

    let persistence = services::persistence::spawn_persistence_task(state.stores(), state.config.persist_interval);

    let port = state.config.port;
    let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%port, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!(%port, "podium listening");
    let app = routes::app(state.clone());
    let served = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await;
    if let Err(e) = served {
        tracing::error!(error = %e, "server failed");
    }

    watcher.stop();
    persistence.abort();
    services::persistence::flush_dirty(&state.stores()).await;
    tracing::info!("podium stopped");
}
