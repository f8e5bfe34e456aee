use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    body::Body,
    http::{StatusCode, Uri, header},
    middleware,
    response::{Html, IntoResponse, Response},
};
use tower_http::cors::CorsLayer;

use super::api::{self, AppState};
use super::auth::AuthSettings;
use super::db::{DbHandle, PmoDb};
use super::embedded::Assets;
use super::request_tracing::request_tracing;
use crate::config::PmoConfig;

/// Everything `start_server` needs, resolved from `PmoConfig`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub cors: bool,
}

impl From<&PmoConfig> for ServerConfig {
    fn from(config: &PmoConfig) -> Self {
        Self {
            host: config.toml.server.host.clone(),
            port: config.toml.server.port,
            db_path: config.toml.database.path.clone(),
            cors: config.toml.server.cors,
        }
    }
}

/// Build the full application router: API, SPA fallback and layers.
pub fn build_router(state: Arc<AppState>, cors: bool) -> Router {
    let mut app = api::api_router(state).fallback(static_handler);
    if cors {
        app = app.layer(CorsLayer::permissive());
    }
    app.layer(middleware::from_fn(request_tracing))
}

/// Serve embedded static files or fall back to index.html for SPA routing.
async fn static_handler(uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');

    if !path.is_empty()
        && let Some(content) = Assets::get(path)
    {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        return Response::builder()
            .header(header::CONTENT_TYPE, mime.as_ref())
            .body(Body::from(content.data.into_owned()))
            .unwrap_or_else(|err| {
                tracing::error!(error = %err, path, "failed to build asset response");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            });
    }

    match Assets::get("index.html") {
        Some(content) => Html(String::from_utf8_lossy(&content.data).into_owned()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            "Frontend not found. Run 'npm run build' in ui/ directory.",
        )
            .into_response(),
    }
}

/// Open the database, build state and serve until Ctrl+C.
pub async fn start_server(config: &PmoConfig) -> Result<()> {
    let server = ServerConfig::from(config);

    if let Some(parent) = server.db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let db = PmoDb::new(&server.db_path).context("Failed to initialize PMO database")?;

    let state = Arc::new(AppState {
        db: DbHandle::new(db),
        auth: AuthSettings::from_config(config),
    });
    let app = build_router(state, server.cors);

    let addr = format!("{}:{}", server.host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr: SocketAddr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        db = %server.db_path.display(),
        cors = server.cors,
        "PMO toolbox listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
