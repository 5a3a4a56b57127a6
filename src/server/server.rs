use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use super::admin::make_admin_routes;
use super::peer_api::make_peer_routes;
use super::stream::stream_file;
use super::{log_requests, state::*};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub tracks: usize,
    pub version: &'static str,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> Response {
    let tracks = match state.track_index.count_verified() {
        Ok(count) => count,
        Err(err) => {
            error!("Failed to count tracks: {:#}", err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    Json(ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        tracks,
        version: env!("CARGO_PKG_VERSION"),
    })
    .into_response()
}

pub fn make_app(state: ServerState) -> Router {
    let home_router: Router = Router::new()
        .route("/", get(home))
        .route("/stream", get(stream_file))
        .with_state(state.clone());

    let mut app: Router = home_router
        .merge(make_peer_routes(state.clone()))
        .nest("/api/admin", make_admin_routes(state.clone()));

    app = app.layer(middleware::from_fn_with_state(state.clone(), log_requests));
    app.layer(CorsLayer::permissive())
}

/// Serves until `shutdown` resolves, then drains in-flight requests.
pub async fn run_server<F>(state: ServerState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let port = state.config.port;
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Listening on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server failed")
}
