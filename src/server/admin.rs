//! Remote management, guarded by the shared admin key.

use super::state::{GuardedRemoteStore, GuardedSyncOrchestrator, ServerState};
use crate::sync::{is_valid_remote_name, SyncError};
use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

const ADMIN_KEY_HEADER: &str = "x-key";

/// Proof that the request carried the admin key.
pub struct AdminAccess;

impl FromRequestParts<ServerState> for AdminAccess {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        let provided = parts
            .headers
            .get(ADMIN_KEY_HEADER)
            .and_then(|value| value.to_str().ok());
        match provided {
            Some(key) if !state.config.admin_key.is_empty() && key == state.config.admin_key => {
                Ok(AdminAccess)
            }
            _ => Err(StatusCode::FORBIDDEN),
        }
    }
}

#[derive(Serialize)]
struct RemoteStatus {
    name: String,
    url: String,
    last_sync: i64,
    syncing: bool,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct AddRemoteBody {
    name: Option<String>,
    url: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct DeleteRemoteBody {
    name: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct SyncRemoteBody {
    name: Option<String>,
    url: Option<String>,
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

async fn list_remotes(
    _admin: AdminAccess,
    State(remote_store): State<GuardedRemoteStore>,
    State(orchestrator): State<GuardedSyncOrchestrator>,
) -> Response {
    match remote_store.list_remotes() {
        Ok(remotes) => {
            let statuses: Vec<RemoteStatus> = remotes
                .into_iter()
                .map(|remote| RemoteStatus {
                    syncing: orchestrator.is_syncing(&remote.name),
                    name: remote.name,
                    url: remote.url,
                    last_sync: remote.last_sync,
                })
                .collect();
            Json(statuses).into_response()
        }
        Err(err) => {
            error!("Failed to list remotes: {:#}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn add_remote(
    _admin: AdminAccess,
    State(remote_store): State<GuardedRemoteStore>,
    Json(body): Json<AddRemoteBody>,
) -> Response {
    let name = body.name.unwrap_or_default();
    let url = body.url.unwrap_or_default();
    if !is_valid_remote_name(&name) {
        return bad_request("invalid remote name");
    }
    if url.trim().is_empty() {
        return bad_request("url is required");
    }

    match remote_store.upsert_remote(&name, url.trim()) {
        Ok(()) => {
            info!("Remote {} set to {}", name, url.trim());
            Json(json!({ "ok": true })).into_response()
        }
        Err(err) => {
            error!("Failed to store remote {}: {:#}", name, err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn delete_remote(
    _admin: AdminAccess,
    State(remote_store): State<GuardedRemoteStore>,
    State(orchestrator): State<GuardedSyncOrchestrator>,
    Json(body): Json<DeleteRemoteBody>,
) -> Response {
    let Some(name) = body.name.filter(|n| !n.is_empty()) else {
        return bad_request("name is required");
    };

    orchestrator.cancel(&name);
    match remote_store.delete_remote(&name) {
        Ok(removed) => {
            if removed {
                info!("Remote {} removed", name);
            }
            Json(json!({ "ok": true })).into_response()
        }
        Err(err) => {
            error!("Failed to delete remote {}: {:#}", name, err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn sync_remote(
    _admin: AdminAccess,
    State(remote_store): State<GuardedRemoteStore>,
    State(orchestrator): State<GuardedSyncOrchestrator>,
    Json(body): Json<SyncRemoteBody>,
) -> Response {
    let name = body.name.unwrap_or_default();
    if !is_valid_remote_name(&name) {
        return bad_request("invalid remote name");
    }

    let url = match body.url.filter(|u| !u.trim().is_empty()) {
        Some(url) => url,
        None => match remote_store.get_remote(&name) {
            Ok(Some(remote)) => remote.url,
            Ok(None) => return StatusCode::NOT_FOUND.into_response(),
            Err(err) => {
                error!("Failed to read remote {}: {:#}", name, err);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        },
    };

    match orchestrator.start(&name, &url) {
        Ok(()) => Json(json!({ "status": "started" })).into_response(),
        Err(SyncError::AlreadyRunning(_)) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "Sync already in progress" })),
        )
            .into_response(),
        Err(SyncError::InvalidRemoteName(_)) => bad_request("invalid remote name"),
    }
}

pub fn make_admin_routes(state: ServerState) -> Router {
    Router::new()
        .route("/list", get(list_remotes))
        .route("/add", post(add_remote))
        .route("/del", post(delete_remote))
        .route("/sync", post(sync_remote))
        .with_state(state)
}
