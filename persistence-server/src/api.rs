use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use persistence_models::{PersistenceAction, PersistenceActionStatus, GROUP, VERSION};
use persistence_operator::informer::Store;
use persistence_operator::jobs::JobRunLister;
use persistence_operator::names::STATUS_RESOURCE;
use persistence_operator::status::compute_status;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared API state
#[derive(Clone)]
pub struct AppState {
    /// Informer cache of PersistenceActions
    pub store: Store<PersistenceAction>,
    pub job_runs: Arc<dyn JobRunLister>,
}

/// Route of the status endpoint, mirroring the resource's API path
pub fn status_route() -> String {
    format!(
        "/apis/{}/{}/namespaces/:namespace/{}/:name/status",
        GROUP, VERSION, STATUS_RESOURCE
    )
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route(&status_route(), get(get_action_status))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `listener` until `cancel` fires
pub async fn serve(listener: TcpListener, state: AppState, cancel: CancellationToken) -> Result<()> {
    let app = create_router(state);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!("API server listening on {}", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    tracing::info!("API server stopped");
    Ok(())
}

// ============================================================================
// Health Check
// ============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let synced = state.store.has_synced();
    Json(serde_json::json!({
        "status": if synced { "healthy" } else { "starting" },
        "service": "persistence-operator",
        "version": env!("CARGO_PKG_VERSION"),
        "synced": synced,
    }))
}

// ============================================================================
// PersistenceAction status
// ============================================================================

/// The cached action with its status evaluated from the cluster's Job runs
async fn get_action_status(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<PersistenceAction>, AppError> {
    let key = format!("{}/{}", namespace, name);
    let cached = state
        .store
        .get_by_key(&key)
        .map_err(|e| AppError::BadRequest(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("PersistenceAction '{}' not found", key)))?;

    let mut action = PersistenceAction::clone(&cached);
    let status = match compute_status(state.job_runs.as_ref(), &action).await {
        Ok(status) => status,
        Err(e) => {
            tracing::error!("Failed to evaluate status of {}: {}", key, e);
            PersistenceActionStatus::default()
        }
    };
    action.status = Some(status);

    Ok(Json(action))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
